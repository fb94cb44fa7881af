//! Log level parsing and the optional `tracing` subscriber.
//!
//! The `log` backend itself is installed by the binary; library code only
//! emits records.

use log::LevelFilter;

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

/// Parse the configuration's `log_level`: `"trace" | "debug" | "info" |
/// "warn" | "error" | "off"`, any case.
pub fn parse_level(s: &str) -> Option<LevelFilter> {
    s.trim().parse().ok()
}

/// Install a `tracing` subscriber; `RUST_LOG` overrides `default_filter`.
///
/// Plain output is compact with uptime stamps and closes each tick span;
/// JSON output puts the current span's fields (tick, now) on every event.
/// Both include the thread name.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool, default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = fmt().with_env_filter(filter).with_thread_names(true);
    let installed = if json {
        builder
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .finish()
            .try_init()
    } else {
        builder
            .compact()
            .with_span_events(FmtSpan::CLOSE)
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init()
    };
    // the host application may already have installed one
    let _ = installed;
}
