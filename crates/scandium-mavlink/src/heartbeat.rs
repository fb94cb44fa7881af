//! Background heartbeat exchange with the autopilot.
//!
//! The task owns its own transport handle and is the only writer of the
//! shared [`LinkMonitor`]. The tick loop reads `LinkHealth` from the monitor
//! and never waits on this thread.

use crate::endpoint::MavEndpoint;
use crate::error::TransportError;
use crate::link::LinkMonitor;
use crate::messages::{decode_frame, heartbeat_message, FrameSplitter};
use crate::transport::Transport;
use mavlink::common::MavMessage;
use scandium_core::{Clock, Timestamp};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const MAX_READS_PER_POLL: usize = 32;

/// What the autopilot reports about itself, from its last heartbeat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AutopilotInfo {
    pub system_id: u8,
    pub component_id: u8,
    pub autopilot: u8,
    pub vehicle_type: u8,
    pub system_status: u8,
}

pub struct HeartbeatTask {
    transport: Box<dyn Transport>,
    endpoint: MavEndpoint,
    monitor: Arc<LinkMonitor>,
    period: Duration,
    next_send: Option<Timestamp>,
    splitter: FrameSplitter,
    buf: Vec<u8>,
    autopilot: Option<AutopilotInfo>,
    connected: bool,
}

impl HeartbeatTask {
    pub fn new(
        transport: Box<dyn Transport>,
        endpoint: MavEndpoint,
        monitor: Arc<LinkMonitor>,
        period: Duration,
    ) -> Self {
        Self {
            transport,
            endpoint,
            monitor,
            period,
            next_send: None,
            splitter: FrameSplitter::new(),
            buf: vec![0; 2048],
            autopilot: None,
            connected: false,
        }
    }

    pub fn monitor(&self) -> &Arc<LinkMonitor> {
        &self.monitor
    }

    pub fn autopilot(&self) -> Option<AutopilotInfo> {
        self.autopilot
    }

    /// One poll: drain inbound frames, then send our heartbeat if due.
    /// Returns the number of peer heartbeats seen. A failed read is
    /// returned only after the heartbeat went out.
    pub fn pump(&mut self, now: Timestamp) -> Result<usize, TransportError> {
        let read = self.read_inbound();
        if let Err(e) = &read {
            log::debug!("mavlink recv on {} failed: {}", self.transport.describe(), e);
        }
        let received = self.decode_inbound(now);

        let health = self.monitor.health(now);
        if self.connected && !health.connected {
            log::warn!(
                "autopilot heartbeat lost, last seen {:.1}s ago",
                health
                    .last_inbound
                    .map_or(f64::INFINITY, |t| now.saturating_since(t).as_secs_f64())
            );
            self.connected = false;
        }

        if self.next_send.map_or(true, |t| now >= t) {
            self.next_send = Some(now.saturating_add(self.period));
            let frame = self.endpoint.encode(&heartbeat_message())?;
            self.transport.send(&frame)?;
            self.monitor.record_outbound(now);
            log::trace!("heartbeat sent");
        }
        read.map(|()| received)
    }

    fn read_inbound(&mut self) -> Result<(), TransportError> {
        for _ in 0..MAX_READS_PER_POLL {
            match self.transport.recv(&mut self.buf)? {
                Some(n) => self.splitter.push(&self.buf[..n]),
                None => break,
            }
        }
        Ok(())
    }

    fn decode_inbound(&mut self, now: Timestamp) -> usize {
        let mut received = 0;
        while let Some(frame) = self.splitter.next_frame() {
            let (header, msg) = match decode_frame(&frame) {
                Ok(decoded) => decoded,
                Err(e) => {
                    log::trace!("dropping inbound frame: {}", e);
                    continue;
                }
            };
            let MavMessage::HEARTBEAT(hb) = msg else {
                continue;
            };
            if self.endpoint.is_self(&header) {
                continue;
            }
            received += 1;
            self.monitor.record_inbound(now);
            let info = AutopilotInfo {
                system_id: header.system_id,
                component_id: header.component_id,
                autopilot: hb.autopilot as u8,
                vehicle_type: hb.mavtype as u8,
                system_status: hb.system_status as u8,
            };
            if !self.connected {
                log::info!(
                    "autopilot connected: sys {} comp {} autopilot {:?} type {:?}",
                    info.system_id,
                    info.component_id,
                    hb.autopilot,
                    hb.mavtype
                );
                self.connected = true;
            }
            self.autopilot = Some(info);
        }
        received
    }

    /// Run on a dedicated thread until the handle is stopped or dropped.
    pub fn spawn(mut self, clock: Arc<dyn Clock>) -> std::io::Result<HeartbeatHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let link = self.transport.describe();
        let thread = std::thread::Builder::new()
            .name("scandium-heartbeat".to_string())
            .spawn(move || {
                log::info!("heartbeat task started on {}", link);
                let mut failing = false;
                while !flag.load(Ordering::Acquire) {
                    match self.pump(clock.now()) {
                        Ok(_) => failing = false,
                        Err(e) => {
                            if !failing {
                                log::warn!("heartbeat link error: {}", e);
                            }
                            failing = true;
                        }
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                log::info!("heartbeat task stopped");
            })?;
        Ok(HeartbeatHandle {
            stop,
            thread: Some(thread),
        })
    }
}

/// Stops and joins the heartbeat thread on drop.
pub struct HeartbeatHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl HeartbeatHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("heartbeat thread panicked");
            }
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
