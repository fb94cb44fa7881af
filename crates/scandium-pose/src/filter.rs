//! Temporal smoothing of target observations with outlier gating.
//!
//! Two estimators share one track lifecycle. The default exponential
//! smoother keeps a single isotropic position variance. An observation `z`
//! is gated with the normalized distance
//!
//! ```text
//! d = |z - x| / sqrt(P + R)
//! ```
//!
//! where `P` is the track variance and `R` the configured measurement
//! variance. Accepted observations are blended with weight `alpha` and shrink
//! `P` by `(1 - alpha)` down to `variance_floor`.
//!
//! The Kalman variant runs a constant-velocity model over
//! `[x, y, z, vx, vy, vz]` and gates on the Mahalanobis distance of the
//! innovation against its full 3x3 covariance.
//!
//! With either estimator the first observation is taken verbatim with
//! confidence 1. Outliers and missed ticks age the track, decay its
//! confidence and inflate its variance, so a target that really moved is
//! eventually re-accepted.

use nalgebra::{Matrix3, Matrix6, Matrix6x3, Vector3, Vector6};
use scandium_core::{FilteredPose, TargetObservation};
use serde::{Deserialize, Serialize};

/// Step used by the Kalman prediction when timestamps do not advance.
const NOMINAL_DT_S: f64 = 0.05;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    #[default]
    ExpSmooth,
    Kalman,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    #[serde(rename = "type")]
    pub kind: FilterKind,
    /// Blend weight of a new observation, in `(0, 1]`. The Kalman variant
    /// uses it for orientation only.
    pub alpha: f64,
    /// Gate on the normalized innovation distance.
    pub outlier_threshold: f64,
    /// Track variance right after initialization, m^2.
    pub initial_variance: f64,
    /// Per-observation noise, m^2.
    pub measurement_variance: f64,
    /// Kalman process noise added per prediction step.
    pub process_noise: f64,
    /// Lower bound on the reported variance, m^2.
    pub variance_floor: f64,
    /// Variance multiplier applied on a rejected observation.
    pub outlier_inflation: f64,
    /// Variance multiplier applied on a tick without observation.
    pub miss_inflation: f64,
    /// The estimate is invalid once `age > max_age` ticks.
    pub max_age: u32,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            kind: FilterKind::ExpSmooth,
            alpha: 0.35,
            outlier_threshold: 4.0,
            initial_variance: 1.0,
            measurement_variance: 0.01,
            process_noise: 0.1,
            variance_floor: 0.01,
            outlier_inflation: 1.5,
            miss_inflation: 1.1,
            max_age: 10,
        }
    }
}

/// What happened to the track on the last update.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FilterEvent {
    /// No track and no observation.
    Idle,
    Initialized,
    Accepted,
    Outlier { distance: f64 },
    Missed,
}

/// Constant-velocity state and covariance.
#[derive(Clone, Debug)]
struct Kalman {
    x: Vector6<f64>,
    p: Matrix6<f64>,
}

impl Kalman {
    fn new(z: &Vector3<f64>, variance: f64) -> Self {
        let mut x = Vector6::zeros();
        x.fixed_rows_mut::<3>(0).copy_from(z);
        Self {
            x,
            p: Matrix6::identity() * variance,
        }
    }

    fn position(&self) -> Vector3<f64> {
        self.x.fixed_rows::<3>(0).into_owned()
    }

    fn velocity(&self) -> Vector3<f64> {
        self.x.fixed_rows::<3>(3).into_owned()
    }

    fn position_variance(&self) -> f64 {
        self.p.fixed_view::<3, 3>(0, 0).trace() / 3.0
    }

    /// Predict over `dt` and fuse `z`. Leaves the state untouched and
    /// returns the Mahalanobis distance when `z` fails the gate.
    fn fuse(&mut self, z: &Vector3<f64>, dt: f64, p: &FilterParams) -> Result<(), f64> {
        let mut f = Matrix6::identity();
        for i in 0..3 {
            f[(i, i + 3)] = dt;
        }
        let x = f * self.x;
        let pp = f * self.p * f.transpose() + Matrix6::identity() * p.process_noise;

        let innovation = z - x.fixed_rows::<3>(0).into_owned();
        let s = pp.fixed_view::<3, 3>(0, 0).into_owned() + Matrix3::identity() * p.measurement_variance;
        let Some(s_inv) = s.try_inverse() else {
            return Err(f64::INFINITY);
        };
        let distance = innovation.dot(&(s_inv * innovation)).max(0.0).sqrt();
        if distance > p.outlier_threshold {
            return Err(distance);
        }

        let gain: Matrix6x3<f64> = pp.fixed_view::<6, 3>(0, 0).into_owned() * s_inv;
        self.x = x + gain * innovation;
        self.p = pp - gain * pp.fixed_view::<3, 6>(0, 0).into_owned();
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct Track {
    pose: FilteredPose,
    kalman: Option<Kalman>,
}

/// Single-target temporal filter.
#[derive(Clone, Debug)]
pub struct TemporalFilter {
    params: FilterParams,
    track: Option<Track>,
    empty: FilteredPose,
}

impl TemporalFilter {
    pub fn new(params: FilterParams) -> Self {
        Self {
            params,
            track: None,
            empty: FilteredPose::empty(),
        }
    }

    pub fn params(&self) -> &FilterParams {
        &self.params
    }

    /// Current estimate; the invalid empty pose when there is no track.
    pub fn pose(&self) -> &FilteredPose {
        self.track.as_ref().map_or(&self.empty, |t| &t.pose)
    }

    pub fn has_track(&self) -> bool {
        self.track.is_some()
    }

    /// Drop the track entirely.
    pub fn reset(&mut self) {
        if self.track.is_some() {
            log::debug!("filter reset");
        }
        self.track = None;
    }

    /// Advance one tick with an optional observation.
    pub fn update(&mut self, obs: Option<&TargetObservation>) -> FilterEvent {
        let p = &self.params;
        let Some(track) = self.track.as_mut() else {
            let Some(obs) = obs else {
                return FilterEvent::Idle;
            };
            self.track = Some(Track {
                pose: FilteredPose {
                    translation: obs.translation,
                    orientation: Some(obs.orientation),
                    velocity: Vector3::zeros(),
                    variance: p.initial_variance,
                    confidence: 1.0,
                    age: 0,
                    valid: true,
                    tag_id: Some(obs.tag_id),
                    timestamp: obs.timestamp,
                },
                kalman: (p.kind == FilterKind::Kalman)
                    .then(|| Kalman::new(&obs.translation, p.initial_variance)),
            });
            return FilterEvent::Initialized;
        };

        let Some(obs) = obs else {
            age(track, p, p.miss_inflation);
            return FilterEvent::Missed;
        };

        let dt = obs.timestamp.saturating_since(track.pose.timestamp).as_secs_f64();
        let gate = match track.kalman.as_mut() {
            Some(k) => k.fuse(&obs.translation, if dt > 0.0 { dt } else { NOMINAL_DT_S }, p),
            None => {
                let innovation = obs.translation - track.pose.translation;
                let sigma = (track.pose.variance + p.measurement_variance).max(1e-6).sqrt();
                let distance = innovation.norm() / sigma;
                if distance > p.outlier_threshold {
                    Err(distance)
                } else {
                    Ok(())
                }
            }
        };
        if let Err(distance) = gate {
            return reject(track, p, distance);
        }

        let pose = &mut track.pose;
        match track.kalman.as_ref() {
            Some(k) => {
                pose.translation = k.position();
                pose.velocity = k.velocity();
                pose.variance = k.position_variance().max(p.variance_floor);
            }
            None => {
                let a = p.alpha;
                if dt > 0.0 {
                    let v = (obs.translation - pose.translation) / dt;
                    pose.velocity = a * v + (1.0 - a) * pose.velocity;
                }
                pose.translation = a * obs.translation + (1.0 - a) * pose.translation;
                pose.variance = ((1.0 - a) * pose.variance).max(p.variance_floor);
            }
        }

        let a = p.alpha;
        pose.orientation = Some(match pose.orientation {
            Some(q) => q.try_slerp(&obs.orientation, a, 1e-9).unwrap_or(obs.orientation),
            None => obs.orientation,
        });
        pose.age = 0;
        pose.confidence = 1.0;
        pose.valid = true;
        pose.tag_id = Some(obs.tag_id);
        pose.timestamp = obs.timestamp;
        FilterEvent::Accepted
    }
}

fn reject(track: &mut Track, p: &FilterParams, distance: f64) -> FilterEvent {
    log::debug!(
        "outlier rejected: d={:.2} > {:.2}",
        distance,
        p.outlier_threshold
    );
    age(track, p, p.outlier_inflation);
    FilterEvent::Outlier { distance }
}

fn age(track: &mut Track, p: &FilterParams, inflation: f64) {
    let pose = &mut track.pose;
    pose.age = pose.age.saturating_add(1);
    match track.kalman.as_mut() {
        Some(k) => {
            k.p *= inflation;
            pose.variance = k.position_variance().max(p.variance_floor);
        }
        None => pose.variance *= inflation,
    }
    pose.valid = pose.age <= p.max_age;
    pose.confidence = (1.0 - pose.age as f64 / (p.max_age as f64 + 1.0)).max(0.0);
}
