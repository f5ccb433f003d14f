//! Hierarchical actuator binding (4.8), grounded on `StepGuider::Move` in
//! `stepguider.cpp`: when an AO is the primary actuator, the mount becomes a
//! secondary "bump" actuator that recenters the AO by nudging the mount
//! whenever the AO's smoothed position wanders too far from center.

use crate::geometry::AxisPoint;
use chrono::{DateTime, Utc};

/// Moving-average smoothing coefficient applied to the AO position.
pub const SMOOTHING_ALPHA: f64 = 0.33;
/// Fraction of travel past which the AO is considered "outside" and a bump
/// is warranted (`bumpThreshold1`, default 80%).
pub const DEFAULT_THRESHOLD1_FRACTION: f64 = 0.8;
/// Fraction of travel past which an in-progress bump is considered "far
/// outside" and accelerates (`bumpThreshold2`, midway between threshold1
/// and the edge).
pub const DEFAULT_THRESHOLD2_FRACTION: f64 = 0.9;
/// Fraction of full travel diameter within which a bump is considered
/// complete (`bumpCenterTolerance`, default 10% of `2 * max_position`).
pub const DEFAULT_CENTER_TOLERANCE_FRACTION: f64 = 0.1;
/// Default per-frame bump step budget before weighting.
pub const DEFAULT_BUMP_MAX_STEPS_PER_CYCLE: f64 = 1.0;
/// Seconds an unfinished bump runs before a one-time operator warning.
pub const DEFAULT_BUMP_WARN_TIME_SECS: i64 = 240;

#[derive(Debug, Copy, Clone)]
pub struct AoBumpConfig {
    pub threshold1_fraction: f64,
    pub threshold2_fraction: f64,
    pub center_tolerance_fraction: f64,
    pub bump_warn_time_secs: i64,
}

impl Default for AoBumpConfig {
    fn default() -> Self {
        Self {
            threshold1_fraction: DEFAULT_THRESHOLD1_FRACTION,
            threshold2_fraction: DEFAULT_THRESHOLD2_FRACTION,
            center_tolerance_fraction: DEFAULT_CENTER_TOLERANCE_FRACTION,
            bump_warn_time_secs: DEFAULT_BUMP_WARN_TIME_SECS,
        }
    }
}

/// What the guider should do with the mount this frame.
#[derive(Debug, Copy, Clone)]
pub struct BumpDecision {
    /// Axis-space mount displacement to dispatch, already clamped to this
    /// frame's budget. `None` when no bump is warranted or the mount is
    /// already busy (invariant: never queue a bump behind a busy mount).
    pub mount_target: Option<AxisPoint>,
    /// `true` exactly once per bump that overruns `bump_warn_time_secs`.
    pub warn_stalled: bool,
}

pub struct AoBumpController {
    config: AoBumpConfig,
    avg_offset: AxisPoint,
    initialized: bool,
    bump_in_progress: bool,
    bump_weight: f64,
    bump_started_at: Option<DateTime<Utc>>,
    warned: bool,
}

impl AoBumpController {
    pub fn new(config: AoBumpConfig) -> Self {
        Self {
            config,
            avg_offset: AxisPoint::new(0.0, 0.0),
            initialized: false,
            bump_in_progress: false,
            bump_weight: 1.0,
            bump_started_at: None,
            warned: false,
        }
    }

    pub fn bump_in_progress(&self) -> bool {
        self.bump_in_progress
    }

    pub fn bump_weight(&self) -> f64 {
        self.bump_weight
    }

    pub fn smoothed_offset(&self) -> AxisPoint {
        self.avg_offset
    }

    /// Call once per frame with the AO's raw axis-space position, its
    /// travel limits (half-width per axis, same units as `ao_position`),
    /// this frame's unweighted bump budget per axis, whether the mount is
    /// currently busy with another command, and the current time.
    pub fn update(
        &mut self,
        ao_position: AxisPoint,
        travel: AxisPoint,
        max_bump_per_cycle: AxisPoint,
        mount_busy: bool,
        now: DateTime<Utc>,
    ) -> BumpDecision {
        if !self.initialized {
            self.avg_offset = ao_position;
            self.initialized = true;
        } else {
            self.avg_offset.x += SMOOTHING_ALPHA * (ao_position.x - self.avg_offset.x);
            self.avg_offset.y += SMOOTHING_ALPHA * (ao_position.y - self.avg_offset.y);
        }

        let threshold1 = AxisPoint::new(
            travel.x * self.config.threshold1_fraction,
            travel.y * self.config.threshold1_fraction,
        );
        let threshold2 = AxisPoint::new(
            travel.x * self.config.threshold2_fraction,
            travel.y * self.config.threshold2_fraction,
        );
        let is_outside = ao_position.x.abs() > threshold1.x || ao_position.y.abs() > threshold1.y;

        if is_outside {
            if !self.bump_in_progress {
                self.bump_in_progress = true;
                self.bump_weight = 1.0;
                self.bump_started_at = Some(now);
                self.warned = false;
            } else {
                let far_outside = ao_position.x.abs() > threshold2.x || ao_position.y.abs() > threshold2.y;
                self.bump_weight += if far_outside { 1.0 } else { 1.0 / 6.0 };
            }
        } else if self.bump_in_progress {
            self.bump_weight = (self.bump_weight * 0.5).max(1.0);
        }

        let diameter = AxisPoint::new(2.0 * travel.x, 2.0 * travel.y);
        let center_tolerance = (diameter.x.min(diameter.y)) * self.config.center_tolerance_fraction;
        if self.bump_in_progress && self.avg_offset.distance() <= center_tolerance {
            self.bump_in_progress = false;
            self.bump_weight = 1.0;
            self.bump_started_at = None;
            self.warned = false;
        }

        let mut warn_stalled = false;
        if self.bump_in_progress && !self.warned {
            if let Some(started) = self.bump_started_at {
                if (now - started).num_seconds() >= self.config.bump_warn_time_secs {
                    warn_stalled = true;
                    self.warned = true;
                }
            }
        }

        let mount_target = if self.bump_in_progress && !mount_busy {
            let raw = AxisPoint::new(-self.avg_offset.x, -self.avg_offset.y);
            let bound_x = max_bump_per_cycle.x.abs() * self.bump_weight;
            let bound_y = max_bump_per_cycle.y.abs() * self.bump_weight;
            Some(AxisPoint::new(
                raw.x.clamp(-bound_x, bound_x),
                raw.y.clamp(-bound_y, bound_y),
            ))
        } else {
            None
        };

        BumpDecision {
            mount_target,
            warn_stalled,
        }
    }
}
