pub mod engine_ao;
pub mod engine_mount;
pub mod transform;

use crate::enums::{pier_side_string, PierSide};
use crate::geometry::{normalize_angle, Radians};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Rotator angle is `None` when the source of rotator position is unknown
/// (no rotator, or a rotator that hasn't reported yet) rather than using a
/// sentinel float, since "unknown" has observable consequences (see
/// `Calibration::needs_recal_on_rotator_change`).
pub type RotatorAngle = Option<Radians>;

/// An immutable record produced by the calibration engine. Rates are in
/// pixels per millisecond of pulse duration and are always strictly
/// positive; angles are normalized to (-pi, pi].
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq)]
pub struct Calibration {
    pub x_angle: Radians,
    pub y_angle: Radians,
    pub x_rate: f64,
    pub y_rate: f64,
    pub declination: Radians,
    #[serde(with = "pier_side_string")]
    pub pier_side: PierSide,
    pub rotator_angle: RotatorAngle,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Above this magnitude of calibration declination, `cos(declination)` is
/// close enough to zero that dividing by it for rate scaling is numerically
/// unstable, so the current-declination rate adjustment is skipped entirely.
pub const DECLINATION_RATE_ADJUSTMENT_LIMIT: Radians = 2. * PI / 3. / 2.;

/// Ignore rotator deltas smaller than this; they are measurement noise, not
/// a real field-rotation event.
const ROTATOR_DELTA_IGNORE_THRESHOLD: Radians = 0.05 * PI / 180.;

impl Calibration {
    pub fn new(
        x_angle: Radians,
        y_angle: Radians,
        x_rate: f64,
        y_rate: f64,
        declination: Radians,
        pier_side: PierSide,
        rotator_angle: RotatorAngle,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        assert!(x_rate > 0.0, "xRate must be strictly positive");
        assert!(y_rate > 0.0, "yRate must be strictly positive");
        Self {
            x_angle: normalize_angle(x_angle),
            y_angle: normalize_angle(y_angle),
            x_rate,
            y_rate,
            declination,
            pier_side,
            rotator_angle,
            timestamp,
        }
    }

    /// Encodes non-orthogonality of the two mount axes. Must have magnitude
    /// well below pi/2 for the calibration to be usable.
    pub fn y_angle_error(&self) -> Radians {
        normalize_angle(self.x_angle - self.y_angle + std::f64::consts::FRAC_PI_2)
    }

    /// `true` when the orthogonality error exceeds 30 degrees, the mount
    /// variant's threshold for a `degenerate-calibration` warning.
    pub fn is_degenerate(&self) -> bool {
        self.y_angle_error().abs() > 30f64.to_radians()
    }
}

/// Mutable per-session state derived from an immutable `Calibration`,
/// reflecting the pointing-dependent adjustments of 4.3: pier flip, rotator
/// compensation, and declination-dependent rate scaling.
#[derive(Debug, Clone)]
pub struct WorkingCalibration {
    pub calibration: Calibration,
    /// `x_rate` adjusted for the current declination.
    pub current_x_rate: f64,
    pub current_declination: Radians,
    /// `true` once a rotator change has been observed while the rotator was
    /// unknown at calibration time -- forces a recalibration requirement.
    pub needs_recalibration: bool,
}

impl WorkingCalibration {
    pub fn new(calibration: Calibration) -> Self {
        let current_declination = calibration.declination;
        let current_x_rate = calibration.x_rate;
        Self {
            calibration,
            current_x_rate,
            current_declination,
            needs_recalibration: false,
        }
    }

    /// Applies 4.3's declination compensation: rescale `x_rate` for the
    /// current declination, skipping when the calibration declination's
    /// magnitude exceeds the numerically-unstable threshold.
    pub fn adjust_for_declination(&mut self, current_declination: Radians) {
        const TOLERANCE: f64 = 1e-9;
        if (current_declination - self.current_declination).abs() <= TOLERANCE {
            return;
        }
        self.current_declination = current_declination;

        if self.calibration.declination.abs() >= DECLINATION_RATE_ADJUSTMENT_LIMIT {
            return;
        }

        self.current_x_rate = self.calibration.x_rate * current_declination.cos()
            / self.calibration.declination.cos();
    }

    /// Applies 4.3's pier-flip adjustment in place. `dec_flip_on_pier_flip`
    /// is a mount-subclass property: some mounts also invert the apparent
    /// declination motion direction on a flip.
    pub fn apply_pier_flip(&mut self, dec_flip_on_pier_flip: bool) {
        self.calibration.x_angle = normalize_angle(self.calibration.x_angle + PI);
        if dec_flip_on_pier_flip {
            self.calibration.y_angle = normalize_angle(self.calibration.y_angle + PI);
        }
        self.calibration.pier_side.flip();
    }

    /// Applies 4.3's rotator compensation: subtract the rotator delta from
    /// both axis angles. Deltas smaller than ~0.05 degrees are ignored.
    /// Returns `true` if a real (non-ignored) change was applied.
    pub fn apply_rotator_delta(&mut self, current_rotator_angle: Radians) -> bool {
        match self.calibration.rotator_angle {
            None => {
                self.needs_recalibration = true;
                false
            }
            Some(cal_rotator_angle) => {
                let delta = normalize_angle(current_rotator_angle - cal_rotator_angle);
                if delta.abs() < ROTATOR_DELTA_IGNORE_THRESHOLD {
                    return false;
                }
                self.calibration.x_angle = normalize_angle(self.calibration.x_angle - delta);
                self.calibration.y_angle = normalize_angle(self.calibration.y_angle - delta);
                true
            }
        }
    }
}
