//! Calibration engine, AO variant (4.7). Differs from the mount variant in
//! that commands are step counts rather than millisecond pulses and travel
//! is bounded: each axis is calibrated by driving to a known corner,
//! averaging several frames there, then stepping to the opposite edge and
//! averaging again, before the device is recentered.

use crate::calibration::Calibration;
use crate::calibration::engine_mount::CalibrationAction;
use crate::enums::{Direction, PierSide};
use crate::errors::{GuiderError, GuiderErrorKind, Result};
use crate::geometry::PixelPoint;
use chrono::Utc;

/// Default number of frames averaged at each corner before computing a
/// displacement.
pub const DEFAULT_SAMPLES_TO_AVERAGE: u32 = 3;
/// Step budget per axis before `calibration-insufficient-motion`.
pub const MAX_CALIBRATION_STEPS: u32 = 60;
const STEP_COUNT_PER_ITERATION: u32 = 1;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AoCalibrationState {
    Uninitialized,
    DrivingToCornerX,
    AveragingCornerX,
    SteppingAcrossX,
    AveragingFarX,
    DrivingToCornerY,
    AveragingCornerY,
    SteppingAcrossY,
    AveragingFarY,
    Recentering,
    Complete,
    Aborted,
}

#[derive(Debug, Copy, Clone)]
pub struct AoCalibrationConfig {
    pub samples_to_average: u32,
    pub max_travel_steps: u32,
}

impl Default for AoCalibrationConfig {
    fn default() -> Self {
        Self {
            samples_to_average: DEFAULT_SAMPLES_TO_AVERAGE,
            max_travel_steps: 45,
        }
    }
}

struct AveragingAccumulator {
    sum: PixelPoint,
    count: u32,
}

impl AveragingAccumulator {
    fn new() -> Self {
        Self {
            sum: PixelPoint::new(0.0, 0.0),
            count: 0,
        }
    }

    fn observe(&mut self, p: PixelPoint) {
        self.sum = self.sum + p;
        self.count += 1;
    }

    fn mean(&self) -> PixelPoint {
        PixelPoint::new(self.sum.x / self.count as f64, self.sum.y / self.count as f64)
    }
}

pub struct AoCalibrationEngine {
    config: AoCalibrationConfig,
    state: AoCalibrationState,
    iteration: u32,
    accumulator: AveragingAccumulator,
    corner_x: PixelPoint,
    far_x: PixelPoint,
    corner_y: PixelPoint,
    far_y: PixelPoint,
    x_angle: f64,
    x_rate: f64,
    y_angle: f64,
    y_rate: f64,
    steps_taken_x: u32,
    steps_taken_y: u32,
}

impl AoCalibrationEngine {
    pub fn new(config: AoCalibrationConfig) -> Self {
        Self {
            config,
            state: AoCalibrationState::Uninitialized,
            iteration: 0,
            accumulator: AveragingAccumulator::new(),
            corner_x: PixelPoint::new(0.0, 0.0),
            far_x: PixelPoint::new(0.0, 0.0),
            corner_y: PixelPoint::new(0.0, 0.0),
            far_y: PixelPoint::new(0.0, 0.0),
            x_angle: 0.0,
            x_rate: 0.0,
            y_angle: 0.0,
            y_rate: 0.0,
            steps_taken_x: 0,
            steps_taken_y: 0,
        }
    }

    pub fn state(&self) -> AoCalibrationState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == AoCalibrationState::Complete
    }

    /// Current step index within the active leg, for step-event reporting.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Which axis the current state is gathering motion for, for
    /// step-event reporting. Meaningless once `Complete`/`Aborted`.
    pub fn axis(&self) -> &'static str {
        match self.state {
            AoCalibrationState::Uninitialized
            | AoCalibrationState::DrivingToCornerX
            | AoCalibrationState::AveragingCornerX
            | AoCalibrationState::SteppingAcrossX
            | AoCalibrationState::AveragingFarX => "X",
            AoCalibrationState::DrivingToCornerY
            | AoCalibrationState::AveragingCornerY
            | AoCalibrationState::SteppingAcrossY
            | AoCalibrationState::AveragingFarY
            | AoCalibrationState::Recentering => "Y",
            AoCalibrationState::Complete | AoCalibrationState::Aborted => "Y",
        }
    }

    /// Orthogonality error of the measured axes. Logged by the caller but,
    /// per the Open Question adopted in 9, never gates completion -- only
    /// the mount variant's 30-degree `degenerate-calibration` warn policy
    /// is mirrored, not a new abort path.
    pub fn orthogonality_error(&self) -> f64 {
        crate::geometry::normalize_angle(self.x_angle - self.y_angle + std::f64::consts::FRAC_PI_2)
    }

    pub fn step(&mut self, current_position: PixelPoint) -> Result<CalibrationAction> {
        if !current_position.is_valid() {
            self.state = AoCalibrationState::Aborted;
            return Err(GuiderError::from_msg(
                GuiderErrorKind::CalibrationStarLost,
                "star lost during AO calibration",
            ));
        }

        match self.state {
            AoCalibrationState::Uninitialized => {
                self.iteration = 0;
                self.state = AoCalibrationState::DrivingToCornerX;
                Ok(CalibrationAction::Pulse(Direction::West, STEP_COUNT_PER_ITERATION))
            }

            AoCalibrationState::DrivingToCornerX => {
                self.iteration += 1;
                if self.iteration >= self.config.max_travel_steps {
                    self.iteration = 0;
                    self.accumulator = AveragingAccumulator::new();
                    self.state = AoCalibrationState::AveragingCornerX;
                    return self.step(current_position);
                }
                Ok(CalibrationAction::Pulse(Direction::West, STEP_COUNT_PER_ITERATION))
            }

            AoCalibrationState::AveragingCornerX => {
                self.accumulator.observe(current_position);
                self.iteration += 1;
                if self.iteration >= self.config.samples_to_average {
                    self.corner_x = self.accumulator.mean();
                    self.iteration = 0;
                    self.steps_taken_x = 0;
                    self.state = AoCalibrationState::SteppingAcrossX;
                    return Ok(CalibrationAction::Pulse(Direction::East, STEP_COUNT_PER_ITERATION));
                }
                Ok(CalibrationAction::None)
            }

            AoCalibrationState::SteppingAcrossX => {
                self.steps_taken_x += 1;
                self.iteration += 1;
                let budget = 2 * self.config.max_travel_steps;
                if self.iteration >= budget {
                    if self.steps_taken_x == 0 {
                        self.state = AoCalibrationState::Aborted;
                        return Err(GuiderError::from_msg(
                            GuiderErrorKind::CalibrationInsufficientMotion,
                            "AO x-axis travel exhausted without reaching the far edge",
                        ));
                    }
                    self.iteration = 0;
                    self.accumulator = AveragingAccumulator::new();
                    self.state = AoCalibrationState::AveragingFarX;
                    return self.step(current_position);
                }
                Ok(CalibrationAction::Pulse(Direction::East, STEP_COUNT_PER_ITERATION))
            }

            AoCalibrationState::AveragingFarX => {
                self.accumulator.observe(current_position);
                self.iteration += 1;
                if self.iteration >= self.config.samples_to_average {
                    self.far_x = self.accumulator.mean();
                    self.compute_x();
                    self.iteration = 0;
                    self.state = AoCalibrationState::DrivingToCornerY;
                    return Ok(CalibrationAction::Pulse(Direction::South, STEP_COUNT_PER_ITERATION));
                }
                Ok(CalibrationAction::None)
            }

            AoCalibrationState::DrivingToCornerY => {
                self.iteration += 1;
                if self.iteration >= self.config.max_travel_steps {
                    self.iteration = 0;
                    self.accumulator = AveragingAccumulator::new();
                    self.state = AoCalibrationState::AveragingCornerY;
                    return self.step(current_position);
                }
                Ok(CalibrationAction::Pulse(Direction::South, STEP_COUNT_PER_ITERATION))
            }

            AoCalibrationState::AveragingCornerY => {
                self.accumulator.observe(current_position);
                self.iteration += 1;
                if self.iteration >= self.config.samples_to_average {
                    self.corner_y = self.accumulator.mean();
                    self.iteration = 0;
                    self.steps_taken_y = 0;
                    self.state = AoCalibrationState::SteppingAcrossY;
                    return Ok(CalibrationAction::Pulse(Direction::North, STEP_COUNT_PER_ITERATION));
                }
                Ok(CalibrationAction::None)
            }

            AoCalibrationState::SteppingAcrossY => {
                self.steps_taken_y += 1;
                self.iteration += 1;
                let budget = 2 * self.config.max_travel_steps;
                if self.iteration >= budget {
                    if self.steps_taken_y == 0 {
                        self.state = AoCalibrationState::Aborted;
                        return Err(GuiderError::from_msg(
                            GuiderErrorKind::CalibrationInsufficientMotion,
                            "AO y-axis travel exhausted without reaching the far edge",
                        ));
                    }
                    self.iteration = 0;
                    self.accumulator = AveragingAccumulator::new();
                    self.state = AoCalibrationState::AveragingFarY;
                    return self.step(current_position);
                }
                Ok(CalibrationAction::Pulse(Direction::North, STEP_COUNT_PER_ITERATION))
            }

            AoCalibrationState::AveragingFarY => {
                self.accumulator.observe(current_position);
                self.iteration += 1;
                if self.iteration >= self.config.samples_to_average {
                    self.far_y = self.accumulator.mean();
                    self.compute_y();
                    self.iteration = 0;
                    self.state = AoCalibrationState::Recentering;
                    return Ok(CalibrationAction::Pulse(Direction::South, STEP_COUNT_PER_ITERATION));
                }
                Ok(CalibrationAction::None)
            }

            AoCalibrationState::Recentering => {
                self.iteration += 1;
                if self.iteration >= self.steps_taken_y.max(1) {
                    self.state = AoCalibrationState::Complete;
                    return Ok(CalibrationAction::None);
                }
                Ok(CalibrationAction::Pulse(Direction::South, STEP_COUNT_PER_ITERATION))
            }

            AoCalibrationState::Complete | AoCalibrationState::Aborted => Ok(CalibrationAction::None),
        }
    }

    fn compute_x(&mut self) {
        let delta = self.far_x - self.corner_x;
        self.x_angle = delta.y.atan2(delta.x);
        self.x_rate = delta.distance() / self.steps_taken_x.max(1) as f64;
    }

    fn compute_y(&mut self) {
        let delta = self.far_y - self.corner_y;
        self.y_angle = delta.y.atan2(delta.x);
        self.y_rate = delta.distance() / self.steps_taken_y.max(1) as f64;
    }

    /// Builds the final `Calibration` record. Angles are unaffected by mount
    /// pointing for an AO (it rotates with the camera), so `pier_side` is
    /// always recorded as `Unknown` and the rotator angle is still captured
    /// for parity with the mount variant's record shape.
    pub fn into_calibration(self, declination: f64, rotator_angle: Option<f64>) -> Option<Calibration> {
        if self.state != AoCalibrationState::Complete {
            return None;
        }
        Some(Calibration::new(
            self.x_angle,
            self.y_angle,
            self.x_rate,
            self.y_rate,
            declination,
            PierSide::Unknown,
            rotator_angle,
            Utc::now(),
        ))
    }
}
