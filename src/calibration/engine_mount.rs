//! Calibration engine, mount variant (4.6): a state machine driven by
//! successive centroids, issuing fixed-width pulses west then north and
//! computing angle/rate from the resulting pixel displacement.

use crate::calibration::Calibration;
use crate::enums::{Direction, PierSide};
use crate::errors::{GuiderErrorKind, Result};
use crate::geometry::PixelPoint;
use chrono::Utc;

/// Minimum cumulative pixel displacement required on each axis before the
/// calibration engine will compute an angle/rate from it.
pub const DEFAULT_REQUIRED_DISTANCE: f64 = 25.0;
/// Upper bound on iterations per axis before declaring
/// `calibration-insufficient-motion`.
pub const MAX_CALIBRATION_STEPS: u32 = 60;
/// Number of same-direction pulses issued to seat the gears before the
/// west leg, when backlash clearing is enabled.
const BACKLASH_CLEARING_STEPS: u32 = 3;
/// Step budget and pixel tolerance for the back-off leg.
const MAX_BACKOFF_STEPS: u32 = 60;
const BACKOFF_TOLERANCE_PX: f64 = 2.0;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MountCalibrationState {
    Uninitialized,
    ClearingBacklash,
    SteppingWest,
    SteppingNorth,
    BackingOff,
    Complete,
    Aborted,
}

#[derive(Debug, Copy, Clone)]
pub struct MountCalibrationConfig {
    pub pulse_width_ms: u32,
    pub required_distance_px: f64,
    pub clear_backlash: bool,
}

impl Default for MountCalibrationConfig {
    fn default() -> Self {
        Self {
            pulse_width_ms: 500,
            required_distance_px: DEFAULT_REQUIRED_DISTANCE,
            clear_backlash: true,
        }
    }
}

/// One pulse-and-observe iteration's result, as recorded by the state
/// machine while stepping west or north.
#[derive(Debug, Copy, Clone)]
struct StepRecord {
    dx: f64,
    dy: f64,
}

pub struct MountCalibrationEngine {
    config: MountCalibrationConfig,
    state: MountCalibrationState,
    start_position: PixelPoint,
    last_position: PixelPoint,
    iteration: u32,
    west_steps: Vec<StepRecord>,
    north_steps: Vec<StepRecord>,
    x_angle: f64,
    x_rate: f64,
    y_angle: f64,
    y_rate: f64,
    backoff_origin: PixelPoint,
}

/// What the state machine wants the caller to do next.
#[derive(Debug, Copy, Clone)]
pub enum CalibrationAction {
    Pulse(Direction, u32),
    None,
}

impl MountCalibrationEngine {
    pub fn new(config: MountCalibrationConfig, start_position: PixelPoint) -> Self {
        Self {
            config,
            state: MountCalibrationState::Uninitialized,
            start_position,
            last_position: start_position,
            iteration: 0,
            west_steps: Vec::new(),
            north_steps: Vec::new(),
            x_angle: 0.0,
            x_rate: 0.0,
            y_angle: 0.0,
            y_rate: 0.0,
            backoff_origin: start_position,
        }
    }

    pub fn state(&self) -> MountCalibrationState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == MountCalibrationState::Complete
    }

    /// Current step index within the active leg, for step-event reporting.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Which axis the current state is gathering motion for, for
    /// step-event reporting. Meaningless once `Complete`/`Aborted`.
    pub fn axis(&self) -> &'static str {
        match self.state {
            MountCalibrationState::Uninitialized
            | MountCalibrationState::ClearingBacklash
            | MountCalibrationState::SteppingWest => "X",
            MountCalibrationState::SteppingNorth | MountCalibrationState::BackingOff => "Y",
            MountCalibrationState::Complete | MountCalibrationState::Aborted => "X",
        }
    }

    /// Advances the state machine with the latest centroid and returns the
    /// action the caller should perform before the next frame arrives.
    pub fn step(&mut self, current_position: PixelPoint) -> Result<CalibrationAction> {
        if !current_position.is_valid() {
            self.state = MountCalibrationState::Aborted;
            return Err(crate::errors::GuiderError::from_msg(
                GuiderErrorKind::CalibrationStarLost,
                "star lost during calibration",
            ));
        }

        match self.state {
            MountCalibrationState::Uninitialized => {
                self.start_position = current_position;
                self.last_position = current_position;
                self.iteration = 0;
                if self.config.clear_backlash {
                    self.state = MountCalibrationState::ClearingBacklash;
                } else {
                    self.state = MountCalibrationState::SteppingWest;
                }
                Ok(CalibrationAction::Pulse(
                    Direction::West,
                    self.config.pulse_width_ms,
                ))
            }

            MountCalibrationState::ClearingBacklash => {
                self.last_position = current_position;
                self.iteration += 1;
                if self.iteration >= BACKLASH_CLEARING_STEPS {
                    self.iteration = 0;
                    self.state = MountCalibrationState::SteppingWest;
                }
                Ok(CalibrationAction::Pulse(
                    Direction::West,
                    self.config.pulse_width_ms,
                ))
            }

            MountCalibrationState::SteppingWest => {
                let dx = current_position.x - self.last_position.x;
                let dy = current_position.y - self.last_position.y;
                self.west_steps.push(StepRecord { dx, dy });
                self.last_position = current_position;
                self.iteration += 1;

                let total: PixelPoint = self.cumulative(&self.west_steps);
                if total.distance() >= self.config.required_distance_px {
                    self.compute_x(&total);
                    self.iteration = 0;
                    self.state = MountCalibrationState::SteppingNorth;
                    return Ok(CalibrationAction::Pulse(
                        Direction::North,
                        self.config.pulse_width_ms,
                    ));
                }

                if self.iteration >= MAX_CALIBRATION_STEPS {
                    self.state = MountCalibrationState::Aborted;
                    return Err(crate::errors::GuiderError::from_msg(
                        GuiderErrorKind::CalibrationInsufficientMotion,
                        "insufficient west displacement after maximum steps",
                    ));
                }

                Ok(CalibrationAction::Pulse(
                    Direction::West,
                    self.config.pulse_width_ms,
                ))
            }

            MountCalibrationState::SteppingNorth => {
                let dx = current_position.x - self.last_position.x;
                let dy = current_position.y - self.last_position.y;
                self.north_steps.push(StepRecord { dx, dy });
                self.last_position = current_position;
                self.iteration += 1;

                let total = self.cumulative(&self.north_steps);
                if total.distance() >= self.config.required_distance_px {
                    self.compute_y(&total);
                    self.iteration = 0;
                    self.backoff_origin = current_position;
                    self.state = MountCalibrationState::BackingOff;
                    return self.back_off_action(current_position);
                }

                if self.iteration >= MAX_CALIBRATION_STEPS {
                    self.state = MountCalibrationState::Aborted;
                    return Err(crate::errors::GuiderError::from_msg(
                        GuiderErrorKind::CalibrationInsufficientMotion,
                        "insufficient north displacement after maximum steps",
                    ));
                }

                Ok(CalibrationAction::Pulse(
                    Direction::North,
                    self.config.pulse_width_ms,
                ))
            }

            MountCalibrationState::BackingOff => {
                let remaining = current_position.distance_to(&self.start_position);
                self.iteration += 1;
                if remaining <= BACKOFF_TOLERANCE_PX || self.iteration >= MAX_BACKOFF_STEPS {
                    self.state = MountCalibrationState::Complete;
                    return Ok(CalibrationAction::None);
                }
                self.back_off_action(current_position)
            }

            MountCalibrationState::Complete | MountCalibrationState::Aborted => {
                Ok(CalibrationAction::None)
            }
        }
    }

    fn cumulative(&self, steps: &[StepRecord]) -> PixelPoint {
        let (dx, dy) = steps.iter().fold((0.0, 0.0), |(ax, ay), s| (ax + s.dx, ay + s.dy));
        PixelPoint::new(dx, dy)
    }

    fn compute_x(&mut self, total: &PixelPoint) {
        self.x_angle = total.y.atan2(total.x);
        self.x_rate = total.distance() / (self.west_steps.len() as f64 * self.config.pulse_width_ms as f64);
    }

    fn compute_y(&mut self, total: &PixelPoint) {
        self.y_angle = total.y.atan2(total.x);
        self.y_rate = total.distance() / (self.north_steps.len() as f64 * self.config.pulse_width_ms as f64);
    }

    /// Both axes are reversed to return near the calibration start point:
    /// east undoes the west leg, south undoes the north leg.
    fn back_off_action(&self, current: PixelPoint) -> Result<CalibrationAction> {
        let remaining_x = self.start_position.x - current.x;
        let remaining_y = self.start_position.y - current.y;
        let direction = if remaining_x.abs() > remaining_y.abs() {
            if remaining_x > 0.0 {
                Direction::East
            } else {
                Direction::West
            }
        } else if remaining_y > 0.0 {
            Direction::North
        } else {
            Direction::South
        };
        Ok(CalibrationAction::Pulse(direction, self.config.pulse_width_ms))
    }

    /// Builds the final `Calibration` record. Only valid once `is_complete()`.
    pub fn into_calibration(
        self,
        declination: f64,
        pier_side: PierSide,
        rotator_angle: Option<f64>,
    ) -> Option<Calibration> {
        if self.state != MountCalibrationState::Complete {
            return None;
        }
        Some(Calibration::new(
            self.x_angle,
            self.y_angle,
            self.x_rate,
            self.y_rate,
            declination,
            pier_side,
            rotator_angle,
            Utc::now(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_float_eq::*;

    #[test]
    fn completes_with_west_and_north_motion() {
        let start = PixelPoint::new(500.0, 500.0);
        let config = MountCalibrationConfig {
            pulse_width_ms: 500,
            required_distance_px: 20.0,
            clear_backlash: false,
        };
        let mut engine = MountCalibrationEngine::new(config, start);

        let mut pos = start;
        let action = engine.step(pos).unwrap();
        assert!(matches!(action, CalibrationAction::Pulse(Direction::West, _)));

        // Simulate pure-west motion (pixel -x) for several steps.
        for _ in 0..5 {
            pos.x -= 5.0;
            engine.step(pos).unwrap();
        }
        assert_eq!(engine.state(), MountCalibrationState::SteppingNorth);
        assert_f64_near!(engine.x_angle, std::f64::consts::PI, 1);

        for _ in 0..5 {
            pos.y += 5.0;
            engine.step(pos).unwrap();
        }
        assert_eq!(engine.state(), MountCalibrationState::BackingOff);

        // Step back towards origin until complete.
        for _ in 0..20 {
            if engine.is_complete() {
                break;
            }
            pos.x += 2.0;
            pos.y -= 2.0;
            engine.step(pos).unwrap();
        }
        assert!(engine.is_complete());
        let cal = engine.into_calibration(0.0, PierSide::East, None).unwrap();
        assert!(cal.x_rate > 0.0);
        assert!(cal.y_rate > 0.0);
    }

    #[test]
    fn aborts_on_insufficient_motion() {
        let start = PixelPoint::new(100.0, 100.0);
        let config = MountCalibrationConfig {
            pulse_width_ms: 500,
            required_distance_px: 1000.0,
            clear_backlash: false,
        };
        let mut engine = MountCalibrationEngine::new(config, start);
        engine.step(start).unwrap();
        let mut result = Ok(CalibrationAction::None);
        for _ in 0..(MAX_CALIBRATION_STEPS + 1) {
            result = engine.step(start);
            if result.is_err() {
                break;
            }
        }
        assert_eq!(
            result.unwrap_err().kind(),
            GuiderErrorKind::CalibrationInsufficientMotion
        );
    }

    #[test]
    fn aborts_on_star_lost() {
        let start = PixelPoint::new(100.0, 100.0);
        let mut engine =
            MountCalibrationEngine::new(MountCalibrationConfig::default(), start);
        let err = engine.step(PixelPoint::invalid()).unwrap_err();
        assert_eq!(err.kind(), GuiderErrorKind::CalibrationStarLost);
        assert_eq!(engine.state(), MountCalibrationState::Aborted);
    }
}
