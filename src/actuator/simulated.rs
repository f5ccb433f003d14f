use super::{ActuatorCapabilities, AoActuator, Actuator, MoveOutcome, MountActuator};
use crate::enums::{Direction, PierSide};
use crate::errors::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Mutex;

/// A loopback actuator used by tests and the demo binary in place of a
/// hardware driver (4.1: "a simulated actuator is provided for testing but
/// is not a hardware driver"). Pixel motion is modeled by a caller-supplied
/// closure so test scenarios can inject whatever rate/angle relationship
/// they need without a real mount.
pub struct SimulatedActuator {
    guiding_enabled: AtomicBool,
    busy: AtomicBool,
    capabilities: ActuatorCapabilities,
    pier_side: Mutex<PierSide>,
    declination: Mutex<f64>,
    dec_flip_inverts: bool,
    position_x: AtomicI32,
    position_y: AtomicI32,
    max_position: i32,
    fail_next: AtomicBool,
}

impl SimulatedActuator {
    pub fn new_mount() -> Self {
        Self {
            guiding_enabled: AtomicBool::new(true),
            busy: AtomicBool::new(false),
            capabilities: ActuatorCapabilities {
                has_non_gui_move: true,
                st4_has_guide_output: false,
                can_pulse_guide: true,
                can_report_position: false,
            },
            pier_side: Mutex::new(PierSide::Unknown),
            declination: Mutex::new(0.0),
            dec_flip_inverts: true,
            position_x: AtomicI32::new(0),
            position_y: AtomicI32::new(0),
            max_position: 0,
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn new_ao(max_position: i32) -> Self {
        Self {
            guiding_enabled: AtomicBool::new(true),
            busy: AtomicBool::new(false),
            capabilities: ActuatorCapabilities {
                has_non_gui_move: true,
                st4_has_guide_output: false,
                can_pulse_guide: true,
                can_report_position: true,
            },
            pier_side: Mutex::new(PierSide::Unknown),
            declination: Mutex::new(0.0),
            dec_flip_inverts: false,
            position_x: AtomicI32::new(0),
            position_y: AtomicI32::new(0),
            max_position,
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn set_pier_side(&self, side: PierSide) {
        *self.pier_side.lock().unwrap() = side;
    }

    pub fn set_declination(&self, dec: f64) {
        *self.declination.lock().unwrap() = dec;
    }

    /// Makes the next `pulse`/`step` call return a transport error, for
    /// exercising the `transport-error` log-and-continue path.
    pub fn fail_next_move(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    fn apply_step(&self, direction: Direction, amount: i32) -> MoveOutcome {
        let (axis, sign) = match direction {
            Direction::North => (&self.position_y, 1),
            Direction::South => (&self.position_y, -1),
            Direction::East => (&self.position_x, 1),
            Direction::West => (&self.position_x, -1),
            Direction::None => return MoveOutcome::Ok,
        };
        let prev = axis.fetch_add(sign * amount, Ordering::SeqCst);
        let new = prev + sign * amount;
        if self.max_position > 0 && new.abs() > self.max_position {
            axis.store(new.clamp(-self.max_position, self.max_position), Ordering::SeqCst);
            MoveOutcome::LimitReached
        } else {
            MoveOutcome::Ok
        }
    }
}

#[async_trait]
impl Actuator for SimulatedActuator {
    async fn pulse(&self, direction: Direction, _duration_ms: u32) -> Result<MoveOutcome> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(crate::errors::GuiderError::from_msg(
                crate::errors::GuiderErrorKind::TransportError,
                "simulated transport failure",
            ));
        }
        if !self.guiding_enabled() {
            return Ok(MoveOutcome::Ok);
        }
        self.busy.store(true, Ordering::SeqCst);
        let outcome = self.apply_step(direction, 1);
        self.busy.store(false, Ordering::SeqCst);
        Ok(outcome)
    }

    async fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn guiding_enabled(&self) -> bool {
        self.guiding_enabled.load(Ordering::SeqCst)
    }

    fn set_guiding_enabled(&mut self, enabled: bool) {
        self.guiding_enabled.store(enabled, Ordering::SeqCst);
    }

    fn capabilities(&self) -> ActuatorCapabilities {
        self.capabilities
    }

    async fn guiding_ceases(&mut self) -> Result<()> {
        if self.capabilities.can_report_position {
            self.position_x.store(0, Ordering::SeqCst);
            self.position_y.store(0, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl MountActuator for SimulatedActuator {
    async fn side_of_pier(&self) -> PierSide {
        *self.pier_side.lock().unwrap()
    }

    async fn declination(&self) -> f64 {
        *self.declination.lock().unwrap()
    }

    fn dec_flip_inverts_declination(&self) -> bool {
        self.dec_flip_inverts
    }
}

#[async_trait]
impl AoActuator for SimulatedActuator {
    async fn step(&self, direction: Direction, count: u32) -> Result<MoveOutcome> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(crate::errors::GuiderError::from_msg(
                crate::errors::GuiderErrorKind::TransportError,
                "simulated transport failure",
            ));
        }
        self.busy.store(true, Ordering::SeqCst);
        let outcome = self.apply_step(direction, count as i32);
        self.busy.store(false, Ordering::SeqCst);
        Ok(outcome)
    }

    async fn current_position(&self, direction: Direction) -> i32 {
        match direction {
            Direction::East | Direction::West => self.position_x.load(Ordering::SeqCst),
            _ => self.position_y.load(Ordering::SeqCst),
        }
    }

    fn max_position(&self, _direction: Direction) -> i32 {
        self.max_position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pulse_moves_position_and_reports_limit() {
        let ao = SimulatedActuator::new_ao(10);
        for _ in 0..12 {
            ao.step(Direction::East, 1).await.unwrap();
        }
        assert_eq!(ao.current_position(Direction::East).await, 10);
    }

    #[tokio::test]
    async fn disabled_guiding_is_a_no_op() {
        let mut mount = SimulatedActuator::new_mount();
        mount.set_guiding_enabled(false);
        let outcome = mount.pulse(Direction::North, 500).await.unwrap();
        assert_eq!(outcome, MoveOutcome::Ok);
    }

    #[tokio::test]
    async fn fail_next_move_surfaces_transport_error() {
        let mount = SimulatedActuator::new_mount();
        mount.fail_next_move();
        let err = mount.pulse(Direction::North, 500).await.unwrap_err();
        assert_eq!(err.kind(), crate::errors::GuiderErrorKind::TransportError);
    }
}
