//! Actuator interface (4.1): a single abstract contract polymorphic over
//! mount and AO variants. The guider core never depends on a concrete
//! transport -- it calls this trait, and a hardware driver or (for tests
//! and the demo binary) `SimulatedActuator` implements it.

pub mod simulated;

use crate::enums::{Direction, PierSide};
use crate::errors::Result;
use async_trait::async_trait;

pub use simulated::SimulatedActuator;

/// Outcome of a single `pulse`/`step` call.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MoveOutcome {
    Ok,
    LimitReached,
}

/// Capability flags queried by the guider before relying on a behavior,
/// matching the ASCOM/ST4-style capability surface the source checks before
/// issuing guide commands.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ActuatorCapabilities {
    pub has_non_gui_move: bool,
    pub st4_has_guide_output: bool,
    pub can_pulse_guide: bool,
    pub can_report_position: bool,
}

/// Polymorphic actuator contract (4.1). A mount issues millisecond pulses;
/// an AO issues step counts but is otherwise driven identically by the
/// guider core, which is why both are expressed through one trait.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Issues a directional pulse of `duration_ms` (interpreted as a step
    /// count by AO implementations -- see `Actuator::step` for the
    /// dedicated entry point those use instead). Blocks for the duration
    /// of the command, following the teacher's `pulse_guide` shape.
    async fn pulse(&self, direction: Direction, duration_ms: u32) -> Result<MoveOutcome>;

    /// True while an earlier command is still executing.
    async fn is_busy(&self) -> bool;

    /// Capability gate consulted by the guide loop; while `false`, `pulse`
    /// must still return `Ok(MoveOutcome::Ok)` with zero actual motion
    /// rather than erroring, matching the source's `m_guidingEnabled` check.
    fn guiding_enabled(&self) -> bool;

    fn set_guiding_enabled(&mut self, enabled: bool);

    fn capabilities(&self) -> ActuatorCapabilities;

    /// Resets backlash/compensation state owned by the actuator binding.
    /// For an AO this additionally commands a return to center, matching
    /// `GuidingCeases` in 4.9's transition-to-`stop` behavior.
    async fn guiding_ceases(&mut self) -> Result<()>;
}

/// Mount-specific queries the guider core uses for pier-flip and
/// declination-dependent rate adjustment (4.3).
#[async_trait]
pub trait MountActuator: Actuator {
    async fn side_of_pier(&self) -> PierSide;
    async fn declination(&self) -> f64;
    /// `true` if a pier flip on this mount subclass also inverts the
    /// apparent declination motion direction (4.3's `dec_flip_on_pier_flip`).
    fn dec_flip_inverts_declination(&self) -> bool;
}

/// AO-specific queries: a bounded travel range and a position counter,
/// used by the hierarchical actuator binding (4.8) and the AO calibration
/// engine (4.7). Positions are in steps, centered on zero.
#[async_trait]
pub trait AoActuator: Actuator {
    /// Issues `count` steps in `direction`. The default camera-rotation
    /// assumption (4.7) means AO angles are unaffected by mount pointing.
    async fn step(&self, direction: Direction, count: u32) -> Result<MoveOutcome>;

    async fn current_position(&self, direction: Direction) -> i32;

    /// Half-width of travel along the given axis, in steps.
    fn max_position(&self, direction: Direction) -> i32;
}
