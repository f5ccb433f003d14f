//! Autoguiding control core: star locking, calibration, closed-loop pixel
//! correction, and hierarchical mount/AO actuator binding, expressed as a
//! transport-agnostic state machine driven by an injected `Actuator`.
//!
//! The crate has no opinion on image acquisition, star detection, or the
//! device layer beneath an `Actuator` impl -- those are the caller's job.
//! What lives here is everything between "here is this frame's centroid"
//! and "here is the pulse/step command to send."

pub mod actuator;
pub mod backlash;
pub mod calibration;
pub mod config;
pub mod enums;
pub mod errors;
pub mod events;
pub mod geometry;
pub mod guide_algorithm;
pub mod guider;
pub mod worker;

pub use actuator::{Actuator, AoActuator, ActuatorCapabilities, MountActuator, MoveOutcome};
pub use calibration::Calibration;
pub use errors::{GuiderError, GuiderErrorKind, Result};
pub use events::{Event, EventSink, NullEventSink, RecordingEventSink};
pub use guider::{ActuatorBinding, Guider, GuiderState};
