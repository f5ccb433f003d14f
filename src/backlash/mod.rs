//! Backlash compensation (4.4) and the backlash-measurement state machine
//! (4.5), both grounded on `backlash_comp.cpp`: the compensator injects a
//! fixed extra pulse across a declination-direction reversal and
//! self-tunes that pulse width from observed residuals, while the
//! measurement engine drives a deliberate reversal sequence once to
//! characterize the mount's backlash magnitude from scratch.

pub mod compensator;
pub mod measurement;

pub use compensator::BacklashCompensator;
pub use measurement::{BacklashMeasurementEngine, MeasurementAction, MeasurementConfig, MeasurementResult};
