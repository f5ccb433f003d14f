//! Guide algorithms (4.2): per-axis filters between the raw pixel/axis
//! error and the command actually sent to an actuator. Pure except for
//! internal history, which `reset()` discards on state transitions that
//! invalidate it (e.g. a new lock position).

mod hysteresis;
mod identity;
mod lowpass;
mod lowpass2;
mod resist_switch;

pub use hysteresis::Hysteresis;
pub use identity::Identity;
pub use lowpass::Lowpass;
pub use lowpass2::Lowpass2;
pub use resist_switch::ResistSwitch;

/// A single per-axis filter. `result` is the only operation the guider
/// core calls in the hot path; `reset`/`summary` support state transitions
/// and diagnostics respectively.
pub trait GuideAlgorithm: Send {
    fn result(&mut self, raw_error: f64) -> f64;
    fn reset(&mut self);
    fn summary(&self) -> String;
}

/// The five variants the core requires (4.2); additional filters
/// (Gaussian-process predictors and similar) are out of scope.
pub enum GuideAlgorithmKind {
    Identity,
    Hysteresis { aggression: f64, hysteresis: f64 },
    Lowpass { slope_weight: f64 },
    Lowpass2 { slope_weight: f64, min_move: f64 },
    ResistSwitch,
}

impl GuideAlgorithmKind {
    pub fn build(&self) -> Box<dyn GuideAlgorithm> {
        match *self {
            GuideAlgorithmKind::Identity => Box::new(Identity::new()),
            GuideAlgorithmKind::Hysteresis {
                aggression,
                hysteresis,
            } => Box::new(Hysteresis::new(aggression, hysteresis)),
            GuideAlgorithmKind::Lowpass { slope_weight } => Box::new(Lowpass::new(slope_weight)),
            GuideAlgorithmKind::Lowpass2 {
                slope_weight,
                min_move,
            } => Box::new(Lowpass2::new(slope_weight, min_move)),
            GuideAlgorithmKind::ResistSwitch => Box::new(ResistSwitch::new()),
        }
    }
}
