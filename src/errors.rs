use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::result;

pub type Result<T> = result::Result<T, GuiderError>;

/// One variant per row of the error taxonomy: kinds that abort an in-progress
/// multi-frame procedure (calibration, measurement) are distinguished from
/// kinds that are logged and skipped for a single frame.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum GuiderErrorKind {
    TransportError,
    StarLost,
    CalibrationInsufficientMotion,
    CalibrationStarLost,
    MeasurementTooFewPositive,
    MeasurementTooFewNegative,
    MeasurementSanityViolation,
    MeasurementClearingFailed,
    DegenerateCalibration,
    RotatorChanged,
    AoBumpStalled,
}

impl GuiderErrorKind {
    /// True if an error of this kind must abort the multi-frame procedure
    /// it occurred in, rather than merely being logged for the current frame.
    pub fn aborts_procedure(self) -> bool {
        !matches!(
            self,
            GuiderErrorKind::TransportError
                | GuiderErrorKind::StarLost
                | GuiderErrorKind::DegenerateCalibration
                | GuiderErrorKind::RotatorChanged
                | GuiderErrorKind::AoBumpStalled
        )
    }
}

#[derive(Debug)]
pub struct GuiderError {
    kind: GuiderErrorKind,
    message: String,
}

impl GuiderError {
    pub fn from_msg(kind: GuiderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> GuiderErrorKind {
        self.kind
    }
}

impl Display for GuiderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for GuiderError {}
