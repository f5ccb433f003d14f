use crate::geometry::PixelPoint;

/// Significant guider transitions, consumed by external monitors (UI, loggers,
/// remote event servers). The core never depends on a concrete transport for
/// these -- callers provide an `EventSink`.
#[derive(Debug, Clone)]
pub enum Event {
    CalibrationStart,
    CalibrationStep { axis: &'static str, iteration: u32 },
    CalibrationComplete,
    CalibrationFailed { reason: String },
    GuidingStart,
    GuidingStop,
    StarLost,
    StarSelected { position: PixelPoint },
    LockPositionSet { position: PixelPoint },
    LockPositionLost,
}

/// Injected sink for `Event`s. The default `NullEventSink` drops everything,
/// matching how a headless test harness exercises the guider without a UI.
pub trait EventSink: Send + Sync {
    fn notify(&self, event: Event);
}

#[derive(Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn notify(&self, _event: Event) {}
}

/// Test/demo sink that records everything for later inspection.
#[derive(Default)]
pub struct RecordingEventSink {
    events: std::sync::Mutex<Vec<Event>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<Event> {
        std::mem::take(&mut self.events.lock().unwrap())
    }
}

impl EventSink for RecordingEventSink {
    fn notify(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}
