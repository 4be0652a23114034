// cloudrestore/src/restore/progress.rs
use std::sync::Arc;
use tracing::trace;

use super::media::MediaCategory;
use crate::presentation::{EventSink, RestoreEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageId {
    /// Waiting for the remote database copy.
    DatabaseDownload,
    /// Database copied into place.
    DatabaseRestore,
    Media(MediaCategory),
}

/// (base, span) of a stage on the global 0..1 scale.
pub fn stage_band(stage: StageId) -> (f64, f64) {
    match stage {
        StageId::DatabaseDownload => (0.0, 0.1),
        StageId::DatabaseRestore => (0.1, 0.2),
        StageId::Media(MediaCategory::Photos) => (0.3, 0.35),
        StageId::Media(MediaCategory::Audios) => (0.65, 0.35),
    }
}

/// Maps stage-local fractions onto one non-decreasing global value and
/// forwards it to the presentation side.
pub struct ProgressAggregator {
    sink: Arc<dyn EventSink>,
    current: f64,
}

impl ProgressAggregator {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        ProgressAggregator { sink, current: 0.0 }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    /// Returns the value delivered. A fraction that would move progress
    /// backwards is held at the current value instead.
    pub fn report(&mut self, stage: StageId, fraction: f64) -> f64 {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        let (base, span) = stage_band(stage);
        let global = (base + fraction * span).min(1.0);
        if global > self.current {
            self.current = global;
        }
        trace!(?stage, fraction, global = self.current, "progress");
        self.sink.send(RestoreEvent::Progress(self.current));
        self.current
    }
}
