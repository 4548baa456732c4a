//! Change recorder.

use crate::change::{ChangeDescription, Edit};
use crate::error::{CoreError, CoreResult};
use crate::model::ChangeEvent;

/// Captures undoable changes into a [`ChangeDescription`].
///
/// One recorder serves a whole chain of nested transactions on a thread.
/// A nested transaction that records ends its parent's segment; one that
/// does not record pauses it. Either way the parent picks up again when the
/// nested transaction closes.
#[derive(Debug, Default)]
pub struct ChangeRecorder {
    segment: Option<ChangeDescription>,
    paused: bool,
    recorded: u64,
}

impl ChangeRecorder {
    /// Creates an idle recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new segment.
    pub fn begin_recording(&mut self) -> CoreResult<()> {
        if self.segment.is_some() {
            return Err(CoreError::illegal_state("recorder is already recording"));
        }
        self.segment = Some(ChangeDescription::new());
        self.paused = false;
        Ok(())
    }

    /// Ends the current segment and returns what it captured.
    ///
    /// Returns an empty description when no segment is open.
    pub fn end_recording(&mut self) -> ChangeDescription {
        self.paused = false;
        self.segment.take().unwrap_or_default()
    }

    /// Suspends capture, keeping the open segment.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resumes capture after [`pause`](Self::pause).
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Reinstates a segment taken with [`end_recording`](Self::end_recording)
    /// in the paused state.
    pub(crate) fn restore(&mut self, segment: ChangeDescription) {
        self.segment = Some(segment);
        self.paused = true;
    }

    /// Returns true while a segment is open, paused or not.
    #[must_use]
    pub fn has_segment(&self) -> bool {
        self.segment.is_some()
    }

    /// Returns true while events are being captured.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.segment.is_some() && !self.paused
    }

    /// Returns true while paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Returns how many edits were captured over the recorder's lifetime.
    #[must_use]
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    /// Captures an event if it is undoable and not a touch.
    pub fn record(&mut self, event: &ChangeEvent) {
        if self.paused {
            return;
        }
        let Some(segment) = self.segment.as_mut() else {
            return;
        };
        if let Some(edit) = Edit::from_event(event) {
            segment.push(edit);
            self.recorded += 1;
        }
    }
}
