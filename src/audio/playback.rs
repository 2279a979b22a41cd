//! Gapless playback scheduling.
//!
//! Inbound audio chunks arrive faster or slower than real time; the
//! [`PlaybackScheduler`] decodes each chunk and schedules it on the output
//! clock so that every buffer starts exactly when the previous one ends. No
//! silence is ever inserted by the scheduler itself; gaps can only come from
//! the inbound stream pausing.

use std::collections::HashSet;

use crate::audio::codec::{AudioFrame, decode_frame};
use crate::error::VoiceResult;

/// Identifier of a scheduled playback source.
pub type SourceId = u64;

/// Read-only view of the output audio clock, in seconds.
pub trait OutputClock: Send {
    /// Current playback position of the output device.
    fn now(&self) -> f64;
}

/// Destination for decoded audio buffers.
///
/// Implementations must start each buffer at the requested clock time and
/// report completion of each source id through the completion channel they
/// were constructed with.
pub trait AudioSink: Send {
    /// Schedule a decoded buffer to begin playing at `start_time` on the
    /// output clock.
    fn schedule(&mut self, frame: AudioFrame, start_time: f64, id: SourceId) -> VoiceResult<()>;

    /// Stop every scheduled and playing source immediately.
    fn stop_all(&mut self);
}

/// Schedules decoded chunks back to back on the output clock and tracks every
/// in-flight source for cancellation.
pub struct PlaybackScheduler {
    sink: Box<dyn AudioSink>,
    clock: Box<dyn OutputClock>,
    output_sample_rate: u32,
    next_start_time: f64,
    active: HashSet<SourceId>,
    next_id: SourceId,
}

impl PlaybackScheduler {
    pub fn new(
        sink: Box<dyn AudioSink>,
        clock: Box<dyn OutputClock>,
        output_sample_rate: u32,
    ) -> Self {
        Self {
            sink,
            clock,
            output_sample_rate,
            next_start_time: 0.0,
            active: HashSet::new(),
            next_id: 0,
        }
    }

    /// Decode a raw PCM chunk and schedule it for gapless playback.
    ///
    /// Returns the start time assigned to the new source. A
    /// [`crate::VoiceError::Decode`] error means the chunk was skipped and
    /// nothing was scheduled; the session continues.
    pub fn enqueue(&mut self, payload: &[u8]) -> VoiceResult<f64> {
        let frame = decode_frame(payload, self.output_sample_rate, 1)?;
        let duration = frame.duration_secs();

        let now = self.clock.now();
        let start_time = if self.next_start_time > now {
            self.next_start_time
        } else {
            now
        };

        let id = self.next_id;
        self.next_id += 1;
        self.sink.schedule(frame, start_time, id)?;
        self.active.insert(id);
        self.next_start_time = start_time + duration;

        tracing::trace!(
            source = id,
            start = start_time,
            duration,
            "Scheduled playback source"
        );
        Ok(start_time)
    }

    /// Record that a source finished playing.
    ///
    /// Returns `true` when this removal emptied the active set, i.e. playback
    /// just went idle. Completions for sources already cancelled are ignored.
    pub fn on_source_done(&mut self, id: SourceId) -> bool {
        self.active.remove(&id) && self.active.is_empty()
    }

    /// Whether no sources are scheduled or playing.
    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    /// Stop every tracked source and reset the schedule. Used on session stop
    /// and barge-in.
    pub fn cancel_all(&mut self) {
        if !self.active.is_empty() {
            tracing::debug!(sources = self.active.len(), "Cancelling playback");
        }
        self.sink.stop_all();
        self.active.clear();
        self.next_start_time = 0.0;
    }
}
