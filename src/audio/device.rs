//! Hardware capture and playback backed by cpal.
//!
//! cpal streams are not `Send`, so each stream lives on its own dedicated
//! thread and is controlled through channels. The capture thread downmixes
//! and resamples the device's native format to the session's mono input rate;
//! the playback thread mixes scheduled sources into the output callback and
//! drives the output clock by counting frames actually written to the device.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, DefaultStreamConfigError, SampleFormat, StreamConfig};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::audio::capture::{AudioCapture, CAPTURE_CHANNEL_CAPACITY};
use crate::audio::codec::AudioFrame;
use crate::audio::playback::{AudioSink, OutputClock, SourceId};
use crate::error::{VoiceError, VoiceResult};

// =============================================================================
// Error mapping
// =============================================================================

fn map_build_error(err: BuildStreamError) -> VoiceError {
    match err {
        BuildStreamError::DeviceNotAvailable => {
            VoiceError::DeviceUnavailable("device is no longer available".to_string())
        }
        BuildStreamError::BackendSpecific { err }
            if err.description.to_ascii_lowercase().contains("permission") =>
        {
            VoiceError::PermissionDenied
        }
        other => VoiceError::DeviceUnavailable(other.to_string()),
    }
}

fn map_config_error(err: DefaultStreamConfigError) -> VoiceError {
    match err {
        DefaultStreamConfigError::DeviceNotAvailable => {
            VoiceError::DeviceUnavailable("device is no longer available".to_string())
        }
        other => VoiceError::DeviceUnavailable(other.to_string()),
    }
}

/// Block-wise linear resampling to a fixed output length.
fn resample_linear(input: &[f32], output_len: usize) -> Vec<f32> {
    if input.len() == output_len {
        return input.to_vec();
    }
    if input.is_empty() || output_len == 0 {
        return vec![0.0; output_len];
    }
    let mut output = Vec::with_capacity(output_len);
    let step = (input.len() - 1) as f64 / (output_len.max(2) - 1) as f64;
    for i in 0..output_len {
        let pos = i as f64 * step;
        let base = pos as usize;
        let frac = (pos - base as f64) as f32;
        let a = input[base];
        let b = input[(base + 1).min(input.len() - 1)];
        output.push(a + (b - a) * frac);
    }
    output
}

// =============================================================================
// Capture
// =============================================================================

/// Microphone capture through the default cpal input device.
pub struct DeviceCapture {
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
}

impl DeviceCapture {
    pub fn new() -> Self {
        Self { stop_tx: None }
    }
}

impl Default for DeviceCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AudioCapture for DeviceCapture {
    async fn start(
        &mut self,
        frame_samples: usize,
        sample_rate: u32,
    ) -> VoiceResult<mpsc::Receiver<Vec<f32>>> {
        self.stop();

        let (frame_tx, frame_rx) = mpsc::channel(CAPTURE_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel();

        std::thread::Builder::new()
            .name("agrovoice-capture".to_string())
            .spawn(move || capture_thread(frame_samples, sample_rate, frame_tx, ready_tx, stop_rx))
            .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                Ok(frame_rx)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(VoiceError::DeviceUnavailable(
                "capture thread exited before opening the stream".to_string(),
            )),
        }
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for DeviceCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Downmixes, resamples and slices device input into fixed-size frames.
struct FrameChunker {
    device_channels: usize,
    frame_samples: usize,
    samples_per_block: usize,
    pending: Vec<f32>,
    frame_tx: mpsc::Sender<Vec<f32>>,
}

impl FrameChunker {
    fn new(
        device_channels: usize,
        device_rate: u32,
        target_rate: u32,
        frame_samples: usize,
        frame_tx: mpsc::Sender<Vec<f32>>,
    ) -> Self {
        // Input samples at the device rate needed to fill one output frame.
        let samples_per_block =
            (frame_samples as f64 * device_rate as f64 / target_rate as f64).ceil() as usize;
        Self {
            device_channels,
            frame_samples,
            samples_per_block: samples_per_block.max(1),
            pending: Vec::with_capacity(samples_per_block.max(1) * 2),
            frame_tx,
        }
    }

    fn push(&mut self, interleaved: &[f32]) {
        for frame in interleaved.chunks(self.device_channels) {
            let sum: f32 = frame.iter().sum();
            self.pending.push(sum / self.device_channels as f32);
        }
        while self.pending.len() >= self.samples_per_block {
            let block: Vec<f32> = self.pending.drain(..self.samples_per_block).collect();
            let frame = resample_linear(&block, self.frame_samples);
            match self.frame_tx.try_send(frame) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("Capture consumer lagging, dropping a frame");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Session stopped; the stream is about to be torn down.
                }
            }
        }
    }
}

fn capture_thread(
    frame_samples: usize,
    target_rate: u32,
    frame_tx: mpsc::Sender<Vec<f32>>,
    ready_tx: oneshot::Sender<VoiceResult<()>>,
    stop_rx: std::sync::mpsc::Receiver<()>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        let _ = ready_tx.send(Err(VoiceError::DeviceUnavailable(
            "no default input device".to_string(),
        )));
        return;
    };
    let supported = match device.default_input_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = ready_tx.send(Err(map_config_error(e)));
            return;
        }
    };

    let device_rate = supported.sample_rate().0;
    let device_channels = supported.channels() as usize;
    let config: StreamConfig = supported.config();
    let mut chunker = FrameChunker::new(
        device_channels,
        device_rate,
        target_rate,
        frame_samples,
        frame_tx,
    );
    let err_fn = |e| tracing::error!("Capture stream error: {}", e);

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _| chunker.push(data),
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _| {
                let floats: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                chunker.push(&floats);
            },
            err_fn,
            None,
        ),
        other => {
            let _ = ready_tx.send(Err(VoiceError::DeviceUnavailable(format!(
                "unsupported input sample format {other:?}"
            ))));
            return;
        }
    };

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(map_build_error(e)));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(VoiceError::DeviceUnavailable(e.to_string())));
        return;
    }

    tracing::info!(
        rate = device_rate,
        channels = device_channels,
        "Microphone capture started"
    );
    let _ = ready_tx.send(Ok(()));

    // Park until stop() or the owner is dropped, then release the stream.
    let _ = stop_rx.recv();
    drop(stream);
    tracing::info!("Microphone capture stopped");
}

// =============================================================================
// Playback
// =============================================================================

struct ScheduledSource {
    id: SourceId,
    samples: Vec<f32>,
    start_frame: u64,
}

struct SinkState {
    queue: Mutex<Vec<ScheduledSource>>,
    frames_elapsed: AtomicU64,
}

impl SinkState {
    /// Mix every due source into a mono frame buffer of `frames` samples
    /// starting at absolute frame `base`. Returns the ids that finished.
    fn mix(&self, base: u64, mono: &mut [f32]) -> Vec<SourceId> {
        mono.fill(0.0);
        let frames = mono.len() as u64;
        let mut finished = Vec::new();
        let mut queue = self.queue.lock();
        for src in queue.iter() {
            let end_frame = src.start_frame + src.samples.len() as u64;
            if src.start_frame >= base + frames {
                continue;
            }
            let from = src.start_frame.max(base);
            let to = end_frame.min(base + frames);
            for global in from..to {
                let out = (global - base) as usize;
                let idx = (global - src.start_frame) as usize;
                mono[out] = (mono[out] + src.samples[idx]).clamp(-1.0, 1.0);
            }
            if end_frame <= base + frames {
                finished.push(src.id);
            }
        }
        queue.retain(|s| !finished.contains(&s.id));
        finished
    }
}

/// Speaker output through the default cpal output device.
///
/// Scheduled buffers are mixed sample-accurately in the device callback; the
/// paired [`DeviceClock`] reads the same frame counter, so `now()` is the
/// actual playback position.
pub struct DeviceSink {
    state: Arc<SinkState>,
    device_rate: u32,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
}

/// Output clock of a [`DeviceSink`].
#[derive(Clone)]
pub struct DeviceClock {
    state: Arc<SinkState>,
    device_rate: u32,
}

impl OutputClock for DeviceClock {
    fn now(&self) -> f64 {
        self.state.frames_elapsed.load(Ordering::Relaxed) as f64 / self.device_rate as f64
    }
}

impl DeviceSink {
    /// Open the default output device.
    ///
    /// Completed source ids are delivered on `completions` from the audio
    /// thread.
    pub fn open(
        completions: mpsc::UnboundedSender<SourceId>,
    ) -> VoiceResult<(DeviceSink, DeviceClock)> {
        let state = Arc::new(SinkState {
            queue: Mutex::new(Vec::new()),
            frames_elapsed: AtomicU64::new(0),
        });
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel();

        let thread_state = state.clone();
        std::thread::Builder::new()
            .name("agrovoice-playback".to_string())
            .spawn(move || playback_thread(thread_state, completions, ready_tx, stop_rx))
            .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))?;

        let device_rate = ready_rx
            .recv()
            .map_err(|_| {
                VoiceError::DeviceUnavailable(
                    "playback thread exited before opening the stream".to_string(),
                )
            })??;

        let clock = DeviceClock {
            state: state.clone(),
            device_rate,
        };
        Ok((
            DeviceSink {
                state,
                device_rate,
                stop_tx: Some(stop_tx),
            },
            clock,
        ))
    }
}

impl AudioSink for DeviceSink {
    fn schedule(&mut self, frame: AudioFrame, start_time: f64, id: SourceId) -> VoiceResult<()> {
        // Mono playback: resample channel 0 to the device rate.
        let device_len =
            (frame.len() as f64 * self.device_rate as f64 / frame.sample_rate() as f64).round()
                as usize;
        let samples = resample_linear(frame.channel(0), device_len.max(1));
        let start_frame = (start_time * self.device_rate as f64).round() as u64;
        self.state.queue.lock().push(ScheduledSource {
            id,
            samples,
            start_frame,
        });
        Ok(())
    }

    fn stop_all(&mut self) {
        self.state.queue.lock().clear();
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn playback_thread(
    state: Arc<SinkState>,
    completions: mpsc::UnboundedSender<SourceId>,
    ready_tx: std::sync::mpsc::Sender<VoiceResult<u32>>,
    stop_rx: std::sync::mpsc::Receiver<()>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready_tx.send(Err(VoiceError::DeviceUnavailable(
            "no default output device".to_string(),
        )));
        return;
    };
    let supported = match device.default_output_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = ready_tx.send(Err(map_config_error(e)));
            return;
        }
    };
    if supported.sample_format() != SampleFormat::F32 {
        let _ = ready_tx.send(Err(VoiceError::DeviceUnavailable(format!(
            "unsupported output sample format {:?}",
            supported.sample_format()
        ))));
        return;
    }

    let device_rate = supported.sample_rate().0;
    let device_channels = supported.channels() as usize;
    let config: StreamConfig = supported.config();

    let mut mono = Vec::new();
    let callback_state = state.clone();
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / device_channels;
            mono.resize(frames, 0.0);
            let base = callback_state.frames_elapsed.load(Ordering::Relaxed);
            let finished = callback_state.mix(base, &mut mono);
            for (f, &value) in mono.iter().enumerate() {
                for c in 0..device_channels {
                    data[f * device_channels + c] = value;
                }
            }
            callback_state
                .frames_elapsed
                .fetch_add(frames as u64, Ordering::Relaxed);
            for id in finished {
                let _ = completions.send(id);
            }
        },
        |e| tracing::error!("Playback stream error: {}", e),
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(map_build_error(e)));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(VoiceError::DeviceUnavailable(e.to_string())));
        return;
    }

    tracing::info!(
        rate = device_rate,
        channels = device_channels,
        "Speaker playback started"
    );
    let _ = ready_tx.send(Ok(device_rate));

    let _ = stop_rx.recv();
    drop(stream);
    tracing::info!("Speaker playback stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_identity() {
        let input = vec![0.0, 0.5, 1.0, 0.5];
        assert_eq!(resample_linear(&input, 4), input);
    }

    #[test]
    fn test_resample_interpolates() {
        let input = vec![0.0, 1.0];
        let output = resample_linear(&input, 5);
        assert_eq!(output.len(), 5);
        assert!((output[0] - 0.0).abs() < 1e-6);
        assert!((output[2] - 0.5).abs() < 1e-6);
        assert!((output[4] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_mix_reports_finished_sources() {
        let state = SinkState {
            queue: Mutex::new(vec![
                ScheduledSource {
                    id: 1,
                    samples: vec![0.5; 10],
                    start_frame: 0,
                },
                ScheduledSource {
                    id: 2,
                    samples: vec![0.25; 10],
                    start_frame: 10,
                },
            ]),
            frames_elapsed: AtomicU64::new(0),
        };

        let mut buf = vec![0.0; 10];
        let finished = state.mix(0, &mut buf);
        assert_eq!(finished, vec![1]);
        assert!((buf[0] - 0.5).abs() < 1e-6);

        let finished = state.mix(10, &mut buf);
        assert_eq!(finished, vec![2]);
        assert!((buf[0] - 0.25).abs() < 1e-6);
        assert!(state.queue.lock().is_empty());
    }

    #[test]
    fn test_mix_honors_start_frame_offset() {
        let state = SinkState {
            queue: Mutex::new(vec![ScheduledSource {
                id: 7,
                samples: vec![1.0; 4],
                start_frame: 6,
            }]),
            frames_elapsed: AtomicU64::new(0),
        };

        let mut buf = vec![0.0; 8];
        let finished = state.mix(0, &mut buf);
        assert!(finished.is_empty());
        assert_eq!(&buf[..6], &[0.0; 6]);
        assert_eq!(&buf[6..], &[1.0, 1.0]);

        let finished = state.mix(8, &mut buf);
        assert_eq!(finished, vec![7]);
        assert_eq!(&buf[..2], &[1.0, 1.0]);
        assert_eq!(&buf[2..], &[0.0; 6]);
    }
}
