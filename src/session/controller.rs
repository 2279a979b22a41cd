//! Session lifecycle controller.
//!
//! All session state lives in a single actor task that multiplexes capture
//! frames, transport events, playback completions and user commands with
//! `tokio::select!`. The public [`VoiceSession`] handle is a thin command
//! sender plus read-only views of status, events and the conversation log,
//! so it is cheap to clone into UI callbacks and never blocks.
//!
//! Lifecycle: `Idle -> Connecting -> Listening <-> Speaking`, with `Error` as
//! the terminal state of a failed session. `start()` from `Error` retries the
//! whole session; `start()` while active restarts it.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};

use crate::audio::{
    AudioCapture, AudioSink, OutputClock, PlaybackScheduler, SourceId, encode_frame,
};
use crate::config::SessionConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::session::transcript::{ConversationTurn, TranscriptAssembler};
use crate::transport::{InboundEvent, Transport};

/// Capacity of the session event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Public surface
// =============================================================================

/// Lifecycle state of a voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    /// No session in progress
    #[default]
    Idle,
    /// Acquiring the microphone and opening the live channel
    Connecting,
    /// Connected; capturing the user, no model audio playing
    Listening,
    /// Connected; model audio is playing
    Speaking,
    /// The last session failed
    Error,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Listening => "listening",
            SessionStatus::Speaking => "speaking",
            SessionStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Notifications published by the session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        from: SessionStatus,
        to: SessionStatus,
    },
    TurnCommitted(ConversationTurn),
    Error(VoiceError),
}

/// The I/O backends a session runs on.
///
/// Production sessions wire in the cpal devices and [`crate::LiveTransport`];
/// tests substitute scripted implementations. `completions` is the channel the
/// sink reports finished [`SourceId`]s on.
pub struct SessionIo {
    pub capture: Box<dyn AudioCapture>,
    pub transport: Box<dyn Transport>,
    pub sink: Box<dyn AudioSink>,
    pub clock: Box<dyn OutputClock>,
    pub completions: mpsc::UnboundedReceiver<SourceId>,
}

/// Handle to a running voice session actor.
///
/// Dropping every handle closes the command channel; the actor tears the
/// session down and exits.
#[derive(Clone)]
pub struct VoiceSession {
    commands: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<SessionStatus>,
    events_tx: broadcast::Sender<SessionEvent>,
    turns: Arc<Mutex<Vec<ConversationTurn>>>,
}

impl VoiceSession {
    /// Spawn the session actor. Must be called within a tokio runtime.
    pub fn new(config: SessionConfig, io: SessionIo) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::Idle);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let turns = Arc::new(Mutex::new(Vec::new()));

        let scheduler = PlaybackScheduler::new(io.sink, io.clock, config.output_sample_rate);
        let actor = SessionActor {
            config,
            capture: io.capture,
            transport: io.transport,
            scheduler,
            completions: io.completions,
            commands: commands_rx,
            status_tx,
            events_tx: events_tx.clone(),
            turns: turns.clone(),
            assembler: TranscriptAssembler::new(),
        };
        tokio::spawn(actor.run());

        Self {
            commands: commands_tx,
            status_rx,
            events_tx,
            turns,
        }
    }

    /// Begin a session. Restarts from scratch if one is already running.
    pub fn start(&self) {
        let _ = self.commands.send(Command::Start);
    }

    /// End the current session. Safe to call at any time.
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    /// Discard all scheduled model audio and return to listening.
    pub fn cancel_playback(&self) {
        let _ = self.commands.send(Command::CancelPlayback);
    }

    /// Watch the lifecycle state.
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    /// Subscribe to session notifications.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Snapshot of the committed conversation, oldest first.
    pub fn turns(&self) -> Vec<ConversationTurn> {
        self.turns.lock().clone()
    }
}

// =============================================================================
// Actor
// =============================================================================

#[derive(Debug)]
enum Command {
    Start,
    Stop,
    CancelPlayback,
}

/// Why a running session ended.
enum Outcome {
    /// `stop()` was called
    Stopped,
    /// `start()` was called mid-session
    Restart,
    /// The remote side closed the stream
    RemoteClosed,
    /// Every handle was dropped
    Shutdown,
}

struct SessionActor {
    config: SessionConfig,
    capture: Box<dyn AudioCapture>,
    transport: Box<dyn Transport>,
    scheduler: PlaybackScheduler,
    completions: mpsc::UnboundedReceiver<SourceId>,
    commands: mpsc::UnboundedReceiver<Command>,
    status_tx: watch::Sender<SessionStatus>,
    events_tx: broadcast::Sender<SessionEvent>,
    turns: Arc<Mutex<Vec<ConversationTurn>>>,
    assembler: TranscriptAssembler,
}

impl SessionActor {
    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                // Nothing to do while idle.
                Command::Stop | Command::CancelPlayback => {}
                Command::Start => loop {
                    let outcome = self.run_session().await;
                    self.teardown().await;
                    match outcome {
                        Ok(Outcome::Stopped) => {
                            self.set_status(SessionStatus::Idle);
                            break;
                        }
                        Ok(Outcome::RemoteClosed) => {
                            tracing::info!("Session ended by remote");
                            self.set_status(SessionStatus::Idle);
                            break;
                        }
                        Ok(Outcome::Restart) => {
                            tracing::info!("Restarting session");
                            self.set_status(SessionStatus::Idle);
                        }
                        Ok(Outcome::Shutdown) => {
                            self.set_status(SessionStatus::Idle);
                            return;
                        }
                        Err(e) => {
                            tracing::error!("Session failed: {}", e);
                            let _ = self.events_tx.send(SessionEvent::Error(e));
                            self.set_status(SessionStatus::Error);
                            break;
                        }
                    }
                },
            }
        }
        self.teardown().await;
        tracing::debug!("Session actor ended");
    }

    async fn run_session(&mut self) -> VoiceResult<Outcome> {
        let session_id = uuid::Uuid::new_v4();
        tracing::info!(session = %session_id, model = %self.config.model, "Starting voice session");
        self.config.validate()?;
        self.set_status(SessionStatus::Connecting);

        let mut frames = self
            .capture
            .start(
                self.config.capture_frame_samples,
                self.config.input_sample_rate,
            )
            .await?;
        self.transport.connect(&self.config).await?;
        let mut events = self.transport.take_events().ok_or_else(|| {
            VoiceError::Connection("transport produced no event stream".to_string())
        })?;

        self.set_status(SessionStatus::Listening);

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        None => return Ok(Outcome::Shutdown),
                        Some(Command::Stop) => return Ok(Outcome::Stopped),
                        Some(Command::Start) => return Ok(Outcome::Restart),
                        Some(Command::CancelPlayback) => self.interrupt_playback(),
                    }
                }

                frame = frames.recv() => {
                    let Some(samples) = frame else {
                        return Err(VoiceError::DeviceUnavailable(
                            "capture stream ended unexpectedly".to_string(),
                        ));
                    };
                    let chunk = encode_frame(&samples, self.config.input_sample_rate);
                    self.transport.send(chunk);
                }

                event = events.recv() => {
                    let Some(event) = event else { return Ok(Outcome::RemoteClosed) };
                    match self.handle_event(event)? {
                        Some(outcome) => return Ok(outcome),
                        None => {}
                    }
                }

                Some(id) = self.completions.recv() => {
                    if self.scheduler.on_source_done(id)
                        && *self.status_tx.borrow() == SessionStatus::Speaking
                    {
                        self.set_status(SessionStatus::Listening);
                    }
                }
            }
        }
    }

    /// Process one inbound event. Returns `Some` when the session should end.
    fn handle_event(&mut self, event: InboundEvent) -> VoiceResult<Option<Outcome>> {
        match event {
            InboundEvent::PartialInputTranscript(text) => {
                self.assembler.push_input(&text);
            }
            InboundEvent::PartialOutputTranscript(text) => {
                self.assembler.push_output(&text);
            }
            InboundEvent::AudioPayload(bytes) => match self.scheduler.enqueue(&bytes) {
                Ok(_) => self.set_status(SessionStatus::Speaking),
                Err(e) if e.is_recoverable() => {
                    tracing::warn!("Skipping malformed audio chunk: {}", e);
                }
                Err(e) => return Err(e),
            },
            InboundEvent::Interrupted => self.interrupt_playback(),
            InboundEvent::TurnComplete => {
                for turn in self.assembler.complete_turn() {
                    tracing::debug!(role = %turn.role, "Turn committed");
                    self.turns.lock().push(turn.clone());
                    let _ = self.events_tx.send(SessionEvent::TurnCommitted(turn));
                }
            }
            InboundEvent::Error(e) if e.is_recoverable() => {
                tracing::warn!("Recoverable stream error: {}", e);
            }
            InboundEvent::Error(e) => return Err(e),
            InboundEvent::Closed => return Ok(Some(Outcome::RemoteClosed)),
        }
        Ok(None)
    }

    /// Drop all pending model audio, e.g. on barge-in.
    fn interrupt_playback(&mut self) {
        self.scheduler.cancel_all();
        if *self.status_tx.borrow() == SessionStatus::Speaking {
            self.set_status(SessionStatus::Listening);
        }
    }

    /// Release every resource of the current session, in fixed order:
    /// microphone first, then playback, then the live channel.
    async fn teardown(&mut self) {
        self.capture.stop();
        self.scheduler.cancel_all();
        self.transport.close().await;
        self.assembler.clear();
    }

    fn set_status(&self, to: SessionStatus) {
        let from = *self.status_tx.borrow();
        if from == to {
            return;
        }
        tracing::info!(%from, %to, "Session state changed");
        let _ = self.status_tx.send(to);
        let _ = self.events_tx.send(SessionEvent::StateChanged { from, to });
    }
}
