//! End-to-end session lifecycle tests over scripted I/O backends.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;

use agrovoice::{
    AudioCapture, AudioFrame, AudioSink, EncodedAudio, InboundEvent, OutputClock, Role,
    SessionConfig, SessionEvent, SessionIo, SessionStatus, SourceId, Transport, VoiceError,
    VoiceResult, VoiceSession,
};

// =============================================================================
// Scripted backends
// =============================================================================

struct MockCapture {
    frames: Vec<Vec<f32>>,
    keep_alive: Arc<Mutex<Option<mpsc::Sender<Vec<f32>>>>>,
    stop_count: Arc<AtomicUsize>,
}

#[async_trait]
impl AudioCapture for MockCapture {
    async fn start(
        &mut self,
        _frame_samples: usize,
        _sample_rate: u32,
    ) -> VoiceResult<mpsc::Receiver<Vec<f32>>> {
        let (tx, rx) = mpsc::channel(32);
        for frame in self.frames.clone() {
            tx.send(frame).await.expect("preload capture frames");
        }
        // Keep the channel open so the stream stays "live" until stopped.
        *self.keep_alive.lock() = Some(tx);
        Ok(rx)
    }

    fn stop(&mut self) {
        self.stop_count.fetch_add(1, Ordering::SeqCst);
        self.keep_alive.lock().take();
    }
}

struct MockTransport {
    script: Vec<InboundEvent>,
    connect_failures: usize,
    connects: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<EncodedAudio>>>,
    close_count: Arc<AtomicUsize>,
    events_rx: Option<mpsc::Receiver<InboundEvent>>,
    keep_alive: Arc<Mutex<Option<mpsc::Sender<InboundEvent>>>>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self, _config: &SessionConfig) -> VoiceResult<()> {
        let attempt = self.connects.fetch_add(1, Ordering::SeqCst);
        if attempt < self.connect_failures {
            return Err(VoiceError::Connection("connection refused".to_string()));
        }
        let (tx, rx) = mpsc::channel(64);
        for event in self.script.clone() {
            tx.send(event).await.expect("preload inbound events");
        }
        *self.keep_alive.lock() = Some(tx);
        self.events_rx = Some(rx);
        Ok(())
    }

    fn send(&self, chunk: EncodedAudio) {
        self.sent.lock().push(chunk);
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<InboundEvent>> {
        self.events_rx.take()
    }

    async fn close(&mut self) {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.keep_alive.lock().take();
    }
}

#[derive(Clone)]
struct MockSink {
    scheduled: Arc<Mutex<Vec<(SourceId, f64, f64)>>>,
    stop_calls: Arc<AtomicUsize>,
}

impl AudioSink for MockSink {
    fn schedule(&mut self, frame: AudioFrame, start_time: f64, id: SourceId) -> VoiceResult<()> {
        self.scheduled
            .lock()
            .push((id, start_time, frame.duration_secs()));
        Ok(())
    }

    fn stop_all(&mut self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
    }
}

struct ZeroClock;

impl OutputClock for ZeroClock {
    fn now(&self) -> f64 {
        0.0
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    session: VoiceSession,
    sent: Arc<Mutex<Vec<EncodedAudio>>>,
    scheduled: Arc<Mutex<Vec<(SourceId, f64, f64)>>>,
    stop_calls: Arc<AtomicUsize>,
    capture_stops: Arc<AtomicUsize>,
    close_count: Arc<AtomicUsize>,
    completions_tx: mpsc::UnboundedSender<SourceId>,
    inbound_tx: Arc<Mutex<Option<mpsc::Sender<InboundEvent>>>>,
}

fn harness(frames: Vec<Vec<f32>>, script: Vec<InboundEvent>, connect_failures: usize) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let capture_stops = Arc::new(AtomicUsize::new(0));
    let capture = MockCapture {
        frames,
        keep_alive: Arc::new(Mutex::new(None)),
        stop_count: capture_stops.clone(),
    };

    let sent = Arc::new(Mutex::new(Vec::new()));
    let close_count = Arc::new(AtomicUsize::new(0));
    let inbound_tx = Arc::new(Mutex::new(None));
    let transport = MockTransport {
        script,
        connect_failures,
        connects: Arc::new(AtomicUsize::new(0)),
        sent: sent.clone(),
        close_count: close_count.clone(),
        events_rx: None,
        keep_alive: inbound_tx.clone(),
    };

    let scheduled = Arc::new(Mutex::new(Vec::new()));
    let stop_calls = Arc::new(AtomicUsize::new(0));
    let sink = MockSink {
        scheduled: scheduled.clone(),
        stop_calls: stop_calls.clone(),
    };

    let (completions_tx, completions) = mpsc::unbounded_channel();
    let config = SessionConfig {
        api_key: "test-key".to_string(),
        ..Default::default()
    };
    let session = VoiceSession::new(
        config,
        SessionIo {
            capture: Box::new(capture),
            transport: Box::new(transport),
            sink: Box::new(sink),
            clock: Box::new(ZeroClock),
            completions,
        },
    );

    Harness {
        session,
        sent,
        scheduled,
        stop_calls,
        capture_stops,
        close_count,
        completions_tx,
        inbound_tx,
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn wait_status(session: &VoiceSession, want: SessionStatus) {
    let mut rx = session.status();
    timeout(Duration::from_secs(2), async {
        loop {
            if *rx.borrow_and_update() == want {
                return;
            }
            rx.changed().await.expect("status channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never reached status {want}"));
}

fn half_second_payload() -> InboundEvent {
    InboundEvent::AudioPayload(Bytes::from(vec![0u8; 24_000]))
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_full_conversation_flow() {
    let script = vec![
        InboundEvent::PartialInputTranscript("how do I ".to_string()),
        InboundEvent::PartialInputTranscript("treat blight?".to_string()),
        half_second_payload(),
        InboundEvent::PartialOutputTranscript("Apply a ".to_string()),
        half_second_payload(),
        InboundEvent::PartialOutputTranscript("copper fungicide.".to_string()),
        InboundEvent::TurnComplete,
    ];
    let frames = vec![vec![0.1f32; 4096]; 3];
    let h = harness(frames, script, 0);
    let mut events = h.session.events();

    h.session.start();
    wait_status(&h.session, SessionStatus::Speaking).await;

    // All captured frames went upstream with the right MIME tag.
    let sent = h.sent.clone();
    wait_for(move || sent.lock().len() == 3).await;
    for chunk in h.sent.lock().iter() {
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        assert!(!chunk.data.is_empty());
    }

    // Both chunks scheduled back to back, no overlap and no gap.
    let scheduled = h.scheduled.clone();
    wait_for(move || scheduled.lock().len() == 2).await;
    {
        let scheduled = h.scheduled.lock();
        assert_eq!(scheduled[0], (0, 0.0, 0.5));
        assert_eq!(scheduled[1], (1, 0.5, 0.5));
    }

    // Turn boundary committed user speech before model speech.
    let session = h.session.clone();
    wait_for(move || session.turns().len() == 2).await;
    let turns = h.session.turns();
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[0].text, "how do I treat blight?");
    assert_eq!(turns[1].role, Role::Model);
    assert_eq!(turns[1].text, "Apply a copper fungicide.");

    // Playback drains: back to listening only when the last source finishes.
    h.completions_tx.send(0).unwrap();
    h.completions_tx.send(1).unwrap();
    wait_status(&h.session, SessionStatus::Listening).await;

    // The lifecycle went idle -> connecting -> listening -> speaking -> listening.
    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::StateChanged { from, to } = event {
            transitions.push((from, to));
        }
    }
    assert_eq!(
        transitions,
        vec![
            (SessionStatus::Idle, SessionStatus::Connecting),
            (SessionStatus::Connecting, SessionStatus::Listening),
            (SessionStatus::Listening, SessionStatus::Speaking),
            (SessionStatus::Speaking, SessionStatus::Listening),
        ]
    );
}

#[tokio::test]
async fn test_stop_is_idempotent_and_releases_resources() {
    let h = harness(vec![vec![0.0f32; 4096]], vec![], 0);

    h.session.start();
    wait_status(&h.session, SessionStatus::Listening).await;

    h.session.stop();
    wait_status(&h.session, SessionStatus::Idle).await;

    h.session.stop();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*h.session.status().borrow(), SessionStatus::Idle);

    // Resources were released exactly once.
    assert_eq!(h.capture_stops.load(Ordering::SeqCst), 1);
    assert_eq!(h.close_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_start_while_active_restarts_session() {
    let h = harness(vec![vec![0.0f32; 4096]], vec![], 0);
    let mut events = h.session.events();

    h.session.start();
    wait_status(&h.session, SessionStatus::Listening).await;

    // A second start fully stops the old session before the new one connects.
    h.session.start();
    let capture_stops = h.capture_stops.clone();
    let close_count = h.close_count.clone();
    wait_for(move || {
        capture_stops.load(Ordering::SeqCst) == 1 && close_count.load(Ordering::SeqCst) == 1
    })
    .await;
    wait_status(&h.session, SessionStatus::Listening).await;

    // The old session was torn down exactly once; the new one holds fresh
    // resources and went back through the connect sequence.
    assert_eq!(h.capture_stops.load(Ordering::SeqCst), 1);
    assert_eq!(h.close_count.load(Ordering::SeqCst), 1);

    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::StateChanged { from, to } = event {
            transitions.push((from, to));
        }
    }
    assert_eq!(
        transitions,
        vec![
            (SessionStatus::Idle, SessionStatus::Connecting),
            (SessionStatus::Connecting, SessionStatus::Listening),
            (SessionStatus::Listening, SessionStatus::Idle),
            (SessionStatus::Idle, SessionStatus::Connecting),
            (SessionStatus::Connecting, SessionStatus::Listening),
        ]
    );
}

#[tokio::test]
async fn test_malformed_chunk_is_skipped_without_ending_session() {
    let script = vec![
        // Odd byte count cannot be 16-bit PCM.
        InboundEvent::AudioPayload(Bytes::from(vec![0u8; 5])),
        half_second_payload(),
    ];
    let h = harness(vec![], script, 0);
    let mut events = h.session.events();

    h.session.start();
    wait_status(&h.session, SessionStatus::Speaking).await;

    let scheduled = h.scheduled.clone();
    wait_for(move || scheduled.lock().len() == 1).await;
    assert_eq!(h.scheduled.lock()[0].0, 0);

    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, SessionEvent::Error(_)),
            "decode failure must not surface as a session error"
        );
    }
}

#[tokio::test]
async fn test_connection_failure_then_successful_retry() {
    let h = harness(vec![], vec![], 1);
    let mut events = h.session.events();

    h.session.start();
    wait_status(&h.session, SessionStatus::Error).await;

    let mut saw_error = false;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Error(e) = event {
            assert!(matches!(e, VoiceError::Connection(_)));
            saw_error = true;
        }
    }
    assert!(saw_error);

    // A fresh start from the error state connects normally.
    h.session.start();
    wait_status(&h.session, SessionStatus::Listening).await;
}

#[tokio::test]
async fn test_cancel_playback_barges_in() {
    let script = vec![half_second_payload(), half_second_payload()];
    let h = harness(vec![], script, 0);

    h.session.start();
    wait_status(&h.session, SessionStatus::Speaking).await;
    let scheduled = h.scheduled.clone();
    wait_for(move || scheduled.lock().len() == 2).await;

    h.session.cancel_playback();
    wait_status(&h.session, SessionStatus::Listening).await;
    assert_eq!(h.stop_calls.load(Ordering::SeqCst), 1);

    // Stale completions for cancelled sources do not flip the state again.
    h.completions_tx.send(0).unwrap();
    h.completions_tx.send(1).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*h.session.status().borrow(), SessionStatus::Listening);
}

#[tokio::test]
async fn test_remote_interruption_flushes_playback() {
    let script = vec![half_second_payload(), InboundEvent::Interrupted];
    let h = harness(vec![], script, 0);

    h.session.start();
    wait_status(&h.session, SessionStatus::Listening).await;
    let stop_calls = h.stop_calls.clone();
    wait_for(move || stop_calls.load(Ordering::SeqCst) >= 1).await;
    assert_eq!(*h.session.status().borrow(), SessionStatus::Listening);
}

#[tokio::test]
async fn test_events_after_stop_are_dropped() {
    let h = harness(vec![], vec![], 0);

    h.session.start();
    wait_status(&h.session, SessionStatus::Listening).await;
    let tx = h.inbound_tx.lock().clone().expect("transport connected");

    h.session.stop();
    wait_status(&h.session, SessionStatus::Idle).await;

    // The session's receiver is gone; late traffic never reaches the log.
    let _ = tx.try_send(InboundEvent::PartialOutputTranscript("late".to_string()));
    let _ = tx.try_send(InboundEvent::TurnComplete);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(h.session.turns().is_empty());
    assert_eq!(*h.session.status().borrow(), SessionStatus::Idle);
}

#[tokio::test]
async fn test_remote_close_returns_to_idle() {
    let script = vec![InboundEvent::Closed];
    let h = harness(vec![], script, 0);

    h.session.start();
    let close_count = h.close_count.clone();
    wait_for(move || close_count.load(Ordering::SeqCst) == 1).await;
    wait_status(&h.session, SessionStatus::Idle).await;
    assert_eq!(h.close_count.load(Ordering::SeqCst), 1);
}
