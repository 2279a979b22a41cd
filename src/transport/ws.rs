//! WebSocket implementation of [`Transport`].
//!
//! One connection per session. After the TLS handshake the client sends the
//! `setup` message, then a spawned task owns both halves of the socket:
//! outgoing chunks are drained from a bounded channel, incoming frames are
//! parsed and forwarded as [`InboundEvent`]s. The session actor never touches
//! the socket directly.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::audio::EncodedAudio;
use crate::config::SessionConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::transport::messages::{ClientMessage, ServerMessage};
use crate::transport::{InboundEvent, Transport};

/// Channel capacity for outgoing WebSocket messages.
const WS_CHANNEL_CAPACITY: usize = 256;

/// WebSocket transport to the live generate-content endpoint.
pub struct LiveTransport {
    ws_tx: Option<mpsc::Sender<ClientMessage>>,
    events_rx: Option<mpsc::Receiver<InboundEvent>>,
    task: Option<JoinHandle<()>>,
}

impl LiveTransport {
    pub fn new() -> Self {
        Self {
            ws_tx: None,
            events_rx: None,
            task: None,
        }
    }

    /// Build the connection URL with the API key as a query parameter.
    fn build_url(config: &SessionConfig) -> VoiceResult<Url> {
        let mut url = Url::parse(&config.endpoint)
            .map_err(|e| VoiceError::Config(format!("invalid endpoint: {e}")))?;
        url.query_pairs_mut().append_pair("key", &config.api_key);
        Ok(url)
    }
}

impl Default for LiveTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LiveTransport {
    async fn connect(&mut self, config: &SessionConfig) -> VoiceResult<()> {
        config.validate()?;
        self.close().await;

        let url = Self::build_url(config)?;
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| VoiceError::Connection(e.to_string()))?;
        tracing::info!(model = %config.model, voice = %config.voice, "Live channel connected");

        let (mut ws_sink, mut ws_source) = ws_stream.split();

        // Handshake before any audio flows.
        let setup = serde_json::to_string(&ClientMessage::setup(config))
            .map_err(|e| VoiceError::Protocol(e.to_string()))?;
        ws_sink
            .send(Message::Text(setup.into()))
            .await
            .map_err(|e| VoiceError::Connection(e.to_string()))?;

        let (ws_tx, mut ws_rx) = mpsc::channel::<ClientMessage>(WS_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel::<InboundEvent>(WS_CHANNEL_CAPACITY);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = ws_rx.recv() => {
                        let Some(message) = outgoing else { break };
                        let json = match serde_json::to_string(&message) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!("Failed to serialize client message: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            tracing::error!("Failed to send WebSocket message: {}", e);
                            let _ = events_tx
                                .send(InboundEvent::Error(VoiceError::Connection(e.to_string())))
                                .await;
                            break;
                        }
                    }

                    incoming = ws_source.next() => {
                        match incoming {
                            // The service sends JSON in both text and binary frames.
                            Some(Ok(Message::Text(text))) => {
                                dispatch_frame(text.as_bytes(), &events_tx).await;
                            }
                            Some(Ok(Message::Binary(data))) => {
                                dispatch_frame(&data, &events_tx).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                tracing::info!("Live channel closed by server");
                                let _ = events_tx.send(InboundEvent::Closed).await;
                                break;
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::error!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::error!("WebSocket error: {}", e);
                                let _ = events_tx
                                    .send(InboundEvent::Error(VoiceError::Connection(e.to_string())))
                                    .await;
                                break;
                            }
                        }
                    }
                }
            }
            tracing::debug!("Live channel task ended");
        });

        self.ws_tx = Some(ws_tx);
        self.events_rx = Some(events_rx);
        self.task = Some(task);
        Ok(())
    }

    fn send(&self, chunk: EncodedAudio) {
        let Some(tx) = self.ws_tx.as_ref() else {
            tracing::debug!("Dropping audio chunk, channel not connected");
            return;
        };
        if tx.try_send(ClientMessage::audio_chunk(chunk)).is_err() {
            tracing::debug!("Outgoing channel saturated, dropping audio chunk");
        }
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<InboundEvent>> {
        self.events_rx.take()
    }

    async fn close(&mut self) {
        self.ws_tx = None;
        self.events_rx = None;
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::info!("Live channel disconnected");
        }
    }
}

/// Parse one WebSocket frame and forward its events.
///
/// Unknown fields inside a valid frame are ignored; a frame that is not valid
/// JSON at all is a protocol violation and ends the session.
async fn dispatch_frame(payload: &[u8], events_tx: &mpsc::Sender<InboundEvent>) {
    let message: ServerMessage = match serde_json::from_slice(payload) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("Unparseable server frame: {}", e);
            let _ = events_tx
                .send(InboundEvent::Error(VoiceError::Protocol(format!(
                    "unparseable server frame: {e}"
                ))))
                .await;
            return;
        }
    };
    if message.setup_complete.is_some() {
        tracing::debug!("Session setup acknowledged");
    }
    for event in message.into_events() {
        if events_tx.send(event).await.is_err() {
            return;
        }
    }
}
