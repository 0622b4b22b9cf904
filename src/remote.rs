//! The remote streaming speech service: wire protocol and session trait.
//!
//! Modeled as a trait so the Session Manager and Synthesizer can be tested
//! against a fake implementation instead of a live network endpoint.

use crate::config::Config;
use crate::error::{Result, TtsError};
use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

/// One event yielded while consuming a turn's response stream.
pub enum SessionEvent {
    /// A contiguous slice of 16-bit PCM audio.
    AudioChunk(Vec<u8>),
    /// End-of-turn marker; no further events follow for this turn.
    TurnComplete,
}

/// A live bidirectional stream to the remote speech service, across which
/// multiple turns may be sent sequentially.
#[async_trait]
pub trait SpeechSession: Send {
    /// Send exactly one user content turn and invoke `on_event` for each
    /// response event in receive order, finishing with `TurnComplete`.
    ///
    /// Returns an error on any transport failure mid-stream; the caller is
    /// responsible for tearing the session down in that case.
    async fn send_turn(
        &mut self,
        text: &str,
        on_event: &mut (dyn FnMut(SessionEvent) + Send),
    ) -> Result<()>;
}

/// Opens new [`SpeechSession`]s against a configuration, abstracting the
/// handshake so the Session Manager can be tested without a live endpoint.
#[async_trait]
pub trait SessionOpener: Send + Sync {
    async fn open(&self, config: &Config, api_key: &str) -> Result<Box<dyn SpeechSession>>;
}

/// Default WebSocket endpoint for the Gemini Live bidirectional streaming
/// API. Authentication is by API key in the `key` query parameter.
const LIVE_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";

const MODEL_NAME: &str = "models/gemini-2.0-flash-live-001";

/// Opens sessions against the real Gemini Live endpoint.
pub struct GeminiLiveOpener;

#[async_trait]
impl SessionOpener for GeminiLiveOpener {
    async fn open(&self, config: &Config, api_key: &str) -> Result<Box<dyn SpeechSession>> {
        let url = format!("{LIVE_ENDPOINT}?key={api_key}");
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| TtsError::Transport(format!("handshake failed: {e}")))?;

        let mut session = GeminiLiveSession { ws: ws_stream };
        session.setup(config).await?;
        Ok(Box::new(session))
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct GeminiLiveSession {
    ws: WsStream,
}

impl GeminiLiveSession {
    async fn setup(&mut self, config: &Config) -> Result<()> {
        let setup = SetupMessage {
            setup: SetupPayload {
                model: MODEL_NAME.to_owned(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_owned()],
                    speech_config: SpeechConfigPayload {
                        voice_config: VoiceConfigPayload {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: config.voice.as_str().to_owned(),
                            },
                        },
                    },
                },
                system_instruction: SystemInstruction {
                    parts: vec![TextPart {
                        text: config.build_instruction(),
                    }],
                },
            },
        };
        self.send(&setup).await?;

        let text = self.recv_text().await?;
        let response: ServerMessage = serde_json::from_str(&text)
            .map_err(|e| TtsError::Transport(format!("invalid setup response: {e}")))?;
        match response {
            ServerMessage::SetupComplete(details) => {
                tracing::debug!(?details, "setup complete");
                Ok(())
            }
            other => Err(TtsError::Transport(format!(
                "expected setupComplete, got {other:?}"
            ))),
        }
    }

    async fn send(&mut self, message: &impl Serialize) -> Result<()> {
        let payload = serde_json::to_string(message)
            .map_err(|e| TtsError::Transport(format!("failed to encode message: {e}")))?;
        self.ws
            .send(Message::Text(payload))
            .await
            .map_err(|e| TtsError::Transport(format!("send failed: {e}")))
    }

    async fn recv_text(&mut self) -> Result<String> {
        loop {
            let message = self
                .ws
                .next()
                .await
                .ok_or_else(|| TtsError::Transport("session closed by peer".into()))?
                .map_err(|e| TtsError::Transport(format!("recv failed: {e}")))?;
            match message {
                Message::Text(text) => return Ok(text),
                Message::Binary(bytes) => {
                    return String::from_utf8(bytes)
                        .map_err(|e| TtsError::Transport(format!("non-UTF8 frame: {e}")));
                }
                Message::Close(_) => {
                    return Err(TtsError::Transport("session closed by peer".into()))
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }
}

#[async_trait]
impl SpeechSession for GeminiLiveSession {
    async fn send_turn(
        &mut self,
        text: &str,
        on_event: &mut (dyn FnMut(SessionEvent) + Send),
    ) -> Result<()> {
        let turn = ClientContentMessage {
            client_content: ClientContent {
                turns: vec![Turn {
                    role: "user".to_owned(),
                    parts: vec![TextPart {
                        text: text.to_owned(),
                    }],
                }],
                turn_complete: true,
            },
        };
        self.send(&turn).await?;

        loop {
            let raw = self.recv_text().await?;
            let response: ServerMessage = serde_json::from_str(&raw)
                .map_err(|e| TtsError::Transport(format!("invalid server message: {e}")))?;

            match response {
                ServerMessage::ServerContent(server_content) => {
                    if let Some(model_turn) = server_content.model_turn {
                        for part in model_turn.parts {
                            if let Some(inline) = part.inline_data {
                                match base64::engine::general_purpose::STANDARD
                                    .decode(inline.data)
                                {
                                    Ok(bytes) => on_event(SessionEvent::AudioChunk(bytes)),
                                    Err(e) => warn!(error = %e, "dropping malformed audio chunk"),
                                }
                            }
                        }
                    }
                    if server_content.turn_complete {
                        on_event(SessionEvent::TurnComplete);
                        return Ok(());
                    }
                }
                ServerMessage::SetupComplete(_) => continue,
            }
        }
    }
}

#[derive(Serialize)]
struct SetupMessage {
    setup: SetupPayload,
}

#[derive(Serialize)]
struct ClientContentMessage {
    client_content: ClientContent,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupPayload {
    model: String,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
    speech_config: SpeechConfigPayload,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfigPayload {
    voice_config: VoiceConfigPayload,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfigPayload {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<TextPart>,
}

#[derive(Serialize, Deserialize)]
struct TextPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientContent {
    turns: Vec<Turn>,
    turn_complete: bool,
}

#[derive(Serialize)]
struct Turn {
    role: String,
    parts: Vec<TextPart>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
enum ServerMessage {
    SetupComplete(serde_json::Value),
    ServerContent(ServerContentPayload),
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ServerContentPayload {
    #[serde(default)]
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Deserialize, Debug)]
struct ModelTurn {
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Deserialize, Debug)]
struct InlineData {
    data: String,
}
