use crate::client::config::ClientConfig;
use crate::client::utils;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use speech_service_types::audio::pcm16_to_le_bytes;
use speech_service_types::{RecognitionStatus, ServiceMessage};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use voice_coach_core::{
    Credentials, RecognitionBackend, RecognitionChannel, RecognitionEvent, RecognitionOptions,
    VoiceError,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 2 ms of silence at 16 kHz.
const KEEPALIVE_FRAME: [i16; 32] = [0; 32];

/// Continuous recognition over the service's WebSocket endpoint.
pub struct StreamingRecognizer {
    config: ClientConfig,
}

impl StreamingRecognizer {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

impl Default for StreamingRecognizer {
    fn default() -> Self {
        Self::new(ClientConfig::new())
    }
}

#[async_trait]
impl RecognitionBackend for StreamingRecognizer {
    async fn connect(
        &self,
        credentials: &Credentials,
        options: &RecognitionOptions,
    ) -> Result<RecognitionChannel, VoiceError> {
        let connection_id = utils::connection_id();
        let request = utils::build_recognition_request(credentials, options, &connection_id)
            .map_err(|e| VoiceError::Recognition(format!("{:#}", e)))?;

        let connected = tokio::time::timeout(
            self.config.connect_timeout(),
            tokio_tungstenite::connect_async(request),
        )
        .await
        .map_err(|_| {
            VoiceError::Recognition(format!(
                "no connection within {:?}",
                self.config.connect_timeout()
            ))
        })?;
        let (socket, _) = connected.map_err(handshake_error)?;
        tracing::info!(
            "recognition socket open in '{}' (connection {})",
            credentials.region(),
            connection_id
        );

        let (audio_tx, audio_rx) = mpsc::channel(self.config.capacity());
        let (events_tx, events_rx) = mpsc::channel(self.config.capacity());
        let shutdown = CancellationToken::new();
        tokio::spawn(run_socket(
            socket,
            audio_rx,
            events_tx,
            shutdown.clone(),
            self.config.clone(),
        ));

        Ok(RecognitionChannel {
            audio: audio_tx,
            events: events_rx,
            shutdown,
        })
    }
}

fn handshake_error(error: tungstenite::Error) -> VoiceError {
    match &error {
        tungstenite::Error::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            VoiceError::Credential(format!(
                "recognition handshake rejected with {}",
                response.status()
            ))
        }
        _ => VoiceError::Recognition(format!("failed to connect: {}", error)),
    }
}

async fn run_socket(
    socket: Socket,
    mut audio: mpsc::Receiver<Vec<i16>>,
    events: mpsc::Sender<RecognitionEvent>,
    shutdown: CancellationToken,
    config: ClientConfig,
) {
    let (mut write, mut read) = socket.split();
    let mut keepalive = tokio::time::interval(config.keepalive_after());
    let mut last_audio = Instant::now();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                if let Err(e) = write.send(Message::Close(None)).await {
                    tracing::debug!("failed to close recognition socket: {}", e);
                }
                break;
            }
            frame = audio.recv() => {
                let Some(frame) = frame else {
                    tracing::debug!("audio sender dropped; closing recognition socket");
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                if let Err(e) = write.send(Message::Binary(pcm16_to_le_bytes(&frame))).await {
                    let _ = events
                        .send(RecognitionEvent::Error(VoiceError::Recognition(format!(
                            "failed to send audio: {}",
                            e
                        ))))
                        .await;
                    break;
                }
                last_audio = Instant::now();
            }
            message = read.next() => {
                let event = match message {
                    Some(Ok(Message::Text(text))) => match ServiceMessage::parse(&text) {
                        Ok(message) => into_event(message),
                        Err(e) => {
                            tracing::warn!("failed to parse recognition message: {}", e);
                            None
                        }
                    },
                    Some(Ok(Message::Close(reason))) => {
                        tracing::info!("recognition socket closed: {:?}", reason);
                        let reason = reason
                            .map(|frame| frame.reason.to_string())
                            .unwrap_or_else(|| "socket closed".to_string());
                        let _ = events.send(RecognitionEvent::Cancelled(reason)).await;
                        break;
                    }
                    Some(Ok(_)) => None,
                    Some(Err(e)) => {
                        let _ = events
                            .send(RecognitionEvent::Error(VoiceError::Recognition(e.to_string())))
                            .await;
                        break;
                    }
                    None => {
                        let _ = events
                            .send(RecognitionEvent::Cancelled("socket ended".to_string()))
                            .await;
                        break;
                    }
                };
                if let Some(event) = event {
                    if events.send(event).await.is_err() {
                        tracing::debug!("recognition session gone; closing socket");
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            _ = keepalive.tick() => {
                if last_audio.elapsed() >= config.keepalive_after() {
                    if let Err(e) = write.send(Message::Binary(pcm16_to_le_bytes(&KEEPALIVE_FRAME))).await {
                        tracing::debug!("keep-alive failed: {}", e);
                    }
                    last_audio = Instant::now();
                }
            }
        }
    }
    tracing::debug!("recognition socket task finished");
}

/// Maps a service message to the event the session understands.
fn into_event(message: ServiceMessage) -> Option<RecognitionEvent> {
    match message {
        ServiceMessage::Hypothesis(hypothesis) if !hypothesis.text().is_empty() => {
            Some(RecognitionEvent::Partial(hypothesis.text().to_string()))
        }
        ServiceMessage::Phrase(phrase) => match phrase.recognition_status() {
            RecognitionStatus::Success => {
                Some(RecognitionEvent::Final(phrase.display_text().to_string()))
            }
            status if status.is_no_speech() => Some(RecognitionEvent::Final(String::new())),
            RecognitionStatus::EndOfDictation => {
                Some(RecognitionEvent::Cancelled("end of dictation".to_string()))
            }
            status if status.is_error() => Some(RecognitionEvent::Error(
                VoiceError::Recognition(format!("service reported {:?}", status)),
            )),
            status => {
                tracing::debug!("ignoring phrase with status {:?}", status);
                None
            }
        },
        ServiceMessage::Unknown(path) => {
            tracing::trace!("unhandled recognition message '{}'", path);
            None
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(raw: &str) -> Option<RecognitionEvent> {
        into_event(ServiceMessage::parse(raw).unwrap())
    }

    #[test]
    fn hypotheses_are_partials() {
        assert_eq!(
            event("Path:speech.hypothesis\r\n\r\n{\"Text\":\"can I\"}"),
            Some(RecognitionEvent::Partial("can I".to_string()))
        );
        assert_eq!(event("Path:speech.hypothesis\r\n\r\n{\"Text\":\"\"}"), None);
    }

    #[test]
    fn phrases_map_by_status() {
        assert_eq!(
            event("Path:speech.phrase\r\n\r\n{\"RecognitionStatus\":\"Success\",\"DisplayText\":\"Hi.\"}"),
            Some(RecognitionEvent::Final("Hi.".to_string()))
        );
        assert_eq!(
            event("Path:speech.phrase\r\n\r\n{\"RecognitionStatus\":\"InitialSilenceTimeout\"}"),
            Some(RecognitionEvent::Final(String::new()))
        );
        assert_eq!(
            event("Path:speech.phrase\r\n\r\n{\"RecognitionStatus\":\"EndOfDictation\"}"),
            Some(RecognitionEvent::Cancelled("end of dictation".to_string()))
        );
        assert!(matches!(
            event("Path:speech.phrase\r\n\r\n{\"RecognitionStatus\":\"Error\"}"),
            Some(RecognitionEvent::Error(VoiceError::Recognition(_)))
        ));
    }

    #[test]
    fn markers_produce_nothing() {
        assert_eq!(event("Path:turn.end\r\n\r\n{}"), None);
        assert_eq!(event("Path:speech.endDetected\r\n\r\n{\"Offset\":3}"), None);
    }

    #[test]
    fn rejected_handshake_is_a_credential_error() {
        let response = tungstenite::http::Response::builder()
            .status(401)
            .body(None)
            .unwrap();

        assert!(matches!(
            handshake_error(tungstenite::Error::Http(response)),
            VoiceError::Credential(_)
        ));
    }

    #[tokio::test]
    #[ignore = "needs AZURE_SPEECH_KEY and AZURE_SPEECH_REGION"]
    async fn connects_to_the_live_service() {
        dotenvy::dotenv().ok();
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
        let key = std::env::var("AZURE_SPEECH_KEY").unwrap();
        let region = std::env::var("AZURE_SPEECH_REGION").unwrap();

        let channel = StreamingRecognizer::default()
            .connect(&Credentials::new(key, region), &RecognitionOptions::default())
            .await
            .unwrap();
        channel.audio.send(vec![0; 1600]).await.unwrap();
        channel.shutdown.cancel();
    }
}
