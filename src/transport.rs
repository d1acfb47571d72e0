//! WebSocket transport to the hosted live model.
//!
//! `open` performs the whole handshake (socket upgrade, `setup`, wait for
//! `setupComplete`) so a refused credential surfaces as an open failure.
//! After that a reader task forwards every inbound frame as a
//! [`ChannelEvent`] and a writer task drains the outbound queue, so
//! [`Channel::send`] never blocks the session.

use crate::credentials::is_credential_rejection;
use crate::error::ChannelError;
use crate::protocol::{parse_server_message, ClientMessage, ServerMessage, Setup};
use crate::session::{Channel, ChannelEvent, ChannelId, Connector};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Opens channels against one endpoint; every channel reports into the
/// same event queue.
#[derive(Debug, Clone)]
pub struct GeminiConnector {
    endpoint: String,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl GeminiConnector {
    pub fn new(endpoint: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                endpoint: endpoint.into(),
                events,
            },
            rx,
        )
    }
}

#[derive(Debug)]
pub struct GeminiChannel {
    id: ChannelId,
    outbound: mpsc::UnboundedSender<Message>,
}

impl Channel for GeminiChannel {
    fn send(&mut self, message: ClientMessage) -> Result<(), ChannelError> {
        let text = serde_json::to_string(&message)
            .map_err(|e| ChannelError::Transport(format!("encode: {}", e)))?;
        self.outbound
            .send(Message::Text(text))
            .map_err(|_| ChannelError::Closed)
    }

    fn close(&mut self) {
        debug!("Closing {:?}", self.id);
        let _ = self.outbound.send(Message::Close(None));
    }
}

impl Connector for GeminiConnector {
    type Channel = GeminiChannel;

    async fn open(
        &mut self,
        credential: &str,
        id: ChannelId,
        setup: Setup,
    ) -> Result<GeminiChannel, ChannelError> {
        let url = format!("{}?key={}", self.endpoint, credential);
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        let setup = serde_json::to_string(&ClientMessage::Setup(setup))
            .map_err(|e| ChannelError::Transport(format!("encode setup: {}", e)))?;
        write
            .send(Message::Text(setup))
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        // Wait for the handshake acknowledgement.
        loop {
            match read.next().await {
                Some(Ok(Message::Close(frame))) => {
                    let reason = close_reason(frame.as_ref());
                    return Err(if is_credential_rejection(&reason) {
                        ChannelError::Rejected(reason)
                    } else {
                        ChannelError::Transport(format!("closed during setup: {}", reason))
                    });
                }
                Some(Ok(msg)) => {
                    if decode(&msg).is_some_and(|m| m.is_setup_complete()) {
                        break;
                    }
                }
                Some(Err(e)) => return Err(ChannelError::Transport(e.to_string())),
                None => return Err(ChannelError::Closed),
            }
        }
        info!("Setup complete on {:?}", id);

        let (outbound, mut queue) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            while let Some(msg) = queue.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    warn!("Write on {:?} failed: {}", id, e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let events = self.events.clone();
        tokio::spawn(async move {
            let reason = loop {
                match read.next().await {
                    Some(Ok(Message::Close(frame))) => break close_reason(frame.as_ref()),
                    Some(Ok(msg)) => {
                        if let Some(decoded) = decode(&msg) {
                            if events.send(ChannelEvent::Message(id, decoded)).is_err() {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => break e.to_string(),
                    None => break String::new(),
                }
            };
            let _ = events.send(ChannelEvent::Closed { id, reason });
        });

        Ok(GeminiChannel { id, outbound })
    }
}

/// Server events arrive as JSON in text or binary frames.
fn decode(msg: &Message) -> Option<ServerMessage> {
    let parsed = match msg {
        Message::Text(text) => parse_server_message(text),
        Message::Binary(bytes) => serde_json::from_slice(bytes),
        _ => return None,
    };
    parsed
        .map_err(|e| warn!("Undecodable server frame: {}", e))
        .ok()
}

fn close_reason(frame: Option<&CloseFrame<'_>>) -> String {
    frame.map(|f| f.reason.to_string()).unwrap_or_default()
}
