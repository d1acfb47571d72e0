//! Agent session: the duplex-channel state machine between the player and
//! the hosted live model.
//!
//! ## States
//!
//! ```text
//!              connect()                 open ok
//! Disconnected ─────────▶ Connecting ─────────────▶ Connected
//!      ▲                   │   ▲  │ open failed:           │
//!      │    all candidates │   └──┘ rotate credential      │ close / disconnect()
//!      └───────────────────┘                               ▼
//!      ◀─────────────────────────────────────────────── Closing
//! ```
//!
//! The reconnect intent (`should_reconnect`) is the only thing separating a
//! deliberate disconnect from a fault. A close whose reason names a rejected
//! credential rotates to the next candidate and asks the caller to reconnect;
//! any other close just marks the session down.
//!
//! ## Inbound event order
//!
//! 1. output transcription → assistant message
//! 2. tool calls → dispatched, answered in one batch
//! 3. model-turn parts → text accumulated, audio scheduled immediately
//! 4. turn complete → processing off, accumulated text flushed

use crate::audio::AudioScheduler;
use crate::capture::RecordedUtterance;
use crate::credentials::{is_credential_rejection, redact};
use crate::error::{ChannelError, SessionError};
use crate::protocol::{
    ClientContent, ClientMessage, FunctionCall, FunctionResponse, Part, ServerMessage, Setup,
    ToolResponse, ToolResult, LANGUAGE_DIRECTIVE,
};
use crate::tools::{declarations, str_arg, ToolName, ToolRegistry};
use crate::types::SessionConfig;
use crate::world::{empty_snapshot_text, SharedWorld};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::Cell;
use std::collections::VecDeque;
use std::future::Future;
use std::rc::Rc;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Channel seam
// ---------------------------------------------------------------------------

/// Generation number of a channel. Events from older channels are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

/// What a live channel reports back to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Message(ChannelId, ServerMessage),
    Closed { id: ChannelId, reason: String },
}

/// An open duplex channel. Sends never block.
pub trait Channel {
    fn send(&mut self, message: ClientMessage) -> Result<(), ChannelError>;
    fn close(&mut self);
}

/// Opens channels. `open` resolves once the setup handshake is acknowledged.
pub trait Connector {
    type Channel: Channel;

    fn open(
        &mut self,
        credential: &str,
        id: ChannelId,
        setup: Setup,
    ) -> impl Future<Output = Result<Self::Channel, ChannelError>>;
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThoughtPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl FromStr for ThoughtPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectiveThought {
    pub thought: String,
    pub priority: ThoughtPriority,
}

/// UI-facing notifications, drained by the front end every frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    MessageAppended(ConversationMessage),
    StatusChanged(SessionStatus),
    ProcessingChanged(bool),
    ThoughtUpdated(DetectiveThought),
    SpeakingChanged(bool),
    Error(String),
}

/// What the caller should do after a channel closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// The event belonged to an older channel.
    Ignored,
    /// Session is down; reconnecting is up to the caller.
    Closed,
    /// Credential was refused; the next candidate is selected. Call
    /// `connect()` again after a short delay.
    RotateCredential,
    /// Every candidate has been refused in a row.
    CredentialsExhausted,
}

/// Resets `Connecting` if a `connect()` future is dropped mid-attempt.
struct ConnectingGuard {
    status: Rc<Cell<SessionStatus>>,
    armed: bool,
}

impl ConnectingGuard {
    fn new(status: Rc<Cell<SessionStatus>>) -> Self {
        Self {
            status,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectingGuard {
    fn drop(&mut self) {
        if self.armed && self.status.get() == SessionStatus::Connecting {
            debug!("connect() cancelled mid-attempt");
            self.status.set(SessionStatus::Disconnected);
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct AgentSession<C: Connector> {
    config: SessionConfig,
    connector: C,
    credentials: Vec<String>,
    active: usize,
    status: Rc<Cell<SessionStatus>>,
    should_reconnect: bool,
    /// Consecutive rejection closes since a channel last proved usable.
    rejections: usize,
    channel: Option<(ChannelId, C::Channel)>,
    next_channel: u64,
    connection_error: Option<String>,

    messages: Vec<ConversationMessage>,
    text_parts: Vec<String>,
    processing: bool,
    thought: Option<DetectiveThought>,

    tools: ToolRegistry,
    world: SharedWorld,
    audio: AudioScheduler,
    speaking: bool,

    events: VecDeque<SessionEvent>,
}

impl<C: Connector> AgentSession<C> {
    pub fn new(
        config: SessionConfig,
        connector: C,
        credentials: Vec<String>,
        world: SharedWorld,
    ) -> Self {
        info!("Session created with {} credential candidate(s)", credentials.len());
        Self {
            config,
            connector,
            credentials,
            active: 0,
            status: Rc::new(Cell::new(SessionStatus::Disconnected)),
            should_reconnect: false,
            rejections: 0,
            channel: None,
            next_channel: 0,
            connection_error: None,
            messages: Vec::new(),
            text_parts: Vec::new(),
            processing: false,
            thought: None,
            tools: ToolRegistry::new(),
            world,
            audio: AudioScheduler::silent(),
            speaking: false,
            events: VecDeque::new(),
        }
    }

    pub fn with_audio(mut self, audio: AudioScheduler) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Open a channel, rotating through the candidates from the last-known
    /// good one until one succeeds or all have failed once.
    ///
    /// Returns `Ok` without doing anything if a channel is already live or
    /// an attempt is in flight. Failures are also stored as the connection
    /// error for the UI.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        if self.status() == SessionStatus::Connecting || self.channel.is_some() {
            debug!("Already connecting or connected");
            return Ok(());
        }

        if self.credentials.is_empty() {
            let err = SessionError::NoCredentials;
            error!("{}", err);
            self.set_error(err.to_string());
            return Err(err);
        }

        self.should_reconnect = true;
        self.connection_error = None;
        self.set_status(SessionStatus::Connecting);
        let mut guard = ConnectingGuard::new(self.status.clone());

        let total = self.credentials.len();
        let mut last_error = String::new();

        for _ in 0..total {
            let index = self.active;
            let credential = self.credentials[index].clone();
            let id = ChannelId(self.next_channel);
            self.next_channel += 1;

            info!(
                "Attempting connection with API key #{}/{} ({})",
                index + 1,
                total,
                redact(&credential)
            );

            let setup = Setup::new(&self.config, declarations());
            let timeout = self.config.connect_timeout;
            let attempt = self.connector.open(&credential, id, setup);
            let result = match tokio::time::timeout(timeout, attempt).await {
                Ok(result) => result,
                Err(_) => Err(ChannelError::Timeout(timeout.as_millis() as u64)),
            };

            match result {
                Ok(channel) => {
                    info!("Connected with API key #{} on {:?}", index + 1, id);
                    guard.disarm();
                    self.channel = Some((id, channel));
                    self.connection_error = None;
                    self.set_status(SessionStatus::Connected);
                    return Ok(());
                }
                Err(e) => {
                    if e.is_rejection() {
                        warn!("API key #{} rejected, rotating: {}", index + 1, e);
                    } else {
                        warn!("API key #{} failed: {}", index + 1, e);
                    }
                    last_error = e.to_string();
                    self.active = (self.active + 1) % total;
                }
            }
        }

        guard.disarm();
        self.set_status(SessionStatus::Disconnected);
        let err = SessionError::CredentialsExhausted {
            attempts: total,
            last: last_error,
        };
        error!("{}", err);
        self.set_error(err.to_string());
        Err(err)
    }

    /// Drop the reconnect intent, close the channel and silence playback.
    /// Safe to call in any state.
    pub fn disconnect(&mut self) {
        self.should_reconnect = false;
        self.rejections = 0;
        if let Some((id, mut channel)) = self.channel.take() {
            info!("Closing channel {:?}", id);
            self.set_status(SessionStatus::Closing);
            channel.close();
        }
        if self.status() != SessionStatus::Disconnected {
            self.set_status(SessionStatus::Disconnected);
        }
        self.text_parts.clear();
        self.stop_speaking();
    }

    /// Route one channel event. Returns the close action for close events.
    pub fn handle_event(&mut self, event: ChannelEvent) -> Option<CloseAction> {
        match event {
            ChannelEvent::Message(id, message) => {
                self.handle_message(id, message);
                None
            }
            ChannelEvent::Closed { id, reason } => Some(self.handle_close(id, &reason)),
        }
    }

    pub fn handle_close(&mut self, id: ChannelId, reason: &str) -> CloseAction {
        if !self.is_current(id) {
            debug!("Ignoring close of stale channel {:?}", id);
            return CloseAction::Ignored;
        }

        info!("Channel {:?} closed: {}", id, reason);
        self.channel = None;
        self.text_parts.clear();
        self.set_status(SessionStatus::Disconnected);

        if !(self.should_reconnect && is_credential_rejection(reason)) {
            if self.should_reconnect && !reason.is_empty() {
                self.set_error(format!("Connection closed: {}", reason));
            }
            return CloseAction::Closed;
        }

        let total = self.credentials.len();
        self.rejections += 1;
        if self.rejections >= total.max(1) {
            self.should_reconnect = false;
            let err = SessionError::CredentialsExhausted {
                attempts: self.rejections,
                last: reason.to_string(),
            };
            self.rejections = 0;
            error!("{}", err);
            self.set_error(err.to_string());
            return CloseAction::CredentialsExhausted;
        }

        self.active = (self.active + 1) % total;
        info!("API key rejected, rotating to key #{}", self.active + 1);
        CloseAction::RotateCredential
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    pub fn handle_message(&mut self, id: ChannelId, message: ServerMessage) {
        if !self.is_current(id) {
            debug!("Ignoring message from stale channel {:?}", id);
            return;
        }
        // Traffic proves the credential works.
        self.rejections = 0;

        if message.is_setup_complete() {
            debug!("Setup acknowledged on {:?}", id);
        }

        let ServerMessage {
            server_content,
            tool_call,
            tool_call_cancellation,
            go_away,
            ..
        } = message;

        if let Some(text) = server_content
            .as_ref()
            .and_then(|c| c.output_transcription.as_ref())
            .and_then(|t| t.text.as_deref())
            .filter(|t| !t.trim().is_empty())
        {
            self.append_message(Role::Assistant, text.to_string());
        }

        if let Some(batch) = tool_call {
            if !batch.function_calls.is_empty() {
                let responses = self.answer_tool_calls(&batch.function_calls);
                self.send(ClientMessage::ToolResponse(ToolResponse {
                    function_responses: responses,
                }));
            }
        }

        if let Some(cancelled) = tool_call_cancellation {
            debug!("Model cancelled tool calls {:?} (already answered)", cancelled.ids);
        }

        if let Some(content) = server_content {
            if content.interrupted {
                debug!("Model turn interrupted");
                self.stop_speaking();
            }

            for part in content.model_turn.map(|t| t.parts).unwrap_or_default() {
                if let Some(text) = part.text {
                    self.text_parts.push(text);
                }
                if let Some(blob) = part.inline_data {
                    self.audio.play_fragment(&blob.data);
                    self.refresh_speaking();
                }
            }

            if content.turn_complete {
                self.set_processing(false);
                if !self.text_parts.is_empty() {
                    let text = self.text_parts.concat();
                    self.text_parts.clear();
                    self.append_message(Role::Assistant, text);
                }
            }
        }

        if let Some(go_away) = go_away {
            info!("Model announced channel shutdown: {}", go_away);
        }
    }

    fn answer_tool_calls(&mut self, calls: &[FunctionCall]) -> Vec<FunctionResponse> {
        let thought = &mut self.thought;
        let events = &mut self.events;
        self.tools.dispatch(calls, |call| match call.name.parse::<ToolName>() {
            Ok(tool) if tool.is_local() => Some(update_thought(&call.args, thought, events)),
            _ => None,
        })
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Send a typed turn. Ignored without a live channel.
    pub fn send_text(&mut self, text: &str) {
        if self.channel.is_none() {
            debug!("No channel; dropping text turn");
            return;
        }
        self.append_message(Role::User, text.to_string());
        self.send_turn(Part::text(text));
    }

    /// Send a recorded voice turn. `label` is what the log shows.
    pub fn send_audio(&mut self, base64_audio: &str, mime_type: &str, label: &str) {
        if self.channel.is_none() {
            debug!("No channel; dropping voice turn");
            return;
        }
        self.append_message(Role::User, label.to_string());
        self.send_turn(Part::inline(mime_type, base64_audio));
    }

    pub fn send_utterance(&mut self, utterance: &RecordedUtterance) {
        self.send_audio(&utterance.to_base64(), &utterance.mime_type, utterance.label());
    }

    fn send_turn(&mut self, body: Part) {
        let snapshot = self
            .world
            .try_borrow()
            .map(|w| w.get_snapshot_text(self.config.turn_snapshot_nodes))
            .unwrap_or_else(|_| {
                warn!("World registry busy; sending empty snapshot");
                empty_snapshot_text()
            });
        let parts = vec![Part::text(snapshot), Part::text(LANGUAGE_DIRECTIVE), body];
        if self.send(ClientMessage::ClientContent(ClientContent::single_turn(parts))) {
            self.set_processing(true);
        }
    }

    fn send(&mut self, message: ClientMessage) -> bool {
        let Some((id, channel)) = self.channel.as_mut() else {
            return false;
        };
        let id = *id;
        match channel.send(message) {
            Ok(()) => true,
            Err(e) => {
                warn!("Send on {:?} failed: {}", id, e);
                self.set_error(e.to_string());
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Audio
    // -----------------------------------------------------------------------

    /// Retire finished playback; call once per frame.
    pub fn poll_audio(&mut self) {
        self.audio.poll();
        self.refresh_speaking();
    }

    pub fn stop_speaking(&mut self) {
        self.audio.stop();
        self.refresh_speaking();
    }

    fn refresh_speaking(&mut self) {
        let speaking = self.audio.is_speaking();
        if speaking != self.speaking {
            self.speaking = speaking;
            self.events.push_back(SessionEvent::SpeakingChanged(speaking));
        }
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    fn is_current(&self, id: ChannelId) -> bool {
        self.channel.as_ref().is_some_and(|(current, _)| *current == id)
    }

    fn set_status(&mut self, status: SessionStatus) {
        if self.status.get() != status {
            debug!("Session {:?} → {:?}", self.status.get(), status);
            self.status.set(status);
            self.events.push_back(SessionEvent::StatusChanged(status));
        }
    }

    fn set_processing(&mut self, processing: bool) {
        if self.processing != processing {
            self.processing = processing;
            self.events.push_back(SessionEvent::ProcessingChanged(processing));
        }
    }

    fn set_error(&mut self, error: String) {
        self.connection_error = Some(error.clone());
        self.events.push_back(SessionEvent::Error(error));
    }

    fn append_message(&mut self, role: Role, text: String) {
        let message = ConversationMessage { role, text };
        self.messages.push(message.clone());
        self.events.push_back(SessionEvent::MessageAppended(message));
    }

    /// Up to `limit` pending UI events, oldest first.
    pub fn drain_events(&mut self, limit: usize) -> Vec<SessionEvent> {
        let n = limit.min(self.events.len());
        self.events.drain(..n).collect()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.get()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == SessionStatus::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.status() == SessionStatus::Connecting
    }

    pub fn should_reconnect(&self) -> bool {
        self.should_reconnect
    }

    pub fn connection_error(&self) -> Option<&str> {
        self.connection_error.as_deref()
    }

    pub fn active_credential_index(&self) -> usize {
        self.active
    }

    pub fn total_credentials(&self) -> usize {
        self.credentials.len()
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.channel.as_ref().map(|(id, _)| *id)
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn thought(&self) -> Option<&DetectiveThought> {
        self.thought.as_ref()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn tools_mut(&mut self) -> &mut ToolRegistry {
        &mut self.tools
    }

    pub fn world(&self) -> &SharedWorld {
        &self.world
    }

    pub fn audio(&self) -> &AudioScheduler {
        &self.audio
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }
}

/// Local handler for the thoughts tool: no scene side effects.
fn update_thought(
    args: &Value,
    thought: &mut Option<DetectiveThought>,
    events: &mut VecDeque<SessionEvent>,
) -> ToolResult {
    let text = match str_arg(args, "thought") {
        Ok(t) => t.to_string(),
        Err(e) => return ToolResult::failure(e.to_string()),
    };
    let priority = match str_arg(args, "priority").map(str::parse::<ThoughtPriority>) {
        Ok(Ok(p)) => p,
        Ok(Err(e)) => return ToolResult::failure(e),
        Err(e) => return ToolResult::failure(e.to_string()),
    };

    let update = DetectiveThought {
        thought: text,
        priority,
    };
    *thought = Some(update.clone());
    events.push_back(SessionEvent::ThoughtUpdated(update));
    ToolResult::success("Detective thoughts updated")
}
