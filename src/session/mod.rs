//! Live voice session
//!
//! [`Session`] owns the microphone pipeline, the playback scheduler and the
//! connection to the live service, and drives them from one event loop.
//! Every asynchronous continuation re-enters through [`Session::handle`],
//! which checks the current status and generation before acting.

pub mod protocol;
pub mod transport;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use uuid::Uuid;

use crate::tasks::{Task, TaskStore};
use crate::tools::{self, Dialer, ToolAction, ToolDispatcher, ToolInvocation, ToolResult};
use crate::voice::{CapturePipeline, PlaybackScheduler};
use crate::{Error, Result};

pub use protocol::{ClientMessage, ServerMessage, SetupMessage};
pub use transport::{Connection, ConnectionPeer, Connector, LiveConnector, TransportEvent};

/// Driver co-pilot rules placed ahead of the task list
pub const DEFAULT_INSTRUCTION: &str = "You are DriveAssist, the co-pilot for this driver.

STRICT RULES:
1. Use ONLY the task list below.
2. NEVER invent trips, stops or addresses.
3. When the driver asks for the next stop, read out the first task in the list.
4. Keep answers short and to the point.

When the driver says \"call <name>\", find the number in the list and use dial_number.";

/// Lifecycle state of a [`Session`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// Nothing held, nothing running
    #[default]
    Idle,
    /// Devices held, waiting for the service to accept setup
    Connecting,
    /// Audio flowing both ways
    Active,
    /// Torn down after a failure; cleared by the next stop or start
    Error,
}

impl SessionStatus {
    /// Whether moving from `self` to `next` is a legal transition
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Connecting | Self::Error)
                | (Self::Connecting, Self::Active | Self::Idle | Self::Error)
                | (Self::Active, Self::Idle | Self::Error)
                | (Self::Error, Self::Idle)
        )
    }

    /// Whether the session holds devices and a connection
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Connecting | Self::Active)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Active => write!(f, "active"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Why a session was stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The user asked
    User,
    /// The service closed the connection
    RemoteClosed,
    /// A tool needs the microphone released
    ToolHandoff,
    /// The process is exiting
    Shutdown,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::RemoteClosed => write!(f, "remote closed"),
            Self::ToolHandoff => write!(f, "tool handoff"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// How assistant transcript deltas update the displayed text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptMode {
    /// Each delta replaces the text
    #[default]
    Replace,
    /// Deltas are appended until the turn completes
    Accumulate,
}

impl FromStr for TranscriptMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "accumulate" => Ok(Self::Accumulate),
            other => Err(Error::Config(format!("unknown transcript mode: {other}"))),
        }
    }
}

/// Per-session settings taken from configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Live model id
    pub model: String,
    /// Prebuilt voice name
    pub voice: Option<String>,
    /// Preamble placed before the task list
    pub instruction: String,
    /// Assistant transcript policy
    pub transcript_mode: TranscriptMode,
    /// Wait between releasing the microphone and dialing
    pub dial_settle_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            model: crate::config::DEFAULT_MODEL.to_string(),
            voice: Some(crate::config::DEFAULT_VOICE.to_string()),
            instruction: DEFAULT_INSTRUCTION.to_string(),
            transcript_mode: TranscriptMode::default(),
            dial_settle_delay: Duration::from_millis(crate::config::DEFAULT_DIAL_SETTLE_MS),
        }
    }
}

/// Render the full system instruction for `tasks`
#[must_use]
pub fn system_instruction(preamble: &str, tasks: &TaskStore) -> String {
    format!(
        "{preamble}\n\nCURRENT TASK LIST:\n{}",
        tasks.context_block()
    )
}

/// Observable session state for display
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub status_line: String,
    pub user_text: String,
    pub assistant_text: String,
    pub calling: Option<Task>,
}

/// User-initiated actions fed into [`Session::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    Stop,
    /// Stop if running, otherwise start
    Toggle,
    /// Tear down and leave the run loop
    Shutdown,
}

/// Internal event produced by [`Session::next_event`]
#[derive(Debug)]
pub enum SessionEvent {
    /// The connect attempt for `generation` finished
    Connected {
        generation: u64,
        result: Result<Connection>,
    },
    /// Something happened on the open connection
    Transport(TransportEvent),
    /// The capture pipeline produced a frame or failed
    Frame(Result<Vec<u8>>),
    /// The settle delay before a pending dial elapsed
    DialDue,
}

struct PendingConnect {
    generation: u64,
    outcome: oneshot::Receiver<Result<Connection>>,
}

struct PendingDial {
    number: String,
    due: Instant,
}

enum Step {
    Command(SessionCommand),
    Event(SessionEvent),
}

/// One duplex voice conversation with the live service
///
/// Devices are not `Send`, so the session lives on the task that created it.
pub struct Session {
    id: Uuid,
    settings: SessionSettings,
    status: SessionStatus,
    generation: u64,
    connector: Arc<dyn Connector>,
    capture: CapturePipeline,
    playback: PlaybackScheduler,
    dispatcher: ToolDispatcher,
    dialer: Arc<dyn Dialer>,
    link: Option<Connection>,
    pending: Option<PendingConnect>,
    pending_dial: Option<PendingDial>,
    user_text: String,
    assistant_text: String,
    last_error: Option<String>,
    calling: Option<Task>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl Session {
    /// Create an idle session
    #[must_use]
    pub fn new(
        settings: SessionSettings,
        connector: Arc<dyn Connector>,
        capture: CapturePipeline,
        playback: PlaybackScheduler,
        dispatcher: ToolDispatcher,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot {
            status_line: "idle".to_string(),
            ..SessionSnapshot::default()
        });

        Self {
            id: Uuid::new_v4(),
            settings,
            status: SessionStatus::Idle,
            generation: 0,
            connector,
            capture,
            playback,
            dispatcher,
            dialer,
            link: None,
            pending: None,
            pending_dial: None,
            user_text: String::new(),
            assistant_text: String::new(),
            last_error: None,
            calling: None,
            snapshot,
        }
    }

    /// Acquire devices and begin connecting
    ///
    /// Ignored while already connecting or active. Failures leave the
    /// session in [`SessionStatus::Error`] with the reason in
    /// [`Self::last_error`].
    pub fn start(&mut self) {
        match self.status {
            SessionStatus::Connecting | SessionStatus::Active => {
                tracing::warn!(session_id = %self.id, status = %self.status, "start ignored: session already running");
                return;
            }
            SessionStatus::Error => {
                self.last_error = None;
                self.transition(SessionStatus::Idle);
            }
            SessionStatus::Idle => {}
        }

        self.generation += 1;
        self.id = Uuid::new_v4();
        if let Some(dial) = self.pending_dial.take() {
            tracing::info!(number = %dial.number, "pending dial cancelled by new session");
            self.calling = None;
        }

        if let Err(e) = self.capture.acquire() {
            self.fail(e);
            self.publish();
            return;
        }
        if let Err(e) = self.playback.open() {
            self.fail(e);
            self.publish();
            return;
        }

        let setup = self.setup_message();
        let (tx, rx) = oneshot::channel();
        let connector = Arc::clone(&self.connector);
        tokio::spawn(async move {
            let result = connector.connect(setup).await;
            if let Err(Ok(connection)) = tx.send(result) {
                connection.close();
            }
        });
        self.pending = Some(PendingConnect {
            generation: self.generation,
            outcome: rx,
        });

        self.transition(SessionStatus::Connecting);
        tracing::info!(session_id = %self.id, generation = self.generation, "session starting");
        self.publish();
    }

    /// Release everything and return to idle. Idempotent.
    ///
    /// From [`SessionStatus::Error`] this only acknowledges the failure.
    pub fn stop(&mut self, reason: StopReason) {
        match self.status {
            SessionStatus::Idle => {
                tracing::trace!(%reason, "stop ignored: already idle");
                return;
            }
            SessionStatus::Error => {
                self.last_error = None;
                self.transition(SessionStatus::Idle);
                self.publish();
                return;
            }
            SessionStatus::Connecting | SessionStatus::Active => {}
        }

        self.teardown();
        self.transition(SessionStatus::Idle);
        tracing::info!(session_id = %self.id, %reason, "session stopped");
        self.publish();
    }

    /// Wait for the next internal event
    ///
    /// Sources that are not live (no pending connect, no connection, capture
    /// stopped, no dial scheduled) simply never fire.
    #[allow(clippy::future_not_send)]
    pub async fn next_event(&mut self) -> SessionEvent {
        let Self {
            pending,
            link,
            capture,
            pending_dial,
            ..
        } = self;
        let dial_due = pending_dial.as_ref().map(|dial| dial.due);

        let event = tokio::select! {
            (generation, result) = connect_outcome(pending) => {
                SessionEvent::Connected { generation, result }
            }
            event = transport_event(link) => SessionEvent::Transport(event),
            frame = capture.next_frame() => SessionEvent::Frame(
                frame.unwrap_or_else(|| Err(Error::Audio("input stream ended".to_string()))),
            ),
            () = dial_timer(dial_due) => SessionEvent::DialDue,
        };

        if matches!(event, SessionEvent::Connected { .. }) {
            self.pending = None;
        }
        event
    }

    /// Apply one event to the session
    pub fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected { generation, result } => self.on_connected(generation, result),
            SessionEvent::Transport(event) => self.on_transport(event),
            SessionEvent::Frame(Ok(frame)) => self.on_frame(&frame),
            SessionEvent::Frame(Err(e)) => self.fail(e),
            SessionEvent::DialDue => self.fire_dial(),
        }
        self.publish();
    }

    /// Drive the session until [`SessionCommand::Shutdown`] or the command
    /// channel closes
    #[allow(clippy::future_not_send)]
    pub async fn run(&mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        loop {
            let step = tokio::select! {
                command = commands.recv() => Step::Command(command.unwrap_or(SessionCommand::Shutdown)),
                event = self.next_event() => Step::Event(event),
            };

            match step {
                Step::Event(event) => self.handle(event),
                Step::Command(SessionCommand::Start) => self.start(),
                Step::Command(SessionCommand::Stop) => self.stop(StopReason::User),
                Step::Command(SessionCommand::Toggle) => {
                    if self.status.is_running() {
                        self.stop(StopReason::User);
                    } else {
                        self.start();
                    }
                }
                Step::Command(SessionCommand::Shutdown) => break,
            }
        }

        self.stop(StopReason::Shutdown);
        if let Some(dial) = self.pending_dial.take() {
            tracing::warn!(number = %dial.number, "pending dial dropped at shutdown");
        }
    }

    fn on_connected(&mut self, generation: u64, result: Result<Connection>) {
        if generation != self.generation || self.status != SessionStatus::Connecting {
            if let Ok(connection) = result {
                tracing::info!(generation, "closing connection that opened after stop");
                connection.close();
            }
            return;
        }

        match result {
            Ok(connection) => {
                tracing::debug!(session_id = %self.id, "connected, awaiting setup acknowledgement");
                self.link = Some(connection);
            }
            Err(e) => self.fail(e),
        }
    }

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                if self.status != SessionStatus::Connecting {
                    return;
                }
                self.transition(SessionStatus::Active);
                if let Err(e) = self.capture.start() {
                    self.fail(e);
                    return;
                }
                tracing::info!(session_id = %self.id, "session active");
            }
            TransportEvent::Message(message) => self.on_message(message),
            TransportEvent::Closed(reason) => {
                tracing::info!(session_id = %self.id, reason = reason.as_deref().unwrap_or("none"), "connection closed by service");
                self.stop(StopReason::RemoteClosed);
            }
            TransportEvent::Failed(message) => self.fail(Error::Connection(message)),
        }
    }

    fn on_message(&mut self, message: ServerMessage) {
        if let Some(text) = message.input_transcription {
            self.user_text = text;
        }
        if let Some(text) = message.output_transcription {
            match self.settings.transcript_mode {
                TranscriptMode::Replace => self.assistant_text = text,
                TranscriptMode::Accumulate => self.assistant_text.push_str(&text),
            }
        }

        if message.interrupted {
            let stopped = self.playback.interrupt();
            tracing::debug!(stopped, "barge-in");
        }

        for chunk in &message.audio_chunks {
            if let Err(e) = self.playback.on_audio_chunk(chunk) {
                self.fail(e);
                return;
            }
        }

        if message.turn_complete {
            if let Err(e) = self.playback.finish_turn() {
                self.fail(e);
                return;
            }
            self.assistant_text.clear();
        }

        if let Some(time_left) = message.go_away {
            tracing::warn!(session_id = %self.id, %time_left, "service is going away");
        }

        if !message.tool_calls.is_empty() {
            self.on_tool_calls(&message.tool_calls);
        }
    }

    /// Reply to every call first, then carry out side effects
    ///
    /// Only the first dial in a message hands off; later dials are refused.
    fn on_tool_calls(&mut self, calls: &[ToolInvocation]) {
        let mut handoff = None;
        for call in calls {
            if handoff.is_some() && call.name == tools::DIAL_NUMBER {
                tracing::warn!(id = %call.id, "refusing second dial in one message");
                self.send(ClientMessage::tool_result(ToolResult::failure(
                    call,
                    "another call is already being placed",
                )));
                continue;
            }
            let outcome = self.dispatcher.dispatch(call);
            self.send(ClientMessage::tool_result(outcome.result));
            if outcome.action.is_some() {
                handoff = outcome.action;
            }
        }

        if let Some(ToolAction::CallHandoff { number, target }) = handoff {
            tracing::info!(%number, task = %target.id, "releasing microphone for call");
            self.calling = Some(target);
            self.stop(StopReason::ToolHandoff);
            self.pending_dial = Some(PendingDial {
                number,
                due: Instant::now() + self.settings.dial_settle_delay,
            });
        }
    }

    fn on_frame(&mut self, frame: &[u8]) {
        if self.status != SessionStatus::Active {
            return;
        }
        self.send(ClientMessage::audio(frame));
        self.playback.reap();
    }

    fn fire_dial(&mut self) {
        let Some(dial) = self.pending_dial.take() else {
            return;
        };
        tracing::info!(number = %dial.number, "dialing");
        self.dialer.dial(&dial.number);
        self.calling = None;
    }

    fn send(&self, message: ClientMessage) {
        let Some(link) = self.link.as_ref() else {
            tracing::debug!("dropping outbound message: no connection");
            return;
        };
        if let Err(e) = link.send(message) {
            tracing::warn!(session_id = %self.id, error = %e, "outbound send failed");
        }
    }

    fn setup_message(&self) -> SetupMessage {
        let instruction = match self.dispatcher.tasks().read() {
            Ok(store) => system_instruction(&self.settings.instruction, &store),
            Err(_) => {
                tracing::warn!("task store lock poisoned, starting without tasks");
                system_instruction(&self.settings.instruction, &TaskStore::default())
            }
        };
        SetupMessage::new(
            &self.settings.model,
            self.settings.voice.as_deref(),
            instruction,
            tools::declarations(),
        )
    }

    /// Release the connection and both devices
    fn teardown(&mut self) {
        self.pending = None;
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.capture.stop();
        self.playback.close();
        self.user_text.clear();
        self.assistant_text.clear();
    }

    fn fail(&mut self, err: Error) {
        tracing::error!(session_id = %self.id, error = %err, "session failed");
        self.teardown();
        self.last_error = Some(err.to_string());
        self.transition(SessionStatus::Error);
    }

    fn transition(&mut self, next: SessionStatus) {
        if self.status == next {
            return;
        }
        if !self.status.can_transition_to(next) {
            tracing::warn!(from = %self.status, to = %next, "illegal session transition ignored");
            return;
        }
        tracing::debug!(session_id = %self.id, from = %self.status, to = %next, "session transition");
        self.status = next;
    }

    fn publish(&self) {
        let next = self.to_snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn to_snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            status_line: self.status_line(),
            user_text: self.user_text.clone(),
            assistant_text: self.assistant_text.clone(),
            calling: self.calling.clone(),
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn status(&self) -> SessionStatus {
        self.status
    }

    /// Status text for display
    #[must_use]
    pub fn status_line(&self) -> String {
        match self.status {
            SessionStatus::Idle => "idle".to_string(),
            SessionStatus::Connecting => "connecting".to_string(),
            SessionStatus::Active => "listening".to_string(),
            SessionStatus::Error => self
                .last_error
                .clone()
                .unwrap_or_else(|| "error".to_string()),
        }
    }

    /// Latest user transcript
    #[must_use]
    pub fn user_text(&self) -> &str {
        &self.user_text
    }

    /// Assistant transcript for the current turn
    #[must_use]
    pub fn assistant_text(&self) -> &str {
        &self.assistant_text
    }

    /// Task shown while a call is being set up
    #[must_use]
    pub const fn calling(&self) -> Option<&Task> {
        self.calling.as_ref()
    }

    /// Reason for the last failure, until acknowledged
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Counter bumped on every start
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a connection is held
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Whether a dial is waiting for its settle delay
    #[must_use]
    pub const fn has_pending_dial(&self) -> bool {
        self.pending_dial.is_some()
    }

    /// Playback scheduler, for inspection
    #[must_use]
    pub const fn playback(&self) -> &PlaybackScheduler {
        &self.playback
    }

    /// Capture pipeline, for inspection
    #[must_use]
    pub const fn capture(&self) -> &CapturePipeline {
        &self.capture
    }

    /// Watch snapshots published after every change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }
}

async fn connect_outcome(pending: &mut Option<PendingConnect>) -> (u64, Result<Connection>) {
    let Some(connect) = pending.as_mut() else {
        return std::future::pending().await;
    };
    let result = (&mut connect.outcome)
        .await
        .unwrap_or_else(|_| Err(Error::Connection("connect task aborted".to_string())));
    (connect.generation, result)
}

async fn transport_event(link: &mut Option<Connection>) -> TransportEvent {
    match link.as_mut() {
        Some(connection) => connection.recv().await,
        None => std::future::pending().await,
    }
}

async fn dial_timer(due: Option<Instant>) {
    match due {
        Some(due) => tokio::time::sleep_until(due).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        use SessionStatus::{Active, Connecting, Error, Idle};

        assert!(Idle.can_transition_to(Connecting));
        assert!(Idle.can_transition_to(Error));
        assert!(Connecting.can_transition_to(Active));
        assert!(Connecting.can_transition_to(Idle));
        assert!(Active.can_transition_to(Error));
        assert!(Error.can_transition_to(Idle));

        assert!(!Idle.can_transition_to(Active));
        assert!(!Active.can_transition_to(Connecting));
        assert!(!Error.can_transition_to(Active));
        assert!(!Error.can_transition_to(Connecting));
    }

    #[test]
    fn transcript_mode_parses() {
        assert_eq!("replace".parse::<TranscriptMode>().unwrap(), TranscriptMode::Replace);
        assert_eq!(" Accumulate ".parse::<TranscriptMode>().unwrap(), TranscriptMode::Accumulate);
        assert!("append".parse::<TranscriptMode>().is_err());
    }

    #[test]
    fn instruction_embeds_task_list() {
        let empty = system_instruction("Be brief.", &TaskStore::default());
        assert!(empty.starts_with("Be brief."));
        assert!(empty.ends_with("There are currently NO tasks loaded in the system."));

        let store = TaskStore::new(vec![Task::external("+3112345")]);
        let rendered = system_instruction(DEFAULT_INSTRUCTION, &store);
        assert!(rendered.contains("dial_number"));
        assert!(rendered.contains("Tel: +3112345"));
    }
}
