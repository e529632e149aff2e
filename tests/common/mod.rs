//! Shared test utilities
//!
//! Deterministic stand-ins for the microphone, the speaker clock, the live
//! service and the native dialer, plus a harness wiring them into a session.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use driveassist::session::{
    Connection, ConnectionPeer, ServerMessage, SetupMessage, TransportEvent,
};
use driveassist::voice::{AudioInputSource, AudioOutputSink, BlockSender, PlaybackHandle};
use driveassist::{
    CapturePipeline, Connector, Dialer, Error, PlaybackScheduler, Result, Session,
    SessionSettings, SessionStatus, SharedTaskStore, Task, TaskStatus, TaskStore,
    ToolDispatcher,
};
use tokio::sync::{Notify, mpsc};

/// Microphone fed by the test
#[derive(Default)]
pub struct InputState {
    pub open: bool,
    pub deny: bool,
    pub opens: usize,
    pub blocks: Option<BlockSender>,
}

#[derive(Clone, Default)]
pub struct FakeInput {
    pub state: Arc<Mutex<InputState>>,
}

impl FakeInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// A microphone whose permission prompt is refused
    pub fn denied() -> Self {
        let input = Self::default();
        input.state.lock().unwrap().deny = true;
        input
    }

    /// Push one block; false if the stream is not running
    pub fn feed(&self, samples: Vec<f32>) -> bool {
        let state = self.state.lock().unwrap();
        state
            .blocks
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(samples)).is_ok())
    }

    /// Report a device failure through the stream
    pub fn fail(&self, message: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .blocks
            .as_ref()
            .is_some_and(|tx| tx.send(Err(Error::Audio(message.to_string()))).is_ok())
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    pub fn is_streaming(&self) -> bool {
        self.state.lock().unwrap().blocks.is_some()
    }
}

impl AudioInputSource for FakeInput {
    fn sample_rate(&self) -> u32 {
        16000
    }

    fn open(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.deny {
            return Err(Error::PermissionDenied("denied by user".to_string()));
        }
        state.open = true;
        state.opens += 1;
        Ok(())
    }

    fn start(&mut self, _block_size: usize, blocks: BlockSender) -> Result<()> {
        self.state.lock().unwrap().blocks = Some(blocks);
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.open = false;
        state.blocks = None;
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }
}

/// One buffer handed to the fake speaker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scheduled {
    pub handle: PlaybackHandle,
    pub start_at: f64,
    pub samples: usize,
}

/// Speaker with a clock the test advances by hand
pub struct OutputState {
    pub open: bool,
    pub rate: u32,
    pub now: f64,
    pub next_id: u64,
    pub scheduled: Vec<Scheduled>,
    pub stopped: Vec<PlaybackHandle>,
}

#[derive(Clone)]
pub struct FakeOutput {
    pub state: Arc<Mutex<OutputState>>,
}

impl FakeOutput {
    pub fn new() -> Self {
        Self::with_rate(24000)
    }

    pub fn with_rate(rate: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(OutputState {
                open: false,
                rate,
                now: 0.0,
                next_id: 0,
                scheduled: Vec::new(),
                stopped: Vec::new(),
            })),
        }
    }

    pub fn advance(&self, secs: f64) {
        self.state.lock().unwrap().now += secs;
    }

    pub fn now(&self) -> f64 {
        self.state.lock().unwrap().now
    }

    pub fn scheduled(&self) -> Vec<Scheduled> {
        self.state.lock().unwrap().scheduled.clone()
    }

    pub fn stopped(&self) -> Vec<PlaybackHandle> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }
}

impl AudioOutputSink for FakeOutput {
    fn sample_rate(&self) -> u32 {
        self.state.lock().unwrap().rate
    }

    fn open(&mut self) -> Result<()> {
        self.state.lock().unwrap().open = true;
        Ok(())
    }

    fn now(&self) -> f64 {
        self.state.lock().unwrap().now
    }

    fn schedule(&mut self, samples: Vec<f32>, start_at: f64) -> Result<PlaybackHandle> {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return Err(Error::Audio("closed".to_string()));
        }
        state.next_id += 1;
        let handle = PlaybackHandle(state.next_id);
        state.scheduled.push(Scheduled {
            handle,
            start_at,
            samples: samples.len(),
        });
        Ok(handle)
    }

    fn stop(&mut self, handle: PlaybackHandle) {
        self.state.lock().unwrap().stopped.push(handle);
    }

    fn close(&mut self) {
        self.state.lock().unwrap().open = false;
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }
}

/// Connector handing the transport side of every connection to the test
pub struct ScriptedConnector {
    peers: mpsc::UnboundedSender<ConnectionPeer>,
    setups: Mutex<Vec<SetupMessage>>,
    failure: Option<String>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ConnectionPeer>) {
        Self::build(None, None)
    }

    /// Connector whose handshake always fails
    pub fn failing(message: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<ConnectionPeer>) {
        Self::build(Some(message.to_string()), None)
    }

    /// Connector whose handshake waits until the returned `Notify` fires
    pub fn gated() -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<ConnectionPeer>,
        Arc<Notify>,
    ) {
        let gate = Arc::new(Notify::new());
        let (connector, peers) = Self::build(None, Some(Arc::clone(&gate)));
        (connector, peers, gate)
    }

    fn build(
        failure: Option<String>,
        gate: Option<Arc<Notify>>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ConnectionPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                peers: tx,
                setups: Mutex::new(Vec::new()),
                failure,
                gate,
            }),
            rx,
        )
    }

    pub fn setups(&self) -> Vec<SetupMessage> {
        self.setups.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, setup: SetupMessage) -> Result<Connection> {
        self.setups.lock().unwrap().push(setup);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(message) = &self.failure {
            return Err(Error::Connection(message.clone()));
        }
        let (connection, peer) = Connection::pair();
        let _ = self.peers.send(peer);
        Ok(connection)
    }
}

/// Dialer that records numbers instead of placing calls
#[derive(Default)]
pub struct RecordingDialer {
    dialed: Mutex<Vec<String>>,
}

impl RecordingDialer {
    pub fn dialed(&self) -> Vec<String> {
        self.dialed.lock().unwrap().clone()
    }
}

impl Dialer for RecordingDialer {
    fn dial(&self, number: &str) {
        self.dialed.lock().unwrap().push(number.to_string());
    }
}

/// Task used across scenarios
pub fn sample_task() -> Task {
    Task {
        id: "t1".to_string(),
        display_name: "Garage Jansen".to_string(),
        organization: "Jansen BV".to_string(),
        subject: "Pickup".to_string(),
        phone_number: "+3112345".to_string(),
        status: TaskStatus::Open,
    }
}

/// A session wired to fakes
pub struct Harness {
    pub session: Session,
    pub input: FakeInput,
    pub output: FakeOutput,
    pub connector: Arc<ScriptedConnector>,
    pub peers: mpsc::UnboundedReceiver<ConnectionPeer>,
    pub dialer: Arc<RecordingDialer>,
    pub tasks: SharedTaskStore,
}

pub struct HarnessBuilder {
    settings: SessionSettings,
    tasks: Vec<Task>,
    input: FakeInput,
    connector: Option<(Arc<ScriptedConnector>, mpsc::UnboundedReceiver<ConnectionPeer>)>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            settings: SessionSettings {
                dial_settle_delay: Duration::from_secs(3),
                ..SessionSettings::default()
            },
            tasks: vec![sample_task()],
            input: FakeInput::new(),
            connector: None,
        }
    }

    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn tasks(mut self, tasks: Vec<Task>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn input(mut self, input: FakeInput) -> Self {
        self.input = input;
        self
    }

    pub fn connector(
        mut self,
        connector: (Arc<ScriptedConnector>, mpsc::UnboundedReceiver<ConnectionPeer>),
    ) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn build(self) -> Harness {
        let output = FakeOutput::new();
        let (connector, peers) = self.connector.unwrap_or_else(ScriptedConnector::new);
        let dialer = Arc::new(RecordingDialer::default());
        let tasks = TaskStore::new(self.tasks).shared();

        let session = Session::new(
            self.settings,
            connector.clone(),
            CapturePipeline::new(Box::new(self.input.clone())),
            PlaybackScheduler::new(Box::new(output.clone())),
            ToolDispatcher::new(Arc::clone(&tasks)),
            dialer.clone(),
        );

        Harness {
            session,
            input: self.input,
            output,
            connector,
            peers,
            dialer,
            tasks,
        }
    }
}

impl Harness {
    pub fn new() -> Self {
        HarnessBuilder::new().build()
    }

    /// Wait for one internal event and apply it
    pub async fn step(&mut self) {
        let event = self.session.next_event().await;
        self.session.handle(event);
    }

    /// Start, connect and acknowledge setup; returns the transport side
    pub async fn activate(&mut self) -> ConnectionPeer {
        self.session.start();
        self.activate_pending().await
    }

    /// Finish a start that is already connecting
    pub async fn activate_pending(&mut self) -> ConnectionPeer {
        assert_eq!(self.session.status(), SessionStatus::Connecting);

        self.step().await;
        let peer = self.peers.recv().await.unwrap();
        peer.inbound.send(TransportEvent::Opened).unwrap();
        self.step().await;

        assert_eq!(self.session.status(), SessionStatus::Active);
        peer
    }

    /// Deliver one inbound message and apply it
    pub async fn deliver(&mut self, peer: &ConnectionPeer, json: &str) {
        let message = ServerMessage::parse(json).unwrap();
        peer.inbound.send(TransportEvent::Message(message)).unwrap();
        self.step().await;
    }

    pub fn task_status(&self, id: &str) -> TaskStatus {
        self.tasks.read().unwrap().get(id).unwrap().status
    }
}
