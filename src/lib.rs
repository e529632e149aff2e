//! DriveAssist - Real-time voice co-pilot for drivers
//!
//! This library provides the duplex audio session behind the co-pilot:
//! - PCM16 wire codec, microphone capture and gapless playback scheduling
//! - Live service session state machine and WebSocket transport
//! - Tool dispatch for phone handoff and task lookup
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  frames   ┌─────────────────────┐  JSON/WS  ┌──────────────┐
//! │  Microphone  ├──────────►│                     ├──────────►│              │
//! └──────────────┘           │       Session       │           │ Live service │
//! ┌──────────────┐  chunks   │  (state machine)    │◄──────────┤              │
//! │   Speaker    │◄──────────┤                     │           └──────────────┘
//! └──────────────┘           └──────────┬──────────┘
//!                                       │ tool calls
//!                            ┌──────────▼──────────┐
//!                            │ Tool dispatcher     │──► native dialer
//!                            │   + Task store      │
//!                            └─────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod session;
pub mod tasks;
pub mod tools;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{
    Connector, LiveConnector, Session, SessionCommand, SessionEvent, SessionSettings,
    SessionSnapshot, SessionStatus, StopReason, TranscriptMode,
};
pub use tasks::{SharedTaskStore, Task, TaskStatus, TaskStore};
pub use tools::{Dialer, SystemDialer, ToolDispatcher, ToolInvocation, ToolResult};
pub use voice::{CapturePipeline, MicrophoneSource, PlaybackScheduler, SpeakerSink};
