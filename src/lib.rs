#![deny(clippy::all)]

//! Resilient live-caption engine
//!
//! Turns a continuous speech-recognition stream into live captions that
//! survive network failures, service hiccups and audio device loss. One
//! producing context runs the session (audio capture, recognition,
//! reconnection); any number of overlay contexts mirror its caption and style
//! state over a broadcast channel.

pub mod audio;
pub mod broadcast;
pub mod demo;
pub mod phrases;
pub mod reconnect;
pub mod session;
pub mod settings;
pub mod speech;
pub mod storage;
pub mod store;
pub mod style;
pub mod transcript;
pub mod wakelock;

pub use broadcast::{BroadcastMessage, BroadcastProducer, BroadcastReceiver, InProcessBus, MessageBus};
pub use demo::DemoPlayback;
pub use reconnect::ReconnectController;
pub use session::SessionOrchestrator;
pub use settings::Settings;
pub use speech::{AzureSpeechProvider, RecognitionAdapter};
pub use store::{CaptionLine, CaptionState, CaptionStore, ConnectionStatus};
pub use style::{StyleStore, SubtitleStyle};
pub use transcript::TranscriptLog;
