//! Streaming speech recognition client for the Volcengine binary websocket
//! protocol.
//!
//! A [client::ConnectionManager] performs the handshake, streams audio chunks
//! as sequenced frames and delivers partial and final transcripts to async
//! callbacks. Finished sessions are recorded in per-day usage statistics.

pub mod client;
pub mod config;
pub mod errors;
pub mod protocol;
pub mod session;
pub mod transport;

use errors::Error;

pub use self::{
	client::{ClientBuilder, ConnectionManager, ReconnectPolicy},
	config::{AsrConfig, Credentials},
	session::{SessionState, UsageStats, UsageTracker},
};

pub type AsrResult<T> = std::result::Result<T, Error>;
