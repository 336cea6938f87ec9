use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::errors::ServerError;

/// A recognized segment of speech, as reported by the service.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct Utterance {
	pub text: String,
	/// Set once the service will no longer revise this segment.
	#[serde(default)]
	pub definite: bool,
	/// Offset from the start of the audio, in milliseconds.
	#[serde(default)]
	pub start_time: i64,
	#[serde(default)]
	pub end_time: i64,
}

/// Transcript carried by a partial or final result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Transcript {
	pub text: String,
	pub is_final: bool,
	/// Only reported by the legacy service generation.
	pub confidence: Option<f64>,
	pub utterances: Vec<Utterance>,
	pub log_id: Option<String>,
}

/// Everything the service can tell the client, after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
	/// Acknowledges a client frame without carrying a transcript.
	Ack { sequence: Option<i32> },
	Partial(Transcript),
	Final(Transcript),
	Error(ServerError),
}

impl ServerEvent {
	pub fn is_final(&self) -> bool { matches!(self, ServerEvent::Final(_)) }

	pub fn transcript(&self) -> Option<&Transcript> {
		match self {
			ServerEvent::Partial(transcript) | ServerEvent::Final(transcript) => Some(transcript),
			_ => None,
		}
	}
}

impl Display for ServerEvent {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ServerEvent::Ack { sequence } => write!(f, "Ack({:?})", sequence),
			ServerEvent::Partial(transcript) => write!(f, "Partial({})", transcript.text),
			ServerEvent::Final(transcript) => write!(f, "Final({})", transcript.text),
			ServerEvent::Error(error) => write!(f, "Error({})", error),
		}
	}
}
