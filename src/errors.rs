use std::{fmt::Display, time::Duration};

use thiserror::Error;

use crate::{
	protocol::constants::{
		ERROR_CLIENT_RANGE, ERROR_EMPTY_AUDIO, ERROR_FORBIDDEN, ERROR_INVALID_AUDIO_FORMAT, ERROR_INVALID_PARAMS,
		ERROR_NOT_FOUND, ERROR_PACKET_TIMEOUT, ERROR_QUOTA_EXCEEDED, ERROR_RATE_LIMITED, ERROR_SERVER_BUSY,
		ERROR_SERVER_INTERNAL, ERROR_SERVER_RANGE, ERROR_SERVICE_UNAVAILABLE, ERROR_SUCCESS, ERROR_TIMEOUT,
		ERROR_UNAUTHORIZED, ERROR_UNKNOWN,
	},
	protocol::MessageType,
	session::SessionState,
};

/// Error type for the asrstream library.
#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	Config(#[from] ConfigError),
	#[error(transparent)]
	Connection(#[from] ConnectionError),
	#[error(transparent)]
	Protocol(#[from] ProtocolError),
	#[error(transparent)]
	Compression(#[from] CompressionError),
	#[error(transparent)]
	Server(#[from] ServerError),
	#[error("client is not streaming (current state: {0})")]
	NotConnected(SessionState),
	#[error("malformed payload: {0}")]
	MalformedPayload(String),
	#[error("the last audio chunk was already sent for this session")]
	StreamFinished,
	#[error(transparent)]
	InvalidTransition(#[from] TransitionError),
	#[error(transparent)]
	Stats(#[from] StatsError),
}

/// Coarse classification handed to the `on_error` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	Config,
	Connection,
	Protocol,
	Compression,
	Server,
	NotConnected,
	MalformedPayload,
	Stats,
}

impl Error {
	pub fn kind(&self) -> ErrorKind {
		match self {
			Error::Config(_) => ErrorKind::Config,
			Error::Connection(_) => ErrorKind::Connection,
			Error::Protocol(_) | Error::InvalidTransition(_) => ErrorKind::Protocol,
			Error::Compression(_) => ErrorKind::Compression,
			Error::Server(_) => ErrorKind::Server,
			Error::NotConnected(_) | Error::StreamFinished => ErrorKind::NotConnected,
			Error::MalformedPayload(_) => ErrorKind::MalformedPayload,
			Error::Stats(_) => ErrorKind::Stats,
		}
	}

	/// Whether the error ends the current session.
	///
	/// Malformed payloads and per-frame compression failures are reported but
	/// the stream keeps going.
	pub fn is_fatal(&self) -> bool {
		!matches!(
			self,
			Error::MalformedPayload(_) | Error::Compression(_) | Error::NotConnected(_) | Error::StreamFinished
		)
	}
}

impl Display for ErrorKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			ErrorKind::Config => "config",
			ErrorKind::Connection => "connection",
			ErrorKind::Protocol => "protocol",
			ErrorKind::Compression => "compression",
			ErrorKind::Server => "server",
			ErrorKind::NotConnected => "not_connected",
			ErrorKind::MalformedPayload => "malformed_payload",
			ErrorKind::Stats => "stats",
		};
		write!(f, "{}", name)
	}
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("missing credential: {0}")]
	MissingCredential(&'static str),
	#[error("invalid endpoint url: {0}")]
	InvalidUrl(#[from] url::ParseError),
	#[error("unsupported url scheme `{0}`, expected ws or wss")]
	UnsupportedScheme(String),
	#[error("invalid audio format: {0}")]
	InvalidAudioFormat(String),
	#[error("failed to load configuration: {0}")]
	Load(#[from] config::ConfigError),
}

#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error("a connection attempt is already in progress (state: {0})")]
	AlreadyInProgress(SessionState),
	#[error("transport error: {0}")]
	Transport(String),
	#[error("invalid request header `{0}`")]
	InvalidHeader(String),
	#[error("handshake not completed within {0:?}")]
	HandshakeTimeout(Duration),
	#[error("transport closed before the handshake completed")]
	ClosedDuringHandshake,
	#[error("connection lost after {attempts} reconnect attempts")]
	ConnectionLost { attempts: u32 },
	#[error("the i/o task is no longer running")]
	IoTaskStopped,
}

impl ConnectionError {
	/// Whether another connection attempt may succeed where this one failed.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			ConnectionError::Transport(_) | ConnectionError::HandshakeTimeout(_) | ConnectionError::ClosedDuringHandshake
		)
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
	#[error("frame truncated: needed {needed} bytes, {available} available")]
	Truncated { needed: usize, available: usize },
	#[error("unsupported protocol version: {0}")]
	UnsupportedVersion(u8),
	#[error("invalid header size: {0} words")]
	InvalidHeaderSize(u8),
	#[error("unsupported message type: {0:#06b}")]
	UnsupportedMessageType(u8),
	#[error("invalid message flags: {0:#06b}")]
	InvalidFlags(u8),
	#[error("invalid serialization method: {0:#06b}")]
	InvalidSerialization(u8),
	#[error("invalid compression type: {0:#06b}")]
	InvalidCompression(u8),
	#[error("payload length {0} exceeds the maximum frame size")]
	PayloadTooLarge(usize),
	#[error("{0} frame requires a sequence number")]
	MissingSequence(MessageType),
	#[error("{0} frame cannot carry a sequence number with its flags")]
	UnexpectedSequence(MessageType),
	#[error("error response frame requires an error code")]
	MissingErrorCode,
	#[error("{0} frame cannot carry an error code")]
	UnexpectedErrorCode(MessageType),
	#[error("{0} trailing bytes after the declared payload")]
	TrailingBytes(usize),
	#[error("unexpected message from server: {0}")]
	UnexpectedMessage(String),
	#[error("error reading from the underlying stream: {0}")]
	Stream(String),
}

impl From<std::io::Error> for ProtocolError {
	fn from(err: std::io::Error) -> Self { ProtocolError::Stream(err.to_string()) }
}

#[derive(Debug, Error)]
pub enum CompressionError {
	#[error("gzip compression failed: {0}")]
	Compress(#[source] std::io::Error),
	#[error("gzip decompression failed: {0}")]
	Decompress(#[source] std::io::Error),
}

/// An explicit error code and message reported by the recognition service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("server error {code}: {message}")]
pub struct ServerError {
	pub code: u32,
	pub message: String,
}

impl ServerError {
	pub fn new(code: u32, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
		}
	}

	/// Infers a code for error messages the service sent without one.
	pub fn from_message(message: impl Into<String>) -> Self {
		let message = message.into();
		let lowered = message.to_lowercase();
		let code = if lowered.contains("decode ws request failed") {
			ERROR_INVALID_PARAMS
		} else if lowered.contains("timeout") {
			ERROR_TIMEOUT
		} else if lowered.contains("unauthorized") {
			ERROR_UNAUTHORIZED
		} else {
			ERROR_UNKNOWN
		};

		Self { code, message }
	}

	pub fn is_success(&self) -> bool { self.code == ERROR_SUCCESS }

	pub fn is_client_error(&self) -> bool { ERROR_CLIENT_RANGE.contains(&self.code) }

	pub fn is_server_error(&self) -> bool { ERROR_SERVER_RANGE.contains(&self.code) }

	/// Human readable description of the error code.
	pub fn description(&self) -> &'static str {
		match self.code {
			ERROR_SUCCESS => "success",
			ERROR_INVALID_PARAMS => "invalid request parameters: missing or invalid field, or duplicate request",
			ERROR_EMPTY_AUDIO => "empty audio",
			ERROR_PACKET_TIMEOUT => "timed out waiting for the next audio packet",
			ERROR_INVALID_AUDIO_FORMAT => "invalid audio format",
			ERROR_UNAUTHORIZED => "unauthorized, authentication failed",
			ERROR_FORBIDDEN => "forbidden, insufficient permissions",
			ERROR_NOT_FOUND => "resource not found",
			ERROR_TIMEOUT => "request timed out",
			ERROR_UNKNOWN => "unknown error",
			ERROR_SERVER_BUSY => "server busy, the service is overloaded",
			ERROR_SERVER_INTERNAL => "internal service error",
			ERROR_SERVICE_UNAVAILABLE => "service unavailable",
			ERROR_QUOTA_EXCEEDED => "quota exceeded",
			ERROR_RATE_LIMITED => "rate limited",
			_ if self.is_client_error() => "client error",
			_ if self.is_server_error() => "internal service error",
			_ => "unknown error",
		}
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid session transition: cannot {action} while {from}")]
pub struct TransitionError {
	pub from: SessionState,
	pub action: &'static str,
}

#[derive(Debug, Error)]
pub enum StatsError {
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error("usage statistics are not valid json: {0}")]
	Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn server_error_ranges() {
		let client = ServerError::new(ERROR_INVALID_PARAMS, "bad");
		assert!(client.is_client_error());
		assert!(!client.is_server_error());
		assert_eq!(client.description(), "invalid request parameters: missing or invalid field, or duplicate request");

		let server = ServerError::new(55000099, "unavailable");
		assert!(server.is_server_error());
		assert_eq!(server.description(), "internal service error");
		assert_eq!(ServerError::new(55000002, "").description(), "service unavailable");

		assert!(ServerError::new(ERROR_SUCCESS, "ok").is_success());
		assert_eq!(ServerError::from_message("decode ws request failed: eof").code, ERROR_INVALID_PARAMS);
		assert_eq!(ServerError::from_message("Unauthorized").code, ERROR_UNAUTHORIZED);
		assert_eq!(ServerError::from_message("boom").code, ERROR_UNKNOWN);
		assert_eq!(ServerError::new(7, "?").description(), "unknown error");
	}

	#[test]
	fn fatality_follows_taxonomy() {
		assert!(!Error::MalformedPayload("x".into()).is_fatal());
		assert!(!Error::NotConnected(SessionState::Idle).is_fatal());
		assert!(Error::from(ProtocolError::TrailingBytes(2)).is_fatal());
		assert!(Error::from(ServerError::new(45000001, "bad")).is_fatal());
		assert_eq!(Error::StreamFinished.kind(), ErrorKind::NotConnected);
	}
}
