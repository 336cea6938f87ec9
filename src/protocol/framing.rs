use std::fmt::Display;

use super::constants::{
	AUDIO_ONLY_REQUEST, FULL_CLIENT_REQUEST, FULL_SERVER_RESPONSE, GZIP_COMPRESSION, JSON_SERIALIZATION,
	NEG_SEQUENCE, NEG_WITH_SEQUENCE, NO_COMPRESSION, NO_SERIALIZATION, NO_SEQUENCE, POS_SEQUENCE, SERVER_ACK,
	SERVER_ERROR_RESPONSE,
};
use crate::errors::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
/// Message types are the high nibble of the second header byte and decide
/// which optional fields follow the fixed header.
///
/// Client frames are [MessageType::FullClientRequest] and
/// [MessageType::AudioOnlyRequest]; everything else is sent by the server.
pub enum MessageType {
	FullClientRequest = FULL_CLIENT_REQUEST,
	AudioOnlyRequest = AUDIO_ONLY_REQUEST,
	FullServerResponse = FULL_SERVER_RESPONSE,
	ServerAck = SERVER_ACK,
	ServerErrorResponse = SERVER_ERROR_RESPONSE,
}

impl MessageType {
	/// Indicates whether the message type is sent by the client.
	pub fn is_client_message(&self) -> bool {
		matches!(self, MessageType::FullClientRequest | MessageType::AudioOnlyRequest)
	}
}

impl TryFrom<u8> for MessageType {
	type Error = ProtocolError;

	fn try_from(nibble: u8) -> Result<Self, <MessageType as TryFrom<u8>>::Error> {
		match nibble {
			FULL_CLIENT_REQUEST => Ok(MessageType::FullClientRequest),
			AUDIO_ONLY_REQUEST => Ok(MessageType::AudioOnlyRequest),
			FULL_SERVER_RESPONSE => Ok(MessageType::FullServerResponse),
			SERVER_ACK => Ok(MessageType::ServerAck),
			SERVER_ERROR_RESPONSE => Ok(MessageType::ServerErrorResponse),
			_ => Err(ProtocolError::UnsupportedMessageType(nibble)),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
/// Sequence flags are the low nibble of the second header byte.
///
/// **NoSequence** = no sequence number follows the header.
///
/// **PosSequence** = a client assigned, positive sequence number follows.
///
/// **NegSequence** = the frame is the last one of the stream.
///
/// **NegWithSequence** = the frame is the last one of the stream and carries
/// a negated sequence number.
pub enum SequenceFlag {
	NoSequence = NO_SEQUENCE,
	PosSequence = POS_SEQUENCE,
	NegSequence = NEG_SEQUENCE,
	NegWithSequence = NEG_WITH_SEQUENCE,
}

impl SequenceFlag {
	/// Whether a 4-byte sequence field follows the header.
	pub fn carries_sequence(&self) -> bool { !matches!(self, SequenceFlag::NoSequence) }

	/// Whether the flag marks the final frame of a stream.
	pub fn is_last(&self) -> bool { matches!(self, SequenceFlag::NegSequence | SequenceFlag::NegWithSequence) }
}

impl TryFrom<u8> for SequenceFlag {
	type Error = ProtocolError;

	fn try_from(nibble: u8) -> Result<Self, <SequenceFlag as TryFrom<u8>>::Error> {
		match nibble {
			NO_SEQUENCE => Ok(SequenceFlag::NoSequence),
			POS_SEQUENCE => Ok(SequenceFlag::PosSequence),
			NEG_SEQUENCE => Ok(SequenceFlag::NegSequence),
			NEG_WITH_SEQUENCE => Ok(SequenceFlag::NegWithSequence),
			_ => Err(ProtocolError::InvalidFlags(nibble)),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Serialization {
	None = NO_SERIALIZATION,
	Json = JSON_SERIALIZATION,
}

impl TryFrom<u8> for Serialization {
	type Error = ProtocolError;

	fn try_from(nibble: u8) -> Result<Self, <Serialization as TryFrom<u8>>::Error> {
		match nibble {
			NO_SERIALIZATION => Ok(Serialization::None),
			JSON_SERIALIZATION => Ok(Serialization::Json),
			_ => Err(ProtocolError::InvalidSerialization(nibble)),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Compression {
	None = NO_COMPRESSION,
	Gzip = GZIP_COMPRESSION,
}

impl TryFrom<u8> for Compression {
	type Error = ProtocolError;

	fn try_from(nibble: u8) -> Result<Self, <Compression as TryFrom<u8>>::Error> {
		match nibble {
			NO_COMPRESSION => Ok(Compression::None),
			GZIP_COMPRESSION => Ok(Compression::Gzip),
			_ => Err(ProtocolError::InvalidCompression(nibble)),
		}
	}
}

/// Packs two nibbles into one header byte.
pub(crate) fn pack_nibbles(high: u8, low: u8) -> u8 { (high & 0x0F) << 4 | (low & 0x0F) }

/// Splits a header byte into its high and low nibbles.
pub(crate) fn split_nibbles(byte: u8) -> (u8, u8) { (byte >> 4, byte & 0x0F) }

/* Display Implementations */
impl Display for MessageType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			MessageType::FullClientRequest => "FULL_CLIENT_REQUEST",
			MessageType::AudioOnlyRequest => "AUDIO_ONLY_REQUEST",
			MessageType::FullServerResponse => "FULL_SERVER_RESPONSE",
			MessageType::ServerAck => "SERVER_ACK",
			MessageType::ServerErrorResponse => "SERVER_ERROR_RESPONSE",
		};
		write!(f, "{}", name)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn nibbles_round_trip() {
		let byte = pack_nibbles(FULL_SERVER_RESPONSE, NEG_WITH_SEQUENCE);
		assert_eq!(byte, 0x93);
		assert_eq!(split_nibbles(byte), (FULL_SERVER_RESPONSE, NEG_WITH_SEQUENCE));
	}

	#[test]
	fn rejects_unknown_nibbles() {
		assert_eq!(MessageType::try_from(0b0100), Err(ProtocolError::UnsupportedMessageType(0b0100)));
		assert_eq!(SequenceFlag::try_from(0b0100), Err(ProtocolError::InvalidFlags(0b0100)));
		assert_eq!(Serialization::try_from(0b0010), Err(ProtocolError::InvalidSerialization(0b0010)));
		assert_eq!(Compression::try_from(0b0010), Err(ProtocolError::InvalidCompression(0b0010)));
	}

	#[test]
	fn sequence_flag_semantics() {
		assert!(!SequenceFlag::NoSequence.carries_sequence());
		assert!(SequenceFlag::PosSequence.carries_sequence());
		assert!(SequenceFlag::NegWithSequence.is_last());
		assert!(!SequenceFlag::PosSequence.is_last());
		assert!(MessageType::AudioOnlyRequest.is_client_message());
		assert!(!MessageType::ServerAck.is_client_message());
	}
}
