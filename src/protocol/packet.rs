use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_getters::Getters;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use super::{
	constants::{DEFAULT_HEADER_SIZE_WORDS, FIELD_LENGTH, FIXED_HEADER_LENGTH, MAX_PAYLOAD_LENGTH, PROTOCOL_VERSION},
	framing::{pack_nibbles, split_nibbles, Compression, MessageType, SequenceFlag, Serialization},
};
use crate::errors::ProtocolError;

/// One protocol frame: the fixed header fields, the optional sequence or
/// error code, and the payload.
///
/// Header extensions are not kept; every encoded frame uses a one word header.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
pub struct Frame {
	message_type: MessageType,
	flags: SequenceFlag,
	serialization: Serialization,
	compression: Compression,
	/// Client sequence number, or the server's sequence for acks.
	sequence: Option<i32>,
	/// Only present on [MessageType::ServerErrorResponse] frames.
	error_code: Option<u32>,
	payload: Bytes,
}

impl Frame {
	pub fn new(
		message_type: MessageType,
		flags: SequenceFlag,
		serialization: Serialization,
		compression: Compression,
		sequence: Option<i32>,
		payload: impl Into<Bytes>,
	) -> Self {
		Self {
			message_type,
			flags,
			serialization,
			compression,
			sequence,
			error_code: None,
			payload: payload.into(),
		}
	}

	/// The handshake frame which opens every session generation.
	pub fn full_client_request(sequence: i32, compression: Compression, payload: impl Into<Bytes>) -> Self {
		Self::new(
			MessageType::FullClientRequest,
			SequenceFlag::PosSequence,
			Serialization::Json,
			compression,
			Some(sequence),
			payload,
		)
	}

	/// An audio frame. The last chunk of a stream carries the negated sequence
	/// number and [SequenceFlag::NegWithSequence].
	pub fn audio_only_request(sequence: i32, is_last: bool, compression: Compression, payload: impl Into<Bytes>) -> Self {
		let (flags, sequence) = match is_last {
			true => (SequenceFlag::NegWithSequence, -sequence),
			false => (SequenceFlag::PosSequence, sequence),
		};

		Self::new(
			MessageType::AudioOnlyRequest,
			flags,
			Serialization::None,
			compression,
			Some(sequence),
			payload,
		)
	}

	pub fn server_error(error_code: u32, compression: Compression, payload: impl Into<Bytes>) -> Self {
		Self {
			error_code: Some(error_code),
			..Self::new(
				MessageType::ServerErrorResponse,
				SequenceFlag::NoSequence,
				Serialization::Json,
				compression,
				None,
				payload,
			)
		}
	}

	/// Whether the sender flagged this frame as the last one of its stream.
	pub fn is_last(&self) -> bool { self.flags.is_last() }

	/// Consumes the frame, returning its payload.
	pub fn into_payload(self) -> Bytes { self.payload }

	/// Number of bytes the frame occupies on the wire.
	pub fn encoded_len(&self) -> usize {
		let mut length = FIXED_HEADER_LENGTH + FIELD_LENGTH + self.payload.len();
		if self.has_prefix_field() {
			length += FIELD_LENGTH;
		}
		length
	}

	/// Rejects frames whose optional fields disagree with the message type
	/// and flags, so nothing is zero-filled or dropped on the wire.
	fn check_fields(&self) -> Result<(), ProtocolError> {
		let (wants_sequence, wants_error_code) = match self.message_type {
			MessageType::ServerErrorResponse => (false, true),
			MessageType::ServerAck => (true, false),
			_ => (self.flags.carries_sequence(), false),
		};

		match (wants_sequence, self.sequence.is_some()) {
			(true, false) => return Err(ProtocolError::MissingSequence(self.message_type)),
			(false, true) => return Err(ProtocolError::UnexpectedSequence(self.message_type)),
			_ => {},
		}
		match (wants_error_code, self.error_code.is_some()) {
			(true, false) => Err(ProtocolError::MissingErrorCode),
			(false, true) => Err(ProtocolError::UnexpectedErrorCode(self.message_type)),
			_ => Ok(()),
		}
	}

	fn has_prefix_field(&self) -> bool {
		match self.message_type {
			MessageType::ServerAck | MessageType::ServerErrorResponse => true,
			_ => self.flags.carries_sequence(),
		}
	}
}

/// Encodes and decodes [Frame]s.
///
/// [FrameCodec::decode_frame] expects exactly one frame, which is how
/// WebSocket messages carry them. The [Decoder] implementation handles byte
/// streams with several frames back to back.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
	pub fn encode_frame(frame: &Frame) -> Result<Bytes, ProtocolError> {
		let mut dst = BytesMut::with_capacity(frame.encoded_len());
		Self::write_frame(frame, &mut dst)?;
		Ok(dst.freeze())
	}

	/// Decodes a buffer holding exactly one frame.
	pub fn decode_frame(src: &[u8]) -> Result<Frame, ProtocolError> {
		let (frame, consumed) = parse(src, true)?;
		if consumed != src.len() {
			return Err(ProtocolError::TrailingBytes(src.len() - consumed));
		}

		Ok(frame)
	}

	fn write_frame(frame: &Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
		let length = frame.payload.len();
		if length > MAX_PAYLOAD_LENGTH {
			return Err(ProtocolError::PayloadTooLarge(length));
		}

		frame.check_fields()?;

		dst.reserve(frame.encoded_len());
		dst.put_u8(pack_nibbles(PROTOCOL_VERSION, DEFAULT_HEADER_SIZE_WORDS));
		dst.put_u8(pack_nibbles(frame.message_type as u8, frame.flags as u8));
		dst.put_u8(pack_nibbles(frame.serialization as u8, frame.compression as u8));
		dst.put_u8(0x00);

		match (frame.error_code, frame.sequence) {
			(Some(code), _) => dst.put_u32(code),
			(None, Some(sequence)) => dst.put_i32(sequence),
			(None, None) => {},
		}

		dst.put_u32(length as u32);
		dst.extend_from_slice(&frame.payload);
		Ok(())
	}
}

/// Parses one frame from the front of `src`, returning it with the number of
/// bytes it occupied.
///
/// With `bare_ack` set, a [MessageType::ServerAck] followed by fewer than four
/// bytes is read as an ack without payload.
fn parse(src: &[u8], bare_ack: bool) -> Result<(Frame, usize), ProtocolError> {
	ensure(src, FIXED_HEADER_LENGTH)?;

	let (version, header_words) = split_nibbles(src[0]);
	if version != PROTOCOL_VERSION {
		return Err(ProtocolError::UnsupportedVersion(version));
	}
	if header_words == 0 {
		return Err(ProtocolError::InvalidHeaderSize(header_words));
	}

	let (message_type, flags) = split_nibbles(src[1]);
	let message_type = MessageType::try_from(message_type)?;
	let flags = SequenceFlag::try_from(flags)?;
	let (serialization, compression) = split_nibbles(src[2]);
	let serialization = Serialization::try_from(serialization)?;
	let compression = Compression::try_from(compression)?;

	let header_length = header_words as usize * 4;
	ensure(src, header_length)?;
	if header_length > FIXED_HEADER_LENGTH {
		debug!("skipping {} bytes of header extensions", header_length - FIXED_HEADER_LENGTH);
	}

	let mut cursor = &src[header_length..];
	let mut sequence = None;
	let mut error_code = None;

	match message_type {
		MessageType::ServerErrorResponse => {
			ensure_field(src, cursor)?;
			error_code = Some(cursor.get_u32());
		},
		MessageType::ServerAck => {
			ensure_field(src, cursor)?;
			sequence = Some(cursor.get_i32());
			if bare_ack && cursor.len() < FIELD_LENGTH {
				let consumed = src.len() - cursor.len();
				let frame = Frame {
					message_type,
					flags,
					serialization,
					compression,
					sequence,
					error_code,
					payload: Bytes::new(),
				};
				return Ok((frame, consumed));
			}
		},
		_ if flags.carries_sequence() => {
			ensure_field(src, cursor)?;
			sequence = Some(cursor.get_i32());
		},
		_ => {},
	}

	ensure_field(src, cursor)?;
	let length = cursor.get_u32() as usize;
	if length > MAX_PAYLOAD_LENGTH {
		return Err(ProtocolError::PayloadTooLarge(length));
	}

	let offset = src.len() - cursor.len();
	ensure(src, offset + length)?;

	let frame = Frame {
		message_type,
		flags,
		serialization,
		compression,
		sequence,
		error_code,
		payload: Bytes::copy_from_slice(&src[offset..offset + length]),
	};

	Ok((frame, offset + length))
}

fn ensure(src: &[u8], needed: usize) -> Result<(), ProtocolError> {
	match src.len() < needed {
		true => Err(ProtocolError::Truncated {
			needed,
			available: src.len(),
		}),
		false => Ok(()),
	}
}

fn ensure_field(src: &[u8], cursor: &[u8]) -> Result<(), ProtocolError> {
	ensure(src, src.len() - cursor.len() + FIELD_LENGTH)
}

impl Decoder for FrameCodec {
	type Error = ProtocolError;
	type Item = Frame;

	fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match parse(src, false) {
			Ok((frame, consumed)) => {
				src.advance(consumed);
				Ok(Some(frame))
			},
			Err(ProtocolError::Truncated { needed, available }) => {
				src.reserve(needed - available);
				Ok(None)
			},
			Err(e) => Err(e),
		}
	}
}

impl Encoder<Frame> for FrameCodec {
	type Error = ProtocolError;

	fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> { Self::write_frame(&item, dst) }
}
