mod events;
mod payload;

use tracing::{debug, warn};

pub use self::events::*;
use self::payload::{ErrorBody, ResponseBody, ResultField};
use super::{
	compression::decode_payload,
	constants::{ERROR_SUCCESS, LEGACY_SUCCESS},
	framing::{MessageType, Serialization},
	packet::Frame,
};
use crate::{
	errors::{Error, ProtocolError, ServerError},
	AsrResult,
};

/// Turns decoded frames from the service into [ServerEvent]s.
///
/// A body that cannot be decoded into one of the known shapes is reported as
/// [Error::MalformedPayload]; it is never defaulted into an empty transcript.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseParser;

impl ResponseParser {
	pub fn parse(frame: &Frame) -> AsrResult<ServerEvent> {
		match frame.message_type() {
			MessageType::ServerErrorResponse => Self::parse_error(frame),
			MessageType::ServerAck if frame.payload().is_empty() => Ok(ServerEvent::Ack {
				sequence: *frame.sequence(),
			}),
			MessageType::ServerAck | MessageType::FullServerResponse => Self::parse_response(frame),
			other => Err(ProtocolError::UnexpectedMessage(other.to_string()))?,
		}
	}

	fn parse_error(frame: &Frame) -> AsrResult<ServerEvent> {
		let code = frame.error_code().unwrap_or_default();
		let body = decode_payload(*frame.compression(), frame.payload())?;

		let message = match serde_json::from_slice::<ErrorBody>(&body) {
			Ok(ErrorBody { error: Some(error), .. }) => error,
			Ok(ErrorBody { message: Some(message), .. }) => message,
			_ => String::from_utf8_lossy(&body).trim().to_string(),
		};

		warn!("service reported error {}: {}", code, message);
		Ok(ServerEvent::Error(ServerError::new(code, message)))
	}

	fn parse_response(frame: &Frame) -> AsrResult<ServerEvent> {
		let body = decode_payload(*frame.compression(), frame.payload())?;
		if body.is_empty() {
			return Ok(ServerEvent::Ack {
				sequence: *frame.sequence(),
			});
		}
		if *frame.serialization() != Serialization::Json {
			return Err(Error::MalformedPayload("response body is not json".into()));
		}

		let body: ResponseBody =
			serde_json::from_slice(&body).map_err(|e| Error::MalformedPayload(e.to_string()))?;

		if let Some(error) = body.error {
			let error = match body.code {
				Some(code) => ServerError::new(code, error),
				None => ServerError::from_message(error),
			};
			return Ok(ServerEvent::Error(error));
		}

		if let Some(code) = body.code.filter(|code| *code != ERROR_SUCCESS && *code != LEGACY_SUCCESS) {
			let message = body.message.unwrap_or_default();
			return Ok(ServerEvent::Error(ServerError::new(code, message)));
		}

		let sequence = frame.sequence().or(body.sequence);
		let mut is_final = frame.is_last() || body.is_final.unwrap_or(false) || body.sequence.is_some_and(|s| s < 0);

		let transcript = match body.result {
			None => return Ok(ServerEvent::Ack { sequence }),
			Some(ResultField::Object(result)) => {
				is_final |= result.is_final.unwrap_or(false);
				Transcript {
					text: result.text,
					is_final,
					confidence: None,
					utterances: result.utterances,
					log_id: result.additions.and_then(|additions| additions.log_id),
				}
			},
			Some(ResultField::List(results)) => {
				let first = results
					.into_iter()
					.next()
					.ok_or_else(|| Error::MalformedPayload("empty result list".into()))?;
				Transcript {
					text: first.text,
					is_final,
					confidence: first.confidence,
					utterances: first.utterances,
					log_id: None,
				}
			},
		};

		debug!("transcript (final: {}): {}", transcript.is_final, transcript.text);
		match transcript.is_final {
			true => Ok(ServerEvent::Final(transcript)),
			false => Ok(ServerEvent::Partial(transcript)),
		}
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;
	use crate::protocol::{
		compression::compress,
		framing::{Compression, SequenceFlag},
		packet::FrameCodec,
	};

	fn response(flags: SequenceFlag, sequence: Option<i32>, json: &str) -> Frame {
		Frame::new(
			MessageType::FullServerResponse,
			flags,
			Serialization::Json,
			Compression::Gzip,
			sequence,
			compress(json.as_bytes()).unwrap(),
		)
	}

	#[test]
	fn server_error_frame_from_the_wire() {
		let body = compress(br#"{"error":"invalid request params"}"#).unwrap();
		let mut bytes = vec![0x11, 0xF0, 0x11, 0x00];
		bytes.extend_from_slice(&45000001u32.to_be_bytes());
		bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
		bytes.extend_from_slice(&body);

		let frame = FrameCodec::decode_frame(&bytes).unwrap();
		assert_eq!(
			ResponseParser::parse(&frame).unwrap(),
			ServerEvent::Error(ServerError::new(45000001, "invalid request params"))
		);
	}

	#[test]
	fn plain_text_error_body() {
		let frame = Frame::server_error(55000031, Compression::None, b"server busy\n".to_vec());
		assert_eq!(
			ResponseParser::parse(&frame).unwrap(),
			ServerEvent::Error(ServerError::new(55000031, "server busy"))
		);
	}

	#[test]
	fn partial_then_final_results() {
		let partial = response(
			SequenceFlag::PosSequence,
			Some(2),
			r#"{"result":{"text":"hello","utterances":[{"text":"hello","definite":false,"start_time":0,"end_time":480}],"additions":{"log_id":"abc"}}}"#,
		);
		let event = ResponseParser::parse(&partial).unwrap();
		let transcript = event.transcript().unwrap();
		assert!(!event.is_final());
		assert_eq!(transcript.text, "hello");
		assert_eq!(transcript.log_id.as_deref(), Some("abc"));
		assert_eq!(transcript.utterances[0].end_time, 480);

		let last = response(SequenceFlag::NegWithSequence, Some(-3), r#"{"result":{"text":"hello world"}}"#);
		let event = ResponseParser::parse(&last).unwrap();
		assert!(event.is_final());
		assert_eq!(event.transcript().unwrap().text, "hello world");

		let flagged = response(SequenceFlag::NoSequence, None, r#"{"result":{"text":"done"},"is_final":true}"#);
		assert!(ResponseParser::parse(&flagged).unwrap().is_final());
	}

	#[test]
	fn legacy_result_carries_confidence() {
		let frame = response(
			SequenceFlag::NoSequence,
			None,
			r#"{"code":1000,"message":"Success","sequence":-2,"result":[{"text":"你好","confidence":0.92}]}"#,
		);

		match ResponseParser::parse(&frame).unwrap() {
			ServerEvent::Final(transcript) => {
				assert_eq!(transcript.text, "你好");
				assert_eq!(transcript.confidence, Some(0.92));
			},
			other => panic!("expected a final result, got {}", other),
		}
	}

	#[test]
	fn non_success_code_is_a_server_error() {
		let frame = response(SequenceFlag::NoSequence, None, r#"{"code":45000002,"message":"empty audio"}"#);
		assert_eq!(
			ResponseParser::parse(&frame).unwrap(),
			ServerEvent::Error(ServerError::new(45000002, "empty audio"))
		);
	}

	#[test]
	fn missing_result_is_an_ack() {
		let frame = response(SequenceFlag::PosSequence, Some(1), r#"{"code":20000000}"#);
		assert_eq!(ResponseParser::parse(&frame).unwrap(), ServerEvent::Ack { sequence: Some(1) });

		let bare = Frame::new(
			MessageType::ServerAck,
			SequenceFlag::PosSequence,
			Serialization::None,
			Compression::None,
			Some(4),
			Vec::new(),
		);
		assert_eq!(ResponseParser::parse(&bare).unwrap(), ServerEvent::Ack { sequence: Some(4) });
	}

	#[test]
	fn malformed_bodies_are_reported() {
		let garbage = response(SequenceFlag::NoSequence, None, "{not json");
		assert!(matches!(ResponseParser::parse(&garbage), Err(Error::MalformedPayload(_))));

		let no_text = response(SequenceFlag::NoSequence, None, r#"{"result":{"utterances":[]}}"#);
		assert!(matches!(ResponseParser::parse(&no_text), Err(Error::MalformedPayload(_))));
	}

	#[test]
	fn corrupt_gzip_is_a_compression_error() {
		let frame = Frame::new(
			MessageType::FullServerResponse,
			SequenceFlag::NoSequence,
			Serialization::Json,
			Compression::Gzip,
			None,
			b"definitely not gzip".to_vec(),
		);
		assert!(matches!(ResponseParser::parse(&frame), Err(Error::Compression(_))));
	}

	#[test]
	fn client_frames_are_unexpected() {
		let frame = Frame::audio_only_request(2, false, Compression::None, vec![0u8; 2]);
		assert!(matches!(
			ResponseParser::parse(&frame),
			Err(Error::Protocol(ProtocolError::UnexpectedMessage(_)))
		));
	}
}
