use serde::Serialize;
use tracing::debug;

use super::{
	compression::encode_payload,
	framing::Compression,
	packet::Frame,
};
use crate::{
	config::{AsrConfig, HandshakeSchema},
	errors::Error,
	AsrResult,
};

/// Builds the client frames of a session: the handshake request and the audio
/// frames that follow it.
///
/// The builder holds no state of its own, identical configuration and
/// arguments always produce identical bytes.
#[derive(Debug, Clone, Copy)]
pub struct RequestBuilder<'a> {
	config: &'a AsrConfig,
}

impl<'a> RequestBuilder<'a> {
	pub fn new(config: &'a AsrConfig) -> Self { Self { config } }

	/// Serializes the handshake JSON for the configured schema.
	///
	/// `request_id` and `sequence` are only part of the legacy schema.
	pub fn handshake_json(&self, request_id: &str, sequence: i32) -> AsrResult<Vec<u8>> {
		let json = match self.config.endpoint.schema {
			HandshakeSchema::Simple => serde_json::to_vec(&self.simple()),
			HandshakeSchema::Legacy => serde_json::to_vec(&self.legacy(request_id, sequence)),
		};

		json.map_err(|e| Error::MalformedPayload(e.to_string()))
	}

	/// The gzip-compressed `FULL_CLIENT_REQUEST` opening a session.
	pub fn handshake_frame(&self, request_id: &str, sequence: i32) -> AsrResult<Frame> {
		let json = self.handshake_json(request_id, sequence)?;
		debug!("handshake request ({:?} schema, {} bytes)", self.config.endpoint.schema, json.len());

		let payload = encode_payload(Compression::Gzip, &json)?;
		Ok(Frame::full_client_request(sequence, Compression::Gzip, payload))
	}

	/// An `AUDIO_ONLY_REQUEST` carrying one chunk of audio.
	pub fn audio_frame(&self, sequence: i32, chunk: &[u8], is_last: bool) -> AsrResult<Frame> {
		let compression = match self.config.connection.compress_audio {
			true => Compression::Gzip,
			false => Compression::None,
		};

		let payload = encode_payload(compression, chunk)?;
		Ok(Frame::audio_only_request(sequence, is_last, compression, payload))
	}

	fn simple(&self) -> SimpleRequest<'a> {
		let config = self.config;
		let (audio, request) = (&config.audio, &config.request);

		SimpleRequest {
			user: User { uid: &request.uid },
			audio: SimpleAudio {
				format: &audio.format,
				sample_rate: audio.sample_rate,
				bits: audio.bits,
				channel: audio.channels,
				codec: &audio.codec,
			},
			request: SimpleOptions {
				model_name: &request.model_name,
				enable_punc: request.enable_punc,
			},
		}
	}

	fn legacy<'r>(&self, request_id: &'r str, sequence: i32) -> LegacyRequest<'r>
	where
		'a: 'r,
	{
		let config = self.config;
		let (audio, request, credentials) = (&config.audio, &config.request, &config.credentials);

		LegacyRequest {
			app: App {
				appid: &credentials.app_id,
				cluster: &request.cluster,
				token: &credentials.access_token,
			},
			user: User { uid: &request.uid },
			request: LegacyOptions {
				reqid: request_id,
				nbest: request.nbest,
				workflow: &request.workflow,
				show_language: request.show_language,
				show_utterances: request.show_utterances,
				result_type: &request.result_type,
				sequence,
			},
			audio: LegacyAudio {
				format: &audio.format,
				rate: audio.sample_rate,
				language: &request.language,
				bits: audio.bits,
				channel: audio.channels,
				codec: &audio.codec,
			},
		}
	}
}

/* Simple Schema */
#[derive(Serialize)]
struct SimpleRequest<'a> {
	user: User<'a>,
	audio: SimpleAudio<'a>,
	request: SimpleOptions<'a>,
}

#[derive(Serialize)]
struct User<'a> {
	uid: &'a str,
}

#[derive(Serialize)]
struct SimpleAudio<'a> {
	format: &'a str,
	sample_rate: u32,
	bits: u16,
	channel: u16,
	codec: &'a str,
}

#[derive(Serialize)]
struct SimpleOptions<'a> {
	model_name: &'a str,
	enable_punc: bool,
}

/* Legacy Schema */
#[derive(Serialize)]
struct LegacyRequest<'a> {
	app: App<'a>,
	user: User<'a>,
	request: LegacyOptions<'a>,
	audio: LegacyAudio<'a>,
}

#[derive(Serialize)]
struct App<'a> {
	appid: &'a str,
	cluster: &'a str,
	token: &'a str,
}

#[derive(Serialize)]
struct LegacyOptions<'a> {
	reqid: &'a str,
	nbest: u32,
	workflow: &'a str,
	show_language: bool,
	show_utterances: bool,
	result_type: &'a str,
	sequence: i32,
}

#[derive(Serialize)]
struct LegacyAudio<'a> {
	format: &'a str,
	rate: u32,
	language: &'a str,
	bits: u16,
	channel: u16,
	codec: &'a str,
}

#[cfg(test)]
mod tests {
	use std::{
		io,
		sync::{Arc, Mutex},
	};

	use pretty_assertions::assert_eq;
	use tracing::Level;

	use super::*;
	use crate::{
		config::Credentials,
		protocol::{
			compression::decompress,
			framing::{MessageType, SequenceFlag, Serialization},
			packet::FrameCodec,
		},
	};

	const SIMPLE_JSON: &str = r#"{"user":{"uid":"test"},"audio":{"format":"wav","sample_rate":16000,"bits":16,"channel":1,"codec":"raw"},"request":{"model_name":"bigmodel","enable_punc":true}}"#;

	#[test]
	fn simple_schema_is_byte_exact() {
		let config = AsrConfig::default();
		let json = RequestBuilder::new(&config).handshake_json("ignored", 1).unwrap();
		assert_eq!(String::from_utf8(json).unwrap(), SIMPLE_JSON);
	}

	#[test]
	fn legacy_schema_carries_app_and_request_fields() {
		let mut config = AsrConfig::default();
		config.endpoint.schema = HandshakeSchema::Legacy;
		config.credentials = Credentials::new("app-1", "token-1", "");

		let json = RequestBuilder::new(&config).handshake_json("req-1", 1).unwrap();
		let value: serde_json::Value = serde_json::from_slice(&json).unwrap();

		assert_eq!(value["app"]["appid"], "app-1");
		assert_eq!(value["app"]["token"], "token-1");
		assert_eq!(value["request"]["reqid"], "req-1");
		assert_eq!(value["request"]["sequence"], 1);
		assert_eq!(value["request"]["result_type"], "full");
		assert_eq!(value["audio"]["rate"], 16000);
		assert_eq!(value["audio"]["language"], "zh-CN");
		assert!(json.starts_with(br#"{"app":{"#));
	}

	#[derive(Clone, Default)]
	struct Captured(Arc<Mutex<Vec<u8>>>);

	impl io::Write for Captured {
		fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
			self.0.lock().unwrap().extend_from_slice(buf);
			Ok(buf.len())
		}

		fn flush(&mut self) -> io::Result<()> { Ok(()) }
	}

	#[test]
	fn handshake_logging_leaves_out_the_token() {
		let mut config = AsrConfig::default();
		config.endpoint.schema = HandshakeSchema::Legacy;
		config.credentials = Credentials::new("app-1", "secret-token-value", "");

		let captured = Captured::default();
		let writer = captured.clone();
		let subscriber = tracing_subscriber::fmt()
			.with_writer(move || writer.clone())
			.with_ansi(false)
			.with_max_level(Level::DEBUG)
			.finish();

		tracing::subscriber::with_default(subscriber, || {
			RequestBuilder::new(&config).handshake_frame("req-1", 1).unwrap();
		});

		let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
		assert!(output.contains("handshake request (Legacy schema"));
		assert!(!output.contains("secret-token-value"));
		assert!(!output.contains("app-1"));
	}

	#[test]
	fn output_is_deterministic() {
		let config = AsrConfig::default();
		let builder = RequestBuilder::new(&config);
		assert_eq!(
			builder.handshake_frame("id", 1).unwrap(),
			builder.handshake_frame("id", 1).unwrap()
		);
	}

	#[test]
	fn handshake_frame_decodes_to_the_same_json() {
		let config = AsrConfig::default();
		let frame = RequestBuilder::new(&config).handshake_frame("id", 1).unwrap();
		let bytes = FrameCodec::encode_frame(&frame).unwrap();

		assert_eq!(&bytes[..4], &[0x11, 0x11, 0x11, 0x00]);

		let decoded = FrameCodec::decode_frame(&bytes).unwrap();
		assert_eq!(decoded.message_type(), &MessageType::FullClientRequest);
		assert_eq!(decoded.flags(), &SequenceFlag::PosSequence);
		assert_eq!(decoded.serialization(), &Serialization::Json);
		assert_eq!(decoded.sequence(), &Some(1));

		let json = decompress(decoded.payload()).unwrap();
		assert_eq!(String::from_utf8(json).unwrap(), SIMPLE_JSON);
	}

	#[test]
	fn audio_frames_follow_the_compression_toggle() {
		let mut config = AsrConfig::default();
		let frame = RequestBuilder::new(&config).audio_frame(2, &[1, 2, 3], false).unwrap();
		assert_eq!(frame.compression(), &Compression::Gzip);
		assert_eq!(decompress(frame.payload()).unwrap(), vec![1, 2, 3]);

		config.connection.compress_audio = false;
		let frame = RequestBuilder::new(&config).audio_frame(3, &[1, 2, 3], true).unwrap();
		assert_eq!(frame.compression(), &Compression::None);
		assert_eq!(frame.sequence(), &Some(-3));
		assert_eq!(frame.payload().as_ref(), &[1, 2, 3]);
	}
}
