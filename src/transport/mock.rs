//! In-memory transport driving the connection manager in tests.

use std::sync::{
	atomic::{AtomicU32, Ordering},
	Arc, Mutex,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use super::{ConnectTarget, Transport, TransportConnection, TransportEvent};
use crate::{
	errors::ConnectionError,
	protocol::{
		compression::compress, Compression, Frame, FrameCodec, MessageType, SequenceFlag, Serialization,
	},
};

/// Computes the server's answers to one client frame.
pub(crate) type Responder = Arc<dyn Fn(&Frame) -> Vec<Bytes> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct MockTransport {
	state: Arc<MockState>,
}

struct MockState {
	responder: Responder,
	/// Client frames, one list per opened connection.
	sent: Mutex<Vec<Vec<Frame>>>,
	injectors: Mutex<Vec<UnboundedSender<TransportEvent>>>,
	fail_opens: AtomicU32,
	opens: AtomicU32,
	closes: AtomicU32,
}

impl MockTransport {
	pub fn new(responder: impl Fn(&Frame) -> Vec<Bytes> + Send + Sync + 'static) -> Self {
		Self {
			state: Arc::new(MockState {
				responder: Arc::new(responder),
				sent: Mutex::new(Vec::new()),
				injectors: Mutex::new(Vec::new()),
				fail_opens: AtomicU32::new(0),
				opens: AtomicU32::new(0),
				closes: AtomicU32::new(0),
			}),
		}
	}

	/// Acks the handshake and answers the last audio chunk with a final result.
	pub fn recognizing(text: &'static str) -> Self {
		Self::new(move |frame| match frame.message_type() {
			MessageType::FullClientRequest => vec![ack(1)],
			MessageType::AudioOnlyRequest if frame.is_last() => vec![final_result(text)],
			_ => Vec::new(),
		})
	}

	/// Never answers anything.
	pub fn silent() -> Self { Self::new(|_| Vec::new()) }

	/// Makes the next `count` calls to `open` fail.
	pub fn fail_next_opens(&self, count: u32) { self.state.fail_opens.store(count, Ordering::SeqCst); }

	/// Delivers `event` on the most recently opened connection.
	pub fn inject(&self, event: TransportEvent) {
		if let Some(injector) = self.state.injectors.lock().unwrap().last() {
			let _ = injector.send(event);
		}
	}

	pub fn sent(&self) -> Vec<Vec<Frame>> { self.state.sent.lock().unwrap().clone() }

	pub fn opens(&self) -> u32 { self.state.opens.load(Ordering::SeqCst) }

	pub fn closes(&self) -> u32 { self.state.closes.load(Ordering::SeqCst) }
}

#[async_trait]
impl Transport for MockTransport {
	async fn open(&self, _: &ConnectTarget) -> Result<Box<dyn TransportConnection>, ConnectionError> {
		self.state.opens.fetch_add(1, Ordering::SeqCst);

		let failing = self
			.state
			.fail_opens
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if failing {
			return Err(ConnectionError::Transport("connection refused".into()));
		}

		let (events, receiver) = unbounded_channel();
		let index = {
			let mut sent = self.state.sent.lock().unwrap();
			sent.push(Vec::new());
			sent.len() - 1
		};
		self.state.injectors.lock().unwrap().push(events.clone());

		Ok(Box::new(MockConnection {
			state: self.state.clone(),
			index,
			events,
			receiver,
		}))
	}
}

struct MockConnection {
	state: Arc<MockState>,
	index: usize,
	events: UnboundedSender<TransportEvent>,
	receiver: UnboundedReceiver<TransportEvent>,
}

#[async_trait]
impl TransportConnection for MockConnection {
	async fn send(&mut self, frame: Bytes) -> Result<(), ConnectionError> {
		let frame = FrameCodec::decode_frame(&frame).map_err(|e| ConnectionError::Transport(e.to_string()))?;
		for response in (self.state.responder)(&frame) {
			let _ = self.events.send(TransportEvent::Message(response));
		}
		self.state.sent.lock().unwrap()[self.index].push(frame);
		Ok(())
	}

	async fn next_event(&mut self) -> TransportEvent { self.receiver.recv().await.unwrap_or(TransportEvent::Closed) }

	async fn close(&mut self) -> Result<(), ConnectionError> {
		self.state.closes.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	fn log_id(&self) -> Option<&str> { Some("mock-log-id") }
}

/* Server Frames */
pub(crate) fn ack(sequence: i32) -> Bytes {
	let frame = Frame::new(
		MessageType::ServerAck,
		SequenceFlag::PosSequence,
		Serialization::None,
		Compression::None,
		Some(sequence),
		Vec::new(),
	);
	FrameCodec::encode_frame(&frame).unwrap()
}

pub(crate) fn response(flags: SequenceFlag, json: &str) -> Bytes {
	let sequence = flags.carries_sequence().then_some(1);
	let frame = Frame::new(
		MessageType::FullServerResponse,
		flags,
		Serialization::Json,
		Compression::Gzip,
		sequence,
		compress(json.as_bytes()).unwrap(),
	);
	FrameCodec::encode_frame(&frame).unwrap()
}

pub(crate) fn partial_result(text: &str) -> Bytes {
	response(SequenceFlag::NoSequence, &format!(r#"{{"result":{{"text":"{text}"}}}}"#))
}

pub(crate) fn final_result(text: &str) -> Bytes {
	response(SequenceFlag::NegWithSequence, &format!(r#"{{"result":{{"text":"{text}"}}}}"#))
}

pub(crate) fn server_error(code: u32, message: &str) -> Bytes {
	let body = compress(format!(r#"{{"error":"{message}"}}"#).as_bytes()).unwrap();
	FrameCodec::encode_frame(&Frame::server_error(code, Compression::Gzip, body)).unwrap()
}
