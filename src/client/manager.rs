use std::{
	path::Path,
	sync::{Arc, Mutex, MutexGuard, RwLock},
};

use bytes::Bytes;
use tokio::{
	sync::{mpsc, oneshot, Mutex as AsyncMutex},
	task::JoinHandle,
	time::{sleep, timeout},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{ClientBuilder, EventHandler, ReconnectPolicy};
use crate::{
	config::AsrConfig,
	errors::{ConnectionError, Error, StatsError},
	protocol::{FrameCodec, RequestBuilder, ResponseParser, ServerEvent, Transcript},
	session::{DailyUsage, Session, SessionState, SessionStateMachine, UsageStats, UsageTracker},
	transport::{ConnectTarget, Transport, TransportConnection, TransportEvent},
	AsrResult,
};

/// Owns the connection to the recognition service and the session running
/// over it.
///
/// All methods take `&self`; clones share the same connection. Frames are
/// written by a single i/o task which drains the queue filled by
/// [ConnectionManager::send_audio], so wire order always equals call order.
#[derive(Clone)]
pub struct ConnectionManager {
	shared: Arc<Shared>,
	io: Arc<AsyncMutex<Option<IoHandle>>>,
}

struct Shared {
	/// Replaced by [ConnectionManager::connect_with]; readers take snapshots.
	config: RwLock<Arc<AsrConfig>>,
	policy: ReconnectPolicy,
	transport: Arc<dyn Transport>,
	handlers: EventHandler,
	machine: Mutex<SessionStateMachine>,
	usage: UsageTracker,
	log_id: Mutex<Option<String>>,
}

struct IoHandle {
	outbound: mpsc::Sender<Outbound>,
	shutdown: Option<oneshot::Sender<()>>,
	task: JoinHandle<()>,
	last_chunk_queued: bool,
}

struct Outbound {
	chunk: Bytes,
	is_last: bool,
}

/// A transport on which the handshake succeeded.
struct Established {
	connection: Box<dyn TransportConnection>,
	/// A transcript which arrived as the handshake answer.
	first_event: Option<ServerEvent>,
}

enum Step {
	Continue,
	Stop,
	/// The transport failed, with the reason.
	Lost(String),
}

enum WriteError {
	/// The frame could not be built; the transport is unaffected.
	Frame(Error),
	Transport(String),
}

impl ConnectionManager {
	pub(crate) fn new(
		config: AsrConfig,
		policy: ReconnectPolicy,
		transport: Arc<dyn Transport>,
		handlers: EventHandler,
		usage: UsageTracker,
	) -> Self {
		Self {
			shared: Arc::new(Shared {
				config: RwLock::new(Arc::new(config)),
				policy,
				transport,
				handlers,
				machine: Mutex::new(SessionStateMachine::new()),
				usage,
				log_id: Mutex::new(None),
			}),
			io: Arc::new(AsyncMutex::new(None)),
		}
	}

	pub fn builder(config: AsrConfig) -> ClientBuilder { ClientBuilder::new(config) }

	/// Opens the transport and performs the handshake.
	///
	/// Returns once the session is streaming, or with the error that ended the
	/// attempt. Configuration errors are reported before anything is opened. A
	/// second call while an attempt is running is rejected; a call while
	/// already streaming does nothing.
	pub async fn connect(&self) -> AsrResult<()> { self.start(None).await }

	/// Replaces the configuration, then connects like
	/// [ConnectionManager::connect].
	///
	/// Only allowed while no transport is open. The new configuration applies
	/// to the endpoint, credentials, handshake and audio frames of this and
	/// later sessions; the reconnect policy chosen on the builder is kept. An
	/// invalid configuration is rejected and the current one stays in place.
	pub async fn connect_with(&self, config: AsrConfig) -> AsrResult<()> { self.start(Some(config)).await }

	async fn start(&self, replacement: Option<AsrConfig>) -> AsrResult<()> {
		match &replacement {
			Some(config) => config.validate()?,
			None => self.shared.config().validate()?,
		}

		let session_id = {
			let mut machine = self.shared.machine();
			match (machine.state(), replacement) {
				(SessionState::Streaming, None) => {
					debug!("already streaming, ignoring connect");
					return Ok(());
				},
				(state, Some(_)) if state.is_active() => {
					return Err(ConnectionError::AlreadyInProgress(state).into());
				},
				(state @ (SessionState::Connecting | SessionState::Handshaking | SessionState::Closing), None) => {
					return Err(ConnectionError::AlreadyInProgress(state).into());
				},
				(_, replacement) => {
					let session_id = machine.begin_connect()?;
					if let Some(config) = replacement {
						self.shared.set_config(config);
					}
					session_id
				},
			}
		};

		let tries = 1 + self.shared.policy.attempts();
		let established = match self.shared.establish_with_retry(tries, false).await {
			Ok(established) => established,
			Err((error, attempts)) => {
				error!("session {} could not connect after {} attempt(s): {}", session_id, attempts, error);
				self.shared.fail_session(&error).await;
				return Err(error);
			},
		};

		let mut io = self.io.lock().await;
		let accepted = self.shared.machine().handshake_accepted();
		accepted?;
		info!("session {} is streaming", session_id);

		let (outbound, receiver) = mpsc::channel(self.shared.config().connection.queue_depth.max(1));
		let (shutdown, shutdown_receiver) = oneshot::channel();
		let task = IoTask {
			shared: self.shared.clone(),
			connection: established.connection,
			outbound: receiver,
			shutdown: shutdown_receiver,
			pending: None,
			last_written: false,
		};
		let task = tokio::spawn(task.run(established.first_event));

		let previous = io.replace(IoHandle {
			outbound,
			shutdown: Some(shutdown),
			task,
			last_chunk_queued: false,
		});
		drop(io);

		if let Some(previous) = previous {
			let _ = previous.task.await;
		}
		Ok(())
	}

	/// Queues one chunk of audio. `is_last` marks the end of the stream, after
	/// which the service sends the final result.
	///
	/// Fails with [Error::NotConnected] unless the session is streaming; a
	/// rejected chunk never reaches the transport.
	pub async fn send_audio(&self, chunk: impl Into<Bytes>, is_last: bool) -> AsrResult<()> {
		let mut io = self.io.lock().await;
		let state = self.status();
		if state != SessionState::Streaming {
			return Err(Error::NotConnected(state));
		}

		let handle = io.as_mut().ok_or(Error::NotConnected(state))?;
		if handle.last_chunk_queued {
			return Err(Error::StreamFinished);
		}

		handle
			.outbound
			.send(Outbound {
				chunk: chunk.into(),
				is_last,
			})
			.await
			.map_err(|_| ConnectionError::IoTaskStopped)?;
		handle.last_chunk_queued = is_last;
		Ok(())
	}

	/// Closes the session and waits for the i/o task to finish. Audio queued
	/// before the call is still written.
	///
	/// Safe to call in any state; a failed session is acknowledged.
	pub async fn disconnect(&self) {
		let handle = self.io.lock().await.take();
		if let Some(mut handle) = handle {
			if let Some(shutdown) = handle.shutdown.take() {
				let _ = shutdown.send(());
			}
			if let Err(e) = handle.task.await {
				error!("i/o task ended abnormally: {}", e);
			}
		}

		let mut machine = self.shared.machine();
		match machine.state() {
			SessionState::Failed => {
				let _ = machine.acknowledge();
			},
			state if state.is_connecting() => debug!("disconnect requested while connecting, attempt continues"),
			_ => {},
		}
	}

	/* Getters */
	pub fn status(&self) -> SessionState { self.shared.machine().state() }

	/// The current, or most recent, session.
	pub fn session(&self) -> Option<Session> { self.shared.machine().session().cloned() }

	/// Server-side trace id of the current connection.
	pub fn log_id(&self) -> Option<String> { self.shared.log_id().clone() }

	/// The configuration the next connection attempt uses.
	pub fn config(&self) -> Arc<AsrConfig> { self.shared.config() }

	/* Usage Statistics */
	pub fn usage(&self) -> &UsageTracker { &self.shared.usage }

	pub fn usage_stats(&self) -> UsageStats { self.shared.usage.snapshot() }

	pub fn today_usage(&self) -> DailyUsage { self.usage_stats().today() }

	pub fn usage_summary(&self) -> String { self.usage_stats().summary() }

	/// Writes the statistics now. Blocks on file i/o.
	pub fn save_usage(&self) -> Result<(), StatsError> { self.shared.usage.save() }

	pub fn export_usage_csv(&self, path: impl AsRef<Path>) -> Result<(), StatsError> {
		self.usage_stats().export_csv(path)
	}
}

impl Shared {
	fn machine(&self) -> MutexGuard<'_, SessionStateMachine> {
		self.machine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	fn config(&self) -> Arc<AsrConfig> {
		self.config.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
	}

	fn set_config(&self, config: AsrConfig) {
		*self.config.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(config);
	}

	fn log_id(&self) -> MutexGuard<'_, Option<String>> { self.log_id.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) }

	fn set_log_id(&self, log_id: &str) {
		let mut current = self.log_id();
		if current.as_deref() != Some(log_id) {
			info!("service log id: {}", log_id);
			*current = Some(log_id.to_string());
		}
	}

	/// Runs up to `tries` connection attempts, each bounded by the handshake
	/// timeout. Only retryable connection errors lead to another attempt.
	///
	/// On failure returns the last error and the number of attempts made.
	async fn establish_with_retry(&self, tries: u32, backoff_first: bool) -> Result<Established, (Error, u32)> {
		let handshake_timeout = self.config().connection.handshake_timeout();
		let mut attempt = 0;

		loop {
			attempt += 1;
			let retry = if backoff_first { attempt } else { attempt - 1 };
			if retry > 0 {
				sleep(self.policy.delay(retry)).await;
			}

			let result = match timeout(handshake_timeout, self.establish()).await {
				Ok(result) => result,
				Err(_) => Err(ConnectionError::HandshakeTimeout(handshake_timeout).into()),
			};

			match result {
				Ok(established) => return Ok(established),
				Err(Error::Connection(e)) if e.is_retryable() && attempt < tries => {
					warn!("connection attempt {}/{} failed: {}", attempt, tries, e);
					let retried = self.machine().retry_connect();
					retried.map_err(|e| (Error::from(e), attempt))?;
				},
				Err(e) => return Err((e, attempt)),
			}
		}
	}

	/// Opens a transport and completes the handshake on it.
	async fn establish(&self) -> AsrResult<Established> {
		let config = self.config();
		let request_id = Uuid::new_v4().to_string();
		let target = ConnectTarget::from_config(&config, &request_id)?;

		let mut connection = self.transport.open(&target).await?;
		if let Some(log_id) = connection.log_id() {
			self.set_log_id(log_id);
		}

		match self.handshake(&config, connection.as_mut(), &request_id).await {
			Ok(first_event) => Ok(Established {
				connection,
				first_event,
			}),
			Err(e) => {
				let _ = connection.close().await;
				Err(e)
			},
		}
	}

	async fn handshake(
		&self,
		config: &AsrConfig,
		connection: &mut dyn TransportConnection,
		request_id: &str,
	) -> AsrResult<Option<ServerEvent>> {
		let sequence = {
			let mut machine = self.machine();
			machine.transport_open()?;
			machine.next_sequence().unwrap_or(1)
		};

		let frame = RequestBuilder::new(config).handshake_frame(request_id, sequence)?;
		connection.send(FrameCodec::encode_frame(&frame)?).await?;
		debug!("handshake sent, request id {}", request_id);

		loop {
			match connection.next_event().await {
				TransportEvent::Message(bytes) => {
					let frame = FrameCodec::decode_frame(&bytes)?;
					match ResponseParser::parse(&frame) {
						Ok(ServerEvent::Error(error)) => return Err(error.into()),
						Ok(ServerEvent::Ack { .. }) => return Ok(None),
						Ok(event) => return Ok(Some(event)),
						Err(e) if !e.is_fatal() => warn!("ignoring unreadable handshake response: {}", e),
						Err(e) => return Err(e),
					}
				},
				TransportEvent::Error(reason) => return Err(ConnectionError::Transport(reason).into()),
				TransportEvent::Closed => return Err(ConnectionError::ClosedDuringHandshake.into()),
			}
		}
	}

	/// Re-runs the handshake for the current session on a new transport.
	async fn reconnect(&self) -> AsrResult<Established> {
		let tries = self.policy.attempts();
		if tries == 0 {
			return Err(ConnectionError::ConnectionLost { attempts: 0 }.into());
		}

		let reconnecting = self.machine().begin_reconnect();
		reconnecting?;

		match self.establish_with_retry(tries, true).await {
			Ok(established) => {
				let accepted = self.machine().handshake_accepted();
				accepted?;
				info!("reconnected, streaming resumes with a new handshake");
				Ok(established)
			},
			Err((Error::Connection(e), attempts)) => {
				debug!("last reconnect attempt failed: {}", e);
				Err(ConnectionError::ConnectionLost { attempts }.into())
			},
			Err((error, _)) => Err(error),
		}
	}

	/// Moves the session to FAILED and archives it.
	async fn fail_session(&self, error: &Error) {
		let failed = self.machine().fail(error.to_string());
		if let Ok(session) = failed {
			if self.usage.archive(&session) {
				self.usage.autosave().await;
			}
		}
	}

	async fn report(&self, error: &Error) { (self.handlers.on_error)(error.kind(), error.to_string()).await; }
}

/// The single reader and writer of a connection.
struct IoTask {
	shared: Arc<Shared>,
	connection: Box<dyn TransportConnection>,
	outbound: mpsc::Receiver<Outbound>,
	shutdown: oneshot::Receiver<()>,
	/// A chunk whose write failed, resent after reconnecting.
	pending: Option<Outbound>,
	last_written: bool,
}

impl IoTask {
	async fn run(mut self, first_event: Option<ServerEvent>) {
		(self.shared.handlers.on_open)().await;

		if let Some(event) = first_event {
			if let Step::Stop = self.dispatch(event).await {
				return;
			}
		}

		loop {
			let step = match self.pending.take() {
				Some(item) => self.write(item).await,
				None => self.next_step().await,
			};

			match step {
				Step::Continue => {},
				Step::Stop => return,
				Step::Lost(reason) => {
					if let Step::Stop = self.recover(reason).await {
						return;
					}
				},
			}
		}
	}

	async fn next_step(&mut self) -> Step {
		tokio::select! {
			biased;
			_ = &mut self.shutdown => {
				self.drain().await;
				self.close().await;
				Step::Stop
			}
			Some(item) = self.outbound.recv() => self.write(item).await,
			event = self.connection.next_event() => match event {
				TransportEvent::Message(bytes) => self.handle_frame(&bytes).await,
				TransportEvent::Error(reason) => Step::Lost(reason),
				TransportEvent::Closed => Step::Lost("closed by peer".to_string()),
			},
		}
	}

	/// Writes everything still queued, stopping at the first transport failure.
	async fn drain(&mut self) {
		while let Ok(item) = self.outbound.try_recv() {
			if let Step::Lost(reason) = self.write(item).await {
				warn!("queued audio dropped on disconnect: {}", reason);
				break;
			}
		}
	}

	async fn write(&mut self, item: Outbound) -> Step {
		match self.write_audio(&item).await {
			Ok(()) => {
				self.last_written |= item.is_last;
				Step::Continue
			},
			Err(WriteError::Transport(reason)) => {
				self.pending = Some(item);
				Step::Lost(reason)
			},
			Err(WriteError::Frame(error)) => {
				warn!("audio chunk dropped: {}", error);
				self.shared.report(&error).await;
				Step::Continue
			},
		}
	}

	async fn write_audio(&mut self, item: &Outbound) -> Result<(), WriteError> {
		let sequence = {
			let machine = self.shared.machine();
			machine.session().map(|session| session.sent_sequence() + 1).unwrap_or(1)
		};

		let config = self.shared.config();
		let frame = RequestBuilder::new(&config)
			.audio_frame(sequence, &item.chunk, item.is_last)
			.map_err(WriteError::Frame)?;
		let bytes = FrameCodec::encode_frame(&frame).map_err(|e| WriteError::Frame(e.into()))?;
		self.shared.machine().next_sequence();

		self.connection
			.send(bytes)
			.await
			.map_err(|e| WriteError::Transport(e.to_string()))?;
		debug!("sent audio frame {} ({} bytes, last: {})", sequence, item.chunk.len(), item.is_last);
		Ok(())
	}

	async fn handle_frame(&mut self, bytes: &[u8]) -> Step {
		let event = FrameCodec::decode_frame(bytes)
			.map_err(Error::from)
			.and_then(|frame| ResponseParser::parse(&frame));

		match event {
			Ok(event) => self.dispatch(event).await,
			Err(error) if !error.is_fatal() => {
				warn!("{}", error);
				self.shared.report(&error).await;
				Step::Continue
			},
			Err(error) => {
				self.fail(error).await;
				Step::Stop
			},
		}
	}

	async fn dispatch(&mut self, event: ServerEvent) -> Step {
		match event {
			ServerEvent::Ack { sequence } => {
				debug!("ack for sequence {:?}", sequence);
				Step::Continue
			},
			ServerEvent::Partial(transcript) => {
				self.record_log_id(&transcript);
				(self.shared.handlers.on_partial_result)(transcript.text).await;
				Step::Continue
			},
			ServerEvent::Final(transcript) => {
				self.record_log_id(&transcript);
				info!("final result received");
				(self.shared.handlers.on_final_result)(transcript.text, transcript.confidence).await;
				self.close().await;
				Step::Stop
			},
			ServerEvent::Error(error) => {
				self.fail(error.into()).await;
				Step::Stop
			},
		}
	}

	/// Reconnects after the transport was lost, unless the stream already
	/// ended or `disconnect()` is called meanwhile.
	async fn recover(&mut self, reason: String) -> Step {
		warn!("transport lost: {}", reason);
		let _ = self.connection.close().await;

		if self.last_written {
			self.end_failed(ConnectionError::ConnectionLost { attempts: 0 }.into()).await;
			return Step::Stop;
		}

		let shared = self.shared.clone();
		let result = tokio::select! {
			biased;
			_ = &mut self.shutdown => Err(ConnectionError::Transport(format!("{reason}, disconnected while reconnecting")).into()),
			result = shared.reconnect() => result,
		};

		match result {
			Ok(Established {
				connection,
				first_event,
			}) => {
				self.connection = connection;
				match first_event {
					Some(event) => self.dispatch(event).await,
					None => Step::Continue,
				}
			},
			Err(error) => {
				self.end_failed(error).await;
				Step::Stop
			},
		}
	}

	/// STREAMING -> CLOSING -> DISCONNECTED.
	async fn close(&mut self) {
		let closing = self.shared.machine().begin_close();
		if let Err(e) = closing {
			warn!("{}", e);
		}

		if let Err(e) = self.connection.close().await {
			debug!("error while closing the transport: {}", e);
		}

		let closed = self.shared.machine().closed();
		match closed {
			Ok(session) => {
				if self.shared.usage.archive(&session) {
					self.shared.usage.autosave().await;
				}
			},
			Err(e) => warn!("{}", e),
		}

		(self.shared.handlers.on_close)().await;
	}

	async fn fail(&mut self, error: Error) {
		let _ = self.connection.close().await;
		self.end_failed(error).await;
	}

	async fn end_failed(&mut self, error: Error) {
		error!("session failed: {}", error);
		self.shared.fail_session(&error).await;
		self.shared.report(&error).await;
		(self.shared.handlers.on_close)().await;
	}

	fn record_log_id(&self, transcript: &Transcript) {
		if let Some(log_id) = &transcript.log_id {
			self.shared.set_log_id(log_id);
		}
	}
}
