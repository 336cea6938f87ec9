use std::fmt::Display;

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::TransitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
	#[default]
	Idle,
	Connecting,
	Handshaking,
	Streaming,
	Closing,
	Disconnected,
	/// Entered on a fatal error. Acknowledged into [SessionState::Disconnected]
	/// by the next `disconnect()` or `connect()`.
	Failed,
}

impl SessionState {
	/// Whether a connection attempt is running in this state.
	pub fn is_connecting(&self) -> bool { matches!(self, SessionState::Connecting | SessionState::Handshaking) }

	/// Whether a transport is open, or being opened, in this state.
	pub fn is_active(&self) -> bool {
		matches!(
			self,
			SessionState::Connecting | SessionState::Handshaking | SessionState::Streaming | SessionState::Closing
		)
	}
}

impl Display for SessionState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			SessionState::Idle => "IDLE",
			SessionState::Connecting => "CONNECTING",
			SessionState::Handshaking => "HANDSHAKING",
			SessionState::Streaming => "STREAMING",
			SessionState::Closing => "CLOSING",
			SessionState::Disconnected => "DISCONNECTED",
			SessionState::Failed => "FAILED",
		};
		write!(f, "{}", name)
	}
}

/// One connect-to-disconnect lifetime of the client.
#[derive(Debug, Clone)]
pub struct Session {
	id: Uuid,
	connect_time: DateTime<Local>,
	disconnect_time: Option<DateTime<Local>>,
	/// Last client sequence number written for the current handshake.
	sent_sequence: i32,
	last_error: Option<String>,
	state: SessionState,
	reached_streaming: bool,
	reconnects: u32,
}

impl Session {
	fn new(connect_time: DateTime<Local>) -> Self {
		Self {
			id: Uuid::new_v4(),
			connect_time,
			disconnect_time: None,
			sent_sequence: 0,
			last_error: None,
			state: SessionState::Connecting,
			reached_streaming: false,
			reconnects: 0,
		}
	}

	/// Wall-clock length of the session rounded to whole seconds, or `None`
	/// while it is still running.
	pub fn duration_seconds(&self) -> Option<u64> {
		let end = self.disconnect_time?;
		let millis = (end - self.connect_time).num_milliseconds().max(0) as u64;
		Some((millis + 500) / 1000)
	}

	/* Getters */
	pub fn id(&self) -> Uuid { self.id }

	pub fn connect_time(&self) -> DateTime<Local> { self.connect_time }

	pub fn disconnect_time(&self) -> Option<DateTime<Local>> { self.disconnect_time }

	pub fn sent_sequence(&self) -> i32 { self.sent_sequence }

	pub fn last_error(&self) -> Option<&str> { self.last_error.as_deref() }

	pub fn state(&self) -> SessionState { self.state }

	/// Only sessions that completed a handshake count towards usage.
	pub fn reached_streaming(&self) -> bool { self.reached_streaming }

	pub fn reconnects(&self) -> u32 { self.reconnects }
}

/// Drives one [Session] through its states. Every transition not listed below
/// is rejected with a [TransitionError] and leaves the machine untouched.
///
/// ```text
/// IDLE | DISCONNECTED --connect--> CONNECTING --open--> HANDSHAKING --accept--> STREAMING
/// STREAMING --final result | disconnect--> CLOSING --closed--> DISCONNECTED
/// STREAMING --transport lost--> CONNECTING (same session, new sequence counter)
/// any active state --fatal error--> FAILED --acknowledge--> DISCONNECTED
/// ```
#[derive(Debug, Default)]
pub struct SessionStateMachine {
	state: SessionState,
	session: Option<Session>,
}

impl SessionStateMachine {
	pub fn new() -> Self { Self::default() }

	/// Starts a new session. A failed session is acknowledged first.
	pub fn begin_connect(&mut self) -> Result<Uuid, TransitionError> { self.begin_connect_at(Local::now()) }

	pub(crate) fn begin_connect_at(&mut self, now: DateTime<Local>) -> Result<Uuid, TransitionError> {
		if self.state == SessionState::Failed {
			self.acknowledge()?;
		}

		match self.state {
			SessionState::Idle | SessionState::Disconnected => {
				let session = Session::new(now);
				let id = session.id;
				info!("starting session {}", id);
				self.session = Some(session);
				self.set_state(SessionState::Connecting);
				Ok(id)
			},
			from => Err(TransitionError { from, action: "connect" }),
		}
	}

	/// The transport is open, the handshake request is about to be sent.
	pub fn transport_open(&mut self) -> Result<(), TransitionError> {
		self.require(SessionState::Connecting, "open transport")?;
		if let Some(session) = self.session.as_mut() {
			session.sent_sequence = 0;
		}
		self.set_state(SessionState::Handshaking);
		Ok(())
	}

	/// The service answered the handshake.
	pub fn handshake_accepted(&mut self) -> Result<(), TransitionError> {
		self.require(SessionState::Handshaking, "accept handshake")?;
		if let Some(session) = self.session.as_mut() {
			session.reached_streaming = true;
		}
		self.set_state(SessionState::Streaming);
		Ok(())
	}

	/// The transport dropped while streaming; the same session reconnects.
	pub fn begin_reconnect(&mut self) -> Result<(), TransitionError> {
		self.require(SessionState::Streaming, "reconnect")?;
		if let Some(session) = self.session.as_mut() {
			session.reconnects += 1;
			session.sent_sequence = 0;
		}
		warn!("transport lost, reconnecting");
		self.set_state(SessionState::Connecting);
		Ok(())
	}

	/// A connection attempt failed and another one is about to start.
	pub fn retry_connect(&mut self) -> Result<(), TransitionError> {
		if !self.state.is_connecting() {
			return Err(TransitionError {
				from: self.state,
				action: "retry connect",
			});
		}
		if let Some(session) = self.session.as_mut() {
			session.sent_sequence = 0;
		}
		self.set_state(SessionState::Connecting);
		Ok(())
	}

	pub fn begin_close(&mut self) -> Result<(), TransitionError> {
		self.require(SessionState::Streaming, "close")?;
		self.set_state(SessionState::Closing);
		Ok(())
	}

	/// The transport is closed. Returns the finished session.
	pub fn closed(&mut self) -> Result<Session, TransitionError> { self.closed_at(Local::now()) }

	pub(crate) fn closed_at(&mut self, now: DateTime<Local>) -> Result<Session, TransitionError> {
		self.require(SessionState::Closing, "finish closing")?;
		self.set_state(SessionState::Disconnected);
		self.finish(now).ok_or(TransitionError {
			from: SessionState::Closing,
			action: "finish closing",
		})
	}

	/// Moves an active session to [SessionState::Failed], returning it.
	pub fn fail(&mut self, reason: impl Into<String>) -> Result<Session, TransitionError> {
		self.fail_at(reason, Local::now())
	}

	pub(crate) fn fail_at(&mut self, reason: impl Into<String>, now: DateTime<Local>) -> Result<Session, TransitionError> {
		if !self.state.is_active() {
			return Err(TransitionError {
				from: self.state,
				action: "fail",
			});
		}

		let reason = reason.into();
		if let Some(session) = self.session.as_mut() {
			session.last_error = Some(reason.clone());
		}
		warn!("session failed: {}", reason);
		self.set_state(SessionState::Failed);
		self.finish(now).ok_or(TransitionError {
			from: SessionState::Failed,
			action: "fail",
		})
	}

	/// Acknowledges a failure.
	pub fn acknowledge(&mut self) -> Result<(), TransitionError> {
		self.require(SessionState::Failed, "acknowledge")?;
		self.set_state(SessionState::Disconnected);
		Ok(())
	}

	/// Allocates the next client sequence number of the current handshake.
	pub fn next_sequence(&mut self) -> Option<i32> {
		let session = self.session.as_mut()?;
		session.sent_sequence += 1;
		Some(session.sent_sequence)
	}

	/* Getters */
	pub fn state(&self) -> SessionState { self.state }

	pub fn session(&self) -> Option<&Session> { self.session.as_ref() }

	fn require(&self, expected: SessionState, action: &'static str) -> Result<(), TransitionError> {
		match self.state == expected {
			true => Ok(()),
			false => Err(TransitionError { from: self.state, action }),
		}
	}

	fn set_state(&mut self, state: SessionState) {
		debug!("session state {} -> {}", self.state, state);
		self.state = state;
		if let Some(session) = self.session.as_mut() {
			session.state = state;
		}
	}

	fn finish(&mut self, now: DateTime<Local>) -> Option<Session> {
		let session = self.session.as_mut()?;
		session.disconnect_time = Some(now);
		info!(
			"session {} ended in {} after {}s",
			session.id,
			session.state,
			session.duration_seconds().unwrap_or_default()
		);
		Some(session.clone())
	}
}
