use std::{sync::Arc, time::Duration};

use super::{
	CloseCallback, ConnectionManager, ErrorCallback, EventHandler, FinalResultCallback, OpenCallback,
	PartialResultCallback, ReconnectPolicy,
};
use crate::{
	config::AsrConfig,
	session::UsageTracker,
	transport::{Transport, WebSocketTransport},
};

pub struct ClientBuilder {
	pub(crate) config: AsrConfig,
	/// Retry behavior for failed connection attempts and lost transports.
	///
	/// Taken from the `connection.reconnect` configuration section by default.
	pub(crate) reconnect_policy: ReconnectPolicy,
	/// The transport used to reach the service. If this parameter is not
	/// specified, a [WebSocketTransport] will be used.
	pub(crate) transport: Option<Arc<dyn Transport>>,
	/// Callbacks for session events. Every callback not specified logs the
	/// event.
	pub(crate) event_handler: EventHandler,
	/// Where finished sessions are recorded. If this parameter is not
	/// specified, a tracker for the `stats` configuration section is opened.
	pub(crate) usage: Option<UsageTracker>,
}

impl ClientBuilder {
	pub fn new(config: AsrConfig) -> Self {
		Self {
			reconnect_policy: ReconnectPolicy::from(&config.connection.reconnect),
			config,
			transport: None,
			event_handler: EventHandler::default(),
			usage: None,
		}
	}

	/// Determines whether or not the client should attempt to reconnect when
	/// the transport is lost.
	pub fn should_reconnect(mut self, should_reconnect: bool) -> Self {
		self.reconnect_policy.enabled = should_reconnect;
		self
	}

	/// Sets the maximum number of reconnection attempts.
	pub fn reconnect_attempts(mut self, attempts: u32) -> Self {
		self.reconnect_policy.max_attempts = attempts;
		self
	}

	/// Sets the first delay between attempts and the cap the exponential
	/// backoff grows to.
	pub fn reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
		self.reconnect_policy.initial_backoff = initial;
		self.reconnect_policy.max_backoff = max;
		self
	}

	pub fn with_transport(mut self, transport: impl Transport) -> Self {
		self.transport = Some(Arc::new(transport));
		self
	}

	pub fn with_usage_tracker(mut self, usage: UsageTracker) -> Self {
		self.usage = Some(usage);
		self
	}

	pub fn on_open(mut self, callback: impl OpenCallback) -> Self {
		self.event_handler.on_open = Arc::new(callback);
		self
	}

	pub fn on_partial_result(mut self, callback: impl PartialResultCallback) -> Self {
		self.event_handler.on_partial_result = Arc::new(callback);
		self
	}

	pub fn on_final_result(mut self, callback: impl FinalResultCallback) -> Self {
		self.event_handler.on_final_result = Arc::new(callback);
		self
	}

	pub fn on_error(mut self, callback: impl ErrorCallback) -> Self {
		self.event_handler.on_error = Arc::new(callback);
		self
	}

	pub fn on_close(mut self, callback: impl CloseCallback) -> Self {
		self.event_handler.on_close = Arc::new(callback);
		self
	}

	pub fn build(self) -> ConnectionManager {
		let usage = self.usage.unwrap_or_else(|| match &self.config.stats.path {
			Some(path) => UsageTracker::open(path.clone(), self.config.stats.autosave),
			None => UsageTracker::in_memory(),
		});
		let transport = self.transport.unwrap_or_else(|| Arc::new(WebSocketTransport));

		ConnectionManager::new(self.config, self.reconnect_policy, transport, self.event_handler, usage)
	}
}
