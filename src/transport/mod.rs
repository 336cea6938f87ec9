#[cfg(test)]
pub(crate) mod mock;
mod websocket;

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

pub use self::websocket::*;
use crate::{
	config::{AsrConfig, AuthScheme},
	errors::{ConfigError, ConnectionError},
	protocol::constants::{HEADER_ACCESS_KEY, HEADER_APP_KEY, HEADER_AUTHORIZATION, HEADER_REQUEST_ID, HEADER_RESOURCE_ID},
};

/// Opens connections to the recognition service.
///
/// The session logic only ever talks to these two traits, so any transport
/// able to carry binary messages can be plugged in.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
	async fn open(&self, target: &ConnectTarget) -> Result<Box<dyn TransportConnection>, ConnectionError>;
}

/// One open connection. Every call to [TransportConnection::send] carries
/// exactly one encoded frame.
#[async_trait]
pub trait TransportConnection: Send {
	async fn send(&mut self, frame: Bytes) -> Result<(), ConnectionError>;

	/// Waits for the next inbound event. Must be cancel safe.
	async fn next_event(&mut self) -> TransportEvent;

	async fn close(&mut self) -> Result<(), ConnectionError>;

	/// Server-side trace id of the connection, when the service reported one.
	fn log_id(&self) -> Option<&str> { None }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
	Message(Bytes),
	Error(String),
	Closed,
}

/// Where to connect and which headers to send with the upgrade request.
#[derive(Clone)]
pub struct ConnectTarget {
	pub url: Url,
	pub headers: Vec<(String, String)>,
}

impl ConnectTarget {
	/// Builds the target for `config`, attaching credentials with the
	/// configured [AuthScheme].
	pub fn from_config(config: &AsrConfig, request_id: &str) -> Result<Self, ConfigError> {
		let mut url = config.endpoint.parsed_url()?;
		let credentials = &config.credentials;
		let mut headers = Vec::new();

		match config.endpoint.auth {
			AuthScheme::Headers => {
				headers.push((HEADER_RESOURCE_ID.to_string(), config.endpoint.resource_id.clone()));
				headers.push((HEADER_ACCESS_KEY.to_string(), credentials.access_token.clone()));
				headers.push((HEADER_APP_KEY.to_string(), credentials.app_id.clone()));
				headers.push((HEADER_REQUEST_ID.to_string(), request_id.to_string()));
			},
			AuthScheme::Bearer => {
				headers.push((HEADER_AUTHORIZATION.to_string(), format!("Bearer {}", credentials.access_token)));
			},
			AuthScheme::Query => {
				url.query_pairs_mut()
					.append_pair("app_id", &credentials.app_id)
					.append_pair("token", &credentials.access_token);
			},
		}

		Ok(Self { url, headers })
	}

	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}
}

impl Debug for ConnectTarget {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let names: Vec<&str> = self.headers.iter().map(|(name, _)| name.as_str()).collect();
		f.debug_struct("ConnectTarget")
			.field("host", &self.url.host_str())
			.field("path", &self.url.path())
			.field("headers", &names)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;
	use crate::config::Credentials;

	fn config(auth: AuthScheme) -> AsrConfig {
		let mut config = AsrConfig::default();
		config.endpoint.auth = auth;
		config.credentials = Credentials::new("app-1", "secret-token", "");
		config
	}

	#[test]
	fn header_auth() {
		let target = ConnectTarget::from_config(&config(AuthScheme::Headers), "req-1").unwrap();

		assert_eq!(target.header("X-Api-Resource-Id"), Some("volc.bigasr.sauc.duration"));
		assert_eq!(target.header("x-api-access-key"), Some("secret-token"));
		assert_eq!(target.header("X-Api-App-Key"), Some("app-1"));
		assert_eq!(target.header("X-Api-Request-Id"), Some("req-1"));
		assert_eq!(target.url.query(), None);
	}

	#[test]
	fn bearer_auth() {
		let target = ConnectTarget::from_config(&config(AuthScheme::Bearer), "req-1").unwrap();
		assert_eq!(target.header("Authorization"), Some("Bearer secret-token"));
		assert_eq!(target.headers.len(), 1);
	}

	#[test]
	fn query_auth() {
		let target = ConnectTarget::from_config(&config(AuthScheme::Query), "req-1").unwrap();
		assert_eq!(target.url.query(), Some("app_id=app-1&token=secret-token"));
		assert!(target.headers.is_empty());
	}

	#[test]
	fn debug_output_hides_secrets() {
		let target = ConnectTarget::from_config(&config(AuthScheme::Query), "req-1").unwrap();
		assert!(!format!("{:?}", target).contains("secret-token"));

		let target = ConnectTarget::from_config(&config(AuthScheme::Headers), "req-1").unwrap();
		assert!(!format!("{:?}", target).contains("secret-token"));
	}
}
