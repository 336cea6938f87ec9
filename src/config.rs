use std::{fmt::Debug, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::{
	errors::ConfigError,
	protocol::constants::{DEFAULT_RESOURCE_ID, DEFAULT_URL},
};

/// Prefix of the environment variables overriding file configuration, e.g.
/// `ASR_ENDPOINT__URL`.
const ENV_PREFIX: &str = "ASR";
const ENV_SEPARATOR: &str = "__";

const PLACEHOLDER_APP_ID: &str = "dev-app-id";
const PLACEHOLDER_ACCESS_TOKEN: &str = "dev-access-token";
const PLACEHOLDER_SECRET_KEY: &str = "dev-secret-key";

/// Complete configuration of a recognition client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AsrConfig {
	pub endpoint: EndpointConfig,
	pub audio: AudioConfig,
	pub request: RequestConfig,
	pub connection: ConnectionConfig,
	pub stats: StatsConfig,
	pub credentials: Credentials,
}

impl AsrConfig {
	/// Loads configuration from an optional file, then applies `ASR_`
	/// environment overrides. Missing credentials are taken from the
	/// credential environment variables.
	pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
		let mut builder = config::Config::builder();
		if let Some(path) = path {
			builder = builder.add_source(config::File::with_name(path).required(false));
		}

		let settings = builder
			.add_source(
				config::Environment::with_prefix(ENV_PREFIX)
					.prefix_separator("_")
					.separator(ENV_SEPARATOR)
					.try_parsing(true),
			)
			.build()?;

		let mut config: AsrConfig = settings.try_deserialize()?;
		if config.credentials.is_empty() {
			config.credentials = Credentials::from_env();
		}

		Ok(config)
	}

	/// Default configuration with credentials read from the environment.
	pub fn from_env() -> Self {
		Self {
			credentials: Credentials::from_env(),
			..Default::default()
		}
	}

	/// Checks everything that can be checked before a connection attempt.
	pub fn validate(&self) -> Result<(), ConfigError> {
		self.endpoint.parsed_url()?;
		self.audio.validate()?;
		self.credentials.validate()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
/// How credentials are attached to the WebSocket upgrade request.
pub enum AuthScheme {
	/// `X-Api-*` request headers.
	#[default]
	Headers,
	/// `Authorization: Bearer <token>`.
	Bearer,
	/// `app_id` and `token` query parameters.
	Query,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Layout of the handshake JSON.
pub enum HandshakeSchema {
	#[default]
	Simple,
	Legacy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
	pub url: String,
	pub auth: AuthScheme,
	pub resource_id: String,
	pub schema: HandshakeSchema,
}

impl EndpointConfig {
	pub fn parsed_url(&self) -> Result<Url, ConfigError> {
		let url = Url::parse(&self.url)?;
		match url.scheme() {
			"ws" | "wss" => Ok(url),
			other => Err(ConfigError::UnsupportedScheme(other.to_string())),
		}
	}
}

impl Default for EndpointConfig {
	fn default() -> Self {
		Self {
			url: DEFAULT_URL.to_string(),
			auth: AuthScheme::default(),
			resource_id: DEFAULT_RESOURCE_ID.to_string(),
			schema: HandshakeSchema::default(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
	pub format: String,
	pub sample_rate: u32,
	pub bits: u16,
	pub channels: u16,
	pub codec: String,
}

impl AudioConfig {
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.format.is_empty() || self.codec.is_empty() {
			return Err(ConfigError::InvalidAudioFormat("format and codec must be set".into()));
		}
		if self.sample_rate == 0 {
			return Err(ConfigError::InvalidAudioFormat("sample rate must be positive".into()));
		}
		if !matches!(self.bits, 8 | 16 | 24 | 32) {
			return Err(ConfigError::InvalidAudioFormat(format!("unsupported bit depth {}", self.bits)));
		}
		if self.channels == 0 {
			return Err(ConfigError::InvalidAudioFormat("at least one channel is required".into()));
		}

		Ok(())
	}
}

impl Default for AudioConfig {
	fn default() -> Self {
		Self {
			format: "wav".to_string(),
			sample_rate: 16000,
			bits: 16,
			channels: 1,
			codec: "raw".to_string(),
		}
	}
}

/// Recognition options sent in the handshake. Which of them are used depends
/// on the [HandshakeSchema].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
	pub uid: String,
	pub model_name: String,
	pub enable_punc: bool,
	pub language: String,
	pub cluster: String,
	pub result_type: String,
	pub nbest: u32,
	pub workflow: String,
	pub show_language: bool,
	pub show_utterances: bool,
}

impl Default for RequestConfig {
	fn default() -> Self {
		Self {
			uid: "test".to_string(),
			model_name: "bigmodel".to_string(),
			enable_punc: true,
			language: "zh-CN".to_string(),
			cluster: "volcengine_streaming_common".to_string(),
			result_type: "full".to_string(),
			nbest: 1,
			workflow: "audio_in,resample,partition,vad,fe,decode".to_string(),
			show_language: false,
			show_utterances: true,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
	pub handshake_timeout_ms: u64,
	/// Depth of the queue between `send_audio` and the i/o task.
	pub queue_depth: usize,
	/// Gzip audio payloads.
	pub compress_audio: bool,
	pub reconnect: ReconnectConfig,
}

impl ConnectionConfig {
	pub fn handshake_timeout(&self) -> Duration { Duration::from_millis(self.handshake_timeout_ms) }
}

impl Default for ConnectionConfig {
	fn default() -> Self {
		Self {
			handshake_timeout_ms: 30_000,
			queue_depth: 64,
			compress_audio: true,
			reconnect: ReconnectConfig::default(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
	pub enabled: bool,
	pub max_attempts: u32,
	pub initial_backoff_ms: u64,
	pub max_backoff_ms: u64,
}

impl Default for ReconnectConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			max_attempts: 3,
			initial_backoff_ms: 500,
			max_backoff_ms: 8_000,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
	/// Where usage statistics are persisted. Nothing is persisted when unset.
	pub path: Option<PathBuf>,
	/// Save after every archived session.
	pub autosave: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialSource {
	/// Set explicitly, in code or in a configuration file.
	#[default]
	Configured,
	Environment,
	/// Development values, never valid against the real service.
	Placeholder,
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct Credentials {
	pub app_id: String,
	pub access_token: String,
	pub secret_key: String,
	#[serde(skip)]
	source: CredentialSource,
}

impl Credentials {
	pub fn new(app_id: impl Into<String>, access_token: impl Into<String>, secret_key: impl Into<String>) -> Self {
		Self {
			app_id: app_id.into(),
			access_token: access_token.into(),
			secret_key: secret_key.into(),
			source: CredentialSource::Configured,
		}
	}

	/// Reads `ASR_APP_ID`, `ASR_ACCESS_TOKEN` and `ASR_SECRET_KEY`, falling back
	/// to the `VOLC_` names. When neither is set the placeholder credentials are
	/// used and a warning is logged.
	pub fn from_env() -> Self { Self::from_lookup(|name| std::env::var(name).ok().filter(|v| !v.is_empty())) }

	fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
		let read = |name: &str| lookup(&format!("ASR_{name}")).or_else(|| lookup(&format!("VOLC_{name}")));

		match (read("APP_ID"), read("ACCESS_TOKEN")) {
			(Some(app_id), Some(access_token)) => Self {
				app_id,
				access_token,
				secret_key: read("SECRET_KEY").unwrap_or_default(),
				source: CredentialSource::Environment,
			},
			_ => {
				warn!("ASR_APP_ID / ASR_ACCESS_TOKEN not set, falling back to placeholder credentials");
				Self {
					app_id: PLACEHOLDER_APP_ID.to_string(),
					access_token: PLACEHOLDER_ACCESS_TOKEN.to_string(),
					secret_key: PLACEHOLDER_SECRET_KEY.to_string(),
					source: CredentialSource::Placeholder,
				}
			},
		}
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.app_id.trim().is_empty() {
			return Err(ConfigError::MissingCredential("app_id"));
		}
		if self.access_token.trim().is_empty() {
			return Err(ConfigError::MissingCredential("access_token"));
		}
		Ok(())
	}

	pub fn is_empty(&self) -> bool { self.app_id.is_empty() && self.access_token.is_empty() }

	pub fn is_placeholder(&self) -> bool { self.source == CredentialSource::Placeholder }

	/* Getters */
	pub fn source(&self) -> CredentialSource { self.source }

	/// The access token with everything but its first and last four characters hidden.
	pub fn masked_token(&self) -> String { mask(&self.access_token) }
}

impl Debug for Credentials {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Credentials")
			.field("app_id", &self.app_id)
			.field("access_token", &mask(&self.access_token))
			.field("secret_key", &mask(&self.secret_key))
			.field("source", &self.source)
			.finish()
	}
}

fn mask(secret: &str) -> String {
	let chars: Vec<char> = secret.chars().collect();
	if chars.len() <= 8 {
		return "****".to_string();
	}

	let head: String = chars[..4].iter().collect();
	let tail: String = chars[chars.len() - 4..].iter().collect();
	format!("{head}****{tail}")
}
