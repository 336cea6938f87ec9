//! Typed shapes of the JSON bodies sent by both service generations.

use serde::Deserialize;

use super::events::Utterance;

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseBody {
	pub code: Option<u32>,
	pub message: Option<String>,
	pub error: Option<String>,
	pub result: Option<ResultField>,
	pub is_final: Option<bool>,
	/// Legacy responses mark the last packet with a negative sequence.
	pub sequence: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ResultField {
	Object(ObjectResult),
	List(Vec<ListResult>),
}

/// `result` as sent by the current (v3) service.
#[derive(Debug, Deserialize)]
pub(crate) struct ObjectResult {
	pub text: String,
	#[serde(default)]
	pub utterances: Vec<Utterance>,
	pub additions: Option<Additions>,
	pub is_final: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Additions {
	pub log_id: Option<String>,
}

/// One entry of the legacy `result` array.
#[derive(Debug, Deserialize)]
pub(crate) struct ListResult {
	pub text: String,
	pub confidence: Option<f64>,
	#[serde(default)]
	pub utterances: Vec<Utterance>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
	pub error: Option<String>,
	pub message: Option<String>,
}
