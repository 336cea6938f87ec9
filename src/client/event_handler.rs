use std::sync::Arc;

use tracing::{debug, warn};

use super::{CloseCallback, ErrorCallback, FinalResultCallback, OpenCallback, PartialResultCallback};
use crate::{errors::ErrorKind, pin_callback};

/// Callbacks invoked by the i/o task of a [super::ConnectionManager].
///
/// Each returned future is awaited before the next frame is read, so
/// callbacks observe events in wire order. Long running work should be
/// spawned from inside the callback.
#[derive(Clone)]
pub struct EventHandler {
	pub(crate) on_open: Arc<dyn OpenCallback>,
	pub(crate) on_partial_result: Arc<dyn PartialResultCallback>,
	pub(crate) on_final_result: Arc<dyn FinalResultCallback>,
	pub(crate) on_error: Arc<dyn ErrorCallback>,
	pub(crate) on_close: Arc<dyn CloseCallback>,
}

impl EventHandler {
	fn default_open_handler() -> Arc<dyn OpenCallback> {
		let handler = || {
			pin_callback!({
				debug!(target: "default_open_handler", "Recognition session opened");
			})
		};
		Arc::new(handler)
	}

	fn default_partial_handler() -> Arc<dyn PartialResultCallback> {
		let handler = |text: String| {
			pin_callback!({
				debug!(target: "default_partial_handler", "Partial result: {}", text);
			})
		};
		Arc::new(handler)
	}

	fn default_final_handler() -> Arc<dyn FinalResultCallback> {
		let handler = |text: String, confidence: Option<f64>| {
			pin_callback!({
				debug!(target: "default_final_handler", "Final result: {} (confidence {:?})", text, confidence);
			})
		};
		Arc::new(handler)
	}

	fn default_error_handler() -> Arc<dyn ErrorCallback> {
		let handler = |kind: ErrorKind, message: String| {
			pin_callback!({
				warn!(target: "default_error_handler", "{} error: {}", kind, message);
			})
		};
		Arc::new(handler)
	}

	fn default_close_handler() -> Arc<dyn CloseCallback> {
		let handler = || {
			pin_callback!({
				debug!(target: "default_close_handler", "Recognition session closed");
			})
		};
		Arc::new(handler)
	}
}

impl Default for EventHandler {
	fn default() -> Self {
		Self {
			on_open: Self::default_open_handler(),
			on_partial_result: Self::default_partial_handler(),
			on_final_result: Self::default_final_handler(),
			on_error: Self::default_error_handler(),
			on_close: Self::default_close_handler(),
		}
	}
}
