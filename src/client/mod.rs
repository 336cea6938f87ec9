mod builder;
mod event_handler;
mod manager;
mod reconnect;

use std::{future::Future, pin::Pin};

pub use builder::*;
pub use event_handler::*;
pub use manager::*;
pub use reconnect::*;

use crate::errors::ErrorKind;

/// Type alias used to indicate a pinned and boxed future.
pub type BoxedCallbackFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Boxes an async block into a [BoxedCallbackFuture].
#[macro_export]
macro_rules! pin_callback {
	($($body:tt)*) => {
		::std::boxed::Box::pin(async move { $($body)* }) as $crate::client::BoxedCallbackFuture
	};
}

/// Invoked once the service accepted the handshake.
pub trait OpenCallback: Fn() -> BoxedCallbackFuture + Sync + Send + 'static {}

impl<F> OpenCallback for F where F: Fn() -> BoxedCallbackFuture + Sync + Send + 'static {}

/// Invoked with the text of every partial result.
pub trait PartialResultCallback: Fn(String) -> BoxedCallbackFuture + Sync + Send + 'static {}

impl<F> PartialResultCallback for F where F: Fn(String) -> BoxedCallbackFuture + Sync + Send + 'static {}

/// Invoked with the text and, when reported, the confidence of the final result.
pub trait FinalResultCallback: Fn(String, Option<f64>) -> BoxedCallbackFuture + Sync + Send + 'static {}

impl<F> FinalResultCallback for F where F: Fn(String, Option<f64>) -> BoxedCallbackFuture + Sync + Send + 'static {}

pub trait ErrorCallback: Fn(ErrorKind, String) -> BoxedCallbackFuture + Sync + Send + 'static {}

impl<F> ErrorCallback for F where F: Fn(ErrorKind, String) -> BoxedCallbackFuture + Sync + Send + 'static {}

/// Invoked when a session ends, whether it closed or failed.
pub trait CloseCallback: Fn() -> BoxedCallbackFuture + Sync + Send + 'static {}

impl<F> CloseCallback for F where F: Fn() -> BoxedCallbackFuture + Sync + Send + 'static {}
