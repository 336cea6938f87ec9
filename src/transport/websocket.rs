use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
	connect_async,
	tungstenite::{
		client::IntoClientRequest,
		http::{HeaderName, HeaderValue},
		protocol::Message as WsMessage,
		Error as WsError,
	},
	MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info};

use super::{ConnectTarget, Transport, TransportConnection, TransportEvent};
use crate::{errors::ConnectionError, protocol::constants::LOG_ID_HEADER};

/// [Transport] over a (secure) WebSocket, one binary message per frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
	async fn open(&self, target: &ConnectTarget) -> Result<Box<dyn TransportConnection>, ConnectionError> {
		let mut request = target
			.url
			.as_str()
			.into_client_request()
			.map_err(|e| ConnectionError::Transport(e.to_string()))?;

		for (name, value) in &target.headers {
			let header_name =
				HeaderName::from_bytes(name.as_bytes()).map_err(|_| ConnectionError::InvalidHeader(name.clone()))?;
			let header_value = HeaderValue::from_str(value).map_err(|_| ConnectionError::InvalidHeader(name.clone()))?;
			request.headers_mut().insert(header_name, header_value);
		}

		debug!("opening websocket to {:?}", target);
		let (stream, response) = connect_async(request)
			.await
			.map_err(|e| ConnectionError::Transport(e.to_string()))?;

		let log_id = response
			.headers()
			.get(LOG_ID_HEADER)
			.and_then(|value| value.to_str().ok())
			.map(str::to_string);
		info!("websocket connected to {} (log id: {:?})", target.url.host_str().unwrap_or_default(), log_id);

		Ok(Box::new(WebSocketConnection { stream, log_id }))
	}
}

pub struct WebSocketConnection {
	stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
	log_id: Option<String>,
}

#[async_trait]
impl TransportConnection for WebSocketConnection {
	async fn send(&mut self, frame: Bytes) -> Result<(), ConnectionError> {
		self.stream
			.send(WsMessage::Binary(frame))
			.await
			.map_err(|e| ConnectionError::Transport(e.to_string()))
	}

	async fn next_event(&mut self) -> TransportEvent {
		loop {
			match self.stream.next().await {
				Some(Ok(WsMessage::Binary(bytes))) => return TransportEvent::Message(bytes),
				Some(Ok(WsMessage::Close(frame))) => {
					debug!("websocket closed by peer: {:?}", frame);
					return TransportEvent::Closed;
				},
				Some(Ok(WsMessage::Text(text))) => debug!("ignoring text message: {}", text.as_str()),
				// ping / pong are answered by tungstenite itself
				Some(Ok(_)) => continue,
				Some(Err(e)) => return TransportEvent::Error(e.to_string()),
				None => return TransportEvent::Closed,
			}
		}
	}

	async fn close(&mut self) -> Result<(), ConnectionError> {
		match self.stream.close(None).await {
			Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
			Err(e) => Err(ConnectionError::Transport(e.to_string())),
		}
	}

	fn log_id(&self) -> Option<&str> { self.log_id.as_deref() }
}
