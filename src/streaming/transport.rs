// Transport seam for the metrics stream
//
// A `Connector` turns an `OpenTransport` command into a running connection.
// Each connection reports back over a shared channel, tagging every event with
// the `ConnectionId` it was opened under, and takes outbound text frames from
// the `TransportHandle` the controller keeps.

use crate::streaming::decoder::OutboundFrame;
use crate::streaming::types::{ConnectionId, StreamError, StreamResult, TransportEvent};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Once;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

static CRYPTO_PROVIDER: Once = Once::new();

/// rustls needs a process-wide crypto provider before the first wss handshake
fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        // Err means the embedding application already installed one
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("Keeping the installed rustls crypto provider");
        }
    });
}

/// Where connections report their events
pub type TransportEvents = mpsc::UnboundedSender<(ConnectionId, TransportEvent)>;

/// Creates transports
pub trait Connector: Send + Sync + 'static {
    /// Start connecting to `url`. Must be called inside a tokio runtime.
    ///
    /// Returns an error only when the connection cannot even be attempted;
    /// everything after that is reported through `events`.
    fn open(
        &self,
        id: ConnectionId,
        url: &str,
        events: TransportEvents,
    ) -> StreamResult<TransportHandle>;
}

/// Controller side of one connection. Dropping it closes the connection.
#[derive(Debug)]
pub struct TransportHandle {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

/// Connection side of a `TransportHandle`
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedReceiver<String>,
    pub cancel: CancellationToken,
}

impl TransportHandle {
    /// Create a handle and the link its connection task drives
    pub fn channel(id: ConnectionId) -> (Self, TransportLink) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        (
            Self {
                id,
                outbound: outbound_tx,
                cancel: cancel.clone(),
            },
            TransportLink {
                outbound: outbound_rx,
                cancel,
            },
        )
    }

    pub fn send(&self, frame: &OutboundFrame) -> StreamResult<()> {
        let text = frame.to_json()?;
        self.outbound
            .send(text)
            .map_err(|_| StreamError::ChannelClosed)
    }

    pub fn close(&self) {
        debug!("Closing {}", self.id);
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.outbound.is_closed()
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// WebSocket transport over tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    fn open(
        &self,
        id: ConnectionId,
        url: &str,
        events: TransportEvents,
    ) -> StreamResult<TransportHandle> {
        let request = url
            .into_client_request()
            .map_err(|e| StreamError::InvalidEndpoint(e.to_string()))?;
        install_crypto_provider();

        let (handle, link) = TransportHandle::channel(id);
        tokio::spawn(run_connection(id, request, events, link));
        Ok(handle)
    }
}

async fn run_connection(
    id: ConnectionId,
    request: Request,
    events: TransportEvents,
    link: TransportLink,
) {
    let TransportLink { outbound, cancel } = link;

    let connected = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("{} cancelled while connecting", id);
            return;
        }
        result = connect_async(request) => result,
    };

    let ws_stream = match connected {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            warn!("{} failed to connect: {}", id, e);
            let _ = events.send((id, TransportEvent::Error(format!("Connection failed: {}", e))));
            let _ = events.send((id, TransportEvent::Close));
            return;
        }
    };

    if events.send((id, TransportEvent::Open)).is_err() {
        return;
    }

    let (write, read) = ws_stream.split();
    let writer = tokio::spawn(write_task(id, write, outbound, cancel.clone()));

    read_task(id, read, &events, &cancel).await;

    // Stops the writer if the server went away first
    cancel.cancel();
    let _ = writer.await;

    let _ = events.send((id, TransportEvent::Close));
    debug!("{} finished", id);
}

/// WebSocket write task
async fn write_task(
    id: ConnectionId,
    mut write: SplitSink<WsStream, WsMessage>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    loop {
        let text = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            text = outbound.recv() => match text {
                Some(text) => text,
                None => break,
            },
        };

        if let Err(e) = write.send(WsMessage::Text(text.into())).await {
            debug!("{} send failed: {}", id, e);
            break;
        }
    }

    let _ = write.send(WsMessage::Close(None)).await;
    debug!("{} write task ended", id);
}

/// WebSocket read task
async fn read_task(
    id: ConnectionId,
    mut read: SplitStream<WsStream>,
    events: &TransportEvents,
    cancel: &CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = read.next() => message,
        };

        match message {
            Some(Ok(WsMessage::Text(text))) => {
                let event = TransportEvent::Message(text.as_str().to_owned());
                if events.send((id, event)).is_err() {
                    break;
                }
            }
            Some(Ok(WsMessage::Binary(data))) => {
                debug!("{} ignoring {} byte binary frame", id, data.len());
            }
            Some(Ok(WsMessage::Close(_))) => {
                info!("{} closed by server", id);
                break;
            }
            // Ping/pong are answered by tungstenite
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                let _ = events.send((id, TransportEvent::Error(e.to_string())));
                break;
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_handle_send_and_close() {
        let (handle, mut link) = TransportHandle::channel(ConnectionId(7));

        handle.send(&OutboundFrame::Ping).unwrap();
        assert_eq!(link.outbound.try_recv().unwrap(), r#"{"type":"ping"}"#);
        assert!(!handle.is_closed());

        handle.close();
        assert!(link.cancel.is_cancelled());
        assert!(handle.is_closed());
    }

    #[test]
    fn test_dropping_handle_cancels_link() {
        let (handle, link) = TransportHandle::channel(ConnectionId(1));
        drop(handle);
        assert!(link.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_up_front() {
        let (events, _rx) = mpsc::unbounded_channel();
        let result = WebSocketConnector::new().open(ConnectionId(1), "not a url", events);
        assert!(matches!(result, Err(StreamError::InvalidEndpoint(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_reports_error_then_close() {
        let (events, mut rx) = mpsc::unbounded_channel();
        // Port 9 on localhost (discard) is closed on test machines
        let _handle = WebSocketConnector::new()
            .open(ConnectionId(3), "ws://127.0.0.1:9/api/ws/metrics", events)
            .unwrap();

        let (id, first) = rx.recv().await.unwrap();
        assert_eq!(id, ConnectionId(3));
        assert!(matches!(first, TransportEvent::Error(_)));
        assert_eq!(rx.recv().await.unwrap().1, TransportEvent::Close);
    }

    #[tokio::test]
    async fn test_secure_endpoint_attempts_tls_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Hang up before any TLS bytes are exchanged
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let (events, mut rx) = mpsc::unbounded_channel();
        let url = format!("wss://127.0.0.1:{}/api/ws/metrics?token=t", port);
        let _handle = WebSocketConnector::new()
            .open(ConnectionId(4), &url, events)
            .unwrap();

        match rx.recv().await.unwrap().1 {
            TransportEvent::Error(message) => {
                assert!(!message.contains("not compiled"), "{}", message);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(rx.recv().await.unwrap().1, TransportEvent::Close);
    }
}
