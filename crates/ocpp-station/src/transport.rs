//! WebSocket transport to the central system
//!
//! [`OcppTransport`] is the seam between the request service and the wire: a
//! single `call` performs one OCPP Call and resolves to the matched
//! CallResult payload. The production implementation speaks
//! `tokio-tungstenite` with the `ocpp1.6` subprotocol; a reader task
//! correlates responses to pending calls by unique id, so callers see FIFO
//! request/response pairs per station.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use ocpp_proto::frame::WireMessage;
use ocpp_proto::{CallErrorCode, OcppError, OcppResult};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsFrame>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type PendingCalls = Mutex<HashMap<String, oneshot::Sender<OcppResult<Value>>>>;

/// One-call-at-a-time view of the connection to the central system
#[async_trait]
pub trait OcppTransport: Send + Sync {
    /// Perform one OCPP Call and return the matched CallResult payload
    async fn call(&self, action: &str, payload: Value) -> OcppResult<Value>;

    /// Close the connection
    async fn close(&self) -> OcppResult<()>;

    /// Whether the connection is currently usable
    fn is_connected(&self) -> bool;
}

/// WebSocket implementation of [`OcppTransport`]
pub struct WsTransport {
    writer: Arc<Mutex<WsSink>>,
    pending: Arc<PendingCalls>,
    connected: Arc<AtomicBool>,
    call_timeout: Duration,
}

impl WsTransport {
    pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

    /// Open the WebSocket to `url` and start the reader task
    pub async fn connect(url: &str, call_timeout: Duration) -> OcppResult<Arc<Self>> {
        let parsed = Url::parse(url)
            .map_err(|e| OcppError::Transport(format!("invalid supervision url '{url}': {e}")))?;
        let mut request = parsed
            .as_str()
            .into_client_request()
            .map_err(|e| OcppError::Transport(e.to_string()))?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static("ocpp1.6"),
        );

        info!(url, "opening websocket connection to the central system");
        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| OcppError::Transport(e.to_string()))?;
        let (sink, source) = stream.split();

        let writer = Arc::new(Mutex::new(sink));
        let pending: Arc<PendingCalls> = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));
        tokio::spawn(read_loop(
            source,
            Arc::clone(&writer),
            Arc::clone(&pending),
            Arc::clone(&connected),
        ));

        Ok(Arc::new(Self {
            writer,
            pending,
            connected,
            call_timeout,
        }))
    }
}

#[async_trait]
impl OcppTransport for WsTransport {
    async fn call(&self, action: &str, payload: Value) -> OcppResult<Value> {
        if !self.is_connected() {
            return Err(OcppError::NotConnected);
        }

        let message = WireMessage::call(action, payload);
        let unique_id = message.unique_id().to_string();
        let text = message.encode()?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(unique_id.clone(), tx);

        if let Err(e) = self.writer.lock().await.send(WsFrame::Text(text)).await {
            self.pending.lock().await.remove(&unique_id);
            return Err(OcppError::Transport(e.to_string()));
        }
        debug!(action, unique_id = %unique_id, "call sent");

        match timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(OcppError::Transport(
                "connection closed while awaiting response".to_string(),
            )),
            Err(_) => {
                self.pending.lock().await.remove(&unique_id);
                Err(OcppError::Timeout {
                    action: action.to_string(),
                    timeout_ms: self.call_timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn close(&self) -> OcppResult<()> {
        self.connected.store(false, Ordering::Release);
        self.writer
            .lock()
            .await
            .send(WsFrame::Close(None))
            .await
            .map_err(|e| OcppError::Transport(e.to_string()))?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

async fn read_loop(
    mut source: WsSource,
    writer: Arc<Mutex<WsSink>>,
    pending: Arc<PendingCalls>,
    connected: Arc<AtomicBool>,
) {
    while let Some(next) = source.next().await {
        let frame = match next {
            Ok(frame) => frame,
            Err(e) => {
                warn!("websocket read failed: {e}");
                break;
            }
        };
        match frame {
            WsFrame::Text(text) => handle_text(&text, &writer, &pending).await,
            WsFrame::Ping(data) => {
                let _ = writer.lock().await.send(WsFrame::Pong(data)).await;
            }
            WsFrame::Close(frame) => {
                debug!("close frame received: {frame:?}");
                break;
            }
            _ => {}
        }
    }
    connected.store(false, Ordering::Release);
    fail_pending(&pending, "connection closed").await;
}

async fn handle_text(text: &str, writer: &Arc<Mutex<WsSink>>, pending: &Arc<PendingCalls>) {
    let message = match WireMessage::decode(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("dropping undecodable frame: {e}");
            return;
        }
    };
    match message {
        WireMessage::CallResult { unique_id, payload } => {
            resolve(pending, &unique_id, Ok(payload)).await;
        }
        WireMessage::CallError {
            unique_id,
            code,
            description,
            details,
        } => {
            let details = match details {
                Value::Null => None,
                Value::Object(map) if map.is_empty() => None,
                other => Some(other),
            };
            resolve(
                pending,
                &unique_id,
                Err(OcppError::Call {
                    code,
                    description,
                    details,
                }),
            )
            .await;
        }
        WireMessage::Call {
            unique_id, action, ..
        } => {
            // central-system initiated calls are outside a load generator's scope
            debug!(action, "answering central system call with NotImplemented");
            let reply = WireMessage::call_error(
                unique_id,
                CallErrorCode::NotImplemented,
                format!("action '{action}' is not supported"),
            );
            match reply.encode() {
                Ok(text) => {
                    if let Err(e) = writer.lock().await.send(WsFrame::Text(text)).await {
                        warn!("failed to answer central system call: {e}");
                    }
                }
                Err(e) => warn!("failed to encode CallError reply: {e}"),
            }
        }
    }
}

async fn resolve(pending: &Arc<PendingCalls>, unique_id: &str, result: OcppResult<Value>) {
    match pending.lock().await.remove(unique_id) {
        Some(tx) => {
            let _ = tx.send(result);
        }
        None => warn!(unique_id, "response does not match any pending call"),
    }
}

async fn fail_pending(pending: &Arc<PendingCalls>, reason: &str) {
    for (_, tx) in pending.lock().await.drain() {
        let _ = tx.send(Err(OcppError::Transport(reason.to_string())));
    }
}
