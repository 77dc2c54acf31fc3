//! HTTP event-stream transport
//!
//! Opens a long-lived `text/event-stream` GET to the server. The server's
//! first `endpoint` event names the URL that client messages are POSTed to;
//! replies arrive back on the stream as `message` events. A JSON body
//! returned directly by a POST is accepted as an inbound message too.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::str::FromStr;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::{StateCell, Transport, TransportState};
use crate::Result;
use crate::config::{StreamSpec, TransportKind};
use crate::error::MCPError;

type InboundSender = Arc<StdMutex<Option<mpsc::UnboundedSender<Value>>>>;

/// Transport over an HTTP event stream plus POSTed messages
pub struct StreamTransport {
    spec: StreamSpec,
    base_url: Url,
    state: StateCell,

    /// HTTP client
    http_client: reqwest::Client,

    /// Where client messages are POSTed, learned from the `endpoint` event
    endpoint: RwLock<Option<Url>>,

    /// Shared with the reader task; dropping it ends `receive`
    inbound_tx: InboundSender,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Value>>,

    /// Event-stream reader task
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl StreamTransport {
    /// Create a transport for `spec`; no request is made until `open`
    pub fn new(spec: StreamSpec) -> Result<Self> {
        let base_url = Url::parse(&spec.url)
            .map_err(|e| MCPError::Configuration(format!("invalid url '{}': {e}", spec.url)))?;

        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| MCPError::Connection(format!("Failed to create HTTP client: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();

        Ok(Self {
            spec,
            base_url,
            state: StateCell::new(),
            http_client,
            endpoint: RwLock::new(None),
            inbound_tx: Arc::new(StdMutex::new(Some(tx))),
            inbound_rx: Mutex::new(rx),
            reader: StdMutex::new(None),
        })
    }

    /// Build the custom HTTP headers
    fn build_headers(&self) -> Result<HeaderMap> {
        let mut header_map = HeaderMap::new();

        for (key, value) in &self.spec.headers {
            let name = HeaderName::from_str(key).map_err(|e| {
                MCPError::Configuration(format!("Invalid header name '{key}': {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                MCPError::Configuration(format!("Invalid header value for '{key}': {e}"))
            })?;
            header_map.insert(name, value);
        }

        Ok(header_map)
    }

    /// Headers for the event-stream GET
    ///
    /// The default stream implementation cannot carry custom headers; the
    /// alternate one sends them along with the stream request.
    fn stream_headers(&self) -> Result<HeaderMap> {
        let mut headers = if self.spec.use_alternate_stream_impl {
            self.build_headers()?
        } else {
            HeaderMap::new()
        };
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        Ok(headers)
    }

    fn forward_inbound(sender: &InboundSender, message: Value) {
        let guard = sender.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(message);
        }
    }

    fn end_inbound(sender: &InboundSender) {
        sender.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    async fn read_events(
        response: reqwest::Response,
        base_url: Url,
        inbound: InboundSender,
        endpoint_tx: oneshot::Sender<Result<Url>>,
    ) {
        let mut endpoint_tx = Some(endpoint_tx);
        let mut decoder = SseDecoder::default();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("Event stream error: {}", e);
                    break;
                }
            };

            for event in decoder.feed(&chunk) {
                match event.event.as_str() {
                    "endpoint" => {
                        let resolved = base_url.join(event.data.trim()).map_err(|e| {
                            MCPError::Connection(format!(
                                "invalid endpoint '{}': {e}",
                                event.data
                            ))
                        });
                        match endpoint_tx.take() {
                            Some(tx) => {
                                let _ = tx.send(resolved);
                            }
                            None => debug!("Ignoring repeated endpoint event"),
                        }
                    }
                    "message" => match serde_json::from_str::<Value>(&event.data) {
                        Ok(message) => Self::forward_inbound(&inbound, message),
                        Err(e) => warn!("Dropping malformed event-stream message: {}", e),
                    },
                    other => debug!("Ignoring event-stream event '{}'", other),
                }
            }
        }

        debug!("Event stream ended");
        if let Some(tx) = endpoint_tx.take() {
            let _ = tx.send(Err(MCPError::Connection(
                "event stream ended before the server announced its endpoint".to_string(),
            )));
        }
        Self::end_inbound(&inbound);
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn open(&self) -> Result<()> {
        let attempt = self.state.begin_open()?;
        debug!("Opening event stream: {}", self.spec.url);

        let response = self
            .http_client
            .get(self.base_url.clone())
            .headers(self.stream_headers()?)
            .send()
            .await
            .map_err(|e| MCPError::Connection(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(MCPError::Connection(format!(
                "event stream returned HTTP {}",
                response.status()
            )));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let reader = tokio::spawn(Self::read_events(
            response,
            self.base_url.clone(),
            self.inbound_tx.clone(),
            endpoint_tx,
        ));
        *self.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(reader);

        let endpoint = endpoint_rx.await.map_err(|_| {
            MCPError::Connection("event stream reader stopped unexpectedly".to_string())
        })??;

        info!("Event stream open; posting messages to {}", endpoint);
        *self.endpoint.write().await = Some(endpoint);
        attempt.finish()
    }

    async fn send(&self, message: Value) -> Result<()> {
        self.state.ensure_connected()?;

        let endpoint = self
            .endpoint
            .read()
            .await
            .clone()
            .ok_or(MCPError::NotConnected)?;

        let response = self
            .http_client
            .post(endpoint)
            .headers(self.build_headers()?)
            .json(&message)
            .send()
            .await
            .map_err(|e| MCPError::Connection(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MCPError::Connection(format!(
                "HTTP {status}: {}",
                response.text().await.unwrap_or_default()
            )));
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));

        if is_json {
            let body = response
                .bytes()
                .await
                .map_err(|e| MCPError::Connection(e.to_string()))?;
            if !body.is_empty() {
                match serde_json::from_slice::<Value>(&body)? {
                    Value::Array(batch) => {
                        for item in batch {
                            Self::forward_inbound(&self.inbound_tx, item);
                        }
                    }
                    single => Self::forward_inbound(&self.inbound_tx, single),
                }
            }
        }

        Ok(())
    }

    async fn receive(&self) -> Option<Value> {
        self.inbound_rx.lock().await.recv().await
    }

    async fn close(&self) -> Result<()> {
        if !self.state.mark_closed() {
            return Ok(());
        }
        debug!("Closing event stream: {}", self.spec.url);

        if let Some(reader) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reader.abort();
        }
        Self::end_inbound(&self.inbound_tx);
        Ok(())
    }

    fn state(&self) -> TransportState {
        self.state.get()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        if let Some(reader) = self
            .reader
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reader.abort();
        }
    }
}

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name; `message` when the server did not name it
    pub event: String,
    /// Data lines joined with `\n`
    pub data: String,
}

/// Incremental `text/event-stream` decoder
///
/// Accepts arbitrary chunk boundaries, including ones that split a line or
/// a multi-byte character.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed a chunk and collect every event it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }

            // comment / keep-alive
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };

            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }

        let data = self.data.join("\n");
        self.data.clear();
        Some(SseEvent {
            event: event
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{McpSession, RpcSession};
    use crate::protocol::{self, codes, methods};
    use serde_json::json;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    /// Minimal event-stream MCP server on a loopback port
    ///
    /// The GET stream announces a relative endpoint; every POST is recorded
    /// and answered either on the stream or, with `reply_in_body`, as the
    /// POST's own JSON body.
    struct EventStreamServer {
        addr: SocketAddr,
        posted: Arc<StdMutex<Vec<String>>>,
        accept: JoinHandle<()>,
    }

    struct Hub {
        reply_in_body: bool,
        posted: Arc<StdMutex<Vec<String>>>,
        events_tx: mpsc::UnboundedSender<String>,
        events_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    }

    impl EventStreamServer {
        async fn start(reply_in_body: bool) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let posted = Arc::new(StdMutex::new(Vec::new()));
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let hub = Arc::new(Hub {
                reply_in_body,
                posted: posted.clone(),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
            });

            let accept = tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    tokio::spawn(serve_connection(socket, hub.clone()));
                }
            });

            Self {
                addr,
                posted,
                accept,
            }
        }

        fn url(&self) -> String {
            format!("http://{}/mcp/sse", self.addr)
        }

        fn posted(&self) -> Vec<String> {
            self.posted.lock().unwrap().clone()
        }
    }

    impl Drop for EventStreamServer {
        fn drop(&mut self) {
            self.accept.abort();
        }
    }

    fn answer(message: &Value) -> Option<Value> {
        let id = message.get("id")?.clone();
        let method = message["method"].as_str().unwrap_or_default();
        Some(match method {
            methods::INITIALIZE => protocol::success_response(
                id,
                json!({
                    "protocolVersion": protocol::PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "sse-calc", "version": "1.0.0"}
                }),
            ),
            methods::TOOLS_LIST => protocol::success_response(
                id,
                json!({"tools": [{"name": "add", "inputSchema": {"type": "object"}}]}),
            ),
            methods::TOOLS_CALL => protocol::success_response(
                id,
                json!({"content": [{"type": "text", "text": "8"}]}),
            ),
            other => protocol::error_response(id, codes::METHOD_NOT_FOUND, other),
        })
    }

    async fn serve_connection(socket: TcpStream, hub: Arc<Hub>) -> std::io::Result<()> {
        let (read, mut write) = socket.into_split();
        let mut reader = BufReader::new(read);

        loop {
            let mut request_line = String::new();
            if reader.read_line(&mut request_line).await? == 0 {
                return Ok(());
            }
            let mut parts = request_line.split_whitespace();
            let method = parts.next().unwrap_or_default().to_string();
            let path = parts.next().unwrap_or_default().to_string();

            let mut content_length = 0;
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).await?;
                let header = header.trim_end();
                if header.is_empty() {
                    break;
                }
                if let Some((name, value)) = header.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                }
            }
            let mut body = vec![0; content_length];
            reader.read_exact(&mut body).await?;

            if method == "GET" {
                write
                    .write_all(
                        b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\n\
                          Cache-Control: no-cache\r\nConnection: close\r\n\r\n",
                    )
                    .await?;
                write
                    .write_all(b": hello\n\nevent: endpoint\ndata: messages?sessionId=abc\n\n")
                    .await?;
                write.flush().await?;

                let Some(mut events) = hub.events_rx.lock().await.take() else {
                    return Ok(());
                };
                while let Some(frame) = events.recv().await {
                    write.write_all(frame.as_bytes()).await?;
                    write.flush().await?;
                }
                return Ok(());
            }

            hub.posted.lock().unwrap().push(path);
            let message: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

            let response = match answer(&message) {
                Some(reply) if hub.reply_in_body => {
                    let reply = reply.to_string();
                    format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
                         Content-Length: {}\r\n\r\n{reply}",
                        reply.len()
                    )
                }
                reply => {
                    if let Some(reply) = reply {
                        let _ = hub.events_tx.send(format!("event: message\ndata: {reply}\n\n"));
                    }
                    "HTTP/1.1 202 Accepted\r\nContent-Length: 0\r\n\r\n".to_string()
                }
            };
            write.write_all(response.as_bytes()).await?;
            write.flush().await?;
        }
    }

    fn add_arguments() -> serde_json::Map<String, Value> {
        json!({"a": 5, "b": 3}).as_object().cloned().unwrap()
    }

    #[test]
    fn test_decoder_endpoint_and_message() {
        let mut decoder = SseDecoder::default();
        let events = decoder.feed(
            b"event: endpoint\ndata: /messages?sessionId=abc\n\nevent: message\ndata: {\"id\":1}\n\n",
        );
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: "endpoint".to_string(),
                    data: "/messages?sessionId=abc".to_string()
                },
                SseEvent {
                    event: "message".to_string(),
                    data: "{\"id\":1}".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_decoder_split_chunks_and_crlf() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(b"data: {\"a\":").is_empty());
        assert!(decoder.feed(b" 1}\r\n").is_empty());
        let events = decoder.feed(b"\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "{\"a\": 1}");
    }

    #[test]
    fn test_decoder_multiline_data_and_comments() {
        let mut decoder = SseDecoder::default();
        let events = decoder.feed(b": keep-alive\n\ndata: line one\ndata: line two\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn test_decoder_split_multibyte_character() {
        let mut decoder = SseDecoder::default();
        let bytes = "data: héllo\n\n".as_bytes();
        let (first, second) = bytes.split_at(8); // inside 'é'
        assert!(decoder.feed(first).is_empty());
        let events = decoder.feed(second);
        assert_eq!(events[0].data, "héllo");
    }

    #[test]
    fn test_new_rejects_bad_url() {
        assert!(matches!(
            StreamTransport::new(StreamSpec::new("::nope::")),
            Err(MCPError::Configuration(_))
        ));
    }

    #[test]
    fn test_stream_headers_respect_impl_choice() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer token123".to_string());

        let mut spec = StreamSpec::new("http://localhost:8080/sse");
        spec.headers = headers;

        let native = StreamTransport::new(spec.clone()).unwrap();
        let stream_headers = native.stream_headers().unwrap();
        assert_eq!(stream_headers.get(ACCEPT).unwrap(), "text/event-stream");
        assert!(stream_headers.get("Authorization").is_none());
        assert_eq!(
            native.build_headers().unwrap().get("Authorization").unwrap(),
            "Bearer token123"
        );

        spec.use_alternate_stream_impl = true;
        let alternate = StreamTransport::new(spec).unwrap();
        assert_eq!(
            alternate.stream_headers().unwrap().get("Authorization").unwrap(),
            "Bearer token123"
        );
    }

    #[test]
    fn test_invalid_header_is_configuration_error() {
        let mut spec = StreamSpec::new("http://localhost:8080/sse");
        spec.headers.insert("bad header".to_string(), "v".to_string());
        let transport = StreamTransport::new(spec).unwrap();
        assert!(matches!(
            transport.build_headers(),
            Err(MCPError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_open_unreachable_server_fails() {
        // port 9 (discard) is essentially never serving HTTP
        let transport = StreamTransport::new(StreamSpec::new("http://127.0.0.1:9/sse")).unwrap();
        assert!(matches!(
            transport.open().await,
            Err(MCPError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let transport = StreamTransport::new(StreamSpec::new("http://127.0.0.1:9/sse")).unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert_eq!(transport.state(), TransportState::Closed);
        assert!(transport.receive().await.is_none());
    }

    #[tokio::test]
    async fn test_session_over_event_stream() {
        let server = EventStreamServer::start(false).await;
        let transport = Arc::new(StreamTransport::new(StreamSpec::new(server.url())).unwrap());

        let session = tokio::time::timeout(
            Duration::from_secs(5),
            RpcSession::connect(transport.clone()),
        )
        .await
        .expect("handshake timed out")
        .unwrap();
        assert_eq!(session.server_info().unwrap().name, "sse-calc");

        let tools = session.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "add");

        let result = session.call_tool("add", add_arguments()).await.unwrap();
        assert_eq!(result.content[0]["text"], "8");

        // initialize, initialized, tools/list, tools/call
        let posted = server.posted();
        assert_eq!(posted.len(), 4);
        assert!(posted.iter().all(|path| path == "/mcp/messages?sessionId=abc"));

        session.close().await.unwrap();
        assert_eq!(transport.state(), TransportState::Closed);
    }

    #[tokio::test]
    async fn test_json_post_body_is_accepted() {
        let server = EventStreamServer::start(true).await;
        let transport = Arc::new(StreamTransport::new(StreamSpec::new(server.url())).unwrap());

        let session = tokio::time::timeout(
            Duration::from_secs(5),
            RpcSession::connect(transport.clone()),
        )
        .await
        .expect("handshake timed out")
        .unwrap();
        assert_eq!(session.server_info().unwrap().name, "sse-calc");

        let result = session.call_tool("add", add_arguments()).await.unwrap();
        assert_eq!(result.content[0]["text"], "8");
        assert_eq!(server.posted().len(), 3);

        session.close().await.unwrap();
        assert_eq!(transport.state(), TransportState::Closed);
    }
}
