//! Server session: event loop, handshake, request dispatch
//!
//! One `Server` per process lifetime. It greets the client with `hello`,
//! then decodes frames off the transport and routes each request either to
//! the handshake handler (while no protocol is bound) or to the bound
//! protocol. All outbound frames funnel through a single queue drained to
//! the transport, which preserves arrival order end-to-end.

pub mod framing;
pub mod message;
pub mod transport;

use crate::monitor::PathEvent;
use crate::protocol::ProtocolRegistry;
use framing::FrameDecoder;
use message::{apply_debug_annex, keys, Emitter, Request, Response};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};
use transport::Transport;

/// Startup options from the CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerConfig {
    /// Expose experimental protocols in discovery and selection.
    pub experimental: bool,
    /// Honour the per-request debug annex.
    pub debug: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError<E: std::error::Error + Send + Sync + 'static> {
    #[error("Transport error: {0}")]
    Transport(E),
}

pub struct Server<T: Transport> {
    transport: T,
    decoder: FrameDecoder,
    registry: ProtocolRegistry,
    /// Index into the registry of the protocol bound by the handshake.
    bound: Option<usize>,
    config: ServerConfig,
    emitter: Emitter,
    out_rx: mpsc::UnboundedReceiver<Value>,
    path_tx: mpsc::UnboundedSender<PathEvent>,
    path_rx: mpsc::UnboundedReceiver<PathEvent>,
}

enum LoopEvent<E> {
    Input(Result<Vec<u8>, E>),
    Path(Option<PathEvent>),
}

impl<T: Transport> Server<T> {
    pub fn new(transport: T, config: ServerConfig) -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (path_tx, path_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            decoder: FrameDecoder::new(),
            registry: ProtocolRegistry::new(config.experimental),
            bound: None,
            config,
            emitter: Emitter::new(out_tx),
            out_rx,
            path_tx,
            path_rx,
        }
    }

    pub fn register_protocol(&mut self, protocol: Box<dyn crate::protocol::Protocol>) {
        self.registry.register(protocol);
    }

    /// Handle for server-initiated frames (signals), for wiring protocols
    /// up before registration.
    pub fn signal_emitter(&self) -> Emitter {
        self.emitter.clone()
    }

    /// Sender half of the path-event channel; file monitors post here and
    /// the event loop delivers to the bound protocol.
    pub fn path_event_sender(&self) -> mpsc::UnboundedSender<PathEvent> {
        self.path_tx.clone()
    }

    /// Run the session until stdin EOF or a fatal transport error.
    pub async fn serve(mut self) -> Result<(), ServerError<T::Error>> {
        debug_assert!(!self.registry.is_empty());

        self.emitter.send(json!({
            (keys::TYPE_KEY): keys::HELLO_TYPE,
            (keys::SUPPORTED_PROTOCOL_VERSIONS_KEY): self.registry.hello_versions(),
        }));
        self.flush_outbound().await?;

        info!("Server ready, waiting for requests");

        loop {
            let event = tokio::select! {
                received = self.transport.receive() => LoopEvent::Input(received),
                event = self.path_rx.recv() => LoopEvent::Path(event),
            };

            match event {
                LoopEvent::Input(Ok(data)) => {
                    let payloads = self.decoder.feed(&data);
                    for payload in payloads {
                        self.dispatch(&payload);
                        self.flush_outbound().await?;
                    }
                }
                LoopEvent::Input(Err(_)) => {
                    // EOF or closed stream: clean shutdown.
                    debug!("Input stream closed, shutting down");
                    break;
                }
                LoopEvent::Path(Some(event)) => {
                    if let Some(index) = self.bound {
                        self.registry.get_mut(index).on_path_event(&event);
                    }
                    self.flush_outbound().await?;
                }
                LoopEvent::Path(None) => {}
            }
        }

        self.flush_outbound().await?;
        let _ = self.transport.close().await;
        Ok(())
    }

    /// Drain the outbound queue to the transport, preserving queue order.
    async fn flush_outbound(&mut self) -> Result<(), ServerError<T::Error>> {
        while let Ok(frame) = self.out_rx.try_recv() {
            let encoded = framing::encode(&frame.to_string());
            trace!("Writing frame: {}", frame);
            self.transport
                .send(&encoded)
                .await
                .map_err(ServerError::Transport)?;
        }
        Ok(())
    }

    /// Parse one frame payload and route the request.
    fn dispatch(&mut self, payload: &str) {
        let value: Value = match serde_json::from_str::<Value>(payload) {
            Ok(value) if value.is_object() => value,
            _ => {
                self.write_parse_error("Failed to parse JSON input.");
                return;
            }
        };

        let ty = value[keys::TYPE_KEY].as_str().unwrap_or("").to_string();
        let cookie = value[keys::COOKIE_KEY].as_str().unwrap_or("").to_string();
        trace!("Dispatching request type={:?} cookie={:?}", ty, cookie);

        let request = Request::new(self.emitter.clone(), ty, cookie, value);
        let debug_request = self
            .config
            .debug
            .then(|| request.data.get(keys::DEBUG_KEY).cloned())
            .flatten()
            .filter(Value::is_object);
        let received = request.received;

        let response = if request.ty.is_empty() {
            request.report_error("No type given in request.")
        } else if let Some(index) = self.bound {
            self.registry.get_mut(index).process(&request)
        } else {
            self.handle_handshake(&request)
        };

        debug_assert!(response.is_complete());
        let mut frame = response.into_frame();
        if let Some(debug) = debug_request {
            apply_debug_annex(&mut frame, &debug, received);
        }
        self.emitter.send(frame);
    }

    /// Select and activate a protocol. The only command accepted while no
    /// protocol is bound.
    fn handle_handshake(&mut self, request: &Request) -> Response {
        if request.ty != keys::HANDSHAKE_TYPE {
            return request.report_error("Waiting for type \"handshake\".");
        }

        let requested = &request.data[keys::PROTOCOL_VERSION_KEY];
        if requested.is_null() {
            return request.report_error("\"protocolVersion\" is required for \"handshake\".");
        }
        if !requested.is_object() {
            return request.report_error("\"protocolVersion\" must be a JSON object.");
        }

        let major = match requested.get(keys::MAJOR_KEY) {
            Some(value) if value.is_i64() => value.as_i64().unwrap_or(-1),
            _ => return request.report_error("\"major\" must be set and an integer."),
        };
        let minor = match requested.get(keys::MINOR_KEY) {
            None | Some(Value::Null) => -1,
            Some(value) if value.is_i64() => value.as_i64().unwrap_or(-1),
            _ => return request.report_error("\"minor\" must be unset or an integer."),
        };
        if major < 0 {
            return request.report_error("\"major\" must be >= 0.");
        }
        if requested.get(keys::MINOR_KEY).map_or(false, Value::is_i64) && minor < 0 {
            return request.report_error("\"minor\" must be >= 0 when set.");
        }

        let Some(index) = self.registry.find_matching(major, minor) else {
            return request.report_error("Protocol version not supported.");
        };

        match self.registry.get_mut(index).activate(request) {
            Ok(()) => {
                self.bound = Some(index);
                info!("Protocol {:?} bound", self.registry.get_mut(index).version());
                request.reply(json!({}))
            }
            Err(message) => {
                // Binding discarded; the session stays unbound.
                request.report_error(message)
            }
        }
    }

    /// Server-initiated error frame for payloads that were not JSON
    /// objects; no cookie to echo.
    fn write_parse_error(&self, message: &str) {
        self.emitter.send(json!({
            (keys::TYPE_KEY): keys::ERROR_TYPE,
            (keys::ERROR_MESSAGE_KEY): message,
            (keys::REPLY_TO_KEY): "",
            (keys::COOKIE_KEY): "",
        }));
    }
}

// ============================================================================
// Tests
// ============================================================================
