//! Request and response value types
//!
//! A [`Request`] is constructed for every decoded frame and carries the
//! routing `type`, the client's correlation `cookie`, the JSON payload, and
//! an [`Emitter`] through which progress/message frames tied to the request
//! are pushed onto the outbound queue. The matching [`Response`] is tagged
//! reply-or-error and rejects payloads that would collide with the envelope.

use serde_json::{json, Map, Value};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::error;

/// Envelope and payload key vocabulary.
pub mod keys {
    pub const TYPE_KEY: &str = "type";
    pub const COOKIE_KEY: &str = "cookie";
    pub const REPLY_TO_KEY: &str = "inReplyTo";
    pub const ERROR_MESSAGE_KEY: &str = "errorMessage";

    pub const REPLY_TYPE: &str = "reply";
    pub const ERROR_TYPE: &str = "error";
    pub const PROGRESS_TYPE: &str = "progress";
    pub const MESSAGE_TYPE: &str = "message";
    pub const SIGNAL_TYPE: &str = "signal";
    pub const HELLO_TYPE: &str = "hello";
    pub const HANDSHAKE_TYPE: &str = "handshake";

    pub const BUILD_DIRECTORY_KEY: &str = "buildDirectory";
    pub const SOURCE_DIRECTORY_KEY: &str = "sourceDirectory";
    pub const GENERATOR_KEY: &str = "generator";
    pub const EXTRA_GENERATOR_KEY: &str = "extraGenerator";
    pub const CACHE_ARGUMENTS_KEY: &str = "cacheArguments";
    pub const PROTOCOL_VERSION_KEY: &str = "protocolVersion";
    pub const SUPPORTED_PROTOCOL_VERSIONS_KEY: &str = "supportedProtocolVersions";
    pub const MAJOR_KEY: &str = "major";
    pub const MINOR_KEY: &str = "minor";
    pub const EXPERIMENTAL_KEY: &str = "experimental";

    pub const PROGRESS_MESSAGE_KEY: &str = "progressMessage";
    pub const PROGRESS_MINIMUM_KEY: &str = "progressMinimum";
    pub const PROGRESS_MAXIMUM_KEY: &str = "progressMaximum";
    pub const PROGRESS_CURRENT_KEY: &str = "progressCurrent";

    pub const MESSAGE_KEY: &str = "message";
    pub const TITLE_KEY: &str = "title";
    pub const NAME_KEY: &str = "name";

    pub const DEBUG_KEY: &str = "debug";
    pub const SHOW_STATS_KEY: &str = "showStats";
    pub const DUMP_TO_FILE_KEY: &str = "dumpToFile";
    pub const ZZZ_DEBUG_KEY: &str = "zzzDebug";
}

/// Handle for pushing server-initiated frames onto the outbound queue.
///
/// Cloneable; every clone feeds the same serialized write path, so frame
/// order is the order of `send` calls.
#[derive(Clone)]
pub struct Emitter {
    tx: mpsc::UnboundedSender<Value>,
}

impl Emitter {
    pub fn new(tx: mpsc::UnboundedSender<Value>) -> Self {
        Self { tx }
    }

    /// Queue a fully-formed frame for writing.
    pub fn send(&self, frame: Value) {
        // The receiver lives as long as the event loop; a failed send only
        // happens during shutdown, when the frame is moot anyway.
        let _ = self.tx.send(frame);
    }

    /// Queue a `signal` frame. Signals are unsolicited: empty cookie,
    /// empty inReplyTo.
    pub fn signal(&self, name: &str, mut payload: Map<String, Value>) {
        payload.insert(keys::TYPE_KEY.into(), keys::SIGNAL_TYPE.into());
        payload.insert(keys::COOKIE_KEY.into(), "".into());
        payload.insert(keys::REPLY_TO_KEY.into(), "".into());
        payload.insert(keys::NAME_KEY.into(), name.into());
        self.send(Value::Object(payload));
    }
}

/// A decoded client request.
pub struct Request {
    pub ty: String,
    pub cookie: String,
    pub data: Value,
    /// When the frame was decoded; feeds the debug annex timing.
    pub received: Instant,
    emitter: Emitter,
}

impl Request {
    pub fn new(emitter: Emitter, ty: String, cookie: String, data: Value) -> Self {
        Self {
            ty,
            cookie,
            data,
            received: Instant::now(),
            emitter,
        }
    }

    /// Construct a reply response carrying `data`.
    pub fn reply(&self, data: Value) -> Response {
        let mut response = Response::new(self);
        response.set_data(data);
        response
    }

    /// Construct an error response.
    pub fn report_error(&self, message: impl Into<String>) -> Response {
        let mut response = Response::new(self);
        response.set_error(message);
        response
    }

    /// Emit a `progress` frame tied to this request.
    pub fn report_progress(&self, min: i64, current: i64, max: i64, message: &str) {
        debug_assert!(min <= current && current <= max);
        debug_assert!(!message.is_empty());

        self.emitter.send(json!({
            (keys::TYPE_KEY): keys::PROGRESS_TYPE,
            (keys::REPLY_TO_KEY): self.ty,
            (keys::COOKIE_KEY): self.cookie,
            (keys::PROGRESS_MESSAGE_KEY): message,
            (keys::PROGRESS_MINIMUM_KEY): min,
            (keys::PROGRESS_MAXIMUM_KEY): max,
            (keys::PROGRESS_CURRENT_KEY): current,
        }));
    }

    /// Emit a `message` frame tied to this request.
    pub fn report_message(&self, text: &str, title: &str) {
        self.emitter.send(json!({
            (keys::TYPE_KEY): keys::MESSAGE_TYPE,
            (keys::REPLY_TO_KEY): self.ty,
            (keys::COOKIE_KEY): self.cookie,
            (keys::MESSAGE_KEY): text,
            (keys::TITLE_KEY): title,
        }));
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Payload {
    Data(Value),
    Error(String),
}

/// The terminal frame for a request, tagged reply-or-error.
#[derive(Debug)]
pub struct Response {
    pub ty: String,
    pub cookie: String,
    payload: Option<Payload>,
}

impl Response {
    pub fn new(request: &Request) -> Self {
        Self {
            ty: request.ty.clone(),
            cookie: request.cookie.clone(),
            payload: None,
        }
    }

    /// Set the reply payload.
    ///
    /// A payload carrying top-level `type` or `cookie` keys would collide
    /// with the envelope; such a payload converts the response into an
    /// internal error.
    pub fn set_data(&mut self, data: Value) {
        debug_assert!(self.payload.is_none());
        if let Some(object) = data.as_object() {
            if object.contains_key(keys::TYPE_KEY) || object.contains_key(keys::COOKIE_KEY) {
                self.payload = Some(Payload::Error(
                    "Response contains cookie or type field.".to_string(),
                ));
                return;
            }
        }
        self.payload = Some(Payload::Data(data));
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        debug_assert!(self.payload.is_none());
        self.payload = Some(Payload::Error(message.into()));
    }

    pub fn is_complete(&self) -> bool {
        self.payload.is_some()
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, Some(Payload::Error(_)))
    }

    /// Produce the wire frame: the payload plus envelope keys.
    ///
    /// An incomplete response is a server bug; it degrades to an error
    /// frame rather than tearing down the session.
    pub fn into_frame(self) -> Value {
        let (mut object, error) = match self.payload {
            Some(Payload::Data(Value::Object(map))) => (map, None),
            Some(Payload::Data(other)) => {
                // Non-object reply payloads are wrapped to keep the
                // envelope an object.
                let mut map = Map::new();
                map.insert("data".into(), other);
                (map, None)
            }
            Some(Payload::Error(message)) => (Map::new(), Some(message)),
            None => {
                error!("Incomplete response for type {:?}", self.ty);
                (Map::new(), Some("Internal error: incomplete response.".into()))
            }
        };

        object.insert(keys::COOKIE_KEY.into(), self.cookie.into());
        object.insert(keys::REPLY_TO_KEY.into(), self.ty.into());
        match error {
            Some(message) => {
                object.insert(keys::TYPE_KEY.into(), keys::ERROR_TYPE.into());
                object.insert(keys::ERROR_MESSAGE_KEY.into(), message.into());
            }
            None => {
                object.insert(keys::TYPE_KEY.into(), keys::REPLY_TYPE.into());
            }
        }
        Value::Object(object)
    }
}

/// Attach the `zzzDebug` annex to an outgoing frame and honour a
/// `dumpToFile` request. Only called when the server runs with `--debug`.
pub fn apply_debug_annex(frame: &mut Value, debug_request: &Value, received: Instant) {
    let show_stats = debug_request
        .get(keys::SHOW_STATS_KEY)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let dump_to_file = debug_request
        .get(keys::DUMP_TO_FILE_KEY)
        .and_then(Value::as_str)
        .map(str::to_string);

    if !show_stats && dump_to_file.is_none() {
        return;
    }

    let serialize_start = Instant::now();
    let serialized = frame.to_string();
    let serialization_ms = serialize_start.elapsed().as_secs_f64() * 1000.0;

    if let Some(path) = dump_to_file {
        if let Err(e) = std::fs::write(&path, &serialized) {
            error!("Failed to dump response to {path:?}: {e}");
        }
    }

    if show_stats {
        if let Some(object) = frame.as_object_mut() {
            object.insert(
                keys::ZZZ_DEBUG_KEY.into(),
                json!({
                    "jsonSerialization": serialization_ms,
                    "totalTime": received.elapsed().as_secs_f64() * 1000.0,
                    "size": serialized.len(),
                }),
            );
        }
    }
}
