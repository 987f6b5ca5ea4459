//! Protocol abstraction and version registry
//!
//! A protocol owns everything behind the handshake: activation
//! prerequisites, the command set, and per-session state. The registry
//! holds every supported protocol and implements version matching for the
//! handshake and the `hello` enumeration.

pub mod v1;

use crate::monitor::PathEvent;
use crate::server::message::{keys, Request, Response};
use serde_json::{json, Value};

/// A protocol version as advertised in `hello` and requested in
/// `handshake`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: i64,
    pub minor: i64,
}

impl ProtocolVersion {
    pub const fn new(major: i64, minor: i64) -> Self {
        Self { major, minor }
    }
}

/// Capability set every protocol implements.
pub trait Protocol: Send {
    fn version(&self) -> ProtocolVersion;

    /// Experimental protocols are hidden from discovery and selection
    /// unless the server runs with `--experimental`.
    fn is_experimental(&self) -> bool {
        false
    }

    /// Validate handshake prerequisites and bind session resources.
    /// On `Err` the binding is discarded and the session stays unbound.
    fn activate(&mut self, request: &Request) -> Result<(), String>;

    /// Handle one request, producing exactly one terminal response.
    fn process(&mut self, request: &Request) -> Response;

    /// A watched path changed on disk. Marshalled onto the event-loop
    /// thread before delivery.
    fn on_path_event(&mut self, _event: &PathEvent) {}
}

/// Ordered set of supported protocols.
pub struct ProtocolRegistry {
    protocols: Vec<Box<dyn Protocol>>,
    experimental_enabled: bool,
}

impl ProtocolRegistry {
    pub fn new(experimental_enabled: bool) -> Self {
        Self {
            protocols: Vec::new(),
            experimental_enabled,
        }
    }

    /// Register a protocol. Idempotent over `(major, minor)`: a duplicate
    /// version is ignored.
    pub fn register(&mut self, protocol: Box<dyn Protocol>) {
        let version = protocol.version();
        debug_assert!(version.major >= 0);
        debug_assert!(version.minor >= 0);
        if self.protocols.iter().any(|p| p.version() == version) {
            return;
        }
        self.protocols.push(protocol);
    }

    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }

    fn selectable(&self, protocol: &dyn Protocol) -> bool {
        self.experimental_enabled || !protocol.is_experimental()
    }

    /// Best-match lookup: the exact `(major, minor)` if registered, else
    /// the highest-minor protocol with that major when `minor` is unset
    /// (negative), else none.
    pub fn find_matching(&self, major: i64, minor: i64) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (index, protocol) in self.protocols.iter().enumerate() {
            if !self.selectable(protocol.as_ref()) {
                continue;
            }
            let version = protocol.version();
            if version.major != major {
                continue;
            }
            if version.minor == minor {
                return Some(index);
            }
            match best {
                Some(b) if self.protocols[b].version().minor >= version.minor => {}
                _ => best = Some(index),
            }
        }
        if minor < 0 {
            best
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, index: usize) -> &mut dyn Protocol {
        self.protocols[index].as_mut()
    }

    /// The `supportedProtocolVersions` array for the `hello` greeting.
    pub fn hello_versions(&self) -> Value {
        let versions: Vec<Value> = self
            .protocols
            .iter()
            .filter(|p| self.selectable(p.as_ref()))
            .map(|p| {
                let version = p.version();
                json!({
                    (keys::MAJOR_KEY): version.major,
                    (keys::MINOR_KEY): version.minor,
                    (keys::EXPERIMENTAL_KEY): p.is_experimental(),
                })
            })
            .collect();
        Value::Array(versions)
    }
}
