//! Transport seam and the bundled in-process implementation
//!
//! The core needs very little from a transport: its byte limit (consumed
//! by the chunking codec) and the RPC used by policies. Listening and
//! client plumbing — TLS, sockets, retries — belong to transport crates.
//!
//! [`MemoryTransport`] wires nodes together through a shared [`MemoryHub`]
//! without any I/O, which is what the integration tests and the poll
//! policy round-trip run on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{Result, TransportError};
use crate::node::Node;
use crate::rpc::RemoteCall;

// ----------------------------------------------------------------------------
// Transport Trait
// ----------------------------------------------------------------------------

/// Moves opaque RPC envelopes between nodes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// This transport's common name, unique among registered transports.
    fn name(&self) -> &'static str;

    /// Largest message this transport can carry in one piece.
    fn byte_limit(&self) -> u32;

    /// Invoke a verb on the node listening at `uri`.
    async fn rpc(&self, uri: &str, call: RemoteCall) -> Result<Value>;

    /// Serve the owning node at `addr`. Admin mode exposes the full verb
    /// surface instead of the public one.
    fn listen(&self, addr: &str, admin_mode: bool) -> Result<()>;

    /// Stop serving.
    fn stop(&self);
}

// ----------------------------------------------------------------------------
// Memory Transport
// ----------------------------------------------------------------------------

struct Endpoint {
    node: Weak<Node>,
    admin: bool,
}

/// The shared address space of a set of in-process nodes.
#[derive(Clone, Default)]
pub struct MemoryHub {
    endpoints: Arc<Mutex<HashMap<String, Endpoint>>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, addr: &str, node: Weak<Node>, admin: bool) {
        self.endpoints
            .lock()
            .expect("hub lock poisoned")
            .insert(addr.to_string(), Endpoint { node, admin });
    }

    fn unregister(&self, addr: &str) {
        self.endpoints
            .lock()
            .expect("hub lock poisoned")
            .remove(addr);
    }

    fn dispatch(&self, uri: &str, call: RemoteCall) -> Result<Value> {
        let (node, admin) = {
            let endpoints = self.endpoints.lock().expect("hub lock poisoned");
            let endpoint = endpoints.get(uri).ok_or_else(|| TransportError::Unreachable {
                uri: uri.to_string(),
            })?;
            let node = endpoint.node.upgrade().ok_or_else(|| {
                TransportError::Unreachable {
                    uri: uri.to_string(),
                }
            })?;
            (node, endpoint.admin)
        };
        let result = if admin {
            node.admin_rpc(call)
        } else {
            node.public_rpc(call)
        };
        result.map_err(|err| {
            TransportError::Remote {
                message: err.to_string(),
            }
            .into()
        })
    }
}

/// Default byte limit of the memory transport, matching the chunking
/// codec's 64 KiB cap so it never lowers the mesh-wide chunk size.
pub const MEMORY_BYTE_LIMIT: u32 = 64 * 1024;

/// An in-process transport for one node on a [`MemoryHub`].
pub struct MemoryTransport {
    hub: MemoryHub,
    node: Weak<Node>,
    byte_limit: u32,
    bound: Mutex<Vec<String>>,
}

impl MemoryTransport {
    pub fn new(hub: MemoryHub, node: &Arc<Node>) -> Arc<Self> {
        Self::with_byte_limit(hub, node, MEMORY_BYTE_LIMIT)
    }

    pub fn with_byte_limit(hub: MemoryHub, node: &Arc<Node>, byte_limit: u32) -> Arc<Self> {
        Arc::new(Self {
            hub,
            node: Arc::downgrade(node),
            byte_limit,
            bound: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn byte_limit(&self) -> u32 {
        self.byte_limit
    }

    async fn rpc(&self, uri: &str, call: RemoteCall) -> Result<Value> {
        self.hub.dispatch(uri, call)
    }

    fn listen(&self, addr: &str, admin_mode: bool) -> Result<()> {
        self.hub.register(addr, self.node.clone(), admin_mode);
        self.bound
            .lock()
            .expect("bound list lock poisoned")
            .push(addr.to_string());
        Ok(())
    }

    fn stop(&self) {
        let bound: Vec<String> = self
            .bound
            .lock()
            .expect("bound list lock poisoned")
            .drain(..)
            .collect();
        for addr in bound {
            self.hub.unregister(&addr);
        }
    }
}
