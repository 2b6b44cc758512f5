//! Courier Core Protocol Implementation
//!
//! This crate is the headless engine of the courier store-and-forward
//! messaging overlay. A [`Node`] owns an outbound queue, accepts batches of
//! encrypted messages from remote peers, attempts decryption against its
//! locally-held channel and content keys, and re-broadcasts what it does not
//! consume. Messages are opaque blobs below the routing layer.
//!
//! ## Architecture Overview
//!
//! - [`frame`]: the outer wire frame (channel tag, quick tag, ciphertext)
//! - [`router`]: consume/forward policy matrix and loop detection
//! - [`node`]: the node itself — send/forward/handle, pickup/dropoff sync,
//!   admin surface, RPC verb dispatch
//! - [`chunking`]: stream segmentation for byte-limited transports
//! - [`policy`]: connection policies (periodic polling)
//! - [`keystore`], [`outbox`], [`transport`]: the collaborator seams, each
//!   with a bundled reference implementation
//!
//! Delivery of decrypted messages is non-blocking: if nothing is draining
//! the node's `Out` channel, messages are dropped. See [`Node::handle`].
//!
//! ## Usage Example
//!
//! ```rust
//! use std::sync::Arc;
//! use courier_core::{EcdhKeystore, Keystore, MemoryStore, Node};
//! use courier_core::router::DefaultRouter;
//!
//! # fn main() -> courier_core::Result<()> {
//! let node = Node::new(
//!     Box::new(EcdhKeystore::generate_new()),
//!     Box::new(EcdhKeystore::generate_new()),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(DefaultRouter::new()),
//! )?;
//!
//! let bob = EcdhKeystore::generate_new();
//! node.add_contact("bob", &bob.public_key().to_b64())?;
//! node.send("bob", b"hello", None)?;
//! # Ok(())
//! # }
//! ```

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod chunking;
pub mod config;
pub mod errors;
pub mod frame;
pub mod keystore;
pub mod node;
pub mod outbox;
pub mod policy;
pub mod recent;
pub mod router;
pub mod rpc;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use errors::{CourierError, CryptoError, Result, StoreError, TransportError};
pub use keystore::{Decrypted, EcdhKeystore, Keystore};
pub use node::Node;
pub use outbox::{MemoryStore, Store, PICKUP_BATCH_LIMIT};
pub use policy::{Policy, PollPolicy};
pub use router::{DefaultRouter, Router};
pub use rpc::{Action, RemoteCall};
pub use transport::{MemoryHub, MemoryTransport, Transport};
pub use types::{Bundle, Channel, Contact, Msg, OutboxRow, Patch, Peer, Profile, PublicKey};
