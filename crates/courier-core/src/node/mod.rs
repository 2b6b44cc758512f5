//! The courier node
//!
//! A [`Node`] owns the routing and content keystores, the channel-key
//! cache, a [`Store`] handle, a [`Router`], and the set of registered
//! connection policies. It exposes the whole public surface: the send
//! family and admin CRUD ([`admin`]), the pickup/dropoff sync protocol
//! ([`sync`]), and the RPC verb dispatch ([`rpc`]).

mod admin;
mod rpc_impl;
mod sync;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::errors::{CourierError, Result};
use crate::frame;
use crate::keystore::{Decrypted, Keystore};
use crate::outbox::Store;
use crate::policy::Policy;
use crate::router::Router;
use crate::types::{now_ns, Msg, PublicKey};

/// Name attached to unicast messages delivered via the content key.
pub const CONTENT_NAME: &str = "[content]";

/// Capacity of the `Out` delivery queue. Delivery is `try_send`: when the
/// queue is full the message is dropped.
const OUT_BUFFER: usize = 64;

/// Capacity of the `In` submission queue.
const IN_BUFFER: usize = 64;

/// Capacity of the error side-channel.
const ERR_BUFFER: usize = 16;

// ----------------------------------------------------------------------------
// Node
// ----------------------------------------------------------------------------

/// A store-and-forward mesh node.
pub struct Node {
    routing_key: Box<dyn Keystore>,
    content_key: RwLock<Box<dyn Keystore>>,
    channel_keys: RwLock<HashMap<String, Box<dyn Keystore>>>,
    store: Arc<dyn Store>,
    router: RwLock<Arc<dyn Router>>,
    policies: Mutex<Vec<Arc<dyn Policy>>>,

    running: AtomicBool,
    shutdown: Notify,

    out_tx: mpsc::Sender<Msg>,
    out_rx: Mutex<Option<mpsc::Receiver<Msg>>>,
    in_tx: mpsc::Sender<Msg>,
    in_rx: Mutex<Option<mpsc::Receiver<Msg>>>,
    err_tx: mpsc::Sender<CourierError>,
    err_rx: Mutex<Option<mpsc::Receiver<CourierError>>>,
}

impl Node {
    /// Build a node and warm its channel-key cache from the store.
    pub fn new(
        routing_key: Box<dyn Keystore>,
        content_key: Box<dyn Keystore>,
        store: Arc<dyn Store>,
        router: Arc<dyn Router>,
    ) -> Result<Arc<Self>> {
        let (out_tx, out_rx) = mpsc::channel(OUT_BUFFER);
        let (in_tx, in_rx) = mpsc::channel(IN_BUFFER);
        let (err_tx, err_rx) = mpsc::channel(ERR_BUFFER);

        let node = Arc::new(Self {
            routing_key,
            content_key: RwLock::new(content_key),
            channel_keys: RwLock::new(HashMap::new()),
            store,
            router: RwLock::new(router),
            policies: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
            out_tx,
            out_rx: Mutex::new(Some(out_rx)),
            in_tx,
            in_rx: Mutex::new(Some(in_rx)),
            err_tx,
            err_rx: Mutex::new(Some(err_rx)),
        });
        node.refresh_channels()?;
        Ok(node)
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    /// The routing key: this node's identity for bundle envelopes.
    pub fn id(&self) -> PublicKey {
        self.routing_key.public_key()
    }

    /// The content key: this node's current identity for unicast receive.
    pub fn cid(&self) -> PublicKey {
        self.content_key
            .read()
            .expect("content key lock poisoned")
            .public_key()
    }

    pub(crate) fn routing_key(&self) -> &dyn Keystore {
        self.routing_key.as_ref()
    }

    pub(crate) fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub(crate) fn content_key(&self) -> &RwLock<Box<dyn Keystore>> {
        &self.content_key
    }

    // ------------------------------------------------------------------
    // Handle & Forward
    // ------------------------------------------------------------------

    /// Decrypt a framed body and deliver the plaintext to the `Out` queue.
    ///
    /// Returns `Ok(false)` when the quick tag does not match — the message
    /// is simply not for this key, which is the common case on a relay.
    /// A non-empty channel name with no cached key is an error. Delivery
    /// is non-blocking: with no ready consumer the message is dropped.
    pub fn handle(&self, channel_name: &str, body: &[u8]) -> Result<bool> {
        let decrypted = if !channel_name.is_empty() {
            let keys = self
                .channel_keys
                .read()
                .expect("channel key cache lock poisoned");
            let key = keys
                .get(channel_name)
                .ok_or_else(|| CourierError::UnknownChannel(channel_name.to_string()))?;
            key.decrypt(body)?
        } else {
            self.content_key
                .read()
                .expect("content key lock poisoned")
                .decrypt(body)?
        };

        let clear = match decrypted {
            Decrypted::Miss => return Ok(false),
            Decrypted::Hit(clear) => clear,
        };

        let msg = if channel_name.is_empty() {
            Msg::new(CONTENT_NAME, clear)
        } else {
            Msg::channel(channel_name, clear)
        };
        if self.out_tx.try_send(msg).is_err() {
            debug!("out queue not ready, dropping delivered message");
        }
        Ok(true)
    }

    /// Re-enqueue an already-encrypted body for onward delivery, restoring
    /// the channel prefix. Identical `(channel, message)` rows are
    /// deduplicated by the store.
    pub fn forward(&self, channel_name: &str, body: &[u8]) -> Result<()> {
        let framed = frame::encode(channel_name, body);
        self.store
            .outbox_enqueue(channel_name, &framed, now_ns(), true)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Channel-Key Cache
    // ------------------------------------------------------------------

    /// Rebuild the in-memory channel-key cache from the store. Called at
    /// construction and after channel add/delete. Unparseable key material
    /// is skipped with a warning rather than poisoning the whole cache.
    pub fn refresh_channels(&self) -> Result<()> {
        let channels = self.store.channels()?;
        let template = self
            .content_key
            .read()
            .expect("content key lock poisoned")
            .clone_keystore();

        let mut cache: HashMap<String, Box<dyn Keystore>> =
            HashMap::with_capacity(channels.len());
        for (name, privkey) in channels {
            let mut key = template.clone_keystore();
            if let Err(err) = key.from_b64(&privkey) {
                warn!(channel = %name, %err, "skipping channel with bad key material");
                continue;
            }
            cache.insert(name, key);
        }
        *self
            .channel_keys
            .write()
            .expect("channel key cache lock poisoned") = cache;
        Ok(())
    }

    pub(crate) fn channel_pubkey(&self, channel_name: &str) -> Option<PublicKey> {
        self.channel_keys
            .read()
            .expect("channel key cache lock poisoned")
            .get(channel_name)
            .map(|key| key.public_key())
    }

    // ------------------------------------------------------------------
    // Router & Policies
    // ------------------------------------------------------------------

    pub fn router(&self) -> Arc<dyn Router> {
        self.router.read().expect("router lock poisoned").clone()
    }

    pub fn set_router(&self, router: Arc<dyn Router>) {
        *self.router.write().expect("router lock poisoned") = router;
    }

    pub fn add_policy(&self, policy: Arc<dyn Policy>) {
        self.policies
            .lock()
            .expect("policy list lock poisoned")
            .push(policy);
    }

    pub fn policies(&self) -> Vec<Arc<dyn Policy>> {
        self.policies
            .lock()
            .expect("policy list lock poisoned")
            .clone()
    }

    // ------------------------------------------------------------------
    // Channels to the Embedding Application
    // ------------------------------------------------------------------

    /// Take the delivery queue. Decrypted messages arrive here; when the
    /// queue is full further messages are dropped, not queued.
    pub fn take_out(&self) -> Option<mpsc::Receiver<Msg>> {
        self.out_rx.lock().expect("out receiver lock poisoned").take()
    }

    /// Sender half of the submission queue drained by the input loop.
    pub fn input(&self) -> mpsc::Sender<Msg> {
        self.in_tx.clone()
    }

    /// Take the error side-channel. Failures inside background loops are
    /// reported here; the owner decides whether to stop the node.
    pub fn take_err(&self) -> Option<mpsc::Receiver<CourierError>> {
        self.err_rx.lock().expect("err receiver lock poisoned").take()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start the input loop and all registered policies. Idempotent while
    /// running. The input loop is claimed on first start; a node restarted
    /// after [`stop`](Node::stop) keeps serving everything except `In`.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let taken = self.in_rx.lock().expect("in receiver lock poisoned").take();
        if let Some(mut in_rx) = taken {
            let node = Arc::clone(self);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = node.shutdown.notified() => break,
                        maybe = in_rx.recv() => {
                            let Some(msg) = maybe else { break };
                            let result = if msg.is_chan {
                                node.send_channel(&msg.name, &msg.content, msg.pubkey)
                            } else {
                                node.send(&msg.name, &msg.content, msg.pubkey)
                            };
                            if let Err(err) = result {
                                error!(%err, "input loop send failed");
                                let _ = node.err_tx.try_send(err);
                            }
                        }
                    }
                    if !node.running.load(Ordering::SeqCst) {
                        break;
                    }
                }
            });
        }

        for policy in self.policies() {
            policy.run_policy()?;
        }
        Ok(())
    }

    /// Stop the input loop and all policies, waiting for their workers.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_waiters();
        for policy in self.policies() {
            policy.stop().await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Submit a message for transmission, dispatching on its channel flag.
    pub fn send_msg(&self, msg: &Msg) -> Result<()> {
        if msg.is_chan {
            self.send_channel(&msg.name, &msg.content, msg.pubkey)
        } else {
            self.send(&msg.name, &msg.content, msg.pubkey)
        }
    }

    /// Drop outbox rows older than `age_seconds`.
    pub fn flush_outbox(&self, age_seconds: u64) -> Result<()> {
        self.store.flush_outbox(age_seconds)?;
        Ok(())
    }
}
