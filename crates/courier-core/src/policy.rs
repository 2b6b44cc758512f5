//! Connection policies
//!
//! A policy decides when to talk to which peers. [`PollPolicy`] is the
//! periodic one: every interval it runs a pickup/dropoff round with each
//! enabled peer of its group, keeping two cursors — one for traffic pulled
//! from the remote, one for traffic pushed from the local outbox.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::errors::{CourierError, Result};
use crate::node::Node;
use crate::rpc::{bundle_from_value, Action, RemoteCall};
use crate::transport::Transport;
use crate::types::PublicKey;

/// Poll iterations between outbox flushes.
const FLUSH_EVERY: u64 = 500;

/// Outbox retention handed to the periodic flush, in seconds.
const FLUSH_RETENTION_SECS: u64 = 300;

// ----------------------------------------------------------------------------
// Policy Trait
// ----------------------------------------------------------------------------

/// A running connection strategy bound to one transport.
#[async_trait]
pub trait Policy: Send + Sync {
    /// Start the policy's worker. Returns [`CourierError::AlreadyRunning`]
    /// on re-entry while the worker is alive.
    fn run_policy(&self) -> Result<()>;

    /// Signal the worker, wait for it to exit, then stop the transport.
    async fn stop(&self);

    /// The transport this policy drives.
    fn transport(&self) -> Arc<dyn Transport>;
}

// ----------------------------------------------------------------------------
// One Poll Round
// ----------------------------------------------------------------------------

/// Run one pickup/dropoff exchange with the node at `uri`.
///
/// Pulls everything newer than `last_remote` from the remote (sealed to our
/// routing key) and drops it into the local router, then pushes everything
/// newer than `last_local` from the local outbox to the remote. Each cursor
/// advances only after its direction succeeds.
pub async fn poll_server(
    transport: &dyn Transport,
    node: &Arc<Node>,
    uri: &str,
    routing_pub: &PublicKey,
    last_local: &mut i64,
    last_remote: &mut i64,
) -> Result<()> {
    // Learn the remote's routing key.
    let value = transport.rpc(uri, RemoteCall::new(Action::Id, vec![])).await?;
    let remote_b64 = value
        .as_str()
        .ok_or_else(|| CourierError::rpc("ID did not return a key"))?;
    let remote_pub = PublicKey::from_b64(remote_b64)?;

    // Remote -> local.
    let value = transport
        .rpc(
            uri,
            RemoteCall::new(
                Action::Pickup,
                vec![routing_pub.to_b64(), last_remote.to_string()],
            ),
        )
        .await?;
    let bundle = bundle_from_value(&value)?;
    let bundle_time = bundle.time;
    if !bundle.data.is_empty() {
        node.dropoff(bundle)?;
    }
    *last_remote = bundle_time;

    // Local -> remote.
    let bundle = node.pickup(&remote_pub, *last_local, &[])?;
    let bundle_time = bundle.time;
    if !bundle.data.is_empty() {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine as _;
        transport
            .rpc(
                uri,
                RemoteCall::new(
                    Action::Dropoff,
                    vec![bundle.time.to_string(), BASE64.encode(&bundle.data)],
                ),
            )
            .await?;
    }
    *last_local = bundle_time;
    Ok(())
}

// ----------------------------------------------------------------------------
// Poll Policy
// ----------------------------------------------------------------------------

enum PollState {
    Stopped,
    Running(tokio::task::JoinHandle<()>),
}

/// Periodically polls every enabled peer in a group.
pub struct PollPolicy {
    transport: Arc<dyn Transport>,
    node: Weak<Node>,
    interval_ms: u64,
    sync_backlog: bool,
    group: String,

    running: Arc<AtomicBool>,
    state: Mutex<PollState>,
}

impl PollPolicy {
    /// `sync_backlog` starts the cursors at 0 (pull history) rather than
    /// −1 (only messages newer than the first connect).
    pub fn new(
        transport: Arc<dyn Transport>,
        node: &Arc<Node>,
        interval_ms: u64,
        sync_backlog: bool,
        group: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            node: Arc::downgrade(node),
            interval_ms,
            sync_backlog,
            group: group.into(),
            running: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(PollState::Stopped),
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }
}

#[async_trait]
impl Policy for PollPolicy {
    fn run_policy(&self) -> Result<()> {
        let mut state = self.state.lock().expect("poll state lock poisoned");
        if let PollState::Running(handle) = &*state {
            if !handle.is_finished() {
                return Err(CourierError::AlreadyRunning);
            }
        }

        let (mut last_local, mut last_remote) = if self.sync_backlog { (0, 0) } else { (-1, -1) };
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let node_ref = self.node.clone();
        let transport = Arc::clone(&self.transport);
        let interval = self.interval_ms;
        let group = self.group.clone();

        let handle = tokio::spawn(async move {
            let mut counter: u64 = 0;
            loop {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(interval)).await;

                let Some(node) = node_ref.upgrade() else { break };
                let routing_pub = node.id();

                let peers = match node.get_peers(&group) {
                    Ok(peers) => peers,
                    Err(err) => {
                        warn!(%err, "poll: listing peers failed");
                        continue;
                    }
                };
                for peer in peers.iter().filter(|p| p.enabled) {
                    if let Err(err) = poll_server(
                        transport.as_ref(),
                        &node,
                        &peer.uri,
                        &routing_pub,
                        &mut last_local,
                        &mut last_remote,
                    )
                    .await
                    {
                        warn!(peer = %peer.name, %err, "poll round failed");
                    }
                }

                if counter % FLUSH_EVERY == 0 {
                    if let Err(err) = node.flush_outbox(FLUSH_RETENTION_SECS) {
                        warn!(%err, "poll: outbox flush failed");
                    }
                }
                counter += 1;
            }
        });
        *state = PollState::Running(handle);
        Ok(())
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let state = {
            let mut state = self.state.lock().expect("poll state lock poisoned");
            mem::replace(&mut *state, PollState::Stopped)
        };
        if let PollState::Running(handle) = state {
            let _ = handle.await;
        }
        self.transport.stop();
    }

    fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }
}
