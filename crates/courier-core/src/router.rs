//! Routing: the consume/forward decision for every inbound message
//!
//! [`DefaultRouter`] applies a fixed policy matrix across the three key
//! classes — content, channels, profiles — deciding per message whether to
//! attempt local decryption ([`Node::handle`]), re-enqueue for onward
//! delivery ([`Node::forward`]), or both. Loop detection runs first:
//! a message whose quick tag was seen recently is dropped without any
//! effect, successfully.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::frame;
use crate::node::Node;
use crate::recent::RecentBuffer;
use crate::types::Patch;

// ----------------------------------------------------------------------------
// Router Trait
// ----------------------------------------------------------------------------

/// Per-message routing decision, invoked by [`Node::dropoff`] for each
/// message in an inbound bundle.
pub trait Router: Send + Sync {
    /// Route one framed message through the node. A quick-tag miss during
    /// handling is not an error; handle/forward failures abort routing of
    /// this message and surface to the caller.
    fn route(&self, node: &Node, message: &[u8]) -> Result<()>;

    /// Install a fan-out override.
    fn patch(&self, patch: Patch);

    /// The installed fan-out overrides.
    fn patches(&self) -> Vec<Patch>;
}

// ----------------------------------------------------------------------------
// Policy Flags
// ----------------------------------------------------------------------------

/// The consume/forward policy matrix of [`DefaultRouter`], also its
/// config-file representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterFlags {
    /// Attempt the content key on unicast messages.
    #[serde(rename = "CheckContent", default = "yes")]
    pub check_content: bool,
    /// Attempt known channel keys on channel messages.
    #[serde(rename = "CheckChannels", default = "yes")]
    pub check_channels: bool,
    /// Attempt enabled profile keys on unicast messages.
    #[serde(rename = "CheckProfiles", default = "no")]
    pub check_profiles: bool,

    #[serde(rename = "ForwardUnknownContent", default = "yes")]
    pub forward_unknown_content: bool,
    #[serde(rename = "ForwardUnknownChannels", default = "yes")]
    pub forward_unknown_channels: bool,
    #[serde(rename = "ForwardUnknownProfiles", default = "no")]
    pub forward_unknown_profiles: bool,

    #[serde(rename = "ForwardConsumedContent", default = "no")]
    pub forward_consumed_content: bool,
    #[serde(rename = "ForwardConsumedChannels", default = "yes")]
    pub forward_consumed_channels: bool,
    #[serde(rename = "ForwardConsumedProfiles", default = "no")]
    pub forward_consumed_profiles: bool,

    #[serde(rename = "Patches", default)]
    pub patches: Vec<Patch>,
}

fn yes() -> bool {
    true
}

fn no() -> bool {
    false
}

impl Default for RouterFlags {
    fn default() -> Self {
        Self {
            check_content: true,
            check_channels: true,
            check_profiles: false,
            forward_unknown_content: true,
            forward_unknown_channels: true,
            forward_unknown_profiles: false,
            forward_consumed_content: false,
            forward_consumed_channels: true,
            forward_consumed_profiles: false,
            patches: Vec::new(),
        }
    }
}

// ----------------------------------------------------------------------------
// Default Router
// ----------------------------------------------------------------------------

/// The default router: channel messages go back out on the channel they
/// came in on (modulo patches), consumed unicast messages are not
/// re-broadcast.
pub struct DefaultRouter {
    recent: RecentBuffer,
    flags: RouterFlags,
    patches: Mutex<Vec<Patch>>,
}

impl DefaultRouter {
    pub fn new() -> Self {
        Self::with_flags(RouterFlags::default())
    }

    pub fn with_flags(flags: RouterFlags) -> Self {
        let patches = flags.patches.clone();
        Self {
            recent: RecentBuffer::new(),
            flags,
            patches: Mutex::new(patches),
        }
    }

    pub fn flags(&self) -> &RouterFlags {
        &self.flags
    }

    /// Forward under the patch table: a matching `from` redirects to every
    /// listed destination, otherwise the message keeps its channel.
    fn forward(&self, node: &Node, channel: &str, body: &[u8]) -> Result<()> {
        let patches = self.patches.lock().expect("patch table lock poisoned");
        for p in patches.iter() {
            if p.from == channel {
                for to in &p.to {
                    node.forward(to, body)?;
                }
                return Ok(());
            }
        }
        node.forward(channel, body)
    }
}

impl Default for DefaultRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl Router for DefaultRouter {
    fn route(&self, node: &Node, message: &[u8]) -> Result<()> {
        let parsed = frame::parse(message)?;

        // Loop prevention before any handling or forwarding.
        if self.recent.seen_recently(parsed.nonce) {
            return Ok(());
        }

        if !parsed.channel.is_empty() {
            // Channel message. A failed channel lookup counts as unknown:
            // the message can still be forwarded.
            let mut consumed = false;
            if self.flags.check_channels
                && matches!(node.get_channel(parsed.channel), Ok(Some(_)))
            {
                consumed = node.handle(parsed.channel, parsed.body)?;
            }
            if (!consumed && self.flags.forward_unknown_channels)
                || (consumed && self.flags.forward_consumed_channels)
            {
                self.forward(node, parsed.channel, parsed.body)?;
            }
        } else {
            // Unicast: content key first.
            let mut consumed = false;
            if self.flags.check_content {
                consumed = node.handle("", parsed.body)?;
            }
            if (!consumed && self.flags.forward_unknown_content)
                || (consumed && self.flags.forward_consumed_content)
            {
                self.forward(node, "", parsed.body)?;
            }

            // Then enabled profile keys, stopping at the first hit.
            let mut consumed = false;
            if self.flags.check_profiles {
                for profile in node.get_profiles()? {
                    if !profile.enabled {
                        continue;
                    }
                    consumed = node.handle("", parsed.body)?;
                    if consumed {
                        break;
                    }
                }
            }
            if (!consumed && self.flags.forward_unknown_profiles)
                || (consumed && self.flags.forward_consumed_profiles)
            {
                self.forward(node, "", parsed.body)?;
            }
        }
        Ok(())
    }

    fn patch(&self, patch: Patch) {
        self.patches
            .lock()
            .expect("patch table lock poisoned")
            .push(patch);
    }

    fn patches(&self) -> Vec<Patch> {
        self.patches
            .lock()
            .expect("patch table lock poisoned")
            .clone()
    }
}
