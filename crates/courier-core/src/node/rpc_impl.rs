//! RPC dispatch on the node
//!
//! `public_rpc` serves the peer-facing verbs; `admin_rpc` serves the full
//! surface and is only wired to endpoints listening in admin mode.

use serde_json::{json, Value};

use crate::errors::{CourierError, Result};
use crate::rpc::{
    arg, arg_bool, arg_bytes, arg_i64, arg_u64, bundle_from_value, bundle_to_value, Action,
    RemoteCall,
};
use crate::types::PublicKey;

use super::Node;

impl Node {
    /// Dispatch a peer-facing call. Admin verbs are rejected here so a
    /// public listener can never mutate the directory.
    pub fn public_rpc(&self, call: RemoteCall) -> Result<Value> {
        match call.action {
            Action::Id => Ok(Value::String(self.id().to_b64())),
            Action::Cid => Ok(Value::String(self.cid().to_b64())),
            Action::Pickup => {
                let remote = PublicKey::from_b64(arg(&call.args, 0, "remote pubkey")?)?;
                let last_time = arg_i64(&call.args, 1, "last time")?;
                let channels: Vec<String> = call.args.iter().skip(2).cloned().collect();
                let bundle = self.pickup(&remote, last_time, &channels)?;
                Ok(bundle_to_value(&bundle))
            }
            Action::Dropoff => {
                let bundle = bundle_from_value(&json!({
                    "Time": arg_i64(&call.args, 0, "bundle time")?,
                    "Data": arg(&call.args, 1, "bundle data")?,
                }))?;
                self.dropoff(bundle)?;
                Ok(Value::Null)
            }
            other => Err(CourierError::rpc(format!(
                "verb {other:?} is not available on the public surface"
            ))),
        }
    }

    /// Dispatch any call, admin verbs included.
    pub fn admin_rpc(&self, call: RemoteCall) -> Result<Value> {
        match call.action {
            Action::Id | Action::Cid | Action::Pickup | Action::Dropoff => self.public_rpc(call),

            Action::AddContact => {
                self.add_contact(
                    arg(&call.args, 0, "name")?,
                    arg(&call.args, 1, "pubkey")?,
                )?;
                Ok(Value::Null)
            }
            Action::GetContact => {
                let contact = self.get_contact(arg(&call.args, 0, "name")?)?;
                Ok(serde_json::to_value(contact)?)
            }
            Action::GetContacts => Ok(serde_json::to_value(self.get_contacts()?)?),
            Action::DeleteContact => {
                self.delete_contact(arg(&call.args, 0, "name")?)?;
                Ok(Value::Null)
            }

            Action::AddChannel => {
                self.add_channel(
                    arg(&call.args, 0, "name")?,
                    arg(&call.args, 1, "privkey")?,
                )?;
                Ok(Value::Null)
            }
            Action::GetChannel => {
                let channel = self.get_channel(arg(&call.args, 0, "name")?)?;
                Ok(serde_json::to_value(channel)?)
            }
            Action::GetChannels => Ok(serde_json::to_value(self.get_channels()?)?),
            Action::DeleteChannel => {
                self.delete_channel(arg(&call.args, 0, "name")?)?;
                Ok(Value::Null)
            }

            Action::AddProfile => {
                self.add_profile(
                    arg(&call.args, 0, "name")?,
                    arg_bool(&call.args, 1, "enabled")?,
                )?;
                Ok(Value::Null)
            }
            Action::GetProfile => {
                let profile = self.get_profile(arg(&call.args, 0, "name")?)?;
                Ok(serde_json::to_value(profile)?)
            }
            Action::GetProfiles => Ok(serde_json::to_value(self.get_profiles()?)?),
            Action::DeleteProfile => {
                self.delete_profile(arg(&call.args, 0, "name")?)?;
                Ok(Value::Null)
            }
            Action::LoadProfile => {
                let pubkey = self.load_profile(arg(&call.args, 0, "name")?)?;
                Ok(Value::String(pubkey.to_b64()))
            }

            Action::AddPeer => {
                self.add_peer(
                    arg(&call.args, 0, "name")?,
                    arg_bool(&call.args, 1, "enabled")?,
                    arg(&call.args, 2, "uri")?,
                    arg(&call.args, 3, "group").unwrap_or(""),
                )?;
                Ok(Value::Null)
            }
            Action::GetPeer => {
                let peer = self.get_peer(arg(&call.args, 0, "name")?)?;
                Ok(serde_json::to_value(peer)?)
            }
            Action::GetPeers => {
                let group = arg(&call.args, 0, "group").unwrap_or("");
                Ok(serde_json::to_value(self.get_peers(group)?)?)
            }
            Action::DeletePeer => {
                self.delete_peer(arg(&call.args, 0, "name")?)?;
                Ok(Value::Null)
            }

            Action::Send => {
                let data = arg_bytes(&call.args, 1, "payload")?;
                self.send(arg(&call.args, 0, "contact")?, &data, None)?;
                Ok(Value::Null)
            }
            Action::SendChannel => {
                let data = arg_bytes(&call.args, 1, "payload")?;
                self.send_channel(arg(&call.args, 0, "channel")?, &data, None)?;
                Ok(Value::Null)
            }
            Action::FlushOutbox => {
                self.flush_outbox(arg_u64(&call.args, 0, "seconds")?)?;
                Ok(Value::Null)
            }
        }
    }
}
