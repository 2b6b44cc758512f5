//! The RPC verb surface
//!
//! Transports move [`RemoteCall`] envelopes between nodes; the node
//! dispatches them in `public_rpc` (peer-facing verbs) and `admin_rpc`
//! (the full surface, for operator endpoints). Arguments ride as strings —
//! keys and payloads base64-encoded — and results come back as JSON
//! values.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::{CourierError, Result};
use crate::types::Bundle;

// ----------------------------------------------------------------------------
// Verbs
// ----------------------------------------------------------------------------

/// Every verb a node understands. `ID`/`CID`/`Pickup`/`Dropoff` form the
/// public surface; everything else is admin-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "ID")]
    Id,
    #[serde(rename = "CID")]
    Cid,
    Pickup,
    Dropoff,

    AddContact,
    GetContact,
    GetContacts,
    DeleteContact,
    AddChannel,
    GetChannel,
    GetChannels,
    DeleteChannel,
    AddProfile,
    GetProfile,
    GetProfiles,
    DeleteProfile,
    LoadProfile,
    AddPeer,
    GetPeer,
    GetPeers,
    DeletePeer,
    Send,
    SendChannel,
    FlushOutbox,
}

/// One remote invocation: a verb plus stringly-typed arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCall {
    #[serde(rename = "Action")]
    pub action: Action,
    #[serde(rename = "Args", default)]
    pub args: Vec<String>,
}

impl RemoteCall {
    pub fn new(action: Action, args: Vec<String>) -> Self {
        Self { action, args }
    }
}

// ----------------------------------------------------------------------------
// Argument & Bundle Codecs
// ----------------------------------------------------------------------------

pub(crate) fn arg<'a>(args: &'a [String], idx: usize, what: &str) -> Result<&'a str> {
    args.get(idx)
        .map(String::as_str)
        .ok_or_else(|| CourierError::rpc(format!("missing argument {idx}: {what}")))
}

pub(crate) fn arg_i64(args: &[String], idx: usize, what: &str) -> Result<i64> {
    arg(args, idx, what)?
        .parse()
        .map_err(|_| CourierError::rpc(format!("argument {idx} ({what}) is not an integer")))
}

pub(crate) fn arg_u64(args: &[String], idx: usize, what: &str) -> Result<u64> {
    arg(args, idx, what)?
        .parse()
        .map_err(|_| CourierError::rpc(format!("argument {idx} ({what}) is not an integer")))
}

pub(crate) fn arg_bool(args: &[String], idx: usize, what: &str) -> Result<bool> {
    match arg(args, idx, what)? {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(CourierError::rpc(format!(
            "argument {idx} ({what}) is not a bool: {other:?}"
        ))),
    }
}

pub(crate) fn arg_bytes(args: &[String], idx: usize, what: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(arg(args, idx, what)?)
        .map_err(|_| CourierError::rpc(format!("argument {idx} ({what}) is not base64")))
}

/// Render a bundle for the wire: `{"Time": …, "Data": "<base64>"}`.
pub fn bundle_to_value(bundle: &Bundle) -> Value {
    json!({ "Time": bundle.time, "Data": BASE64.encode(&bundle.data) })
}

/// Parse a bundle off the wire.
pub fn bundle_from_value(value: &Value) -> Result<Bundle> {
    let time = value
        .get("Time")
        .and_then(Value::as_i64)
        .ok_or_else(|| CourierError::rpc("bundle missing Time"))?;
    let data = value
        .get("Data")
        .and_then(Value::as_str)
        .ok_or_else(|| CourierError::rpc("bundle missing Data"))?;
    let data = BASE64
        .decode(data)
        .map_err(|_| CourierError::rpc("bundle Data is not base64"))?;
    Ok(Bundle { time, data })
}
