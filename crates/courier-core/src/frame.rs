//! The outer wire frame
//!
//! Every queued or routed message carries the same envelope:
//!
//! - channel-name length: 2 bytes, u16 **big-endian**
//! - channel name: UTF-8, `length` bytes (empty for unicast)
//! - quick tag: 32 bytes — the keystore's authentication prefix, reused by
//!   the router as the loop-detection nonce
//! - ciphertext: remainder
//!
//! The big-endian length prefix is a public wire contract; the chunk header
//! in [`crate::chunking`] is little-endian, and the two must not be
//! unified.

use crate::errors::{CourierError, Result};

/// Size of the quick tag / loop-detection nonce.
pub const NONCE_SIZE: usize = 32;

/// Messages shorter than this after the channel prefix cannot carry a
/// cipher block and are skipped during dropoff.
pub const MIN_BODY_LEN: usize = 16;

/// A parsed view over a framed message. `body` starts at the quick tag and
/// is passed unmodified to decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub channel: &'a str,
    pub nonce: &'a [u8],
    pub body: &'a [u8],
}

/// Prepend the channel prefix to an encrypted body.
pub fn encode(channel: &str, body: &[u8]) -> Vec<u8> {
    let name = channel.as_bytes();
    let mut out = Vec::with_capacity(2 + name.len() + body.len());
    out.extend_from_slice(&(name.len() as u16).to_be_bytes());
    out.extend_from_slice(name);
    out.extend_from_slice(body);
    out
}

/// Parse a framed message, rejecting anything too short to hold the
/// declared channel name plus a quick tag.
pub fn parse(message: &[u8]) -> Result<Frame<'_>> {
    if message.len() < 2 {
        return Err(CourierError::InvalidFrame);
    }
    let chan_len = u16::from_be_bytes([message[0], message[1]]) as usize;
    if message.len() < 2 + chan_len + NONCE_SIZE {
        return Err(CourierError::InvalidFrame);
    }
    let channel =
        std::str::from_utf8(&message[2..2 + chan_len]).map_err(|_| CourierError::InvalidFrame)?;
    let body = &message[2 + chan_len..];
    Ok(Frame {
        channel,
        nonce: &body[..NONCE_SIZE],
        body,
    })
}
