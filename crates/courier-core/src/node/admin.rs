//! Directory administration and the send family
//!
//! Contacts, channels, profiles, and peers live in the store; the node
//! fronts them here and keeps its channel-key cache coherent. The send
//! methods encrypt under the content key, frame, and enqueue.

use tracing::debug;

use crate::errors::{CourierError, Result};
use crate::frame;
use crate::types::{now_ns, Channel, Contact, Peer, Profile, PublicKey};

use super::Node;

impl Node {
    // ------------------------------------------------------------------
    // Contacts
    // ------------------------------------------------------------------

    pub fn add_contact(&self, name: &str, pubkey_b64: &str) -> Result<()> {
        // Reject unparseable keys up front so sends cannot fail later.
        PublicKey::from_b64(pubkey_b64)?;
        self.store().add_contact(name, pubkey_b64)?;
        Ok(())
    }

    pub fn get_contact(&self, name: &str) -> Result<Option<Contact>> {
        Ok(self.store().get_contact(name)?)
    }

    pub fn get_contacts(&self) -> Result<Vec<Contact>> {
        Ok(self.store().contacts()?)
    }

    pub fn delete_contact(&self, name: &str) -> Result<()> {
        self.store().delete_contact(name)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------

    /// Add (or replace) a channel key and refresh the key cache.
    pub fn add_channel(&self, name: &str, privkey_b64: &str) -> Result<()> {
        let mut probe = self
            .content_key()
            .read()
            .expect("content key lock poisoned")
            .clone_keystore();
        probe.from_b64(privkey_b64)?;
        self.store().add_channel(name, privkey_b64)?;
        self.refresh_channels()
    }

    /// A channel by name, public key derived from the stored private half.
    pub fn get_channel(&self, name: &str) -> Result<Option<Channel>> {
        let Some(privkey) = self.store().channel_privkey(name)? else {
            return Ok(None);
        };
        let mut key = self
            .content_key()
            .read()
            .expect("content key lock poisoned")
            .clone_keystore();
        key.from_b64(&privkey)?;
        Ok(Some(Channel {
            name: name.to_string(),
            pubkey: key.public_key().to_b64(),
            privkey: None,
        }))
    }

    pub fn get_channels(&self) -> Result<Vec<Channel>> {
        let template = self
            .content_key()
            .read()
            .expect("content key lock poisoned")
            .clone_keystore();
        let mut out = Vec::new();
        for (name, privkey) in self.store().channels()? {
            let mut key = template.clone_keystore();
            if key.from_b64(&privkey).is_err() {
                continue;
            }
            out.push(Channel {
                name,
                pubkey: key.public_key().to_b64(),
                privkey: None,
            });
        }
        Ok(out)
    }

    pub fn delete_channel(&self, name: &str) -> Result<()> {
        self.store().delete_channel(name)?;
        self.refresh_channels()
    }

    // ------------------------------------------------------------------
    // Profiles
    // ------------------------------------------------------------------

    /// Add a profile, generating a fresh key for new names; updating an
    /// existing profile only toggles its enabled flag.
    pub fn add_profile(&self, name: &str, enabled: bool) -> Result<()> {
        let privkey = match self.store().profile_privkey(name)? {
            Some(existing) => existing,
            None => self
                .content_key()
                .read()
                .expect("content key lock poisoned")
                .generate()
                .to_b64(),
        };
        self.store().upsert_profile(name, enabled, &privkey)?;
        Ok(())
    }

    pub fn get_profile(&self, name: &str) -> Result<Option<Profile>> {
        Ok(self.store().get_profile(name)?)
    }

    pub fn get_profiles(&self) -> Result<Vec<Profile>> {
        Ok(self.store().profiles()?)
    }

    pub fn delete_profile(&self, name: &str) -> Result<()> {
        self.store().delete_profile(name)?;
        Ok(())
    }

    /// Swap the profile's key in as the node's content key.
    pub fn load_profile(&self, name: &str) -> Result<PublicKey> {
        let privkey = self
            .store()
            .profile_privkey(name)?
            .ok_or_else(|| CourierError::UnknownProfile(name.to_string()))?;
        let mut key = self
            .content_key()
            .read()
            .expect("content key lock poisoned")
            .clone_keystore();
        key.from_b64(&privkey)?;
        let pubkey = key.public_key();
        *self
            .content_key()
            .write()
            .expect("content key lock poisoned") = key;
        debug!(profile = %name, "profile loaded as content key");
        Ok(pubkey)
    }

    // ------------------------------------------------------------------
    // Peers
    // ------------------------------------------------------------------

    pub fn add_peer(&self, name: &str, enabled: bool, uri: &str, group: &str) -> Result<()> {
        self.store().add_peer(name, enabled, uri, group)?;
        Ok(())
    }

    pub fn get_peer(&self, name: &str) -> Result<Option<Peer>> {
        Ok(self.store().get_peer(name)?)
    }

    pub fn get_peers(&self, group: &str) -> Result<Vec<Peer>> {
        Ok(self.store().peers(group)?)
    }

    pub fn delete_peer(&self, name: &str) -> Result<()> {
        self.store().delete_peer(name)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Send Family
    // ------------------------------------------------------------------

    /// Transmit to a single contact. `pubkey` overrides the contact lookup.
    pub fn send(&self, contact_name: &str, data: &[u8], pubkey: Option<PublicKey>) -> Result<()> {
        let dst = match pubkey {
            Some(key) => key,
            None => self.contact_pubkey(contact_name)?,
        };
        self.send_framed("", &dst, data)
    }

    /// Transmit to a channel. `pubkey` overrides the channel's own key.
    pub fn send_channel(
        &self,
        channel_name: &str,
        data: &[u8],
        pubkey: Option<PublicKey>,
    ) -> Result<()> {
        let dst = match pubkey {
            Some(key) => key,
            None => self
                .channel_pubkey(channel_name)
                .ok_or_else(|| CourierError::UnknownChannel(channel_name.to_string()))?,
        };
        self.send_framed(channel_name, &dst, data)
    }

    /// Vectorized [`send`](Node::send): one destination, one timestamp.
    pub fn send_bulk(
        &self,
        contact_name: &str,
        data: &[Vec<u8>],
        pubkey: Option<PublicKey>,
    ) -> Result<()> {
        let dst = match pubkey {
            Some(key) => key,
            None => self.contact_pubkey(contact_name)?,
        };
        self.send_bulk_framed("", &dst, data)
    }

    /// Vectorized [`send_channel`](Node::send_channel).
    pub fn send_channel_bulk(
        &self,
        channel_name: &str,
        data: &[Vec<u8>],
        pubkey: Option<PublicKey>,
    ) -> Result<()> {
        let dst = match pubkey {
            Some(key) => key,
            None => self
                .channel_pubkey(channel_name)
                .ok_or_else(|| CourierError::UnknownChannel(channel_name.to_string()))?,
        };
        self.send_bulk_framed(channel_name, &dst, data)
    }

    fn contact_pubkey(&self, contact_name: &str) -> Result<PublicKey> {
        let contact = self
            .store()
            .get_contact(contact_name)?
            .ok_or_else(|| CourierError::UnknownContact(contact_name.to_string()))?;
        Ok(PublicKey::from_b64(&contact.pubkey)?)
    }

    fn send_framed(&self, channel_name: &str, dst: &PublicKey, data: &[u8]) -> Result<()> {
        let body = self
            .content_key()
            .read()
            .expect("content key lock poisoned")
            .encrypt(data, dst)?;
        let framed = frame::encode(channel_name, &body);
        self.store()
            .outbox_enqueue(channel_name, &framed, now_ns(), false)?;
        Ok(())
    }

    fn send_bulk_framed(
        &self,
        channel_name: &str,
        dst: &PublicKey,
        data: &[Vec<u8>],
    ) -> Result<()> {
        let framed = {
            let content = self
                .content_key()
                .read()
                .expect("content key lock poisoned");
            let mut out = Vec::with_capacity(data.len());
            for item in data {
                out.push(frame::encode(channel_name, &content.encrypt(item, dst)?));
            }
            out
        };
        self.store()
            .outbox_bulk_enqueue(channel_name, now_ns(), &framed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::keystore::{EcdhKeystore, Keystore};
    use crate::outbox::MemoryStore;
    use crate::router::DefaultRouter;

    fn test_node() -> (Arc<Node>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let node = Node::new(
            Box::new(EcdhKeystore::generate_new()),
            Box::new(EcdhKeystore::generate_new()),
            store.clone(),
            Arc::new(DefaultRouter::new()),
        )
        .unwrap();
        (node, store)
    }

    #[test]
    fn test_send_to_unknown_contact_fails() {
        let (node, _) = test_node();
        assert!(matches!(
            node.send("nobody", b"hi", None),
            Err(CourierError::UnknownContact(_))
        ));
    }

    #[test]
    fn test_send_enqueues_framed_unicast() {
        let (node, store) = test_node();
        let bob = EcdhKeystore::generate_new();
        node.add_contact("bob", &bob.public_key().to_b64()).unwrap();
        node.send("bob", b"hello", None).unwrap();

        let rows = store.outbox_rows();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].channel.is_empty());
        // Empty channel name: two zero bytes then the encrypted body.
        assert_eq!(&rows[0].message[..2], &[0x00, 0x00]);
    }

    #[test]
    fn test_send_pubkey_override_skips_lookup() {
        let (node, store) = test_node();
        let bob = EcdhKeystore::generate_new();
        node.send("nobody", b"hi", Some(bob.public_key())).unwrap();
        assert_eq!(store.outbox_len(), 1);
    }

    #[test]
    fn test_send_channel_requires_known_key() {
        let (node, _) = test_node();
        assert!(matches!(
            node.send_channel("alpha", b"hi", None),
            Err(CourierError::UnknownChannel(_))
        ));
    }

    #[test]
    fn test_send_bulk_shares_one_timestamp() {
        let (node, store) = test_node();
        let bob = EcdhKeystore::generate_new();
        node.add_contact("bob", &bob.public_key().to_b64()).unwrap();
        node.send_bulk("bob", &[b"a".to_vec(), b"b".to_vec(), b"c".to_vec()], None)
            .unwrap();

        let rows = store.outbox_rows();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.timestamp == rows[0].timestamp));
    }

    #[test]
    fn test_add_channel_populates_cache() {
        let (node, _) = test_node();
        let key = EcdhKeystore::generate_new();
        node.add_channel("alpha", &key.to_b64()).unwrap();

        let chan = node.get_channel("alpha").unwrap().unwrap();
        assert_eq!(chan.pubkey, key.public_key().to_b64());
        assert!(chan.privkey.is_none());

        node.send_channel("alpha", b"hi", None).unwrap();
    }

    #[test]
    fn test_delete_channel_evicts_cache() {
        let (node, _) = test_node();
        let key = EcdhKeystore::generate_new();
        node.add_channel("alpha", &key.to_b64()).unwrap();
        node.delete_channel("alpha").unwrap();
        assert!(node.get_channel("alpha").unwrap().is_none());
        assert!(node.send_channel("alpha", b"hi", None).is_err());
    }

    #[test]
    fn test_load_profile_swaps_content_key() {
        let (node, _) = test_node();
        let before = node.cid();
        node.add_profile("work", true).unwrap();
        let loaded = node.load_profile("work").unwrap();
        assert_ne!(before, loaded);
        assert_eq!(node.cid(), loaded);
    }

    #[test]
    fn test_add_profile_twice_keeps_key() {
        let (node, _) = test_node();
        node.add_profile("work", true).unwrap();
        let first = node.load_profile("work").unwrap();
        node.add_profile("work", false).unwrap();
        let second = node.load_profile("work").unwrap();
        assert_eq!(first, second);
        assert_eq!(
            node.get_profile("work").unwrap().unwrap().enabled,
            false
        );
    }

    #[test]
    fn test_add_contact_rejects_bad_key() {
        let (node, _) = test_node();
        assert!(node.add_contact("bob", "definitely not base64").is_err());
    }
}
