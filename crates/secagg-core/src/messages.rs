//! Wire message formats.
//!
//! These are plain data — no behavior — moved between [`crate::client::Client`]
//! and [`crate::aggregator::Aggregator`] by the driver. Keeping them in
//! their own module (rather than threading live object references
//! between client and aggregator) is the one-way-ownership rewrite
//! the one-way-ownership design calls for: the aggregator owns a flat `Pid -> PeerRecord`
//! table, clients hold immutable snapshots of peer public material by
//! value.

use std::collections::BTreeMap;

use crate::pid::Pid;

/// Public-key broadcast: `map PID -> { seedPk, encPk }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerPublicKeys {
    pub seed_pk: [u8; 32],
    pub enc_pk: [u8; 32],
}

pub type PublicKeyBroadcast = BTreeMap<Pid, PeerPublicKeys>;

/// One AES-GCM ciphertext plus the nonce it was sealed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ciphertext {
    pub bytes: Vec<u8>,
    pub nonce: [u8; 12],
}

/// Ciphertext bundle, keyed by sender:
/// `map "senderPID|recipientPID" -> { ciphertext, iv }`. The recipient
/// half of that key is implicit here — the aggregator only ever hands
/// a client the slice of the bundle addressed to *it*, so the
/// recipient is always "self" and carrying it again would be dead
/// weight on every entry.
pub type CiphertextBundle = BTreeMap<Pid, Ciphertext>;

/// Survivors list: a list of PIDs. Kept as a set here
/// since every consumer (membership checks) only cares about presence.
pub type SurvivorsList = std::collections::BTreeSet<Pid>;

/// Which half of a dual Shamir sharing a share response entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareKind {
    /// A share of the peer's `K_seed` private key — released when the
    /// peer dropped out after round 1, so the aggregator can
    /// reconstruct its pairwise masks.
    Key,
    /// A share of the peer's self-mask seed — released when the peer
    /// survived to `U3`, so the aggregator can undo its self-mask.
    Seed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareEntry {
    pub share_bytes: Vec<u8>,
    pub index: u8,
    pub kind: ShareKind,
}

/// Share response: `map peerPID -> { shareBytes, index, kind }`.
pub type ShareResponse = BTreeMap<Pid, ShareEntry>;

/// The plaintext carried by a round-1 ciphertext:
/// `i | j | keyShare(j) | selfSeedShare(j) | index`. Both shares
/// allocated to `recipient` use the same `index` because both Shamir
/// sharings rank peers identically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiphertextPayload {
    pub sender: Pid,
    pub recipient: Pid,
    pub key_share: Vec<u8>,
    pub self_seed_share: Vec<u8>,
    pub index: u8,
}

impl CiphertextPayload {
    /// Delimited (length-prefixed) byte encoding, the direct reading of
    /// for "delimited concatenation"; length-prefixing each
    /// variable-sized field is the direct reading of that.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + 16 + 1 + 4 + self.key_share.len() + 4 + self.self_seed_share.len());
        out.extend_from_slice(&self.sender.0.to_le_bytes());
        out.extend_from_slice(&self.recipient.0.to_le_bytes());
        out.push(self.index);
        out.extend_from_slice(&(self.key_share.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.key_share);
        out.extend_from_slice(&(self.self_seed_share.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.self_seed_share);
        out
    }

    /// Inverse of [`Self::encode`].
    ///
    /// This is only ever called on bytes that just passed AES-GCM tag
    /// verification in [`crate::crypto::aead_decrypt`], and every
    /// ciphertext this crate produces was built by `encode` above, so
    /// a length mismatch here means our own encoder and decoder have
    /// drifted apart, not that an adversary tampered with the wire —
    /// the `.expect()`s below document that invariant.
    pub fn decode(bytes: &[u8]) -> Self {
        let mut pos = 0;
        let take = |pos: &mut usize, n: usize| -> &[u8] {
            let slice = &bytes[*pos..*pos + n];
            *pos += n;
            slice
        };

        let sender = u128::from_le_bytes(take(&mut pos, 16).try_into().expect("16-byte Pid"));
        let recipient = u128::from_le_bytes(take(&mut pos, 16).try_into().expect("16-byte Pid"));
        let index = take(&mut pos, 1)[0];
        let key_share_len =
            u32::from_le_bytes(take(&mut pos, 4).try_into().expect("4-byte length")) as usize;
        let key_share = take(&mut pos, key_share_len).to_vec();
        let self_seed_share_len =
            u32::from_le_bytes(take(&mut pos, 4).try_into().expect("4-byte length")) as usize;
        let self_seed_share = take(&mut pos, self_seed_share_len).to_vec();

        Self {
            sender: Pid::new(sender),
            recipient: Pid::new(recipient),
            key_share,
            self_seed_share,
            index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trips_through_encode_decode() {
        let payload = CiphertextPayload {
            sender: Pid::new(1),
            recipient: Pid::new(2),
            key_share: vec![1, 2, 3, 4, 5],
            self_seed_share: vec![9, 9],
            index: 3,
        };
        let encoded = payload.encode();
        let decoded = CiphertextPayload::decode(&encoded);
        assert_eq!(payload, decoded);
    }
}
