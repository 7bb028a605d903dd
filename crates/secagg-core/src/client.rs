//! The client half of the protocol.
//!
//! A `Client` owns its own key material and its own view of who is
//! still alive; it never reaches into another party's state directly
//! — every cross-party fact arrives as a message (see
//! [`crate::messages`]).

use std::collections::{BTreeMap, BTreeSet};

use rand::RngCore;
use sharks::Share;
use tracing::{debug, info, warn};
use x25519_dalek::PublicKey;

use crate::config::{ProtocolConfig, FIXED_POINT_SCALE};
use crate::crypto::{self, KeyPair, PairwisePrng};
use crate::error::{Result, SecAggError};
use crate::messages::{
    Ciphertext, CiphertextBundle, CiphertextPayload, PeerPublicKeys, PublicKeyBroadcast,
    ShareEntry, ShareKind, ShareResponse, SurvivorsList,
};
use crate::pid::Pid;
use crate::shamir;

/// The two retained shares `round1()` keeps: the
/// share of the client's own `K_seed` private key, and the share of
/// its own self-mask seed, both allocated at the client's own rank.
/// Only the self-mask-seed one is ever resubmitted (in `round3()`,
/// toward reconstructing the client's own self-mask); the key share
/// is kept purely because the Shamir sharing produces one share per
/// peer including self, and discarding it silently would leave the
/// sharing incomplete.
struct RetainedShares {
    own_key_share: Share,
    own_self_seed_share: Share,
    own_rank: u8,
}

pub struct Client {
    id: Pid,
    secret: f64,
    config: ProtocolConfig,
    down: bool,

    seed_keypair: Option<KeyPair>,
    enc_keypair: Option<KeyPair>,

    u1: Option<PublicKeyBroadcast>,
    self_mask_seed: Option<u32>,
    retained: Option<RetainedShares>,
    outgoing_ciphertexts: Option<BTreeMap<Pid, Ciphertext>>,

    u2_local: BTreeSet<Pid>,
    received_ciphertexts: CiphertextBundle,
    u3_local: Option<SurvivorsList>,
}

impl Client {
    pub fn new(id: Pid, secret: f64, config: ProtocolConfig) -> Self {
        Self {
            id,
            secret,
            config,
            down: false,
            seed_keypair: None,
            enc_keypair: None,
            u1: None,
            self_mask_seed: None,
            retained: None,
            outgoing_ciphertexts: None,
            u2_local: BTreeSet::new(),
            received_ciphertexts: BTreeMap::new(),
            u3_local: None,
        }
    }

    pub fn id(&self) -> Pid {
        self.id
    }

    pub fn is_down(&self) -> bool {
        self.down
    }

    /// The secret scalar this client was constructed with. Exposed so
    /// a driver can build an [`crate::aggregator::Aggregator`] roster
    /// without threading secrets through a side channel.
    pub fn secret(&self) -> f64 {
        self.secret
    }

    /// Marks the client fail-stop. Once down, never comes back up;
    /// every subsequent round call becomes a no-op.
    pub fn put_down(&mut self) {
        info!(client = %self.id, "client dropping out");
        self.down = true;
    }

    /// Generates both key pairs and returns the public material to
    /// broadcast through the aggregator.
    pub fn round0(&mut self) -> PeerPublicKeys {
        let seed_keypair = KeyPair::generate();
        let enc_keypair = KeyPair::generate();
        let keys = PeerPublicKeys {
            seed_pk: seed_keypair.public_bytes(),
            enc_pk: enc_keypair.public_bytes(),
        };
        debug!(
            client = %self.id,
            seed_pk = %hex::encode(keys.seed_pk),
            enc_pk = %hex::encode(keys.enc_pk),
            "round0: generated key pairs"
        );
        self.seed_keypair = Some(seed_keypair);
        self.enc_keypair = Some(enc_keypair);
        keys
    }

    /// Records the aggregator's round-0 broadcast as the local `U1`.
    pub fn receive_clients(&mut self, list: PublicKeyBroadcast) -> Result<()> {
        if list.len() < self.config.t as usize {
            return Err(SecAggError::TooFewClients {
                got: list.len(),
                threshold: self.config.t as usize,
            });
        }
        let mut seen = std::collections::HashSet::new();
        for keys in list.values() {
            if !seen.insert((keys.seed_pk, keys.enc_pk)) {
                return Err(SecAggError::KeyCollision);
            }
        }
        debug!(client = %self.id, peers = list.len(), "round0: recorded U1");
        self.u1 = Some(list);
        Ok(())
    }

    /// The fixed, ascending-`Pid` peer ordering used for Shamir share
    /// ranks throughout the run.
    fn ranked_peers(&self) -> Vec<Pid> {
        let mut pids: Vec<Pid> = self
            .u1
            .as_ref()
            .expect("round1 called before receive_clients")
            .keys()
            .copied()
            .collect();
        pids.sort();
        pids
    }

    /// `round1()`. Skipped entirely if the client is down.
    pub fn round1(&mut self) -> Option<CiphertextBundle> {
        if self.down {
            return None;
        }

        let ranked_peers = self.ranked_peers();
        let n = ranked_peers.len() as u8;
        let t = self.config.t as u8;

        let mut self_mask_seed_bytes = [0u8; 4];
        rand::rngs::OsRng.fill_bytes(&mut self_mask_seed_bytes);
        let self_mask_seed = u32::from_le_bytes(self_mask_seed_bytes);
        self.self_mask_seed = Some(self_mask_seed);

        let key_bytes = self
            .seed_keypair
            .as_ref()
            .expect("round0 runs before round1")
            .export_private();
        let key_shares = shamir::split(&key_bytes, t, n);
        let seed_shares = shamir::split(&self_mask_seed_bytes, t, n);

        let key_assignment = shamir::assign_by_rank(key_shares, &ranked_peers);
        let seed_assignment = shamir::assign_by_rank(seed_shares, &ranked_peers);

        let u1 = self.u1.as_ref().expect("receive_clients already ran");
        let enc_keypair = self.enc_keypair.as_ref().expect("round0 ran");

        let mut outgoing = BTreeMap::new();
        let mut own_rank = 0u8;
        let mut own_key_share = None;
        let mut own_self_seed_share = None;

        for ((peer, key_share), (_, seed_share)) in key_assignment.into_iter().zip(seed_assignment) {
            let index = shamir::share_index(&key_share);
            if peer == self.id {
                own_rank = index;
                own_key_share = Some(key_share);
                own_self_seed_share = Some(seed_share);
                continue;
            }

            let peer_keys = u1.get(&peer).expect("peer came from U1's own key set");
            let peer_enc_pk = PublicKey::from(peer_keys.enc_pk);
            let aes_key = crypto::derive_pairwise_aes_key(enc_keypair.secret(), &peer_enc_pk);

            let payload = CiphertextPayload {
                sender: self.id,
                recipient: peer,
                key_share: shamir::share_to_bytes(&key_share),
                self_seed_share: shamir::share_to_bytes(&seed_share),
                index,
            };
            let (bytes, nonce) = crypto::aead_encrypt(&aes_key, &payload.encode());
            outgoing.insert(peer, Ciphertext { bytes, nonce });
        }

        self.retained = Some(RetainedShares {
            own_key_share: own_key_share.expect("self is always one of the N ranked peers"),
            own_self_seed_share: own_self_seed_share
                .expect("self is always one of the N ranked peers"),
            own_rank,
        });

        debug!(client = %self.id, peers = outgoing.len(), "round1: emitted ciphertexts");
        self.outgoing_ciphertexts = Some(outgoing.clone());
        Some(outgoing)
    }

    /// Accepts the subset of round-1 ciphertexts addressed to this
    /// client and sets the local `U2`.
    pub fn receive_ciphertexts(&mut self, bundle: CiphertextBundle) -> Result<()> {
        let need = self.config.t.saturating_sub(1) as usize;
        if bundle.len() < need {
            return Err(SecAggError::TooFewCiphertexts {
                got: bundle.len(),
                need,
            });
        }
        self.u2_local = bundle.keys().copied().collect();
        debug!(client = %self.id, senders = bundle.len(), "round1: recorded U2_local");
        self.received_ciphertexts = bundle;
        Ok(())
    }

    /// `round2()`: the signed, wrapping 32-bit masked
    /// value. Skipped if the client is down.
    pub fn round2(&mut self) -> Option<i32> {
        if self.down {
            return None;
        }

        let seed_keypair = self.seed_keypair.as_ref().expect("round0 ran");
        let u1 = self.u1.as_ref().expect("receive_clients ran");

        let mut value = (self.secret * FIXED_POINT_SCALE).round() as i32;

        for &peer in &self.u2_local {
            let peer_keys = u1.get(&peer).expect("U2_local is a subset of U1");
            let peer_seed_pk = PublicKey::from(peer_keys.seed_pk);
            let seed = crypto::derive_pairwise_seed(seed_keypair.secret(), &peer_seed_pk);
            let mask = PairwisePrng::from_pairwise_seed(seed).next() as i32;

            if peer > self.id {
                value = value.wrapping_sub(mask);
            } else {
                value = value.wrapping_add(mask);
            }
        }

        let self_mask_seed = self.self_mask_seed.expect("round1 ran");
        let self_mask = PairwisePrng::from_self_mask_seed(self_mask_seed).next() as i32;
        value = value.wrapping_add(self_mask);

        debug!(client = %self.id, masked_value = value, "round2: computed masked value");
        Some(value)
    }

    /// Accepts the aggregator's `U3`.
    pub fn receive_client_ids_u3(&mut self, ids: SurvivorsList) -> Result<()> {
        if ids.len() < self.config.t as usize {
            return Err(SecAggError::TooFewSurvivors {
                got: ids.len(),
                threshold: self.config.t as usize,
            });
        }
        for &peer in &ids {
            if peer != self.id && !self.u2_local.contains(&peer) {
                return Err(SecAggError::MembershipViolation(peer));
            }
        }
        debug!(client = %self.id, survivors = ids.len(), "round2: recorded U3");
        self.u3_local = Some(ids);
        Ok(())
    }

    /// `round3()`: discloses share material for dead
    /// vs. alive peers. Skipped if the client is down.
    pub fn round3(&mut self) -> Option<Result<ShareResponse>> {
        if self.down {
            return None;
        }
        Some(self.round3_inner())
    }

    fn round3_inner(&mut self) -> Result<ShareResponse> {
        let enc_keypair = self.enc_keypair.as_ref().expect("round0 ran");
        let u1 = self.u1.as_ref().expect("receive_clients ran");
        let u3 = self
            .u3_local
            .as_ref()
            .expect("receive_client_ids_u3 ran before round3");

        let mut response = BTreeMap::new();

        for &peer in &self.u2_local {
            let ciphertext = self
                .received_ciphertexts
                .get(&peer)
                .expect("U2_local only contains senders we have a ciphertext from");
            let peer_keys = u1.get(&peer).expect("U2_local is a subset of U1");
            let peer_enc_pk = PublicKey::from(peer_keys.enc_pk);
            let aes_key = crypto::derive_pairwise_aes_key(enc_keypair.secret(), &peer_enc_pk);

            let plaintext =
                crypto::aead_decrypt(&aes_key, &ciphertext.bytes, &ciphertext.nonce, peer)?;
            let payload = CiphertextPayload::decode(&plaintext);

            if payload.sender != peer || payload.recipient != self.id {
                warn!(client = %self.id, sender = %peer, "round3: ciphertext misdirected");
                return Err(SecAggError::CiphertextMisdirected {
                    expected_recipient: self.id,
                    claimed_sender: payload.sender,
                    claimed_recipient: payload.recipient,
                });
            }

            let entry = if u3.contains(&peer) {
                ShareEntry {
                    share_bytes: payload.self_seed_share,
                    index: payload.index,
                    kind: ShareKind::Seed,
                }
            } else {
                ShareEntry {
                    share_bytes: payload.key_share,
                    index: payload.index,
                    kind: ShareKind::Key,
                }
            };
            response.insert(peer, entry);
        }

        let retained = self
            .retained
            .as_ref()
            .expect("round1 ran and retained its own shares");
        response.insert(
            self.id,
            ShareEntry {
                share_bytes: shamir::share_to_bytes(&retained.own_self_seed_share),
                index: retained.own_rank,
                kind: ShareKind::Seed,
            },
        );

        debug!(client = %self.id, shares = response.len(), "round3: emitted share response");
        Ok(response)
    }

    /// The retained share of this client's own `K_seed` private key
    /// (see [`RetainedShares`]); exposed for tests and diagnostics.
    pub fn retained_key_share(&self) -> Option<&Share> {
        self.retained.as_ref().map(|r| &r.own_key_share)
    }
}
