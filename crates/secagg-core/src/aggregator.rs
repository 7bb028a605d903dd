//! The aggregator half of the protocol.
//!
//! Owns a flat `Pid -> PeerRecord` table and the run's single `S`
//! accumulator; never reaches back into a live [`crate::client::Client`]
//! — every fact it has about a client arrived as a message, the
//! one-way-ownership design this crate follows throughout.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::config::{ProtocolConfig, FIXED_POINT_SCALE};
use crate::crypto::{self, KeyPair, PairwisePrng};
use crate::error::{Result, SecAggError};
use crate::messages::{
    CiphertextBundle, PeerPublicKeys, PublicKeyBroadcast, ShareKind, ShareResponse, SurvivorsList,
};
use crate::pid::Pid;
use crate::shamir;

/// What the aggregator knows about one client: its public keys, the
/// secret it's carrying in the clear (only so `aggregateWithoutSecrecy`
/// has something to check against), and whether round0 reported it up.
struct PeerRecord {
    keys: PeerPublicKeys,
    secret: f64,
}

/// The aggregator's progress through the protocol's state machine.
/// Transitions only forward; a [`SecAggError::BelowThreshold`] at any
/// round is terminal for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Init,
    R0,
    R1,
    R2,
    R3,
    Done,
}

pub struct Aggregator {
    config: ProtocolConfig,
    stage: Stage,

    peers: BTreeMap<Pid, PeerRecord>,
    ranked_peers: Vec<Pid>,

    u1: BTreeSet<Pid>,
    u2: BTreeSet<Pid>,
    u3: BTreeSet<Pid>,
    u4: BTreeSet<Pid>,

    accumulator: i32,
    // Key shares gathered in round3, keyed by the dead peer they belong
    // to and then by the surviving submitter's rank index.
    key_shares: BTreeMap<Pid, Vec<(u8, sharks::Share)>>,
    // Self-seed shares gathered in round3, keyed by the alive peer they
    // belong to.
    seed_shares: BTreeMap<Pid, Vec<(u8, sharks::Share)>>,
}

impl Aggregator {
    /// Builds an aggregator from the `(id, secret)` roster a driver
    /// collects before round 0. `secret` values are kept only for
    /// [`Self::aggregate_without_secrecy`]; the protocol proper never
    /// reads them off this struct.
    pub fn new(roster: Vec<(Pid, f64)>, config: ProtocolConfig) -> Self {
        let peers = roster
            .into_iter()
            .map(|(id, secret)| {
                (
                    id,
                    PeerRecord {
                        keys: PeerPublicKeys {
                            seed_pk: [0u8; 32],
                            enc_pk: [0u8; 32],
                        },
                        secret,
                    },
                )
            })
            .collect();
        Self {
            config,
            stage: Stage::Init,
            peers,
            ranked_peers: Vec::new(),
            u1: BTreeSet::new(),
            u2: BTreeSet::new(),
            u3: BTreeSet::new(),
            u4: BTreeSet::new(),
            accumulator: 0,
            key_shares: BTreeMap::new(),
            seed_shares: BTreeMap::new(),
        }
    }

    /// `round0()`: collects public keys from every
    /// client and broadcasts the full list back out.
    pub fn round0(&mut self, keys: BTreeMap<Pid, PeerPublicKeys>) -> Result<PublicKeyBroadcast> {
        if keys.len() < self.config.t as usize {
            return Err(SecAggError::BelowThreshold {
                have: keys.len(),
                need: self.config.t as usize,
            });
        }
        for (&id, &k) in &keys {
            if let Some(record) = self.peers.get_mut(&id) {
                record.keys = k;
            }
        }
        self.u1 = keys.keys().copied().collect();
        self.ranked_peers = {
            let mut v: Vec<Pid> = self.u1.iter().copied().collect();
            v.sort();
            v
        };
        self.stage = Stage::R0;
        info!(
            clients = self.u1.len(),
            ranked = %self.ranked_peers.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(","),
            "round0: broadcast U1"
        );
        Ok(keys)
    }

    /// `round1()`: computes U₂, pivots every client's
    /// outgoing ciphertexts into per-recipient bundles.
    pub fn round1(
        &mut self,
        up: &BTreeSet<Pid>,
        outgoing: BTreeMap<Pid, CiphertextBundle>,
    ) -> Result<BTreeMap<Pid, CiphertextBundle>> {
        self.u2 = self.u1.intersection(up).copied().collect();
        if self.u2.len() < self.config.t as usize {
            return Err(SecAggError::BelowThreshold {
                have: self.u2.len(),
                need: self.config.t as usize,
            });
        }

        let mut pivoted: BTreeMap<Pid, CiphertextBundle> = BTreeMap::new();
        for &sender in &self.u2 {
            let Some(bundle) = outgoing.get(&sender) else {
                continue;
            };
            for (&recipient, ciphertext) in bundle {
                pivoted
                    .entry(recipient)
                    .or_default()
                    .insert(sender, ciphertext.clone());
            }
        }

        self.stage = Stage::R1;
        debug!(u2 = self.u2.len(), "round1: pivoted ciphertext bundles");
        Ok(pivoted)
    }

    /// `round2()`: computes U₃, sums every surviving
    /// client's masked value into `S`.
    pub fn round2(&mut self, masked_values: BTreeMap<Pid, i32>) -> Result<SurvivorsList> {
        self.u3 = self
            .u2
            .iter()
            .copied()
            .filter(|id| masked_values.contains_key(id))
            .collect();
        if self.u3.len() < self.config.t as usize {
            return Err(SecAggError::BelowThreshold {
                have: self.u3.len(),
                need: self.config.t as usize,
            });
        }

        let mut sum: i32 = 0;
        for &id in &self.u3 {
            sum = sum.wrapping_add(*masked_values.get(&id).expect("id came from masked_values"));
        }
        self.accumulator = sum;

        self.stage = Stage::R2;
        debug!(u3 = self.u3.len(), sum = self.accumulator, "round2: summed masked values");
        Ok(self.u3.clone())
    }

    /// `round3()`: computes U₄, reconstructs dead peers'
    /// pairwise masks and alive peers' self-masks, returns the mean.
    pub fn round3(&mut self, responses: BTreeMap<Pid, ShareResponse>) -> Result<f64> {
        self.u4 = self
            .u3
            .iter()
            .copied()
            .filter(|id| responses.contains_key(id))
            .collect();
        if self.u4.len() < self.config.t as usize {
            return Err(SecAggError::BelowThreshold {
                have: self.u4.len(),
                need: self.config.t as usize,
            });
        }

        self.key_shares.clear();
        self.seed_shares.clear();
        for (&submitter, response) in &responses {
            if !self.u4.contains(&submitter) {
                continue;
            }
            for (&owner, entry) in response {
                let share = shamir::share_from_bytes(
                    &entry.share_bytes,
                    owner,
                    "malformed share in round3 response",
                )?;
                match entry.kind {
                    ShareKind::Key => {
                        self.key_shares.entry(owner).or_default().push((entry.index, share));
                    }
                    ShareKind::Seed => {
                        self.seed_shares.entry(owner).or_default().push((entry.index, share));
                    }
                }
            }
        }

        let t = self.config.t as u8;
        let dead: Vec<Pid> = self.u2.difference(&self.u3).copied().collect();

        for dead_peer in dead {
            let shares: Vec<sharks::Share> = self
                .key_shares
                .get(&dead_peer)
                .map(|v| v.iter().map(|(_, s)| s.clone()).collect())
                .unwrap_or_default();
            if shares.len() < t as usize {
                return Err(SecAggError::ReconstructionFailed {
                    peer: dead_peer,
                    reason: "fewer than t key shares submitted for dropped peer",
                });
            }
            let key_bytes = shamir::reconstruct(
                &shares,
                t,
                dead_peer,
                "key shares did not reconstruct a valid K_seed",
            )?;
            let key_array: [u8; 32] = key_bytes
                .try_into()
                .map_err(|_| SecAggError::ReconstructionFailed {
                    peer: dead_peer,
                    reason: "reconstructed K_seed was not 32 bytes",
                })?;
            let dead_secret: StaticSecret = KeyPair::import_private(key_array);
            let reconstructed_pk = PublicKey::from(&dead_secret);
            let expected_pk = self
                .peers
                .get(&dead_peer)
                .expect("dead_peer is drawn from U2, a subset of the roster")
                .keys
                .seed_pk;
            debug!(
                peer = %dead_peer,
                reconstructed_seed_pk = %hex::encode(reconstructed_pk.to_bytes()),
                matches_broadcast_pk = reconstructed_pk.to_bytes() == expected_pk,
                "round3: reconstructed K_seed private key from shares"
            );

            for &survivor in &self.u3 {
                let survivor_keys = &self
                    .peers
                    .get(&survivor)
                    .expect("U3 is a subset of the original roster")
                    .keys;
                let survivor_seed_pk = PublicKey::from(survivor_keys.seed_pk);
                let seed = crypto::derive_pairwise_seed(&dead_secret, &survivor_seed_pk);
                let mask = PairwisePrng::from_pairwise_seed(seed).next() as i32;

                if survivor < dead_peer {
                    self.accumulator = self.accumulator.wrapping_add(mask);
                } else {
                    self.accumulator = self.accumulator.wrapping_sub(mask);
                }
            }
            warn!(peer = %dead_peer, "round3: reconstructed pairwise masks for dropped peer");
        }

        for &alive in &self.u3 {
            let shares: Vec<sharks::Share> = self
                .seed_shares
                .get(&alive)
                .map(|v| v.iter().map(|(_, s)| s.clone()).collect())
                .unwrap_or_default();
            if shares.len() < t as usize {
                return Err(SecAggError::ReconstructionFailed {
                    peer: alive,
                    reason: "fewer than t self-seed shares submitted for surviving peer",
                });
            }
            let seed_bytes = shamir::reconstruct(
                &shares,
                t,
                alive,
                "self-seed shares did not reconstruct a valid seed",
            )?;
            let seed_array: [u8; 4] =
                seed_bytes
                    .try_into()
                    .map_err(|_| SecAggError::ReconstructionFailed {
                        peer: alive,
                        reason: "reconstructed self-mask seed was not 4 bytes",
                    })?;
            let self_mask_seed = u32::from_le_bytes(seed_array);
            let self_mask = PairwisePrng::from_self_mask_seed(self_mask_seed).next() as i32;
            self.accumulator = self.accumulator.wrapping_sub(self_mask);
        }

        self.stage = Stage::Done;
        let mean = (self.accumulator as f64) / FIXED_POINT_SCALE / (self.u3.len() as f64);
        info!(u4 = self.u4.len(), mean, "round3: unmasked and produced mean");
        Ok(mean)
    }

    /// Plaintext mean over the current U₃, for validating the masked
    /// result. Never used by the protocol itself.
    pub fn aggregate_without_secrecy(&self) -> f64 {
        let sum: f64 = self
            .u3
            .iter()
            .map(|id| self.peers.get(id).expect("U3 draws from the roster").secret)
            .sum();
        sum / (self.u3.len() as f64)
    }

    pub fn u1(&self) -> &BTreeSet<Pid> {
        &self.u1
    }

    pub fn u2(&self) -> &BTreeSet<Pid> {
        &self.u2
    }

    pub fn u3(&self) -> &BTreeSet<Pid> {
        &self.u3
    }

    pub fn u4(&self) -> &BTreeSet<Pid> {
        &self.u4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;

    fn run_roster(secrets: &[f64]) -> (Vec<Client>, Aggregator, ProtocolConfig) {
        let config = ProtocolConfig::new(secrets.len() as u32, 2);
        let clients: Vec<Client> = secrets
            .iter()
            .enumerate()
            .map(|(i, &s)| Client::new(Pid::from_index(i as u32), s, config))
            .collect();
        let roster: Vec<(Pid, f64)> = clients.iter().map(|c| (c.id(), c.secret())).collect();
        let aggregator = Aggregator::new(roster, config);
        (clients, aggregator, config)
    }

    #[test]
    fn no_dropout_run_matches_plaintext_mean() {
        let (mut clients, mut aggregator, _config) = run_roster(&[131070.2132, 3.14159265, -42.0, 6.0]);

        let mut keys = BTreeMap::new();
        for c in &mut clients {
            keys.insert(c.id(), c.round0());
        }
        let broadcast = aggregator.round0(keys).unwrap();
        for c in &mut clients {
            c.receive_clients(broadcast.clone()).unwrap();
        }

        let up: BTreeSet<Pid> = clients.iter().map(|c| c.id()).collect();
        let mut outgoing = BTreeMap::new();
        for c in &mut clients {
            if let Some(bundle) = c.round1() {
                outgoing.insert(c.id(), bundle);
            }
        }
        let pivoted = aggregator.round1(&up, outgoing).unwrap();
        for c in &mut clients {
            if let Some(bundle) = pivoted.get(&c.id()) {
                c.receive_ciphertexts(bundle.clone()).unwrap();
            }
        }

        let mut masked = BTreeMap::new();
        for c in &mut clients {
            if let Some(v) = c.round2() {
                masked.insert(c.id(), v);
            }
        }
        let u3 = aggregator.round2(masked).unwrap();
        for c in &mut clients {
            c.receive_client_ids_u3(u3.clone()).unwrap();
        }

        let mut responses = BTreeMap::new();
        for c in &mut clients {
            if let Some(r) = c.round3() {
                responses.insert(c.id(), r.unwrap());
            }
        }
        let mean = aggregator.round3(responses).unwrap();
        let plaintext_mean = aggregator.aggregate_without_secrecy();
        assert!((mean - plaintext_mean).abs() < 1e-3);
    }

    #[test]
    fn dropout_after_round1_still_recovers_correct_mean() {
        let (mut clients, mut aggregator, _config) = run_roster(&[131070.2132, 3.14159265, -42.0, 6.0]);

        let mut keys = BTreeMap::new();
        for c in &mut clients {
            keys.insert(c.id(), c.round0());
        }
        let broadcast = aggregator.round0(keys).unwrap();
        for c in &mut clients {
            c.receive_clients(broadcast.clone()).unwrap();
        }

        let up: BTreeSet<Pid> = clients.iter().map(|c| c.id()).collect();
        let mut outgoing = BTreeMap::new();
        for c in &mut clients {
            if let Some(bundle) = c.round1() {
                outgoing.insert(c.id(), bundle);
            }
        }
        let pivoted = aggregator.round1(&up, outgoing).unwrap();
        for c in &mut clients {
            if let Some(bundle) = pivoted.get(&c.id()) {
                c.receive_ciphertexts(bundle.clone()).unwrap();
            }
        }

        clients[0].put_down();

        let mut masked = BTreeMap::new();
        for c in &mut clients {
            if let Some(v) = c.round2() {
                masked.insert(c.id(), v);
            }
        }
        let u3 = aggregator.round2(masked).unwrap();
        for c in &mut clients {
            if !c.is_down() {
                c.receive_client_ids_u3(u3.clone()).unwrap();
            }
        }

        let mut responses = BTreeMap::new();
        for c in &mut clients {
            if let Some(r) = c.round3() {
                responses.insert(c.id(), r.unwrap());
            }
        }
        let mean = aggregator.round3(responses).unwrap();
        let plaintext_mean = aggregator.aggregate_without_secrecy();
        assert!((mean - plaintext_mean).abs() < 1e-3);
    }

    #[test]
    fn below_threshold_at_round0_is_rejected() {
        let config = ProtocolConfig::new(4, 2);
        let mut aggregator = Aggregator::new(vec![(Pid::from_index(0), 1.0)], config);
        let err = aggregator.round0(BTreeMap::new()).unwrap_err();
        assert!(matches!(err, SecAggError::BelowThreshold { .. }));
    }
}
