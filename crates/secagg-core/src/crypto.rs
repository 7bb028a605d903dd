//! Crypto helper: ECDH key pairs, shared-secret derivation, AES-GCM
//! encrypt/decrypt, and the seeded PRNG used for both pairwise and
//! self masks.
//!
//! One curve is used for both `K_seed` and `K_enc` (X25519); mixing
//! curves between the two roles would break symmetry between parties
//! that don't negotiate a curve per key.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_core::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{Result, SecAggError};
use crate::pid::Pid;

/// GCM's 96-bit nonce is the size its security proof assumes; this
/// rewrite uses the standard 96-bit nonce rather than a 16-byte IV.
const NONCE_LEN: usize = 12;

/// Domain-separation strings for HKDF, so `K_seed` and `K_enc` never
/// derive the same bytes from the same raw DH output even if a future
/// refactor reused one `StaticSecret` for both roles.
const AES_KEY_INFO: &[u8] = b"secure-agg/v1/aes-key";

/// An ECDH key pair on X25519. Used for both `K_seed` and `K_enc`;
/// which role a given instance plays is a matter of which field of
/// [`crate::client::Client`] holds it, not of the type.
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generates a fresh key pair from the OS CSPRNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public(&self) -> PublicKey {
        self.public
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Exports the private scalar to its portable byte form so it can
    /// be Shamir-split.
    pub fn export_private(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Re-imports a private scalar reconstructed from Shamir shares.
    /// Exported-key round-trip: importing the
    /// reconstructed bytes must yield a key equivalent to the original
    /// for DH, which holds here because `sharks` reconstructs the
    /// exact 32 bytes originally split, and `StaticSecret::from`
    /// deterministically clamps them the same way every time.
    pub fn import_private(bytes: [u8; 32]) -> StaticSecret {
        StaticSecret::from(bytes)
    }

    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }
}

fn diffie_hellman(my_secret: &StaticSecret, peer_public: &PublicKey) -> [u8; 32] {
    *my_secret.diffie_hellman(peer_public).as_bytes()
}

/// Derives the pairwise PRNG seed between `my_secret` and `peer`, per
/// a 16-bit window at byte offset 1 of the DH output,
/// little-endian. This yields only 2^16 distinct seeds per pair; kept
/// at this width rather than widened, since both parties must extract
/// the same window for the derived seed to agree.
///
/// Takes a raw `StaticSecret` rather than a [`KeyPair`] so the
/// aggregator can call it on a `K_seed` private key reconstructed from
/// Shamir shares, which has no accompanying
/// `KeyPair::public()` worth keeping around.
pub fn derive_pairwise_seed(my_secret: &StaticSecret, peer_seed_public: &PublicKey) -> i16 {
    let shared = diffie_hellman(my_secret, peer_seed_public);
    i16::from_le_bytes([shared[1], shared[2]])
}

/// Derives the 256-bit pairwise AES-GCM key between `my_secret` and
/// `peer`, via HKDF-SHA256 over the raw DH output.
pub fn derive_pairwise_aes_key(my_secret: &StaticSecret, peer_enc_public: &PublicKey) -> [u8; 32] {
    let shared = diffie_hellman(my_secret, peer_enc_public);
    let hk = Hkdf::<Sha256>::new(None, &shared);
    let mut key_bytes = [0u8; 32];
    hk.expand(AES_KEY_INFO, &mut key_bytes)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    key_bytes
}

/// Encrypts `plaintext` under `key`, sampling a fresh nonce. Returns
/// `(ciphertext_with_tag, nonce)`.
pub fn aead_encrypt(key: &[u8; 32], plaintext: &[u8]) -> (Vec<u8>, [u8; NONCE_LEN]) {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .expect("AES-256-GCM encryption over an in-memory buffer cannot fail");
    (ciphertext, nonce_bytes)
}

/// Decrypts `ciphertext` under `key` and `nonce`. Fails with
/// [`SecAggError::DecryptionFailed`] on tag mismatch.
pub fn aead_decrypt(
    key: &[u8; 32],
    ciphertext: &[u8],
    nonce: &[u8; NONCE_LEN],
    sender: Pid,
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(nonce);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| SecAggError::DecryptionFailed { sender })
}

/// A deterministic PRNG seeded so that two parties who derive the
/// same seed produce byte-identical output sequences. `ChaCha20Rng`
/// reseeded here from the narrower 16-bit pairwise seed rather than
/// the full 32-byte DH output.
pub struct PairwisePrng(ChaCha20Rng);

impl PairwisePrng {
    /// Seeds from the 16-bit pairwise seed derived via
    /// [`derive_pairwise_seed`].
    pub fn from_pairwise_seed(seed: i16) -> Self {
        let mut seed_bytes = [0u8; 32];
        seed_bytes[0..2].copy_from_slice(&seed.to_le_bytes());
        Self(ChaCha20Rng::from_seed(seed_bytes))
    }

    /// Seeds from a client's own 32-bit self-mask seed.
    pub fn from_self_mask_seed(seed: u32) -> Self {
        let mut seed_bytes = [0u8; 32];
        seed_bytes[0..4].copy_from_slice(&seed.to_le_bytes());
        Self(ChaCha20Rng::from_seed(seed_bytes))
    }

    /// Draws the next 32-bit unsigned mask value.
    pub fn next(&mut self) -> u32 {
        self.0.next_u32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_dh_produces_equal_seed_and_key() {
        let a_seed = KeyPair::generate();
        let b_seed = KeyPair::generate();
        let a_enc = KeyPair::generate();
        let b_enc = KeyPair::generate();

        let seed_ab = derive_pairwise_seed(a_seed.secret(), &b_seed.public());
        let seed_ba = derive_pairwise_seed(b_seed.secret(), &a_seed.public());
        assert_eq!(seed_ab, seed_ba);

        let key_ab = derive_pairwise_aes_key(a_enc.secret(), &b_enc.public());
        let key_ba = derive_pairwise_aes_key(b_enc.secret(), &a_enc.public());
        assert_eq!(key_ab, key_ba);
    }

    #[test]
    fn pairwise_prng_is_deterministic_given_same_seed() {
        let mut a = PairwisePrng::from_pairwise_seed(1234);
        let mut b = PairwisePrng::from_pairwise_seed(1234);
        for _ in 0..8 {
            assert_eq!(a.next(), b.next());
        }
    }

    #[test]
    fn distinct_seeds_diverge() {
        let mut a = PairwisePrng::from_pairwise_seed(1);
        let mut b = PairwisePrng::from_pairwise_seed(2);
        assert_ne!(a.next(), b.next());
    }

    #[test]
    fn decrypt_rejects_tampered_ciphertext() {
        let key = [7u8; 32];
        let (mut ciphertext, nonce) = aead_encrypt(&key, b"pairwise share payload");
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;
        let err = aead_decrypt(&key, &ciphertext, &nonce, Pid::new(1)).unwrap_err();
        assert!(matches!(err, SecAggError::DecryptionFailed { .. }));
    }

    #[test]
    fn export_import_round_trips_for_dh() {
        let original = KeyPair::generate();
        let peer = KeyPair::generate();

        let exported = original.export_private();
        let reimported = KeyPair::import_private(exported);

        let direct = derive_pairwise_aes_key(original.secret(), &peer.public());
        let via_reimport = derive_pairwise_aes_key(&reimported, &peer.public());
        assert_eq!(direct, via_reimport);
    }
}
