//! Shamir `(t, N)` secret sharing over raw bytes.
//!
//! Each protocol run requires splitting two byte strings per client
//! (the exported `K_seed` private key, and the self-mask seed) with
//! share indices `1..N` assigned by peer rank. A prime-field secret
//! sharing scheme would silently reduce a 32-byte X25519 scalar modulo
//! the curve25519 group order before sharing it, which does not
//! round-trip an arbitrary private key. `sharks` splits raw bytes over
//! GF(256) directly, so that's what this module wraps.

use sharks::{Share, Sharks};

use crate::error::{Result, SecAggError};
use crate::pid::Pid;

/// Splits `secret` into `n` shares requiring `t` to reconstruct,
/// indexed `1..=n` in the order `sharks` hands them out.
pub fn split(secret: &[u8], t: u8, n: u8) -> Vec<Share> {
    Sharks(t).dealer(secret).take(n as usize).collect()
}

/// Reconstructs a secret from `>= t` shares.
/// `ReconstructionFailed`: raised here when `sharks` can't recover a
/// consistent secret from the shares given (too few, or shares from
/// different sharings).
pub fn reconstruct(shares: &[Share], t: u8, peer: Pid, reason: &'static str) -> Result<Vec<u8>> {
    Sharks(t)
        .recover(shares)
        .map_err(|_| SecAggError::ReconstructionFailed { peer, reason })
}

/// The 1-based index `sharks` assigned a share, exposed for the wire
/// (see `ShareEntry.index`).
pub fn share_index(share: &Share) -> u8 {
    share.x.0
}

/// Serializes a share to bytes for inclusion in a [`crate::messages::CiphertextPayload`]
/// or a [`crate::messages::ShareEntry`].
pub fn share_to_bytes(share: &Share) -> Vec<u8> {
    Vec::from(share)
}

/// Deserializes a share previously produced by [`share_to_bytes`].
pub fn share_from_bytes(bytes: &[u8], peer: Pid, reason: &'static str) -> Result<Share> {
    Share::try_from(bytes).map_err(|_| SecAggError::ReconstructionFailed { peer, reason })
}

/// Assigns each peer in `ranked_peers` (ascending `Pid` order, self
/// included at its rank) the share whose 1-based index equals that
/// peer's rank: "index(k) =
/// rank of peer k in the fixed peer ordering; own index = rank of
/// self" — so a client's own share is whichever share lands at its
/// own rank, never forced to `N`.
pub fn assign_by_rank(shares: Vec<Share>, ranked_peers: &[Pid]) -> Vec<(Pid, Share)> {
    ranked_peers
        .iter()
        .zip(shares.into_iter())
        .map(|(&pid, share)| (pid, share))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_reconstruct_round_trips() {
        let secret = b"a 32 byte x25519 private scalar!".to_vec();
        let shares = split(&secret, 3, 5);
        let recovered = reconstruct(&shares[0..3], 3, Pid::new(0), "test").unwrap();
        assert_eq!(recovered, secret);
    }

    #[test]
    fn fewer_than_threshold_shares_fail() {
        let secret = b"self mask seed bytes".to_vec();
        let shares = split(&secret, 3, 5);
        let result = reconstruct(&shares[0..2], 3, Pid::new(0), "too few shares");
        assert!(result.is_err());
    }

    #[test]
    fn share_bytes_round_trip() {
        let secret = b"seed".to_vec();
        let shares = split(&secret, 2, 3);
        for share in &shares {
            let bytes = share_to_bytes(share);
            let back = share_from_bytes(&bytes, Pid::new(0), "test").unwrap();
            assert_eq!(share_index(&back), share_index(share));
        }
    }

    #[test]
    fn assign_by_rank_matches_fixed_ordering() {
        let pids = [Pid::new(10), Pid::new(20), Pid::new(30)];
        let shares = split(b"secret!!", 2, 3);
        let assigned = assign_by_rank(shares, &pids);
        assert_eq!(assigned[0].0, Pid::new(10));
        assert_eq!(share_index(&assigned[0].1), 1);
        assert_eq!(assigned[2].0, Pid::new(30));
        assert_eq!(share_index(&assigned[2].1), 3);
    }
}
