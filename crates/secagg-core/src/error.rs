//! Error surface for the secure aggregation protocol.
//!
//! Every failure kind the protocol can raise is a variant here. Nothing
//! in this crate retries internally on one of these: a retry cannot
//! improve the cryptographic outcome of a dropped round, so every
//! variant is terminal for the run that raised it (the driver decides
//! whether to start a fresh run).

use crate::pid::Pid;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecAggError {
    #[error("threshold not met: have {have}, need {need}")]
    BelowThreshold { have: usize, need: usize },

    #[error("received {got} clients, below threshold {threshold}")]
    TooFewClients { got: usize, threshold: usize },

    #[error("two peers reported identical public keys")]
    KeyCollision,

    #[error("received {got} ciphertexts, need at least {need}")]
    TooFewCiphertexts { got: usize, need: usize },

    #[error("received {got} survivors, below threshold {threshold}")]
    TooFewSurvivors { got: usize, threshold: usize },

    #[error("peer {0} listed in U3 was never seen in U2")]
    MembershipViolation(Pid),

    #[error("ciphertext addressed to {expected_recipient} decrypted with sender/recipient fields pointing elsewhere (claimed sender {claimed_sender}, claimed recipient {claimed_recipient})")]
    CiphertextMisdirected {
        expected_recipient: Pid,
        claimed_sender: Pid,
        claimed_recipient: Pid,
    },

    #[error("AES-GCM tag verification failed while decrypting ciphertext from {sender}")]
    DecryptionFailed { sender: Pid },

    #[error("Shamir reconstruction failed for peer {peer}: {reason}")]
    ReconstructionFailed { peer: Pid, reason: &'static str },

    #[error("invalid protocol configuration: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = std::result::Result<T, SecAggError>;
