//! Secure Aggregation protocol core.
//!
//! Implements the four-round client/aggregator state machine: key
//! agreement, dual pairwise-plus-self masking, Shamir-shared dropout
//! recovery, and the signed 32-bit unmasking arithmetic that reproduces
//! the sum (and mean) of surviving clients' secrets without the
//! aggregator ever seeing an individual value.
//!
//! Dependency order mirrors the module list below: [`crypto`] is a
//! leaf, [`client`] and [`aggregator`] build on it and on
//! [`messages`]/[`shamir`], and a driver (outside this crate) wires
//! [`client::Client`] and [`aggregator::Aggregator`] together round by
//! round.

pub mod aggregator;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod messages;
pub mod pid;
pub mod shamir;

pub use aggregator::Aggregator;
pub use client::Client;
pub use config::ProtocolConfig;
pub use error::{Result, SecAggError};
pub use pid::Pid;
