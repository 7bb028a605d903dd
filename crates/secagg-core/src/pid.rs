//! Party identifiers.
//!
//! A [`Pid`] is the 128-bit opaque identifier every client and the
//! aggregator use to refer to a party. It is totally ordered; that
//! order is what the pairwise-masking sign convention in
//! [`crate::crypto`] keys off of.

use std::fmt;

/// A party identifier: 128 bits, totally ordered, opaque otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Pid(pub u128);

impl Pid {
    pub fn new(id: u128) -> Self {
        Self(id)
    }

    /// Builds a deterministic `Pid` for the `i`-th party in a run. Handy
    /// for tests and the driver, where parties don't need real entropy.
    pub fn from_index(i: u32) -> Self {
        Self(i as u128)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}
