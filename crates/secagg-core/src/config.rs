//! Run-wide protocol parameters.

use crate::error::SecAggError;
use serde::{Deserialize, Serialize};

/// Parameters shared by every client and the aggregator for one run:
/// the number of parties `n` and the reconstruction threshold `t`.
///
/// The protocol requires `|U1| >= t` at round 0 and every subsequent
/// `Uk >= t` at the step consuming it; `ProtocolConfig::validate`
/// checks the static half of that (`t` itself is sane) up front so a
/// misconfigured run fails before any round runs rather than later
/// with a confusing `BelowThreshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Total number of clients expected to participate.
    pub n: u32,
    /// Minimum number of surviving shares needed to reconstruct a
    /// dropped peer's seed material.
    pub t: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self { n: 4, t: 2 }
    }
}

impl ProtocolConfig {
    pub fn new(n: u32, t: u32) -> Self {
        Self { n, t }
    }

    /// Validates `t` against `n` in isolation, independent of how many
    /// clients actually show up in round 0 (that's `BelowThreshold`,
    /// raised later by the aggregator/client once real membership is
    /// known).
    pub fn validate(&self) -> Result<(), SecAggError> {
        if self.t < 2 {
            return Err(SecAggError::InvalidConfig("t must be at least 2"));
        }
        if self.t > self.n {
            return Err(SecAggError::InvalidConfig("t must not exceed n"));
        }
        Ok(())
    }
}

/// Fixed-point scale applied to secrets before summing.
pub const FIXED_POINT_SCALE: f64 = 10_000.0;
