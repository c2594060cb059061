use std::fmt;

use serde::{Deserialize, Serialize};

use crate::EncodecError;

/// Target bit rates a 24 kHz codec can run at.
///
/// Serializes as the kbps value, e.g. `6.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub enum Bandwidth {
    Kbps1_5,
    Kbps3,
    Kbps6,
    Kbps12,
    Kbps24,
}

impl Bandwidth {
    /// All supported bandwidths, lowest first.
    pub const ALL: [Bandwidth; 5] = [
        Self::Kbps1_5,
        Self::Kbps3,
        Self::Kbps6,
        Self::Kbps12,
        Self::Kbps24,
    ];

    /// The highest bandwidth, at which every quantizer stage is active.
    pub const MAX_KBPS: f64 = 24.0;

    pub fn kbps(self) -> f64 {
        match self {
            Self::Kbps1_5 => 1.5,
            Self::Kbps3 => 3.0,
            Self::Kbps6 => 6.0,
            Self::Kbps12 => 12.0,
            Self::Kbps24 => 24.0,
        }
    }

    /// Number of active stages out of `total_quantizers`:
    /// `round(kbps / 24 * total_quantizers)`.
    pub fn num_quantizers(self, total_quantizers: usize) -> usize {
        (self.kbps() / Self::MAX_KBPS * total_quantizers as f64).round() as usize
    }
}

impl TryFrom<f64> for Bandwidth {
    type Error = EncodecError;

    fn try_from(kbps: f64) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|b| b.kbps() == kbps)
            .ok_or(EncodecError::UnsupportedBandwidth(kbps))
    }
}

impl From<Bandwidth> for f64 {
    fn from(b: Bandwidth) -> f64 {
        b.kbps()
    }
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} kbps", self.kbps())
    }
}
