//! Volume representation and conversions.
//!
//! Internally volume is linear in `0..=65536` ([`VolumeValue::NORM`] is full
//! scale). Devices speak percent in `0..=100`. The streaming receiver takes
//! attenuation in dB.

use serde::{Deserialize, Serialize};

/// Linear volume, `0..=VolumeValue::NORM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeValue(u32);

/// dB value that mutes the streaming receiver.
pub const RAOP_VOLUME_MUTED_DB: f32 = -144.0;
/// Quietest audible dB value on the streaming receiver.
pub const RAOP_VOLUME_MIN_DB: f32 = -30.0;
/// Full-scale dB value on the streaming receiver.
pub const RAOP_VOLUME_MAX_DB: f32 = 0.0;

impl VolumeValue {
    /// Full scale.
    pub const NORM: u32 = 0x10000;
    pub const MUTED: Self = Self(0);
    pub const MAX: Self = Self(Self::NORM);

    /// Clamps `raw` into range.
    pub fn new(raw: u32) -> Self {
        Self(raw.min(Self::NORM))
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    /// Converts to device percent, truncating.
    ///
    /// The round trip through percent is lossy: 65536 linear steps map onto
    /// 101 percent steps. Both directions are monotonic.
    pub fn to_percent(self) -> u8 {
        (u64::from(self.0) * 100 / u64::from(Self::NORM)) as u8
    }

    /// Converts from device percent. Values above 100 clamp to full scale.
    pub fn from_percent(percent: u32) -> Self {
        let percent = u64::from(percent.min(100));
        Self((percent * u64::from(Self::NORM) / 100) as u32)
    }

    /// Maps onto the streaming receiver's dB scale.
    ///
    /// Zero mutes; anything else lands linearly in `-30.0..=0.0`.
    pub fn to_raop_db(self) -> f32 {
        if self.0 == 0 {
            return RAOP_VOLUME_MUTED_DB;
        }
        let fraction = self.0 as f32 / Self::NORM as f32;
        RAOP_VOLUME_MIN_DB + (RAOP_VOLUME_MAX_DB - RAOP_VOLUME_MIN_DB) * fraction
    }
}

impl Default for VolumeValue {
    fn default() -> Self {
        Self::MAX
    }
}
