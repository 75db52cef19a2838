//! Raw channel values in device units.

use serde::{Deserialize, Serialize};

/// The five output channels of a DoHome fixture in native units (0-5000).
///
/// `w` is the cold white channel and `m` the warm one. Missing fields in a
/// device reply decode as zero.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct NativeChannels {
    pub r: u32,
    pub g: u32,
    pub b: u32,
    pub w: u32,
    pub m: u32,
}

impl NativeChannels {
    /// All channels dark.
    pub const OFF: Self = NativeChannels {
        r: 0,
        g: 0,
        b: 0,
        w: 0,
        m: 0,
    };

    pub fn rgb(r: u32, g: u32, b: u32) -> Self {
        NativeChannels { r, g, b, ..Self::OFF }
    }

    pub fn white(w: u32, m: u32) -> Self {
        NativeChannels { w, m, ..Self::OFF }
    }

    pub fn rgb_total(&self) -> u64 {
        u64::from(self.r) + u64::from(self.g) + u64::from(self.b)
    }
}
