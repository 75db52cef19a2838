//! White color temperature.

use serde::{Deserialize, Serialize};

use crate::convert::to_native_scaled;

/// Color temperature on a linear 0-255 mireds-equivalent scale.
///
/// The value is the warm share of the white output: 0 drives only the cold
/// (`w`) channel, 255 only the warm (`m`) channel.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ColorTemperature(u8);

impl ColorTemperature {
    pub const COLDEST: Self = ColorTemperature(0);
    pub const NEUTRAL: Self = ColorTemperature(128);
    pub const WARMEST: Self = ColorTemperature(u8::MAX);

    pub fn new(value: u8) -> Self {
        ColorTemperature(value)
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Derive the temperature from native white channels as
    /// `floor(255 * m / (m + w))`.
    ///
    /// Returns `None` when both channels are dark.
    ///
    /// ```
    /// use dohome_rs::ColorTemperature;
    ///
    /// assert_eq!(ColorTemperature::from_white_channels(2500, 2500).unwrap().value(), 127);
    /// assert_eq!(ColorTemperature::from_white_channels(0, 40).unwrap().value(), 255);
    /// assert!(ColorTemperature::from_white_channels(0, 0).is_none());
    /// ```
    pub fn from_white_channels(cold: u32, warm: u32) -> Option<Self> {
        let total = u64::from(cold) + u64::from(warm);
        if total == 0 {
            return None;
        }
        let value = 255 * u64::from(warm) / total;
        Some(ColorTemperature(value as u8))
    }

    /// Split into native `(cold, warm)` channel values at `brightness` (0-255).
    pub fn white_channels(&self, brightness: u8) -> (u32, u32) {
        let warm = to_native_scaled(self.0, brightness);
        let cold = to_native_scaled(u8::MAX - self.0, brightness);
        (cold, warm)
    }
}

impl Default for ColorTemperature {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

impl From<u8> for ColorTemperature {
    fn from(value: u8) -> Self {
        ColorTemperature(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extremes_use_one_channel() {
        assert_eq!(ColorTemperature::WARMEST.white_channels(255), (0, 5000));
        assert_eq!(ColorTemperature::COLDEST.white_channels(255), (5000, 0));
    }

    #[test]
    fn test_brightness_scales_both_channels() {
        let (cold, warm) = ColorTemperature::NEUTRAL.white_channels(255);
        assert_eq!((cold, warm), (2490, 2510));

        let (cold, warm) = ColorTemperature::NEUTRAL.white_channels(0);
        assert_eq!((cold, warm), (0, 0));
    }

    #[test]
    fn test_channels_recover_temperature() {
        for value in [0u8, 1, 64, 128, 200, 255] {
            let (cold, warm) = ColorTemperature::new(value).white_channels(255);
            let recovered = ColorTemperature::from_white_channels(cold, warm).unwrap();
            assert!(value.abs_diff(recovered.value()) <= 1, "value {value}");
        }
    }
}
