//! Normalized light state.

use serde::{Deserialize, Serialize};

use crate::convert::{to_channel, to_native_scaled, to_normalized};
use crate::types::{Color, ColorTemperature, LightMode, NativeChannels};

/// A complete, normalized snapshot of a light's output.
///
/// States are values: they are derived whole from a device reply (or built
/// by the caller) and never patched field by field.
///
/// # Examples
///
/// ```
/// use dohome_rs::{LightMode, LightState, NativeChannels};
///
/// let state = LightState::from_channels(&NativeChannels::rgb(5000, 0, 0));
/// assert!(state.enabled());
/// assert_eq!(state.mode(), LightMode::Rgb);
/// assert_eq!(state.color().red(), 255);
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct LightState {
    enabled: bool,
    mode: LightMode,
    color: Color,
    color_temperature: ColorTemperature,
    brightness: u8,
}

impl LightState {
    /// All channels dark.
    pub fn off() -> Self {
        LightState {
            enabled: false,
            mode: LightMode::Rgb,
            color: Color::new(),
            color_temperature: ColorTemperature::NEUTRAL,
            brightness: 0,
        }
    }

    /// RGB output; `color` is scaled by `brightness / 255` when applied.
    pub fn rgb(color: Color, brightness: u8) -> Self {
        LightState {
            enabled: true,
            mode: LightMode::Rgb,
            color,
            color_temperature: ColorTemperature::NEUTRAL,
            brightness,
        }
    }

    /// White output from the cold/warm channel pair.
    pub fn white(color_temperature: ColorTemperature, brightness: u8) -> Self {
        LightState {
            enabled: true,
            mode: LightMode::White,
            color: Color::new(),
            color_temperature,
            brightness,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn mode(&self) -> LightMode {
        self.mode
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn color_temperature(&self) -> ColorTemperature {
        self.color_temperature
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    /// Derive the state reported by a get-state reply.
    ///
    /// Any lit RGB channel means RGB mode at full brightness with each channel
    /// normalized. Otherwise lit white channels mean WHITE mode with the
    /// brightness taken from `w + m`; all dark means off.
    pub fn from_channels(channels: &NativeChannels) -> Self {
        if channels.rgb_total() != 0 {
            let color = Color::rgb(
                to_channel(channels.r),
                to_channel(channels.g),
                to_channel(channels.b),
            );
            return LightState::rgb(color, u8::MAX);
        }

        match ColorTemperature::from_white_channels(channels.w, channels.m) {
            Some(temperature) => {
                let total = channels.w.saturating_add(channels.m);
                let brightness = u8::try_from(to_normalized(total)).unwrap_or(u8::MAX);
                LightState::white(temperature, brightness)
            }
            None => LightState::off(),
        }
    }

    /// Native channel values that realize this state.
    pub fn to_channels(&self) -> NativeChannels {
        if !self.enabled {
            return NativeChannels::OFF;
        }
        match self.mode {
            LightMode::Rgb => NativeChannels::rgb(
                to_native_scaled(self.color.red, self.brightness),
                to_native_scaled(self.color.green, self.brightness),
                to_native_scaled(self.color.blue, self.brightness),
            ),
            LightMode::White => {
                let (cold, warm) = self.color_temperature.white_channels(self.brightness);
                NativeChannels::white(cold, warm)
            }
        }
    }

    /// Fold the states of a group's members into one.
    ///
    /// Members must be given in a stable order. The group is off unless a
    /// member is on; the first enabled member supplies mode and color and the
    /// brightness is the highest among enabled members.
    pub fn aggregate<'a, I>(states: I) -> Self
    where
        I: IntoIterator<Item = &'a LightState>,
    {
        let mut enabled = states.into_iter().filter(|state| state.enabled);
        let Some(first) = enabled.next() else {
            return LightState::off();
        };
        let brightness = enabled
            .map(|state| state.brightness)
            .fold(first.brightness, u8::max);
        LightState {
            brightness,
            ..*first
        }
    }
}

impl Default for LightState {
    fn default() -> Self {
        Self::off()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_dark_is_disabled() {
        let state = LightState::from_channels(&NativeChannels::OFF);
        assert!(!state.enabled());
        assert_eq!(state, LightState::off());
    }

    #[test]
    fn test_any_rgb_channel_is_rgb_mode() {
        let state = LightState::from_channels(&NativeChannels::rgb(0, 0, 1));
        assert!(state.enabled());
        assert_eq!(state.mode(), LightMode::Rgb);
        assert_eq!(state.color(), Color::rgb(0, 0, 0));
        assert_eq!(state.brightness(), 255);

        let state = LightState::from_channels(&NativeChannels {
            r: 2500,
            g: 5000,
            b: 0,
            w: 1000,
            m: 1000,
        });
        assert_eq!(state.mode(), LightMode::Rgb);
        assert_eq!(state.color(), Color::rgb(127, 255, 0));
    }

    #[test]
    fn test_white_channels_give_white_mode() {
        let state = LightState::from_channels(&NativeChannels::white(1250, 1250));
        assert!(state.enabled());
        assert_eq!(state.mode(), LightMode::White);
        assert_eq!(state.brightness(), 127);
        assert_eq!(state.color_temperature().value(), 127);

        let warm_only = LightState::from_channels(&NativeChannels::white(0, 5000));
        assert_eq!(warm_only.color_temperature(), ColorTemperature::WARMEST);
        assert_eq!(warm_only.brightness(), 255);
    }

    #[test]
    fn test_rgb_to_channels_scales_by_brightness() {
        let full = LightState::rgb(Color::rgb(255, 0, 0), 255).to_channels();
        assert_eq!(full, NativeChannels::rgb(5000, 0, 0));

        let half = LightState::rgb(Color::rgb(255, 255, 0), 128).to_channels();
        assert_eq!(half, NativeChannels::rgb(2510, 2510, 0));
    }

    #[test]
    fn test_white_to_channels() {
        let channels = LightState::white(ColorTemperature::WARMEST, 255).to_channels();
        assert_eq!(channels, NativeChannels::white(0, 5000));
    }

    #[test]
    fn test_disabled_state_is_all_zero() {
        let mut state = LightState::rgb(Color::rgb(255, 0, 0), 255);
        state.enabled = false;
        assert_eq!(state.to_channels(), NativeChannels::OFF);
    }

    #[test]
    fn test_aggregate() {
        let red = LightState::rgb(Color::rgb(255, 0, 0), 100);
        let white = LightState::white(ColorTemperature::NEUTRAL, 200);
        let off = LightState::off();

        assert_eq!(LightState::aggregate([&off, &off]), LightState::off());
        assert_eq!(LightState::aggregate(Vec::<&LightState>::new()), LightState::off());

        let combined = LightState::aggregate([&off, &red, &white]);
        assert_eq!(combined.mode(), LightMode::Rgb);
        assert_eq!(combined.color(), Color::rgb(255, 0, 0));
        assert_eq!(combined.brightness(), 200);
    }
}
