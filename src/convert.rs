//! Conversions between the device's native 0-5000 scale and 0-255.
//!
//! The round trip 0-255 -> native -> 0-255 truncates at both ends and does not
//! always reproduce its input. Devices only understand the native scale, so
//! the formulas below are kept exactly as the firmware expects them.

/// Upper bound of the native intensity scale.
pub const NATIVE_MAX: u32 = 5000;

const NORMALIZED_MAX: u64 = 255;

/// Native value as a fraction of full scale. Not clamped.
///
/// ```
/// assert_eq!(dohome_rs::convert::to_percent(2500), 0.5);
/// assert_eq!(dohome_rs::convert::to_percent(7500), 1.5);
/// ```
pub fn to_percent(native: u32) -> f64 {
    f64::from(native) / f64::from(NATIVE_MAX)
}

/// `floor(255 * native / 5000)`. Out-of-range input yields out-of-range output.
pub fn to_normalized(native: u32) -> u32 {
    (NORMALIZED_MAX * u64::from(native) / u64::from(NATIVE_MAX)) as u32
}

/// `round(5000 * normalized / 255)`.
pub fn to_native(normalized: u8) -> u32 {
    div_round(u64::from(NATIVE_MAX) * u64::from(normalized), NORMALIZED_MAX)
}

/// `round(5000 * (value / 255) * (brightness / 255))`, rounding once at the end.
pub fn to_native_scaled(value: u8, brightness: u8) -> u32 {
    div_round(
        u64::from(NATIVE_MAX) * u64::from(value) * u64::from(brightness),
        NORMALIZED_MAX * NORMALIZED_MAX,
    )
}

/// [`to_normalized`] saturated into a color channel.
pub(crate) fn to_channel(native: u32) -> u8 {
    u8::try_from(to_normalized(native)).unwrap_or(u8::MAX)
}

fn div_round(numerator: u64, denominator: u64) -> u32 {
    ((numerator + denominator / 2) / denominator) as u32
}
