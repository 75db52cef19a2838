//! Value types for light state and device payloads.

mod channels;
mod color;
mod mode;
mod temperature;

pub use channels::NativeChannels;
pub use color::Color;
pub use mode::LightMode;
pub use temperature::ColorTemperature;
