//! Light output mode.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// Which set of channels a light is driving.
#[derive(
    Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum LightMode {
    /// The red, green and blue channels.
    #[default]
    Rgb,
    /// The cold (`w`) and warm (`m`) white channels.
    White,
}
