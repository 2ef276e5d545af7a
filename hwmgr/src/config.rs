//! User overrides for the touchscreen settings.
//!
//! Every field left at `None` is worked out from the detected hardware.

use alloc::string::String;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    /// Variant index; skips the board heuristics when set.
    pub variant: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub invert_x: Option<bool>,
    pub invert_y: Option<bool>,
    pub swap_x_y: Option<bool>,
    pub firmware_name: Option<String>,
}

impl Configuration {
    /// Configuration with every setting left to autodetection.
    pub fn auto() -> Configuration {
        Configuration::default()
    }

    pub fn with_variant(mut self, variant: u32) -> Self {
        self.variant = Some(variant);
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_invert_x(mut self, invert: bool) -> Self {
        self.invert_x = Some(invert);
        self
    }

    pub fn with_invert_y(mut self, invert: bool) -> Self {
        self.invert_y = Some(invert);
        self
    }

    pub fn with_swap_x_y(mut self, swap: bool) -> Self {
        self.swap_x_y = Some(swap);
        self
    }

    pub fn with_firmware_name(mut self, name: impl Into<String>) -> Self {
        self.firmware_name = Some(name.into());
        self
    }
}

/// Where a resolved setting came from, for the log.
pub(crate) fn origin<T>(field: &Option<T>) -> &'static str {
    match field {
        Some(_) => "user supplied",
        None => "auto",
    }
}
