//! Board heuristics for the touchscreen.
//!
//! The same touchscreen controller is fitted to panels of different size and
//! orientation. Which panel sits on a given board is guessed from the
//! accelerometer next to it, based on known Q8 tablets. The guess selects a
//! variant, a fixed bundle of panel settings, which the user may override
//! field by field.

use alloc::string::String;
use log::{info, warn};

use crate::accel::AccelModel;
use crate::config::{Configuration, origin};
use crate::probe::{AuxFlags, Detection};
use crate::touchscreen::TouchscreenModel;

/// Settings written to the touchscreen node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TouchscreenSettings {
    pub variant: u32,
    /// Zero when unknown.
    pub width: u32,
    /// Zero when unknown.
    pub height: u32,
    pub invert_x: bool,
    pub invert_y: bool,
    pub swap_x_y: bool,
    pub firmware_name: Option<String>,
}

struct VariantBundle {
    width: u32,
    height: u32,
    swap_x_y: bool,
    firmware: Option<&'static str>,
}

const GSL1680_A082_VARIANTS: [VariantBundle; 2] = [
    VariantBundle {
        width: 1024,
        height: 600,
        swap_x_y: false,
        firmware: Some("gsl1680-a082-q8-700.fw"),
    },
    VariantBundle {
        width: 480,
        height: 800,
        swap_x_y: true,
        firmware: Some("gsl1680-a082-q8-a70.fw"),
    },
];

const GSL1680_B482_VARIANTS: [VariantBundle; 2] = [
    VariantBundle {
        width: 960,
        height: 640,
        swap_x_y: false,
        firmware: Some("gsl1680-b482-q8-d702.fw"),
    },
    VariantBundle {
        width: 960,
        height: 640,
        swap_x_y: false,
        firmware: Some("gsl1680-b482-q8-a70.fw"),
    },
];

// the controller reports the panel geometry itself
const SINGLE_VARIANT: [VariantBundle; 1] = [VariantBundle {
    width: 0,
    height: 0,
    swap_x_y: false,
    firmware: None,
}];

fn variants(model: TouchscreenModel) -> &'static [VariantBundle] {
    match model {
        TouchscreenModel::Gsl1680A082 => &GSL1680_A082_VARIANTS,
        TouchscreenModel::Gsl1680B482 => &GSL1680_B482_VARIANTS,
        TouchscreenModel::Ektf2127 | TouchscreenModel::Zet6251 => &SINGLE_VARIANT,
    }
}

/// What a heuristic row contributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Hint {
    variant: Option<u32>,
    invert_x: bool,
    invert_y: bool,
}

impl Hint {
    const NONE: Hint = Hint {
        variant: None,
        invert_x: false,
        invert_y: false,
    };
    const INVERT_X: Hint = Hint {
        invert_x: true,
        ..Hint::NONE
    };
    const INVERT_Y: Hint = Hint {
        invert_y: true,
        ..Hint::NONE
    };
    const VARIANT_1: Hint = Hint {
        variant: Some(1),
        ..Hint::NONE
    };
}

struct Heuristic {
    touchscreen: TouchscreenModel,
    accelerometer: AccelModel,
    /// `None` matches any address.
    addr: Option<u16>,
    /// `None` matches either way.
    rda599x: Option<bool>,
    hint: Hint,
}

impl Heuristic {
    fn matches(&self, touchscreen: TouchscreenModel, accel: &Detection<AccelModel>, aux: AuxFlags) -> bool {
        self.touchscreen == touchscreen
            && self.accelerometer == accel.model
            && self.addr.is_none_or(|addr| addr == accel.addr)
            && self.rda599x.is_none_or(|rda| rda == aux.has_rda599x)
    }
}

const fn row(
    touchscreen: TouchscreenModel,
    accelerometer: AccelModel,
    addr: Option<u16>,
    rda599x: Option<bool>,
    hint: Hint,
) -> Heuristic {
    Heuristic {
        touchscreen,
        accelerometer,
        addr,
        rda599x,
        hint,
    }
}

/// First matching row wins.
static HEURISTICS: [Heuristic; 8] = {
    use AccelModel::*;
    use TouchscreenModel::*;
    [
        row(Gsl1680A082, Mc3230, None, None, Hint::INVERT_X),
        row(Gsl1680A082, Dmard10, None, None, Hint::VARIANT_1),
        row(Gsl1680A082, Mxc6225, None, None, Hint::VARIANT_1),
        row(Gsl1680B482, Da280, Some(0x27), None, Hint::NONE),
        row(Gsl1680B482, Da280, None, Some(true), Hint::INVERT_X),
        row(Gsl1680B482, Da280, None, Some(false), Hint::INVERT_Y),
        row(Gsl1680B482, Dmard09, None, None, Hint::INVERT_X),
        row(Gsl1680B482, Mxc6225, None, None, Hint::VARIANT_1),
    ]
};

fn board_hint(
    touchscreen: TouchscreenModel,
    accelerometer: Option<&Detection<AccelModel>>,
    aux: AuxFlags,
) -> Hint {
    let matched = accelerometer.and_then(|accel| {
        HEURISTICS
            .iter()
            .find(|h| h.matches(touchscreen, accel, aux))
    });
    match matched {
        Some(heuristic) => heuristic.hint,
        None => {
            if variants(touchscreen).len() > 1 {
                warn!(
                    "No board heuristic for {:?} with accelerometer {:?}, using variant 0",
                    touchscreen,
                    accelerometer.map(|accel| accel.model)
                );
            }
            Hint::NONE
        }
    }
}

/// Work out the touchscreen settings for the detected hardware.
pub fn resolve(
    touchscreen: TouchscreenModel,
    accelerometer: Option<&Detection<AccelModel>>,
    aux: AuxFlags,
    config: &Configuration,
) -> TouchscreenSettings {
    let hint = match config.variant {
        Some(_) => Hint::NONE,
        None => board_hint(touchscreen, accelerometer, aux),
    };
    let bundles = variants(touchscreen);
    let requested = config.variant.or(hint.variant).unwrap_or(0);
    let (variant, bundle) = match bundles.get(requested as usize) {
        Some(bundle) => (requested, bundle),
        None => {
            warn!("Error unknown touchscreen variant {} using 0", requested);
            (0, &bundles[0])
        }
    };

    let settings = TouchscreenSettings {
        variant,
        width: config.width.unwrap_or(bundle.width),
        height: config.height.unwrap_or(bundle.height),
        invert_x: config.invert_x.unwrap_or(hint.invert_x),
        invert_y: config.invert_y.unwrap_or(hint.invert_y),
        swap_x_y: config.swap_x_y.unwrap_or(bundle.swap_x_y),
        firmware_name: config
            .firmware_name
            .clone()
            .or_else(|| bundle.firmware.map(String::from)),
    };
    if touchscreen.is_gsl1680() {
        report_gsl1680(&settings, config);
    }
    settings
}

/// GSL1680 panels cannot be told apart reliably, tell the user what to try.
fn report_gsl1680(settings: &TouchscreenSettings, config: &Configuration) {
    warn!("gsl1680 touchscreen may require configuration to function properly");
    warn!(
        "Try invert_x={} if x coordinates are inverted",
        !settings.invert_x
    );
    warn!(
        "Try variant={} if coordinates are all over the place",
        u32::from(settings.variant == 0)
    );
    info!("touchscreen variant {} ({})", settings.variant, origin(&config.variant));
    info!("touchscreen width {} ({})", settings.width, origin(&config.width));
    info!("touchscreen height {} ({})", settings.height, origin(&config.height));
    info!("touchscreen invert_x {} ({})", settings.invert_x, origin(&config.invert_x));
    info!("touchscreen invert_y {} ({})", settings.invert_y, origin(&config.invert_y));
    info!("touchscreen swap_x_y {} ({})", settings.swap_x_y, origin(&config.swap_x_y));
    info!(
        "touchscreen firmware {} ({})",
        settings.firmware_name.as_deref().unwrap_or("none"),
        origin(&config.firmware_name)
    );
}
