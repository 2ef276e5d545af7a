//! Multi-candidate probing of one device class.
//!
//! A class is a list of [Candidate]s, each an I2C address plus an identify
//! routine. Candidates are tried in order and the first positive
//! identification wins. The class's resources are held by a [ProbeSession]
//! for the duration of the probe and handed back in reverse order however
//! the probe ends.

use alloc::boxed::Box;
use core::fmt::Debug;
use log::{error, info, warn};

use dt::DeviceTree;

use crate::bus::{BusError, Delay, I2cAdapter, I2cClient};
use crate::error::ProbeError;
use crate::resource::{Pinctrl, PowerGpio, Regulator, ResourceError, ResourceProvider};

/// A chip model a probe routine can identify.
pub trait ChipModel: Copy + Debug + PartialEq + 'static {
    /// Device tree compatible string the chip's driver binds to.
    fn compatible(&self) -> &'static str;
}

/// Facts learned while probing that matter beyond the probed class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuxFlags {
    /// An RDA599x combo chip answered on the accelerometer bus.
    pub has_rda599x: bool,
}

/// What a probe routine may touch besides its client.
pub struct ProbeEnv<'a> {
    pub delay: &'a mut dyn Delay,
    pub aux: &'a mut AuxFlags,
}

/// Identify routine: `Ok(Some(model))` on a positive identification,
/// `Ok(None)` when the chip at the address is something else.
pub type ProbeFn<M> = fn(&mut I2cClient<'_>, &mut ProbeEnv<'_>) -> Result<Option<M>, BusError>;

pub struct Candidate<M: 'static> {
    pub addr: u16,
    pub probe: ProbeFn<M>,
}

/// Outcome of one identify routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus<M> {
    Found(M, &'static str),
    NotPresent,
    BusStuck,
}

impl<M: ChipModel> From<Result<Option<M>, BusError>> for ProbeStatus<M> {
    fn from(value: Result<Option<M>, BusError>) -> Self {
        match value {
            Ok(Some(model)) => ProbeStatus::Found(model, model.compatible()),
            Ok(None) | Err(BusError::NoDevice) | Err(BusError::Io) => ProbeStatus::NotPresent,
            Err(BusError::Timeout) => ProbeStatus::BusStuck,
        }
    }
}

/// A positively identified chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection<M> {
    pub model: M,
    pub addr: u16,
    pub compatible: &'static str,
}

/// Walk `candidates` in order on `bus`.
///
/// Stops at the first chip found. A bus timeout stops the walk too, since
/// later candidates on a stuck bus would only time out again.
pub fn scan<M: ChipModel>(
    bus: &mut dyn I2cAdapter,
    env: &mut ProbeEnv<'_>,
    candidates: &[Candidate<M>],
) -> Result<Option<Detection<M>>, ProbeError> {
    for candidate in candidates {
        let mut client = I2cClient::new(&mut *bus, candidate.addr);
        match ProbeStatus::from((candidate.probe)(&mut client, env)) {
            ProbeStatus::Found(model, compatible) => {
                info!("Found {} at 0x{:02x}", compatible, candidate.addr);
                return Ok(Some(Detection {
                    model,
                    addr: candidate.addr,
                    compatible,
                }));
            }
            ProbeStatus::NotPresent => continue,
            ProbeStatus::BusStuck => {
                warn!("Bus timeout probing 0x{:02x}, giving up", candidate.addr);
                return Err(ProbeError::BusTimeout {
                    addr: candidate.addr,
                });
            }
        }
    }
    Ok(None)
}

/// A device class: one template node and the chips that may sit behind it.
pub trait DeviceClass {
    type Model: ChipModel;
    /// Name of the template node, also used in log messages.
    const NODE_NAME: &'static str;
    /// Settle time after power-up before the first transfer.
    const POWER_ON_DELAY_MS: u32 = 0;

    fn candidates() -> &'static [Candidate<Self::Model>];
}

/// Result of probing a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionResult<M> {
    pub detection: Option<Detection<M>>,
    /// The class has a vddio supply.
    pub supply_acquired: bool,
    /// The chip only answered once the supply was switched on.
    pub supply_required: bool,
}

impl<M> DetectionResult<M> {
    /// A chip was found without help from a supply the node references.
    pub fn supply_unused(&self) -> bool {
        self.detection.is_some() && self.supply_acquired && !self.supply_required
    }
}

/// Resources held while a class is probed.
///
/// Dropping the session powers the chip down and releases everything in the
/// reverse order of acquisition.
#[derive(Default)]
struct ProbeSession {
    pins: Option<Box<dyn Pinctrl>>,
    bus: Option<Box<dyn I2cAdapter>>,
    supply: Option<Box<dyn Regulator>>,
    supply_enabled: bool,
    power: Option<Box<dyn PowerGpio>>,
    power_driven: bool,
}

impl Drop for ProbeSession {
    fn drop(&mut self) {
        if let Some(mut power) = self.power.take() {
            if self.power_driven {
                if let Err(err) = power.set_level(false) {
                    warn!("Failed to power down: {}", err);
                }
            }
            power.release();
        }
        if let Some(mut supply) = self.supply.take() {
            if self.supply_enabled {
                if let Err(err) = supply.disable() {
                    warn!("Failed to disable vddio: {}", err);
                }
            }
            supply.release();
        }
        if let Some(bus) = self.bus.take() {
            bus.release();
        }
        if let Some(pins) = self.pins.take() {
            pins.release();
        }
    }
}

/// An optional resource: absent is fine, deferred is not.
fn optional<T>(res: Result<T, ResourceError>) -> Result<Option<T>, ProbeError> {
    match res {
        Ok(handle) => Ok(Some(handle)),
        Err(ResourceError::Deferred) => Err(ProbeError::ResourceDeferred),
        Err(_) => Ok(None),
    }
}

/// Probe parameters of one class.
pub struct ClassProbe<'c, M: 'static> {
    pub node_name: &'c str,
    pub power_on_delay_ms: u32,
    pub candidates: &'c [Candidate<M>],
}

impl<M: ChipModel> ClassProbe<'static, M> {
    pub fn for_class<C: DeviceClass<Model = M>>() -> Self {
        ClassProbe {
            node_name: C::NODE_NAME,
            power_on_delay_ms: C::POWER_ON_DELAY_MS,
            candidates: C::candidates(),
        }
    }
}

impl<M: ChipModel> ClassProbe<'_, M> {
    /// Acquire the class's resources, scan its candidates and release everything.
    ///
    /// The candidates are scanned once as the board comes up. Should that
    /// find nothing and the node has a vddio supply, the supply is switched on
    /// and the candidates are scanned a second time.
    pub fn run(
        &self,
        tree: &DeviceTree,
        resources: &mut dyn ResourceProvider,
        delay: &mut dyn Delay,
        aux: &mut AuxFlags,
    ) -> Result<DetectionResult<M>, ProbeError> {
        let missing = || {
            error!("Error {} node is missing", self.node_name);
            ProbeError::MissingNode(self.node_name.into())
        };
        let node = tree.find_node_by_name(self.node_name).ok_or_else(missing)?;
        let bus_node = tree.get_parent(node).ok_or_else(missing)?;
        let consumer = tree.get_full_path(node);

        let mut session = ProbeSession::default();
        match resources.pinctrl(&consumer) {
            Ok(mut pins) => {
                let selected = pins.select_default();
                session.pins = Some(pins);
                match selected {
                    Err(ResourceError::Deferred) => return Err(ProbeError::ResourceDeferred),
                    Err(err) => {
                        debug_ex!("{}: no default pin state: {}", self.node_name, err);
                    }
                    Ok(()) => {}
                }
            }
            Err(ResourceError::Deferred) => return Err(ProbeError::ResourceDeferred),
            Err(_) => {
                debug_ex!("{}: no pin configuration", self.node_name);
            }
        }

        let bus = match resources.i2c_adapter(&tree.get_full_path(bus_node)) {
            Ok(bus) => bus,
            Err(ResourceError::Io) => return Err(ProbeError::Resource(ResourceError::Io)),
            // the adapter driver has not bound yet
            Err(_) => return Err(ProbeError::ResourceDeferred),
        };
        let bus = session.bus.insert(bus);
        session.supply = optional(resources.regulator(&consumer, "vddio"))?;
        session.power = optional(resources.power_gpio(&consumer, "power"))?;
        if let Some(power) = session.power.as_mut() {
            power.set_level(true).map_err(ProbeError::Resource)?;
            session.power_driven = true;
        }

        let mut env = ProbeEnv { delay, aux };
        debug_ex!("Probing {} without a regulator", self.node_name);
        let mut detection = self.scan_powered(&mut **bus, &mut env)?;
        let mut supply_required = false;
        if detection.is_none() {
            if let Some(supply) = session.supply.as_mut() {
                supply.enable().map_err(ProbeError::Resource)?;
                session.supply_enabled = true;
                debug_ex!("Probing {} with a regulator", self.node_name);
                detection = self.scan_powered(&mut **bus, &mut env)?;
                supply_required = detection.is_some();
            }
        }

        let supply_acquired = session.supply.is_some();
        drop(session);
        if detection.is_none() {
            info!("Could not find {}", self.node_name);
        }
        Ok(DetectionResult {
            detection,
            supply_acquired,
            supply_required,
        })
    }

    fn scan_powered(
        &self,
        bus: &mut dyn I2cAdapter,
        env: &mut ProbeEnv<'_>,
    ) -> Result<Option<Detection<M>>, ProbeError> {
        if self.power_on_delay_ms > 0 {
            env.delay.delay_ms(self.power_on_delay_ms);
        }
        scan(bus, env, self.candidates)
    }
}
