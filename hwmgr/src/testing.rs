//! Fake bus, resources and delay sharing one recorded test bench.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use dt::DeviceTree;

use crate::bus::{BusError, Delay, I2cAdapter};
use crate::resource::{
    Pinctrl, PowerGpio, Regulator, RegulatorControl, ResourceError, ResourceProvider,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Res {
    Pins,
    Bus,
    Supply,
    Power,
    Ldo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Acquire(Res),
    Release(Res),
    SelectPins,
    Power(bool),
    SupplyOn,
    SupplyOff,
    Delay(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Availability {
    Present,
    Deferred,
    Unavailable,
}

/// A chip sitting on the fake bus.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeChip {
    regs: BTreeMap<u8, u8>,
    replies: VecDeque<Vec<u8>>,
    needs_supply: bool,
    pub(crate) sent: Vec<Vec<u8>>,
    pub(crate) writes: Vec<(u8, u8)>,
}

impl FakeChip {
    pub(crate) fn new() -> FakeChip {
        FakeChip::default()
    }
    pub(crate) fn with_reg(mut self, reg: u8, value: u8) -> FakeChip {
        self.regs.insert(reg, value);
        self
    }
    /// Little endian word at `reg`, as an SMBus word read returns it.
    pub(crate) fn with_word(self, reg: u8, value: u16) -> FakeChip {
        let [lo, hi] = value.to_le_bytes();
        self.with_reg(reg, lo).with_reg(reg + 1, hi)
    }
    pub(crate) fn with_block(mut self, reg: u8, data: &[u8]) -> FakeChip {
        for (i, byte) in data.iter().enumerate() {
            self.regs.insert(reg + i as u8, *byte);
        }
        self
    }
    /// Queue the payload of the next plain read transfer.
    pub(crate) fn with_reply(mut self, data: &[u8]) -> FakeChip {
        self.replies.push_back(data.to_vec());
        self
    }
    /// Only answer while the vddio supply is on.
    pub(crate) fn needs_supply(mut self) -> FakeChip {
        self.needs_supply = true;
        self
    }
    fn reg(&self, reg: u8) -> u8 {
        self.regs.get(&reg).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct LdoState {
    pub(crate) voltage: Option<(u32, u32)>,
    pub(crate) name: Option<String>,
    pub(crate) changes_allowed: bool,
}

#[derive(Default)]
struct World {
    events: Vec<Event>,
    chips: BTreeMap<u16, FakeChip>,
    stuck: Vec<u16>,
    accessed: Vec<u16>,
    supply_enabled: bool,
    availability: BTreeMap<Res, Availability>,
    deferred_buses: Vec<String>,
    ldo: LdoState,
}

/// Shared state behind every fake handed out by a test.
#[derive(Clone, Default)]
pub(crate) struct Bench(Rc<RefCell<World>>);

impl Bench {
    pub(crate) fn new() -> Bench {
        Bench::default()
    }
    pub(crate) fn add_chip(&self, addr: u16, chip: FakeChip) {
        self.0.borrow_mut().chips.insert(addr, chip);
    }
    /// Every transfer to `addr` times out.
    pub(crate) fn stick(&self, addr: u16) {
        self.0.borrow_mut().stuck.push(addr);
    }
    pub(crate) fn set_availability(&self, res: Res, availability: Availability) {
        self.0.borrow_mut().availability.insert(res, availability);
    }
    pub(crate) fn defer_bus(&self, path: &str) {
        self.0.borrow_mut().deferred_buses.push(path.into());
    }
    /// The adapter at `path` becomes available again.
    pub(crate) fn resume_bus(&self, path: &str) {
        self.0.borrow_mut().deferred_buses.retain(|p| p != path);
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.0.borrow().events.clone()
    }
    pub(crate) fn accessed(&self) -> Vec<u16> {
        self.0.borrow().accessed.clone()
    }
    pub(crate) fn supply_enabled(&self) -> bool {
        self.0.borrow().supply_enabled
    }
    pub(crate) fn chip(&self, addr: u16) -> Option<FakeChip> {
        self.0.borrow().chips.get(&addr).cloned()
    }
    pub(crate) fn ldo(&self) -> LdoState {
        self.0.borrow().ldo.clone()
    }

    pub(crate) fn bus(&self) -> FakeBus {
        FakeBus(self.clone())
    }
    pub(crate) fn resources(&self) -> FakeResources {
        FakeResources(self.clone())
    }
    pub(crate) fn delay(&self) -> FakeDelay {
        FakeDelay(self.clone())
    }

    fn record(&self, event: Event) {
        self.0.borrow_mut().events.push(event);
    }
    fn availability(&self, res: Res) -> Availability {
        self.0
            .borrow()
            .availability
            .get(&res)
            .copied()
            .unwrap_or(Availability::Present)
    }
    fn acquire<T>(&self, res: Res, handle: T) -> Result<T, ResourceError> {
        match self.availability(res) {
            Availability::Present => {
                self.record(Event::Acquire(res));
                Ok(handle)
            }
            Availability::Deferred => Err(ResourceError::Deferred),
            Availability::Unavailable => Err(ResourceError::Unavailable),
        }
    }
}

pub(crate) struct FakeBus(Bench);

impl FakeBus {
    fn transfer<T>(&mut self, addr: u16, f: impl FnOnce(&mut FakeChip) -> T) -> Result<T, BusError> {
        let mut world = self.0 .0.borrow_mut();
        world.accessed.push(addr);
        if world.stuck.contains(&addr) {
            return Err(BusError::Timeout);
        }
        let powered = world.supply_enabled;
        match world.chips.get_mut(&addr) {
            Some(chip) if powered || !chip.needs_supply => Ok(f(chip)),
            _ => Err(BusError::NoDevice),
        }
    }
}

impl I2cAdapter for FakeBus {
    fn read_byte_data(&mut self, addr: u16, reg: u8) -> Result<u8, BusError> {
        self.transfer(addr, |chip| chip.reg(reg))
    }
    fn read_word_data(&mut self, addr: u16, reg: u8) -> Result<u16, BusError> {
        self.transfer(addr, |chip| u16::from_le_bytes([chip.reg(reg), chip.reg(reg + 1)]))
    }
    fn write_byte_data(&mut self, addr: u16, reg: u8, value: u8) -> Result<(), BusError> {
        self.transfer(addr, |chip| {
            chip.writes.push((reg, value));
            chip.regs.insert(reg, value);
        })
    }
    fn read_i2c_block_data(&mut self, addr: u16, reg: u8, buf: &mut [u8]) -> Result<usize, BusError> {
        self.transfer(addr, |chip| {
            for (i, byte) in buf.iter_mut().enumerate() {
                *byte = chip.reg(reg + i as u8);
            }
            buf.len()
        })
    }
    fn master_recv(&mut self, addr: u16, buf: &mut [u8]) -> Result<usize, BusError> {
        self.transfer(addr, |chip| match chip.replies.pop_front() {
            Some(reply) => {
                let len = reply.len().min(buf.len());
                buf[..len].copy_from_slice(&reply[..len]);
                len
            }
            None => {
                buf.fill(0);
                buf.len()
            }
        })
    }
    fn master_send(&mut self, addr: u16, buf: &[u8]) -> Result<usize, BusError> {
        self.transfer(addr, |chip| {
            chip.sent.push(buf.to_vec());
            buf.len()
        })
    }
    fn release(self: Box<Self>) {
        self.0.record(Event::Release(Res::Bus));
    }
}

struct FakePins(Bench);

impl Pinctrl for FakePins {
    fn select_default(&mut self) -> Result<(), ResourceError> {
        self.0.record(Event::SelectPins);
        Ok(())
    }
    fn release(self: Box<Self>) {
        self.0.record(Event::Release(Res::Pins));
    }
}

struct FakeSupply(Bench);

impl Regulator for FakeSupply {
    fn enable(&mut self) -> Result<(), ResourceError> {
        self.0 .0.borrow_mut().supply_enabled = true;
        self.0.record(Event::SupplyOn);
        Ok(())
    }
    fn disable(&mut self) -> Result<(), ResourceError> {
        self.0 .0.borrow_mut().supply_enabled = false;
        self.0.record(Event::SupplyOff);
        Ok(())
    }
    fn release(self: Box<Self>) {
        self.0.record(Event::Release(Res::Supply));
    }
}

struct FakePower(Bench);

impl PowerGpio for FakePower {
    fn set_level(&mut self, high: bool) -> Result<(), ResourceError> {
        self.0.record(Event::Power(high));
        Ok(())
    }
    fn release(self: Box<Self>) {
        self.0.record(Event::Release(Res::Power));
    }
}

struct FakeLdo {
    bench: Bench,
    name: Option<String>,
}

impl RegulatorControl for FakeLdo {
    fn voltage(&self) -> Option<(u32, u32)> {
        self.bench.0.borrow().ldo.voltage
    }
    fn set_voltage(&mut self, min_uv: u32, max_uv: u32) -> Result<(), ResourceError> {
        self.bench.0.borrow_mut().ldo.voltage = Some((min_uv, max_uv));
        Ok(())
    }
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn set_name(&mut self, name: &str) -> Result<(), ResourceError> {
        self.name = Some(name.into());
        self.bench.0.borrow_mut().ldo.name = Some(name.into());
        Ok(())
    }
    fn changes_allowed(&self) -> bool {
        self.bench.0.borrow().ldo.changes_allowed
    }
    fn allow_changes(&mut self) -> Result<(), ResourceError> {
        self.bench.0.borrow_mut().ldo.changes_allowed = true;
        Ok(())
    }
    fn release(self: Box<Self>) {
        self.bench.record(Event::Release(Res::Ldo));
    }
}

pub(crate) struct FakeResources(Bench);

impl ResourceProvider for FakeResources {
    fn pinctrl(&mut self, _consumer: &str) -> Result<Box<dyn Pinctrl>, ResourceError> {
        let pins: Box<dyn Pinctrl> = Box::new(FakePins(self.0.clone()));
        self.0.acquire(Res::Pins, pins)
    }
    fn i2c_adapter(&mut self, bus: &str) -> Result<Box<dyn I2cAdapter>, ResourceError> {
        if self.0 .0.borrow().deferred_buses.iter().any(|p| p == bus) {
            return Err(ResourceError::Deferred);
        }
        let adapter: Box<dyn I2cAdapter> = Box::new(self.0.bus());
        self.0.acquire(Res::Bus, adapter)
    }
    fn regulator(
        &mut self,
        _consumer: &str,
        _supply: &str,
    ) -> Result<Box<dyn Regulator>, ResourceError> {
        let supply: Box<dyn Regulator> = Box::new(FakeSupply(self.0.clone()));
        self.0.acquire(Res::Supply, supply)
    }
    fn power_gpio(
        &mut self,
        _consumer: &str,
        _con_id: &str,
    ) -> Result<Box<dyn PowerGpio>, ResourceError> {
        let power: Box<dyn PowerGpio> = Box::new(FakePower(self.0.clone()));
        self.0.acquire(Res::Power, power)
    }
    fn regulator_control(
        &mut self,
        _name: &str,
    ) -> Result<Box<dyn RegulatorControl>, ResourceError> {
        let name = self.0.ldo().name;
        let ldo: Box<dyn RegulatorControl> = Box::new(FakeLdo {
            bench: self.0.clone(),
            name,
        });
        self.0.acquire(Res::Ldo, ldo)
    }
}

pub(crate) struct FakeDelay(Bench);

impl Delay for FakeDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.0.record(Event::Delay(ms));
    }
}

pub(crate) const TOUCHSCREEN_BUS: &str = "/soc@01c00000/i2c@01c2ac00";
pub(crate) const ACCEL_BUS: &str = "/soc@01c00000/i2c@01c2b000";

/// A Q8 board tree as the bootloader hands it over: a disabled touchscreen
/// template, no accelerometer node and an unconstrained `ldo_io1`.
pub(crate) fn board_tree() -> DeviceTree {
    let mut tree = DeviceTree::new();
    let root = tree.root();
    let soc = tree.add_node(root, "soc@01c00000").unwrap();
    let i2c0 = tree.add_node(soc, "i2c@01c2ac00").unwrap();
    tree.add_node(soc, "i2c@01c2b000").unwrap();
    let ts = tree.add_node(i2c0, "touchscreen").unwrap();
    tree.set_property(ts, "status", b"disabled\0").unwrap();
    tree.add_node(soc, "sdio_wifi@1").unwrap();
    let rsb = tree.add_node(soc, "rsb@01f03400").unwrap();
    let pmic = tree.add_node(rsb, "pmic@3a3").unwrap();
    let regulators = tree.add_node(pmic, "regulators").unwrap();
    let ldo = tree.add_node(regulators, "ldo_io1").unwrap();
    tree.set_property(ldo, "regulator-name", b"ldo_io1\0").unwrap();
    tree
}
