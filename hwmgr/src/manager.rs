//! The probing pipeline.
//!
//! [HardwareManager::run] completes the board's template nodes, probes the
//! touchscreen and the accelerometer, writes what it found into the tree and
//! finally applies board specific quirks.

use alloc::vec::Vec;
use log::{error, info, warn};

use dt::{Changeset, DeviceTree, DtError, NodeId};

use crate::accel::{AccelModel, Accelerometer};
use crate::bus::Delay;
use crate::config::Configuration;
use crate::error::{HwMgrError, ProbeError};
use crate::probe::{AuxFlags, ChipModel, ClassProbe, Detection, DetectionResult, DeviceClass};
use crate::resolver::{self, TouchscreenSettings};
use crate::resource::{RegulatorControl, ResourceError, ResourceProvider};
use crate::touchscreen::{Touchscreen, TouchscreenModel};

/// Bus the accelerometer template node lives on.
pub const ACCEL_BUS_PATH: &str = "/soc@01c00000/i2c@01c2b000";

const LDO_NODE_NAME: &str = "ldo_io1";
const TOUCHSCREEN_SUPPLY_NAME: &str = "vcc-touchscreen";
const TOUCHSCREEN_SUPPLY_UV: u32 = 3_300_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Soc {
    A13,
    A23,
    A33,
}

impl Soc {
    /// Board family from the root node's compatible list.
    pub fn detect(tree: &DeviceTree) -> Option<Soc> {
        let compatible = tree
            .get_property(tree.root(), "compatible")?
            .value_as_strlist()
            .ok()?;
        [
            ("allwinner,q8-a13", Soc::A13),
            ("allwinner,q8-a23", Soc::A23),
            ("allwinner,q8-a33", Soc::A33),
        ]
        .into_iter()
        .find(|(machine, _)| compatible.contains(machine))
        .map(|(_, soc)| soc)
    }
}

/// What became of one device class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassOutcome<M> {
    /// Found, and its node is enabled.
    Configured(Detection<M>),
    NotFound,
    Failed(ProbeError),
}

impl<M> ClassOutcome<M> {
    /// Probing stopped on a resource that is not ready yet.
    pub fn is_deferred(&self) -> bool {
        matches!(self, ClassOutcome::Failed(ProbeError::ResourceDeferred))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub touchscreen: ClassOutcome<TouchscreenModel>,
    pub accelerometer: ClassOutcome<AccelModel>,
    pub touchscreen_settings: Option<TouchscreenSettings>,
    pub has_rda599x: bool,
    /// Descriptions of the quirks applied.
    pub quirks: Vec<&'static str>,
}

/// A fix needed by one specific board, recognized by its parts.
struct Quirk {
    soc: Soc,
    touchscreen: TouchscreenModel,
    accelerometer: AccelModel,
    has_rda599x: bool,
    description: &'static str,
    node: &'static str,
    property: &'static str,
    value: u32,
}

static QUIRKS: [Quirk; 1] = [
    // A33 tzx-723q4 PCB with an esp8089 wifi chip
    Quirk {
        soc: Soc::A33,
        touchscreen: TouchscreenModel::Gsl1680B482,
        accelerometer: AccelModel::Dmard09,
        has_rda599x: false,
        description: "crystal_26M_en=1 sdio_wifi",
        node: "sdio_wifi",
        property: "esp,crystal-26M-en",
        value: 1,
    },
];

pub struct HardwareManager<'a> {
    soc: Soc,
    config: Configuration,
    resources: &'a mut dyn ResourceProvider,
    delay: &'a mut dyn Delay,
    aux: AuxFlags,
    /// Report of the last pass, picked up by [HardwareManager::retry_deferred].
    last: Option<Report>,
    touchscreen_found: Option<Detection<TouchscreenModel>>,
    accel_found: Option<Detection<AccelModel>>,
}

impl<'a> HardwareManager<'a> {
    pub fn new(
        soc: Soc,
        config: Configuration,
        resources: &'a mut dyn ResourceProvider,
        delay: &'a mut dyn Delay,
    ) -> HardwareManager<'a> {
        HardwareManager {
            soc,
            config,
            resources,
            delay,
            aux: AuxFlags::default(),
            last: None,
            touchscreen_found: None,
            accel_found: None,
        }
    }

    pub fn aux_flags(&self) -> AuxFlags {
        self.aux
    }

    /// Run the whole pipeline on `tree`.
    ///
    /// A class that fails to probe is reported and does not keep the other
    /// class from being configured. Only template fixup failures and running
    /// out of memory end the run early. Classes deferred here are picked up
    /// again by [HardwareManager::retry_deferred].
    pub fn run(&mut self, tree: &mut DeviceTree) -> Result<Report, HwMgrError> {
        self.last = None;
        self.fixup_touchscreen_node(tree)?;
        add_accel_node(tree)?;

        let touchscreen = self.probe_class::<Touchscreen>(tree);
        let accelerometer = self.probe_class::<Accelerometer>(tree);
        if self.aux.has_rda599x {
            info!("Found a rda599x sdio/i2c wifi/bt/fm combo chip");
        }
        self.touchscreen_found = detected(&touchscreen);
        self.accel_found = detected(&accelerometer);

        let (touchscreen, touchscreen_settings) = self.configure_touchscreen(tree, touchscreen)?;
        let accelerometer = configure_accelerometer(tree, accelerometer)?;
        let quirks = self.apply_quirks(tree)?;

        Ok(self.record(Report {
            touchscreen,
            accelerometer,
            touchscreen_settings,
            has_rda599x: self.aux.has_rda599x,
            quirks,
        }))
    }

    /// Probe the classes the last pass deferred again and bring the tree up
    /// to date.
    ///
    /// A touchscreen configured while its accelerometer was deferred has its
    /// settings resolved again, and the node follows any change. Without an
    /// earlier report this is a full [HardwareManager::run].
    pub fn retry_deferred(&mut self, tree: &mut DeviceTree) -> Result<Report, HwMgrError> {
        let Some(mut report) = self.last.take() else {
            return self.run(tree);
        };
        let retry_touchscreen = report.touchscreen.is_deferred();
        let retry_accel = report.accelerometer.is_deferred();
        if !retry_touchscreen && !retry_accel {
            return Ok(self.record(report));
        }

        let touchscreen = match retry_touchscreen {
            true => Some(self.probe_class::<Touchscreen>(tree)),
            false => None,
        };
        if retry_accel {
            let accelerometer = self.probe_class::<Accelerometer>(tree);
            self.accel_found = detected(&accelerometer);
            report.accelerometer = configure_accelerometer(tree, accelerometer)?;
        }
        match touchscreen {
            Some(touchscreen) => {
                self.touchscreen_found = detected(&touchscreen);
                (report.touchscreen, report.touchscreen_settings) =
                    self.configure_touchscreen(tree, touchscreen)?;
            }
            None => self.refresh_touchscreen(tree, &mut report)?,
        }
        report.has_rda599x = self.aux.has_rda599x;
        if report.quirks.is_empty() {
            report.quirks = self.apply_quirks(tree)?;
        }
        Ok(self.record(report))
    }

    /// Probe a single class without touching the tree.
    pub fn probe_class<C: DeviceClass>(
        &mut self,
        tree: &DeviceTree,
    ) -> Result<DetectionResult<C::Model>, ProbeError> {
        let result = ClassProbe::for_class::<C>().run(
            tree,
            &mut *self.resources,
            &mut *self.delay,
            &mut self.aux,
        );
        if let Err(err) = &result {
            warn!("Probing {} failed: {}", C::NODE_NAME, err);
        }
        result
    }

    fn record(&mut self, report: Report) -> Report {
        self.last = Some(report.clone());
        report
    }

    fn configure_touchscreen(
        &self,
        tree: &mut DeviceTree,
        result: Result<DetectionResult<TouchscreenModel>, ProbeError>,
    ) -> Result<(ClassOutcome<TouchscreenModel>, Option<TouchscreenSettings>), HwMgrError> {
        let result = match result {
            Ok(result) => result,
            Err(err) => return Ok((ClassOutcome::Failed(err), None)),
        };
        let Some(found) = result.detection else {
            return Ok((ClassOutcome::NotFound, None));
        };
        let settings = resolver::resolve(
            found.model,
            self.accel_found.as_ref(),
            self.aux,
            &self.config,
        );
        let applied = apply_touchscreen(tree, &found, result.supply_unused(), &settings);
        Ok((class_outcome(Touchscreen::NODE_NAME, found, applied)?, Some(settings)))
    }

    /// Resolve the settings of a configured touchscreen again and write the
    /// difference.
    fn refresh_touchscreen(
        &self,
        tree: &mut DeviceTree,
        report: &mut Report,
    ) -> Result<(), HwMgrError> {
        let (ClassOutcome::Configured(found), Some(old)) =
            (&report.touchscreen, &report.touchscreen_settings)
        else {
            return Ok(());
        };
        let settings = resolver::resolve(
            found.model,
            self.accel_found.as_ref(),
            self.aux,
            &self.config,
        );
        if settings == *old {
            return Ok(());
        }
        match update_touchscreen(tree, old, &settings) {
            Ok(()) => report.touchscreen_settings = Some(settings),
            Err(DtError::AllocationFailure) => return Err(DtError::AllocationFailure.into()),
            Err(err) => {
                warn!("Could not update the {} node: {}", Touchscreen::NODE_NAME, err);
                report.touchscreen = ClassOutcome::Failed(err.into());
            }
        }
        Ok(())
    }

    /// Give the touchscreen template a 3.3V `ldo_io1` supply.
    ///
    /// Q8 trees may carry an incomplete touchscreen node; the A13 one is
    /// used as it is.
    fn fixup_touchscreen_node(&mut self, tree: &mut DeviceTree) -> Result<(), HwMgrError> {
        if self.soc == Soc::A13 {
            return Ok(());
        }
        let ts = tree.find_node_by_name(Touchscreen::NODE_NAME);
        let ldo = tree.find_node_by_name(LDO_NODE_NAME);
        let (Some(ts), Some(ldo)) = (ts, ldo) else {
            error!("Error dt-nodes missing touchscreen {:?}, ldo_io1 {:?}", ts, ldo);
            let missing = if ts.is_none() { Touchscreen::NODE_NAME } else { LDO_NODE_NAME };
            return Err(HwMgrError::MissingNode(missing.into()));
        };

        let mut control = match self.resources.regulator_control(LDO_NODE_NAME) {
            Ok(control) => control,
            Err(ResourceError::Deferred) => return Err(HwMgrError::Deferred),
            Err(err) => {
                error!("Error could not get ldo_io1 regulator {}", err);
                return Err(HwMgrError::Regulator(err));
            }
        };
        let result = constrain_ldo(tree, ldo, control.as_mut())
            .and_then(|()| add_touchscreen_supply(tree, ts, ldo));
        control.release();
        result
    }

    /// Quirks need both parts identified.
    fn apply_quirks(&self, tree: &mut DeviceTree) -> Result<Vec<&'static str>, HwMgrError> {
        let (Some(touchscreen), Some(accelerometer)) = (self.touchscreen_found, self.accel_found)
        else {
            return Ok(Vec::new());
        };
        let mut applied = Vec::new();
        for quirk in QUIRKS.iter().filter(|q| {
            q.soc == self.soc
                && q.touchscreen == touchscreen.model
                && q.accelerometer == accelerometer.model
                && q.has_rda599x == self.aux.has_rda599x
        }) {
            info!("Applying {} quirk", quirk.description);
            let Some(node) = tree.find_node_by_name(quirk.node) else {
                warn!("Could not find {} dt node", quirk.node);
                continue;
            };
            let mut cset = Changeset::new();
            cset.add_property_u32(node, quirk.property, quirk.value)?;
            match cset.apply(tree) {
                Ok(()) => applied.push(quirk.description),
                Err(DtError::AllocationFailure) => return Err(DtError::AllocationFailure.into()),
                Err(err) => warn!("Failed to apply {} quirk: {}", quirk.description, err),
            }
        }
        Ok(applied)
    }
}

fn detected<M: Copy>(result: &Result<DetectionResult<M>, ProbeError>) -> Option<Detection<M>> {
    result.as_ref().ok().and_then(|r| r.detection)
}

/// Set the 3.3V constraints on the ldo node, unless the tree already has
/// them, and on the live regulator that was set up from the incomplete node.
fn constrain_ldo(
    tree: &mut DeviceTree,
    ldo: NodeId,
    control: &mut dyn RegulatorControl,
) -> Result<(), HwMgrError> {
    if tree.get_property(ldo, "regulator-min-microvolt").is_some() {
        return Ok(());
    }
    let mut cset = Changeset::new();
    cset.add_property_u32(ldo, "regulator-min-microvolt", TOUCHSCREEN_SUPPLY_UV)?;
    cset.add_property_u32(ldo, "regulator-max-microvolt", TOUCHSCREEN_SUPPLY_UV)?;
    cset.update_property_string(ldo, "regulator-name", TOUCHSCREEN_SUPPLY_NAME)?;
    cset.update_property_string(ldo, "status", "okay")?;
    cset.apply(tree)?;

    let regulator_error = |err| {
        error!("Error setting ldo_io1 constraints {}", err);
        HwMgrError::Regulator(err)
    };
    if control.name() != Some(TOUCHSCREEN_SUPPLY_NAME) {
        control.set_name(TOUCHSCREEN_SUPPLY_NAME).map_err(regulator_error)?;
    }
    if !control.changes_allowed() {
        control.allow_changes().map_err(regulator_error)?;
    }
    if control.voltage() != Some((TOUCHSCREEN_SUPPLY_UV, TOUCHSCREEN_SUPPLY_UV)) {
        control
            .set_voltage(TOUCHSCREEN_SUPPLY_UV, TOUCHSCREEN_SUPPLY_UV)
            .map_err(regulator_error)?;
    }
    Ok(())
}

fn add_touchscreen_supply(tree: &mut DeviceTree, ts: NodeId, ldo: NodeId) -> Result<(), HwMgrError> {
    if tree.get_property(ts, "vddio-supply").is_some() {
        return Ok(());
    }
    let phandle = tree.ensure_phandle(ldo)?;
    let mut cset = Changeset::new();
    // the regulator phandle takes no arguments
    cset.add_property_u32(ts, "vddio-supply", phandle)?;
    cset.apply(tree)?;
    Ok(())
}

/// Create an empty, disabled accelerometer node on its bus if the tree has none.
fn add_accel_node(tree: &mut DeviceTree) -> Result<(), HwMgrError> {
    if tree.find_node_by_name(Accelerometer::NODE_NAME).is_some() {
        return Ok(());
    }
    let parent = tree.find_node_by_path(ACCEL_BUS_PATH).ok_or_else(|| {
        error!("Error i2c1 node is missing");
        HwMgrError::MissingNode(ACCEL_BUS_PATH.into())
    })?;
    let mut cset = Changeset::new();
    let node = cset.create_node(parent, Accelerometer::NODE_NAME)?;
    cset.add_property_string(node, "name", Accelerometer::NODE_NAME)?;
    cset.add_property_string(node, "status", "disabled")?;
    cset.attach_node(node)?;
    cset.apply(tree)?;
    Ok(())
}

/// Entries shared by every class: address, compatible, enable.
fn apply_common<M: ChipModel>(
    cset: &mut Changeset,
    tree: &DeviceTree,
    node_name: &str,
    found: &Detection<M>,
    supply_unused: bool,
) -> Result<NodeId, DtError> {
    let node = tree.find_node_by_name(node_name).ok_or(DtError::NodeNotFound)?;
    cset.add_property_u32(node, "reg", found.addr.into())?;
    cset.add_property_string(node, "compatible", found.compatible)?;
    cset.update_property_string(node, "status", "okay")?;
    if supply_unused {
        if tree.get_property(node, "vddio-supply").is_some() {
            cset.remove_property(node, "vddio-supply")?;
        } else {
            warn!("{} has no vddio-supply to remove", node_name);
        }
    }
    Ok(node)
}

fn apply_touchscreen(
    tree: &mut DeviceTree,
    found: &Detection<TouchscreenModel>,
    supply_unused: bool,
    settings: &TouchscreenSettings,
) -> Result<(), DtError> {
    let mut cset = Changeset::new();
    let node = apply_common(&mut cset, tree, Touchscreen::NODE_NAME, found, supply_unused)?;
    if settings.width != 0 {
        cset.add_property_u32(node, "touchscreen-size-x", settings.width)?;
    }
    if settings.height != 0 {
        cset.add_property_u32(node, "touchscreen-size-y", settings.height)?;
    }
    if settings.invert_x {
        cset.add_property_bool(node, "touchscreen-inverted-x")?;
    }
    if settings.invert_y {
        cset.add_property_bool(node, "touchscreen-inverted-y")?;
    }
    if settings.swap_x_y {
        cset.add_property_bool(node, "touchscreen-swapped-x-y")?;
    }
    if let Some(firmware) = &settings.firmware_name {
        cset.add_property_string(node, "firmware-name", firmware)?;
    }
    debug_ex!("Applying {} touchscreen changes", cset.len());
    cset.apply(tree)
}

fn configure_accelerometer(
    tree: &mut DeviceTree,
    result: Result<DetectionResult<AccelModel>, ProbeError>,
) -> Result<ClassOutcome<AccelModel>, HwMgrError> {
    match result {
        Ok(result) => match result.detection {
            Some(found) => {
                let applied = apply_accelerometer(tree, &found, result.supply_unused());
                class_outcome(Accelerometer::NODE_NAME, found, applied)
            }
            None => Ok(ClassOutcome::NotFound),
        },
        Err(err) => Ok(ClassOutcome::Failed(err)),
    }
}

/// Move an enabled touchscreen node from `old` to `new` settings.
fn update_touchscreen(
    tree: &mut DeviceTree,
    old: &TouchscreenSettings,
    new: &TouchscreenSettings,
) -> Result<(), DtError> {
    let node = tree
        .find_node_by_name(Touchscreen::NODE_NAME)
        .ok_or(DtError::NodeNotFound)?;
    let mut cset = Changeset::new();
    for (name, was, now) in [
        ("touchscreen-size-x", old.width, new.width),
        ("touchscreen-size-y", old.height, new.height),
    ] {
        match (was, now) {
            _ if was == now => {}
            (_, 0) => cset.remove_property(node, name)?,
            (0, _) => cset.add_property_u32(node, name, now)?,
            _ => cset.update_property_u32(node, name, now)?,
        }
    }
    for (name, was, now) in [
        ("touchscreen-inverted-x", old.invert_x, new.invert_x),
        ("touchscreen-inverted-y", old.invert_y, new.invert_y),
        ("touchscreen-swapped-x-y", old.swap_x_y, new.swap_x_y),
    ] {
        match (was, now) {
            (false, true) => cset.add_property_bool(node, name)?,
            (true, false) => cset.remove_property(node, name)?,
            _ => {}
        }
    }
    match (&old.firmware_name, &new.firmware_name) {
        (was, now) if was == now => {}
        (_, None) => cset.remove_property(node, "firmware-name")?,
        (None, Some(now)) => cset.add_property_string(node, "firmware-name", now)?,
        (Some(_), Some(now)) => cset.update_property_string(node, "firmware-name", now)?,
    }
    debug_ex!("Updating {} touchscreen settings", cset.len());
    cset.apply(tree)
}

fn apply_accelerometer(
    tree: &mut DeviceTree,
    found: &Detection<AccelModel>,
    supply_unused: bool,
) -> Result<(), DtError> {
    let mut cset = Changeset::new();
    apply_common(&mut cset, tree, Accelerometer::NODE_NAME, found, supply_unused)?;
    debug_ex!("Applying {} accelerometer changes", cset.len());
    cset.apply(tree)
}

fn class_outcome<M>(
    node_name: &str,
    found: Detection<M>,
    applied: Result<(), DtError>,
) -> Result<ClassOutcome<M>, HwMgrError> {
    match applied {
        Ok(()) => Ok(ClassOutcome::Configured(found)),
        Err(DtError::AllocationFailure) => Err(DtError::AllocationFailure.into()),
        Err(err) => {
            warn!("Could not update the {} node: {}", node_name, err);
            Ok(ClassOutcome::Failed(err.into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use alloc::vec;
    use dt::node::PHANDLE_BASE;
    use pretty_assertions::assert_eq;

    const SILEAD_B482: [u8; 4] = [0x00, 0x00, 0x82, 0xb4];

    fn b482() -> FakeChip {
        FakeChip::new().with_block(0xfc, &SILEAD_B482)
    }

    fn dmard09() -> FakeChip {
        FakeChip::new().with_reg(0x18, 0x95)
    }

    fn run(bench: &Bench, soc: Soc, tree: &mut DeviceTree) -> Result<Report, HwMgrError> {
        let mut resources = bench.resources();
        let mut delay = bench.delay();
        HardwareManager::new(soc, Configuration::auto(), &mut resources, &mut delay).run(tree)
    }

    fn node(tree: &DeviceTree, name: &str) -> NodeId {
        tree.find_node_by_name(name).unwrap()
    }

    #[test]
    fn a33_tablet() {
        let bench = Bench::new();
        bench.add_chip(0x40, b482());
        bench.add_chip(0x1d, dmard09());
        let mut tree = board_tree();

        let report = run(&bench, Soc::A33, &mut tree).unwrap();
        assert_eq!(
            report.touchscreen,
            ClassOutcome::Configured(Detection {
                model: TouchscreenModel::Gsl1680B482,
                addr: 0x40,
                compatible: "silead,gsl1680",
            })
        );
        assert_eq!(
            report.accelerometer,
            ClassOutcome::Configured(Detection {
                model: AccelModel::Dmard09,
                addr: 0x1d,
                compatible: "domintech,dmard09",
            })
        );
        assert!(!report.has_rda599x);
        assert_eq!(report.quirks, vec!["crystal_26M_en=1 sdio_wifi"]);

        let ldo = node(&tree, "ldo_io1");
        assert_eq!(tree.read_u32(ldo, "regulator-min-microvolt"), Ok(3_300_000));
        assert_eq!(tree.read_u32(ldo, "regulator-max-microvolt"), Ok(3_300_000));
        assert_eq!(tree.read_str(ldo, "regulator-name"), Ok("vcc-touchscreen"));
        assert_eq!(tree.read_str(ldo, "status"), Ok("okay"));
        assert_eq!(tree.node(ldo).unwrap().phandle(), Some(PHANDLE_BASE));
        assert_eq!(
            bench.ldo(),
            LdoState {
                voltage: Some((3_300_000, 3_300_000)),
                name: Some("vcc-touchscreen".into()),
                changes_allowed: true,
            }
        );

        let ts = node(&tree, "touchscreen");
        assert_eq!(tree.read_u32(ts, "reg"), Ok(0x40));
        assert_eq!(tree.read_str(ts, "compatible"), Ok("silead,gsl1680"));
        assert_eq!(tree.read_str(ts, "status"), Ok("okay"));
        // found before the supply was switched on
        assert!(!tree.read_bool(ts, "vddio-supply"));
        assert_eq!(tree.read_u32(ts, "touchscreen-size-x"), Ok(960));
        assert_eq!(tree.read_u32(ts, "touchscreen-size-y"), Ok(640));
        assert!(tree.read_bool(ts, "touchscreen-inverted-x"));
        assert!(!tree.read_bool(ts, "touchscreen-inverted-y"));
        assert!(!tree.read_bool(ts, "touchscreen-swapped-x-y"));
        assert_eq!(tree.read_str(ts, "firmware-name"), Ok("gsl1680-b482-q8-d702.fw"));

        let accel = tree
            .find_node_by_path("/soc@01c00000/i2c@01c2b000/accelerometer")
            .unwrap();
        assert_eq!(tree.read_str(accel, "name"), Ok("accelerometer"));
        assert_eq!(tree.read_u32(accel, "reg"), Ok(0x1d));
        assert_eq!(tree.read_str(accel, "compatible"), Ok("domintech,dmard09"));
        assert_eq!(tree.read_str(accel, "status"), Ok("okay"));

        let wifi = node(&tree, "sdio_wifi");
        assert_eq!(tree.read_u32(wifi, "esp,crystal-26M-en"), Ok(1));
    }

    #[test]
    fn supply_kept_when_chip_needs_it() {
        let bench = Bench::new();
        bench.add_chip(0x40, b482().needs_supply());
        let mut tree = board_tree();

        let report = run(&bench, Soc::A23, &mut tree).unwrap();
        assert_eq!(report.accelerometer, ClassOutcome::NotFound);
        let ts = node(&tree, "touchscreen");
        assert_eq!(tree.read_u32(ts, "vddio-supply"), Ok(PHANDLE_BASE));
        assert_eq!(tree.read_str(ts, "status"), Ok("okay"));
        assert!(report.quirks.is_empty());
    }

    #[test]
    fn quirk_needs_exact_board() {
        // the rda599x rules the board out
        let bench = Bench::new();
        bench.add_chip(0x11, FakeChip::new().with_word(0x0c, 0x0358));
        bench.add_chip(0x40, b482());
        bench.add_chip(0x1d, dmard09());
        let mut tree = board_tree();
        let report = run(&bench, Soc::A33, &mut tree).unwrap();
        assert!(report.has_rda599x);
        assert!(report.quirks.is_empty());
        assert!(!tree.read_bool(node(&tree, "sdio_wifi"), "esp,crystal-26M-en"));

        // so does the SoC
        let bench = Bench::new();
        bench.add_chip(0x40, b482());
        bench.add_chip(0x1d, dmard09());
        let mut tree = board_tree();
        let report = run(&bench, Soc::A23, &mut tree).unwrap();
        assert!(report.quirks.is_empty());
    }

    #[test]
    fn a13_template_is_left_alone() {
        let bench = Bench::new();
        let mut tree = board_tree();
        let report = run(&bench, Soc::A13, &mut tree).unwrap();

        assert_eq!(report.touchscreen, ClassOutcome::NotFound);
        assert!(!bench.events().contains(&Event::Acquire(Res::Ldo)));
        let ldo = node(&tree, "ldo_io1");
        assert!(!tree.read_bool(ldo, "regulator-min-microvolt"));
        assert!(!tree.read_bool(node(&tree, "touchscreen"), "vddio-supply"));
        // the accelerometer template is still added
        assert_eq!(tree.read_str(node(&tree, "accelerometer"), "status"), Ok("disabled"));
    }

    #[test]
    fn nothing_found_keeps_templates_disabled() {
        let bench = Bench::new();
        let mut tree = board_tree();
        let report = run(&bench, Soc::A33, &mut tree).unwrap();
        assert_eq!(report.touchscreen, ClassOutcome::NotFound);
        assert_eq!(report.accelerometer, ClassOutcome::NotFound);
        assert_eq!(report.touchscreen_settings, None);
        assert_eq!(tree.read_str(node(&tree, "touchscreen"), "status"), Ok("disabled"));
        assert_eq!(tree.read_str(node(&tree, "accelerometer"), "status"), Ok("disabled"));
    }

    #[test]
    fn deferred_class_does_not_block_the_other() {
        let bench = Bench::new();
        bench.defer_bus(ACCEL_BUS);
        bench.add_chip(0x40, b482());
        bench.add_chip(0x1d, dmard09());
        let mut tree = board_tree();

        let report = run(&bench, Soc::A33, &mut tree).unwrap();
        assert_eq!(report.accelerometer, ClassOutcome::Failed(ProbeError::ResourceDeferred));
        assert!(matches!(report.touchscreen, ClassOutcome::Configured(_)));
        // without an accelerometer there is no board heuristic
        assert!(!tree.read_bool(node(&tree, "touchscreen"), "touchscreen-inverted-x"));
        assert!(report.quirks.is_empty());
    }

    #[test]
    fn deferred_accelerometer_is_retried() {
        let bench = Bench::new();
        bench.defer_bus(ACCEL_BUS);
        bench.add_chip(0x40, b482());
        bench.add_chip(0x1d, dmard09());
        let mut tree = board_tree();
        let mut resources = bench.resources();
        let mut delay = bench.delay();
        let mut manager =
            HardwareManager::new(Soc::A33, Configuration::auto(), &mut resources, &mut delay);

        let first = manager.run(&mut tree).unwrap();
        assert!(first.accelerometer.is_deferred());
        let ts = node(&tree, "touchscreen");
        assert!(!tree.read_bool(ts, "touchscreen-inverted-x"));

        bench.resume_bus(ACCEL_BUS);
        let seen = bench.accessed().len();
        let second = manager.retry_deferred(&mut tree).unwrap();
        assert_eq!(second.touchscreen, first.touchscreen);
        assert_eq!(
            second.accelerometer,
            ClassOutcome::Configured(Detection {
                model: AccelModel::Dmard09,
                addr: 0x1d,
                compatible: "domintech,dmard09",
            })
        );
        // the touchscreen is not probed twice
        assert!(!bench.accessed()[seen..].contains(&0x40));
        assert_eq!(second.touchscreen_settings.map(|s| s.invert_x), Some(true));
        assert!(tree.read_bool(ts, "touchscreen-inverted-x"));
        assert_eq!(tree.read_u32(ts, "touchscreen-size-x"), Ok(960));
        assert_eq!(tree.read_u32(node(&tree, "accelerometer"), "reg"), Ok(0x1d));
        assert_eq!(second.quirks, vec!["crystal_26M_en=1 sdio_wifi"]);
        assert_eq!(tree.read_u32(node(&tree, "sdio_wifi"), "esp,crystal-26M-en"), Ok(1));
    }

    #[test]
    fn deferred_touchscreen_is_retried() {
        let bench = Bench::new();
        bench.defer_bus(TOUCHSCREEN_BUS);
        bench.add_chip(0x40, b482());
        bench.add_chip(0x1d, dmard09());
        let mut tree = board_tree();
        let mut resources = bench.resources();
        let mut delay = bench.delay();
        let mut manager =
            HardwareManager::new(Soc::A33, Configuration::auto(), &mut resources, &mut delay);

        let first = manager.run(&mut tree).unwrap();
        assert!(first.touchscreen.is_deferred());
        assert!(matches!(first.accelerometer, ClassOutcome::Configured(_)));
        assert!(first.quirks.is_empty());
        let ts = node(&tree, "touchscreen");
        assert_eq!(tree.read_str(ts, "status"), Ok("disabled"));

        bench.resume_bus(TOUCHSCREEN_BUS);
        let second = manager.retry_deferred(&mut tree).unwrap();
        assert!(matches!(second.touchscreen, ClassOutcome::Configured(_)));
        assert_eq!(second.accelerometer, first.accelerometer);
        assert_eq!(tree.read_str(ts, "status"), Ok("okay"));
        assert!(tree.read_bool(ts, "touchscreen-inverted-x"));
        assert_eq!(second.quirks, vec!["crystal_26M_en=1 sdio_wifi"]);
    }

    #[test]
    fn retry_without_deferred_classes_keeps_the_report() {
        let bench = Bench::new();
        bench.add_chip(0x40, b482());
        let mut tree = board_tree();
        let mut resources = bench.resources();
        let mut delay = bench.delay();
        let mut manager =
            HardwareManager::new(Soc::A23, Configuration::auto(), &mut resources, &mut delay);

        let first = manager.run(&mut tree).unwrap();
        let seen = bench.accessed().len();
        assert_eq!(manager.retry_deferred(&mut tree).unwrap(), first);
        assert_eq!(bench.accessed().len(), seen);
    }

    #[test]
    fn explicit_invert_x_beats_the_board_default() {
        let bench = Bench::new();
        bench.add_chip(0x40, b482());
        bench.add_chip(0x1d, dmard09());
        let mut tree = board_tree();
        let mut resources = bench.resources();
        let mut delay = bench.delay();
        let config = Configuration::auto().with_invert_x(false);

        let report = HardwareManager::new(Soc::A33, config, &mut resources, &mut delay)
            .run(&mut tree)
            .unwrap();
        assert_eq!(report.touchscreen_settings.map(|s| s.invert_x), Some(false));
        let ts = node(&tree, "touchscreen");
        assert_eq!(tree.read_str(ts, "status"), Ok("okay"));
        assert!(!tree.read_bool(ts, "touchscreen-inverted-x"));
    }

    #[test]
    fn deferred_regulator_aborts() {
        let bench = Bench::new();
        bench.set_availability(Res::Ldo, Availability::Deferred);
        bench.add_chip(0x40, b482());
        let mut tree = board_tree();

        assert_eq!(run(&bench, Soc::A33, &mut tree), Err(HwMgrError::Deferred));
        assert!(bench.accessed().is_empty());
        assert!(tree.find_node_by_name("accelerometer").is_none());
    }

    #[test]
    fn existing_constraints_are_kept() {
        let bench = Bench::new();
        let mut tree = board_tree();
        let ldo = node(&tree, "ldo_io1");
        tree.set_property(ldo, "regulator-min-microvolt", &[0x00, 0x2d, 0xc6, 0xc0])
            .unwrap();

        run(&bench, Soc::A33, &mut tree).unwrap();
        assert_eq!(tree.read_str(ldo, "regulator-name"), Ok("ldo_io1"));
        assert_eq!(bench.ldo(), LdoState::default());
        assert_eq!(
            tree.read_u32(node(&tree, "touchscreen"), "vddio-supply"),
            Ok(PHANDLE_BASE)
        );
        assert_eq!(bench.events().last(), Some(&Event::Release(Res::Pins)));
        assert!(bench.events().contains(&Event::Release(Res::Ldo)));
    }

    #[test]
    fn failed_update_is_rolled_back() {
        let bench = Bench::new();
        bench.add_chip(0x40, b482());
        let mut tree = board_tree();
        let ts = node(&tree, "touchscreen");
        tree.set_property(ts, "reg", &[0, 0, 0, 0x5d]).unwrap();

        let report = run(&bench, Soc::A33, &mut tree).unwrap();
        assert_eq!(
            report.touchscreen,
            ClassOutcome::Failed(ProbeError::Tree(DtError::DuplicateProperty))
        );
        assert_eq!(tree.read_u32(ts, "reg"), Ok(0x5d));
        assert_eq!(tree.read_str(ts, "status"), Ok("disabled"));
        assert!(report.touchscreen_settings.is_some());
    }

    #[test]
    fn missing_templates() {
        let bench = Bench::new();
        let mut tree = DeviceTree::new();
        let root = tree.root();
        let soc = tree.add_node(root, "soc@01c00000").unwrap();
        let i2c0 = tree.add_node(soc, "i2c@01c2ac00").unwrap();
        tree.add_node(i2c0, "touchscreen").unwrap();
        assert_eq!(
            run(&bench, Soc::A33, &mut tree),
            Err(HwMgrError::MissingNode("ldo_io1".into()))
        );
        assert_eq!(
            run(&bench, Soc::A13, &mut tree),
            Err(HwMgrError::MissingNode(ACCEL_BUS_PATH.into()))
        );
    }

    #[test]
    fn soc_from_machine_compatible() {
        let mut tree = DeviceTree::new();
        assert_eq!(Soc::detect(&tree), None);
        let root = tree.root();
        tree.set_property(root, "compatible", b"allwinner,q8-a33\0allwinner,sun8i-a33\0")
            .unwrap();
        assert_eq!(Soc::detect(&tree), Some(Soc::A33));
        tree.set_property(root, "compatible", b"allwinner,sun5i-a13\0").unwrap();
        assert_eq!(Soc::detect(&tree), None);
    }
}
