/*
 * This file is part of occ-sensors.
 *
 * Copyright (C) 2025 occ-sensors contributors
 *
 * occ-sensors is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * occ-sensors is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with occ-sensors. If not, see <https://www.gnu.org/licenses/>.
 */

//! Configuration walker
//!
//! Visits the description in tree order and binds one sensor per leaf:
//!
//! - root children named `chip` are chips; every other root child is a
//!   container of system sensors
//! - chip children named `core` are cores; every other chip child is a chip
//!   sensor
//! - core children are core sensors, published as `core<N>-<name>`
//!
//! A leaf without a `reg` address is skipped on its own and its siblings are
//! still bound. Anything that breaks a whole scope aborts the walk.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::constants::{dt, topology as topo_consts, well_known};
use crate::devtree::DeviceNode;
use crate::error::{Result, SensorError};
use crate::memory::PhysMapper;
use crate::sensor::{scoped_name, Scope, Sensor};
use crate::topology::{Chip, Topology};

/// Outcome of a walk that did not abort
#[derive(Debug, Clone, Default, Serialize)]
pub struct WalkReport {
    /// Sensors bound to a slot
    pub bound: usize,
    /// One message per node left out
    pub skipped: Vec<String>,
}

/// Walk the description under `root` and fill the slots of `topology`
pub fn walk(root: &DeviceNode, topology: &mut Topology, mapper: &dyn PhysMapper) -> Result<WalkReport> {
    let mut walker = Walker {
        topology,
        mapper,
        report: WalkReport::default(),
    };
    for child in root.children() {
        if child.name() == dt::CHIP_NODE {
            walker.walk_chip(child)?;
        } else {
            walker.walk_system(child)?;
        }
    }

    let known = walker.topology.well_known();
    info!(
        power = %hex(known.power),
        count = %hex(known.count),
        system_energy = %hex(known.system_energy),
        "Well-known sensor addresses"
    );
    for chip in walker.topology.chips() {
        debug!(
            chip = chip.hardware_id,
            power = %hex(chip.power_address),
            energy = %hex(chip.energy_address),
            "Chip sensor addresses"
        );
    }

    let report = walker.report;
    info!(
        bound = report.bound,
        skipped = report.skipped.len(),
        "Sensor walk complete"
    );
    Ok(report)
}

/// Build the descriptor for one sensor leaf.
///
/// `reg` is `<addr-hi addr-lo size>`: the physical address in the first two
/// cells and the register size in bytes in the third. A missing size cell
/// leaves the width at 0, which reads as 0.
pub fn bind_sensor(
    node: &DeviceNode,
    name: String,
    scope: Scope,
    mapper: &dyn PhysMapper,
) -> Result<Arc<Sensor>> {
    let physical_address = node
        .read_u64(dt::REG)
        .ok_or_else(|| SensorError::skipped(node.full_name(), "cannot read reg property"))?;
    let width_bits = node
        .read_cell(dt::REG, dt::REG_SIZE_CELL)
        .map(|size| size.saturating_mul(8))
        .unwrap_or(0);

    let unit = match node.property(dt::UNIT) {
        None => {
            debug!(node = %node.full_name(), "Cannot read unit");
            None
        }
        Some(raw) => {
            let unit = node.read_string(dt::UNIT).map(str::to_string);
            if unit.is_none() {
                warn!(node = %node.full_name(), bytes = ?raw, "Unit is not valid UTF-8, ignoring it");
            }
            unit
        }
    };

    let region = mapper.map(physical_address, map_len(width_bits))?;
    let sensor = Sensor::new(name, scope, unit, physical_address, width_bits, region);
    debug!(
        sensor = %sensor.name(),
        %scope,
        vaddr = format_args!("{:#x}", sensor.accessible_address()),
        width = width_bits,
        value = sensor.raw_value(),
        "Bound sensor"
    );
    Ok(Arc::new(sensor))
}

fn hex(address: Option<u64>) -> String {
    address.map_or_else(|| "none".to_string(), |a| format!("{:#x}", a))
}

fn map_len(width_bits: u32) -> usize {
    ((width_bits / 8) as usize).max(1)
}

struct Walker<'a> {
    topology: &'a mut Topology,
    mapper: &'a dyn PhysMapper,
    report: WalkReport,
}

impl Walker<'_> {
    /// Log and record a skipped node; hand fatal errors back
    fn recover(&mut self, err: SensorError) -> Result<()> {
        if err.is_fatal() {
            return Err(err);
        }
        info!(error = %err, "Skipping node");
        self.report.skipped.push(err.to_string());
        Ok(())
    }

    fn chip(&mut self, index: usize) -> Result<&mut Chip> {
        self.topology
            .chip_mut(index)
            .ok_or_else(|| SensorError::Topology(format!("chip index {} out of range", index)))
    }

    fn walk_system(&mut self, container: &DeviceNode) -> Result<()> {
        let mapper = self.mapper;
        for node in container.children() {
            if self.topology.system_sensors().is_full() {
                self.recover(SensorError::skipped(
                    node.full_name(),
                    "more system sensors than nr_system_sensors",
                ))?;
                continue;
            }
            let sensor = match bind_sensor(node, scoped_name(node.name(), None), Scope::System, mapper) {
                Ok(sensor) => sensor,
                Err(e) => {
                    self.recover(e)?;
                    continue;
                }
            };

            let vaddr = sensor.accessible_address();
            let known = self.topology.well_known_mut();
            match node.name() {
                well_known::POWER => known.power = Some(vaddr),
                well_known::COUNT => known.count = Some(vaddr),
                well_known::SYSTEM_ENERGY => known.system_energy = Some(vaddr),
                _ => {}
            }

            let rejected = self.topology.system_sensors_mut().try_push(sensor).err();
            self.place(rejected)?;
        }
        Ok(())
    }

    fn walk_chip(&mut self, chip_node: &DeviceNode) -> Result<()> {
        let Some(chip_id) = chip_node.read_u32(dt::CHIP_ID) else {
            error!(node = %chip_node.full_name(), "Chip not found");
            return self.recover(SensorError::skipped(chip_node.full_name(), "no ibm,chip-id"));
        };
        let Some(index) = self.topology.chip_index_of(chip_id) else {
            warn!(chip = chip_id, "Chip id not present in CPU topology");
            return self.recover(SensorError::skipped(
                chip_node.full_name(),
                format!("chip id {} not present in CPU topology", chip_id),
            ));
        };

        let pbase = chip_node.read_u64(dt::REG).ok_or_else(|| {
            error!(chip = chip_id, "Chip sensor block offset not found");
            SensorError::missing_property(chip_node.full_name(), dt::REG)
        })?;
        let base = self.mapper.map(pbase, topo_consts::CHIP_BLOCK_PROBE_LEN)?;
        info!(
            index,
            chip = chip_id,
            pbase = format_args!("{:#x}", pbase),
            vbase = format_args!("{:#x}", base.accessible_address()),
            probe = base.read_be(topo_consts::CHIP_BLOCK_PROBE_OFFSET, 16),
            "Mapped chip sensor block"
        );
        {
            let chip = self.chip(index)?;
            chip.base_physical_address = Some(pbase);
            chip.base = Some(base);
        }

        let mapper = self.mapper;
        let mut core_index = 0;
        for node in chip_node.children() {
            if node.name() == dt::CORE_NODE {
                self.walk_core(node, index, core_index)?;
                core_index += 1;
                continue;
            }

            if self.chip(index)?.sensors.is_full() {
                self.recover(SensorError::skipped(
                    node.full_name(),
                    format!("more sensors on chip {} than nr_chip_sensors", chip_id),
                ))?;
                continue;
            }
            let sensor = match bind_sensor(node, scoped_name(node.name(), None), Scope::Chip, mapper) {
                Ok(sensor) => sensor,
                Err(e) => {
                    self.recover(e)?;
                    continue;
                }
            };

            let vaddr = sensor.accessible_address();
            let chip = self.chip(index)?;
            match node.name() {
                well_known::POWER => chip.power_address = Some(vaddr),
                well_known::CHIP_ENERGY => chip.energy_address = Some(vaddr),
                _ => {}
            }
            let rejected = chip.sensors.try_push(sensor).err();
            self.place(rejected)?;
        }
        Ok(())
    }

    /// Bind the sensors of one core. A core without `ibm,core-id` is left
    /// empty, but it still takes its position in the chip.
    fn walk_core(&mut self, core_node: &DeviceNode, chip_index: usize, core_index: usize) -> Result<()> {
        let cores_per_chip = self.topology.cores_per_chip();
        if core_index >= cores_per_chip {
            return self.recover(SensorError::skipped(
                core_node.full_name(),
                format!("core {} beyond {} cores per chip", core_index + 1, cores_per_chip),
            ));
        }
        let Some(core_id) = core_node.read_u32(dt::CORE_ID) else {
            info!(node = %core_node.full_name(), "Core id not found");
            return self.recover(SensorError::skipped(core_node.full_name(), "no ibm,core-id"));
        };
        self.chip(chip_index)?.cores[core_index].hardware_id = Some(core_id);

        let mapper = self.mapper;
        for node in core_node.children() {
            if self.chip(chip_index)?.cores[core_index].sensors.is_full() {
                self.recover(SensorError::skipped(
                    node.full_name(),
                    format!("more sensors on core {} than nr_core_sensors", core_index + 1),
                ))?;
                continue;
            }
            let name = scoped_name(node.name(), Some(core_index));
            let sensor = match bind_sensor(node, name, Scope::Core, mapper) {
                Ok(sensor) => sensor,
                Err(e) => {
                    self.recover(e)?;
                    continue;
                }
            };
            let rejected = self.chip(chip_index)?.cores[core_index]
                .sensors
                .try_push(sensor)
                .err();
            self.place(rejected)?;
        }
        Ok(())
    }

    fn place(&mut self, rejected: Option<Arc<Sensor>>) -> Result<()> {
        match rejected {
            None => {
                self.report.bound += 1;
                Ok(())
            }
            Some(sensor) => self.recover(SensorError::skipped(sensor.name(), "no free slot")),
        }
    }
}
