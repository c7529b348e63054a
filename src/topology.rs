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

//! Topology builder
//!
//! Derives the chip list from the CPU topology, reads the per-scope sensor
//! counts declared at the device tree root, and allocates every backing
//! array up front. The walker then fills the slots; nothing here is resized
//! after the build.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::constants::dt;
use crate::cpu::{CpuTopology, CpuUnit};
use crate::devtree::DeviceNode;
use crate::error::{Result, SensorError};
use crate::memory::MappedRegion;
use crate::sensor::Sensor;

/// Sensor counts declared at the root of the description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SensorCounts {
    pub system: usize,
    pub chip: usize,
    pub core: usize,
}

impl SensorCounts {
    pub fn from_root(root: &DeviceNode) -> Result<Self> {
        Ok(Self {
            system: required_count(root, dt::NR_SYSTEM_SENSORS)?,
            chip: required_count(root, dt::NR_CHIP_SENSORS)?,
            core: required_count(root, dt::NR_CORE_SENSORS)?,
        })
    }

    /// Endpoints in one chip group when every slot is filled
    pub fn chip_group_capacity(&self, cores_per_chip: usize) -> usize {
        self.chip + cores_per_chip * self.core
    }
}

fn required_count(root: &DeviceNode, property: &str) -> Result<usize> {
    match root.read_u32(property) {
        Some(n) => Ok(n as usize),
        None => {
            info!(node = %root.full_name(), property, "Required sensor count not found");
            Err(SensorError::missing_property(root.full_name(), property))
        }
    }
}

/// Fixed-capacity sensor slots, filled front to back
#[derive(Debug, Default)]
pub struct SensorArray {
    slots: Vec<Option<Arc<Sensor>>>,
    filled: usize,
}

impl SensorArray {
    pub fn with_capacity(capacity: usize, what: &'static str) -> Result<Self> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(SensorError::out_of_memory(what))?;
        slots.resize_with(capacity, || None);
        Ok(Self { slots, filled: 0 })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Populated slots
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.slots.len()
    }

    /// Fill the next vacant slot, handing the sensor back when full
    pub fn try_push(&mut self, sensor: Arc<Sensor>) -> std::result::Result<(), Arc<Sensor>> {
        match self.slots.get_mut(self.filled) {
            Some(slot) => {
                *slot = Some(sensor);
                self.filled += 1;
                Ok(())
            }
            None => Err(sensor),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Sensor>> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Populated sensors in slot order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Sensor>> {
        self.slots.iter().flatten()
    }
}

#[derive(Debug)]
pub struct Core {
    /// Position within the chip; the endpoint prefix is `core<array_index + 1>`
    pub array_index: usize,
    /// `ibm,core-id`, once the walker has seen the core node
    pub hardware_id: Option<u32>,
    pub sensors: SensorArray,
}

#[derive(Debug)]
pub struct Chip {
    pub array_index: usize,
    /// Hardware chip id; group names use this, not the array index
    pub hardware_id: u32,
    pub name: String,
    pub base_physical_address: Option<u64>,
    pub base: Option<Arc<MappedRegion>>,
    pub sensors: SensorArray,
    pub cores: Vec<Core>,
    pub power_address: Option<u64>,
    pub energy_address: Option<u64>,
}

impl Chip {
    pub fn base_accessible_address(&self) -> Option<u64> {
        self.base.as_ref().map(|b| b.accessible_address())
    }

    /// Populated sensors on this chip including its cores
    pub fn sensor_count(&self) -> usize {
        self.sensors.len() + self.cores.iter().map(|c| c.sensors.len()).sum::<usize>()
    }
}

/// System-scope addresses recorded by name during the walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WellKnownAddresses {
    pub power: Option<u64>,
    pub count: Option<u64>,
    pub system_energy: Option<u64>,
}

#[derive(Debug)]
pub struct Topology {
    counts: SensorCounts,
    cores_per_chip: usize,
    chips: Vec<Chip>,
    system_sensors: SensorArray,
    well_known: WellKnownAddresses,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopologySummary {
    pub chip_ids: Vec<u32>,
    pub cores_per_chip: usize,
    pub counts: SensorCounts,
    pub sensors: usize,
    pub well_known: WellKnownAddresses,
}

impl Topology {
    /// Size every array from the CPU topology and the declared counts
    pub fn build(
        root: &DeviceNode,
        cpus: &dyn CpuTopology,
        threads_per_core: u32,
    ) -> Result<Topology> {
        let ids = chip_ids(&cpus.possible_units()?);
        info!(nr_chips = ids.len(), chip_ids = ?ids, "Discovered chips");
        if ids.is_empty() {
            return Err(SensorError::Topology("no chips found in CPU topology".into()));
        }

        let counts = SensorCounts::from_root(root)?;
        let cores_per_chip = cores_per_chip(cpus.present_count()?, threads_per_core, ids.len())?;
        debug!(?counts, cores_per_chip, "Sizing sensor arrays");

        let system_sensors = SensorArray::with_capacity(counts.system, "system sensors")?;

        let mut chips = Vec::new();
        chips
            .try_reserve_exact(ids.len())
            .map_err(SensorError::out_of_memory("chips"))?;
        for (array_index, &hardware_id) in ids.iter().enumerate() {
            let mut cores = Vec::new();
            cores
                .try_reserve_exact(cores_per_chip)
                .map_err(SensorError::out_of_memory("cores"))?;
            for core_index in 0..cores_per_chip {
                cores.push(Core {
                    array_index: core_index,
                    hardware_id: None,
                    sensors: SensorArray::with_capacity(counts.core, "core sensors")?,
                });
            }
            chips.push(Chip {
                array_index,
                hardware_id,
                name: format!("chip{}", hardware_id),
                base_physical_address: None,
                base: None,
                sensors: SensorArray::with_capacity(counts.chip, "chip sensors")?,
                cores,
                power_address: None,
                energy_address: None,
            });
        }

        Ok(Topology {
            counts,
            cores_per_chip,
            chips,
            system_sensors,
            well_known: WellKnownAddresses::default(),
        })
    }

    pub fn counts(&self) -> SensorCounts {
        self.counts
    }

    pub fn cores_per_chip(&self) -> usize {
        self.cores_per_chip
    }

    pub fn nr_chips(&self) -> usize {
        self.chips.len()
    }

    pub fn chips(&self) -> &[Chip] {
        &self.chips
    }

    /// Array index of the chip with this hardware id
    pub fn chip_index_of(&self, hardware_id: u32) -> Option<usize> {
        self.chips.iter().position(|c| c.hardware_id == hardware_id)
    }

    pub fn system_sensors(&self) -> &SensorArray {
        &self.system_sensors
    }

    pub fn well_known(&self) -> WellKnownAddresses {
        self.well_known
    }

    pub(crate) fn chip_mut(&mut self, index: usize) -> Option<&mut Chip> {
        self.chips.get_mut(index)
    }

    pub(crate) fn system_sensors_mut(&mut self) -> &mut SensorArray {
        &mut self.system_sensors
    }

    pub(crate) fn well_known_mut(&mut self) -> &mut WellKnownAddresses {
        &mut self.well_known
    }

    /// Populated sensors across every scope
    pub fn sensor_count(&self) -> usize {
        self.system_sensors.len() + self.chips.iter().map(Chip::sensor_count).sum::<usize>()
    }

    pub fn summary(&self) -> TopologySummary {
        TopologySummary {
            chip_ids: self.chips.iter().map(|c| c.hardware_id).collect(),
            cores_per_chip: self.cores_per_chip,
            counts: self.counts,
            sensors: self.sensor_count(),
            well_known: self.well_known,
        }
    }

    /// Drop the arrays bottom-up: core sensors, cores, chip sensors, chips,
    /// then the system sensors. A sensor still held elsewhere, by a group for
    /// instance, keeps its mapping until that last reference goes.
    pub fn release(self) {
        let Topology {
            mut chips,
            system_sensors,
            ..
        } = self;
        for chip in chips.iter_mut() {
            for core in chip.cores.iter_mut() {
                core.sensors = SensorArray::default();
            }
            chip.cores = Vec::new();
            chip.sensors = SensorArray::default();
            chip.base = None;
        }
        let nr_chips = chips.len();
        drop(chips);
        drop(system_sensors);
        debug!(nr_chips, "Released sensor arrays");
    }
}

/// Distinct chip ids in first-seen order
pub fn chip_ids(units: &[CpuUnit]) -> Vec<u32> {
    let mut ids: Vec<u32> = Vec::new();
    for unit in units {
        if !ids.contains(&unit.chip_id) {
            ids.push(unit.chip_id);
        }
    }
    ids
}

/// Cores per chip: present threads / (threads per core * chips)
pub fn cores_per_chip(present: usize, threads_per_core: u32, nr_chips: usize) -> Result<usize> {
    if threads_per_core == 0 {
        return Err(SensorError::config("threads_per_core must be at least 1"));
    }
    if nr_chips == 0 {
        return Err(SensorError::Topology("no chips to divide cores across".into()));
    }
    let per_chip_threads = (threads_per_core as usize)
        .checked_mul(nr_chips)
        .ok_or_else(|| SensorError::Topology("thread count overflow".into()))?;
    Ok(present / per_chip_threads)
}
