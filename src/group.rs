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

//! Group assembler
//!
//! Packs the bound sensors into the lists that get published: one `system`
//! group, and one `chip<id>` group per chip holding the chip's own sensors
//! followed by each core's sensors in core order.

use std::sync::Arc;

use tracing::debug;

use crate::constants::naming::SYSTEM_GROUP;
use crate::error::{Result, SensorError};
use crate::sensor::Sensor;
use crate::topology::{Chip, SensorCounts, Topology};

/// A named, ordered list of read endpoints
#[derive(Debug, Clone)]
pub struct SensorGroup {
    name: String,
    endpoints: Vec<Arc<Sensor>>,
}

impl SensorGroup {
    pub fn new(name: impl Into<String>, endpoints: Vec<Arc<Sensor>>) -> Self {
        Self {
            name: name.into(),
            endpoints,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoints(&self) -> &[Arc<Sensor>] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.endpoints.iter().map(|s| s.name())
    }

    /// Endpoint by name; with duplicates the last one wins
    pub fn find(&self, name: &str) -> Option<&Arc<Sensor>> {
        self.endpoints.iter().rev().find(|s| s.name() == name)
    }
}

#[derive(Debug, Clone)]
pub struct AssembledGroups {
    pub system: SensorGroup,
    pub chips: Vec<SensorGroup>,
}

impl AssembledGroups {
    pub fn iter(&self) -> impl Iterator<Item = &SensorGroup> {
        std::iter::once(&self.system).chain(self.chips.iter())
    }

    pub fn find(&self, name: &str) -> Option<&SensorGroup> {
        self.iter().find(|g| g.name() == name)
    }
}

pub fn assemble(topology: &Topology) -> Result<AssembledGroups> {
    let system = system_group(topology)?;

    let mut chips = Vec::new();
    chips
        .try_reserve_exact(topology.nr_chips())
        .map_err(SensorError::out_of_memory("chip groups"))?;
    for chip in topology.chips() {
        chips.push(chip_group(chip, topology.counts(), topology.cores_per_chip())?);
    }

    debug!(
        system = system.len(),
        chips = chips.len(),
        "Assembled sensor groups"
    );
    Ok(AssembledGroups { system, chips })
}

pub fn system_group(topology: &Topology) -> Result<SensorGroup> {
    let sensors = topology.system_sensors();
    let mut endpoints = Vec::new();
    endpoints
        .try_reserve_exact(sensors.capacity())
        .map_err(SensorError::out_of_memory("system group"))?;
    endpoints.extend(sensors.iter().cloned());
    Ok(SensorGroup::new(SYSTEM_GROUP, endpoints))
}

/// The chip's sensors, then core 1's sensors, core 2's, and so on.
///
/// Never longer than `nr_chip_sensors + cores_per_chip * nr_core_sensors`,
/// and exactly that long when every slot was bound.
pub fn chip_group(chip: &Chip, counts: SensorCounts, cores_per_chip: usize) -> Result<SensorGroup> {
    let capacity = counts.chip_group_capacity(cores_per_chip);
    let mut endpoints = Vec::new();
    endpoints
        .try_reserve_exact(capacity)
        .map_err(SensorError::out_of_memory("chip group"))?;

    endpoints.extend(chip.sensors.iter().cloned());
    for core in &chip.cores {
        endpoints.extend(core.sensors.iter().cloned());
    }
    debug_assert!(
        endpoints.len() <= capacity,
        "chip{} group holds {} endpoints, capacity {}",
        chip.hardware_id,
        endpoints.len(),
        capacity
    );

    Ok(SensorGroup::new(chip.name.clone(), endpoints))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_utils::*;
    use crate::walker::walk;

    fn assembled(fixture: &OccFixture) -> (Topology, AssembledGroups) {
        let mut topology = Topology::build(&fixture.root, &fixture.cpus(), 8).unwrap();
        walk(&fixture.root, &mut topology, &fixture.image).unwrap();
        let groups = assemble(&topology).unwrap();
        (topology, groups)
    }

    #[test]
    fn test_chip_group_length_matches_counts() {
        let fixture = OccFixture::new(&[0, 8], 3);
        let (topology, groups) = assembled(&fixture);
        let expected = topology.counts().chip + topology.cores_per_chip() * topology.counts().core;
        assert_eq!(groups.chips.len(), 2);
        for group in &groups.chips {
            assert_eq!(group.len(), expected);
        }
    }

    #[test]
    fn test_chip_group_order() {
        let fixture = OccFixture::new(&[0], 2);
        let (_, groups) = assembled(&fixture);
        let names: Vec<&str> = groups.chips[0].names().collect();
        assert_eq!(
            names,
            vec![
                "power",
                "chip-energy",
                "core1-temp",
                "core1-freq",
                "core2-temp",
                "core2-freq",
            ]
        );
    }

    #[test]
    fn test_chip_groups_named_by_hardware_id() {
        let fixture = OccFixture::new(&[3, 0x10], 2);
        let (topology, groups) = assembled(&fixture);
        assert_eq!(topology.chips()[0].array_index, 0);
        assert_eq!(groups.chips[0].name(), "chip3");
        assert_eq!(groups.chips[1].name(), "chip16");
        assert!(groups.find("chip16").is_some());
        assert!(groups.find("chip1").is_none());
    }

    #[test]
    fn test_core_sensor_lands_in_its_chip_group() {
        let fixture = OccFixture::new(&[0, 3], 3);
        let (_, groups) = assembled(&fixture);
        let chip3 = groups.find("chip3").unwrap();
        let temp = chip3.find("core3-temp").unwrap();
        assert_eq!(temp.read(), format!("{} C", fixture.core_temp(1, 2)));
    }

    #[test]
    fn test_system_group() {
        let fixture = OccFixture::new(&[0], 1);
        let (_, groups) = assembled(&fixture);
        assert_eq!(groups.system.name(), "system");
        let names: Vec<&str> = groups.system.names().collect();
        assert_eq!(names, vec!["power", "count", "system-energy"]);
        assert_eq!(groups.iter().count(), 2);
    }

    #[test]
    fn test_find_prefers_last_duplicate() {
        let image = image_with(&[(0x10, 16, 1), (0x20, 16, 2)]);
        let a = crate::walker::bind_sensor(
            &leaf("dup", IMAGE_BASE + 0x10, 2, None),
            "dup".into(),
            crate::sensor::Scope::System,
            &image,
        )
        .unwrap();
        let b = crate::walker::bind_sensor(
            &leaf("dup", IMAGE_BASE + 0x20, 2, None),
            "dup".into(),
            crate::sensor::Scope::System,
            &image,
        )
        .unwrap();
        let group = SensorGroup::new("system", vec![a, b]);
        assert_eq!(group.len(), 2);
        assert_eq!(group.find("dup").unwrap().read(), "2");
    }
}
