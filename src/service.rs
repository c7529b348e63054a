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

//! Sensor lifecycle
//!
//! `load_sensors` runs the whole discovery pipeline (topology, walk, group
//! assembly) and publishes the result. The returned `Publication` is the
//! only handle to the sensors; dropping it or calling `unload_sensors`
//! tears everything down again.

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::{validate_config, DiscoveryConfig};
use crate::cpu::{CpuTopology, SysfsCpuTopology};
use crate::devtree::DeviceNode;
use crate::group::{assemble, AssembledGroups};
use crate::memory::{DevMem, MemoryImage, PhysMapper};
use crate::registry::{publish, Publication, SensorRegistry};
use crate::topology::Topology;
use crate::walker::{walk, WalkReport};

/// Everything discovery produced, not yet published
#[derive(Debug)]
pub struct Discovery {
    pub topology: Topology,
    pub groups: AssembledGroups,
    pub report: WalkReport,
}

/// Build the topology from `tree`, bind every sensor and assemble the groups
pub fn discover(
    tree: &DeviceNode,
    cpus: &dyn CpuTopology,
    mapper: &dyn PhysMapper,
    threads_per_core: u32,
) -> crate::error::Result<Discovery> {
    let mut topology = Topology::build(tree, cpus, threads_per_core)?;
    let report = walk(tree, &mut topology, mapper)?;
    let groups = assemble(&topology)?;

    if !report.skipped.is_empty() {
        warn!(skipped = report.skipped.len(), "Some sensor nodes were left out");
    }
    Ok(Discovery { topology, groups, report })
}

/// Discover and publish under `root_name`. Nothing stays registered or
/// mapped when this fails.
pub fn load_sensors<R: SensorRegistry>(
    registry: R,
    root_name: &str,
    tree: &DeviceNode,
    cpus: &dyn CpuTopology,
    mapper: &dyn PhysMapper,
    threads_per_core: u32,
) -> crate::error::Result<Publication<R>> {
    let Discovery { topology, groups, report } = discover(tree, cpus, mapper, threads_per_core)?;
    publish(registry, root_name, topology, groups, report)
}

pub fn unload_sensors<R: SensorRegistry>(publication: Publication<R>) {
    info!(root = %publication.root(), "Unloading sensors");
    publication.teardown();
}

/// Open the memory source the configuration names
pub fn open_mapper(config: &DiscoveryConfig) -> Result<Box<dyn PhysMapper>> {
    match &config.memory_image {
        Some(image) => {
            let image = MemoryImage::load(&image.path, image.base)
                .with_context(|| format!("loading memory image {}", image.path.display()))?;
            Ok(Box::new(image))
        }
        None => {
            let mem = DevMem::open(&config.memory_device)
                .with_context(|| format!("opening {}", config.memory_device.display()))?;
            Ok(Box::new(mem))
        }
    }
}

/// Resolve every provider from `config` and load the sensors into `registry`
pub fn start<R: SensorRegistry>(config: &DiscoveryConfig, registry: R) -> Result<Publication<R>> {
    validate_config(config).context("invalid configuration")?;

    let tree = DeviceNode::load(&config.device_tree)
        .with_context(|| format!("reading device tree {}", config.device_tree.display()))?;
    let cpus = SysfsCpuTopology::new(&config.cpu_sysfs);
    let mapper = open_mapper(config)?;

    let publication = load_sensors(
        registry,
        &config.root_name,
        &tree,
        &cpus,
        mapper.as_ref(),
        config.threads_per_core,
    )
    .context("failed to load OCC sensors")?;

    if let Some(topology) = publication.topology() {
        let summary = topology.summary();
        info!(
            chips = ?summary.chip_ids,
            cores_per_chip = summary.cores_per_chip,
            sensors = summary.sensors,
            well_known = ?summary.well_known,
            "OCC sensors loaded"
        );
    }
    Ok(publication)
}
