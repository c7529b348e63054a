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

//! Registry publisher
//!
//! Hands the assembled groups to a `SensorRegistry` under one root namespace
//! and keeps everything alive until teardown. Publication is all or nothing:
//! if any group fails to register, the root is released again before the
//! error is returned, so no half-published tree is left behind.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SensorError};
use crate::group::{AssembledGroups, SensorGroup};
use crate::sensor::Sensor;
use crate::topology::Topology;
use crate::walker::WalkReport;

/// The exposition facility groups are published into
#[cfg_attr(test, mockall::automock)]
pub trait SensorRegistry {
    /// Create the namespace groups are registered under
    fn create_root(&mut self, name: &str) -> Result<()>;

    /// Register one group of endpoints under `root`
    fn register_group(&mut self, root: &str, group: &SensorGroup) -> Result<()>;

    /// Drop the namespace and every group registered under it
    fn release_root(&mut self, root: &str);
}

impl<R: SensorRegistry + ?Sized> SensorRegistry for &mut R {
    fn create_root(&mut self, name: &str) -> Result<()> {
        (**self).create_root(name)
    }

    fn register_group(&mut self, root: &str, group: &SensorGroup) -> Result<()> {
        (**self).register_group(root, group)
    }

    fn release_root(&mut self, root: &str) {
        (**self).release_root(root)
    }
}

/// Published sensors. Dropping it tears the publication down.
#[derive(Debug)]
pub struct Publication<R: SensorRegistry> {
    registry: R,
    root: String,
    groups: Option<AssembledGroups>,
    topology: Option<Topology>,
    report: WalkReport,
    released: bool,
}

/// Register the system group, then every chip group, under `root`
pub fn publish<R: SensorRegistry>(
    mut registry: R,
    root: &str,
    topology: Topology,
    groups: AssembledGroups,
    report: WalkReport,
) -> Result<Publication<R>> {
    if let Err(e) = registry.create_root(root) {
        error!(root, error = %e, "Failed to create sensor root");
        return Err(e);
    }

    if let Err(e) = registry.register_group(root, &groups.system) {
        error!(error = %e, "Failed to create system attribute group");
        registry.release_root(root);
        return Err(e);
    }

    for (chip, group) in topology.chips().iter().zip(&groups.chips) {
        if let Err(e) = registry.register_group(root, group) {
            error!(chip = chip.hardware_id, error = %e, "Failed to create chip attribute group");
            registry.release_root(root);
            return Err(e);
        }
    }

    info!(
        root,
        groups = groups.chips.len() + 1,
        sensors = topology.sensor_count(),
        "Published sensor groups"
    );
    Ok(Publication {
        registry,
        root: root.to_string(),
        groups: Some(groups),
        topology: Some(topology),
        report,
        released: false,
    })
}

impl<R: SensorRegistry> Publication<R> {
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn groups(&self) -> Option<&AssembledGroups> {
        self.groups.as_ref()
    }

    pub fn topology(&self) -> Option<&Topology> {
        self.topology.as_ref()
    }

    pub fn report(&self) -> &WalkReport {
        &self.report
    }

    /// Release the root, drop the groups, then free the sensor arrays
    pub fn teardown(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.registry.release_root(&self.root);
        self.groups = None;
        if let Some(topology) = self.topology.take() {
            topology.release();
        }
        debug!(root = %self.root, "Sensor publication torn down");
    }
}

impl<R: SensorRegistry> Drop for Publication<R> {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// In-process registry
// ============================================================================

/// A registry kept in memory and addressed as `root/group/name`.
///
/// Cloning yields another handle to the same tree, so readers can keep one
/// while the publication owns another.
#[derive(Debug, Clone, Default)]
pub struct AttributeTree {
    inner: Arc<RwLock<TreeState>>,
}

#[derive(Debug, Default)]
struct TreeState {
    roots: BTreeMap<String, Vec<PublishedGroup>>,
    registered: usize,
    released: usize,
}

#[derive(Debug)]
struct PublishedGroup {
    name: String,
    endpoints: Vec<(String, Arc<Sensor>)>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub roots: usize,
    pub groups: usize,
    pub endpoints: usize,
    /// Groups registered over the registry's lifetime
    pub registered: usize,
    /// Groups released over the registry's lifetime
    pub released: usize,
}

impl AttributeTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> RwLockReadGuard<'_, TreeState> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, TreeState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn root_names(&self) -> Vec<String> {
        self.state().roots.keys().cloned().collect()
    }

    pub fn group_names(&self, root: &str) -> Vec<String> {
        self.state()
            .roots
            .get(root)
            .map(|groups| groups.iter().map(|g| g.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn endpoint_names(&self, root: &str, group: &str) -> Vec<String> {
        self.with_group(root, group, |g| g.endpoints.iter().map(|(n, _)| n.clone()).collect())
            .unwrap_or_default()
    }

    /// Read one endpoint, `None` when it is not published
    pub fn read(&self, root: &str, group: &str, name: &str) -> Option<String> {
        self.with_group(root, group, |g| {
            g.endpoints
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, sensor)| sensor.read())
        })
        .flatten()
    }

    /// Read `group/name` under `root`
    pub fn read_path(&self, root: &str, path: &str) -> Option<String> {
        let (group, name) = path.split_once('/')?;
        self.read(root, group, name)
    }

    /// Current reading of every endpoint under `root`, by group
    pub fn snapshot(&self, root: &str) -> Value {
        let state = self.state();
        let Some(groups) = state.roots.get(root) else {
            return Value::Null;
        };
        let mut out = Map::new();
        for group in groups {
            let readings: Map<String, Value> = group
                .endpoints
                .iter()
                .map(|(name, sensor)| (name.clone(), json!(sensor.read())))
                .collect();
            out.insert(group.name.clone(), Value::Object(readings));
        }
        Value::Object(out)
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.state();
        let groups = state.roots.values().map(Vec::len).sum();
        let endpoints = state
            .roots
            .values()
            .flat_map(|groups| groups.iter())
            .map(|g| g.endpoints.len())
            .sum();
        RegistryStats {
            roots: state.roots.len(),
            groups,
            endpoints,
            registered: state.registered,
            released: state.released,
        }
    }

    fn with_group<T>(&self, root: &str, group: &str, f: impl FnOnce(&PublishedGroup) -> T) -> Option<T> {
        let state = self.state();
        state
            .roots
            .get(root)?
            .iter()
            .find(|g| g.name == group)
            .map(f)
    }
}

impl SensorRegistry for AttributeTree {
    fn create_root(&mut self, name: &str) -> Result<()> {
        let mut state = self.state_mut();
        if state.roots.contains_key(name) {
            return Err(SensorError::registration(name, "root already exists"));
        }
        state.roots.insert(name.to_string(), Vec::new());
        Ok(())
    }

    fn register_group(&mut self, root: &str, group: &SensorGroup) -> Result<()> {
        let mut state = self.state_mut();
        let groups = state
            .roots
            .get_mut(root)
            .ok_or_else(|| SensorError::registration(group.name(), format!("no root {}", root)))?;
        if groups.iter().any(|g| g.name == group.name()) {
            return Err(SensorError::registration(group.name(), "group already exists"));
        }

        let mut endpoints: Vec<(String, Arc<Sensor>)> = Vec::with_capacity(group.len());
        for sensor in group.endpoints() {
            match endpoints.iter_mut().find(|(n, _)| n == sensor.name()) {
                Some(existing) => {
                    warn!(group = %group.name(), name = %sensor.name(), "Duplicate endpoint, keeping the last");
                    existing.1 = Arc::clone(sensor);
                }
                None => endpoints.push((sensor.name().to_string(), Arc::clone(sensor))),
            }
        }
        groups.push(PublishedGroup {
            name: group.name().to_string(),
            endpoints,
        });
        state.registered += 1;
        Ok(())
    }

    fn release_root(&mut self, root: &str) {
        let mut state = self.state_mut();
        if let Some(groups) = state.roots.remove(root) {
            state.released += groups.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::assemble;
    use crate::test_utils::test_utils::*;
    use crate::walker::walk;

    fn discovered(fixture: &OccFixture) -> (Topology, AssembledGroups, WalkReport) {
        let mut topology = Topology::build(&fixture.root, &fixture.cpus(), 8).unwrap();
        let report = walk(&fixture.root, &mut topology, &fixture.image).unwrap();
        let groups = assemble(&topology).unwrap();
        (topology, groups, report)
    }

    #[test]
    fn test_publish_into_attribute_tree() {
        let fixture = OccFixture::new(&[0, 8], 2);
        let (topology, groups, report) = discovered(&fixture);
        let tree = AttributeTree::new();
        let publication = publish(tree.clone(), "occ_sensors", topology, groups, report).unwrap();

        assert_eq!(tree.group_names("occ_sensors"), vec!["system", "chip0", "chip8"]);
        assert_eq!(tree.read("occ_sensors", "system", "power").as_deref(), Some("400 W"));
        assert_eq!(
            tree.read_path("occ_sensors", "chip8/power").as_deref(),
            Some("108 W")
        );
        assert_eq!(tree.read("occ_sensors", "chip8", "missing"), None);
        assert_eq!(publication.root(), "occ_sensors");
        publication.teardown();
    }

    #[test]
    fn test_teardown_releases_everything_once() {
        let fixture = OccFixture::new(&[0, 8], 2);
        let (topology, groups, report) = discovered(&fixture);
        let tree = AttributeTree::new();
        let publication = publish(tree.clone(), "occ_sensors", topology, groups, report).unwrap();
        assert!(fixture.image.live_mappings() > 0);

        publication.teardown();
        let stats = tree.stats();
        assert_eq!(stats.roots, 0);
        assert_eq!(stats.registered, 3);
        assert_eq!(stats.released, 3);
        assert_eq!(fixture.image.live_mappings(), 0);
    }

    struct RecordingRegistry<'a> {
        image: &'a crate::memory::MemoryImage,
        live_at_release: Option<usize>,
    }

    impl SensorRegistry for RecordingRegistry<'_> {
        fn create_root(&mut self, _name: &str) -> Result<()> {
            Ok(())
        }

        fn register_group(&mut self, _root: &str, _group: &SensorGroup) -> Result<()> {
            Ok(())
        }

        fn release_root(&mut self, _root: &str) {
            self.live_at_release = Some(self.image.live_mappings());
        }
    }

    #[test]
    fn test_root_released_before_sensors_are_unmapped() {
        let fixture = OccFixture::new(&[0], 1);
        let (topology, groups, report) = discovered(&fixture);
        let sensors = topology.sensor_count();
        let mut registry = RecordingRegistry { image: &fixture.image, live_at_release: None };

        let publication = publish(&mut registry, "occ_sensors", topology, groups, report).unwrap();
        publication.teardown();
        // One mapping per sensor plus the chip base
        assert_eq!(registry.live_at_release, Some(sensors + 1));
        assert_eq!(fixture.image.live_mappings(), 0);
    }

    #[test]
    fn test_drop_tears_down() {
        let fixture = OccFixture::new(&[0], 1);
        let (topology, groups, report) = discovered(&fixture);
        let tree = AttributeTree::new();
        {
            let _publication = publish(tree.clone(), "occ_sensors", topology, groups, report).unwrap();
            assert_eq!(tree.stats().groups, 2);
        }
        assert_eq!(tree.stats().roots, 0);
        assert_eq!(tree.stats().released, 2);
        assert_eq!(fixture.image.live_mappings(), 0);
    }

    #[test]
    fn test_duplicate_root_is_rejected() {
        let mut tree = AttributeTree::new();
        tree.create_root("occ_sensors").unwrap();
        let err = tree.create_root("occ_sensors").unwrap_err();
        assert!(matches!(err, SensorError::Registration { .. }));
    }

    #[test]
    fn test_group_requires_root() {
        let mut tree = AttributeTree::new();
        let group = SensorGroup::new("system", Vec::new());
        assert!(tree.register_group("occ_sensors", &group).is_err());
    }

    #[test]
    fn test_duplicate_endpoint_names_last_write_wins() {
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
        let mut tree = AttributeTree::new();
        tree.create_root("r").unwrap();
        tree.register_group("r", &SensorGroup::new("system", vec![a, b])).unwrap();
        assert_eq!(tree.endpoint_names("r", "system"), vec!["dup"]);
        assert_eq!(tree.read("r", "system", "dup").as_deref(), Some("2"));
    }

    #[test]
    fn test_snapshot() {
        let fixture = OccFixture::new(&[0], 1);
        let (topology, groups, report) = discovered(&fixture);
        let tree = AttributeTree::new();
        let _publication = publish(tree.clone(), "occ_sensors", topology, groups, report).unwrap();
        let snap = tree.snapshot("occ_sensors");
        assert_eq!(snap["system"]["count"], json!("1000"));
        assert_eq!(snap["chip0"]["core1-temp"], json!("40 C"));
        assert_eq!(tree.snapshot("other"), Value::Null);
    }

    #[test]
    fn test_root_failure_registers_nothing() {
        let fixture = OccFixture::new(&[0], 1);
        let (topology, groups, report) = discovered(&fixture);
        let mut registry = MockSensorRegistry::new();
        registry
            .expect_create_root()
            .times(1)
            .returning(|name| Err(SensorError::registration(name, "kobject")));
        registry.expect_register_group().times(0);
        registry.expect_release_root().times(0);

        let err = publish(&mut registry, "occ_sensors", topology, groups, report).unwrap_err();
        assert!(matches!(err, SensorError::Registration { .. }));
        assert_eq!(fixture.image.live_mappings(), 0);
    }

    #[test]
    fn test_system_group_failure_releases_root() {
        let fixture = OccFixture::new(&[0], 1);
        let (topology, groups, report) = discovered(&fixture);
        let mut registry = MockSensorRegistry::new();
        registry.expect_create_root().times(1).returning(|_| Ok(()));
        registry
            .expect_register_group()
            .times(1)
            .returning(|_, group| Err(SensorError::registration(group.name(), "sysfs")));
        registry.expect_release_root().times(1).return_const(());

        assert!(publish(&mut registry, "occ_sensors", topology, groups, report).is_err());
    }

    #[test]
    fn test_chip_group_failure_stops_and_rolls_back() {
        let fixture = OccFixture::new(&[0, 8, 16], 1);
        let (topology, groups, report) = discovered(&fixture);
        let mut registry = MockSensorRegistry::new();
        registry.expect_create_root().times(1).returning(|_| Ok(()));
        registry
            .expect_register_group()
            .times(3)
            .returning(|_, group| {
                if group.name() == "chip8" {
                    Err(SensorError::registration(group.name(), "sysfs"))
                } else {
                    Ok(())
                }
            });
        registry
            .expect_release_root()
            .withf(|root| root == "occ_sensors")
            .times(1)
            .return_const(());

        let err = publish(&mut registry, "occ_sensors", topology, groups, report).unwrap_err();
        assert!(matches!(err, SensorError::Registration { ref group, .. } if group == "chip8"));
        assert_eq!(fixture.image.live_mappings(), 0);
    }

    #[test]
    fn test_teardown_releases_root_once() {
        let fixture = OccFixture::new(&[0], 1);
        let (topology, groups, report) = discovered(&fixture);
        let mut registry = MockSensorRegistry::new();
        registry.expect_create_root().times(1).returning(|_| Ok(()));
        registry.expect_register_group().times(2).returning(|_, _| Ok(()));
        registry.expect_release_root().times(1).return_const(());

        let publication = publish(&mut registry, "occ_sensors", topology, groups, report).unwrap();
        publication.teardown();
        registry.checkpoint();
    }
}
