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

//! Device tree model for the OCC sensor description
//!
//! The firmware describes the sensors as a subtree rooted at `/occ_sensors`:
//!
//! ```text
//! occ_sensors            nr_system_sensors, nr_chip_sensors, nr_core_sensors
//! ├── system             container of system-scope sensor leaves
//! │   └── power@...      reg = <addr-hi addr-lo size>, unit = "W"
//! └── chip@...           ibm,chip-id, reg (base of the chip's sensor block)
//!     ├── power@...      chip-scope leaf
//!     └── core@...       ibm,core-id
//!         └── temp@...   core-scope leaf
//! ```
//!
//! Nodes are loaded either from a `/proc/device-tree` style directory or from
//! a JSON fixture, and are owned outright; there are no parent links.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, trace};

use crate::error::{Result, SensorError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceNode {
    full_name: String,
    properties: BTreeMap<String, Vec<u8>>,
    children: Vec<DeviceNode>,
}

impl DeviceNode {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            properties: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Add a property encoded as big-endian 32-bit cells
    pub fn with_cells(self, name: impl Into<String>, cells: &[u32]) -> Self {
        self.with_property(name, encode_cells(cells))
    }

    /// Add a NUL-terminated string property
    pub fn with_string(self, name: impl Into<String>, value: &str) -> Self {
        self.with_property(name, encode_string(value))
    }

    pub fn with_child(mut self, child: DeviceNode) -> Self {
        self.children.push(child);
        self
    }

    /// Node name without the `@unit-address` suffix
    pub fn name(&self) -> &str {
        self.full_name
            .split_once('@')
            .map(|(base, _)| base)
            .unwrap_or(self.full_name.as_str())
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn children(&self) -> &[DeviceNode] {
        &self.children
    }

    pub fn property(&self, name: &str) -> Option<&[u8]> {
        self.properties.get(name).map(Vec::as_slice)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// First cell of a property
    pub fn read_u32(&self, name: &str) -> Option<u32> {
        let raw = self.property(name)?.get(..4)?;
        Some(u32::from_be_bytes(raw.try_into().ok()?))
    }

    /// First two cells of a property, as one 64-bit value
    pub fn read_u64(&self, name: &str) -> Option<u64> {
        let raw = self.property(name)?.get(..8)?;
        Some(u64::from_be_bytes(raw.try_into().ok()?))
    }

    /// A 32-bit cell at `index`
    pub fn read_cell(&self, name: &str, index: usize) -> Option<u32> {
        let start = index.checked_mul(4)?;
        let raw = self.property(name)?.get(start..start + 4)?;
        Some(u32::from_be_bytes(raw.try_into().ok()?))
    }

    /// String property up to the first NUL
    pub fn read_string(&self, name: &str) -> Option<&str> {
        let raw = self.property(name)?;
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        std::str::from_utf8(&raw[..end]).ok()
    }

    /// Load a node from a directory laid out like `/proc/device-tree`.
    ///
    /// Subdirectories become children and regular files become properties.
    /// Entries are visited by base name, then by unit address as a number, so
    /// `core@8` comes before `core@10` and readdir order does not matter.
    pub fn load_dir(path: &Path) -> Result<DeviceNode> {
        let full_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("/")
            .to_string();
        let mut node = DeviceNode::new(full_name);

        let mut entries = fs::read_dir(path)
            .map_err(|e| SensorError::file_read(path, e))?
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort_by_cached_key(|e| entry_order(&e.file_name().to_string_lossy()));

        for entry in entries {
            let entry_path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                node.children.push(DeviceNode::load_dir(&entry_path)?);
            } else if file_type.is_file() {
                let prop = entry.file_name().to_string_lossy().into_owned();
                let value = fs::read(&entry_path).map_err(|e| SensorError::file_read(&entry_path, e))?;
                trace!(node = %node.full_name, property = %prop, len = value.len(), "Read property");
                node.properties.insert(prop, value);
            }
        }

        debug!(
            node = %node.full_name,
            properties = node.properties.len(),
            children = node.children.len(),
            "Loaded device tree node"
        );
        Ok(node)
    }

    /// Parse a JSON fixture. Property values are strings or arrays of cells.
    pub fn from_json_str(json: &str) -> Result<DeviceNode> {
        let raw: JsonNode = serde_json::from_str(json)?;
        Ok(raw.into())
    }

    /// Load from a directory, or from a JSON file otherwise
    pub fn load(path: &Path) -> Result<DeviceNode> {
        if path.is_dir() {
            return DeviceNode::load_dir(path);
        }
        let data = fs::read_to_string(path).map_err(|e| SensorError::file_read(path, e))?;
        DeviceNode::from_json_str(&data)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonNode {
    name: String,
    #[serde(default)]
    properties: BTreeMap<String, JsonProperty>,
    #[serde(default)]
    children: Vec<JsonNode>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonProperty {
    Text(String),
    Cells(Vec<u32>),
}

impl From<JsonNode> for DeviceNode {
    fn from(raw: JsonNode) -> Self {
        DeviceNode {
            full_name: raw.name,
            properties: raw
                .properties
                .into_iter()
                .map(|(name, value)| {
                    let bytes = match value {
                        JsonProperty::Text(s) => encode_string(&s),
                        JsonProperty::Cells(cells) => encode_cells(&cells),
                    };
                    (name, bytes)
                })
                .collect(),
            children: raw.children.into_iter().map(DeviceNode::from).collect(),
        }
    }
}

/// `(base name, unit address, full name)`; names without a hex unit address
/// sort ahead of their numbered siblings.
fn entry_order(full_name: &str) -> (String, Option<u64>, String) {
    let (base, unit) = match full_name.split_once('@') {
        Some((base, unit)) => (base, u64::from_str_radix(unit, 16).ok()),
        None => (full_name, None),
    };
    (base.to_string(), unit, full_name.to_string())
}

fn encode_cells(cells: &[u32]) -> Vec<u8> {
    cells.iter().flat_map(|c| c.to_be_bytes()).collect()
}

fn encode_string(value: &str) -> Vec<u8> {
    let mut bytes = value.as_bytes().to_vec();
    bytes.push(0);
    bytes
}
