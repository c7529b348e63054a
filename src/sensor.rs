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

//! Sensor descriptors
//!
//! A `Sensor` is built once during discovery and read any number of times
//! afterwards. Reading decodes the live register; nothing is cached.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::constants::naming::MAX_NAME_LEN;
use crate::memory::MappedRegion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    System,
    Chip,
    Core,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Scope::System => "system",
            Scope::Chip => "chip",
            Scope::Core => "core",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct Sensor {
    name: String,
    scope: Scope,
    unit: Option<String>,
    physical_address: u64,
    width_bits: u32,
    region: Arc<MappedRegion>,
}

impl Sensor {
    pub fn new(
        name: impl Into<String>,
        scope: Scope,
        unit: Option<String>,
        physical_address: u64,
        width_bits: u32,
        region: Arc<MappedRegion>,
    ) -> Self {
        Self {
            name: truncate_name(name.into()),
            scope,
            unit,
            physical_address,
            width_bits,
            region,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn physical_address(&self) -> u64 {
        self.physical_address
    }

    pub fn accessible_address(&self) -> u64 {
        self.region.accessible_address()
    }

    pub fn width_bits(&self) -> u32 {
        self.width_bits
    }

    /// Decode the register as it is right now
    pub fn raw_value(&self) -> u64 {
        self.region.read_be(0, self.width_bits)
    }

    /// The read endpoint: `"<value> <unit>"`, or just `"<value>"` without a unit
    pub fn read(&self) -> String {
        format_reading(self.raw_value(), self.unit())
    }
}

pub fn format_reading(value: u64, unit: Option<&str>) -> String {
    match unit {
        Some(unit) => format!("{} {}", value, unit),
        None => value.to_string(),
    }
}

/// Endpoint name for a node: the node name itself at system and chip scope,
/// `core<N>-<name>` at core scope where N is the 1-based core position.
pub fn scoped_name(node_name: &str, core_index: Option<usize>) -> String {
    match core_index {
        Some(index) => format!("core{}-{}", index + 1, node_name),
        None => node_name.to_string(),
    }
}

fn truncate_name(mut name: String) -> String {
    if name.len() > MAX_NAME_LEN {
        let mut end = MAX_NAME_LEN;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        tracing::debug!(name = %name, keep = end, "Truncating sensor name");
        name.truncate(end);
    }
    name
}
