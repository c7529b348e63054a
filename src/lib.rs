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

//! occ-sensors - OCC in-band sensor discovery
//!
//! Reads the `occ_sensors` device tree node, locates every sensor the On Chip
//! Controller publishes in main memory, and exposes them as named read
//! endpoints grouped by system and chip.

pub mod config;
pub mod constants;
pub mod cpu;
pub mod devtree;
pub mod endian;
pub mod error;
pub mod group;
pub mod memory;
pub mod registry;
pub mod sensor;
pub mod service;
pub mod topology;
pub mod walker;

#[cfg(test)]
pub mod test_utils;

pub use config::DiscoveryConfig;
pub use devtree::DeviceNode;
pub use error::{Result, SensorError};
pub use registry::{AttributeTree, Publication, SensorRegistry};
pub use sensor::{Scope, Sensor};
pub use service::{load_sensors, start, unload_sensors};
