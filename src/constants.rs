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

//! Constants for occ-sensors
//!
//! Paths, device tree property names and naming limits live here so the
//! walker and the providers agree on them.

/// System paths
pub mod paths {
    /// Device tree node describing the OCC sensors
    pub const DEVICE_TREE_NODE: &str = "/proc/device-tree/occ_sensors";

    /// Per-CPU topology in sysfs
    pub const CPU_SYSFS: &str = "/sys/devices/system/cpu";

    /// Physical memory device used to reach the sensor registers
    pub const MEMORY_DEVICE: &str = "/dev/mem";

    /// Configuration directory
    pub const CONFIG_DIR: &str = "/etc/occ-sensors";

    /// Configuration file inside `CONFIG_DIR`
    pub const CONFIG_FILE: &str = "config.json";

    /// Environment variable overriding the configuration file location
    pub const CONFIG_ENV: &str = "OCC_SENSORS_CONFIG";
}

/// Device tree property and node names
pub mod dt {
    pub const REG: &str = "reg";
    pub const UNIT: &str = "unit";
    pub const CHIP_ID: &str = "ibm,chip-id";
    pub const CORE_ID: &str = "ibm,core-id";

    pub const NR_SYSTEM_SENSORS: &str = "nr_system_sensors";
    pub const NR_CHIP_SENSORS: &str = "nr_chip_sensors";
    pub const NR_CORE_SENSORS: &str = "nr_core_sensors";

    pub const CHIP_NODE: &str = "chip";
    pub const CORE_NODE: &str = "core";

    /// Index of the size cell in `reg = <addr-hi addr-lo size>`
    pub const REG_SIZE_CELL: usize = 2;
}

/// Sensor names recorded for diagnostics
pub mod well_known {
    pub const POWER: &str = "power";
    pub const COUNT: &str = "count";
    pub const SYSTEM_ENERGY: &str = "system-energy";
    pub const CHIP_ENERGY: &str = "chip-energy";
}

/// Topology derivation
pub mod topology {
    /// Hardware threads per core on POWER8 in SMT8 mode
    pub const DEFAULT_THREADS_PER_CORE: u32 = 8;

    /// Offset of the 16-bit field logged when a chip's sensor block is mapped
    pub const CHIP_BLOCK_PROBE_OFFSET: usize = 4;

    /// Bytes mapped at a chip's sensor block base
    pub const CHIP_BLOCK_PROBE_LEN: usize = 8;
}

/// Published names
pub mod naming {
    /// Longest endpoint name kept, in bytes
    pub const MAX_NAME_LEN: usize = 30;

    /// Default root namespace for published groups
    pub const ROOT_NAME: &str = "occ_sensors";

    /// Name of the system-scope group
    pub const SYSTEM_GROUP: &str = "system";
}
