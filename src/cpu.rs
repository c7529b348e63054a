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

//! CPU topology provider
//!
//! Discovery needs two things from the CPU side: which chip every possible
//! hardware thread belongs to, and how many threads are present. On POWER
//! the chip id is the `physical_package_id` of the thread.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::constants::paths;
use crate::error::{Result, SensorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuUnit {
    pub cpu: u32,
    pub chip_id: u32,
}

pub trait CpuTopology {
    /// Possible hardware threads with their owning chip, in CPU order
    fn possible_units(&self) -> Result<Vec<CpuUnit>>;

    /// Number of present hardware threads
    fn present_count(&self) -> Result<usize>;
}

/// Reads `/sys/devices/system/cpu`
#[derive(Debug, Clone)]
pub struct SysfsCpuTopology {
    root: PathBuf,
}

impl SysfsCpuTopology {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_list(&self, file: &str) -> Result<Vec<u32>> {
        let path = self.root.join(file);
        let raw = read_trimmed(&path)?;
        parse_cpu_list(&raw)
    }
}

impl Default for SysfsCpuTopology {
    fn default() -> Self {
        Self::new(paths::CPU_SYSFS)
    }
}

impl CpuTopology for SysfsCpuTopology {
    fn possible_units(&self) -> Result<Vec<CpuUnit>> {
        let mut units = Vec::new();
        for cpu in self.read_list("possible")? {
            let id_path = self
                .root
                .join(format!("cpu{}", cpu))
                .join("topology")
                .join("physical_package_id");
            // Threads that never came online have no topology directory
            let Ok(raw) = read_trimmed(&id_path) else {
                trace!(cpu, "No package id, skipping");
                continue;
            };
            let chip_id = raw.parse::<i64>().map_err(|_| {
                SensorError::Topology(format!("bad package id {:?} for cpu{}", raw, cpu))
            })?;
            // -1 means the platform did not report a package
            let Ok(chip_id) = u32::try_from(chip_id) else {
                trace!(cpu, chip_id, "Unreported package id, skipping");
                continue;
            };
            units.push(CpuUnit { cpu, chip_id });
        }
        debug!(units = units.len(), "Read CPU topology");
        Ok(units)
    }

    fn present_count(&self) -> Result<usize> {
        Ok(self.read_list("present")?.len())
    }
}

/// Fixed topology, for machines described ahead of time and for tests
#[derive(Debug, Clone, Default)]
pub struct StaticCpuTopology {
    pub units: Vec<CpuUnit>,
    pub present: usize,
}

impl StaticCpuTopology {
    /// `threads_per_chip` consecutive threads on each chip, all present
    pub fn uniform(chip_ids: &[u32], threads_per_chip: u32) -> Self {
        let mut units = Vec::new();
        let mut cpu = 0;
        for &chip_id in chip_ids {
            for _ in 0..threads_per_chip {
                units.push(CpuUnit { cpu, chip_id });
                cpu += 1;
            }
        }
        let present = units.len();
        Self { units, present }
    }
}

impl CpuTopology for StaticCpuTopology {
    fn possible_units(&self) -> Result<Vec<CpuUnit>> {
        Ok(self.units.clone())
    }

    fn present_count(&self) -> Result<usize> {
        Ok(self.present)
    }
}

/// Parse a kernel CPU list such as `0-3,8-11` or `0,2,4`
pub fn parse_cpu_list(list: &str) -> Result<Vec<u32>> {
    let bad = || SensorError::Topology(format!("malformed cpu list {:?}", list));
    let mut cpus = Vec::new();
    for part in list.trim().split(',').filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: u32 = lo.trim().parse().map_err(|_| bad())?;
                let hi: u32 = hi.trim().parse().map_err(|_| bad())?;
                if hi < lo {
                    return Err(bad());
                }
                cpus.extend(lo..=hi);
            }
            None => cpus.push(part.trim().parse().map_err(|_| bad())?),
        }
    }
    Ok(cpus)
}

fn read_trimmed(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| SensorError::file_read(path, e))
}
