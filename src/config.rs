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

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{naming, paths, topology};
use crate::error::{Result, SensorError};

/// Offline memory source: a byte dump whose first byte sits at `base`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryImageConfig {
    pub path: PathBuf,
    pub base: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Directory or JSON file holding the `occ_sensors` node
    #[serde(default = "default_device_tree")]
    pub device_tree: PathBuf,
    #[serde(default = "default_cpu_sysfs")]
    pub cpu_sysfs: PathBuf,
    #[serde(default = "default_memory_device")]
    pub memory_device: PathBuf,
    /// Read sensors from a dump instead of `memory_device`
    #[serde(default)]
    pub memory_image: Option<MemoryImageConfig>,
    #[serde(default = "default_root_name")]
    pub root_name: String,
    #[serde(default = "default_threads_per_core")]
    pub threads_per_core: u32,
}

fn default_device_tree() -> PathBuf { PathBuf::from(paths::DEVICE_TREE_NODE) }
fn default_cpu_sysfs() -> PathBuf { PathBuf::from(paths::CPU_SYSFS) }
fn default_memory_device() -> PathBuf { PathBuf::from(paths::MEMORY_DEVICE) }
fn default_root_name() -> String { naming::ROOT_NAME.to_string() }
fn default_threads_per_core() -> u32 { topology::DEFAULT_THREADS_PER_CORE }

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            device_tree: default_device_tree(),
            cpu_sysfs: default_cpu_sysfs(),
            memory_device: default_memory_device(),
            memory_image: None,
            root_name: default_root_name(),
            threads_per_core: default_threads_per_core(),
        }
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = env::var(paths::CONFIG_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    Path::new(paths::CONFIG_DIR).join(paths::CONFIG_FILE)
}

/// Load the configuration from `config_path()`, falling back to defaults
/// when no file exists there.
pub fn load_config() -> Result<DiscoveryConfig> {
    let path = config_path();
    if !path.exists() {
        debug!(path = %path.display(), "No configuration file, using defaults");
        return Ok(DiscoveryConfig::default());
    }
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> Result<DiscoveryConfig> {
    let data = fs::read_to_string(path).map_err(|e| SensorError::file_read(path, e))?;
    let cfg: DiscoveryConfig = serde_json::from_str(&data)?;
    validate_config(&cfg)?;
    debug!(path = %path.display(), ?cfg, "Loaded configuration");
    Ok(cfg)
}

fn is_safe_name(s: &str) -> bool {
    if s.is_empty() || s.len() > 64 { return false; }
    s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

pub fn validate_config(cfg: &DiscoveryConfig) -> Result<()> {
    if cfg.threads_per_core == 0 {
        return Err(SensorError::config("threads_per_core must be at least 1"));
    }
    if !is_safe_name(&cfg.root_name) {
        return Err(SensorError::config(format!("invalid root name {:?}", cfg.root_name)));
    }
    if cfg.root_name == "." || cfg.root_name == ".." {
        return Err(SensorError::config("root name may not be a relative path"));
    }
    Ok(())
}
