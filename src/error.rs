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

//! Error handling for occ-sensors
//!
//! A single error type covers discovery, mapping and publication. Only
//! `NodeSkipped` is recoverable; the walker logs it and moves on to the next
//! sibling. Everything else aborts the build and is surfaced to the caller.

use std::collections::TryReserveError;
use std::io;
use std::path::PathBuf;

/// Result type alias using SensorError
pub type Result<T> = std::result::Result<T, SensorError>;

#[derive(thiserror::Error, Debug)]
pub enum SensorError {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Node {node} is missing required property {property}")]
    MissingProperty {
        node: String,
        property: String,
    },

    #[error("Node {node} skipped: {reason}")]
    NodeSkipped {
        node: String,
        reason: String,
    },

    // ============================================================================
    // Resource Errors
    // ============================================================================
    #[error("Out of memory allocating {what}")]
    OutOfMemory {
        what: &'static str,
    },

    #[error("Failed to map physical address {address:#x} ({len} bytes): {reason}")]
    Mapping {
        address: u64,
        len: usize,
        reason: String,
    },

    #[error("CPU topology error: {0}")]
    Topology(String),

    // ============================================================================
    // Publication Errors
    // ============================================================================
    #[error("Failed to register group {group}: {reason}")]
    Registration {
        group: String,
        reason: String,
    },

    // ============================================================================
    // I/O and Parsing Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl SensorError {
    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn missing_property(node: impl Into<String>, property: impl Into<String>) -> Self {
        Self::MissingProperty {
            node: node.into(),
            property: property.into(),
        }
    }

    pub fn skipped(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NodeSkipped {
            node: node.into(),
            reason: reason.into(),
        }
    }

    pub fn registration(group: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Registration {
            group: group.into(),
            reason: reason.into(),
        }
    }

    pub fn mapping(address: u64, len: usize, reason: impl Into<String>) -> Self {
        Self::Mapping {
            address,
            len,
            reason: reason.into(),
        }
    }

    pub fn file_read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// True for the configuration family (`Config` and `MissingProperty`)
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_) | Self::MissingProperty { .. })
    }

    /// Whether this error aborts the whole build
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::NodeSkipped { .. })
    }

    /// Map a failed `try_reserve` into `OutOfMemory`
    pub fn out_of_memory(what: &'static str) -> impl FnOnce(TryReserveError) -> Self {
        move |_| Self::OutOfMemory { what }
    }
}
