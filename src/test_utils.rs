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

//! Fixtures shared by the unit tests: synthetic device trees and the memory
//! images their `reg` properties point into.

#[cfg(test)]
pub mod test_utils {
    use crate::cpu::StaticCpuTopology;
    use crate::devtree::DeviceNode;
    use crate::endian;
    use crate::memory::MemoryImage;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    /// Physical address of the first byte of every fixture image
    pub const IMAGE_BASE: u64 = 0x3FFD_0000;
    pub const IMAGE_SIZE: usize = 0x10000;

    const SYSTEM_SENSORS: &[(&str, u64, u32, Option<&str>, u64)] = &[
        ("power", 0x0, 16, Some("W"), 400),
        ("count", 0x8, 64, None, 1000),
        ("system-energy", 0x10, 64, Some("J"), 123_456),
    ];

    /// Store `value` big-endian at `offset`
    pub fn put_be(bytes: &mut [u8], offset: usize, width_bits: u32, value: u64) {
        let n = endian::width_bytes(width_bits);
        let be = value.to_be_bytes();
        bytes[offset..offset + n].copy_from_slice(&be[8 - n..]);
    }

    /// An image at `IMAGE_BASE` with `(offset, width, value)` stored in it
    pub fn image_with(values: &[(usize, u32, u64)]) -> MemoryImage {
        let mut bytes = vec![0u8; IMAGE_SIZE];
        for &(offset, width, value) in values {
            put_be(&mut bytes, offset, width, value);
        }
        MemoryImage::new(IMAGE_BASE, bytes)
    }

    /// Log output collected by `capture_logs`
    #[derive(Clone, Default)]
    pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` with a debug-level subscriber on this thread and return what
    /// it logged alongside its result
    pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();
        let result = tracing::subscriber::with_default(subscriber, f);
        let logs = String::from_utf8_lossy(&buffer.0.lock().unwrap()).into_owned();
        (result, logs)
    }

    pub fn reg_cells(address: u64, size: u32) -> [u32; 3] {
        [(address >> 32) as u32, address as u32, size]
    }

    pub fn leaf(name: &str, address: u64, size_bytes: u32, unit: Option<&str>) -> DeviceNode {
        let node = DeviceNode::new(name).with_cells("reg", &reg_cells(address, size_bytes));
        match unit {
            Some(unit) => node.with_string("unit", unit),
            None => node,
        }
    }

    pub fn counts_root(system: u32, chip: u32, core: u32) -> DeviceNode {
        DeviceNode::new("occ_sensors")
            .with_cells("nr_system_sensors", &[system])
            .with_cells("nr_chip_sensors", &[chip])
            .with_cells("nr_core_sensors", &[core])
    }

    /// A consistent tree plus image: three system sensors, two sensors per
    /// chip and two per core.
    pub struct OccFixture {
        pub root: DeviceNode,
        pub image: MemoryImage,
        pub chip_ids: Vec<u32>,
        pub cores: usize,
    }

    impl OccFixture {
        pub fn new(chip_ids: &[u32], cores: usize) -> Self {
            let mut bytes = vec![0u8; IMAGE_SIZE];
            for &(_, offset, width, _, value) in SYSTEM_SENSORS {
                put_be(&mut bytes, offset as usize, width, value);
            }
            for (index, &hw_id) in chip_ids.iter().enumerate() {
                let base = (Self::base_of(index) - IMAGE_BASE) as usize;
                put_be(&mut bytes, base + 4, 16, 0x0C0C);
                put_be(&mut bytes, base + 0x10, 16, 100 + hw_id as u64);
                put_be(&mut bytes, base + 0x18, 64, 5000 + hw_id as u64);
                for core in 0..cores {
                    let core_base = base + 0x100 + 0x20 * core;
                    put_be(&mut bytes, core_base, 16, Self::temp_of(index, core));
                    put_be(&mut bytes, core_base + 0x8, 32, 3000 + 100 * index as u64 + core as u64);
                }
            }

            let mut fixture = Self {
                root: DeviceNode::new("occ_sensors"),
                image: MemoryImage::new(IMAGE_BASE, bytes),
                chip_ids: chip_ids.to_vec(),
                cores,
            };
            fixture.root = fixture.tree(None);
            fixture
        }

        /// CPUs spread over the fixture's chips, eight threads per core
        pub fn cpus(&self) -> StaticCpuTopology {
            StaticCpuTopology::uniform(&self.chip_ids, self.cores as u32 * 8)
        }

        pub fn chip_base(&self, array_index: usize) -> u64 {
            Self::base_of(array_index)
        }

        pub fn core_temp(&self, chip_index: usize, core_index: usize) -> u64 {
            Self::temp_of(chip_index, core_index)
        }

        /// The same tree with `extra` appended to the system container
        pub fn root_with_system_leaf(&self, extra: DeviceNode) -> DeviceNode {
            self.tree(Some(extra))
        }

        fn base_of(array_index: usize) -> u64 {
            IMAGE_BASE + 0x1000 * (array_index as u64 + 1)
        }

        fn temp_of(chip_index: usize, core_index: usize) -> u64 {
            40 + 10 * chip_index as u64 + core_index as u64
        }

        fn tree(&self, extra: Option<DeviceNode>) -> DeviceNode {
            let nr_system = SYSTEM_SENSORS.len() as u32 + u32::from(extra.is_some());
            let mut system = DeviceNode::new("system");
            for &(name, offset, width, unit, _) in SYSTEM_SENSORS {
                system = system.with_child(leaf(name, IMAGE_BASE + offset, width / 8, unit));
            }
            if let Some(extra) = extra {
                system = system.with_child(extra);
            }

            let mut root = counts_root(nr_system, 2, 2).with_child(system);
            for (index, &hw_id) in self.chip_ids.iter().enumerate() {
                let base = Self::base_of(index);
                let mut chip = DeviceNode::new(format!("chip@{:x}", base))
                    .with_cells("ibm,chip-id", &[hw_id])
                    .with_cells("reg", &reg_cells(base, 8))
                    .with_child(leaf("power", base + 0x10, 2, Some("W")));
                for core in 0..self.cores {
                    let core_base = base + 0x100 + 0x20 * core as u64;
                    chip = chip.with_child(
                        DeviceNode::new(format!("core@{:x}", core_base))
                            .with_cells("ibm,core-id", &[core as u32])
                            .with_child(leaf("temp", core_base, 2, Some("C")))
                            .with_child(leaf("freq", core_base + 0x8, 4, Some("MHz"))),
                    );
                }
                chip = chip.with_child(leaf("chip-energy", base + 0x18, 8, Some("J")));
                root = root.with_child(chip);
            }
            root
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::*;

    #[test]
    fn test_fixture_declares_counts() {
        let fixture = OccFixture::new(&[0, 8], 2);
        assert_eq!(fixture.root.read_u32("nr_system_sensors"), Some(3));
        assert_eq!(fixture.root.children().len(), 3);
        assert_eq!(fixture.chip_base(1), IMAGE_BASE + 0x2000);
    }

    #[test]
    fn test_put_be() {
        let mut bytes = [0u8; 4];
        put_be(&mut bytes, 1, 16, 0x1234);
        assert_eq!(bytes, [0, 0x12, 0x34, 0]);
    }
}
