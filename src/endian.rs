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

//! Big-endian counter decoding
//!
//! OCC sensor registers are stored big-endian regardless of the host byte
//! order. Widths other than 16, 32 and 64 bits decode to 0.

use std::ptr;

/// Register widths the decoder understands, in bits
pub const SUPPORTED_WIDTHS: [u32; 3] = [16, 32, 64];

pub fn is_supported(width_bits: u32) -> bool {
    SUPPORTED_WIDTHS.contains(&width_bits)
}

/// Number of bytes a supported width occupies, 0 otherwise
pub fn width_bytes(width_bits: u32) -> usize {
    if is_supported(width_bits) {
        (width_bits / 8) as usize
    } else {
        0
    }
}

/// Decode `width_bits` bits big-endian from the start of `bytes`.
///
/// Returns 0 for unsupported widths or when `bytes` is too short.
pub fn decode_be(bytes: &[u8], width_bits: u32) -> u64 {
    match width_bits {
        16 => bytes
            .get(..2)
            .and_then(|b| b.try_into().ok())
            .map(|b| u64::from(u16::from_be_bytes(b))),
        32 => bytes
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .map(|b| u64::from(u32::from_be_bytes(b))),
        64 => bytes
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .map(u64::from_be_bytes),
        _ => None,
    }
    .unwrap_or(0)
}

/// Decode `width_bits` bits big-endian from a live memory location.
///
/// Bytes are copied with volatile reads one at a time, so a counter updated
/// by hardware mid-read may decode to a mix of old and new bytes.
///
/// # Safety
///
/// `addr` must be valid for reads of `width_bytes(width_bits)` bytes.
pub unsafe fn read_be_at(addr: *const u8, width_bits: u32) -> u64 {
    let len = width_bytes(width_bits);
    let mut buf = [0u8; 8];
    for (i, byte) in buf.iter_mut().enumerate().take(len) {
        // SAFETY: the caller guarantees `addr..addr + len` is readable.
        *byte = unsafe { ptr::read_volatile(addr.add(i)) };
    }
    decode_be(&buf[..len], width_bits)
}
