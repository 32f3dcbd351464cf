//! Wire-format primitives for the tagwire message system.
//!
//! This crate implements the byte-level codec layer: a deferred-operation
//! [Writer] with `fork`/`ldelim` framing for nested length-delimited
//! messages, a bounds-checked cursor [Reader], and the base64 codec used for
//! the textual form of bytes fields.
//!
//! ```
//! use tagwire_wire::{Reader, Writer, WIRE_VARINT};
//!
//! let mut w = Writer::new();
//! w.tag(1, WIRE_VARINT);
//! w.uint32(150);
//! let buf = w.finish();
//!
//! let mut r = Reader::new(&buf);
//! assert_eq!(r.uint32(), Ok(0x08)); // tag for field 1, wire type varint
//! assert_eq!(r.uint32(), Ok(150));
//! ```

pub mod base64;
pub mod error;
pub mod reader;
pub mod writer;

pub use error::WireError;
pub use reader::Reader;
pub use writer::Writer;

/// Varint-encoded value.
pub const WIRE_VARINT: u32 = 0;
/// Little-endian 64-bit fixed-width value.
pub const WIRE_FIXED64: u32 = 1;
/// Length-delimited blob: submessage, string, bytes or packed field.
pub const WIRE_LEN: u32 = 2;
/// Legacy group start marker.
pub const WIRE_START_GROUP: u32 = 3;
/// Legacy group end marker.
pub const WIRE_END_GROUP: u32 = 4;
/// Little-endian 32-bit fixed-width value.
pub const WIRE_FIXED32: u32 = 5;

/// The number of bytes `value` occupies as a varint (1..=10).
pub fn varint_len(value: u64) -> usize {
    if value == 0 {
        return 1;
    }
    ((63 - value.leading_zeros() as usize) / 7) + 1
}

/// Zigzag-map a signed 32-bit integer so small magnitudes stay small.
pub fn zigzag32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

/// Reverse of [zigzag32].
pub fn unzigzag32(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

/// Zigzag-map a signed 64-bit integer.
pub fn zigzag64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Reverse of [zigzag64].
pub fn unzigzag64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_len_boundaries() {
        assert_eq!(varint_len(0), 1);
        assert_eq!(varint_len(127), 1);
        assert_eq!(varint_len(128), 2);
        assert_eq!(varint_len(16383), 2);
        assert_eq!(varint_len(16384), 3);
        assert_eq!(varint_len(u32::MAX as u64), 5);
        assert_eq!(varint_len(u64::MAX), 10);
    }

    #[test]
    fn zigzag_round_trip() {
        for v in [0i32, -1, 1, -2, 2, i32::MIN, i32::MAX] {
            assert_eq!(unzigzag32(zigzag32(v)), v);
        }
        for v in [0i64, -1, 1, i64::MIN, i64::MAX] {
            assert_eq!(unzigzag64(zigzag64(v)), v);
        }
        assert_eq!(zigzag32(-1), 1);
        assert_eq!(zigzag32(1), 2);
        assert_eq!(zigzag32(2147483647), 4294967294);
        assert_eq!(zigzag32(-2147483648), 4294967295);
    }
}
