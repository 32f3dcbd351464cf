use std::borrow::Cow;
use std::str;

use crate::error::WireError;
use crate::{unzigzag32, unzigzag64, WIRE_END_GROUP, WIRE_FIXED32, WIRE_FIXED64, WIRE_LEN, WIRE_START_GROUP, WIRE_VARINT};

/// A wire-format reader over a borrowed buffer.
///
/// Every fixed-size read validates `pos + size <= len` and fails with
/// [WireError::OutOfRange] otherwise; varints that do not terminate within
/// ten bytes fail with [WireError::InvalidVarint].
///
/// Example usage:
///
/// ```
/// let mut r = tagwire_wire::Reader::new(&[0x96, 0x01]);
/// assert_eq!(r.uint32(), Ok(150));
/// assert_eq!(r.pos(), 2);
/// ```
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    len: usize,
}

impl<'a> Reader<'a> {
    /// Create a reader over the whole of `buf`.
    pub fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader {
            buf,
            pos: 0,
            len: buf.len(),
        }
    }

    /// The current cursor position.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// The declared length of the readable region.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the cursor has consumed the whole region.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.len
    }

    fn want(&self, needed: usize) -> Result<(), WireError> {
        if self.pos + needed > self.len {
            Err(WireError::OutOfRange {
                pos: self.pos,
                needed,
                len: self.len,
            })
        } else {
            Ok(())
        }
    }

    fn byte(&mut self) -> Result<u8, WireError> {
        self.want(1)?;
        let value = self.buf[self.pos];
        self.pos += 1;
        Ok(value)
    }

    /// Read a varint into 64 bits. Ten 7-bit groups without a terminating
    /// byte is an invalid varint.
    pub fn uint64(&mut self) -> Result<u64, WireError> {
        let mut result: u64 = 0;
        for i in 0..10 {
            let byte = self.byte()?;
            // The tenth byte may only carry the final bit of a 64-bit value.
            result |= ((byte & 0x7F) as u64) << (i * 7);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(WireError::InvalidVarint)
    }

    /// Read a varint truncated to 32 bits.
    pub fn uint32(&mut self) -> Result<u32, WireError> {
        Ok(self.uint64()? as u32)
    }

    /// Read a varint as a signed 32-bit integer.
    pub fn int32(&mut self) -> Result<i32, WireError> {
        Ok(self.uint64()? as i32)
    }

    /// Read a zigzag-encoded signed 32-bit integer.
    pub fn sint32(&mut self) -> Result<i32, WireError> {
        Ok(unzigzag32(self.uint32()?))
    }

    /// Read a varint as a signed 64-bit integer.
    pub fn int64(&mut self) -> Result<i64, WireError> {
        Ok(self.uint64()? as i64)
    }

    /// Read a zigzag-encoded signed 64-bit integer.
    pub fn sint64(&mut self) -> Result<i64, WireError> {
        Ok(unzigzag64(self.uint64()?))
    }

    /// Read a varint as a boolean; any non-zero value is true.
    pub fn bool(&mut self) -> Result<bool, WireError> {
        Ok(self.uint64()? != 0)
    }

    /// Read a little-endian 32-bit fixed-width integer.
    pub fn fixed32(&mut self) -> Result<u32, WireError> {
        self.want(4)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Read a little-endian 32-bit fixed-width signed integer.
    pub fn sfixed32(&mut self) -> Result<i32, WireError> {
        Ok(self.fixed32()? as i32)
    }

    /// Read a little-endian 64-bit fixed-width integer.
    pub fn fixed64(&mut self) -> Result<u64, WireError> {
        self.want(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Read a little-endian 64-bit fixed-width signed integer.
    pub fn sfixed64(&mut self) -> Result<i64, WireError> {
        Ok(self.fixed64()? as i64)
    }

    /// Read an IEEE-754 single-precision float.
    pub fn float(&mut self) -> Result<f32, WireError> {
        Ok(f32::from_bits(self.fixed32()?))
    }

    /// Read an IEEE-754 double-precision float.
    pub fn double(&mut self) -> Result<f64, WireError> {
        Ok(f64::from_bits(self.fixed64()?))
    }

    /// Read a length-prefixed byte blob as a slice of the underlying buffer.
    pub fn bytes(&mut self) -> Result<&'a [u8], WireError> {
        let length = self.uint32()? as usize;
        self.want(length)?;
        let value = &self.buf[self.pos..self.pos + length];
        self.pos += length;
        Ok(value)
    }

    /// Read a length-prefixed UTF-8 string. Invalid UTF-8 is an error, never
    /// a lossy substitution.
    pub fn string(&mut self) -> Result<Cow<'a, str>, WireError> {
        let bytes = self.bytes()?;
        match str::from_utf8(bytes) {
            Ok(s) => Ok(Cow::Borrowed(s)),
            Err(_) => Err(WireError::InvalidUtf8),
        }
    }

    /// Advance the cursor by `length` bytes.
    pub fn skip(&mut self, length: usize) -> Result<(), WireError> {
        self.want(length)?;
        self.pos += length;
        Ok(())
    }

    /// Split off a reader over the next `length` bytes and advance past
    /// them. Reads through the sub-reader are bounded by its own length, so
    /// a malformed nested region cannot consume sibling data.
    pub fn sub(&mut self, length: usize) -> Result<Reader<'a>, WireError> {
        self.want(length)?;
        let slice = &self.buf[self.pos..self.pos + length];
        self.pos += length;
        Ok(Reader::new(slice))
    }

    /// Skip one value of the given wire type. Groups skip recursively until
    /// the matching end-group tag; wire types outside the five defined ones
    /// are fatal.
    pub fn skip_type(&mut self, wire_type: u32) -> Result<(), WireError> {
        match wire_type {
            WIRE_VARINT => {
                self.uint64()?;
            }
            WIRE_FIXED64 => {
                self.skip(8)?;
            }
            WIRE_LEN => {
                let length = self.uint32()? as usize;
                self.skip(length)?;
            }
            WIRE_START_GROUP => loop {
                let tag = self.uint32()?;
                let wt = tag & 7;
                if wt == WIRE_END_GROUP {
                    break;
                }
                self.skip_type(wt)?;
            },
            WIRE_FIXED32 => {
                self.skip(4)?;
            }
            other => return Err(WireError::InvalidWireType(other)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_uint32() {
        let read = |bytes: &[u8]| Reader::new(bytes).uint32();
        assert_eq!(read(&[0x00]), Ok(0));
        assert_eq!(read(&[0x01]), Ok(1));
        assert_eq!(read(&[0x7F]), Ok(127));
        assert_eq!(read(&[0x80, 0x01]), Ok(128));
        assert_eq!(read(&[0xAC, 0x02]), Ok(300));
        assert_eq!(read(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]), Ok(u32::MAX));
        assert!(matches!(read(&[]), Err(WireError::OutOfRange { .. })));
        assert!(matches!(read(&[0x80]), Err(WireError::OutOfRange { .. })));
    }

    #[test]
    fn read_uint64() {
        let read = |bytes: &[u8]| Reader::new(bytes).uint64();
        assert_eq!(
            read(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]),
            Ok(u64::MAX)
        );
        // Ten continuation bytes never terminate: invalid varint, not a
        // bounds error.
        assert_eq!(
            read(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x00]),
            Err(WireError::InvalidVarint)
        );
    }

    #[test]
    fn read_signed() {
        assert_eq!(
            Reader::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]).int32(),
            Ok(-1)
        );
        assert_eq!(Reader::new(&[0x01]).sint32(), Ok(-1));
        assert_eq!(Reader::new(&[0x02]).sint32(), Ok(1));
        assert_eq!(Reader::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]).sint32(), Ok(i32::MIN));
        assert_eq!(Reader::new(&[0x01]).sint64(), Ok(-1));
        assert_eq!(Reader::new(&[0x00]).bool(), Ok(false));
        assert_eq!(Reader::new(&[0x01]).bool(), Ok(true));
    }

    #[test]
    fn read_fixed() {
        assert_eq!(Reader::new(&[0xEF, 0xBE, 0xAD, 0xDE]).fixed32(), Ok(0xDEADBEEF));
        assert_eq!(
            Reader::new(&[0xFF, 0xFF, 0xFF, 0xFF]).sfixed32(),
            Ok(-1)
        );
        assert_eq!(
            Reader::new(&[1, 0, 0, 0, 0, 0, 0, 0]).fixed64(),
            Ok(1)
        );
        assert!(matches!(
            Reader::new(&[1, 2, 3]).fixed32(),
            Err(WireError::OutOfRange { .. })
        ));
    }

    #[test]
    fn read_float() {
        assert_eq!(Reader::new(&[0, 0, 0x80, 0x3F]).float(), Ok(1.0));
        assert_eq!(
            Reader::new(&[0, 0, 0, 0, 0, 0, 0xF0, 0x3F]).double(),
            Ok(1.0)
        );
        assert_eq!(
            Reader::new(&[0, 0, 0x80, 0x7F]).float(),
            Ok(f32::INFINITY)
        );
        assert_eq!(
            Reader::new(&[0, 0, 0xC0, 0x7F]).float().map(|f| f.is_nan()),
            Ok(true)
        );
        // Negative zero keeps its sign bit.
        assert_eq!(
            Reader::new(&[0, 0, 0, 0x80]).float().map(|f| f.is_sign_negative()),
            Ok(true)
        );
    }

    #[test]
    fn read_bytes_and_string() {
        let mut r = Reader::new(&[0x03, 1, 2, 3, 0x00]);
        assert_eq!(r.bytes(), Ok(&[1u8, 2, 3][..]));
        assert_eq!(r.bytes(), Ok(&[][..]));
        assert!(matches!(
            Reader::new(&[0x05, 1, 2]).bytes(),
            Err(WireError::OutOfRange { .. })
        ));

        assert_eq!(
            Reader::new(&[0x04, 240, 159, 141, 149]).string(),
            Ok(Cow::Borrowed("🍕"))
        );
        assert_eq!(
            Reader::new(&[0x02, 0xC3, 0x28]).string(),
            Err(WireError::InvalidUtf8)
        );
    }

    #[test]
    fn skip_types() {
        // varint
        let mut r = Reader::new(&[0x96, 0x01, 0x05]);
        r.skip_type(WIRE_VARINT).unwrap();
        assert_eq!(r.pos(), 2);
        // fixed64
        let mut r = Reader::new(&[0; 9]);
        r.skip_type(WIRE_FIXED64).unwrap();
        assert_eq!(r.pos(), 8);
        // length-delimited
        let mut r = Reader::new(&[0x02, 9, 9, 7]);
        r.skip_type(WIRE_LEN).unwrap();
        assert_eq!(r.pos(), 3);
        // fixed32
        let mut r = Reader::new(&[0; 5]);
        r.skip_type(WIRE_FIXED32).unwrap();
        assert_eq!(r.pos(), 4);
        // unknown wire types are fatal
        assert_eq!(
            Reader::new(&[]).skip_type(6),
            Err(WireError::InvalidWireType(6))
        );
        assert_eq!(
            Reader::new(&[]).skip_type(7),
            Err(WireError::InvalidWireType(7))
        );
    }

    #[test]
    fn skip_group() {
        // field 1 group: nested varint field 2, then nested group field 3,
        // then end group for field 1.
        let mut w = crate::Writer::new();
        w.tag(2, WIRE_VARINT);
        w.uint32(5);
        w.tag(3, WIRE_START_GROUP);
        w.tag(4, WIRE_VARINT);
        w.uint32(6);
        w.tag(3, WIRE_END_GROUP);
        w.tag(1, WIRE_END_GROUP);
        w.uint32(42);
        let buf = w.finish();

        let mut r = Reader::new(&buf);
        r.skip_type(WIRE_START_GROUP).unwrap();
        assert_eq!(r.uint32(), Ok(42));
    }

    #[test]
    fn sub_reader_bounds() {
        let mut r = Reader::new(&[0x02, 0x08, 0x01, 0x42]);
        let len = r.uint32().unwrap() as usize;
        let mut sub = r.sub(len).unwrap();
        assert_eq!(sub.uint32(), Ok(0x08));
        assert_eq!(sub.uint32(), Ok(0x01));
        // The sub-reader is exhausted; the parent continues after it.
        assert!(matches!(sub.uint32(), Err(WireError::OutOfRange { .. })));
        assert_eq!(r.uint32(), Ok(0x42));
        assert!(matches!(
            Reader::new(&[0x01]).sub(2),
            Err(WireError::OutOfRange { .. })
        ));
    }

    #[test]
    fn skip_group_unterminated() {
        let mut r = Reader::new(&[0x08, 0x01]);
        assert!(matches!(
            r.skip_type(WIRE_START_GROUP),
            Err(WireError::OutOfRange { .. })
        ));
    }
}
