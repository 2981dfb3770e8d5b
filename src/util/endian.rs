//! Byte order aware integer decoding shared by the stream and parser layers.

/// Byte order of a TIFF file, or of any buffer read through [`crate::stream::BufferedStream`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little endian byte order (`II`).
    LittleEndian,
    /// Big endian byte order (`MM`).
    BigEndian,
}

impl ByteOrder {
    /// Decode an unsigned integer from `bytes`, which may be shorter than any native
    /// integer width (e.g. 3-byte RGB palette offsets found in some ImageJ/MetaMorph
    /// extensions). Bytes beyond `bytes.len()` are treated as zero, placed on the
    /// appropriate end for the byte order in use.
    pub fn read_uint(self, bytes: &[u8]) -> u64 {
        assert!(bytes.len() <= 8, "read_uint supports at most 8 bytes");
        let mut buf = [0u8; 8];
        match self {
            ByteOrder::LittleEndian => buf[..bytes.len()].copy_from_slice(bytes),
            ByteOrder::BigEndian => buf[8 - bytes.len()..].copy_from_slice(bytes),
        }
        match self {
            ByteOrder::LittleEndian => u64::from_le_bytes(buf),
            ByteOrder::BigEndian => u64::from_be_bytes(buf),
        }
    }

    /// Inverse of [`Self::read_uint`]: encode `value` into exactly `len` bytes,
    /// truncating (rather than erroring) if `value` does not fit, mirroring the
    /// permissive style of the explicit-byte-count reader.
    pub fn write_uint(self, value: u64, len: usize) -> Vec<u8> {
        assert!(len <= 8, "write_uint supports at most 8 bytes");
        let full = match self {
            ByteOrder::LittleEndian => value.to_le_bytes(),
            ByteOrder::BigEndian => value.to_be_bytes(),
        };
        match self {
            ByteOrder::LittleEndian => full[..len].to_vec(),
            ByteOrder::BigEndian => full[8 - len..].to_vec(),
        }
    }

    pub fn read_u16(self, bytes: [u8; 2]) -> u16 {
        match self {
            ByteOrder::LittleEndian => u16::from_le_bytes(bytes),
            ByteOrder::BigEndian => u16::from_be_bytes(bytes),
        }
    }

    pub fn read_u32(self, bytes: [u8; 4]) -> u32 {
        match self {
            ByteOrder::LittleEndian => u32::from_le_bytes(bytes),
            ByteOrder::BigEndian => u32::from_be_bytes(bytes),
        }
    }

    pub fn read_u64(self, bytes: [u8; 8]) -> u64 {
        match self {
            ByteOrder::LittleEndian => u64::from_le_bytes(bytes),
            ByteOrder::BigEndian => u64::from_be_bytes(bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_byte_little_endian() {
        assert_eq!(ByteOrder::LittleEndian.read_uint(&[0x01, 0x02, 0x03]), 0x030201);
    }

    #[test]
    fn three_byte_big_endian() {
        assert_eq!(ByteOrder::BigEndian.read_uint(&[0x01, 0x02, 0x03]), 0x010203);
    }

    #[test]
    fn round_trip_three_bytes() {
        for order in [ByteOrder::LittleEndian, ByteOrder::BigEndian] {
            let encoded = order.write_uint(0x0a0b0c, 3);
            assert_eq!(order.read_uint(&encoded), 0x0a0b0c);
        }
    }
}
