use crate::crypto::Address;
use std::io::{self, Read, Write};

/// Upper bound on any length prefix we are willing to decode.
const MAX_DECODE_LEN: u32 = 1 << 20;

/// Trait for objects that have a canonical binary representation for Hashing/Signing.
/// careful: This must be deterministic across platforms/versions.
pub trait CanonicalSerialize {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // Writes into a Vec cannot fail
        let _ = self.canonical_serialize(&mut buf);
        buf
    }
}

/// Inverse of [`CanonicalSerialize`] for the types that travel on the wire.
pub trait CanonicalDeserialize: Sized {
    fn canonical_deserialize<R: Read>(reader: &mut R) -> io::Result<Self>;

    /// Decode a complete buffer; trailing bytes are an error.
    fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        let mut cursor = bytes;
        let value = Self::canonical_deserialize(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} trailing bytes", cursor.len()),
            ));
        }
        Ok(value)
    }
}

/// Write a u32 LE length prefix, refusing lengths that do not fit.
fn write_len_prefix<W: Write>(writer: &mut W, len: usize) -> io::Result<()> {
    let len = u32::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("length {} does not fit a u32 prefix", len),
        )
    })?;
    writer.write_all(&len.to_le_bytes())
}

// --- Primitives ---

impl CanonicalSerialize for u8 {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&[*self])
    }
}

impl CanonicalSerialize for u32 {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.to_le_bytes())
    }
}

impl CanonicalSerialize for u64 {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.to_le_bytes())
    }
}

impl CanonicalSerialize for String {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.as_str().canonical_serialize(writer)
    }
}

impl CanonicalSerialize for &str {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let bytes = self.as_bytes();
        write_len_prefix(writer, bytes.len())?;
        writer.write_all(bytes)
    }
}

impl CanonicalSerialize for bool {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&[if *self { 1u8 } else { 0u8 }])
    }
}

/// Fixed-size arrays are written raw, without a length prefix.
impl<const N: usize> CanonicalSerialize for [u8; N] {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(self)
    }
}

impl CanonicalSerialize for Address {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(self.as_bytes())
    }
}

impl<T: CanonicalSerialize> CanonicalSerialize for Vec<T> {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_len_prefix(writer, self.len())?;
        for item in self {
            item.canonical_serialize(writer)?;
        }
        Ok(())
    }
}

// --- Decoding ---

impl CanonicalDeserialize for u32 {
    fn canonical_deserialize<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }
}

impl CanonicalDeserialize for u64 {
    fn canonical_deserialize<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

impl<const N: usize> CanonicalDeserialize for [u8; N] {
    fn canonical_deserialize<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; N];
        reader.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl CanonicalDeserialize for Address {
    fn canonical_deserialize<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Address(<[u8; 32]>::canonical_deserialize(reader)?))
    }
}

impl CanonicalDeserialize for Vec<u8> {
    fn canonical_deserialize<R: Read>(reader: &mut R) -> io::Result<Self> {
        let len = u32::canonical_deserialize(reader)?;
        if len > MAX_DECODE_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("length prefix {} exceeds limit", len),
            ));
        }
        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_little_endian_and_prefixed() {
        assert_eq!(1u64.to_bytes(), vec![1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!("ab".to_bytes(), vec![2, 0, 0, 0, b'a', b'b']);
        assert_eq!(vec![9u8, 8].to_bytes(), vec![2, 0, 0, 0, 9, 8]);
        assert_eq!([1u8, 2, 3].to_bytes(), vec![1, 2, 3]);
    }

    #[test]
    fn test_decode_rejects_truncation_and_trailing() {
        assert!(u64::from_bytes(&[1, 2, 3]).is_err());
        assert!(u32::from_bytes(&[1, 0, 0, 0, 0]).is_err());
        assert!(Vec::<u8>::from_bytes(&[5, 0, 0, 0, 1]).is_err());
        assert_eq!(Vec::<u8>::from_bytes(&[1, 0, 0, 0, 7]).unwrap(), vec![7]);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_length_prefix_overflow_is_an_error() {
        let mut buf = Vec::new();
        let err = write_len_prefix(&mut buf, u32::MAX as usize + 1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(buf.is_empty());

        write_len_prefix(&mut buf, u32::MAX as usize).unwrap();
        assert_eq!(buf, u32::MAX.to_le_bytes());
    }

    #[test]
    fn test_oversized_prefix_rejected() {
        let bytes = u32::MAX.to_le_bytes();
        assert!(Vec::<u8>::from_bytes(&bytes).is_err());
    }
}
