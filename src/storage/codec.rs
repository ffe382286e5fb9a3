//! Embedding blob codec.
//!
//! Layout: little-endian `u32` component count, then each component's
//! IEEE-754 bits as little-endian `f32`. Bits are copied verbatim, so a
//! round trip is exact (NaN payloads and `-0.0` included).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

const LEN_PREFIX: usize = 4;

/// Encode a vector as a length-prefixed byte blob.
///
/// # Errors
///
/// Returns an error if the vector has more than `u32::MAX` components.
pub fn encode_embedding(vector: &[f32]) -> Result<Vec<u8>> {
    let len = u32::try_from(vector.len())
        .map_err(|_| Error::InvalidArgument(format!("embedding too long: {}", vector.len())))?;

    let mut blob = Vec::with_capacity(LEN_PREFIX + vector.len() * 4);
    blob.write_u32::<LittleEndian>(len)?;
    for &component in vector {
        blob.write_f32::<LittleEndian>(component)?;
    }
    Ok(blob)
}

/// Decode a blob produced by [`encode_embedding`].
///
/// # Errors
///
/// Returns an error if the blob is shorter than its prefix or its length
/// disagrees with the declared component count.
pub fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    let mut reader = blob;
    let declared = reader
        .read_u32::<LittleEndian>()
        .map_err(|_| Error::Other("embedding blob shorter than its length prefix".into()))?
        as usize;

    if reader.len() != declared * 4 {
        return Err(Error::Other(format!(
            "embedding blob declares {declared} components but holds {} bytes",
            reader.len()
        )));
    }

    let mut vector = Vec::with_capacity(declared);
    for _ in 0..declared {
        vector.push(reader.read_f32::<LittleEndian>()?);
    }
    Ok(vector)
}
