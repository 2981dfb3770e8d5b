//! The decode side of the registered codec interface §1 calls out as an
//! external collaborator: concrete compression algorithms are not this
//! crate's concern, but the TIFF parser needs *some* dispatch point to
//! reach them from a `Compression` tag value. This module is that
//! dispatch point, paired with [`crate::encoder::compression`] on the
//! write side.
//!
//! Each variant decodes one compressed fragment (one strip or tile) fully
//! into memory - the plane separator's strip-wise reassembly (§4.7) is a
//! different, higher-level kind of partial decode and is unaffected by how
//! any one fragment gets decompressed here.

use crate::error::{TiffError, TiffFormatError, TiffResult};
use crate::tags::CompressionMethod;
use std::io::Read;

/// Decompress one strip or tile's worth of bytes.
///
/// `expected_len` is the uncompressed size the caller expects (computed
/// from the plane's geometry); it bounds allocation for codecs that don't
/// self-terminate cleanly and lets `Uncompressed` validate its input
/// directly.
pub fn decompress(method: CompressionMethod, data: &[u8], expected_len: usize) -> TiffResult<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::PackBits => Ok(decode_packbits(data, expected_len)),
        #[cfg(feature = "lzw")]
        CompressionMethod::LZW => decode_lzw(data, expected_len),
        #[cfg(feature = "deflate")]
        CompressionMethod::Deflate | CompressionMethod::OldDeflate => decode_deflate(data, expected_len),
        #[cfg(feature = "zstd")]
        CompressionMethod::ZSTD => decode_zstd(data, expected_len),
        other => Err(unsupported(other)),
    }
}

fn unsupported(method: CompressionMethod) -> TiffError {
    TiffFormatError::UnsupportedCompression(method.to_u16()).into()
}

/// PackBits (TIFF 6.0 §9): runs of `-n+1` literal bytes or `1-n` repeats of
/// one byte, terminated at the fragment's raw byte count (no end marker).
fn decode_packbits(data: &[u8], expected_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(expected_len);
    let mut i = 0;
    while i < data.len() && out.len() < expected_len {
        let n = data[i] as i8;
        i += 1;
        if n >= 0 {
            let count = n as usize + 1;
            let end = (i + count).min(data.len());
            out.extend_from_slice(&data[i..end]);
            i = end;
        } else if n != -128 {
            let count = (1 - n as i32) as usize;
            if i < data.len() {
                out.extend(std::iter::repeat(data[i]).take(count));
                i += 1;
            }
        }
        // n == -128 is a no-op per the spec.
    }
    out
}

#[cfg(feature = "lzw")]
fn decode_lzw(data: &[u8], expected_len: usize) -> TiffResult<Vec<u8>> {
    let mut decoder = weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8);
    let result = decoder.decode(data);
    result
        .status
        .map_err(|e| TiffError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e).into()))?;
    let mut bytes = result.value;
    if bytes.len() > expected_len {
        bytes.truncate(expected_len);
    }
    Ok(bytes)
}

#[cfg(feature = "deflate")]
fn decode_deflate(data: &[u8], expected_len: usize) -> TiffResult<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_len);
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(feature = "zstd")]
fn decode_zstd(data: &[u8], expected_len: usize) -> TiffResult<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_len);
    let mut decoder = zstd::stream::Decoder::new(data)?;
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packbits_literal_run() {
        // header 0x02 -> 3 literal bytes follow
        let encoded = [0x02, 1, 2, 3];
        assert_eq!(decode_packbits(&encoded, 3), vec![1, 2, 3]);
    }

    #[test]
    fn packbits_repeat_run() {
        // header -3 (0xFD) -> repeat next byte 4 times
        let encoded = [0xFDu8, 9];
        assert_eq!(decode_packbits(&encoded, 4), vec![9, 9, 9, 9]);
    }

    #[test]
    fn uncompressed_is_identity() {
        let data = vec![1u8, 2, 3, 4];
        let out = decompress(CompressionMethod::None, &data, 4).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn unsupported_method_errors() {
        let err = decompress(CompressionMethod::JPEG, &[], 0).unwrap_err();
        assert!(matches!(err, TiffError::Format(TiffFormatError::UnsupportedCompression(_))));
    }
}
