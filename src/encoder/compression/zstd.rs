use crate::encoder::compression::*;

/// The libtiff-self-assigned ZSTD compression method (tag value `0xC350`,
/// see [`CompressionMethod::ZSTD`]). Not part of Adobe TIFF 6.0, but widely
/// enough deployed that decoding it is worth the already-present `zstd`
/// dependency.
#[derive(Debug, Clone, Copy)]
pub struct Zstd {
    level: i32,
}

impl Zstd {
    pub fn with_level(level: i32) -> Self {
        Zstd { level }
    }
}

impl Default for Zstd {
    fn default() -> Self {
        Zstd::with_level(0)
    }
}

impl Compression for Zstd {
    const COMPRESSION_METHOD: CompressionMethod = CompressionMethod::ZSTD;

    fn get_algorithm(&self) -> Compressor {
        Compressor::Zstd(*self)
    }
}

/// Forwards writes to `inner` while counting the bytes that actually pass
/// through, since `zstd::stream::Encoder::finish` hands the writer back
/// rather than reporting a byte count the way `flate2::ZlibEncoder::total_out`
/// does.
struct CountingWriter<'a, W> {
    inner: &'a mut W,
    count: u64,
}

impl<'a, W: Write> Write for CountingWriter<'a, W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, io::Error> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> Result<(), io::Error> {
        self.inner.flush()
    }
}

impl CompressionAlgorithm for Zstd {
    fn write_to<W: Write>(&mut self, writer: &mut W, bytes: &[u8]) -> Result<u64, io::Error> {
        let mut counting = CountingWriter { inner: writer, count: 0 };
        let mut encoder = zstd::stream::Encoder::new(&mut counting, self.level)?;
        encoder.write_all(bytes)?;
        encoder.finish()?;
        Ok(counting.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::compression::tests::TEST_DATA;
    use std::io::Cursor;

    #[test]
    fn round_trips_through_the_decoder() {
        let mut compressed = Vec::<u8>::new();
        {
            let mut writer = Cursor::new(&mut compressed);
            Zstd::default().write_to(&mut writer, TEST_DATA).unwrap();
        }
        let decoded = zstd::stream::decode_all(Cursor::new(&compressed)).unwrap();
        assert_eq!(decoded, TEST_DATA);
    }

    #[test]
    fn reports_the_actual_compressed_length_not_the_input_length() {
        let mut compressed = Vec::<u8>::new();
        let reported = {
            let mut writer = Cursor::new(&mut compressed);
            Zstd::default().write_to(&mut writer, TEST_DATA).unwrap()
        };
        assert_eq!(reported, compressed.len() as u64);
        assert_ne!(reported, TEST_DATA.len() as u64);
    }
}
