//! Concrete buffered-stream scenarios: fixed byte layouts with known
//! expected values, covering endian switching mid-stream and growth
//! tracking on a writable in-memory handle.

use tiffio::source::{MemorySource, Source};
use tiffio::stream::BufferedStream;
use tiffio::util::ByteOrder;

#[test]
fn endian_switch_mid_stream_over_a_fixed_byte_pattern() {
    let bytes = [0x0Fu8, 0x0E, 0x0F, 0x0E, 0x0F, 0x0E, 0x0F, 0x0E];
    let mut s = BufferedStream::new(Source::Memory(MemorySource::from_vec(bytes.to_vec())), ByteOrder::BigEndian);

    s.seek(6);
    assert_eq!(s.read_u16().unwrap(), 3854);

    s.set_byte_order(ByteOrder::LittleEndian);
    s.seek(6);
    assert_eq!(s.read_u16().unwrap(), 3599);

    s.set_byte_order(ByteOrder::BigEndian);
    s.seek(0);
    assert_eq!(s.read_u32().unwrap(), 252_579_598);

    s.set_byte_order(ByteOrder::LittleEndian);
    s.seek(0);
    assert_eq!(s.read_u32().unwrap(), 235_867_663);

    s.set_byte_order(ByteOrder::BigEndian);
    s.seek(0);
    assert_eq!(s.read_u64().unwrap(), 1_084_821_113_299_406_606);
}

#[test]
fn writable_memory_handle_grows_and_reads_back_three_longs() {
    let mut s = BufferedStream::new(Source::Memory(MemorySource::new()), ByteOrder::LittleEndian);

    s.write_u64(1).unwrap();
    assert_eq!(s.len().unwrap(), 8);

    s.write_u64(1_152_921_504_606_846_722).unwrap();
    assert_eq!(s.len().unwrap(), 16);

    s.write_u64(3).unwrap();
    assert_eq!(s.len().unwrap(), 24);

    s.seek(0);
    assert_eq!(s.read_u64().unwrap(), 1);
    assert_eq!(s.read_u64().unwrap(), 1_152_921_504_606_846_722);
    assert_eq!(s.read_u64().unwrap(), 3);
}

#[test]
fn seek_then_read_is_idempotent_without_an_intervening_write() {
    let mut s = BufferedStream::new(
        Source::Memory(MemorySource::from_vec((0u8..=255).collect())),
        ByteOrder::LittleEndian,
    );
    s.seek(10);
    let mut first = [0u8; 16];
    s.read_exact(&mut first).unwrap();

    s.seek(10);
    let mut second = [0u8; 16];
    s.read_exact(&mut second).unwrap();

    assert_eq!(first, second);
}

#[test]
fn round_trips_every_primitive_type_in_both_byte_orders() {
    for order in [ByteOrder::LittleEndian, ByteOrder::BigEndian] {
        let mut s = BufferedStream::new(Source::Memory(MemorySource::new()), order);
        s.write_u8(0xAB).unwrap();
        s.write_u16(0x1234).unwrap();
        s.write_u32(0xDEAD_BEEF).unwrap();
        s.write_u64(0x0123_4567_89AB_CDEF).unwrap();
        s.write_f32(1.5).unwrap();
        s.write_f64(2.25).unwrap();

        s.seek(0);
        assert_eq!(s.read_u8().unwrap(), 0xAB);
        assert_eq!(s.read_u16().unwrap(), 0x1234);
        assert_eq!(s.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(s.read_u64().unwrap(), 0x0123_4567_89AB_CDEF);
        assert_eq!(s.read_f32().unwrap(), 1.5);
        assert_eq!(s.read_f64().unwrap(), 2.25);
    }
}
