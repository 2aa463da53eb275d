//! Shared test fixtures.

/// Raw little-endian TIFF buffer: IFD0 with `Make = "Canon"` and a GPS
/// sub-IFD holding the DMS triples 40°26'46"N, 79°58'56"W.
pub fn canon_exif_buffer() -> Vec<u8> {
    let mut buf = Vec::new();
    let entry = |buf: &mut Vec<u8>, tag: u16, typ: u16, count: u32, value: u32| {
        buf.extend_from_slice(&tag.to_le_bytes());
        buf.extend_from_slice(&typ.to_le_bytes());
        buf.extend_from_slice(&count.to_le_bytes());
        buf.extend_from_slice(&value.to_le_bytes());
    };
    let ascii_entry = |buf: &mut Vec<u8>, tag: u16, count: u32, value: &[u8; 4]| {
        buf.extend_from_slice(&tag.to_le_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&count.to_le_bytes());
        buf.extend_from_slice(value);
    };
    let rationals = |buf: &mut Vec<u8>, triple: [(u32, u32); 3]| {
        for (num, denom) in triple {
            buf.extend_from_slice(&num.to_le_bytes());
            buf.extend_from_slice(&denom.to_le_bytes());
        }
    };

    // Header: II, magic 42, IFD0 at offset 8.
    buf.extend_from_slice(b"II");
    buf.extend_from_slice(&42u16.to_le_bytes());
    buf.extend_from_slice(&8u32.to_le_bytes());

    // IFD0 (offset 8, 30 bytes): Make + GPS IFD pointer.
    let (make_off, gps_off) = (38u32, 44u32);
    buf.extend_from_slice(&2u16.to_le_bytes());
    entry(&mut buf, 0x010f, 2, 6, make_off); // Make, ASCII "Canon\0"
    entry(&mut buf, 0x8825, 4, 1, gps_off); // GPS IFD pointer
    buf.extend_from_slice(&0u32.to_le_bytes());

    // Make value (offset 38).
    buf.extend_from_slice(b"Canon\0");

    // GPS IFD (offset 44, 54 bytes).
    let (lat_off, lon_off) = (98u32, 122u32);
    buf.extend_from_slice(&4u16.to_le_bytes());
    ascii_entry(&mut buf, 0x0001, 2, b"N\0\0\0"); // GPSLatitudeRef
    entry(&mut buf, 0x0002, 5, 3, lat_off); // GPSLatitude
    ascii_entry(&mut buf, 0x0003, 2, b"W\0\0\0"); // GPSLongitudeRef
    entry(&mut buf, 0x0004, 5, 3, lon_off); // GPSLongitude
    buf.extend_from_slice(&0u32.to_le_bytes());

    rationals(&mut buf, [(40, 1), (26, 1), (46, 1)]); // offset 98
    rationals(&mut buf, [(79, 1), (58, 1), (56, 1)]); // offset 122
    buf
}
