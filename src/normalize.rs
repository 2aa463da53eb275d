use crate::exif::{dms_to_degrees, ExifTagMap, TagKey, TagValue};

const GPS_INFO: &str = "GPSInfo";
const DEFAULT: &str = "N/A";

/// Augment an extracted tag map with the curated, defaulted keys.
///
/// Total over its input: `None` (no EXIF block at all) still produces a map
/// holding the defaulted camera/exposure keys. Coordinates are attached only
/// as a pair; a map that cannot yield both latitude and longitude gets
/// neither. Derived keys are recomputed from their source tags on every call,
/// so running this on its own output changes nothing.
pub fn normalize(exif: Option<ExifTagMap>) -> ExifTagMap {
    let mut map = exif.unwrap_or_default();

    // Re-derive coordinates from the GPS block; stale or unpaired keys from
    // the input must not survive.
    map.remove(&TagKey::name("latitude"));
    map.remove(&TagKey::name("longitude"));
    if let Some((lat, lon)) = lat_lon(&map) {
        map.insert(TagKey::name("latitude"), TagValue::Text(lat.to_string()));
        map.insert(TagKey::name("longitude"), TagValue::Text(lon.to_string()));
    } else {
        log::debug!("No usable GPS coordinate pair in EXIF metadata");
    }

    copy_or_default(&mut map, "camera_make", &["Make"]);
    copy_or_default(&mut map, "camera_model", &["Model"]);
    copy_or_default(&mut map, "exposure_time", &["ExposureTime"]);
    copy_or_default(&mut map, "f_number", &["FNumber"]);
    // kamadak-exif names tag 0x8827 PhotographicSensitivity; older dictionaries
    // call it ISOSpeedRatings.
    copy_or_default(&mut map, "iso", &["ISOSpeedRatings", "PhotographicSensitivity"]);
    copy_or_default(&mut map, "date_time", &["DateTimeOriginal"]);

    map
}

/// The signed decimal coordinate pair, or `None` unless both coordinates and
/// both hemisphere references are present and convertible.
pub fn lat_lon(map: &ExifTagMap) -> Option<(f64, f64)> {
    let gps = match map.get(&TagKey::name(GPS_INFO)) {
        Some(TagValue::Nested(gps)) => gps,
        _ => return None,
    };

    let lat = gps
        .get(&TagKey::name("GPSLatitude"))
        .and_then(TagValue::as_rationals)
        .and_then(dms_to_degrees)?;
    let lon = gps
        .get(&TagKey::name("GPSLongitude"))
        .and_then(TagValue::as_rationals)
        .and_then(dms_to_degrees)?;
    let lat_ref = gps
        .get(&TagKey::name("GPSLatitudeRef"))
        .and_then(TagValue::as_text)?;
    let lon_ref = gps
        .get(&TagKey::name("GPSLongitudeRef"))
        .and_then(TagValue::as_text)?;

    // Anything other than N/E flips the sign, matching the EXIF convention
    // that South and West are negative.
    let lat = if lat_ref != "N" { -lat } else { lat };
    let lon = if lon_ref != "E" { -lon } else { lon };

    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        log::warn!("Discarding out-of-range GPS pair ({}, {})", lat, lon);
        return None;
    }
    Some((lat, lon))
}

/// Flatten a tag map into `(key, value)` string pairs for the metadata rows.
pub fn to_rows(map: &ExifTagMap) -> Vec<(String, String)> {
    map.iter()
        .map(|(k, v)| (k.to_string(), v.render()))
        .collect()
}

fn copy_or_default(map: &mut ExifTagMap, derived: &str, sources: &[&str]) {
    let value = sources
        .iter()
        .find_map(|s| map.get(&TagKey::name(s)).map(TagValue::render));
    map.insert(
        TagKey::name(derived),
        TagValue::Text(value.unwrap_or_else(|| DEFAULT.to_string())),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exif::tag_map;
    use exif::Rational;

    fn rational(num: u32, denom: u32) -> Rational {
        Rational { num, denom }
    }

    fn dms(d: u32, m: u32, s: u32) -> TagValue {
        TagValue::Rationals(vec![rational(d, 1), rational(m, 1), rational(s, 1)])
    }

    fn gps_block(lat: TagValue, lat_ref: &str, lon: TagValue, lon_ref: &str) -> TagValue {
        let mut gps = ExifTagMap::new();
        gps.insert(TagKey::name("GPSLatitude"), lat);
        gps.insert(TagKey::name("GPSLatitudeRef"), TagValue::Text(lat_ref.into()));
        gps.insert(TagKey::name("GPSLongitude"), lon);
        gps.insert(TagKey::name("GPSLongitudeRef"), TagValue::Text(lon_ref.into()));
        TagValue::Nested(gps)
    }

    fn text_of<'a>(map: &'a ExifTagMap, key: &str) -> Option<&'a str> {
        map.get(&TagKey::name(key)).and_then(TagValue::as_text)
    }

    fn float_of(map: &ExifTagMap, key: &str) -> Option<f64> {
        text_of(map, key).and_then(|s| s.parse().ok())
    }

    #[test]
    fn no_exif_yields_defaulted_map() {
        let map = normalize(None);
        for key in ["camera_make", "camera_model", "exposure_time", "f_number", "iso", "date_time"] {
            assert_eq!(text_of(&map, key), Some("N/A"), "missing default for {key}");
        }
        assert!(text_of(&map, "latitude").is_none());
        assert!(text_of(&map, "longitude").is_none());
    }

    #[test]
    fn no_gps_block_yields_no_coordinates() {
        let mut input = ExifTagMap::new();
        input.insert(TagKey::name("Make"), TagValue::Text("Canon".into()));
        let map = normalize(Some(input));
        assert!(text_of(&map, "latitude").is_none());
        assert!(text_of(&map, "longitude").is_none());
        assert_eq!(text_of(&map, "camera_make"), Some("Canon"));
        assert_eq!(text_of(&map, "camera_model"), Some("N/A"));
    }

    #[test]
    fn north_east_unchanged_south_negated() {
        let mut input = ExifTagMap::new();
        input.insert(
            TagKey::name(GPS_INFO),
            gps_block(dms(40, 26, 46), "N", dms(79, 58, 56), "E"),
        );
        let map = normalize(Some(input));
        let lat = float_of(&map, "latitude").unwrap();
        let lon = float_of(&map, "longitude").unwrap();
        assert!((lat - 40.446111).abs() < 1e-4);
        assert!((lon - 79.982222).abs() < 1e-4);

        let mut input = ExifTagMap::new();
        input.insert(
            TagKey::name(GPS_INFO),
            gps_block(dms(40, 26, 46), "S", dms(79, 58, 56), "E"),
        );
        let map = normalize(Some(input));
        assert!((float_of(&map, "latitude").unwrap() + 40.446111).abs() < 1e-4);
    }

    #[test]
    fn west_longitude_is_negative() {
        let mut input = ExifTagMap::new();
        input.insert(
            TagKey::name(GPS_INFO),
            gps_block(dms(40, 26, 46), "N", dms(79, 58, 56), "W"),
        );
        let map = normalize(Some(input));
        assert!((float_of(&map, "longitude").unwrap() + 79.982222).abs() < 1e-4);
    }

    #[test]
    fn coordinates_only_attach_as_a_pair() {
        // Longitude missing entirely.
        let mut gps = ExifTagMap::new();
        gps.insert(TagKey::name("GPSLatitude"), dms(40, 26, 46));
        gps.insert(TagKey::name("GPSLatitudeRef"), TagValue::Text("N".into()));
        let mut input = ExifTagMap::new();
        input.insert(TagKey::name(GPS_INFO), TagValue::Nested(gps));
        let map = normalize(Some(input));
        assert!(text_of(&map, "latitude").is_none());
        assert!(text_of(&map, "longitude").is_none());

        // Reference tags missing.
        let mut gps = ExifTagMap::new();
        gps.insert(TagKey::name("GPSLatitude"), dms(40, 26, 46));
        gps.insert(TagKey::name("GPSLongitude"), dms(79, 58, 56));
        let mut input = ExifTagMap::new();
        input.insert(TagKey::name(GPS_INFO), TagValue::Nested(gps));
        let map = normalize(Some(input));
        assert!(text_of(&map, "latitude").is_none());
        assert!(text_of(&map, "longitude").is_none());

        // Zero denominator poisons one coordinate; neither may survive.
        let bad = TagValue::Rationals(vec![rational(1, 0), rational(0, 1), rational(0, 1)]);
        let mut input = ExifTagMap::new();
        input.insert(
            TagKey::name(GPS_INFO),
            gps_block(bad, "N", dms(79, 58, 56), "E"),
        );
        let map = normalize(Some(input));
        assert!(text_of(&map, "latitude").is_none());
        assert!(text_of(&map, "longitude").is_none());
    }

    #[test]
    fn out_of_range_pair_is_discarded() {
        let mut input = ExifTagMap::new();
        input.insert(
            TagKey::name(GPS_INFO),
            gps_block(dms(200, 0, 0), "N", dms(79, 58, 56), "E"),
        );
        let map = normalize(Some(input));
        assert!(text_of(&map, "latitude").is_none());
        assert!(text_of(&map, "longitude").is_none());
    }

    #[test]
    fn pairing_invariant_holds_for_generated_maps() {
        // xorshift keeps the sweep deterministic without pulling in an rng crate
        let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        for round in 0..512 {
            let roll = next();
            let mut gps = ExifTagMap::new();
            if roll & 1 != 0 {
                let denom = if roll & 2 != 0 { 1 } else { 0 };
                let len = (next() % 4) as usize;
                let mut parts = vec![
                    rational((next() % 300) as u32, denom),
                    rational((next() % 60) as u32, 1),
                    rational((next() % 60) as u32, 1),
                ];
                parts.truncate(len);
                gps.insert(TagKey::name("GPSLatitude"), TagValue::Rationals(parts));
            }
            if roll & 4 != 0 {
                let hemi = if roll & 8 != 0 { "N" } else { "S" };
                gps.insert(TagKey::name("GPSLatitudeRef"), TagValue::Text(hemi.into()));
            }
            if roll & 16 != 0 {
                gps.insert(
                    TagKey::name("GPSLongitude"),
                    TagValue::Rationals(vec![
                        rational((next() % 300) as u32, 1),
                        rational((next() % 60) as u32, 1),
                        rational((next() % 60) as u32, 1),
                    ]),
                );
            }
            if roll & 32 != 0 {
                let hemi = if roll & 64 != 0 { "E" } else { "W" };
                gps.insert(TagKey::name("GPSLongitudeRef"), TagValue::Text(hemi.into()));
            }

            let mut input = ExifTagMap::new();
            if roll & 128 != 0 {
                input.insert(TagKey::name(GPS_INFO), TagValue::Nested(gps));
            }
            if roll & 256 != 0 {
                input.insert(TagKey::name("latitude"), TagValue::Text("99.9".into()));
            }
            if roll & 512 != 0 {
                input.insert(TagKey::name("longitude"), TagValue::Text("-1.0".into()));
            }
            if roll & 1024 != 0 {
                input.insert(TagKey::name("Make"), TagValue::Text("Canon".into()));
            }

            let map = normalize(Some(input));
            let lat = float_of(&map, "latitude");
            let lon = float_of(&map, "longitude");
            assert_eq!(
                lat.is_some(),
                lon.is_some(),
                "coordinates must attach as a pair (round {round})"
            );
            if let (Some(lat), Some(lon)) = (lat, lon) {
                assert!((-90.0..=90.0).contains(&lat), "round {round}: lat {lat}");
                assert!((-180.0..=180.0).contains(&lon), "round {round}: lon {lon}");
            }
            assert_eq!(map, normalize(Some(map.clone())), "round {round}");
        }
    }

    #[test]
    fn stray_unpaired_coordinate_keys_are_dropped() {
        let mut input = ExifTagMap::new();
        input.insert(TagKey::name("latitude"), TagValue::Text("12.5".into()));
        let map = normalize(Some(input));
        assert!(text_of(&map, "latitude").is_none());
        assert!(text_of(&map, "longitude").is_none());
    }

    #[test]
    fn normalization_is_idempotent() {
        let mut input = ExifTagMap::new();
        input.insert(TagKey::name("Make"), TagValue::Text("Canon".into()));
        input.insert(
            TagKey::name(GPS_INFO),
            gps_block(dms(40, 26, 46), "N", dms(79, 58, 56), "W"),
        );
        let once = normalize(Some(input));
        let twice = normalize(Some(once.clone()));
        assert_eq!(once, twice);

        let empty_once = normalize(None);
        assert_eq!(empty_once.clone(), normalize(Some(empty_once)));
    }

    #[test]
    fn rows_cover_every_entry() {
        let mut input = ExifTagMap::new();
        input.insert(TagKey::name("Make"), TagValue::Text("Canon".into()));
        input.insert(TagKey::Raw(59932), TagValue::Text("padding".into()));
        let map = normalize(Some(input));
        let rows = to_rows(&map);
        assert_eq!(rows.len(), map.len());
        assert!(rows.iter().any(|(k, v)| k == "Make" && v == "Canon"));
        assert!(rows.iter().any(|(k, v)| k == "59932" && v == "padding"));
        assert!(rows.iter().any(|(k, v)| k == "camera_model" && v == "N/A"));
    }

    #[test]
    fn end_to_end_extract_then_normalize() {
        let exif = exif::Reader::new()
            .read_raw(crate::testutil::canon_exif_buffer())
            .expect("raw EXIF buffer parses");
        let map = normalize(Some(tag_map(&exif)));

        assert!((float_of(&map, "latitude").unwrap() - 40.446111).abs() < 1e-3);
        assert!((float_of(&map, "longitude").unwrap() + 79.982222).abs() < 1e-3);
        assert_eq!(text_of(&map, "camera_make"), Some("Canon"));
        assert_eq!(text_of(&map, "camera_model"), Some("N/A"));

        let (lat, lon) = lat_lon(&map).unwrap();
        assert!((-90.0..=90.0).contains(&lat));
        assert!((-180.0..=180.0).contains(&lon));
    }
}
