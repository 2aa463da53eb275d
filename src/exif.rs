use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use exif::{Context, In, Rational, Reader, Value};

/// Tag names known to the EXIF dictionary keep their name; IDs the
/// dictionary does not know stay numeric instead of being dropped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum TagKey {
    Name(String),
    Raw(u16),
}

impl TagKey {
    pub fn name(s: &str) -> Self {
        TagKey::Name(s.to_string())
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagKey::Name(name) => f.write_str(name),
            TagKey::Raw(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TagValue {
    Text(String),
    Rationals(Vec<Rational>),
    /// The GPS sub-IFD, nested under the `GPSInfo` key.
    Nested(ExifTagMap),
}

pub type ExifTagMap = BTreeMap<TagKey, TagValue>;

// kamadak-exif's Rational carries no PartialEq, so compare by parts.
impl PartialEq for TagValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TagValue::Text(a), TagValue::Text(b)) => a == b,
            (TagValue::Rationals(a), TagValue::Rationals(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.num == y.num && x.denom == y.denom)
            }
            (TagValue::Nested(a), TagValue::Nested(b)) => a == b,
            _ => false,
        }
    }
}

impl TagValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TagValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_rationals(&self) -> Option<&[Rational]> {
        match self {
            TagValue::Rationals(r) => Some(r),
            _ => None,
        }
    }

    pub fn render(&self) -> String {
        match self {
            TagValue::Text(s) => s.clone(),
            TagValue::Rationals(rs) => {
                let parts: Vec<String> = rs
                    .iter()
                    .map(|r| {
                        if r.denom == 1 {
                            r.num.to_string()
                        } else {
                            format!("{}/{}", r.num, r.denom)
                        }
                    })
                    .collect();
                parts.join(", ")
            }
            TagValue::Nested(map) => {
                let obj: serde_json::Map<String, serde_json::Value> = map
                    .iter()
                    .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.render())))
                    .collect();
                serde_json::Value::Object(obj).to_string()
            }
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Convert a degrees/minutes/seconds rational triple to decimal degrees.
///
/// Returns `None` for a short slice or a zero denominator; the caller treats
/// that as "coordinate unavailable", never as a failure.
pub fn dms_to_degrees(dms: &[Rational]) -> Option<f64> {
    if dms.len() < 3 {
        return None;
    }
    if dms[..3].iter().any(|r| r.denom == 0) {
        return None;
    }
    let deg = dms[0].num as f64 / dms[0].denom as f64;
    let min = dms[1].num as f64 / dms[1].denom as f64;
    let sec = dms[2].num as f64 / dms[2].denom as f64;
    Some(deg + min / 60.0 + sec / 3600.0)
}

/// Extract the EXIF block of the image at `path` as a tag-name map, with the
/// GPS sub-IFD nested under `GPSInfo`.
///
/// Any open or parse error is logged and degraded to `None`; an image without
/// EXIF is not an error.
pub fn read_exif_map(path: &Path) -> Option<ExifTagMap> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            log::warn!("Could not open {:?} for EXIF extraction: {}", path, e);
            return None;
        }
    };
    let mut reader = BufReader::new(file);
    match Reader::new().read_from_container(&mut reader) {
        Ok(exif) => Some(tag_map(&exif)),
        Err(e) => {
            log::warn!("No EXIF data extracted from {:?}: {}", path, e);
            None
        }
    }
}

/// Build the tag map from a parsed EXIF block. Only the primary image's
/// fields are considered; thumbnail IFD entries are skipped.
pub fn tag_map(exif: &exif::Exif) -> ExifTagMap {
    let mut map = ExifTagMap::new();
    let mut gps = ExifTagMap::new();

    for field in exif.fields() {
        if field.ifd_num != In::PRIMARY {
            continue;
        }
        let key = field_key(field);
        let value = field_value(field);
        if matches!(field.tag.context(), Context::Gps) {
            gps.insert(key, value);
        } else {
            map.insert(key, value);
        }
    }

    if !gps.is_empty() {
        map.insert(TagKey::name("GPSInfo"), TagValue::Nested(gps));
    }

    map
}

fn field_key(field: &exif::Field) -> TagKey {
    if field.tag.description().is_some() {
        TagKey::Name(field.tag.to_string())
    } else {
        TagKey::Raw(field.tag.number())
    }
}

fn field_value(field: &exif::Field) -> TagValue {
    match &field.value {
        Value::Rational(rs) => TagValue::Rationals(rs.clone()),
        _ => {
            // kamadak-exif wraps ASCII values in quotes when displayed.
            let text = field.display_value().to_string();
            TagValue::Text(text.trim_matches('"').to_string())
        }
    }
}
