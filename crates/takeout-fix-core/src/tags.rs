//! EXIF capability: read the handful of tags repair cares about, and write
//! updated ones without disturbing anything else in the file.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use exif::{In, Reader, Tag, Value};
use little_exif::exif_tag::ExifTag;
use little_exif::metadata::Metadata;
use little_exif::rational::uR64;

use crate::formats::MediaCategory;
use crate::metadata::{GeoPoint, ResolvedMetadata};

/// Tags already present in a file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExistingTags {
    pub date_time_original: Option<String>,
    pub date_time_digitized: Option<String>,
    pub date_time: Option<String>,
    /// Decimal (latitude, longitude)
    pub gps: Option<(f64, f64)>,
    pub description: Option<String>,
}

impl ExistingTags {
    /// GPS present and not the (0, 0) placeholder.
    pub fn has_real_gps(&self) -> bool {
        matches!(self.gps, Some((lat, lng)) if !(lat == 0.0 && lng == 0.0))
    }
}

/// Tags to write. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagUpdate {
    pub date_time_original: Option<String>,
    pub date_time_digitized: Option<String>,
    pub date_time: Option<String>,
    pub gps: Option<GeoPoint>,
    pub description: Option<String>,
}

impl TagUpdate {
    pub fn is_empty(&self) -> bool {
        self.date_time_original.is_none()
            && self.date_time_digitized.is_none()
            && self.date_time.is_none()
            && self.gps.is_none()
            && self.description.is_none()
    }

    pub fn writes_dates(&self) -> bool {
        self.date_time_original.is_some()
            || self.date_time_digitized.is_some()
            || self.date_time.is_some()
    }
}

/// Read/write access to a file's EXIF block.
pub trait TagEditor: Send + Sync {
    /// Whether tags can be written to files with this (lowercase) extension.
    fn supports(&self, extension: &str) -> bool;

    /// Existing tags. Files without readable EXIF yield empty tags.
    fn read(&self, path: &Path) -> ExistingTags;

    /// Write `update`, keeping every other tag intact.
    fn write(&self, path: &Path, update: &TagUpdate) -> Result<(), String>;
}

/// Decide which tags to write. Existing dates and real locations are never overwritten.
pub fn plan_update(
    existing: &ExistingTags,
    meta: &ResolvedMetadata,
    category: MediaCategory,
) -> TagUpdate {
    let mut update = TagUpdate::default();

    if existing.date_time_original.is_none() {
        if let Some(stamp) = meta.photo_taken.and_then(exif_datetime) {
            update.date_time_original = Some(stamp.clone());
            if existing.date_time_digitized.is_none() {
                update.date_time_digitized = Some(stamp.clone());
            }
            if existing.date_time.is_none() {
                update.date_time = Some(stamp);
            }
        }
    }

    if category == MediaCategory::Image {
        if !existing.has_real_gps() {
            update.gps = meta.gps.filter(GeoPoint::is_real);
        }
        if existing.description.is_none() {
            update.description = meta.description.clone();
        }
    }

    update
}

/// Epoch seconds -> `YYYY:MM:DD HH:MM:SS` in local time (EXIF dates carry no zone).
pub fn exif_datetime(epoch: i64) -> Option<String> {
    let utc = chrono::DateTime::from_timestamp(epoch, 0)?;
    Some(utc.with_timezone(&chrono::Local).format("%Y:%m:%d %H:%M:%S").to_string())
}

/// Formats little_exif can rewrite in place.
const WRITABLE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff", "webp", "heic", "heif"];

/// kamadak-exif for reading, little_exif for writing.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExifTagEditor;

impl TagEditor for ExifTagEditor {
    fn supports(&self, extension: &str) -> bool {
        WRITABLE_EXTENSIONS.contains(&extension)
    }

    fn read(&self, path: &Path) -> ExistingTags {
        let Ok(file) = File::open(path) else {
            return ExistingTags::default();
        };
        let Ok(data) = Reader::new().read_from_container(&mut BufReader::new(file)) else {
            return ExistingTags::default();
        };

        let date = |tag: Tag| {
            data.get_field(tag, In::PRIMARY)
                .and_then(ascii_value)
                .filter(|s| is_real_date(s))
        };

        let coordinate = |value_tag: Tag, ref_tag: Tag, negative: &str| -> Option<f64> {
            let field = data.get_field(value_tag, In::PRIMARY)?;
            let Value::Rational(parts) = &field.value else {
                return None;
            };
            let decimal = dms_to_decimal(&parts.iter().map(|r| r.to_f64()).collect::<Vec<_>>())?;
            let reference = data.get_field(ref_tag, In::PRIMARY).and_then(ascii_value);
            Some(if reference.as_deref() == Some(negative) { -decimal } else { decimal })
        };
        let gps = coordinate(Tag::GPSLatitude, Tag::GPSLatitudeRef, "S")
            .zip(coordinate(Tag::GPSLongitude, Tag::GPSLongitudeRef, "W"));

        let description = data
            .get_field(Tag::ImageDescription, In::PRIMARY)
            .and_then(ascii_value)
            .or_else(|| data.get_field(Tag::UserComment, In::PRIMARY).and_then(user_comment));

        ExistingTags {
            date_time_original: date(Tag::DateTimeOriginal),
            date_time_digitized: date(Tag::DateTimeDigitized),
            date_time: date(Tag::DateTime),
            gps,
            description,
        }
    }

    fn write(&self, path: &Path, update: &TagUpdate) -> Result<(), String> {
        if update.is_empty() {
            return Ok(());
        }

        let mut metadata = match Metadata::new_from_path(path) {
            Ok(m) => m,
            // Nothing to preserve when the file has no EXIF block at all
            Err(_) if !has_exif_block(path) => Metadata::new(),
            Err(e) => return Err(format!("cannot load existing EXIF: {}", e)),
        };

        if let Some(v) = &update.date_time_original {
            metadata.set_tag(ExifTag::DateTimeOriginal(v.clone()));
        }
        if let Some(v) = &update.date_time_digitized {
            metadata.set_tag(ExifTag::CreateDate(v.clone()));
        }
        if let Some(v) = &update.date_time {
            metadata.set_tag(ExifTag::ModifyDate(v.clone()));
        }
        if let Some(text) = &update.description {
            metadata.set_tag(ExifTag::ImageDescription(text.clone()));
        }
        if let Some(gps) = update.gps {
            let lat_ref = if gps.latitude < 0.0 { "S" } else { "N" };
            let lng_ref = if gps.longitude < 0.0 { "W" } else { "E" };
            metadata.set_tag(ExifTag::GPSLatitudeRef(lat_ref.to_string()));
            metadata.set_tag(ExifTag::GPSLatitude(to_ur64(decimal_to_dms(gps.latitude))));
            metadata.set_tag(ExifTag::GPSLongitudeRef(lng_ref.to_string()));
            metadata.set_tag(ExifTag::GPSLongitude(to_ur64(decimal_to_dms(gps.longitude))));
            if let Some(alt) = gps.altitude {
                metadata.set_tag(ExifTag::GPSAltitudeRef(vec![u8::from(alt < 0.0)]));
                metadata.set_tag(ExifTag::GPSAltitude(vec![uR64 {
                    nominator: (alt.abs() * 100.0).round() as u32,
                    denominator: 100,
                }]));
            }
        }

        // little_exif can panic on unusual container layouts
        let written =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| metadata.write_to_file(path)));
        match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("tag writer panicked on this file layout".to_string()),
        }
    }
}

fn has_exif_block(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    Reader::new().read_from_container(&mut BufReader::new(file)).is_ok()
}

fn ascii_value(field: &exif::Field) -> Option<String> {
    let Value::Ascii(parts) = &field.value else {
        return None;
    };
    let s = parts
        .iter()
        .map(|v| String::from_utf8_lossy(v).trim_matches(char::from(0)).trim().to_string())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!s.is_empty()).then_some(s)
}

/// UserComment carries an 8-byte character-code prefix before the text.
fn user_comment(field: &exif::Field) -> Option<String> {
    let Value::Undefined(bytes, _) = &field.value else {
        return None;
    };
    let text = bytes.get(8..)?;
    let s = String::from_utf8_lossy(text).trim_matches(char::from(0)).trim().to_string();
    (!s.is_empty()).then_some(s)
}

/// Blank (`    :  :     :  :  `) and zeroed dates count as absent.
fn is_real_date(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_digit() && c != '0')
}

fn dms_to_decimal(parts: &[f64]) -> Option<f64> {
    let [deg, min, sec] = parts.get(..3)? else {
        return None;
    };
    let value = deg + min / 60.0 + sec / 3600.0;
    value.is_finite().then_some(value)
}

/// Decimal degrees -> (degrees, minutes, seconds) rationals as (numerator, denominator).
pub fn decimal_to_dms(value: f64) -> [(u32, u32); 3] {
    let abs = value.abs();
    let mut degrees = abs.trunc();
    let minutes_full = (abs - degrees) * 60.0;
    let mut minutes = minutes_full.trunc();
    let mut centi_millis = ((minutes_full - minutes) * 60.0 * 10_000.0).round();
    if centi_millis >= 600_000.0 {
        centi_millis -= 600_000.0;
        minutes += 1.0;
    }
    if minutes >= 60.0 {
        minutes -= 60.0;
        degrees += 1.0;
    }
    [
        (degrees as u32, 1),
        (minutes as u32, 1),
        (centi_millis as u32, 10_000),
    ]
}

fn to_ur64(dms: [(u32, u32); 3]) -> Vec<uR64> {
    dms.iter()
        .map(|&(nominator, denominator)| uR64 { nominator, denominator })
        .collect()
}
