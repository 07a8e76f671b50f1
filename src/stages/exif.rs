//! EXIF extraction: metadata header only, no pixel decode.

use chrono::NaiveDateTime;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::db::ExifData;
use crate::error::StageError;

use super::{StageCtx, StageOutcome};

pub fn run(ctx: &StageCtx, file_id: &str) -> Result<StageOutcome, StageError> {
    let (_, abs_path) = ctx.locate(file_id)?;

    let mut data = extract(&abs_path);

    // Dimensions come from the image header, not a full decode.
    if let Ok(reader) = image::ImageReader::open(&abs_path) {
        if let Ok((width, height)) = reader.into_dimensions() {
            data.width = Some(width as i64);
            data.height = Some(height as i64);
        }
    }

    ctx.catalog.write_exif(file_id, &data)?;
    Ok(StageOutcome::Done)
}

/// Read whatever EXIF the file carries. Files with no EXIF at all produce
/// an empty record, which is still a successful extraction.
pub fn extract(path: &Path) -> ExifData {
    let mut data = ExifData::default();

    let Ok(file) = File::open(path) else {
        return data;
    };
    let mut reader = BufReader::new(file);
    let Ok(exif) = exif::Reader::new().read_from_container(&mut reader) else {
        return data;
    };

    let string_field = |tag: exif::Tag| {
        exif.get_field(tag, exif::In::PRIMARY)
            .map(|f| f.display_value().to_string().trim_matches('"').to_string())
            .filter(|s| !s.is_empty())
    };
    let rational_field = |tag: exif::Tag| {
        exif.get_field(tag, exif::In::PRIMARY).and_then(|f| {
            if let exif::Value::Rational(ref v) = f.value {
                v.first().map(|r| r.num as f64 / r.denom.max(1) as f64)
            } else {
                None
            }
        })
    };

    data.camera_make = string_field(exif::Tag::Make);
    data.camera_model = string_field(exif::Tag::Model);
    data.lens_model = string_field(exif::Tag::LensModel);
    data.focal_length = rational_field(exif::Tag::FocalLength);
    data.aperture = rational_field(exif::Tag::FNumber);
    data.shutter_speed = exif
        .get_field(exif::Tag::ExposureTime, exif::In::PRIMARY)
        .map(|f| f.display_value().to_string());

    if let Some(field) = exif.get_field(exif::Tag::PhotographicSensitivity, exif::In::PRIMARY) {
        if let exif::Value::Short(ref v) = field.value {
            data.iso = v.first().map(|&iso| iso as i64);
        }
    }
    if let Some(field) = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY) {
        if let exif::Value::Short(ref v) = field.value {
            data.orientation = v.first().map(|&o| o as i64);
        }
    }

    for tag in [
        exif::Tag::DateTimeOriginal,
        exif::Tag::DateTimeDigitized,
        exif::Tag::DateTime,
    ] {
        if let Some(value) = string_field(tag).and_then(|s| parse_exif_datetime(&s)) {
            data.taken_at = Some(value);
            break;
        }
    }

    let gps_coord = |value_tag: exif::Tag, ref_tag: exif::Tag, negative: &str| {
        let field = exif.get_field(value_tag, exif::In::PRIMARY)?;
        let exif::Value::Rational(ref dms) = field.value else {
            return None;
        };
        if dms.len() < 3 {
            return None;
        }
        let decimal = dms_to_decimal(
            dms[0].num as f64 / dms[0].denom.max(1) as f64,
            dms[1].num as f64 / dms[1].denom.max(1) as f64,
            dms[2].num as f64 / dms[2].denom.max(1) as f64,
        );
        let reference = exif
            .get_field(ref_tag, exif::In::PRIMARY)
            .map(|f| f.display_value().to_string())?;
        Some(if reference.contains(negative) {
            -decimal
        } else {
            decimal
        })
    };

    data.gps_latitude = gps_coord(exif::Tag::GPSLatitude, exif::Tag::GPSLatitudeRef, "S");
    data.gps_longitude = gps_coord(exif::Tag::GPSLongitude, exif::Tag::GPSLongitudeRef, "W");
    data.gps_altitude = rational_field(exif::Tag::GPSAltitude);

    data
}

/// EXIF timestamps use colon-separated dates; normalize to RFC 3339 UTC.
pub fn parse_exif_datetime(value: &str) -> Option<String> {
    let trimmed = value.trim();
    for format in [
        "%Y:%m:%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(parsed.and_utc().to_rfc3339());
        }
    }
    None
}

pub fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64) -> f64 {
    degrees + minutes / 60.0 + seconds / 3600.0
}
