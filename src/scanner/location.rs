//! GPS location extraction from EXIF data.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Sentinel used when a photo carries no usable GPS data.
pub const UNKNOWN_LOCATION: &str = "Unknown";

/// Read GPS coordinates from EXIF and render them as a decimal
/// "lat, lon" string. Photos without GPS data (or unreadable EXIF)
/// report [`UNKNOWN_LOCATION`].
pub fn gps_location(path: &Path) -> String {
    read_gps(path).unwrap_or_else(|| UNKNOWN_LOCATION.to_string())
}

fn read_gps(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;

    let lat = dms_field(&exif, exif::Tag::GPSLatitude)?;
    let lon = dms_field(&exif, exif::Tag::GPSLongitude)?;

    let lat_ref = ref_field(&exif, exif::Tag::GPSLatitudeRef);
    let lon_ref = ref_field(&exif, exif::Tag::GPSLongitudeRef);

    let lat = if lat_ref.contains('S') { -lat } else { lat };
    let lon = if lon_ref.contains('W') { -lon } else { lon };

    Some(format!("{:.6}, {:.6}", lat, lon))
}

fn dms_field(exif: &exif::Exif, tag: exif::Tag) -> Option<f64> {
    let field = exif.get_field(tag, exif::In::PRIMARY)?;
    if let exif::Value::Rational(ref v) = field.value {
        if v.len() >= 3 {
            return Some(dms_to_decimal(
                v[0].num as f64 / v[0].denom as f64,
                v[1].num as f64 / v[1].denom as f64,
                v[2].num as f64 / v[2].denom as f64,
            ));
        }
    }
    None
}

fn ref_field(exif: &exif::Exif, tag: exif::Tag) -> String {
    exif.get_field(tag, exif::In::PRIMARY)
        .map(|f| f.display_value().to_string())
        .unwrap_or_default()
}

fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64) -> f64 {
    degrees + minutes / 60.0 + seconds / 3600.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_dms_to_decimal() {
        assert!((dms_to_decimal(51.0, 30.0, 0.0) - 51.5).abs() < 1e-9);
        assert!((dms_to_decimal(0.0, 0.0, 36.0) - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_missing_gps_is_unknown() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("no_exif.jpg");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"not a real jpeg").unwrap();

        assert_eq!(gps_location(&path), UNKNOWN_LOCATION);
    }
}
