use base64::Engine;
use chrono::Utc;
use image::{ImageFormat, RgbaImage};
use std::io::Cursor;

use crate::snapshot::types::{SnapshotError, SnapshotResult};

const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Generate a timestamp string in YYYYMMDD_HHMMSS format
pub fn generate_timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Generate a filename for a captured image
pub fn generate_filename(stem: &str) -> String {
    format!("{}.png", crate::session::sanitize_name(stem))
}

/// Generate the filename of one unstitched part (1-based)
pub fn part_filename(stem: &str, part: usize) -> String {
    generate_filename(&format!("{stem}_part{part}"))
}

/// Encode an RGBA image as PNG bytes
pub fn encode_png(img: &RgbaImage) -> SnapshotResult<Vec<u8>> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Wrap PNG bytes into a `data:` URL, the shape the capture primitive returns
pub fn to_data_url(png: &[u8]) -> String {
    format!(
        "{}{}",
        PNG_DATA_URL_PREFIX,
        base64::engine::general_purpose::STANDARD.encode(png)
    )
}

/// Decode a base64 `data:` URL into raw image bytes
pub fn decode_data_url(url: &str) -> SnapshotResult<Vec<u8>> {
    let (header, data) = url
        .split_once(',')
        .ok_or_else(|| SnapshotError::DataUrl("missing ',' separator".to_string()))?;
    if !header.starts_with("data:image/") || !header.ends_with(";base64") {
        return Err(SnapshotError::DataUrl(format!("unsupported header '{header}'")));
    }
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| SnapshotError::DataUrl(e.to_string()))
}

/// Read width and height from encoded image bytes without decoding pixels
pub fn image_dimensions(bytes: &[u8]) -> SnapshotResult<(u32, u32)> {
    let reader = image::io::Reader::new(Cursor::new(bytes)).with_guessed_format()?;
    Ok(reader.into_dimensions()?)
}
