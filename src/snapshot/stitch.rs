//! Reassemble one tall image from viewport captures taken while scrolling.
//!
//! Capture 0 is kept whole. Every later capture only contributes its bottom
//! `round(delta * scale)` rows, the content the scroll step revealed; the
//! rows above duplicate what is already placed.

use image::{GenericImage, RgbaImage, imageops};

use crate::snapshot::types::CapturedFrame;

/// Physical pixels per logical pixel, from the first capture's width
pub fn device_scale(first_width: u32, viewport_width: f64) -> f64 {
    if viewport_width > 0.0 && first_width > 0 {
        f64::from(first_width) / viewport_width
    } else {
        1.0
    }
}

/// Rows revealed by a scroll of `delta` logical pixels
pub fn revealed_rows(delta: f64, scale: f64) -> u32 {
    let rows = (delta * scale).round();
    if rows.is_finite() && rows > 0.0 {
        rows as u32
    } else {
        0
    }
}

/// Stitch encoded images; `None` if any image fails to decode or the inputs disagree.
///
/// `scroll_deltas[i]` is the measured scroll between image `i` and `i + 1`,
/// in logical pixels of a viewport `viewport_width` logical pixels wide.
pub fn stitch<B: AsRef<[u8]>>(images: &[B], scroll_deltas: &[f64], viewport_width: f64) -> Option<RgbaImage> {
    if images.is_empty() || scroll_deltas.len() + 1 != images.len() {
        tracing::debug!(
            images = images.len(),
            deltas = scroll_deltas.len(),
            "stitch inputs do not line up"
        );
        return None;
    }

    let mut decoded = Vec::with_capacity(images.len());
    for (idx, bytes) in images.iter().enumerate() {
        match image::load_from_memory(bytes.as_ref()) {
            Ok(img) => decoded.push(img.to_rgba8()),
            Err(e) => {
                tracing::debug!(index = idx, error = %e, "stitch input failed to decode");
                return None;
            }
        }
    }

    stitch_decoded(&decoded, scroll_deltas, viewport_width)
}

/// Stitch frames returned by the capture service
pub fn stitch_frames(frames: &[CapturedFrame], scroll_deltas: &[f64], viewport_width: f64) -> Option<RgbaImage> {
    let images: Vec<&[u8]> = frames.iter().map(|f| f.png.as_slice()).collect();
    stitch(&images, scroll_deltas, viewport_width)
}

/// Stitch already decoded images
pub fn stitch_decoded(images: &[RgbaImage], scroll_deltas: &[f64], viewport_width: f64) -> Option<RgbaImage> {
    let first = images.first()?;
    if scroll_deltas.len() + 1 != images.len() {
        return None;
    }

    let width = first.width();
    let scale = device_scale(width, viewport_width);

    // Rows taken from each image after the first, clamped to what it has
    let slices: Vec<u32> = images[1..]
        .iter()
        .zip(scroll_deltas)
        .map(|(img, delta)| revealed_rows(*delta, scale).min(img.height()))
        .collect();

    let height = first.height() + slices.iter().sum::<u32>();
    let mut out = RgbaImage::new(width, height);
    out.copy_from(first, 0, 0).ok()?;

    let mut y = first.height();
    for (img, rows) in images[1..].iter().zip(&slices) {
        if *rows == 0 {
            continue;
        }
        let copy_width = img.width().min(width);
        let strip = imageops::crop_imm(img, 0, img.height() - rows, copy_width, *rows).to_image();
        out.copy_from(&strip, 0, y).ok()?;
        y += rows;
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::utils::encode_png;
    use image::Rgba;
    use proptest::prelude::*;

    /// Window of a tall synthetic page whose row `r` has color `row_color(r)`
    fn row_color(r: u32) -> Rgba<u8> {
        Rgba([(r % 251) as u8, (r / 251 % 251) as u8, 7, 255])
    }

    fn window(width: u32, height: u32, top: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |_, y| row_color(top + y))
    }

    #[test]
    fn test_single_image_is_unchanged() {
        let img = window(4, 10, 0);
        let png = encode_png(&img).unwrap();
        let out = stitch(&[png], &[], 4.0).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn test_bottom_rows_are_appended() {
        // viewport 10 rows, scrolled by 6 then by 3 (clamped at the end)
        let frames = [window(2, 10, 0), window(2, 10, 6), window(2, 10, 9)];
        let out = stitch_decoded(&frames, &[6.0, 3.0], 2.0).unwrap();
        assert_eq!(out.height(), 10 + 6 + 3);
        for y in 0..out.height() {
            assert_eq!(*out.get_pixel(1, y), row_color(y), "row {y}");
        }
    }

    #[test]
    fn test_high_dpi_scale() {
        // logical width 2, physical width 4 => scale 2
        let frames = [window(4, 20, 0), window(4, 20, 8)];
        let out = stitch_decoded(&frames, &[4.0], 2.0).unwrap();
        assert_eq!(out.height(), 28);
        assert_eq!(*out.get_pixel(0, 27), row_color(27));
    }

    #[test]
    fn test_decode_failure_returns_none() {
        let good = encode_png(&window(2, 2, 0)).unwrap();
        let bad = vec![0u8, 1, 2, 3];
        assert!(stitch(&[good, bad], &[1.0], 2.0).is_none());
    }

    #[test]
    fn test_mismatched_delta_count_returns_none() {
        let png = encode_png(&window(2, 2, 0)).unwrap();
        assert!(stitch(&[png.clone(), png], &[], 2.0).is_none());
        assert!(stitch::<Vec<u8>>(&[], &[], 2.0).is_none());
    }

    proptest! {
        #[test]
        fn prop_height_and_boundaries(
            height in 4u32..40,
            steps in proptest::collection::vec(0u32..40, 0..6),
        ) {
            let steps: Vec<u32> = steps.into_iter().map(|s| s.min(height)).collect();
            let mut tops = vec![0u32];
            for s in &steps {
                let last = *tops.last().unwrap();
                tops.push(last + s);
            }
            let frames: Vec<RgbaImage> = tops.iter().map(|t| window(3, height, *t)).collect();
            let deltas: Vec<f64> = steps.iter().map(|s| f64::from(*s)).collect();

            let out = stitch_decoded(&frames, &deltas, 3.0).unwrap();
            prop_assert_eq!(out.height(), height + steps.iter().sum::<u32>());
            for y in 0..out.height() {
                prop_assert_eq!(*out.get_pixel(2, y), row_color(y));
            }
        }
    }
}
