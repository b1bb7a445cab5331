//! Base64 frame decoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{GrayImage, Luma, RgbImage};
use moodlens_common::{MoodlensError, MoodlensResult};

/// Turns a base64 payload (optionally a `data:` URI) into an RGB frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameDecoder;

impl FrameDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode a base64 string. Everything up to and including the first comma
    /// is treated as a URI header and dropped; ASCII whitespace such as line
    /// wrapping is ignored.
    pub fn decode(&self, payload: &str) -> MoodlensResult<RgbImage> {
        let body = match payload.split_once(',') {
            Some((_, rest)) => rest,
            None => payload,
        };
        let body: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        if body.is_empty() {
            return Err(MoodlensError::decode("empty image payload"));
        }

        let bytes = STANDARD
            .decode(body)
            .map_err(|e| MoodlensError::decode(format!("invalid base64: {e}")))?;
        self.decode_bytes(&bytes)
    }

    /// Decode raw encoded image bytes (PNG, JPEG, ...).
    pub fn decode_bytes(&self, bytes: &[u8]) -> MoodlensResult<RgbImage> {
        if bytes.is_empty() {
            return Err(MoodlensError::decode("empty image payload"));
        }
        let image = image::load_from_memory(bytes)
            .map_err(|e| MoodlensError::decode(format!("unreadable image: {e}")))?;
        let rgb = image.to_rgb8();
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(MoodlensError::decode("image has zero size"));
        }
        tracing::debug!(width = rgb.width(), height = rgb.height(), "Frame decoded");
        Ok(rgb)
    }
}

/// BT.601 luma in 14-bit fixed point with rounding, matching OpenCV's
/// `RGB2GRAY`. The decision-list thresholds were calibrated on this scale.
pub fn luma_bt601(frame: &RgbImage) -> GrayImage {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    const SHIFT: u32 = 14;

    GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
        let [r, g, b] = frame.get_pixel(x, y).0;
        let v = (r as u32 * R + g as u32 * G + b as u32 * B + (1 << (SHIFT - 1))) >> SHIFT;
        Luma([v.min(255) as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_pixel(4, 3, Rgb([10, 200, 30]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_plain_base64() {
        let rgb = FrameDecoder.decode(&STANDARD.encode(png_bytes())).unwrap();
        assert_eq!(rgb.dimensions(), (4, 3));
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([10, 200, 30]));
    }

    #[test]
    fn test_data_uri_header_is_stripped() {
        let uri = format!("data:image/png;base64,{}", STANDARD.encode(png_bytes()));
        assert_eq!(FrameDecoder.decode(&uri).unwrap().dimensions(), (4, 3));
    }

    #[test]
    fn test_wrapped_base64_is_accepted() {
        let encoded = STANDARD.encode(png_bytes());
        let wrapped = encoded
            .as_bytes()
            .chunks(20)
            .map(|chunk| std::str::from_utf8(chunk).unwrap())
            .collect::<Vec<_>>()
            .join("\r\n ");
        let uri = format!("data:image/png;base64,\n{wrapped}\n");
        assert_eq!(FrameDecoder.decode(&uri).unwrap().dimensions(), (4, 3));
    }

    #[test]
    fn test_malformed_inputs_are_decode_errors() {
        for payload in ["", "data:image/png;base64,", "!!!not base64!!!", "aGVsbG8gd29ybGQ="] {
            let err = FrameDecoder.decode(payload).unwrap_err();
            assert!(err.is_decode(), "{payload:?} -> {err}");
        }
    }

    #[test]
    fn test_truncated_image_is_decode_error() {
        let mut bytes = png_bytes();
        bytes.truncate(bytes.len() / 2);
        assert!(FrameDecoder.decode_bytes(&bytes).unwrap_err().is_decode());
    }

    #[test]
    fn test_luma_uses_bt601_weights() {
        let frame = RgbImage::from_fn(4, 1, |x, _| match x {
            0 => Rgb([180, 100, 100]),
            1 => Rgb([220, 140, 140]),
            2 => Rgb([255, 255, 255]),
            _ => Rgb([77, 77, 77]),
        });
        let gray = luma_bt601(&frame);
        assert_eq!(gray.as_raw(), &vec![124, 164, 255, 77]);
    }
}
