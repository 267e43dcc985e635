//! Image encoding: scaled `DynamicImage` → base64 PNG payload.
//!
//! A page is encoded exactly once and the same payload is reused across
//! retries. PNG keeps rendered glyph edges intact; the backend's box
//! coordinates refer to the pixel grid of this exact image.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// A page image ready to attach to an inference request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Base64 of the encoded bytes, no data-URI prefix.
    pub data_b64: String,
    pub mime: &'static str,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    /// The multimodal attachment for an edgequake-llm chat message.
    pub fn to_image_data(&self) -> ImageData {
        ImageData::new(self.data_b64.clone(), self.mime).with_detail("high")
    }
}

/// Encode a scaled page image as base64 PNG.
pub fn encode_page(img: &DynamicImage) -> Result<EncodedImage, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let data_b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} image → {} bytes base64",
        img.width(),
        img.height(),
        data_b64.len()
    );

    Ok(EncodedImage {
        data_b64,
        mime: "image/png",
        width: img.width(),
        height: img.height(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 6, Rgba([255, 0, 0, 255])));
        let enc = encode_page(&img).expect("encode should succeed");
        assert_eq!(enc.mime, "image/png");
        assert_eq!((enc.width, enc.height), (10, 6));
        let decoded = STANDARD.decode(&enc.data_b64).expect("valid base64");
        assert_eq!(&decoded[1..4], b"PNG");
    }

    #[test]
    fn image_data_carries_high_detail() {
        let img = DynamicImage::new_rgb8(4, 4);
        let data = encode_page(&img).unwrap().to_image_data();
        assert_eq!(data.mime_type, "image/png");
        assert!(!data.data.is_empty());
    }
}
