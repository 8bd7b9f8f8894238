//! PICTURE block payloads.
//!
//! All integers are big-endian: type, MIME, description, width, height, depth,
//! indexed colors, then the length-prefixed image bytes.

use std::io::Cursor;

use image::ImageFormat;
use tracing::debug;

use super::cursor::ByteCursor;
use crate::error::MetadataError;
use crate::tags::CoverArt;

/// APIC/PICTURE type for the front cover.
pub const PICTURE_TYPE_FRONT_COVER: u32 = 3;
pub const PNG_MIME: &str = "image/png";
const PNG_COLOR_DEPTH: u32 = 32;

/// Extract the embedded image bytes without decoding them.
pub fn picture_bytes(data: &[u8]) -> Option<&[u8]> {
    let mut cursor = ByteCursor::new(data);
    cursor.skip(4)?; // picture type
    cursor.prefixed_be()?; // MIME type
    cursor.prefixed_be()?; // description
    cursor.skip(16)?; // width, height, depth, indexed colors
    cursor.prefixed_be()
}

/// Decode the embedded image. Truncation or an undecodable image yields `None`.
pub fn parse(data: &[u8]) -> Option<CoverArt> {
    let Some(bytes) = picture_bytes(data) else {
        debug!(len = data.len(), "picture block is truncated");
        return None;
    };

    match image::load_from_memory(bytes) {
        Ok(img) => Some(CoverArt::new(img)),
        Err(err) => {
            debug!(error = %err, "embedded picture could not be decoded");
            None
        }
    }
}

/// Encode `art` as a PNG front-cover PICTURE payload.
pub fn encode(art: &CoverArt) -> Result<Vec<u8>, MetadataError> {
    let mut png = Vec::new();
    art.image()
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

    let mut out = Vec::with_capacity(png.len() + 64);
    out.extend_from_slice(&PICTURE_TYPE_FRONT_COVER.to_be_bytes());
    push_prefixed(&mut out, PNG_MIME.as_bytes());
    push_prefixed(&mut out, &[]);
    out.extend_from_slice(&art.width().to_be_bytes());
    out.extend_from_slice(&art.height().to_be_bytes());
    out.extend_from_slice(&PNG_COLOR_DEPTH.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    push_prefixed(&mut out, &png);
    Ok(out)
}

fn push_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, Rgba, RgbaImage};

    use super::*;

    fn checker(width: u32, height: u32) -> CoverArt {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 128])
            }
        });
        CoverArt::new(DynamicImage::ImageRgba8(img))
    }

    #[test]
    fn encoded_block_decodes_to_the_same_pixels() -> anyhow::Result<()> {
        let art = checker(5, 3);
        let data = encode(&art)?;

        assert_eq!(&data[0..4], &3u32.to_be_bytes());
        assert_eq!(&data[8..17], b"image/png");

        let decoded = parse(&data).expect("decodable picture");
        assert_eq!(decoded.width(), 5);
        assert_eq!(decoded.height(), 3);
        assert_eq!(decoded, art);
        Ok(())
    }

    #[test]
    fn truncated_picture_is_none() -> anyhow::Result<()> {
        let data = encode(&checker(2, 2))?;
        assert!(parse(&data[..data.len() - 1]).is_none());
        assert!(parse(&data[..20]).is_none());
        Ok(())
    }

    #[test]
    fn garbage_image_bytes_are_none() {
        let mut data = Vec::new();
        data.extend_from_slice(&3u32.to_be_bytes());
        push_prefixed(&mut data, b"image/jpeg");
        push_prefixed(&mut data, b"");
        data.extend_from_slice(&[0u8; 16]);
        push_prefixed(&mut data, b"definitely not an image");

        assert_eq!(picture_bytes(&data), Some(&b"definitely not an image"[..]));
        assert!(parse(&data).is_none());
    }
}
