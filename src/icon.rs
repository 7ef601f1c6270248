//! Favicon pixels and their `data:image/png;base64,` form.
use crate::{KVStoreError, Result};
use base64::{engine::general_purpose::STANDARD, Engine};

pub const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// An 8-bit RGBA bitmap, row-major, no padding between rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icon {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl Icon {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Result<Icon> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(4))
            .ok_or_else(|| {
                KVStoreError::Png(format!("{}x{} icon is too large", width, height))
            })?;
        if width == 0 || height == 0 || rgba.len() != expected {
            return Err(KVStoreError::Png(format!(
                "{}x{} icon needs {} bytes, got {}",
                width,
                height,
                expected,
                rgba.len()
            )));
        }
        Ok(Icon {
            width,
            height,
            rgba,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }

    /// Encode as PNG at the strongest compression level, whatever format
    /// the page served the icon in.
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut buf, self.width, self.height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            encoder.set_compression(png::Compression::Best);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&self.rgba)?;
            writer.finish()?;
        }
        Ok(buf)
    }

    pub fn from_png(bytes: &[u8]) -> Result<Icon> {
        let decoder = png::Decoder::new(bytes);
        let mut reader = decoder.read_info()?;
        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf)?;
        if info.color_type != png::ColorType::Rgba || info.bit_depth != png::BitDepth::Eight {
            return Err(KVStoreError::Png(format!(
                "expected 8-bit RGBA, got {:?} {:?}",
                info.bit_depth, info.color_type
            )));
        }
        buf.truncate(info.buffer_size());
        Icon::new(info.width, info.height, buf)
    }

    /// `data:image/png;base64,<standard base64, no line breaks>`
    pub fn to_data_uri(&self) -> Result<String> {
        let png = self.to_png()?;
        Ok(format!("{}{}", PNG_DATA_URI_PREFIX, STANDARD.encode(png)))
    }

    pub fn from_data_uri(uri: &str) -> Result<Icon> {
        let encoded = uri
            .strip_prefix(PNG_DATA_URI_PREFIX)
            .ok_or(KVStoreError::InvalidDataUri)?;
        Icon::from_png(&STANDARD.decode(encoded)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(width: u32, height: u32) -> Icon {
        let mut rgba = Vec::new();
        for y in 0..height {
            for x in 0..width {
                if (x + y) % 2 == 0 {
                    rgba.extend_from_slice(&[255, 0, 0, 255]);
                } else {
                    rgba.extend_from_slice(&[0, 0, 255, 128]);
                }
            }
        }
        Icon::new(width, height, rgba).unwrap()
    }

    #[test]
    fn data_uri_reproduces_pixels() {
        let icon = checkerboard(16, 16);
        let uri = icon.to_data_uri().unwrap();
        assert!(uri.starts_with(PNG_DATA_URI_PREFIX));
        assert!(!uri.contains('\n'));
        assert_eq!(Icon::from_data_uri(&uri).unwrap(), icon);
    }

    #[test]
    fn non_square_icon_keeps_dimensions() {
        let icon = checkerboard(3, 7);
        let decoded = Icon::from_data_uri(&icon.to_data_uri().unwrap()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (3, 7));
        assert_eq!(decoded.rgba(), icon.rgba());
    }

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(Icon::new(2, 2, vec![0; 15]).is_err());
        assert!(Icon::new(0, 0, vec![]).is_err());
    }

    #[test]
    fn rejects_dimensions_overflowing_buffer_size() {
        assert!(matches!(
            Icon::new(u32::MAX, u32::MAX, vec![]),
            Err(KVStoreError::Png(_))
        ));
    }

    #[test]
    fn rejects_foreign_data_uri() {
        assert!(matches!(
            Icon::from_data_uri("data:image/gif;base64,R0lGOD"),
            Err(KVStoreError::InvalidDataUri)
        ));
        assert!(Icon::from_data_uri("data:image/png;base64,@@@").is_err());
    }
}
