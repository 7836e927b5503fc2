//! Decoded frames.
//!
//! A `Frame` lives for a single fetch cycle: it is produced by a stream session,
//! encoded to JPEG by the writer and dropped. Nothing buffers frames beyond that.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::error::{Result, SnapError};

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Single decoded RGB24 image.
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp reported by the stream, in stream time base units.
    pub pts: Option<i64>,
}

impl Frame {
    /// Wraps tightly packed RGB24 pixels. The buffer must be exactly
    /// `width * height * 3` bytes.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(SnapError::Encode(format!(
                "frame has empty dimensions {}x{}",
                width, height
            )));
        }
        let expected = rgb_len(width, height);
        if pixels.len() != expected {
            return Err(SnapError::Encode(format!(
                "frame buffer is {} bytes, expected {} for {}x{} rgb",
                pixels.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            pixels,
            width,
            height,
            pts: None,
        })
    }

    pub fn with_pts(mut self, pts: Option<i64>) -> Self {
        self.pts = pts;
        self
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// Encodes the frame as a baseline JPEG.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.pixels.len() / 8);
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode(&self.pixels, self.width, self.height, ExtendedColorType::Rgb8)
            .map_err(|e| SnapError::Encode(e.to_string()))?;
        Ok(out)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pts", &self.pts)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> usize {
    (width as usize) * (height as usize) * 3
}

/// Copies an RGB24 plane with row padding into a tightly packed buffer.
pub(crate) fn pack_rgb_rows(data: &[u8], stride: usize, width: u32, height: u32) -> Result<Vec<u8>> {
    let row_bytes = (width as usize) * 3;
    if stride == row_bytes {
        return data
            .get(..rgb_len(width, height))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| SnapError::Encode("frame plane is shorter than its dimensions".into()));
    }

    let mut pixels = Vec::with_capacity(rgb_len(width, height));
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .ok_or_else(|| SnapError::Encode("frame row is out of bounds".into()))?,
        );
    }
    Ok(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_rejects_mismatched_buffer() {
        assert!(Frame::from_rgb(vec![0u8; 10], 4, 4).is_err());
        assert!(Frame::from_rgb(Vec::new(), 0, 4).is_err());
        assert!(Frame::from_rgb(vec![0u8; 48], 4, 4).is_ok());
    }

    #[test]
    fn encode_jpeg_produces_soi_and_eoi_markers() -> Result<()> {
        let frame = Frame::from_rgb(vec![128u8; 16 * 8 * 3], 16, 8)?;
        let jpeg = frame.encode_jpeg(DEFAULT_JPEG_QUALITY)?;
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);

        let decoded = image::load_from_memory(&jpeg).map_err(|e| SnapError::Encode(e.to_string()))?;
        assert_eq!(decoded.width(), 16);
        assert_eq!(decoded.height(), 8);
        Ok(())
    }

    #[test]
    fn pack_rgb_rows_drops_stride_padding() -> Result<()> {
        // 2x2 image, stride 8 (6 bytes of pixels + 2 padding per row)
        let data = [1, 2, 3, 4, 5, 6, 0, 0, 7, 8, 9, 10, 11, 12, 0, 0];
        let packed = pack_rgb_rows(&data, 8, 2, 2)?;
        assert_eq!(packed, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);

        let tight = pack_rgb_rows(&packed, 6, 2, 2)?;
        assert_eq!(tight, packed);

        assert!(pack_rgb_rows(&data[..10], 8, 2, 2).is_err());
        Ok(())
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn rgb_len_does_not_wrap_at_u32() {
        assert_eq!(rgb_len(100_000, 20_000), 6_000_000_000);
    }
}
