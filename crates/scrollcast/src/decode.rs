//! Raster decoding: captured PNG/JPEG bytes into RGBA frames.

use crate::result::{CastError, CastResult};
use image::imageops::FilterType;
use image::RgbaImage;
use std::time::Duration;

/// Default budget for decoding one captured frame
pub const DEFAULT_DECODE_TIMEOUT: Duration = Duration::from_secs(30);

/// An immutable RGBA pixel buffer, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Frame {
    /// Wrap raw RGBA data
    ///
    /// # Errors
    ///
    /// Returns a decode error if `data` is not exactly `width * height * 4` bytes
    pub fn from_rgba(data: Vec<u8>, width: u32, height: u32) -> CastResult<Self> {
        let expected = rgba_len(width, height);
        if data.len() != expected {
            return Err(CastError::decode(format!(
                "RGBA buffer is {} bytes, expected {expected} for {width}x{height}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Frame width
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Frame height
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Pixel data
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take ownership of the pixel data
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Resize to the given canvas if the dimensions differ
    ///
    /// Screenshots taken at a device pixel ratio above one come back larger
    /// than the viewport; the session canvas is fixed.
    pub fn fit_to(self, width: u32, height: u32) -> CastResult<Self> {
        if self.width == width && self.height == height {
            return Ok(self);
        }
        let image = RgbaImage::from_raw(self.width, self.height, self.data)
            .ok_or_else(|| CastError::decode("frame data does not match its dimensions"))?;
        let resized = image::imageops::resize(&image, width, height, FilterType::Triangle);
        Self::from_rgba(resized.into_raw(), width, height)
    }
}

/// Byte length of an RGBA buffer
#[must_use]
pub const fn rgba_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

/// Decode compressed raster bytes synchronously
pub fn decode_raster(bytes: &[u8]) -> CastResult<Frame> {
    if bytes.is_empty() {
        return Err(CastError::decode("empty raster buffer"));
    }
    let image = image::load_from_memory(bytes)
        .map_err(|e| CastError::decode(format!("failed to decode raster: {e}")))?;
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    Frame::from_rgba(rgba.into_raw(), width, height)
}

/// Decodes captured rasters on a blocking task under a time budget
#[derive(Debug, Clone, Copy)]
pub struct PixelDecoder {
    timeout: Duration,
}

impl Default for PixelDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_DECODE_TIMEOUT)
    }
}

impl PixelDecoder {
    /// Create a decoder with the given budget
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Configured budget
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Decode `bytes` into an RGBA frame
    ///
    /// # Errors
    ///
    /// Returns a decode error when the bytes are malformed or the budget elapses
    pub async fn decode(&self, bytes: Vec<u8>) -> CastResult<Frame> {
        let task = tokio::task::spawn_blocking(move || decode_raster(&bytes));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(CastError::decode(format!("decode task failed: {join}"))),
            Err(_) => Err(CastError::decode(format!(
                "decode exceeded {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba};
    use proptest::prelude::*;
    use std::io::Cursor;

    fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba(color));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    mod frame_tests {
        use super::*;

        #[test]
        fn test_from_rgba_checks_length() {
            assert!(Frame::from_rgba(vec![0; 16], 2, 2).is_ok());
            assert!(matches!(
                Frame::from_rgba(vec![0; 15], 2, 2),
                Err(CastError::Decode { .. })
            ));
        }

        #[test]
        fn test_fit_to_same_size_is_identity() {
            let frame = Frame::from_rgba(vec![7; 16], 2, 2).unwrap();
            let fitted = frame.clone().fit_to(2, 2).unwrap();
            assert_eq!(frame, fitted);
        }

        #[test]
        fn test_fit_to_downscales() {
            let frame = Frame::from_rgba(vec![200; rgba_len(8, 6)], 8, 6).unwrap();
            let fitted = frame.fit_to(4, 3).unwrap();
            assert_eq!(fitted.width(), 4);
            assert_eq!(fitted.height(), 3);
            assert_eq!(fitted.data().len(), rgba_len(4, 3));
        }
    }

    mod decoder_tests {
        use super::*;

        #[test]
        fn test_decode_png() {
            let frame = decode_raster(&png(3, 2, [255, 0, 0, 255])).unwrap();
            assert_eq!((frame.width(), frame.height()), (3, 2));
            assert_eq!(&frame.data()[..4], &[255, 0, 0, 255]);
        }

        #[test]
        fn test_decode_garbage_fails() {
            assert!(matches!(
                decode_raster(b"definitely not an image"),
                Err(CastError::Decode { .. })
            ));
            assert!(decode_raster(&[]).is_err());
        }

        #[tokio::test]
        async fn test_async_decode() {
            let decoder = PixelDecoder::default();
            assert_eq!(decoder.timeout(), Duration::from_secs(30));
            let frame = decoder.decode(png(5, 4, [0, 0, 255, 255])).await.unwrap();
            assert_eq!(frame.data().len(), 5 * 4 * 4);
        }

        #[tokio::test]
        async fn test_async_decode_propagates_failure() {
            let decoder = PixelDecoder::default();
            let err = decoder.decode(vec![1, 2, 3]).await.unwrap_err();
            assert!(err.is_fatal());
        }

        #[tokio::test(start_paused = true)]
        async fn test_decode_over_budget_fails() {
            let decoder = PixelDecoder::new(Duration::from_nanos(1));
            let err = decoder
                .decode(png(1024, 1024, [0, 128, 0, 255]))
                .await
                .unwrap_err();
            assert!(matches!(err, CastError::Decode { .. }));
            assert!(err.to_string().contains("exceeded"), "{err}");
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_decoded_length_matches_dimensions(width in 1u32..48, height in 1u32..48) {
            let frame = decode_raster(&png(width, height, [10, 20, 30, 255])).unwrap();
            prop_assert_eq!(frame.data().len(), (width * height * 4) as usize);
        }
    }
}
