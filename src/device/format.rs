// src/device/format.rs

use super::Capabilities;

/// Texture pixel formats understood by `GraphicsDevice::upload_texture`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba8888,
    Rgb888,
    Rgb565,
    Rgba4444,
    Alpha8,
    RgbPvrtc4,
    RgbPvrtc2,
    RgbaPvrtc4,
    RgbaPvrtc2,
    Etc1,
}

impl PixelFormat {
    /// Short name used in benchmark names.
    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Rgba8888 => "rgba8888",
            PixelFormat::Rgb888 => "rgb888",
            PixelFormat::Rgb565 => "rgb565",
            PixelFormat::Rgba4444 => "rgba4444",
            PixelFormat::Alpha8 => "a8",
            PixelFormat::RgbPvrtc4 => "rgb_pvrtc4",
            PixelFormat::RgbPvrtc2 => "rgb_pvrtc2",
            PixelFormat::RgbaPvrtc4 => "rgba_pvrtc4",
            PixelFormat::RgbaPvrtc2 => "rgba_pvrtc2",
            PixelFormat::Etc1 => "rgb_etc1",
        }
    }

    /// The uncompressed format streamed at a given pixel depth.
    pub fn for_depth(bits_per_pixel: u32) -> Option<PixelFormat> {
        match bits_per_pixel {
            16 => Some(PixelFormat::Rgb565),
            32 => Some(PixelFormat::Rgba8888),
            _ => None,
        }
    }

    pub fn is_compressed(self) -> bool {
        self.required_capability().is_some()
    }

    /// Bytes per pixel of an uncompressed format, `None` for block formats.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Rgba8888 => Some(4),
            PixelFormat::Rgb888 => Some(3),
            PixelFormat::Rgb565 | PixelFormat::Rgba4444 => Some(2),
            PixelFormat::Alpha8 => Some(1),
            _ => None,
        }
    }

    /// Size in bytes of a tightly packed `width` x `height` image.
    ///
    /// PVRTC images are padded to at least two blocks in each direction.
    pub fn data_size(self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelFormat::Etc1 => w * h / 2,
            PixelFormat::RgbPvrtc4 | PixelFormat::RgbaPvrtc4 => w.max(8) * h.max(8) / 2,
            PixelFormat::RgbPvrtc2 | PixelFormat::RgbaPvrtc2 => w.max(16) * h.max(8) / 4,
            other => w * h * other.bytes_per_pixel().unwrap_or(4),
        }
    }

    /// Capability needed to sample this format, if any.
    pub fn required_capability(self) -> Option<Capabilities> {
        match self {
            PixelFormat::Etc1 => Some(Capabilities::COMPRESSED_ETC1),
            PixelFormat::RgbPvrtc4
            | PixelFormat::RgbPvrtc2
            | PixelFormat::RgbaPvrtc4
            | PixelFormat::RgbaPvrtc2 => Some(Capabilities::COMPRESSED_PVRTC),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_depth_maps_to_streaming_format() {
        assert_eq!(PixelFormat::for_depth(16), Some(PixelFormat::Rgb565));
        assert_eq!(PixelFormat::for_depth(32), Some(PixelFormat::Rgba8888));
        assert_eq!(PixelFormat::for_depth(24), None);
    }

    #[test]
    fn test_compressed_sizes() {
        assert_eq!(PixelFormat::Etc1.data_size(1024, 512), 1024 * 512 / 2);
        assert_eq!(PixelFormat::RgbPvrtc4.data_size(4, 4), 32);
        assert_eq!(PixelFormat::RgbaPvrtc2.data_size(8, 4), 32);
        assert_eq!(PixelFormat::Rgb565.data_size(64, 64), 64 * 64 * 2);
    }

    #[test]
    fn test_only_block_formats_need_capabilities() {
        assert!(PixelFormat::Etc1.is_compressed());
        assert!(PixelFormat::RgbaPvrtc4.is_compressed());
        assert!(!PixelFormat::Rgb888.is_compressed());
        assert_eq!(
            PixelFormat::RgbPvrtc2.required_capability(),
            Some(Capabilities::COMPRESSED_PVRTC)
        );
    }
}
