// src/suite.rs

//! The standard benchmark list, in run order.

use crate::benchmark::{
    Benchmark, BlitBenchmark, BlitGeometry, ClearBenchmark, Composite, FboBenchmark,
    PixmapBenchmark, ShaderBenchmark, ShaderEffect,
};
use crate::device::PixelFormat;
use crate::streaming::{StreamingBenchmark, StreamingConfig, StreamingError, StreamingMethod};

/// Tiles per row and column in the small blended blits.
const GRID_W: u32 = 5;
const GRID_H: u32 = 3;

/// Inputs that shape the suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuiteParams {
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
}

fn blit(format: PixelFormat, width: u32, height: u32, asset: &str) -> BlitBenchmark {
    BlitBenchmark::new(format, width, height, asset)
}

fn fit(rotate: bool, sx: f32, sy: f32) -> BlitGeometry {
    BlitGeometry::default().rotated(rotate).texture_scale(sx, sy)
}

/// Builds the standard suite for a surface of the given size.
pub fn standard_suite(params: &SuiteParams) -> Result<Vec<Box<dyn Benchmark>>, StreamingError> {
    let mut suite: Vec<Box<dyn Benchmark>> = vec![Box::new(ClearBenchmark::new())];
    let (w, h) = (params.width as f32, params.height as f32);
    let depths: Vec<u32> = if params.bits_per_pixel == 32 {
        vec![32]
    } else {
        vec![params.bits_per_pixel, 32]
    };

    use PixelFormat::*;

    // Full-screen blits
    suite.push(Box::new(blit(Rgba8888, 800, 480, "water2_800x480_rgba8888.raw")));
    suite.push(Box::new(blit(Rgb888, 800, 480, "water2_800x480_rgb888.raw")));
    suite.push(Box::new(blit(Rgba8888, 864, 480, "water2_864x480_rgba8888.raw")));
    suite.push(Box::new(blit(Rgb888, 864, 480, "water2_864x480_rgb888.raw")));
    suite.push(Box::new(
        blit(Rgba8888, 1024, 512, "digital_nature2_1024x512_rgba8888.raw")
            .with_geometry(fit(false, 800.0 / 1024.0, 480.0 / 512.0)),
    ));
    suite.push(Box::new(blit(Rgb565, 800, 480, "water2_800x480_rgb565.raw")));
    suite.push(Box::new(
        blit(Rgb565, 1024, 512, "digital_nature2_1024x512_rgb565.raw")
            .with_geometry(fit(false, 800.0 / 1024.0, 480.0 / 512.0)),
    ));
    for (format, asset) in [
        (RgbPvrtc4, "abstract3_1024x512_pvrtc4.raw"),
        (RgbPvrtc2, "abstract3_1024x512_pvrtc2.raw"),
        (Etc1, "abstract3_1024x512_etc1.raw"),
    ] {
        suite.push(Box::new(
            blit(format, 1024, 512, asset).with_geometry(fit(false, 800.0 / 1024.0, 480.0 / 512.0)),
        ));
    }
    for &depth in &depths {
        suite.push(Box::new(PixmapBenchmark::new(params.width, params.height, depth)));
    }
    for format in [Rgba8888, Rgb565] {
        suite.push(Box::new(FboBenchmark::new(format, params.width, params.height)));
        suite.push(Box::new(
            FboBenchmark::new(format, 1024, 512).with_geometry(fit(false, w / 1024.0, h / 512.0)),
        ));
    }

    // Rotated blits
    suite.push(Box::new(
        blit(Rgba8888, 480, 800, "water2_480x800_rgba8888.raw").with_geometry(fit(true, 1.0, 1.0)),
    ));
    suite.push(Box::new(
        blit(Rgb888, 480, 800, "water2_480x800_rgb888.raw").with_geometry(fit(true, 1.0, 1.0)),
    ));
    suite.push(Box::new(
        blit(Rgba8888, 480, 864, "water2_480x864_rgba8888.raw").with_geometry(fit(true, 1.0, 1.0)),
    ));
    suite.push(Box::new(
        blit(Rgb888, 480, 864, "water2_480x864_rgb888.raw").with_geometry(fit(true, 1.0, 1.0)),
    ));
    suite.push(Box::new(
        blit(Rgba8888, 512, 1024, "digital_nature2_512x1024_rgba8888.raw")
            .with_geometry(fit(true, 480.0 / 512.0, 800.0 / 1024.0)),
    ));
    suite.push(Box::new(
        blit(Rgb565, 480, 800, "water2_480x800_rgb565.raw").with_geometry(fit(true, 1.0, 1.0)),
    ));
    suite.push(Box::new(
        blit(Rgb565, 512, 1024, "digital_nature2_512x1024_rgb565.raw")
            .with_geometry(fit(true, 480.0 / 512.0, 800.0 / 1024.0)),
    ));
    for (format, asset) in [
        (RgbPvrtc4, "abstract3_512x1024_pvrtc4.raw"),
        (RgbPvrtc2, "abstract3_512x1024_pvrtc2.raw"),
        (Etc1, "abstract3_512x1024_etc1.raw"),
    ] {
        suite.push(Box::new(
            blit(format, 512, 1024, asset).with_geometry(fit(true, 480.0 / 512.0, 800.0 / 1024.0)),
        ));
    }
    for &depth in &depths {
        suite.push(Box::new(
            PixmapBenchmark::new(params.height, params.width, depth)
                .with_geometry(fit(true, 1.0, 1.0)),
        ));
    }
    for format in [Rgba8888, Rgb565] {
        suite.push(Box::new(
            FboBenchmark::new(format, params.width, params.height)
                .with_geometry(fit(true, h / w, w / h)),
        ));
        suite.push(Box::new(
            FboBenchmark::new(format, 1024, 512).with_geometry(fit(true, h / 512.0, w / 1024.0)),
        ));
    }

    // Small blended blits
    let cell_w = (params.width / GRID_W) as f32;
    let cell_h = (params.height / GRID_H) as f32;
    let tiled = |rotate: bool, size: u32| {
        let (cols, rows) = if rotate {
            (GRID_H, GRID_W)
        } else {
            (GRID_W, GRID_H)
        };
        BlitGeometry::default()
            .rotated(rotate)
            .texture_scale(cols as f32, rows as f32)
            .quad_scale(size as f32 / cell_w, size as f32 / cell_h)
    };
    let small = [
        (Rgba4444, 128, "xorg_128x128_rgba4444.raw"),
        (Rgba8888, 127, "xorg_127x127_rgba8888.raw"),
        (Rgba8888, 128, "xorg_128x128_rgba8888.raw"),
        (Rgb565, 127, "xorg_127x127_rgb565.raw"),
        (Rgb565, 128, "xorg_128x128_rgb565.raw"),
        (RgbaPvrtc4, 128, "xorg_128x128_pvrtc4.raw"),
        (RgbaPvrtc2, 128, "xorg_128x128_pvrtc2.raw"),
        (Etc1, 128, "xorg_128x128_etc1.raw"),
    ];
    for &(format, size, asset) in &small {
        suite.push(Box::new(
            blit(format, size, size, asset)
                .with_geometry(tiled(false, size))
                .blended(),
        ));
    }
    suite.push(Box::new(
        ShaderBenchmark::new(ShaderEffect::Mask, 128, 128)
            .with_geometry(
                BlitGeometry::default()
                    .texture_scale(GRID_W as f32, GRID_H as f32 * 0.5)
                    .quad_scale(128.0 / cell_w, 128.0 / cell_h),
            )
            .blended(),
    ));

    // Rotated small blended blits; there is no rotated 4444 asset.
    for &(format, size, asset) in small.iter().filter(|(f, _, _)| *f != Rgba4444) {
        suite.push(Box::new(
            blit(format, size, size, asset)
                .with_geometry(tiled(true, size))
                .blended(),
        ));
    }

    // Composited full-screen layers
    for layers in [2, 4] {
        suite.push(Box::new(Composite::new(layers, || {
            blit(Rgba8888, 800, 480, "water2_800x480_rgba8888.raw")
        })));
        suite.push(Box::new(Composite::new(layers, || {
            blit(Rgb565, 800, 480, "water2_800x480_rgb565.raw")
        })));
    }
    suite.push(Box::new(Composite::new(2, || {
        PixmapBenchmark::new(params.width, params.height, params.bits_per_pixel)
    })));

    // Shader effects
    for effect in [
        ShaderEffect::Const,
        ShaderEffect::LinearGradient,
        ShaderEffect::RadialGradient,
        ShaderEffect::Palette,
        ShaderEffect::Blur,
    ] {
        suite.push(Box::new(ShaderBenchmark::new(effect, params.width, params.height)));
    }

    // CPU to GPU streaming
    for (method, bpp) in [
        (StreamingMethod::ShmImage, 16),
        (StreamingMethod::ShmImage, 32),
        (StreamingMethod::TextureUpload, 16),
        (StreamingMethod::TextureUpload, 32),
        (StreamingMethod::LockSurface, 16),
        (StreamingMethod::LockSurface, 32),
    ] {
        let config = StreamingConfig::new(method, 2, bpp, params.width, params.height)?;
        suite.push(Box::new(StreamingBenchmark::new(config)?));
    }

    Ok(suite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use test_log::test;

    fn names(params: SuiteParams) -> Vec<String> {
        standard_suite(&params)
            .unwrap()
            .iter()
            .map(|b| b.name())
            .collect()
    }

    const WINDOW: SuiteParams = SuiteParams {
        width: 800,
        height: 480,
        bits_per_pixel: 16,
    };

    #[test]
    fn test_names_are_unique() {
        let names = names(WINDOW);
        let unique: HashSet<&String> = names.iter().collect();
        assert_eq!(unique.len(), names.len(), "{:?}", names);
    }

    #[test]
    fn test_suite_starts_with_clear_and_ends_with_streaming() {
        let names = names(WINDOW);
        assert_eq!(names[0], "clear");
        assert_eq!(
            names.last().map(String::as_str),
            Some("blit_cpu_locksurf_32bpp_2x800x480")
        );
        assert!(names.contains(&"blit_tex_rgba8888_800x480".to_string()));
        assert!(names.contains(&"blit_tex_rot90_rgb565_480x800".to_string()));
        assert!(names.contains(&"blit_tex_rgba8888_800x480_blend4".to_string()));
        assert!(names.contains(&"blit_shader_blur_800x480".to_string()));
        assert!(names.contains(&"blit_shader_mask_128x128".to_string()));
    }

    #[test]
    fn test_pixmap_depths_follow_window_depth() {
        let pixmaps = |bpp| {
            names(SuiteParams {
                bits_per_pixel: bpp,
                ..WINDOW
            })
            .into_iter()
            .filter(|n| n.starts_with("blit_pixmap_") && !n.contains("rot90"))
            .filter(|n| !n.ends_with("_blend2"))
            .collect::<Vec<_>>()
        };
        assert_eq!(
            pixmaps(16),
            vec!["blit_pixmap_16bpp_800x480", "blit_pixmap_32bpp_800x480"]
        );
        assert_eq!(pixmaps(32), vec!["blit_pixmap_32bpp_800x480"]);
    }

    #[test]
    fn test_window_size_shapes_surface_sized_benchmarks() {
        let names = names(SuiteParams {
            width: 1024,
            height: 600,
            bits_per_pixel: 16,
        });
        assert!(names.contains(&"blit_fbo_rgb565_1024x600".to_string()));
        assert!(names.contains(&"blit_cpu_texupload_16bpp_2x1024x600".to_string()));
        // Asset-backed blits keep their file dimensions.
        assert!(names.contains(&"blit_tex_rgba8888_800x480".to_string()));
    }
}
