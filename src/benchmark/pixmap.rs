// src/benchmark/pixmap.rs

//! Blit of a native pixmap bound as a texture (texture-from-pixmap).

use super::blit::{BlitGeometry, Blitter};
use super::{require, Benchmark, Context, Layer, PrepareError};
use crate::device::{
    Capabilities, DeviceResult, PixelBuffer, PixmapId, SurfaceId, TextureFilter, TextureId,
};
use log::{debug, warn};

#[derive(Debug)]
pub struct PixmapBenchmark {
    width: u32,
    height: u32,
    depth: u32,
    blitter: Blitter,
    texture: Option<TextureId>,
    pixmap: Option<PixmapId>,
    surface: Option<SurfaceId>,
}

/// `x ^ y` in every pixel, truncated to the pixel size.
fn fill_xor(buf: &mut PixelBuffer<'_>) {
    let bpp = buf.bytes_per_pixel();
    for y in 0..buf.height() {
        for (x, pixel) in buf.row_mut(y).chunks_exact_mut(bpp).enumerate() {
            let value = x as u32 ^ y;
            match bpp {
                2 => pixel.copy_from_slice(&(value as u16).to_ne_bytes()),
                _ => pixel.copy_from_slice(&value.to_ne_bytes()[..bpp]),
            }
        }
    }
}

impl PixmapBenchmark {
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        PixmapBenchmark {
            width,
            height,
            depth,
            blitter: Blitter::new(BlitGeometry::default()),
            texture: None,
            pixmap: None,
            surface: None,
        }
    }

    pub fn with_geometry(mut self, geometry: BlitGeometry) -> Self {
        self.blitter = Blitter::new(geometry);
        self
    }

    fn build(&mut self, ctx: &mut Context<'_>) -> DeviceResult<()> {
        self.blitter.prepare(ctx)?;
        let texture = ctx.device.create_texture(TextureFilter::Nearest)?;
        self.texture = Some(texture);
        let pixmap = ctx
            .device
            .create_pixmap(self.width, self.height, self.depth)?;
        self.pixmap = Some(pixmap);
        ctx.device.write_pixmap(pixmap, &mut fill_xor)?;
        ctx.device.bind_texture(0, Some(texture));
        self.surface = Some(ctx.device.bind_pixmap_texture(pixmap, self.depth, texture)?);
        ctx.device.check_error("pixmap bind")
    }

    fn release(&mut self, ctx: &mut Context<'_>) -> DeviceResult<()> {
        if let Some(surface) = self.surface.take() {
            ctx.device.destroy_surface(surface);
        }
        if let Some(pixmap) = self.pixmap.take() {
            ctx.device.destroy_pixmap(pixmap);
        }
        if let Some(texture) = self.texture.take() {
            ctx.device.bind_texture(0, None);
            ctx.device.delete_texture(texture);
        }
        self.blitter.teardown(ctx)
    }
}

impl Benchmark for PixmapBenchmark {
    fn name(&self) -> String {
        let rot = if self.blitter.geometry().rotate {
            "rot90_"
        } else {
            ""
        };
        format!(
            "blit_pixmap_{}{}bpp_{}x{}",
            rot, self.depth, self.width, self.height
        )
    }

    fn prepare(&mut self, ctx: &mut Context<'_>) -> Result<(), PrepareError> {
        require(&*ctx.device, Capabilities::TEXTURE_FROM_PIXMAP)?;
        if let Err(err) = self.build(ctx) {
            if let Err(cleanup) = self.release(ctx) {
                warn!("Cleanup after failed prepare: {}", cleanup);
            }
            return Err(err.into());
        }
        debug!("Prepared {}", self.name());
        Ok(())
    }

    fn render(&mut self, ctx: &mut Context<'_>, _frame: u64) -> DeviceResult<()> {
        ctx.device.bind_texture(0, self.texture);
        self.blitter.draw(ctx)
    }

    fn teardown(&mut self, ctx: &mut Context<'_>) -> DeviceResult<()> {
        self.release(ctx)
    }
}

impl Layer for PixmapBenchmark {
    fn draw_layer(&mut self, ctx: &mut Context<'_>, _frame: u64) -> DeviceResult<()> {
        ctx.device.bind_texture(0, self.texture);
        self.blitter.draw_layer(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::SyntheticAssets;
    use crate::device::HeadlessDevice;
    use test_log::test;

    #[test]
    fn test_pixmap_name_reports_depth() {
        assert_eq!(
            PixmapBenchmark::new(800, 480, 16).name(),
            "blit_pixmap_16bpp_800x480"
        );
        let rotated = PixmapBenchmark::new(480, 800, 32)
            .with_geometry(BlitGeometry::default().rotated(true));
        assert_eq!(rotated.name(), "blit_pixmap_rot90_32bpp_480x800");
    }

    #[test]
    fn test_pixmap_filled_with_xor_pattern() {
        let mut device = HeadlessDevice::recording(800, 480);
        let assets = SyntheticAssets;
        let mut ctx = Context::new(&mut device, &assets);
        let mut bench = PixmapBenchmark::new(4, 4, 32);

        bench.prepare(&mut ctx).unwrap();
        let pixmap = bench.pixmap.unwrap();
        drop(ctx);

        let data = device.pixmap_data(pixmap).unwrap();
        // Row 1, column 3: 1 ^ 3 = 2.
        let offset = 16 + 3 * 4;
        assert_eq!(&data[offset..offset + 4], &2u32.to_ne_bytes());

        let mut ctx = Context::new(&mut device, &assets);
        bench.teardown(&mut ctx).unwrap();
        drop(ctx);
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn test_pixmap_skipped_without_texture_from_pixmap() {
        let mut device = HeadlessDevice::recording(800, 480)
            .with_capabilities(Capabilities::SHM_IMAGE);
        let assets = SyntheticAssets;
        let mut ctx = Context::new(&mut device, &assets);
        let err = PixmapBenchmark::new(8, 8, 16).prepare(&mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "EGL_NOKIA_texture_from_pixmap not supported");
    }
}
