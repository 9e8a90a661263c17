// src/benchmark/fbo.rs

//! Blit of a texture that was rendered into through a framebuffer object.

use super::blit::{BlitGeometry, Blitter, BLIT_CLEAR_COLOR};
use super::{Benchmark, Context, PrepareError};
use crate::device::{
    DeviceResult, FramebufferId, PixelFormat, Rect, TextureFilter, TextureId,
};
use log::{debug, warn};

#[derive(Debug)]
pub struct FboBenchmark {
    format: PixelFormat,
    width: u32,
    height: u32,
    depth: bool,
    blitter: Blitter,
    texture: Option<TextureId>,
    framebuffer: Option<FramebufferId>,
}

impl FboBenchmark {
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        FboBenchmark {
            format,
            width,
            height,
            depth: false,
            blitter: Blitter::new(BlitGeometry::default()),
            texture: None,
            framebuffer: None,
        }
    }

    pub fn with_geometry(mut self, geometry: BlitGeometry) -> Self {
        self.blitter = Blitter::new(geometry);
        self
    }

    /// Attach a 16-bit depth buffer to the framebuffer.
    pub fn with_depth(mut self) -> Self {
        self.depth = true;
        self
    }

    /// Horizontal red ramp, one scissored clear per column.
    fn fill(&self, ctx: &mut Context<'_>) {
        let saved = ctx.device.viewport();
        ctx.device
            .set_viewport(Rect::new(0, 0, self.width, self.height));
        for column in 0..self.width {
            ctx.device
                .set_scissor(Some(Rect::new(column as i32, 0, 1, self.height)));
            ctx.device
                .set_clear_color([column as f32 / self.width as f32, 0.0, 0.0, 1.0]);
            ctx.device.clear();
        }
        ctx.device.set_scissor(None);
        ctx.device.set_viewport(saved);
        ctx.device.set_clear_color(BLIT_CLEAR_COLOR);
    }

    fn build(&mut self, ctx: &mut Context<'_>) -> DeviceResult<()> {
        self.blitter.prepare(ctx)?;
        let texture = ctx.device.create_texture(TextureFilter::Nearest)?;
        self.texture = Some(texture);
        ctx.device.bind_texture(0, Some(texture));
        ctx.device
            .upload_texture(self.format, self.width, self.height, None)?;

        let depth = self.depth.then_some((self.width, self.height));
        let framebuffer = ctx.device.create_framebuffer(texture, depth)?;
        self.framebuffer = Some(framebuffer);
        ctx.device.bind_framebuffer(Some(framebuffer));
        self.fill(ctx);
        ctx.device.bind_framebuffer(None);
        ctx.device.check_error("framebuffer fill")
    }

    fn release(&mut self, ctx: &mut Context<'_>) -> DeviceResult<()> {
        if let Some(framebuffer) = self.framebuffer.take() {
            ctx.device.delete_framebuffer(framebuffer);
        }
        if let Some(texture) = self.texture.take() {
            ctx.device.bind_texture(0, None);
            ctx.device.delete_texture(texture);
        }
        self.blitter.teardown(ctx)
    }
}

impl Benchmark for FboBenchmark {
    fn name(&self) -> String {
        let rot = if self.blitter.geometry().rotate {
            "rot90_"
        } else {
            ""
        };
        format!(
            "blit_fbo_{}{}_{}x{}",
            rot,
            self.format.name(),
            self.width,
            self.height
        )
    }

    fn prepare(&mut self, ctx: &mut Context<'_>) -> Result<(), PrepareError> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::SyntheticAssets;
    use crate::device::headless::DeviceCall;
    use crate::device::HeadlessDevice;
    use test_log::test;

    #[test]
    fn test_fbo_fill_clears_every_column() {
        let mut device = HeadlessDevice::recording(800, 480);
        let assets = SyntheticAssets;
        let mut ctx = Context::new(&mut device, &assets);
        let mut fbo = FboBenchmark::new(PixelFormat::Rgb565, 16, 8).with_depth();

        fbo.prepare(&mut ctx).unwrap();
        drop(ctx);

        let scissors = device
            .calls()
            .iter()
            .filter(|c| matches!(c, DeviceCall::SetScissor(Some(_))))
            .count();
        assert_eq!(scissors, 16);
        assert!(device
            .calls()
            .contains(&DeviceCall::SetClearColor([0.5, 0.0, 0.0, 1.0])));
        assert_eq!(device.calls().last(), Some(&DeviceCall::BindFramebuffer(None)));

        let mut ctx = Context::new(&mut device, &assets);
        fbo.teardown(&mut ctx).unwrap();
        drop(ctx);
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn test_fbo_names() {
        let fbo = FboBenchmark::new(PixelFormat::Rgba8888, 1024, 512)
            .with_geometry(BlitGeometry::default().rotated(true));
        assert_eq!(fbo.name(), "blit_fbo_rot90_rgba8888_1024x512");
    }
}
