// src/benchmark/blit.rs

//! Textured-quad blits.
//!
//! `Blitter` is the shared piece: one program sampling unit 0 and the quad
//! geometry. Every texture-based benchmark (static, pixmap, framebuffer,
//! streaming) draws through one.

use super::{require, Benchmark, Context, Layer, PrepareError};
use crate::device::{
    BlendMode, DeviceResult, PixelFormat, ProgramId, Quad, TextureFilter, TextureId,
};
use log::{debug, warn};

pub const BLIT_VERTEX_SHADER: &str = "\
precision mediump float;
attribute vec2 in_position;
attribute vec2 in_texcoord;
varying vec2 texcoord;

void main()
{
    gl_Position = vec4(in_position, 0.0, 1.0);
    texcoord = in_texcoord;
}
";

pub const BLIT_FRAGMENT_SHADER: &str = "\
precision mediump float;
varying vec2 texcoord;
uniform sampler2D texture;

void main()
{
    gl_FragColor = texture2D(texture, texcoord);
}
";

pub const BLIT_CLEAR_COLOR: [f32; 4] = [0.2, 0.4, 0.6, 1.0];

/// Texture and quad extents of a blit.
///
/// `tex_w`/`tex_h` scale the texture coordinates (values above 1 tile the
/// texture), `quad_w`/`quad_h` scale the quad in normalized device
/// coordinates. `rotate` maps the texture rotated by 90 degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlitGeometry {
    pub tex_w: f32,
    pub tex_h: f32,
    pub quad_w: f32,
    pub quad_h: f32,
    pub rotate: bool,
}

impl Default for BlitGeometry {
    fn default() -> Self {
        BlitGeometry {
            tex_w: 1.0,
            tex_h: 1.0,
            quad_w: 1.0,
            quad_h: 1.0,
            rotate: false,
        }
    }
}

impl BlitGeometry {
    pub fn rotated(mut self, rotate: bool) -> Self {
        self.rotate = rotate;
        self
    }

    pub fn texture_scale(mut self, tex_w: f32, tex_h: f32) -> Self {
        self.tex_w = tex_w;
        self.tex_h = tex_h;
        self
    }

    pub fn quad_scale(mut self, quad_w: f32, quad_h: f32) -> Self {
        self.quad_w = quad_w;
        self.quad_h = quad_h;
        self
    }

    pub fn quad(&self) -> Quad {
        let (tw, th) = (self.tex_w, self.tex_h);
        let (qw, qh) = (self.quad_w, self.quad_h);
        let texcoords = if self.rotate {
            [[tw, 0.0], [0.0, 0.0], [tw, th], [0.0, th]]
        } else {
            [[0.0, th], [0.0, 0.0], [tw, th], [tw, 0.0]]
        };
        Quad {
            positions: [[-qw, -qh], [-qw, qh], [qw, -qh], [qw, qh]],
            texcoords,
        }
    }

    /// Same extents with the vertical texture axis flipped.
    pub fn flipped_quad(&self) -> Quad {
        let mut quad = self.quad();
        quad.texcoords = [
            [0.0, 0.0],
            [0.0, self.tex_h],
            [self.tex_w, 0.0],
            [self.tex_w, self.tex_h],
        ];
        quad
    }
}

/// The blit program plus geometry.
#[derive(Debug)]
pub struct Blitter {
    geometry: BlitGeometry,
    program: Option<ProgramId>,
}

impl Blitter {
    pub fn new(geometry: BlitGeometry) -> Self {
        Blitter {
            geometry,
            program: None,
        }
    }

    pub fn geometry(&self) -> &BlitGeometry {
        &self.geometry
    }

    pub fn prepare(&mut self, ctx: &mut Context<'_>) -> DeviceResult<()> {
        let program = ctx
            .device
            .create_program(BLIT_VERTEX_SHADER, BLIT_FRAGMENT_SHADER)?;
        ctx.device.use_program(Some(program));
        ctx.device.set_uniform_i32(program, "texture", 0);
        ctx.device.set_clear_color(BLIT_CLEAR_COLOR);
        self.program = Some(program);
        ctx.device.check_error("blitter setup")
    }

    /// Clears the frame and draws the quad with whatever texture is bound
    /// to unit 0.
    pub fn draw(&self, ctx: &mut Context<'_>) -> DeviceResult<()> {
        ctx.device.use_program(self.program);
        ctx.device.clear();
        ctx.device.draw_quad(&self.geometry.quad());
        Ok(())
    }

    /// Draws the quad over the current frame.
    pub fn draw_layer(&self, ctx: &mut Context<'_>) -> DeviceResult<()> {
        ctx.device.use_program(self.program);
        ctx.device.draw_quad(&self.geometry.quad());
        Ok(())
    }

    pub fn teardown(&mut self, ctx: &mut Context<'_>) -> DeviceResult<()> {
        ctx.device.use_program(None);
        if let Some(program) = self.program.take() {
            ctx.device.delete_program(program);
        }
        ctx.device.check_error("blitter teardown")
    }
}

/// Blit of a static texture loaded from an asset.
#[derive(Debug)]
pub struct BlitBenchmark {
    format: PixelFormat,
    width: u32,
    height: u32,
    asset: String,
    blend: bool,
    blitter: Blitter,
    texture: Option<TextureId>,
}

impl BlitBenchmark {
    pub fn new(format: PixelFormat, width: u32, height: u32, asset: impl Into<String>) -> Self {
        BlitBenchmark {
            format,
            width,
            height,
            asset: asset.into(),
            blend: false,
            blitter: Blitter::new(BlitGeometry::default()),
            texture: None,
        }
    }

    pub fn with_geometry(mut self, geometry: BlitGeometry) -> Self {
        self.blitter = Blitter::new(geometry);
        self
    }

    /// Draw with source-over blending.
    pub fn blended(mut self) -> Self {
        self.blend = true;
        self
    }

    fn release(&mut self, ctx: &mut Context<'_>) -> DeviceResult<()> {
        if let Some(texture) = self.texture.take() {
            ctx.device.bind_texture(0, None);
            ctx.device.delete_texture(texture);
        }
        self.blitter.teardown(ctx)
    }

    fn load(&mut self, ctx: &mut Context<'_>) -> Result<(), PrepareError> {
        self.blitter.prepare(ctx)?;
        let texture = ctx.device.create_texture(TextureFilter::Nearest)?;
        self.texture = Some(texture);
        ctx.device.bind_texture(0, Some(texture));
        let pixels = ctx
            .assets
            .load(&self.asset, self.width, self.height, self.format)?;
        ctx.device
            .upload_texture(self.format, self.width, self.height, Some(&pixels))?;
        ctx.device.check_error("texture upload")?;
        Ok(())
    }
}

impl Benchmark for BlitBenchmark {
    fn name(&self) -> String {
        let rot = if self.blitter.geometry().rotate {
            "rot90_"
        } else {
            ""
        };
        format!(
            "blit_tex_{}{}_{}x{}",
            rot,
            self.format.name(),
            self.width,
            self.height
        )
    }

    fn prepare(&mut self, ctx: &mut Context<'_>) -> Result<(), PrepareError> {
        if let Some(cap) = self.format.required_capability() {
            require(&*ctx.device, cap)?;
        }
        if let Err(err) = self.load(ctx) {
            if let Err(cleanup) = self.release(ctx) {
                warn!("Cleanup after failed prepare: {}", cleanup);
            }
            return Err(err);
        }
        if self.blend {
            ctx.device.set_blend(BlendMode::SourceOver);
        }
        debug!("Prepared {}", self.name());
        Ok(())
    }

    fn render(&mut self, ctx: &mut Context<'_>, _frame: u64) -> DeviceResult<()> {
        ctx.device.bind_texture(0, self.texture);
        self.blitter.draw(ctx)
    }

    fn teardown(&mut self, ctx: &mut Context<'_>) -> DeviceResult<()> {
        if self.blend {
            ctx.device.set_blend(BlendMode::Opaque);
        }
        self.release(ctx)
    }
}

impl Layer for BlitBenchmark {
    fn draw_layer(&mut self, ctx: &mut Context<'_>, _frame: u64) -> DeviceResult<()> {
        ctx.device.bind_texture(0, self.texture);
        self.blitter.draw_layer(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::SyntheticAssets;
    use crate::device::headless::DeviceCall;
    use crate::device::{Capabilities, DeviceError, GraphicsDevice, HeadlessDevice};
    use test_log::test;

    #[test]
    fn test_blit_names() {
        let plain = BlitBenchmark::new(PixelFormat::Rgb565, 800, 480, "a.raw");
        assert_eq!(plain.name(), "blit_tex_rgb565_800x480");
        let rotated = BlitBenchmark::new(PixelFormat::Etc1, 512, 1024, "b.raw")
            .with_geometry(BlitGeometry::default().rotated(true));
        assert_eq!(rotated.name(), "blit_tex_rot90_rgb_etc1_512x1024");
    }

    #[test]
    fn test_quad_texcoords() {
        let geometry = BlitGeometry::default().texture_scale(0.5, 0.25);
        assert_eq!(
            geometry.quad().texcoords,
            [[0.0, 0.25], [0.0, 0.0], [0.5, 0.25], [0.5, 0.0]]
        );
        assert_eq!(
            geometry.rotated(true).quad().texcoords,
            [[0.5, 0.0], [0.0, 0.0], [0.5, 0.25], [0.0, 0.25]]
        );
        let quad = BlitGeometry::default().quad_scale(0.5, 2.0).quad();
        assert_eq!(quad.positions[3], [0.5, 2.0]);
    }

    #[test]
    fn test_blit_prepare_render_teardown_releases_everything() {
        let mut device = HeadlessDevice::recording(800, 480);
        let assets = SyntheticAssets;
        let mut ctx = Context::new(&mut device, &assets);
        let mut blit = BlitBenchmark::new(PixelFormat::Rgba8888, 64, 32, "x.raw");

        blit.prepare(&mut ctx).unwrap();
        let name = blit.name();
        for frame in 0..3 {
            blit.render(&mut ctx, frame).unwrap();
            assert_eq!(blit.name(), name);
        }
        blit.teardown(&mut ctx).unwrap();
        drop(ctx);

        assert_eq!(device.live_resources(), 0);
        let draws = device
            .calls()
            .iter()
            .filter(|c| matches!(c, DeviceCall::DrawQuad { texture: Some(_), .. }))
            .count();
        assert_eq!(draws, 3);
    }

    #[test]
    fn test_failed_prepare_reports_setup_error_over_cleanup_error() {
        let mut device = HeadlessDevice::recording(800, 480).with_texture_limit(0);
        // Setup passes its check; the cleanup check then fails.
        device.inject_error_at(
            1,
            DeviceError::Gl {
                call: "glDeleteProgram",
                code: 0x0502,
            },
        );
        let assets = SyntheticAssets;
        let mut ctx = Context::new(&mut device, &assets);
        let mut blit = BlitBenchmark::new(PixelFormat::Rgba8888, 64, 32, "x.raw");

        let err = blit.prepare(&mut ctx).unwrap_err();
        assert!(matches!(err, PrepareError::Device(DeviceError::Resource(_))));
        assert!(!err.is_fatal());
        drop(ctx);
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn test_compressed_blit_skipped_without_extension() {
        let mut device =
            HeadlessDevice::recording(800, 480).with_capabilities(Capabilities::COMPRESSED_PVRTC);
        let assets = SyntheticAssets;
        let mut ctx = Context::new(&mut device, &assets);
        let mut blit = BlitBenchmark::new(PixelFormat::Etc1, 128, 128, "x.raw");

        let err = blit.prepare(&mut ctx).unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(
            err.to_string(),
            "GL_OES_compressed_ETC1_RGB8_texture not supported"
        );
        drop(ctx);
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn test_blended_blit_restores_blend_state() {
        let mut device = HeadlessDevice::recording(800, 480);
        let assets = SyntheticAssets;
        let mut ctx = Context::new(&mut device, &assets);
        let mut blit = BlitBenchmark::new(PixelFormat::Rgba4444, 128, 128, "x.raw").blended();

        blit.prepare(&mut ctx).unwrap();
        blit.render(&mut ctx, 0).unwrap();
        blit.teardown(&mut ctx).unwrap();
        drop(ctx);
        assert_eq!(device.blend_mode(), BlendMode::Opaque);
        assert_eq!(device.surface_size(), (800, 480));
    }
}
