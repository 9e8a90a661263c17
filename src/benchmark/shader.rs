// src/benchmark/shader.rs

//! Full-screen fragment shader effects.

use super::blit::{BlitGeometry, BLIT_CLEAR_COLOR, BLIT_VERTEX_SHADER};
use super::{require, Benchmark, Context, PrepareError};
use crate::device::{
    BlendMode, Capabilities, DeviceError, DeviceResult, FramebufferId, PixelFormat, ProgramId,
    Rect, TextureFilter, TextureId,
};
use log::{debug, warn};

const CONST_FRAGMENT_SHADER: &str = "\
precision lowp float;

void main()
{
    gl_FragColor = vec4(1.0, 0.0, 0.0, 1.0);
}
";

const LINEAR_GRADIENT_FRAGMENT_SHADER: &str = "\
precision lowp float;
varying vec2 texcoord;

void main()
{
    gl_FragColor = vec4(texcoord.x, 0.0, 0.0, 1.0);
}
";

const RADIAL_GRADIENT_FRAGMENT_SHADER: &str = "\
precision mediump float;
varying vec2 texcoord;

void main()
{
    float t = 1.0 - distance(texcoord, vec2(0.5, 0.5)) * 2.0;
    gl_FragColor = vec4(0.0, t, 0.0, 1.0);
}
";

const PALETTE_FRAGMENT_SHADER: &str = "\
precision mediump float;
varying vec2 texcoord;
uniform sampler2D texture;
uniform sampler2D paletteTexture;

void main()
{
    float index = texture2D(texture, texcoord).a;
    gl_FragColor = texture2D(paletteTexture, vec2(index, 0.0));
}
";

const MASK_FRAGMENT_SHADER: &str = "\
precision mediump float;
varying vec2 texcoord;
uniform sampler2D texture;

void main()
{
    float mask   = texture2D(texture, texcoord).g;
    vec4 color   = texture2D(texture, texcoord + vec2(0, 64.0 / 128.0));
    gl_FragColor = vec4(color.rgb, mask);
}
";

const BLUR_VERTEX_SHADER: &str = "\
precision mediump float;
attribute vec2 in_position;
attribute vec2 in_texcoord;
uniform vec2 texoffsets[5];
varying lowp vec2 texcoord0;
varying lowp vec2 texcoord1;
varying lowp vec2 texcoord2;
varying lowp vec2 texcoord3;
varying lowp vec2 texcoord4;

void main()
{
    gl_Position = vec4(in_position, 0.0, 1.0);
    texcoord0 = in_texcoord + texoffsets[0];
    texcoord1 = in_texcoord + texoffsets[1];
    texcoord2 = in_texcoord + texoffsets[2];
    texcoord3 = in_texcoord + texoffsets[3];
    texcoord4 = in_texcoord + texoffsets[4];
}
";

const BLUR_FRAGMENT_SHADER: &str = "\
precision mediump float;
varying lowp vec2 texcoord0;
varying lowp vec2 texcoord1;
varying lowp vec2 texcoord2;
varying lowp vec2 texcoord3;
varying lowp vec2 texcoord4;
uniform sampler2D texture;

void main()
{
    lowp vec3 color = vec3(0.0, 0.0, 0.0);
    color += texture2D(texture, texcoord0).rgb * 0.078184;
    color += texture2D(texture, texcoord1).rgb * 0.225492;
    color += texture2D(texture, texcoord2).rgb * 0.392649;
    color += texture2D(texture, texcoord3).rgb * 0.225492;
    color += texture2D(texture, texcoord4).rgb * 0.078184;
    gl_FragColor = vec4(color, 1.0);
}
";

const MASK_ASSET: (&str, u32, u32) = ("xorg-colormask_128x256_etc1.raw", 128, 256);
const BLUR_ASSET: (&str, u32, u32) = ("blur_1024x512_etc1.raw", 1024, 512);
const BLUR_DOWNSAMPLE: u32 = 4;
const BLUR_PASSES: usize = 2;

/// Gaussian tap offsets, in source texels scaled by the downsample factor.
fn blur_offsets(horizontal: bool) -> [[f32; 2]; 5] {
    let s = BLUR_DOWNSAMPLE as f32;
    let taps = if horizontal {
        [-0.001953, -0.000977, 0.0, 0.000977, 0.001953]
    } else {
        [-0.003906, -0.001953, 0.0, 0.001953, 0.003906]
    };
    taps.map(|t| if horizontal { [t * s, 0.0] } else { [0.0, t * s] })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderEffect {
    /// Constant color.
    Const,
    /// Horizontal gradient from the texture coordinate.
    LinearGradient,
    /// Distance-from-center gradient.
    RadialGradient,
    /// 8-bit index texture looked up in a 256-entry palette.
    Palette,
    /// Color and alpha mask sampled from two halves of one ETC1 texture.
    Mask,
    /// Separable gaussian blur, ping-ponged through two downsampled
    /// framebuffers.
    Blur,
}

impl ShaderEffect {
    pub fn name(self) -> &'static str {
        match self {
            ShaderEffect::Const => "const",
            ShaderEffect::LinearGradient => "lingrad",
            ShaderEffect::RadialGradient => "radgrad",
            ShaderEffect::Palette => "palette",
            ShaderEffect::Mask => "mask",
            ShaderEffect::Blur => "blur",
        }
    }

    fn sources(self) -> (&'static str, &'static str) {
        match self {
            ShaderEffect::Const => (BLIT_VERTEX_SHADER, CONST_FRAGMENT_SHADER),
            ShaderEffect::LinearGradient => (BLIT_VERTEX_SHADER, LINEAR_GRADIENT_FRAGMENT_SHADER),
            ShaderEffect::RadialGradient => (BLIT_VERTEX_SHADER, RADIAL_GRADIENT_FRAGMENT_SHADER),
            ShaderEffect::Palette => (BLIT_VERTEX_SHADER, PALETTE_FRAGMENT_SHADER),
            ShaderEffect::Mask => (BLIT_VERTEX_SHADER, MASK_FRAGMENT_SHADER),
            ShaderEffect::Blur => (BLUR_VERTEX_SHADER, BLUR_FRAGMENT_SHADER),
        }
    }
}

#[derive(Debug)]
pub struct ShaderBenchmark {
    effect: ShaderEffect,
    width: u32,
    height: u32,
    geometry: BlitGeometry,
    blend: bool,
    program: Option<ProgramId>,
    secondary: Option<ProgramId>,
    source: Option<TextureId>,
    palette: Option<TextureId>,
    targets: Vec<TextureId>,
    framebuffers: Vec<FramebufferId>,
}

impl ShaderBenchmark {
    pub fn new(effect: ShaderEffect, width: u32, height: u32) -> Self {
        let mut geometry = BlitGeometry::default();
        if effect == ShaderEffect::Blur {
            let (_, tex_w, tex_h) = BLUR_ASSET;
            geometry = geometry.texture_scale(
                width as f32 / tex_w as f32,
                height as f32 / tex_h as f32,
            );
        }
        ShaderBenchmark {
            effect,
            width,
            height,
            geometry,
            blend: false,
            program: None,
            secondary: None,
            source: None,
            palette: None,
            targets: Vec::new(),
            framebuffers: Vec::new(),
        }
    }

    pub fn with_geometry(mut self, geometry: BlitGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn blended(mut self) -> Self {
        self.blend = true;
        self
    }

    fn build(&mut self, ctx: &mut Context<'_>) -> Result<(), PrepareError> {
        let (vertex, fragment) = self.effect.sources();
        let program = ctx.device.create_program(vertex, fragment)?;
        self.program = Some(program);
        ctx.device.use_program(Some(program));
        ctx.device.set_clear_color(BLIT_CLEAR_COLOR);

        match self.effect {
            ShaderEffect::Const | ShaderEffect::LinearGradient | ShaderEffect::RadialGradient => {}
            ShaderEffect::Palette => self.build_palette(ctx, program)?,
            ShaderEffect::Mask => {
                let (file, w, h) = MASK_ASSET;
                self.source = Some(load_etc1(ctx, file, w, h, TextureFilter::Nearest)?);
                ctx.device.set_uniform_i32(program, "texture", 0);
            }
            ShaderEffect::Blur => self.build_blur(ctx, program)?,
        }
        ctx.device.check_error("shader setup")?;
        Ok(())
    }

    fn build_palette(&mut self, ctx: &mut Context<'_>, program: ProgramId) -> DeviceResult<()> {
        let mut palette = Vec::with_capacity(256 * 4);
        for i in 0..256i32 {
            palette.extend_from_slice(&[i as u8, (i - 0x7f).unsigned_abs() as u8, (0xff - i) as u8, 0xff]);
        }
        let palette_texture = ctx.device.create_texture(TextureFilter::Nearest)?;
        self.palette = Some(palette_texture);
        ctx.device.bind_texture(0, Some(palette_texture));
        ctx.device
            .upload_texture(PixelFormat::Rgba8888, 256, 1, Some(&palette))?;

        let mut indices = Vec::with_capacity((self.width * self.height) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                indices.push((x ^ y) as u8);
            }
        }
        let index_texture = ctx.device.create_texture(TextureFilter::Nearest)?;
        self.source = Some(index_texture);
        ctx.device.bind_texture(0, Some(index_texture));
        ctx.device
            .upload_texture(PixelFormat::Alpha8, self.width, self.height, Some(&indices))?;

        ctx.device.set_uniform_i32(program, "texture", 0);
        ctx.device.set_uniform_i32(program, "paletteTexture", 1);
        Ok(())
    }

    fn build_blur(&mut self, ctx: &mut Context<'_>, program: ProgramId) -> Result<(), PrepareError> {
        let (file, w, h) = BLUR_ASSET;
        self.source = Some(load_etc1(ctx, file, w, h, TextureFilter::Linear)?);
        ctx.device.set_uniform_i32(program, "texture", 0);
        ctx.device
            .set_uniform_vec2_array(program, "texoffsets", &blur_offsets(true));

        let (vertex, fragment) = self.effect.sources();
        let secondary = ctx.device.create_program(vertex, fragment)?;
        self.secondary = Some(secondary);
        ctx.device.use_program(Some(secondary));
        ctx.device.set_uniform_i32(secondary, "texture", 0);
        ctx.device
            .set_uniform_vec2_array(secondary, "texoffsets", &blur_offsets(false));
        ctx.device.use_program(Some(program));

        let (down_w, down_h) = (w / BLUR_DOWNSAMPLE, h / BLUR_DOWNSAMPLE);
        for _ in 0..2 {
            let texture = ctx.device.create_texture(TextureFilter::Linear)?;
            self.targets.push(texture);
            ctx.device.bind_texture(0, Some(texture));
            ctx.device
                .upload_texture(PixelFormat::Rgb565, down_w, down_h, None)?;
            self.framebuffers
                .push(ctx.device.create_framebuffer(texture, None)?);
        }
        ctx.device.bind_framebuffer(None);
        Ok(())
    }

    fn release(&mut self, ctx: &mut Context<'_>) -> DeviceResult<()> {
        ctx.device.bind_framebuffer(None);
        for framebuffer in self.framebuffers.drain(..) {
            ctx.device.delete_framebuffer(framebuffer);
        }
        ctx.device.bind_texture(1, None);
        ctx.device.bind_texture(0, None);
        let textures = self
            .targets
            .drain(..)
            .chain(self.source.take())
            .chain(self.palette.take());
        for texture in textures {
            ctx.device.delete_texture(texture);
        }
        ctx.device.use_program(None);
        for program in self.program.take().into_iter().chain(self.secondary.take()) {
            ctx.device.delete_program(program);
        }
        ctx.device.check_error("shader teardown")
    }

    fn render_blur(&self, ctx: &mut Context<'_>) -> DeviceResult<()> {
        let (&[target0, target1], &[fb0, fb1]) = (self.targets.as_slice(), self.framebuffers.as_slice())
        else {
            return Err(DeviceError::Invariant("blur rendered before prepare".into()));
        };
        let down = Rect::new(
            0,
            0,
            self.width / BLUR_DOWNSAMPLE,
            self.height / BLUR_DOWNSAMPLE,
        );
        let full = Rect::new(0, 0, self.width, self.height);
        let quad = self.geometry.quad();
        let flipped = self.geometry.flipped_quad();

        ctx.device.use_program(self.program);
        ctx.device.bind_texture(0, self.source);
        for pass in 0..BLUR_PASSES {
            let last = pass == BLUR_PASSES - 1;

            ctx.device.bind_framebuffer(Some(fb0));
            ctx.device.set_viewport(down);
            ctx.device.clear();
            ctx.device.draw_quad(&quad);

            let second = if last {
                ctx.device.bind_framebuffer(None);
                ctx.device.set_viewport(full);
                &flipped
            } else {
                ctx.device.bind_framebuffer(Some(fb1));
                ctx.device.set_viewport(down);
                &quad
            };
            ctx.device.clear();
            ctx.device.use_program(self.secondary);
            ctx.device.bind_texture(0, Some(target0));
            ctx.device.draw_quad(second);

            ctx.device.use_program(self.program);
            let next = if last { self.source } else { Some(target1) };
            ctx.device.bind_texture(0, next);
        }
        Ok(())
    }
}

fn load_etc1(
    ctx: &mut Context<'_>,
    file: &str,
    width: u32,
    height: u32,
    filter: TextureFilter,
) -> Result<TextureId, PrepareError> {
    let texture = ctx.device.create_texture(filter)?;
    ctx.device.bind_texture(0, Some(texture));
    let data = match ctx.assets.load(file, width, height, PixelFormat::Etc1) {
        Ok(data) => data,
        Err(err) => {
            ctx.device.delete_texture(texture);
            return Err(err.into());
        }
    };
    if let Err(err) = ctx
        .device
        .upload_texture(PixelFormat::Etc1, width, height, Some(&data))
    {
        ctx.device.delete_texture(texture);
        return Err(err.into());
    }
    Ok(texture)
}

impl Benchmark for ShaderBenchmark {
    fn name(&self) -> String {
        format!(
            "blit_shader_{}_{}x{}",
            self.effect.name(),
            self.width,
            self.height
        )
    }

    fn prepare(&mut self, ctx: &mut Context<'_>) -> Result<(), PrepareError> {
        if matches!(self.effect, ShaderEffect::Mask | ShaderEffect::Blur) {
            require(&*ctx.device, Capabilities::COMPRESSED_ETC1)?;
        }
        if let Err(err) = self.build(ctx) {
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
        if self.effect == ShaderEffect::Blur {
            return self.render_blur(ctx);
        }
        ctx.device.use_program(self.program);
        if self.palette.is_some() {
            ctx.device.bind_texture(1, self.palette);
        }
        if self.source.is_some() {
            ctx.device.bind_texture(0, self.source);
        }
        ctx.device.clear();
        ctx.device.draw_quad(&self.geometry.quad());
        Ok(())
    }

    fn teardown(&mut self, ctx: &mut Context<'_>) -> DeviceResult<()> {
        if self.blend {
            ctx.device.set_blend(BlendMode::Opaque);
        }
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

    fn run_frames(bench: &mut ShaderBenchmark, device: &mut HeadlessDevice, frames: u64) {
        let assets = SyntheticAssets;
        let mut ctx = Context::new(device, &assets);
        bench.prepare(&mut ctx).unwrap();
        for frame in 0..frames {
            bench.render(&mut ctx, frame).unwrap();
        }
        bench.teardown(&mut ctx).unwrap();
    }

    #[test]
    fn test_every_effect_releases_its_resources() {
        for effect in [
            ShaderEffect::Const,
            ShaderEffect::LinearGradient,
            ShaderEffect::RadialGradient,
            ShaderEffect::Palette,
            ShaderEffect::Mask,
            ShaderEffect::Blur,
        ] {
            let mut device = HeadlessDevice::recording(800, 480);
            let mut bench = ShaderBenchmark::new(effect, 800, 480);
            run_frames(&mut bench, &mut device, 2);
            assert_eq!(device.live_resources(), 0, "{}", effect.name());
        }
    }

    #[test]
    fn test_blur_draws_two_passes_ending_on_screen() {
        let mut device = HeadlessDevice::recording(800, 480);
        let mut bench = ShaderBenchmark::new(ShaderEffect::Blur, 800, 480);
        run_frames(&mut bench, &mut device, 1);

        let calls = device.calls();
        let render_start = calls
            .iter()
            .rposition(|c| matches!(c, DeviceCall::BindFramebuffer(None)))
            .unwrap();
        let draws = calls
            .iter()
            .filter(|c| matches!(c, DeviceCall::DrawQuad { .. }))
            .count();
        assert_eq!(draws, 2 * BLUR_PASSES);
        assert!(calls[..render_start]
            .iter()
            .any(|c| *c == DeviceCall::SetViewport(Rect::new(0, 0, 800, 480))));
    }

    #[test]
    fn test_shader_names_and_capabilities() {
        assert_eq!(
            ShaderBenchmark::new(ShaderEffect::RadialGradient, 800, 480).name(),
            "blit_shader_radgrad_800x480"
        );
        let mut device = HeadlessDevice::recording(800, 480)
            .with_capabilities(Capabilities::empty());
        let assets = SyntheticAssets;
        let mut ctx = Context::new(&mut device, &assets);
        let err = ShaderBenchmark::new(ShaderEffect::Mask, 128, 128)
            .prepare(&mut ctx)
            .unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_blur_offsets_are_axis_aligned() {
        assert!(blur_offsets(true).iter().all(|o| o[1] == 0.0));
        assert!(blur_offsets(false).iter().all(|o| o[0] == 0.0));
        assert_eq!(blur_offsets(false)[4][1], 0.003906 * 4.0);
    }
}
