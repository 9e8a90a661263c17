// src/streaming/mod.rs

//! Multi-buffered CPU-to-GPU texture streaming.
//!
//! Every frame the CPU fills one buffer of a ring while the GPU samples the
//! one filled the frame before. The ring is `buffers` deep; how a filled
//! buffer becomes texture data is the `StreamingMethod`:
//!
//! - `TextureUpload`: heap buffer, synchronous texture upload.
//! - `ShmImage`: shared-memory image put asynchronously into a pixmap that
//!   is bound as a texture; completion events gate reuse of a buffer.
//! - `LockSurface`: the texture is backed by a pixmap whose surface is
//!   locked for writing and unlocked to publish.

pub mod backend;
pub mod ring;

#[cfg(test)]
mod tests;

use crate::benchmark::{
    require, require_entry_points, BlitGeometry, Blitter, Benchmark, Context, PrepareError,
};
use crate::device::{
    Capabilities, DeviceError, DeviceResult, PixelBuffer, PixelFormat, TextureFilter, TextureId,
};
use backend::{Backend, LockState, ShmState, UploadState};
use log::{debug, warn};
use ring::RingCursor;
use thiserror::Error;

/// Extension functions the lock-surface method calls.
pub const LOCK_SURFACE_ENTRY_POINTS: &[&str] = &[
    "eglLockSurfaceKHR",
    "eglUnlockSurfaceKHR",
    "eglCreateImageKHR",
    "eglDestroyImageKHR",
    "glEGLImageTargetTexture2DOES",
];

/// Queries the locked bitmap's address on targets wider than `EGLint`.
pub const WIDE_POINTER_QUERY: &str = "eglQuerySurface64KHR";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamingError {
    #[error("a streaming ring needs at least two buffers, got {0}")]
    TooFewBuffers(usize),
    #[error("cannot stream {0} bits per pixel")]
    UnsupportedDepth(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingMethod {
    TextureUpload,
    ShmImage,
    LockSurface,
}

impl StreamingMethod {
    pub fn name(self) -> &'static str {
        match self {
            StreamingMethod::TextureUpload => "texupload",
            StreamingMethod::ShmImage => "shmimage",
            StreamingMethod::LockSurface => "locksurf",
        }
    }
}

/// A validated streaming setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingConfig {
    pub method: StreamingMethod,
    pub buffers: usize,
    pub bits_per_pixel: u32,
    pub width: u32,
    pub height: u32,
}

impl StreamingConfig {
    pub fn new(
        method: StreamingMethod,
        buffers: usize,
        bits_per_pixel: u32,
        width: u32,
        height: u32,
    ) -> Result<Self, StreamingError> {
        if buffers < 2 {
            return Err(StreamingError::TooFewBuffers(buffers));
        }
        if PixelFormat::for_depth(bits_per_pixel).is_none() {
            return Err(StreamingError::UnsupportedDepth(bits_per_pixel));
        }
        Ok(StreamingConfig {
            method,
            buffers,
            bits_per_pixel,
            width,
            height,
        })
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bits_per_pixel as usize / 8
    }

    /// Texture format matching the buffer layout.
    pub fn format(&self) -> PixelFormat {
        match self.bits_per_pixel {
            32 => PixelFormat::Rgba8888,
            _ => PixelFormat::Rgb565,
        }
    }
}

/// Writes the moving stripe pattern for `frame`: a pixel is all ones when
/// bit 4 of `x + y + frame` is set, zero otherwise.
pub fn fill_pattern(buf: &mut PixelBuffer<'_>, frame: u64) {
    let bpp = buf.bytes_per_pixel();
    for y in 0..buf.height() {
        let row = buf.row_mut(y);
        for (x, pixel) in row.chunks_exact_mut(bpp).enumerate() {
            let lit = (x as u64 + u64::from(y) + frame) & 0x10 != 0;
            pixel.fill(if lit { 0xff } else { 0 });
        }
    }
}

/// Streams a procedurally filled buffer into a texture every frame and
/// blits it.
#[derive(Debug)]
pub struct StreamingBenchmark {
    config: StreamingConfig,
    ring: RingCursor,
    blitter: Blitter,
    textures: Vec<TextureId>,
    backend: Option<Backend>,
}

impl StreamingBenchmark {
    pub fn new(config: StreamingConfig) -> Result<Self, StreamingError> {
        Ok(StreamingBenchmark {
            ring: RingCursor::new(config.buffers)?,
            config,
            blitter: Blitter::new(BlitGeometry::default()),
            textures: Vec::new(),
            backend: None,
        })
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn write_index(&self) -> usize {
        self.ring.write()
    }

    pub fn read_index(&self) -> usize {
        self.ring.read()
    }

    pub fn textures(&self) -> &[TextureId] {
        &self.textures
    }

    pub fn backend(&self) -> Option<&Backend> {
        self.backend.as_ref()
    }

    fn check_capabilities(&self, ctx: &Context<'_>) -> Result<(), PrepareError> {
        let device = &*ctx.device;
        match self.config.method {
            StreamingMethod::TextureUpload => Ok(()),
            StreamingMethod::ShmImage => require(
                device,
                Capabilities::SHM_IMAGE | Capabilities::TEXTURE_FROM_PIXMAP,
            ),
            StreamingMethod::LockSurface => {
                require(device, Capabilities::LOCK_SURFACE)?;
                require(
                    device,
                    Capabilities::IMAGE_BASE
                        | Capabilities::IMAGE_PIXMAP
                        | Capabilities::IMAGE_TEXTURE,
                )?;
                require_entry_points(device, LOCK_SURFACE_ENTRY_POINTS)?;
                if usize::BITS > 32 {
                    require_entry_points(device, &[WIDE_POINTER_QUERY])?;
                }
                Ok(())
            }
        }
    }

    fn build(&mut self, ctx: &mut Context<'_>) -> DeviceResult<()> {
        self.blitter.prepare(ctx)?;
        for _ in 0..self.config.buffers {
            self.textures
                .push(ctx.device.create_texture(TextureFilter::Nearest)?);
        }
        let backend = match self.config.method {
            StreamingMethod::TextureUpload => Backend::Upload(UploadState::new(&self.config)),
            StreamingMethod::ShmImage => {
                Backend::Shm(ShmState::build(ctx, &self.config, &self.textures)?)
            }
            StreamingMethod::LockSurface => {
                Backend::LockSurface(LockState::build(ctx, &self.config, &self.textures)?)
            }
        };
        self.backend = Some(backend);
        ctx.device.check_error("streaming setup")
    }

    fn release(&mut self, ctx: &mut Context<'_>) -> DeviceResult<()> {
        let backend_result = match self.backend.take() {
            Some(backend) => backend.release(ctx),
            None => Ok(()),
        };
        ctx.device.bind_texture(0, None);
        for texture in self.textures.drain(..) {
            ctx.device.delete_texture(texture);
        }
        let blitter_result = self.blitter.teardown(ctx);
        backend_result.and(blitter_result)
    }
}

impl Benchmark for StreamingBenchmark {
    fn name(&self) -> String {
        format!(
            "blit_cpu_{}_{}bpp_{}x{}x{}",
            self.config.method.name(),
            self.config.bits_per_pixel,
            self.config.buffers,
            self.config.width,
            self.config.height
        )
    }

    fn prepare(&mut self, ctx: &mut Context<'_>) -> Result<(), PrepareError> {
        self.check_capabilities(ctx)?;
        self.ring = RingCursor::new(self.config.buffers).map_err(|e| {
            DeviceError::Invariant(e.to_string())
        })?;
        if let Err(err) = self.build(ctx) {
            if let Err(cleanup) = self.release(ctx) {
                warn!("Cleanup after failed prepare: {}", cleanup);
            }
            return Err(err.into());
        }
        debug!("Prepared {}", self.name());
        Ok(())
    }

    fn render(&mut self, ctx: &mut Context<'_>, frame: u64) -> DeviceResult<()> {
        let (write, read) = (self.ring.write(), self.ring.read());
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| DeviceError::Invariant("streaming before prepare".into()))?;
        backend.stream(ctx, &self.config, &self.textures, write, read, frame)?;

        ctx.device.bind_texture(0, Some(self.textures[read]));
        self.ring.advance();
        self.blitter.draw(ctx)
    }

    fn teardown(&mut self, ctx: &mut Context<'_>) -> DeviceResult<()> {
        self.release(ctx)
    }
}
