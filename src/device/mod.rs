// src/device/mod.rs

//! The graphics device every benchmark draws through.
//!
//! `GraphicsDevice` is the minimal set of GL/EGL/windowing primitives the
//! benchmarks need: texture upload, a textured-quad draw, framebuffer
//! objects, native pixmaps, MIT-SHM images and lockable surfaces. Drivers
//! implement it:
//!
//! - `HeadlessDevice`: in-process recording driver (dry runs and tests).
//! - `EglDevice`: X11 window + EGL context + GLES 2.0 (`cfg(use_egl_display)`).
//!
//! Resources are referred to by small copyable handles; the driver owns the
//! native objects behind them.

pub mod format;
pub mod headless;

#[cfg(use_egl_display)]
pub mod egl;

pub use format::PixelFormat;
pub use headless::HeadlessDevice;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// A texture object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// A linked shader program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

/// A framebuffer object, including its optional depth renderbuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId(pub u32);

/// A native (server-side) pixmap. Completion events are keyed by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PixmapId(pub u64);

/// A device surface created on top of a pixmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u32);

/// A host image backed by a shared-memory segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShmImageId(pub u32);

/// A device image wrapping a pixmap and bound to a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub u32);

/// Errors reported by a graphics device.
///
/// The first four variants describe something the device cannot do or could
/// not allocate; a benchmark that hits one of them is skipped. The rest mean
/// the device is in a state nothing downstream can trust.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{0} not supported")]
    Unsupported(String),
    #[error("entry point {0} unavailable")]
    MissingEntryPoint(String),
    #[error("no {0} config found")]
    NoMatchingConfig(String),
    #[error("unable to {0}")]
    Resource(String),
    #[error("GL error 0x{code:x} after {call}")]
    Gl { call: &'static str, code: u32 },
    #[error("EGL error 0x{code:x} after {call}")]
    Egl { call: &'static str, code: i32 },
    #[error("{stage} shader failed: {log}")]
    Shader { stage: &'static str, log: String },
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl DeviceError {
    /// True when the error leaves the device in an unknown state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DeviceError::Gl { .. }
                | DeviceError::Egl { .. }
                | DeviceError::Shader { .. }
                | DeviceError::Invariant(_)
        )
    }
}

bitflags! {
    /// Optional device features a benchmark may depend on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Capabilities: u32 {
        const SHM_IMAGE = 1 << 0;
        const TEXTURE_FROM_PIXMAP = 1 << 1;
        const LOCK_SURFACE = 1 << 2;
        const IMAGE_BASE = 1 << 3;
        const IMAGE_PIXMAP = 1 << 4;
        const IMAGE_TEXTURE = 1 << 5;
        const COMPRESSED_ETC1 = 1 << 6;
        const COMPRESSED_PVRTC = 1 << 7;
    }
}

/// Which extension string advertises each capability.
const EXTENSION_NAMES: &[(Capabilities, &str)] = &[
    (Capabilities::SHM_IMAGE, "MIT-SHM"),
    (Capabilities::TEXTURE_FROM_PIXMAP, "EGL_NOKIA_texture_from_pixmap"),
    (Capabilities::LOCK_SURFACE, "EGL_KHR_lock_surface2"),
    (Capabilities::IMAGE_BASE, "EGL_KHR_image_base"),
    (Capabilities::IMAGE_PIXMAP, "EGL_KHR_image_pixmap"),
    (Capabilities::IMAGE_TEXTURE, "GL_OES_EGL_image"),
    (Capabilities::COMPRESSED_ETC1, "GL_OES_compressed_ETC1_RGB8_texture"),
    (Capabilities::COMPRESSED_PVRTC, "GL_IMG_texture_compression_pvrtc"),
];

impl Capabilities {
    /// Extension name for a single capability flag.
    pub fn extension_name(self) -> &'static str {
        EXTENSION_NAMES
            .iter()
            .find(|(flag, _)| *flag == self)
            .map(|(_, name)| *name)
            .unwrap_or("unknown extension")
    }

    /// Builds the capability set from the EGL and GL extension strings plus
    /// whether the X server answered the MIT-SHM query.
    pub fn from_extension_lists(egl_extensions: &str, gl_extensions: &str, x_shm: bool) -> Self {
        let mut caps = Capabilities::empty();
        for &(flag, name) in EXTENSION_NAMES {
            let listed = if flag == Capabilities::SHM_IMAGE {
                x_shm
            } else if name.starts_with("GL_") {
                extension_listed(gl_extensions, name)
            } else {
                extension_listed(egl_extensions, name)
            };
            if listed {
                caps |= flag;
            }
        }
        caps
    }
}

/// Whole-token lookup in a space separated extension string.
///
/// `GL_OES_EGL_image` must not match `GL_OES_EGL_image_external`.
pub fn extension_listed(extensions: &str, name: &str) -> bool {
    if name.is_empty() || name.contains(' ') {
        return false;
    }
    extensions.split_ascii_whitespace().any(|ext| ext == name)
}

/// Blend state for subsequent draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    /// Blending disabled; the source replaces the destination.
    Opaque,
    /// `src * src_alpha + dst * (1 - src_alpha)`.
    SourceOver,
}

/// Sampling filter applied to a texture at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFilter {
    Nearest,
    Linear,
}

/// A pixel rectangle in window coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }
}

/// A textured quad drawn as a four-vertex triangle strip.
///
/// Positions are in normalized device coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad {
    pub positions: [[f32; 2]; 4],
    pub texcoords: [[f32; 2]; 4],
}

/// Events delivered by the windowing system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A shared-memory put into `drawable` has been consumed by the server.
    ShmCompletion { drawable: PixmapId },
    /// Anything else; drained and ignored.
    Other { kind: i32 },
}

/// A writable view of host-visible pixel memory.
///
/// Rows are `stride` bytes apart; only the first `width * bytes_per_pixel`
/// bytes of each row belong to the image.
#[derive(Debug)]
pub struct PixelBuffer<'a> {
    data: &'a mut [u8],
    stride: usize,
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
}

impl<'a> PixelBuffer<'a> {
    pub fn new(
        data: &'a mut [u8],
        stride: usize,
        width: u32,
        height: u32,
        bytes_per_pixel: usize,
    ) -> DeviceResult<Self> {
        let row_bytes = width as usize * bytes_per_pixel;
        let needed = if height == 0 {
            0
        } else {
            stride * (height as usize - 1) + row_bytes
        };
        if stride < row_bytes || data.len() < needed {
            return Err(DeviceError::Invariant(format!(
                "pixel buffer of {} bytes cannot hold {}x{} at stride {}",
                data.len(),
                width,
                height,
                stride
            )));
        }
        Ok(PixelBuffer {
            data,
            stride,
            width,
            height,
            bytes_per_pixel,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_pixel
    }

    /// The image bytes of row `y`, without stride padding.
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.stride;
        let len = self.width as usize * self.bytes_per_pixel;
        &mut self.data[start..start + len]
    }
}

/// Primitive operations a benchmark may issue.
///
/// Texture state calls (`upload_texture`) act on the texture bound to unit 0.
/// Any method returning a fatal `DeviceError` leaves the device unusable.
pub trait GraphicsDevice {
    /// Size of the presentation surface in pixels.
    fn surface_size(&self) -> (u32, u32);

    /// Optional features this device offers.
    fn capabilities(&self) -> Capabilities;

    /// Whether an extension function could be resolved.
    fn has_entry_point(&self, name: &str) -> bool;

    /// Human readable description of the device configuration, one
    /// attribute per line.
    fn describe(&self) -> Vec<String>;

    /// Reports (and clears) any error recorded by the device since the
    /// last check.
    fn check_error(&mut self, call: &'static str) -> DeviceResult<()>;

    // --- Textures ---

    fn create_texture(&mut self, filter: TextureFilter) -> DeviceResult<TextureId>;
    fn delete_texture(&mut self, texture: TextureId);
    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>);
    /// Synchronous copy-in to the texture bound to unit 0. `None` allocates
    /// storage without initializing it.
    fn upload_texture(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
        pixels: Option<&[u8]>,
    ) -> DeviceResult<()>;

    // --- Programs ---

    /// Compiles and links a program exposing `in_position` and
    /// `in_texcoord` attributes.
    fn create_program(&mut self, vertex: &str, fragment: &str) -> DeviceResult<ProgramId>;
    fn use_program(&mut self, program: Option<ProgramId>);
    fn delete_program(&mut self, program: ProgramId);
    fn set_uniform_i32(&mut self, program: ProgramId, name: &str, value: i32);
    fn set_uniform_vec2_array(&mut self, program: ProgramId, name: &str, values: &[[f32; 2]]);

    // --- Fixed function state and drawing ---

    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn clear(&mut self);
    fn set_blend(&mut self, mode: BlendMode);
    fn viewport(&self) -> Rect;
    fn set_viewport(&mut self, rect: Rect);
    /// `None` disables the scissor test.
    fn set_scissor(&mut self, rect: Option<Rect>);
    fn draw_quad(&mut self, quad: &Quad);

    // --- Framebuffer objects ---

    /// Creates a framebuffer rendering into `color`, with a 16-bit depth
    /// attachment of the given size if requested. An incomplete framebuffer
    /// is an invariant violation.
    fn create_framebuffer(
        &mut self,
        color: TextureId,
        depth: Option<(u32, u32)>,
    ) -> DeviceResult<FramebufferId>;
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    // --- Native pixmaps ---

    fn create_pixmap(&mut self, width: u32, height: u32, depth: u32) -> DeviceResult<PixmapId>;
    /// Reads the pixmap into host memory, lets `fill` modify it and writes
    /// it back.
    fn write_pixmap(
        &mut self,
        pixmap: PixmapId,
        fill: &mut dyn FnMut(&mut PixelBuffer<'_>),
    ) -> DeviceResult<()>;
    fn destroy_pixmap(&mut self, pixmap: PixmapId);

    // --- Surfaces and images over pixmaps ---

    /// Creates a texture-capable surface for `pixmap` and binds its back
    /// buffer to `texture` (texture-from-pixmap).
    fn bind_pixmap_texture(
        &mut self,
        pixmap: PixmapId,
        depth: u32,
        texture: TextureId,
    ) -> DeviceResult<SurfaceId>;
    /// Creates a surface for `pixmap` that can be locked for host writes.
    fn create_lockable_surface(&mut self, pixmap: PixmapId, depth: u32)
        -> DeviceResult<SurfaceId>;
    /// Releases any texture binding and destroys the surface.
    fn destroy_surface(&mut self, surface: SurfaceId);
    /// Wraps `pixmap` in a device image and makes it the storage of
    /// `texture`.
    fn create_pixmap_image(&mut self, pixmap: PixmapId, texture: TextureId)
        -> DeviceResult<ImageId>;
    fn destroy_image(&mut self, image: ImageId);

    // --- Lockable surfaces ---

    /// Locks `surface` for host writes. Pointer and stride are queried anew
    /// on every lock.
    fn lock_surface(&mut self, surface: SurfaceId) -> DeviceResult<PixelBuffer<'_>>;
    fn unlock_surface(&mut self, surface: SurfaceId) -> DeviceResult<()>;

    // --- Shared-memory images ---

    fn create_shm_image(&mut self, width: u32, height: u32, depth: u32)
        -> DeviceResult<ShmImageId>;
    fn shm_image_buffer(&mut self, image: ShmImageId) -> DeviceResult<PixelBuffer<'_>>;
    /// Asynchronously copies the whole image into `pixmap`. A
    /// `DeviceEvent::ShmCompletion` for `pixmap` follows once the server is
    /// done reading the segment.
    fn shm_put_image(&mut self, image: ShmImageId, pixmap: PixmapId) -> DeviceResult<()>;
    fn destroy_shm_image(&mut self, image: ShmImageId);

    // --- Event queue ---

    /// Number of events already read from the connection.
    fn events_queued(&mut self) -> usize;
    /// Blocks until the next event is available.
    fn next_event(&mut self) -> DeviceResult<DeviceEvent>;

    /// Presents the current frame.
    fn present(&mut self) -> DeviceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_extension_listed_matches_whole_tokens_only() {
        let list = "GL_OES_EGL_image_external GL_OES_compressed_ETC1_RGB8_texture";
        assert!(!extension_listed(list, "GL_OES_EGL_image"));
        assert!(extension_listed(list, "GL_OES_compressed_ETC1_RGB8_texture"));
        assert!(!extension_listed(list, ""));
        assert!(!extension_listed(list, "GL_OES_EGL_image_external GL_OES"));
    }

    #[test]
    fn test_capabilities_from_extension_lists() {
        let egl = "EGL_KHR_image_base EGL_KHR_image_pixmap EGL_KHR_lock_surface";
        let gl = "GL_OES_EGL_image GL_IMG_texture_compression_pvrtc";
        let caps = Capabilities::from_extension_lists(egl, gl, true);
        assert!(caps.contains(Capabilities::SHM_IMAGE));
        assert!(caps.contains(Capabilities::IMAGE_BASE | Capabilities::IMAGE_PIXMAP));
        assert!(caps.contains(Capabilities::IMAGE_TEXTURE));
        assert!(caps.contains(Capabilities::COMPRESSED_PVRTC));
        // lock_surface (v1) does not satisfy lock_surface2.
        assert!(!caps.contains(Capabilities::LOCK_SURFACE));
        assert!(!caps.contains(Capabilities::COMPRESSED_ETC1));
    }

    #[test]
    fn test_extension_name_for_single_flag() {
        assert_eq!(
            Capabilities::LOCK_SURFACE.extension_name(),
            "EGL_KHR_lock_surface2"
        );
        assert_eq!(Capabilities::SHM_IMAGE.extension_name(), "MIT-SHM");
    }

    #[test]
    fn test_device_error_fatality() {
        assert!(!DeviceError::Unsupported("MIT-SHM".into()).is_fatal());
        assert!(!DeviceError::Resource("create pixmap".into()).is_fatal());
        assert!(DeviceError::Gl {
            call: "glDrawArrays",
            code: 0x502
        }
        .is_fatal());
        assert!(DeviceError::Invariant("x".into()).is_fatal());
    }

    #[test]
    fn test_pixel_buffer_rejects_short_storage() {
        let mut data = vec![0u8; 10];
        assert!(PixelBuffer::new(&mut data, 4, 2, 3, 2).is_err());
        let mut data = vec![0u8; 12];
        let mut buf = PixelBuffer::new(&mut data, 4, 2, 3, 2).unwrap();
        assert_eq!(buf.row_mut(2).len(), 4);
    }
}
