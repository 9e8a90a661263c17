// src/device/egl/mod.rs

//! X11 + EGL + OpenGL ES 2.0 driver.
//!
//! One window-sized EGL window surface is current for the whole run.
//! Pixmaps, pixmap surfaces, EGL images and MIT-SHM images are tracked in
//! handle tables so anything a benchmark leaks is still released on drop.

mod connection;
mod ffi;

use self::connection::{Connection, NativeWindow, ALL_PLANES};
use self::ffi::*;
use super::{
    BlendMode, Capabilities, DeviceError, DeviceEvent, DeviceResult, FramebufferId,
    GraphicsDevice, ImageId, PixelBuffer, PixelFormat, PixmapId, ProgramId, Quad, Rect,
    ShmImageId, SurfaceId, TextureFilter, TextureId,
};
use anyhow::{anyhow, bail, Context as _, Result};
use libc::{c_char, c_int, c_uint, c_void};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::ptr;
use x11::xlib;

const WINDOW_TITLE: &str = "glmemperf";

/// Attribute locations bound before linking every program.
const ATTRIB_POSITION: GLuint = 0;
const ATTRIB_TEXCOORD: GLuint = 1;

/// Config attributes listed by `describe`.
const DESCRIBED_ATTRIBUTES: &[(&str, EGLint)] = &[
    ("EGL_CONFIG_ID", EGL_CONFIG_ID),
    ("EGL_BUFFER_SIZE", EGL_BUFFER_SIZE),
    ("EGL_RED_SIZE", EGL_RED_SIZE),
    ("EGL_GREEN_SIZE", EGL_GREEN_SIZE),
    ("EGL_BLUE_SIZE", EGL_BLUE_SIZE),
    ("EGL_ALPHA_SIZE", EGL_ALPHA_SIZE),
    ("EGL_DEPTH_SIZE", EGL_DEPTH_SIZE),
    ("EGL_STENCIL_SIZE", EGL_STENCIL_SIZE),
    ("EGL_SAMPLES", EGL_SAMPLES),
    ("EGL_CONFIG_CAVEAT", EGL_CONFIG_CAVEAT),
    ("EGL_NATIVE_VISUAL_ID", EGL_NATIVE_VISUAL_ID),
    ("EGL_SURFACE_TYPE", EGL_SURFACE_TYPE),
];

/// Extension functions resolved through `eglGetProcAddress`.
#[derive(Default)]
struct Extensions {
    lock_surface: Option<PFNEGLLOCKSURFACEKHRPROC>,
    unlock_surface: Option<PFNEGLUNLOCKSURFACEKHRPROC>,
    query_surface64: Option<PFNEGLQUERYSURFACE64KHRPROC>,
    create_image: Option<PFNEGLCREATEIMAGEKHRPROC>,
    destroy_image: Option<PFNEGLDESTROYIMAGEKHRPROC>,
    image_target_texture: Option<PFNGLEGLIMAGETARGETTEXTURE2DOESPROC>,
}

fn proc_address(name: &str) -> *mut c_void {
    match CString::new(name) {
        Ok(name) => unsafe { eglGetProcAddress(name.as_ptr()) },
        Err(_) => ptr::null_mut(),
    }
}

macro_rules! load_proc {
    ($name:expr, $ty:ty) => {{
        let address = proc_address($name);
        // SAFETY: a null address maps to `None`; otherwise the driver
        // returned the entry point with the declared signature.
        unsafe { std::mem::transmute::<*mut c_void, Option<$ty>>(address) }
    }};
}

impl Extensions {
    fn resolve() -> Self {
        Extensions {
            lock_surface: load_proc!("eglLockSurfaceKHR", PFNEGLLOCKSURFACEKHRPROC),
            unlock_surface: load_proc!("eglUnlockSurfaceKHR", PFNEGLUNLOCKSURFACEKHRPROC),
            query_surface64: load_proc!("eglQuerySurface64KHR", PFNEGLQUERYSURFACE64KHRPROC),
            create_image: load_proc!("eglCreateImageKHR", PFNEGLCREATEIMAGEKHRPROC),
            destroy_image: load_proc!("eglDestroyImageKHR", PFNEGLDESTROYIMAGEKHRPROC),
            image_target_texture: load_proc!(
                "glEGLImageTargetTexture2DOES",
                PFNGLEGLIMAGETARGETTEXTURE2DOESPROC
            ),
        }
    }

    fn resolved(&self, name: &str) -> Option<bool> {
        Some(match name {
            "eglLockSurfaceKHR" => self.lock_surface.is_some(),
            "eglUnlockSurfaceKHR" => self.unlock_surface.is_some(),
            "eglQuerySurface64KHR" => self.query_surface64.is_some(),
            "eglCreateImageKHR" => self.create_image.is_some(),
            "eglDestroyImageKHR" => self.destroy_image.is_some(),
            "glEGLImageTargetTexture2DOES" => self.image_target_texture.is_some(),
            _ => return None,
        })
    }
}

/// How a format is handed to `glTexImage2D` or `glCompressedTexImage2D`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextureUpload {
    Plain { format: GLenum, kind: GLenum },
    Compressed { internal_format: GLenum },
}

fn texture_upload(format: PixelFormat) -> TextureUpload {
    use TextureUpload::*;
    match format {
        PixelFormat::Rgba8888 => Plain {
            format: GL_RGBA,
            kind: GL_UNSIGNED_BYTE,
        },
        PixelFormat::Rgb888 => Plain {
            format: GL_RGB,
            kind: GL_UNSIGNED_BYTE,
        },
        PixelFormat::Rgb565 => Plain {
            format: GL_RGB,
            kind: GL_UNSIGNED_SHORT_5_6_5,
        },
        PixelFormat::Rgba4444 => Plain {
            format: GL_RGBA,
            kind: GL_UNSIGNED_SHORT_4_4_4_4,
        },
        PixelFormat::Alpha8 => Plain {
            format: GL_ALPHA,
            kind: GL_UNSIGNED_BYTE,
        },
        PixelFormat::RgbPvrtc4 => Compressed {
            internal_format: GL_COMPRESSED_RGB_PVRTC_4BPPV1_IMG,
        },
        PixelFormat::RgbPvrtc2 => Compressed {
            internal_format: GL_COMPRESSED_RGB_PVRTC_2BPPV1_IMG,
        },
        PixelFormat::RgbaPvrtc4 => Compressed {
            internal_format: GL_COMPRESSED_RGBA_PVRTC_4BPPV1_IMG,
        },
        PixelFormat::RgbaPvrtc2 => Compressed {
            internal_format: GL_COMPRESSED_RGBA_PVRTC_2BPPV1_IMG,
        },
        PixelFormat::Etc1 => Compressed {
            internal_format: GL_ETC1_RGB8_OES,
        },
    }
}

/// `eglChooseConfig` attributes for a pixmap surface of `depth` bits.
fn pixmap_config_attributes(depth: u32, lockable: bool) -> Vec<EGLint> {
    if lockable {
        let format = if depth == 16 {
            EGL_FORMAT_RGB_565_EXACT_KHR
        } else {
            EGL_FORMAT_RGBA_8888_EXACT_KHR
        };
        vec![
            EGL_SURFACE_TYPE,
            EGL_PIXMAP_BIT | EGL_LOCK_SURFACE_BIT_KHR,
            EGL_MATCH_FORMAT_KHR,
            format,
            EGL_BUFFER_SIZE,
            depth as EGLint,
            EGL_NONE,
        ]
    } else {
        vec![
            EGL_SURFACE_TYPE,
            EGL_PIXMAP_BIT,
            EGL_BUFFER_SIZE,
            depth as EGLint,
            EGL_NONE,
        ]
    }
}

fn egl_error(call: &'static str) -> DeviceError {
    DeviceError::Egl {
        call,
        code: unsafe { eglGetError() },
    }
}

unsafe fn string_from(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

struct NativePixmap {
    gc: xlib::GC,
    width: u32,
    height: u32,
    depth: u32,
}

struct PixmapSurface {
    surface: EGLSurface,
    pixmap: PixmapId,
    /// Back buffer bound to a texture (texture-from-pixmap).
    bound: bool,
    locked: bool,
}

struct SharedImage {
    image: *mut xlib::XImage,
    segment: Box<XShmSegmentInfo>,
    width: u32,
    height: u32,
}

impl SharedImage {
    fn bytes_per_line(&self) -> usize {
        unsafe { (*self.image).bytes_per_line.max(0) as usize }
    }

    fn bytes_per_pixel(&self) -> usize {
        unsafe { ((*self.image).bits_per_pixel.max(8) / 8) as usize }
    }
}

/// EGL/GLES2 device rendering into a mapped X11 window.
pub struct EglDevice {
    conn: Connection,
    window: Option<NativeWindow>,
    display: EGLDisplay,
    config: EGLConfig,
    context: EGLContext,
    surface: EGLSurface,
    width: u32,
    height: u32,
    capabilities: Capabilities,
    extensions: Extensions,
    shm_completion: Option<c_int>,
    pixmap_configs: HashMap<(u32, bool), EGLConfig>,
    viewport: Rect,
    current_program: GLuint,
    next_handle: u32,
    pixmaps: HashMap<PixmapId, NativePixmap>,
    surfaces: HashMap<SurfaceId, PixmapSurface>,
    images: HashMap<ImageId, EGLImageKHR>,
    shm_images: HashMap<ShmImageId, SharedImage>,
    /// Depth renderbuffer per framebuffer, 0 when there is none.
    framebuffers: HashMap<FramebufferId, GLuint>,
}

impl EglDevice {
    /// Opens the X display, creates a `width` x `height` window with a
    /// `bits_per_pixel` ES 2.0 config and makes its context current.
    pub fn new(width: u32, height: u32, bits_per_pixel: u32) -> Result<Self> {
        let conn = Connection::new()?;
        let shm_completion = conn.shm_completion_event();

        let display = unsafe { eglGetDisplay(conn.display()) };
        if display == EGL_NO_DISPLAY {
            bail!("eglGetDisplay returned no display");
        }
        let (mut major, mut minor) = (0, 0);
        if unsafe { eglInitialize(display, &mut major, &mut minor) } == EGL_FALSE {
            bail!("eglInitialize failed: 0x{:x}", unsafe { eglGetError() });
        }
        info!("EGL {}.{} initialized", major, minor);

        let mut device = EglDevice {
            conn,
            window: None,
            display,
            config: ptr::null_mut(),
            context: EGL_NO_CONTEXT,
            surface: EGL_NO_SURFACE,
            width,
            height,
            capabilities: Capabilities::empty(),
            extensions: Extensions::default(),
            shm_completion,
            pixmap_configs: HashMap::new(),
            viewport: Rect::new(0, 0, width, height),
            current_program: 0,
            next_handle: 1,
            pixmaps: HashMap::new(),
            surfaces: HashMap::new(),
            images: HashMap::new(),
            shm_images: HashMap::new(),
            framebuffers: HashMap::new(),
        };
        device
            .create_window_context(bits_per_pixel)
            .context("Failed to set up the EGL window surface")?;
        Ok(device)
    }

    fn create_window_context(&mut self, bits_per_pixel: u32) -> Result<()> {
        let config_attrs = [
            EGL_BUFFER_SIZE,
            bits_per_pixel as EGLint,
            EGL_RENDERABLE_TYPE,
            EGL_OPENGL_ES2_BIT,
            EGL_NONE,
        ];
        self.config = self
            .choose_config(&config_attrs)
            .ok_or_else(|| anyhow!("no {}-bit ES 2.0 window config", bits_per_pixel))?;

        let visual_id = self.config_attribute(self.config, EGL_NATIVE_VISUAL_ID);
        let window =
            self.conn
                .create_window(visual_id as xlib::VisualID, self.width, self.height, WINDOW_TITLE)?;
        self.window = Some(window);

        self.surface = unsafe {
            eglCreateWindowSurface(self.display, self.config, window.id, ptr::null())
        };
        if self.surface == EGL_NO_SURFACE {
            bail!("eglCreateWindowSurface failed: 0x{:x}", unsafe { eglGetError() });
        }

        let context_attrs = [EGL_CONTEXT_CLIENT_VERSION, 2, EGL_NONE];
        self.context = unsafe {
            eglCreateContext(
                self.display,
                self.config,
                EGL_NO_CONTEXT,
                context_attrs.as_ptr(),
            )
        };
        if self.context == EGL_NO_CONTEXT {
            bail!("eglCreateContext failed: 0x{:x}", unsafe { eglGetError() });
        }
        let current =
            unsafe { eglMakeCurrent(self.display, self.surface, self.surface, self.context) };
        if current == EGL_FALSE {
            bail!("eglMakeCurrent failed: 0x{:x}", unsafe { eglGetError() });
        }

        unsafe {
            eglSwapInterval(self.display, 0);
            glPixelStorei(GL_UNPACK_ALIGNMENT, 1);
            glViewport(0, 0, self.width as GLint, self.height as GLint);
        }

        let egl_extensions = unsafe { string_from(eglQueryString(self.display, EGL_EXTENSIONS)) };
        let gl_extensions = unsafe { string_from(glGetString(GL_EXTENSIONS) as *const c_char) };
        self.capabilities = Capabilities::from_extension_lists(
            &egl_extensions,
            &gl_extensions,
            self.shm_completion.is_some(),
        );
        self.extensions = Extensions::resolve();
        info!("Device capabilities: {:?}", self.capabilities);
        debug!("EGL extensions: {}", egl_extensions);
        debug!("GL extensions: {}", gl_extensions);
        Ok(())
    }

    fn choose_config(&self, attrs: &[EGLint]) -> Option<EGLConfig> {
        let mut config: EGLConfig = ptr::null_mut();
        let mut count: EGLint = 0;
        let ok = unsafe { eglChooseConfig(self.display, attrs.as_ptr(), &mut config, 1, &mut count) };
        if ok == EGL_FALSE || count < 1 {
            None
        } else {
            Some(config)
        }
    }

    fn config_attribute(&self, config: EGLConfig, attribute: EGLint) -> EGLint {
        let mut value: EGLint = 0;
        unsafe { eglGetConfigAttrib(self.display, config, attribute, &mut value) };
        value
    }

    fn pixmap_config(&mut self, depth: u32, lockable: bool) -> DeviceResult<EGLConfig> {
        if let Some(config) = self.pixmap_configs.get(&(depth, lockable)) {
            return Ok(*config);
        }
        let config = self
            .choose_config(&pixmap_config_attributes(depth, lockable))
            .ok_or_else(|| {
                DeviceError::NoMatchingConfig(if lockable {
                    "lockable".to_string()
                } else {
                    format!("{}-bit pixmap", depth)
                })
            })?;
        debug!(
            "Pixmap config for depth {} (lockable {}): id {}",
            depth,
            lockable,
            self.config_attribute(config, EGL_CONFIG_ID)
        );
        self.pixmap_configs.insert((depth, lockable), config);
        Ok(config)
    }

    fn allocate(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn native_pixmap(&self, pixmap: PixmapId) -> DeviceResult<&NativePixmap> {
        self.pixmaps
            .get(&pixmap)
            .ok_or_else(|| DeviceError::Invariant(format!("unknown pixmap {:?}", pixmap)))
    }

    fn surface_state(&mut self, surface: SurfaceId) -> DeviceResult<&mut PixmapSurface> {
        self.surfaces
            .get_mut(&surface)
            .ok_or_else(|| DeviceError::Invariant(format!("unknown surface {:?}", surface)))
    }

    fn compile_shader(&self, stage: &'static str, kind: GLenum, source: &str) -> DeviceResult<GLuint> {
        let source = CString::new(source).map_err(|_| DeviceError::Shader {
            stage,
            log: "source contains a NUL byte".into(),
        })?;
        unsafe {
            let shader = glCreateShader(kind);
            let sources = [source.as_ptr()];
            glShaderSource(shader, 1, sources.as_ptr(), ptr::null());
            glCompileShader(shader);
            let mut status: GLint = 0;
            glGetShaderiv(shader, GL_COMPILE_STATUS, &mut status);
            if status == 0 {
                let log = info_log(shader, glGetShaderiv, glGetShaderInfoLog);
                glDeleteShader(shader);
                return Err(DeviceError::Shader { stage, log });
            }
            Ok(shader)
        }
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<GLint> {
        let name = CString::new(name).ok()?;
        let location = unsafe { glGetUniformLocation(program.0, name.as_ptr()) };
        if location < 0 {
            debug!("Program {:?} has no uniform {:?}", program, name);
            return None;
        }
        if self.current_program != program.0 {
            unsafe { glUseProgram(program.0) };
            self.current_program = program.0;
        }
        Some(location)
    }

    fn release_surface(&mut self, state: PixmapSurface) {
        unsafe {
            if state.locked {
                if let Some(unlock) = self.extensions.unlock_surface {
                    unlock(self.display, state.surface);
                }
            }
            if state.bound {
                eglReleaseTexImage(self.display, state.surface, EGL_BACK_BUFFER);
            }
            eglDestroySurface(self.display, state.surface);
        }
    }

    fn release_shm_image(&mut self, mut shared: SharedImage) {
        unsafe {
            ffi::XShmDetach(self.conn.display(), &mut *shared.segment);
            self.conn.sync();
            xlib::XDestroyImage(shared.image);
            libc::shmdt(shared.segment.shmaddr as *const c_void);
            libc::shmctl(shared.segment.shmid, libc::IPC_RMID, ptr::null_mut());
        }
    }
}

type GetIv = unsafe extern "C" fn(GLuint, GLenum, *mut GLint);
type GetLog = unsafe extern "C" fn(GLuint, GLsizei, *mut GLsizei, *mut GLchar);

unsafe fn info_log(object: GLuint, get_iv: GetIv, get_log: GetLog) -> String {
    let mut length: GLint = 0;
    get_iv(object, GL_INFO_LOG_LENGTH, &mut length);
    if length <= 0 {
        return String::new();
    }
    let mut buffer = vec![0u8; length as usize];
    let mut written: GLsizei = 0;
    get_log(object, length, &mut written, buffer.as_mut_ptr() as *mut GLchar);
    buffer.truncate(written.max(0) as usize);
    String::from_utf8_lossy(&buffer).trim_end().to_string()
}

/// `EGL_BITMAP_POINTER_KHR` only fits an `EGLint` on 32-bit targets.
fn check_pointer_query(has_query64: bool) -> DeviceResult<()> {
    if has_query64 || usize::BITS <= 32 {
        Ok(())
    } else {
        Err(DeviceError::MissingEntryPoint("eglQuerySurface64KHR".into()))
    }
}

impl GraphicsDevice for EglDevice {
    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn has_entry_point(&self, name: &str) -> bool {
        self.extensions
            .resolved(name)
            .unwrap_or_else(|| !proc_address(name).is_null())
    }

    fn describe(&self) -> Vec<String> {
        let mut lines = vec![
            format!("EGL vendor: {}", unsafe {
                string_from(eglQueryString(self.display, EGL_VENDOR))
            }),
            format!("EGL version: {}", unsafe {
                string_from(eglQueryString(self.display, EGL_VERSION))
            }),
            format!("GL renderer: {}", unsafe {
                string_from(glGetString(GL_RENDERER) as *const c_char)
            }),
            format!("GL version: {}", unsafe {
                string_from(glGetString(GL_VERSION) as *const c_char)
            }),
        ];
        for (name, attribute) in DESCRIBED_ATTRIBUTES {
            lines.push(format!(
                "{}: {}",
                name,
                self.config_attribute(self.config, *attribute)
            ));
        }
        lines
    }

    fn check_error(&mut self, call: &'static str) -> DeviceResult<()> {
        let code = unsafe { glGetError() };
        if code == GL_NO_ERROR {
            Ok(())
        } else {
            warn!("GL error 0x{:x} after {}", code, call);
            Err(DeviceError::Gl { call, code })
        }
    }

    fn create_texture(&mut self, filter: TextureFilter) -> DeviceResult<TextureId> {
        let mut name: GLuint = 0;
        let gl_filter = match filter {
            TextureFilter::Nearest => GL_NEAREST,
            TextureFilter::Linear => GL_LINEAR,
        };
        unsafe {
            glGenTextures(1, &mut name);
            if name == 0 {
                return Err(DeviceError::Resource("allocate texture".into()));
            }
            glActiveTexture(GL_TEXTURE0);
            glBindTexture(GL_TEXTURE_2D, name);
            glTexParameteri(GL_TEXTURE_2D, GL_TEXTURE_MIN_FILTER, gl_filter);
            glTexParameteri(GL_TEXTURE_2D, GL_TEXTURE_MAG_FILTER, gl_filter);
        }
        Ok(TextureId(name))
    }

    fn delete_texture(&mut self, texture: TextureId) {
        unsafe { glDeleteTextures(1, &texture.0) };
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) {
        unsafe {
            glActiveTexture(GL_TEXTURE0 + unit);
            glBindTexture(GL_TEXTURE_2D, texture.map_or(0, |t| t.0));
            if unit != 0 {
                glActiveTexture(GL_TEXTURE0);
            }
        }
    }

    fn upload_texture(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
        pixels: Option<&[u8]>,
    ) -> DeviceResult<()> {
        let size = format.data_size(width, height);
        if let Some(data) = pixels {
            if data.len() < size {
                return Err(DeviceError::Invariant(format!(
                    "upload of {}x{} {} needs {} bytes, got {}",
                    width,
                    height,
                    format.name(),
                    size,
                    data.len()
                )));
            }
        }
        let data = pixels.map_or(ptr::null(), |p| p.as_ptr() as *const c_void);
        unsafe {
            match texture_upload(format) {
                TextureUpload::Plain { format, kind } => glTexImage2D(
                    GL_TEXTURE_2D,
                    0,
                    format as GLint,
                    width as GLsizei,
                    height as GLsizei,
                    0,
                    format,
                    kind,
                    data,
                ),
                TextureUpload::Compressed { internal_format } => glCompressedTexImage2D(
                    GL_TEXTURE_2D,
                    0,
                    internal_format,
                    width as GLsizei,
                    height as GLsizei,
                    0,
                    size as GLsizei,
                    data,
                ),
            }
        }
        Ok(())
    }

    fn create_program(&mut self, vertex: &str, fragment: &str) -> DeviceResult<ProgramId> {
        let vs = self.compile_shader("vertex", GL_VERTEX_SHADER, vertex)?;
        let fs = match self.compile_shader("fragment", GL_FRAGMENT_SHADER, fragment) {
            Ok(fs) => fs,
            Err(err) => {
                unsafe { glDeleteShader(vs) };
                return Err(err);
            }
        };
        unsafe {
            let program = glCreateProgram();
            glAttachShader(program, vs);
            glAttachShader(program, fs);
            glBindAttribLocation(program, ATTRIB_POSITION, b"in_position\0".as_ptr() as *const GLchar);
            glBindAttribLocation(program, ATTRIB_TEXCOORD, b"in_texcoord\0".as_ptr() as *const GLchar);
            glLinkProgram(program);
            glDeleteShader(vs);
            glDeleteShader(fs);

            let mut status: GLint = 0;
            glGetProgramiv(program, GL_LINK_STATUS, &mut status);
            if status == 0 {
                let log = info_log(program, glGetProgramiv, glGetProgramInfoLog);
                glDeleteProgram(program);
                return Err(DeviceError::Shader { stage: "link", log });
            }
            Ok(ProgramId(program))
        }
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        let name = program.map_or(0, |p| p.0);
        unsafe { glUseProgram(name) };
        self.current_program = name;
    }

    fn delete_program(&mut self, program: ProgramId) {
        if self.current_program == program.0 {
            unsafe { glUseProgram(0) };
            self.current_program = 0;
        }
        unsafe { glDeleteProgram(program.0) };
    }

    fn set_uniform_i32(&mut self, program: ProgramId, name: &str, value: i32) {
        if let Some(location) = self.uniform_location(program, name) {
            unsafe { glUniform1i(location, value) };
        }
    }

    fn set_uniform_vec2_array(&mut self, program: ProgramId, name: &str, values: &[[f32; 2]]) {
        if let Some(location) = self.uniform_location(program, name) {
            unsafe {
                glUniform2fv(
                    location,
                    values.len() as GLsizei,
                    values.as_ptr() as *const GLfloat,
                )
            };
        }
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        unsafe { glClearColor(rgba[0], rgba[1], rgba[2], rgba[3]) };
    }

    fn clear(&mut self) {
        unsafe { glClear(GL_COLOR_BUFFER_BIT) };
    }

    fn set_blend(&mut self, mode: BlendMode) {
        unsafe {
            match mode {
                BlendMode::Opaque => glDisable(GL_BLEND),
                BlendMode::SourceOver => {
                    glBlendFunc(GL_SRC_ALPHA, GL_ONE_MINUS_SRC_ALPHA);
                    glEnable(GL_BLEND);
                }
            }
        }
    }

    fn viewport(&self) -> Rect {
        self.viewport
    }

    fn set_viewport(&mut self, rect: Rect) {
        unsafe { glViewport(rect.x, rect.y, rect.width as GLsizei, rect.height as GLsizei) };
        self.viewport = rect;
    }

    fn set_scissor(&mut self, rect: Option<Rect>) {
        unsafe {
            match rect {
                Some(r) => {
                    glScissor(r.x, r.y, r.width as GLsizei, r.height as GLsizei);
                    glEnable(GL_SCISSOR_TEST);
                }
                None => glDisable(GL_SCISSOR_TEST),
            }
        }
    }

    fn draw_quad(&mut self, quad: &Quad) {
        unsafe {
            glVertexAttribPointer(
                ATTRIB_POSITION,
                2,
                GL_FLOAT,
                GL_FALSE,
                0,
                quad.positions.as_ptr() as *const c_void,
            );
            glVertexAttribPointer(
                ATTRIB_TEXCOORD,
                2,
                GL_FLOAT,
                GL_FALSE,
                0,
                quad.texcoords.as_ptr() as *const c_void,
            );
            glEnableVertexAttribArray(ATTRIB_POSITION);
            glEnableVertexAttribArray(ATTRIB_TEXCOORD);
            glDrawArrays(GL_TRIANGLE_STRIP, 0, 4);
        }
    }

    fn create_framebuffer(
        &mut self,
        color: TextureId,
        depth: Option<(u32, u32)>,
    ) -> DeviceResult<FramebufferId> {
        let mut framebuffer: GLuint = 0;
        let mut renderbuffer: GLuint = 0;
        let status = unsafe {
            glGenFramebuffers(1, &mut framebuffer);
            glBindFramebuffer(GL_FRAMEBUFFER, framebuffer);
            glFramebufferTexture2D(
                GL_FRAMEBUFFER,
                GL_COLOR_ATTACHMENT0,
                GL_TEXTURE_2D,
                color.0,
                0,
            );
            if let Some((width, height)) = depth {
                glGenRenderbuffers(1, &mut renderbuffer);
                glBindRenderbuffer(GL_RENDERBUFFER, renderbuffer);
                glRenderbufferStorage(
                    GL_RENDERBUFFER,
                    GL_DEPTH_COMPONENT16,
                    width as GLsizei,
                    height as GLsizei,
                );
                glFramebufferRenderbuffer(
                    GL_FRAMEBUFFER,
                    GL_DEPTH_ATTACHMENT,
                    GL_RENDERBUFFER,
                    renderbuffer,
                );
            }
            let status = glCheckFramebufferStatus(GL_FRAMEBUFFER);
            glBindFramebuffer(GL_FRAMEBUFFER, 0);
            status
        };
        if status != GL_FRAMEBUFFER_COMPLETE {
            unsafe {
                glDeleteFramebuffers(1, &framebuffer);
                if renderbuffer != 0 {
                    glDeleteRenderbuffers(1, &renderbuffer);
                }
            }
            return Err(DeviceError::Invariant(format!(
                "framebuffer incomplete: 0x{:x}",
                status
            )));
        }
        let id = FramebufferId(framebuffer);
        self.framebuffers.insert(id, renderbuffer);
        Ok(id)
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        unsafe { glBindFramebuffer(GL_FRAMEBUFFER, framebuffer.map_or(0, |f| f.0)) };
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        let renderbuffer = self.framebuffers.remove(&framebuffer).unwrap_or(0);
        unsafe {
            glDeleteFramebuffers(1, &framebuffer.0);
            if renderbuffer != 0 {
                glDeleteRenderbuffers(1, &renderbuffer);
            }
        }
    }

    fn create_pixmap(&mut self, width: u32, height: u32, depth: u32) -> DeviceResult<PixmapId> {
        let (pixmap, gc) = self
            .conn
            .create_pixmap(width, height, depth)
            .ok_or_else(|| DeviceError::Resource(format!("create {}-bit pixmap", depth)))?;
        let id = PixmapId(pixmap as u64);
        self.pixmaps.insert(
            id,
            NativePixmap {
                gc,
                width,
                height,
                depth,
            },
        );
        Ok(id)
    }

    fn write_pixmap(
        &mut self,
        pixmap: PixmapId,
        fill: &mut dyn FnMut(&mut PixelBuffer<'_>),
    ) -> DeviceResult<()> {
        let native = self.native_pixmap(pixmap)?;
        let (gc, width, height) = (native.gc, native.width, native.height);
        let display = self.conn.display();
        unsafe {
            let image = xlib::XGetImage(
                display,
                pixmap.0 as xlib::Drawable,
                0,
                0,
                width as c_uint,
                height as c_uint,
                ALL_PLANES,
                xlib::ZPixmap,
            );
            if image.is_null() {
                return Err(DeviceError::Resource("read back pixmap".into()));
            }
            let stride = (*image).bytes_per_line.max(0) as usize;
            let bytes_per_pixel = ((*image).bits_per_pixel.max(8) / 8) as usize;
            let data =
                std::slice::from_raw_parts_mut((*image).data as *mut u8, stride * height as usize);
            let filled = PixelBuffer::new(data, stride, width, height, bytes_per_pixel).map(
                |mut buffer| {
                    fill(&mut buffer);
                },
            );
            if filled.is_ok() {
                xlib::XPutImage(display, pixmap.0 as xlib::Drawable, gc, image, 0, 0, 0, 0, width, height);
            }
            xlib::XDestroyImage(image);
            filled
        }
    }

    fn destroy_pixmap(&mut self, pixmap: PixmapId) {
        match self.pixmaps.remove(&pixmap) {
            Some(native) => self.conn.free_pixmap(pixmap.0 as xlib::Pixmap, native.gc),
            None => warn!("Destroying unknown pixmap {:?}", pixmap),
        }
    }

    fn bind_pixmap_texture(
        &mut self,
        pixmap: PixmapId,
        depth: u32,
        texture: TextureId,
    ) -> DeviceResult<SurfaceId> {
        if !self.capabilities.contains(Capabilities::TEXTURE_FROM_PIXMAP) {
            return Err(DeviceError::Unsupported(
                Capabilities::TEXTURE_FROM_PIXMAP.extension_name().into(),
            ));
        }
        self.native_pixmap(pixmap)?;
        let config = self.pixmap_config(depth, false)?;
        let attrs = [
            EGL_TEXTURE_FORMAT,
            EGL_TEXTURE_RGB,
            EGL_TEXTURE_TARGET,
            EGL_TEXTURE_2D,
            EGL_MIPMAP_TEXTURE,
            EGL_FALSE as EGLint,
            EGL_NONE,
        ];
        let surface = unsafe {
            eglCreatePixmapSurface(self.display, config, pixmap.0 as EGLNativePixmapType, attrs.as_ptr())
        };
        if surface == EGL_NO_SURFACE {
            return Err(egl_error("eglCreatePixmapSurface"));
        }
        unsafe {
            glActiveTexture(GL_TEXTURE0);
            glBindTexture(GL_TEXTURE_2D, texture.0);
            if eglBindTexImage(self.display, surface, EGL_BACK_BUFFER) == EGL_FALSE {
                let err = egl_error("eglBindTexImage");
                eglDestroySurface(self.display, surface);
                return Err(err);
            }
        }
        let id = SurfaceId(self.allocate());
        self.surfaces.insert(
            id,
            PixmapSurface {
                surface,
                pixmap,
                bound: true,
                locked: false,
            },
        );
        Ok(id)
    }

    fn create_lockable_surface(
        &mut self,
        pixmap: PixmapId,
        depth: u32,
    ) -> DeviceResult<SurfaceId> {
        self.native_pixmap(pixmap)?;
        let config = self.pixmap_config(depth, true)?;
        let surface = unsafe {
            eglCreatePixmapSurface(self.display, config, pixmap.0 as EGLNativePixmapType, ptr::null())
        };
        if surface == EGL_NO_SURFACE {
            return Err(egl_error("eglCreatePixmapSurface"));
        }
        let id = SurfaceId(self.allocate());
        self.surfaces.insert(
            id,
            PixmapSurface {
                surface,
                pixmap,
                bound: false,
                locked: false,
            },
        );
        Ok(id)
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        match self.surfaces.remove(&surface) {
            Some(state) => {
                if state.locked {
                    warn!("Destroying locked surface {:?}", surface);
                }
                self.release_surface(state);
            }
            None => warn!("Destroying unknown surface {:?}", surface),
        }
    }

    fn create_pixmap_image(
        &mut self,
        pixmap: PixmapId,
        texture: TextureId,
    ) -> DeviceResult<ImageId> {
        self.native_pixmap(pixmap)?;
        let create = self
            .extensions
            .create_image
            .ok_or_else(|| DeviceError::MissingEntryPoint("eglCreateImageKHR".into()))?;
        let target = self
            .extensions
            .image_target_texture
            .ok_or_else(|| DeviceError::MissingEntryPoint("glEGLImageTargetTexture2DOES".into()))?;
        let image = unsafe {
            create(
                self.display,
                EGL_NO_CONTEXT,
                EGL_NATIVE_PIXMAP_KHR,
                pixmap.0 as usize as EGLClientBuffer,
                ptr::null(),
            )
        };
        if image == EGL_NO_IMAGE_KHR {
            return Err(egl_error("eglCreateImageKHR"));
        }
        unsafe {
            glActiveTexture(GL_TEXTURE0);
            glBindTexture(GL_TEXTURE_2D, texture.0);
            target(GL_TEXTURE_2D, image);
        }
        let id = ImageId(self.allocate());
        self.images.insert(id, image);
        Ok(id)
    }

    fn destroy_image(&mut self, image: ImageId) {
        match (self.images.remove(&image), self.extensions.destroy_image) {
            (Some(handle), Some(destroy)) => unsafe {
                destroy(self.display, handle);
            },
            (Some(_), None) => warn!("Leaking image {:?}: eglDestroyImageKHR unavailable", image),
            (None, _) => warn!("Destroying unknown image {:?}", image),
        }
    }

    fn lock_surface(&mut self, surface: SurfaceId) -> DeviceResult<PixelBuffer<'_>> {
        let lock = self
            .extensions
            .lock_surface
            .ok_or_else(|| DeviceError::MissingEntryPoint("eglLockSurfaceKHR".into()))?;
        let query64 = self.extensions.query_surface64;
        check_pointer_query(query64.is_some())?;
        let display = self.display;
        let state = self.surface_state(surface)?;
        if state.bound {
            return Err(DeviceError::Invariant(format!(
                "surface {:?} is not lockable",
                surface
            )));
        }
        if state.locked {
            return Err(DeviceError::Invariant(format!(
                "surface {:?} locked twice",
                surface
            )));
        }
        let egl_surface = state.surface;
        let pixmap = state.pixmap;

        let attrs = [
            EGL_LOCK_USAGE_HINT_KHR,
            EGL_WRITE_SURFACE_BIT_KHR,
            EGL_NONE,
        ];
        if unsafe { lock(display, egl_surface, attrs.as_ptr()) } == EGL_FALSE {
            return Err(egl_error("eglLockSurfaceKHR"));
        }
        state.locked = true;

        let pointer = unsafe {
            match query64 {
                Some(query) => {
                    let mut value: EGLAttribKHR = 0;
                    query(display, egl_surface, EGL_BITMAP_POINTER_KHR, &mut value);
                    value as usize as *mut u8
                }
                None => {
                    let mut value: EGLint = 0;
                    eglQuerySurface(display, egl_surface, EGL_BITMAP_POINTER_KHR, &mut value);
                    value as u32 as usize as *mut u8
                }
            }
        };
        let mut pitch: EGLint = 0;
        unsafe { eglQuerySurface(display, egl_surface, EGL_BITMAP_PITCH_KHR, &mut pitch) };
        if pointer.is_null() || pitch <= 0 {
            return Err(egl_error("eglQuerySurface"));
        }

        let native = self.native_pixmap(pixmap)?;
        let (width, height) = (native.width, native.height);
        let bytes_per_pixel = (native.depth / 8) as usize;
        let stride = pitch as usize;
        let data = unsafe { std::slice::from_raw_parts_mut(pointer, stride * height as usize) };
        PixelBuffer::new(data, stride, width, height, bytes_per_pixel)
    }

    fn unlock_surface(&mut self, surface: SurfaceId) -> DeviceResult<()> {
        let unlock = self
            .extensions
            .unlock_surface
            .ok_or_else(|| DeviceError::MissingEntryPoint("eglUnlockSurfaceKHR".into()))?;
        let display = self.display;
        let state = self.surface_state(surface)?;
        if !state.locked {
            return Err(DeviceError::Invariant(format!(
                "surface {:?} unlocked while not locked",
                surface
            )));
        }
        state.locked = false;
        if unsafe { unlock(display, state.surface) } == EGL_FALSE {
            return Err(egl_error("eglUnlockSurfaceKHR"));
        }
        Ok(())
    }

    fn create_shm_image(
        &mut self,
        width: u32,
        height: u32,
        depth: u32,
    ) -> DeviceResult<ShmImageId> {
        if self.shm_completion.is_none() {
            return Err(DeviceError::Unsupported("MIT-SHM".into()));
        }
        let visual = self
            .conn
            .visual_for_depth(depth)
            .ok_or_else(|| DeviceError::NoMatchingConfig(format!("{}-bit visual", depth)))?;
        let display = self.conn.display();
        let mut segment = Box::new(XShmSegmentInfo {
            shmseg: 0,
            shmid: -1,
            shmaddr: ptr::null_mut(),
            read_only: xlib::False,
        });
        unsafe {
            let image = ffi::XShmCreateImage(
                display,
                visual,
                depth,
                xlib::ZPixmap,
                ptr::null_mut(),
                &mut *segment,
                width,
                height,
            );
            if image.is_null() {
                return Err(DeviceError::Resource("create shared-memory image".into()));
            }
            let size = (*image).bytes_per_line.max(0) as usize * (*image).height.max(0) as usize;
            segment.shmid = libc::shmget(libc::IPC_PRIVATE, size, libc::IPC_CREAT | 0o777);
            if segment.shmid < 0 {
                xlib::XDestroyImage(image);
                return Err(DeviceError::Resource(format!(
                    "allocate {} byte shared-memory segment",
                    size
                )));
            }
            let address = libc::shmat(segment.shmid, ptr::null(), 0);
            if address as isize == -1 {
                libc::shmctl(segment.shmid, libc::IPC_RMID, ptr::null_mut());
                xlib::XDestroyImage(image);
                return Err(DeviceError::Resource("attach shared-memory segment".into()));
            }
            segment.shmaddr = address as *mut c_char;
            (*image).data = segment.shmaddr;
            segment.read_only = xlib::False;
            if ffi::XShmAttach(display, &mut *segment) == xlib::False {
                libc::shmdt(address);
                libc::shmctl(segment.shmid, libc::IPC_RMID, ptr::null_mut());
                xlib::XDestroyImage(image);
                return Err(DeviceError::Resource("attach segment to the X server".into()));
            }
            let id = ShmImageId(self.allocate());
            self.shm_images.insert(
                id,
                SharedImage {
                    image,
                    segment,
                    width,
                    height,
                },
            );
            Ok(id)
        }
    }

    fn shm_image_buffer(&mut self, image: ShmImageId) -> DeviceResult<PixelBuffer<'_>> {
        let shared = self
            .shm_images
            .get_mut(&image)
            .ok_or_else(|| DeviceError::Invariant(format!("unknown shm image {:?}", image)))?;
        let stride = shared.bytes_per_line();
        let bytes_per_pixel = shared.bytes_per_pixel();
        let (width, height) = (shared.width, shared.height);
        let data = unsafe {
            std::slice::from_raw_parts_mut(
                shared.segment.shmaddr as *mut u8,
                stride * height as usize,
            )
        };
        PixelBuffer::new(data, stride, width, height, bytes_per_pixel)
    }

    fn shm_put_image(&mut self, image: ShmImageId, pixmap: PixmapId) -> DeviceResult<()> {
        let gc = self.native_pixmap(pixmap)?.gc;
        let shared = self
            .shm_images
            .get(&image)
            .ok_or_else(|| DeviceError::Invariant(format!("unknown shm image {:?}", image)))?;
        let sent = unsafe {
            ffi::XShmPutImage(
                self.conn.display(),
                pixmap.0 as xlib::Drawable,
                gc,
                shared.image,
                0,
                0,
                0,
                0,
                shared.width,
                shared.height,
                xlib::True,
            )
        };
        if sent == xlib::False {
            return Err(DeviceError::Invariant("XShmPutImage rejected the request".into()));
        }
        Ok(())
    }

    fn destroy_shm_image(&mut self, image: ShmImageId) {
        match self.shm_images.remove(&image) {
            Some(shared) => self.release_shm_image(shared),
            None => warn!("Destroying unknown shm image {:?}", image),
        }
    }

    fn events_queued(&mut self) -> usize {
        self.conn.events_queued()
    }

    fn next_event(&mut self) -> DeviceResult<DeviceEvent> {
        let event = self.conn.next_event();
        let kind = event.get_type();
        if Some(kind) == self.shm_completion {
            // SAFETY: the server tagged this event with the MIT-SHM
            // completion type, so it has that layout.
            let completion =
                unsafe { &*(&event as *const xlib::XEvent as *const XShmCompletionEvent) };
            return Ok(DeviceEvent::ShmCompletion {
                drawable: PixmapId(completion.drawable as u64),
            });
        }
        Ok(DeviceEvent::Other { kind })
    }

    fn present(&mut self) -> DeviceResult<()> {
        if unsafe { eglSwapBuffers(self.display, self.surface) } == EGL_FALSE {
            return Err(egl_error("eglSwapBuffers"));
        }
        Ok(())
    }
}

impl Drop for EglDevice {
    fn drop(&mut self) {
        let leaked = self.surfaces.len() + self.images.len() + self.shm_images.len();
        if leaked > 0 {
            warn!("Releasing {} device objects left alive", leaked);
        }
        for (_, state) in std::mem::take(&mut self.surfaces) {
            self.release_surface(state);
        }
        let images: Vec<ImageId> = self.images.keys().copied().collect();
        for image in images {
            self.destroy_image(image);
        }
        for (_, shared) in std::mem::take(&mut self.shm_images) {
            self.release_shm_image(shared);
        }
        let pixmaps: Vec<PixmapId> = self.pixmaps.keys().copied().collect();
        for pixmap in pixmaps {
            self.destroy_pixmap(pixmap);
        }

        info!("Tearing down EGL context");
        unsafe {
            eglMakeCurrent(self.display, EGL_NO_SURFACE, EGL_NO_SURFACE, EGL_NO_CONTEXT);
            if self.surface != EGL_NO_SURFACE {
                eglDestroySurface(self.display, self.surface);
            }
            if self.context != EGL_NO_CONTEXT {
                eglDestroyContext(self.display, self.context);
            }
            eglTerminate(self.display);
        }
        if let Some(window) = self.window.take() {
            self.conn.destroy_window(window);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_texture_upload_formats() {
        assert_eq!(
            texture_upload(PixelFormat::Rgb565),
            TextureUpload::Plain {
                format: GL_RGB,
                kind: GL_UNSIGNED_SHORT_5_6_5
            }
        );
        assert_eq!(
            texture_upload(PixelFormat::Alpha8),
            TextureUpload::Plain {
                format: GL_ALPHA,
                kind: GL_UNSIGNED_BYTE
            }
        );
        assert_eq!(
            texture_upload(PixelFormat::Etc1),
            TextureUpload::Compressed {
                internal_format: GL_ETC1_RGB8_OES
            }
        );
        assert_eq!(
            texture_upload(PixelFormat::RgbaPvrtc2),
            TextureUpload::Compressed {
                internal_format: GL_COMPRESSED_RGBA_PVRTC_2BPPV1_IMG
            }
        );
    }

    #[test]
    fn test_compressed_formats_match_their_capability() {
        for format in [
            PixelFormat::Rgba8888,
            PixelFormat::Rgb888,
            PixelFormat::Rgba4444,
            PixelFormat::RgbPvrtc4,
            PixelFormat::Etc1,
        ] {
            let compressed = matches!(texture_upload(format), TextureUpload::Compressed { .. });
            assert_eq!(compressed, format.is_compressed(), "{:?}", format);
        }
    }

    #[test]
    fn test_lockable_config_requests_exact_format() {
        let attrs = pixmap_config_attributes(16, true);
        assert_eq!(attrs[1], EGL_PIXMAP_BIT | EGL_LOCK_SURFACE_BIT_KHR);
        assert_eq!(attrs[3], EGL_FORMAT_RGB_565_EXACT_KHR);
        assert_eq!(attrs[5], 16);
        assert_eq!(attrs.last(), Some(&EGL_NONE));

        let attrs = pixmap_config_attributes(32, true);
        assert_eq!(attrs[3], EGL_FORMAT_RGBA_8888_EXACT_KHR);

        let plain = pixmap_config_attributes(32, false);
        assert_eq!(plain, vec![EGL_SURFACE_TYPE, EGL_PIXMAP_BIT, EGL_BUFFER_SIZE, 32, EGL_NONE]);
    }

    #[test]
    fn test_bitmap_pointer_query_width() {
        assert!(check_pointer_query(true).is_ok());
        if usize::BITS > 32 {
            let err = check_pointer_query(false).unwrap_err();
            assert!(matches!(
                err,
                DeviceError::MissingEntryPoint(ref name) if name == "eglQuerySurface64KHR"
            ));
            assert!(!err.is_fatal());
        } else {
            assert!(check_pointer_query(false).is_ok());
        }
    }

    #[test]
    fn test_unknown_entry_points_are_not_cached() {
        let extensions = Extensions::default();
        assert_eq!(extensions.resolved("eglLockSurfaceKHR"), Some(false));
        assert_eq!(extensions.resolved("glFooBar"), None);
    }
}
