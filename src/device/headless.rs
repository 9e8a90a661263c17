// src/device/headless.rs

//! Headless device.
//!
//! Nothing is drawn. A device built with `recording` appends every call to a
//! log that tests inspect; `new` keeps no log, so a dry run stays flat in
//! memory however many frames it renders. Resource handles are tracked so
//! leaks and use-after-free show up as counts. Host-visible memory (pixmaps, shared-memory images, locked
//! surfaces) is real heap storage, so fills can be checked byte for byte.
//!
//! Shared-memory puts complete when the frame is presented, or when
//! `next_event` is called with nothing queued (the blocking wait ends).

use super::{
    BlendMode, Capabilities, DeviceError, DeviceEvent, DeviceResult, FramebufferId,
    GraphicsDevice, ImageId, PixelBuffer, PixelFormat, PixmapId, ProgramId, Quad, Rect,
    ShmImageId, SurfaceId, TextureFilter, TextureId,
};
use log::{debug, trace, warn};
use std::collections::{HashMap, HashSet, VecDeque};

/// One recorded device call.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CreateTexture(TextureId),
    DeleteTexture(TextureId),
    BindTexture {
        unit: u32,
        texture: Option<TextureId>,
    },
    UploadTexture {
        texture: TextureId,
        format: PixelFormat,
        width: u32,
        height: u32,
        initialized: bool,
    },
    CreateProgram(ProgramId),
    UseProgram(Option<ProgramId>),
    DeleteProgram(ProgramId),
    SetUniform {
        program: ProgramId,
        name: String,
    },
    SetClearColor([f32; 4]),
    Clear,
    SetBlend(BlendMode),
    SetViewport(Rect),
    SetScissor(Option<Rect>),
    DrawQuad {
        texture: Option<TextureId>,
        program: Option<ProgramId>,
        quad: Quad,
    },
    CreateFramebuffer(FramebufferId),
    BindFramebuffer(Option<FramebufferId>),
    DeleteFramebuffer(FramebufferId),
    CreatePixmap(PixmapId),
    WritePixmap(PixmapId),
    DestroyPixmap(PixmapId),
    BindPixmapTexture {
        pixmap: PixmapId,
        texture: TextureId,
        surface: SurfaceId,
    },
    CreateLockableSurface {
        pixmap: PixmapId,
        surface: SurfaceId,
    },
    DestroySurface(SurfaceId),
    CreatePixmapImage {
        pixmap: PixmapId,
        texture: TextureId,
        image: ImageId,
    },
    DestroyImage(ImageId),
    LockSurface(SurfaceId),
    UnlockSurface(SurfaceId),
    CreateShmImage(ShmImageId),
    ShmPutImage {
        image: ShmImageId,
        pixmap: PixmapId,
    },
    DestroyShmImage(ShmImageId),
    NextEvent(DeviceEvent),
    Present,
}

/// Heap storage standing in for host-visible device memory.
#[derive(Debug)]
struct HostImage {
    data: Vec<u8>,
    stride: usize,
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
}

impl HostImage {
    fn new(width: u32, height: u32, depth: u32) -> Self {
        let bytes_per_pixel = if depth > 16 { 4 } else { 2 };
        // Rows padded to 4 bytes like XImage scanlines.
        let stride = (width as usize * bytes_per_pixel + 3) & !3;
        HostImage {
            data: vec![0; stride * height as usize],
            stride,
            width,
            height,
            bytes_per_pixel,
        }
    }

    fn view(&mut self) -> DeviceResult<PixelBuffer<'_>> {
        PixelBuffer::new(
            &mut self.data,
            self.stride,
            self.width,
            self.height,
            self.bytes_per_pixel,
        )
    }
}

#[derive(Debug)]
struct HeadlessSurface {
    pixmap: PixmapId,
    lockable: bool,
    locked: bool,
}

pub struct HeadlessDevice {
    width: u32,
    height: u32,
    capabilities: Capabilities,
    missing_entry_points: HashSet<String>,
    texture_limit: Option<usize>,
    recording: bool,
    calls: Vec<DeviceCall>,
    next_handle: u32,
    textures: HashSet<TextureId>,
    bound_textures: HashMap<u32, TextureId>,
    programs: HashSet<ProgramId>,
    current_program: Option<ProgramId>,
    framebuffers: HashSet<FramebufferId>,
    pixmaps: HashMap<PixmapId, HostImage>,
    surfaces: HashMap<SurfaceId, HeadlessSurface>,
    images: HashSet<ImageId>,
    shm_images: HashMap<ShmImageId, HostImage>,
    busy_shm_images: HashSet<ShmImageId>,
    in_flight: VecDeque<(ShmImageId, PixmapId)>,
    arrived: VecDeque<(Option<ShmImageId>, DeviceEvent)>,
    viewport: Rect,
    blend: BlendMode,
    pending_error: Option<(usize, DeviceError)>,
    failing_unlocks: bool,
    frames_presented: u64,
}

impl HeadlessDevice {
    /// A device with every capability and entry point available. Calls are
    /// not logged.
    pub fn new(width: u32, height: u32) -> Self {
        debug!("HeadlessDevice::new({}x{})", width, height);
        HeadlessDevice {
            width,
            height,
            capabilities: Capabilities::all(),
            missing_entry_points: HashSet::new(),
            texture_limit: None,
            recording: false,
            calls: Vec::new(),
            next_handle: 1,
            textures: HashSet::new(),
            bound_textures: HashMap::new(),
            programs: HashSet::new(),
            current_program: None,
            framebuffers: HashSet::new(),
            pixmaps: HashMap::new(),
            surfaces: HashMap::new(),
            images: HashSet::new(),
            shm_images: HashMap::new(),
            busy_shm_images: HashSet::new(),
            in_flight: VecDeque::new(),
            arrived: VecDeque::new(),
            viewport: Rect::new(0, 0, width, height),
            blend: BlendMode::Opaque,
            pending_error: None,
            failing_unlocks: false,
            frames_presented: 0,
        }
    }

    /// Like `new`, but every call is kept for `calls`.
    pub fn recording(width: u32, height: u32) -> Self {
        HeadlessDevice {
            recording: true,
            ..HeadlessDevice::new(width, height)
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn without_entry_point(mut self, name: &str) -> Self {
        self.missing_entry_points.insert(name.to_string());
        self
    }

    /// Makes texture creation fail once `limit` textures are alive.
    pub fn with_texture_limit(mut self, limit: usize) -> Self {
        self.texture_limit = Some(limit);
        self
    }

    /// The error the next `check_error` will report.
    pub fn inject_error(&mut self, error: DeviceError) {
        self.inject_error_at(0, error);
    }

    /// The error reported once `skip` more `check_error` calls have passed.
    pub fn inject_error_at(&mut self, skip: usize, error: DeviceError) {
        self.pending_error = Some((skip, error));
    }

    /// Makes every later `unlock_surface` fail, leaving the surface locked.
    pub fn fail_unlocks(&mut self) {
        self.failing_unlocks = true;
    }

    /// Queues a foreign event ahead of any pending completions.
    pub fn push_event(&mut self, event: DeviceEvent) {
        self.arrived.push_back((None, event));
    }

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<DeviceCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend
    }

    /// Number of device objects currently alive.
    pub fn live_resources(&self) -> usize {
        self.textures.len()
            + self.programs.len()
            + self.framebuffers.len()
            + self.pixmaps.len()
            + self.surfaces.len()
            + self.images.len()
            + self.shm_images.len()
    }

    pub fn locked_surfaces(&self) -> usize {
        self.surfaces.values().filter(|s| s.locked).count()
    }

    /// Host bytes currently stored in `pixmap`.
    pub fn pixmap_data(&self, pixmap: PixmapId) -> Option<&[u8]> {
        self.pixmaps.get(&pixmap).map(|p| p.data.as_slice())
    }

    fn allocate(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn record(&mut self, call: DeviceCall) {
        trace!("headless: {:?}", call);
        if self.recording {
            self.calls.push(call);
        }
    }

    fn require_pixmap(&self, pixmap: PixmapId) -> DeviceResult<()> {
        if self.pixmaps.contains_key(&pixmap) {
            Ok(())
        } else {
            Err(DeviceError::Invariant(format!("unknown pixmap {:?}", pixmap)))
        }
    }

    fn require_texture(&self, texture: TextureId) -> DeviceResult<()> {
        if self.textures.contains(&texture) {
            Ok(())
        } else {
            Err(DeviceError::Invariant(format!("unknown texture {:?}", texture)))
        }
    }

    fn surface_mut(&mut self, surface: SurfaceId) -> DeviceResult<&mut HeadlessSurface> {
        self.surfaces
            .get_mut(&surface)
            .ok_or_else(|| DeviceError::Invariant(format!("unknown surface {:?}", surface)))
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn has_entry_point(&self, name: &str) -> bool {
        !self.missing_entry_points.contains(name)
    }

    fn describe(&self) -> Vec<String> {
        vec![
            "driver: headless".to_string(),
            format!("surface: {}x{}", self.width, self.height),
            format!("capabilities: {:?}", self.capabilities),
        ]
    }

    fn check_error(&mut self, call: &'static str) -> DeviceResult<()> {
        match self.pending_error.take() {
            Some((0, err)) => {
                warn!("headless: reporting injected error after {}", call);
                Err(err)
            }
            Some((skip, err)) => {
                self.pending_error = Some((skip - 1, err));
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn create_texture(&mut self, _filter: TextureFilter) -> DeviceResult<TextureId> {
        if let Some(limit) = self.texture_limit {
            if self.textures.len() >= limit {
                return Err(DeviceError::Resource(format!(
                    "allocate texture ({} already alive)",
                    limit
                )));
            }
        }
        let texture = TextureId(self.allocate());
        self.textures.insert(texture);
        self.record(DeviceCall::CreateTexture(texture));
        Ok(texture)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if !self.textures.remove(&texture) {
            warn!("headless: deleting unknown texture {:?}", texture);
        }
        self.bound_textures.retain(|_, bound| *bound != texture);
        self.record(DeviceCall::DeleteTexture(texture));
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) {
        match texture {
            Some(t) => self.bound_textures.insert(unit, t),
            None => self.bound_textures.remove(&unit),
        };
        self.record(DeviceCall::BindTexture { unit, texture });
    }

    fn upload_texture(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
        pixels: Option<&[u8]>,
    ) -> DeviceResult<()> {
        let texture = *self
            .bound_textures
            .get(&0)
            .ok_or_else(|| DeviceError::Invariant("upload with no texture bound".into()))?;
        if let Some(data) = pixels {
            let needed = format.data_size(width, height);
            if data.len() < needed {
                return Err(DeviceError::Invariant(format!(
                    "upload of {}x{} {} needs {} bytes, got {}",
                    width,
                    height,
                    format.name(),
                    needed,
                    data.len()
                )));
            }
        }
        if let Some(cap) = format.required_capability() {
            if !self.capabilities.contains(cap) {
                return Err(DeviceError::Gl {
                    call: "glCompressedTexImage2D",
                    code: 0x0500,
                });
            }
        }
        self.record(DeviceCall::UploadTexture {
            texture,
            format,
            width,
            height,
            initialized: pixels.is_some(),
        });
        Ok(())
    }

    fn create_program(&mut self, vertex: &str, fragment: &str) -> DeviceResult<ProgramId> {
        if vertex.trim().is_empty() {
            return Err(DeviceError::Shader {
                stage: "vertex",
                log: "empty source".into(),
            });
        }
        if fragment.trim().is_empty() {
            return Err(DeviceError::Shader {
                stage: "fragment",
                log: "empty source".into(),
            });
        }
        let program = ProgramId(self.allocate());
        self.programs.insert(program);
        self.record(DeviceCall::CreateProgram(program));
        Ok(program)
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.current_program = program;
        self.record(DeviceCall::UseProgram(program));
    }

    fn delete_program(&mut self, program: ProgramId) {
        if !self.programs.remove(&program) {
            warn!("headless: deleting unknown program {:?}", program);
        }
        if self.current_program == Some(program) {
            self.current_program = None;
        }
        self.record(DeviceCall::DeleteProgram(program));
    }

    fn set_uniform_i32(&mut self, program: ProgramId, name: &str, _value: i32) {
        self.record(DeviceCall::SetUniform {
            program,
            name: name.to_string(),
        });
    }

    fn set_uniform_vec2_array(&mut self, program: ProgramId, name: &str, _values: &[[f32; 2]]) {
        self.record(DeviceCall::SetUniform {
            program,
            name: name.to_string(),
        });
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.record(DeviceCall::SetClearColor(rgba));
    }

    fn clear(&mut self) {
        self.record(DeviceCall::Clear);
    }

    fn set_blend(&mut self, mode: BlendMode) {
        self.blend = mode;
        self.record(DeviceCall::SetBlend(mode));
    }

    fn viewport(&self) -> Rect {
        self.viewport
    }

    fn set_viewport(&mut self, rect: Rect) {
        self.viewport = rect;
        self.record(DeviceCall::SetViewport(rect));
    }

    fn set_scissor(&mut self, rect: Option<Rect>) {
        self.record(DeviceCall::SetScissor(rect));
    }

    fn draw_quad(&mut self, quad: &Quad) {
        let texture = self.bound_textures.get(&0).copied();
        let program = self.current_program;
        self.record(DeviceCall::DrawQuad {
            texture,
            program,
            quad: *quad,
        });
    }

    fn create_framebuffer(
        &mut self,
        color: TextureId,
        _depth: Option<(u32, u32)>,
    ) -> DeviceResult<FramebufferId> {
        self.require_texture(color)?;
        let framebuffer = FramebufferId(self.allocate());
        self.framebuffers.insert(framebuffer);
        self.record(DeviceCall::CreateFramebuffer(framebuffer));
        Ok(framebuffer)
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.record(DeviceCall::BindFramebuffer(framebuffer));
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if !self.framebuffers.remove(&framebuffer) {
            warn!("headless: deleting unknown framebuffer {:?}", framebuffer);
        }
        self.record(DeviceCall::DeleteFramebuffer(framebuffer));
    }

    fn create_pixmap(&mut self, width: u32, height: u32, depth: u32) -> DeviceResult<PixmapId> {
        let pixmap = PixmapId(u64::from(self.allocate()));
        self.pixmaps.insert(pixmap, HostImage::new(width, height, depth));
        self.record(DeviceCall::CreatePixmap(pixmap));
        Ok(pixmap)
    }

    fn write_pixmap(
        &mut self,
        pixmap: PixmapId,
        fill: &mut dyn FnMut(&mut PixelBuffer<'_>),
    ) -> DeviceResult<()> {
        let image = self
            .pixmaps
            .get_mut(&pixmap)
            .ok_or_else(|| DeviceError::Invariant(format!("unknown pixmap {:?}", pixmap)))?;
        let mut view = image.view()?;
        fill(&mut view);
        self.record(DeviceCall::WritePixmap(pixmap));
        Ok(())
    }

    fn destroy_pixmap(&mut self, pixmap: PixmapId) {
        if self.pixmaps.remove(&pixmap).is_none() {
            warn!("headless: destroying unknown pixmap {:?}", pixmap);
        }
        self.record(DeviceCall::DestroyPixmap(pixmap));
    }

    fn bind_pixmap_texture(
        &mut self,
        pixmap: PixmapId,
        _depth: u32,
        texture: TextureId,
    ) -> DeviceResult<SurfaceId> {
        if !self.capabilities.contains(Capabilities::TEXTURE_FROM_PIXMAP) {
            return Err(DeviceError::Unsupported(
                Capabilities::TEXTURE_FROM_PIXMAP.extension_name().into(),
            ));
        }
        self.require_pixmap(pixmap)?;
        self.require_texture(texture)?;
        let surface = SurfaceId(self.allocate());
        self.surfaces.insert(
            surface,
            HeadlessSurface {
                pixmap,
                lockable: false,
                locked: false,
            },
        );
        self.record(DeviceCall::BindPixmapTexture {
            pixmap,
            texture,
            surface,
        });
        Ok(surface)
    }

    fn create_lockable_surface(
        &mut self,
        pixmap: PixmapId,
        _depth: u32,
    ) -> DeviceResult<SurfaceId> {
        if !self.capabilities.contains(Capabilities::LOCK_SURFACE) {
            return Err(DeviceError::NoMatchingConfig("lockable".into()));
        }
        self.require_pixmap(pixmap)?;
        let surface = SurfaceId(self.allocate());
        self.surfaces.insert(
            surface,
            HeadlessSurface {
                pixmap,
                lockable: true,
                locked: false,
            },
        );
        self.record(DeviceCall::CreateLockableSurface { pixmap, surface });
        Ok(surface)
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        match self.surfaces.remove(&surface) {
            Some(s) if s.locked => warn!("headless: destroying locked surface {:?}", surface),
            Some(_) => {}
            None => warn!("headless: destroying unknown surface {:?}", surface),
        }
        self.record(DeviceCall::DestroySurface(surface));
    }

    fn create_pixmap_image(
        &mut self,
        pixmap: PixmapId,
        texture: TextureId,
    ) -> DeviceResult<ImageId> {
        self.require_pixmap(pixmap)?;
        self.require_texture(texture)?;
        let image = ImageId(self.allocate());
        self.images.insert(image);
        self.record(DeviceCall::CreatePixmapImage {
            pixmap,
            texture,
            image,
        });
        Ok(image)
    }

    fn destroy_image(&mut self, image: ImageId) {
        if !self.images.remove(&image) {
            warn!("headless: destroying unknown image {:?}", image);
        }
        self.record(DeviceCall::DestroyImage(image));
    }

    fn lock_surface(&mut self, surface: SurfaceId) -> DeviceResult<PixelBuffer<'_>> {
        let state = self.surface_mut(surface)?;
        if !state.lockable {
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
        state.locked = true;
        let pixmap = state.pixmap;
        self.record(DeviceCall::LockSurface(surface));
        let image = self
            .pixmaps
            .get_mut(&pixmap)
            .ok_or_else(|| DeviceError::Invariant(format!("unknown pixmap {:?}", pixmap)))?;
        image.view()
    }

    fn unlock_surface(&mut self, surface: SurfaceId) -> DeviceResult<()> {
        if self.failing_unlocks {
            return Err(DeviceError::Egl {
                call: "eglUnlockSurfaceKHR",
                code: 0x3002,
            });
        }
        let state = self.surface_mut(surface)?;
        if !state.locked {
            return Err(DeviceError::Invariant(format!(
                "surface {:?} unlocked while not locked",
                surface
            )));
        }
        state.locked = false;
        self.record(DeviceCall::UnlockSurface(surface));
        Ok(())
    }

    fn create_shm_image(
        &mut self,
        width: u32,
        height: u32,
        depth: u32,
    ) -> DeviceResult<ShmImageId> {
        if !self.capabilities.contains(Capabilities::SHM_IMAGE) {
            return Err(DeviceError::Unsupported("MIT-SHM".into()));
        }
        let image = ShmImageId(self.allocate());
        self.shm_images
            .insert(image, HostImage::new(width, height, depth));
        self.record(DeviceCall::CreateShmImage(image));
        Ok(image)
    }

    fn shm_image_buffer(&mut self, image: ShmImageId) -> DeviceResult<PixelBuffer<'_>> {
        if self.busy_shm_images.contains(&image) {
            return Err(DeviceError::Invariant(format!(
                "shared-memory image {:?} written while its transfer is in flight",
                image
            )));
        }
        self.shm_images
            .get_mut(&image)
            .ok_or_else(|| DeviceError::Invariant(format!("unknown shm image {:?}", image)))?
            .view()
    }

    fn shm_put_image(&mut self, image: ShmImageId, pixmap: PixmapId) -> DeviceResult<()> {
        self.require_pixmap(pixmap)?;
        if !self.shm_images.contains_key(&image) {
            return Err(DeviceError::Invariant(format!("unknown shm image {:?}", image)));
        }
        if !self.busy_shm_images.insert(image) {
            return Err(DeviceError::Invariant(format!(
                "shared-memory image {:?} put twice without completion",
                image
            )));
        }
        self.in_flight.push_back((image, pixmap));
        self.record(DeviceCall::ShmPutImage { image, pixmap });
        Ok(())
    }

    fn destroy_shm_image(&mut self, image: ShmImageId) {
        if self.shm_images.remove(&image).is_none() {
            warn!("headless: destroying unknown shm image {:?}", image);
        }
        self.busy_shm_images.remove(&image);
        self.in_flight.retain(|(i, _)| *i != image);
        self.record(DeviceCall::DestroyShmImage(image));
    }

    fn events_queued(&mut self) -> usize {
        self.arrived.len()
    }

    fn next_event(&mut self) -> DeviceResult<DeviceEvent> {
        let (image, event) = match self.arrived.pop_front() {
            Some(entry) => entry,
            None => match self.in_flight.pop_front() {
                Some((image, pixmap)) => (
                    Some(image),
                    DeviceEvent::ShmCompletion { drawable: pixmap },
                ),
                None => {
                    return Err(DeviceError::Invariant(
                        "waiting for an event that can never arrive".into(),
                    ))
                }
            },
        };
        if let Some(image) = image {
            self.busy_shm_images.remove(&image);
        }
        self.record(DeviceCall::NextEvent(event));
        Ok(event)
    }

    fn present(&mut self) -> DeviceResult<()> {
        while let Some((image, pixmap)) = self.in_flight.pop_front() {
            self.arrived
                .push_back((Some(image), DeviceEvent::ShmCompletion { drawable: pixmap }));
        }
        self.frames_presented += 1;
        self.record(DeviceCall::Present);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_shm_completion_arrives_on_present() {
        let mut device = HeadlessDevice::recording(64, 64);
        let pixmap = device.create_pixmap(8, 8, 16).unwrap();
        let image = device.create_shm_image(8, 8, 16).unwrap();

        device.shm_put_image(image, pixmap).unwrap();
        assert_eq!(device.events_queued(), 0);
        assert!(device.shm_image_buffer(image).is_err());

        device.present().unwrap();
        assert_eq!(device.events_queued(), 1);
        assert_eq!(
            device.next_event().unwrap(),
            DeviceEvent::ShmCompletion { drawable: pixmap }
        );
        assert!(device.shm_image_buffer(image).is_ok());
    }

    #[test]
    fn test_blocking_wait_completes_oldest_put() {
        let mut device = HeadlessDevice::recording(64, 64);
        let pixmap = device.create_pixmap(8, 8, 32).unwrap();
        let image = device.create_shm_image(8, 8, 32).unwrap();
        device.shm_put_image(image, pixmap).unwrap();

        assert_eq!(
            device.next_event().unwrap(),
            DeviceEvent::ShmCompletion { drawable: pixmap }
        );
        assert!(device.next_event().unwrap_err().is_fatal());
    }

    #[test]
    fn test_lock_twice_is_invariant_violation() {
        let mut device = HeadlessDevice::recording(64, 64);
        let pixmap = device.create_pixmap(4, 4, 16).unwrap();
        let surface = device.create_lockable_surface(pixmap, 16).unwrap();

        {
            let mut buf = device.lock_surface(surface).unwrap();
            buf.row_mut(0).fill(0xff);
        }
        assert!(device.lock_surface(surface).is_err());
        device.unlock_surface(surface).unwrap();
        assert!(device.unlock_surface(surface).is_err());

        let data = device.pixmap_data(pixmap).unwrap();
        assert!(data[..8].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn test_missing_capabilities_are_reported() {
        let mut device = HeadlessDevice::recording(64, 64).with_capabilities(Capabilities::empty());
        assert!(matches!(
            device.create_shm_image(4, 4, 16),
            Err(DeviceError::Unsupported(_))
        ));
        let pixmap = device.create_pixmap(4, 4, 16).unwrap();
        assert!(device.create_lockable_surface(pixmap, 16).is_err());
    }

    #[test]
    fn test_texture_limit_and_live_count() {
        let mut device = HeadlessDevice::recording(64, 64).with_texture_limit(1);
        let t = device.create_texture(TextureFilter::Linear).unwrap();
        assert!(matches!(
            device.create_texture(TextureFilter::Linear),
            Err(DeviceError::Resource(_))
        ));
        assert_eq!(device.live_resources(), 1);
        device.delete_texture(t);
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn test_unrecorded_device_keeps_no_call_log() {
        let mut device = HeadlessDevice::new(64, 64);
        let pixmap = device.create_pixmap(8, 8, 16).unwrap();
        let image = device.create_shm_image(8, 8, 16).unwrap();
        let quad = Quad {
            positions: [[0.0; 2]; 4],
            texcoords: [[0.0; 2]; 4],
        };
        for _ in 0..10_000 {
            device.clear();
            device.draw_quad(&quad);
            device.shm_put_image(image, pixmap).unwrap();
            device.present().unwrap();
            device.next_event().unwrap();
        }
        assert!(device.calls().is_empty());
        assert_eq!(device.frames_presented(), 10_000);
        assert_eq!(device.events_queued(), 0);
    }

    #[test]
    fn test_draw_records_bound_texture() {
        let mut device = HeadlessDevice::recording(64, 64);
        let t = device.create_texture(TextureFilter::Nearest).unwrap();
        device.bind_texture(0, Some(t));
        let quad = Quad {
            positions: [[0.0; 2]; 4],
            texcoords: [[0.0; 2]; 4],
        };
        device.draw_quad(&quad);
        assert!(matches!(
            device.calls().last(),
            Some(DeviceCall::DrawQuad { texture: Some(id), .. }) if *id == t
        ));
    }
}
