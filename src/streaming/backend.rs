// src/streaming/backend.rs

//! Per-strategy transfer state of the streaming engine.

use super::{fill_pattern, StreamingConfig};
use crate::benchmark::Context;
use crate::device::{
    DeviceError, DeviceEvent, DeviceResult, ImageId, PixelBuffer, PixmapId,
    ShmImageId, SurfaceId, TextureId,
};
use log::{debug, trace, warn};
use std::collections::HashMap;

/// How filled buffers reach their textures.
#[derive(Debug)]
pub enum Backend {
    Upload(UploadState),
    Shm(ShmState),
    LockSurface(LockState),
}

impl Backend {
    /// Fills buffer `write` with the pattern for `frame` and hands it to the
    /// device. `read` is the buffer sampled this frame.
    pub fn stream(
        &mut self,
        ctx: &mut Context<'_>,
        config: &StreamingConfig,
        textures: &[TextureId],
        write: usize,
        read: usize,
        frame: u64,
    ) -> DeviceResult<()> {
        match self {
            Backend::Upload(state) => state.stream(ctx, config, textures[write], write, frame),
            Backend::Shm(state) => state.stream(ctx, write, frame),
            Backend::LockSurface(state) => state.stream(ctx, write, read, frame),
        }
    }

    pub fn release(self, ctx: &mut Context<'_>) -> DeviceResult<()> {
        match self {
            Backend::Upload(_) => Ok(()),
            Backend::Shm(state) => {
                state.release(ctx);
                Ok(())
            }
            Backend::LockSurface(state) => state.release(ctx),
        }
    }
}

/// Plain heap buffers copied in with a synchronous upload.
#[derive(Debug)]
pub struct UploadState {
    buffers: Vec<Vec<u8>>,
    stride: usize,
}

impl UploadState {
    pub fn new(config: &StreamingConfig) -> Self {
        let stride = config.width as usize * config.bytes_per_pixel();
        let buffers = (0..config.buffers)
            .map(|_| vec![0u8; stride * config.height as usize])
            .collect();
        UploadState { buffers, stride }
    }

    fn stream(
        &mut self,
        ctx: &mut Context<'_>,
        config: &StreamingConfig,
        texture: TextureId,
        write: usize,
        frame: u64,
    ) -> DeviceResult<()> {
        let data = &mut self.buffers[write];
        let mut view = PixelBuffer::new(
            data,
            self.stride,
            config.width,
            config.height,
            config.bytes_per_pixel(),
        )?;
        fill_pattern(&mut view, frame);
        ctx.device.bind_texture(0, Some(texture));
        ctx.device.upload_texture(
            config.format(),
            config.width,
            config.height,
            Some(self.buffers[write].as_slice()),
        )
    }
}

#[derive(Debug)]
struct ShmSlot {
    pixmap: PixmapId,
    surface: SurfaceId,
    image: ShmImageId,
    completed: bool,
}

/// Shared-memory images put into pixmaps bound as textures.
///
/// A slot is not written again until the server has reported that its last
/// put completed.
#[derive(Debug, Default)]
pub struct ShmState {
    slots: Vec<ShmSlot>,
    by_drawable: HashMap<PixmapId, usize>,
}

impl ShmState {
    /// Creates one pixmap, texture binding and shared-memory image per
    /// texture. Nothing is left allocated on error.
    pub fn build(
        ctx: &mut Context<'_>,
        config: &StreamingConfig,
        textures: &[TextureId],
    ) -> DeviceResult<Self> {
        let mut state = ShmState::default();
        for &texture in textures {
            match Self::create_slot(ctx, config, texture) {
                Ok(slot) => {
                    state.by_drawable.insert(slot.pixmap, state.slots.len());
                    state.slots.push(slot);
                }
                Err(err) => {
                    state.release(ctx);
                    return Err(err);
                }
            }
        }
        Ok(state)
    }

    fn create_slot(
        ctx: &mut Context<'_>,
        config: &StreamingConfig,
        texture: TextureId,
    ) -> DeviceResult<ShmSlot> {
        let depth = config.bits_per_pixel;
        let pixmap = ctx
            .device
            .create_pixmap(config.width, config.height, depth)?;
        ctx.device.bind_texture(0, Some(texture));
        let surface = match ctx.device.bind_pixmap_texture(pixmap, depth, texture) {
            Ok(surface) => surface,
            Err(err) => {
                ctx.device.destroy_pixmap(pixmap);
                return Err(err);
            }
        };
        let image = match ctx
            .device
            .create_shm_image(config.width, config.height, depth)
        {
            Ok(image) => image,
            Err(err) => {
                ctx.device.destroy_surface(surface);
                ctx.device.destroy_pixmap(pixmap);
                return Err(err);
            }
        };
        Ok(ShmSlot {
            pixmap,
            surface,
            image,
            completed: true,
        })
    }

    /// Dispatches events until none are queued and slot `index` is free.
    fn wait_for_slot(&mut self, ctx: &mut Context<'_>, index: usize) -> DeviceResult<()> {
        while ctx.device.events_queued() > 0 || !self.slots[index].completed {
            match ctx.device.next_event()? {
                DeviceEvent::ShmCompletion { drawable } => {
                    let Some(&slot) = self.by_drawable.get(&drawable) else {
                        trace!("Completion for foreign drawable {:?}", drawable);
                        continue;
                    };
                    if self.slots[slot].completed {
                        return Err(DeviceError::Invariant(format!(
                            "second completion for buffer {} without a put",
                            slot
                        )));
                    }
                    self.slots[slot].completed = true;
                }
                DeviceEvent::Other { kind } => trace!("Ignoring event type {}", kind),
            }
        }
        Ok(())
    }

    fn stream(&mut self, ctx: &mut Context<'_>, write: usize, frame: u64) -> DeviceResult<()> {
        self.wait_for_slot(ctx, write)?;
        let slot = &mut self.slots[write];
        {
            let mut view = ctx.device.shm_image_buffer(slot.image)?;
            fill_pattern(&mut view, frame);
        }
        ctx.device.shm_put_image(slot.image, slot.pixmap)?;
        slot.completed = false;
        Ok(())
    }

    /// Whether slot `index` has no transfer outstanding.
    pub fn is_completed(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(|s| s.completed)
    }

    fn release(self, ctx: &mut Context<'_>) {
        for slot in self.slots {
            if !slot.completed {
                debug!("Releasing buffer with a put in flight");
            }
            ctx.device.destroy_shm_image(slot.image);
            ctx.device.destroy_surface(slot.surface);
            ctx.device.destroy_pixmap(slot.pixmap);
        }
    }
}

#[derive(Debug)]
struct LockSlot {
    pixmap: PixmapId,
    surface: SurfaceId,
    image: ImageId,
    locked: bool,
}

/// Lockable pixmap surfaces whose pixmaps back the textures through device
/// images.
#[derive(Debug, Default)]
pub struct LockState {
    slots: Vec<LockSlot>,
}

impl LockState {
    pub fn build(
        ctx: &mut Context<'_>,
        config: &StreamingConfig,
        textures: &[TextureId],
    ) -> DeviceResult<Self> {
        let mut state = LockState::default();
        for &texture in textures {
            match Self::create_slot(ctx, config, texture) {
                Ok(slot) => state.slots.push(slot),
                Err(err) => {
                    if let Err(cleanup) = state.release(ctx) {
                        warn!("Cleanup after failed setup: {}", cleanup);
                    }
                    return Err(err);
                }
            }
        }
        Ok(state)
    }

    fn create_slot(
        ctx: &mut Context<'_>,
        config: &StreamingConfig,
        texture: TextureId,
    ) -> DeviceResult<LockSlot> {
        let depth = config.bits_per_pixel;
        let pixmap = ctx
            .device
            .create_pixmap(config.width, config.height, depth)?;
        let surface = match ctx.device.create_lockable_surface(pixmap, depth) {
            Ok(surface) => surface,
            Err(err) => {
                ctx.device.destroy_pixmap(pixmap);
                return Err(err);
            }
        };
        ctx.device.bind_texture(0, Some(texture));
        let image = match ctx.device.create_pixmap_image(pixmap, texture) {
            Ok(image) => image,
            Err(err) => {
                ctx.device.destroy_surface(surface);
                ctx.device.destroy_pixmap(pixmap);
                return Err(err);
            }
        };
        Ok(LockSlot {
            pixmap,
            surface,
            image,
            locked: false,
        })
    }

    fn stream(
        &mut self,
        ctx: &mut Context<'_>,
        write: usize,
        read: usize,
        frame: u64,
    ) -> DeviceResult<()> {
        let slot = &mut self.slots[write];
        {
            let mut view = ctx.device.lock_surface(slot.surface)?;
            fill_pattern(&mut view, frame);
        }
        slot.locked = true;

        // Nothing to publish until the read slot has been locked once.
        let read_slot = &mut self.slots[read];
        if read_slot.locked {
            ctx.device.unlock_surface(read_slot.surface)?;
            read_slot.locked = false;
        }
        Ok(())
    }

    pub fn locked(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(|s| s.locked)
    }

    /// Releases every slot; the first unlock failure is reported after all
    /// slots are gone.
    fn release(self, ctx: &mut Context<'_>) -> DeviceResult<()> {
        let mut result = Ok(());
        for slot in self.slots {
            if slot.locked {
                warn!("Unlocking surface {:?} left locked", slot.surface);
                if let Err(err) = ctx.device.unlock_surface(slot.surface) {
                    warn!("Unlocking surface {:?} failed: {}", slot.surface, err);
                    result = result.and(Err(err));
                }
            }
            ctx.device.destroy_image(slot.image);
            ctx.device.destroy_surface(slot.surface);
            ctx.device.destroy_pixmap(slot.pixmap);
        }
        result
    }
}
