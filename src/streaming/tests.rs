// src/streaming/tests.rs

use super::*;
use crate::assets::SyntheticAssets;
use crate::device::headless::DeviceCall;
use crate::device::{DeviceEvent, GraphicsDevice, HeadlessDevice, PixmapId, ShmImageId};
use std::collections::HashMap;
use test_log::test;

fn streaming(method: StreamingMethod, buffers: usize, bpp: u32, w: u32, h: u32) -> StreamingBenchmark {
    let config = StreamingConfig::new(method, buffers, bpp, w, h).unwrap();
    StreamingBenchmark::new(config).unwrap()
}

/// Prepares, renders and presents `frames` frames, then tears down.
fn run(bench: &mut StreamingBenchmark, device: &mut HeadlessDevice, frames: u64) {
    let assets = SyntheticAssets;
    let mut ctx = Context::new(device, &assets);
    bench.prepare(&mut ctx).unwrap();
    for frame in 0..frames {
        bench.render(&mut ctx, frame).unwrap();
        ctx.device.present().unwrap();
    }
    bench.teardown(&mut ctx).unwrap();
}

#[test]
fn test_config_validation() {
    assert_eq!(
        StreamingConfig::new(StreamingMethod::TextureUpload, 1, 16, 8, 8),
        Err(StreamingError::TooFewBuffers(1))
    );
    assert_eq!(
        StreamingConfig::new(StreamingMethod::TextureUpload, 2, 24, 8, 8),
        Err(StreamingError::UnsupportedDepth(24))
    );
    let config = StreamingConfig::new(StreamingMethod::ShmImage, 3, 32, 8, 8).unwrap();
    assert_eq!(config.format(), PixelFormat::Rgba8888);
}

#[test]
fn test_streaming_names() {
    assert_eq!(
        streaming(StreamingMethod::ShmImage, 2, 16, 800, 480).name(),
        "blit_cpu_shmimage_16bpp_2x800x480"
    );
    assert_eq!(
        streaming(StreamingMethod::LockSurface, 3, 32, 64, 32).name(),
        "blit_cpu_locksurf_32bpp_3x64x32"
    );
}

#[test]
fn test_fill_pattern_stripes_move_with_frame() {
    let mut data = vec![0x55u8; 32 * 2];
    {
        let mut buf = PixelBuffer::new(&mut data, 64, 32, 1, 2).unwrap();
        fill_pattern(&mut buf, 0);
    }
    assert!(data[..32].iter().all(|&b| b == 0));
    assert!(data[32..].iter().all(|&b| b == 0xff));

    {
        let mut buf = PixelBuffer::new(&mut data, 64, 32, 1, 2).unwrap();
        fill_pattern(&mut buf, 16);
    }
    assert!(data[..32].iter().all(|&b| b == 0xff));
    assert!(data[32..].iter().all(|&b| b == 0));
}

#[test]
fn test_upload_binds_texture_written_the_frame_before() {
    let mut device = HeadlessDevice::recording(800, 480);
    let assets = SyntheticAssets;
    let mut bench = streaming(StreamingMethod::TextureUpload, 2, 16, 64, 64);
    let mut ctx = Context::new(&mut device, &assets);
    bench.prepare(&mut ctx).unwrap();
    for frame in 0..3 {
        bench.render(&mut ctx, frame).unwrap();
        ctx.device.present().unwrap();
    }
    assert_eq!(bench.write_index(), 1);
    assert_eq!(bench.read_index(), 0);
    let textures = bench.textures().to_vec();
    drop(ctx);

    let uploads: Vec<TextureId> = device
        .calls()
        .iter()
        .filter_map(|c| match c {
            DeviceCall::UploadTexture {
                texture,
                format,
                width: 64,
                height: 64,
                initialized: true,
            } if *format == PixelFormat::Rgb565 => Some(*texture),
            _ => None,
        })
        .collect();
    let draws: Vec<Option<TextureId>> = device
        .calls()
        .iter()
        .filter_map(|c| match c {
            DeviceCall::DrawQuad { texture, .. } => Some(*texture),
            _ => None,
        })
        .collect();

    assert_eq!(uploads, vec![textures[0], textures[1], textures[0]]);
    assert_eq!(draws.len(), 3);
    assert_eq!(draws[2], Some(uploads[1]));
    assert_eq!(draws[0], Some(textures[1]));
}

#[test]
fn test_shm_buffers_wait_for_completion() {
    for buffers in 2..=4 {
        let mut device = HeadlessDevice::recording(800, 480);
        let mut bench = streaming(StreamingMethod::ShmImage, buffers, 16, 32, 16);
        // The headless device rejects writes to an image with a put in flight.
        run(&mut bench, &mut device, 40);
        assert_eq!(device.live_resources(), 0);

        // Between two puts of one image exactly one completion is observed.
        let mut pixmap_of: HashMap<ShmImageId, PixmapId> = HashMap::new();
        let mut pending: HashMap<PixmapId, u32> = HashMap::new();
        for call in device.calls() {
            match call {
                DeviceCall::ShmPutImage { image, pixmap } => {
                    pixmap_of.insert(*image, *pixmap);
                    let outstanding = pending.entry(*pixmap).or_insert(0);
                    assert_eq!(*outstanding, 0, "put while previous transfer in flight");
                    *outstanding = 1;
                }
                DeviceCall::NextEvent(DeviceEvent::ShmCompletion { drawable }) => {
                    let outstanding = pending.get_mut(drawable).unwrap();
                    assert_eq!(*outstanding, 1, "completion without a put");
                    *outstanding = 0;
                }
                _ => {}
            }
        }
        assert_eq!(pixmap_of.len(), buffers);
    }
}

#[test]
fn test_shm_blocks_for_completion_without_present() {
    let mut device = HeadlessDevice::recording(800, 480);
    let assets = SyntheticAssets;
    let mut bench = streaming(StreamingMethod::ShmImage, 2, 32, 16, 16);
    let mut ctx = Context::new(&mut device, &assets);
    bench.prepare(&mut ctx).unwrap();
    for frame in 0..5 {
        bench.render(&mut ctx, frame).unwrap();
        let Some(Backend::Shm(state)) = bench.backend() else {
            panic!("shared-memory backend not built");
        };
        // With no present the previous frame's put stays in flight too.
        let written = (frame % 2) as usize;
        assert!(!state.is_completed(written));
        assert_eq!(state.is_completed(1 - written), frame == 0);
    }
    bench.teardown(&mut ctx).unwrap();
    drop(ctx);

    let waits = device
        .calls()
        .iter()
        .filter(|c| matches!(c, DeviceCall::NextEvent(_)))
        .count();
    // Frames 2, 3 and 4 each wait for the put made two frames earlier.
    assert_eq!(waits, 3);
}

#[test]
fn test_shm_drains_foreign_events() {
    let mut device = HeadlessDevice::recording(800, 480);
    device.push_event(DeviceEvent::Other { kind: 12 });
    device.push_event(DeviceEvent::ShmCompletion {
        drawable: PixmapId(9999),
    });
    let mut bench = streaming(StreamingMethod::ShmImage, 2, 16, 16, 16);
    run(&mut bench, &mut device, 3);
    assert!(device
        .calls()
        .contains(&DeviceCall::NextEvent(DeviceEvent::Other { kind: 12 })));
    assert_eq!(device.live_resources(), 0);
}

#[test]
fn test_shm_skipped_without_extension() {
    let mut device = HeadlessDevice::recording(800, 480)
        .with_capabilities(Capabilities::all() - Capabilities::SHM_IMAGE);
    let assets = SyntheticAssets;
    let mut ctx = Context::new(&mut device, &assets);
    let mut bench = streaming(StreamingMethod::ShmImage, 2, 16, 16, 16);
    let err = bench.prepare(&mut ctx).unwrap_err();
    assert!(!err.is_fatal());
    assert_eq!(err.to_string(), "MIT-SHM not supported");
    drop(ctx);
    assert!(device.calls().is_empty());
}

#[test]
fn test_lock_surface_publishes_by_unlocking_read_buffer() {
    let mut device = HeadlessDevice::recording(800, 480);
    let assets = SyntheticAssets;
    let mut bench = streaming(StreamingMethod::LockSurface, 2, 16, 16, 16);
    let mut ctx = Context::new(&mut device, &assets);
    bench.prepare(&mut ctx).unwrap();

    bench.render(&mut ctx, 0).unwrap();
    // Frame 0 has no earlier lock on the read buffer to release.
    match bench.backend() {
        Some(Backend::LockSurface(state)) => {
            assert!(state.locked(0));
            assert!(!state.locked(1));
        }
        other => panic!("unexpected backend {:?}", other),
    }
    bench.render(&mut ctx, 1).unwrap();
    match bench.backend() {
        Some(Backend::LockSurface(state)) => {
            assert!(!state.locked(0));
            assert!(state.locked(1));
        }
        other => panic!("unexpected backend {:?}", other),
    }

    bench.teardown(&mut ctx).unwrap();
    drop(ctx);
    assert_eq!(device.locked_surfaces(), 0);
    assert_eq!(device.live_resources(), 0);
}

#[test]
fn test_lock_teardown_releases_every_slot_when_unlock_fails() {
    let mut device = HeadlessDevice::recording(800, 480);
    let assets = SyntheticAssets;
    // Four frames over three buffers leave buffer 0 locked.
    let mut bench = streaming(StreamingMethod::LockSurface, 3, 32, 16, 16);
    {
        let mut ctx = Context::new(&mut device, &assets);
        bench.prepare(&mut ctx).unwrap();
        for frame in 0..4 {
            bench.render(&mut ctx, frame).unwrap();
        }
    }
    assert_eq!(device.locked_surfaces(), 1);

    device.fail_unlocks();
    let mut ctx = Context::new(&mut device, &assets);
    let err = bench.teardown(&mut ctx).unwrap_err();
    assert!(matches!(
        err,
        DeviceError::Egl {
            call: "eglUnlockSurfaceKHR",
            ..
        }
    ));
    drop(ctx);
    assert_eq!(device.live_resources(), 0);
}

#[test]
fn test_lock_surface_needs_entry_points() {
    let mut device = HeadlessDevice::recording(800, 480)
        .without_entry_point("glEGLImageTargetTexture2DOES");
    let assets = SyntheticAssets;
    let mut ctx = Context::new(&mut device, &assets);
    let mut bench = streaming(StreamingMethod::LockSurface, 2, 32, 16, 16);
    let err = bench.prepare(&mut ctx).unwrap_err();
    assert_eq!(
        err.to_string(),
        "entry point glEGLImageTargetTexture2DOES unavailable"
    );
    drop(ctx);
    assert_eq!(device.live_resources(), 0);
}

#[test]
fn test_lock_surface_needs_wide_pointer_query_on_64_bit() {
    let mut device = HeadlessDevice::recording(800, 480).without_entry_point(WIDE_POINTER_QUERY);
    let assets = SyntheticAssets;
    let mut ctx = Context::new(&mut device, &assets);
    let mut bench = streaming(StreamingMethod::LockSurface, 2, 32, 16, 16);
    let result = bench.prepare(&mut ctx);
    if usize::BITS > 32 {
        let err = result.unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "entry point eglQuerySurface64KHR unavailable");
    } else {
        result.unwrap();
        bench.teardown(&mut ctx).unwrap();
    }
    drop(ctx);
    assert_eq!(device.live_resources(), 0);
}

#[test]
fn test_failed_prepare_releases_partial_state() {
    let mut device = HeadlessDevice::recording(800, 480).with_texture_limit(1);
    let assets = SyntheticAssets;
    let mut ctx = Context::new(&mut device, &assets);
    let mut bench = streaming(StreamingMethod::ShmImage, 2, 16, 16, 16);
    assert!(!bench.prepare(&mut ctx).unwrap_err().is_fatal());
    assert!(bench.textures().is_empty());
    drop(ctx);
    assert_eq!(device.live_resources(), 0);
}

#[test]
fn test_name_is_stable_across_frames() {
    let mut device = HeadlessDevice::recording(800, 480);
    let mut bench = streaming(StreamingMethod::TextureUpload, 2, 32, 8, 8);
    let before = bench.name();
    run(&mut bench, &mut device, 5);
    assert_eq!(bench.name(), before);
}
