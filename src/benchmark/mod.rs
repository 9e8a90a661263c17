// src/benchmark/mod.rs

//! The benchmark lifecycle.
//!
//! Every benchmark goes through `prepare`, any number of `render(frame)`
//! calls and one `teardown`. All device resources are allocated in
//! `prepare` and released in `teardown`; `render` issues exactly one frame
//! of work. `name` depends only on configuration.
//!
//! The device and asset source are passed in on every call through
//! `Context`; benchmarks hold handles, never the device itself.

pub mod blit;
pub mod clear;
pub mod composite;
pub mod fbo;
pub mod pixmap;
pub mod shader;

pub use blit::{BlitBenchmark, BlitGeometry, Blitter};
pub use clear::ClearBenchmark;
pub use composite::Composite;
pub use fbo::FboBenchmark;
pub use pixmap::PixmapBenchmark;
pub use shader::{ShaderBenchmark, ShaderEffect};

use crate::assets::{AssetError, AssetSource};
use crate::device::{Capabilities, DeviceError, DeviceResult, GraphicsDevice};
use log::{debug, trace};
use thiserror::Error;

/// What a benchmark may touch while it runs.
pub struct Context<'a> {
    pub device: &'a mut dyn GraphicsDevice,
    pub assets: &'a dyn AssetSource,
}

impl<'a> Context<'a> {
    pub fn new(device: &'a mut dyn GraphicsDevice, assets: &'a dyn AssetSource) -> Self {
        Context { device, assets }
    }
}

/// Why `prepare` did not complete.
#[derive(Debug, Error)]
pub enum PrepareError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Asset(#[from] AssetError),
}

impl PrepareError {
    /// Missing capabilities and failed allocations only skip the benchmark;
    /// everything else stops the run.
    pub fn is_fatal(&self) -> bool {
        match self {
            PrepareError::Device(err) => err.is_fatal(),
            PrepareError::Asset(_) => true,
        }
    }
}

pub trait Benchmark {
    /// Stable identifier derived from configuration.
    fn name(&self) -> String;

    /// Allocates every resource the benchmark needs. On error nothing is
    /// left allocated and `teardown` must not be called.
    fn prepare(&mut self, ctx: &mut Context<'_>) -> Result<(), PrepareError>;

    /// Issues one frame of work.
    fn render(&mut self, ctx: &mut Context<'_>, frame: u64) -> DeviceResult<()>;

    /// Releases everything `prepare` allocated.
    fn teardown(&mut self, ctx: &mut Context<'_>) -> DeviceResult<()>;
}

/// A benchmark whose output can be drawn over an existing frame.
pub trait Layer: Benchmark {
    /// Draws one frame of output without clearing first.
    fn draw_layer(&mut self, ctx: &mut Context<'_>, frame: u64) -> DeviceResult<()>;
}

/// Fails with the first capability in `required` the device lacks.
pub fn require(device: &dyn GraphicsDevice, required: Capabilities) -> Result<(), PrepareError> {
    let missing = required - device.capabilities();
    match missing.iter().next() {
        Some(flag) => {
            debug!("Missing capability {}", flag.extension_name());
            Err(DeviceError::Unsupported(flag.extension_name().to_string()).into())
        }
        None => Ok(()),
    }
}

/// Fails with the first extension function the device could not resolve.
pub fn require_entry_points(
    device: &dyn GraphicsDevice,
    names: &[&str],
) -> Result<(), PrepareError> {
    match names.iter().find(|name| !device.has_entry_point(name)) {
        Some(name) => Err(DeviceError::MissingEntryPoint(name.to_string()).into()),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Prepared,
    TornDown,
}

/// Enforces the prepare, render, teardown ordering on a benchmark.
pub struct Lifecycle<'b> {
    inner: &'b mut dyn Benchmark,
    state: LifecycleState,
}

impl<'b> Lifecycle<'b> {
    pub fn new(inner: &'b mut dyn Benchmark) -> Self {
        Lifecycle {
            inner,
            state: LifecycleState::Uninitialized,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn name(&self) -> String {
        self.inner.name()
    }

    fn expect_state(&self, expected: LifecycleState, call: &str) -> DeviceResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(DeviceError::Invariant(format!(
                "{} called on {} in state {:?}",
                call,
                self.inner.name(),
                self.state
            )))
        }
    }

    pub fn prepare(&mut self, ctx: &mut Context<'_>) -> Result<(), PrepareError> {
        self.expect_state(LifecycleState::Uninitialized, "prepare")?;
        self.inner.prepare(ctx)?;
        debug!("{}: prepared", self.inner.name());
        self.state = LifecycleState::Prepared;
        Ok(())
    }

    pub fn render(&mut self, ctx: &mut Context<'_>, frame: u64) -> DeviceResult<()> {
        self.expect_state(LifecycleState::Prepared, "render")?;
        trace!("{}: frame {}", self.inner.name(), frame);
        self.inner.render(ctx, frame)
    }

    pub fn teardown(&mut self, ctx: &mut Context<'_>) -> DeviceResult<()> {
        self.expect_state(LifecycleState::Prepared, "teardown")?;
        self.state = LifecycleState::TornDown;
        debug!("{}: teardown", self.inner.name());
        self.inner.teardown(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::SyntheticAssets;
    use crate::device::HeadlessDevice;
    use test_log::test;

    #[test]
    fn test_lifecycle_rejects_out_of_order_calls() {
        let mut device = HeadlessDevice::recording(64, 64);
        let assets = SyntheticAssets;
        let mut ctx = Context::new(&mut device, &assets);
        let mut clear = ClearBenchmark::new();
        let mut lifecycle = Lifecycle::new(&mut clear);

        assert!(lifecycle.render(&mut ctx, 0).unwrap_err().is_fatal());
        assert!(lifecycle.teardown(&mut ctx).is_err());

        lifecycle.prepare(&mut ctx).unwrap();
        assert!(lifecycle.prepare(&mut ctx).unwrap_err().is_fatal());
        lifecycle.render(&mut ctx, 0).unwrap();
        lifecycle.teardown(&mut ctx).unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::TornDown);
        assert!(lifecycle.render(&mut ctx, 1).is_err());
    }

    #[test]
    fn test_require_reports_missing_extension() {
        let device = HeadlessDevice::new(64, 64).with_capabilities(Capabilities::SHM_IMAGE);
        assert!(require(&device, Capabilities::SHM_IMAGE).is_ok());
        let err = require(&device, Capabilities::LOCK_SURFACE | Capabilities::SHM_IMAGE)
            .unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "EGL_KHR_lock_surface2 not supported");
    }

    #[test]
    fn test_require_entry_points() {
        let device = HeadlessDevice::new(64, 64).without_entry_point("eglLockSurfaceKHR");
        let err = require_entry_points(&device, &["eglCreateImageKHR", "eglLockSurfaceKHR"])
            .unwrap_err();
        assert_eq!(err.to_string(), "entry point eglLockSurfaceKHR unavailable");
    }
}
