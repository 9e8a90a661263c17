// src/benchmark/composite.rs

//! Alpha compositing of several independent copies of one benchmark.

use super::{Benchmark, Context, Layer, PrepareError};
use crate::device::{BlendMode, DeviceResult};
use log::{debug, warn};

/// K independently owned instances of `B`, drawn over each other every
/// frame with source-over blending.
///
/// Instance 0 renders a normal frame; the rest are drawn as layers. With a
/// single instance the blend state is never touched.
pub struct Composite<B> {
    layers: Vec<B>,
}

impl<B: Layer> Composite<B> {
    /// Builds `count` instances (at least one) with `make`.
    pub fn new(count: usize, make: impl FnMut() -> B) -> Self {
        let layers = std::iter::repeat_with(make).take(count.max(1)).collect();
        Composite { layers }
    }
}

impl<B: Layer> Benchmark for Composite<B> {
    fn name(&self) -> String {
        let base = self.layers.first().map(|l| l.name()).unwrap_or_default();
        format!("{}_blend{}", base, self.layers.len())
    }

    fn prepare(&mut self, ctx: &mut Context<'_>) -> Result<(), PrepareError> {
        for i in 0..self.layers.len() {
            if let Err(err) = self.layers[i].prepare(ctx) {
                debug!("Layer {} failed to prepare, releasing {} prepared", i, i);
                for prepared in self.layers[..i].iter_mut().rev() {
                    if let Err(teardown_err) = prepared.teardown(ctx) {
                        warn!("Teardown after failed prepare: {}", teardown_err);
                        return Err(teardown_err.into());
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn render(&mut self, ctx: &mut Context<'_>, frame: u64) -> DeviceResult<()> {
        let Some((first, rest)) = self.layers.split_first_mut() else {
            return Ok(());
        };
        first.render(ctx, frame)?;
        if rest.is_empty() {
            return Ok(());
        }
        ctx.device.set_blend(BlendMode::SourceOver);
        for layer in rest {
            layer.draw_layer(ctx, frame)?;
        }
        ctx.device.set_blend(BlendMode::Opaque);
        Ok(())
    }

    fn teardown(&mut self, ctx: &mut Context<'_>) -> DeviceResult<()> {
        for layer in self.layers.iter_mut().rev() {
            layer.teardown(ctx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::SyntheticAssets;
    use crate::benchmark::{BlitBenchmark, PixmapBenchmark};
    use crate::device::headless::DeviceCall;
    use crate::device::{HeadlessDevice, PixelFormat};
    use test_log::test;

    fn blit() -> BlitBenchmark {
        BlitBenchmark::new(PixelFormat::Rgb565, 64, 64, "x.raw")
    }

    fn record(bench: &mut dyn Benchmark, frames: u64) -> Vec<DeviceCall> {
        let mut device = HeadlessDevice::recording(800, 480);
        let assets = SyntheticAssets;
        let mut ctx = Context::new(&mut device, &assets);
        bench.prepare(&mut ctx).unwrap();
        for frame in 0..frames {
            bench.render(&mut ctx, frame).unwrap();
        }
        bench.teardown(&mut ctx).unwrap();
        drop(ctx);
        assert_eq!(device.live_resources(), 0);
        device.take_calls()
    }

    #[test]
    fn test_single_layer_matches_plain_benchmark() {
        let plain = record(&mut blit(), 3);
        let composite = record(&mut Composite::new(1, blit), 3);
        assert_eq!(plain, composite);
        assert!(!composite
            .iter()
            .any(|c| matches!(c, DeviceCall::SetBlend(_))));
    }

    #[test]
    fn test_layers_blend_over_first() {
        let mut composite = Composite::new(3, blit);
        assert_eq!(composite.name(), "blit_tex_rgb565_64x64_blend3");
        let calls = record(&mut composite, 1);

        let frame: Vec<&DeviceCall> = calls
            .iter()
            .skip_while(|c| **c != DeviceCall::Clear)
            .take_while(|c| !matches!(c, DeviceCall::UseProgram(None)))
            .collect();
        let draws = frame
            .iter()
            .filter(|c| matches!(c, DeviceCall::DrawQuad { .. }))
            .count();
        let clears = frame.iter().filter(|c| ***c == DeviceCall::Clear).count();
        assert_eq!(draws, 3);
        assert_eq!(clears, 1);
        assert!(frame.contains(&&DeviceCall::SetBlend(BlendMode::SourceOver)));
        assert!(frame.contains(&&DeviceCall::SetBlend(BlendMode::Opaque)));
    }

    #[test]
    fn test_failed_layer_releases_prepared_layers() {
        let mut device = HeadlessDevice::recording(800, 480).with_texture_limit(2);
        let assets = SyntheticAssets;
        let mut ctx = Context::new(&mut device, &assets);
        let mut composite = Composite::new(4, || PixmapBenchmark::new(32, 32, 16));

        let err = composite.prepare(&mut ctx).unwrap_err();
        assert!(!err.is_fatal());
        drop(ctx);
        assert_eq!(device.live_resources(), 0);
    }
}
