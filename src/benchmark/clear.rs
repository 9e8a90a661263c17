// src/benchmark/clear.rs

use super::{Benchmark, Context, PrepareError};
use crate::device::DeviceResult;

const CLEAR_COLOR: [f32; 4] = [1.0, 0.27, 0.0, 1.0];

/// Full-surface color clear; the fill-rate baseline.
#[derive(Debug, Default)]
pub struct ClearBenchmark;

impl ClearBenchmark {
    pub fn new() -> Self {
        ClearBenchmark
    }
}

impl Benchmark for ClearBenchmark {
    fn name(&self) -> String {
        "clear".to_string()
    }

    fn prepare(&mut self, ctx: &mut Context<'_>) -> Result<(), PrepareError> {
        ctx.device.set_clear_color(CLEAR_COLOR);
        Ok(())
    }

    fn render(&mut self, ctx: &mut Context<'_>, _frame: u64) -> DeviceResult<()> {
        ctx.device.clear();
        Ok(())
    }

    fn teardown(&mut self, _ctx: &mut Context<'_>) -> DeviceResult<()> {
        Ok(())
    }
}
