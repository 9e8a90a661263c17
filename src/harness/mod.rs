// src/harness/mod.rs

//! Drives benchmarks through their lifecycle and reports throughput.
//!
//! For each benchmark the harness applies the name filter, prepares it,
//! renders a fixed warm-up, then renders and presents frames until both the
//! frame budget and the minimum duration are spent. One line per benchmark
//! goes to the output writer: the padded name followed by either the skip
//! reason or the frame rate and a bar.

pub mod measurement;


pub use measurement::{bar, Clock, Measurement, MeasurementRun, MonotonicClock};

use crate::benchmark::{Benchmark, Context, Lifecycle};
use anyhow::Context as _;
use log::{debug, info};
use std::io::Write;
use std::time::Duration;

/// Frames rendered before measurement starts; their timing is discarded.
pub const WARMUP_FRAMES: u32 = 20;

/// Width of the name column in result lines, including the colon.
pub const NAME_COLUMN: usize = 40;

/// Include/exclude substring filter over benchmark names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl Filter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Filter { include, exclude }
    }

    /// A name passes when it contains any include pattern (or there are
    /// none) and no exclude pattern.
    pub fn matches(&self, name: &str) -> bool {
        let included =
            self.include.is_empty() || self.include.iter().any(|p| name.contains(p.as_str()));
        included && !self.exclude.iter().any(|p| name.contains(p.as_str()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct HarnessConfig {
    pub list_only: bool,
    pub min_duration: Duration,
    pub filter: Filter,
}

/// What happened to one benchmark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Listed,
    Filtered,
    Skipped { reason: String },
    Measured(Measurement),
}

/// Counts over a whole suite run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub listed: usize,
    pub filtered: usize,
    pub skipped: usize,
    pub measured: usize,
}

impl Summary {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Listed => self.listed += 1,
            Outcome::Filtered => self.filtered += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
            Outcome::Measured(_) => self.measured += 1,
        }
    }
}

pub struct Harness<W: Write, C: Clock> {
    config: HarnessConfig,
    clock: C,
    out: W,
}

impl<W: Write, C: Clock> Harness<W, C> {
    pub fn new(config: HarnessConfig, clock: C, out: W) -> Self {
        Harness { config, clock, out }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Prints every name, one per line, without touching any device.
    pub fn list(&mut self, suite: &[Box<dyn Benchmark>]) -> anyhow::Result<Summary> {
        let mut summary = Summary::default();
        for bench in suite {
            writeln!(self.out, "{}", bench.name())?;
            summary.record(&Outcome::Listed);
        }
        Ok(summary)
    }

    /// Runs every benchmark in order. Stops at the first fatal error.
    pub fn run_suite(
        &mut self,
        suite: &mut [Box<dyn Benchmark>],
        ctx: &mut Context<'_>,
    ) -> anyhow::Result<Summary> {
        let mut summary = Summary::default();
        for bench in suite.iter_mut() {
            let outcome = self.run(bench.as_mut(), ctx)?;
            summary.record(&outcome);
        }
        info!(
            "{} measured, {} skipped, {} filtered",
            summary.measured, summary.skipped, summary.filtered
        );
        Ok(summary)
    }

    pub fn run(
        &mut self,
        bench: &mut dyn Benchmark,
        ctx: &mut Context<'_>,
    ) -> anyhow::Result<Outcome> {
        let name = bench.name();
        if self.config.list_only {
            writeln!(self.out, "{}", name)?;
            return Ok(Outcome::Listed);
        }
        if !self.config.filter.matches(&name) {
            debug!("{}: filtered out", name);
            return Ok(Outcome::Filtered);
        }

        write!(
            self.out,
            "{:<width$}",
            format!("{}:", name),
            width = NAME_COLUMN
        )?;
        self.out.flush()?;

        let mut lifecycle = Lifecycle::new(bench);
        if let Err(err) = lifecycle.prepare(ctx) {
            if err.is_fatal() {
                writeln!(self.out)?;
                return Err(err).with_context(|| format!("preparing {}", name));
            }
            info!("{}: skipped: {}", name, err);
            writeln!(self.out, "{}", err)?;
            return Ok(Outcome::Skipped {
                reason: err.to_string(),
            });
        }

        let measurement = self
            .measure(&mut lifecycle, ctx)
            .with_context(|| format!("running {}", name))?;
        lifecycle
            .teardown(ctx)
            .and_then(|()| ctx.device.check_error("teardown"))
            .with_context(|| format!("tearing down {}", name))?;

        let fps = measurement.fps();
        debug!(
            "{}: {} frames in {:?}",
            name, measurement.frames, measurement.elapsed
        );
        writeln!(self.out, "{:3} fps {}", fps, bar(fps))?;
        Ok(Outcome::Measured(measurement))
    }

    fn measure(
        &mut self,
        lifecycle: &mut Lifecycle<'_>,
        ctx: &mut Context<'_>,
    ) -> anyhow::Result<Measurement> {
        for _ in 0..WARMUP_FRAMES {
            lifecycle.render(ctx, 0)?;
            ctx.device.present()?;
        }
        ctx.device.check_error("warm-up")?;

        let mut run = MeasurementRun::start(self.clock.now(), self.config.min_duration);
        while run.wants_frame() {
            lifecycle.render(ctx, run.frame_index())?;
            ctx.device.present()?;
            run.complete_frame(self.clock.now());
        }
        ctx.device.check_error("measurement")?;
        Ok(run.finish())
    }
}
