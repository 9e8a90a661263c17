// src/main.rs

mod assets;
mod benchmark;
mod config;
mod device;
mod harness;
mod streaming;
mod suite;

use crate::{
    assets::{AssetSource, DataDirectory, SyntheticAssets},
    benchmark::Context as BenchContext,
    config::{DriverKind, Options},
    device::{GraphicsDevice, HeadlessDevice},
    harness::{Filter, Harness, HarnessConfig, MonotonicClock},
    suite::{standard_suite, SuiteParams},
};

use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "glmemperf",
    version,
    about = "OpenGL ES 2.0 memory performance benchmark"
)]
struct Cli {
    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,
    /// List all tests without running them
    #[arg(short, long)]
    list: bool,
    /// Include a specific test (full name or substring); repeatable
    #[arg(short, long = "include", value_name = "TEST")]
    include: Vec<String>,
    /// Exclude a specific test (full name or substring); repeatable
    #[arg(short, long = "exclude", value_name = "TEST")]
    exclude: Vec<String>,
    /// Minimum time to run each test
    #[arg(short = 't', long = "min-time", value_name = "SECS")]
    min_time: Option<u64>,
    /// Bits per pixel of the window surface
    #[arg(short = 'b', long = "bpp", value_name = "BPP")]
    bits_per_pixel: Option<u32>,
    /// Window width in pixels
    #[arg(long)]
    width: Option<u32>,
    /// Window height in pixels
    #[arg(long)]
    height: Option<u32>,
    /// Directory holding the texture data files
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,
    /// JSON options file; flags override its values
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Display driver: egl or headless
    #[arg(long, value_parser = parse_driver)]
    driver: Option<DriverKind>,
}

fn parse_driver(name: &str) -> Result<DriverKind, String> {
    match name {
        "egl" => Ok(DriverKind::Egl),
        "headless" => Ok(DriverKind::Headless),
        other => Err(format!("unknown driver '{}', expected egl or headless", other)),
    }
}

impl Cli {
    /// Layers the flags over `options`. Include and exclude patterns add to
    /// those already present.
    fn apply(self, options: &mut Options) {
        options.verbose |= self.verbose;
        options.list_only |= self.list;
        options.include.extend(self.include);
        options.exclude.extend(self.exclude);
        if let Some(secs) = self.min_time {
            options.min_time_secs = secs;
        }
        if let Some(bpp) = self.bits_per_pixel {
            options.bits_per_pixel = bpp;
        }
        if let Some(width) = self.width {
            options.window_width = width;
        }
        if let Some(height) = self.height {
            options.window_height = height;
        }
        if let Some(dir) = self.data_dir {
            options.data_dir = Some(dir);
        }
        if let Some(driver) = self.driver {
            options.driver = driver;
        }
    }

    fn into_options(self) -> anyhow::Result<Options> {
        let mut options = match &self.config {
            Some(path) => Options::load(path)?,
            None => Options::default(),
        };
        self.apply(&mut options);
        options.validate()?;
        Ok(options)
    }
}

fn intro() -> String {
    format!(
        "GLMemPerf v{} - OpenGL ES 2.0 memory performance benchmark\n\
         Copyright (C) 2010 Nokia Corporation. GLMemPerf comes with ABSOLUTELY\n\
         NO WARRANTY; This is free software, and you are welcome to redistribute\n\
         it under certain conditions.\n\n",
        env!("CARGO_PKG_VERSION")
    )
}

fn open_device(options: &Options) -> anyhow::Result<Box<dyn GraphicsDevice>> {
    match options.driver {
        DriverKind::Headless => {
            info!("Using the headless device");
            Ok(Box::new(
                HeadlessDevice::new(options.window_width, options.window_height)
                    .with_capabilities(options.headless_capabilities),
            ))
        }
        #[cfg(use_egl_display)]
        DriverKind::Egl => {
            let device = device::egl::EglDevice::new(
                options.window_width,
                options.window_height,
                options.bits_per_pixel,
            )
            .context("Failed to initialize the EGL device")?;
            Ok(Box::new(device))
        }
        #[cfg(not(use_egl_display))]
        DriverKind::Egl => {
            anyhow::bail!("this build has no EGL driver; rebuild with --features display_egl")
        }
    }
}

fn open_assets(options: &Options) -> anyhow::Result<Box<dyn AssetSource>> {
    match DataDirectory::locate(options.data_dir.as_deref())? {
        Some(dir) => Ok(Box::new(dir)),
        None => {
            warn!("No data directory found, using generated texture data");
            Ok(Box::new(SyntheticAssets))
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    print!("{}", intro());

    let options = cli.into_options()?;

    let default_filter = if options.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_micros()
        .init();
    info!("Options: {:?}", options);

    let harness_config = HarnessConfig {
        list_only: options.list_only,
        min_duration: options.min_duration(),
        filter: Filter::new(options.include.clone(), options.exclude.clone()),
    };
    let stdout = io::stdout().lock();
    let mut harness = Harness::new(harness_config, MonotonicClock::new(), stdout);

    if options.list_only {
        let suite = standard_suite(&SuiteParams {
            width: options.window_width,
            height: options.window_height,
            bits_per_pixel: options.bits_per_pixel,
        })
        .context("Failed to build the benchmark list")?;
        harness.list(&suite)?;
        return Ok(());
    }

    let assets = open_assets(&options)?;
    info!("Loading textures from {}", assets.describe());

    let mut device = open_device(&options)?;
    if options.verbose {
        let mut out = io::stdout().lock();
        writeln!(out, "Config attributes:")?;
        for line in device.describe() {
            writeln!(out, "  {}", line)?;
        }
        writeln!(out)?;
    }

    let (width, height) = device.surface_size();
    let mut suite = standard_suite(&SuiteParams {
        width,
        height,
        bits_per_pixel: options.bits_per_pixel,
    })
    .context("Failed to build the benchmark list")?;

    let mut ctx = BenchContext::new(device.as_mut(), assets.as_ref());
    let summary = harness.run_suite(&mut suite, &mut ctx)?;
    info!(
        "Done: {} measured, {} skipped, {} filtered",
        summary.measured, summary.skipped, summary.filtered
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn parse(args: &[&str]) -> Options {
        let cli = Cli::try_parse_from(args).unwrap();
        let mut options = Options::default();
        cli.apply(&mut options);
        options
    }

    #[test]
    fn test_short_flags() {
        let options = parse(&[
            "glmemperf", "-v", "-l", "-i", "fbo", "-i", "tex", "-e", "rot90", "-t", "3", "-b", "32",
        ]);
        assert!(options.verbose);
        assert!(options.list_only);
        assert_eq!(options.include, vec!["fbo", "tex"]);
        assert_eq!(options.exclude, vec!["rot90"]);
        assert_eq!(options.min_time_secs, 3);
        assert_eq!(options.bits_per_pixel, 32);
    }

    #[test]
    fn test_flags_keep_defaults_when_absent() {
        let options = parse(&["glmemperf"]);
        assert_eq!(options, Options::default());
    }

    #[test]
    fn test_long_flags() {
        let options = parse(&[
            "glmemperf",
            "--width",
            "1024",
            "--height",
            "600",
            "--driver",
            "headless",
            "--data-dir",
            "/tmp/data",
        ]);
        assert_eq!((options.window_width, options.window_height), (1024, 600));
        assert_eq!(options.driver, DriverKind::Headless);
        assert_eq!(options.data_dir, Some(PathBuf::from("/tmp/data")));
    }

    #[test]
    fn test_rejects_unknown_driver_and_bad_depth() {
        assert!(Cli::try_parse_from(["glmemperf", "--driver", "vulkan"]).is_err());
        let cli = Cli::try_parse_from(["glmemperf", "-b", "24"]).unwrap();
        assert!(cli.into_options().is_err());
    }

    #[test]
    fn test_flags_override_options_file() {
        let path = std::env::temp_dir().join(format!("glmemperf-cli-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "min_time_secs": 5, "include": ["clear"] }"#).unwrap();
        let cli = Cli::try_parse_from([
            "glmemperf",
            "-c",
            path.to_str().unwrap(),
            "-t",
            "2",
            "-i",
            "fbo",
        ])
        .unwrap();
        let options = cli.into_options().unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(options.min_time_secs, 2);
        assert_eq!(options.include, vec!["clear", "fbo"]);
    }

    #[test]
    fn test_missing_data_dir_fails_instead_of_falling_back() {
        let options = parse(&["glmemperf", "--data-dir", "/nonexistent/glmemperf-data"]);
        let err = open_assets(&options).err().unwrap();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_intro_names_version() {
        let text = intro();
        assert!(text.starts_with(&format!("GLMemPerf v{} - ", env!("CARGO_PKG_VERSION"))));
        assert!(text.ends_with("conditions.\n\n"));
    }
}
