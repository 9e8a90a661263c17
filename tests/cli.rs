// tests/cli.rs

use rexpect::error::Error;
use rexpect::spawn;

const BIN: &str = env!("CARGO_BIN_EXE_glmemperf");

#[test]
fn test_list_prints_intro_then_names() -> Result<(), Error> {
    let mut session = spawn(&format!("{} -l", BIN), Some(10_000))?;
    session.exp_string("OpenGL ES 2.0 memory performance benchmark")?;
    session.exp_string("clear")?;
    session.exp_string("blit_tex_rgba8888_800x480")?;
    session.exp_string("blit_cpu_locksurf_32bpp_2x800x480")?;
    session.exp_eof()?;
    Ok(())
}

#[test]
fn test_list_ignores_filters() -> Result<(), Error> {
    let mut session = spawn(&format!("{} --list -i fbo -e clear", BIN), Some(10_000))?;
    session.exp_string("clear")?;
    session.exp_string("blit_fbo_rgba8888_800x480")?;
    session.exp_eof()?;
    Ok(())
}

#[test]
fn test_headless_run_of_one_benchmark() -> Result<(), Error> {
    let mut session = spawn(
        &format!("{} --driver headless -t 0 -i clear -e blit", BIN),
        Some(30_000),
    )?;
    session.exp_regex(r"clear:\s+\d+ fps #+")?;
    session.exp_eof()?;
    Ok(())
}

#[test]
fn test_invalid_depth_fails() -> Result<(), Error> {
    let mut session = spawn(&format!("{} -b 24 -l", BIN), Some(10_000))?;
    session.exp_string("unsupported pixel depth 24")?;
    session.exp_eof()?;
    Ok(())
}

#[test]
fn test_missing_data_dir_fails() -> Result<(), Error> {
    let mut session = spawn(
        &format!(
            "{} --driver headless -t 0 -i clear --data-dir /nonexistent/glmemperf-data",
            BIN
        ),
        Some(10_000),
    )?;
    session.exp_string("data directory /nonexistent/glmemperf-data does not exist")?;
    session.exp_eof()?;
    Ok(())
}
