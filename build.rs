// build.rs

/// Selects the display driver the binary is built with:
/// 1. DISPLAY_DRIVER environment variable (highest priority)
/// 2. Enabled Cargo features (display_egl, display_headless)
/// 3. Headless fallback
///
/// Emits a cfg flag for the selected driver and the linker flags it needs.
fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=DISPLAY_DRIVER");

    println!("cargo::rustc-check-cfg=cfg(use_egl_display)");
    println!("cargo::rustc-check-cfg=cfg(use_headless_display)");

    match determine_display_driver().as_str() {
        "egl" => {
            println!("cargo:rustc-cfg=use_egl_display");
            println!("cargo:warning=Building with EGL/X11 display driver");
            link_egl_libraries();
        }
        "headless" => {
            println!("cargo:rustc-cfg=use_headless_display");
        }
        other => panic!("Unknown display driver: {}", other),
    }
}

/// Determines which display driver to use based on environment and features.
fn determine_display_driver() -> String {
    let has_egl = std::env::var("CARGO_FEATURE_DISPLAY_EGL").is_ok();
    let has_headless = std::env::var("CARGO_FEATURE_DISPLAY_HEADLESS").is_ok();

    if let Ok(driver) = std::env::var("DISPLAY_DRIVER") {
        let driver_lower = driver.to_lowercase();
        match driver_lower.as_str() {
            "headless" => return driver_lower,
            // The EGL driver needs the optional x11 dependency compiled in.
            "egl" if has_egl => return driver_lower,
            "egl" => panic!("DISPLAY_DRIVER=egl requires the `display_egl` feature"),
            _ => panic!(
                "Invalid DISPLAY_DRIVER value: '{}'. Must be one of: egl, headless",
                driver
            ),
        }
    }

    if has_egl && !has_headless {
        return "egl".to_string();
    }
    "headless".to_string()
}

/// Links X11, Xext (MIT-SHM), EGL and GLESv2, preferring pkg-config and
/// falling back to plain `-l` flags when a .pc file is missing.
fn link_egl_libraries() {
    let libraries = [
        ("x11", "X11"),
        ("xext", "Xext"),
        ("egl", "EGL"),
        ("glesv2", "GLESv2"),
    ];

    for (pc_name, lib_name) in libraries {
        if let Err(e) = pkg_config::probe_library(pc_name) {
            eprintln!(
                "pkg-config failed for library '{}': {}. Falling back to manual linking.",
                pc_name, e
            );
            println!("cargo:rustc-link-lib={}", lib_name);
        }
    }
}
