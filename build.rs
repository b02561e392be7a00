use std::env;
use std::path::{Path, PathBuf};

const WATCHED_VARIABLES: [&str; 4] = ["FFMPEG_DIR", "PKG_CONFIG_PATH", "VCPKG_ROOT", "VCPKGRS_TRIPLET"];

fn main() {
    for variable in WATCHED_VARIABLES {
        println!("cargo:rerun-if-env-changed={variable}");
    }

    // An explicit FFmpeg location wins on every platform.
    if let Some(directory) = env::var_os("FFMPEG_DIR") {
        let directory = PathBuf::from(directory);
        if !directory.join("include").join("libavcodec").exists() {
            println!(
                "cargo:warning=FFMPEG_DIR={} has no include/libavcodec; ffmpeg-sys-next will likely fail to find headers.",
                directory.display()
            );
        }
        return;
    }

    match env::var("CARGO_CFG_TARGET_OS").unwrap_or_default().as_str() {
        "windows" => windows_hint(),
        "linux" if env::var_os("CARGO_FEATURE_HARDWARE").is_some() => println!(
            "cargo:warning=The `hardware` feature needs an FFmpeg built with the device types you plan to use (for example --enable-vaapi or --enable-cuda)."
        ),
        _ => {}
    }
}

fn windows_hint() {
    let Ok(root) = env::var("VCPKG_ROOT") else {
        println!(
            "cargo:warning=Neither FFMPEG_DIR nor VCPKG_ROOT is set. Install FFmpeg through vcpkg and point FFMPEG_DIR at it."
        );
        return;
    };

    let triplet = env::var("VCPKGRS_TRIPLET").unwrap_or_else(|_| "x64-windows".to_string());
    let installed = Path::new(&root).join("installed").join(&triplet);
    if installed.exists() {
        println!(
            "cargo:warning=Using vcpkg FFmpeg at {}. Set FFMPEG_DIR to that path to silence this warning.",
            installed.display()
        );
    } else {
        println!(
            "cargo:warning=VCPKG_ROOT is set but {} does not exist (triplet {triplet}).",
            installed.display()
        );
    }
}
