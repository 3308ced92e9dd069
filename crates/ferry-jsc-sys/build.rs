use std::env;
use std::fs;
use std::path::{Path, PathBuf};

// Autobuild tag of oven-sh/WebKit providing static JavaScriptCore archives
const BUN_WEBKIT_VERSION: &str = "aaf3f80b1cc701b412f8abfb7c7f413644a229ff";

const WINDOWS_SYSTEM_LIBS: &[&str] = &[
    "winmm", "bcrypt", "ntdll", "userenv", "dbghelp", "crypt32", "wsock32", "ws2_32", "advapi32",
    "ole32", "oleaut32", "uuid", "shell32",
];

const LINUX_SYSTEM_LIBS: &[&str] = &["stdc++", "atomic", "dl", "pthread", "m"];

fn main() {
    println!("cargo:rerun-if-env-changed=BUN_WEBKIT_VERSION");
    println!("cargo:rerun-if-env-changed=FERRY_WEBKIT_DIR");

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();

    match target_os.as_str() {
        "macos" => link_system_framework(),
        "linux" => {
            let arch = match target_arch.as_str() {
                "x86_64" => "amd64",
                "aarch64" => "arm64",
                other => panic!("bun-webkit has no linux build for {other}"),
            };
            link_static(&webkit_dir("linux", arch));
            for lib in LINUX_SYSTEM_LIBS {
                println!("cargo:rustc-link-lib={lib}");
            }
        }
        "windows" => {
            if target_arch != "x86_64" {
                panic!("bun-webkit has no windows build for {target_arch}");
            }
            link_static(&webkit_dir("windows", "amd64"));
            for lib in WINDOWS_SYSTEM_LIBS {
                println!("cargo:rustc-link-lib={lib}");
            }
            println!("cargo:rustc-link-arg=/NODEFAULTLIB:libcmt");
            println!("cargo:rustc-link-lib=msvcrt");
        }
        other => panic!("JavaScriptCore is not available for {other}"),
    }
}

fn link_system_framework() {
    println!("cargo:rustc-link-lib=framework=JavaScriptCore");

    if let Ok(output) = std::process::Command::new("xcrun")
        .arg("--show-sdk-path")
        .output()
    {
        let sdk = String::from_utf8_lossy(&output.stdout);
        println!(
            "cargo:rustc-link-search=framework={}/System/Library/Frameworks",
            sdk.trim()
        );
    }
}

/// Locates an unpacked bun-webkit tree, downloading it into the cargo cache on first use.
fn webkit_dir(os: &str, arch: &str) -> PathBuf {
    if let Ok(dir) = env::var("FERRY_WEBKIT_DIR") {
        return PathBuf::from(dir);
    }

    let version = env::var("BUN_WEBKIT_VERSION").unwrap_or_else(|_| BUN_WEBKIT_VERSION.into());
    let dir = cache_root().join(&version).join(format!("{os}-{arch}"));
    let marker = dir.join(".complete");
    if marker.exists() {
        return dir;
    }

    let url = format!(
        "https://github.com/oven-sh/WebKit/releases/download/autobuild-{version}/bun-webkit-{os}-{arch}.tar.gz"
    );
    println!("cargo:warning=downloading bun-webkit from {url}");

    fs::create_dir_all(&dir).unwrap_or_else(|e| panic!("cannot create {}: {e}", dir.display()));
    let response = ureq::get(&url)
        .call()
        .unwrap_or_else(|e| panic!("bun-webkit download failed ({url}): {e}"));

    // Stream straight into the decoder; the archive is too large to buffer
    let decoder = flate2::read::GzDecoder::new(response.into_body().into_reader());
    tar::Archive::new(decoder)
        .unpack(&dir)
        .unwrap_or_else(|e| panic!("cannot unpack bun-webkit: {e}"));
    fs::write(&marker, version).unwrap_or_else(|e| panic!("cannot write marker: {e}"));

    dir
}

fn link_static(webkit: &Path) {
    let lib_dir = find_lib_dir(webkit);
    println!("cargo:rustc-link-search=native={}", lib_dir.display());

    println!("cargo:rustc-link-lib=static=JavaScriptCore");
    println!("cargo:rustc-link-lib=static=WTF");

    // Some Windows builds fold bmalloc into WTF
    if has_archive(&lib_dir, "bmalloc") {
        println!("cargo:rustc-link-lib=static=bmalloc");
    }

    // Windows archives use the sicu* names
    let icu: &[&str] = if has_archive(&lib_dir, "icudata") {
        &["icudata", "icui18n", "icuuc"]
    } else if has_archive(&lib_dir, "sicudt") {
        &["sicudt", "sicuin", "sicuuc"]
    } else {
        println!("cargo:warning=no ICU archives in {}", lib_dir.display());
        &[]
    };
    for lib in icu {
        println!("cargo:rustc-link-lib=static={lib}");
    }

    let include = webkit.join("include");
    if include.exists() {
        println!("cargo:include={}", include.display());
    }
}

fn find_lib_dir(webkit: &Path) -> PathBuf {
    let direct = webkit.join("lib");
    if direct.exists() {
        return direct;
    }

    fs::read_dir(webkit)
        .into_iter()
        .flatten()
        .flatten()
        .map(|entry| entry.path().join("lib"))
        .find(|candidate| candidate.is_dir())
        .unwrap_or_else(|| webkit.to_path_buf())
}

fn has_archive(lib_dir: &Path, name: &str) -> bool {
    let prefixed = format!("lib{name}");
    fs::read_dir(lib_dir)
        .into_iter()
        .flatten()
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .any(|file| {
            (file.starts_with(name) || file.starts_with(&prefixed))
                && (file.ends_with(".a") || file.ends_with(".lib"))
        })
}

fn cache_root() -> PathBuf {
    let home = env::var("CARGO_HOME").map(PathBuf::from).or_else(|_| {
        env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .map(|home| PathBuf::from(home).join(".cargo"))
    });

    match home {
        Ok(home) => home.join("cache").join("bun-webkit"),
        Err(_) => PathBuf::from(env::var("OUT_DIR").unwrap_or_default()).join("bun-webkit"),
    }
}
