use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

/// One stage of the textured-quad shader: (profile, entry point, cso file,
/// cfg flag, env var naming the compiled blob).
const STAGES: [(&str, &str, &str, &str, &str); 2] = [
    (
        "vs_4_0",
        "vs_main",
        "dirty_quad_vs.cso",
        "has_precompiled_dirty_quad_vs",
        "DIRTY_QUAD_VS_CSO_PATH",
    ),
    (
        "ps_4_0",
        "ps_main",
        "dirty_quad_ps.cso",
        "has_precompiled_dirty_quad_ps",
        "DIRTY_QUAD_PS_CSO_PATH",
    ),
];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src/platform/windows/dirty_quad.hlsl");
    for (_, _, _, cfg, _) in STAGES {
        println!("cargo:rustc-check-cfg=cfg({cfg})");
    }
    println!("cargo:rerun-if-env-changed=SNOW_DUPLICATION_FXC_PATH");

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os != "windows" {
        return;
    }

    let Some(out_dir) = env::var_os("OUT_DIR").map(PathBuf::from) else {
        println!("cargo:warning=OUT_DIR is not set; will use runtime D3DCompile fallback");
        return;
    };
    let hlsl_path = PathBuf::from("src/platform/windows/dirty_quad.hlsl");

    if !hlsl_path.exists() {
        return;
    }

    // SNOW_DUPLICATION_PRECOMPILE_SHADER=0 disables build-time fxc compilation.
    println!("cargo:rerun-if-env-changed=SNOW_DUPLICATION_PRECOMPILE_SHADER");
    let precompile_enabled = env::var("SNOW_DUPLICATION_PRECOMPILE_SHADER")
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            !(v == "0" || v == "false" || v == "no" || v == "off")
        })
        .unwrap_or(true);
    if !precompile_enabled {
        println!(
            "cargo:warning=SNOW_DUPLICATION_PRECOMPILE_SHADER is disabled; will use runtime D3DCompile fallback"
        );
        return;
    }

    for (profile, entry_point, file_name, cfg, env_name) in STAGES {
        let cso_path = out_dir.join(file_name);
        match compile_with_fxc(&hlsl_path, &cso_path, profile, entry_point) {
            Ok(()) => {
                println!("cargo:rustc-env={env_name}={}", cso_path.display());
                println!("cargo:rustc-cfg={cfg}");
            }
            Err(detail) => {
                println!(
                    "cargo:warning=failed to precompile {entry_point} ({profile}) with fxc ({detail}); will use runtime D3DCompile fallback"
                );
            }
        }
    }
}

fn compile_with_fxc(
    hlsl_path: &Path,
    cso_path: &Path,
    profile: &str,
    entry_point: &str,
) -> Result<(), String> {
    let mut failures = Vec::new();
    for fxc in fxc_candidates() {
        let output = Command::new(&fxc)
            .args(["/nologo", "/T", profile, "/E", entry_point, "/O3", "/Fo"])
            .arg(cso_path)
            .arg(hlsl_path)
            .output();
        match output {
            Ok(output) if output.status.success() => return Ok(()),
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let first_line = stderr.lines().next().unwrap_or("no diagnostic output");
                failures.push(format!("{}: {first_line}", fxc.display()));
            }
            Err(err) => failures.push(format!("{}: {err}", fxc.display())),
        }
    }

    if failures.is_empty() {
        return Err("no fxc.exe found; set SNOW_DUPLICATION_FXC_PATH".to_string());
    }
    Err(failures.join(" | "))
}

/// Explicit override first, then `PATH`, then the newest Windows 10 SDK.
fn fxc_candidates() -> Vec<PathBuf> {
    if let Some(path) = env::var_os("SNOW_DUPLICATION_FXC_PATH").filter(|p| !p.is_empty()) {
        return vec![PathBuf::from(path)];
    }

    let mut out = vec![PathBuf::from("fxc.exe")];
    let Some(program_files) = env::var_os("ProgramFiles(x86)") else {
        return out;
    };
    let bin_root = PathBuf::from(program_files).join("Windows Kits/10/bin");
    let Ok(entries) = std::fs::read_dir(bin_root) else {
        return out;
    };

    let mut versions: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path().join("x64").join("fxc.exe"))
        .filter(|fxc| fxc.is_file())
        .collect();
    versions.sort();
    out.extend(versions.pop());
    out
}
