// Compiles the GLSL sources under resources/shaders to SPIR-V in the
// workspace's target/shaders directory, where render_core looks for them.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADER_EXTENSIONS: [&str; 2] = ["vert", "frag"];

fn needs_compile(source: &Path, output: &Path) -> bool {
    match (
        std::fs::metadata(source).and_then(|m| m.modified()),
        std::fs::metadata(output).and_then(|m| m.modified()),
    ) {
        (Ok(src), Ok(dst)) => src > dst,
        _ => true,
    }
}

fn compile_shaders(shader_dir: &Path, target_dir: &Path, glslc: &Path) -> usize {
    let entries = match std::fs::read_dir(shader_dir) {
        Ok(entries) => entries,
        Err(_) => {
            eprintln!("info: No shader directory found at: {}", shader_dir.display());
            return 0;
        }
    };

    let mut compiled = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !SHADER_EXTENSIONS.contains(&ext) {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };

        // shader.vert -> shader.vert.spv
        let mut out_name = file_name.to_os_string();
        out_name.push(".spv");
        let out_file = target_dir.join(out_name);

        if !needs_compile(&path, &out_file) {
            eprintln!("info: Shader {} is up to date", path.display());
            continue;
        }

        let status = Command::new(glslc).arg(&path).arg("-o").arg(&out_file).status();
        match status {
            Ok(s) if s.success() => {
                eprintln!("info: Compiled {} -> {}", path.display(), out_file.display());
                compiled += 1;
            }
            Ok(s) => panic!("glslc failed for {} with exit code {}", path.display(), s.code().unwrap_or(-1)),
            Err(e) => panic!("Failed to run glslc for {}: {e}", path.display()),
        }
    }
    compiled
}

fn find_glslc() -> Option<PathBuf> {
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
    if let Ok(sdk) = env::var("VULKAN_SDK") {
        let exe = if cfg!(target_os = "windows") { "Bin/glslc.exe" } else { "bin/glslc" };
        let candidate = Path::new(&sdk).join(exe);
        if candidate.exists() {
            return Some(candidate);
        }
        eprintln!("warning: glslc not found at {}", candidate.display());
    }

    // Fall back to a glslc on PATH.
    Command::new("glslc")
        .arg("--version")
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|_| PathBuf::from("glslc"))
}

fn main() {
    println!("cargo:rerun-if-changed=resources/shaders");

    if env::var("SKIP_SHADERS").is_ok() {
        eprintln!("info: Skipping shader compilation (SKIP_SHADERS set)");
        return;
    }

    let Some(glslc) = find_glslc() else {
        println!("cargo:warning=glslc not found; set VULKAN_SDK or put glslc on PATH to build shaders");
        return;
    };

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string()));
    let shader_dir = manifest_dir.join("resources/shaders");
    let target_dir = manifest_dir.join("../target/shaders");

    if let Err(e) = std::fs::create_dir_all(&target_dir) {
        println!("cargo:warning=Failed to create {}: {e}", target_dir.display());
        return;
    }

    let compiled = compile_shaders(&shader_dir, &target_dir, &glslc);
    eprintln!("info: Compiled {compiled} shader(s) into {}", target_dir.display());
}
