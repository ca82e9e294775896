/*
 * Build script capturing build-time constants for runtime version reporting.
 * I'm embedding the build timestamp and git commit so the health endpoint can identify the running binary.
 */

use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let build_time = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    println!("cargo:rustc-env=BUILD_TIME={}", build_time);

    let git_hash = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|hash| hash.trim().to_string())
        .filter(|hash| !hash.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=GIT_COMMIT={}", git_hash);
}
