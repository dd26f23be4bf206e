//! Build script to inject version and git SHA at compile time.
//!
//! Environment variables (set by CI or fall back to defaults):
//! - JUKEBOX_VERSION: Version string (defaults to CARGO_PKG_VERSION)
//! - JUKEBOX_GIT_SHA: Git commit SHA (defaults to "unknown" or git rev-parse)

use std::process::Command;

fn main() {
    let version = std::env::var("JUKEBOX_VERSION").unwrap_or_else(|_| {
        std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "unknown".into())
    });
    println!("cargo:rustc-env=JUKEBOX_VERSION={}", version);

    // Prefer JUKEBOX_GIT_SHA, then a CI-provided GITHUB_SHA, then git itself
    let git_sha = std::env::var("JUKEBOX_GIT_SHA")
        .or_else(|_| {
            std::env::var("GITHUB_SHA").map(|s| s.chars().take(7).collect::<String>())
        })
        .unwrap_or_else(|_| git_short_sha());
    println!("cargo:rustc-env=JUKEBOX_GIT_SHA={}", git_sha);

    println!("cargo:rerun-if-env-changed=JUKEBOX_VERSION");
    println!("cargo:rerun-if-env-changed=JUKEBOX_GIT_SHA");
    println!("cargo:rerun-if-env-changed=GITHUB_SHA");
}

fn git_short_sha() -> String {
    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".into())
}
