//! Stamps the staging service binary with its source revision and build time,
//! served from `/build-info`.

use std::process::Command;

use chrono::{SecondsFormat, Utc};

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn main() {
    for path in [".git/HEAD", ".git/index"] {
        println!("cargo:rerun-if-changed={path}");
    }
    println!("cargo:rerun-if-env-changed=GIT_SHA");
    println!("cargo:rerun-if-env-changed=BUILD_TIME");

    // Dirty trees carry a `-dirty` suffix.
    let revision = std::env::var("GIT_SHA")
        .ok()
        .filter(|sha| !sha.is_empty())
        .or_else(|| git(&["describe", "--always", "--dirty", "--abbrev=12"]))
        .unwrap_or_else(|| "unknown".to_string());

    let built_at = std::env::var("BUILD_TIME")
        .ok()
        .filter(|time| !time.is_empty())
        .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));

    println!("cargo:rustc-env=GIT_SHA={revision}");
    println!("cargo:rustc-env=BUILD_TIME={built_at}");
}
