// build.rs

//! Stamps the binary with a release version and the cargo profile it was built with.

use std::env;

fn main() {
    // Release pipelines set TITAN_VERSION; local builds fall back to the crate version.
    let version = env::var("TITAN_VERSION")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| env::var("CARGO_PKG_VERSION").ok())
        .unwrap_or_else(|| "dev".to_string());
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=TITAN_BUILD_VERSION={version}");
    println!("cargo:rustc-env=TITAN_BUILD_PROFILE={profile}");
    println!("cargo:rerun-if-env-changed=TITAN_VERSION");
}
