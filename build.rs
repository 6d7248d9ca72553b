// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");
    println!("cargo::rerun-if-env-changed=FACEFILTER_VERSION");

    // Packagers may pin the version explicitly
    let version = match std::env::var("FACEFILTER_VERSION") {
        Ok(v) => v,
        Err(_) => git_version(),
    };

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

fn git_version() -> String {
    // "v0.1.0" at a tag, "v0.1.0-5-gabcdef1" after it, or a bare hash without tags
    let described = Command::new("git")
        .args(["describe", "--tags", "--always", "--match", "v*"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string());

    let Some(described) = described else {
        return env!("CARGO_PKG_VERSION").to_string();
    };

    let described = described.strip_prefix('v').unwrap_or(&described);

    if described.contains('-') {
        let parts: Vec<&str> = described.rsplitn(3, '-').collect();
        if parts.len() >= 3 {
            let hash = parts[0].strip_prefix('g').unwrap_or(parts[0]);
            return format!("{}-dirty-{}", parts[2], hash);
        }
    }

    if described.chars().all(|c| c.is_ascii_hexdigit()) {
        // No tag reachable: package version plus commit
        return format!("{}-{}", env!("CARGO_PKG_VERSION"), described);
    }

    described.to_string()
}
