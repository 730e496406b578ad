//! Integration Test: Crate Layering
//!
//! **Policy**: `relay-core` is a library. CLI parsing, `anyhow`, and
//! subscriber setup belong to the daemon binary, and the core never refers
//! back to it.

use std::fs;

use architectural_enforcement::{code_part, production_sources, report, workspace_root};

/// Dependencies only the daemon may use
const BINARY_ONLY: &[&str] = &["clap", "anyhow", "tracing-subscriber"];

/// Names in the `[dependencies]` table of a manifest
fn dependency_names(manifest: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut in_deps = false;

    for line in manifest.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_deps = line == "[dependencies]";
            continue;
        }
        if !in_deps || line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((name, _)) = line.split_once('=') {
            names.push(name.trim().to_string());
        }
    }

    names
}

#[test]
fn test_core_has_no_binary_dependencies() {
    let manifest = fs::read_to_string(workspace_root().join("relay/core/Cargo.toml")).unwrap();
    let deps = dependency_names(&manifest);

    let violations: Vec<String> = deps
        .iter()
        .filter(|d| BINARY_ONLY.contains(&d.as_str()))
        .map(|d| format!("relay/core/Cargo.toml - binary-only dependency: {d}"))
        .collect();

    report(
        "CRITICAL: relay-core depends on binary-only crates!",
        &["✅ REQUIRED: thiserror in the library, anyhow/clap in the daemon"],
        &violations,
    );
}

#[test]
fn test_core_does_not_reach_into_daemon() {
    let mut violations = Vec::new();

    for file in production_sources() {
        if !file.path.starts_with("relay/core") {
            continue;
        }
        for (idx, line) in file.lines.iter().enumerate() {
            let code = code_part(line);
            if code.contains("relay_daemon") || code.contains("anyhow::") || code.contains("clap::") {
                violations.push(file.violation(idx, "Daemon concern in core"));
            }
        }
    }

    report(
        "CRITICAL: relay-core refers to daemon-only code!",
        &["✅ REQUIRED: the daemon depends on the core, never the reverse"],
        &violations,
    );
}

#[test]
fn test_dependency_table_parsing() {
    let manifest = "[package]\nname = \"x\"\n\n[dependencies]\n# Errors\nthiserror = \"2.0\"\ntokio = { version = \"1\" }\n\n[dev-dependencies]\ntempfile = \"3\"\n";
    assert_eq!(dependency_names(manifest), vec!["thiserror", "tokio"]);
}
