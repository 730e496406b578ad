//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async functions in production code use `tokio::fs` and
//! `tokio::net`, never their `std` counterparts.
//! **Acceptable**: blocking I/O in plain functions (config loading before the
//! runtime does real work, PID files, `Drop` impls), and test code.

use architectural_enforcement::{code_part, is_in_async_function, production_sources, report};

/// Blocking filesystem calls, matched as `fs::<name>`
const BLOCKING_FS_CALLS: &[&str] = &[
    "read(",
    "read_to_string(",
    "write(",
    "remove_file(",
    "remove_dir_all(",
    "create_dir_all(",
    "rename(",
    "copy(",
    "metadata(",
    "set_permissions(",
    "File::",
    "OpenOptions::",
];

fn blocking_fs_call(code: &str) -> bool {
    code.match_indices("fs::").any(|(pos, _)| {
        let before = &code[..pos];
        let after = &code[pos + "fs::".len()..];
        !before.ends_with("tokio::")
            && !before.ends_with("unix::")
            && BLOCKING_FS_CALLS.iter().any(|call| after.starts_with(call))
    })
}

#[test]
fn test_no_blocking_io_in_async_functions() {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (idx, line) in file.lines.iter().enumerate() {
            let code = code_part(line);
            if !is_in_async_function(&file.lines, idx) {
                continue;
            }

            if blocking_fs_call(code) {
                violations.push(file.violation(idx, "Blocking file I/O"));
            }
            if code.contains("std::net::") {
                violations.push(file.violation(idx, "Blocking network I/O"));
            }
            if code.contains("std::process::Command") {
                violations.push(file.violation(idx, "Blocking process I/O"));
            }
        }
    }

    report(
        "CRITICAL: Blocking I/O calls found in async production code!",
        &[
            "✅ REQUIRED: tokio::fs, tokio::net, tokio::process in async fns",
            "✅ ACCEPTABLE: std::fs in plain fns and Drop impls",
        ],
        &violations,
    );
}

#[test]
fn test_blocking_fs_call_detection() {
    assert!(blocking_fs_call("    fs::remove_file(&path)?;"));
    assert!(blocking_fs_call("let s = std::fs::read_to_string(p)?;"));
    assert!(!blocking_fs_call("tokio::fs::remove_file(&path).await?;"));
    assert!(!blocking_fs_call("use std::os::unix::fs::PermissionsExt;"));
    assert!(!blocking_fs_call("let perms = fs::Permissions::from_mode(0o600);"));
}
