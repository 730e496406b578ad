//! Integration Test: Panic Prohibition
//!
//! **Policy**: Production code propagates errors. `unwrap()` and `expect()`
//! are for tests only.

use architectural_enforcement::{code_part, production_sources, report};

#[test]
fn test_no_unwrap_in_production_code() {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (idx, line) in file.lines.iter().enumerate() {
            let code = code_part(line);
            if code.contains(".unwrap()") {
                violations.push(file.violation(idx, "unwrap()"));
            }
            if code.contains(".expect(") {
                violations.push(file.violation(idx, "expect()"));
            }
        }
    }

    report(
        "CRITICAL: unwrap()/expect() found in production code!",
        &[
            "✅ REQUIRED: `?` with thiserror types in relay-core",
            "✅ REQUIRED: `?` with anyhow::Context in relay-daemon",
        ],
        &violations,
    );
}
