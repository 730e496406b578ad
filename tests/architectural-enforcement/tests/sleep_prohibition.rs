//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code never blocks a thread with `std::thread::sleep`
//! and only sleeps asynchronously for reconnection backoff or send pacing.
//! **Exceptions**: test code (skipped entirely)

use architectural_enforcement::{code_part, context_mentions, production_sources, report};

/// Words that mark an acceptable async sleep
const ALLOWED_CONTEXT: &[&str] = &["backoff", "reconnect", "send_delay", "latency"];

#[test]
fn test_no_sleep_in_production_code() {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (idx, line) in file.lines.iter().enumerate() {
            let code = code_part(line);

            if code.contains("thread::sleep") {
                violations.push(file.violation(idx, "Blocking sleep"));
                continue;
            }

            if (code.contains("::sleep(") || code.contains(".sleep("))
                && !context_mentions(&file.lines, idx, 10, 2, ALLOWED_CONTEXT)
            {
                violations.push(file.violation(idx, "Sleep outside backoff or pacing"));
            }
        }
    }

    report(
        "CRITICAL: Sleep calls found in production code!",
        &[
            "✅ ACCEPTABLE: reconnection backoff, pacing between sends",
            "❌ FORBIDDEN: std::thread::sleep, sleeping to wait for events",
        ],
        &violations,
    );
}
