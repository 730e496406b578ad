//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! across the relay crates:
//! - No blocking sleeps, and async sleeps only for backoff or pacing
//! - No blocking file I/O inside async functions
//! - No `unwrap()`/`expect()` in production code
//! - The core library stays free of binary-only dependencies
//!
//! The helpers here load production sources (everything before the first
//! `#[cfg(test)]` of each file) so the individual checks stay small.

use std::fs;
use std::path::{Path, PathBuf};

/// Crate source directories that count as production code
pub const PRODUCTION_DIRS: &[&str] = &["relay/core/src", "relay/daemon/src"];

/// Workspace root, resolved from this package's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// One production source file
pub struct SourceFile {
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// Lines up to the first test module
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Parse file content, dropping the test section
    #[must_use]
    pub fn from_content(path: PathBuf, content: &str) -> Self {
        let lines = content
            .lines()
            .take_while(|line| !line.trim_start().starts_with("#[cfg(test)]"))
            .map(str::to_string)
            .collect();
        Self { path, lines }
    }

    /// Format a violation at a 0-based line index
    #[must_use]
    pub fn violation(&self, idx: usize, what: &str) -> String {
        format!(
            "{}:{} - {what}: {}",
            self.path.display(),
            idx + 1,
            self.lines[idx].trim()
        )
    }
}

/// Load every production `.rs` file of the workspace
#[must_use]
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }

        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            let relative = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_path_buf();
            files.push(SourceFile::from_content(relative, &content));
        }
    }

    files
}

/// The part of a line before any `//` comment
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Whether the line at `current_idx` sits inside an `async fn`
///
/// Scans backwards to the nearest function signature.
#[must_use]
pub fn is_in_async_function(lines: &[String], current_idx: usize) -> bool {
    for line in lines[..current_idx].iter().rev() {
        let line = line.trim();

        if line.contains("async fn ") {
            return true;
        }
        if line.contains("fn ") {
            return false;
        }
        if line.starts_with("mod ") || (line.starts_with("impl") && line.contains('{')) {
            return false;
        }
    }
    false
}

/// Whether any line within `before` lines above or `after` lines below
/// `current_idx` mentions one of `words` (case-insensitive)
#[must_use]
pub fn context_mentions(
    lines: &[String],
    current_idx: usize,
    before: usize,
    after: usize,
    words: &[&str],
) -> bool {
    let start = current_idx.saturating_sub(before);
    let end = (current_idx + after + 1).min(lines.len());
    lines[start..end].iter().any(|line| {
        let line = line.to_lowercase();
        words.iter().any(|w| line.contains(w))
    })
}

/// Panic with a readable report if `violations` is not empty
pub fn report(title: &str, hints: &[&str], violations: &[String]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {title}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    eprintln!();
    for hint in hints {
        eprintln!("  {hint}");
    }

    panic!(
        "\nFound {} violation(s) in production code.\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(code: &[&str]) -> Vec<String> {
        code.iter().map(|l| (*l).to_string()).collect()
    }

    #[test]
    fn test_test_section_dropped() {
        let file = SourceFile::from_content(
            PathBuf::from("x.rs"),
            "fn a() {}\n\n#[cfg(test)]\nmod tests {\n    fn b() { x.unwrap(); }\n}\n",
        );
        assert_eq!(file.lines.len(), 2);
    }

    #[test]
    fn test_async_function_detection() {
        let code = lines(&[
            "async fn bad_function() {",
            "    let contents = std::fs::read_to_string(\"file.txt\")?;",
            "}",
        ]);
        assert!(is_in_async_function(&code, 1));

        let code = lines(&[
            "pub async fn run(&self) {",
            "    self.prepare();",
            "}",
            "fn prepare(&self) {",
            "    std::fs::create_dir_all(dir)?;",
            "}",
        ]);
        assert!(!is_in_async_function(&code, 4));
    }

    #[test]
    fn test_comments_ignored() {
        assert_eq!(code_part("let x = 1; // x.unwrap()"), "let x = 1; ");
    }

    #[test]
    fn test_context_window() {
        let code = lines(&[
            "let delay = backoff_for_attempt(n);",
            "log();",
            "tokio::time::sleep(delay).await;",
        ]);
        assert!(context_mentions(&code, 2, 2, 0, &["backoff"]));
        assert!(!context_mentions(&code, 2, 1, 0, &["backoff"]));
    }

    #[test]
    fn test_production_dirs_exist() {
        let root = workspace_root();
        for dir in PRODUCTION_DIRS {
            assert!(root.join(dir).is_dir(), "missing {dir}");
        }
    }
}
