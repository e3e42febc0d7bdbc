//! Regex utilities for recipe-forge
//! Extracted to a separate crate for compilation optimization

use once_cell::sync::Lazy;
use regex::Regex;

/// Patterns for classifying test failure output
pub mod failure {
    use super::*;

    pub static IMPORT_PATTERN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r"(?i)(ImportError|ModuleNotFoundError|NameError|cannot find (value|function|type|struct|module|crate)|unresolved import|is not defined|no module named|cannot import name)",
        )
        .expect("Invalid regex pattern")
    });

    pub static SYNTAX_PATTERN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)(SyntaxError|IndentationError|TabError|expected one of|parse error|unexpected token|unterminated)")
            .expect("Invalid regex pattern")
    });

    pub static ASSERTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)(AssertionError|assert(ion)? failed|assert_eq|panicked at|left\s*==\s*right|\bexpected\b.*\bgot\b)")
            .expect("Invalid regex pattern")
    });

    /// Missing module, import, or symbol
    pub fn is_import(text: &str) -> bool {
        IMPORT_PATTERN.is_match(text)
    }

    pub fn is_syntax(text: &str) -> bool {
        SYNTAX_PATTERN.is_match(text)
    }

    pub fn is_assertion(text: &str) -> bool {
        ASSERTION_PATTERN.is_match(text)
    }
}

/// Test runner summary parsing (pytest and cargo test output)
pub mod test_summary {
    use super::*;

    pub static PASSED: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(\d+) passed").expect("Invalid regex pattern"));

    pub static FAILED: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(\d+) failed").expect("Invalid regex pattern"));

    pub static SKIPPED: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(\d+) (skipped|ignored)").expect("Invalid regex pattern"));

    pub static ERRORED: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(\d+) errors?\b").expect("Invalid regex pattern"));

    /// `FAILED tests/test_x.py::test_name - AssertionError: ...`
    pub static PYTEST_FAILURE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^(?:FAILED|ERROR) (\S+?)(?: - (.*))?$").expect("Invalid regex pattern")
    });

    /// `test module::name ... FAILED`
    pub static CARGO_FAILURE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^test (\S+) \.\.\. FAILED$").expect("Invalid regex pattern")
    });

    /// Count from the summary lines only
    ///
    /// cargo prints one `test result:` line per test binary and those are
    /// summed; otherwise the last line carrying any count is the summary.
    pub fn count(pattern: &Regex, output: &str) -> usize {
        let cargo: Vec<&str> = output.lines().filter(|l| l.trim_start().starts_with("test result:")).collect();
        if !cargo.is_empty() {
            return cargo.iter().map(|line| count_in_line(pattern, line)).sum();
        }

        let counts = [&*PASSED, &*FAILED, &*SKIPPED, &*ERRORED];
        output
            .lines()
            .rev()
            .find(|line| counts.iter().any(|p| p.is_match(line)))
            .map(|line| count_in_line(pattern, line))
            .unwrap_or(0)
    }

    fn count_in_line(pattern: &Regex, line: &str) -> usize {
        pattern
            .captures(line)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<usize>().ok())
            .unwrap_or(0)
    }

    /// Extract `(test name, message)` pairs for failing tests
    pub fn failures(output: &str) -> Vec<(String, String)> {
        let mut found = Vec::new();

        for line in output.lines() {
            let line = line.trim();
            if let Some(caps) = PYTEST_FAILURE.captures(line) {
                let name = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
                let message = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
                found.push((name, message));
            } else if let Some(caps) = CARGO_FAILURE.captures(line) {
                let name = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
                found.push((name, String::new()));
            }
        }

        found
    }
}

/// Keyword extraction used for matching requirement text to components
pub mod keywords {
    use super::*;
    use std::collections::BTreeSet;

    pub static WORD: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"[A-Za-z][A-Za-z0-9]*").expect("Invalid regex pattern"));

    pub static CAMEL_BOUNDARY: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("Invalid regex pattern"));

    const STOP_WORDS: &[&str] = &[
        "the", "and", "for", "with", "that", "this", "from", "into", "must", "should", "could",
        "will", "shall", "are", "not", "all", "any", "each", "when", "then", "has", "have",
    ];

    /// Lowercased keywords of three or more characters, camel/snake case split
    pub fn extract(text: &str) -> BTreeSet<String> {
        let spaced = CAMEL_BOUNDARY.replace_all(text, "$1 $2");

        WORD.find_iter(&spaced)
            .map(|m| m.as_str().to_lowercase())
            .filter(|w| w.len() >= 3 && !STOP_WORDS.contains(&w.as_str()))
            .collect()
    }

    /// Number of keywords shared between two texts
    pub fn overlap(a: &str, b: &str) -> usize {
        let left = extract(a);
        let right = extract(b);
        left.intersection(&right).count()
    }
}

/// Architectural layer heuristics for requirement text
pub mod layer {
    use super::*;

    pub static DATA: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)\b(data|database|store|storage|persist\w*|schema|model|record|cache|table|file|save|load)\b")
            .expect("Invalid regex pattern")
    });

    pub static PRESENTATION: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)\b(ui|display|render\w*|view|screen|cli|command|output|print|format\w*|report|user interface|prompt)\b")
            .expect("Invalid regex pattern")
    });

    pub fn is_data(text: &str) -> bool {
        DATA.is_match(text)
    }

    pub fn is_presentation(text: &str) -> bool {
        PRESENTATION.is_match(text)
    }
}

/// Markers of unfinished code in generated files
pub mod review {
    use super::*;

    pub static UNFINISHED: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"\b(TODO|FIXME|XXX|unimplemented!|todo!|NotImplementedError)")
            .expect("Invalid regex pattern")
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_patterns() {
        assert!(failure::is_import("ModuleNotFoundError: No module named 'cache'"));
        assert!(failure::is_import("error[E0425]: cannot find function `parse` in this scope"));
        assert!(failure::is_syntax("SyntaxError: invalid syntax"));
        assert!(failure::is_assertion("AssertionError: assert 1 == 2"));
        assert!(failure::is_assertion("thread 'main' panicked at src/lib.rs:4:5"));
        assert!(!failure::is_import("AssertionError: assert 1 == 2"));
    }

    #[test]
    fn test_summary_counts() {
        let output = "==== 3 failed, 7 passed, 1 skipped, 2 errors in 0.52s ====";
        assert_eq!(test_summary::count(&test_summary::PASSED, output), 7);
        assert_eq!(test_summary::count(&test_summary::FAILED, output), 3);
        assert_eq!(test_summary::count(&test_summary::SKIPPED, output), 1);
        assert_eq!(test_summary::count(&test_summary::ERRORED, output), 2);

        let cargo = "test result: FAILED. 4 passed; 1 failed; 2 ignored; 0 measured";
        assert_eq!(test_summary::count(&test_summary::PASSED, cargo), 4);
        assert_eq!(test_summary::count(&test_summary::SKIPPED, cargo), 2);
    }

    #[test]
    fn test_summary_counts_use_the_final_line() {
        let output = "RERUN tests/test_cache.py::test_get
                      ==== 1 failed, 2 passed, 1 rerun in 0.30s ====
                      ==== 3 passed, 1 rerun in 0.41s ====";
        assert_eq!(test_summary::count(&test_summary::PASSED, output), 3);
        assert_eq!(test_summary::count(&test_summary::FAILED, output), 0);

        let cargo = "test result: ok. 4 passed; 0 failed; 0 ignored
                     Running tests/cli.rs
                     test result: FAILED. 2 passed; 1 failed; 0 ignored";
        assert_eq!(test_summary::count(&test_summary::PASSED, cargo), 6);
        assert_eq!(test_summary::count(&test_summary::FAILED, cargo), 1);
    }

    #[test]
    fn test_failure_lines() {
        let output = "FAILED tests/test_cache.py::test_get - AssertionError: 1 != 2\n\
                      test graph::tests::test_order ... FAILED\n\
                      test graph::tests::test_layers ... ok";
        let failures = test_summary::failures(output);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].0, "tests/test_cache.py::test_get");
        assert_eq!(failures[0].1, "AssertionError: 1 != 2");
        assert_eq!(failures[1].0, "graph::tests::test_order");
    }

    #[test]
    fn test_keyword_extraction() {
        let words = keywords::extract("BuildStateManager persists cache_records");
        assert!(words.contains("build"));
        assert!(words.contains("state"));
        assert!(words.contains("manager"));
        assert!(words.contains("cache"));
        assert_eq!(keywords::overlap("Cache lookup must be fast", "CacheStore"), 1);
    }

    #[test]
    fn test_layer_heuristics() {
        assert!(layer::is_data("Persist records to the database"));
        assert!(layer::is_presentation("Display a summary report"));
        assert!(!layer::is_data("Compute the score"));
    }

    #[test]
    fn test_unfinished_markers() {
        assert!(review::UNFINISHED.is_match("    # TODO: handle eviction"));
        assert!(review::UNFINISHED.is_match("raise NotImplementedError"));
        assert!(!review::UNFINISHED.is_match("return total"));
    }
}
