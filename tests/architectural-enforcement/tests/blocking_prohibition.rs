//! Integration Test: Blocking Primitive Prohibition
//!
//! **Policy**: The conductor core runs entirely on the tokio runtime. Its
//! production code MUST NOT park a runtime worker thread.
//! **Required**: `tokio::sync` or `parking_lot` locks held briefly,
//! `tokio::time` for waiting, async `reqwest` for HTTP.

use architectural_enforcement::{code_part, core_src_dir, production_sources};

const FORBIDDEN: &[(&str, &str)] = &[
    ("std::thread::sleep", "Blocking sleep"),
    ("std::sync::Mutex", "Blocking std mutex"),
    ("std::sync::RwLock", "Blocking std rwlock"),
    ("reqwest::blocking", "Blocking HTTP client"),
    ("std::io::stdin()", "Blocking stdin"),
    ("block_on(", "Nested runtime block_on"),
];

/// Test that production code does not use blocking primitives
#[test]
fn test_no_blocking_primitives_in_production_code() {
    let mut violations = Vec::new();

    for file in production_sources(&core_src_dir(), &[]) {
        for (idx, line) in file.lines.iter().enumerate() {
            let code = code_part(line);
            for (pattern, label) in FORBIDDEN {
                if code.contains(pattern) {
                    violations.push(format!(
                        "{}:{} - {label}: {}",
                        file.path.display(),
                        idx + 1,
                        line.trim()
                    ));
                }
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking primitives found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        panic!(
            "\nFound {} blocking violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}
