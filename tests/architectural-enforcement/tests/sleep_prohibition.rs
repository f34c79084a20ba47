//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the conductor core MUST NOT call sleep
//! methods. Waiting happens on the engine's I/O and on explicit timeouts.
//! **Exceptions**: the scripted test engine (`engine/test_utils.rs`), which
//! simulates engine latency, and `#[cfg(test)]` modules.

use architectural_enforcement::{code_part, core_src_dir, production_sources};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let mut violations = Vec::new();

    for file in production_sources(&core_src_dir(), &["test_utils.rs"]) {
        for (idx, line) in file.lines.iter().enumerate() {
            let code = code_part(line);
            if code.contains("::sleep(") || code.contains(".sleep(") {
                violations.push(format!("{}:{} - {}", file.path.display(), idx + 1, line.trim()));
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Wait on I/O instead:");
        eprintln!("  - tokio::time::timeout() around a receive");
        eprintln!("  - CancellationToken::cancelled()");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

#[test]
fn test_core_sources_are_scanned() {
    let files = production_sources(&core_src_dir(), &[]);
    assert!(
        files.iter().any(|f| f.path.ends_with("conductor.rs")),
        "conductor core sources not found under {}",
        core_src_dir().display()
    );
}
