//! Static import sandbox for strategy plugin sources.
//!
//! Before a plugin's factory may be used, its source file is scanned —
//! never compiled, never executed — and every `use` / `extern crate`
//! declaration is checked against an allowlist of pure-compute imports
//! and a denylist of runtime/IO surfaces. The scan runs to the end of
//! the file and reports **every** offending import with its 1-based
//! source line, so an author fixes the whole list in one pass.
//!
//! Deny takes precedence over allow; an import matching neither list is
//! also a violation (closed-world policy).

use std::path::Path;

use crate::StrategyError;

// ---------------------------------------------------------------------------
// Policy lists
// ---------------------------------------------------------------------------

/// Imports a strategy may use: core value types, the strategy/policy
/// contracts, and pure-compute std modules.
pub const ALLOWED_PREFIXES: &[&str] = &[
    "mbr_core",
    "mbr_strategy",
    "mbr_policy",
    "std::collections",
    "std::cmp",
    "std::fmt",
    "std::iter",
    "std::ops",
    "std::borrow",
    "std::convert",
    "core",
    "alloc",
    "chrono",
    "serde",
    "uuid",
    "crate",
    "self",
    "super",
];

/// Imports that reach the runtime, IO, or external services. Deny wins
/// over allow.
pub const DENIED_PREFIXES: &[&str] = &[
    "mbr_engine",
    "mbr_execution",
    "mbr_md",
    "mbr_artifacts",
    "mbr_broker_paper",
    "mbr_safety",
    "mbr_cli",
    "std::fs",
    "std::net",
    "std::process",
    "std::io",
    "std::env",
    "std::thread",
    "std::sync",
    "tokio",
    "async_std",
    "reqwest",
    "hyper",
    "ureq",
    "sqlx",
    "rusqlite",
    "redis",
    "nats",
    "rdkafka",
    "libloading",
];

fn matches_prefix(import: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|p| {
        import == *p || import.starts_with(&format!("{p}::"))
    })
}

// ---------------------------------------------------------------------------
// Import extraction
// ---------------------------------------------------------------------------

/// One extracted import: the path as written (group braces stripped down
/// to the common prefix) and the 1-based line of the declaration start.
#[derive(Clone, Debug, PartialEq, Eq)]
struct ImportDecl {
    path: String,
    line: usize,
}

/// Extract every `use` / `extern crate` declaration from Rust source text.
///
/// Line comments are stripped first so commented-out imports do not
/// trigger. A grouped import (`use a::{b, c}`) is reduced to its prefix
/// `a` — prefix matching against the policy lists makes the group
/// contents irrelevant.
fn extract_imports(source: &str) -> Vec<ImportDecl> {
    let mut imports = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw_line) in source.lines().enumerate() {
        let line = match raw_line.find("//") {
            Some(pos) => &raw_line[..pos],
            None => raw_line,
        };

        if let Some((start, buf)) = &mut pending {
            buf.push(' ');
            buf.push_str(line.trim());
            if buf.contains(';') {
                let decl = buf.clone();
                let start = *start;
                pending = None;
                if let Some(path) = import_path(&decl) {
                    imports.push(ImportDecl { path, line: start });
                }
            }
            continue;
        }

        let trimmed = line.trim_start();
        let is_use = trimmed.starts_with("use ")
            || trimmed.starts_with("pub use ")
            || trimmed.starts_with("pub(crate) use ")
            || trimmed.starts_with("extern crate ");
        if !is_use {
            continue;
        }

        if trimmed.contains(';') {
            if let Some(path) = import_path(trimmed) {
                imports.push(ImportDecl {
                    path,
                    line: idx + 1,
                });
            }
        } else {
            pending = Some((idx + 1, trimmed.to_string()));
        }
    }

    imports
}

/// Reduce a full declaration to the import path used for prefix matching.
fn import_path(decl: &str) -> Option<String> {
    let decl = decl.trim();
    let body = if let Some(rest) = decl.strip_prefix("pub(crate) use ") {
        rest
    } else if let Some(rest) = decl.strip_prefix("pub use ") {
        rest
    } else if let Some(rest) = decl.strip_prefix("use ") {
        rest
    } else if let Some(rest) = decl.strip_prefix("extern crate ") {
        rest
    } else {
        return None;
    };

    let body = body.split(';').next()?.trim();
    // Strip a grouped tail: `a::b::{c, d}` → `a::b`.
    let body = match body.find("::{") {
        Some(pos) => &body[..pos],
        None => body,
    };
    // Strip a rename: `a::b as c` → `a::b`.
    let body = body.split(" as ").next()?.trim();
    let body = body.trim_start_matches("::");
    if body.is_empty() {
        None
    } else {
        Some(body.to_string())
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// One disallowed import and where it appears.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportViolation {
    /// The import path as written in the source.
    pub import: String,
    /// 1-based source line of the declaration start.
    pub line: usize,
    /// `true` when the import matched the denylist; `false` when it was
    /// merely outside the allowlist.
    pub denied: bool,
}

/// Scan source text against the default policy lists.
///
/// Collects every offending import in file order; `Ok` only when the
/// whole file is clean.
pub fn scan_source(source: &str) -> Result<(), Vec<ImportViolation>> {
    let mut violations = Vec::new();
    for decl in extract_imports(source) {
        if matches_prefix(&decl.path, DENIED_PREFIXES) {
            violations.push(ImportViolation {
                import: decl.path,
                line: decl.line,
                denied: true,
            });
        } else if !matches_prefix(&decl.path, ALLOWED_PREFIXES) {
            violations.push(ImportViolation {
                import: decl.path,
                line: decl.line,
                denied: false,
            });
        }
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

/// Read and scan a plugin source file.
///
/// The file is never compiled or executed — violations are reported
/// before any plugin code can run.
pub fn validate_strategy_source(path: &Path) -> Result<(), StrategyError> {
    let source = std::fs::read_to_string(path).map_err(|e| StrategyError::Load {
        name: path.display().to_string(),
        detail: format!("unable to read strategy source: {e}"),
    })?;

    scan_source(&source).map_err(|violations| StrategyError::Sandbox {
        path: path.to_path_buf(),
        violations,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
