// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! File inspection and search. Grounded on the teacher's bash/glob-pattern
//! idiom (`opencode_permission::pattern`) but implemented fresh here since
//! that crate's matcher is private to its own policy-matching use: glob
//! translation goes through `regex`, directory walks through `walkdir`.

use std::fs;
use std::path::{Path as FsPath, PathBuf};

use axum::extract::{Query, State};
use axum::Json;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::error::ApiError;
use crate::state::AppState;

const MAX_SEARCH_RESULTS: usize = 200;
const MAX_SYMBOL_RESULTS: usize = 10;

/// Symbol kinds this endpoint is restricted to (spec §6.1), expressed as
/// LSP `SymbolKind` numeric values.
const CLASS: i32 = 5;
const METHOD: i32 = 6;
const ENUM: i32 = 10;
const INTERFACE: i32 = 11;
const FUNCTION: i32 = 12;
const VARIABLE: i32 = 13;
const CONSTANT: i32 = 14;
const STRUCT: i32 = 23;

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

/// `GET /file?path=` — metadata for a single path: existence, type, size.
pub async fn file_info(
    State(_state): State<AppState>,
    Query(q): Query<PathQuery>,
) -> Result<Json<Value>, ApiError> {
    let meta = fs::metadata(&q.path).map_err(|_| ApiError::NotFound(format!("path '{}' not found", q.path)))?;
    Ok(Json(json!({
        "path": q.path,
        "isDirectory": meta.is_dir(),
        "size": meta.len(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct FileContentQuery {
    pub path: String,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `GET /file/content?path=&offset=&limit=` — a (line-bounded) slice of a
/// text file's contents.
pub async fn file_content(Query(q): Query<FileContentQuery>) -> Result<Json<Value>, ApiError> {
    let text = fs::read_to_string(&q.path).map_err(|e| ApiError::NotFound(format!("{}: {e}", q.path)))?;
    let lines: Vec<&str> = text.lines().collect();
    let offset = q.offset.unwrap_or(0).min(lines.len());
    let end = q.limit.map(|n| (offset + n).min(lines.len())).unwrap_or(lines.len());
    Ok(Json(json!({
        "path": q.path,
        "content": lines[offset..end].join("\n"),
        "totalLines": lines.len(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct DirectoryQuery {
    pub directory: String,
}

/// `GET /file/status?directory=` — per-file VCS-agnostic status: every file
/// under `directory` is reported `"untouched"`. No git/VCS shelling exists
/// in this workspace (spec Non-goals keep VCS internals external), so this
/// is an honest placeholder rather than a simulated diff.
pub async fn file_status(Query(q): Query<DirectoryQuery>) -> Result<Json<Value>, ApiError> {
    let root = PathBuf::from(&q.directory);
    if !root.is_dir() {
        return Err(ApiError::NotFound(format!("directory '{}' not found", q.directory)));
    }
    let files: Vec<Value> = WalkDir::new(&root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .take(MAX_SEARCH_RESULTS)
        .map(|e| json!({"path": e.path().display().to_string(), "status": "untouched"}))
        .collect();
    Ok(Json(json!({"files": files})))
}

#[derive(Debug, Deserialize)]
pub struct FindQuery {
    pub pattern: String,
    #[serde(default)]
    pub path: Option<String>,
}

/// `GET /find?pattern=&path=` — grep-style content search, one hit per
/// matching line.
pub async fn find_in_files(Query(q): Query<FindQuery>) -> Result<Json<Value>, ApiError> {
    if q.pattern.trim().is_empty() {
        return Err(ApiError::InvalidRequest("missing 'pattern'".to_string()));
    }
    let re = Regex::new(&q.pattern).map_err(|e| ApiError::InvalidRequest(format!("invalid pattern: {e}")))?;
    let root = PathBuf::from(q.path.unwrap_or_else(|| ".".to_string()));
    let mut matches = Vec::new();
    'walk: for entry in WalkDir::new(&root).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(text) = fs::read_to_string(entry.path()) else { continue };
        for (lineno, line) in text.lines().enumerate() {
            if re.is_match(line) {
                matches.push(json!({
                    "path": entry.path().display().to_string(),
                    "line": lineno + 1,
                    "text": line,
                }));
                if matches.len() >= MAX_SEARCH_RESULTS {
                    break 'walk;
                }
            }
        }
    }
    Ok(Json(json!({"matches": matches})))
}

/// `GET /find/file?pattern=&path=` — filename glob search. `pattern` is
/// translated from shell-glob (`*`, `?`) to a regex anchored to the whole
/// filename.
pub async fn find_files(Query(q): Query<FindQuery>) -> Result<Json<Value>, ApiError> {
    if q.pattern.trim().is_empty() {
        return Err(ApiError::InvalidRequest("missing 'pattern'".to_string()));
    }
    let re = glob_to_regex(&q.pattern).map_err(|e| ApiError::InvalidRequest(format!("invalid pattern: {e}")))?;
    let root = PathBuf::from(q.path.unwrap_or_else(|| ".".to_string()));
    let files: Vec<String> = WalkDir::new(&root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_str().map(|n| re.is_match(n)).unwrap_or(false))
        .take(MAX_SEARCH_RESULTS)
        .map(|e| e.path().display().to_string())
        .collect();
    Ok(Json(json!({"files": files})))
}

fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let mut pattern = String::from("^");
    for ch in glob.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            c if "\\.+()|[]{}^$".contains(c) => {
                pattern.push('\\');
                pattern.push(c);
            }
            c => pattern.push(c),
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
}

#[derive(Debug, Deserialize)]
pub struct SymbolQuery {
    pub query: String,
}

/// `GET /find/symbol?query=` — a lightweight symbol search over source
/// files, no LSP client (out of scope per spec). Matches top-level
/// declarations by a small set of language-agnostic regexes and reports at
/// most [`MAX_SYMBOL_RESULTS`], restricted to the closed kind set.
pub async fn find_symbol(
    State(_state): State<AppState>,
    Query(q): Query<SymbolQuery>,
) -> Result<Json<Value>, ApiError> {
    if q.query.trim().is_empty() {
        return Err(ApiError::InvalidRequest("missing 'query'".to_string()));
    }
    let patterns: &[(i32, &str)] = &[
        (STRUCT, r"^\s*(pub\s+)?struct\s+(\w+)"),
        (CLASS, r"^\s*(pub\s+)?class\s+(\w+)"),
        (ENUM, r"^\s*(pub\s+)?enum\s+(\w+)"),
        (INTERFACE, r"^\s*(pub\s+)?(trait|interface)\s+(\w+)"),
        (FUNCTION, r"^\s*(pub\s+)?(async\s+)?fn\s+(\w+)"),
        (METHOD, r"^\s*(pub\s+)?(async\s+)?fn\s+(\w+)\s*\(\s*&(mut\s+)?self"),
        (CONSTANT, r"^\s*(pub\s+)?const\s+(\w+)"),
        (VARIABLE, r"^\s*(pub\s+)?(static|let)\s+(\w+)"),
    ];
    // Index of the capturing group that holds the symbol name, per pattern
    // above — not always the last group (METHOD's last group is the
    // `&mut self` marker, not the name).
    let name_group: &[usize] = &[2, 2, 2, 3, 3, 3, 2, 3];
    let compiled: Vec<(i32, usize, Regex)> = patterns
        .iter()
        .zip(name_group)
        .map(|((kind, re), &group)| (*kind, group, Regex::new(re).expect("static pattern is valid")))
        .collect();

    let mut symbols = Vec::new();
    'walk: for entry in WalkDir::new(".").into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() || !is_source_file(entry.path()) {
            continue;
        }
        let Ok(text) = fs::read_to_string(entry.path()) else { continue };
        for (lineno, line) in text.lines().enumerate() {
            for (kind, group, re) in &compiled {
                if let Some(caps) = re.captures(line) {
                    let name = caps.get(*group).map(|m| m.as_str()).unwrap_or("");
                    if name.contains(&q.query) {
                        symbols.push(json!({
                            "name": name,
                            "kind": kind,
                            "path": entry.path().display().to_string(),
                            "line": lineno + 1,
                        }));
                        if symbols.len() >= MAX_SYMBOL_RESULTS {
                            break 'walk;
                        }
                    }
                }
            }
        }
    }
    Ok(Json(json!({"symbols": symbols})))
}

fn is_source_file(path: &FsPath) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("rs" | "ts" | "tsx" | "js" | "jsx" | "py" | "go")
    )
}
