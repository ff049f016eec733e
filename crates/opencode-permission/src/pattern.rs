// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Pattern matching for permission policies and per-agent tool gating.
//!
//! Rules (spec §4.G):
//! - `*` matches any command.
//! - `name *` matches any command with head `name`.
//! - `name sub *` matches `name` with subcommand `sub`.
//! - Literal `name` matches only the bare command (no args).
//! - `prefix*` / `*suffix` do simple affix matching on the rendered command.
//! - `**` delegates to a doublestar glob matcher (used for tool-name gating,
//!   e.g. `mcp__*__**`).
//!
//! Among matching patterns, the **most specific** wins: more literal
//! segments before a wildcard beats fewer; an exact match beats any
//! wildcarded one.

/// A compiled policy pattern and its specificity score.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub raw: String,
}

impl Pattern {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// Does this pattern match the given rendered command string?
    pub fn matches(&self, command: &str) -> bool {
        let pattern = self.raw.trim();
        if pattern == "*" {
            return true;
        }
        if pattern.contains("**") {
            return doublestar_match(pattern, command);
        }
        if let Some(prefix) = pattern.strip_suffix('*') {
            if !prefix.contains(' ') {
                // `prefix*` affix match (no space — a single glob token).
                return command.starts_with(prefix);
            }
            // `name *` / `name sub *` — token-prefix match.
            let pattern_tokens: Vec<&str> = prefix.trim_end().split_whitespace().collect();
            let command_tokens: Vec<&str> = command.split_whitespace().collect();
            return command_tokens.len() >= pattern_tokens.len()
                && command_tokens[..pattern_tokens.len()] == pattern_tokens[..];
        }
        if let Some(suffix) = pattern.strip_prefix('*') {
            return command.ends_with(suffix);
        }
        // Literal: matches only the bare command (no args).
        pattern == command
    }

    /// Specificity score: higher wins when multiple patterns match.
    /// - Exact literal match: 1000 + token count.
    /// - `name sub *`: 100 + number of literal tokens before the wildcard.
    /// - `prefix*`/`*suffix` affix match: 10 + literal byte length.
    /// - `*` (match-anything): 0.
    pub fn specificity(&self) -> i64 {
        let pattern = self.raw.trim();
        if pattern == "*" {
            return 0;
        }
        if pattern.contains("**") {
            return 5 + pattern.matches(|c| c != '*').count() as i64;
        }
        if let Some(prefix) = pattern.strip_suffix('*') {
            if !prefix.contains(' ') {
                return 10 + prefix.len() as i64;
            }
            let tokens = prefix.trim_end().split_whitespace().count();
            return 100 + tokens as i64;
        }
        if let Some(suffix) = pattern.strip_prefix('*') {
            return 10 + suffix.len() as i64;
        }
        1000 + pattern.split_whitespace().count() as i64
    }
}

/// Find the most specific pattern (and its index) among `patterns` that
/// matches `command`, if any.
pub fn most_specific_match<'a>(patterns: &'a [String], command: &str) -> Option<&'a str> {
    patterns
        .iter()
        .map(|p| Pattern::new(p.clone()))
        .filter(|p| p.matches(command))
        .max_by_key(|p| p.specificity())
        .map(|p| patterns.iter().find(|raw| raw.as_str() == p.raw).unwrap().as_str())
}

/// `**` doublestar glob match: `*` matches within one path segment,
/// `**` matches across segment boundaries (segments split on whitespace
/// here, since this is reused for both filesystem-glob-like patterns and
/// tool-name gating like `mcp__*__**`).
fn doublestar_match(pattern: &str, text: &str) -> bool {
    // Translate the glob into a regex: `**` -> `.*`, `*` -> `[^ ]*` (no
    // segment separator inside a rendered command/tool-name token), `?`
    // -> `.`, everything else escaped.
    let mut regex_src = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    regex_src.push_str(".*");
                } else {
                    regex_src.push_str("[^ ]*");
                }
            }
            '?' => regex_src.push('.'),
            c if "\\.+()|[]{}^$".contains(c) => {
                regex_src.push('\\');
                regex_src.push(c);
            }
            c => regex_src.push(c),
        }
    }
    regex_src.push('$');
    regex::Regex::new(&regex_src)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}
