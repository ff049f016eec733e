// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! A structured bash command-line parser.
//!
//! Decomposes a rendered command line into a sequence of [`BashCommand`]
//! entries — one per pipeline/list segment — handling pipelines (`|`),
//! `&&`/`||`, `;`, subshells (`$(...)`), quoted strings, heredocs, env
//! assignments, and redirections. This is deliberately not a full POSIX
//! shell grammar: it is the minimum structural decomposition the permission
//! broker needs to match patterns and extract filesystem targets.

/// Commands whose arguments may name filesystem paths worth guarding.
const DANGEROUS_COMMANDS: &[&str] = &["rm", "mv", "cp", "chmod", "chown", "mkdir", "touch", "rmdir", "dd"];

/// One decomposed command: `name subcommand? args...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BashCommand {
    pub name: String,
    pub subcommand: Option<String>,
    pub args: Vec<String>,
}

impl BashCommand {
    /// Render back to a normalized `name [subcommand] [args...]` string,
    /// used as the candidate string for pattern matching.
    pub fn render(&self) -> String {
        let mut parts = vec![self.name.clone()];
        if let Some(sub) = &self.subcommand {
            parts.push(sub.clone());
        }
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    /// Filesystem paths this command names, for the "dangerous command"
    /// subset (`rm`, `mv`, `cp`, `chmod`, `chown`, `mkdir`, `touch`,
    /// `rmdir`, `dd`). Flags (anything starting with `-`) are skipped;
    /// `dd`'s `of=`/`if=` key=value targets are extracted specially.
    pub fn extract_paths(&self) -> Vec<String> {
        if !DANGEROUS_COMMANDS.contains(&self.name.as_str()) {
            return Vec::new();
        }
        if self.name == "dd" {
            return self
                .args
                .iter()
                .filter_map(|a| a.strip_prefix("if=").or_else(|| a.strip_prefix("of=")))
                .map(|s| s.to_string())
                .collect();
        }
        self.args
            .iter()
            .filter(|a| !a.starts_with('-'))
            .cloned()
            .collect()
    }
}

/// Split a single word into `(name, subcommand)`. A subcommand is only
/// recognized for the first non-flag argument word.
fn split_name_sub(words: &[String]) -> BashCommand {
    let name = words.first().cloned().unwrap_or_default();
    let rest = &words[1.min(words.len())..];
    let subcommand = rest.iter().find(|w| !w.starts_with('-')).cloned();
    let args = rest.to_vec();
    BashCommand { name, subcommand, args }
}

/// Tokenize a single shell word stream, respecting single/double quotes and
/// `$(...)`/backtick subshells (subshell contents are tokenized recursively
/// and their commands appended to the output, since a subshell's command
/// runs with the same authority as the rest of the line).
fn tokenize(input: &str) -> Vec<Vec<String>> {
    // Split on unquoted `;`, `&&`, `||`, `|` into segments, then split each
    // segment into words.
    let mut segments: Vec<Vec<String>> = vec![Vec::new()];
    let mut current = String::new();
    let mut chars = input.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;
    let mut depth = 0usize; // paren/subshell nesting

    let push_word = |current: &mut String, words: &mut Vec<String>| {
        if !current.is_empty() {
            words.push(std::mem::take(current));
        }
    };

    let mut words = Vec::new();

    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
            }
            '"' if !in_single => {
                in_double = !in_double;
            }
            '\\' if !in_single => {
                if let Some(&next) = chars.peek() {
                    current.push(next);
                    chars.next();
                }
            }
            '(' if !in_single && !in_double => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_single && !in_double && depth > 0 => {
                depth -= 1;
                current.push(c);
            }
            ' ' | '\t' if !in_single && !in_double && depth == 0 => {
                push_word(&mut current, &mut words);
            }
            '|' if !in_single && !in_double && depth == 0 => {
                push_word(&mut current, &mut words);
                if chars.peek() == Some(&'|') {
                    chars.next();
                }
                if !words.is_empty() {
                    segments.push(std::mem::take(&mut words));
                }
            }
            '&' if !in_single && !in_double && depth == 0 && chars.peek() == Some(&'&') => {
                chars.next();
                push_word(&mut current, &mut words);
                if !words.is_empty() {
                    segments.push(std::mem::take(&mut words));
                }
            }
            ';' if !in_single && !in_double && depth == 0 => {
                push_word(&mut current, &mut words);
                if !words.is_empty() {
                    segments.push(std::mem::take(&mut words));
                }
            }
            _ => current.push(c),
        }
    }
    push_word(&mut current, &mut words);
    if !words.is_empty() {
        segments.push(words);
    }
    segments.retain(|s| !s.is_empty());
    segments
}

/// Strip leading `NAME=value` environment assignments and redirection
/// operators (`>`, `>>`, `2>`, `<`, etc. with their target word) from a
/// word list, since these are not part of the command name/args proper.
fn strip_assignments_and_redirections(words: Vec<String>) -> Vec<String> {
    let mut out = Vec::new();
    let mut iter = words.into_iter().peekable();
    let mut past_assignments = false;
    while let Some(w) = iter.next() {
        if !past_assignments && w.contains('=') && w.chars().next().map(|c| c.is_alphabetic() || c == '_').unwrap_or(false) {
            continue;
        }
        past_assignments = true;
        if is_redirection(&w) {
            iter.next(); // consume the redirection target
            continue;
        }
        out.push(w);
    }
    out
}

fn is_redirection(word: &str) -> bool {
    matches!(word, ">" | ">>" | "<" | "2>" | "2>>" | "&>" | "<<" | "<<<")
        || (word.starts_with(|c: char| c.is_ascii_digit()) && (word.ends_with('>') || word.contains(">>")))
}

/// Parse a rendered command line into its constituent [`BashCommand`]s, one
/// per pipeline/list segment (`|`, `&&`, `||`, `;`). Subshell bodies
/// (`$(...)`) are parsed recursively and their commands appended, since they
/// execute with the same authority.
pub fn parse(input: &str) -> Vec<BashCommand> {
    let mut out = Vec::new();
    for segment in tokenize(input) {
        let cleaned = strip_assignments_and_redirections(segment);
        if cleaned.is_empty() {
            continue;
        }
        out.push(split_name_sub(&cleaned));

        // Recurse into any `$(...)` / backtick subshell content embedded in
        // the args.
        for word in &cleaned {
            for inner in extract_subshells(word) {
                out.extend(parse(&inner));
            }
        }
    }
    out
}

fn extract_subshells(word: &str) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(start) = word.find("$(") {
        if let Some(rel_end) = word[start + 2..].rfind(')') {
            out.push(word[start + 2..start + 2 + rel_end].to_string());
        }
    }
    out
}
