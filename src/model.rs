// Copyright 2022 CoreOS, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-memory model of a bootloader config: lines, boot entries, and the
//! document root. Concatenating a line's indent and its (token, trailing
//! run) pairs reproduces the source bytes, so untouched regions round-trip
//! exactly.

use crate::dialect::{Dialect, LineKind};

/// One token plus the whitespace/`=` padding that followed it in the
/// source, preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub token: String,
    pub trailing: String,
}

impl Element {
    pub fn new(token: impl Into<String>, trailing: impl Into<String>) -> Self {
        Element {
            token: token.into(),
            trailing: trailing.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Whitespace before the first token. Comment lines are folded here
    /// in their entirety.
    pub indent: String,
    pub elements: Vec<Element>,
    pub kind: LineKind,
}

impl Line {
    pub fn new(kind: LineKind) -> Self {
        Line {
            indent: String::new(),
            elements: Vec::new(),
            kind,
        }
    }

    /// The value token of a `keyword value` line, if present.
    pub fn value(&self) -> Option<&str> {
        self.elements.get(1).map(|e| e.token.as_str())
    }

    /// True for a single-token `[name]` line. `[defaultboot]` is the zipl
    /// magic section, not a title.
    pub fn is_bracketed_title(&self) -> bool {
        if self.elements.len() != 1 {
            return false;
        }
        let token = &self.elements[0].token;
        token.len() >= 2
            && token.starts_with('[')
            && token.ends_with(']')
            && token != "[defaultboot]"
    }

    /// The title text inside a bracketed title token.
    pub fn bracketed_title(&self) -> Option<&str> {
        if self.is_bracketed_title() {
            let token = &self.elements[0].token;
            Some(&token[1..token.len() - 1])
        } else {
            None
        }
    }

    /// True if this line starts a new entry in the given dialect.
    pub fn is_entry_separator(&self, dialect: &Dialect) -> bool {
        if self.kind == LineKind::Whitespace {
            return false;
        }
        self.kind == dialect.entry_separator_kind
            || self.kind == LineKind::Other
            || (dialect.titles_bracketed && self.is_bracketed_title())
    }
}

/// A contiguous run of lines describing one boot image.
#[derive(Debug, Clone, Default)]
pub struct Entry {
    pub lines: Vec<Line>,
    /// Skipped on write; still indexed for intermediate lookups.
    pub marked_removed: bool,
    /// Set when the entry contains a module line.
    pub multiboot: bool,
}

impl Entry {
    pub fn line_of_kind(&self, kind: LineKind) -> Option<&Line> {
        self.lines.iter().find(|l| l.kind == kind)
    }

    pub fn line_index_of_kind(&self, kind: LineKind) -> Option<usize> {
        self.lines.iter().position(|l| l.kind == kind)
    }

    /// The title as the user understands it, bracketed or not.
    pub fn title(&self, dialect: &Dialect) -> Option<&str> {
        let line = self.line_of_kind(LineKind::Title)?;
        if dialect.titles_bracketed {
            line.bracketed_title()
        } else if line.elements.len() >= 2 {
            Some(&line.elements[1].token)
        } else {
            None
        }
    }
}

/// The default-image slot of a config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultImage {
    /// No valid default is expressed.
    Unset,
    /// `default=saved`, passed through unchanged.
    Saved,
    /// Index into the entry list.
    At(usize),
}

#[derive(Debug)]
pub struct Config {
    /// Lines appearing before the first entry.
    pub header_lines: Vec<Line>,
    pub entries: Vec<Entry>,
    pub default_image: DefaultImage,
    pub fallback_image: Option<usize>,
    /// The original file had no `default=` line; serialization then omits
    /// a synthetic one if the default is entry 0.
    pub no_explicit_default: bool,
    /// Indentation of the first non-blank header line, used for
    /// synthesized header lines.
    pub primary_indent: String,
    /// Indentation of the first non-blank entry-body line, used for
    /// synthesized entry-body lines.
    pub secondary_indent: String,
    pub dialect: &'static Dialect,
}

impl Config {
    pub fn new(dialect: &'static Dialect) -> Self {
        Config {
            header_lines: Vec::new(),
            entries: Vec::new(),
            default_image: DefaultImage::At(0),
            fallback_image: None,
            no_explicit_default: true,
            primary_indent: String::new(),
            secondary_indent: "\t".to_string(),
            dialect,
        }
    }

    /// Number of entries that will survive serialization.
    pub fn live_entries(&self) -> usize {
        self.entries.iter().filter(|e| !e.marked_removed).count()
    }
}

/// The parenthesized device prefix of a path, e.g. `(hd0,0)` in
/// `(hd0,0)/vmlinuz`. Ends at the closing paren or at whitespace.
pub fn root_specifier(s: &str) -> Option<&str> {
    if !s.starts_with('(') {
        return None;
    }
    for (i, c) in s.char_indices().skip(1) {
        if c == ')' || c.is_whitespace() {
            return Some(&s[..i + c.len_utf8()]);
        }
    }
    Some(s)
}

/// A path with its root specifier removed.
pub fn strip_root_specifier(s: &str) -> &str {
    match root_specifier(s) {
        Some(spec) => &s[spec.len()..],
        None => s,
    }
}

/// Strips a boot prefix by length, mirroring how callers hand us paths
/// that are known to start with the prefix.
pub fn strip_boot_prefix<'a>(path: &'a str, prefix: &str) -> &'a str {
    path.get(prefix.len()..).unwrap_or("")
}
