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

//! Tokenizer and config assembly. The tokenizer cannot fail on syntax;
//! unrecognized content becomes `Unknown` lines and comments fold into
//! whitespace, so any file round-trips.

use anyhow::{anyhow, Result};
use std::io::Read;
use std::path::Path;

use crate::dialect::{DefaultKind, Dialect, LineKind};
use crate::errors::GrubbyError;
use crate::model::{Config, DefaultImage, Element, Entry, Line};

/// Reads and parses a config file. `"-"` reads standard input.
pub fn read_config_file(path: &str, dialect: &'static Dialect) -> Result<Config> {
    let mut buf = String::new();
    if path == "-" {
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|source| GrubbyError::ReadFailed {
                path: "-".into(),
                source,
            })?;
    } else {
        buf = std::fs::read_to_string(Path::new(path)).map_err(|source| {
            anyhow!(GrubbyError::ReadFailed {
                path: path.into(),
                source,
            })
        })?;
    }
    Ok(parse_config(&buf, dialect))
}

/// Splits one physical line (without its newline) into tokens.
///
/// The first token additionally terminates at `=`, so `image=/boot/foo`
/// yields the token `image`; in later tokens `=` is an ordinary
/// character. A trailing run may contain one `=` surrounded by
/// whitespace, encoding the `key = value` form.
pub fn tokenize_line(raw: &str, dialect: &Dialect) -> Line {
    let bytes = raw.as_bytes();
    let mut pos = 0;
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }

    let mut line = Line::new(LineKind::Whitespace);
    line.indent = raw[..pos].to_string();

    let mut first = true;
    while pos < bytes.len() {
        let start = pos;
        while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() {
            if first && bytes[pos] == b'=' {
                break;
            }
            pos += 1;
        }
        let token = raw[start..pos].to_string();

        // lilo accepts the pathological case of `append = " foo "`
        let run_start = pos;
        if pos < bytes.len() && bytes[pos] == b'=' {
            pos += 1;
        }
        loop {
            while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if pos < bytes.len() && bytes[pos] == b'=' {
                pos += 1;
            }
            if pos >= bytes.len() || !bytes[pos].is_ascii_whitespace() {
                break;
            }
        }
        line.elements
            .push(Element::new(token, &raw[run_start..pos]));
        first = false;
    }

    if line.elements.is_empty() {
        return line;
    }

    match dialect.kind_of(&line.elements[0].token) {
        Some(kind) => line.kind = kind,
        None => {
            line.kind = LineKind::Unknown;

            // zipl does [title] instead of a keyword
            if dialect.titles_bracketed && line.is_bracketed_title() {
                line.kind = LineKind::Title;
            } else if line.elements[0].token.starts_with('#') {
                // fold the whole comment back into the indent
                let mut full = std::mem::take(&mut line.indent);
                for el in line.elements.drain(..) {
                    full.push_str(&el.token);
                    full.push_str(&el.trailing);
                }
                line.indent = full;
                line.kind = LineKind::Whitespace;
            }
        }
    }

    line
}

/// Parses an entire buffer into a config. The buffer is treated as
/// newline-terminated; a missing final newline is supplied, and an empty
/// buffer is a single empty line.
pub fn parse_config(buf: &str, dialect: &'static Dialect) -> Config {
    let mut text = buf.to_string();
    if text.is_empty() || !text.ends_with('\n') {
        text.push('\n');
    }

    let mut cfg = Config::new(dialect);
    let mut saw_entry = false;
    let mut moved_line = false;
    let mut primary_seen = false;
    let mut secondary_seen = false;
    let mut last_kind: Option<LineKind> = None;
    let mut default_value: Option<String> = None;

    for raw in text.split_terminator('\n') {
        let mut line = tokenize_line(raw, dialect);
        let is_separator = line.is_entry_separator(dialect);

        if !line.elements.is_empty() {
            if !saw_entry && !primary_seen {
                cfg.primary_indent = line.indent.clone();
                primary_seen = true;
            } else if saw_entry && !is_separator && !secondary_seen {
                cfg.secondary_indent = line.indent.clone();
                secondary_seen = true;
            }
        }

        if is_separator {
            saw_entry = true;
            cfg.entries.push(Entry::default());
        }

        if line.kind == LineKind::Default && line.elements.len() == 2 {
            cfg.no_explicit_default = false;
            default_value = Some(line.elements[1].token.clone());
        } else if line.kind == LineKind::MbModule {
            if let Some(entry) = cfg.entries.last_mut() {
                entry.multiboot = true;
            }
        } else if line.kind == LineKind::Fallback && line.elements.len() == 2 {
            cfg.fallback_image = line.elements[1].token.parse::<usize>().ok();
        } else if line.kind == LineKind::Title && line.elements.len() > 2 {
            collapse_title(&mut line);
        } else if line.kind == LineKind::KernelArgs && dialect.args_in_quotes {
            strip_arg_quotes(&mut line);
        }

        // A generic option found below the first entry belongs at the top
        // of the file; old tool versions put new images in front of it.
        if saw_entry && line.kind == LineKind::Generic {
            let pos = cfg
                .header_lines
                .iter()
                .rposition(|l| l.kind != LineKind::Whitespace)
                .map(|i| i + 1)
                .unwrap_or(0);
            cfg.header_lines.insert(pos, line);
            moved_line = true;
            continue; // without updating last_kind
        }
        // A second blank after a moved generic option is dropped.
        if moved_line
            && line.kind == LineKind::Whitespace
            && last_kind == Some(LineKind::Whitespace)
        {
            moved_line = false;
            continue;
        }
        moved_line = false;

        last_kind = Some(line.kind);
        if saw_entry {
            // the separator above ensures an entry exists
            if let Some(entry) = cfg.entries.last_mut() {
                entry.lines.push(line);
            }
        } else {
            cfg.header_lines.push(line);
        }
    }

    cfg.default_image = resolve_default(&cfg, default_value.as_deref());
    cfg
}

/// Titles are semantically single strings; merge a multi-token title
/// value into one token carrying the intervening whitespace.
fn collapse_title(line: &mut Line) {
    let mut merged = String::new();
    for (i, el) in line.elements.iter().enumerate().skip(1) {
        merged.push_str(&el.token);
        if i + 1 != line.elements.len() {
            merged.push_str(&el.trailing);
        }
    }
    let last_trailing = line.elements.last().map(|e| e.trailing.clone());
    line.elements.truncate(2);
    line.elements[1].token = merged;
    if let Some(trailing) = last_trailing {
        line.elements[1].trailing = trailing;
    }
}

/// Strip any `"` which may be present; they'll be put back on write.
/// This is one of the few places the tool canonicalizes its input.
fn strip_arg_quotes(line: &mut Line) {
    if line.elements.len() < 2 {
        return;
    }
    if let Some(stripped) = line.elements[1].token.strip_prefix('"') {
        line.elements[1].token = stripped.to_string();
    }
    let last = line.elements.len() - 1;
    if let Some(stripped) = line.elements[last].token.strip_suffix('"') {
        line.elements[last].token = stripped.to_string();
    }
}

fn resolve_default(cfg: &Config, default_value: Option<&str>) -> DefaultImage {
    let value = match default_value {
        Some(v) => v,
        // No default line: the bootloader boots the first entry, and the
        // NO_EXPLICIT_DEFAULT flag suppresses a synthetic default=0.
        None => return DefaultImage::At(0),
    };

    if cfg.dialect.supports_saved_default && value == "saved" {
        return DefaultImage::Saved;
    }

    match cfg.dialect.default_representation {
        DefaultKind::Index => match value.parse::<i64>() {
            Ok(n) if n >= 0 => DefaultImage::At(n as usize),
            _ => DefaultImage::Unset,
        },
        DefaultKind::ByTitle => {
            for (i, entry) in cfg.entries.iter().enumerate() {
                if entry.title(cfg.dialect) == Some(value) {
                    return DefaultImage::At(i);
                }
            }
            DefaultImage::Unset
        }
    }
}
