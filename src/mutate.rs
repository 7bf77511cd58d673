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

//! Mutations on a parsed config: add a kernel entry (optionally from a
//! template), update kernel arguments, mark entries removed, and keep the
//! default/fallback indices consistent across insertions and removals.

use anyhow::{anyhow, Context, Result};

use crate::dialect::{Dialect, LineKind};
use crate::locate::{find_entry, find_template};
use crate::model::{
    root_specifier, strip_boot_prefix, Config, DefaultImage, Element, Entry, Line,
};

/// Marks every entry matching `key` as removed. Idempotent.
pub fn mark_removed_image(config: &mut Config, key: &str, prefix: &str) -> Result<()> {
    let mut index = 0;
    while let Some(i) = find_entry(config, key, prefix, &mut index)? {
        config.entries[i].marked_removed = true;
        index += 1;
    }
    Ok(())
}

/// Synthesizes a `keyword value` line and inserts it after the entry's
/// last non-blank line. Returns the new line's position.
fn add_line(
    entry: &mut Entry,
    dialect: &Dialect,
    kind: LineKind,
    default_indent: &str,
    val: Option<&str>,
) -> usize {
    let pos = entry
        .lines
        .iter()
        .rposition(|l| !l.elements.is_empty())
        .map(|i| i + 1)
        .unwrap_or(entry.lines.len());

    // the first line is normally indented differently from the rest
    let indent = if pos <= 1 {
        default_indent.to_string()
    } else {
        entry.lines[pos - 1].indent.clone()
    };

    let mut line = Line::new(kind);
    line.indent = indent;
    match dialect.keyword_for(kind) {
        Some(kw) => {
            line.elements.push(Element::new(kw.text, kw.separator.to_string()));
            if let Some(val) = val {
                line.elements.push(Element::new(val, ""));
            }
        }
        None => {
            // zipl's bracketed titles have no keyword
            assert!(kind == LineKind::Title && dialect.titles_bracketed);
            line.elements
                .push(Element::new(format!("[{}]", val.unwrap_or("")), ""));
        }
    }

    entry.lines.insert(pos, line);
    pos
}

fn remove_line(entry: &mut Entry, index: usize) {
    entry.lines.remove(index);
}

fn arg_key(arg: &str) -> &str {
    arg.split('=').next().unwrap_or(arg)
}

/// Updates the main kernel arguments and, separately, the multiboot
/// (hypervisor) arguments of every entry `key` selects.
pub fn update_image(
    config: &mut Config,
    key: &str,
    prefix: &str,
    add_args: Option<&str>,
    remove_args: Option<&str>,
    add_mb_args: Option<&str>,
    remove_mb_args: Option<&str>,
) -> Result<()> {
    if add_args.is_some() || remove_args.is_some() {
        update_actual_image(config, key, prefix, add_args, remove_args, false)?;
    }
    if add_mb_args.is_some() || remove_mb_args.is_some() {
        update_actual_image(config, key, prefix, add_mb_args, remove_mb_args, true)?;
    }
    Ok(())
}

fn split_args(args: Option<&str>) -> Result<Vec<String>> {
    match args {
        None => Ok(Vec::new()),
        Some(s) => shell_words::split(s)
            .with_context(|| format!("error separating arguments '{}'", s)),
    }
}

fn update_actual_image(
    config: &mut Config,
    key: &str,
    prefix: &str,
    add_args: Option<&str>,
    remove_args: Option<&str>,
    multiboot_args: bool,
) -> Result<()> {
    let new_args = split_args(add_args)?;
    let old_args = split_args(remove_args)?;

    let use_kernel_args = config.dialect.has_keyword(LineKind::KernelArgs);
    let use_root = config.dialect.has_keyword(LineKind::Root);
    let secondary_indent = config.secondary_indent.clone();

    // each add-arg replaces an existing argument at most once across all
    // selected entries
    let mut used_args = vec![false; new_args.len()];

    let mut index = 0;
    while let Some(ei) = find_entry(config, key, prefix, &mut index)? {
        index += 1;

        let dialect = config.dialect;
        let entry = &mut config.entries[ei];
        let kernel = match entry.line_index_of_kind(LineKind::Kernel) {
            Some(k) => k,
            None => continue,
        };

        let mut first_element = 2;
        let mut target = Some(kernel);
        if entry.multiboot && !multiboot_args {
            // the first module line is the real kernel
            target = entry.lines[kernel..]
                .iter()
                .position(|l| l.kind == LineKind::MbModule)
                .map(|o| kernel + o);
        } else if use_kernel_args {
            target = entry.lines[kernel..]
                .iter()
                .position(|l| l.kind == LineKind::KernelArgs)
                .map(|o| kernel + o);
            first_element = 1;
        }

        if target.is_none() && use_kernel_args && !new_args.is_empty() {
            // no append in there, need to add it
            target = Some(add_line(
                entry,
                dialect,
                LineKind::KernelArgs,
                &secondary_indent,
                None,
            ));
            first_element = 1;
        }
        let mut target = match target {
            Some(t) => t,
            None => continue,
        };

        let mut used_elements = vec![false; entry.lines[target].elements.len()];

        for (k, arg) in new_args.iter().enumerate() {
            if used_args[k] {
                continue;
            }
            let line = &mut entry.lines[target];
            let mut matched = None;
            for i in first_element..line.elements.len() {
                if used_elements[i] {
                    continue;
                }
                if arg_key(&line.elements[i].token) == arg_key(arg) {
                    matched = Some(i);
                    used_elements[i] = true;
                    used_args[k] = true;
                    break;
                }
            }

            if let Some(i) = matched {
                line.elements[i].token = arg.clone();
            } else if use_root && arg.starts_with("root=/dev/") {
                // route the device into the root line instead
                let value = &arg["root=".len()..];
                let root = match entry.line_index_of_kind(LineKind::Root) {
                    Some(r) => r,
                    None => {
                        let r = add_line(
                            entry,
                            dialect,
                            LineKind::Root,
                            &secondary_indent,
                            Some(""),
                        );
                        if r <= target {
                            target += 1;
                        }
                        r
                    }
                };
                entry.lines[root].elements[1].token = value.to_string();

                // the args line must not carry a competing root=
                remove_matching_args(
                    &mut entry.lines[target],
                    first_element,
                    "root",
                    &mut used_elements,
                );
            } else {
                // append, stealing the previous element's trailing run
                let n = line.elements.len();
                let trailing = if n > 1 {
                    std::mem::replace(&mut line.elements[n - 1].trailing, " ".into())
                } else {
                    String::new()
                };
                line.elements.push(Element::new(arg.clone(), trailing));
                used_elements.push(true);

                // if this sets root= even though a root line exists, the
                // root line is stale (device-to-label switch)
                if use_root && arg.starts_with("root=") {
                    if let Some(r) = entry.line_index_of_kind(LineKind::Root) {
                        remove_line(entry, r);
                        if r < target {
                            target -= 1;
                        }
                    }
                }
            }
        }

        for arg in &old_args {
            let line = &mut entry.lines[target];
            if let Some(i) = (first_element..line.elements.len())
                .find(|&i| arg_key(&line.elements[i].token) == arg_key(arg))
            {
                if i > first_element {
                    line.elements[i - 1].trailing = line.elements[i].trailing.clone();
                }
                line.elements.remove(i);
            }
        }

        if entry.lines[target].elements.len() == 1 {
            // just the keyword left; only possible for an args line
            remove_line(entry, target);
        }
    }

    Ok(())
}

fn remove_matching_args(
    line: &mut Line,
    first_element: usize,
    key: &str,
    used_elements: &mut Vec<bool>,
) {
    let mut i = first_element;
    while i < line.elements.len() {
        if arg_key(&line.elements[i].token) == key {
            if i > first_element {
                line.elements[i - 1].trailing = line.elements[i].trailing.clone();
            }
            line.elements.remove(i);
            if i < used_elements.len() {
                used_elements.remove(i);
            }
        } else {
            i += 1;
        }
    }
}

/// Truncates an over-long title to the dialect's cap, overwriting the
/// tail with a decimal counter until the result is unique in the file.
fn unique_title(config: &Config, title: &str, max: usize) -> Result<String> {
    let mut truncated = truncate_at_boundary(title, max).to_string();
    let mut n = 1u32;
    loop {
        let key = format!("TITLE={}", truncated);
        let mut index = 0;
        if find_entry(config, &key, "", &mut index)?.is_none() {
            return Ok(truncated);
        }
        let digits = n.to_string();
        if digits.len() >= truncated.len() {
            return Ok(digits);
        }
        let cut = floor_char_boundary(&truncated, truncated.len() - digits.len());
        truncated.replace_range(cut.., &digits);
        n += 1;
    }
}

fn truncate_at_boundary(s: &str, max: usize) -> &str {
    &s[..floor_char_boundary(s, max)]
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[allow(clippy::too_many_arguments)]
pub fn add_new_kernel(
    config: &mut Config,
    template: Option<&Entry>,
    prefix: &str,
    new_kernel_path: &str,
    new_kernel_title: &str,
    new_kernel_args: Option<&str>,
    new_kernel_initrd: Option<&str>,
    new_mb_kernel: Option<&str>,
    new_mb_kernel_args: Option<&str>,
) -> Result<()> {
    let dialect = config.dialect;

    // if the title is too long, silently munge it into something we can
    // live with
    let title = match dialect.max_title_length {
        Some(max) if new_kernel_title.len() > max => unique_title(config, new_kernel_title, max)?,
        _ => new_kernel_title.to_string(),
    };

    let mut new = Entry {
        multiboot: new_mb_kernel.is_some(),
        ..Default::default()
    };

    let mut needs_kernel = true;
    let mut needs_initrd = true;
    let mut needs_title = true;
    let mut needs_mb = new.multiboot;

    let mb_kernel = new_mb_kernel.unwrap_or("");
    let secondary = config.secondary_indent.clone();
    let primary = config.primary_indent.clone();

    if let Some(tmpl) = template {
        for tline in &tmpl.lines {
            // skip comments
            if tline.indent.trim_start().starts_with('#') {
                continue;
            }
            // we don't need an initrd here
            if tline.kind == LineKind::Initrd && new_kernel_initrd.is_none() {
                continue;
            }

            if tline.kind == LineKind::Kernel {
                if !tmpl.multiboot && needs_mb {
                    // the new hypervisor goes in front; the template's
                    // kernel line then becomes a module line below
                    add_line(
                        &mut new,
                        dialect,
                        LineKind::Kernel,
                        &secondary,
                        Some(strip_boot_prefix(mb_kernel, prefix)),
                    );
                    needs_mb = false;
                } else if tmpl.multiboot && !new.multiboot {
                    // don't need a hypervisor here
                    continue;
                }
            }
            if tline.kind == LineKind::MbModule
                && !needs_kernel
                && needs_initrd
                && new_kernel_initrd.is_none()
            {
                // the template's initrd module has no replacement
                continue;
            }

            let mut nl = tline.clone();
            let spec = tline
                .value()
                .and_then(root_specifier)
                .unwrap_or("")
                .to_string();

            if tline.kind == LineKind::Kernel && tline.elements.len() >= 2 {
                let repl = if tmpl.multiboot {
                    needs_mb = false;
                    mb_kernel
                } else {
                    needs_kernel = false;
                    new_kernel_path
                };
                if new.multiboot && !tmpl.multiboot {
                    nl.elements[0].token = "module".to_string();
                    nl.kind = LineKind::MbModule;
                }
                nl.elements[1].token = format!("{}{}", spec, strip_boot_prefix(repl, prefix));
            } else if tline.kind == LineKind::MbModule
                && tline.elements.len() >= 2
                && needs_kernel
            {
                needs_kernel = false;
                if !new.multiboot && tmpl.multiboot {
                    nl.elements[0].token = "kernel".to_string();
                    nl.kind = LineKind::Kernel;
                }
                nl.elements[1].token =
                    format!("{}{}", spec, strip_boot_prefix(new_kernel_path, prefix));
            } else if tline.kind == LineKind::Initrd && tline.elements.len() >= 2 {
                needs_initrd = false;
                if new.multiboot && !tmpl.multiboot {
                    nl.elements[0].token = "module".to_string();
                    nl.kind = LineKind::MbModule;
                }
                let initrd = new_kernel_initrd.unwrap_or("");
                nl.elements[1].token =
                    format!("{}{}", spec, strip_boot_prefix(initrd, prefix));
            } else if tline.kind == LineKind::MbModule
                && tline.elements.len() >= 2
                && needs_initrd
            {
                needs_initrd = false;
                if !new.multiboot && tmpl.multiboot {
                    nl.elements[0].token = "initrd".to_string();
                    nl.kind = LineKind::Initrd;
                }
                let initrd = new_kernel_initrd.unwrap_or("");
                nl.elements[1].token =
                    format!("{}{}", spec, strip_boot_prefix(initrd, prefix));
            } else if tline.kind == LineKind::Title && tline.elements.len() >= 2 {
                needs_title = false;
                nl.elements.truncate(2);
                nl.elements[1] = Element::new(title.clone(), "");
            } else if tline.kind == LineKind::Title
                && dialect.titles_bracketed
                && tline.elements.len() == 1
            {
                needs_title = false;
                nl.elements[0] = Element::new(format!("[{}]", title), "");
            }

            new.lines.push(nl);
        }
    } else {
        // no template: seed the entry with its separator line
        let seed = dialect
            .keywords
            .iter()
            .find(|k| k.kind == dialect.entry_separator_kind || k.kind == LineKind::Other)
            .map(|k| k.kind);
        match seed {
            Some(LineKind::Kernel) => {
                needs_kernel = false;
                add_line(
                    &mut new,
                    dialect,
                    LineKind::Kernel,
                    &primary,
                    Some(strip_boot_prefix(new_kernel_path, prefix)),
                );
            }
            Some(LineKind::Title) => {
                needs_title = false;
                add_line(&mut new, dialect, LineKind::Title, &primary, Some(&title));
            }
            _ => {
                if dialect.titles_bracketed {
                    needs_title = false;
                    add_line(&mut new, dialect, LineKind::Title, &primary, Some(&title));
                } else {
                    return Err(anyhow!(
                        "dialect {} has no entry separator keyword",
                        dialect.name
                    ));
                }
            }
        }
    }

    if new.multiboot {
        if needs_mb {
            add_line(
                &mut new,
                dialect,
                LineKind::Kernel,
                &secondary,
                Some(strip_boot_prefix(mb_kernel, prefix)),
            );
        }
        if needs_kernel {
            add_line(
                &mut new,
                dialect,
                LineKind::MbModule,
                &secondary,
                Some(strip_boot_prefix(new_kernel_path, prefix)),
            );
        }
        if needs_initrd {
            if let Some(initrd) = new_kernel_initrd {
                add_line(
                    &mut new,
                    dialect,
                    LineKind::MbModule,
                    &secondary,
                    Some(strip_boot_prefix(initrd, prefix)),
                );
            }
        }
    } else {
        if needs_kernel {
            add_line(
                &mut new,
                dialect,
                LineKind::Kernel,
                &secondary,
                Some(strip_boot_prefix(new_kernel_path, prefix)),
            );
        }
        if needs_title {
            add_line(&mut new, dialect, LineKind::Title, &secondary, Some(&title));
        }
        if needs_initrd {
            if let Some(initrd) = new_kernel_initrd {
                add_line(
                    &mut new,
                    dialect,
                    LineKind::Initrd,
                    &secondary,
                    Some(strip_boot_prefix(initrd, prefix)),
                );
            }
        }
    }

    config.entries.insert(0, new);

    update_image(
        config,
        "0",
        prefix,
        new_kernel_args,
        None,
        new_mb_kernel_args,
        None,
    )
}

/// Repoints the default after entries were added or removed.
pub fn set_default_image(
    config: &mut Config,
    has_new: bool,
    default_kernel_path: Option<&str>,
    new_is_default: bool,
    prefix: &str,
    bad_image_okay: bool,
) -> Result<()> {
    if new_is_default {
        config.default_image = DefaultImage::At(0);
        return Ok(());
    }
    if let Some(key) = default_kernel_path {
        let mut index = 0;
        match find_entry(config, key, prefix, &mut index)? {
            Some(i) => config.default_image = DefaultImage::At(i),
            None => {
                config.default_image = DefaultImage::Unset;
                return Ok(());
            }
        }
    }

    // the default now points at what we'd like, but in pre-edit numbering
    if config.default_image == DefaultImage::Saved {
        return Ok(());
    }

    let live = match config.default_image {
        DefaultImage::At(d) => config
            .entries
            .get(d)
            .map(|e| !e.marked_removed)
            .unwrap_or(false),
        _ => false,
    };

    if live {
        let d = match config.default_image {
            DefaultImage::At(d) => d,
            _ => unreachable!(),
        };
        let removed_before = config.entries[..d]
            .iter()
            .filter(|e| e.marked_removed)
            .count();
        config.default_image = DefaultImage::At(d + usize::from(has_new) - removed_before);
    } else if has_new {
        config.default_image = DefaultImage::At(0);
    } else {
        // the default was erased or bad to begin with; fall back to the
        // first usable image
        config.default_image = match find_template(config, prefix, true, bad_image_okay) {
            Some((_, adjusted)) => DefaultImage::At(adjusted),
            None => DefaultImage::Unset,
        };
    }
    Ok(())
}

/// Like the default, but a fallback that stops resolving is dropped
/// rather than replaced.
pub fn set_fallback_image(config: &mut Config, has_new: bool) {
    let f = match config.fallback_image {
        Some(f) => f,
        None => return,
    };
    let live = config
        .entries
        .get(f)
        .map(|e| !e.marked_removed)
        .unwrap_or(false);
    if !live {
        config.fallback_image = None;
        return;
    }
    let removed_before = config.entries[..f]
        .iter()
        .filter(|e| e.marked_removed)
        .count();
    config.fallback_image = Some(f + usize::from(has_new) - removed_before);
}
