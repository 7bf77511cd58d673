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

//! Entry lookup by selector: a comma-separated index list, `DEFAULT`,
//! `ALL`, `TITLE=<text>`, or a kernel path. Also the suitability check
//! used to pick copy templates.

use anyhow::Result;
use nix::sys::stat::stat;
use nix::unistd::{access, AccessFlags};
use std::path::Path;

use crate::dialect::LineKind;
use crate::errors::GrubbyError;
use crate::model::{strip_boot_prefix, strip_root_specifier, Config, DefaultImage, Entry};

/// Finds the next entry matching `key`, scanning from `*index`.
///
/// For numeric keys, `*index` is a position into the comma-separated
/// list; for all other keys it is an entry index and is updated to the
/// match. Returns the matched entry's index, or `None` when the selector
/// is exhausted. Entries with no kernel line (non-Linux entries) are
/// stepped over for the non-numeric key forms.
pub fn find_entry(
    config: &Config,
    key: &str,
    prefix: &str,
    index: &mut usize,
) -> Result<Option<usize>> {
    if key.starts_with(|c: char| c.is_ascii_digit()) {
        let list = parse_index_list(key)?;
        let target = match list.get(*index) {
            Some(&t) => t,
            None => return Ok(None),
        };
        return match config.entries.get(target) {
            Some(entry) if entry.line_of_kind(LineKind::Kernel).is_some() => Ok(Some(target)),
            _ => Ok(None),
        };
    }

    loop {
        let found = match key {
            "DEFAULT" => find_default(config, index),
            "ALL" => find_from(config, index, |_| true),
            _ => {
                if let Some(title) = key.strip_prefix("TITLE=") {
                    find_from(config, index, |e| e.title(config.dialect) == Some(title))
                } else {
                    let want = strip_boot_prefix(key, prefix);
                    find_from(config, index, |e| kernel_path_matches(e, want))
                }
            }
        };
        match found {
            None => return Ok(None),
            Some(i) => {
                if config.entries[i].line_of_kind(LineKind::Kernel).is_some() {
                    return Ok(Some(i));
                }
                // could be netbsd etc.; move past it and retry
                *index += 1;
            }
        }
    }
}

fn parse_index_list(key: &str) -> Result<Vec<usize>> {
    key.split(',')
        .map(|part| {
            part.parse::<usize>().map_err(|e| {
                GrubbyError::ParseRejected {
                    what: format!("entry selector '{}'", key),
                    reason: e.to_string(),
                }
                .into()
            })
        })
        .collect()
}

fn find_default(config: &Config, index: &mut usize) -> Option<usize> {
    match config.default_image {
        DefaultImage::At(d) if *index <= d => {
            let entry = config.entries.get(d)?;
            if entry.marked_removed {
                None
            } else {
                *index = d;
                Some(d)
            }
        }
        _ => None,
    }
}

fn find_from(config: &Config, index: &mut usize, pred: impl Fn(&Entry) -> bool) -> Option<usize> {
    for (i, entry) in config.entries.iter().enumerate().skip(*index) {
        if !entry.marked_removed && pred(entry) {
            *index = i;
            return Some(i);
        }
    }
    None
}

fn kernel_path_matches(entry: &Entry, want: &str) -> bool {
    if let Some(line) = entry.line_of_kind(LineKind::Kernel) {
        if line.elements.len() >= 2 && strip_root_specifier(&line.elements[1].token) == want {
            return true;
        }
    }
    if entry.multiboot {
        if let Some(line) = entry.line_of_kind(LineKind::MbModule) {
            if line.elements.len() >= 2 && strip_root_specifier(&line.elements[1].token) == want {
                return true;
            }
        }
    }
    false
}

/// The `root=` device an entry would boot with, from the cascade:
/// kernel-line argument, `root` line, kernel-args line, then the module
/// line for multiboot entries.
pub fn entry_root_device(entry: &Entry) -> Option<&str> {
    fn root_arg(tokens: &[crate::model::Element]) -> Option<&str> {
        tokens.iter().find_map(|el| {
            if el.token.len() >= 5 && el.token[..5].eq_ignore_ascii_case("root=") {
                Some(&el.token[5..])
            } else {
                None
            }
        })
    }

    if let Some(line) = entry.line_of_kind(LineKind::Kernel) {
        if line.elements.len() > 2 {
            if let Some(dev) = root_arg(&line.elements[2..]) {
                return Some(dev);
            }
        }
    }
    if let Some(line) = entry.line_of_kind(LineKind::Root) {
        if line.elements.len() >= 2 {
            return Some(&line.elements[1].token);
        }
    }
    if let Some(line) = entry.line_of_kind(LineKind::KernelArgs) {
        if line.elements.len() >= 2 {
            if let Some(dev) = root_arg(&line.elements[1..]) {
                return Some(dev);
            }
        }
    }
    if entry.multiboot {
        if let Some(line) = entry.line_of_kind(LineKind::MbModule) {
            if line.elements.len() >= 2 {
                if let Some(dev) = root_arg(&line.elements[1..]) {
                    return Some(dev);
                }
            }
        }
    }
    None
}

/// Whether an entry is a viable copy template: its kernel exists under
/// the boot prefix and its root device is the running root filesystem.
pub fn suitable_image(
    entry: &Entry,
    boot_prefix: &str,
    skip_removed: bool,
    bad_image_okay: bool,
) -> bool {
    let line = match entry.line_of_kind(LineKind::Kernel) {
        Some(l) => l,
        None => return false,
    };
    if skip_removed && entry.marked_removed {
        return false;
    }
    if line.elements.len() < 2 {
        return false;
    }
    if bad_image_okay {
        return true;
    }

    let path = strip_root_specifier(&line.elements[1].token);
    let full = format!("{}{}", boot_prefix, path);
    if access(Path::new(&full), AccessFlags::R_OK).is_err() {
        return false;
    }

    // root= values are opaque; LABEL=/UUID= specs simply fail the stat
    let dev = match entry_root_device(entry) {
        Some(d) => d,
        None => return false,
    };
    let dev_stat = match stat(Path::new(dev)) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let root_stat = match stat(Path::new("/")) {
        Ok(s) => s,
        Err(_) => return false,
    };
    dev_stat.st_rdev == root_stat.st_dev
}

/// Finds a good template for a new kernel: the default entry if its
/// image checks out, else the first suitable entry. Returns the entry's
/// index and its position once marked-removed entries are squeezed out.
pub fn find_template(
    config: &Config,
    prefix: &str,
    skip_removed: bool,
    bad_image_okay: bool,
) -> Option<(usize, usize)> {
    if let DefaultImage::At(d) = config.default_image {
        if let Some(entry) = config.entries.get(d) {
            if suitable_image(entry, prefix, skip_removed, bad_image_okay) {
                return Some((d, d));
            }
        }
    }

    for (i, entry) in config.entries.iter().enumerate() {
        if suitable_image(entry, prefix, skip_removed, bad_image_okay) {
            let removed_before = config.entries[..i]
                .iter()
                .filter(|e| e.marked_removed)
                .count();
            return Some((i, i - removed_before));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect;
    use crate::parse::parse_config;

    fn grub_config() -> Config {
        parse_config(
            "default=1\n\
             title one\n\tkernel (hd0,0)/vmlinuz-1 ro\n\
             title two\n\tkernel /vmlinuz-2 ro\n\
             title three\n\tkernel /vmlinuz-3 ro\n",
            &dialect::GRUB,
        )
    }

    #[test]
    fn test_find_by_index_list() {
        let cfg = grub_config();
        let mut idx = 0;
        assert_eq!(find_entry(&cfg, "2", "", &mut idx).unwrap(), Some(2));
        let mut idx = 0;
        assert_eq!(find_entry(&cfg, "0,2", "", &mut idx).unwrap(), Some(0));
        idx += 1;
        assert_eq!(find_entry(&cfg, "0,2", "", &mut idx).unwrap(), Some(2));
        idx += 1;
        assert_eq!(find_entry(&cfg, "0,2", "", &mut idx).unwrap(), None);
    }

    #[test]
    fn test_find_by_index_list_rejects_garbage() {
        let cfg = grub_config();
        let mut idx = 0;
        assert!(find_entry(&cfg, "3,", "", &mut idx)
            .unwrap_err()
            .is::<GrubbyError>());
        let mut idx = 0;
        assert!(find_entry(&cfg, "3x", "", &mut idx).is_err());
    }

    #[test]
    fn test_find_default() {
        let cfg = grub_config();
        let mut idx = 0;
        assert_eq!(find_entry(&cfg, "DEFAULT", "", &mut idx).unwrap(), Some(1));
        assert_eq!(idx, 1);
        // scanning past the default finds nothing
        let mut idx = 2;
        assert_eq!(find_entry(&cfg, "DEFAULT", "", &mut idx).unwrap(), None);
    }

    #[test]
    fn test_find_default_skips_removed() {
        let mut cfg = grub_config();
        cfg.entries[1].marked_removed = true;
        let mut idx = 0;
        assert_eq!(find_entry(&cfg, "DEFAULT", "", &mut idx).unwrap(), None);
    }

    #[test]
    fn test_find_all() {
        let mut cfg = grub_config();
        cfg.entries[1].marked_removed = true;
        let mut idx = 0;
        let mut seen = Vec::new();
        while let Some(i) = find_entry(&cfg, "ALL", "", &mut idx).unwrap() {
            seen.push(i);
            idx += 1;
        }
        assert_eq!(seen, vec![0, 2]);
    }

    #[test]
    fn test_find_by_title() {
        let cfg = grub_config();
        let mut idx = 0;
        assert_eq!(
            find_entry(&cfg, "TITLE=two", "", &mut idx).unwrap(),
            Some(1)
        );
        let mut idx = 0;
        assert_eq!(find_entry(&cfg, "TITLE=nope", "", &mut idx).unwrap(), None);
    }

    #[test]
    fn test_find_by_bracketed_title() {
        let cfg = parse_config(
            "[defaultboot]\ndefault=linux\n[linux]\nimage=/boot/vmlinuz\n",
            &dialect::ZIPL,
        );
        let mut idx = 0;
        assert_eq!(
            find_entry(&cfg, "TITLE=linux", "", &mut idx).unwrap(),
            Some(0)
        );
    }

    #[test]
    fn test_find_by_path_strips_root_specifier_and_prefix() {
        let cfg = grub_config();
        let mut idx = 0;
        assert_eq!(
            find_entry(&cfg, "/boot/vmlinuz-1", "/boot", &mut idx).unwrap(),
            Some(0)
        );
        let mut idx = 0;
        assert_eq!(
            find_entry(&cfg, "/vmlinuz-2", "", &mut idx).unwrap(),
            Some(1)
        );
    }

    #[test]
    fn test_find_by_path_multiboot_module() {
        let cfg = parse_config(
            "title xen\n\tkernel /xen.gz\n\tmodule /vmlinuz-xen ro\n\tmodule /initrd-xen\n",
            &dialect::GRUB,
        );
        let mut idx = 0;
        assert_eq!(
            find_entry(&cfg, "/vmlinuz-xen", "", &mut idx).unwrap(),
            Some(0)
        );
    }

    #[test]
    fn test_find_steps_over_non_linux_entries() {
        let cfg = parse_config(
            "image=/boot/vmlinuz-1\n\tlabel=linux\nother=/dev/hda3\n\tlabel=dos\nimage=/boot/vmlinuz-1\n\tlabel=linux2\n",
            &dialect::LILO,
        );
        let mut idx = 0;
        assert_eq!(
            find_entry(&cfg, "/boot/vmlinuz-1", "", &mut idx).unwrap(),
            Some(0)
        );
        idx += 1;
        assert_eq!(
            find_entry(&cfg, "/boot/vmlinuz-1", "", &mut idx).unwrap(),
            Some(2)
        );
    }

    #[test]
    fn test_entry_root_device_cascade() {
        let cfg = parse_config(
            "title one\n\tkernel /vmlinuz-1 ro root=/dev/sda1\n",
            &dialect::GRUB,
        );
        assert_eq!(entry_root_device(&cfg.entries[0]), Some("/dev/sda1"));

        let cfg = parse_config(
            "image=/boot/vmlinuz\n\troot=/dev/hda2\n\tappend=\"quiet\"\n",
            &dialect::LILO,
        );
        assert_eq!(entry_root_device(&cfg.entries[0]), Some("/dev/hda2"));

        let cfg = parse_config(
            "image=/boot/vmlinuz\n\tappend=\"quiet root=LABEL=/\"\n",
            &dialect::LILO,
        );
        assert_eq!(entry_root_device(&cfg.entries[0]), Some("LABEL=/"));
    }

    #[test]
    fn test_suitable_image_bad_image_okay() {
        let cfg = parse_config("title one\n\tkernel /no/such/file ro\n", &dialect::GRUB);
        assert!(suitable_image(&cfg.entries[0], "", false, true));
        assert!(!suitable_image(&cfg.entries[0], "", false, false));
    }

    #[test]
    fn test_suitable_image_requires_kernel_line() {
        let cfg = parse_config("other=/dev/hda3\n\tlabel=dos\n", &dialect::LILO);
        assert!(!suitable_image(&cfg.entries[0], "", false, true));
    }

    #[test]
    fn test_find_template_prefers_default() {
        let cfg = grub_config();
        // every image is "suitable" under bad_image_okay
        assert_eq!(find_template(&cfg, "", false, true), Some((1, 1)));
    }

    #[test]
    fn test_find_template_adjusts_for_removed() {
        let mut cfg = grub_config();
        cfg.entries[0].marked_removed = true;
        cfg.entries[1].marked_removed = true;
        cfg.default_image = DefaultImage::Unset;
        // skip_removed: only entry 2 qualifies, and it renumbers to 0
        let (entry, adjusted) = find_template(&cfg, "", true, true).unwrap();
        assert_eq!(entry, 2);
        assert_eq!(adjusted, 0);
    }
}
