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

//! `--info` and `--default-kernel` output.

use anyhow::Result;

use crate::dialect::LineKind;
use crate::errors::GrubbyError;
use crate::locate::{find_entry, suitable_image};
use crate::model::{strip_root_specifier, Config, DefaultImage, Entry};
use crate::probe::parse_sysconfig_grub;

/// Prints the default entry's kernel path, prefixed with the boot
/// filesystem. An unresolvable or unsuitable default is an error.
pub fn display_default(config: &Config, prefix: &str, bad_image_okay: bool) -> Result<()> {
    let entry = match config.default_image {
        DefaultImage::At(d) => config.entries.get(d),
        _ => None,
    };
    let entry = entry
        .filter(|e| suitable_image(e, prefix, false, bad_image_okay))
        .ok_or(GrubbyError::NoSuchEntry {
            selector: "DEFAULT".to_string(),
        })?;
    let line = entry
        .line_of_kind(LineKind::Kernel)
        .ok_or(GrubbyError::NoSuchEntry {
            selector: "DEFAULT".to_string(),
        })?;
    println!(
        "{}{}",
        prefix,
        strip_root_specifier(&line.elements[1].token)
    );
    Ok(())
}

/// Prints `index=`, `kernel=`, `args="…"`, `root=`, `initrd=` for every
/// entry the selector matches, preceded by the boot device information.
pub fn display_info(config: &Config, key: &str, prefix: &str) -> Result<()> {
    let mut index = 0;
    let first = find_entry(config, key, prefix, &mut index)?.ok_or_else(|| {
        GrubbyError::NoSuchEntry {
            selector: key.to_string(),
        }
    })?;

    if config.dialect.name == "grub" {
        // grub keeps the boot device in /etc/sysconfig/grub
        if let Some(sysconfig) = parse_sysconfig_grub() {
            if sysconfig.force_lba {
                println!("lba");
            }
            if let Some(boot) = sysconfig.boot {
                println!("boot={}", boot);
            }
        }
    } else {
        if let Some(line) = config
            .header_lines
            .iter()
            .find(|l| l.kind == LineKind::Boot)
        {
            if line.elements.len() >= 2 {
                println!("boot={}", line.elements[1].token);
            }
        }
        if config
            .header_lines
            .iter()
            .any(|l| l.kind == LineKind::Lba)
        {
            println!("lba");
        }
    }

    print!("{}", entry_info(&config.entries[first], prefix, first));
    index += 1;
    while let Some(i) = find_entry(config, key, prefix, &mut index)? {
        print!("{}", entry_info(&config.entries[i], prefix, i));
        index += 1;
    }
    Ok(())
}

/// Renders one entry's info block, preserving the argument spacing from
/// the config file.
pub fn entry_info(entry: &Entry, prefix: &str, index: usize) -> String {
    let mut out = String::new();
    let kernel = match entry.line_of_kind(LineKind::Kernel) {
        Some(l) if l.elements.len() >= 2 => l,
        _ => return out,
    };

    out.push_str(&format!("index={}\n", index));
    out.push_str(&format!("kernel={}\n", kernel.elements[1].token));

    let mut root: Option<&str> = None;
    if kernel.elements.len() >= 3 {
        out.push_str("args=\"");
        for el in &kernel.elements[2..] {
            if let Some(dev) = el.token.strip_prefix("root=") {
                root = Some(dev);
            } else {
                out.push_str(&el.token);
                out.push_str(&el.trailing);
            }
        }
        out.push_str("\"\n");
    } else if let Some(args) = entry.line_of_kind(LineKind::KernelArgs) {
        out.push_str("args=\"");
        for el in &args.elements[1..] {
            if let Some(dev) = el.token.strip_prefix("root=") {
                root = Some(dev);
            } else {
                out.push_str(&el.token);
                out.push_str(&el.trailing);
            }
        }
        out.push_str("\"\n");
    }

    if root.is_none() {
        if let Some(line) = entry.line_of_kind(LineKind::Root) {
            if line.elements.len() >= 2 {
                root = Some(&line.elements[1].token);
            }
        }
    }
    if let Some(root) = root {
        // make sure the root doesn't have a trailing quote
        out.push_str(&format!("root={}\n", root.trim_end_matches('"')));
    }

    if let Some(line) = entry.line_of_kind(LineKind::Initrd) {
        if line.elements.len() >= 2 {
            out.push_str(&format!("initrd={}", prefix));
            for el in &line.elements[1..] {
                out.push_str(&el.token);
                out.push_str(&el.trailing);
            }
            out.push('\n');
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect;
    use crate::parse::parse_config;

    #[test]
    fn test_entry_info_grub() {
        let cfg = parse_config(
            "title Fedora\n\troot (hd0,0)\n\tkernel /vmlinuz-1 ro root=/dev/sda1 quiet\n\tinitrd /initrd-1\n",
            &dialect::GRUB,
        );
        let info = entry_info(&cfg.entries[0], "/boot", 0);
        assert_eq!(
            info,
            "index=0\nkernel=/vmlinuz-1\nargs=\"ro quiet\"\nroot=/dev/sda1\ninitrd=/boot/initrd-1\n"
        );
    }

    #[test]
    fn test_entry_info_lilo_append_line() {
        let cfg = parse_config(
            "image=/boot/vmlinuz\n\tlabel=linux\n\troot=/dev/hda1\n\tappend=\"quiet splash\"\n",
            &dialect::LILO,
        );
        let info = entry_info(&cfg.entries[0], "", 0);
        assert_eq!(
            info,
            "index=0\nkernel=/boot/vmlinuz\nargs=\"quiet splash\"\nroot=/dev/hda1\n"
        );
    }

    #[test]
    fn test_entry_info_root_from_args() {
        let cfg = parse_config(
            "image=/boot/vmlinuz\n\tlabel=linux\n\tappend=\"root=LABEL=/ quiet\"\n",
            &dialect::LILO,
        );
        let info = entry_info(&cfg.entries[0], "", 0);
        assert!(info.contains("root=LABEL=/\n"));
        assert!(info.contains("args=\"quiet\"\n"));
    }

    #[test]
    fn test_entry_info_no_kernel_line() {
        let cfg = parse_config("other=/dev/hda3\n\tlabel=dos\n", &dialect::LILO);
        assert_eq!(entry_info(&cfg.entries[0], "", 0), "");
    }
}
