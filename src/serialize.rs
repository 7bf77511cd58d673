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

//! Serializer: emits the model back to bytes, staging through a sibling
//! temp file that is renamed over the target so readers never see a
//! partial config.

use anyhow::Result;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::dialect::{DefaultKind, LineKind};
use crate::errors::GrubbyError;
use crate::model::{Config, DefaultImage, Line};

/// Writes the config to `path`, or to stdout when `path` is `"-"`.
pub fn write_config(config: &Config, path: &str) -> Result<()> {
    if path == "-" {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        return emit(config, &mut out).map_err(|source| {
            GrubbyError::WriteFailed {
                path: "-".into(),
                source,
            }
            .into()
        });
    }

    let target = resolve_symlinks(Path::new(path))?;
    let tmp = PathBuf::from(format!("{}-", target.display()));

    let write_failed = |source| GrubbyError::WriteFailed {
        path: target.clone(),
        source,
    };

    let mut out = match fs::File::create(&tmp) {
        Ok(f) => f,
        Err(source) => return Err(write_failed(source).into()),
    };

    // carry the mode bits over from the file we're replacing
    if let Ok(meta) = fs::metadata(&target) {
        let perms = fs::Permissions::from_mode(meta.permissions().mode() & 0o7777);
        if let Err(source) = fs::set_permissions(&tmp, perms) {
            let _ = fs::remove_file(&tmp);
            return Err(write_failed(source).into());
        }
    }

    if let Err(source) = emit(config, &mut out).and_then(|_| out.flush()) {
        drop(out);
        let _ = fs::remove_file(&tmp);
        return Err(write_failed(source).into());
    }
    drop(out);

    if let Err(source) = fs::rename(&tmp, &target) {
        let _ = fs::remove_file(&tmp);
        return Err(write_failed(source).into());
    }
    Ok(())
}

/// Follows a chain of symlinks so that a config reached through a link
/// is rewritten in place, preserving the link itself.
fn resolve_symlinks(path: &Path) -> Result<PathBuf> {
    let mut current = path.to_path_buf();
    for _ in 0..32 {
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let dest = fs::read_link(&current).map_err(|source| GrubbyError::WriteFailed {
                    path: current.clone(),
                    source,
                })?;
                current = if dest.is_absolute() {
                    dest
                } else {
                    current.parent().unwrap_or(Path::new("/")).join(dest)
                };
            }
            _ => return Ok(current),
        }
    }
    Err(GrubbyError::WriteFailed {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::Other, "too many levels of symbolic links"),
    }
    .into())
}

/// Renders the config to a string; handy for tests and round-trip checks.
pub fn config_to_string(config: &Config) -> String {
    let mut buf = Vec::new();
    // writing to a Vec cannot fail
    emit(config, &mut buf).expect("in-memory write");
    String::from_utf8(buf).expect("config is valid UTF-8")
}

fn emit(config: &Config, out: &mut impl Write) -> std::io::Result<()> {
    let mut needs_default = true;

    for line in &config.header_lines {
        match line.kind {
            LineKind::Default => {
                write_default(config, &line.indent, &line.elements[0].trailing, out)?;
                needs_default = false;
            }
            LineKind::Fallback => {
                if let Some(f) = config.fallback_image {
                    write!(
                        out,
                        "{}{}{}{}",
                        line.indent, line.elements[0].token, line.elements[0].trailing, f
                    )?;
                    writeln!(out)?;
                }
            }
            _ => write_line(config, line, out)?,
        }
    }

    if needs_default {
        write_default(config, &config.primary_indent, "=", out)?;
    }

    for entry in config.entries.iter().filter(|e| !e.marked_removed) {
        for line in &entry.lines {
            write_line(config, line, out)?;
        }
    }
    Ok(())
}

fn write_default(
    config: &Config,
    indent: &str,
    separator: &str,
    out: &mut impl Write,
) -> std::io::Result<()> {
    match config.default_image {
        DefaultImage::Unset => Ok(()),
        DefaultImage::At(0) if config.no_explicit_default => Ok(()),
        DefaultImage::Saved => writeln!(out, "{}default{}saved", indent, separator),
        DefaultImage::At(image) => match config.dialect.default_representation {
            DefaultKind::Index => writeln!(out, "{}default{}{}", indent, separator, image),
            DefaultKind::ByTitle => {
                let entry = config
                    .entries
                    .iter()
                    .filter(|e| !e.marked_removed)
                    .nth(image);
                if let Some(title) = entry.and_then(|e| e.title(config.dialect)) {
                    writeln!(out, "{}default{}{}", indent, separator, title)?;
                }
                Ok(())
            }
        },
    }
}

fn write_line(config: &Config, line: &Line, out: &mut impl Write) -> std::io::Result<()> {
    let quoted = line.kind == LineKind::KernelArgs && config.dialect.args_in_quotes;

    out.write_all(line.indent.as_bytes())?;
    for (i, el) in line.elements.iter().enumerate() {
        if i == 1 && quoted {
            out.write_all(b"\"")?;
        }
        out.write_all(el.token.as_bytes())?;
        out.write_all(el.trailing.as_bytes())?;
    }
    if quoted {
        out.write_all(b"\"")?;
    }
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect;
    use crate::model::DefaultImage;
    use crate::parse::parse_config;
    use std::os::unix::fs::symlink;

    fn round_trip(input: &str, dialect: &'static dialect::Dialect) -> String {
        config_to_string(&parse_config(input, dialect))
    }

    #[test]
    fn test_round_trip_grub() {
        let input = "#boot=/dev/hda\ndefault=0\ntimeout=5\n\ntitle Fedora (2.6.9)\n\troot (hd0,0)\n\tkernel /vmlinuz-2.6.9 ro root=/dev/sda1\n\tinitrd /initrd-2.6.9.img\n";
        assert_eq!(round_trip(input, &dialect::GRUB), input);
    }

    #[test]
    fn test_round_trip_lilo_quotes() {
        // leading/trailing spaces inside the quotes survive
        let input = "boot=/dev/hda\nimage=/boot/vmlinuz\n\tlabel=linux\n\tappend=\" root=LABEL=/ quiet \"\n";
        assert_eq!(round_trip(input, &dialect::LILO), input);
    }

    #[test]
    fn test_round_trip_zipl() {
        let input = "[defaultboot]\ndefault=linux\n[linux]\nimage=/boot/vmlinuz\nparameters=\"root=/dev/dasda1\"\n";
        assert_eq!(round_trip(input, &dialect::ZIPL), input);
    }

    #[test]
    fn test_round_trip_spaced_separators() {
        let input = "timeout = 50\nimage = /boot/vmlinuz\n\tlabel = linux\n";
        assert_eq!(round_trip(input, &dialect::LILO), input);
    }

    #[test]
    fn test_round_trip_adds_final_newline() {
        let input = "default=0\ntitle a\n\tkernel /v";
        let expected = "default=0\ntitle a\n\tkernel /v\n";
        assert_eq!(round_trip(input, &dialect::GRUB), expected);
    }

    #[test]
    fn test_no_default_line_not_synthesized_for_entry_zero() {
        let input = "timeout=5\ntitle a\n\tkernel /v\n";
        assert_eq!(round_trip(input, &dialect::GRUB), input);
    }

    #[test]
    fn test_default_synthesized_when_changed() {
        let mut cfg = parse_config("timeout=5\ntitle a\n\tkernel /v1\ntitle b\n\tkernel /v2\n", &dialect::GRUB);
        cfg.default_image = DefaultImage::At(1);
        let out = config_to_string(&cfg);
        assert_eq!(out, "timeout=5\ndefault=1\ntitle a\n\tkernel /v1\ntitle b\n\tkernel /v2\n");
    }

    #[test]
    fn test_default_by_title_renumbered_on_removal() {
        let mut cfg = parse_config(
            "default=second\nimage=/boot/v1\n\tlabel=first\nimage=/boot/v2\n\tlabel=second\n",
            &dialect::LILO,
        );
        cfg.entries[0].marked_removed = true;
        crate::mutate::set_default_image(&mut cfg, false, None, false, "", true).unwrap();
        let out = config_to_string(&cfg);
        assert_eq!(out, "default=second\nimage=/boot/v2\n\tlabel=second\n");
    }

    #[test]
    fn test_saved_default_round_trip() {
        let input = "default=saved\ntitle a\n\tkernel /v\n";
        assert_eq!(round_trip(input, &dialect::GRUB), input);
    }

    #[test]
    fn test_fallback_dropped_when_unresolved() {
        let mut cfg = parse_config(
            "default=0\nfallback=1\ntitle a\n\tkernel /v1\ntitle b\n\tkernel /v2\n",
            &dialect::GRUB,
        );
        crate::mutate::mark_removed_image(&mut cfg, "/v2", "").unwrap();
        crate::mutate::set_fallback_image(&mut cfg, false);
        let out = config_to_string(&cfg);
        assert!(!out.contains("fallback"));
        assert!(!out.contains("/v2"));
    }

    #[test]
    fn test_removed_entries_skipped() {
        let mut cfg = parse_config(
            "default=0\ntitle a\n\tkernel /v1\ntitle b\n\tkernel /v2\n",
            &dialect::GRUB,
        );
        cfg.entries[0].marked_removed = true;
        let out = config_to_string(&cfg);
        assert!(!out.contains("/v1"));
        assert!(out.contains("/v2"));
    }

    #[test]
    fn test_write_config_atomic_and_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grub.conf");
        fs::write(&path, "default=0\ntitle a\n\tkernel /v\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

        let cfg = parse_config(&fs::read_to_string(&path).unwrap(), &dialect::GRUB);
        write_config(&cfg, path.to_str().unwrap()).unwrap();

        let meta = fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o7777, 0o600);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "default=0\ntitle a\n\tkernel /v\n"
        );
        // temp file cleaned up
        assert!(!dir.path().join("grub.conf-").exists());
    }

    #[test]
    fn test_write_config_follows_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("grub.conf");
        let link = dir.path().join("link.conf");
        fs::write(&real, "default=0\ntitle a\n\tkernel /v\n").unwrap();
        symlink("grub.conf", &link).unwrap();

        let cfg = parse_config("default=0\ntitle b\n\tkernel /v2\n", &dialect::GRUB);
        write_config(&cfg, link.to_str().unwrap()).unwrap();

        // the link is intact and the target was rewritten
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(
            fs::read_to_string(&real).unwrap(),
            "default=0\ntitle b\n\tkernel /v2\n"
        );
    }

    #[test]
    fn test_write_config_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.conf");
        let cfg = parse_config("default=0\ntitle a\n\tkernel /v\n", &dialect::GRUB);
        write_config(&cfg, path.to_str().unwrap()).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "default=0\ntitle a\n\tkernel /v\n"
        );
    }
}
