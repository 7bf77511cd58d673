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

//! Checks whether lilo or grub is actually installed in the boot sector
//! of the configured device, walking MD-RAID members where needed. The
//! devices are opened read-only; the compared code segment does not race
//! with installation activity.

use anyhow::{bail, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::dialect::{self, LineKind};
use crate::errors::GrubbyError;
use crate::model::Config;
use crate::parse::read_config_file;

const BOOT_SECTOR_SIZE: usize = 512;
/// Code segment compared between the reference loader and the sector.
const CODE_SEG_SIZE: usize = 128;

const LILO_REFERENCE: &str = "/boot/boot.b";
const GRUB_STAGE1: &str = "/boot/grub/stage1";
const SYSCONFIG_GRUB: &str = "/etc/sysconfig/grub";
const PROC_MDSTAT: &str = "/proc/mdstat";

fn read_sector(path: &Path) -> Result<[u8; BOOT_SECTOR_SIZE]> {
    let mut buf = [0u8; BOOT_SECTOR_SIZE];
    let mut f = File::open(path).map_err(|source| GrubbyError::ProbeIoFailed {
        device: path.to_path_buf(),
        source,
    })?;
    f.read_exact(&mut buf)
        .map_err(|source| GrubbyError::ProbeIoFailed {
            device: path.to_path_buf(),
            source,
        })?;
    Ok(buf)
}

/// Decodes the displacement of the initial x86 jump, which may be
/// preceded by one extra byte. Forms: `eb XX`, `e8 XX XX`, `e9 XX XX`.
fn jump_offset(boot: &[u8]) -> Option<usize> {
    if boot.len() < 4 {
        return None;
    }
    if boot[1] == 0xeb {
        Some(boot[2] as usize + 2)
    } else if boot[1] == 0xe8 || boot[1] == 0xe9 {
        Some(((boot[3] as usize) << 8) + boot[2] as usize + 2)
    } else if boot[0] == 0xeb {
        Some(boot[1] as usize + 2)
    } else if boot[0] == 0xe8 || boot[0] == 0xe9 {
        Some(((boot[2] as usize) << 8) + boot[1] as usize + 2)
    } else {
        None
    }
}

/// Compares a device's boot sector against a 512-byte reference loader
/// image: the first three bytes and the code segment at the decoded jump
/// target must match.
pub fn check_device_bootloader(device: &Path, boot: &[u8]) -> Result<bool> {
    let sector = read_sector(device)?;

    if boot[..3] != sector[..3] {
        return Ok(false);
    }
    let offset = match jump_offset(boot) {
        Some(o) => o,
        None => return Ok(false),
    };
    if offset + CODE_SEG_SIZE > BOOT_SECTOR_SIZE {
        return Ok(false);
    }
    Ok(boot[offset..offset + CODE_SEG_SIZE] == sector[offset..offset + CODE_SEG_SIZE])
}

/// The raw member devices of an md array, from /proc/mdstat contents:
/// `md0 : active raid1 sdb1[1] sda1[0]` yields /dev/sdb and /dev/sda
/// (partition numbers stripped).
fn mdstat_members(mdstat: &str, md_name: &str) -> Option<Vec<String>> {
    lazy_static! {
        // device name with the partition number stripped, e.g. sda1[0]
        static ref MEMBER: Regex = Regex::new(r"^(.*?)\d*\[\d+\]").unwrap();
    }
    for line in mdstat.lines() {
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some(md_name) {
            continue;
        }
        // ": active <level> member0[N] member1[N] ..."
        let members = tokens
            .skip(3)
            .filter_map(|tok| MEMBER.captures(tok))
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .filter(|name| !name.is_empty())
            .map(|name| format!("/dev/{}", name))
            .collect();
        return Some(members);
    }
    None
}

/// Checks every raw device backing an md array; the loader counts as
/// installed if any member carries it.
fn check_lilo_on_raid(md_dev: &str, boot: &[u8]) -> Result<bool> {
    let md_name = md_dev.strip_prefix("/dev/").unwrap_or(md_dev);
    let mdstat =
        std::fs::read_to_string(PROC_MDSTAT).map_err(|source| GrubbyError::ProbeIoFailed {
            device: PROC_MDSTAT.into(),
            source,
        })?;

    let members = match mdstat_members(&mdstat, md_name) {
        Some(m) => m,
        None => {
            eprintln!("grubby: raid device /dev/{} not found in /proc/mdstat", md_name);
            return Ok(false);
        }
    };
    for member in members {
        if check_device_bootloader(Path::new(&member), boot)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Checks the `boot=` device from lilo.conf against /boot/boot.b.
pub fn check_for_lilo(config: &Config) -> Result<bool> {
    let line = config
        .header_lines
        .iter()
        .find(|l| l.kind == LineKind::Boot);
    let line = match line {
        Some(l) => l,
        None => bail!("no boot line found in lilo configuration"),
    };
    if line.elements.len() != 2 {
        bail!("malformed boot line in lilo configuration");
    }
    let device = &line.elements[1].token;

    let boot = read_sector(Path::new(LILO_REFERENCE))?;
    if device.starts_with("/dev/md") {
        check_lilo_on_raid(device, &boot)
    } else {
        check_device_bootloader(Path::new(device), &boot)
    }
}

/// `/etc/sysconfig/grub`: `key=value` lines, `#` comments, whitespace
/// tolerant. Only `forcelba` and `boot` are recognized.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SysconfigGrub {
    pub force_lba: bool,
    pub boot: Option<String>,
}

pub fn parse_sysconfig_grub() -> Option<SysconfigGrub> {
    parse_sysconfig_from(Path::new(SYSCONFIG_GRUB))
}

fn parse_sysconfig_from(path: &Path) -> Option<SysconfigGrub> {
    let contents = std::fs::read_to_string(path).ok()?;
    let mut sysconfig = SysconfigGrub::default();
    for line in contents.lines() {
        let line = line.trim_start();
        if line.starts_with('#') {
            continue;
        }
        let (key, rest) = match line.split_once('=') {
            Some(kv) => kv,
            None => continue,
        };
        let key = key.trim_end();
        let mut value = rest.trim_start();
        if let Some(stripped) = value.strip_prefix('=') {
            value = stripped.trim_start();
        }
        let value = value.split_whitespace().next().unwrap_or("");

        if key == "forcelba" && value == "1" {
            sysconfig.force_lba = true;
        } else if key == "boot" {
            sysconfig.boot = Some(value.to_string());
        }
    }
    Some(sysconfig)
}

/// Checks the sysconfig `boot=` device against /boot/grub/stage1.
pub fn check_for_grub() -> Result<bool> {
    let boot = match parse_sysconfig_grub().and_then(|s| s.boot) {
        Some(b) => b,
        // assume grub is not installed; not an error condition
        None => return Ok(false),
    };
    if !Path::new(GRUB_STAGE1).exists() {
        // this doesn't exist if grub hasn't been installed
        return Ok(false);
    }
    let stage1 = read_sector(Path::new(GRUB_STAGE1))?;
    check_device_bootloader(Path::new(&boot), &stage1)
}

/// The full `--bootloader-probe` pass: consult each bootloader's config
/// if present, then look at the boot sector. Returns the names of the
/// loaders found installed, in output order.
pub fn bootloader_probe() -> Result<Vec<&'static str>> {
    let mut found = Vec::new();

    let grub_installed = if Path::new(dialect::GRUB.default_config_path).exists() {
        read_config_file(dialect::GRUB.default_config_path, &dialect::GRUB)?;
        check_for_grub()?
    } else {
        false
    };

    let lilo_installed = if Path::new(dialect::LILO.default_config_path).exists() {
        let config = read_config_file(dialect::LILO.default_config_path, &dialect::LILO)?;
        check_for_lilo(&config)?
    } else {
        false
    };

    if lilo_installed {
        found.push("lilo");
    }
    if grub_installed {
        found.push("grub");
    }
    Ok(found)
}
