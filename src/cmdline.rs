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

//! Command-line surface and the cross-flag validation matrix.

use anyhow::{bail, Result};
use clap::{AppSettings, Parser};

use crate::dialect::{self, Dialect};
use crate::errors::GrubbyError;

// Args are listed in --help in the order declared in this struct.
// Please keep the entire help text to 80 columns.

#[derive(Debug, Parser)]
#[clap(name = "grubby", version)]
#[clap(global_setting(AppSettings::DeriveDisplayOrder))]
pub struct Options {
    /// add an entry for the specified kernel
    #[clap(long, value_name = "kernel-path")]
    pub add_kernel: Option<String>,
    /// add an entry for the specified multiboot kernel
    #[clap(long, value_name = "mb-kernel-path")]
    pub add_multiboot: Option<String>,
    /// default arguments for the new kernel or new arguments for
    /// kernel being updated
    #[clap(long, value_name = "args")]
    pub args: Option<String>,
    /// default arguments for the new multiboot kernel or new arguments
    /// for multiboot kernel being updated
    #[clap(long, value_name = "args")]
    pub mbargs: Option<String>,
    /// don't sanity check images in boot entries (for testing only)
    #[clap(long)]
    pub bad_image_okay: bool,
    /// filesystem which contains /boot directory (for testing only)
    #[clap(long, value_name = "bootfs")]
    pub boot_filesystem: Option<String>,
    /// check which bootloader is installed in the boot sector
    #[clap(long)]
    pub bootloader_probe: bool,
    /// path to bootloader config file to update ("-" for stdin)
    #[clap(short = 'c', long, value_name = "path")]
    pub config_file: Option<String>,
    /// use the default boot entry as a template for the new entry
    /// being added; if the default is not a linux image, or if the
    /// kernel referenced by the default image does not exist, the
    /// first linux entry whose kernel does exist is used as the
    /// template
    #[clap(long)]
    pub copy_default: bool,
    /// display the path of the default kernel
    #[clap(long)]
    pub default_kernel: bool,
    /// configure elilo bootloader
    #[clap(long)]
    pub elilo: bool,
    /// configure grub bootloader
    #[clap(long)]
    pub grub: bool,
    /// display boot information for specified kernel
    #[clap(long, value_name = "kernel-path")]
    pub info: Option<String>,
    /// initrd image for the new kernel
    #[clap(long, value_name = "initrd-path")]
    pub initrd: Option<String>,
    /// configure lilo bootloader
    #[clap(long)]
    pub lilo: bool,
    /// make the newly added entry the default boot entry
    #[clap(long)]
    pub make_default: bool,
    /// path to output updated config file ("-" for stdout)
    #[clap(short = 'o', long, value_name = "path")]
    pub output_file: Option<String>,
    /// remove kernel arguments
    #[clap(long, value_name = "args")]
    pub remove_args: Option<String>,
    /// remove multiboot kernel arguments
    #[clap(long, value_name = "args")]
    pub remove_mbargs: Option<String>,
    /// remove all entries for the specified kernel
    #[clap(long, value_name = "kernel-path")]
    pub remove_kernel: Option<String>,
    /// remove all entries for the specified multiboot kernel
    #[clap(long, value_name = "mb-kernel-path")]
    pub remove_multiboot: Option<String>,
    /// make the first entry referencing the specified kernel the default
    #[clap(long, value_name = "kernel-path")]
    pub set_default: Option<String>,
    /// configure silo bootloader
    #[clap(long)]
    pub silo: bool,
    /// title to use for the new kernel entry
    #[clap(long, value_name = "entry-title")]
    pub title: Option<String>,
    /// updated information for the specified kernel
    #[clap(long, value_name = "kernel-path")]
    pub update_kernel: Option<String>,
    /// configure yaboot bootloader
    #[clap(long)]
    pub yaboot: bool,
    /// configure zipl bootloader
    #[clap(long)]
    pub zipl: bool,
}

impl Options {
    /// The dialect selected by flag, or the platform default.
    pub fn dialect(&self) -> Result<&'static Dialect> {
        let selected: Vec<&'static Dialect> = [
            (self.grub, &dialect::GRUB),
            (self.lilo, &dialect::LILO),
            (self.elilo, &dialect::ELILO),
            (self.yaboot, &dialect::YABOOT),
            (self.silo, &dialect::SILO),
            (self.zipl, &dialect::ZIPL),
        ]
        .into_iter()
        .filter(|(flag, _)| *flag)
        .map(|(_, d)| d)
        .collect();

        match selected.len() {
            0 => Ok(dialect::platform_default()),
            1 => Ok(selected[0]),
            _ => Err(GrubbyError::ConflictingDialects.into()),
        }
    }

    /// Enforces the flag-combination rules before any file is read, and
    /// applies the one silent rewrite (`--set-default` of the kernel
    /// being added becomes `--make-default`).
    pub fn validate(&mut self) -> Result<()> {
        self.dialect()?;

        if self.bootloader_probe {
            let conflicts = [
                ("--default-kernel", self.default_kernel),
                ("--info", self.info.is_some()),
                ("--add-kernel", self.add_kernel.is_some()),
                ("--remove-kernel", self.remove_kernel.is_some()),
                ("--remove-multiboot", self.remove_multiboot.is_some()),
                ("--update-kernel", self.update_kernel.is_some()),
                ("--make-default", self.make_default),
                ("--set-default", self.set_default.is_some()),
                ("--config-file", self.config_file.is_some()),
            ];
            for (flag, given) in conflicts {
                if given {
                    return Err(GrubbyError::ConflictingFlags {
                        flag_a: "--bootloader-probe",
                        flag_b: flag,
                    }
                    .into());
                }
            }
        }

        if self.default_kernel || self.info.is_some() {
            let flag_a = if self.default_kernel {
                "--default-kernel"
            } else {
                "--info"
            };
            let conflicts = [
                ("--add-kernel", self.add_kernel.is_some()),
                ("--remove-kernel", self.remove_kernel.is_some()),
                ("--update-kernel", self.update_kernel.is_some()),
            ];
            for (flag_b, given) in conflicts {
                if given {
                    return Err(GrubbyError::ConflictingFlags { flag_a, flag_b }.into());
                }
            }
        }

        if self.add_kernel.is_some() {
            if self.title.is_none() {
                bail!("kernel title must be specified");
            }
        } else if self.title.is_some()
            || self.initrd.is_some()
            || self.copy_default
            || self.make_default
        {
            bail!("kernel path expected");
        }

        if self.add_kernel.is_some() && self.update_kernel.is_some() {
            return Err(GrubbyError::ConflictingFlags {
                flag_a: "--add-kernel",
                flag_b: "--update-kernel",
            }
            .into());
        }

        if self.make_default && self.set_default.is_some() {
            return Err(GrubbyError::ConflictingFlags {
                flag_a: "--make-default",
                flag_b: "--set-default",
            }
            .into());
        }
        if self.set_default.is_some() && self.set_default == self.remove_kernel {
            bail!("cannot make removed kernel the default");
        }
        if self.set_default.is_some() && self.set_default == self.add_kernel {
            self.make_default = true;
            self.set_default = None;
        }

        if self.config_file.as_deref() == Some("-") && self.output_file.is_none() {
            bail!("output file must be specified if stdin is used");
        }

        if self.remove_kernel.is_none()
            && self.add_kernel.is_none()
            && !self.default_kernel
            && self.set_default.is_none()
            && self.info.is_none()
            && !self.bootloader_probe
            && self.update_kernel.is_none()
            && self.remove_multiboot.is_none()
        {
            bail!("no action specified");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Options {
        let mut full = vec!["grubby"];
        full.extend_from_slice(args);
        Options::try_parse_from(full).unwrap()
    }

    fn validate(args: &[&str]) -> Result<Options> {
        let mut opts = parse(args);
        opts.validate()?;
        Ok(opts)
    }

    #[test]
    fn test_single_dialect() {
        let opts = parse(&["--zipl", "--info", "ALL"]);
        assert_eq!(opts.dialect().unwrap().name, "zipl");
    }

    #[test]
    fn test_conflicting_dialects() {
        let err = validate(&["--grub", "--lilo", "--info", "ALL"]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GrubbyError>(),
            Some(GrubbyError::ConflictingDialects)
        ));
    }

    #[test]
    fn test_no_action() {
        let err = validate(&["--grub"]).unwrap_err();
        assert_eq!(err.to_string(), "no action specified");
    }

    #[test]
    fn test_probe_conflicts() {
        let err = validate(&["--bootloader-probe", "--info", "ALL"]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GrubbyError>(),
            Some(GrubbyError::ConflictingFlags { .. })
        ));
        let err = validate(&["--bootloader-probe", "--config-file", "/tmp/x"]).unwrap_err();
        assert!(err.is::<GrubbyError>());
        assert!(validate(&["--bootloader-probe"]).is_ok());
    }

    #[test]
    fn test_info_conflicts_with_mutation() {
        let err = validate(&["--info", "ALL", "--remove-kernel", "/v"]).unwrap_err();
        assert!(err.is::<GrubbyError>());
    }

    #[test]
    fn test_add_kernel_requires_title() {
        let err = validate(&["--add-kernel", "/boot/vmlinuz"]).unwrap_err();
        assert_eq!(err.to_string(), "kernel title must be specified");
        assert!(validate(&["--add-kernel", "/boot/vmlinuz", "--title", "t"]).is_ok());
    }

    #[test]
    fn test_modifiers_require_add_kernel() {
        for args in [
            &["--title", "t"][..],
            &["--initrd", "/boot/initrd"][..],
            &["--copy-default"][..],
            &["--make-default"][..],
        ] {
            let err = validate(args).unwrap_err();
            assert_eq!(err.to_string(), "kernel path expected");
        }
    }

    #[test]
    fn test_add_conflicts_with_update() {
        let err = validate(&[
            "--add-kernel",
            "/v",
            "--title",
            "t",
            "--update-kernel",
            "/v2",
        ])
        .unwrap_err();
        assert!(err.is::<GrubbyError>());
    }

    #[test]
    fn test_make_default_conflicts_with_set_default() {
        let err = validate(&[
            "--add-kernel",
            "/v",
            "--title",
            "t",
            "--make-default",
            "--set-default",
            "/v2",
        ])
        .unwrap_err();
        assert!(err.is::<GrubbyError>());
    }

    #[test]
    fn test_set_default_of_removed_kernel() {
        let err = validate(&["--set-default", "/v", "--remove-kernel", "/v"]).unwrap_err();
        assert_eq!(err.to_string(), "cannot make removed kernel the default");
    }

    #[test]
    fn test_set_default_of_added_kernel_rewritten() {
        let opts =
            validate(&["--add-kernel", "/v", "--title", "t", "--set-default", "/v"]).unwrap();
        assert!(opts.make_default);
        assert!(opts.set_default.is_none());
    }

    #[test]
    fn test_stdin_requires_output_file() {
        let err = validate(&["--remove-kernel", "/v", "--config-file", "-"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "output file must be specified if stdin is used"
        );
        assert!(validate(&[
            "--remove-kernel",
            "/v",
            "--config-file",
            "-",
            "--output-file",
            "-"
        ])
        .is_ok());
    }
}
