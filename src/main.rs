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

use anyhow::{anyhow, Result};
use clap::Parser;
use nix::sys::stat::stat;
use std::path::Path;
use std::process;

use libgrubby::cmdline::Options;
use libgrubby::display::{display_default, display_info};
use libgrubby::errors::GrubbyError;
use libgrubby::locate::{find_entry, find_template};
use libgrubby::model::Entry;
use libgrubby::mutate::{
    add_new_kernel, mark_removed_image, set_default_image, set_fallback_image, update_image,
};
use libgrubby::parse::read_config_file;
use libgrubby::probe::bootloader_probe;
use libgrubby::serialize::write_config;

fn main() {
    let mut options = Options::parse();
    if let Err(e) = run(&mut options) {
        eprintln!("grubby: {:#}", e);
        process::exit(1);
    }
}

fn run(options: &mut Options) -> Result<()> {
    options.validate()?;
    let dialect = options.dialect()?;

    if options.bootloader_probe {
        for loader in bootloader_probe()? {
            println!("{}", loader);
        }
        return Ok(());
    }

    let boot_prefix = if dialect.needs_boot_prefix {
        match &options.boot_filesystem {
            Some(prefix) => prefix.trim_end_matches('/').to_string(),
            None => detect_boot_prefix(),
        }
    } else {
        String::new()
    };

    let config_path = options
        .config_file
        .clone()
        .unwrap_or_else(|| dialect.default_config_path.to_string());
    let mut config = read_config_file(&config_path, dialect)?;

    if options.default_kernel {
        return display_default(&config, &boot_prefix, options.bad_image_okay);
    }
    if let Some(key) = &options.info {
        return display_info(&config, key, &boot_prefix);
    }

    let template: Option<Entry> = if options.copy_default {
        let (index, _) = find_template(&config, &boot_prefix, false, options.bad_image_okay)
            .ok_or(GrubbyError::TemplateUnavailable)?;
        Some(config.entries[index].clone())
    } else {
        None
    };

    if let Some(key) = &options.remove_kernel {
        mark_removed_image(&mut config, key, &boot_prefix)?;
    }
    if let Some(key) = &options.remove_multiboot {
        mark_removed_image(&mut config, key, &boot_prefix)?;
    }
    set_default_image(
        &mut config,
        options.add_kernel.is_some(),
        options.set_default.as_deref(),
        options.make_default,
        &boot_prefix,
        options.bad_image_okay,
    )?;
    set_fallback_image(&mut config, options.add_kernel.is_some());

    if let Some(key) = &options.update_kernel {
        let mut index = 0;
        if find_entry(&config, key, &boot_prefix, &mut index)?.is_none() {
            return Err(GrubbyError::NoSuchEntry {
                selector: key.clone(),
            }
            .into());
        }
        update_image(
            &mut config,
            key,
            &boot_prefix,
            options.args.as_deref(),
            options.remove_args.as_deref(),
            options.mbargs.as_deref(),
            options.remove_mbargs.as_deref(),
        )?;
    }

    if let Some(path) = &options.add_kernel {
        let title = options
            .title
            .as_deref()
            .ok_or_else(|| anyhow!("kernel title must be specified"))?;
        add_new_kernel(
            &mut config,
            template.as_ref(),
            &boot_prefix,
            path,
            title,
            options.args.as_deref(),
            options.initrd.as_deref(),
            options.add_multiboot.as_deref(),
            options.mbargs.as_deref(),
        )?;
    }

    if config.live_entries() == 0 {
        return Err(GrubbyError::WouldLeaveEmpty.into());
    }

    let output_path = options.output_file.clone().unwrap_or(config_path);
    write_config(&config, &output_path)
}

/// When /boot lives on its own filesystem, paths in the config are
/// relative to it and need the prefix for filesystem checks.
fn detect_boot_prefix() -> String {
    let root = stat(Path::new("/"));
    let boot = stat(Path::new("/boot"));
    match (root, boot) {
        (Ok(r), Ok(b)) if r.st_dev != b.st_dev => "/boot".to_string(),
        _ => String::new(),
    }
}
