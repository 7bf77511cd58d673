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

//! Static descriptions of each supported bootloader's configuration
//! syntax: keyword tables, delimiters, quoting and title conventions.

/// Classification of a single configuration line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Whitespace,
    Title,
    Kernel,
    Initrd,
    Default,
    Unknown,
    Root,
    Fallback,
    KernelArgs,
    Boot,
    BootRoot,
    Lba,
    MbModule,
    Other,
    Generic,
}

/// How the `default` line identifies an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultKind {
    /// The value is a zero-based index into the entry list.
    Index,
    /// The value is an entry title.
    ByTitle,
}

#[derive(Debug)]
pub struct Keyword {
    pub text: &'static str,
    pub kind: LineKind,
    /// Character placed between key and value when synthesizing a line.
    pub separator: char,
}

#[derive(Debug)]
pub struct Dialect {
    pub name: &'static str,
    pub default_config_path: &'static str,
    pub keywords: &'static [Keyword],
    pub default_representation: DefaultKind,
    pub supports_saved_default: bool,
    /// The line kind whose appearance starts a new entry.
    pub entry_separator_kind: LineKind,
    /// Kernel/initrd paths in the file are relative to the boot partition.
    pub needs_boot_prefix: bool,
    /// Kernel-argument values are quoted on write, stripped on read.
    pub args_in_quotes: bool,
    pub max_title_length: Option<usize>,
    /// Titles appear as a single `[text]` token (zipl).
    pub titles_bracketed: bool,
}

const fn kw(text: &'static str, kind: LineKind, separator: char) -> Keyword {
    Keyword {
        text,
        kind,
        separator,
    }
}

const GRUB_KEYWORDS: &[Keyword] = &[
    kw("title", LineKind::Title, ' '),
    kw("root", LineKind::BootRoot, ' '),
    kw("default", LineKind::Default, ' '),
    kw("fallback", LineKind::Fallback, ' '),
    kw("kernel", LineKind::Kernel, ' '),
    kw("initrd", LineKind::Initrd, ' '),
    kw("module", LineKind::MbModule, ' '),
];

const LILO_KEYWORDS: &[Keyword] = &[
    kw("label", LineKind::Title, '='),
    kw("root", LineKind::Root, '='),
    kw("default", LineKind::Default, '='),
    kw("image", LineKind::Kernel, '='),
    kw("other", LineKind::Other, '='),
    kw("initrd", LineKind::Initrd, '='),
    kw("append", LineKind::KernelArgs, '='),
    kw("boot", LineKind::Boot, '='),
    kw("lba", LineKind::Lba, ' '),
];

// yaboot recognizes a pile of global options; they're classified Generic
// so the assembler can migrate them to the file header.
const YABOOT_KEYWORDS: &[Keyword] = &[
    kw("label", LineKind::Title, '='),
    kw("root", LineKind::Root, '='),
    kw("default", LineKind::Default, '='),
    kw("image", LineKind::Kernel, '='),
    kw("bsd", LineKind::Generic, '='),
    kw("macos", LineKind::Generic, '='),
    kw("macosx", LineKind::Generic, '='),
    kw("magicboot", LineKind::Generic, '='),
    kw("darwin", LineKind::Generic, '='),
    kw("timeout", LineKind::Generic, '='),
    kw("install", LineKind::Generic, '='),
    kw("fstype", LineKind::Generic, '='),
    kw("hfstype", LineKind::Generic, '='),
    kw("delay", LineKind::Generic, '='),
    kw("defaultos", LineKind::Generic, '='),
    kw("init-message", LineKind::Generic, '='),
    kw("enablecdboot", LineKind::Generic, ' '),
    kw("enableofboot", LineKind::Generic, ' '),
    kw("enablenetboot", LineKind::Generic, ' '),
    kw("nonvram", LineKind::Generic, ' '),
    kw("hide", LineKind::Generic, ' '),
    kw("protect", LineKind::Generic, ' '),
    kw("nobless", LineKind::Generic, ' '),
    kw("brokenosx", LineKind::Generic, ' '),
    kw("usemount", LineKind::Generic, ' '),
    kw("mntpoint", LineKind::Generic, '='),
    kw("partition", LineKind::Generic, '='),
    kw("device", LineKind::Generic, '='),
    kw("initrd", LineKind::Initrd, '='),
    kw("append", LineKind::KernelArgs, '='),
    kw("boot", LineKind::Boot, '='),
    kw("lba", LineKind::Lba, ' '),
];

const SILO_KEYWORDS: &[Keyword] = &[
    kw("label", LineKind::Title, '='),
    kw("root", LineKind::Root, '='),
    kw("default", LineKind::Default, '='),
    kw("image", LineKind::Kernel, '='),
    kw("other", LineKind::Other, '='),
    kw("initrd", LineKind::Initrd, '='),
    kw("append", LineKind::KernelArgs, '='),
    kw("boot", LineKind::Boot, '='),
];

const ZIPL_KEYWORDS: &[Keyword] = &[
    kw("target", LineKind::BootRoot, '='),
    kw("image", LineKind::Kernel, '='),
    kw("ramdisk", LineKind::Initrd, '='),
    kw("parameters", LineKind::KernelArgs, '='),
    kw("default", LineKind::Default, '='),
];

pub static GRUB: Dialect = Dialect {
    name: "grub",
    default_config_path: "/boot/grub/grub.conf",
    keywords: GRUB_KEYWORDS,
    default_representation: DefaultKind::Index,
    supports_saved_default: true,
    entry_separator_kind: LineKind::Title,
    needs_boot_prefix: true,
    args_in_quotes: false,
    max_title_length: None,
    titles_bracketed: false,
};

pub static LILO: Dialect = Dialect {
    name: "lilo",
    default_config_path: "/etc/lilo.conf",
    keywords: LILO_KEYWORDS,
    default_representation: DefaultKind::ByTitle,
    supports_saved_default: false,
    entry_separator_kind: LineKind::Kernel,
    needs_boot_prefix: false,
    args_in_quotes: true,
    max_title_length: Some(15),
    titles_bracketed: false,
};

pub static ELILO: Dialect = Dialect {
    name: "elilo",
    default_config_path: "/boot/efi/EFI/redhat/elilo.conf",
    keywords: LILO_KEYWORDS,
    default_representation: DefaultKind::ByTitle,
    supports_saved_default: false,
    entry_separator_kind: LineKind::Kernel,
    needs_boot_prefix: true,
    args_in_quotes: true,
    max_title_length: None,
    titles_bracketed: false,
};

pub static YABOOT: Dialect = Dialect {
    name: "yaboot",
    default_config_path: "/etc/yaboot.conf",
    keywords: YABOOT_KEYWORDS,
    default_representation: DefaultKind::ByTitle,
    supports_saved_default: false,
    entry_separator_kind: LineKind::Kernel,
    needs_boot_prefix: true,
    args_in_quotes: true,
    max_title_length: Some(15),
    titles_bracketed: false,
};

pub static SILO: Dialect = Dialect {
    name: "silo",
    default_config_path: "/etc/silo.conf",
    keywords: SILO_KEYWORDS,
    default_representation: DefaultKind::ByTitle,
    supports_saved_default: false,
    entry_separator_kind: LineKind::Kernel,
    needs_boot_prefix: true,
    args_in_quotes: true,
    max_title_length: Some(15),
    titles_bracketed: false,
};

pub static ZIPL: Dialect = Dialect {
    name: "zipl",
    default_config_path: "/etc/zipl.conf",
    keywords: ZIPL_KEYWORDS,
    default_representation: DefaultKind::ByTitle,
    supports_saved_default: false,
    entry_separator_kind: LineKind::Title,
    needs_boot_prefix: false,
    args_in_quotes: true,
    max_title_length: Some(15),
    titles_bracketed: true,
};

impl Dialect {
    pub fn kind_of(&self, token: &str) -> Option<LineKind> {
        self.keywords
            .iter()
            .find(|k| k.text == token)
            .map(|k| k.kind)
    }

    pub fn keyword_for(&self, kind: LineKind) -> Option<&'static Keyword> {
        self.keywords.iter().find(|k| k.kind == kind)
    }

    pub fn has_keyword(&self, kind: LineKind) -> bool {
        self.keyword_for(kind).is_some()
    }
}

/// The dialect assumed when no selector flag is given.
pub fn platform_default() -> &'static Dialect {
    if cfg!(any(target_arch = "powerpc", target_arch = "powerpc64")) {
        &YABOOT
    } else if cfg!(target_arch = "sparc64") {
        &SILO
    } else if cfg!(any(target_arch = "s390x")) {
        &ZIPL
    } else {
        &GRUB
    }
}
