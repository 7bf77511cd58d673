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

//! Typed errors carried inside `anyhow::Error` so that callers (and
//! tests) can distinguish failure classes with `downcast`/`is`.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum GrubbyError {
    #[error("error reading {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {what}: {reason}")]
    ParseRejected { what: String, reason: String },
    #[error("entry not found: {selector}")]
    NoSuchEntry { selector: String },
    #[error("unable to find a suitable template")]
    TemplateUnavailable,
    #[error("{flag_a} may not be used with {flag_b}")]
    ConflictingFlags {
        flag_a: &'static str,
        flag_b: &'static str,
    },
    #[error("cannot specify multiple bootloaders")]
    ConflictingDialects,
    #[error("error writing {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("error reading {device}: {source}")]
    ProbeIoFailed {
        device: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("doing this would leave no kernel entries; not writing out new config")]
    WouldLeaveEmpty,
}
