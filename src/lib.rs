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

//! Layout-preserving editor for legacy bootloader configuration files
//! (GRUB, LILO, ELILO, YABOOT, SILO, ZIPL), plus a probe that checks
//! whether a bootloader is actually installed in a boot sector.

pub mod cmdline;
pub mod dialect;
pub mod display;
pub mod errors;
pub mod locate;
pub mod model;
pub mod mutate;
pub mod parse;
pub mod probe;
pub mod serialize;
