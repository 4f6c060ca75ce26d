// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian architecture names, wildcards and multi-arch classes.

See <https://wiki.debian.org/Multiarch/Implementation> for how multi-arch
classes affect dependency resolution.
*/

use std::fmt::{Display, Formatter};

/// Split an architecture name into its `(os, cpu)` components.
///
/// Bare names like `amd64` are Linux architectures. The ARM flavors share a CPU so that
/// `any-arm` matches them all.
fn os_cpu(architecture: &str) -> (&str, &str) {
    let (os, cpu) = match architecture.split_once('-') {
        Some((os, cpu)) => (os, cpu),
        None => ("linux", architecture),
    };

    let cpu = match cpu {
        "armel" | "armhf" => "arm",
        cpu => cpu,
    };

    (os, cpu)
}

/// Whether an architecture matches an architecture name or wildcard.
///
/// Wildcards are `any`, `<os>-any` and `any-<cpu>`. Anything else must match exactly.
pub fn architecture_matches(architecture: &str, pattern: &str) -> bool {
    if architecture == pattern || pattern == "any" {
        return true;
    }

    match pattern.split_once('-') {
        Some((os, cpu)) if os == "any" || cpu == "any" => {
            let (arch_os, arch_cpu) = os_cpu(architecture);

            (os == "any" || os == arch_os) && (cpu == "any" || cpu == arch_cpu)
        }
        _ => false,
    }
}

/// The architecture this crate was compiled for, in Debian nomenclature.
///
/// This is the fallback native architecture when none is configured.
pub fn default_native_architecture() -> &'static str {
    if cfg!(target_arch = "x86_64") {
        "amd64"
    } else if cfg!(target_arch = "x86") {
        "i386"
    } else if cfg!(target_arch = "aarch64") {
        "arm64"
    } else if cfg!(target_arch = "arm") {
        "armhf"
    } else if cfg!(all(target_arch = "powerpc64", target_endian = "little")) {
        "ppc64el"
    } else if cfg!(target_arch = "powerpc64") {
        "ppc64"
    } else if cfg!(target_arch = "riscv64") {
        "riscv64"
    } else if cfg!(target_arch = "s390x") {
        "s390x"
    } else if cfg!(all(target_arch = "mips64", target_endian = "little")) {
        "mips64el"
    } else {
        "amd64"
    }
}

/// The multi-arch class of a binary package version.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MultiArch {
    /// No `Multi-Arch` field on an architecture-specific package.
    No,
    /// An `Architecture: all` package without a `Multi-Arch` field.
    All,
    /// `Multi-Arch: same`.
    Same,
    /// `Multi-Arch: foreign`.
    Foreign,
    /// `Multi-Arch: allowed`.
    Allowed,
}

impl MultiArch {
    /// Derive the class from a version's `Architecture` and `Multi-Arch` fields.
    ///
    /// Unknown `Multi-Arch` values are treated like a missing field.
    pub fn from_fields(architecture: &str, multi_arch: Option<&str>) -> Self {
        match multi_arch.map(|x| x.trim().to_ascii_lowercase()).as_deref() {
            Some("same") => Self::Same,
            Some("foreign") => Self::Foreign,
            Some("allowed") => Self::Allowed,
            _ if architecture == "all" => Self::All,
            _ => Self::No,
        }
    }
}

impl Display for MultiArch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::No | Self::All => "none",
            Self::Same => "same",
            Self::Foreign => "foreign",
            Self::Allowed => "allowed",
        })
    }
}
