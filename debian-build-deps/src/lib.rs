// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian build dependency resolution.

This crate computes what must be installed (and removed) on a Debian system to
satisfy the build relationships declared by source packages. It mirrors the
behavior of `apt-get build-dep` without performing any installation.

The canonical home of this crate is <https://github.com/indygreg/PyOxidizer>. Please file issues
and pull requests there.

# A Tour of Functionality

Control files are parsed by the [control] module. [control::ControlParagraphReader]
streams [control::ControlParagraph] from a reader. PGP clear-signed documents such as
`.dsc` files are unwrapped by [control::cleartext_reader] using the `pgp-cleartext`
crate.

The [dependency] module parses relationship expressions like
`libc6-dev (>= 2.31) [linux-any] <!nocheck> | libc-dev`. Architecture restriction
lists and build profile formulas are evaluated at parse time, producing
[dependency::AlternativeGroup] values tagged with the field they came from.
[source_control] extracts those groups from a source package's control file.

Version strings are compared by the [package_version] module. Architecture wildcards
and `Multi-Arch` classes live in [architecture].

The view of the system, installed and available binary packages, is provided by the
[package_index::PackageIndex] trait. [package_index::PackageCache] implements it in
memory from the dpkg status database and apt `Packages` lists.

[resolver::BuildDepResolver] drives resolution. For each dependency it decides,
purely from the index, whether the dependency is already satisfied or which package
must be installed. When cross building, [multiarch] picks between the native and host
architecture packages. Decisions are applied through [action::ActionApplier] to a
[solver::ConstraintSolver], which [solver::DependencySolver] implements by marking
packages and pulling in their dependencies.

Configuration is held by [config::ConfigStore], a store of apt-style `A::B::C` keys,
and interpreted by [config::ResolverConfig].
*/

pub mod action;
pub mod architecture;
pub mod config;
pub mod control;
pub mod dependency;
pub mod error;
pub mod multiarch;
pub mod package_index;
pub mod package_version;
pub mod resolver;
pub mod solver;
pub mod source_control;
