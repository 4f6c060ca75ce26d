// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Multi-arch aware package selection for cross builds.

When building for a host architecture different from the build machine, a
build dependency may need to be satisfied by the native package (a tool run
during the build) or by the host package (a library linked into the result).
The `Multi-Arch` class of the candidate versions together with the
dependency's architecture qualifier decides which.
*/

use {
    crate::{
        architecture::MultiArch,
        config::ResolverConfig,
        dependency::{ArchQualifier, DependencyClause},
        package_index::{BinaryVersion, PackageId, PackageIndex},
    },
    log::debug,
};

/// Which member of a package group a dependency is directed to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MultiArchTarget {
    /// The package for the host architecture.
    Host,
    /// The package for the native architecture.
    Native,
    /// The package the examined version belongs to.
    Own,
    /// The package for an explicitly named architecture.
    Architecture(String),
    /// An installed member of the group, or the group's preferred package.
    InstalledOrPreferred,
    /// The qualifier may not be used with this multi-arch class.
    Forbidden(&'static str),
}

/// Decide the target of a dependency from a version's multi-arch class.
///
/// `cross` is whether the host architecture differs from the native one.
pub fn multi_arch_target(
    class: MultiArch,
    qualifier: Option<&ArchQualifier>,
    cross: bool,
) -> MultiArchTarget {
    if let Some(ArchQualifier::Architecture(arch)) = qualifier {
        return MultiArchTarget::Architecture(arch.clone());
    }

    match (class, qualifier) {
        (MultiArch::No, None) => MultiArchTarget::Host,
        (MultiArch::All, None) => MultiArchTarget::Own,
        (MultiArch::No | MultiArch::All, Some(ArchQualifier::Any)) => {
            MultiArchTarget::Forbidden("Multi-Arch: none")
        }
        (MultiArch::Same, None) => MultiArchTarget::Host,
        (MultiArch::Same, Some(ArchQualifier::Any)) => {
            MultiArchTarget::Forbidden("Multi-Arch: same")
        }
        (MultiArch::Foreign, None) => MultiArchTarget::Native,
        (MultiArch::Foreign, Some(_)) if cross => {
            MultiArchTarget::Forbidden("Multi-Arch: foreign")
        }
        (MultiArch::Foreign, Some(_)) => MultiArchTarget::Native,
        (MultiArch::Allowed, None) => MultiArchTarget::Host,
        (MultiArch::Allowed, Some(ArchQualifier::Any)) => MultiArchTarget::InstalledOrPreferred,
        (_, Some(_)) => MultiArchTarget::Native,
    }
}

/// Outcome of multi-arch selection for one dependency clause.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MultiArchDecision {
    /// The dependency is directed to this package, which may not exist.
    Selected(Option<PackageId>),
    /// Every satisfying version forbids the requested qualifier.
    Forbidden(String),
    /// No version on the build or host architecture satisfies the dependency.
    ///
    /// Carries the package the dependency names, for ordinary error reporting.
    Unsatisfied(Option<PackageId>),
}

/// Performs multi-arch selection against a package index.
pub struct MultiArchSelector<'a, I: PackageIndex> {
    index: &'a I,
    config: &'a ResolverConfig,
}

impl<'a, I: PackageIndex> MultiArchSelector<'a, I> {
    pub fn new(index: &'a I, config: &'a ResolverConfig) -> Self {
        Self { index, config }
    }

    /// Versions of a package that could satisfy a clause: installed first, then candidate.
    fn satisfying_versions(
        &self,
        id: PackageId,
        clause: &DependencyClause,
    ) -> Vec<&'a BinaryVersion> {
        let package = self.index.package(id);

        let mut versions: Vec<&BinaryVersion> = vec![];
        for version in [&package.installed, &package.candidate].into_iter().flatten() {
            if clause.satisfied_by(&version.version) && !versions.contains(&version) {
                versions.push(version);
            }
        }

        versions
    }

    /// The package a clause names before considering multi-arch metadata.
    fn named_package(&self, clause: &DependencyClause) -> Option<PackageId> {
        let name = clause.name();

        match clause.qualifier() {
            None => self
                .index
                .find_package(name, self.config.host_architecture()),
            Some(ArchQualifier::Architecture(arch)) => self.index.find_package(name, &arch),
            Some(_) => self
                .index
                .find_package(name, &self.config.native_architecture),
        }
    }

    fn resolve_target(
        &self,
        target: MultiArchTarget,
        name: &str,
        own: PackageId,
    ) -> Option<PackageId> {
        match target {
            MultiArchTarget::Host => self
                .index
                .find_package(name, self.config.host_architecture()),
            MultiArchTarget::Native => self
                .index
                .find_package(name, &self.config.native_architecture),
            MultiArchTarget::Own => Some(own),
            MultiArchTarget::Architecture(arch) => self.index.find_package(name, &arch),
            MultiArchTarget::InstalledOrPreferred => self
                .index
                .group(name)
                .into_iter()
                .find(|id| self.index.package(*id).installed.is_some())
                .or_else(|| self.index.preferred_package(name)),
            MultiArchTarget::Forbidden(_) => None,
        }
    }

    /// Select the package satisfying a clause when cross building.
    pub fn select(&self, clause: &DependencyClause) -> MultiArchDecision {
        let name = clause.name();
        let qualifier = clause.qualifier();

        let first_arch = match &qualifier {
            Some(ArchQualifier::Architecture(arch)) => arch.clone(),
            _ => self.config.native_architecture.clone(),
        };

        let mut candidates = vec![];
        for arch in [first_arch.as_str(), self.config.host_architecture()] {
            if let Some(id) = self.index.find_package(name, arch) {
                candidates = self
                    .satisfying_versions(id, clause)
                    .into_iter()
                    .map(|v| (id, v))
                    .collect();

                if !candidates.is_empty() {
                    break;
                }
            }
        }

        let cross = self.config.is_cross();
        let mut forbidden = None;

        for (id, version) in candidates {
            match multi_arch_target(version.multi_arch, qualifier.as_ref(), cross) {
                MultiArchTarget::Forbidden(reason) => {
                    debug!(
                        "{} is not allowed from {} package {} ({})",
                        qualifier
                            .as_ref()
                            .map(|q| format!(":{}", q))
                            .unwrap_or_default(),
                        reason,
                        clause.package,
                        version.version
                    );
                    forbidden = Some(reason);
                }
                target => {
                    return MultiArchDecision::Selected(self.resolve_target(target, name, id));
                }
            }
        }

        debug!(
            " No multiarch info as we have no satisfying installed nor candidate for {} on build or host arch",
            clause.package
        );

        match forbidden {
            Some(reason) => MultiArchDecision::Forbidden(reason.to_string()),
            None => MultiArchDecision::Unsatisfied(self.named_package(clause)),
        }
    }
}
