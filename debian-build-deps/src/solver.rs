// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Constraint solving over install and remove requests.

A [ConstraintSolver] accumulates install and remove marks against a package
index, expands the dependencies of packages marked for installation and
reports packages whose dependencies would be broken by the plan.

[DependencySolver] is a simple in-memory implementation. Dependencies are
expanded by picking the first alternative that can be installed. Its problem
resolver only removes installed packages that a plan breaks and retries
dependency expansion; it never backtracks over earlier choices.
*/

use {
    crate::{
        architecture::MultiArch,
        dependency::{ArchQualifier, DependencyClause},
        package_index::{BinaryVersion, PackageId, PackageIndex},
    },
    log::{debug, trace},
    std::{
        collections::BTreeMap,
        fmt::{Display, Formatter},
    },
};

/// A package that would be newly installed by a plan.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct PlannedInstall {
    pub name: String,
    pub architecture: String,
    pub version: String,
}

impl Display for PlannedInstall {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}={}", self.name, self.architecture, self.version)
    }
}

/// Accumulates install and remove requests and validates their consistency.
pub trait ConstraintSolver {
    /// Mark the candidate version of a package for installation.
    ///
    /// With `auto_install`, missing dependencies of the candidate are marked for
    /// installation as well. Returns false if the package has no candidate version.
    fn request_install(&mut self, package: PackageId, auto_install: bool) -> bool;

    /// Mark an installed package for removal.
    ///
    /// Returns false if the package is not installed.
    fn request_remove(&mut self, package: PackageId, purge: bool) -> bool;

    /// Set whether a package marked for installation counts as automatically installed.
    fn mark_auto_installed(&mut self, package: PackageId, auto: bool);

    /// Attempt to repair broken packages. Returns whether nothing remains broken.
    fn resolve(&mut self, try_hard: bool) -> bool;

    /// Number of packages whose dependencies the current plan leaves unsatisfied.
    fn broken_count(&self) -> usize;

    /// Human readable description of every broken package.
    fn explain_broken(&self) -> Vec<String>;

    /// Packages that are not installed and are marked for installation.
    fn new_installs(&self) -> Vec<PlannedInstall>;

    /// Record the current plan so it can be restored by [Self::rollback].
    fn checkpoint(&mut self);

    /// Restore the plan recorded by the last [Self::checkpoint].
    fn rollback(&mut self);
}

/// A change requested for a package.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mark {
    Install { auto: bool },
    Delete { purge: bool },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    /// The system as it is.
    Current,
    /// The system after applying all marks.
    Planned,
}

/// In-memory [ConstraintSolver] over a [PackageIndex].
pub struct DependencySolver<'a, I: PackageIndex> {
    index: &'a I,
    marks: BTreeMap<PackageId, Mark>,
    saved: Option<BTreeMap<PackageId, Mark>>,
}

impl<'a, I: PackageIndex> DependencySolver<'a, I> {
    pub fn new(index: &'a I) -> Self {
        Self {
            index,
            marks: BTreeMap::new(),
            saved: None,
        }
    }

    /// The mark on a package, if any.
    pub fn mark(&self, package: PackageId) -> Option<Mark> {
        self.marks.get(&package).copied()
    }

    fn version(&self, package: PackageId, state: State) -> Option<&'a BinaryVersion> {
        let index: &'a I = self.index;
        let p = index.package(package);

        match (state, self.marks.get(&package)) {
            (State::Current, _) | (State::Planned, None) => p.installed.as_ref(),
            (State::Planned, Some(Mark::Install { .. })) => p.candidate.as_ref(),
            (State::Planned, Some(Mark::Delete { .. })) => None,
        }
    }

    /// Whether a package on `target_arch` with `version` may satisfy a dependency
    /// declared by a package on `from_arch`.
    fn architecture_acceptable(
        &self,
        qualifier: Option<&ArchQualifier>,
        from_arch: &str,
        target_arch: &str,
        version: &BinaryVersion,
    ) -> bool {
        match qualifier {
            None => {
                target_arch == from_arch
                    || version.architecture == "all"
                    || version.multi_arch == MultiArch::Foreign
            }
            Some(ArchQualifier::Any) => {
                target_arch == from_arch
                    || matches!(version.multi_arch, MultiArch::Foreign | MultiArch::Allowed)
            }
            Some(ArchQualifier::Native) => target_arch == self.index.native_architecture(),
            Some(ArchQualifier::Architecture(arch)) => target_arch == arch,
        }
    }

    /// Packages whose version in `state` satisfies a clause, directly or by providing it.
    fn satisfiers(
        &self,
        clause: &DependencyClause,
        from_arch: &str,
        state: State,
    ) -> Vec<PackageId> {
        let qualifier = clause.qualifier();
        let mut result = vec![];

        for id in self.index.group(clause.name()) {
            let package = self.index.package(id);

            if let Some(version) = self.version(id, state) {
                if clause.satisfied_by(&version.version)
                    && self.architecture_acceptable(
                        qualifier.as_ref(),
                        from_arch,
                        &package.architecture,
                        version,
                    )
                {
                    result.push(id);
                }
            }

            for provider in self.index.providers(id) {
                if let Some(version) = self.version(provider, state) {
                    if version.provides_for(clause)
                        && self.architecture_acceptable(
                            qualifier.as_ref(),
                            from_arch,
                            &self.index.package(provider).architecture,
                            version,
                        )
                        && !result.contains(&provider)
                    {
                        result.push(provider);
                    }
                }
            }
        }

        result
    }

    /// Packages whose candidate could be installed to satisfy a clause.
    fn installable(&self, clause: &DependencyClause, from_arch: &str) -> Vec<PackageId> {
        let qualifier = clause.qualifier();
        let mut direct = vec![];
        let mut provided = vec![];

        for id in self.index.group(clause.name()) {
            let package = self.index.package(id);

            if let Some(candidate) = &package.candidate {
                if clause.satisfied_by(&candidate.version)
                    && self.architecture_acceptable(
                        qualifier.as_ref(),
                        from_arch,
                        &package.architecture,
                        candidate,
                    )
                {
                    direct.push(id);
                }
            }

            for provider in self.index.providers(id) {
                if let Some(candidate) = &self.index.package(provider).candidate {
                    if candidate.provides_for(clause) && !provided.contains(&provider) {
                        provided.push(provider);
                    }
                }
            }
        }

        // Prefer the depender's own architecture.
        direct.sort_by_key(|id| self.index.package(*id).architecture != from_arch);

        direct.extend(provided);
        direct
    }

    fn group_satisfied(&self, group: &[DependencyClause], from_arch: &str, state: State) -> bool {
        group
            .iter()
            .any(|clause| !self.satisfiers(clause, from_arch, state).is_empty())
    }

    fn conflicting(&self, package: PackageId, state: State) -> Vec<(DependencyClause, PackageId)> {
        let mut result = vec![];

        if let Some(version) = self.version(package, state) {
            let from_arch = &self.index.package(package).architecture;

            for clause in &version.conflicts {
                for other in self.satisfiers(clause, from_arch, state) {
                    if other != package {
                        result.push((clause.clone(), other));
                    }
                }
            }
        }

        result
    }

    fn mark_install(
        &mut self,
        package: PackageId,
        auto: bool,
        auto_install: bool,
        depth: usize,
    ) -> bool {
        let index: &'a I = self.index;
        let p = index.package(package);

        let candidate = match &p.candidate {
            Some(candidate) => candidate,
            None => return false,
        };

        // Removals are explicit requests and are never undone by dependency expansion.
        match self.marks.get(&package).copied() {
            Some(Mark::Install { .. }) => return true,
            Some(Mark::Delete { .. }) => return false,
            None => {}
        }

        if p.installed.as_ref().map(|v| &v.version) == Some(&candidate.version) {
            self.marks.remove(&package);
            return true;
        }

        trace!("{}marking {}={} for install", " ".repeat(depth), p.full_name(), candidate.version);
        self.marks.insert(package, Mark::Install { auto });

        if auto_install {
            self.install_dependencies(package, depth + 1);
        }

        true
    }

    fn install_dependencies(&mut self, package: PackageId, depth: usize) {
        let index: &'a I = self.index;
        let p = index.package(package);

        let version = match self.version(package, State::Planned) {
            Some(version) => version,
            None => return,
        };

        for group in &version.depends {
            if self.group_satisfied(group, &p.architecture, State::Planned) {
                continue;
            }

            let installed = group.iter().any(|clause| {
                self.installable(clause, &p.architecture)
                    .into_iter()
                    .any(|target| self.mark_install(target, true, true, depth))
            });

            if !installed {
                debug!(
                    "unable to satisfy dependency of {}: {}",
                    p.full_name(),
                    group
                        .iter()
                        .map(|c| c.to_string())
                        .collect::<Vec<_>>()
                        .join(" | ")
                );
            }
        }
    }

    /// Dependency groups broken by the plan, and conflicts introduced by it.
    fn problems(&self, package: PackageId) -> Vec<String> {
        let p = self.index.package(package);
        let mut problems = vec![];

        let planned = match self.version(package, State::Planned) {
            Some(version) => version,
            None => return problems,
        };

        let newly_planned = matches!(self.marks.get(&package), Some(Mark::Install { .. }));

        for group in &planned.depends {
            if self.group_satisfied(group, &p.architecture, State::Planned) {
                continue;
            }

            // Existing breakage of untouched packages is not caused by the plan.
            if !newly_planned && !self.group_satisfied(group, &p.architecture, State::Current) {
                continue;
            }

            problems.push(format!(
                "Depends: {} but it is not going to be installed",
                group
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(" | ")
            ));
        }

        let existing = self
            .conflicting(package, State::Current)
            .into_iter()
            .map(|(_, other)| other)
            .collect::<Vec<_>>();

        for (clause, other) in self.conflicting(package, State::Planned) {
            if newly_planned || !existing.contains(&other) {
                problems.push(format!(
                    "Conflicts: {} but {} is to be installed",
                    clause,
                    self.index.package(other).full_name()
                ));
            }
        }

        problems
    }

    fn broken_packages(&self) -> Vec<(PackageId, Vec<String>)> {
        (0..self.index.package_count())
            .filter(|id| {
                self.marks.contains_key(id) || self.index.package(*id).installed.is_some()
            })
            .map(|id| (id, self.problems(id)))
            .filter(|(_, problems)| !problems.is_empty())
            .collect()
    }
}

impl<'a, I: PackageIndex> ConstraintSolver for DependencySolver<'a, I> {
    fn request_install(&mut self, package: PackageId, auto_install: bool) -> bool {
        self.mark_install(package, false, auto_install, 0)
    }

    fn request_remove(&mut self, package: PackageId, purge: bool) -> bool {
        if self.index.package(package).installed.is_none() {
            return false;
        }

        trace!("marking {} for removal", self.index.package(package).full_name());
        self.marks.insert(package, Mark::Delete { purge });

        true
    }

    fn mark_auto_installed(&mut self, package: PackageId, auto: bool) {
        if let Some(Mark::Install { auto: current }) = self.marks.get_mut(&package) {
            *current = auto;
        }
    }

    fn resolve(&mut self, try_hard: bool) -> bool {
        for _ in 0..self.index.package_count().max(1) {
            let broken = self.broken_packages();
            if broken.is_empty() {
                return true;
            }

            let mut changed = false;

            for (id, _) in broken {
                match self.marks.get(&id).copied() {
                    Some(Mark::Install { .. }) => {
                        let before = self.marks.clone();
                        self.install_dependencies(id, 0);

                        if try_hard {
                            for (_, other) in self.conflicting(id, State::Planned) {
                                if !self.marks.contains_key(&other) {
                                    debug!(
                                        "removing {} as it conflicts with {}",
                                        self.index.package(other).full_name(),
                                        self.index.package(id).full_name()
                                    );
                                    self.marks.insert(other, Mark::Delete { purge: false });
                                }
                            }
                        }

                        changed |= self.marks != before;
                    }
                    None if try_hard => {
                        debug!(
                            "removing {} as the plan breaks it",
                            self.index.package(id).full_name()
                        );
                        self.marks.insert(id, Mark::Delete { purge: false });
                        changed = true;
                    }
                    _ => {}
                }
            }

            if !changed {
                return false;
            }
        }

        self.broken_count() == 0
    }

    fn broken_count(&self) -> usize {
        self.broken_packages().len()
    }

    fn explain_broken(&self) -> Vec<String> {
        let mut lines = vec![];

        for (id, problems) in self.broken_packages() {
            let name = self.index.package(id).full_name();

            for (i, problem) in problems.into_iter().enumerate() {
                if i == 0 {
                    lines.push(format!(" {} : {}", name, problem));
                } else {
                    lines.push(format!(" {}   {}", " ".repeat(name.len()), problem));
                }
            }
        }

        lines
    }

    fn new_installs(&self) -> Vec<PlannedInstall> {
        let mut installs = self
            .marks
            .iter()
            .filter(|(_, mark)| matches!(mark, Mark::Install { .. }))
            .filter_map(|(id, _)| {
                let package = self.index.package(*id);

                match (&package.installed, &package.candidate) {
                    (None, Some(candidate)) => Some(PlannedInstall {
                        name: package.name.clone(),
                        architecture: package.architecture.clone(),
                        version: candidate.version.clone(),
                    }),
                    _ => None,
                }
            })
            .collect::<Vec<_>>();

        installs.sort();
        installs
    }

    fn checkpoint(&mut self) {
        self.saved = Some(self.marks.clone());
    }

    fn rollback(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.marks = saved;
        }
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{error::Result, package_index::PackageCache},
        indoc::indoc,
        std::io::Cursor,
    };

    const STATUS: &str = indoc! {"
        Package: libold1
        Status: install ok installed
        Architecture: amd64
        Version: 1.0

        Package: old-tool
        Status: install ok installed
        Architecture: amd64
        Version: 1.0
        Depends: libold1

        Package: gawk
        Status: install ok installed
        Architecture: amd64
        Version: 5.2
    "};

    const PACKAGES: &str = indoc! {"
        Package: app
        Architecture: amd64
        Version: 2.0
        Depends: libnew (>= 3) | libalt, awk

        Package: libnew
        Architecture: amd64
        Version: 2.5

        Package: libalt
        Architecture: amd64
        Version: 1.1
        Depends: libalt-data

        Package: libalt-data
        Architecture: all
        Version: 1.1

        Package: mawk
        Architecture: amd64
        Version: 1.3.4
        Provides: awk

        Package: needs-missing
        Architecture: amd64
        Version: 1.0
        Depends: does-not-exist

        Package: replacement
        Architecture: amd64
        Version: 1.0
        Conflicts: old-tool

        Package: libold1
        Architecture: amd64
        Version: 1.0

        Package: old-tool-plugin
        Architecture: amd64
        Version: 1.0
        Depends: libold1
    "};

    fn cache() -> Result<PackageCache> {
        let mut cache = PackageCache::new(vec!["amd64".into()]);
        cache.load_status(Cursor::new(STATUS.as_bytes()))?;
        cache.load_packages(Cursor::new(PACKAGES.as_bytes()))?;

        Ok(cache)
    }

    fn id(cache: &PackageCache, name: &str) -> PackageId {
        cache.find_package(name, "amd64").unwrap()
    }

    #[test]
    fn auto_install_dependencies() -> Result<()> {
        let cache = cache()?;
        let mut solver = DependencySolver::new(&cache);

        assert!(solver.request_install(id(&cache, "app"), true));
        assert_eq!(solver.broken_count(), 0);

        assert_eq!(
            solver
                .new_installs()
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>(),
            vec![
                "app:amd64=2.0",
                "libalt:amd64=1.1",
                "libalt-data:amd64=1.1",
                "mawk:amd64=1.3.4",
            ]
        );

        assert_eq!(
            solver.mark(id(&cache, "libalt")),
            Some(Mark::Install { auto: true })
        );
        assert_eq!(
            solver.mark(id(&cache, "app")),
            Some(Mark::Install { auto: false })
        );

        Ok(())
    }

    #[test]
    fn without_auto_install() -> Result<()> {
        let cache = cache()?;
        let mut solver = DependencySolver::new(&cache);

        assert!(solver.request_install(id(&cache, "app"), false));
        assert_eq!(solver.new_installs().len(), 1);
        assert_eq!(solver.broken_count(), 1);

        assert!(solver.resolve(true));
        assert_eq!(solver.new_installs().len(), 4);

        Ok(())
    }

    #[test]
    fn installed_packages_not_reinstalled() -> Result<()> {
        let cache = cache()?;
        let mut solver = DependencySolver::new(&cache);

        assert!(solver.request_install(id(&cache, "libold1"), true));
        assert!(solver.mark(id(&cache, "libold1")).is_none());
        assert!(solver.new_installs().is_empty());

        // Virtual packages have no candidate.
        assert!(!solver.request_install(id(&cache, "awk"), true));

        Ok(())
    }

    #[test]
    fn unsatisfiable_dependency() -> Result<()> {
        let cache = cache()?;
        let mut solver = DependencySolver::new(&cache);

        assert!(solver.request_install(id(&cache, "needs-missing"), true));
        assert_eq!(solver.broken_count(), 1);
        assert!(!solver.resolve(true));
        assert_eq!(
            solver.explain_broken(),
            vec![" needs-missing:amd64 : Depends: does-not-exist but it is not going to be installed".to_string()]
        );

        Ok(())
    }

    #[test]
    fn removal_breaks_dependents() -> Result<()> {
        let cache = cache()?;
        let mut solver = DependencySolver::new(&cache);

        assert!(solver.request_remove(id(&cache, "libold1"), false));
        assert_eq!(solver.broken_count(), 1);

        assert!(!solver.resolve(false));
        assert!(solver.resolve(true));
        assert_eq!(
            solver.mark(id(&cache, "old-tool")),
            Some(Mark::Delete { purge: false })
        );

        assert!(!solver.request_remove(id(&cache, "mawk"), true));

        Ok(())
    }

    #[test]
    fn removal_not_undone_by_dependencies() -> Result<()> {
        let cache = cache()?;
        let mut solver = DependencySolver::new(&cache);
        let libold = id(&cache, "libold1");

        assert!(solver.request_remove(libold, false));
        assert!(solver.request_install(id(&cache, "old-tool-plugin"), true));
        assert_eq!(solver.mark(libold), Some(Mark::Delete { purge: false }));

        assert!(!solver.resolve(true));
        assert_eq!(solver.mark(libold), Some(Mark::Delete { purge: false }));
        assert_eq!(
            solver.explain_broken(),
            vec![
                " old-tool-plugin:amd64 : Depends: libold1 but it is not going to be installed"
                    .to_string()
            ]
        );

        Ok(())
    }

    #[test]
    fn provider_architecture() -> Result<()> {
        let mut cache = PackageCache::new(vec!["amd64".into(), "arm64".into()]);
        cache.load_status(Cursor::new(
            indoc! {"
                Package: mawk
                Status: install ok installed
                Architecture: arm64
                Multi-Arch: foreign
                Version: 1.3.4
                Provides: awk
            "}
            .as_bytes(),
        ))?;
        cache.load_packages(Cursor::new(
            indoc! {"
                Package: any-awk-user
                Architecture: amd64
                Version: 1.0
                Depends: awk

                Package: amd64-awk-user
                Architecture: amd64
                Version: 1.0
                Depends: awk:amd64
            "}
            .as_bytes(),
        ))?;

        let mut solver = DependencySolver::new(&cache);
        assert!(solver.request_install(id(&cache, "any-awk-user"), true));
        assert_eq!(solver.broken_count(), 0);

        // The virtual package exists on amd64 but its only provider is arm64.
        let mut solver = DependencySolver::new(&cache);
        assert!(solver.request_install(id(&cache, "amd64-awk-user"), true));
        assert_eq!(solver.broken_count(), 1);

        Ok(())
    }

    #[test]
    fn conflicts_remove_installed() -> Result<()> {
        let cache = cache()?;
        let mut solver = DependencySolver::new(&cache);

        assert!(solver.request_install(id(&cache, "replacement"), true));
        assert_eq!(solver.broken_count(), 1);
        assert!(solver.explain_broken()[0].contains("Conflicts: old-tool"));

        assert!(solver.resolve(true));
        assert_eq!(
            solver.mark(id(&cache, "old-tool")),
            Some(Mark::Delete { purge: false })
        );

        Ok(())
    }

    #[test]
    fn checkpoint_rollback() -> Result<()> {
        let cache = cache()?;
        let mut solver = DependencySolver::new(&cache);

        solver.request_install(id(&cache, "mawk"), true);
        solver.checkpoint();
        solver.request_install(id(&cache, "needs-missing"), true);
        assert_eq!(solver.new_installs().len(), 2);

        solver.rollback();
        assert_eq!(solver.new_installs().len(), 1);
        assert_eq!(solver.broken_count(), 0);

        solver.mark_auto_installed(id(&cache, "mawk"), true);
        assert_eq!(
            solver.mark(id(&cache, "mawk")),
            Some(Mark::Install { auto: true })
        );

        Ok(())
    }
}
