// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Resolution of build dependencies into solver actions.

[BuildDepResolver] walks the alternative groups of a source package. For each
dependency clause it first computes a [ClauseDecision] purely from the package
index, then applies that decision to the constraint solver through an
[ActionApplier]. Groups are satisfied by their first alternative that works.
*/

use {
    crate::{
        action::ActionApplier,
        config::ResolverConfig,
        dependency::{AlternativeGroup, ArchQualifier, BuildDependencyField, DependencyClause},
        error::{BuildDepError, Result},
        multiarch::{MultiArchDecision, MultiArchSelector},
        package_index::{PackageId, PackageIndex},
        package_version::{compare_versions, VersionRelationship},
        solver::{ConstraintSolver, PlannedInstall},
        source_control::{append_build_essential, read_build_dependencies_file, ExtractOptions},
    },
    log::{debug, info},
    std::{cmp::Ordering, path::Path},
};

/// What to do about a single `Build-Depends` style clause.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClauseDecision {
    /// An installed package already satisfies the clause.
    Satisfied(PackageId),
    /// The package must be installed.
    Install(PackageId),
}

/// Progress through an alternative group.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GroupState {
    Seeking,
    Satisfied,
    Exhausted,
}

/// A decision that was applied to the solver.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AppliedDecision {
    /// The clause was already satisfied by an installed package.
    AlreadySatisfied {
        clause: DependencyClause,
        package: PackageId,
    },
    /// A package was marked for installation to satisfy the clause.
    Installed {
        clause: DependencyClause,
        package: PackageId,
    },
    /// An installed package was marked for removal because of a build conflict.
    Removed {
        clause: DependencyClause,
        package: PackageId,
    },
}

/// The outcome of resolving one source package.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SourceResolution {
    /// The source declares no build relationships.
    NoBuildDepends,
    /// Every group was satisfied. Holds the decisions applied, in order.
    Resolved(Vec<AppliedDecision>),
}

fn installed_too_new(clause: &DependencyClause, installed: &str) -> bool {
    match clause.relationship {
        Some(relationship) if relationship.is_upper_bound() => true,
        Some(VersionRelationship::ExactlyEqual) => {
            compare_versions(installed, &clause.version) == Ordering::Greater
        }
        _ => false,
    }
}

/// Drives resolution of build dependencies against an index and solver.
pub struct BuildDepResolver<'a, I: PackageIndex, S: ConstraintSolver> {
    config: &'a ResolverConfig,
    index: &'a I,
    solver: &'a mut S,
}

impl<'a, I: PackageIndex, S: ConstraintSolver> BuildDepResolver<'a, I, S> {
    pub fn new(config: &'a ResolverConfig, index: &'a I, solver: &'a mut S) -> Self {
        Self {
            config,
            index,
            solver,
        }
    }

    /// Whether multi-arch selection applies to clauses of a field.
    fn uses_multi_arch(&self, field: BuildDependencyField) -> bool {
        self.config.has_host_architecture() && field != BuildDependencyField::BuildDependsIndep
    }

    fn plain_lookup(&self, clause: &DependencyClause) -> Option<PackageId> {
        let arch = match clause.qualifier() {
            Some(ArchQualifier::Architecture(arch)) => arch,
            _ => self.config.native_architecture.clone(),
        };

        self.index.find_package(clause.name(), &arch)
    }

    /// Name of a package for messages. The native architecture is implied.
    fn display_name(&self, package: PackageId) -> String {
        let p = self.index.package(package);

        if p.architecture == self.config.native_architecture {
            p.name.clone()
        } else {
            p.full_name()
        }
    }

    /// Decide how a dependency clause is satisfied.
    ///
    /// This only consults the package index. Errors are recoverable unless a newer
    /// installed version rules the clause out.
    pub fn decide_dependency(
        &self,
        source: &str,
        field: BuildDependencyField,
        clause: &DependencyClause,
    ) -> Result<ClauseDecision> {
        debug!("Looking for {}...", clause.package);

        let package = if self.uses_multi_arch(field) {
            match MultiArchSelector::new(self.index, self.config).select(clause) {
                MultiArchDecision::Selected(package) | MultiArchDecision::Unsatisfied(package) => {
                    package
                }
                MultiArchDecision::Forbidden(reason) => {
                    return Err(BuildDepError::MultiArchForbidden {
                        field: field.to_string(),
                        source_file: source.to_string(),
                        package: clause.package.clone(),
                        reason,
                    });
                }
            }
        } else {
            self.plain_lookup(clause)
        };

        let package = match package {
            Some(id)
                if self.index.package(id).has_versions()
                    || !self.index.providers(id).is_empty() =>
            {
                id
            }
            _ => {
                debug!("  (not found)");
                return Err(BuildDepError::PackageNotFound {
                    field: field.to_string(),
                    source_file: source.to_string(),
                    package: clause.package.clone(),
                });
            }
        };

        let p = self.index.package(package);

        if let Some(installed) = &p.installed {
            debug!("  Is installed");

            if clause.satisfied_by(&installed.version) {
                return Ok(ClauseDecision::Satisfied(package));
            }

            debug!("    ...but the installed version doesn't meet the version requirement");

            if installed_too_new(clause, &installed.version) {
                return Err(BuildDepError::InstalledTooNew {
                    field: field.to_string(),
                    source_file: source.to_string(),
                    package: self.display_name(package),
                });
            }
        }

        if clause.is_versioned() {
            match &p.candidate {
                None => {
                    return Err(BuildDepError::NoCandidateVersion {
                        field: field.to_string(),
                        source_file: source.to_string(),
                        package: clause.package.clone(),
                    });
                }
                Some(candidate) if !clause.satisfied_by(&candidate.version) => {
                    return Err(BuildDepError::CandidateVersionMismatch {
                        field: field.to_string(),
                        source_file: source.to_string(),
                        package: clause.package.clone(),
                    });
                }
                Some(_) => {}
            }
        } else {
            for provider in self.index.providers(package) {
                debug!("  Checking provider {}", self.index.package(provider).full_name());

                if self.index.package(provider).installed.is_some() {
                    debug!(
                        "  Is provided by installed package {}",
                        self.index.package(provider).full_name()
                    );
                    return Ok(ClauseDecision::Satisfied(provider));
                }
            }
        }

        Ok(ClauseDecision::Install(package))
    }

    /// Packages to remove because of a build conflict clause.
    ///
    /// Every installed member of the package group whose version matches the clause
    /// is affected. Unknown packages conflict with nothing.
    pub fn decide_conflict(&self, clause: &DependencyClause) -> Vec<PackageId> {
        self.index
            .group(clause.name())
            .into_iter()
            .filter(|id| {
                self.index
                    .package(*id)
                    .installed
                    .as_ref()
                    .map(|v| clause.satisfied_by(&v.version))
                    .unwrap_or(false)
            })
            .collect()
    }

    fn applier(&mut self) -> ActionApplier<'_, I, S> {
        ActionApplier::new(self.index, self.solver, self.config.purge)
    }

    fn apply_dependency(
        &mut self,
        source: &str,
        field: BuildDependencyField,
        clause: &DependencyClause,
        decision: ClauseDecision,
    ) -> Result<AppliedDecision> {
        match decision {
            ClauseDecision::Satisfied(package) => Ok(AppliedDecision::AlreadySatisfied {
                clause: clause.clone(),
                package,
            }),
            ClauseDecision::Install(package) => {
                let automatic = self.config.build_dep_automatic;
                let mut applier = self.applier();

                match applier.install(package) {
                    Some(installed) => {
                        if automatic {
                            applier.mark_auto_installed(installed);
                        }

                        Ok(AppliedDecision::Installed {
                            clause: clause.clone(),
                            package: installed,
                        })
                    }
                    None => Err(BuildDepError::InstallFailed {
                        field: field.to_string(),
                        source_file: source.to_string(),
                        package: clause.package.clone(),
                    }),
                }
            }
        }
    }

    /// Resolve one alternative group, recording applied decisions.
    ///
    /// A group whose every alternative fails yields the error of its last alternative.
    pub fn resolve_group(
        &mut self,
        source: &str,
        group: &AlternativeGroup,
        decisions: &mut Vec<AppliedDecision>,
    ) -> Result<GroupState> {
        if group.field.is_conflict() {
            for clause in &group.alternatives {
                for package in self.decide_conflict(clause) {
                    if self.applier().remove(package) {
                        decisions.push(AppliedDecision::Removed {
                            clause: clause.clone(),
                            package,
                        });
                    }
                }
            }

            return Ok(GroupState::Satisfied);
        }

        let mut state = GroupState::Seeking;
        let mut last_error = None;

        for (i, clause) in group.alternatives.iter().enumerate() {
            let result = self
                .decide_dependency(source, group.field, clause)
                .and_then(|decision| self.apply_dependency(source, group.field, clause, decision));

            match result {
                Ok(decision) => {
                    decisions.push(decision);
                    state = GroupState::Satisfied;
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    if group.is_alternative(i) {
                        debug!("  Unsatisfiable, trying alternatives");
                    }
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        if state == GroupState::Seeking {
            state = GroupState::Exhausted;
        }

        match (state, last_error) {
            (GroupState::Exhausted, Some(e)) => Err(e),
            (state, _) => Ok(state),
        }
    }

    /// Resolve the groups of a source package, stopping at the first hard failure.
    pub fn resolve_groups(
        &mut self,
        source: &str,
        groups: &[AlternativeGroup],
    ) -> Result<Vec<AppliedDecision>> {
        let mut decisions = vec![];

        for group in groups {
            self.resolve_group(source, group, &mut decisions)?;
        }

        Ok(decisions)
    }

    /// Let the solver repair what it can and fail if packages remain broken.
    pub fn finalize(&mut self, source: &str) -> Result<()> {
        if !self.solver.resolve(true) {
            debug!("problem resolver could not fix all broken packages");
        }

        if self.solver.broken_count() != 0 {
            return Err(BuildDepError::Unsatisfiable(
                source.to_string(),
                self.solver.explain_broken(),
            ));
        }

        Ok(())
    }

    /// Resolve already extracted build relationships of a source package.
    ///
    /// Build-essential packages are appended before resolution. On failure, solver
    /// changes made for this source are rolled back.
    pub fn resolve_source(
        &mut self,
        source: &str,
        mut groups: Vec<AlternativeGroup>,
    ) -> Result<SourceResolution> {
        append_build_essential(&mut groups, &self.config.build_essential);

        if groups.is_empty() {
            info!("{} has no build depends.", source);
            return Ok(SourceResolution::NoBuildDepends);
        }

        self.solver.checkpoint();

        let result = self
            .resolve_groups(source, &groups)
            .and_then(|decisions| self.finalize(source).map(|_| decisions));

        match result {
            Ok(decisions) => Ok(SourceResolution::Resolved(decisions)),
            Err(e) => {
                self.solver.rollback();
                Err(e)
            }
        }
    }

    /// Resolve the build relationships declared in a control file.
    pub fn resolve_file(&mut self, path: &Path) -> Result<SourceResolution> {
        let source = path.display().to_string();

        let groups = read_build_dependencies_file(path, &ExtractOptions::from_config(self.config))
            .map_err(|e| BuildDepError::BuildDependencyInformation(source.clone(), Box::new(e)))?;

        self.resolve_source(&source, groups)
    }

    /// Packages newly installed by every source resolved so far.
    pub fn planned_installs(&self) -> Vec<PlannedInstall> {
        self.solver.new_installs()
    }
}
