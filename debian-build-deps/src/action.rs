// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Application of install and remove decisions to a constraint solver. */

use {
    crate::{
        package_index::{PackageId, PackageIndex},
        solver::ConstraintSolver,
    },
    log::{debug, warn},
};

/// Translates resolution decisions into solver requests.
pub struct ActionApplier<'a, I: PackageIndex, S: ConstraintSolver> {
    index: &'a I,
    solver: &'a mut S,
    purge: bool,
}

impl<'a, I: PackageIndex, S: ConstraintSolver> ActionApplier<'a, I, S> {
    pub fn new(index: &'a I, solver: &'a mut S, purge: bool) -> Self {
        Self {
            index,
            solver,
            purge,
        }
    }

    /// The package to actually install when `package` is requested.
    ///
    /// A package without a candidate version is replaced by its sole provider with a
    /// candidate. Ambiguous or missing providers leave nothing to install.
    pub fn install_target(&self, package: PackageId) -> Option<PackageId> {
        let p = self.index.package(package);

        if p.candidate.is_some() {
            return Some(package);
        }

        let providers = self
            .index
            .providers(package)
            .into_iter()
            .filter(|id| self.index.package(*id).candidate.is_some())
            .collect::<Vec<_>>();

        match providers.as_slice() {
            [] => None,
            [provider] => Some(*provider),
            _ => {
                warn!(
                    "Package {} is a virtual package provided by: {}",
                    p.name,
                    providers
                        .iter()
                        .map(|id| self.index.package(*id).full_name())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                warn!("You should explicitly select one to install.");
                None
            }
        }
    }

    /// Install a package's candidate version along with its dependencies.
    ///
    /// Returns the package marked for installation, which differs from the requested
    /// one when a virtual package was satisfied through its provider.
    pub fn install(&mut self, package: PackageId) -> Option<PackageId> {
        let target = self.install_target(package)?;

        debug!("  Trying to install {}", self.index.package(target).full_name());

        if self.solver.request_install(target, true) {
            Some(target)
        } else {
            None
        }
    }

    /// Remove an installed package.
    pub fn remove(&mut self, package: PackageId) -> bool {
        debug!("  Trying to remove {}", self.index.package(package).full_name());

        self.solver.request_remove(package, self.purge)
    }

    /// Mark a package installed by [Self::install] as automatically installed.
    pub fn mark_auto_installed(&mut self, package: PackageId) {
        self.solver.mark_auto_installed(package, true);
    }
}
