// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use thiserror::Error;

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum BuildDepError {
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0:?}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("glob pattern error: {0:?}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("integer parsing error: {0:?}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("control file parse error: {0}")]
    ControlParseError(String),

    #[error("required field missing in control paragraph: {0}")]
    ControlRequiredFieldMissing(&'static str),

    #[error("epoch component has non-digit characters: {0}")]
    EpochNonNumeric(String),

    #[error("upstream_version component has illegal character: {0}")]
    UpstreamVersionIllegalChar(String),

    #[error("debian_revision component has illegal character: {0}")]
    DebianRevisionIllegalChar(String),

    #[error("Problem parsing dependency {0}: {1}")]
    DependencyParse(String, Box<BuildDepError>),

    #[error("invalid dependency expression `{0}`: {1}")]
    DependencyExpression(String, &'static str),

    #[error("Unable to get build-dependency information for {0}: {1}")]
    BuildDependencyInformation(String, Box<BuildDepError>),

    #[error("No architecture information available for {0}. See apt.conf(5) APT::Architectures for setup")]
    NoArchitectureInformation(String),

    #[error("invalid value for configuration option {0}: {1}")]
    ConfigValue(String, String),

    #[error("malformed configuration option (expected KEY=VALUE): {0}")]
    ConfigOptionSyntax(String),

    #[error("unsupported solver: {0}")]
    UnsupportedSolver(String),

    #[error("{field} dependency for {source_file} can't be satisfied because {package} is not allowed on '{reason}' packages")]
    MultiArchForbidden {
        field: String,
        source_file: String,
        package: String,
        reason: String,
    },

    #[error("{field} dependency for {source_file} cannot be satisfied because the package {package} cannot be found")]
    PackageNotFound {
        field: String,
        source_file: String,
        package: String,
    },

    #[error("Failed to satisfy {field} dependency for {source_file}: Installed package {package} is too new")]
    InstalledTooNew {
        field: String,
        source_file: String,
        package: String,
    },

    #[error("{field} dependency for {source_file} cannot be satisfied because package {package} has no candidate version")]
    NoCandidateVersion {
        field: String,
        source_file: String,
        package: String,
    },

    #[error("{field} dependency for {source_file} cannot be satisfied because candidate version of package {package} can't satisfy version requirements")]
    CandidateVersionMismatch {
        field: String,
        source_file: String,
        package: String,
    },

    #[error("Failed to satisfy {field} dependency for {source_file}: {package}")]
    InstallFailed {
        field: String,
        source_file: String,
        package: String,
    },

    #[error("Build-dependencies for {0} could not be satisfied.")]
    Unsatisfiable(String, Vec<String>),
}

impl BuildDepError {
    /// Whether this error allows resolution to move on to the next alternative of a group.
    ///
    /// Errors that are not recoverable abort the source file being processed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MultiArchForbidden { .. }
                | Self::PackageNotFound { .. }
                | Self::NoCandidateVersion { .. }
                | Self::CandidateVersionMismatch { .. }
                | Self::InstallFailed { .. }
        )
    }

    /// Additional lines explaining the error, if any.
    pub fn explanation(&self) -> &[String] {
        match self {
            Self::Unsatisfiable(_, lines) => lines,
            _ => &[],
        }
    }
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, BuildDepError>;
