// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Dependency expressions.

A dependency field is a comma-separated list of alternative groups. Each
group is a `|`-separated list of clauses, and a clause names a package with
an optional architecture qualifier, version constraint, architecture
restriction list and build profile restriction formula:

```text
foo:native (>= 1.0) [linux-any !hurd-i386] <!nocheck> | bar
```

See <https://www.debian.org/doc/debian-policy/ch-relationships.html> and
<https://wiki.debian.org/BuildProfileSpec>.
*/

use {
    crate::{
        architecture::architecture_matches,
        error::{BuildDepError, Result},
        package_version::{check_constraint, VersionRelationship},
    },
    once_cell::sync::Lazy,
    regex::Regex,
    std::fmt::{Display, Formatter},
};

static RE_CLAUSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?x)
        ^\s*
        (?P<package>[^\s:\[(<|,]+)
        (?::(?P<qualifier>[^\s\[(<]+))?
        \s*
        (?:\(\s*
            (?P<relop><<|<=|>=|>>|<|>|=)
            \s*
            (?P<version>[^\s)]+)
        \s*\))?
        \s*
        (?:\[(?P<arches>[^\]]*)\])?
        \s*
        (?P<restrictions>(?:<[^<>]*>\s*)*)
        $
        "#,
    )
    .unwrap()
});

static RE_RESTRICTION_LIST: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([^<>]*)>").unwrap());

/// The architecture qualifier suffix of a package name in a dependency.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ArchQualifier {
    /// `:any`
    Any,
    /// `:native`
    Native,
    /// An explicit architecture, such as `:i386`.
    Architecture(String),
}

impl ArchQualifier {
    pub fn parse(s: &str) -> Self {
        match s {
            "any" => Self::Any,
            "native" => Self::Native,
            arch => Self::Architecture(arch.to_string()),
        }
    }
}

impl Display for ArchQualifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Native => f.write_str("native"),
            Self::Architecture(arch) => f.write_str(arch),
        }
    }
}

/// A single package in a dependency expression.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DependencyClause {
    /// Package name, including any `:qualifier` suffix.
    pub package: String,
    /// Version relationship, if the clause is versioned.
    pub relationship: Option<VersionRelationship>,
    /// Version string the relationship applies to. Empty when unversioned.
    pub version: String,
}

impl DependencyClause {
    pub fn new(
        package: impl ToString,
        relationship: Option<VersionRelationship>,
        version: impl ToString,
    ) -> Self {
        Self {
            package: package.to_string(),
            relationship,
            version: version.to_string(),
        }
    }

    /// A clause matching any version of a package.
    pub fn unversioned(package: impl ToString) -> Self {
        Self::new(package, None, "")
    }

    /// The package name without any architecture qualifier.
    pub fn name(&self) -> &str {
        match self.package.split_once(':') {
            Some((name, _)) => name,
            None => &self.package,
        }
    }

    pub fn qualifier(&self) -> Option<ArchQualifier> {
        self.package
            .split_once(':')
            .map(|(_, qualifier)| ArchQualifier::parse(qualifier))
    }

    pub fn is_versioned(&self) -> bool {
        self.relationship.is_some()
    }

    /// Whether a version string satisfies this clause's version constraint.
    pub fn satisfied_by(&self, version: &str) -> bool {
        check_constraint(version, self.relationship, &self.version)
    }

    /// Parse a single clause.
    ///
    /// Returns `Ok(None)` if the clause is empty or excluded by an architecture or build
    /// profile restriction.
    pub fn parse(s: &str, options: &ParseOptions) -> Result<Option<Self>> {
        if s.trim().is_empty() {
            return Ok(None);
        }

        let caps = RE_CLAUSE.captures(s).ok_or_else(|| {
            BuildDepError::DependencyExpression(s.trim().to_string(), "malformed dependency")
        })?;

        if let (Some(arches), Some(architecture)) =
            (caps.name("arches"), options.architecture.as_deref())
        {
            if !architecture_list_allows(s, arches.as_str(), architecture)? {
                return Ok(None);
            }
        }

        if let Some(profiles) = &options.profiles {
            let restrictions = caps["restrictions"].trim();

            if !restrictions.is_empty() && !restrictions_allow(s, restrictions, profiles)? {
                return Ok(None);
            }
        }

        let mut package = caps["package"].to_string();
        if let Some(qualifier) = caps.name("qualifier") {
            if !options.strip_multi_arch {
                package.push(':');
                package.push_str(qualifier.as_str());
            }
        }

        let relationship = match caps.name("relop") {
            Some(op) => Some(VersionRelationship::from_operator(op.as_str()).ok_or_else(
                || BuildDepError::DependencyExpression(s.trim().to_string(), "unknown operator"),
            )?),
            None => None,
        };

        let version = caps
            .name("version")
            .map(|v| v.as_str().to_string())
            .unwrap_or_default();

        Ok(Some(Self {
            package,
            relationship,
            version,
        }))
    }
}

impl Display for DependencyClause {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.package)?;

        if let Some(relationship) = &self.relationship {
            write!(f, " ({} {})", relationship, self.version)?;
        }

        Ok(())
    }
}

fn architecture_list_allows(clause: &str, list: &str, architecture: &str) -> Result<bool> {
    let entries = list.split_whitespace().collect::<Vec<_>>();

    if entries.is_empty() {
        return Err(BuildDepError::DependencyExpression(
            clause.trim().to_string(),
            "empty architecture restriction list",
        ));
    }

    let negated = entries.iter().filter(|e| e.starts_with('!')).count();

    if negated == 0 {
        Ok(entries
            .iter()
            .any(|pattern| architecture_matches(architecture, pattern)))
    } else if negated == entries.len() {
        Ok(!entries
            .iter()
            .any(|pattern| architecture_matches(architecture, &pattern[1..])))
    } else {
        Err(BuildDepError::DependencyExpression(
            clause.trim().to_string(),
            "architecture restriction list mixes negated and plain entries",
        ))
    }
}

fn restrictions_allow(clause: &str, formula: &str, profiles: &[String]) -> Result<bool> {
    let mut allowed = false;

    for caps in RE_RESTRICTION_LIST.captures_iter(formula) {
        let terms = caps[1].split_whitespace().collect::<Vec<_>>();

        if terms.is_empty() {
            return Err(BuildDepError::DependencyExpression(
                clause.trim().to_string(),
                "empty build profile restriction list",
            ));
        }

        allowed |= terms.iter().all(|term| match term.strip_prefix('!') {
            Some(profile) => !profiles.iter().any(|p| p == profile),
            None => profiles.iter().any(|p| p == term),
        });
    }

    Ok(allowed)
}

/// Controls how dependency expressions are parsed.
#[derive(Clone, Debug, Default)]
pub struct ParseOptions {
    /// Remove `:qualifier` suffixes from package names.
    pub strip_multi_arch: bool,

    /// Architecture to evaluate `[arch]` restriction lists against.
    ///
    /// If `None`, restriction lists are not evaluated and clauses are kept.
    pub architecture: Option<String>,

    /// Active build profiles to evaluate `<profile>` restriction formulas against.
    ///
    /// If `None`, restriction formulas are not evaluated and clauses are kept.
    pub profiles: Option<Vec<String>>,
}

/// Parse a dependency expression into groups of alternative clauses.
///
/// Excluded clauses are removed from their group and groups left without any clauses
/// are dropped.
pub fn parse_alternatives(s: &str, options: &ParseOptions) -> Result<Vec<Vec<DependencyClause>>> {
    let mut groups = vec![];

    for group in s.split(',') {
        let mut alternatives = vec![];

        for clause in group.split('|') {
            if let Some(clause) = DependencyClause::parse(clause, options)? {
                alternatives.push(clause);
            }
        }

        if !alternatives.is_empty() {
            groups.push(alternatives);
        }
    }

    Ok(groups)
}

/// A source package control field declaring build relationships.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BuildDependencyField {
    /// `Build-Depends`
    BuildDepends,
    /// `Build-Depends-Indep`
    BuildDependsIndep,
    /// `Build-Conflicts`
    BuildConflicts,
    /// `Build-Conflicts-Indep`
    BuildConflictsIndep,
}

impl BuildDependencyField {
    /// All fields, in the order they are processed.
    pub fn values() -> &'static [Self] {
        &[
            Self::BuildDepends,
            Self::BuildDependsIndep,
            Self::BuildConflicts,
            Self::BuildConflictsIndep,
        ]
    }

    pub fn field_name(&self) -> &'static str {
        match self {
            Self::BuildDepends => "Build-Depends",
            Self::BuildDependsIndep => "Build-Depends-Indep",
            Self::BuildConflicts => "Build-Conflicts",
            Self::BuildConflictsIndep => "Build-Conflicts-Indep",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::BuildConflicts | Self::BuildConflictsIndep)
    }

    /// Whether the field only applies to building architecture independent packages.
    pub fn is_indep(&self) -> bool {
        matches!(self, Self::BuildDependsIndep | Self::BuildConflictsIndep)
    }
}

impl Display for BuildDependencyField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.field_name())
    }
}

/// An ordered set of alternatives, any one of which satisfies the group.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AlternativeGroup {
    pub field: BuildDependencyField,
    pub alternatives: Vec<DependencyClause>,
}

impl AlternativeGroup {
    pub fn new(field: BuildDependencyField, alternatives: Vec<DependencyClause>) -> Self {
        Self {
            field,
            alternatives,
        }
    }

    /// Whether the clause at `index` is followed by another alternative.
    pub fn is_alternative(&self, index: usize) -> bool {
        index + 1 < self.alternatives.len()
    }
}

impl Display for AlternativeGroup {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, clause) in self.alternatives.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{}", clause)?;
        }

        Ok(())
    }
}

/// Parse the value of a build relationship field into groups.
pub fn parse_build_dependency_field(
    field: BuildDependencyField,
    s: &str,
    options: &ParseOptions,
) -> Result<Vec<AlternativeGroup>> {
    Ok(parse_alternatives(s, options)?
        .into_iter()
        .map(|alternatives| AlternativeGroup::new(field, alternatives))
        .collect())
}

/// Render groups back into field syntax.
pub fn format_groups(groups: &[AlternativeGroup]) -> String {
    groups
        .iter()
        .map(|g| g.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
