// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian package version strings and the relationships between them.

See <https://www.debian.org/doc/debian-policy/ch-controlfields.html#version>
for how version strings are defined and ordered.
*/

use {
    crate::error::{BuildDepError, Result},
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
        str::FromStr,
    },
};

/// A Debian package version.
///
/// Versions have the form `[epoch:]upstream_version[-debian_revision]`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PackageVersion {
    epoch: Option<u32>,
    upstream_version: String,
    debian_revision: Option<String>,
}

impl PackageVersion {
    /// Parse a version string, validating each component.
    pub fn parse(s: &str) -> Result<Self> {
        let (epoch, remainder) = match s.split_once(':') {
            Some((epoch, remainder)) => {
                if epoch.is_empty() || !epoch.chars().all(|c| c.is_ascii_digit()) {
                    return Err(BuildDepError::EpochNonNumeric(s.to_string()));
                }

                (Some(u32::from_str(epoch)?), remainder)
            }
            None => (None, s),
        };

        let (upstream, revision) = match remainder.rsplit_once('-') {
            Some((upstream, revision)) => (upstream, Some(revision)),
            None => (remainder, None),
        };

        // Hyphens only remain when a revision was split off and colons only when an
        // epoch was.
        if upstream.is_empty()
            || !upstream
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '~' | '-' | ':'))
        {
            return Err(BuildDepError::UpstreamVersionIllegalChar(s.to_string()));
        }

        if let Some(revision) = revision {
            if revision.is_empty()
                || !revision
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '~'))
            {
                return Err(BuildDepError::DebianRevisionIllegalChar(s.to_string()));
            }
        }

        Ok(Self {
            epoch,
            upstream_version: upstream.to_string(),
            debian_revision: revision.map(|x| x.to_string()),
        })
    }

    /// Split a possibly invalid version string into its components.
    ///
    /// Unlike [Self::parse], this never fails.
    fn parse_lenient(s: &str) -> Self {
        let s = s.trim();

        let (epoch, remainder) = match s.split_once(':') {
            Some((epoch, remainder)) => (u32::from_str(epoch).ok(), remainder),
            None => (None, s),
        };

        let (upstream, revision) = match remainder.rsplit_once('-') {
            Some((upstream, revision)) => (upstream, Some(revision)),
            None => (remainder, None),
        };

        Self {
            epoch,
            upstream_version: upstream.to_string(),
            debian_revision: revision.map(|x| x.to_string()),
        }
    }

    /// The explicit epoch component, if present.
    pub fn epoch(&self) -> Option<u32> {
        self.epoch
    }

    /// The epoch, defaulting to `0` when not present.
    pub fn epoch_assumed(&self) -> u32 {
        self.epoch.unwrap_or(0)
    }

    pub fn upstream_version(&self) -> &str {
        &self.upstream_version
    }

    pub fn debian_revision(&self) -> Option<&str> {
        self.debian_revision.as_deref()
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch_assumed()
            .cmp(&other.epoch_assumed())
            .then_with(|| compare_fragment(&self.upstream_version, &other.upstream_version))
            .then_with(|| {
                compare_fragment(
                    self.debian_revision().unwrap_or(""),
                    other.debian_revision().unwrap_or(""),
                )
            })
    }
}

/// Sort weight of a single character in the non-digit part of a fragment.
///
/// `~` sorts before everything, even the end of the string. Letters sort before
/// all other characters.
fn char_weight(c: Option<&u8>) -> i32 {
    match c {
        None => 0,
        Some(b'~') => -1,
        Some(c) if c.is_ascii_digit() => 0,
        Some(c) if c.is_ascii_alphabetic() => *c as i32,
        Some(c) => *c as i32 + 256,
    }
}

/// Compare an upstream version or revision using the Debian ordering rules.
///
/// Strings are consumed as alternating runs of non-digits and digits. Non-digit
/// runs compare character by character using [char_weight]. Digit runs compare
/// numerically, so leading zeros are insignificant and arbitrarily long runs work.
fn compare_fragment(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);

    while i < a.len() || j < b.len() {
        while (i < a.len() && !a[i].is_ascii_digit()) || (j < b.len() && !b[j].is_ascii_digit()) {
            let (wa, wb) = (char_weight(a.get(i)), char_weight(b.get(j)));
            if wa != wb {
                return wa.cmp(&wb);
            }
            i += 1;
            j += 1;
        }

        while i < a.len() && a[i] == b'0' {
            i += 1;
        }
        while j < b.len() && b[j] == b'0' {
            j += 1;
        }

        let mut first_difference = Ordering::Equal;
        while i < a.len() && a[i].is_ascii_digit() && j < b.len() && b[j].is_ascii_digit() {
            if first_difference == Ordering::Equal {
                first_difference = a[i].cmp(&b[j]);
            }
            i += 1;
            j += 1;
        }

        if i < a.len() && a[i].is_ascii_digit() {
            return Ordering::Greater;
        }
        if j < b.len() && b[j].is_ascii_digit() {
            return Ordering::Less;
        }
        if first_difference != Ordering::Equal {
            return first_difference;
        }
    }

    Ordering::Equal
}

/// Compare two version strings with Debian ordering semantics.
///
/// Strings that are not strictly valid versions are still ordered, the same way
/// dpkg orders them. A non-numeric epoch is treated as `0`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    PackageVersion::parse_lenient(a).cmp(&PackageVersion::parse_lenient(b))
}

/// A version relationship operator in a dependency expression.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum VersionRelationship {
    /// `<<`
    StrictlyEarlier,
    /// `<=`
    EarlierOrEqual,
    /// `=`
    ExactlyEqual,
    /// `>=`
    LaterOrEqual,
    /// `>>`
    StrictlyLater,
}

impl VersionRelationship {
    /// Parse the operator syntax.
    ///
    /// The obsolete `<` and `>` forms mean `<=` and `>=` respectively.
    pub fn from_operator(s: &str) -> Option<Self> {
        match s {
            "<<" => Some(Self::StrictlyEarlier),
            "<=" | "<" => Some(Self::EarlierOrEqual),
            "=" => Some(Self::ExactlyEqual),
            ">=" | ">" => Some(Self::LaterOrEqual),
            ">>" => Some(Self::StrictlyLater),
            _ => None,
        }
    }

    /// Whether a version with the given ordering relative to the target satisfies this operator.
    pub fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Self::StrictlyEarlier => ordering == Ordering::Less,
            Self::EarlierOrEqual => ordering != Ordering::Greater,
            Self::ExactlyEqual => ordering == Ordering::Equal,
            Self::LaterOrEqual => ordering != Ordering::Less,
            Self::StrictlyLater => ordering == Ordering::Greater,
        }
    }

    /// Whether this operator bounds versions from above.
    pub fn is_upper_bound(&self) -> bool {
        matches!(self, Self::StrictlyEarlier | Self::EarlierOrEqual)
    }
}

impl Display for VersionRelationship {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrictlyEarlier => write!(f, "<<"),
            Self::EarlierOrEqual => write!(f, "<="),
            Self::ExactlyEqual => write!(f, "="),
            Self::LaterOrEqual => write!(f, ">="),
            Self::StrictlyLater => write!(f, ">>"),
        }
    }
}

/// Evaluate `version <relationship> target`.
///
/// A missing relationship means the dependency is unconstrained and any version matches.
pub fn check_constraint(
    version: &str,
    relationship: Option<VersionRelationship>,
    target: &str,
) -> bool {
    match relationship {
        None => true,
        Some(relationship) => relationship.accepts(compare_versions(version, target)),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse() -> Result<()> {
        assert_eq!(
            PackageVersion::parse("1:4.7.0+dfsg1-2")?,
            PackageVersion {
                epoch: Some(1),
                upstream_version: "4.7.0+dfsg1".into(),
                debian_revision: Some("2".into()),
            }
        );
        assert_eq!(
            PackageVersion::parse("3.3.2.final~github")?,
            PackageVersion {
                epoch: None,
                upstream_version: "3.3.2.final~github".into(),
                debian_revision: None,
            }
        );
        assert_eq!(
            PackageVersion::parse("0.18.0+dfsg-2+b1")?,
            PackageVersion {
                epoch: None,
                upstream_version: "0.18.0+dfsg".into(),
                debian_revision: Some("2+b1".into()),
            }
        );
        assert_eq!(
            PackageVersion::parse("1:2.3-4-5")?.upstream_version(),
            "2.3-4"
        );

        assert!(matches!(
            PackageVersion::parse("a:1.0"),
            Err(BuildDepError::EpochNonNumeric(_))
        ));
        assert!(matches!(
            PackageVersion::parse("1.0_1"),
            Err(BuildDepError::UpstreamVersionIllegalChar(_))
        ));
        assert!(matches!(
            PackageVersion::parse("1.0-"),
            Err(BuildDepError::DebianRevisionIllegalChar(_))
        ));

        Ok(())
    }

    #[test]
    fn ordering() -> Result<()> {
        let ordered = [
            "1.0~rc1",
            "1.0",
            "1.0-1",
            "1.0a",
            "1.0+b1",
            "1.00.1",
            "1.2",
            "1.10",
            "2:0.1",
        ];

        for window in ordered.windows(2) {
            let a = PackageVersion::parse(window[0])?;
            let b = PackageVersion::parse(window[1])?;
            assert!(a < b, "{} < {}", window[0], window[1]);
            assert_eq!(compare_versions(window[0], window[1]), Ordering::Less);
        }

        assert_eq!(compare_versions("1.0", "1.0-0"), Ordering::Equal);
        assert_eq!(compare_versions("0:1.0", "1.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.001", "1.1"), Ordering::Equal);
        assert_eq!(compare_versions("~~", "~~a"), Ordering::Less);
        assert_eq!(compare_versions("~", ""), Ordering::Less);

        Ok(())
    }

    #[test]
    fn constraints() {
        assert!(check_constraint("1.2", None, ""));
        assert!(check_constraint(
            "1.2",
            Some(VersionRelationship::LaterOrEqual),
            "1.2"
        ));
        assert!(!check_constraint(
            "1.2",
            Some(VersionRelationship::StrictlyLater),
            "1.2"
        ));
        assert!(check_constraint(
            "1.1",
            Some(VersionRelationship::StrictlyEarlier),
            "1.2"
        ));
        assert!(!check_constraint(
            "1.3",
            Some(VersionRelationship::EarlierOrEqual),
            "1.2"
        ));
        assert!(check_constraint(
            "1:1.0",
            Some(VersionRelationship::StrictlyLater),
            "2.0"
        ));
        assert!(check_constraint(
            "2.0-1",
            Some(VersionRelationship::ExactlyEqual),
            "2.0-1"
        ));
    }

    #[test]
    fn operators() {
        assert_eq!(
            VersionRelationship::from_operator("<"),
            Some(VersionRelationship::EarlierOrEqual)
        );
        assert_eq!(
            VersionRelationship::from_operator(">"),
            Some(VersionRelationship::LaterOrEqual)
        );
        assert_eq!(VersionRelationship::from_operator("=>"), None);
        assert_eq!(VersionRelationship::StrictlyEarlier.to_string(), "<<");
    }
}
