// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Index of binary packages known to the system.

The index models the view apt has of the world: every `(name, architecture)`
pair is a package, which may have an installed version and a candidate
version (the version that would be installed). Packages sharing a name across
architectures form a group. Names only ever mentioned in `Provides` fields
exist as virtual packages without versions.

[PackageCache] is an in-memory index populated from the dpkg status database
and apt `Packages` indices.
*/

use {
    crate::{
        architecture::MultiArch,
        config::ResolverConfig,
        control::{ControlParagraph, ControlParagraphReader},
        dependency::{parse_alternatives, DependencyClause, ParseOptions},
        error::{BuildDepError, Result},
        package_version::{compare_versions, PackageVersion},
    },
    log::{debug, warn},
    std::{
        cmp::Ordering,
        collections::HashMap,
        io::BufRead,
        path::Path,
    },
};

/// Identifies a package within an index.
pub type PackageId = usize;

/// A concrete version of a binary package.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BinaryVersion {
    pub version: String,
    /// The `Architecture` field value. May be `all`.
    pub architecture: String,
    pub multi_arch: MultiArch,
    /// `Pre-Depends` followed by `Depends`.
    pub depends: Vec<Vec<DependencyClause>>,
    /// `Conflicts` followed by `Breaks`.
    pub conflicts: Vec<DependencyClause>,
    pub provides: Vec<DependencyClause>,
}

impl BinaryVersion {
    /// Construct an instance from a `Packages` or `status` paragraph.
    pub fn from_paragraph(para: &ControlParagraph, native_architecture: &str) -> Result<Self> {
        let options = ParseOptions::default();

        let mut depends = vec![];
        for field in ["Pre-Depends", "Depends"] {
            if let Some(value) = para.field_str(field) {
                depends.extend(parse_alternatives(value, &options)?);
            }
        }

        let mut conflicts = vec![];
        for field in ["Conflicts", "Breaks"] {
            if let Some(value) = para.field_str(field) {
                conflicts.extend(parse_alternatives(value, &options)?.into_iter().flatten());
            }
        }

        let provides = match para.field_str("Provides") {
            Some(value) => parse_alternatives(
                value,
                &ParseOptions {
                    strip_multi_arch: true,
                    ..Default::default()
                },
            )?
            .into_iter()
            .flatten()
            .collect(),
            None => vec![],
        };

        let architecture = para
            .field_str("Architecture")
            .unwrap_or(native_architecture)
            .to_string();

        Ok(Self {
            version: para.required_field_str("Version")?.to_string(),
            multi_arch: MultiArch::from_fields(&architecture, para.field_str("Multi-Arch")),
            architecture,
            depends,
            conflicts,
            provides,
        })
    }

    /// Whether this version provides `name` in a way satisfying `clause`.
    ///
    /// Unversioned provides only satisfy unversioned dependencies.
    pub fn provides_for(&self, clause: &DependencyClause) -> bool {
        self.provides.iter().any(|provided| {
            provided.package == clause.name()
                && (!clause.is_versioned()
                    || (provided.is_versioned() && clause.satisfied_by(&provided.version)))
        })
    }
}

/// A binary package: a name on a specific architecture.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BinaryPackage {
    pub name: String,
    pub architecture: String,
    pub installed: Option<BinaryVersion>,
    pub candidate: Option<BinaryVersion>,
}

impl BinaryPackage {
    /// The `name:architecture` form used in output and messages.
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.name, self.architecture)
    }

    /// Whether any real version of this package exists.
    ///
    /// Purely virtual packages have no versions.
    pub fn has_versions(&self) -> bool {
        self.installed.is_some() || self.candidate.is_some()
    }
}

/// Read access to the set of known packages.
pub trait PackageIndex {
    fn native_architecture(&self) -> &str;

    /// All architectures in preference order. The native architecture comes first.
    fn architectures(&self) -> &[String];

    /// Resolve a package id.
    ///
    /// Ids are only valid for the index that issued them.
    fn package(&self, id: PackageId) -> &BinaryPackage;

    /// Find the package with the given name on an architecture.
    ///
    /// `all` resolves to the native architecture.
    fn find_package(&self, name: &str, architecture: &str) -> Option<PackageId>;

    /// Number of packages. Ids range from `0` up to this value.
    fn package_count(&self) -> usize;

    /// All packages sharing a name, across architectures.
    fn group(&self, name: &str) -> Vec<PackageId>;

    /// Real packages whose installed or candidate version provides this package's name
    /// on its architecture.
    fn providers(&self, id: PackageId) -> Vec<PackageId>;

    /// The package of a group to use when no architecture is requested.
    ///
    /// Prefers the native architecture, then the configured architectures in order.
    fn preferred_package(&self, name: &str) -> Option<PackageId> {
        let rank = |id: &PackageId| {
            let arch = &self.package(*id).architecture;

            self.architectures()
                .iter()
                .position(|a| a == arch)
                .unwrap_or(usize::MAX)
        };

        self.group(name).into_iter().min_by_key(rank)
    }
}

/// An in-memory [PackageIndex].
#[derive(Clone, Debug)]
pub struct PackageCache {
    architectures: Vec<String>,
    packages: Vec<BinaryPackage>,
    groups: HashMap<String, Vec<PackageId>>,
    provided_by: HashMap<PackageId, Vec<PackageId>>,
}

impl PackageCache {
    /// Construct an empty cache.
    ///
    /// `architectures` must start with the native architecture.
    pub fn new(architectures: Vec<String>) -> Self {
        Self {
            architectures,
            packages: vec![],
            groups: HashMap::new(),
            provided_by: HashMap::new(),
        }
    }

    /// Construct a cache from the system package databases named by a configuration.
    ///
    /// A missing status file or lists directory results in an empty view of that source.
    pub fn load_system(config: &ResolverConfig) -> Result<Self> {
        let mut architectures = vec![config.native_architecture.clone()];
        architectures.extend(
            config
                .architectures
                .iter()
                .filter(|a| **a != config.native_architecture)
                .cloned(),
        );

        let mut cache = Self::new(architectures);

        if config.status_file.exists() {
            cache.load_status_file(&config.status_file)?;
        } else {
            warn!(
                "dpkg status file {} does not exist; assuming nothing is installed",
                config.status_file.display()
            );
        }

        let pattern = format!("{}/*_Packages", config.lists_dir.display());
        for entry in glob::glob(&pattern)? {
            match entry {
                Ok(path) => cache.load_packages_file(&path)?,
                Err(e) => warn!("unable to read package list: {}", e),
            }
        }

        debug!("package cache has {} packages", cache.packages.len());

        Ok(cache)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    fn native(&self) -> &str {
        &self.architectures[0]
    }

    fn ensure_package(&mut self, name: &str, architecture: &str) -> PackageId {
        if let Some(id) = self.find_package(name, architecture) {
            return id;
        }

        let architecture = if architecture == "all" {
            self.native().to_string()
        } else {
            architecture.to_string()
        };

        let id = self.packages.len();
        self.packages.push(BinaryPackage {
            name: name.to_string(),
            architecture,
            installed: None,
            candidate: None,
        });
        self.groups.entry(name.to_string()).or_default().push(id);

        id
    }

    /// Record the virtual packages a version provides.
    ///
    /// `Multi-Arch: foreign` providers satisfy dependencies from every architecture,
    /// so their virtual packages exist on all of them.
    fn register_provides(&mut self, provider: PackageId, version: &BinaryVersion) {
        let architectures = if version.multi_arch == MultiArch::Foreign {
            self.architectures.clone()
        } else {
            vec![self.packages[provider].architecture.clone()]
        };

        for provided in &version.provides {
            for architecture in &architectures {
                let virtual_id = self.ensure_package(&provided.package, architecture);
                let providers = self.provided_by.entry(virtual_id).or_default();

                if !providers.contains(&provider) {
                    providers.push(provider);
                }
            }
        }
    }

    fn parse_version(&self, para: &ControlParagraph) -> Result<Option<(String, BinaryVersion)>> {
        let name = para.required_field_str("Package")?.to_string();

        match BinaryVersion::from_paragraph(para, self.native()) {
            Ok(version) => {
                if version.architecture != "all"
                    && !self.architectures.contains(&version.architecture)
                {
                    return Ok(None);
                }

                if let Err(e) = PackageVersion::parse(&version.version) {
                    warn!("ignoring package {}: {}", name, e);
                    return Ok(None);
                }

                Ok(Some((name, version)))
            }
            Err(e @ BuildDepError::DependencyExpression(..)) => {
                warn!("ignoring package {}: {}", name, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn offer_candidate(&mut self, id: PackageId, version: BinaryVersion) {
        let replace = match &self.packages[id].candidate {
            Some(existing) => {
                compare_versions(&version.version, &existing.version) == Ordering::Greater
            }
            None => true,
        };

        if replace {
            self.register_provides(id, &version);
            self.packages[id].candidate = Some(version);
        }
    }

    /// Add a paragraph from an apt `Packages` index.
    pub fn add_available_paragraph(&mut self, para: &ControlParagraph) -> Result<()> {
        if let Some((name, version)) = self.parse_version(para)? {
            let id = self.ensure_package(&name, &version.architecture);
            self.offer_candidate(id, version);
        }

        Ok(())
    }

    /// Add a paragraph from the dpkg status database.
    ///
    /// Only packages whose status is `installed` are recorded as installed. The
    /// installed version also competes for candidate.
    pub fn add_status_paragraph(&mut self, para: &ControlParagraph) -> Result<()> {
        let installed = para
            .field_str("Status")
            .map(|s| s.split_ascii_whitespace().nth(2) == Some("installed"))
            .unwrap_or(false);

        if !installed {
            return Ok(());
        }

        if let Some((name, version)) = self.parse_version(para)? {
            let id = self.ensure_package(&name, &version.architecture);
            self.register_provides(id, &version);
            self.packages[id].installed = Some(version.clone());
            self.offer_candidate(id, version);
        }

        Ok(())
    }

    pub fn load_status<R: BufRead>(&mut self, reader: R) -> Result<()> {
        for para in ControlParagraphReader::new(reader) {
            self.add_status_paragraph(&para?)?;
        }

        Ok(())
    }

    pub fn load_packages<R: BufRead>(&mut self, reader: R) -> Result<()> {
        for para in ControlParagraphReader::new(reader) {
            self.add_available_paragraph(&para?)?;
        }

        Ok(())
    }

    pub fn load_status_file(&mut self, path: &Path) -> Result<()> {
        debug!("reading dpkg status from {}", path.display());
        let fh = std::fs::File::open(path)?;

        self.load_status(std::io::BufReader::new(fh))
    }

    pub fn load_packages_file(&mut self, path: &Path) -> Result<()> {
        debug!("reading package list {}", path.display());
        let fh = std::fs::File::open(path)?;

        self.load_packages(std::io::BufReader::new(fh))
    }
}

impl PackageIndex for PackageCache {
    fn native_architecture(&self) -> &str {
        self.native()
    }

    fn architectures(&self) -> &[String] {
        &self.architectures
    }

    fn package(&self, id: PackageId) -> &BinaryPackage {
        &self.packages[id]
    }

    fn find_package(&self, name: &str, architecture: &str) -> Option<PackageId> {
        let architecture = if architecture == "all" {
            self.native()
        } else {
            architecture
        };

        self.groups
            .get(name)?
            .iter()
            .copied()
            .find(|id| self.packages[*id].architecture == architecture)
    }

    fn package_count(&self) -> usize {
        self.packages.len()
    }

    fn group(&self, name: &str) -> Vec<PackageId> {
        self.groups.get(name).cloned().unwrap_or_default()
    }

    fn providers(&self, id: PackageId) -> Vec<PackageId> {
        let name = &self.packages[id].name;

        self.provided_by
            .get(&id)
            .map(|providers| {
                providers
                    .iter()
                    .copied()
                    .filter(|provider| {
                        let package = &self.packages[*provider];

                        [&package.installed, &package.candidate]
                            .into_iter()
                            .flatten()
                            .any(|v| v.provides.iter().any(|p| &p.package == name))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc, std::io::Cursor};

    const STATUS: &str = indoc! {"
        Package: make
        Status: install ok installed
        Architecture: amd64
        Multi-Arch: foreign
        Version: 4.3-4.1

        Package: libc6
        Status: install ok installed
        Architecture: amd64
        Multi-Arch: same
        Version: 2.36-9
        Depends: libgcc-s1

        Package: removed-pkg
        Status: deinstall ok config-files
        Architecture: amd64
        Version: 1.0
    "};

    const PACKAGES: &str = indoc! {"
        Package: make
        Architecture: amd64
        Version: 4.3-4.1
        Multi-Arch: foreign

        Package: make
        Architecture: amd64
        Version: 4.3-4

        Package: libc6
        Architecture: amd64
        Version: 2.36-9+deb12u1
        Multi-Arch: same
        Depends: libgcc-s1

        Package: libc6
        Architecture: arm64
        Version: 2.36-9+deb12u1
        Multi-Arch: same

        Package: libc6
        Architecture: mips
        Version: 2.36-9+deb12u1

        Package: mawk
        Architecture: amd64
        Version: 1.3.4
        Provides: awk

        Package: debhelper
        Architecture: all
        Version: 13.11.4
        Pre-Depends: dpkg (>= 1.16)
        Depends: perl:any, po-debconf | gettext
        Conflicts: dh-systemd (<< 13)

        Package: broken-deps
        Architecture: amd64
        Version: 1.0
        Depends: foo (>= 1.0

        Package: broken-version
        Architecture: amd64
        Version: a:1.0

        Package: original-awk
        Architecture: arm64
        Version: 2012-12-20
        Multi-Arch: foreign
        Provides: awk
    "};

    fn cache() -> Result<PackageCache> {
        let mut cache = PackageCache::new(vec!["amd64".into(), "arm64".into()]);
        cache.load_status(Cursor::new(STATUS.as_bytes()))?;
        cache.load_packages(Cursor::new(PACKAGES.as_bytes()))?;

        Ok(cache)
    }

    #[test]
    fn installed_and_candidates() -> Result<()> {
        let cache = cache()?;

        let make = cache.package(cache.find_package("make", "amd64").unwrap());
        assert_eq!(make.installed.as_ref().unwrap().version, "4.3-4.1");
        assert_eq!(make.candidate.as_ref().unwrap().version, "4.3-4.1");
        assert_eq!(make.candidate.as_ref().unwrap().multi_arch, MultiArch::Foreign);

        let libc = cache.package(cache.find_package("libc6", "amd64").unwrap());
        assert_eq!(libc.installed.as_ref().unwrap().version, "2.36-9");
        assert_eq!(libc.candidate.as_ref().unwrap().version, "2.36-9+deb12u1");

        assert!(cache.find_package("removed-pkg", "amd64").is_none());
        assert!(cache.find_package("libc6", "mips").is_none());
        assert_eq!(cache.group("libc6").len(), 2);
        assert!(cache.find_package("broken-deps", "amd64").is_none());
        assert!(cache.find_package("broken-version", "amd64").is_none());

        Ok(())
    }

    #[test]
    fn architecture_all() -> Result<()> {
        let cache = cache()?;

        let id = cache.find_package("debhelper", "all").unwrap();
        assert_eq!(cache.find_package("debhelper", "amd64"), Some(id));

        let debhelper = cache.package(id);
        assert_eq!(debhelper.full_name(), "debhelper:amd64");

        let version = debhelper.candidate.as_ref().unwrap();
        assert_eq!(version.architecture, "all");
        assert_eq!(version.multi_arch, MultiArch::All);
        assert_eq!(version.depends.len(), 3);
        assert_eq!(version.depends[0][0].package, "dpkg");
        assert_eq!(version.depends[1][0].package, "perl:any");
        assert_eq!(version.depends[2].len(), 2);
        assert_eq!(version.conflicts[0].package, "dh-systemd");

        Ok(())
    }

    #[test]
    fn virtual_packages() -> Result<()> {
        let cache = cache()?;

        let awk = cache.find_package("awk", "amd64").unwrap();
        assert!(!cache.package(awk).has_versions());

        let providers = cache
            .providers(awk)
            .into_iter()
            .map(|id| cache.package(id).full_name())
            .collect::<Vec<_>>();
        assert_eq!(providers, vec!["mawk:amd64", "original-awk:arm64"]);

        // Only foreign providers cross architectures.
        let awk = cache.find_package("awk", "arm64").unwrap();
        assert_eq!(
            cache
                .providers(awk)
                .into_iter()
                .map(|id| cache.package(id).full_name())
                .collect::<Vec<_>>(),
            vec!["original-awk:arm64"]
        );

        let make = cache.find_package("make", "amd64").unwrap();
        assert!(cache.providers(make).is_empty());

        Ok(())
    }

    #[test]
    fn preferred_package() -> Result<()> {
        let cache = cache()?;

        let libc = cache.preferred_package("libc6").unwrap();
        assert_eq!(cache.package(libc).architecture, "amd64");
        assert!(cache.preferred_package("missing").is_none());

        Ok(())
    }

    #[test]
    fn versioned_provides() {
        let version = BinaryVersion {
            version: "1.0".into(),
            architecture: "amd64".into(),
            multi_arch: MultiArch::No,
            depends: vec![],
            conflicts: vec![],
            provides: vec![
                DependencyClause::new(
                    "foo",
                    Some(crate::package_version::VersionRelationship::ExactlyEqual),
                    "2.0",
                ),
                DependencyClause::unversioned("bar"),
            ],
        };

        let ge = |name: &str, v: &str| {
            DependencyClause::new(
                name,
                Some(crate::package_version::VersionRelationship::LaterOrEqual),
                v,
            )
        };

        assert!(version.provides_for(&DependencyClause::unversioned("foo")));
        assert!(version.provides_for(&ge("foo", "1.5")));
        assert!(!version.provides_for(&ge("foo", "2.5")));
        assert!(version.provides_for(&DependencyClause::unversioned("bar:any")));
        assert!(!version.provides_for(&ge("bar", "1.0")));
    }

    #[test]
    fn load_system() -> Result<()> {
        let td = tempfile::Builder::new()
            .prefix("debian-build-deps-")
            .tempdir()?;

        let status = td.path().join("status");
        std::fs::write(&status, STATUS)?;

        let lists = td.path().join("lists");
        std::fs::create_dir(&lists)?;
        std::fs::write(
            lists.join("deb.debian.org_debian_dists_bookworm_main_binary-amd64_Packages"),
            PACKAGES,
        )?;
        std::fs::write(lists.join("deb.debian.org_debian_dists_bookworm_Release"), "")?;

        let config = ResolverConfig {
            native_architecture: "amd64".into(),
            architectures: vec!["amd64".into()],
            status_file: status,
            lists_dir: lists,
            ..Default::default()
        };

        let cache = PackageCache::load_system(&config)?;
        assert!(cache.find_package("mawk", "amd64").is_some());
        assert!(cache.find_package("libc6", "arm64").is_none());
        assert_eq!(
            cache
                .package(cache.find_package("make", "amd64").unwrap())
                .installed
                .as_ref()
                .unwrap()
                .version,
            "4.3-4.1"
        );

        Ok(())
    }
}
