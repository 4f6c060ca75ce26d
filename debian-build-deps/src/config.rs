// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Resolver configuration.

Configuration is gathered into a [ConfigStore], a hierarchical key/value
store modeled after apt's configuration space. Keys are `::` separated and
case-insensitive (`APT::Get::Purge`). Values are scalars or lists.

YAML documents populate the store by flattening nested mappings:

```yaml
APT:
  Architecture: amd64
  Architectures: [amd64, arm64]
  Build-Essential:
    - build-essential
  Get:
    Purge: true
```

The store is then converted once into a [ResolverConfig], the explicit
value handed to resolution.
*/

use {
    crate::{
        architecture::default_native_architecture,
        error::{BuildDepError, Result},
    },
    serde_yaml::Value,
    std::{
        collections::BTreeMap,
        io::Read,
        path::{Path, PathBuf},
    },
};

pub const KEY_ARCHITECTURE: &str = "APT::Architecture";
pub const KEY_ARCHITECTURES: &str = "APT::Architectures";
pub const KEY_HOST_ARCHITECTURE: &str = "APT::Get::Host-Architecture";
pub const KEY_BUILD_PROFILES: &str = "APT::Build-Profiles";
pub const KEY_ARCH_ONLY: &str = "APT::Get::Arch-Only";
pub const KEY_PURGE: &str = "APT::Get::Purge";
pub const KEY_BUILD_DEP_AUTOMATIC: &str = "APT::Get::Build-Dep-Automatic";
pub const KEY_BUILD_ESSENTIAL: &str = "APT::Build-Essential";
pub const KEY_SOLVER: &str = "APT::Solver";
pub const KEY_DEBUG_BUILD_DEPS: &str = "Debug::BuildDeps";
pub const KEY_STATUS_FILE: &str = "Dir::State::status";
pub const KEY_LISTS_DIR: &str = "Dir::State::Lists";

/// The only solver implementation available.
pub const INTERNAL_SOLVER: &str = "internal";

#[derive(Clone, Debug, Eq, PartialEq)]
enum ConfigValue {
    Scalar(String),
    List(Vec<String>),
}

/// Hierarchical key/value configuration store.
#[derive(Clone, Debug, Default)]
pub struct ConfigStore {
    values: BTreeMap<String, ConfigValue>,
}

fn normalize_key(key: &str) -> String {
    key.trim().trim_end_matches("::").to_ascii_lowercase()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" | "enable" => Ok(true),
        "false" | "no" | "off" | "0" | "disable" => Ok(false),
        _ => Err(BuildDepError::ConfigValue(
            key.to_string(),
            value.to_string(),
        )),
    }
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a scalar value, replacing any existing value.
    pub fn set(&mut self, key: &str, value: impl ToString) {
        self.values
            .insert(normalize_key(key), ConfigValue::Scalar(value.to_string()));
    }

    /// Set a list value, replacing any existing value.
    pub fn set_list(&mut self, key: &str, values: impl IntoIterator<Item = impl ToString>) {
        self.values.insert(
            normalize_key(key),
            ConfigValue::List(values.into_iter().map(|v| v.to_string()).collect()),
        );
    }

    /// Append a value to a list.
    ///
    /// An existing scalar value becomes the first list element.
    pub fn append(&mut self, key: &str, value: impl ToString) {
        let key = normalize_key(key);

        let mut values = match self.values.remove(&key) {
            Some(ConfigValue::List(values)) => values,
            Some(ConfigValue::Scalar(existing)) => vec![existing],
            None => vec![],
        };
        values.push(value.to_string());

        self.values.insert(key, ConfigValue::List(values));
    }

    /// Remove a key.
    pub fn clear(&mut self, key: &str) {
        self.values.remove(&normalize_key(key));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(&normalize_key(key))
    }

    /// Obtain a scalar value.
    ///
    /// Empty values are treated as absent.
    pub fn find(&self, key: &str) -> Option<&str> {
        match self.values.get(&normalize_key(key)) {
            Some(ConfigValue::Scalar(v)) if !v.trim().is_empty() => Some(v.trim()),
            _ => None,
        }
    }

    /// Obtain a boolean value, falling back to a default when not set.
    pub fn find_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.find(key) {
            Some(value) => parse_bool(key, value),
            None => Ok(default),
        }
    }

    /// Obtain a list value.
    ///
    /// Scalar values are split on commas and whitespace.
    pub fn find_list(&self, key: &str) -> Option<Vec<String>> {
        match self.values.get(&normalize_key(key))? {
            ConfigValue::List(values) => Some(values.clone()),
            ConfigValue::Scalar(value) => Some(
                value
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|x| !x.is_empty())
                    .map(|x| x.to_string())
                    .collect(),
            ),
        }
    }

    /// Apply a `KEY=VALUE` option string.
    ///
    /// `KEY::=VALUE` appends to a list. An empty value clears the key.
    pub fn apply_option(&mut self, option: &str) -> Result<()> {
        let (key, value) = option
            .split_once('=')
            .ok_or_else(|| BuildDepError::ConfigOptionSyntax(option.to_string()))?;

        if key.trim().is_empty() {
            return Err(BuildDepError::ConfigOptionSyntax(option.to_string()));
        }

        if let Some(key) = key.strip_suffix("::") {
            self.append(key, value.trim());
        } else if value.trim().is_empty() {
            self.clear(key);
        } else {
            self.set(key, value.trim());
        }

        Ok(())
    }

    /// Merge a YAML document into this store.
    pub fn merge_yaml_reader(&mut self, reader: impl Read) -> Result<()> {
        let value: Value = serde_yaml::from_reader(reader)?;

        match value {
            Value::Null | Value::Mapping(_) => self.merge_yaml_value("", &value),
            _ => Err(BuildDepError::ConfigValue(
                "<root>".to_string(),
                "expected a mapping".to_string(),
            )),
        }
    }

    pub fn merge_yaml_str(&mut self, s: &str) -> Result<()> {
        self.merge_yaml_reader(s.as_bytes())
    }

    /// Merge a YAML file into this store.
    pub fn merge_yaml_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let fh = std::fs::File::open(path.as_ref())?;

        self.merge_yaml_reader(std::io::BufReader::new(fh))
    }

    fn merge_yaml_value(&mut self, prefix: &str, value: &Value) -> Result<()> {
        match value {
            Value::Null => {}
            Value::Mapping(map) => {
                for (k, v) in map {
                    let k = yaml_scalar(prefix, k)?;
                    let key = if prefix.is_empty() {
                        k
                    } else {
                        format!("{}::{}", prefix, k)
                    };

                    self.merge_yaml_value(&key, v)?;
                }
            }
            Value::Sequence(values) => {
                let values = values
                    .iter()
                    .map(|v| yaml_scalar(prefix, v))
                    .collect::<Result<Vec<_>>>()?;

                self.set_list(prefix, values);
            }
            scalar => {
                let value = yaml_scalar(prefix, scalar)?;
                self.set(prefix, value);
            }
        }

        Ok(())
    }
}

fn yaml_scalar(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(BuildDepError::ConfigValue(
            key.to_string(),
            "expected a scalar value".to_string(),
        )),
    }
}

/// Explicit configuration for resolving build dependencies.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolverConfig {
    /// Architecture of the build machine.
    pub native_architecture: String,
    /// All architectures package information is available for, in preference order.
    pub architectures: Vec<String>,
    /// Architecture being built for, when cross building.
    pub host_architecture: Option<String>,
    /// Active build profiles.
    pub build_profiles: Vec<String>,
    /// Ignore the `-Indep` fields.
    pub arch_only: bool,
    /// Purge instead of remove when removing conflicting packages.
    pub purge: bool,
    /// Mark installed build dependencies as automatically installed.
    pub build_dep_automatic: bool,
    /// Packages implicitly required to build anything.
    pub build_essential: Vec<String>,
    /// Emit a trace of every resolution step.
    pub debug: bool,
    /// Name of the constraint solver.
    pub solver: String,
    /// Path to the dpkg status database.
    pub status_file: PathBuf,
    /// Directory holding apt `Packages` indices.
    pub lists_dir: PathBuf,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        let native = default_native_architecture().to_string();

        Self {
            native_architecture: native.clone(),
            architectures: vec![native],
            host_architecture: None,
            build_profiles: vec![],
            arch_only: false,
            purge: false,
            build_dep_automatic: false,
            build_essential: vec!["build-essential".to_string()],
            debug: false,
            solver: INTERNAL_SOLVER.to_string(),
            status_file: PathBuf::from("/var/lib/dpkg/status"),
            lists_dir: PathBuf::from("/var/lib/apt/lists"),
        }
    }
}

impl ResolverConfig {
    /// Derive a configuration from a store, applying defaults for unset keys.
    pub fn from_store(store: &ConfigStore) -> Result<Self> {
        let defaults = Self::default();

        let native_architecture = store
            .find(KEY_ARCHITECTURE)
            .map(|x| x.to_string())
            .unwrap_or(defaults.native_architecture);

        let mut architectures = store
            .find_list(KEY_ARCHITECTURES)
            .unwrap_or_default();
        if !architectures.contains(&native_architecture) {
            architectures.insert(0, native_architecture.clone());
        }

        let host_architecture = store.find(KEY_HOST_ARCHITECTURE).map(|x| x.to_string());

        if let Some(host) = &host_architecture {
            if !architectures.contains(host) {
                return Err(BuildDepError::NoArchitectureInformation(host.clone()));
            }
        }

        let solver = store
            .find(KEY_SOLVER)
            .map(|x| x.to_string())
            .unwrap_or(defaults.solver);
        if solver != INTERNAL_SOLVER {
            return Err(BuildDepError::UnsupportedSolver(solver));
        }

        Ok(Self {
            native_architecture,
            architectures,
            host_architecture,
            build_profiles: store.find_list(KEY_BUILD_PROFILES).unwrap_or_default(),
            arch_only: store.find_bool(KEY_ARCH_ONLY, defaults.arch_only)?,
            purge: store.find_bool(KEY_PURGE, defaults.purge)?,
            build_dep_automatic: store
                .find_bool(KEY_BUILD_DEP_AUTOMATIC, defaults.build_dep_automatic)?,
            build_essential: store
                .find_list(KEY_BUILD_ESSENTIAL)
                .unwrap_or(defaults.build_essential),
            debug: store.find_bool(KEY_DEBUG_BUILD_DEPS, defaults.debug)?,
            solver,
            status_file: store
                .find(KEY_STATUS_FILE)
                .map(PathBuf::from)
                .unwrap_or(defaults.status_file),
            lists_dir: store
                .find(KEY_LISTS_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.lists_dir),
        })
    }

    /// The architecture packages are being built for.
    ///
    /// This is the host architecture when cross building and the native architecture
    /// otherwise.
    pub fn host_architecture(&self) -> &str {
        self.host_architecture
            .as_deref()
            .unwrap_or(&self.native_architecture)
    }

    /// Whether a host architecture was declared.
    pub fn has_host_architecture(&self) -> bool {
        self.host_architecture.is_some()
    }

    /// Whether the host architecture differs from the native one.
    pub fn is_cross(&self) -> bool {
        self.host_architecture() != self.native_architecture
    }
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    #[test]
    fn store_keys_case_insensitive() {
        let mut store = ConfigStore::new();
        store.set("APT::Get::Purge", "true");

        assert_eq!(store.find("apt::get::purge"), Some("true"));
        assert!(store.contains("APT::GET::PURGE"));
        assert_eq!(store.find("APT::Get"), None);
    }

    #[test]
    fn options() -> Result<()> {
        let mut store = ConfigStore::new();
        store.apply_option("APT::Get::Host-Architecture=arm64")?;
        store.apply_option("APT::Build-Essential::=build-essential")?;
        store.apply_option("APT::Build-Essential::=fakeroot")?;
        store.apply_option("Debug::BuildDeps=yes")?;

        assert_eq!(store.find(KEY_HOST_ARCHITECTURE), Some("arm64"));
        assert_eq!(
            store.find_list(KEY_BUILD_ESSENTIAL),
            Some(vec!["build-essential".to_string(), "fakeroot".to_string()])
        );
        assert!(store.find_bool(KEY_DEBUG_BUILD_DEPS, false)?);

        store.apply_option("APT::Build-Essential=")?;
        assert_eq!(store.find_list(KEY_BUILD_ESSENTIAL), None);

        assert!(matches!(
            store.apply_option("no-equals"),
            Err(BuildDepError::ConfigOptionSyntax(_))
        ));
        assert!(matches!(
            store.apply_option("=value"),
            Err(BuildDepError::ConfigOptionSyntax(_))
        ));

        Ok(())
    }

    #[test]
    fn booleans() -> Result<()> {
        let mut store = ConfigStore::new();
        for (value, expected) in [("on", true), ("Disable", false), ("0", false), ("YES", true)] {
            store.set(KEY_PURGE, value);
            assert_eq!(store.find_bool(KEY_PURGE, !expected)?, expected);
        }

        store.set(KEY_PURGE, "maybe");
        assert!(matches!(
            store.find_bool(KEY_PURGE, false),
            Err(BuildDepError::ConfigValue(_, _))
        ));

        Ok(())
    }

    #[test]
    fn yaml_flattening() -> Result<()> {
        let mut store = ConfigStore::new();
        store.merge_yaml_str(indoc! {"
            APT:
              Architecture: amd64
              Architectures: [amd64, i386]
              Build-Profiles: nocheck,nodoc
              Get:
                Purge: true
                Host-Architecture: i386
            Debug::BuildDeps: 1
        "})?;

        assert_eq!(store.find(KEY_ARCHITECTURE), Some("amd64"));
        assert_eq!(
            store.find_list(KEY_ARCHITECTURES),
            Some(vec!["amd64".to_string(), "i386".to_string()])
        );
        assert_eq!(
            store.find_list(KEY_BUILD_PROFILES),
            Some(vec!["nocheck".to_string(), "nodoc".to_string()])
        );
        assert!(store.find_bool(KEY_PURGE, false)?);
        assert!(store.find_bool(KEY_DEBUG_BUILD_DEPS, false)?);

        let config = ResolverConfig::from_store(&store)?;
        assert_eq!(config.native_architecture, "amd64");
        assert_eq!(config.host_architecture(), "i386");
        assert!(config.is_cross());
        assert!(config.purge);
        assert!(config.debug);
        assert_eq!(config.build_essential, vec!["build-essential".to_string()]);

        assert!(ConfigStore::new().merge_yaml_str("- not a mapping").is_err());

        Ok(())
    }

    #[test]
    fn resolver_config_defaults() -> Result<()> {
        let config = ResolverConfig::from_store(&ConfigStore::new())?;
        assert_eq!(config, ResolverConfig::default());
        assert!(!config.is_cross());
        assert!(!config.has_host_architecture());
        assert_eq!(config.host_architecture(), config.native_architecture);

        Ok(())
    }

    #[test]
    fn unknown_host_architecture() {
        let mut store = ConfigStore::new();
        store.set(KEY_ARCHITECTURE, "amd64");
        store.set(KEY_HOST_ARCHITECTURE, "mips");

        let err = ResolverConfig::from_store(&store).unwrap_err();
        assert!(matches!(err, BuildDepError::NoArchitectureInformation(ref a) if a == "mips"));
        assert_eq!(
            err.to_string(),
            "No architecture information available for mips. See apt.conf(5) APT::Architectures for setup"
        );
    }

    #[test]
    fn unsupported_solver() {
        let mut store = ConfigStore::new();
        store.set(KEY_SOLVER, "aspcud");

        assert!(matches!(
            ResolverConfig::from_store(&store),
            Err(BuildDepError::UnsupportedSolver(_))
        ));
    }
}
