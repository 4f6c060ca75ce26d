// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{Arg, ArgMatches, Command},
    debian_build_deps::{
        config::{
            ConfigStore, ResolverConfig, KEY_ARCH_ONLY, KEY_BUILD_PROFILES,
            KEY_HOST_ARCHITECTURE, KEY_PURGE, KEY_SOLVER,
        },
        error::BuildDepError,
        package_index::PackageCache,
        resolver::BuildDepResolver,
        solver::DependencySolver,
    },
    log::{debug, LevelFilter},
    std::{io::Write, path::PathBuf},
    thiserror::Error,
};

pub const EXIT_ERROR: i32 = 100;
pub const EXIT_USAGE: i32 = 2;

const ABOUT: &str = "\
Compute the packages needed to build Debian source packages.

Each argument is a control file declaring build relationships: a .dsc file or
a debian/control file. Build-Depends, Build-Depends-Indep, Build-Conflicts and
Build-Conflicts-Indep are resolved against the dpkg status database and the
apt package lists, like `apt-get build-dep` would.

Nothing is installed. When every file resolves, the packages that would be
newly installed are printed to stdout, one per line, as
`name:architecture=version`.

Configuration uses apt-style keys (e.g. `APT::Get::Purge`). Keys can be loaded
from a YAML file with --config-file, where nested mappings form `::` separated
keys, and set individually with --option KEY=VALUE. `KEY::=VALUE` appends a
value to a list. Command line flags override the configuration file.

The exit code is 0 on success and 100 if any file could not be resolved.
";

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    BuildDep(#[from] BuildDepError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;

fn command() -> Command<'static> {
    Command::new("apt-resolve-dep")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Resolve Debian build dependencies")
        .long_about(ABOUT)
        .arg(
            Arg::new("host-architecture")
                .short('a')
                .long("host-architecture")
                .takes_value(true)
                .value_name("ARCH")
                .help("Architecture the packages are built for"),
        )
        .arg(
            Arg::new("build-profiles")
                .short('P')
                .long("build-profiles")
                .takes_value(true)
                .value_name("LIST")
                .help("Comma separated build profiles to activate"),
        )
        .arg(
            Arg::new("arch-only")
                .long("arch-only")
                .help("Ignore Build-Depends-Indep and Build-Conflicts-Indep"),
        )
        .arg(
            Arg::new("purge")
                .long("purge")
                .help("Purge rather than remove conflicting packages"),
        )
        .arg(
            Arg::new("solver")
                .long("solver")
                .takes_value(true)
                .value_name("NAME")
                .help("Dependency solver to use"),
        )
        .arg(
            Arg::new("config-file")
                .short('c')
                .long("config-file")
                .takes_value(true)
                .allow_invalid_utf8(true)
                .value_name("PATH")
                .help("YAML file with configuration values"),
        )
        .arg(
            Arg::new("option")
                .short('o')
                .long("option")
                .takes_value(true)
                .number_of_values(1)
                .multiple_occurrences(true)
                .value_name("KEY=VALUE")
                .help("Set a configuration value"),
        )
        .arg(
            Arg::new("keep-going")
                .long("keep-going")
                .help("Continue with remaining files after a failure"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        )
        .arg(
            Arg::new("control-files")
                .value_name("CONTROLFILE")
                .multiple_values(true)
                .allow_invalid_utf8(true)
                .help("Source package control files to resolve"),
        )
}

/// Assemble the configuration store from the config file, flags and environment.
fn config_store(args: &ArgMatches) -> Result<ConfigStore> {
    let mut store = ConfigStore::new();

    if let Some(path) = args.value_of_os("config-file") {
        store.merge_yaml_file(path)?;
    }

    if let Some(value) = args.value_of("host-architecture") {
        store.set(KEY_HOST_ARCHITECTURE, value);
    }
    if let Some(value) = args.value_of("build-profiles") {
        store.set(KEY_BUILD_PROFILES, value);
    }
    if args.is_present("arch-only") {
        store.set(KEY_ARCH_ONLY, "true");
    }
    if args.is_present("purge") {
        store.set(KEY_PURGE, "true");
    }
    if let Some(value) = args.value_of("solver") {
        store.set(KEY_SOLVER, value);
    }

    if let Some(options) = args.values_of("option") {
        for option in options {
            store.apply_option(option)?;
        }
    }

    if !store.contains(KEY_BUILD_PROFILES) {
        if let Ok(profiles) = std::env::var("DEB_BUILD_PROFILES") {
            store.set(KEY_BUILD_PROFILES, profiles);
        }
    }

    Ok(store)
}

fn init_logging(args: &ArgMatches, config: &ResolverConfig) {
    let log_level = match args.occurrences_of("verbose") {
        0 if config.debug => LevelFilter::Debug,
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();
}

fn print_error(err: &BuildDepError) {
    eprintln!("E: {}", err);

    if !err.explanation().is_empty() {
        eprintln!("The following packages have unmet dependencies:");
        for line in err.explanation() {
            eprintln!("{}", line);
        }
    }
}

/// Resolve every control file, writing planned installs to `stdout`.
///
/// Returns the process exit code.
fn resolve_files(
    args: &ArgMatches,
    config: &ResolverConfig,
    files: &[PathBuf],
    stdout: &mut impl Write,
) -> Result<i32> {
    let cache = PackageCache::load_system(config)?;
    let mut solver = DependencySolver::new(&cache);
    let mut resolver = BuildDepResolver::new(config, &cache, &mut solver);

    let keep_going = args.is_present("keep-going");
    let mut failed = false;

    for path in files {
        debug!("resolving build dependencies of {}", path.display());

        if let Err(err) = resolver.resolve_file(path) {
            print_error(&err);
            failed = true;

            if !keep_going {
                break;
            }
        }
    }

    if failed {
        return Ok(EXIT_ERROR);
    }

    for install in resolver.planned_installs() {
        writeln!(stdout, "{}", install)?;
    }

    Ok(0)
}

fn run(args: &ArgMatches, stdout: &mut impl Write, init_logger: bool) -> Result<i32> {
    let files = args
        .values_of_os("control-files")
        .map(|values| values.map(PathBuf::from).collect::<Vec<_>>())
        .unwrap_or_default();

    if files.is_empty() {
        eprintln!("E: no control files specified");
        return Ok(EXIT_USAGE);
    }

    let config = ResolverConfig::from_store(&config_store(args)?)?;

    if init_logger {
        init_logging(args, &config);
    }

    resolve_files(args, &config, &files, stdout)
}

pub fn run_cli() -> Result<i32> {
    let matches = command().get_matches();

    run(&matches, &mut std::io::stdout().lock(), true)
}
