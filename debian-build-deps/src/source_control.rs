// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Extraction of build relationships from source package control files. */

use {
    crate::{
        config::ResolverConfig,
        control::{cleartext_reader, ControlParagraphReader},
        dependency::{
            parse_build_dependency_field, AlternativeGroup, BuildDependencyField,
            DependencyClause, ParseOptions,
        },
        error::{BuildDepError, Result},
    },
    std::{io::BufRead, path::Path},
};

/// Controls which build relationships are extracted and how they are parsed.
#[derive(Clone, Debug, Default)]
pub struct ExtractOptions {
    /// Skip `Build-Depends-Indep` and `Build-Conflicts-Indep`.
    pub arch_only: bool,
    pub parse: ParseOptions,
}

impl ExtractOptions {
    /// Derive options from a resolver configuration.
    ///
    /// Architecture qualifiers are only retained when a host architecture is declared.
    /// Restriction lists are evaluated against the host architecture.
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self {
            arch_only: config.arch_only,
            parse: ParseOptions {
                strip_multi_arch: !config.has_host_architecture(),
                architecture: Some(config.host_architecture().to_string()),
                profiles: Some(config.build_profiles.clone()),
            },
        }
    }
}

/// Read the build relationships of every paragraph in a control file.
///
/// Groups are returned in paragraph order, then field order (`Build-Depends`,
/// `Build-Depends-Indep`, `Build-Conflicts`, `Build-Conflicts-Indep`), then the
/// order they appear in the field.
///
/// PGP signed files such as `.dsc` are accepted. Their signatures are not verified.
pub fn read_build_dependencies<R: BufRead>(
    reader: R,
    options: &ExtractOptions,
) -> Result<Vec<AlternativeGroup>> {
    let mut groups = vec![];

    for para in ControlParagraphReader::new(cleartext_reader(reader)?) {
        let para = para?;

        for field in BuildDependencyField::values() {
            if options.arch_only && field.is_indep() {
                continue;
            }

            if let Some(value) = para.field_str(field.field_name()) {
                groups.extend(
                    parse_build_dependency_field(*field, value, &options.parse).map_err(|e| {
                        BuildDepError::DependencyParse(field.field_name().to_string(), Box::new(e))
                    })?,
                );
            }
        }
    }

    Ok(groups)
}

/// Read the build relationships from a control file on the filesystem.
///
/// The file is closed before this returns.
pub fn read_build_dependencies_file(
    path: &Path,
    options: &ExtractOptions,
) -> Result<Vec<AlternativeGroup>> {
    let fh = std::fs::File::open(path)?;

    read_build_dependencies(std::io::BufReader::new(fh), options)
}

/// Append a group for each build-essential package.
///
/// Build-essential packages are unversioned `Build-Depends-Indep` requirements
/// without alternatives. Empty names are ignored.
pub fn append_build_essential(groups: &mut Vec<AlternativeGroup>, packages: &[String]) {
    groups.extend(
        packages
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(|p| {
                AlternativeGroup::new(
                    BuildDependencyField::BuildDependsIndep,
                    vec![DependencyClause::unversioned(p)],
                )
            }),
    );
}

#[cfg(test)]
mod test {
    use {super::*, crate::dependency::format_groups, indoc::indoc, std::io::Cursor};

    const CONTROL: &str = indoc! {"
        Source: foo
        Build-Depends: debhelper-compat (= 13),
         libssl-dev:native,
         libsystemd-dev [linux-any],
         check <!nocheck>
        Build-Depends-Indep: python3-sphinx
        Build-Conflicts: autoconf2.13
        Build-Conflicts-Indep: texlive-base (<< 2020)

        Package: foo
        Architecture: any
        Depends: ${misc:Depends}

        Package: foo-doc
        Build-Depends: extra-tool
    "};

    fn read(options: &ExtractOptions) -> Result<Vec<AlternativeGroup>> {
        read_build_dependencies(Cursor::new(CONTROL.as_bytes()), options)
    }

    fn fields(groups: &[AlternativeGroup]) -> Vec<BuildDependencyField> {
        groups.iter().map(|g| g.field).collect()
    }

    #[test]
    fn extract_all_fields() -> Result<()> {
        let groups = read(&ExtractOptions::from_config(&ResolverConfig {
            native_architecture: "amd64".into(),
            ..Default::default()
        }))?;

        assert_eq!(
            format_groups(&groups),
            "debhelper-compat (= 13), libssl-dev, libsystemd-dev, check, python3-sphinx, autoconf2.13, texlive-base (<< 2020), extra-tool"
        );
        assert_eq!(
            fields(&groups),
            vec![
                BuildDependencyField::BuildDepends,
                BuildDependencyField::BuildDepends,
                BuildDependencyField::BuildDepends,
                BuildDependencyField::BuildDepends,
                BuildDependencyField::BuildDependsIndep,
                BuildDependencyField::BuildConflicts,
                BuildDependencyField::BuildConflictsIndep,
                BuildDependencyField::BuildDepends,
            ]
        );

        Ok(())
    }

    #[test]
    fn arch_only_and_profiles() -> Result<()> {
        let groups = read(&ExtractOptions::from_config(&ResolverConfig {
            native_architecture: "amd64".into(),
            arch_only: true,
            build_profiles: vec!["nocheck".into()],
            ..Default::default()
        }))?;

        assert_eq!(
            format_groups(&groups),
            "debhelper-compat (= 13), libssl-dev, libsystemd-dev, autoconf2.13, extra-tool"
        );
        assert!(groups.iter().all(|g| !g.field.is_indep()));

        Ok(())
    }

    #[test]
    fn cross_keeps_qualifiers() -> Result<()> {
        let groups = read(&ExtractOptions::from_config(&ResolverConfig {
            native_architecture: "amd64".into(),
            architectures: vec!["amd64".into(), "hurd-i386".into()],
            host_architecture: Some("hurd-i386".into()),
            ..Default::default()
        }))?;

        assert_eq!(groups[1].alternatives[0].package, "libssl-dev:native");
        // libsystemd-dev is restricted to Linux.
        assert_eq!(groups[2].alternatives[0].package, "check");

        Ok(())
    }

    #[test]
    fn parse_errors_name_field() {
        let err = read_build_dependencies(
            Cursor::new(b"Source: foo\nBuild-Conflicts: bar (>= 1\n".as_ref()),
            &ExtractOptions::default(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            BuildDepError::DependencyParse(ref field, _) if field == "Build-Conflicts"
        ));
        assert!(err
            .to_string()
            .starts_with("Problem parsing dependency Build-Conflicts"));
    }

    #[test]
    fn no_build_relationships() -> Result<()> {
        let groups = read_build_dependencies(
            Cursor::new(b"Source: foo\n\nPackage: foo\n".as_ref()),
            &ExtractOptions::default(),
        )?;
        assert!(groups.is_empty());

        Ok(())
    }

    #[test]
    fn build_essential() {
        let mut groups = vec![AlternativeGroup::new(
            BuildDependencyField::BuildDepends,
            vec![DependencyClause::unversioned("a")],
        )];

        append_build_essential(
            &mut groups,
            &["build-essential".to_string(), "".to_string(), "fakeroot".to_string()],
        );

        assert_eq!(format_groups(&groups), "a, build-essential, fakeroot");
        assert_eq!(groups[1].field, BuildDependencyField::BuildDependsIndep);
        assert_eq!(groups[2].alternatives.len(), 1);
        assert!(!groups[2].alternatives[0].is_versioned());
    }

    #[test]
    fn read_file() -> Result<()> {
        let td = tempfile::Builder::new()
            .prefix("debian-build-deps-")
            .tempdir()?;
        let path = td.path().join("control");
        std::fs::write(&path, CONTROL)?;

        assert_eq!(
            read_build_dependencies_file(&path, &ExtractOptions::default())?.len(),
            8
        );
        assert!(matches!(
            read_build_dependencies_file(&td.path().join("missing"), &ExtractOptions::default()),
            Err(BuildDepError::Io(_))
        ));

        let dsc = td.path().join("hello_2.10-2.dsc");
        std::fs::write(&dsc, include_str!("testdata/hello.dsc"))?;
        assert_eq!(
            format_groups(&read_build_dependencies_file(&dsc, &ExtractOptions::default())?),
            "debhelper-compat (= 13)"
        );

        Ok(())
    }
}
