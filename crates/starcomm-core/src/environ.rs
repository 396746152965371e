//! Child process environment for Starlink applications
//!
//! Starlink programs locate their packages, libraries and helper scripts
//! through environment variables that normally come from sourcing
//! `$STARLINK_DIR/etc/profile`. The table here reproduces the parts of that
//! profile the applications need, plus the ADAM settings that make them
//! non-interactive and point their parameter files at the session scratch
//! directory.

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Package directory variables, relative to the install root
pub const PACKAGE_DIRS: &[(&str, &str)] = &[
    ("ATOOLS_DIR", "bin/atools"),
    ("AUTOASTROM_DIR", "Perl/bin"),
    ("CCDPACK_DIR", "bin/ccdpack"),
    ("CONVERT_DIR", "bin/convert"),
    ("CUPID_DIR", "bin/cupid"),
    ("CURSA_DIR", "bin/cursa"),
    ("DAOPHOT_DIR", "bin/daophot"),
    ("DATACUBE_DIR", "bin/datacube"),
    ("DIPSO_DIR", "bin/dipso"),
    ("ECHOMOP_DIR", "bin/echomop"),
    ("ESP_DIR", "bin/esp"),
    ("EXTRACTOR_DIR", "bin/extractor"),
    ("FIG_DIR", "bin/figaro"),
    ("FLUXES_DIR", "bin/fluxes"),
    ("FROG_DIR", "starjava/bin/frog"),
    ("GAIA_DIR", "bin/gaia"),
    ("HDSTOOLS_DIR", "bin/hdstools"),
    ("HDSTRACE_DIR", "bin"),
    ("KAPPA_DIR", "bin/kappa"),
    ("ORAC_DIR", "bin/oracdr/src"),
    ("PAMELA_DIR", "bin/pamela"),
    ("PERIOD_DIR", "bin/period"),
    ("PGPLOT_DIR", "bin"),
    ("PHOTOM_DIR", "bin/photom"),
    ("PISA_DIR", "bin/pisa"),
    ("POLPACK_DIR", "bin/polpack"),
    ("SMURF_DIR", "bin/smurf"),
    ("SPLAT_DIR", "starjava/bin/splat"),
    ("SST_DIR", "bin/sst"),
    ("STILTS_DIR", "starjava/bin/stilts"),
    ("SURF_DIR", "bin/surf"),
    ("TSP_DIR", "bin/tsp"),
    ("STARLINK_DIR", ""),
];

/// Other install-relative variables used by individual packages
pub const OTHER_DIRS: &[(&str, &str)] = &[
    ("FIGARO_PROG_N", "bin/figaro"),
    ("FIGARO_PROG_S", "etc/figaro"),
    ("ORAC_CAL_ROOT", "bin/oracdr/cal"),
    ("ORAC_PERL5LIB", "bin/oracdr/src/lib/perl5"),
    ("PONGO_BIN", "bin/pongo"),
    ("SYS_SPECX", "share/specx"),
];

const CONVERT_TO: &str = "$CONVERT_DIR/convertndf to '^fmt' '^dir' '^name' '^type' '^fxs' '^ndf'";
const CONVERT_FROM: &str =
    "$CONVERT_DIR/convertndf from '^fmt' '^dir' '^name' '^type' '^fxs' '^ndf'";

/// NDF foreign-format conversion table
pub const CONVERSIONS: &[(&str, &str)] = &[
    ("NDF_DEL_GASP", "f='^dir^name';touch $f.hdr $f.dat;rm $f.hdr $f.dat"),
    ("NDF_DEL_IRAF", "f='^dir^name';touch $f.imh $f.pix;rm $f.imh $f.pix"),
    (
        "NDF_FORMATS_IN",
        "FITS(.fit),FIGARO(.dst),IRAF(.imh),STREAM(.das),UNFORMATTED(.unf),UNF0(.dat),\
         ASCII(.asc),TEXT(.txt),GIF(.gif),TIFF(.tif),GASP(.hdr),COMPRESSED(.sdf.Z),\
         GZIP(.sdf.gz),FITS(.fits),FITS(.fts),FITS(.FTS),FITS(.FITS),FITS(.FIT),\
         FITS(.lilo),FITS(.lihi),FITS(.silo),FITS(.sihi),FITS(.mxlo),FITS(.mxhi),\
         FITS(.rilo),FITS(.rihi),FITS(.vdlo),FITS(.vdhi),STREAM(.str),FITSGZ(.fit.gz),\
         FITSGZ(.fits.gz),FITSGZ(.fts.gz)",
    ),
    (
        "NDF_FORMATS_OUT",
        ".,FITS(.fit),FITS(.fits),FIGARO(.dst),IRAF(.imh),STREAM(.das),UNFORMATTED(.unf),\
         UNF0(.dat),ASCII(.asc),TEXT(.txt),GIF(.gif),TIFF(.tif),GASP(.hdr),\
         COMPRESSED(.sdf.Z),GZIP(.sdf.gz),FITSGZ(.fts.gz),FITSGZ(.fits.gz)",
    ),
    ("NDF_FROM_ASCII", CONVERT_FROM),
    ("NDF_FROM_COMPRESSED", CONVERT_FROM),
    ("NDF_FROM_FIGARO", CONVERT_FROM),
    ("NDF_FROM_FITS", CONVERT_FROM),
    ("NDF_FROM_FITSGZ", CONVERT_FROM),
    ("NDF_FROM_GASP", CONVERT_FROM),
    ("NDF_FROM_GIF", CONVERT_FROM),
    ("NDF_FROM_GZIP", CONVERT_FROM),
    ("NDF_FROM_IRAF", CONVERT_FROM),
    ("NDF_FROM_STREAM", CONVERT_FROM),
    ("NDF_FROM_TEXT", CONVERT_FROM),
    ("NDF_FROM_TIFF", CONVERT_FROM),
    ("NDF_FROM_UNF0", CONVERT_FROM),
    ("NDF_FROM_UNFORMATTED", CONVERT_FROM),
    ("NDF_SHCVT", "0"),
    ("NDF_TEMP_COMPRESSED", "temp_Z_^namecl"),
    ("NDF_TEMP_FITS", "temp_fits_^namecl^fxscl"),
    ("NDF_TEMP_GZIP", "temp_gz_^namecl"),
    ("NDF_TO_ASCII", CONVERT_TO),
    ("NDF_TO_COMPRESSED", CONVERT_TO),
    ("NDF_TO_FIGARO", CONVERT_TO),
    ("NDF_TO_FITS", CONVERT_TO),
    ("NDF_TO_FITSGZ", CONVERT_TO),
    ("NDF_TO_GASP", CONVERT_TO),
    ("NDF_TO_GIF", CONVERT_TO),
    ("NDF_TO_GZIP", CONVERT_TO),
    ("NDF_TO_IRAF", CONVERT_TO),
    ("NDF_TO_STREAM", CONVERT_TO),
    ("NDF_TO_TEXT", CONVERT_TO),
    ("NDF_TO_TIFF", CONVERT_TO),
    ("NDF_TO_UNF0", CONVERT_TO),
    ("NDF_TO_UNFORMATTED", CONVERT_TO),
];

#[cfg(target_os = "macos")]
const LIBRARY_PATH_VAR: &str = "DYLD_LIBRARY_PATH";
#[cfg(not(target_os = "macos"))]
const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";

#[cfg(target_os = "macos")]
const JAVA_LIB_DIRS: &[&str] = &["starjava/lib/i386", "starjava/lib/x86_64"];
#[cfg(not(target_os = "macos"))]
const JAVA_LIB_DIRS: &[&str] = &["starjava/lib/amd64"];

/// Options that shape the environment beyond the two directories
#[derive(Debug, Clone, Copy)]
pub struct EnvOptions {
    /// Set ADAM_NOPROMPT / STARUTIL_NOPROMPT so nothing waits on a terminal
    pub noprompt: bool,
}

impl Default for EnvOptions {
    fn default() -> Self {
        Self { noprompt: true }
    }
}

/// The complete environment handed to every child process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Build the environment from the host process environment
    pub fn build(install_root: Option<&Path>, scratch: &Path, options: EnvOptions) -> Self {
        Self::build_with_host(install_root, scratch, options, |key| env::var(key).ok())
    }

    /// Build the environment with an explicit host lookup
    pub fn build_with_host<F>(
        install_root: Option<&Path>,
        scratch: &Path,
        options: EnvOptions,
        host: F,
    ) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut vars = BTreeMap::new();
        let scratch = scratch.display().to_string();
        let host_path = host("PATH").unwrap_or_default();

        vars.insert("ADAM_USER".to_string(), scratch.clone());
        vars.insert("AGI_USER".to_string(), scratch);
        vars.insert("ADAM_EXIT".to_string(), "1".to_string());
        if options.noprompt {
            vars.insert("ADAM_NOPROMPT".to_string(), "1".to_string());
            vars.insert("STARUTIL_NOPROMPT".to_string(), "1".to_string());
        }

        for (key, value) in CONVERSIONS {
            vars.insert(key.to_string(), value.to_string());
        }

        match install_root {
            Some(root) => {
                for (key, rel) in PACKAGE_DIRS.iter().chain(OTHER_DIRS) {
                    vars.insert(key.to_string(), join(root, rel));
                }

                let libs: Vec<String> = std::iter::once("lib")
                    .chain(JAVA_LIB_DIRS.iter().copied())
                    .map(|rel| join(root, rel))
                    .collect();
                vars.insert(LIBRARY_PATH_VAR.to_string(), join_paths(libs));

                vars.insert(
                    "PERL5LIB".to_string(),
                    join_paths([
                        join(root, "Perl/lib/perl5/site_perl"),
                        join(root, "Perl/lib/perl5"),
                    ]),
                );

                let mut path = vec![join(root, "bin"), join(root, "starjava/bin")];
                if !host_path.is_empty() {
                    path.push(host_path);
                }
                vars.insert("PATH".to_string(), join_paths(path));
            }
            None => {
                vars.insert("PATH".to_string(), host_path);
            }
        }

        if let Some(display) = host("DISPLAY") {
            vars.insert("DISPLAY".to_string(), display);
        }

        Self { vars }
    }

    /// Look up a variable
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Iterate variables in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Replace `$NAME` and `${NAME}` with values from this environment
    ///
    /// Names that are not defined are left as they are.
    pub fn resolve_placeholders(&self, command: &str) -> String {
        placeholder_re()
            .replace_all(command, |caps: &Captures| {
                let name = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                match self.get(name) {
                    Some(value) => value.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

impl FromIterator<(String, String)> for Environment {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .unwrap_or_else(|e| panic!("placeholder pattern is invalid: {}", e))
    })
}

fn join(root: &Path, rel: &str) -> String {
    if rel.is_empty() {
        root.display().to_string()
    } else {
        root.join(rel).display().to_string()
    }
}

fn join_paths<I: IntoIterator<Item = String>>(parts: I) -> String {
    let sep = if cfg!(windows) { ";" } else { ":" };
    parts.into_iter().collect::<Vec<_>>().join(sep)
}

/// Absolute form of an install root, without requiring it to exist
pub fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(key: &str) -> Option<String> {
        match key {
            "PATH" => Some("/usr/bin".to_string()),
            "DISPLAY" => Some(":0".to_string()),
            _ => None,
        }
    }

    fn star_env() -> Environment {
        Environment::build_with_host(
            Some(Path::new("/opt/star")),
            Path::new("/work/tmpADAM1"),
            EnvOptions::default(),
            host,
        )
    }

    #[test]
    fn test_package_dirs_join_root() {
        let env = star_env();
        assert_eq!(env.get("KAPPA_DIR"), Some("/opt/star/bin/kappa"));
        assert_eq!(env.get("STARLINK_DIR"), Some("/opt/star"));
        assert_eq!(env.get("HDSTRACE_DIR"), Some("/opt/star/bin"));
        assert_eq!(env.get("SYS_SPECX"), Some("/opt/star/share/specx"));
    }

    #[test]
    fn test_scratch_and_flags() {
        let env = star_env();
        assert_eq!(env.get("ADAM_USER"), Some("/work/tmpADAM1"));
        assert_eq!(env.get("AGI_USER"), Some("/work/tmpADAM1"));
        assert_eq!(env.get("ADAM_EXIT"), Some("1"));
        assert_eq!(env.get("ADAM_NOPROMPT"), Some("1"));
        assert_eq!(env.get("STARUTIL_NOPROMPT"), Some("1"));
    }

    #[test]
    fn test_prompting_can_be_left_enabled() {
        let env = Environment::build_with_host(
            None,
            Path::new("/tmp/a"),
            EnvOptions { noprompt: false },
            host,
        );
        assert!(env.get("ADAM_NOPROMPT").is_none());
        assert_eq!(env.get("ADAM_EXIT"), Some("1"));
    }

    #[cfg(unix)]
    #[test]
    fn test_search_paths() {
        let env = star_env();
        assert_eq!(
            env.get("PATH"),
            Some("/opt/star/bin:/opt/star/starjava/bin:/usr/bin")
        );
        let libs = env.get(LIBRARY_PATH_VAR).unwrap();
        assert!(libs.starts_with("/opt/star/lib:"));
        assert!(env.get("PERL5LIB").unwrap().contains("/opt/star/Perl/lib/perl5"));
    }

    #[test]
    fn test_conversion_table_and_display() {
        let env = star_env();
        assert_eq!(env.get("NDF_SHCVT"), Some("0"));
        assert!(env.get("NDF_FROM_TIFF").unwrap().starts_with("$CONVERT_DIR/"));
        assert_eq!(env.get("DISPLAY"), Some(":0"));
    }

    #[test]
    fn test_without_install_root() {
        let env = Environment::build_with_host(
            None,
            Path::new("/tmp/a"),
            EnvOptions::default(),
            |_| None,
        );
        assert!(env.get("KAPPA_DIR").is_none());
        assert!(env.get("DISPLAY").is_none());
        assert_eq!(env.get("ADAM_USER"), Some("/tmp/a"));
        assert_eq!(env.get("PATH"), Some(""));
    }

    #[test]
    fn test_resolve_placeholders() {
        let env: Environment = [("KAPPA_DIR".to_string(), "/opt/star/bin/kappa".to_string())]
            .into_iter()
            .collect();
        assert_eq!(env.resolve_placeholders("$KAPPA_DIR/stats"), "/opt/star/bin/kappa/stats");
        assert_eq!(
            env.resolve_placeholders("${KAPPA_DIR}/stats"),
            "/opt/star/bin/kappa/stats"
        );
    }

    #[test]
    fn test_resolve_leaves_unknown_and_longer_names() {
        let env: Environment = [("KAPPA_DIR".to_string(), "/k".to_string())]
            .into_iter()
            .collect();
        assert_eq!(env.resolve_placeholders("$KAPPA_DIRX/a"), "$KAPPA_DIRX/a");
        assert_eq!(env.resolve_placeholders("${SMURF_DIR}/makemap"), "${SMURF_DIR}/makemap");
        assert_eq!(env.resolve_placeholders("/bin/ls"), "/bin/ls");
    }

    #[test]
    fn test_resolve_against_built_env() {
        let env = star_env();
        assert_eq!(
            env.resolve_placeholders("${STARLINK_DIR}/bin/starperl"),
            "/opt/star/bin/starperl"
        );
    }
}
