//! Where the migration keeps its state: the `.cmsmigrate/` directory, the
//! SQLite database and the config file.
//!
//! Each location comes from a CLI flag, an environment variable, or a
//! default derived from the project root, in that order.

use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::render_default_config;

pub const STATE_DIR_NAME: &str = ".cmsmigrate";
pub const DB_FILENAME: &str = "cms.db";

const ROOT_ENV: &str = "CMSMIGRATE_PROJECT_ROOT";
const DATA_ENV: &str = "CMSMIGRATE_DATA_DIR";
const CONFIG_ENV: &str = "CMSMIGRATE_CONFIG";

/// Directories `init` makes under the state dir besides the data dir.
const STATE_SUBDIRS: &[&str] = &["imports"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    /// An existing `.cmsmigrate/` found above the working directory.
    Discovered,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Discovered => "discovered",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

/// Process facts path resolution depends on; tests build their own.
#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        Ok(Self {
            cwd: env::current_dir().context("cannot read the working directory")?,
            executable_dir: env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf)),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub data_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    /// One `name: path [source]` line per location, for `--diagnostics`.
    pub fn diagnostics(&self) -> String {
        let rows = [
            ("project_root", &self.project_root, Some(self.root_source)),
            ("state_dir", &self.state_dir, None),
            ("data_dir", &self.data_dir, Some(self.data_source)),
            ("db_path", &self.db_path, None),
            ("config_path", &self.config_path, Some(self.config_source)),
        ];
        let mut out = String::new();
        for (name, path, source) in rows {
            if !out.is_empty() {
                out.push('\n');
            }
            let _ = write!(out, "{name:<13}{}", normalize_for_display(path));
            if let Some(source) = source {
                let _ = write!(out, " [{}]", source.as_str());
            }
        }
        out
    }
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_with_env(context, overrides, |key| env::var(key).ok())
}

fn resolve_with_env(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    env_var: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedPaths> {
    let (project_root, root_source) =
        match explicit(overrides.project_root.as_deref(), ROOT_ENV, &context.cwd, &env_var) {
            Some(found) => found,
            None => match discover_state_root(context) {
                Some(root) => (root, ValueSource::Discovered),
                None => (context.cwd.clone(), ValueSource::Default),
            },
        };
    let state_dir = project_root.join(STATE_DIR_NAME);

    let (data_dir, data_source) =
        explicit(overrides.data_dir.as_deref(), DATA_ENV, &project_root, &env_var)
            .unwrap_or_else(|| (state_dir.join("data"), ValueSource::Default));
    let (config_path, config_source) =
        explicit(overrides.config.as_deref(), CONFIG_ENV, &project_root, &env_var)
            .unwrap_or_else(|| (state_dir.join("config.toml"), ValueSource::Default));

    Ok(ResolvedPaths {
        db_path: data_dir.join(DB_FILENAME),
        project_root,
        state_dir,
        data_dir,
        config_path,
        root_source,
        data_source,
        config_source,
    })
}

/// A flag value, else a non-blank environment value; relative paths are
/// taken from `base`.
fn explicit(
    flag: Option<&Path>,
    env_key: &str,
    base: &Path,
    env_var: &impl Fn(&str) -> Option<String>,
) -> Option<(PathBuf, ValueSource)> {
    if let Some(path) = flag {
        return Some((base.join(path), ValueSource::Flag));
    }
    let value = env_var(env_key)?;
    let value = value.trim();
    (!value.is_empty()).then(|| (base.join(value), ValueSource::Env))
}

/// Nearest directory holding `.cmsmigrate/`, searching upwards from the
/// working directory and then from the executable's directory.
fn discover_state_root(context: &ResolutionContext) -> Option<PathBuf> {
    context
        .cwd
        .ancestors()
        .chain(context.executable_dir.iter().flat_map(|dir| dir.ancestors()))
        .find(|dir| dir.join(STATE_DIR_NAME).is_dir())
        .map(Path::to_path_buf)
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub db_exists: bool,
    pub db_size_bytes: Option<u64>,
    pub warnings: Vec<String>,
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let db_size_bytes = match fs::metadata(&paths.db_path) {
        Ok(metadata) => Some(metadata.len()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            return Err(err).with_context(|| format!("cannot stat {}", paths.db_path.display()));
        }
    };

    let mut warnings = Vec::new();
    if !paths.state_dir.is_dir() {
        warnings.push(format!("{STATE_DIR_NAME}/ is missing; run `cmsmigrate init` first"));
    }
    if !paths.config_path.is_file() {
        warnings.push("config.toml is missing; built-in defaults are in effect".to_string());
    }

    Ok(RuntimeStatus {
        db_exists: db_size_bytes.is_some(),
        db_size_bytes,
        warnings,
    })
}

#[derive(Debug, Clone, Default)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

/// Create the state layout and a default config. An existing config is only
/// replaced with `overwrite_config`.
pub fn init_layout(paths: &ResolvedPaths, overwrite_config: bool) -> Result<InitReport> {
    let mut report = InitReport::default();
    let dirs = [paths.state_dir.clone(), paths.data_dir.clone()]
        .into_iter()
        .chain(STATE_SUBDIRS.iter().map(|name| paths.state_dir.join(name)));
    for dir in dirs {
        if dir.is_dir() {
            continue;
        }
        fs::create_dir_all(&dir).with_context(|| format!("cannot create {}", dir.display()))?;
        tracing::debug!(dir = %normalize_for_display(&dir), "created directory");
        report.created_dirs.push(dir);
    }

    if overwrite_config || !paths.config_path.exists() {
        if let Some(parent) = paths.config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        fs::write(&paths.config_path, render_default_config())
            .with_context(|| format!("cannot write {}", paths.config_path.display()))?;
        report.wrote_config = true;
    }
    Ok(report)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
pub(crate) fn test_paths(root: &Path) -> ResolvedPaths {
    let project_root = root.join("project");
    let state_dir = project_root.join(STATE_DIR_NAME);
    let data_dir = state_dir.join("data");
    ResolvedPaths {
        db_path: data_dir.join(DB_FILENAME),
        config_path: state_dir.join("config.toml"),
        project_root,
        state_dir,
        data_dir,
        root_source: ValueSource::Flag,
        data_source: ValueSource::Default,
        config_source: ValueSource::Default,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::tempdir;

    use super::*;

    fn context(cwd: PathBuf) -> ResolutionContext {
        ResolutionContext {
            cwd,
            executable_dir: None,
        }
    }

    #[test]
    fn flag_beats_env_for_project_root() {
        let temp = tempdir().expect("tempdir");
        let flag_root = temp.path().join("flag-root");
        let env = HashMap::from([(ROOT_ENV, "/srv/elsewhere".to_string())]);
        let overrides = PathOverrides {
            project_root: Some(flag_root.clone()),
            ..PathOverrides::default()
        };

        let resolved = resolve_with_env(&context(temp.path().to_path_buf()), &overrides, |key| {
            env.get(key).cloned()
        })
        .expect("resolve");
        assert_eq!(resolved.root_source, ValueSource::Flag);
        assert_eq!(
            resolved.db_path,
            flag_root.join(STATE_DIR_NAME).join("data").join(DB_FILENAME)
        );
    }

    #[test]
    fn state_dir_is_discovered_above_cwd() {
        let temp = tempdir().expect("tempdir");
        let site = temp.path().join("pn-kota");
        let nested = site.join("exports").join("2024");
        fs::create_dir_all(site.join(STATE_DIR_NAME)).expect("state dir");
        fs::create_dir_all(&nested).expect("nested");

        let resolved = resolve_with_env(&context(nested), &PathOverrides::default(), |_| None)
            .expect("resolve");
        assert_eq!(resolved.project_root, site);
        assert_eq!(resolved.root_source, ValueSource::Discovered);
    }

    #[test]
    fn without_state_dir_cwd_is_the_root() {
        let temp = tempdir().expect("tempdir");
        let cwd = temp.path().join("fresh");
        let resolved = resolve_with_env(&context(cwd.clone()), &PathOverrides::default(), |_| None)
            .expect("resolve");
        assert_eq!(resolved.project_root, cwd);
        assert_eq!(resolved.root_source, ValueSource::Default);
    }

    #[test]
    fn env_data_dir_is_relative_to_project_and_blank_is_ignored() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("site");
        let overrides = PathOverrides {
            project_root: Some(root.clone()),
            ..PathOverrides::default()
        };

        let resolved = resolve_with_env(&context(root.clone()), &overrides, |key| {
            (key == DATA_ENV).then(|| " var/db ".to_string())
        })
        .expect("resolve");
        assert_eq!(resolved.data_dir, root.join("var/db"));
        assert_eq!(resolved.data_source, ValueSource::Env);

        let blank = resolve_with_env(&context(root.clone()), &overrides, |key| {
            (key == CONFIG_ENV).then(|| "  ".to_string())
        })
        .expect("resolve");
        assert_eq!(blank.config_source, ValueSource::Default);
    }

    #[test]
    fn diagnostics_name_every_location_and_source() {
        let temp = tempdir().expect("tempdir");
        let text = test_paths(temp.path()).diagnostics();
        assert_eq!(text.lines().count(), 5);
        assert!(text.lines().next().is_some_and(|line| line.ends_with("[flag]")));
        assert!(text.contains("db_path"));
    }

    #[test]
    fn init_is_idempotent_unless_overwriting() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        let first = init_layout(&paths, false).expect("init");
        assert_eq!(first.created_dirs.len(), 3);
        assert!(first.wrote_config);
        assert!(paths.state_dir.join("imports").is_dir());

        let second = init_layout(&paths, false).expect("init again");
        assert!(second.created_dirs.is_empty());
        assert!(!second.wrote_config);

        let forced = init_layout(&paths, true).expect("overwrite");
        assert!(forced.wrote_config);
    }

    #[test]
    fn inspect_reports_missing_layout() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        let status = inspect_runtime(&paths).expect("inspect");
        assert!(!status.db_exists);
        assert_eq!(status.db_size_bytes, None);
        assert_eq!(status.warnings.len(), 2);
    }
}
