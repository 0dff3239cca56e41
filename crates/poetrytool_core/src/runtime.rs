use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::config::PoetryConfig;

pub const STATE_DIR_NAME: &str = ".poetrytool";
pub const CONFIG_FILENAME: &str = "config.toml";
const ROOT_MARKER_DIR: &str = "Poetry";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let executable_dir = env::current_exe()
            .ok()
            .and_then(|path| path.parent().map(Path::to_path_buf));
        Ok(Self {
            cwd,
            executable_dir,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    /// Paths rooted at `project_root` with every other location defaulted.
    pub fn for_root(project_root: &Path) -> Self {
        let state_dir = project_root.join(STATE_DIR_NAME);
        Self {
            backups_dir: state_dir.join("backups"),
            config_path: state_dir.join(CONFIG_FILENAME),
            state_dir,
            project_root: project_root.to_path_buf(),
            root_source: ValueSource::Flag,
            config_source: ValueSource::Default,
        }
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nstate_dir={}\nbackups_dir={}\nconfig_path={} ({})",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.backups_dir),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }
}

/// Content locations resolved against the project root from the `[layout]`
/// and `[[consumers]]` config sections.
#[derive(Debug, Clone)]
pub struct ContentLayout {
    pub project_root: PathBuf,
    pub poetry_dir: PathBuf,
    pub image_dir: PathBuf,
    pub legacy_poem_dirs: Vec<PathBuf>,
    pub registry_path: PathBuf,
    pub image_extensions: Vec<String>,
    pub consumers: Vec<ConsumerTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerTarget {
    pub path: PathBuf,
    pub marker: String,
}

impl ContentLayout {
    pub fn resolve(paths: &ResolvedPaths, config: &PoetryConfig) -> Result<Self> {
        let root = &paths.project_root;
        let layout = &config.layout;
        let poetry_dir = absolutize(Path::new(&layout.poetry_dir), root);
        let image_dir = absolutize(Path::new(&layout.image_dir), root);

        let mut legacy_poem_dirs = Vec::with_capacity(layout.legacy_poem_dirs.len());
        for dir in &layout.legacy_poem_dirs {
            let resolved = absolutize(Path::new(dir), root);
            if !resolved.starts_with(&poetry_dir) {
                bail!(
                    "legacy poem directory must live under the poetry directory: {} (poetry dir: {})",
                    normalize_for_display(&resolved),
                    normalize_for_display(&poetry_dir)
                );
            }
            legacy_poem_dirs.push(resolved);
        }
        if image_dir.starts_with(&poetry_dir) {
            bail!(
                "image directory must not live under the poetry directory: {}",
                normalize_for_display(&image_dir)
            );
        }

        let consumers = config
            .consumers
            .iter()
            .map(|consumer| ConsumerTarget {
                path: absolutize(Path::new(&consumer.path), root),
                marker: consumer.marker.clone(),
            })
            .collect();

        Ok(Self {
            project_root: root.clone(),
            poetry_dir,
            image_dir,
            legacy_poem_dirs,
            registry_path: absolutize(Path::new(&layout.registry_file), root),
            image_extensions: layout
                .image_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            consumers,
        })
    }

    /// Path relative to the project root with forward slashes, as the website
    /// loader scripts reference files.
    pub fn web_path(&self, path: &Path) -> String {
        match path.strip_prefix(&self.project_root) {
            Ok(rel) => normalize_for_display(rel),
            Err(_) => normalize_for_display(path),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub project_root_exists: bool,
    pub poetry_dir_exists: bool,
    pub image_dir_exists: bool,
    pub state_dir_exists: bool,
    pub registry_exists: bool,
    pub registry_size_bytes: Option<u64>,
    pub config_exists: bool,
    pub missing_consumers: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

pub fn inspect_runtime(paths: &ResolvedPaths, layout: &ContentLayout) -> Result<RuntimeStatus> {
    let registry_exists = layout.registry_path.exists();
    let registry_size_bytes = if registry_exists {
        let metadata = fs::metadata(&layout.registry_path)
            .with_context(|| format!("failed to inspect {}", layout.registry_path.display()))?;
        Some(metadata.len())
    } else {
        None
    };
    let missing_consumers: Vec<PathBuf> = layout
        .consumers
        .iter()
        .filter(|consumer| !consumer.path.exists())
        .map(|consumer| consumer.path.clone())
        .collect();

    let poetry_dir_exists = layout.poetry_dir.exists();
    let image_dir_exists = layout.image_dir.exists();
    let mut warnings = Vec::new();
    if !poetry_dir_exists {
        warnings.push(format!(
            "{} is missing; nothing to analyze or migrate",
            normalize_for_display(&layout.poetry_dir)
        ));
    }
    if !image_dir_exists {
        warnings.push(format!(
            "{} is missing; image checks will report every image as absent",
            normalize_for_display(&layout.image_dir)
        ));
    }
    for missing in &missing_consumers {
        warnings.push(format!(
            "consumer script {} is missing; path sync will fail",
            normalize_for_display(missing)
        ));
    }

    Ok(RuntimeStatus {
        project_root_exists: paths.project_root.exists(),
        poetry_dir_exists,
        image_dir_exists,
        state_dir_exists: paths.state_dir.exists(),
        registry_exists,
        registry_size_bytes,
        config_exists: paths.config_path.exists(),
        missing_consumers,
        warnings,
    })
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env)
        .context("failed to resolve project root")?;

    let state_dir = project_root.join(STATE_DIR_NAME);
    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &project_root), ValueSource::Flag)
    } else if let Some(value) = lookup_env("POETRYTOOL_CONFIG") {
        (
            absolutize(Path::new(value.trim()), &project_root),
            ValueSource::Env,
        )
    } else {
        (state_dir.join(CONFIG_FILENAME), ValueSource::Default)
    };

    Ok(ResolvedPaths {
        backups_dir: state_dir.join("backups"),
        project_root,
        state_dir,
        config_path,
        root_source,
        config_source,
    })
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> Result<(PathBuf, ValueSource)>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return Ok((absolutize(path, &context.cwd), ValueSource::Flag));
    }

    if let Some(value) = lookup_env("POETRYTOOL_PROJECT_ROOT") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Ok((absolutize(Path::new(trimmed), &context.cwd), ValueSource::Env));
        }
    }

    let root = detect_project_root_heuristic(&context.cwd, context.executable_dir.as_deref());
    Ok((root, ValueSource::Heuristic))
}

fn detect_project_root_heuristic(cwd: &Path, executable_dir: Option<&Path>) -> PathBuf {
    let mut seen = HashSet::new();
    for candidate in candidate_roots(cwd, executable_dir) {
        let key = normalize_for_display(&candidate);
        if !seen.insert(key) {
            continue;
        }
        if candidate.join(ROOT_MARKER_DIR).is_dir() || candidate.join(STATE_DIR_NAME).is_dir() {
            return candidate;
        }
    }
    cwd.to_path_buf()
}

fn candidate_roots(cwd: &Path, executable_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = cwd.ancestors().map(Path::to_path_buf).collect();
    if let Some(exe_dir) = executable_dir {
        out.extend(exe_dir.ancestors().map(Path::to_path_buf));
    }
    out
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{
        ContentLayout, PathOverrides, ResolutionContext, ResolvedPaths, ValueSource,
        inspect_runtime, resolve_paths_with_lookup,
    };
    use crate::config::PoetryConfig;

    #[test]
    fn resolve_paths_prefers_flag_over_env() {
        let temp = tempdir().expect("tempdir");
        let cwd = temp.path().join("cwd");
        let from_flag = temp.path().join("flag-root");
        fs::create_dir_all(&cwd).expect("create cwd");

        let overrides = PathOverrides {
            project_root: Some(from_flag.clone()),
            ..PathOverrides::default()
        };
        let context = ResolutionContext {
            cwd,
            executable_dir: None,
        };
        let env = HashMap::from([(
            "POETRYTOOL_PROJECT_ROOT".to_string(),
            temp.path().join("env-root").to_string_lossy().to_string(),
        )]);

        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned())
            .expect("resolve paths");
        assert_eq!(resolved.project_root, from_flag);
        assert_eq!(resolved.root_source, ValueSource::Flag);
        assert_eq!(resolved.config_source, ValueSource::Default);
    }

    #[test]
    fn heuristic_finds_ancestor_with_poetry_dir() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("site");
        let nested = root.join("js").join("lib");
        fs::create_dir_all(root.join("Poetry")).expect("create poetry");
        fs::create_dir_all(&nested).expect("create nested");

        let context = ResolutionContext {
            cwd: nested,
            executable_dir: None,
        };
        let resolved = resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None)
            .expect("resolve");
        assert_eq!(resolved.project_root, root);
        assert_eq!(resolved.root_source, ValueSource::Heuristic);
    }

    #[test]
    fn config_path_from_env_is_relative_to_project_root() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("site");
        fs::create_dir_all(&root).expect("create root");
        let context = ResolutionContext {
            cwd: root.clone(),
            executable_dir: None,
        };
        let overrides = PathOverrides {
            project_root: Some(root.clone()),
            ..PathOverrides::default()
        };
        let env = HashMap::from([("POETRYTOOL_CONFIG".to_string(), "alt.toml".to_string())]);
        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned())
            .expect("resolve");
        assert_eq!(resolved.config_path, root.join("alt.toml"));
        assert_eq!(resolved.config_source, ValueSource::Env);
    }

    #[test]
    fn layout_rejects_legacy_dir_outside_poetry_dir() {
        let paths = ResolvedPaths::for_root(Path::new("/site"));
        let mut config = PoetryConfig::default();
        config.layout.legacy_poem_dirs = vec!["drafts/old".to_string()];
        let err = ContentLayout::resolve(&paths, &config).expect_err("must fail");
        assert!(err.to_string().contains("must live under the poetry directory"));
    }

    #[test]
    fn layout_web_path_uses_forward_slashes() {
        let paths = ResolvedPaths::for_root(Path::new("/site"));
        let layout = ContentLayout::resolve(&paths, &PoetryConfig::default()).expect("layout");
        assert_eq!(
            layout.web_path(&layout.poetry_dir.join("poem001.md")),
            "Poetry/poem001.md"
        );
    }

    #[test]
    fn inspect_runtime_warns_about_missing_consumers() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_root(temp.path());
        let layout = ContentLayout::resolve(&paths, &PoetryConfig::default()).expect("layout");
        fs::create_dir_all(&layout.poetry_dir).expect("create poetry");

        let status = inspect_runtime(&paths, &layout).expect("inspect");
        assert!(status.poetry_dir_exists);
        assert!(!status.registry_exists);
        assert_eq!(status.missing_consumers.len(), 2);
        assert!(
            status
                .warnings
                .iter()
                .any(|warning| warning.contains("consumer script"))
        );
    }
}
