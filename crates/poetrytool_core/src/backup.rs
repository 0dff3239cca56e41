use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::filesystem::{
    copy_tree, display_path, hash_file, remove_tree, validate_scoped_path, write_atomic,
};
use crate::runtime::{ContentLayout, ResolvedPaths};

pub const BACKUP_PREFIX: &str = "backup_";
pub const MANIFEST_FILENAME: &str = "backup_manifest.json";
const POETRY_SUBDIR: &str = "poetry";
const IMAGES_SUBDIR: &str = "images";
const CONSUMERS_SUBDIR: &str = "consumers";
const REGISTRY_FILENAME: &str = "registry.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub backup_date: String,
    pub description: String,
    pub created_by: String,
    pub total_poems: usize,
    pub total_images: usize,
    pub registry_present: bool,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct BackupEntry {
    pub name: String,
    pub path: PathBuf,
    pub manifest: Option<BackupManifest>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub checked: usize,
    pub missing: Vec<String>,
    pub mismatched: Vec<String>,
}

impl VerifyReport {
    pub fn is_intact(&self) -> bool {
        self.missing.is_empty() && self.mismatched.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreSummary {
    pub poem_files: usize,
    pub image_files: usize,
    pub consumer_files: usize,
    pub registry_restored: bool,
}

/// Copy poems, images, consumer scripts and the registry into a fresh
/// timestamped directory under the backups dir. A failed backup is removed.
pub fn create_backup(
    paths: &ResolvedPaths,
    layout: &ContentLayout,
    description: &str,
) -> Result<PathBuf> {
    fs::create_dir_all(&paths.backups_dir)
        .with_context(|| format!("failed to create {}", paths.backups_dir.display()))?;
    let backup_dir = unique_backup_dir(&paths.backups_dir);
    fs::create_dir_all(&backup_dir)
        .with_context(|| format!("failed to create {}", backup_dir.display()))?;

    match populate_backup(layout, &backup_dir, description) {
        Ok(manifest) => {
            info!(
                backup = %backup_dir.display(),
                poems = manifest.total_poems,
                images = manifest.total_images,
                "backup created"
            );
            Ok(backup_dir)
        }
        Err(error) => {
            if let Err(cleanup) = remove_tree(&backup_dir) {
                warn!(backup = %backup_dir.display(), error = %cleanup, "failed to remove partial backup");
            }
            Err(error.context(format!(
                "backup aborted; removed partial {}",
                display_path(&backup_dir)
            )))
        }
    }
}

fn unique_backup_dir(backups_dir: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let base = backups_dir.join(format!("{BACKUP_PREFIX}{stamp}"));
    if !base.exists() {
        return base;
    }
    let mut counter = 1usize;
    loop {
        let candidate = backups_dir.join(format!("{BACKUP_PREFIX}{stamp}_{counter}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

fn populate_backup(
    layout: &ContentLayout,
    backup_dir: &Path,
    description: &str,
) -> Result<BackupManifest> {
    let mut relative_files = Vec::new();

    let poem_files = copy_tree(&layout.poetry_dir, &backup_dir.join(POETRY_SUBDIR))?;
    let total_poems = poem_files
        .iter()
        .filter(|file| file.ends_with(".md"))
        .count();
    relative_files.extend(poem_files.into_iter().map(|file| format!("{POETRY_SUBDIR}/{file}")));

    let image_files = copy_tree(&layout.image_dir, &backup_dir.join(IMAGES_SUBDIR))?;
    let total_images = image_files.len();
    relative_files.extend(image_files.into_iter().map(|file| format!("{IMAGES_SUBDIR}/{file}")));

    for consumer in &layout.consumers {
        if !consumer.path.exists() {
            warn!(path = %consumer.path.display(), "consumer script missing; not backed up");
            continue;
        }
        let relative = layout.web_path(&consumer.path);
        let target = backup_dir.join(CONSUMERS_SUBDIR).join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::copy(&consumer.path, &target).with_context(|| {
            format!(
                "failed to copy {} to {}",
                consumer.path.display(),
                target.display()
            )
        })?;
        relative_files.push(format!("{CONSUMERS_SUBDIR}/{relative}"));
    }

    let registry_present = layout.registry_path.exists();
    if registry_present {
        let target = backup_dir.join(REGISTRY_FILENAME);
        fs::copy(&layout.registry_path, &target).with_context(|| {
            format!(
                "failed to copy {} to {}",
                layout.registry_path.display(),
                target.display()
            )
        })?;
        relative_files.push(REGISTRY_FILENAME.to_string());
    }

    let mut files = BTreeMap::new();
    for relative in relative_files {
        let hash = hash_file(&backup_dir.join(&relative))?;
        files.insert(relative, hash);
    }

    let manifest = BackupManifest {
        backup_date: Local::now().to_rfc3339(),
        description: description.to_string(),
        created_by: format!("poetrytool {}", env!("CARGO_PKG_VERSION")),
        total_poems,
        total_images,
        registry_present,
        files,
    };
    let rendered =
        serde_json::to_string_pretty(&manifest).context("failed to serialize backup manifest")?;
    write_atomic(&backup_dir.join(MANIFEST_FILENAME), rendered.as_bytes())?;
    Ok(manifest)
}

pub fn load_manifest(backup_dir: &Path) -> Result<BackupManifest> {
    let path = backup_dir.join(MANIFEST_FILENAME);
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

/// Backups under the backups dir, newest first.
pub fn list_backups(paths: &ResolvedPaths) -> Result<Vec<BackupEntry>> {
    if !paths.backups_dir.exists() {
        return Ok(Vec::new());
    }
    let mut entries = Vec::new();
    let read_dir = fs::read_dir(&paths.backups_dir)
        .with_context(|| format!("failed to read {}", paths.backups_dir.display()))?;
    for entry in read_dir {
        let entry = entry
            .with_context(|| format!("failed to read entry in {}", paths.backups_dir.display()))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if !path.is_dir() || !name.starts_with(BACKUP_PREFIX) {
            continue;
        }
        let manifest = match load_manifest(&path) {
            Ok(manifest) => Some(manifest),
            Err(error) => {
                warn!(backup = %path.display(), error = %error, "backup manifest unreadable");
                None
            }
        };
        entries.push(BackupEntry {
            name,
            path,
            manifest,
        });
    }
    entries.sort_by(|left, right| right.name.cmp(&left.name));
    Ok(entries)
}

/// Accept either a backup directory name under the backups dir or a path.
pub fn resolve_backup(paths: &ResolvedPaths, reference: &str) -> Result<PathBuf> {
    let by_name = paths.backups_dir.join(reference);
    if by_name.join(MANIFEST_FILENAME).exists() {
        return Ok(by_name);
    }
    let as_path = Path::new(reference);
    let as_path = if as_path.is_absolute() {
        as_path.to_path_buf()
    } else {
        paths.project_root.join(as_path)
    };
    if as_path.join(MANIFEST_FILENAME).exists() {
        return Ok(as_path);
    }
    bail!("backup not found: {reference}")
}

pub fn latest_backup(paths: &ResolvedPaths) -> Result<Option<PathBuf>> {
    Ok(list_backups(paths)?
        .into_iter()
        .find(|entry| entry.manifest.is_some())
        .map(|entry| entry.path))
}

/// Re-hash every file named in the manifest.
pub fn verify_backup(backup_dir: &Path) -> Result<VerifyReport> {
    let manifest = load_manifest(backup_dir)?;
    let mut report = VerifyReport::default();
    for (relative, expected) in &manifest.files {
        report.checked += 1;
        let path = backup_dir.join(relative);
        if !path.exists() {
            report.missing.push(relative.clone());
            continue;
        }
        if hash_file(&path)? != *expected {
            report.mismatched.push(relative.clone());
        }
    }
    Ok(report)
}

/// Replace the current poems, images, consumer scripts and registry with the
/// backup's copies. A registry absent from the backup is deleted.
pub fn restore_backup(layout: &ContentLayout, backup_dir: &Path) -> Result<RestoreSummary> {
    let manifest = load_manifest(backup_dir)
        .with_context(|| format!("not a usable backup: {}", backup_dir.display()))?;
    let mut summary = RestoreSummary::default();

    remove_tree(&layout.poetry_dir)?;
    summary.poem_files = copy_tree(&backup_dir.join(POETRY_SUBDIR), &layout.poetry_dir)?.len();

    remove_tree(&layout.image_dir)?;
    summary.image_files = copy_tree(&backup_dir.join(IMAGES_SUBDIR), &layout.image_dir)?.len();

    let consumer_prefix = format!("{CONSUMERS_SUBDIR}/");
    for relative in manifest.files.keys() {
        let Some(target_rel) = relative.strip_prefix(&consumer_prefix) else {
            continue;
        };
        validate_scoped_path(&layout.project_root, Path::new(target_rel))?;
        let target = layout.project_root.join(target_rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let source = backup_dir.join(relative);
        fs::copy(&source, &target).with_context(|| {
            format!("failed to restore {} to {}", source.display(), target.display())
        })?;
        summary.consumer_files += 1;
    }

    let registry_backup = backup_dir.join(REGISTRY_FILENAME);
    if manifest.registry_present && registry_backup.exists() {
        let content = fs::read(&registry_backup)
            .with_context(|| format!("failed to read {}", registry_backup.display()))?;
        write_atomic(&layout.registry_path, &content)?;
        summary.registry_restored = true;
    } else if layout.registry_path.exists() {
        fs::remove_file(&layout.registry_path)
            .with_context(|| format!("failed to remove {}", layout.registry_path.display()))?;
    }

    info!(
        backup = %backup_dir.display(),
        poems = summary.poem_files,
        images = summary.image_files,
        consumers = summary.consumer_files,
        "restored backup"
    );
    Ok(summary)
}
