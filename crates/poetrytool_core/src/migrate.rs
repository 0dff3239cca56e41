use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{info, warn};

use crate::analyze::{DiscoveredPoem, ParseStatus, StructureReport, analyze};
use crate::backup::{RestoreSummary, create_backup, restore_backup};
use crate::config::PoetryConfig;
use crate::consumer::{ConsumerUpdate, sync_consumers};
use crate::filesystem::{display_path, write_atomic};
use crate::frontmatter;
use crate::layout::{image_file_name, normalize_extension, poem_header, poem_path, poem_web_paths};
use crate::registry::{ImageRecord, LayoutKind, PoemRecord, Registry, RegistryError};
use crate::runtime::{ContentLayout, ResolvedPaths};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    Backup,
    RegistryGeneration,
    FileMigration,
    Cleanup,
    ConsumerSync,
}

impl MigrationPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::RegistryGeneration => "registry generation",
            Self::FileMigration => "file migration",
            Self::Cleanup => "cleanup",
            Self::ConsumerSync => "consumer sync",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub item: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: Vec<ItemFailure>,
}

impl PhaseSummary {
    fn fail(&mut self, item: &str, error: &anyhow::Error) {
        warn!(item, error = %format!("{error:#}"), "migration item failed");
        self.failed.push(ItemFailure {
            item: item.to_string(),
            reason: format!("{error:#}"),
        });
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationSummary {
    pub poems_added: usize,
    pub poems_skipped: usize,
    pub images_added: usize,
    pub images_skipped: usize,
    pub links: usize,
    pub link_conflicts: Vec<ItemFailure>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FileMigrationSummary {
    pub poems: PhaseSummary,
    pub images: PhaseSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub backup_dir: PathBuf,
    pub generation: GenerationSummary,
    pub files: FileMigrationSummary,
    pub cleanup: PhaseSummary,
    pub consumers: Vec<ConsumerUpdate>,
}

enum Outcome {
    Done,
    AlreadyDone,
}

/// Moves a legacy category-folder collection onto stable `poem###` /
/// `image###` file names. Each phase can be re-run on its own.
pub struct Migrator<'a> {
    paths: &'a ResolvedPaths,
    layout: &'a ContentLayout,
    config: &'a PoetryConfig,
}

impl<'a> Migrator<'a> {
    pub fn new(paths: &'a ResolvedPaths, layout: &'a ContentLayout, config: &'a PoetryConfig) -> Self {
        Self {
            paths,
            layout,
            config,
        }
    }

    pub fn backup(&self, description: &str) -> Result<PathBuf> {
        create_backup(self.paths, self.layout, description)
    }

    pub fn analyze(&self) -> Result<StructureReport> {
        analyze(self.layout, self.config)
    }

    /// Register every discovered poem and image. No files move.
    pub fn generate_registry(
        &self,
        registry: &mut Registry,
        report: &StructureReport,
    ) -> Result<GenerationSummary> {
        let mut summary = GenerationSummary::default();

        for poem in &report.poems {
            if let ParseStatus::Unreadable(reason) = &poem.status {
                warn!(path = %poem.relative_path, %reason, "unreadable poem not registered");
                summary.poems_skipped += 1;
                continue;
            }
            if registry
                .find_poem_by_original_path(&poem.relative_path)
                .is_some()
            {
                summary.poems_skipped += 1;
                continue;
            }

            let poem_id = registry.next_poem_id();
            registry.add_poem(&poem_id, poem_record(poem))?;
            summary.poems_added += 1;

            let Some(image_name) = poem.image.as_deref() else {
                continue;
            };
            let image_id = match registry.find_image_by_original_filename(image_name) {
                Some(existing) => existing.to_string(),
                None => {
                    let image_id = registry.next_image_id();
                    registry.add_image(&image_id, image_record(image_name))?;
                    summary.images_added += 1;
                    image_id
                }
            };
            match registry.link_poem_image(&poem_id, &image_id) {
                Ok(()) => summary.links += 1,
                Err(error @ RegistryError::ImageAlreadyLinked { .. }) => {
                    warn!(poem_id = %poem_id, image_id = %image_id, "image referenced by more than one poem; left unlinked");
                    summary.link_conflicts.push(ItemFailure {
                        item: poem_id.clone(),
                        reason: error.to_string(),
                    });
                }
                Err(error) => return Err(error.into()),
            }
        }

        for orphan in &report.orphaned_images {
            if registry.find_image_by_original_filename(orphan).is_some()
                || is_migrated_image_name(registry, orphan)
            {
                summary.images_skipped += 1;
                continue;
            }
            let image_id = registry.next_image_id();
            registry.add_image(&image_id, image_record(orphan))?;
            summary.images_added += 1;
        }

        registry.save()?;
        info!(
            poems_added = summary.poems_added,
            images_added = summary.images_added,
            links = summary.links,
            "registry generated"
        );
        Ok(summary)
    }

    /// Rename each image to `<id><ext>` and write `Poetry/<id>.md` for each
    /// registered poem. Existing targets are never overwritten. A poem whose
    /// linked image failed is not written, so no header names a missing file.
    pub fn migrate_files(&self, registry: &Registry) -> Result<FileMigrationSummary> {
        let mut summary = FileMigrationSummary::default();

        let mut failed_images = BTreeSet::new();
        for image_id in registry.sorted_image_ids() {
            let Some(record) = registry.image(&image_id) else {
                continue;
            };
            match self.migrate_image(&image_id, record) {
                Ok(Outcome::Done) => summary.images.succeeded += 1,
                Ok(Outcome::AlreadyDone) => summary.images.skipped += 1,
                Err(error) => {
                    summary.images.fail(&image_id, &error);
                    failed_images.insert(image_id);
                }
            }
        }

        for poem_id in registry.sorted_poem_ids() {
            let Some(record) = registry.poem(&poem_id) else {
                continue;
            };
            let Some(original) = record.original_path.as_deref() else {
                summary.poems.skipped += 1;
                continue;
            };
            let source = self.layout.project_root.join(original);
            if !source.exists() {
                warn!(poem_id = %poem_id, path = %source.display(), "original poem file not found");
                summary.poems.skipped += 1;
                continue;
            }
            if let Some(image_id) = record.image_id.as_deref()
                && failed_images.contains(image_id)
            {
                let error = anyhow!("linked image {image_id} was not migrated; poem left in place");
                summary.poems.fail(&poem_id, &error);
                continue;
            }
            match self.migrate_poem(registry, &poem_id, record, &source) {
                Ok(Outcome::Done) => summary.poems.succeeded += 1,
                Ok(Outcome::AlreadyDone) => summary.poems.skipped += 1,
                Err(error) => summary.poems.fail(&poem_id, &error),
            }
        }

        info!(
            poems = summary.poems.succeeded,
            images = summary.images.succeeded,
            failed = summary.poems.failed.len() + summary.images.failed.len(),
            "file migration complete"
        );
        Ok(summary)
    }

    fn migrate_poem(
        &self,
        registry: &Registry,
        poem_id: &str,
        record: &PoemRecord,
        source: &Path,
    ) -> Result<Outcome> {
        let rendered = render_migrated(registry, record, source)?;
        let target = poem_path(self.layout, LayoutKind::Flat, poem_id);
        if target.exists() {
            let existing = fs::read_to_string(&target)
                .with_context(|| format!("failed to read {}", target.display()))?;
            if existing == rendered {
                return Ok(Outcome::AlreadyDone);
            }
            anyhow::bail!(
                "{} already exists with different content",
                display_path(&target)
            );
        }
        write_atomic(&target, rendered.as_bytes())?;
        Ok(Outcome::Done)
    }

    fn migrate_image(&self, image_id: &str, record: &ImageRecord) -> Result<Outcome> {
        let target = self
            .layout
            .image_dir
            .join(image_file_name(image_id, &record.file_extension));
        if record.original_filename.is_empty() {
            return Ok(Outcome::AlreadyDone);
        }
        let source = self.layout.image_dir.join(&record.original_filename);
        if source == target {
            return Ok(Outcome::AlreadyDone);
        }
        if !source.exists() {
            if !target.exists() {
                warn!(image_id, path = %source.display(), "original image file not found");
            }
            return Ok(Outcome::AlreadyDone);
        }
        if target.exists() {
            let same = fs::read(&source)
                .with_context(|| format!("failed to read {}", source.display()))?
                == fs::read(&target)
                    .with_context(|| format!("failed to read {}", target.display()))?;
            if !same {
                anyhow::bail!(
                    "{} already exists with different content",
                    display_path(&target)
                );
            }
            fs::remove_file(&source)
                .with_context(|| format!("failed to remove {}", source.display()))?;
            return Ok(Outcome::AlreadyDone);
        }
        fs::rename(&source, &target).with_context(|| {
            format!("failed to rename {} to {}", source.display(), target.display())
        })?;
        Ok(Outcome::Done)
    }

    /// Delete legacy poem files whose migrated copy exists with the expected
    /// content and forget their original location. A migrated file that does
    /// not match keeps the legacy file and is reported as a failure.
    pub fn cleanup(&self, registry: &mut Registry) -> Result<PhaseSummary> {
        let mut summary = PhaseSummary::default();
        let mut changed = false;

        for poem_id in registry.sorted_poem_ids() {
            let Some(original) = registry
                .poem(&poem_id)
                .and_then(|record| record.original_path.clone())
            else {
                continue;
            };
            let migrated = poem_path(self.layout, LayoutKind::Flat, &poem_id);
            if !migrated.exists() {
                summary.skipped += 1;
                continue;
            }
            let source = self.layout.project_root.join(&original);
            if source.exists()
                && let Err(error) = self.remove_verified_original(registry, &poem_id, &source, &migrated)
            {
                summary.fail(&poem_id, &error);
                continue;
            }
            if let Some(record) = registry.poem_mut(&poem_id) {
                record.original_path = None;
                changed = true;
            }
            summary.succeeded += 1;
        }

        if changed {
            registry.save()?;
        }
        info!(
            removed = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed.len(),
            "cleanup complete"
        );
        Ok(summary)
    }

    fn remove_verified_original(
        &self,
        registry: &Registry,
        poem_id: &str,
        source: &Path,
        migrated: &Path,
    ) -> Result<()> {
        let record = registry
            .poem(poem_id)
            .ok_or_else(|| anyhow!("poem {poem_id} is not registered"))?;
        let expected = render_migrated(registry, record, source)?;
        let actual = fs::read_to_string(migrated)
            .with_context(|| format!("failed to read {}", migrated.display()))?;
        if actual != expected {
            anyhow::bail!(
                "{} does not match the migrated rendering; legacy file kept",
                display_path(migrated)
            );
        }
        fs::remove_file(source).with_context(|| format!("failed to remove {}", source.display()))
    }

    pub fn sync_consumers(&self, registry: &Registry, dry_run: bool) -> Result<Vec<ConsumerUpdate>> {
        sync_consumers(self.layout, &poem_web_paths(self.layout, registry), dry_run)
    }

    /// Backup, generate the registry, migrate files, clean up and sync the
    /// loader scripts. Failures after the backup name the backup to restore.
    pub fn run(&self, registry: &mut Registry) -> Result<MigrationReport> {
        info!(phase = MigrationPhase::Backup.as_str(), "migration phase started");
        let backup_dir = self
            .backup("pre-migration backup")
            .context("migration aborted before any file was changed")?;
        let rollback_hint = |phase: MigrationPhase| {
            format!(
                "migration failed during {}; restore with `poetrytool rollback --backup {}`",
                phase.as_str(),
                display_path(&backup_dir)
            )
        };

        info!(phase = MigrationPhase::RegistryGeneration.as_str(), "migration phase started");
        let report = self
            .analyze()
            .with_context(|| rollback_hint(MigrationPhase::RegistryGeneration))?;
        let generation = self
            .generate_registry(registry, &report)
            .with_context(|| rollback_hint(MigrationPhase::RegistryGeneration))?;

        info!(phase = MigrationPhase::FileMigration.as_str(), "migration phase started");
        let files = self
            .migrate_files(registry)
            .with_context(|| rollback_hint(MigrationPhase::FileMigration))?;

        info!(phase = MigrationPhase::Cleanup.as_str(), "migration phase started");
        let cleanup = self
            .cleanup(registry)
            .with_context(|| rollback_hint(MigrationPhase::Cleanup))?;

        info!(phase = MigrationPhase::ConsumerSync.as_str(), "migration phase started");
        let consumers = self
            .sync_consumers(registry, false)
            .with_context(|| rollback_hint(MigrationPhase::ConsumerSync))?;

        Ok(MigrationReport {
            backup_dir,
            generation,
            files,
            cleanup,
            consumers,
        })
    }

    pub fn rollback(&self, backup_dir: &Path) -> Result<RestoreSummary> {
        restore_backup(self.layout, backup_dir)
    }
}

fn poem_record(poem: &DiscoveredPoem) -> PoemRecord {
    PoemRecord {
        title: poem.title.clone(),
        author: poem.author.clone(),
        language: poem.language.clone(),
        form: poem.form.clone(),
        length: poem.length.clone(),
        content: poem.body.clone(),
        original_filename: Some(poem.file_name.clone()),
        original_path: Some(poem.relative_path.clone()),
        category_path: Some(poem.category_path.clone()),
        ..PoemRecord::default()
    }
}

fn image_record(file_name: &str) -> ImageRecord {
    let extension = Path::new(file_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_string())
        .unwrap_or_default();
    ImageRecord {
        original_filename: file_name.to_string(),
        file_extension: normalize_extension(&extension),
        linked_poem: None,
        ..ImageRecord::default()
    }
}

/// The flat `Poetry/<id>.md` text for a registered poem, keeping the extra
/// header keys of its legacy file.
fn render_migrated(registry: &Registry, record: &PoemRecord, source: &Path) -> Result<String> {
    let raw =
        fs::read_to_string(source).with_context(|| format!("failed to read {}", source.display()))?;
    let original = frontmatter::parse(&raw).header;
    let header = poem_header(registry, record, LayoutKind::Flat, &original);
    Ok(frontmatter::serialize(&header, &record.content))
}

/// `image001.png` style names already owned by a registered image, which a
/// later scan sees as orphans.
fn is_migrated_image_name(registry: &Registry, file_name: &str) -> bool {
    registry
        .images()
        .iter()
        .any(|(image_id, image)| image_file_name(image_id, &image.file_extension) == file_name)
}
