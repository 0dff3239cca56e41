use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{info, warn};

use crate::backup::create_backup;
use crate::config::PoetryConfig;
use crate::consumer::{ConsumerUpdate, sync_consumers};
use crate::filesystem::{display_path, remove_tree, write_atomic};
use crate::frontmatter::{self, Header};
use crate::layout::{
    folder_image, folder_name, image_file_name, move_file, poem_header, poem_path, poem_web_paths,
};
use crate::registry::{LayoutKind, POEM_ID_PREFIX, PoemRecord, Registry, format_id, timestamp_now};
use crate::runtime::{ContentLayout, ResolvedPaths};

#[derive(Debug, Clone)]
pub struct NewPoem {
    pub title: String,
    pub content: String,
    pub author: Option<String>,
    pub language: String,
    pub form: String,
    pub length: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedPoem {
    pub poem_id: String,
    pub path: PathBuf,
    pub consumers: Vec<ConsumerUpdate>,
}

fn check_language(config: &PoetryConfig, language: &str) -> Result<()> {
    if config.language_name(language).is_none() {
        bail!(
            "unknown language `{language}`; expected one of: {}",
            config
                .collection
                .languages
                .iter()
                .map(|language| language.code.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(())
}

fn check_form(config: &PoetryConfig, form: &str) -> Result<()> {
    if !config.is_known_form(form) {
        bail!(
            "unknown form `{form}`; expected one of: {}",
            config.collection.forms.join(", ")
        );
    }
    Ok(())
}

fn check_length(config: &PoetryConfig, length: &str) -> Result<()> {
    if !config.is_known_length(length) {
        bail!(
            "unknown length `{length}`; expected one of: {}",
            config.collection.lengths.join(", ")
        );
    }
    Ok(())
}

/// Register a new poem under the next ID, write its file in the active
/// layout and refresh the loader scripts.
pub fn create_poem(
    layout: &ContentLayout,
    config: &PoetryConfig,
    registry: &mut Registry,
    poem: &NewPoem,
) -> Result<CreatedPoem> {
    let title = poem.title.trim();
    let content = poem.content.trim();
    if title.is_empty() || content.is_empty() {
        bail!("title and content are required");
    }
    check_language(config, &poem.language)?;
    check_form(config, &poem.form)?;
    check_length(config, &poem.length)?;
    let author = poem
        .author
        .as_deref()
        .map(str::trim)
        .filter(|author| !author.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| config.default_author());

    let poem_id = registry.next_poem_id();
    let path = poem_path(layout, registry.layout(), &poem_id);
    if path.exists() {
        bail!(
            "{} already exists but is not registered; refusing to overwrite",
            display_path(&path)
        );
    }

    let body = format!("{content}\n");
    let record = PoemRecord {
        title: title.to_string(),
        author,
        language: poem.language.clone(),
        form: poem.form.clone(),
        length: poem.length.clone(),
        content: body.clone(),
        ..PoemRecord::default()
    };
    let header = poem_header(registry, &record, registry.layout(), &Header::new());
    write_atomic(&path, frontmatter::serialize(&header, &body).as_bytes())?;
    registry.add_poem(&poem_id, record)?;
    registry.save()?;
    let consumers = sync_consumers(layout, &poem_web_paths(layout, registry), false)?;
    info!(poem_id = %poem_id, path = %path.display(), "created poem");

    Ok(CreatedPoem {
        poem_id,
        path,
        consumers,
    })
}

/// Find a poem by ID (`poem007`), bare number (`7`) or legacy file name.
pub fn resolve_poem(registry: &Registry, reference: &str) -> Result<String> {
    let reference = reference.trim();
    if registry.poem(reference).is_some() {
        return Ok(reference.to_string());
    }
    if let Ok(number) = reference.parse::<u32>() {
        let poem_id = format_id(POEM_ID_PREFIX, number);
        if registry.poem(&poem_id).is_some() {
            return Ok(poem_id);
        }
    }
    if let Some(poem_id) = registry.find_poem_by_original_filename(reference) {
        return Ok(poem_id.to_string());
    }
    bail!("no poem matches `{reference}`")
}

#[derive(Debug, Clone, Default)]
pub struct PoemFilter {
    pub language: Option<String>,
    pub form: Option<String>,
    pub length: Option<String>,
    pub author: Option<String>,
}

impl PoemFilter {
    fn matches(&self, record: &PoemRecord) -> bool {
        let field = |wanted: &Option<String>, value: &str| {
            wanted
                .as_deref()
                .is_none_or(|wanted| wanted.trim().eq_ignore_ascii_case(value.trim()))
        };
        field(&self.language, &record.language)
            && field(&self.form, &record.form)
            && field(&self.length, &record.length)
            && field(&self.author, &record.author)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoemSummary {
    pub poem_id: String,
    pub title: String,
    pub author: String,
    pub language: String,
    pub form: String,
    pub length: String,
    pub image_id: Option<String>,
}

impl PoemSummary {
    fn new(poem_id: &str, record: &PoemRecord) -> Self {
        Self {
            poem_id: poem_id.to_string(),
            title: record.title.clone(),
            author: record.author.clone(),
            language: record.language.clone(),
            form: record.form.clone(),
            length: record.length.clone(),
            image_id: record.image_id.clone(),
        }
    }
}

/// Registered poems in ID order, narrowed by `filter` (case-insensitive).
pub fn list_poems(registry: &Registry, filter: &PoemFilter) -> Vec<PoemSummary> {
    registry
        .sorted_poem_ids()
        .iter()
        .filter_map(|poem_id| {
            let record = registry.poem(poem_id)?;
            filter
                .matches(record)
                .then(|| PoemSummary::new(poem_id, record))
        })
        .collect()
}

/// Poems whose title or text contains `query`, ignoring case.
pub fn search_poems(registry: &Registry, query: &str) -> Result<Vec<PoemSummary>> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        bail!("search query cannot be empty");
    }
    Ok(registry
        .sorted_poem_ids()
        .iter()
        .filter_map(|poem_id| {
            let record = registry.poem(poem_id)?;
            let hit = record.title.to_lowercase().contains(&needle)
                || record.content.to_lowercase().contains(&needle);
            hit.then(|| PoemSummary::new(poem_id, record))
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct PoemView {
    pub poem_id: String,
    pub path: PathBuf,
    pub file_present: bool,
    pub image_path: Option<PathBuf>,
    pub record: PoemRecord,
}

pub fn show_poem(layout: &ContentLayout, registry: &Registry, poem_id: &str) -> Result<PoemView> {
    let Some(record) = registry.poem(poem_id) else {
        bail!("unknown poem `{poem_id}`");
    };
    let path = poem_path(layout, registry.layout(), poem_id);
    let image_path = record
        .image_id
        .as_deref()
        .and_then(|image_id| crate::layout::image_path(layout, registry, image_id));
    Ok(PoemView {
        poem_id: poem_id.to_string(),
        file_present: path.is_file(),
        path,
        image_path,
        record: record.clone(),
    })
}

/// Fields to change on an existing poem. `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct PoemUpdate {
    pub title: Option<String>,
    pub author: Option<String>,
    pub language: Option<String>,
    pub form: Option<String>,
    pub length: Option<String>,
    pub content: Option<String>,
}

impl PoemUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.author.is_none()
            && self.language.is_none()
            && self.form.is_none()
            && self.length.is_none()
            && self.content.is_none()
    }
}

/// Apply `update` to the registry record and rewrite the poem file. Header
/// keys the registry does not track are kept.
pub fn update_poem(
    layout: &ContentLayout,
    config: &PoetryConfig,
    registry: &mut Registry,
    poem_id: &str,
    update: &PoemUpdate,
) -> Result<PathBuf> {
    if update.is_empty() {
        bail!("nothing to update");
    }
    let Some(current) = registry.poem(poem_id) else {
        bail!("unknown poem `{poem_id}`");
    };
    let mut record = current.clone();
    if let Some(title) = &update.title {
        let title = title.trim();
        if title.is_empty() {
            bail!("title cannot be empty");
        }
        record.title = title.to_string();
    }
    if let Some(author) = &update.author {
        let author = author.trim();
        if author.is_empty() {
            bail!("author cannot be empty");
        }
        record.author = author.to_string();
    }
    if let Some(language) = &update.language {
        check_language(config, language)?;
        record.language = language.clone();
    }
    if let Some(form) = &update.form {
        check_form(config, form)?;
        record.form = form.clone();
    }
    if let Some(length) = &update.length {
        check_length(config, length)?;
        record.length = length.clone();
    }
    if let Some(content) = &update.content {
        let content = content.trim();
        if content.is_empty() {
            bail!("content cannot be empty");
        }
        record.content = format!("{content}\n");
    }
    record.last_modified = timestamp_now();

    let path = poem_path(layout, registry.layout(), poem_id);
    if !path.is_file() {
        bail!("{} is missing; run `poetrytool validate`", display_path(&path));
    }
    let raw =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let existing = frontmatter::parse(&raw).header;
    let header = poem_header(registry, &record, registry.layout(), &existing);
    write_atomic(&path, frontmatter::serialize(&header, &record.content).as_bytes())?;

    if let Some(slot) = registry.poem_mut(poem_id) {
        *slot = record;
    }
    registry.save()?;
    info!(poem_id, path = %path.display(), "updated poem");
    Ok(path)
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletedPoem {
    pub poem_id: String,
    pub title: String,
    pub backup_dir: PathBuf,
    pub released_image: Option<String>,
    pub consumers: Vec<ConsumerUpdate>,
}

/// Remove a poem's file and registry entry after taking a backup. A linked
/// image is kept as an unassigned `image###` file in the image directory.
pub fn delete_poem(
    paths: &ResolvedPaths,
    layout: &ContentLayout,
    registry: &mut Registry,
    poem_id: &str,
) -> Result<DeletedPoem> {
    if registry.poem(poem_id).is_none() {
        bail!("unknown poem `{poem_id}`");
    }
    let backup_dir = create_backup(paths, layout, &format!("before deleting {poem_id}"))?;
    let hint = || {
        format!(
            "deleting {poem_id} failed; restore with `poetrytool backup restore {} --yes`",
            display_path(&backup_dir)
        )
    };

    let kind = registry.layout();
    let record = registry.remove_poem(poem_id).with_context(hint)?;
    match kind {
        LayoutKind::Flat => {
            let path = poem_path(layout, kind, poem_id);
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))
                    .with_context(hint)?;
            } else {
                warn!(poem_id, path = %path.display(), "poem file already absent");
            }
        }
        LayoutKind::Folder => {
            if let Some(image_id) = record.image_id.as_deref()
                && let Some(image) = registry.image(image_id)
                && let Some(source) = folder_image(layout, poem_id)
            {
                let target = layout
                    .image_dir
                    .join(image_file_name(image_id, &image.file_extension));
                move_file(&source, &target).with_context(hint)?;
            }
            remove_tree(&layout.poetry_dir.join(folder_name(poem_id))).with_context(hint)?;
        }
    }

    registry.save()?;
    let consumers = sync_consumers(layout, &poem_web_paths(layout, registry), false)?;
    info!(poem_id, released_image = ?record.image_id, "deleted poem");
    Ok(DeletedPoem {
        poem_id: poem_id.to_string(),
        title: record.title,
        backup_dir,
        released_image: record.image_id,
        consumers,
    })
}
