use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backup::create_backup;
use crate::consumer::{ConsumerUpdate, sync_consumers};
use crate::filesystem::{display_path, remove_tree, write_atomic};
use crate::frontmatter::{self, Header};
use crate::migrate::ItemFailure;
use crate::registry::{LayoutKind, POEM_ID_PREFIX, PoemRecord, Registry, format_id, id_number};
use crate::runtime::{ContentLayout, ResolvedPaths};

pub const FOLDER_POEM_FILENAME: &str = "poem.md";
pub const FOLDER_IMAGE_STEM: &str = "image";
pub const POEM_MAPPING_FILENAME: &str = "poem_mapping.json";
pub const IMAGE_MAPPING_FILENAME: &str = "image_mapping.json";

/// `.png` style extension from `png`, `.PNG` or an empty string.
pub fn normalize_extension(extension: &str) -> String {
    let trimmed = extension.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        ".png".to_string()
    } else {
        format!(".{}", trimmed.to_ascii_lowercase())
    }
}

pub fn image_file_name(image_id: &str, extension: &str) -> String {
    format!("{image_id}{}", normalize_extension(extension))
}

/// Folder number for a poem ID (`poem007` -> `7`).
pub fn folder_name(poem_id: &str) -> String {
    id_number(POEM_ID_PREFIX, poem_id)
        .map(|number| number.to_string())
        .unwrap_or_else(|| poem_id.to_string())
}

pub fn poem_path(layout: &ContentLayout, kind: LayoutKind, poem_id: &str) -> PathBuf {
    match kind {
        LayoutKind::Flat => layout.poetry_dir.join(format!("{poem_id}.md")),
        LayoutKind::Folder => layout
            .poetry_dir
            .join(folder_name(poem_id))
            .join(FOLDER_POEM_FILENAME),
    }
}

/// Existing `image.<ext>` inside a poem folder, checking each allowed extension.
pub fn folder_image(layout: &ContentLayout, poem_id: &str) -> Option<PathBuf> {
    let folder = layout.poetry_dir.join(folder_name(poem_id));
    layout
        .image_extensions
        .iter()
        .map(|ext| folder.join(format!("{FOLDER_IMAGE_STEM}.{ext}")))
        .find(|candidate| candidate.is_file())
}

/// Where an image record's file is expected under the registry's layout.
pub fn image_path(layout: &ContentLayout, registry: &Registry, image_id: &str) -> Option<PathBuf> {
    let image = registry.image(image_id)?;
    let flat = layout
        .image_dir
        .join(image_file_name(image_id, &image.file_extension));
    match (registry.layout(), image.linked_poem.as_deref()) {
        (LayoutKind::Folder, Some(poem_id)) => Some(folder_image(layout, poem_id).unwrap_or_else(
            || {
                layout
                    .poetry_dir
                    .join(folder_name(poem_id))
                    .join(format!(
                        "{FOLDER_IMAGE_STEM}{}",
                        normalize_extension(&image.file_extension)
                    ))
            },
        )),
        _ => Some(flat),
    }
}

/// Site-relative poem paths in ascending ID order, as the loader scripts list them.
pub fn poem_web_paths(layout: &ContentLayout, registry: &Registry) -> Vec<String> {
    registry
        .sorted_poem_ids()
        .iter()
        .map(|poem_id| layout.web_path(&poem_path(layout, registry.layout(), poem_id)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoemMappingEntry {
    pub original_file: String,
    pub original_name: String,
    pub title: String,
    pub author: String,
    pub language: String,
    pub form: String,
    pub length: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyMappings {
    pub poems: BTreeMap<String, PoemMappingEntry>,
    pub images: BTreeMap<String, String>,
}

impl LegacyMappings {
    /// Folder numbers present in either mapping, ascending.
    pub fn folder_numbers(&self) -> Vec<String> {
        let mut numbers: Vec<String> = self
            .poems
            .keys()
            .chain(self.images.keys())
            .cloned()
            .collect();
        numbers.sort_by_key(|number| (number.parse::<u64>().unwrap_or(u64::MAX), number.clone()));
        numbers.dedup();
        numbers
    }
}

pub fn load_mappings(project_root: &Path) -> Result<Option<LegacyMappings>> {
    let poem_path = project_root.join(POEM_MAPPING_FILENAME);
    let image_path = project_root.join(IMAGE_MAPPING_FILENAME);
    if !poem_path.exists() && !image_path.exists() {
        return Ok(None);
    }
    Ok(Some(LegacyMappings {
        poems: read_json_or_default(&poem_path)?,
        images: read_json_or_default(&image_path)?,
    }))
}

fn read_json_or_default<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

const STANDARD_HEADER_KEYS: [&str; 5] = ["title", "author", "language", "form", "length"];
const DERIVED_HEADER_KEYS: [&str; 2] = ["image", "original_path"];
const RENUMBER_STAGING_PREFIX: &str = ".renumber-";

/// Header for a poem file: the record's metadata, the linked image name in
/// the flat layout, then any other keys carried over from `existing`.
pub fn poem_header(
    registry: &Registry,
    record: &PoemRecord,
    kind: LayoutKind,
    existing: &Header,
) -> Header {
    let mut header = Header::new();
    header.insert("title", record.title.as_str());
    header.insert("author", record.author.as_str());
    header.insert("language", record.language.as_str());
    header.insert("form", record.form.as_str());
    header.insert("length", record.length.as_str());
    if kind == LayoutKind::Flat
        && let Some(name) = linked_image_name(registry, record)
    {
        header.insert("image", name);
    }
    for (key, value) in existing.iter() {
        if STANDARD_HEADER_KEYS.contains(&key) || DERIVED_HEADER_KEYS.contains(&key) {
            continue;
        }
        header.insert(key, value);
    }
    header
}

fn linked_image_name(registry: &Registry, record: &PoemRecord) -> Option<String> {
    let image_id = record.image_id.as_deref()?;
    let image = registry.image(image_id)?;
    Some(image_file_name(image_id, &image.file_extension))
}

/// Bring the `image` key of each flat poem file in line with the registry's
/// links. Returns the poem IDs whose file changed. Folder poems carry no
/// `image` key.
pub fn refresh_image_headers(layout: &ContentLayout, registry: &Registry) -> Result<Vec<String>> {
    if registry.layout() != LayoutKind::Flat {
        return Ok(Vec::new());
    }
    let mut updated = Vec::new();
    for poem_id in registry.sorted_poem_ids() {
        let Some(record) = registry.poem(&poem_id) else {
            continue;
        };
        let path = poem_path(layout, LayoutKind::Flat, &poem_id);
        if !path.is_file() {
            continue;
        }
        let raw =
            fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let mut parsed = frontmatter::parse(&raw);
        let wanted = linked_image_name(registry, record);
        if parsed.header.get("image") == wanted.as_deref() {
            continue;
        }
        match wanted {
            Some(name) => parsed.header.insert("image", name),
            None => {
                parsed.header.remove("image");
            }
        }
        write_atomic(&path, frontmatter::serialize(&parsed.header, &parsed.body).as_bytes())?;
        updated.push(poem_id);
    }
    if !updated.is_empty() {
        info!(updated = updated.len(), "refreshed poem image headers");
    }
    Ok(updated)
}

#[derive(Debug, Clone, Serialize)]
pub struct RestructureSummary {
    pub backup_dir: PathBuf,
    pub folders: usize,
    pub images_moved: usize,
    pub skipped: Vec<String>,
    pub failed: Vec<ItemFailure>,
    pub consumers: Vec<ConsumerUpdate>,
}

struct StagedFolder {
    poem_id: String,
    number: String,
    source: PathBuf,
    folder: PathBuf,
}

/// Convert flat `Poetry/<id>.md` files into `Poetry/<n>/poem.md` folders with
/// their linked image moved alongside as `image.<ext>`. Every folder copy is
/// written before any flat file is removed; if any copy fails the new folders
/// are discarded and the flat layout stays as it was.
pub fn restructure_to_folders(
    paths: &ResolvedPaths,
    layout: &ContentLayout,
    registry: &mut Registry,
) -> Result<RestructureSummary> {
    if registry.layout() == LayoutKind::Folder {
        bail!("registry already uses the folder layout");
    }
    if registry.poems().is_empty() {
        bail!("registry has no poems to restructure");
    }
    let backup_dir = create_backup(paths, layout, "before folder restructure")?;

    let mut staged = Vec::new();
    let mut skipped = Vec::new();
    let mut failed = Vec::new();
    for poem_id in registry.sorted_poem_ids() {
        let source = poem_path(layout, LayoutKind::Flat, &poem_id);
        if !source.exists() {
            warn!(poem_id = %poem_id, path = %source.display(), "flat poem file missing; skipped");
            skipped.push(poem_id);
            continue;
        }
        let number = folder_name(&poem_id);
        let folder = layout.poetry_dir.join(&number);
        match stage_folder(&source, &folder) {
            Ok(()) => staged.push(StagedFolder {
                poem_id,
                number,
                source,
                folder,
            }),
            Err(error) => {
                warn!(poem_id = %poem_id, error = %format!("{error:#}"), "folder copy failed");
                failed.push(ItemFailure {
                    item: poem_id,
                    reason: format!("{error:#}"),
                });
            }
        }
    }

    if !failed.is_empty() {
        for entry in &staged {
            if let Err(error) = remove_tree(&entry.folder) {
                warn!(folder = %entry.folder.display(), error = %format!("{error:#}"), "could not discard staged folder");
            }
        }
        let detail = failed
            .iter()
            .map(|failure| format!("{}: {}", failure.item, failure.reason))
            .collect::<Vec<_>>()
            .join("; ");
        bail!(
            "restructure aborted; no flat files were removed ({} failed: {detail})",
            failed.len()
        );
    }

    let mut poem_mapping = BTreeMap::new();
    let mut image_mapping = BTreeMap::new();
    let mut images_moved = 0usize;
    for entry in &staged {
        let Some(record) = registry.poem(&entry.poem_id) else {
            continue;
        };
        if let Err(error) = fs::remove_file(&entry.source) {
            warn!(poem_id = %entry.poem_id, %error, "flat poem file not removed");
            failed.push(ItemFailure {
                item: entry.poem_id.clone(),
                reason: format!("failed to remove {}: {error}", entry.source.display()),
            });
        }
        poem_mapping.insert(
            entry.number.clone(),
            PoemMappingEntry {
                original_file: layout.web_path(&entry.source),
                original_name: format!("{}.md", entry.poem_id),
                title: record.title.clone(),
                author: record.author.clone(),
                language: record.language.clone(),
                form: record.form.clone(),
                length: record.length.clone(),
            },
        );

        let Some(image_id) = record.image_id.as_deref() else {
            continue;
        };
        let Some(image) = registry.image(image_id) else {
            continue;
        };
        let flat_image = layout
            .image_dir
            .join(image_file_name(image_id, &image.file_extension));
        if !flat_image.exists() {
            warn!(image_id, path = %flat_image.display(), "linked image missing; not moved");
            continue;
        }
        let target = entry.folder.join(format!(
            "{FOLDER_IMAGE_STEM}{}",
            normalize_extension(&image.file_extension)
        ));
        match move_file(&flat_image, &target) {
            Ok(()) => {
                images_moved += 1;
                image_mapping.insert(entry.number.clone(), image.original_filename.clone());
            }
            Err(error) => {
                warn!(image_id, error = %format!("{error:#}"), "linked image not moved");
                failed.push(ItemFailure {
                    item: image_id.to_string(),
                    reason: format!("{error:#}"),
                });
            }
        }
    }

    write_mapping(&layout.project_root.join(POEM_MAPPING_FILENAME), &poem_mapping)?;
    write_mapping(&layout.project_root.join(IMAGE_MAPPING_FILENAME), &image_mapping)?;

    registry.set_layout(LayoutKind::Folder);
    registry.save()?;
    let consumers = sync_consumers(layout, &poem_web_paths(layout, registry), false)?;

    info!(
        folders = staged.len(),
        images_moved,
        skipped = skipped.len(),
        failed = failed.len(),
        "folder restructure complete"
    );
    Ok(RestructureSummary {
        backup_dir,
        folders: staged.len(),
        images_moved,
        skipped,
        failed,
        consumers,
    })
}

fn stage_folder(source: &Path, folder: &Path) -> Result<()> {
    if folder.exists() {
        bail!("{} already exists", display_path(folder));
    }
    let raw =
        fs::read_to_string(source).with_context(|| format!("failed to read {}", source.display()))?;
    let mut parsed = frontmatter::parse(&raw);
    parsed.header.remove("image");
    let rendered = frontmatter::serialize(&parsed.header, &parsed.body);
    write_atomic(&folder.join(FOLDER_POEM_FILENAME), rendered.as_bytes())
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RenumberSummary {
    pub backup_dir: Option<PathBuf>,
    pub renamed: Vec<(String, String)>,
    pub consumers: Vec<ConsumerUpdate>,
}

/// Reassign poem IDs to a gap-free `poem001..` sequence in their current
/// order, moving each poem's file (flat) or folder (folder layout) to match.
/// Image IDs are unchanged.
pub fn renumber_poems(
    paths: &ResolvedPaths,
    layout: &ContentLayout,
    registry: &mut Registry,
) -> Result<RenumberSummary> {
    let renamed: Vec<(String, String)> = registry
        .sorted_poem_ids()
        .into_iter()
        .enumerate()
        .map(|(index, poem_id)| (poem_id, format_id(POEM_ID_PREFIX, index as u32 + 1)))
        .filter(|(from, to)| from != to)
        .collect();
    if renamed.is_empty() {
        if registry.metadata().last_poem_number != 0 {
            registry.forget_retired_poem_ids();
            registry.save()?;
        }
        return Ok(RenumberSummary::default());
    }

    let backup_dir = create_backup(paths, layout, "before renumbering poems")?;
    let hint = || {
        format!(
            "renumbering failed; restore with `poetrytool backup restore {} --yes`",
            display_path(&backup_dir)
        )
    };
    let kind = registry.layout();
    move_poem_units(layout, kind, &renamed).with_context(hint)?;

    for (from, to) in &renamed {
        registry.rename_poem(from, to).with_context(hint)?;
    }
    registry.forget_retired_poem_ids();
    registry.save()?;

    if kind == LayoutKind::Folder
        && let Some(mappings) = load_mappings(&layout.project_root)?
    {
        let numbers: BTreeMap<String, String> = renamed
            .iter()
            .map(|(from, to)| (folder_name(from), folder_name(to)))
            .collect();
        let renumber = |key: &String| numbers.get(key).cloned().unwrap_or_else(|| key.clone());
        let poems: BTreeMap<String, PoemMappingEntry> = mappings
            .poems
            .iter()
            .map(|(key, entry)| (renumber(key), entry.clone()))
            .collect();
        let images: BTreeMap<String, String> = mappings
            .images
            .iter()
            .map(|(key, name)| (renumber(key), name.clone()))
            .collect();
        write_mapping(&layout.project_root.join(POEM_MAPPING_FILENAME), &poems)?;
        write_mapping(&layout.project_root.join(IMAGE_MAPPING_FILENAME), &images)?;
    }

    let consumers = sync_consumers(layout, &poem_web_paths(layout, registry), false)?;
    info!(renamed = renamed.len(), "renumbered poems");
    Ok(RenumberSummary {
        backup_dir: Some(backup_dir),
        renamed,
        consumers,
    })
}

/// The file (flat) or folder (folder layout) that holds one poem.
fn poem_unit(layout: &ContentLayout, kind: LayoutKind, poem_id: &str) -> PathBuf {
    match kind {
        LayoutKind::Flat => poem_path(layout, kind, poem_id),
        LayoutKind::Folder => layout.poetry_dir.join(folder_name(poem_id)),
    }
}

/// Two passes through staging names so a target can be another poem's
/// current location.
fn move_poem_units(layout: &ContentLayout, kind: LayoutKind, renamed: &[(String, String)]) -> Result<()> {
    let mut staged = Vec::new();
    for (from, to) in renamed {
        let source = poem_unit(layout, kind, from);
        if !source.exists() {
            warn!(poem_id = %from, path = %source.display(), "poem file missing; only the registry entry is renumbered");
            continue;
        }
        let staging = layout
            .poetry_dir
            .join(format!("{RENUMBER_STAGING_PREFIX}{}", folder_name(to)));
        fs::rename(&source, &staging).with_context(|| {
            format!("failed to move {} to {}", source.display(), staging.display())
        })?;
        staged.push((staging, poem_unit(layout, kind, to)));
    }
    for (staging, target) in staged {
        if target.exists() {
            bail!("{} already exists", display_path(&target));
        }
        fs::rename(&staging, &target).with_context(|| {
            format!("failed to move {} to {}", staging.display(), target.display())
        })?;
    }
    Ok(())
}

pub(crate) fn move_file(source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }
    if fs::rename(source, target).is_ok() {
        return Ok(());
    }
    fs::copy(source, target).with_context(|| {
        format!("failed to copy {} to {}", source.display(), target.display())
    })?;
    fs::remove_file(source).with_context(|| format!("failed to remove {}", source.display()))?;
    Ok(())
}

fn write_mapping<T: Serialize>(path: &Path, mapping: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(mapping)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    write_atomic(path, rendered.as_bytes())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::*;
    use crate::config::PoetryConfig;
    use crate::registry::{ImageRecord, PoemRecord};

    fn layout_for(root: &Path) -> (ResolvedPaths, ContentLayout) {
        let paths = ResolvedPaths::for_root(root);
        let layout = ContentLayout::resolve(&paths, &PoetryConfig::default()).expect("layout");
        (paths, layout)
    }

    #[test]
    fn locates_flat_and_folder_paths() {
        let (_, layout) = layout_for(Path::new("/site"));
        assert_eq!(
            layout.web_path(&poem_path(&layout, LayoutKind::Flat, "poem007")),
            "Poetry/poem007.md"
        );
        assert_eq!(
            layout.web_path(&poem_path(&layout, LayoutKind::Folder, "poem007")),
            "Poetry/7/poem.md"
        );
        assert_eq!(image_file_name("image003", "JPG"), "image003.jpg");
        assert_eq!(image_file_name("image003", ""), "image003.png");
    }

    #[test]
    fn restructure_moves_poems_and_images_into_folders() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        let (paths, layout) = layout_for(root);
        fs::create_dir_all(&layout.poetry_dir).expect("mkdir");
        fs::create_dir_all(&layout.image_dir).expect("mkdir");
        fs::create_dir_all(root.join("js")).expect("mkdir");
        fs::write(root.join("js/content-loader.js"), "const poemFilePaths = [];\n").expect("write");
        fs::write(root.join("js/dynamic-poem-loader.js"), "const staticPaths = [];\n")
            .expect("write");

        let mut registry = Registry::new(&layout.registry_path);
        for (id, title) in [("poem001", "Rain"), ("poem002", "Dusk")] {
            registry
                .add_poem(
                    id,
                    PoemRecord {
                        title: title.to_string(),
                        author: "Manas Pandey".to_string(),
                        ..PoemRecord::default()
                    },
                )
                .expect("add");
        }
        registry
            .add_image(
                "image001",
                ImageRecord {
                    original_filename: "rain-cloud.png".to_string(),
                    file_extension: ".png".to_string(),
                    ..ImageRecord::default()
                },
            )
            .expect("add image");
        registry.link_poem_image("poem001", "image001").expect("link");
        registry.save().expect("save");

        fs::write(
            layout.poetry_dir.join("poem001.md"),
            "---\ntitle: \"Rain\"\nimage: \"image001.png\"\n---\nRain\n",
        )
        .expect("write");
        fs::write(layout.poetry_dir.join("poem002.md"), "---\ntitle: \"Dusk\"\n---\nDusk\n")
            .expect("write");
        fs::write(layout.image_dir.join("image001.png"), b"png").expect("write");

        let summary = restructure_to_folders(&paths, &layout, &mut registry).expect("restructure");
        assert_eq!(summary.folders, 2);
        assert_eq!(summary.images_moved, 1);
        assert!(summary.backup_dir.exists());

        let poem = fs::read_to_string(layout.poetry_dir.join("1").join("poem.md")).expect("read");
        assert_eq!(poem, "---\ntitle: \"Rain\"\n---\nRain\n");
        assert!(layout.poetry_dir.join("1").join("image.png").exists());
        assert!(!layout.image_dir.join("image001.png").exists());
        assert!(!layout.poetry_dir.join("poem001.md").exists());
        assert_eq!(
            folder_image(&layout, "poem001"),
            Some(layout.poetry_dir.join("1").join("image.png"))
        );
        assert!(folder_image(&layout, "poem002").is_none());

        let reloaded = Registry::load(&layout.registry_path).expect("reload");
        assert_eq!(reloaded.layout(), LayoutKind::Folder);
        assert_eq!(
            poem_web_paths(&layout, &reloaded),
            vec!["Poetry/1/poem.md".to_string(), "Poetry/2/poem.md".to_string()]
        );
        let loader = fs::read_to_string(root.join("js/content-loader.js")).expect("read");
        assert!(loader.contains("\"Poetry/2/poem.md\""));

        let mappings = load_mappings(root).expect("load").expect("present");
        assert_eq!(mappings.poems["1"].title, "Rain");
        assert_eq!(mappings.poems["2"].original_file, "Poetry/poem002.md");
        assert_eq!(mappings.images["1"], "rain-cloud.png");
        assert_eq!(mappings.folder_numbers(), vec!["1".to_string(), "2".to_string()]);

        let err = restructure_to_folders(&paths, &layout, &mut registry).expect_err("second run");
        assert!(err.to_string().contains("already uses the folder layout"));
    }

    #[test]
    fn load_mappings_absent_is_none() {
        let temp = tempdir().expect("tempdir");
        assert!(load_mappings(temp.path()).expect("load").is_none());
    }

    fn write_loaders(root: &Path) {
        fs::create_dir_all(root.join("js")).expect("mkdir");
        fs::write(root.join("js/content-loader.js"), "const poemFilePaths = [];\n").expect("write");
        fs::write(root.join("js/dynamic-poem-loader.js"), "const staticPaths = [];\n")
            .expect("write");
    }

    fn titled(title: &str) -> PoemRecord {
        PoemRecord {
            title: title.to_string(),
            author: "Manas Pandey".to_string(),
            language: "en".to_string(),
            form: "Haiku".to_string(),
            length: "short".to_string(),
            ..PoemRecord::default()
        }
    }

    fn png() -> ImageRecord {
        ImageRecord {
            original_filename: "rain-cloud.png".to_string(),
            file_extension: ".png".to_string(),
            ..ImageRecord::default()
        }
    }

    #[test]
    fn poem_header_orders_keys_and_drops_derived_ones() {
        let temp = tempdir().expect("tempdir");
        let mut registry = Registry::new(&temp.path().join("registry.json"));
        registry.add_poem("poem001", titled("Rain")).expect("add");
        registry.add_image("image001", png()).expect("add image");
        registry.link_poem_image("poem001", "image001").expect("link");

        let mut existing = Header::new();
        existing.insert("mood", "grey");
        existing.insert("title", "Old title");
        existing.insert("original_path", "Poetry/by_language/x.md");
        existing.insert("image", "rain.png");
        let record = registry.poem("poem001").expect("poem");

        let flat = poem_header(&registry, record, LayoutKind::Flat, &existing);
        let keys: Vec<&str> = flat.iter().map(|(key, _)| key).collect();
        assert_eq!(
            keys,
            vec!["title", "author", "language", "form", "length", "image", "mood"]
        );
        assert_eq!(flat.get("title"), Some("Rain"));
        assert_eq!(flat.get("image"), Some("image001.png"));

        let folder = poem_header(&registry, record, LayoutKind::Folder, &existing);
        assert!(!folder.contains_key("image"));
        assert_eq!(folder.get("mood"), Some("grey"));
    }

    #[test]
    fn refresh_image_headers_follows_registry_links() {
        let temp = tempdir().expect("tempdir");
        let (_, layout) = layout_for(temp.path());
        fs::create_dir_all(&layout.poetry_dir).expect("mkdir");
        let mut registry = Registry::new(&layout.registry_path);
        registry.add_poem("poem001", titled("Rain")).expect("add");
        registry.add_poem("poem002", titled("Dusk")).expect("add");
        registry.add_image("image001", png()).expect("add image");
        registry.link_poem_image("poem001", "image001").expect("link");
        fs::write(layout.poetry_dir.join("poem001.md"), "---\ntitle: \"Rain\"\n---\nRain\n")
            .expect("write");
        fs::write(
            layout.poetry_dir.join("poem002.md"),
            "---\ntitle: \"Dusk\"\nimage: \"image009.png\"\n---\nDusk\n",
        )
        .expect("write");

        let updated = refresh_image_headers(&layout, &registry).expect("refresh");
        assert_eq!(updated, vec!["poem001".to_string(), "poem002".to_string()]);
        assert_eq!(
            fs::read_to_string(layout.poetry_dir.join("poem001.md")).expect("read"),
            "---\ntitle: \"Rain\"\nimage: \"image001.png\"\n---\nRain\n"
        );
        assert_eq!(
            fs::read_to_string(layout.poetry_dir.join("poem002.md")).expect("read"),
            "---\ntitle: \"Dusk\"\n---\nDusk\n"
        );
        assert!(refresh_image_headers(&layout, &registry).expect("again").is_empty());
    }

    #[test]
    fn restructure_copy_failure_leaves_flat_layout_intact() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        let (paths, layout) = layout_for(root);
        write_loaders(root);
        fs::create_dir_all(layout.poetry_dir.join("poem001.md")).expect("dir in place of poem");
        fs::write(layout.poetry_dir.join("poem002.md"), "---\ntitle: \"Dusk\"\n---\nDusk\n")
            .expect("write");
        let mut registry = Registry::new(&layout.registry_path);
        registry.add_poem("poem001", titled("Rain")).expect("add");
        registry.add_poem("poem002", titled("Dusk")).expect("add");
        registry.save().expect("save");

        let err = restructure_to_folders(&paths, &layout, &mut registry).expect_err("copy fails");
        let message = format!("{err:#}");
        assert!(message.contains("no flat files were removed"));
        assert!(message.contains("poem001"));

        assert!(layout.poetry_dir.join("poem002.md").is_file());
        assert!(!layout.poetry_dir.join("1").exists());
        assert!(!layout.poetry_dir.join("2").exists());
        assert!(load_mappings(root).expect("load").is_none());
        let reloaded = Registry::load(&layout.registry_path).expect("reload");
        assert_eq!(reloaded.layout(), LayoutKind::Flat);
    }

    #[test]
    fn renumber_closes_gaps_and_moves_flat_files() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        let (paths, layout) = layout_for(root);
        write_loaders(root);
        fs::create_dir_all(&layout.poetry_dir).expect("mkdir");
        let mut registry = Registry::new(&layout.registry_path);
        for (id, title) in [
            ("poem001", "Rain"),
            ("poem003", "Dusk"),
            ("poem007", "Tide"),
            ("poem008", "Gone"),
        ] {
            registry.add_poem(id, titled(title)).expect("add");
            fs::write(
                layout.poetry_dir.join(format!("{id}.md")),
                format!("---\ntitle: \"{title}\"\n---\n{title}\n"),
            )
            .expect("write");
        }
        registry.add_image("image001", png()).expect("add image");
        registry.link_poem_image("poem007", "image001").expect("link");
        registry.remove_poem("poem008").expect("remove");
        fs::remove_file(layout.poetry_dir.join("poem008.md")).expect("remove file");
        assert_eq!(registry.next_poem_id(), "poem009");

        let summary = renumber_poems(&paths, &layout, &mut registry).expect("renumber");
        assert!(summary.backup_dir.is_some());
        assert_eq!(
            summary.renamed,
            vec![
                ("poem003".to_string(), "poem002".to_string()),
                ("poem007".to_string(), "poem003".to_string()),
            ]
        );

        let reloaded = Registry::load(&layout.registry_path).expect("reload");
        assert_eq!(reloaded.sorted_poem_ids(), vec!["poem001", "poem002", "poem003"]);
        assert_eq!(reloaded.poem("poem003").expect("poem").title, "Tide");
        assert_eq!(
            reloaded.poem("poem003").expect("poem").image_id.as_deref(),
            Some("image001")
        );
        assert_eq!(
            reloaded.image("image001").expect("image").linked_poem.as_deref(),
            Some("poem003")
        );
        assert_eq!(reloaded.next_poem_id(), "poem004");
        assert_eq!(
            fs::read_to_string(layout.poetry_dir.join("poem002.md")).expect("read"),
            "---\ntitle: \"Dusk\"\n---\nDusk\n"
        );
        assert!(!layout.poetry_dir.join("poem007.md").exists());
        let loader = fs::read_to_string(root.join("js/content-loader.js")).expect("read");
        assert!(loader.contains("\"Poetry/poem003.md\""));
        assert!(!loader.contains("poem007"));

        let again = renumber_poems(&paths, &layout, &mut registry).expect("already compact");
        assert!(again.renamed.is_empty());
        assert!(again.backup_dir.is_none());
    }

    #[test]
    fn renumber_moves_folders_and_remaps_mapping_keys() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        let (paths, layout) = layout_for(root);
        write_loaders(root);
        let mut registry = Registry::new(&layout.registry_path);
        registry.set_layout(LayoutKind::Folder);
        let mut poems = BTreeMap::new();
        for (id, number, title) in [("poem002", "2", "Rain"), ("poem005", "5", "Dusk")] {
            registry.add_poem(id, titled(title)).expect("add");
            let folder = layout.poetry_dir.join(number);
            fs::create_dir_all(&folder).expect("mkdir");
            fs::write(folder.join("poem.md"), format!("---\ntitle: \"{title}\"\n---\n{title}\n"))
                .expect("write");
            poems.insert(
                number.to_string(),
                PoemMappingEntry {
                    original_file: format!("Poetry/{id}.md"),
                    original_name: format!("{id}.md"),
                    title: title.to_string(),
                    author: "Manas Pandey".to_string(),
                    language: "en".to_string(),
                    form: "Haiku".to_string(),
                    length: "short".to_string(),
                },
            );
        }
        fs::write(layout.poetry_dir.join("5").join("image.png"), b"png").expect("write");
        let images = BTreeMap::from([("5".to_string(), "dusk.png".to_string())]);
        write_mapping(&root.join(POEM_MAPPING_FILENAME), &poems).expect("poem mapping");
        write_mapping(&root.join(IMAGE_MAPPING_FILENAME), &images).expect("image mapping");

        let summary = renumber_poems(&paths, &layout, &mut registry).expect("renumber");
        assert_eq!(summary.renamed.len(), 2);

        assert!(layout.poetry_dir.join("1").join("poem.md").is_file());
        assert!(layout.poetry_dir.join("2").join("image.png").is_file());
        assert!(!layout.poetry_dir.join("5").exists());
        assert_eq!(
            fs::read_to_string(layout.poetry_dir.join("2").join("poem.md")).expect("read"),
            "---\ntitle: \"Dusk\"\n---\nDusk\n"
        );

        let mappings = load_mappings(root).expect("load").expect("present");
        assert_eq!(mappings.poems["1"].title, "Rain");
        assert_eq!(mappings.poems["2"].original_file, "Poetry/poem005.md");
        assert_eq!(mappings.images["2"], "dusk.png");
        assert_eq!(mappings.folder_numbers(), vec!["1".to_string(), "2".to_string()]);
    }
}
