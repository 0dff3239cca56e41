use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::filesystem::write_atomic;

pub const POEM_ID_PREFIX: &str = "poem";
pub const IMAGE_ID_PREFIX: &str = "image";
pub const SCHEMA_VERSION: &str = "1.0";
const ID_WIDTH: usize = 3;

/// Conflicts raised by registry mutations. The registry is left untouched
/// whenever one of these is returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("poem already registered: {0}")]
    PoemExists(String),

    #[error("image already registered: {0}")]
    ImageExists(String),

    #[error("unknown poem: {0}")]
    UnknownPoem(String),

    #[error("unknown image: {0}")]
    UnknownImage(String),

    #[error("image {image_id} is already linked to {poem_id}")]
    ImageAlreadyLinked { image_id: String, poem_id: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    #[default]
    Flat,
    Folder,
}

impl LayoutKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Folder => "folder",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoemRecord {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub form: String,
    #[serde(default)]
    pub length: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_path: Option<String>,
    #[serde(default)]
    pub created_date: String,
    #[serde(default)]
    pub last_modified: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    #[serde(default)]
    pub original_filename: String,
    #[serde(default)]
    pub file_extension: String,
    #[serde(default)]
    pub linked_poem: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryMetadata {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub total_poems: usize,
    #[serde(default)]
    pub total_images: usize,
    #[serde(default)]
    pub layout: LayoutKind,
    /// Highest poem number ever handed out and since deleted.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub last_poem_number: u32,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl Default for RegistryMetadata {
    fn default() -> Self {
        let now = timestamp_now();
        Self {
            version: default_version(),
            created: now.clone(),
            last_updated: now,
            total_poems: 0,
            total_images: 0,
            layout: LayoutKind::Flat,
            last_poem_number: 0,
            extra: BTreeMap::new(),
        }
    }
}

fn default_version() -> String {
    SCHEMA_VERSION.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(default)]
    pub poems: BTreeMap<String, PoemRecord>,
    #[serde(default)]
    pub images: BTreeMap<String, ImageRecord>,
    #[serde(default)]
    pub metadata: RegistryMetadata,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// ID-keyed poem and image records backed by one JSON file.
#[derive(Debug, Clone)]
pub struct Registry {
    path: PathBuf,
    document: RegistryDocument,
}

impl Registry {
    /// Empty registry that will persist to `path`.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            document: RegistryDocument::default(),
        }
    }

    /// Load from `path`. An absent file yields an empty registry; a file that
    /// cannot be parsed is an error and is left as-is on disk.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "registry file absent; starting empty");
            return Ok(Self::new(path));
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read registry {}", path.display()))?;
        let document: RegistryDocument = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse registry {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            document,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &RegistryMetadata {
        &self.document.metadata
    }

    pub fn layout(&self) -> LayoutKind {
        self.document.metadata.layout
    }

    pub fn set_layout(&mut self, layout: LayoutKind) {
        self.document.metadata.layout = layout;
    }

    pub fn poems(&self) -> &BTreeMap<String, PoemRecord> {
        &self.document.poems
    }

    pub fn images(&self) -> &BTreeMap<String, ImageRecord> {
        &self.document.images
    }

    pub fn poem(&self, poem_id: &str) -> Option<&PoemRecord> {
        self.document.poems.get(poem_id)
    }

    pub fn poem_mut(&mut self, poem_id: &str) -> Option<&mut PoemRecord> {
        self.document.poems.get_mut(poem_id)
    }

    pub fn image(&self, image_id: &str) -> Option<&ImageRecord> {
        self.document.images.get(image_id)
    }

    pub fn is_empty(&self) -> bool {
        self.document.poems.is_empty() && self.document.images.is_empty()
    }

    /// Next free poem ID. Numbers of deleted poems are not reused.
    pub fn next_poem_id(&self) -> String {
        let highest = self
            .document
            .poems
            .keys()
            .filter_map(|id| id_number(POEM_ID_PREFIX, id))
            .max()
            .unwrap_or(0)
            .max(self.document.metadata.last_poem_number);
        format_id(POEM_ID_PREFIX, highest + 1)
    }

    pub fn next_image_id(&self) -> String {
        next_id(IMAGE_ID_PREFIX, self.document.images.keys())
    }

    pub fn add_poem(&mut self, poem_id: &str, mut record: PoemRecord) -> Result<(), RegistryError> {
        if self.document.poems.contains_key(poem_id) {
            return Err(RegistryError::PoemExists(poem_id.to_string()));
        }
        let now = timestamp_now();
        record.created_date = now.clone();
        record.last_modified = now;
        self.document.poems.insert(poem_id.to_string(), record);
        Ok(())
    }

    pub fn add_image(&mut self, image_id: &str, record: ImageRecord) -> Result<(), RegistryError> {
        if self.document.images.contains_key(image_id) {
            return Err(RegistryError::ImageExists(image_id.to_string()));
        }
        self.document.images.insert(image_id.to_string(), record);
        Ok(())
    }

    /// Link a poem and an image on both sides. A different image previously
    /// linked to the poem is released.
    pub fn link_poem_image(&mut self, poem_id: &str, image_id: &str) -> Result<(), RegistryError> {
        let previous = match self.document.poems.get(poem_id) {
            Some(poem) => poem.image_id.clone(),
            None => return Err(RegistryError::UnknownPoem(poem_id.to_string())),
        };
        match self.document.images.get(image_id) {
            None => return Err(RegistryError::UnknownImage(image_id.to_string())),
            Some(image) => {
                if let Some(owner) = image.linked_poem.as_deref()
                    && owner != poem_id
                {
                    return Err(RegistryError::ImageAlreadyLinked {
                        image_id: image_id.to_string(),
                        poem_id: owner.to_string(),
                    });
                }
            }
        }

        if let Some(previous) = previous.as_deref()
            && previous != image_id
            && let Some(old_image) = self.document.images.get_mut(previous)
            && old_image.linked_poem.as_deref() == Some(poem_id)
        {
            old_image.linked_poem = None;
        }
        if let Some(image) = self.document.images.get_mut(image_id) {
            image.linked_poem = Some(poem_id.to_string());
        }
        if let Some(poem) = self.document.poems.get_mut(poem_id) {
            poem.image_id = Some(image_id.to_string());
            poem.last_modified = timestamp_now();
        }
        debug!(poem_id, image_id, "linked poem and image");
        Ok(())
    }

    /// Clear both sides of a poem's image link. Returns the released image ID.
    pub fn unlink_poem_image(&mut self, poem_id: &str) -> Result<Option<String>, RegistryError> {
        let Some(poem) = self.document.poems.get_mut(poem_id) else {
            return Err(RegistryError::UnknownPoem(poem_id.to_string()));
        };
        let released = poem.image_id.take();
        if released.is_some() {
            poem.last_modified = timestamp_now();
        }
        if let Some(image_id) = released.as_deref()
            && let Some(image) = self.document.images.get_mut(image_id)
            && image.linked_poem.as_deref() == Some(poem_id)
        {
            image.linked_poem = None;
        }
        Ok(released)
    }

    /// Drop a poem and release its image. The returned record still names the
    /// image it was linked to.
    pub fn remove_poem(&mut self, poem_id: &str) -> Result<PoemRecord, RegistryError> {
        let released = self.unlink_poem_image(poem_id)?;
        let Some(mut record) = self.document.poems.remove(poem_id) else {
            return Err(RegistryError::UnknownPoem(poem_id.to_string()));
        };
        record.image_id = released;
        if let Some(number) = id_number(POEM_ID_PREFIX, poem_id) {
            let metadata = &mut self.document.metadata;
            metadata.last_poem_number = metadata.last_poem_number.max(number);
        }
        debug!(poem_id, "removed poem");
        Ok(record)
    }

    /// Move a poem record to a new ID, carrying its image link along.
    pub fn rename_poem(&mut self, from: &str, to: &str) -> Result<(), RegistryError> {
        if from == to {
            return Ok(());
        }
        if self.document.poems.contains_key(to) {
            return Err(RegistryError::PoemExists(to.to_string()));
        }
        let Some(record) = self.document.poems.remove(from) else {
            return Err(RegistryError::UnknownPoem(from.to_string()));
        };
        if let Some(image_id) = record.image_id.as_deref()
            && let Some(image) = self.document.images.get_mut(image_id)
            && image.linked_poem.as_deref() == Some(from)
        {
            image.linked_poem = Some(to.to_string());
        }
        self.document.poems.insert(to.to_string(), record);
        Ok(())
    }

    /// Let `next_poem_id` continue from the current highest poem. Only
    /// renumbering calls this, after compacting the IDs.
    pub fn forget_retired_poem_ids(&mut self) {
        self.document.metadata.last_poem_number = 0;
    }

    pub fn find_image_by_original_filename(&self, filename: &str) -> Option<&str> {
        self.document
            .images
            .iter()
            .find(|(_, image)| image.original_filename == filename)
            .map(|(id, _)| id.as_str())
    }

    pub fn find_poem_by_original_path(&self, original_path: &str) -> Option<&str> {
        self.document
            .poems
            .iter()
            .find(|(_, poem)| poem.original_path.as_deref() == Some(original_path))
            .map(|(id, _)| id.as_str())
    }

    pub fn find_poem_by_original_filename(&self, filename: &str) -> Option<&str> {
        self.document
            .poems
            .iter()
            .find(|(_, poem)| poem.original_filename.as_deref() == Some(filename))
            .map(|(id, _)| id.as_str())
    }

    /// Poem IDs in ascending numeric order.
    pub fn sorted_poem_ids(&self) -> Vec<String> {
        sorted_ids(POEM_ID_PREFIX, self.document.poems.keys())
    }

    pub fn sorted_image_ids(&self) -> Vec<String> {
        sorted_ids(IMAGE_ID_PREFIX, self.document.images.keys())
    }

    /// Persist to disk. The previous file is first copied to a timestamped
    /// backup, whose path is returned.
    pub fn save(&mut self) -> Result<Option<PathBuf>> {
        let backup = if self.path.exists() {
            let backup_path = registry_backup_path(&self.path);
            fs::copy(&self.path, &backup_path).with_context(|| {
                format!(
                    "failed to back up registry {} to {}",
                    self.path.display(),
                    backup_path.display()
                )
            })?;
            Some(backup_path)
        } else {
            None
        };

        let metadata = &mut self.document.metadata;
        metadata.total_poems = self.document.poems.len();
        metadata.total_images = self.document.images.len();
        metadata.last_updated = timestamp_now();
        if metadata.created.is_empty() {
            metadata.created = metadata.last_updated.clone();
        }

        let rendered =
            serde_json::to_string_pretty(&self.document).context("failed to serialize registry")?;
        write_atomic(&self.path, rendered.as_bytes())?;
        info!(
            path = %self.path.display(),
            poems = self.document.poems.len(),
            images = self.document.images.len(),
            "saved registry"
        );
        Ok(backup)
    }
}

fn registry_backup_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "registry.json".to_string());
    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let base = path.with_file_name(format!("{name}.backup.{stamp}"));
    if !base.exists() {
        return base;
    }
    let mut counter = 1usize;
    loop {
        let candidate = path.with_file_name(format!("{name}.backup.{stamp}_{counter}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

pub fn timestamp_now() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Numeric suffix of an ID with the given prefix (`poem012` -> 12).
pub fn id_number(prefix: &str, id: &str) -> Option<u32> {
    id.strip_prefix(prefix)?.parse().ok()
}

pub fn format_id(prefix: &str, number: u32) -> String {
    format!("{prefix}{number:0width$}", width = ID_WIDTH)
}

fn next_id<'a>(prefix: &str, ids: impl Iterator<Item = &'a String>) -> String {
    let max = ids.filter_map(|id| id_number(prefix, id)).max().unwrap_or(0);
    format_id(prefix, max + 1)
}

fn sorted_ids<'a>(prefix: &str, ids: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut out: Vec<String> = ids.cloned().collect();
    out.sort_by(|left, right| {
        let left_key = (id_number(prefix, left).unwrap_or(u32::MAX), left.as_str());
        let right_key = (id_number(prefix, right).unwrap_or(u32::MAX), right.as_str());
        left_key.cmp(&right_key)
    });
    out
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use tempfile::tempdir;

    fn poem(title: &str) -> PoemRecord {
        PoemRecord {
            title: title.to_string(),
            author: "Manas Pandey".to_string(),
            language: "en".to_string(),
            form: "Free Verse".to_string(),
            length: "short".to_string(),
            ..PoemRecord::default()
        }
    }

    fn image(filename: &str) -> ImageRecord {
        ImageRecord {
            original_filename: filename.to_string(),
            file_extension: ".png".to_string(),
            ..ImageRecord::default()
        }
    }

    #[test]
    fn next_ids_start_at_one_and_never_fill_gaps() {
        let mut registry = Registry::new(Path::new("/unused/registry.json"));
        assert_eq!(registry.next_poem_id(), "poem001");
        assert_eq!(registry.next_image_id(), "image001");

        registry.add_poem("poem001", poem("One")).expect("add");
        registry.add_poem("poem007", poem("Seven")).expect("add");
        assert_eq!(registry.next_poem_id(), "poem008");
    }

    #[test]
    fn removed_poem_ids_are_not_reused() {
        let temp = tempdir().expect("tempdir");
        let mut registry = Registry::new(&temp.path().join("registry.json"));
        registry.add_poem("poem001", poem("One")).expect("add");
        registry.add_poem("poem002", poem("Two")).expect("add");
        registry.add_image("image001", image("two.png")).expect("add image");
        registry.link_poem_image("poem002", "image001").expect("link");

        let removed = registry.remove_poem("poem002").expect("remove");
        assert_eq!(removed.image_id.as_deref(), Some("image001"));
        assert!(registry.image("image001").expect("image").linked_poem.is_none());
        assert_eq!(registry.next_poem_id(), "poem003");

        registry.save().expect("save");
        let reloaded = Registry::load(registry.path()).expect("reload");
        assert_eq!(reloaded.next_poem_id(), "poem003");
        assert_eq!(
            registry.remove_poem("poem002").expect_err("gone"),
            RegistryError::UnknownPoem("poem002".to_string())
        );
    }

    #[test]
    fn rename_moves_record_and_image_back_reference() {
        let mut registry = Registry::new(Path::new("/unused/registry.json"));
        registry.add_poem("poem003", poem("Three")).expect("add");
        registry.add_poem("poem004", poem("Four")).expect("add");
        registry.add_image("image001", image("three.png")).expect("add image");
        registry.link_poem_image("poem003", "image001").expect("link");

        assert_eq!(
            registry.rename_poem("poem003", "poem004").expect_err("taken"),
            RegistryError::PoemExists("poem004".to_string())
        );
        registry.rename_poem("poem003", "poem001").expect("rename");
        assert!(registry.poem("poem003").is_none());
        assert_eq!(
            registry.poem("poem001").expect("poem").image_id.as_deref(),
            Some("image001")
        );
        assert_eq!(
            registry.image("image001").expect("image").linked_poem.as_deref(),
            Some("poem001")
        );
    }

    #[test]
    fn add_conflict_leaves_record_untouched() {
        let mut registry = Registry::new(Path::new("/unused/registry.json"));
        registry.add_poem("poem001", poem("Original")).expect("add");
        let err = registry
            .add_poem("poem001", poem("Replacement"))
            .expect_err("conflict");
        assert_eq!(err, RegistryError::PoemExists("poem001".to_string()));
        assert_eq!(registry.poem("poem001").expect("poem").title, "Original");

        registry.add_image("image001", image("a.png")).expect("add image");
        let err = registry
            .add_image("image001", image("b.png"))
            .expect_err("conflict");
        assert_eq!(err, RegistryError::ImageExists("image001".to_string()));
        assert_eq!(
            registry.image("image001").expect("image").original_filename,
            "a.png"
        );
    }

    #[test]
    fn add_poem_stamps_timestamps() {
        let mut registry = Registry::new(Path::new("/unused/registry.json"));
        registry.add_poem("poem001", poem("Stamped")).expect("add");
        let record = registry.poem("poem001").expect("poem");
        assert!(!record.created_date.is_empty());
        assert_eq!(record.created_date, record.last_modified);
    }

    #[test]
    fn link_sets_both_sides_and_failures_change_nothing() {
        let mut registry = Registry::new(Path::new("/unused/registry.json"));
        registry.add_poem("poem001", poem("One")).expect("add");
        registry.add_poem("poem002", poem("Two")).expect("add");
        registry.add_image("image001", image("one.png")).expect("add");

        registry.link_poem_image("poem001", "image001").expect("link");
        assert_eq!(
            registry.poem("poem001").expect("poem").image_id.as_deref(),
            Some("image001")
        );
        assert_eq!(
            registry.image("image001").expect("image").linked_poem.as_deref(),
            Some("poem001")
        );

        let before = registry.clone();
        let err = registry
            .link_poem_image("poem002", "image001")
            .expect_err("already linked");
        assert_eq!(
            err,
            RegistryError::ImageAlreadyLinked {
                image_id: "image001".to_string(),
                poem_id: "poem001".to_string(),
            }
        );
        assert_eq!(
            registry
                .link_poem_image("poem999", "image001")
                .expect_err("unknown poem"),
            RegistryError::UnknownPoem("poem999".to_string())
        );
        assert_eq!(
            registry
                .link_poem_image("poem002", "image999")
                .expect_err("unknown image"),
            RegistryError::UnknownImage("image999".to_string())
        );
        assert_eq!(registry.document, before.document);
    }

    #[test]
    fn relinking_releases_previous_image() {
        let mut registry = Registry::new(Path::new("/unused/registry.json"));
        registry.add_poem("poem001", poem("One")).expect("add");
        registry.add_image("image001", image("a.png")).expect("add");
        registry.add_image("image002", image("b.png")).expect("add");

        registry.link_poem_image("poem001", "image001").expect("link");
        registry.link_poem_image("poem001", "image002").expect("relink");
        assert!(registry.image("image001").expect("image").linked_poem.is_none());
        assert_eq!(
            registry.image("image002").expect("image").linked_poem.as_deref(),
            Some("poem001")
        );
    }

    #[test]
    fn unlink_clears_both_sides() {
        let mut registry = Registry::new(Path::new("/unused/registry.json"));
        registry.add_poem("poem001", poem("One")).expect("add");
        registry.add_image("image001", image("a.png")).expect("add");
        registry.link_poem_image("poem001", "image001").expect("link");

        let released = registry.unlink_poem_image("poem001").expect("unlink");
        assert_eq!(released.as_deref(), Some("image001"));
        assert!(registry.poem("poem001").expect("poem").image_id.is_none());
        assert!(registry.image("image001").expect("image").linked_poem.is_none());
        assert_eq!(registry.unlink_poem_image("poem001").expect("noop"), None);
    }

    #[test]
    fn sorted_poem_ids_are_numeric() {
        let mut registry = Registry::new(Path::new("/unused/registry.json"));
        for id in ["poem010", "poem002", "poem1000", "poem001"] {
            registry.add_poem(id, poem(id)).expect("add");
        }
        assert_eq!(
            registry.sorted_poem_ids(),
            vec!["poem001", "poem002", "poem010", "poem1000"]
        );
    }

    #[test]
    fn save_refreshes_counts_and_backs_up_previous_file() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("poem_registry.json");
        let mut registry = Registry::load(&path).expect("load empty");
        registry.add_poem("poem001", poem("One")).expect("add");
        assert!(registry.save().expect("first save").is_none());

        registry.add_image("image001", image("a.png")).expect("add");
        let backup = registry.save().expect("second save").expect("backup path");
        assert!(backup.exists());
        let backup_name = backup.file_name().expect("name").to_string_lossy().to_string();
        assert!(backup_name.starts_with("poem_registry.json.backup."));

        let reloaded = Registry::load(&path).expect("reload");
        assert_eq!(reloaded.metadata().total_poems, 1);
        assert_eq!(reloaded.metadata().total_images, 1);
        assert_eq!(reloaded.metadata().version, SCHEMA_VERSION);
        assert!(!temp.path().join("poem_registry.json.tmp").exists());

        let third = registry.save().expect("third save").expect("backup path");
        assert_ne!(third, backup);
    }

    #[test]
    fn load_rejects_corrupt_file_without_replacing_it() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("poem_registry.json");
        fs::write(&path, "{ not json").expect("write");
        let err = Registry::load(&path).expect_err("corrupt");
        assert!(err.to_string().contains("failed to parse registry"));
        assert_eq!(fs::read_to_string(&path).expect("read"), "{ not json");
    }

    #[test]
    fn unknown_keys_survive_load_and_save() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("poem_registry.json");
        fs::write(
            &path,
            r#"{
  "poems": {
    "poem001": {"title": "Kept", "author": "A", "mood": "wistful"}
  },
  "images": {
    "image001": {"original_filename": "a.png", "file_extension": ".png", "linked_poem": null, "palette": ["blue"]}
  },
  "metadata": {"version": "1.0", "created": "2024-01-01T00:00:00", "last_updated": "2024-01-01T00:00:00", "total_poems": 1, "total_images": 1, "curator": "me"},
  "notes": "top level"
}"#,
        )
        .expect("write");

        let mut registry = Registry::load(&path).expect("load");
        registry.save().expect("save");
        let raw: Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(raw["poems"]["poem001"]["mood"], "wistful");
        assert_eq!(raw["images"]["image001"]["palette"][0], "blue");
        assert!(raw["images"]["image001"]["linked_poem"].is_null());
        assert_eq!(raw["metadata"]["curator"], "me");
        assert_eq!(raw["metadata"]["layout"], "flat");
        assert_eq!(raw["notes"], "top level");
    }
}
