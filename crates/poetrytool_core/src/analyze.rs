use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::PoetryConfig;
use crate::filesystem::list_files_with_extensions;
use crate::frontmatter::{self, Header};
use crate::runtime::ContentLayout;

pub const UNKNOWN_CATEGORY: &str = "unknown/unknown/unknown";
const CATEGORY_ROOT_SEGMENT: &str = "by_language";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ParseStatus {
    Parsed,
    NoHeader,
    Unreadable(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredPoem {
    pub path: PathBuf,
    pub relative_path: String,
    pub file_name: String,
    #[serde(skip)]
    pub header: Header,
    pub title: String,
    pub author: String,
    pub language: String,
    pub form: String,
    pub length: String,
    pub image: Option<String>,
    pub category_path: String,
    #[serde(skip)]
    pub body: String,
    pub status: ParseStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredImage {
    pub path: PathBuf,
    pub file_name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StructureReport {
    pub poems: Vec<DiscoveredPoem>,
    pub poems_without_images: Vec<String>,
    pub images: Vec<DiscoveredImage>,
    pub orphaned_images: Vec<String>,
    pub flagged: Vec<String>,
}

impl StructureReport {
    pub fn total_poems(&self) -> usize {
        self.poems.len()
    }

    pub fn total_images(&self) -> usize {
        self.images.len()
    }
}

/// Scan the legacy poem directories and the image directory. Read-only.
pub fn analyze(layout: &ContentLayout, config: &PoetryConfig) -> Result<StructureReport> {
    let mut report = StructureReport::default();

    for dir in &layout.legacy_poem_dirs {
        if !dir.exists() {
            debug!(dir = %dir.display(), "legacy poem directory absent");
            continue;
        }
        for path in list_files_with_extensions(dir, &["md".to_string()])? {
            let poem = discover_poem(layout, config, &path);
            match &poem.status {
                ParseStatus::Parsed => {}
                ParseStatus::NoHeader => {
                    warn!(path = %poem.relative_path, "poem file has no header");
                    report
                        .flagged
                        .push(format!("{}: no header", poem.relative_path));
                }
                ParseStatus::Unreadable(reason) => {
                    warn!(path = %poem.relative_path, %reason, "poem file unreadable");
                    report
                        .flagged
                        .push(format!("{}: unreadable ({reason})", poem.relative_path));
                }
            }
            if poem.image.is_none() {
                report.poems_without_images.push(poem.relative_path.clone());
            }
            report.poems.push(poem);
        }
    }

    let referenced: BTreeSet<&str> = report
        .poems
        .iter()
        .filter_map(|poem| poem.image.as_deref())
        .collect();
    let mut orphaned = Vec::new();
    for path in list_files_with_extensions(&layout.image_dir, &layout.image_extensions)? {
        let file_name = file_name_of(&path);
        if !referenced.contains(file_name.as_str()) {
            orphaned.push(file_name.clone());
        }
        report.images.push(DiscoveredImage { path, file_name });
    }
    report.orphaned_images = orphaned;

    debug!(
        poems = report.poems.len(),
        images = report.images.len(),
        orphaned = report.orphaned_images.len(),
        "structure analysis complete"
    );
    Ok(report)
}

fn discover_poem(layout: &ContentLayout, config: &PoetryConfig, path: &Path) -> DiscoveredPoem {
    let relative_path = layout.web_path(path);
    let file_name = file_name_of(path);
    let category_path = category_path(path);

    let (header, body, status) = match fs::read_to_string(path) {
        Ok(raw) => {
            let parsed = frontmatter::parse(&raw);
            let status = if parsed.has_header {
                ParseStatus::Parsed
            } else {
                ParseStatus::NoHeader
            };
            (parsed.header, parsed.body, status)
        }
        Err(error) => (
            Header::new(),
            String::new(),
            ParseStatus::Unreadable(error.to_string()),
        ),
    };

    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    let inferred = infer_from_category(config, &category_path);

    DiscoveredPoem {
        title: header.value("title").map(str::to_string).unwrap_or(stem),
        author: header
            .value("author")
            .map(str::to_string)
            .unwrap_or_else(|| config.default_author()),
        language: header
            .value("language")
            .map(str::to_string)
            .or(inferred.language)
            .unwrap_or_default(),
        form: header
            .value("form")
            .map(str::to_string)
            .or(inferred.form)
            .unwrap_or_default(),
        length: header
            .value("length")
            .map(str::to_string)
            .or(inferred.length)
            .unwrap_or_default(),
        image: header.value("image").map(image_file_name),
        path: path.to_path_buf(),
        relative_path,
        file_name,
        header,
        category_path,
        body,
        status,
    }
}

/// `<language>/<kind>/<tag>` taken from the segments after `by_language`, or
/// the unknown placeholder when the path is not nested that deep.
pub fn category_path(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|component| component.as_os_str().to_string_lossy().to_string())
        .collect();
    if let Some(index) = parts.iter().position(|part| part == CATEGORY_ROOT_SEGMENT)
        && index + 3 < parts.len()
    {
        return parts[index + 1..=index + 3].join("/");
    }
    UNKNOWN_CATEGORY.to_string()
}

#[derive(Debug, Default)]
struct InferredFields {
    language: Option<String>,
    form: Option<String>,
    length: Option<String>,
}

fn infer_from_category(config: &PoetryConfig, category: &str) -> InferredFields {
    let mut inferred = InferredFields::default();
    let segments: Vec<&str> = category.split('/').collect();
    let [language, kind, tag] = segments.as_slice() else {
        return inferred;
    };
    inferred.language = config
        .collection
        .languages
        .iter()
        .find(|known| known.name.eq_ignore_ascii_case(language) || known.code == *language)
        .map(|known| known.code.clone());
    match *kind {
        "forms" => inferred.form = match_vocabulary(&config.collection.forms, tag),
        "lengths" => inferred.length = match_vocabulary(&config.collection.lengths, tag),
        _ => {}
    }
    inferred
}

fn match_vocabulary(vocabulary: &[String], tag: &str) -> Option<String> {
    let wanted = tag.replace('_', " ");
    vocabulary
        .iter()
        .find(|known| known.eq_ignore_ascii_case(&wanted))
        .cloned()
}

fn image_file_name(value: &str) -> String {
    let normalized = value.replace('\\', "/");
    normalized
        .rsplit('/')
        .next()
        .unwrap_or(normalized.as_str())
        .to_string()
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}
