use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::filesystem::write_atomic;

pub const DEFAULT_AUTHOR: &str = "Manas Pandey";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PoetryConfig {
    #[serde(default)]
    pub collection: CollectionSection,
    #[serde(default)]
    pub layout: LayoutSection,
    #[serde(default = "default_consumers")]
    pub consumers: Vec<ConsumerSection>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CollectionSection {
    pub default_author: String,
    pub forms: Vec<String>,
    pub lengths: Vec<String>,
    pub languages: Vec<Language>,
}

impl Default for CollectionSection {
    fn default() -> Self {
        Self {
            default_author: DEFAULT_AUTHOR.to_string(),
            forms: vec![
                "Free Verse".to_string(),
                "Sonnet".to_string(),
                "short".to_string(),
            ],
            lengths: vec!["Standard".to_string(), "short".to_string()],
            languages: vec![
                Language {
                    code: "en".to_string(),
                    name: "English".to_string(),
                },
                Language {
                    code: "hi".to_string(),
                    name: "Hindi".to_string(),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Language {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LayoutSection {
    pub poetry_dir: String,
    pub image_dir: String,
    pub legacy_poem_dirs: Vec<String>,
    pub image_extensions: Vec<String>,
    pub registry_file: String,
}

impl Default for LayoutSection {
    fn default() -> Self {
        Self {
            poetry_dir: "Poetry".to_string(),
            image_dir: "assets/images/poems".to_string(),
            legacy_poem_dirs: vec![
                "Poetry/by_language/english/lengths/short".to_string(),
                "Poetry/by_language/english/forms/free_verse".to_string(),
                "Poetry/by_language/english/forms/sonnet".to_string(),
                "Poetry/by_language/hindi/lengths/standard".to_string(),
            ],
            image_extensions: vec![
                "png".to_string(),
                "jpg".to_string(),
                "jpeg".to_string(),
                "webp".to_string(),
            ],
            registry_file: "poem_registry.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ConsumerSection {
    pub path: String,
    pub marker: String,
}

fn default_consumers() -> Vec<ConsumerSection> {
    vec![
        ConsumerSection {
            path: "js/content-loader.js".to_string(),
            marker: "const poemFilePaths".to_string(),
        },
        ConsumerSection {
            path: "js/dynamic-poem-loader.js".to_string(),
            marker: "const staticPaths".to_string(),
        },
    ]
}

impl Default for PoetryConfig {
    fn default() -> Self {
        Self {
            collection: CollectionSection::default(),
            layout: LayoutSection::default(),
            consumers: default_consumers(),
        }
    }
}

impl PoetryConfig {
    /// Resolve the default author: env POETRYTOOL_DEFAULT_AUTHOR > config.
    pub fn default_author(&self) -> String {
        if let Ok(value) = env::var("POETRYTOOL_DEFAULT_AUTHOR") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.collection.default_author.clone()
    }

    pub fn language_name(&self, code: &str) -> Option<&str> {
        self.collection
            .languages
            .iter()
            .find(|language| language.code == code)
            .map(|language| language.name.as_str())
    }

    pub fn is_known_form(&self, form: &str) -> bool {
        self.collection.forms.iter().any(|known| known == form)
    }

    pub fn is_known_length(&self, length: &str) -> bool {
        self.collection.lengths.iter().any(|known| known == length)
    }

    pub fn add_form(&mut self, form: &str) -> Result<()> {
        add_term(&mut self.collection.forms, "form", form)
    }

    pub fn remove_form(&mut self, form: &str) -> Result<()> {
        remove_term(&mut self.collection.forms, "form", form)
    }

    pub fn add_length(&mut self, length: &str) -> Result<()> {
        add_term(&mut self.collection.lengths, "length", length)
    }

    pub fn remove_length(&mut self, length: &str) -> Result<()> {
        remove_term(&mut self.collection.lengths, "length", length)
    }

    pub fn add_language(&mut self, code: &str, name: &str) -> Result<()> {
        let code = code.trim();
        let name = name.trim();
        if code.is_empty() || name.is_empty() {
            bail!("language code and name are required");
        }
        if self.language_name(code).is_some() {
            bail!("language `{code}` already exists");
        }
        self.collection.languages.push(Language {
            code: code.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }
}

fn add_term(terms: &mut Vec<String>, kind: &str, term: &str) -> Result<()> {
    let term = term.trim();
    if term.is_empty() {
        bail!("{kind} cannot be empty");
    }
    if terms.iter().any(|known| known == term) {
        bail!("{kind} `{term}` already exists");
    }
    terms.push(term.to_string());
    Ok(())
}

fn remove_term(terms: &mut Vec<String>, kind: &str, term: &str) -> Result<()> {
    let Some(index) = terms.iter().position(|known| known == term) else {
        bail!("unknown {kind} `{term}`");
    };
    terms.remove(index);
    Ok(())
}

/// Load and parse a PoetryConfig from a TOML file. Returns defaults if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<PoetryConfig> {
    if !config_path.exists() {
        return Ok(PoetryConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: PoetryConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    validate_config(&parsed)
        .with_context(|| format!("invalid configuration in {}", config_path.display()))?;
    Ok(parsed)
}

fn validate_config(config: &PoetryConfig) -> Result<()> {
    if config.collection.default_author.trim().is_empty() {
        bail!("collection.default_author cannot be empty");
    }
    if config.layout.image_extensions.is_empty() {
        bail!("layout.image_extensions must list at least one extension");
    }
    for consumer in &config.consumers {
        if consumer.marker.trim().is_empty() {
            bail!("consumer marker cannot be empty for {}", consumer.path);
        }
    }
    Ok(())
}

/// Validate and write `config` over the file at `config_path`.
pub fn save_config(config_path: &Path, config: &PoetryConfig) -> Result<()> {
    validate_config(config)?;
    let rendered = toml::to_string_pretty(config).context("failed to serialize config TOML")?;
    write_atomic(config_path, rendered.as_bytes())
}

/// Write the default configuration unless a file already exists.
/// Returns `true` when a write occurred.
pub fn write_default_config(config_path: &Path) -> Result<bool> {
    if config_path.exists() {
        return Ok(false);
    }
    let parent = config_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", config_path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let rendered = toml::to_string_pretty(&PoetryConfig::default())
        .context("failed to serialize config TOML")?;
    fs::write(config_path, rendered)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_config_returns_defaults_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config.collection.default_author, DEFAULT_AUTHOR);
        assert_eq!(config.layout.poetry_dir, "Poetry");
        assert_eq!(config.consumers.len(), 2);
        assert_eq!(config.consumers[0].marker, "const poemFilePaths");
    }

    #[test]
    fn load_config_parses_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[collection]
default_author = "A. Poet"
forms = ["Haiku"]

[layout]
image_dir = "static/img"

[[consumers]]
path = "site/loader.js"
marker = "const allPoems"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.collection.default_author, "A. Poet");
        assert_eq!(config.collection.forms, vec!["Haiku".to_string()]);
        assert_eq!(config.collection.lengths.len(), 2);
        assert_eq!(config.layout.image_dir, "static/img");
        assert_eq!(config.layout.poetry_dir, "Poetry");
        assert_eq!(config.consumers.len(), 1);
        assert_eq!(config.consumers[0].path, "site/loader.js");
    }

    #[test]
    fn load_config_tolerates_partial_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[unrelated]\nkey = 1\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config, PoetryConfig::default());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[layout\npoetry_dir = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn load_config_rejects_empty_marker() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            "[[consumers]]\npath = \"js/a.js\"\nmarker = \"  \"\n",
        )
        .expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("invalid configuration"));
    }

    #[test]
    fn write_default_config_round_trips() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join(".poetrytool").join("config.toml");
        assert!(write_default_config(&config_path).expect("write"));
        assert!(!write_default_config(&config_path).expect("second write"));
        let config = load_config(&config_path).expect("load config");
        assert_eq!(config, PoetryConfig::default());
    }

    #[test]
    fn vocabulary_lookups() {
        let config = PoetryConfig::default();
        assert_eq!(config.language_name("hi"), Some("Hindi"));
        assert_eq!(config.language_name("fr"), None);
        assert!(config.is_known_form("Sonnet"));
        assert!(!config.is_known_form("sonnet"));
        assert!(config.is_known_length("Standard"));
    }

    #[test]
    fn vocabulary_edits_persist_and_reject_duplicates() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join(".poetrytool").join("config.toml");
        let mut config = PoetryConfig::default();

        config.add_form("Haiku").expect("add form");
        config.add_length("Epic").expect("add length");
        config.add_language("ur", "Urdu").expect("add language");
        config.remove_form("short").expect("remove form");
        config.remove_length("short").expect("remove length");

        assert!(config.add_form("Sonnet").is_err());
        assert!(config.add_form("  ").is_err());
        assert!(config.add_language("hi", "Hindi again").is_err());
        let err = config.remove_length("Novella").expect_err("unknown length");
        assert!(err.to_string().contains("unknown length"));

        save_config(&config_path, &config).expect("save");
        let reloaded = load_config(&config_path).expect("load");
        assert_eq!(
            reloaded.collection.forms,
            vec!["Free Verse".to_string(), "Sonnet".to_string(), "Haiku".to_string()]
        );
        assert_eq!(
            reloaded.collection.lengths,
            vec!["Standard".to_string(), "Epic".to_string()]
        );
        assert_eq!(reloaded.language_name("ur"), Some("Urdu"));
    }
}
