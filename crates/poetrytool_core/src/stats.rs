use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::PoetryConfig;
use crate::registry::Registry;
use crate::validate::rate;

#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub total_poems: usize,
    pub total_images: usize,
    pub poems_with_images: usize,
    pub unlinked_images: usize,
    pub assignment_rate: f64,
    pub by_language: BTreeMap<String, usize>,
    pub by_form: BTreeMap<String, usize>,
    pub by_length: BTreeMap<String, usize>,
    pub layout: String,
    pub version: String,
    pub last_updated: String,
}

pub fn collection_stats(registry: &Registry, config: &PoetryConfig) -> CollectionStats {
    let mut by_language = BTreeMap::new();
    let mut by_form = BTreeMap::new();
    let mut by_length = BTreeMap::new();
    let mut poems_with_images = 0usize;

    for poem in registry.poems().values() {
        let language = config
            .language_name(&poem.language)
            .map(str::to_string)
            .unwrap_or_else(|| label(&poem.language));
        *by_language.entry(language).or_insert(0) += 1;
        *by_form.entry(label(&poem.form)).or_insert(0) += 1;
        *by_length.entry(label(&poem.length)).or_insert(0) += 1;
        if poem.image_id.is_some() {
            poems_with_images += 1;
        }
    }

    let unlinked_images = registry
        .images()
        .values()
        .filter(|image| image.linked_poem.is_none())
        .count();
    let metadata = registry.metadata();

    CollectionStats {
        total_poems: registry.poems().len(),
        total_images: registry.images().len(),
        poems_with_images,
        unlinked_images,
        assignment_rate: rate(poems_with_images, registry.poems().len()),
        by_language,
        by_form,
        by_length,
        layout: registry.layout().as_str().to_string(),
        version: metadata.version.clone(),
        last_updated: metadata.last_updated.clone(),
    }
}

fn label(value: &str) -> String {
    if value.trim().is_empty() {
        "(unset)".to_string()
    } else {
        value.to_string()
    }
}
