use std::collections::BTreeMap;
use std::fs;

use serde::Serialize;

use crate::consumer::{ConsumerCheck, check_consumer};
use crate::layout::{image_path, poem_path};
use crate::registry::Registry;
use crate::runtime::ContentLayout;

pub const MIN_POEM_LOAD_RATE: f64 = 95.0;
pub const MIN_IMAGE_AVAILABILITY_RATE: f64 = 90.0;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub missing_poems: Vec<String>,
    pub missing_images: Vec<String>,
    pub broken_links: Vec<String>,
    pub asymmetric_links: Vec<String>,
    pub duplicate_titles: Vec<String>,
    pub missing_metadata: Vec<String>,
}

impl IntegrityReport {
    pub fn categories(&self) -> [(&'static str, &[String]); 6] {
        [
            ("missing_poems", self.missing_poems.as_slice()),
            ("missing_images", self.missing_images.as_slice()),
            ("broken_links", self.broken_links.as_slice()),
            ("asymmetric_links", self.asymmetric_links.as_slice()),
            ("duplicate_titles", self.duplicate_titles.as_slice()),
            ("missing_metadata", self.missing_metadata.as_slice()),
        ]
    }

    pub fn total_issues(&self) -> usize {
        self.categories().iter().map(|(_, issues)| issues.len()).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.total_issues() == 0
    }
}

/// Cross-check the registry against the files on disk. Problems are
/// collected, never raised.
pub fn validate_integrity(layout: &ContentLayout, registry: &Registry) -> IntegrityReport {
    let mut report = IntegrityReport::default();
    let kind = registry.layout();

    for poem_id in registry.sorted_poem_ids() {
        let expected = poem_path(layout, kind, &poem_id);
        if !expected.is_file() {
            report
                .missing_poems
                .push(format!("{poem_id} -> {}", layout.web_path(&expected)));
        }
    }

    for image_id in registry.sorted_image_ids() {
        if let Some(expected) = image_path(layout, registry, &image_id)
            && !expected.is_file()
        {
            report
                .missing_images
                .push(format!("{image_id} -> {}", layout.web_path(&expected)));
        }
    }

    for poem_id in registry.sorted_poem_ids() {
        let Some(poem) = registry.poem(&poem_id) else {
            continue;
        };
        let Some(image_id) = poem.image_id.as_deref() else {
            continue;
        };
        match registry.image(image_id) {
            None => report
                .broken_links
                .push(format!("{poem_id} -> {image_id} (image not found)")),
            Some(image) if image.linked_poem.as_deref() != Some(poem_id.as_str()) => {
                report.asymmetric_links.push(format!(
                    "{poem_id} -> {image_id}, but {image_id} -> {}",
                    image.linked_poem.as_deref().unwrap_or("nothing")
                ));
            }
            Some(_) => {}
        }
    }

    for image_id in registry.sorted_image_ids() {
        let Some(linked) = registry
            .image(&image_id)
            .and_then(|image| image.linked_poem.as_deref())
        else {
            continue;
        };
        match registry.poem(linked) {
            None => report
                .broken_links
                .push(format!("{image_id} -> {linked} (poem not found)")),
            Some(poem) if poem.image_id.as_deref() != Some(image_id.as_str()) => {
                report.asymmetric_links.push(format!(
                    "{image_id} -> {linked}, but {linked} -> {}",
                    poem.image_id.as_deref().unwrap_or("nothing")
                ));
            }
            Some(_) => {}
        }
    }

    let mut titles: BTreeMap<&str, &str> = BTreeMap::new();
    let ids = registry.sorted_poem_ids();
    for poem_id in &ids {
        let Some(poem) = registry.poem(poem_id) else {
            continue;
        };
        if let Some(first) = titles.get(poem.title.as_str()) {
            report
                .duplicate_titles
                .push(format!("'{}': {first} and {poem_id}", poem.title));
        } else {
            titles.insert(poem.title.as_str(), poem_id.as_str());
        }

        let missing: Vec<&str> = [
            ("title", &poem.title),
            ("author", &poem.author),
            ("language", &poem.language),
            ("form", &poem.form),
            ("length", &poem.length),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect();
        if !missing.is_empty() {
            report
                .missing_metadata
                .push(format!("{poem_id}: missing {}", missing.join(", ")));
        }
    }

    report
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub total_poems: usize,
    pub loadable_poems: usize,
    pub poem_load_rate: f64,
    pub total_images: usize,
    pub available_images: usize,
    pub image_availability_rate: f64,
    pub consumers: Vec<ConsumerCheck>,
    pub consumers_ok: bool,
    pub ready: bool,
}

/// Whether the site would load: poems readable and non-empty, images
/// present, and every loader script's path array well-formed.
pub fn test_website_readiness(layout: &ContentLayout, registry: &Registry) -> ReadinessReport {
    let kind = registry.layout();
    let total_poems = registry.poems().len();
    let loadable_poems = registry
        .poems()
        .keys()
        .filter(|poem_id| {
            fs::read_to_string(poem_path(layout, kind, poem_id))
                .is_ok_and(|content| !content.trim().is_empty())
        })
        .count();

    let total_images = registry.images().len();
    let available_images = registry
        .images()
        .keys()
        .filter(|image_id| {
            image_path(layout, registry, image_id).is_some_and(|path| path.is_file())
        })
        .count();

    let consumers: Vec<ConsumerCheck> = layout.consumers.iter().map(check_consumer).collect();
    let consumers_ok = consumers.iter().all(ConsumerCheck::passed);

    let poem_load_rate = rate(loadable_poems, total_poems);
    let image_availability_rate = rate(available_images, total_images);
    ReadinessReport {
        total_poems,
        loadable_poems,
        poem_load_rate,
        total_images,
        available_images,
        image_availability_rate,
        ready: poem_load_rate >= MIN_POEM_LOAD_RATE
            && image_availability_rate >= MIN_IMAGE_AVAILABILITY_RATE
            && consumers_ok,
        consumers,
        consumers_ok,
    }
}

/// Percentage; an empty collection counts as 0.
pub fn rate(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::*;
    use crate::config::PoetryConfig;
    use crate::registry::{ImageRecord, PoemRecord};
    use crate::runtime::ResolvedPaths;

    fn poem(title: &str) -> PoemRecord {
        PoemRecord {
            title: title.to_string(),
            author: "Manas Pandey".to_string(),
            language: "en".to_string(),
            form: "Sonnet".to_string(),
            length: "short".to_string(),
            ..PoemRecord::default()
        }
    }

    fn image() -> ImageRecord {
        ImageRecord {
            original_filename: "x.png".to_string(),
            file_extension: ".png".to_string(),
            ..ImageRecord::default()
        }
    }

    fn site(root: &Path) -> ContentLayout {
        let paths = ResolvedPaths::for_root(root);
        let layout = ContentLayout::resolve(&paths, &PoetryConfig::default()).expect("layout");
        fs::create_dir_all(&layout.poetry_dir).expect("mkdir");
        fs::create_dir_all(&layout.image_dir).expect("mkdir");
        fs::create_dir_all(root.join("js")).expect("mkdir");
        fs::write(
            root.join("js/content-loader.js"),
            "const poemFilePaths = [\n        \"Poetry/poem001.md\"\n    ];\n",
        )
        .expect("write");
        fs::write(
            root.join("js/dynamic-poem-loader.js"),
            "const staticPaths = [\n        \"Poetry/poem001.md\"\n    ];\n",
        )
        .expect("write");
        layout
    }

    #[test]
    fn integrity_groups_every_problem_kind() {
        let temp = tempdir().expect("tempdir");
        let layout = site(temp.path());
        let mut registry = Registry::new(&layout.registry_path);
        registry.add_poem("poem001", poem("Rain")).expect("add");
        registry.add_poem("poem002", poem("Rain")).expect("add");
        let mut incomplete = poem("Dusk");
        incomplete.form.clear();
        registry.add_poem("poem003", incomplete).expect("add");
        registry.add_image("image001", image()).expect("add");
        registry.link_poem_image("poem001", "image001").expect("link");
        fs::write(layout.poetry_dir.join("poem001.md"), "---\n---\nRain\n").expect("write");
        fs::write(layout.image_dir.join("image001.png"), b"png").expect("write");

        registry.poem_mut("poem002").expect("poem").image_id = Some("image404".to_string());
        registry.poem_mut("poem003").expect("poem").image_id = Some("image001".to_string());

        let report = validate_integrity(&layout, &registry);
        assert_eq!(
            report.missing_poems,
            vec![
                "poem002 -> Poetry/poem002.md".to_string(),
                "poem003 -> Poetry/poem003.md".to_string()
            ]
        );
        assert!(report.missing_images.is_empty());
        assert_eq!(
            report.broken_links,
            vec!["poem002 -> image404 (image not found)".to_string()]
        );
        assert_eq!(report.asymmetric_links.len(), 1);
        assert!(report.asymmetric_links[0].starts_with("poem003 -> image001"));
        assert_eq!(
            report.duplicate_titles,
            vec!["'Rain': poem001 and poem002".to_string()]
        );
        assert_eq!(
            report.missing_metadata,
            vec!["poem003: missing form".to_string()]
        );
        assert_eq!(report.total_issues(), 6);
    }

    #[test]
    fn clean_registry_has_no_issues() {
        let temp = tempdir().expect("tempdir");
        let layout = site(temp.path());
        let mut registry = Registry::new(&layout.registry_path);
        registry.add_poem("poem001", poem("Rain")).expect("add");
        fs::write(layout.poetry_dir.join("poem001.md"), "Rain\n").expect("write");
        assert!(validate_integrity(&layout, &registry).is_clean());
    }

    fn readiness_with_images(available: usize) -> ReadinessReport {
        let temp = tempdir().expect("tempdir");
        let layout = site(temp.path());
        let mut registry = Registry::new(&layout.registry_path);
        for index in 1..=20 {
            let poem_id = format!("poem{index:03}");
            let image_id = format!("image{index:03}");
            registry.add_poem(&poem_id, poem(&poem_id)).expect("add poem");
            registry.add_image(&image_id, image()).expect("add image");
            fs::write(layout.poetry_dir.join(format!("{poem_id}.md")), "text\n").expect("write");
            if index <= available {
                fs::write(layout.image_dir.join(format!("{image_id}.png")), b"png")
                    .expect("write");
            }
        }
        test_website_readiness(&layout, &registry)
    }

    #[test]
    fn readiness_threshold_on_image_availability() {
        let ready = readiness_with_images(19);
        assert_eq!(ready.available_images, 19);
        assert!((ready.image_availability_rate - 95.0).abs() < 1e-9);
        assert!(ready.consumers_ok);
        assert!(ready.ready);

        let not_ready = readiness_with_images(17);
        assert!((not_ready.image_availability_rate - 85.0).abs() < 1e-9);
        assert!(!not_ready.ready);
    }

    #[test]
    fn empty_collection_is_not_ready() {
        let temp = tempdir().expect("tempdir");
        let layout = site(temp.path());
        let registry = Registry::new(&layout.registry_path);
        let report = test_website_readiness(&layout, &registry);
        assert_eq!(report.poem_load_rate, 0.0);
        assert!(!report.ready);
    }

    #[test]
    fn malformed_consumer_array_blocks_readiness() {
        let temp = tempdir().expect("tempdir");
        let layout = site(temp.path());
        fs::write(
            temp.path().join("js/dynamic-poem-loader.js"),
            "const staticPaths = ['Poetry/poem001.md'];\n",
        )
        .expect("write");
        let mut registry = Registry::new(&layout.registry_path);
        registry.add_poem("poem001", poem("Rain")).expect("add");
        registry.add_image("image001", image()).expect("add");
        fs::write(layout.poetry_dir.join("poem001.md"), "Rain\n").expect("write");
        fs::write(layout.image_dir.join("image001.png"), b"png").expect("write");

        let report = test_website_readiness(&layout, &registry);
        assert_eq!(report.poem_load_rate, 100.0);
        assert!(!report.consumers_ok);
        assert!(!report.ready);
    }
}
