use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Result, bail};
use chrono::Local;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{info, warn};

use crate::filesystem::write_atomic;
use crate::registry::{LayoutKind, Registry};

/// Minimum Jaccard score for a title/filename suggestion.
pub const SUGGESTION_THRESHOLD: f64 = 0.3;
const PREVIEW_LINES: usize = 4;

/// Folder poems carry their image as `image.<ext>` inside the folder, so
/// links are only edited in the flat layout.
fn ensure_flat(registry: &Registry) -> Result<()> {
    if registry.layout() != LayoutKind::Flat {
        bail!("image assignment requires the flat layout");
    }
    Ok(())
}

pub fn unlinked_images(registry: &Registry) -> Vec<String> {
    registry
        .sorted_image_ids()
        .into_iter()
        .filter(|id| {
            registry
                .image(id)
                .is_some_and(|image| image.linked_poem.is_none())
        })
        .collect()
}

pub fn unlinked_poems(registry: &Registry) -> Vec<String> {
    registry
        .sorted_poem_ids()
        .into_iter()
        .filter(|id| registry.poem(id).is_some_and(|poem| poem.image_id.is_none()))
        .collect()
}

/// Operator input during a manual assignment session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignCommand {
    /// 1-based index into the candidate list.
    Pick(usize),
    Skip,
    Stop,
}

impl FromStr for AssignCommand {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "s" | "skip" | "" => return Ok(Self::Skip),
            "q" | "quit" | "stop" => return Ok(Self::Stop),
            _ => {}
        }
        match trimmed.parse::<usize>() {
            Ok(0) => Err("image numbers start at 1".to_string()),
            Ok(index) => Ok(Self::Pick(index)),
            Err(_) => Err(format!(
                "unrecognized input `{trimmed}`; enter a number, `s` to skip or `q` to stop"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub image_id: String,
    pub original_filename: String,
}

#[derive(Debug, Clone)]
pub struct PoemPrompt<'a> {
    pub poem_id: &'a str,
    pub title: &'a str,
    pub author: &'a str,
    pub preview: String,
    pub position: usize,
    pub total: usize,
    pub candidates: &'a [Candidate],
}

/// Source of operator commands. Implementations own all terminal I/O.
pub trait AssignPrompt {
    fn next_command(&mut self, prompt: &PoemPrompt<'_>) -> Result<AssignCommand>;

    fn rejected(&mut self, _message: &str) {}
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSummary {
    pub linked: Vec<(String, String)>,
    pub skipped: usize,
    pub stopped_early: bool,
    pub remaining_images: usize,
}

/// Walk the unlinked poems and link each to an operator-chosen image. The
/// registry is saved once at the end when anything was linked.
pub fn run_manual_session(
    registry: &mut Registry,
    prompt: &mut dyn AssignPrompt,
) -> Result<SessionSummary> {
    ensure_flat(registry)?;
    let poems = unlinked_poems(registry);
    let mut candidates: Vec<Candidate> = unlinked_images(registry)
        .into_iter()
        .filter_map(|image_id| {
            registry.image(&image_id).map(|image| Candidate {
                original_filename: image.original_filename.clone(),
                image_id,
            })
        })
        .collect();
    let mut summary = SessionSummary::default();

    'poems: for (position, poem_id) in poems.iter().enumerate() {
        if candidates.is_empty() {
            break;
        }
        let Some(poem) = registry.poem(poem_id).cloned() else {
            continue;
        };
        loop {
            let view = PoemPrompt {
                poem_id,
                title: &poem.title,
                author: &poem.author,
                preview: preview(&poem.content),
                position: position + 1,
                total: poems.len(),
                candidates: &candidates,
            };
            match prompt.next_command(&view)? {
                AssignCommand::Stop => {
                    summary.stopped_early = true;
                    break 'poems;
                }
                AssignCommand::Skip => {
                    summary.skipped += 1;
                    break;
                }
                AssignCommand::Pick(index) if index >= 1 && index <= candidates.len() => {
                    let chosen = candidates.remove(index - 1);
                    registry.link_poem_image(poem_id, &chosen.image_id)?;
                    info!(poem_id = %poem_id, image_id = %chosen.image_id, "linked by operator");
                    summary.linked.push((poem_id.clone(), chosen.image_id));
                    break;
                }
                AssignCommand::Pick(index) => {
                    prompt.rejected(&format!(
                        "no image numbered {index}; choose 1-{}",
                        candidates.len()
                    ));
                }
            }
        }
    }

    summary.remaining_images = candidates.len();
    if !summary.linked.is_empty() {
        registry.save()?;
    }
    Ok(summary)
}

fn preview(content: &str) -> String {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .take(PREVIEW_LINES)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub poem_id: String,
    pub image_id: String,
    pub title: String,
    pub original_filename: String,
    pub score: f64,
}

/// Best-scoring unlinked image for each unlinked poem whose title overlaps
/// the image filename. Nothing is linked.
pub fn suggest(registry: &Registry) -> Vec<Suggestion> {
    let images: Vec<(String, String)> = unlinked_images(registry)
        .into_iter()
        .filter_map(|image_id| {
            registry
                .image(&image_id)
                .map(|image| (image_id.clone(), image.original_filename.clone()))
        })
        .collect();

    let mut suggestions = Vec::new();
    for poem_id in unlinked_poems(registry) {
        let Some(poem) = registry.poem(&poem_id) else {
            continue;
        };
        let mut best: Option<(&str, &str, f64)> = None;
        for (image_id, filename) in &images {
            let score = title_similarity(&poem.title, filename);
            if score > SUGGESTION_THRESHOLD && best.is_none_or(|(_, _, top)| score > top) {
                best = Some((image_id.as_str(), filename.as_str(), score));
            }
        }
        if let Some((image_id, filename, score)) = best {
            suggestions.push(Suggestion {
                poem_id: poem_id.clone(),
                image_id: image_id.to_string(),
                title: poem.title.clone(),
                original_filename: filename.to_string(),
                score,
            });
        }
    }
    suggestions
}

/// Jaccard index of lower-cased word tokens. `-`, `_` and `.` in the
/// filename separate words.
pub fn title_similarity(title: &str, filename: &str) -> f64 {
    let title_words = tokens(title);
    let filename_words = tokens(&filename.replace(['-', '_', '.'], " "));
    if title_words.is_empty() || filename_words.is_empty() {
        return 0.0;
    }
    let intersection = title_words.intersection(&filename_words).count();
    let union = title_words.union(&filename_words).count();
    intersection as f64 / union as f64
}

fn tokens(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplySummary {
    pub applied: Vec<(String, String)>,
    pub rejected: Vec<(String, String)>,
}

/// Link each suggestion in order; conflicts are reported, not fatal. Saves
/// the registry when anything was applied.
pub fn apply_suggestions(registry: &mut Registry, chosen: &[Suggestion]) -> Result<ApplySummary> {
    ensure_flat(registry)?;
    let mut summary = ApplySummary::default();
    for suggestion in chosen {
        match registry.link_poem_image(&suggestion.poem_id, &suggestion.image_id) {
            Ok(()) => summary
                .applied
                .push((suggestion.poem_id.clone(), suggestion.image_id.clone())),
            Err(error) => {
                warn!(poem_id = %suggestion.poem_id, image_id = %suggestion.image_id, %error, "suggestion not applied");
                summary
                    .rejected
                    .push((suggestion.poem_id.clone(), error.to_string()));
            }
        }
    }
    if !summary.applied.is_empty() {
        registry.save()?;
    }
    Ok(summary)
}

/// Release the image linked to `poem_id` and save. Returns the image ID.
pub fn unlink_image(registry: &mut Registry, poem_id: &str) -> Result<String> {
    ensure_flat(registry)?;
    let Some(image_id) = registry.unlink_poem_image(poem_id)? else {
        bail!("{poem_id} has no linked image");
    };
    registry.save()?;
    info!(poem_id, image_id = %image_id, "unlinked image");
    Ok(image_id)
}

#[derive(Debug, Clone, Serialize)]
pub struct RandomAssignment {
    pub pairs: Vec<(String, String)>,
    pub log_path: Option<PathBuf>,
}

/// Shuffle unlinked poems and images and pair them off. Only run when asked
/// for by name; writes an assignment log into `log_dir`.
pub fn random_assign<R: Rng + ?Sized>(
    registry: &mut Registry,
    rng: &mut R,
    log_dir: &Path,
) -> Result<RandomAssignment> {
    ensure_flat(registry)?;
    let mut poems = unlinked_poems(registry);
    let mut images = unlinked_images(registry);
    poems.shuffle(rng);
    images.shuffle(rng);

    let mut pairs = Vec::new();
    for (poem_id, image_id) in poems.into_iter().zip(images) {
        registry.link_poem_image(&poem_id, &image_id)?;
        pairs.push((poem_id, image_id));
    }
    if pairs.is_empty() {
        return Ok(RandomAssignment {
            pairs,
            log_path: None,
        });
    }
    registry.save()?;

    let now = Local::now();
    let mut log = String::from("Random Image Assignment Log\n");
    log.push_str(&"=".repeat(40));
    log.push('\n');
    let _ = writeln!(log, "Date: {}", now.to_rfc3339());
    let _ = writeln!(log, "Total assignments: {}\n", pairs.len());
    for (poem_id, image_id) in &pairs {
        let title = registry.poem(poem_id).map(|poem| poem.title.as_str()).unwrap_or("");
        let filename = registry
            .image(image_id)
            .map(|image| image.original_filename.as_str())
            .unwrap_or("");
        let _ = writeln!(log, "{poem_id} ({title}) <- {image_id} ({filename})");
    }
    let log_path = log_dir.join(format!(
        "random_assignment_{}.log",
        now.format("%Y%m%d_%H%M%S")
    ));
    write_atomic(&log_path, log.as_bytes())?;
    info!(pairs = pairs.len(), log = %log_path.display(), "random assignment complete");

    Ok(RandomAssignment {
        pairs,
        log_path: Some(log_path),
    })
}
