use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use similar::TextDiff;
use tracing::{debug, info};

use crate::filesystem::{display_path, write_atomic};
use crate::runtime::{ContentLayout, ConsumerTarget};

const ENTRY_INDENT: &str = "        ";
const CLOSE_INDENT: &str = "    ";

/// Byte offsets of a marked array assignment within a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArraySpan {
    /// Start of the marker.
    pub start: usize,
    /// End of the statement, past the `;` when there is one.
    pub end: usize,
    /// Offset of `[`.
    pub open: usize,
    /// Offset of the matching `]`.
    pub close: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsumerUpdate {
    pub path: PathBuf,
    pub marker: String,
    pub entries: usize,
    pub changed: bool,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsumerCheck {
    pub path: PathBuf,
    pub marker: String,
    pub exists: bool,
    pub entries: Option<usize>,
    pub error: Option<String>,
}

impl ConsumerCheck {
    pub fn passed(&self) -> bool {
        self.exists && self.entries.is_some()
    }
}

pub fn locate_array(content: &str, marker: &str) -> Option<ArraySpan> {
    let bytes = content.as_bytes();
    let mut search_from = 0usize;
    while let Some(found) = content[search_from..].find(marker) {
        let start = search_from + found;
        search_from = start + marker.len();

        let mut cursor = skip_whitespace(bytes, start + marker.len());
        if bytes.get(cursor) != Some(&b'=') {
            continue;
        }
        cursor = skip_whitespace(bytes, cursor + 1);
        if bytes.get(cursor) != Some(&b'[') {
            continue;
        }
        let open = cursor;
        let Some(close) = matching_bracket(bytes, open) else {
            return None;
        };
        let after = skip_whitespace(bytes, close + 1);
        let end = if bytes.get(after) == Some(&b';') {
            after + 1
        } else {
            close + 1
        };
        return Some(ArraySpan {
            start,
            end,
            open,
            close,
        });
    }
    None
}

fn skip_whitespace(bytes: &[u8], mut index: usize) -> usize {
    while index < bytes.len() && bytes[index].is_ascii_whitespace() {
        index += 1;
    }
    index
}

fn matching_bracket(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut escaped = false;
    for (index, &byte) in bytes.iter().enumerate().skip(open) {
        if let Some(active) = quote {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == active {
                quote = None;
            }
            continue;
        }
        match byte {
            b'"' | b'\'' | b'`' => quote = Some(byte),
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

/// Newline-joined, double-quoted list in the loader scripts' layout.
pub fn render_path_array(paths: &[String]) -> Result<String> {
    let mut out = String::from("[\n");
    let mut rendered = Vec::with_capacity(paths.len());
    for path in paths {
        let quoted = serde_json::to_string(path).context("failed to quote consumer path")?;
        rendered.push(format!("{ENTRY_INDENT}{quoted}"));
    }
    if !rendered.is_empty() {
        out.push_str(&rendered.join(",\n"));
        out.push('\n');
    }
    out.push_str(CLOSE_INDENT);
    out.push(']');
    Ok(out)
}

/// Rewrite the one marked path array (`<marker> = [ ... ];`) inside a
/// loader script. Everything outside the array is left untouched.
pub fn replace_path_array(content: &str, marker: &str, paths: &[String]) -> Result<String> {
    let Some(span) = locate_array(content, marker) else {
        bail!("could not find `{marker} = [ ... ]` to update");
    };
    let rendered = render_path_array(paths)?;
    let mut out = String::with_capacity(content.len() + rendered.len());
    out.push_str(&content[..span.start]);
    out.push_str(marker);
    out.push_str(" = ");
    out.push_str(&rendered);
    out.push(';');
    out.push_str(&content[span.end..]);
    Ok(out)
}

/// Parse the marked array as a list of strings. A trailing comma is tolerated.
pub fn read_path_array(content: &str, marker: &str) -> Result<Vec<String>> {
    let Some(span) = locate_array(content, marker) else {
        bail!("could not find `{marker} = [ ... ]`");
    };
    let inner = content[span.open + 1..span.close].trim_end();
    let inner = inner.strip_suffix(',').unwrap_or(inner);
    let literal = format!("[{inner}]");
    serde_json::from_str(&literal)
        .with_context(|| format!("`{marker}` array is not a well-formed string list"))
}

/// Regenerate one script's array. With `dry_run` nothing is written and a
/// unified diff of the pending change is returned instead.
pub fn sync_consumer(
    target: &ConsumerTarget,
    paths: &[String],
    dry_run: bool,
) -> Result<ConsumerUpdate> {
    let current = fs::read_to_string(&target.path)
        .with_context(|| format!("failed to read consumer script {}", target.path.display()))?;
    let updated = replace_path_array(&current, &target.marker, paths)
        .with_context(|| format!("failed to update {}", target.path.display()))?;
    let changed = updated != current;

    if dry_run {
        let diff = changed.then(|| {
            let label = display_path(&target.path);
            let text_diff = TextDiff::from_lines(&current, &updated);
            text_diff
                .unified_diff()
                .context_radius(3)
                .header(&label, &label)
                .to_string()
        });
        return Ok(ConsumerUpdate {
            path: target.path.clone(),
            marker: target.marker.clone(),
            entries: paths.len(),
            changed,
            dry_run,
            diff,
        });
    }

    if changed {
        write_atomic(&target.path, updated.as_bytes())?;
    } else {
        debug!(path = %target.path.display(), "consumer script already current");
    }

    let written = fs::read_to_string(&target.path)
        .with_context(|| format!("failed to re-read {}", target.path.display()))?;
    let parsed = read_path_array(&written, &target.marker)
        .with_context(|| format!("post-write validation failed for {}", target.path.display()))?;
    if parsed != paths {
        bail!(
            "post-write validation failed for {}: expected {} entries, found {}",
            target.path.display(),
            paths.len(),
            parsed.len()
        );
    }
    info!(path = %target.path.display(), entries = paths.len(), changed, "synced consumer script");

    Ok(ConsumerUpdate {
        path: target.path.clone(),
        marker: target.marker.clone(),
        entries: paths.len(),
        changed,
        dry_run,
        diff: None,
    })
}

pub fn sync_consumers(
    layout: &ContentLayout,
    paths: &[String],
    dry_run: bool,
) -> Result<Vec<ConsumerUpdate>> {
    layout
        .consumers
        .iter()
        .map(|target| sync_consumer(target, paths, dry_run))
        .collect()
}

pub fn check_consumer(target: &ConsumerTarget) -> ConsumerCheck {
    let mut check = ConsumerCheck {
        path: target.path.clone(),
        marker: target.marker.clone(),
        exists: target.path.exists(),
        entries: None,
        error: None,
    };
    if !check.exists {
        check.error = Some("file not found".to_string());
        return check;
    }
    match fs::read_to_string(&target.path)
        .map_err(anyhow::Error::from)
        .and_then(|content| read_path_array(&content, &target.marker))
    {
        Ok(entries) => check.entries = Some(entries.len()),
        Err(error) => check.error = Some(format!("{error:#}")),
    }
    check
}
