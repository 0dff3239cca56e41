use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// Write `content` to a temporary sibling and rename it over `path`.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let tmp_path = tmp_sibling(path);
    fs::write(&tmp_path, content)
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    if let Err(error) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(error).with_context(|| {
            format!(
                "failed to move {} into place at {}",
                tmp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.tmp"))
}

/// Files directly inside `dir` whose extension is in `extensions`, sorted by name.
/// A missing directory yields an empty list.
pub fn list_files_with_extensions(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            });
        if matches {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

/// Recursively copy `source` into `target`, returning the copied files as
/// paths relative to `target`.
pub fn copy_tree(source: &Path, target: &Path) -> Result<Vec<String>> {
    let mut copied = Vec::new();
    if !source.exists() {
        return Ok(copied);
    }
    fs::create_dir_all(target).with_context(|| format!("failed to create {}", target.display()))?;
    for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", source.display()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .with_context(|| format!("failed to relativize {}", entry.path().display()))?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination)
                .with_context(|| format!("failed to create {}", destination.display()))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &destination).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    entry.path().display(),
                    destination.display()
                )
            })?;
            copied.push(display_path(relative));
        }
    }
    Ok(copied)
}

/// Remove a directory tree if present.
pub fn remove_tree(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path).with_context(|| format!("failed to remove {}", path.display()))?;
    }
    Ok(())
}

/// Full hex SHA-256 digest of a file's bytes.
pub fn hash_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(hex_digest(&bytes))
}

pub fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut output = String::with_capacity(64);
    for byte in digest.iter() {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

/// Reject paths that escape `root` once `.` and `..` are resolved lexically.
pub fn validate_scoped_path(root: &Path, candidate: &Path) -> Result<()> {
    let normalized_root = normalize_pathbuf(root);
    let normalized = normalize_pathbuf(&root.join(candidate));
    if !normalized.starts_with(&normalized_root) {
        bail!(
            "path escapes project root: {} (root: {})",
            display_path(candidate),
            display_path(root)
        );
    }
    Ok(())
}

pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

pub fn display_path(path: &Path) -> String {
    normalize_separators(&path.to_string_lossy())
}

fn normalize_pathbuf(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Path::new(std::path::MAIN_SEPARATOR_STR)),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::{
        copy_tree, hash_file, hex_digest, list_files_with_extensions, validate_scoped_path,
        write_atomic,
    };
    use tempfile::tempdir;

    #[test]
    fn write_atomic_replaces_content_and_leaves_no_tmp() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("nested").join("poem001.md");
        write_atomic(&target, b"first").expect("first write");
        write_atomic(&target, b"second").expect("second write");
        assert_eq!(fs::read_to_string(&target).expect("read"), "second");
        assert!(!temp.path().join("nested").join("poem001.md.tmp").exists());
    }

    #[test]
    fn list_files_filters_extensions_case_insensitively() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("b.PNG"), b"x").expect("write");
        fs::write(temp.path().join("a.jpg"), b"x").expect("write");
        fs::write(temp.path().join("notes.txt"), b"x").expect("write");
        fs::create_dir_all(temp.path().join("sub")).expect("mkdir");
        fs::write(temp.path().join("sub").join("c.png"), b"x").expect("write");

        let files = list_files_with_extensions(
            temp.path(),
            &["png".to_string(), "jpg".to_string()],
        )
        .expect("list");
        let names: Vec<String> = files
            .iter()
            .map(|path| path.file_name().expect("name").to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.jpg".to_string(), "b.PNG".to_string()]);
        assert!(
            list_files_with_extensions(&temp.path().join("missing"), &["png".to_string()])
                .expect("missing dir")
                .is_empty()
        );
    }

    #[test]
    fn copy_tree_copies_nested_files() {
        let temp = tempdir().expect("tempdir");
        let source = temp.path().join("src");
        fs::create_dir_all(source.join("a").join("b")).expect("mkdir");
        fs::write(source.join("top.md"), "top").expect("write");
        fs::write(source.join("a").join("b").join("deep.md"), "deep").expect("write");

        let target = temp.path().join("dst");
        let copied = copy_tree(&source, &target).expect("copy");
        assert_eq!(copied, vec!["a/b/deep.md".to_string(), "top.md".to_string()]);
        assert_eq!(
            fs::read_to_string(target.join("a").join("b").join("deep.md")).expect("read"),
            "deep"
        );
    }

    #[test]
    fn hash_file_matches_known_digest() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("empty");
        fs::write(&path, b"").expect("write");
        assert_eq!(
            hash_file(&path).expect("hash"),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(hex_digest(b"").len(), 64);
    }

    #[test]
    fn scoped_path_rejects_escape() {
        let root = Path::new("/site");
        assert!(validate_scoped_path(root, Path::new("js/loader.js")).is_ok());
        assert!(validate_scoped_path(root, Path::new("../outside.js")).is_err());
    }
}
