use std::path::{Component, Path, PathBuf};

use ignore::WalkBuilder;
use serde::Deserialize;

use crate::error::EngineError;

/// Walks `root` and returns every file whose extension matches one of
/// `exts` (without the leading dot). Hidden files are included; VCS and
/// gitignore rules are not consulted.
pub fn files_with_extensions(root: &Path, exts: &[&str]) -> Result<Vec<PathBuf>, EngineError> {
    walk_files(root, |path| {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| exts.contains(&e))
    })
}

/// Walks `root` and returns every file with the given file name.
pub fn files_with_name(root: &Path, name: &str) -> Result<Vec<PathBuf>, EngineError> {
    walk_files(root, |path| {
        path.file_name().and_then(|n| n.to_str()) == Some(name)
    })
}

fn walk_files(
    root: &Path,
    keep: impl Fn(&Path) -> bool,
) -> Result<Vec<PathBuf>, EngineError> {
    if !root.exists() {
        return Err(EngineError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no such directory: {}", root.display()),
        )));
    }
    let mut files = Vec::new();
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .sort_by_file_path(|a, b| a.cmp(b))
        .build();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable entry during walk");
                continue;
            }
        };
        let path = entry.path();
        if entry.file_type().is_some_and(|t| t.is_file()) && keep(path) {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

/// Returns the YAML files under `root` whose top-level `kind` equals
/// `kind_filter`. Files that fail to parse are skipped.
pub fn yamls_with_kind(root: &Path, kind_filter: &str) -> Result<Vec<PathBuf>, EngineError> {
    #[derive(Deserialize)]
    struct Preamble {
        #[serde(default)]
        kind: String,
    }

    let mut matches = Vec::new();
    for path in files_with_extensions(root, &["yaml", "yml"])? {
        let Ok(text) = std::fs::read_to_string(&path) else {
            continue;
        };
        if let Ok(preamble) = serde_yaml::from_str::<Preamble>(&text) {
            if preamble.kind == kind_filter {
                matches.push(path);
            }
        }
    }
    Ok(matches)
}

/// Resolves `.` and `..` components lexically without touching the
/// filesystem. `..` at the root is dropped.
pub fn lexical_clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() {
                    cleaned = PathBuf::from("/");
                }
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

/// True when `child` equals `parent` or lies underneath it. Both paths are
/// compared lexically after cleaning; callers canonicalize beforehand when
/// symlinks matter.
pub fn is_parent(child: &Path, parent: &Path) -> bool {
    let child = lexical_clean(child);
    let parent = lexical_clean(parent);
    child.starts_with(&parent)
}

/// Recursively copies a file or directory tree.
pub fn copy_recursively(src: &Path, dest: &Path) -> Result<(), EngineError> {
    if src.is_dir() {
        std::fs::create_dir_all(dest)?;
        for entry in std::fs::read_dir(src)? {
            let entry = entry?;
            copy_recursively(&entry.path(), &dest.join(entry.file_name()))?;
        }
    } else {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(src, dest)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn files_with_extensions_finds_nested_matches_in_sorted_order() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("b/inner")).unwrap();
        fs::write(temp.path().join("b/inner/z.yaml"), "kind: X").unwrap();
        fs::write(temp.path().join("a.yml"), "kind: Y").unwrap();
        fs::write(temp.path().join("skip.txt"), "").unwrap();

        let files = files_with_extensions(temp.path(), &["yaml", "yml"]).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.yml"));
        assert!(files[1].ends_with("z.yaml"));
    }

    #[test]
    fn yamls_with_kind_filters_on_preamble() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("match.yaml"), "kind: Deployment\nx: 1").unwrap();
        fs::write(temp.path().join("other.yaml"), "kind: Service").unwrap();
        fs::write(temp.path().join("broken.yaml"), ": : :").unwrap();

        let files = yamls_with_kind(temp.path(), "Deployment").unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("match.yaml"));
    }

    #[test]
    fn lexical_clean_resolves_dot_components() {
        assert_eq!(
            lexical_clean(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(lexical_clean(Path::new("/a/../..")), PathBuf::from("/"));
    }

    #[test]
    fn is_parent_accepts_self_and_descendants_only() {
        assert!(is_parent(Path::new("/a/b"), Path::new("/a")));
        assert!(is_parent(Path::new("/a"), Path::new("/a")));
        assert!(!is_parent(Path::new("/a/../etc"), Path::new("/a")));
        assert!(!is_parent(Path::new("/ab"), Path::new("/a")));
    }
}
