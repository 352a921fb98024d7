//! Filesystem view of the corpus
//!
//! A corpus is every file under a root directory whose extension is
//! accepted, skipping hidden entries and anything matching the exclude
//! pattern. Identities are canonical absolute paths so they can serve as
//! primary keys.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use crate::config::Config;
use crate::error::{IndexError, IndexResult};

/// The set of documents under a corpus root
#[derive(Debug, Clone)]
pub struct Corpus {
    root: PathBuf,
    extensions: Vec<String>,
    exclude: Option<Regex>,
}

impl Corpus {
    /// Create a corpus rooted at an existing directory
    pub fn new(root: impl AsRef<Path>, extensions: Vec<String>) -> IndexResult<Self> {
        let root = root.as_ref();
        let root = fs::canonicalize(root).map_err(|e| IndexError::io(e, root))?;
        Ok(Self {
            root,
            extensions,
            exclude: None,
        })
    }

    /// Build the corpus described by a configuration
    pub fn from_config(config: &Config) -> IndexResult<Self> {
        let corpus = Self::new(&config.corpus_root, config.extensions.clone())?;
        match config.exclude.as_deref() {
            Some(pattern) => corpus.with_exclude(pattern),
            None => Ok(corpus),
        }
    }

    /// Skip files whose root-relative path matches `pattern`
    pub fn with_exclude(mut self, pattern: &str) -> IndexResult<Self> {
        let regex = Regex::new(pattern).map_err(|source| IndexError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        self.exclude = Some(regex);
        Ok(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enumerate every member document, sorted by identity
    ///
    /// Unreadable directory entries are logged and skipped.
    pub fn list_documents(&self) -> IndexResult<Vec<PathBuf>> {
        let mut documents = Vec::new();

        let walker = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable corpus entry: {}", e);
                    continue;
                }
            };

            // Follows symlinks to files; broken links are skipped
            if !entry.path().is_file() {
                continue;
            }

            let identity = canonicalize_path(entry.path());
            if self.is_member(&identity) {
                documents.push(identity);
            }
        }

        documents.sort();
        documents.dedup();
        Ok(documents)
    }

    /// Whether `identity` names a document this corpus indexes
    pub fn is_member(&self, identity: &Path) -> bool {
        let Ok(relative) = identity.strip_prefix(&self.root) else {
            return false;
        };

        let hidden = relative.components().any(|c| match c {
            Component::Normal(name) => name.to_string_lossy().starts_with('.'),
            _ => false,
        });
        if hidden {
            return false;
        }

        let accepted = identity
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy();
                self.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
            })
            .unwrap_or(false);
        if !accepted {
            return false;
        }

        match &self.exclude {
            Some(regex) => !regex.is_match(&relative_key(relative)),
            None => true,
        }
    }

    /// Read a document's bytes
    pub fn read(&self, identity: &Path) -> IndexResult<Vec<u8>> {
        fs::read(identity).map_err(|e| IndexError::io(e, identity))
    }

    /// Replace a document's bytes atomically
    ///
    /// Writes a hidden temp file next to the target, syncs it, then
    /// renames it over the target.
    pub fn write(&self, identity: &Path, data: &[u8]) -> IndexResult<()> {
        atomic_write(identity, data).map_err(|e| IndexError::io(e, identity))
    }
}

/// Slug of a document: its file stem, used when no title is declared
pub fn slug(identity: &Path) -> String {
    identity
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Canonicalize a path that may not exist yet
///
/// Existing paths have their symlinks resolved. For a missing path the
/// nearest existing ancestor is canonicalized and the remaining
/// components are appended.
pub fn canonicalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let normalized = normalize_lexically(&absolute);

    if let Ok(real) = fs::canonicalize(&normalized) {
        return real;
    }

    let mut tail = Vec::new();
    let mut cursor = normalized.as_path();
    while let Some(parent) = cursor.parent() {
        if let Some(name) = cursor.file_name() {
            tail.push(name.to_os_string());
        }
        if let Ok(mut real) = fs::canonicalize(parent) {
            for name in tail.iter().rev() {
                real.push(name);
            }
            return real;
        }
        cursor = parent;
    }

    normalized
}

/// Resolve `.` and `..` without touching the filesystem
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Root-relative path with `/` separators, as matched by exclude patterns
fn relative_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.backref-tmp", file_name));

    let mut file = File::create(&temp_path)?;
    let result = file
        .write_all(data)
        // Sync to disk before rename
        .and_then(|()| file.sync_all())
        .and_then(|()| fs::rename(&temp_path, path));

    if result.is_err() {
        drop(file);
        if let Err(e) = fs::remove_file(&temp_path) {
            warn!("Could not remove temp file {:?}: {}", temp_path, e);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn org_corpus(dir: &TempDir) -> Corpus {
        Corpus::new(dir.path(), vec!["org".to_string()]).unwrap()
    }

    fn touch(dir: &TempDir, rel: &str) -> PathBuf {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "x").unwrap();
        path
    }

    #[test]
    fn test_list_documents_recurses_and_filters() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "a.org");
        touch(&dir, "sub/b.org");
        touch(&dir, "sub/deeper/c.ORG");
        touch(&dir, "readme.md");
        touch(&dir, ".hidden.org");
        touch(&dir, ".git/d.org");

        let corpus = org_corpus(&dir);
        let docs = corpus.list_documents().unwrap();
        let names: Vec<String> = docs.iter().map(|p| slug(p)).collect();

        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(docs.iter().all(|p| p.starts_with(corpus.root())));
    }

    #[test]
    fn test_exclude_pattern() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "a.org");
        touch(&dir, "archive/old.org");

        let corpus = org_corpus(&dir).with_exclude("^archive/").unwrap();
        let docs = corpus.list_documents().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(slug(&docs[0]), "a");
    }

    #[test]
    fn test_invalid_exclude_pattern() {
        let dir = TempDir::new().unwrap();
        let err = org_corpus(&dir).with_exclude("(unclosed").unwrap_err();
        assert!(matches!(err, IndexError::InvalidPattern { .. }));
    }

    #[test]
    fn test_is_member() {
        let dir = TempDir::new().unwrap();
        let corpus = org_corpus(&dir);
        let root = corpus.root().to_path_buf();

        assert!(corpus.is_member(&root.join("x.org")));
        assert!(corpus.is_member(&root.join("not-yet/created.org")));
        assert!(!corpus.is_member(&root.join("x.txt")));
        assert!(!corpus.is_member(&root.join(".backref.db")));
        assert!(!corpus.is_member(Path::new("/elsewhere/x.org")));
    }

    #[test]
    fn test_canonicalize_missing_path() {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();

        let missing = dir.path().join("sub").join("..").join("new.org");
        assert_eq!(canonicalize_path(&missing), root.join("new.org"));

        let existing = touch(&dir, "here.org");
        assert_eq!(canonicalize_path(&existing), root.join("here.org"));
    }

    #[test]
    fn test_write_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "a.org");
        let corpus = org_corpus(&dir);

        corpus.write(&path, b"new content").unwrap();
        assert_eq!(corpus.read(&path).unwrap(), b"new content");

        // No temp file left behind
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".backref-tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_failed_write_removes_temp_file() {
        let dir = TempDir::new().unwrap();
        // A non-empty directory cannot be replaced by a file
        touch(&dir, "blocked.org/inner.org");
        let corpus = org_corpus(&dir);

        let err = corpus
            .write(&dir.path().join("blocked.org"), b"content")
            .unwrap_err();
        assert!(matches!(err, IndexError::Io { .. }));

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".backref-tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_read_missing_is_io_error() {
        let dir = TempDir::new().unwrap();
        let corpus = org_corpus(&dir);
        let err = corpus.read(&dir.path().join("gone.org")).unwrap_err();
        assert!(matches!(err, IndexError::Io { .. }));
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug(Path::new("/notes/20200101-idea.org")), "20200101-idea");
        assert_eq!(slug(Path::new("/notes/plain")), "plain");
    }
}
