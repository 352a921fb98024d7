//! Shared fixtures for unit tests

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;

use crate::corpus::Corpus;
use crate::extract::{Extraction, Extractor, OrgExtractor};
use crate::indexer::Indexer;
use crate::store::{RefPolicy, Store};

/// Org extractor that counts its invocations
pub(crate) struct CountingExtractor {
    calls: Arc<AtomicUsize>,
}

impl Extractor for CountingExtractor {
    fn extract(&self, identity: &Path, bytes: &[u8]) -> Extraction {
        self.calls.fetch_add(1, Ordering::SeqCst);
        OrgExtractor.extract(identity, bytes)
    }
}

/// A throwaway corpus of `.txt` and `.org` notes
pub(crate) struct TestCorpus {
    _dir: TempDir,
    root: PathBuf,
    calls: Arc<AtomicUsize>,
}

impl TestCorpus {
    pub(crate) fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        Self {
            _dir: dir,
            root,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Write a note, returning its identity
    pub(crate) fn write(&self, rel: &str, content: &str) -> PathBuf {
        self.write_bytes(rel, content.as_bytes())
    }

    pub(crate) fn write_bytes(&self, rel: &str, content: &[u8]) -> PathBuf {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    pub(crate) fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel)).unwrap()
    }

    pub(crate) fn remove(&self, rel: &str) -> PathBuf {
        let path = self.path(rel);
        fs::remove_file(&path).unwrap();
        path
    }

    /// Move a note on disk, as the host would before a rename event
    pub(crate) fn rename(&self, from: &str, to: &str) -> (PathBuf, PathBuf) {
        let (old, new) = (self.path(from), self.path(to));
        fs::create_dir_all(new.parent().unwrap()).unwrap();
        fs::rename(&old, &new).unwrap();
        (old, new)
    }

    pub(crate) fn corpus(&self) -> Corpus {
        Corpus::new(&self.root, vec!["txt".to_string(), "org".to_string()]).unwrap()
    }

    pub(crate) fn indexer(&self) -> Indexer<CountingExtractor> {
        self.indexer_with_policy(RefPolicy::Overwrite)
    }

    pub(crate) fn indexer_with_policy(&self, policy: RefPolicy) -> Indexer<CountingExtractor> {
        let store = Store::open_in_memory().unwrap().with_ref_policy(policy);
        let extractor = CountingExtractor {
            calls: Arc::clone(&self.calls),
        };
        Indexer::new(store, self.corpus(), extractor)
    }

    /// How many times any indexer built here ran extraction
    pub(crate) fn extractions(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every link's source must have a document row
    pub(crate) fn assert_no_orphaned_links(&self, store: &Store) {
        let documents = store.list_documents().unwrap();
        for (source, target) in store.all_links().unwrap() {
            assert!(
                documents.contains_key(&source),
                "link {:?} -> {:?} has no source document",
                source,
                target
            );
        }
    }
}
