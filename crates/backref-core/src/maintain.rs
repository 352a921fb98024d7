//! Consistency maintenance for host file events
//!
//! The embedding application calls [`Indexer::on_save`],
//! [`Indexer::on_delete`] and [`Indexer::on_rename`] after it has changed
//! the file. Renames rewrite the link text of every document pointing at
//! the old path before the index rows move, so backlink queries never
//! report a target whose document row is already gone.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::corpus::{canonicalize_path, slug};
use crate::error::{IndexError, IndexResult};
use crate::extract::{find_links, format_link, Extractor, LinkOccurrence};
use crate::fingerprint::fingerprint;
use crate::indexer::{DocumentError, DocumentSync, Indexer};

/// What handling a host event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// The path is not a corpus member
    Ignored,
    Synced(DocumentSync),
    /// The document was cleared; `existed` is false if it was never indexed
    Removed { existed: bool },
    Renamed(RenameReport),
}

/// Result of moving a document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenameReport {
    pub old: PathBuf,
    pub new: PathBuf,
    /// Documents whose link text was rewritten
    pub rewritten_sources: Vec<PathBuf>,
    /// Links rewritten across all documents, the renamed one included
    pub links_rewritten: usize,
    /// Sources that could not be rewritten or re-synced
    pub errors: Vec<DocumentError>,
}

impl<E: Extractor> Indexer<E> {
    /// A document was written
    pub fn on_save(&mut self, identity: &Path) -> IndexResult<EventOutcome> {
        let identity = canonicalize_path(identity);
        if !self.corpus.is_member(&identity) {
            debug!("Ignoring save of non-member {:?}", identity);
            return Ok(EventOutcome::Ignored);
        }
        Ok(EventOutcome::Synced(self.sync_one(&identity)?))
    }

    /// A document was removed from disk
    ///
    /// Links other documents hold to it are left as dangling edges.
    pub fn on_delete(&mut self, identity: &Path) -> IndexResult<EventOutcome> {
        let identity = canonicalize_path(identity);
        if !self.corpus.is_member(&identity) {
            debug!("Ignoring delete of non-member {:?}", identity);
            return Ok(EventOutcome::Ignored);
        }
        let existed = self.store.clear_document(&identity)?;
        info!("Removed {:?} from index", identity);
        Ok(EventOutcome::Removed { existed })
    }

    /// A document moved from `old` to `new`
    ///
    /// The file must already be at `new`. Moving out of the corpus acts
    /// as a delete and moving into it acts as a save.
    pub fn on_rename(&mut self, old: &Path, new: &Path) -> IndexResult<EventOutcome> {
        let old = canonicalize_path(old);
        let new = canonicalize_path(new);
        if old == new {
            return self.on_save(&new);
        }

        match (self.corpus.is_member(&old), self.corpus.is_member(&new)) {
            (false, false) => Ok(EventOutcome::Ignored),
            (true, false) => self.on_delete(&old),
            (false, true) => self.on_save(&new),
            (true, true) => Ok(EventOutcome::Renamed(self.rename_member(&old, &new)?)),
        }
    }

    fn rename_member(&mut self, old: &Path, new: &Path) -> IndexResult<RenameReport> {
        let mut report = RenameReport {
            old: old.to_path_buf(),
            new: new.to_path_buf(),
            ..RenameReport::default()
        };
        if new.to_str().is_none() {
            return Err(IndexError::NonUtf8Path {
                path: new.to_path_buf(),
            });
        }
        let old_description = self.description_of(old)?;

        match self.relocate_own_links(old, new) {
            Ok(count) => report.links_rewritten += count,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Failed to relocate links in {:?}: {}", new, e);
                report.errors.push(DocumentError {
                    identity: new.to_path_buf(),
                    message: e.to_string(),
                });
            }
        }

        let bytes = self.corpus.read(new)?;
        let digest = fingerprint(&bytes);
        let extraction = self.extractor.extract(new, &bytes);
        let new_description = extraction
            .titles
            .first()
            .cloned()
            .unwrap_or_else(|| slug(new));

        let sources: BTreeSet<PathBuf> = self
            .store
            .backlinks_to(old)?
            .into_iter()
            .map(|backlink| backlink.source)
            .filter(|source| source != old && source != new)
            .collect();

        for source in sources {
            let rewritten = self.rewrite_file(&source, |link| {
                if link.target != old {
                    return None;
                }
                let path = link_path(new, parent_dir(&source), link.is_relative());
                let description = link.description.map(|d| {
                    if d == old_description {
                        new_description.as_str()
                    } else {
                        d
                    }
                });
                Some(format_link(&path, link.search, description))
            });

            let result = rewritten.and_then(|count| {
                self.sync_one(&source)?;
                Ok(count)
            });
            match result {
                Ok(0) => {}
                Ok(count) => {
                    debug!("Rewrote {} links in {:?}", count, source);
                    report.links_rewritten += count;
                    report.rewritten_sources.push(source);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Failed to update links in {:?}: {}", source, e);
                    report.errors.push(DocumentError {
                        identity: source,
                        message: e.to_string(),
                    });
                }
            }
        }

        self.store
            .rename_document(old, new, &digest, Utc::now(), &extraction)?;
        info!(
            "Renamed {:?} to {:?}: {} links in {} documents rewritten",
            old,
            new,
            report.links_rewritten,
            report.rewritten_sources.len()
        );
        Ok(report)
    }

    /// Point the moved document's own links back at their targets
    fn relocate_own_links(&self, old: &Path, new: &Path) -> IndexResult<usize> {
        let new_dir = parent_dir(new);
        let bytes = self.corpus.read(new)?;
        let text = String::from_utf8_lossy(&bytes);

        // Resolve against the old location, where the text was written
        let (rewritten, count) = splice(&text, old, |link| {
            let target = if link.target == old {
                new
            } else {
                link.target.as_path()
            };
            if link.is_relative() {
                if canonicalize_path(&new_dir.join(link.path)) == target {
                    return None;
                }
            } else if link.target != old {
                return None;
            }
            let path = link_path(target, new_dir, link.is_relative());
            Some(format_link(&path, link.search, link.description))
        });

        if count > 0 {
            ensure_utf8(&text, new)?;
            self.corpus.write(new, rewritten.as_bytes())?;
        }
        Ok(count)
    }

    /// Rewrite the links `replace` picks in one document
    fn rewrite_file<F>(&self, identity: &Path, replace: F) -> IndexResult<usize>
    where
        F: FnMut(&LinkOccurrence<'_>) -> Option<String>,
    {
        let bytes = self.corpus.read(identity)?;
        let text = String::from_utf8_lossy(&bytes);

        let (rewritten, count) = splice(&text, identity, replace);
        if count > 0 {
            ensure_utf8(&text, identity)?;
            self.corpus.write(identity, rewritten.as_bytes())?;
        }
        Ok(count)
    }

    /// Display text a link to `identity` gets by default
    fn description_of(&self, identity: &Path) -> IndexResult<String> {
        Ok(self
            .store
            .titles_for(identity)?
            .into_iter()
            .next()
            .unwrap_or_else(|| slug(identity)))
    }
}

/// Replace the links in `text` for which `replace` returns new text
fn splice<F>(text: &str, source: &Path, mut replace: F) -> (String, usize)
where
    F: FnMut(&LinkOccurrence<'_>) -> Option<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let mut count = 0;

    for link in find_links(text, source) {
        if let Some(replacement) = replace(&link) {
            out.push_str(&text[last..link.range.start]);
            out.push_str(&replacement);
            last = link.range.end;
            count += 1;
        }
    }
    out.push_str(&text[last..]);
    (out, count)
}

/// Refuse to write back text that was decoded lossily
fn ensure_utf8(text: &Cow<'_, str>, identity: &Path) -> IndexResult<()> {
    match text {
        Cow::Borrowed(_) => Ok(()),
        Cow::Owned(_) => Err(IndexError::NonUtf8Text {
            path: identity.to_path_buf(),
        }),
    }
}

/// Path text for a link to `target` written in a document under `dir`
fn link_path(target: &Path, dir: &Path, relative: bool) -> String {
    let path = if relative {
        pathdiff::diff_paths(target, dir).unwrap_or_else(|| target.to_path_buf())
    } else {
        target.to_path_buf()
    };
    path.to_string_lossy().into_owned()
}

fn parent_dir(identity: &Path) -> &Path {
    identity.parent().unwrap_or_else(|| Path::new("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestCorpus;

    #[test]
    fn test_scenario_rename() {
        let corpus = TestCorpus::new();
        let a = corpus.write("a.txt", "#+TITLE: Alpha\n\nSee [[file:b.txt][Beta]].\n");
        corpus.write("b.txt", "#+TITLE: Beta\n");
        let mut indexer = corpus.indexer();
        indexer.full_sync().unwrap();

        let (b, c) = corpus.rename("b.txt", "c.txt");
        let outcome = indexer.on_rename(&b, &c).unwrap();

        let EventOutcome::Renamed(report) = outcome else {
            panic!("expected a rename, got {:?}", outcome);
        };
        assert_eq!(report.rewritten_sources, vec![a.clone()]);
        assert_eq!(report.links_rewritten, 1);
        assert!(report.errors.is_empty());

        assert_eq!(corpus.read("a.txt"), "#+TITLE: Alpha\n\nSee [[file:c.txt][Beta]].\n");

        let store = indexer.store();
        let backlinks = store.backlinks_to(&c).unwrap();
        assert_eq!(backlinks.len(), 1);
        assert_eq!(backlinks[0].source, a);
        assert!(store.backlinks_to(&b).unwrap().is_empty());
        assert!(store.document(&b).unwrap().is_none());
        assert_eq!(store.titles_for(&c).unwrap(), vec!["Beta"]);
        corpus.assert_no_orphaned_links(store);
    }

    #[test]
    fn test_rename_descriptions() {
        let corpus = TestCorpus::new();
        corpus.write(
            "a.txt",
            "[[file:b.txt][Beta]] [[file:b.txt][my words]] [[file:b.txt]] [[file:b.txt::*Intro][Beta]]\n",
        );
        corpus.write("b.txt", "#+TITLE: Beta\n");
        let mut indexer = corpus.indexer();
        indexer.full_sync().unwrap();

        let (b, c) = corpus.rename("b.txt", "c.txt");
        corpus.write("c.txt", "#+TITLE: Gamma\n");
        indexer.on_rename(&b, &c).unwrap();

        assert_eq!(
            corpus.read("a.txt"),
            "[[file:c.txt][Gamma]] [[file:c.txt][my words]] [[file:c.txt]] [[file:c.txt::*Intro][Gamma]]\n"
        );
        assert_eq!(indexer.store().backlinks_to(&c).unwrap().len(), 4);
    }

    #[test]
    fn test_untitled_description_uses_slug() {
        let corpus = TestCorpus::new();
        corpus.write("a.txt", "[[file:b.txt][b]]\n");
        corpus.write("b.txt", "no title here\n");
        let mut indexer = corpus.indexer();
        indexer.full_sync().unwrap();

        let (b, c) = corpus.rename("b.txt", "c.txt");
        indexer.on_rename(&b, &c).unwrap();

        assert_eq!(corpus.read("a.txt"), "[[file:c.txt][c]]\n");
    }

    #[test]
    fn test_rename_across_directories() {
        let corpus = TestCorpus::new();
        let a = corpus.write("a.txt", "[[file:b.txt]]\n");
        corpus.write("sub/d.txt", "[[file:../b.txt]]\n");
        corpus.write(
            "b.txt",
            "#+TITLE: Beta\n[[file:a.txt]] [[file:b.txt::*Top]]\n",
        );
        let mut indexer = corpus.indexer();
        indexer.full_sync().unwrap();

        let (b, moved) = corpus.rename("b.txt", "sub/b.txt");
        let outcome = indexer.on_rename(&b, &moved).unwrap();
        assert!(matches!(outcome, EventOutcome::Renamed(_)));

        assert_eq!(corpus.read("a.txt"), "[[file:sub/b.txt]]\n");
        assert_eq!(corpus.read("sub/d.txt"), "[[file:b.txt]]\n");
        // The self-link resolves to the new path without changes
        assert_eq!(
            corpus.read("sub/b.txt"),
            "#+TITLE: Beta\n[[file:../a.txt]] [[file:b.txt::*Top]]\n"
        );

        let store = indexer.store();
        let targets: Vec<PathBuf> = store
            .links_from(&moved)
            .unwrap()
            .into_iter()
            .map(|link| link.target)
            .collect();
        assert_eq!(targets, vec![a.clone(), moved.clone()]);
        assert_eq!(store.backlinks_to(&moved).unwrap().len(), 3);
        assert!(store.dangling_links().unwrap().is_empty());
    }

    #[test]
    fn test_absolute_links_stay_absolute() {
        let corpus = TestCorpus::new();
        let b = corpus.path("b.txt");
        corpus.write("a.txt", &format!("[[file:{}]]\n", b.display()));
        corpus.write("b.txt", "#+TITLE: Beta\n");
        let mut indexer = corpus.indexer();
        indexer.full_sync().unwrap();

        let (b, c) = corpus.rename("b.txt", "c.txt");
        indexer.on_rename(&b, &c).unwrap();

        assert_eq!(corpus.read("a.txt"), format!("[[file:{}]]\n", c.display()));
    }

    #[test]
    fn test_non_utf8_source_is_reported() {
        let corpus = TestCorpus::new();
        let a = corpus.write_bytes("a.txt", b"caf\xff [[file:b.txt][Beta]]\n");
        let d = corpus.write("d.txt", "[[file:b.txt][Beta]]\n");
        corpus.write("b.txt", "#+TITLE: Beta\n");
        let mut indexer = corpus.indexer();
        indexer.full_sync().unwrap();

        let (b, c) = corpus.rename("b.txt", "c.txt");
        let EventOutcome::Renamed(report) = indexer.on_rename(&b, &c).unwrap() else {
            panic!("expected a rename");
        };

        assert_eq!(report.rewritten_sources, vec![d]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].identity, a);
        assert!(report.errors[0].message.contains("UTF-8"));

        // The file is left untouched and its link dangles
        assert_eq!(
            std::fs::read(&a).unwrap(),
            b"caf\xff [[file:b.txt][Beta]]\n".to_vec()
        );
        let dangling = indexer.store().dangling_links().unwrap();
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].source, a);
    }

    #[test]
    fn test_non_utf8_renamed_document_is_reported() {
        let corpus = TestCorpus::new();
        corpus.write("a.txt", "#+TITLE: Alpha\n");
        corpus.write_bytes("b.txt", b"caf\xff [[file:a.txt]]\n");
        let mut indexer = corpus.indexer();
        indexer.full_sync().unwrap();

        let (b, moved) = corpus.rename("b.txt", "sub/b.txt");
        let EventOutcome::Renamed(report) = indexer.on_rename(&b, &moved).unwrap() else {
            panic!("expected a rename");
        };

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].identity, moved);
        assert!(indexer.store().document(&moved).unwrap().is_some());
        assert!(indexer.store().document(&b).unwrap().is_none());
    }

    #[test]
    fn test_non_utf8_document_without_links_renames_cleanly() {
        let corpus = TestCorpus::new();
        corpus.write_bytes("b.txt", b"caf\xff\n");
        let mut indexer = corpus.indexer();
        indexer.full_sync().unwrap();

        let (b, c) = corpus.rename("b.txt", "c.txt");
        let EventOutcome::Renamed(report) = indexer.on_rename(&b, &c).unwrap() else {
            panic!("expected a rename");
        };
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_rename_out_of_corpus_is_delete() {
        let corpus = TestCorpus::new();
        corpus.write("b.txt", "#+TITLE: Beta\n#+ROAM_KEY: beta\n");
        let mut indexer = corpus.indexer();
        indexer.full_sync().unwrap();

        let (b, md) = corpus.rename("b.txt", "b.md");
        let outcome = indexer.on_rename(&b, &md).unwrap();

        assert_eq!(outcome, EventOutcome::Removed { existed: true });
        assert!(indexer.store().ref_lookup("beta").unwrap().is_none());
        assert_eq!(indexer.store().counts().unwrap().documents, 0);
    }

    #[test]
    fn test_rename_into_corpus_is_save() {
        let corpus = TestCorpus::new();
        corpus.write("draft.md", "#+TITLE: Draft\n");
        let mut indexer = corpus.indexer();
        indexer.full_sync().unwrap();
        assert_eq!(indexer.store().counts().unwrap().documents, 0);

        let (draft, note) = corpus.rename("draft.md", "draft.txt");
        let outcome = indexer.on_rename(&draft, &note).unwrap();

        assert!(matches!(
            outcome,
            EventOutcome::Synced(DocumentSync::Indexed(_))
        ));
        assert_eq!(indexer.store().titles_for(&note).unwrap(), vec!["Draft"]);
    }

    #[test]
    fn test_rename_between_non_members_is_ignored() {
        let corpus = TestCorpus::new();
        corpus.write("a.md", "x\n");
        let mut indexer = corpus.indexer();

        let (a, b) = corpus.rename("a.md", "b.md");
        assert_eq!(indexer.on_rename(&a, &b).unwrap(), EventOutcome::Ignored);
    }

    #[test]
    fn test_on_delete_leaves_dangling_edges() {
        let corpus = TestCorpus::new();
        let a = corpus.write("a.txt", "[[file:b.txt]]\n");
        corpus.write("b.txt", "#+TITLE: Beta\n");
        let mut indexer = corpus.indexer();
        indexer.full_sync().unwrap();

        let b = corpus.remove("b.txt");
        assert_eq!(
            indexer.on_delete(&b).unwrap(),
            EventOutcome::Removed { existed: true }
        );
        assert_eq!(
            indexer.on_delete(&b).unwrap(),
            EventOutcome::Removed { existed: false }
        );

        let dangling = indexer.store().dangling_links().unwrap();
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].source, a);
        corpus.assert_no_orphaned_links(indexer.store());
    }

    #[test]
    fn test_on_delete_ignores_non_members() {
        let corpus = TestCorpus::new();
        let mut indexer = corpus.indexer();
        let outcome = indexer.on_delete(&corpus.path("notes.md")).unwrap();
        assert_eq!(outcome, EventOutcome::Ignored);
    }

    #[test]
    fn test_on_save() {
        let corpus = TestCorpus::new();
        let a = corpus.write("a.txt", "#+TITLE: Alpha\n");
        corpus.write("a.md", "#+TITLE: Alpha\n");
        let mut indexer = corpus.indexer();

        assert!(matches!(
            indexer.on_save(&a).unwrap(),
            EventOutcome::Synced(DocumentSync::Indexed(_))
        ));
        assert_eq!(
            indexer.on_save(&a).unwrap(),
            EventOutcome::Synced(DocumentSync::Unchanged)
        );
        assert_eq!(
            indexer.on_save(&corpus.path("a.md")).unwrap(),
            EventOutcome::Ignored
        );
    }

    #[test]
    fn test_no_orphans_after_event_sequence() {
        let corpus = TestCorpus::new();
        corpus.write("a.txt", "[[file:b.txt]] [[file:c.txt]]\n");
        corpus.write("b.txt", "[[file:a.txt]] [[file:c.txt]]\n");
        corpus.write("c.txt", "[[file:b.txt]]\n");
        let mut indexer = corpus.indexer();
        indexer.full_sync().unwrap();

        let (b, d) = corpus.rename("b.txt", "d.txt");
        indexer.on_rename(&b, &d).unwrap();
        let c = corpus.remove("c.txt");
        indexer.on_delete(&c).unwrap();
        let (a, e) = corpus.rename("a.txt", "sub/e.txt");
        indexer.on_rename(&a, &e).unwrap();

        corpus.assert_no_orphaned_links(indexer.store());
        assert_eq!(corpus.read("d.txt"), "[[file:sub/e.txt]] [[file:c.txt]]\n");
        assert_eq!(
            corpus.read("sub/e.txt"),
            "[[file:../d.txt]] [[file:../c.txt]]\n"
        );
    }

    #[test]
    fn test_splice_keeps_surrounding_text() {
        let text = "one [[file:x.txt]] two [[file:y.txt][Y]] three";
        let (out, count) = splice(text, Path::new("/notes/s.txt"), |link| {
            (link.path == "y.txt").then(|| format_link("z.txt", None, link.description))
        });
        assert_eq!(count, 1);
        assert_eq!(out, "one [[file:x.txt]] two [[file:z.txt][Y]] three");
    }
}
