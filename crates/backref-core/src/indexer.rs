//! Corpus reconciliation
//!
//! The `Indexer` keeps a [`Store`] in step with the files of a [`Corpus`].
//! File reads and fingerprinting happen outside any transaction; each
//! document's store update is its own transaction, so a failed or
//! interrupted run never tears down documents that were already synced.
//!
//! ```ignore
//! let mut indexer = Indexer::open(&config)?;
//! let report = indexer.full_sync()?;
//! println!("{} updated, {} removed", report.stats.documents_updated, report.stats.documents_removed);
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::corpus::Corpus;
use crate::error::IndexResult;
use crate::extract::{Extractor, OrgExtractor};
use crate::fingerprint::fingerprint;
use crate::query::Query;
use crate::store::{Store, WriteSummary};

/// Aggregate counts of a sync run
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct SyncStats {
    /// Documents re-extracted and written
    pub documents_updated: usize,
    /// Link rows inserted
    pub links_inserted: usize,
    /// Title and alias rows written
    pub titles_updated: usize,
    /// Ref bindings written
    pub refs_updated: usize,
    /// Documents cleared because their file disappeared
    pub documents_removed: usize,
}

impl SyncStats {
    fn record(&mut self, summary: &WriteSummary) {
        self.documents_updated += 1;
        self.links_inserted += summary.links;
        self.titles_updated += summary.titles;
        if summary.ref_bound {
            self.refs_updated += 1;
        }
    }
}

/// A document that could not be synced
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DocumentError {
    pub identity: PathBuf,
    pub message: String,
}

/// Result of a full corpus sync
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub stats: SyncStats,
    /// Corpus members seen during the scan
    pub documents_scanned: usize,
    /// Members whose fingerprint matched and were left alone
    pub documents_skipped: usize,
    /// Per-document failures; the scan continued past each
    pub errors: Vec<DocumentError>,
    /// The run stopped early and skipped the removal phase
    pub cancelled: bool,
    pub elapsed: Duration,
}

/// How a sync run ended, for callers that only need the verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Clean,
    WithErrors(usize),
}

impl SyncReport {
    pub fn outcome(&self) -> SyncOutcome {
        if self.errors.is_empty() {
            SyncOutcome::Clean
        } else {
            SyncOutcome::WithErrors(self.errors.len())
        }
    }
}

/// What syncing a single document did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSync {
    /// Fingerprint matched; extraction was skipped
    Unchanged,
    /// Document was re-extracted and its rows replaced
    Indexed(WriteSummary),
}

/// Reconciles one corpus with its index
pub struct Indexer<E = OrgExtractor> {
    pub(crate) store: Store,
    pub(crate) corpus: Corpus,
    pub(crate) extractor: E,
    cancel: Option<Arc<AtomicBool>>,
}

impl Indexer<OrgExtractor> {
    /// Open the index for the corpus described by `config`
    ///
    /// The returned indexer owns the store handle; dropping it (or calling
    /// [`Indexer::close`]) releases the connection.
    pub fn open(config: &Config) -> IndexResult<Self> {
        let corpus = Corpus::from_config(config)?;
        let store = Store::open(&config.db_path())?.with_ref_policy(config.ref_policy);
        info!(
            "Opened index {:?} for corpus {:?}",
            config.db_path(),
            corpus.root()
        );
        Ok(Self::new(store, corpus, OrgExtractor))
    }
}

impl<E: Extractor> Indexer<E> {
    pub fn new(store: Store, corpus: Corpus, extractor: E) -> Self {
        Self {
            store,
            corpus,
            extractor,
            cancel: None,
        }
    }

    /// Stop `full_sync` between documents once `flag` is set
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    /// Read-only projections over the index
    pub fn query(&self) -> Query<'_> {
        Query::new(&self.store)
    }

    /// Release the store handle
    pub fn close(self) -> IndexResult<()> {
        self.store.close()
    }

    /// Bring the whole index in line with the corpus
    ///
    /// Unchanged documents are skipped by fingerprint, changed ones are
    /// re-extracted, and documents whose file is gone are cleared.
    /// Per-document failures are collected in the report; only fatal
    /// errors abort the run.
    pub fn full_sync(&mut self) -> IndexResult<SyncReport> {
        self.run_sync(false)
    }

    /// Drop every row and re-extract the whole corpus
    pub fn rebuild(&mut self) -> IndexResult<SyncReport> {
        self.store.clear_all()?;
        self.run_sync(true)
    }

    /// Sync a single document, skipping extraction if it is unchanged
    pub fn sync_one(&mut self, identity: &Path) -> IndexResult<DocumentSync> {
        let stored = self.store.digest_for(identity)?;
        self.sync_document(identity, stored.as_deref())
    }

    fn run_sync(&mut self, force: bool) -> IndexResult<SyncReport> {
        let start = Instant::now();
        let mut report = SyncReport::default();

        let documents = self.corpus.list_documents()?;
        let mut known = self.store.list_documents()?;
        report.documents_scanned = documents.len();

        for identity in &documents {
            if self.is_cancelled() {
                warn!("Sync cancelled after {} documents", report.stats.documents_updated);
                report.cancelled = true;
                break;
            }

            let stored = known.remove(identity);
            let stored = if force { None } else { stored };

            match self.sync_document(identity, stored.as_deref()) {
                Ok(DocumentSync::Unchanged) => report.documents_skipped += 1,
                Ok(DocumentSync::Indexed(summary)) => report.stats.record(&summary),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Failed to sync {:?}: {}", identity, e);
                    report.errors.push(DocumentError {
                        identity: identity.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if !report.cancelled {
            let mut vanished: Vec<PathBuf> = known.into_keys().collect();
            vanished.sort();
            for identity in vanished {
                match self.store.clear_document(&identity) {
                    Ok(_) => {
                        debug!("Cleared vanished document {:?}", identity);
                        report.stats.documents_removed += 1;
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!("Failed to clear {:?}: {}", identity, e);
                        report.errors.push(DocumentError {
                            identity,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        report.elapsed = start.elapsed();
        info!(
            "Synced {} documents: {} updated, {} unchanged, {} removed, {} errors in {:?}",
            report.documents_scanned,
            report.stats.documents_updated,
            report.documents_skipped,
            report.stats.documents_removed,
            report.errors.len(),
            report.elapsed
        );
        Ok(report)
    }

    /// Read, fingerprint and (if changed) extract and store one document
    fn sync_document(
        &mut self,
        identity: &Path,
        stored_digest: Option<&str>,
    ) -> IndexResult<DocumentSync> {
        let bytes = self.corpus.read(identity)?;
        let digest = fingerprint(&bytes);

        if stored_digest == Some(digest.as_str()) {
            debug!("Unchanged {:?}", identity);
            return Ok(DocumentSync::Unchanged);
        }

        let extraction = self.extractor.extract(identity, &bytes);
        let summary = self
            .store
            .write_document(identity, &digest, Utc::now(), &extraction)?;
        debug!(
            "Indexed {:?}: {} titles, {} links",
            identity, summary.titles, summary.links
        );
        Ok(DocumentSync::Indexed(summary))
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}
