//! Ingestion engine: checkpoint-gated incremental fetch into the raw layer.
//!
//! For each instrument in the universe:
//! 1. Skip when its checkpoint lies in the future.
//! 2. Fetch the entire history when unseen, otherwise everything since the
//!    checkpoint date (inclusive; curation deduplicates the overlap).
//! 3. Write the rows as a new raw snapshot (nothing is written for zero rows).
//! 4. Advance the checkpoint to today.
//!
//! Fetch and write failures are isolated per instrument: the outcome is
//! `Failed`, the checkpoint stays put and the run continues. Ledger errors
//! abort the run.
//!
//! In batch mode all fetched rows are written as one snapshot under
//! `{batch_group}/batch`, and checkpoints advance only after that write lands.

use chrono::NaiveDate;
use quarry_core::source::Pacer;
use quarry_core::{
    Checkpoint, CheckpointLedger, Clock, FetchRange, InstrumentKey, Interval, Layer, LayerStore,
    LedgerError, MarketDataSource, Record, SnapshotFormat, SnapshotLocator, SnapshotName, Universe,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("checkpoint ledger: {0}")]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    /// One raw snapshot per instrument.
    #[default]
    Single,
    /// One combined raw snapshot for the whole run.
    Batch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOptions {
    pub mode: IngestMode,
    pub interval: Interval,
    pub format: SnapshotFormat,
    /// Group of the synthetic batch key.
    pub batch_group: String,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            mode: IngestMode::Single,
            interval: Interval::Day,
            format: SnapshotFormat::Csv,
            batch_group: "batch".to_string(),
        }
    }
}

impl IngestOptions {
    pub fn batch_key(&self) -> InstrumentKey {
        InstrumentKey::new(self.batch_group.as_str(), "batch")
    }
}

/// What happened to one instrument.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestStatus {
    Ingested {
        rows: usize,
        range: FetchRange,
        /// `None` when the source returned no rows.
        snapshot: Option<SnapshotLocator>,
        checkpoint: NaiveDate,
    },
    Skipped {
        checkpoint: NaiveDate,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentOutcome {
    pub key: InstrumentKey,
    pub status: IngestStatus,
}

/// Result of one ingestion run, outcomes in universe order.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub today: NaiveDate,
    pub mode: IngestMode,
    pub outcomes: Vec<InstrumentOutcome>,
    /// The combined snapshot in batch mode, if one was written.
    pub batch_snapshot: Option<SnapshotLocator>,
}

impl IngestReport {
    fn count(&self, pred: impl Fn(&IngestStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }

    pub fn ingested(&self) -> usize {
        self.count(|s| matches!(s, IngestStatus::Ingested { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, IngestStatus::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, IngestStatus::Failed { .. }))
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    pub fn outcome(&self, key: &InstrumentKey) -> Option<&IngestStatus> {
        self.outcomes.iter().find(|o| &o.key == key).map(|o| &o.status)
    }
}

/// Progress callback for multi-instrument runs.
pub trait IngestProgress {
    /// Called before an instrument is looked at.
    fn on_start(&self, key: &InstrumentKey, index: usize, total: usize);

    /// Called once an instrument's outcome is final.
    fn on_complete(&self, outcome: &InstrumentOutcome, index: usize, total: usize);
}

/// Progress reporter that prints to stdout.
pub struct StdoutProgress;

impl IngestProgress for StdoutProgress {
    fn on_start(&self, key: &InstrumentKey, index: usize, total: usize) {
        println!("[{}/{}] {key}...", index + 1, total);
    }

    fn on_complete(&self, outcome: &InstrumentOutcome, _index: usize, _total: usize) {
        match &outcome.status {
            IngestStatus::Ingested { rows, .. } => println!("  OK: {} ({rows} rows)", outcome.key),
            IngestStatus::Skipped { checkpoint } => {
                println!("  SKIP: {} (checkpoint {checkpoint})", outcome.key)
            }
            IngestStatus::Failed { reason } => println!("  FAIL: {}: {reason}", outcome.key),
        }
    }
}

/// Result of the fetch step for one due instrument.
enum Fetched {
    Rows { range: FetchRange, rows: Vec<Record> },
    Failed(String),
}

pub struct IngestionEngine<'a> {
    source: &'a dyn MarketDataSource,
    store: &'a dyn LayerStore,
    ledger: &'a mut dyn CheckpointLedger,
    clock: &'a dyn Clock,
    options: IngestOptions,
    pacer: Pacer,
    progress: Option<&'a dyn IngestProgress>,
}

impl<'a> IngestionEngine<'a> {
    pub fn new(
        source: &'a dyn MarketDataSource,
        store: &'a dyn LayerStore,
        ledger: &'a mut dyn CheckpointLedger,
        clock: &'a dyn Clock,
        options: IngestOptions,
    ) -> Self {
        Self {
            source,
            store,
            ledger,
            clock,
            options,
            pacer: Pacer::default(),
            progress: None,
        }
    }

    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn IngestProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Ingest every instrument of `universe`.
    pub fn run(&mut self, universe: &Universe) -> Result<IngestReport, IngestError> {
        let keys = universe.keys();
        let today = self.clock.today();
        info!(
            source = self.source.name(),
            instruments = keys.len(),
            %today,
            mode = ?self.options.mode,
            "starting ingestion run"
        );

        let report = match self.options.mode {
            IngestMode::Single => self.run_single(&keys, today)?,
            IngestMode::Batch => self.run_batch(&keys, today)?,
        };

        info!(
            ingested = report.ingested(),
            skipped = report.skipped(),
            failed = report.failed(),
            "ingestion run complete"
        );
        Ok(report)
    }

    /// Checkpoint lookup, range decision and fetch. `Err(outcome)` means the
    /// instrument is not due.
    fn fetch_due(&mut self, key: &InstrumentKey, today: NaiveDate) -> Result<Fetched, IngestStatus> {
        let checkpoint = self.ledger.checkpoint(key);
        let range = match checkpoint {
            Checkpoint::Checked(date) if !checkpoint.is_due(today) => {
                debug!(%key, checkpoint = %date, "checkpoint in the future, skipping");
                return Err(IngestStatus::Skipped { checkpoint: date });
            }
            Checkpoint::Checked(date) => FetchRange::Since(date),
            Checkpoint::Unseen => FetchRange::EntireHistory,
        };

        self.pacer.wait();
        match self
            .source
            .fetch_history(&key.instrument, range, self.options.interval)
        {
            Ok(rows) => {
                debug!(%key, %range, rows = rows.len(), "fetched");
                Ok(Fetched::Rows { range, rows })
            }
            Err(e) => {
                warn!(%key, error = %e, "fetch failed");
                Ok(Fetched::Failed(e.to_string()))
            }
        }
    }

    fn report(&self, outcome: &InstrumentOutcome, index: usize, total: usize) {
        if let Some(p) = self.progress {
            p.on_complete(outcome, index, total);
        }
    }

    fn run_single(
        &mut self,
        keys: &[InstrumentKey],
        today: NaiveDate,
    ) -> Result<IngestReport, IngestError> {
        let total = keys.len();
        let mut outcomes = Vec::with_capacity(total);

        for (index, key) in keys.iter().enumerate() {
            if let Some(p) = self.progress {
                p.on_start(key, index, total);
            }
            let status = self.ingest_one(key, today)?;
            let outcome = InstrumentOutcome {
                key: key.clone(),
                status,
            };
            self.report(&outcome, index, total);
            outcomes.push(outcome);
        }

        Ok(IngestReport {
            today,
            mode: IngestMode::Single,
            outcomes,
            batch_snapshot: None,
        })
    }

    fn ingest_one(&mut self, key: &InstrumentKey, today: NaiveDate) -> Result<IngestStatus, IngestError> {
        let (range, rows) = match self.fetch_due(key, today) {
            Err(skipped) => return Ok(skipped),
            Ok(Fetched::Failed(reason)) => return Ok(IngestStatus::Failed { reason }),
            Ok(Fetched::Rows { range, rows }) => (range, rows),
        };

        let snapshot = if rows.is_empty() {
            debug!(%key, "no new rows, nothing to write");
            None
        } else {
            match self.store.write(
                Layer::Raw,
                key,
                &rows,
                self.options.format,
                &SnapshotName::Timestamped,
            ) {
                Ok(locator) => Some(locator),
                Err(e) => {
                    warn!(%key, error = %e, "raw write failed");
                    return Ok(IngestStatus::Failed {
                        reason: e.to_string(),
                    });
                }
            }
        };

        self.ledger.advance(key, today)?;
        Ok(IngestStatus::Ingested {
            rows: rows.len(),
            range,
            snapshot,
            checkpoint: today,
        })
    }

    fn run_batch(
        &mut self,
        keys: &[InstrumentKey],
        today: NaiveDate,
    ) -> Result<IngestReport, IngestError> {
        let total = keys.len();
        let mut settled: Vec<(usize, InstrumentOutcome)> = Vec::new();
        let mut pending: Vec<(usize, InstrumentKey, FetchRange, usize)> = Vec::new();
        let mut combined: Vec<Record> = Vec::new();

        for (index, key) in keys.iter().enumerate() {
            if let Some(p) = self.progress {
                p.on_start(key, index, total);
            }
            match self.fetch_due(key, today) {
                Err(status) => settled.push((
                    index,
                    InstrumentOutcome {
                        key: key.clone(),
                        status,
                    },
                )),
                Ok(Fetched::Failed(reason)) => settled.push((
                    index,
                    InstrumentOutcome {
                        key: key.clone(),
                        status: IngestStatus::Failed { reason },
                    },
                )),
                Ok(Fetched::Rows { range, rows }) => {
                    pending.push((index, key.clone(), range, rows.len()));
                    combined.extend(rows);
                }
            }
        }

        let batch_key = self.options.batch_key();
        let write_result = if combined.is_empty() {
            Ok(None)
        } else {
            self.store
                .write(
                    Layer::Raw,
                    &batch_key,
                    &combined,
                    self.options.format,
                    &SnapshotName::Timestamped,
                )
                .map(Some)
        };

        let batch_snapshot = match write_result {
            Ok(snapshot) => {
                for (index, key, range, rows) in pending {
                    self.ledger.advance(&key, today)?;
                    settled.push((
                        index,
                        InstrumentOutcome {
                            key,
                            status: IngestStatus::Ingested {
                                rows,
                                range,
                                snapshot: snapshot.clone(),
                                checkpoint: today,
                            },
                        },
                    ));
                }
                snapshot
            }
            Err(e) => {
                warn!(key = %batch_key, error = %e, "batch write failed, no checkpoint advanced");
                let reason = format!("batch write failed: {e}");
                for (index, key, _, _) in pending {
                    settled.push((
                        index,
                        InstrumentOutcome {
                            key,
                            status: IngestStatus::Failed {
                                reason: reason.clone(),
                            },
                        },
                    ));
                }
                None
            }
        };

        settled.sort_by_key(|(index, _)| *index);
        for (index, outcome) in &settled {
            self.report(outcome, *index, total);
        }

        Ok(IngestReport {
            today,
            mode: IngestMode::Batch,
            outcomes: settled.into_iter().map(|(_, o)| o).collect(),
            batch_snapshot,
        })
    }
}
