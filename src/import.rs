// 💾 Transactional Committer - resolved rows → Client / BAN / Subscriber
//
// One transaction for the whole batch, one savepoint per row:
// - a row that fails rolls back to its savepoint, lands in `errors`, and the
//   batch continues
// - begin / savepoint / commit failures and cancellation roll back
//   everything and return ImportError (no RunReport)
// Dry-run walks the same classification with planned (negative) ids and
// never writes.

use crate::cancel::CancelToken;
use crate::db::{CrmStore, Event};
use crate::deduplication::{ResolvedRow, RunContext, SyntheticIds};
use crate::entities::BanRecord;
use crate::error::{ImportError, StoreError};
use crate::normalizer::{is_empty_row, ParsedRow, RowNormalizer};
use crate::reader::CellGrid;
use crate::schema::{AliasTable, CanonicalField, FieldName};
use anyhow::Context;
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    /// 1-based row in the source file
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OmittedRow {
    pub row: usize,
    pub reason: String,
}

impl From<&ResolvedRow> for OmittedRow {
    fn from(resolved: &ResolvedRow) -> Self {
        OmittedRow {
            row: resolved.row(),
            reason: resolved
                .reason
                .map(|r| r.message().to_string())
                .unwrap_or_default(),
        }
    }
}

/// Summary of one import run. Built by folding row events; returned once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Every non-empty data row, omitted ones included.
    pub processed: usize,
    pub omitted: usize,

    /// Rows whose BAN was created.
    pub created: usize,

    /// Rows whose BAN already existed (classification only, nothing is mutated).
    pub updated: usize,

    pub clients_created: usize,
    pub bans_created: usize,
    pub subscribers_created: usize,
    pub errors: Vec<RowError>,
    pub omitted_rows: Vec<OmittedRow>,
    pub dry_run: bool,
}

/// What happened to one row.
#[derive(Debug, Clone, PartialEq)]
enum RowEvent {
    Omitted(OmittedRow),
    Committed(RowOutcome),
    Failed(RowError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct RowOutcome {
    ban_reused: bool,
    client_created: bool,
    ban_created: bool,
    subscriber_created: bool,
}

impl RunReport {
    fn new(dry_run: bool) -> Self {
        RunReport {
            dry_run,
            ..Default::default()
        }
    }

    fn absorb(mut self, event: RowEvent) -> Self {
        self.processed += 1;

        match event {
            RowEvent::Omitted(omitted) => {
                self.omitted += 1;
                self.omitted_rows.push(omitted);
            }
            RowEvent::Committed(outcome) => {
                if outcome.ban_reused {
                    self.updated += 1;
                } else {
                    self.created += 1;
                }
                self.clients_created += outcome.client_created as usize;
                self.bans_created += outcome.ban_created as usize;
                self.subscribers_created += outcome.subscriber_created as usize;
            }
            RowEvent::Failed(error) => self.errors.push(error),
        }

        self
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

// ============================================================================
// COMMITTER
// ============================================================================

/// Identifies the imported file in the event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSource {
    pub name: String,
    pub sha256: String,
}

impl ImportSource {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read file: {}", path.display()))?;

        Ok(ImportSource {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            sha256: format!("{:x}", Sha256::digest(&bytes)),
        })
    }
}

/// Ids of entities written (or planned, in dry-run) during this commit.
#[derive(Debug, Default)]
struct CommitState {
    /// CLIENT_n → client id
    clients: HashMap<String, i64>,

    /// Dry-run only: BANs that a real run would have inserted.
    planned_bans: HashMap<String, BanRecord>,

    last_planned_id: i64,
}

impl CommitState {
    fn plan_id(&mut self) -> i64 {
        self.last_planned_id -= 1;
        self.last_planned_id
    }
}

/// State changes that only stick once their row succeeded.
#[derive(Debug, Default)]
struct Pending {
    client: Option<(String, i64)>,
    ban: Option<BanRecord>,
}

impl Pending {
    fn apply(self, state: &mut CommitState) {
        if let Some((key, id)) = self.client {
            state.clients.insert(key, id);
        }
        if let Some(ban) = self.ban {
            state.planned_bans.insert(ban.ban_number.clone(), ban);
        }
    }
}

pub struct Committer<'a, S: CrmStore> {
    store: &'a mut S,
    dry_run: bool,
    cancel: CancelToken,
    source: Option<ImportSource>,
}

impl<'a, S: CrmStore> Committer<'a, S> {
    pub fn new(store: &'a mut S, dry_run: bool) -> Self {
        Committer {
            store,
            dry_run,
            cancel: CancelToken::new(),
            source: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_source(mut self, source: ImportSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Persist every accepted row, parents first.
    pub fn commit(mut self, rows: &[ResolvedRow]) -> Result<RunReport, ImportError> {
        if !self.dry_run {
            self.store.begin().map_err(|e| {
                log::error!("Could not begin import transaction: {}", e);
                ImportError::Begin(e)
            })?;
        }

        let mut state = CommitState::default();
        let folded = rows
            .iter()
            .try_fold(RunReport::new(self.dry_run), |report, resolved| {
                if self.cancel.is_cancelled() {
                    return Err(ImportError::Cancelled {
                        processed: report.processed,
                    });
                }
                let event = self.process(resolved, &mut state)?;
                Ok(report.absorb(event))
            });

        let report = match folded {
            Ok(report) => report,
            Err(e) => {
                self.abort(&e);
                return Err(e);
            }
        };

        if self.dry_run {
            log::info!(
                "Dry run: {} rows, {} would be created, {} already exist, {} omitted",
                report.processed,
                report.created,
                report.updated,
                report.omitted
            );
            return Ok(report);
        }

        let finished = self
            .record_run(&report)
            .and_then(|_| self.store.commit())
            .map_err(ImportError::Commit);
        if let Err(e) = finished {
            self.abort(&e);
            return Err(e);
        }

        log::info!(
            "Import committed: {} rows, {} clients, {} BANs, {} subscribers created, {} errors",
            report.processed,
            report.clients_created,
            report.bans_created,
            report.subscribers_created,
            report.errors.len()
        );

        Ok(report)
    }

    fn abort(&mut self, cause: &ImportError) {
        log::error!("Import aborted: {}", cause);
        if self.dry_run {
            return;
        }
        match self.store.rollback() {
            Ok(()) => log::info!("Import transaction rolled back"),
            Err(e) => log::error!("Rollback failed: {}", e),
        }
    }

    fn process(&mut self, resolved: &ResolvedRow, state: &mut CommitState) -> Result<RowEvent, ImportError> {
        let row = resolved.row();
        let parsed = &resolved.parsed;

        let (ids, ban_number, phone) = match (&resolved.ids, parsed.ban_number(), parsed.phone()) {
            (Some(ids), Some(ban), Some(phone)) if !resolved.is_skipped() => (ids, ban, phone),
            _ => return Ok(RowEvent::Omitted(OmittedRow::from(resolved))),
        };

        if !self.dry_run {
            self.store
                .savepoint()
                .map_err(|source| ImportError::Transaction { row, source })?;
        }

        match self.write_row(ids, ban_number, phone, parsed, state) {
            Ok((outcome, pending)) => {
                if !self.dry_run {
                    self.store
                        .release_savepoint()
                        .map_err(|source| ImportError::Transaction { row, source })?;
                }
                pending.apply(state);
                Ok(RowEvent::Committed(outcome))
            }
            Err(e) => {
                log::warn!("Fila {}: {}", row, e);
                if !self.dry_run {
                    self.store
                        .rollback_to_savepoint()
                        .map_err(|source| ImportError::Transaction { row, source })?;
                }
                Ok(RowEvent::Failed(RowError {
                    row,
                    message: e.to_string(),
                }))
            }
        }
    }

    fn write_row(
        &mut self,
        ids: &SyntheticIds,
        ban_number: &str,
        phone: &str,
        parsed: &ParsedRow,
        state: &mut CommitState,
    ) -> Result<(RowOutcome, Pending), StoreError> {
        let mut outcome = RowOutcome::default();
        let mut pending = Pending::default();

        // 1. BAN by natural key: store first, then this dry-run's plan
        let existing = match self.store.find_ban_by_number(ban_number)? {
            Some(ban) => Some(ban),
            None => state.planned_bans.get(ban_number).cloned(),
        };

        let ban_id = match existing {
            Some(ban) => {
                outcome.ban_reused = true;
                if !state.clients.contains_key(&ids.client_id) {
                    pending.client = Some((ids.client_id.clone(), ban.client_id));
                }
                ban.id
            }
            None => {
                // 2. Client (reused when this run already wrote it), then BAN
                let client_id = match state.clients.get(&ids.client_id) {
                    Some(id) => *id,
                    None => {
                        let name = parsed.client.display_name(ban_number);
                        let id = if self.dry_run {
                            state.plan_id()
                        } else {
                            self.store.insert_client(&parsed.client, &name)?
                        };
                        outcome.client_created = true;
                        pending.client = Some((ids.client_id.clone(), id));
                        id
                    }
                };

                let ban_id = if self.dry_run {
                    let id = state.plan_id();
                    pending.ban = Some(BanRecord {
                        id,
                        ban_number: ban_number.to_string(),
                        client_id,
                        account_type: parsed.ban.account_type.clone(),
                        status: parsed.ban.status,
                    });
                    id
                } else {
                    self.store.insert_ban(ban_number, client_id, &parsed.ban)?
                };
                outcome.ban_created = true;
                ban_id
            }
        };

        // 3. Subscriber unless (phone, BAN) already exists
        if self
            .store
            .find_subscriber_by_phone_and_ban(phone, ban_id)?
            .is_none()
        {
            if !self.dry_run {
                self.store
                    .insert_subscriber(ban_id, phone, &parsed.subscriber)?;
            }
            outcome.subscriber_created = true;
        }

        Ok((outcome, pending))
    }

    fn record_run(&mut self, report: &RunReport) -> Result<(), StoreError> {
        let (name, digest) = match &self.source {
            Some(source) => (source.name.as_str(), Some(source.sha256.as_str())),
            None => ("grid", None),
        };

        let event = Event::new(
            "import_committed",
            "import",
            name,
            serde_json::json!({
                "sha256": digest,
                "processed": report.processed,
                "omitted": report.omitted,
                "created": report.created,
                "updated": report.updated,
                "clientsCreated": report.clients_created,
                "bansCreated": report.bans_created,
                "subscribersCreated": report.subscribers_created,
                "errors": report.errors.len(),
            }),
            "crm-reconcile",
        );

        self.store.record_event(&event)
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Everything one import run needs besides the grid and the store.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub aliases: AliasTable<CanonicalField>,
    pub dry_run: bool,

    /// Remaining payments are counted from this date's month.
    pub reference_date: NaiveDate,
    pub cancel: CancelToken,
    pub source: Option<ImportSource>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        let today = Utc::now().date_naive();
        ImportOptions {
            aliases: AliasTable::import_defaults(),
            dry_run: true,
            reference_date: today.with_day(1).unwrap_or(today),
            cancel: CancelToken::new(),
            source: None,
        }
    }
}

/// Columns without which no row could ever be accepted.
const REQUIRED_COLUMNS: [CanonicalField; 2] = [CanonicalField::BanNumber, CanonicalField::SubscriberPhone];

/// Map, normalize and resolve every data row. No store access.
pub fn resolve_grid(grid: &CellGrid, options: &ImportOptions) -> Result<Vec<ResolvedRow>, ImportError> {
    let headers = grid.headers();
    let mapping = options.aliases.resolve(&headers);

    if let Some(missing) = REQUIRED_COLUMNS.iter().find(|f| !mapping.contains(**f)) {
        return Err(ImportError::MissingColumn(missing.name()));
    }
    log::info!("Mapped {} of {} columns", mapping.mapped(), headers.len());

    let normalizer = RowNormalizer::new(mapping, options.reference_date);
    let mut context = RunContext::new();

    let resolved = grid
        .data_rows()
        .filter(|(_, cells)| !is_empty_row(cells))
        .map(|(row, cells)| context.resolve(normalizer.normalize(row, cells)))
        .collect();

    Ok(resolved)
}

/// Full import path: Schema Mapper → Row Normalizer → Entity Resolver →
/// Transactional Committer.
pub fn run_import<S: CrmStore>(
    grid: &CellGrid,
    store: &mut S,
    options: &ImportOptions,
) -> Result<RunReport, ImportError> {
    let rows = resolve_grid(grid, options)?;

    let mut committer = Committer::new(store, options.dry_run).with_cancel(options.cancel.clone());
    if let Some(source) = &options.source {
        committer = committer.with_source(source.clone());
    }

    committer.commit(&rows)
}

// ============================================================================
// TESTS
// ============================================================================
