//! Eraser — runs erase and restore commands against the rule registry.

use std::collections::HashSet;

use rusqlite::Connection;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shroud_core::config::MAX_BATCH_SIZE;
use shroud_core::{Error, Result, RowSnapshot, ShroudConfig};
use shroud_crypto::CryptoService;
use shroud_rules::{EraseRule, RuleRegistry};
use shroud_store::rows::{self, OverrideContext};
use shroud_store::{audit, mirror, MirrorRecord, SqliteStore};

use crate::envelope::MirrorEnvelope;
use crate::types::*;

/// Tracks and logs the state of one command.
struct CommandTracker {
    id: Uuid,
    verb: &'static str,
    subject_key: String,
    state: CommandState,
}

impl CommandTracker {
    fn start(verb: &'static str, subject_key: &str) -> Self {
        let id = Uuid::new_v4();
        info!("{} {} started for subject {}", verb, id, subject_key);
        Self {
            id,
            verb,
            subject_key: subject_key.to_string(),
            state: CommandState::Started,
        }
    }

    fn advance(&mut self, next: CommandState) {
        debug!("{} {}: {} -> {}", self.verb, self.id, self.state, next);
        self.state = next;
    }

    fn fail(&mut self, err: &Error) {
        error!(
            "{} {} for subject {} failed in state {}: {}",
            self.verb, self.id, self.subject_key, self.state, err
        );
        self.state = CommandState::Failed;
    }
}

/// Erase/restore orchestrator. Immutable after construction; share freely.
pub struct Eraser {
    registry: RuleRegistry,
    crypto: CryptoService,
    batch_size: usize,
}

impl Eraser {
    pub fn new(registry: RuleRegistry, crypto: CryptoService, batch_size: usize) -> Self {
        let batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        info!(
            "Eraser initialized: {} rules, AES-{}-GCM, batch_size={}",
            registry.len(),
            crypto.key_bits(),
            batch_size
        );
        Self {
            registry,
            crypto,
            batch_size,
        }
    }

    /// Load the rule file and key named by `config`.
    pub fn from_config(config: &ShroudConfig) -> Result<Self> {
        let registry = RuleRegistry::from_json_file(&config.data_paths.rules_file)?;
        let crypto = CryptoService::from_base64_key(config.require_key()?)?;
        Ok(Self::new(registry, crypto, config.batch_size))
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    // ----------------------------------------------------------------
    // Erase
    // ----------------------------------------------------------------

    /// Mirror, encrypt and mask every governed row reachable from the command.
    ///
    /// Runs in one transaction. Any failure rolls back all masking and all
    /// mirror rows written so far.
    pub fn erase(&self, store: &SqliteStore, cmd: &EraseCommand) -> Result<EraseReport> {
        let mut tracker = CommandTracker::start("Erase", &cmd.subject_key);
        self.warn_unknown_tables(cmd);

        let outcome = store.with_transaction(|tx| {
            tracker.advance(CommandState::PerRuleProcessing);
            let ctx = OverrideContext::new(&cmd.operator, cmd.reason.as_deref());

            let mut tables = Vec::new();
            for rule in self.registry.iter() {
                if let Some(counts) = self.erase_rule(tx, rule, cmd, &ctx, &tracker)? {
                    tables.push(counts);
                }
            }

            if tables.iter().all(|t| t.mirrored == 0) {
                info!(
                    "Erase {}: nothing to mask for subject {}",
                    tracker.id, cmd.subject_key
                );
                return Ok((tables, None));
            }

            let audit_id = audit::record_erase(
                tx,
                &cmd.subject_key,
                cmd.doc_ref.as_deref(),
                cmd.reason.as_deref(),
                &cmd.operator,
            )?;
            tracker.advance(CommandState::Audited);
            Ok((tables, Some(audit_id)))
        });

        match outcome {
            Ok((tables, audit_id)) => {
                tracker.advance(CommandState::Done);
                let report = EraseReport {
                    command_id: tracker.id.to_string(),
                    subject_key: cmd.subject_key.clone(),
                    state: tracker.state,
                    tables,
                    audit_id,
                };
                info!(
                    "Erase {} done for subject {}: {} rows mirrored, {} masked",
                    tracker.id,
                    cmd.subject_key,
                    report.mirrored(),
                    report.masked()
                );
                Ok(report)
            }
            Err(e) => {
                tracker.fail(&e);
                Err(e)
            }
        }
    }

    fn erase_rule(
        &self,
        tx: &Connection,
        rule: &EraseRule,
        cmd: &EraseCommand,
        ctx: &OverrideContext<'_>,
        tracker: &CommandTracker,
    ) -> Result<Option<TableErase>> {
        // Own ids win; otherwise a child follows its parent's ids, one level deep.
        let (snapshots, by_parent, keys) = if let Some(ids) = cmd.ids_for(rule.table()) {
            if ids.is_empty() {
                return Ok(None);
            }
            let found = rows::load_by_ids(tx, rule, ids, self.batch_size)?;
            (found, false, ids)
        } else if let Some(parent_ids) = rule
            .parent()
            .and_then(|p| cmd.ids_for(&p.table))
            .filter(|ids| !ids.is_empty())
        {
            let found = rows::load_by_parent_ids(tx, rule, parent_ids, self.batch_size)?;
            (found, true, parent_ids)
        } else {
            return Ok(None);
        };

        if snapshots.is_empty() {
            debug!("Erase {}: no unmasked rows in {}", tracker.id, rule.label());
            return Ok(Some(TableErase {
                schema: rule.schema().to_string(),
                table: rule.table().to_string(),
                mirrored: 0,
                masked: 0,
            }));
        }

        let mirrored = snapshots.len();
        for row in snapshots {
            self.mirror_row(tx, rule, &cmd.subject_key, row)?;
        }

        let masked = if by_parent {
            rows::mask_by_parent(tx, rule, keys, ctx, self.batch_size)?
        } else {
            rows::mask_by_ids(tx, rule, keys, ctx, self.batch_size)?
        };
        if masked != mirrored {
            warn!(
                "Erase {}: {} mirrored {} rows but masked {}",
                tracker.id,
                rule.label(),
                mirrored,
                masked
            );
        }
        info!(
            "Erase {}: {} masked {} rows for subject {}",
            tracker.id,
            rule.label(),
            masked,
            cmd.subject_key
        );

        Ok(Some(TableErase {
            schema: rule.schema().to_string(),
            table: rule.table().to_string(),
            mirrored,
            masked,
        }))
    }

    fn mirror_row(
        &self,
        tx: &Connection,
        rule: &EraseRule,
        subject_key: &str,
        row: RowSnapshot,
    ) -> Result<()> {
        let envelope = MirrorEnvelope::new(rule.schema(), rule.table(), rule.id_column(), row);
        let plaintext = envelope.to_json()?;
        let integrity_digest = self.crypto.digest(&plaintext);
        let sealed = self.crypto.encrypt(&plaintext)?;
        mirror::upsert(
            tx,
            &MirrorRecord {
                schema: rule.schema().to_string(),
                table: rule.table().to_string(),
                id: envelope.id,
                subject_key: subject_key.to_string(),
                encrypted_payload: sealed.ciphertext,
                nonce: sealed.nonce,
                integrity_digest,
            },
        )
    }

    fn warn_unknown_tables(&self, cmd: &EraseCommand) {
        for table in cmd.table_ids.keys() {
            let used = self.registry.iter().any(|r| {
                r.table().eq_ignore_ascii_case(table)
                    || r.parent().is_some_and(|p| p.table.eq_ignore_ascii_case(table))
            });
            if !used {
                warn!(
                    "Erase for subject {}: table {} is not governed by any rule, ids ignored",
                    cmd.subject_key, table
                );
            }
        }
    }

    // ----------------------------------------------------------------
    // Restore
    // ----------------------------------------------------------------

    /// Decrypt, verify and write back every mirrored row of the subject.
    ///
    /// Every record is verified before the first writeback; one bad record
    /// aborts the restore with all rows still masked.
    pub fn restore(&self, store: &SqliteStore, cmd: &RestoreCommand) -> Result<RestoreReport> {
        let mut tracker = CommandTracker::start("Restore", &cmd.subject_key);

        let outcome = store.with_transaction(|tx| {
            tracker.advance(CommandState::PerRuleProcessing);

            let mut records = Vec::new();
            for schema in self.registry.schemas() {
                let tables = self.registry.tables_in(schema);
                records.extend(mirror::find_by_subject(tx, &cmd.subject_key, schema, &tables)?);
            }
            if records.is_empty() {
                info!(
                    "Restore {}: no mirrored rows for subject {}",
                    tracker.id, cmd.subject_key
                );
                return Ok((Vec::new(), Vec::new(), None));
            }

            let verified = self.verify_all(&records, &tracker)?;

            let ctx = OverrideContext::new(&cmd.operator, cmd.reason.as_deref());
            let mut tables = Vec::new();
            let mut conflicts = Vec::new();
            let mut processed: Vec<&EraseRule> = Vec::new();
            for rule in self.registry.iter() {
                let snapshots: Vec<RowSnapshot> = verified
                    .iter()
                    .filter(|(r, _)| std::ptr::eq(*r, rule))
                    .map(|(_, row)| row.clone())
                    .collect();
                if snapshots.is_empty() {
                    continue;
                }
                let outcome = rows::writeback(tx, rule, &snapshots, &ctx)?;
                info!(
                    "Restore {}: {} restored {} rows for subject {}",
                    tracker.id,
                    rule.label(),
                    outcome.restored,
                    cmd.subject_key
                );
                for id in outcome.conflicts {
                    if cmd.fail_on_conflict {
                        return Err(Error::ConcurrencyConflict(format!(
                            "{} id {} is no longer masked",
                            rule.label(),
                            id
                        )));
                    }
                    conflicts.push(RowConflict {
                        schema: rule.schema().to_string(),
                        table: rule.table().to_string(),
                        id,
                    });
                }
                tables.push(TableRestore {
                    schema: rule.schema().to_string(),
                    table: rule.table().to_string(),
                    restored: outcome.restored,
                });
                processed.push(rule);
            }

            // Nothing written back means nothing to audit; stale mirror rows still go.
            let audit_id = if tables.iter().any(|t| t.restored > 0) {
                let id = audit::record_restore(
                    tx,
                    &cmd.subject_key,
                    cmd.reason.as_deref(),
                    &cmd.operator,
                )?;
                tracker.advance(CommandState::Audited);
                Some(id)
            } else {
                info!(
                    "Restore {}: every row for subject {} was already unmasked",
                    tracker.id, cmd.subject_key
                );
                None
            };

            for schema in self.registry.schemas() {
                let done: Vec<&str> = processed
                    .iter()
                    .filter(|r| r.schema().eq_ignore_ascii_case(schema))
                    .map(|r| r.table())
                    .collect();
                let removed = mirror::delete_by_subject_in(tx, &cmd.subject_key, schema, &done)?;
                debug!(
                    "Restore {}: removed {} mirror rows in schema {}",
                    tracker.id, removed, schema
                );
            }
            Ok((tables, conflicts, audit_id))
        });

        match outcome {
            Ok((tables, conflicts, audit_id)) => {
                tracker.advance(CommandState::Done);
                let report = RestoreReport {
                    command_id: tracker.id.to_string(),
                    subject_key: cmd.subject_key.clone(),
                    state: tracker.state,
                    tables,
                    conflicts,
                    audit_id,
                };
                if !report.conflicts.is_empty() {
                    warn!(
                        "Restore {} for subject {}: {} rows were already unmasked",
                        tracker.id,
                        cmd.subject_key,
                        report.conflicts.len()
                    );
                }
                info!(
                    "Restore {} done for subject {}: {} rows restored",
                    tracker.id,
                    cmd.subject_key,
                    report.restored()
                );
                Ok(report)
            }
            Err(e) => {
                tracker.fail(&e);
                Err(e)
            }
        }
    }

    /// Decrypt and verify every record, pairing each with its rule.
    fn verify_all<'a>(
        &'a self,
        records: &[MirrorRecord],
        tracker: &CommandTracker,
    ) -> Result<Vec<(&'a EraseRule, RowSnapshot)>> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let rule = self
                .registry
                .get_in(&record.schema, &record.table)
                .ok_or_else(|| {
                    Error::Internal(format!(
                        "mirror row for ungoverned table {}.{}",
                        record.schema, record.table
                    ))
                })?;

            let plaintext = self
                .crypto
                .decrypt(&record.encrypted_payload, &record.nonce)
                .map_err(|e| {
                    error!(
                        "Restore {}: authentication failed for {} id {}",
                        tracker.id,
                        rule.label(),
                        record.id
                    );
                    e
                })?;

            if self.crypto.digest(&plaintext) != record.integrity_digest {
                error!(
                    "Restore {}: digest mismatch for {} id {}",
                    tracker.id,
                    rule.label(),
                    record.id
                );
                return Err(Error::IntegrityFailure(format!(
                    "digest mismatch for {} id {}",
                    rule.label(),
                    record.id
                )));
            }

            let envelope = MirrorEnvelope::open(&plaintext, record)?;
            if !seen.insert((rule.label(), envelope.id.clone())) {
                return Err(Error::IntegrityFailure(format!(
                    "duplicate mirror payload for {} id {}",
                    rule.label(),
                    envelope.id
                )));
            }
            out.push((rule, envelope.into_snapshot()));
        }
        debug!("Restore {}: verified {} mirror rows", tracker.id, out.len());
        Ok(out)
    }

    // ----------------------------------------------------------------
    // Status
    // ----------------------------------------------------------------

    /// Mirrored-row count and audit trail of a subject.
    pub fn status(&self, store: &SqliteStore, subject_key: &str) -> Result<SubjectStatus> {
        store.with_connection(|conn| {
            Ok(SubjectStatus {
                subject_key: subject_key.to_string(),
                mirrored_rows: mirror::count_by_subject(conn, subject_key)?,
                audit: audit::list_by_subject(conn, subject_key)?,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_core::Operator;
    use shroud_rules::OverrideValue;
    use tempfile::TempDir;

    fn test_store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path()).unwrap();
        store
            .with_connection(|c| {
                c.execute_batch(
                    "CREATE TABLE T1 (
                        ID TEXT PRIMARY KEY,
                        NAME TEXT,
                        PHONE TEXT,
                        MODIFIED_BY TEXT,
                        IS_ERASED INTEGER DEFAULT 0
                    );
                    INSERT INTO T1 (ID, NAME, PHONE, MODIFIED_BY) VALUES
                        ('r1', 'Ann', '555-0101', 'clerk'),
                        ('r2', 'Bo', '555-0102', 'clerk'),
                        ('r3', 'Cy', '555-0103', 'clerk');",
                )
                .map_err(|e| Error::Database(e.to_string()))
            })
            .unwrap();
        (store, dir)
    }

    fn eraser() -> Eraser {
        let rule = EraseRule::builder("T1")
            .mask_flag("IS_ERASED")
            .whitelist(["NAME", "PHONE", "MODIFIED_BY"])
            .erase_override("NAME", OverrideValue::literal("(erased)"))
            .restore_override(
                "MODIFIED_BY",
                OverrideValue::Param(shroud_rules::OverrideParam::OperatorId),
            )
            .build()
            .unwrap();
        let registry = RuleRegistry::new(vec![rule]).unwrap();
        let crypto = CryptoService::from_base64_key(&CryptoService::generate_key()).unwrap();
        Eraser::new(registry, crypto, 1000)
    }

    fn erase_cmd(ids: &[&str]) -> EraseCommand {
        EraseCommand::new("C00123", Operator::new("op-1"))
            .with_ids("T1", ids.iter().copied())
            .with_reason("subject request")
    }

    fn name_of(store: &SqliteStore, id: &str) -> Option<String> {
        store
            .with_connection(|c| {
                c.query_row("SELECT NAME FROM T1 WHERE ID = ?1", [id], |r| r.get(0))
                    .map_err(|e| Error::Database(e.to_string()))
            })
            .unwrap()
    }

    #[test]
    fn test_erase_then_restore() {
        let (store, _dir) = test_store();
        let eraser = eraser();

        let report = eraser.erase(&store, &erase_cmd(&["r1", "r2"])).unwrap();
        assert_eq!(report.state, CommandState::Done);
        assert_eq!(report.mirrored(), 2);
        assert_eq!(report.masked(), 2);
        assert!(!report.is_noop());
        assert_eq!(name_of(&store, "r1").as_deref(), Some("(erased)"));
        assert_eq!(name_of(&store, "r3").as_deref(), Some("Cy"));

        let status = eraser.status(&store, "C00123").unwrap();
        assert_eq!(status.mirrored_rows, 2);
        assert_eq!(status.audit.len(), 1);

        let report = eraser
            .restore(&store, &RestoreCommand::new("C00123", Operator::new("op-2")))
            .unwrap();
        assert_eq!(report.restored(), 2);
        assert!(report.conflicts.is_empty());
        assert_eq!(name_of(&store, "r1").as_deref(), Some("Ann"));

        let status = eraser.status(&store, "C00123").unwrap();
        assert_eq!(status.mirrored_rows, 0);
        assert_eq!(status.audit.len(), 2);
    }

    #[test]
    fn test_erase_with_no_rows_is_noop() {
        let (store, _dir) = test_store();
        let eraser = eraser();

        let report = eraser.erase(&store, &erase_cmd(&["missing"])).unwrap();
        assert!(report.is_noop());
        assert_eq!(report.mirrored(), 0);

        let report = eraser
            .erase(
                &store,
                &EraseCommand::new("C00123", Operator::new("op-1")).with_ids("UNKNOWN", ["x"]),
            )
            .unwrap();
        assert!(report.is_noop());
        assert!(report.tables.is_empty());
        assert!(eraser.status(&store, "C00123").unwrap().audit.is_empty());
    }

    #[test]
    fn test_restore_reports_conflicts() {
        let (store, _dir) = test_store();
        let eraser = eraser();
        eraser.erase(&store, &erase_cmd(&["r1", "r2"])).unwrap();

        store
            .with_connection(|c| {
                c.execute("UPDATE T1 SET IS_ERASED = 0, NAME = 'Edited' WHERE ID = 'r2'", [])
                    .map_err(|e| Error::Database(e.to_string()))
            })
            .unwrap();

        let strict = eraser.restore(
            &store,
            &RestoreCommand::new("C00123", Operator::new("op-2")).fail_on_conflict(true),
        );
        assert!(matches!(strict, Err(Error::ConcurrencyConflict(_))));
        // Rolled back: r1 still masked, mirror intact.
        assert_eq!(name_of(&store, "r1").as_deref(), Some("(erased)"));
        assert_eq!(eraser.status(&store, "C00123").unwrap().mirrored_rows, 2);

        let report = eraser
            .restore(&store, &RestoreCommand::new("C00123", Operator::new("op-2")))
            .unwrap();
        assert_eq!(report.restored(), 1);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].id, "r2");
        assert_eq!(name_of(&store, "r2").as_deref(), Some("Edited"));
        assert_eq!(eraser.status(&store, "C00123").unwrap().mirrored_rows, 0);
    }

    #[test]
    fn test_restore_with_only_conflicts_writes_no_audit() {
        let (store, _dir) = test_store();
        let eraser = eraser();
        eraser.erase(&store, &erase_cmd(&["r1"])).unwrap();

        store
            .with_connection(|c| {
                c.execute("UPDATE T1 SET IS_ERASED = 0, NAME = 'Edited' WHERE ID = 'r1'", [])
                    .map_err(|e| Error::Database(e.to_string()))
            })
            .unwrap();

        let report = eraser
            .restore(&store, &RestoreCommand::new("C00123", Operator::new("op-2")))
            .unwrap();
        assert_eq!(report.restored(), 0);
        assert_eq!(report.conflicts.len(), 1);
        assert!(report.audit_id.is_none());
        assert_eq!(report.state, CommandState::Done);
        assert_eq!(name_of(&store, "r1").as_deref(), Some("Edited"));

        let status = eraser.status(&store, "C00123").unwrap();
        assert_eq!(status.mirrored_rows, 0);
        assert_eq!(status.audit.len(), 1);
    }

    #[test]
    fn test_batch_size_is_clamped() {
        let eraser = {
            let e = eraser();
            Eraser::new(e.registry, e.crypto, 0)
        };
        assert_eq!(eraser.batch_size, 1);
    }
}
