//! Raft state machine that executes committed SQL statements.
//!
//! Each normal entry holds statement text. Applying it means parsing the
//! text and running it through the [`Executor`] against the local
//! keyspace. Deterministic query errors go back to the submitter in the
//! [`Response`]; anything else is a fault and halts the node.
//!
//! Applied position and membership are kept in memory only. The keyspace
//! is wiped before raft starts, so after a restart this state machine
//! reports nothing applied and openraft replays the whole log into it.
//!
//! Snapshots are disabled: the cluster runs with
//! [`SnapshotPolicy::Never`](openraft::SnapshotPolicy::Never), nothing is
//! ever built, and installing one from a peer fails.

use std::io::Cursor;

use openraft::storage::{RaftSnapshotBuilder, RaftStateMachine};
use openraft::{
    BasicNode, Entry, EntryPayload, ErrorSubject, ErrorVerb, LogId, Snapshot, SnapshotMeta,
    StorageError, StoredMembership,
};
use raftgres_sql::{ExecError, Executor, ParseError};
use thiserror::Error;
use tracing::{debug, error};

use crate::typ::{Request, Response, TypeConfig};

const SNAPSHOTS_DISABLED: &str = "snapshotting disabled";

/// A committed entry this replica cannot apply.
///
/// The log is agreed and immutable, so there is no way past such an
/// entry. The node stops rather than diverge from its peers.
#[derive(Debug, Error)]
pub enum ApplyFault {
    #[error("entry {index} is not a valid statement: {source}")]
    Parse { index: u64, source: ParseError },

    #[error("entry {index} failed to execute: {source}")]
    Exec { index: u64, source: ExecError },
}

impl ApplyFault {
    fn into_storage_error(self, log_id: LogId<u64>) -> StorageError<u64> {
        StorageError::from_io_error(
            ErrorSubject::Apply(log_id),
            ErrorVerb::Write,
            std::io::Error::other(self.to_string()),
        )
    }
}

fn snapshots_disabled(verb: ErrorVerb) -> StorageError<u64> {
    StorageError::from_io_error(
        ErrorSubject::StateMachine,
        verb,
        std::io::Error::other(SNAPSHOTS_DISABLED),
    )
}

/// State machine applying SQL statements to the keyspace.
pub struct StateMachine {
    executor: Executor,
    last_applied: Option<LogId<u64>>,
    last_membership: StoredMembership<u64, BasicNode>,
}

/// Snapshot builder for a state machine that never snapshots.
pub struct DisabledSnapshotBuilder;

impl StateMachine {
    pub fn new(executor: Executor) -> Self {
        Self {
            executor,
            last_applied: None,
            last_membership: StoredMembership::default(),
        }
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Parse and execute one statement committed at `index`.
    fn apply_statement(&self, req: &Request, index: u64) -> Result<Response, ApplyFault> {
        let stmt = raftgres_sql::parse(&req.statement)
            .map_err(|source| ApplyFault::Parse { index, source })?;

        match self.executor.execute(&stmt, index) {
            Ok(outcome) => {
                debug!(index, kind = stmt.kind(), tag = %outcome.command_tag(), "applied statement");
                Ok(Response {
                    outcome: Ok(outcome),
                })
            }
            Err(ExecError::Query(err)) => {
                debug!(index, kind = stmt.kind(), error = %err, "statement rejected");
                Ok(Response { outcome: Err(err) })
            }
            Err(source) => Err(ApplyFault::Exec { index, source }),
        }
    }
}

impl RaftStateMachine<TypeConfig> for StateMachine {
    type SnapshotBuilder = DisabledSnapshotBuilder;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<LogId<u64>>, StoredMembership<u64, BasicNode>), StorageError<u64>> {
        Ok((self.last_applied, self.last_membership.clone()))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<Response>, StorageError<u64>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + Send,
        I::IntoIter: Send,
    {
        let mut responses = Vec::new();

        for entry in entries {
            let log_id = entry.log_id;

            let response = match entry.payload {
                EntryPayload::Blank => Response::noop(),
                EntryPayload::Normal(req) => match self.apply_statement(&req, log_id.index) {
                    Ok(response) => response,
                    Err(fault) => {
                        error!(index = log_id.index, statement = %req.statement, error = %fault, "cannot apply committed entry, halting");
                        return Err(fault.into_storage_error(log_id));
                    }
                },
                EntryPayload::Membership(membership) => {
                    self.last_membership = StoredMembership::new(Some(log_id), membership);
                    Response::noop()
                }
            };

            self.last_applied = Some(log_id);
            responses.push(response);
        }

        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        DisabledSnapshotBuilder
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<u64>> {
        Err(snapshots_disabled(ErrorVerb::Write))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<u64, BasicNode>,
        _snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<u64>> {
        error!(snapshot_id = %meta.snapshot_id, "refusing snapshot install");
        Err(snapshots_disabled(ErrorVerb::Write))
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<u64>> {
        Ok(None)
    }
}

impl RaftSnapshotBuilder<TypeConfig> for DisabledSnapshotBuilder {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<u64>> {
        Err(snapshots_disabled(ErrorVerb::Read))
    }
}
