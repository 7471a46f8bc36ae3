//! Statement sequences over one connection.
//!
//! A sequence runs in order and stops at the first failure, whether the
//! server rejected a statement or the transport broke. Nothing is rolled
//! back automatically; transaction cleanup is the caller's call.

use tracing::debug;

use crate::driver::{ExecutionOutcome, PgConnection, PgError};

/// Statement that pins `search_path` to empty so unqualified names cannot
/// be hijacked by objects in user-writable schemas.
pub const SECURE_SEARCH_PATH: &str = "SELECT pg_catalog.set_config('search_path', '', false)";

/// What a sequence got through before it stopped.
#[derive(Debug)]
pub struct SequenceReport {
    /// One entry per statement sent, in order. When a statement failed on
    /// the server, it is the last entry.
    pub outcomes: Vec<ExecutionOutcome>,
    /// Transport fault that stopped the sequence, if any.
    pub transport_error: Option<PgError>,
}

impl SequenceReport {
    /// True when every statement ran and none failed.
    pub fn is_success(&self) -> bool {
        self.transport_error.is_none() && !self.outcomes.iter().any(ExecutionOutcome::is_failed)
    }

    /// Index and outcome of the statement that failed on the server.
    pub fn failed(&self) -> Option<(usize, &ExecutionOutcome)> {
        self.outcomes
            .iter()
            .enumerate()
            .find(|(_, outcome)| outcome.is_failed())
    }

    /// The last outcome, typically the one carrying rows.
    pub fn last(&self) -> Option<&ExecutionOutcome> {
        self.outcomes.last()
    }

    /// Turn the report into the last outcome, or the error that stopped it.
    ///
    /// Server rejections stay data: a failed statement is returned as
    /// `Ok(ExecutionOutcome::Failed(..))`.
    pub fn into_last(mut self) -> Result<Option<ExecutionOutcome>, PgError> {
        match self.transport_error.take() {
            Some(err) => Err(err),
            None => Ok(self.outcomes.pop()),
        }
    }
}

/// Execute `statements` in order, stopping at the first failure.
pub fn run_sequence<I, S>(conn: &mut PgConnection, statements: I) -> SequenceReport
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut report = SequenceReport {
        outcomes: Vec::new(),
        transport_error: None,
    };

    for statement in statements {
        let statement = statement.as_ref();
        match conn.execute(statement) {
            Ok(outcome) => {
                let failed = outcome.is_failed();
                report.outcomes.push(outcome);
                if failed {
                    debug!(statement, "sequence stopped at failed statement");
                    break;
                }
            }
            Err(err) => {
                report.transport_error = Some(err);
                break;
            }
        }
    }

    report
}

/// Run `query` through a server-side cursor and fetch every row.
///
/// Sends `BEGIN`, `DECLARE <cursor> CURSOR FOR <query>` and
/// `FETCH ALL IN <cursor>`. When all three succeed, `CLOSE <cursor>` and
/// `END` follow; their server-side outcomes are not checked, but a
/// transport fault during them is reported. The returned report covers the
/// first three statements only, so its last outcome holds the rows.
pub fn fetch_all_via_cursor(conn: &mut PgConnection, cursor: &str, query: &str) -> SequenceReport {
    let mut report = run_sequence(
        conn,
        [
            "BEGIN".to_string(),
            format!("DECLARE {} CURSOR FOR {}", cursor, query),
            format!("FETCH ALL IN {}", cursor),
        ],
    );
    if !report.is_success() {
        return report;
    }

    for cleanup in [format!("CLOSE {}", cursor), "END".to_string()] {
        match conn.execute(&cleanup) {
            Ok(outcome) => {
                if let Some(err) = outcome.error() {
                    debug!(statement = %cleanup, "cleanup failed: {}", err);
                }
            }
            Err(err) => {
                report.transport_error = Some(err);
                break;
            }
        }
    }

    report
}

/// Run one SELECT (or any single statement).
pub fn select(conn: &mut PgConnection, query: &str) -> SequenceReport {
    run_sequence(conn, [query])
}

/// Pin `search_path` to empty for the rest of the session.
pub fn secure_search_path(conn: &mut PgConnection) -> SequenceReport {
    run_sequence(conn, [SECURE_SEARCH_PATH])
}
