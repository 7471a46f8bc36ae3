//! Statement execution for PostgreSQL connection.
//!
//! Simple Query protocol only: one `Query` message, then everything the
//! server sends up to ReadyForQuery is folded into an `ExecutionOutcome`.

use tracing::{debug, warn};

use super::connection::{ConnectionStatus, parse_affected_rows};
use super::result::{Column, ExecutionOutcome, RawRow, ResultSet};
use super::{PgConnection, PgError, PgResult};
use crate::protocol::{BackendMessage, ErrorFields, FrontendMessage, PgEncoder};

impl PgConnection {
    /// Execute a statement string and wait for the server to finish it.
    ///
    /// Server-side errors come back as [`ExecutionOutcome::Failed`] and leave
    /// the connection usable. Only transport faults return `Err`; after one
    /// the connection is `Failed` and every later call fails without I/O.
    ///
    /// For a string holding several statements the outcome describes the
    /// last one, unless any of them failed.
    pub fn execute(&mut self, sql: &str) -> PgResult<ExecutionOutcome> {
        match self.status {
            ConnectionStatus::Failed => {
                return Err(PgError::Transport(format!(
                    "connection is in failed state: {}",
                    self.last_error.as_deref().unwrap_or("unknown error")
                )));
            }
            ConnectionStatus::Closed => {
                return Err(PgError::Transport("connection is closed".to_string()));
            }
            _ => {}
        }

        let bytes = PgEncoder::encode_query_string(sql)?;
        debug!(sql, "execute");

        match self.simple_query(&bytes) {
            Ok(outcome) => {
                if let ExecutionOutcome::Failed(err) = &outcome {
                    debug!("statement failed: {}", err);
                }
                Ok(outcome)
            }
            Err(e) => {
                let reason = match e {
                    PgError::Transport(reason) => reason,
                    other => other.to_string(),
                };
                self.fail(reason.clone());
                Err(PgError::Transport(reason))
            }
        }
    }

    fn simple_query(&mut self, bytes: &[u8]) -> PgResult<ExecutionOutcome> {
        self.send_bytes(bytes)?;

        let mut columns: Option<Vec<Column>> = None;
        let mut rows: Vec<RawRow> = Vec::new();
        let mut last: Option<ExecutionOutcome> = None;
        let mut failure: Option<ErrorFields> = None;

        loop {
            match self.recv()? {
                BackendMessage::RowDescription(fields) => {
                    columns = Some(
                        fields
                            .iter()
                            .enumerate()
                            .map(|(i, f)| Column::from_field(i, f))
                            .collect(),
                    );
                    rows.clear();
                }
                BackendMessage::DataRow(values) => {
                    let width = columns
                        .as_ref()
                        .ok_or_else(|| {
                            PgError::Transport(
                                "protocol error: DataRow without RowDescription".to_string(),
                            )
                        })?
                        .len();
                    if values.len() != width {
                        return Err(PgError::Transport(format!(
                            "protocol error: DataRow has {} values, RowDescription has {} columns",
                            values.len(),
                            width
                        )));
                    }
                    rows.push(values);
                }
                BackendMessage::CommandComplete(tag) => {
                    last = Some(match columns.take() {
                        Some(cols) => ExecutionOutcome::RowsReturned(ResultSet::new(
                            cols,
                            std::mem::take(&mut rows),
                        )),
                        None => ExecutionOutcome::CommandCompleted {
                            affected: parse_affected_rows(&tag),
                            tag,
                        },
                    });
                }
                BackendMessage::EmptyQueryResponse => {
                    last = Some(ExecutionOutcome::CommandCompleted {
                        tag: String::new(),
                        affected: 0,
                    });
                }
                BackendMessage::ErrorResponse(err) => {
                    // The server skips the rest of the string after an error
                    columns = None;
                    rows.clear();
                    failure.get_or_insert(err);
                }
                BackendMessage::NoticeResponse(notice) => warn!("server notice: {}", notice),
                BackendMessage::ParameterStatus { name, value } => {
                    self.server_params.insert(name, value);
                }
                BackendMessage::NotificationResponse {
                    process_id,
                    channel,
                    payload,
                } => {
                    debug!(process_id, %channel, %payload, "notification");
                }
                BackendMessage::CopyInResponse => {
                    self.send(FrontendMessage::CopyFail(
                        "COPY FROM STDIN is not supported by this client".to_string(),
                    ))?;
                }
                BackendMessage::CopyOutResponse
                | BackendMessage::CopyData(_)
                | BackendMessage::CopyDone => {}
                BackendMessage::ReadyForQuery(status) => {
                    self.set_transaction_status(status);
                    return Ok(match failure {
                        Some(err) => ExecutionOutcome::Failed(err),
                        None => last.unwrap_or(ExecutionOutcome::CommandCompleted {
                            tag: String::new(),
                            affected: 0,
                        }),
                    });
                }
                other => {
                    return Err(PgError::Transport(format!(
                        "protocol error: unexpected message {:?}",
                        other
                    )));
                }
            }
        }
    }
}
