//! Connection lifecycle and execution against a scripted server.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use qail_pq::{
    ConnectionParameters, ConnectionStatus, ExecutionOutcome, PgConnection, PgError,
    TransactionStatus,
};

#[test]
fn test_connect_reads_startup_parameters() {
    let probe = Probe::new();
    let conn = connected(&probe);

    assert_eq!(conn.status(), ConnectionStatus::Ready);
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
    assert_eq!(conn.server_version(), Some("16.2"));
    assert_eq!(conn.parameter("client_encoding"), Some("UTF8"));
    assert_eq!(conn.backend_pid(), 4242);
    assert_eq!(conn.secret_key(), 7);
    assert_eq!(conn.last_error(), None);
}

#[test]
fn test_close_releases_transport_once() {
    let probe = Probe::new();
    let mut conn = connected(&probe);
    assert_eq!(probe.opened(), 1);
    assert_eq!(probe.released(), 0);

    conn.close();
    assert_eq!(conn.status(), ConnectionStatus::Closed);
    assert_eq!(probe.released(), 1);
    assert_eq!(probe.shutdowns(), 1);
    assert_eq!(probe.sent_tags(), vec!['X']);

    conn.close();
    drop(conn);
    assert_eq!(probe.released(), 1);
    assert_eq!(probe.sent_tags(), vec!['X']);
}

#[test]
fn test_drop_without_close_releases_transport() {
    let probe = Probe::new();
    let conn = connected(&probe);
    drop(conn);
    assert_eq!(probe.released(), 1);
    assert_eq!(probe.sent_tags(), vec!['X']);
}

#[test]
fn test_execute_after_close_fails_without_io() {
    let probe = Probe::new();
    let mut conn = connected(&probe);
    conn.close();
    let written = probe.written_len();

    assert!(matches!(conn.execute("select 1"), Err(PgError::Transport(_))));
    assert_eq!(probe.written_len(), written);
}

#[test]
fn test_md5_authentication() {
    let probe = Probe::new();
    probe.push(auth_md5([1, 2, 3, 4]));
    probe.push(startup_ok());

    let conn = PgConnection::connect_with_transport(probe.transport(), &params()).unwrap();
    assert_eq!(conn.status(), ConnectionStatus::Ready);
    assert_eq!(
        probe.sent_passwords(),
        vec!["md5a2d304b316070c130890d76c6c7e7264".to_string()]
    );
}

#[test]
fn test_password_required_but_missing() {
    let probe = Probe::new();
    probe.push(auth_md5([1, 2, 3, 4]));
    let params = ConnectionParameters::builder().user("postgres").build().unwrap();

    let err = PgConnection::connect_with_transport(probe.transport(), &params)
        .err()
        .unwrap();
    assert!(matches!(err, PgError::Connect { .. }));
    assert_eq!(probe.released(), 1);
}

#[test]
fn test_rejected_startup_is_connect_error() {
    let probe = Probe::new();
    probe.push(error_response(
        "28P01",
        "password authentication failed for user \"postgres\"",
    ));

    let err = PgConnection::connect_with_transport(probe.transport(), &params())
        .err()
        .unwrap();
    match err {
        PgError::Connect { reason } => {
            assert!(reason.contains("password authentication failed"));
            assert!(reason.contains("28P01"));
        }
        other => panic!("expected connect error, got {:?}", other),
    }
    assert_eq!(probe.released(), 1);
    // No Terminate after a failed handshake
    assert!(!probe.sent_tags().contains(&'X'));
}

#[test]
fn test_server_hangs_up_during_startup() {
    let probe = Probe::new();
    probe.push(auth_ok());

    let err = PgConnection::connect_with_transport(probe.transport(), &params())
        .err()
        .unwrap();
    assert!(matches!(err, PgError::Connect { .. }));
    assert_eq!(probe.released(), 1);
}

#[test]
fn test_tls_only_sslmode_is_rejected() {
    let params = ConnectionParameters::builder()
        .host("localhost")
        .set("sslmode", "require")
        .build()
        .unwrap();
    assert!(matches!(
        PgConnection::connect(&params),
        Err(PgError::Connect { .. })
    ));
}

#[test]
fn test_execute_returns_rows() {
    let probe = Probe::new();
    let mut conn = connected(&probe);
    probe.push(rows_reply(
        &["name", "id"],
        &[&[Some("alice"), Some("1")], &[Some("bob"), Some("2")]],
    ));

    let outcome = conn.execute("select name,id from race;").unwrap();
    let rows = outcome.result_set().unwrap();
    assert_eq!(rows.column_count(), 2);
    assert_eq!(rows.row_count(), 2);
    assert_eq!(rows.value_at(0, 0).unwrap().as_deref(), Some("alice"));
    assert_eq!(rows.value_at(0, 1).unwrap().as_deref(), Some("1"));
    assert_eq!(rows.value_at(1, 0).unwrap().as_deref(), Some("bob"));
    assert_eq!(rows.value_at(1, 1).unwrap().as_deref(), Some("2"));
    assert_eq!(probe.sent_queries(), vec!["select name,id from race;"]);
    assert_eq!(conn.status(), ConnectionStatus::Ready);
}

#[test]
fn test_null_value_is_none() {
    let probe = Probe::new();
    let mut conn = connected(&probe);
    probe.push(rows_reply(&["name", "id"], &[&[Some("alice"), None]]));

    let outcome = conn.execute("select 'alice', null").unwrap();
    let rows = outcome.result_set().unwrap();
    assert_eq!(rows.value_at(0, 1).unwrap(), None);
    assert!(rows.is_null(0, 1).unwrap());
}

#[test]
fn test_empty_result_rejects_any_row() {
    let probe = Probe::new();
    let mut conn = connected(&probe);
    probe.push(rows_reply(&["name"], &[]));

    let outcome = conn.execute("select name from race where false").unwrap();
    let rows = outcome.result_set().unwrap();
    assert_eq!(rows.row_count(), 0);
    assert_eq!(rows.column_count(), 1);
    assert!(matches!(rows.value_at(0, 0), Err(PgError::Index { .. })));
}

#[test]
fn test_command_completed_with_count() {
    let probe = Probe::new();
    let mut conn = connected(&probe);
    probe.push(command_reply("INSERT 0 3", b'I'));

    let outcome = conn.execute("insert into race select generate_series(1,3)").unwrap();
    assert_eq!(
        outcome,
        ExecutionOutcome::CommandCompleted {
            tag: "INSERT 0 3".to_string(),
            affected: 3,
        }
    );
}

#[test]
fn test_server_error_keeps_connection_usable() {
    let probe = Probe::new();
    let mut conn = connected(&probe);
    probe.push(error_reply(
        "42P01",
        "relation \"missing\" does not exist",
        b'I',
    ));
    probe.push(command_reply("SELECT 1", b'I'));

    let outcome = conn.execute("select * from missing").unwrap();
    let err = outcome.error().unwrap();
    assert_eq!(err.code, "42P01");
    assert_eq!(err.severity, "ERROR");
    assert_eq!(conn.status(), ConnectionStatus::Ready);

    assert!(!conn.execute("select 1").unwrap().is_failed());
}

#[test]
fn test_multi_statement_returns_last_outcome() {
    let probe = Probe::new();
    let mut conn = connected(&probe);
    let mut reply = command_complete("INSERT 0 1");
    reply.extend(row_description(&["count"]));
    reply.extend(data_row(&[Some("1")]));
    reply.extend(command_complete("SELECT 1"));
    reply.extend(ready(b'I'));
    probe.push(reply);

    let outcome = conn
        .execute("insert into race values (1); select count(*) from race")
        .unwrap();
    let rows = outcome.result_set().unwrap();
    assert_eq!(rows.column_name(0), Some("count"));
    assert_eq!(rows.value_at(0, 0).unwrap().as_deref(), Some("1"));
}

#[test]
fn test_multi_statement_failure_wins() {
    let probe = Probe::new();
    let mut conn = connected(&probe);
    let mut reply = command_complete("INSERT 0 1");
    reply.extend(error_response("22012", "division by zero"));
    reply.extend(ready(b'I'));
    probe.push(reply);

    let outcome = conn
        .execute("insert into race values (1); select 1/0")
        .unwrap();
    assert_eq!(outcome.error().map(|e| e.code.as_str()), Some("22012"));
}

#[test]
fn test_empty_query() {
    let probe = Probe::new();
    let mut conn = connected(&probe);
    let mut reply = empty_query();
    reply.extend(ready(b'I'));
    probe.push(reply);

    let outcome = conn.execute("").unwrap();
    assert_eq!(outcome.affected(), 0);
    assert!(outcome.result_set().is_none());
}

#[test]
fn test_notice_does_not_change_outcome() {
    let probe = Probe::new();
    let mut conn = connected(&probe);
    let mut reply = notice("table \"race\" does not exist, skipping");
    reply.extend(command_reply("DROP TABLE", b'I'));
    probe.push(reply);

    let outcome = conn.execute("drop table if exists race").unwrap();
    assert!(!outcome.is_failed());
}

#[test]
fn test_copy_from_stdin_is_refused() {
    let probe = Probe::new();
    let mut conn = connected(&probe);
    let mut reply = copy_in_response();
    reply.extend(error_reply("57014", "COPY from stdin failed", b'I'));
    probe.push(reply);

    let outcome = conn.execute("copy race from stdin").unwrap();
    assert!(outcome.is_failed());
    assert!(probe.sent_tags().contains(&'f'));
    assert_eq!(conn.status(), ConnectionStatus::Ready);
}

#[test]
fn test_transaction_status_follows_server() {
    let probe = Probe::new();
    let mut conn = connected(&probe);

    probe.push(command_reply("BEGIN", b'T'));
    conn.execute("BEGIN").unwrap();
    assert_eq!(conn.status(), ConnectionStatus::InTransaction);
    assert_eq!(conn.transaction_status(), TransactionStatus::InBlock);

    probe.push(error_reply("42601", "syntax error at or near \"selec\"", b'E'));
    assert!(conn.execute("selec 1").unwrap().is_failed());
    assert_eq!(conn.status(), ConnectionStatus::InTransaction);
    assert_eq!(conn.transaction_status(), TransactionStatus::Failed);

    probe.push(command_reply("ROLLBACK", b'I'));
    conn.execute("ROLLBACK").unwrap();
    assert_eq!(conn.status(), ConnectionStatus::Ready);
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
}

#[test]
fn test_nul_in_statement_is_encode_error() {
    let probe = Probe::new();
    let mut conn = connected(&probe);
    let written = probe.written_len();

    assert!(matches!(conn.execute("select\0 1"), Err(PgError::Encode(_))));
    assert_eq!(conn.status(), ConnectionStatus::Ready);
    assert_eq!(probe.written_len(), written);
}

#[test]
fn test_severed_transport_fails_connection() {
    let probe = Probe::new();
    let mut conn = connected(&probe);
    probe.sever();

    assert!(matches!(conn.execute("select 1"), Err(PgError::Transport(_))));
    assert_eq!(conn.status(), ConnectionStatus::Failed);
    assert!(conn.last_error().is_some());
    assert_eq!(probe.released(), 1);

    let written = probe.written_len();
    assert!(matches!(conn.execute("select 1"), Err(PgError::Transport(_))));
    assert_eq!(probe.written_len(), written);

    conn.close();
    assert_eq!(conn.status(), ConnectionStatus::Closed);
    assert_eq!(probe.released(), 1);
}

#[test]
fn test_server_hangs_up_mid_query() {
    let probe = Probe::new();
    let mut conn = connected(&probe);
    // RowDescription arrives, then EOF
    probe.push(row_description(&["name"]));

    assert!(matches!(conn.execute("select name from race"), Err(PgError::Transport(_))));
    assert_eq!(conn.status(), ConnectionStatus::Failed);
    assert_eq!(probe.released(), 1);
}

#[test]
fn test_row_width_mismatch_is_protocol_error() {
    let probe = Probe::new();
    let mut conn = connected(&probe);
    let mut reply = row_description(&["name", "id"]);
    reply.extend(data_row(&[Some("alice")]));
    reply.extend(command_complete("SELECT 1"));
    reply.extend(ready(b'I'));
    probe.push(reply);

    match conn.execute("select name,id from race") {
        Err(PgError::Transport(reason)) => assert!(reason.contains("protocol error")),
        other => panic!("expected transport error, got {:?}", other),
    }
    assert_eq!(conn.status(), ConnectionStatus::Failed);
}

#[test]
fn test_scram_without_server_proof_is_rejected() {
    let probe = Probe::new();
    probe.push(auth_sasl(&["SCRAM-SHA-256"]));
    // Server skips SASLContinue / SASLFinal and declares success
    probe.push(auth_ok());
    probe.push(ready(b'I'));

    let err = PgConnection::connect_with_transport(probe.transport(), &params())
        .err()
        .unwrap();
    match err {
        PgError::Connect { reason } => assert!(reason.contains("SCRAM")),
        other => panic!("expected connect error, got {:?}", other),
    }
    assert_eq!(probe.sent_tags(), vec!['p']);
    assert_eq!(probe.released(), 1);
}

#[test]
fn test_oversized_frame_fails_connection() {
    let probe = Probe::new();
    let mut conn = connected(&probe);
    probe.push(frame_header(b'D', i32::MAX));

    match conn.execute("select repeat('x', 10)") {
        Err(PgError::Transport(reason)) => assert!(reason.contains("too large")),
        other => panic!("expected transport error, got {:?}", other),
    }
    assert_eq!(conn.status(), ConnectionStatus::Failed);
    assert_eq!(probe.released(), 1);
}
