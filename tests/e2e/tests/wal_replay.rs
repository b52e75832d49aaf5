//! WAL replay against the real dispatcher: outage, recovery, and
//! at-most-once semantics via the server's idempotency table.

use continuum_e2e_tests::{Harness, TOKEN_T1};
use continuum_mcp::{WalClient, WalRecord};
use serde_json::{json, Value};
use tempfile::TempDir;

fn handoff_args(n: i64) -> Value {
    json!({
        "session_id": format!("s{n}"),
        "with_whom": "Callin",
        "experienced": format!("offline work {n}"),
        "noticed": "n",
        "learned": "l",
        "remember": "r",
        "significance": 0.5
    })
}

/// Replay a record through the dispatcher, passing the WAL op_id along
async fn dispatch_record(harness: &Harness, record: WalRecord) -> Result<Value, String> {
    let mut args = record.args.clone();
    if let Some(map) = args.as_object_mut() {
        map.insert("op_id".to_string(), Value::String(record.op_id.clone()));
    }
    harness
        .call(TOKEN_T1, &record.op_name, args)
        .await
        .map_err(|e| e.message)
}

#[tokio::test]
async fn replay_after_outage_is_idempotent() {
    let harness = Harness::new();
    let dir = TempDir::new().unwrap();
    let wal = WalClient::open(dir.path()).unwrap();

    // Server down: two writes land only in the log
    wal.append("create_handoff", handoff_args(1), Some("t1")).unwrap();
    wal.append("create_handoff", handoff_args(2), Some("t1")).unwrap();
    assert_eq!(wal.pending().unwrap().len(), 2);
    assert_eq!(harness.engine.store.counts("t1").unwrap().handoffs, 0);

    // Recovery: replay applies both, in order
    let summary = wal
        .replay(|record| dispatch_record(&harness, record))
        .await
        .unwrap();
    assert_eq!(summary.replayed, 2);
    assert_eq!(summary.remaining, 0);
    assert_eq!(harness.engine.store.counts("t1").unwrap().handoffs, 2);

    // A second replay produces no new handoffs
    let summary = wal
        .replay(|record| dispatch_record(&harness, record))
        .await
        .unwrap();
    assert_eq!(summary.replayed, 0);
    assert_eq!(harness.engine.store.counts("t1").unwrap().handoffs, 2);
}

#[tokio::test]
async fn duplicate_op_id_returns_stored_result_without_reexecuting() {
    let harness = Harness::new();
    let dir = TempDir::new().unwrap();
    let wal = WalClient::open(dir.path()).unwrap();

    let record = wal
        .append("create_handoff", handoff_args(1), Some("t1"))
        .unwrap();

    // The "client" sends the same logged operation twice (e.g. a crash
    // between the server ack and the tombstone write)
    let first = dispatch_record(&harness, record.clone()).await.unwrap();
    let second = dispatch_record(&harness, record).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first["handoff_id"], second["handoff_id"]);
    assert_eq!(harness.engine.store.counts("t1").unwrap().handoffs, 1);
}

#[tokio::test]
async fn replay_halts_on_rejected_record_preserving_order() {
    let harness = Harness::new();
    let dir = TempDir::new().unwrap();
    let wal = WalClient::open(dir.path()).unwrap();

    wal.append("create_handoff", handoff_args(1), Some("t1")).unwrap();
    // Invalid record: significance out of range, server rejects it
    wal.append(
        "create_handoff",
        json!({
            "session_id": "bad",
            "with_whom": "Callin",
            "experienced": "e", "noticed": "n", "learned": "l",
            "remember": "r",
            "significance": 2.0
        }),
        Some("t1"),
    )
    .unwrap();
    wal.append("create_handoff", handoff_args(3), Some("t1")).unwrap();

    let summary = wal
        .replay(|record| dispatch_record(&harness, record))
        .await
        .unwrap();
    // Only the first record lands; the failure halts the pass
    assert_eq!(summary.replayed, 1);
    assert_eq!(summary.remaining, 2);
    assert_eq!(harness.engine.store.counts("t1").unwrap().handoffs, 1);
}
