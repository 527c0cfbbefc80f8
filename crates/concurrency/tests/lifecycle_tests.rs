//! Transaction lifecycle tests for lattice-concurrency
//!
//! Exercises the full handle against the in-process cluster:
//!
//! 1. **Start timestamps** - lazy assignment by the first response, eager via the oracle
//! 2. **Mutate/commit/query** - writes become visible to later transactions
//! 3. **Terminal states** - nothing but discard is accepted after commit or discard
//! 4. **Read-only** - mutations and commits are rejected before any call
//! 5. **Metrics** - lifecycle counters follow the handles

use lattice_cluster::{MemoryCluster, Operation};
use lattice_concurrency::{Client, TxnOptions};
use lattice_core::{
    ClientConfig, Error, Mutation, StartTimestampPolicy, Timestamp, TxnState,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Test Helpers
// ============================================================================

fn setup() -> (Arc<MemoryCluster>, Client) {
    setup_with(ClientConfig::default())
}

fn setup_with(config: ClientConfig) -> (Arc<MemoryCluster>, Client) {
    let cluster = Arc::new(MemoryCluster::new());
    let client = Client::new(Arc::clone(&cluster), config);
    (cluster, client)
}

fn name_of(uid: &str, name: &str) -> Mutation {
    Mutation::set_nquads(format!("<{}> <name> \"{}\" .", uid, name))
}

fn decode(response: &lattice_core::Response) -> Value {
    response.decode().unwrap()
}

// ============================================================================
// Start timestamps
// ============================================================================

#[tokio::test]
async fn test_lazy_start_ts_assigned_by_first_response() {
    let (cluster, client) = setup();
    let mut txn = client.new_transaction();
    assert_eq!(txn.start_ts(), Timestamp::UNASSIGNED);

    txn.query("<0x1>").await.unwrap();
    let start_ts = txn.start_ts();
    assert!(start_ts.is_assigned());
    assert_eq!(cluster.calls(Operation::Begin), 0);

    // later calls reuse it
    txn.query("<0x1>").await.unwrap();
    assert_eq!(txn.start_ts(), start_ts);
    let log = cluster.requests();
    assert_eq!(log[0].start_ts, Timestamp::UNASSIGNED);
    assert_eq!(log[1].start_ts, start_ts);
}

#[tokio::test]
async fn test_begin_asks_oracle_by_default() {
    let (cluster, client) = setup();

    let txn = client.begin(false).await.unwrap();
    assert!(txn.start_ts().is_assigned());
    assert_eq!(cluster.calls(Operation::Begin), 1);
}

#[tokio::test]
async fn test_options_override_policy() {
    let config = ClientConfig::default().with_start_timestamp(StartTimestampPolicy::Lazy);
    let (cluster, client) = setup_with(config);
    let txn = client
        .begin_with(TxnOptions::read_only().with_start_timestamp(StartTimestampPolicy::Eager))
        .await
        .unwrap();
    assert!(txn.is_read_only());
    assert!(txn.start_ts().is_assigned());
    assert_eq!(cluster.calls(Operation::Begin), 1);

    let lazy = client.begin(false).await.unwrap();
    assert!(!lazy.start_ts().is_assigned());
}

// ============================================================================
// Mutate, commit, query
// ============================================================================

#[tokio::test]
async fn test_two_mutations_visible_after_commit() {
    let (_cluster, client) = setup();

    let mut txn = client.new_transaction();
    txn.mutate(name_of("0x1", "Alice")).await.unwrap();
    txn.mutate(Mutation::set_nquads("<0x1> <age> \"30\" ."))
        .await
        .unwrap();
    assert_eq!(txn.pending_mutations(), 2);
    assert!(txn.touched_keys().contains("0x1|name"));
    assert!(txn.touched_keys().contains("0x1|age"));
    txn.commit().await.unwrap();
    assert_eq!(txn.state(), TxnState::Committed);
    assert!(txn.context().commit_ts.is_assigned());

    let mut reader = client.new_read_only_transaction();
    let result = decode(&reader.query("<0x1>").await.unwrap());
    assert_eq!(result["name"], "Alice");
    assert_eq!(result["age"], "30");
}

#[tokio::test]
async fn test_reads_see_own_writes_not_others() {
    let (_cluster, client) = setup();

    let mut writer = client.new_transaction();
    writer.mutate(name_of("0x2", "Bob")).await.unwrap();
    let own = decode(&writer.query("<0x2> <name>").await.unwrap());
    assert_eq!(own["name"], "Bob");

    let mut other = client.new_transaction();
    let theirs = decode(&other.query("<0x2> <name>").await.unwrap());
    assert!(theirs.get("name").is_none());
}

#[tokio::test]
async fn test_snapshot_is_fixed_at_start() {
    let (_cluster, client) = setup();

    let mut early = client.new_transaction();
    early.query("<0x3>").await.unwrap();

    let mut writer = client.new_transaction();
    writer.mutate(name_of("0x3", "Carol")).await.unwrap();
    writer.commit().await.unwrap();

    let seen = decode(&early.query("<0x3> <name>").await.unwrap());
    assert!(seen.get("name").is_none());
}

#[tokio::test]
async fn test_blank_nodes_get_uids_and_server_keys() {
    let (_cluster, client) = setup();
    let mut txn = client.new_transaction();

    let assigned = txn
        .mutate(Mutation::set_json(&json!({"uid": "_:dana", "name": "Dana"})).unwrap())
        .await
        .unwrap();
    let uid = assigned.uids.get("dana").cloned().unwrap();
    // the client could not derive this key; the response context supplied it
    assert!(txn.touched_keys().contains(&format!("{}|name", uid)));
    txn.commit().await.unwrap();

    let mut reader = client.new_transaction();
    let mut vars = HashMap::new();
    vars.insert("$person".to_string(), uid);
    let result = decode(&reader.query_with_vars("$person name", vars).await.unwrap());
    assert_eq!(result["name"], "Dana");
}

#[tokio::test]
async fn test_upsert_query_and_mutation_in_one_round_trip() {
    let (cluster, client) = setup();
    let mut seed = client.new_transaction();
    seed.mutate(name_of("0x4", "Erin")).await.unwrap();
    seed.commit().await.unwrap();

    let mut txn = client.new_transaction();
    let response = txn
        .do_request(
            "<0x4> <name>",
            HashMap::new(),
            vec![Mutation::set_nquads("<0x4> <email> \"erin@example.com\" .")],
            true,
        )
        .await
        .unwrap();
    assert_eq!(decode(&response)["name"], "Erin");
    assert_eq!(txn.state(), TxnState::Committed);
    // only the seed transaction used a separate commit call
    assert_eq!(cluster.calls(Operation::Commit), 1);
    assert!(cluster.requests().last().unwrap().commit_now);
}

#[tokio::test]
async fn test_commit_with_nothing_staged_is_local() {
    let (cluster, client) = setup();
    let mut txn = client.new_transaction();
    txn.query("<0x1>").await.unwrap();
    txn.commit().await.unwrap();

    assert_eq!(txn.state(), TxnState::Committed);
    assert_eq!(cluster.calls(Operation::Commit), 0);
}

#[tokio::test]
async fn test_finish_commits_or_discards() {
    let (cluster, client) = setup();

    let mut done = client.new_transaction();
    done.mutate(name_of("0x1", "Done")).await.unwrap();
    assert_eq!(done.finish(Ok(7)).await.unwrap(), 7);
    assert_eq!(done.state(), TxnState::Committed);

    let mut abandoned = client.new_transaction();
    abandoned.mutate(name_of("0x2", "Abandoned")).await.unwrap();
    let err = abandoned
        .finish::<()>(Err(Error::invalid_request("logic failed")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest { .. }));
    assert_eq!(abandoned.state(), TxnState::Discarded);
    assert!(cluster.committed_values("0x2", "name").is_empty());
}

// ============================================================================
// Terminal states
// ============================================================================

#[tokio::test]
async fn test_operations_after_commit_rejected() {
    let (_cluster, client) = setup();
    let mut txn = client.new_transaction();
    txn.mutate(name_of("0x1", "Alice")).await.unwrap();
    txn.commit().await.unwrap();

    let err = txn.query("<0x1>").await.unwrap_err();
    assert!(matches!(
        err,
        Error::ActiveStateRequired {
            state: TxnState::Committed
        }
    ));
    assert!(matches!(
        txn.mutate(name_of("0x1", "Again")).await,
        Err(Error::ActiveStateRequired { .. })
    ));
    assert!(matches!(
        txn.commit().await,
        Err(Error::ActiveStateRequired { .. })
    ));

    txn.discard().await;
    assert_eq!(txn.state(), TxnState::Committed);
}

#[tokio::test]
async fn test_operations_after_discard_rejected() {
    let (_cluster, client) = setup();
    let mut txn = client.new_transaction();
    txn.discard().await;

    assert_eq!(txn.state(), TxnState::Discarded);
    assert!(txn.query("<0x1>").await.is_err());
    assert!(txn.commit().await.is_err());
    assert!(txn.set_best_effort(true).is_err());
}

#[tokio::test]
async fn test_immediate_discard_makes_no_call() {
    let (cluster, client) = setup();
    let mut txn = client.new_transaction();
    txn.discard().await;
    txn.discard().await;
    assert_eq!(cluster.total_calls(), 0);
}

#[tokio::test]
async fn test_discard_releases_server_state() {
    let (cluster, client) = setup();
    let mut txn = client.new_transaction();
    txn.mutate(name_of("0x1", "Alice")).await.unwrap();
    assert_eq!(cluster.pending_transactions(), 1);

    txn.discard().await;
    assert_eq!(txn.state(), TxnState::Discarded);
    assert_eq!(cluster.calls(Operation::Discard), 1);
    assert_eq!(cluster.pending_transactions(), 0);
    assert!(cluster.committed_values("0x1", "name").is_empty());
}

// ============================================================================
// Read-only
// ============================================================================

#[tokio::test]
async fn test_read_only_rejects_mutate_and_commit() {
    let (cluster, client) = setup();
    let mut txn = client.new_read_only_transaction();

    let err = txn.mutate(name_of("0x1", "Alice")).await.unwrap_err();
    assert!(matches!(err, Error::ReadOnly { .. }));
    assert!(matches!(txn.commit().await, Err(Error::ReadOnly { .. })));
    assert_eq!(cluster.total_calls(), 0);

    txn.query("<0x1>").await.unwrap();
    assert!(cluster.requests()[0].read_only);
    assert_eq!(txn.state(), TxnState::Active);
}

#[tokio::test]
async fn test_empty_mutation_rejected_locally() {
    let (cluster, client) = setup();
    let mut txn = client.new_transaction();
    let err = txn.mutate(Mutation::new()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest { .. }));
    assert_eq!(cluster.total_calls(), 0);
    assert_eq!(txn.state(), TxnState::Active);
}

// ============================================================================
// Metrics
// ============================================================================

#[tokio::test]
async fn test_metrics_follow_lifecycle() {
    let (_cluster, client) = setup();

    let mut committed = client.new_transaction();
    committed.mutate(name_of("0x1", "A")).await.unwrap();
    committed.commit().await.unwrap();

    let mut discarded = client.new_transaction();
    discarded.discard().await;

    let _active = client.new_transaction();

    let metrics = client.metrics();
    assert_eq!(metrics.total_started, 3);
    assert_eq!(metrics.total_committed, 1);
    assert_eq!(metrics.total_discarded, 1);
    assert_eq!(metrics.active_count, 1);
}

#[tokio::test]
async fn test_dropped_handle_leaves_active_count() {
    let (_cluster, client) = setup();
    {
        let mut txn = client.new_transaction();
        txn.mutate(name_of("0x1", "A")).await.unwrap();
    }
    let metrics = client.metrics();
    assert_eq!(metrics.active_count, 0);
    assert_eq!(metrics.total_discarded, 1);
}
