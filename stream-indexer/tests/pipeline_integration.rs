//! Integration tests for the stream indexer consumer loop.
//!
//! These tests use the real Orchestrator but mock the record source and the
//! search index, so delivery guarantees can be checked without Kafka or
//! OpenSearch. Timing tests run on a paused clock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use stream_indexer::batcher::{BatchAccumulator, BatchConfig};
use stream_indexer::consumer::{RebalanceEvent, RecordSource, SourceEvent};
use stream_indexer::errors::{FatalPipelineError, IngestError};
use stream_indexer::loader::{IndexWriter, PermanentFailurePolicy, RetryPolicy};
use stream_indexer::orchestrator::{LoopState, Orchestrator, OrchestratorConfig};
use stream_indexer::processor::RecordDecoder;
use stream_indexer_repository::{
    BulkIndexSummary, BulkItemResult, BulkItemStatus, IndexDocumentRequest, SearchIndexError,
    SearchIndexProvider,
};
use stream_indexer_shared::{OffsetRange, RawRecord, TopicPartition};

// Mock record source

enum Step {
    Records(Vec<RawRecord>),
    /// Records and assignment changes in the order the client saw them.
    Events(Vec<SourceEvent>),
    Fail(&'static str),
    /// Nothing arrives until the poll timeout.
    Idle,
}

#[derive(Debug, Clone)]
struct CommitCall {
    at: Instant,
    offsets: Vec<(TopicPartition, i64)>,
}

#[derive(Default)]
struct SourceState {
    commits: Mutex<Vec<CommitCall>>,
    failed_commits: AtomicUsize,
    polls: AtomicUsize,
}

impl SourceState {
    fn commits(&self) -> Vec<CommitCall> {
        self.commits.lock().unwrap().clone()
    }

    /// Last commit point acknowledged for a partition.
    fn committed(&self, partition: &TopicPartition) -> Option<i64> {
        self.commits()
            .iter()
            .flat_map(|call| call.offsets.iter())
            .filter(|(p, _)| p == partition)
            .map(|(_, offset)| *offset)
            .last()
    }
}

/// Plays scripted poll results, then requests shutdown.
struct MockSource {
    steps: VecDeque<Step>,
    fail_commits: usize,
    state: Arc<SourceState>,
    shutdown: CancellationToken,
}

#[async_trait]
impl RecordSource for MockSource {
    fn subscribe(&mut self) -> Result<(), IngestError> {
        Ok(())
    }

    async fn poll(
        &mut self,
        _max_records: usize,
        timeout: Duration,
    ) -> Result<Vec<SourceEvent>, IngestError> {
        self.state.polls.fetch_add(1, Ordering::SeqCst);
        match self.steps.pop_front() {
            Some(Step::Records(records)) => {
                Ok(records.into_iter().map(SourceEvent::Record).collect())
            }
            Some(Step::Events(events)) => Ok(events),
            Some(Step::Fail(message)) => Err(IngestError::kafka(message)),
            Some(Step::Idle) => {
                tokio::time::sleep(timeout).await;
                Ok(Vec::new())
            }
            None => {
                self.shutdown.cancel();
                Ok(Vec::new())
            }
        }
    }

    async fn commit(&mut self, offsets: &[(TopicPartition, i64)]) -> Result<(), IngestError> {
        if self.fail_commits > 0 {
            self.fail_commits -= 1;
            self.state.failed_commits.fetch_add(1, Ordering::SeqCst);
            return Err(IngestError::kafka("coordinator not available"));
        }
        self.state.commits.lock().unwrap().push(CommitCall {
            at: Instant::now(),
            offsets: offsets.to_vec(),
        });
        Ok(())
    }
}

// Mock search index with upsert semantics

#[derive(Default)]
struct MockIndex {
    documents: Mutex<HashMap<String, Map<String, Value>>>,
    calls: AtomicUsize,
    completed: Mutex<Vec<Instant>>,
    latency: Duration,
    retryable_ids: HashSet<String>,
    rejected_ids: HashSet<String>,
}

impl MockIndex {
    fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    fn failing(ids: &[&str]) -> Self {
        Self {
            retryable_ids: ids.iter().map(|id| id.to_string()).collect(),
            ..Self::default()
        }
    }

    fn rejecting(ids: &[&str]) -> Self {
        Self {
            rejected_ids: ids.iter().map(|id| id.to_string()).collect(),
            ..Self::default()
        }
    }

    fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.documents.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchIndexProvider for MockIndex {
    async fn ping(&self) -> Result<(), SearchIndexError> {
        Ok(())
    }

    async fn ensure_index_exists(&self) -> Result<(), SearchIndexError> {
        Ok(())
    }

    async fn bulk_index(
        &self,
        requests: &[IndexDocumentRequest],
    ) -> Result<BulkIndexSummary, SearchIndexError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut documents = self.documents.lock().unwrap();
        let results = requests
            .iter()
            .map(|request| {
                let status = if self.retryable_ids.contains(&request.document_id) {
                    BulkItemStatus::Retryable("es_rejected_execution_exception".to_string())
                } else if self.rejected_ids.contains(&request.document_id) {
                    BulkItemStatus::Permanent("mapper_parsing_exception: bad amount".to_string())
                } else {
                    documents.insert(request.document_id.clone(), request.source.clone());
                    BulkItemStatus::Indexed
                };
                BulkItemResult {
                    index: "orders".to_string(),
                    document_id: request.document_id.clone(),
                    status,
                }
            })
            .collect();

        self.completed.lock().unwrap().push(Instant::now());
        Ok(BulkIndexSummary::from_results(results))
    }
}

// Helpers

fn order(partition: i32, offset: i64) -> RawRecord {
    let payload = json!({
        "meta": { "id": format!("order-{}-{}", partition, offset) },
        "amount": offset * 10,
    });
    RawRecord::new(
        "orders",
        partition,
        offset,
        None,
        payload.to_string().into_bytes(),
        Some(1_700_000_000_000),
    )
}

fn malformed(partition: i32, offset: i64) -> RawRecord {
    RawRecord::new("orders", partition, offset, None, b"{oops".to_vec(), None)
}

fn orders(partition: i32) -> TopicPartition {
    TopicPartition::new("orders", partition)
}

fn revoked(partition: i32) -> SourceEvent {
    SourceEvent::Rebalance(RebalanceEvent::Revoked(vec![orders(partition)]))
}

fn assigned(partition: i32) -> SourceEvent {
    SourceEvent::Rebalance(RebalanceEvent::Assigned(vec![orders(partition)]))
}

struct Pipeline {
    steps: Vec<Step>,
    batch: BatchConfig,
    retry: RetryPolicy,
    policy: PermanentFailurePolicy,
    config: OrchestratorConfig,
    fail_commits: usize,
}

impl Pipeline {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            batch: BatchConfig::default(),
            retry: RetryPolicy::new(4, Duration::from_millis(100), Duration::from_secs(10)),
            policy: PermanentFailurePolicy::Skip,
            config: OrchestratorConfig::default(),
            fail_commits: 0,
        }
    }

    fn max_docs(mut self, max_docs: usize) -> Self {
        self.batch.max_docs = max_docs;
        self
    }

    fn build(self, index: Arc<MockIndex>) -> (Orchestrator, Arc<SourceState>) {
        let shutdown = CancellationToken::new();
        let state = Arc::new(SourceState::default());
        let source = MockSource {
            steps: self.steps.into(),
            fail_commits: self.fail_commits,
            state: Arc::clone(&state),
            shutdown: shutdown.clone(),
        };

        let orchestrator = Orchestrator::new(
            Box::new(source),
            RecordDecoder::default(),
            BatchAccumulator::new(self.batch),
            IndexWriter::new(index, self.retry, self.policy),
            self.config,
            shutdown,
        );
        (orchestrator, state)
    }
}

// Tests

#[tokio::test(start_paused = true)]
async fn test_orders_scenario_skips_malformed_and_commits_past_it() {
    let index = Arc::new(MockIndex::default());
    let (mut orchestrator, source) = Pipeline::new(vec![Step::Records(vec![
        order(0, 100),
        order(0, 101),
        malformed(0, 102),
        order(0, 103),
        order(0, 104),
    ])])
    .build(index.clone());

    orchestrator.run().await.unwrap();

    assert_eq!(
        index.ids(),
        vec!["order-0-100", "order-0-101", "order-0-103", "order-0-104"]
    );
    assert_eq!(orchestrator.tracker().checkpoint(&orders(0)), Some(104));
    assert_eq!(source.committed(&orders(0)), Some(105));
    assert_eq!(orchestrator.state(), LoopState::Stopped);

    let metrics = orchestrator.metrics().snapshot();
    assert_eq!(metrics.records_received, 5);
    assert_eq!(metrics.documents_indexed, 4);
    assert_eq!(metrics.records_skipped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_batch_of_only_malformed_records_still_commits() {
    let index = Arc::new(MockIndex::default());
    let (mut orchestrator, source) =
        Pipeline::new(vec![Step::Records(vec![malformed(0, 7), malformed(0, 8)])])
            .build(index.clone());

    orchestrator.run().await.unwrap();

    assert_eq!(index.calls(), 0);
    assert_eq!(source.committed(&orders(0)), Some(9));
}

#[tokio::test(start_paused = true)]
async fn test_no_commit_before_index_result() {
    let index = Arc::new(MockIndex::with_latency(Duration::from_secs(5)));
    let (mut orchestrator, source) = Pipeline::new(vec![
        Step::Records(vec![order(0, 1), order(0, 2)]),
        Step::Records(vec![order(0, 3), order(0, 4)]),
    ])
    .max_docs(2)
    .build(index.clone());

    let started = Instant::now();
    orchestrator.run().await.unwrap();

    let commits = source.commits();
    let completed = index.completed.lock().unwrap().clone();
    assert_eq!(commits.len(), 2);
    assert_eq!(completed.len(), 2);
    for (commit, written) in commits.iter().zip(completed.iter()) {
        assert!(commit.at >= *written);
    }
    assert!(commits[0].at - started >= Duration::from_secs(5));
    assert_eq!(commits[0].offsets, vec![(orders(0), 3)]);
    assert_eq!(commits[1].offsets, vec![(orders(0), 5)]);
}

#[tokio::test(start_paused = true)]
async fn test_replaying_a_batch_is_idempotent() {
    let records = || vec![order(0, 1), order(0, 2), order(1, 1)];
    let index = Arc::new(MockIndex::default());

    let (mut first, _) = Pipeline::new(vec![Step::Records(records())]).build(index.clone());
    first.run().await.unwrap();
    let after_first = index.documents.lock().unwrap().clone();

    // Same records delivered again, as after a crash before the commit.
    let (mut replay, _) = Pipeline::new(vec![Step::Records(records())]).build(index.clone());
    replay.run().await.unwrap();

    assert_eq!(*index.documents.lock().unwrap(), after_first);
    assert_eq!(index.ids().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_failure_is_bounded_and_commits_nothing() {
    let index = Arc::new(MockIndex::failing(&["order-0-2"]));
    let (mut orchestrator, source) =
        Pipeline::new(vec![Step::Records(vec![order(0, 1), order(0, 2)])])
            .max_docs(2)
            .build(index.clone());

    let started = Instant::now();
    let error = orchestrator.run().await.unwrap_err();

    assert_eq!(index.calls(), 4);
    assert_eq!(started.elapsed(), Duration::from_millis(100 + 200 + 400));
    assert!(source.commits().is_empty());
    match error {
        IngestError::Fatal(FatalPipelineError::RetriesExhausted {
            attempts, ranges, ..
        }) => {
            assert_eq!(attempts, 4);
            assert_eq!(ranges[0].partition, orders(0));
            assert_eq!(ranges[0].range, OffsetRange::single(2));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_skip_policy_advances_offsets() {
    let index = Arc::new(MockIndex::rejecting(&["order-0-2"]));
    let (mut orchestrator, source) =
        Pipeline::new(vec![Step::Records(vec![order(0, 1), order(0, 2), order(0, 3)])])
            .build(index.clone());

    orchestrator.run().await.unwrap();

    assert_eq!(index.ids(), vec!["order-0-1", "order-0-3"]);
    assert_eq!(source.committed(&orders(0)), Some(4));
    assert_eq!(orchestrator.metrics().snapshot().documents_dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_halt_policy_stops_without_commit() {
    let index = Arc::new(MockIndex::rejecting(&["order-0-2"]));
    let mut pipeline =
        Pipeline::new(vec![Step::Records(vec![order(0, 1), order(0, 2), order(0, 3)])]);
    pipeline.policy = PermanentFailurePolicy::Halt;
    let (mut orchestrator, source) = pipeline.build(index.clone());

    let error = orchestrator.run().await.unwrap_err();

    assert!(error.is_fatal());
    assert!(error.to_string().contains("orders[0]@2"));
    assert!(source.commits().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_revoked_partition_is_discarded() {
    let index = Arc::new(MockIndex::default());
    let (mut orchestrator, source) = Pipeline::new(vec![
        Step::Records(vec![order(0, 1), order(1, 1), order(0, 2), order(1, 2)]),
        Step::Events(vec![
            revoked(1),
            SourceEvent::Record(order(1, 3)),
            SourceEvent::Record(order(0, 3)),
        ]),
    ])
    .build(index.clone());

    orchestrator.run().await.unwrap();

    assert_eq!(index.ids(), vec!["order-0-1", "order-0-2", "order-0-3"]);
    assert_eq!(source.committed(&orders(0)), Some(4));
    assert_eq!(source.committed(&orders(1)), None);
    assert_eq!(orchestrator.metrics().snapshot().documents_discarded, 2);
}

#[tokio::test(start_paused = true)]
async fn test_revoke_and_reassign_in_one_poll_redelivers_discarded_offsets() {
    let index = Arc::new(MockIndex::default());
    let (mut orchestrator, source) = Pipeline::new(vec![
        Step::Records(vec![order(0, 8), order(0, 9)]),
        Step::Events(vec![
            // Fetched under the old assignment.
            SourceEvent::Record(order(0, 10)),
            SourceEvent::Record(order(0, 11)),
            revoked(0),
            assigned(0),
            // Fetched again from the committed position.
            SourceEvent::Record(order(0, 8)),
            SourceEvent::Record(order(0, 9)),
            SourceEvent::Record(order(0, 10)),
        ]),
    ])
    .build(index.clone());

    orchestrator.run().await.unwrap();

    assert_eq!(index.ids(), vec!["order-0-10", "order-0-8", "order-0-9"]);
    assert_eq!(source.committed(&orders(0)), Some(11));
    assert!(source
        .commits()
        .iter()
        .flat_map(|call| call.offsets.iter())
        .all(|(_, offset)| *offset <= 11));
    assert_eq!(orchestrator.metrics().snapshot().documents_discarded, 4);
}

#[tokio::test(start_paused = true)]
async fn test_records_after_revoke_without_reassign_are_ignored() {
    let index = Arc::new(MockIndex::default());
    let (mut orchestrator, source) = Pipeline::new(vec![
        Step::Records(vec![order(0, 1)]),
        Step::Events(vec![revoked(0), SourceEvent::Record(order(0, 2))]),
    ])
    .build(index.clone());

    orchestrator.run().await.unwrap();

    assert!(index.ids().is_empty());
    assert!(source.commits().is_empty());
    assert_eq!(orchestrator.tracker().checkpoint(&orders(0)), None);
}

#[tokio::test(start_paused = true)]
async fn test_idle_poll_is_capped_by_batch_latency() {
    let index = Arc::new(MockIndex::default());
    let mut pipeline = Pipeline::new(vec![Step::Records(vec![order(0, 1)]), Step::Idle]);
    pipeline.config.poll_timeout = Duration::from_secs(3);
    pipeline.batch.max_latency = Duration::from_secs(1);
    let (mut orchestrator, source) = pipeline.build(index.clone());

    let started = Instant::now();
    orchestrator.run().await.unwrap();

    let completed = index.completed.lock().unwrap().clone();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0] - started, Duration::from_secs(1));
    assert_eq!(source.committed(&orders(0)), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_latency_bound_flushes_partial_batch() {
    let index = Arc::new(MockIndex::default());
    let (mut orchestrator, source) = Pipeline::new(vec![
        Step::Records(vec![order(0, 1)]),
        Step::Idle,
        Step::Records(vec![order(0, 2)]),
    ])
    .build(index.clone());

    orchestrator.run().await.unwrap();

    // One flush after the idle poll, one on shutdown.
    let commits = source.commits();
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].offsets, vec![(orders(0), 2)]);
    assert_eq!(commits[1].offsets, vec![(orders(0), 3)]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_commit_is_retried() {
    let index = Arc::new(MockIndex::default());
    let mut pipeline = Pipeline::new(vec![
        Step::Records(vec![order(0, 1), order(0, 2)]),
        Step::Idle,
    ])
    .max_docs(2);
    pipeline.fail_commits = 1;
    let (mut orchestrator, source) = pipeline.build(index.clone());

    orchestrator.run().await.unwrap();

    assert_eq!(source.failed_commits.load(Ordering::SeqCst), 1);
    assert_eq!(source.commits().len(), 1);
    assert_eq!(source.committed(&orders(0)), Some(3));
    assert_eq!(orchestrator.metrics().snapshot().commit_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_poll_failures_recover() {
    let index = Arc::new(MockIndex::default());
    let (mut orchestrator, source) = Pipeline::new(vec![
        Step::Fail("broker transport failure"),
        Step::Fail("broker transport failure"),
        Step::Records(vec![order(0, 1)]),
    ])
    .build(index.clone());

    orchestrator.run().await.unwrap();

    assert_eq!(source.committed(&orders(0)), Some(2));
    assert_eq!(orchestrator.metrics().snapshot().poll_failures, 2);
}

#[tokio::test(start_paused = true)]
async fn test_broker_unavailable_escalates() {
    let index = Arc::new(MockIndex::default());
    let steps = (0..10).map(|_| Step::Fail("all brokers down")).collect();
    let (mut orchestrator, source) = Pipeline::new(steps).build(index.clone());

    let error = orchestrator.run().await.unwrap_err();

    assert!(matches!(
        error,
        IngestError::Fatal(FatalPipelineError::BrokerUnavailable { attempts: 4, .. })
    ));
    assert_eq!(source.polls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_timeout_reports_uncommitted_ranges() {
    let index = Arc::new(MockIndex::with_latency(Duration::from_secs(60)));
    let mut pipeline = Pipeline::new(vec![Step::Records(vec![order(0, 1), order(0, 2)])]);
    pipeline.config.shutdown_timeout = Duration::from_secs(1);
    let (mut orchestrator, source) = pipeline.build(index.clone());

    let error = orchestrator.run().await.unwrap_err();

    match error {
        IngestError::ShutdownTimedOut { uncommitted } => {
            assert_eq!(uncommitted.len(), 1);
            assert_eq!(uncommitted[0].partition, orders(0));
            assert_eq!(uncommitted[0].range, OffsetRange { first: 1, last: 2 });
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(source.commits().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_before_first_poll_reads_nothing() {
    let index = Arc::new(MockIndex::default());
    let (mut orchestrator, source) =
        Pipeline::new(vec![Step::Records(vec![order(0, 5)]), Step::Idle, Step::Idle])
            .build(index.clone());

    orchestrator.shutdown();
    orchestrator.run().await.unwrap();

    // Cancelled before the first poll: nothing read, nothing committed.
    assert_eq!(source.polls.load(Ordering::SeqCst), 0);
    assert!(source.commits().is_empty());
    assert!(index.ids().is_empty());
}
