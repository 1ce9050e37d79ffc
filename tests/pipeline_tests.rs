mod common;

use std::sync::Arc;
use std::time::Duration;

use blob_depot::storage::{
    RangeSpec, ReadError, Reconciler, RedbBackend, StorageBackend, StorageLocation, WriteError,
};
use common::{
    patterned_bytes, sample_record, test_stack, upload_bytes, FlakyBackend, TEST_CHUNK_SIZE,
    TEST_MAX_UPLOAD,
};

fn spec(start: Option<u64>, end: Option<u64>) -> Option<RangeSpec> {
    Some(RangeSpec { start, end })
}

// ============================================================================
// Write path
// ============================================================================

#[tokio::test]
async fn test_small_objects_land_in_the_blob_column() {
    let backend = FlakyBackend::new("backend-0");
    let stack = test_stack(vec![Arc::clone(&backend) as Arc<dyn StorageBackend>]);

    let data = patterned_bytes(TEST_CHUNK_SIZE - 1);
    let record = upload_bytes(&stack, "small.bin", &data).await.unwrap();

    assert_eq!(record.byte_size, data.len() as u64);
    assert_eq!(record.location, StorageLocation::Backend("backend-0".into()));
    assert!(backend.has_blob(&record.token));
    assert_eq!(backend.chunk_count(&record.token), 0);
}

#[tokio::test]
async fn test_chunk_sized_objects_go_through_the_chunk_tables() {
    let backend = FlakyBackend::new("backend-0");
    let stack = test_stack(vec![Arc::clone(&backend) as Arc<dyn StorageBackend>]);

    // Exactly one chunk: the inline shortcut applies only strictly below it.
    let data = patterned_bytes(TEST_CHUNK_SIZE);
    let record = upload_bytes(&stack, "exact.bin", &data).await.unwrap();

    assert!(!backend.has_blob(&record.token));
    assert_eq!(backend.chunk_count(&record.token), 1);
}

#[tokio::test]
async fn test_multi_chunk_roundtrip() {
    let backend = FlakyBackend::new("backend-0");
    let stack = test_stack(vec![Arc::clone(&backend) as Arc<dyn StorageBackend>]);

    let data = patterned_bytes(3000);
    let record = upload_bytes(&stack, "video.mp4", &data).await.unwrap();

    assert_eq!(record.mime_type, "video/mp4");
    assert_eq!(backend.chunk_count(&record.token), 3);

    let result = stack.reader.read(&record.token, None).await.unwrap();
    assert_eq!(result.total_size, 3000);
    assert_eq!(&result.body[..], &data[..]);
    assert!(result.range.is_none());
}

#[tokio::test]
async fn test_empty_upload_roundtrip() {
    let backend = FlakyBackend::new("backend-0");
    let stack = test_stack(vec![backend as Arc<dyn StorageBackend>]);

    let record = upload_bytes(&stack, "empty.txt", &[]).await.unwrap();
    assert_eq!(record.byte_size, 0);

    let result = stack.reader.read(&record.token, None).await.unwrap();
    assert!(result.body.is_empty());
}

#[tokio::test]
async fn test_blocked_mime_type_is_refused_before_any_bytes() {
    let stack = test_stack(vec![FlakyBackend::new("backend-0") as Arc<dyn StorageBackend>]);

    let err = stack
        .writer
        .begin(
            Some("tool.exe".to_string()),
            Some("application/x-msdownload".to_string()),
            None,
        )
        .await
        .err()
        .unwrap();
    assert!(matches!(err, WriteError::BlockedType(_)));
}

#[tokio::test]
async fn test_oversized_declared_size_is_refused_up_front() {
    let stack = test_stack(vec![FlakyBackend::new("backend-0") as Arc<dyn StorageBackend>]);

    let err = stack
        .writer
        .begin(Some("big.bin".to_string()), None, Some(TEST_MAX_UPLOAD + 1))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, WriteError::DeclaredTooLarge { .. }));
}

#[tokio::test]
async fn test_stream_exceeding_the_limit_fails_and_aborts_cleanly() {
    let backend = FlakyBackend::new("backend-0");
    let stack = test_stack(vec![Arc::clone(&backend) as Arc<dyn StorageBackend>]);

    // Lie about the size, then stream past the limit.
    let mut session = stack
        .writer
        .begin(Some("liar.bin".to_string()), None, Some(100))
        .await
        .unwrap();
    let token = session.token().to_string();

    let piece = vec![0u8; 64 * 1024];
    let mut result = Ok(());
    while result.is_ok() {
        result = session.push(&piece).await;
    }
    assert!(matches!(result, Err(WriteError::StreamTooLarge(_))));

    session.abort().await;
    assert_eq!(backend.chunk_count(&token), 0);
    assert!(stack.repo.get(&token).await.is_none());
}

#[tokio::test]
async fn test_backend_value_cap_fails_the_upload_without_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let capped = Arc::new(RedbBackend::new(
        "backend-0",
        dir.path().join("capped.redb"),
        100,
    ));
    capped.ensure_schema().await.unwrap();
    let fallback = FlakyBackend::new("backend-1");

    let stack = test_stack(vec![
        capped as Arc<dyn StorageBackend>,
        Arc::clone(&fallback) as Arc<dyn StorageBackend>,
    ]);

    let err = upload_bytes(&stack, "big.bin", &patterned_bytes(500)).await.unwrap_err();
    assert!(matches!(err, WriteError::BackendCapacity(_)));

    // Oversized payloads are refused, not redirected to the next backend.
    assert_eq!(fallback.record_count(), 0);
}

// ============================================================================
// Backend fallback and failover
// ============================================================================

#[tokio::test]
async fn test_upload_falls_through_to_the_next_backend() {
    let down = FlakyBackend::new("backend-0");
    down.set_healthy(false);
    let up = FlakyBackend::new("backend-1");

    let stack = test_stack(vec![
        Arc::clone(&down) as Arc<dyn StorageBackend>,
        Arc::clone(&up) as Arc<dyn StorageBackend>,
    ]);

    let data = patterned_bytes(3000);
    let record = upload_bytes(&stack, "file.bin", &data).await.unwrap();

    assert_eq!(record.location, StorageLocation::Backend("backend-1".into()));
    assert_eq!(up.chunk_count(&record.token), 3);
    assert_eq!(down.chunk_count(&record.token), 0);
}

#[tokio::test]
async fn test_transient_failure_recovers_via_recreate() {
    let flaky = FlakyBackend::recoverable("backend-0");
    flaky.set_healthy(false);

    let stack = test_stack(vec![Arc::clone(&flaky) as Arc<dyn StorageBackend>]);

    let record = upload_bytes(&stack, "file.bin", &patterned_bytes(100))
        .await
        .unwrap();
    assert_eq!(record.location, StorageLocation::Backend("backend-0".into()));
    assert!(flaky.has_blob(&record.token));
}

#[tokio::test]
async fn test_mid_stream_failover_replays_earlier_chunks() {
    let first = FlakyBackend::new("backend-0");
    let second = FlakyBackend::new("backend-1");
    let stack = test_stack(vec![
        Arc::clone(&first) as Arc<dyn StorageBackend>,
        Arc::clone(&second) as Arc<dyn StorageBackend>,
    ]);

    let data = patterned_bytes(3000);
    let mut session = stack
        .writer
        .begin(Some("file.bin".to_string()), None, Some(3000))
        .await
        .unwrap();

    session.push(&data[..700]).await.unwrap();
    session.push(&data[700..1400]).await.unwrap();
    assert_eq!(first.chunk_count(session.token()), 1);

    // The first backend dies after accepting chunk 0.
    first.set_healthy(false);

    session.push(&data[1400..2100]).await.unwrap();
    session.push(&data[2100..2800]).await.unwrap();
    session.push(&data[2800..]).await.unwrap();
    let record = session.finish().await.unwrap();

    // The complete sequence lives on the second backend.
    assert_eq!(record.location, StorageLocation::Backend("backend-1".into()));
    assert_eq!(second.chunk_count(&record.token), 3);

    let result = stack.reader.read(&record.token, None).await.unwrap();
    assert_eq!(&result.body[..], &data[..]);

    // The dead backend kept an orphaned partial sequence it could not clean
    // up. Once it comes back, its size-mismatched chunks must be skipped in
    // favor of the complete copy.
    first.set_healthy(true);
    assert_eq!(first.chunk_count(&record.token), 1);

    let result = stack.reader.read(&record.token, None).await.unwrap();
    assert_eq!(result.total_size, 3000);
    assert_eq!(&result.body[..], &data[..]);
}

#[tokio::test]
async fn test_stale_schema_is_repaired_once_mid_write() {
    let backend = FlakyBackend::without_schema("backend-0");
    let stack = test_stack(vec![Arc::clone(&backend) as Arc<dyn StorageBackend>]);

    let data = patterned_bytes(100);
    let record = upload_bytes(&stack, "file.bin", &data).await.unwrap();

    assert_eq!(record.location, StorageLocation::Backend("backend-0".into()));
    assert!(backend.has_blob(&record.token));
    // One reactive repair covered the whole upload; the metadata write that
    // followed found the schema already in place.
    assert_eq!(backend.ensure_schema_calls(), 1);
}

// ============================================================================
// Range reads
// ============================================================================

#[tokio::test]
async fn test_range_reads_across_chunk_boundaries() {
    let backend = FlakyBackend::new("backend-0");
    let stack = test_stack(vec![backend as Arc<dyn StorageBackend>]);

    let data = patterned_bytes(3000);
    let record = upload_bytes(&stack, "file.bin", &data).await.unwrap();

    // Window straddling the first chunk boundary (1024).
    let result = stack
        .reader
        .read(&record.token, spec(Some(1000), Some(1100)))
        .await
        .unwrap();
    assert_eq!(result.range, Some((1000, 1100)));
    assert_eq!(result.total_size, 3000);
    assert_eq!(&result.body[..], &data[1000..=1100]);

    // Window straddling the second boundary (2048).
    let result = stack
        .reader
        .read(&record.token, spec(Some(2000), Some(2500)))
        .await
        .unwrap();
    assert_eq!(&result.body[..], &data[2000..=2500]);

    // Entirely inside one chunk.
    let result = stack
        .reader
        .read(&record.token, spec(Some(10), Some(19)))
        .await
        .unwrap();
    assert_eq!(&result.body[..], &data[10..=19]);
}

#[tokio::test]
async fn test_open_ended_and_suffix_ranges() {
    let backend = FlakyBackend::new("backend-0");
    let stack = test_stack(vec![backend as Arc<dyn StorageBackend>]);

    let data = patterned_bytes(3000);
    let record = upload_bytes(&stack, "file.bin", &data).await.unwrap();

    let result = stack
        .reader
        .read(&record.token, spec(Some(2900), None))
        .await
        .unwrap();
    assert_eq!(result.range, Some((2900, 2999)));
    assert_eq!(&result.body[..], &data[2900..]);

    let result = stack
        .reader
        .read(&record.token, spec(None, Some(500)))
        .await
        .unwrap();
    assert_eq!(result.range, Some((2500, 2999)));
    assert_eq!(&result.body[..], &data[2500..]);
}

#[tokio::test]
async fn test_unsatisfiable_range_carries_the_true_size() {
    let backend = FlakyBackend::new("backend-0");
    let stack = test_stack(vec![backend as Arc<dyn StorageBackend>]);

    let record = upload_bytes(&stack, "file.bin", &patterned_bytes(3000))
        .await
        .unwrap();

    let err = stack
        .reader
        .read(&record.token, spec(Some(3000), None))
        .await
        .unwrap_err();
    assert!(matches!(err, ReadError::Unsatisfiable { total: 3000 }));

    let err = stack
        .reader
        .read(&record.token, spec(Some(0), Some(3000)))
        .await
        .unwrap_err();
    assert!(matches!(err, ReadError::Unsatisfiable { total: 3000 }));

    // A suffix longer than the object is rejected, not clamped.
    let err = stack
        .reader
        .read(&record.token, spec(None, Some(3001)))
        .await
        .unwrap_err();
    assert!(matches!(err, ReadError::Unsatisfiable { total: 3000 }));
}

#[tokio::test]
async fn test_range_reads_on_inline_blobs() {
    let backend = FlakyBackend::new("backend-0");
    let stack = test_stack(vec![backend as Arc<dyn StorageBackend>]);

    let data = patterned_bytes(600);
    let record = upload_bytes(&stack, "small.bin", &data).await.unwrap();

    let result = stack
        .reader
        .read(&record.token, spec(Some(100), Some(199)))
        .await
        .unwrap();
    assert_eq!(result.range, Some((100, 199)));
    assert_eq!(result.total_size, 600);
    assert_eq!(&result.body[..], &data[100..=199]);
}

// ============================================================================
// Not-found vs gone
// ============================================================================

#[tokio::test]
async fn test_unknown_token_is_not_found() {
    let stack = test_stack(vec![FlakyBackend::new("backend-0") as Arc<dyn StorageBackend>]);

    let err = stack.reader.read("NOSUCH00", None).await.unwrap_err();
    assert!(matches!(err, ReadError::NotFound));
}

#[tokio::test]
async fn test_metadata_without_bytes_is_gone() {
    let stack = test_stack(vec![FlakyBackend::new("backend-0") as Arc<dyn StorageBackend>]);

    // Metadata exists, but no tier holds the payload.
    stack.repo.upsert(sample_record("ABCD1234")).await.unwrap();

    let err = stack.reader.read("ABCD1234", None).await.unwrap_err();
    assert!(matches!(err, ReadError::Gone));
}

#[tokio::test]
async fn test_transient_outage_is_a_read_failure_not_gone() {
    let backend = FlakyBackend::new("backend-0");
    let stack = test_stack(vec![Arc::clone(&backend) as Arc<dyn StorageBackend>]);

    let data = patterned_bytes(3000);
    let record = upload_bytes(&stack, "file.bin", &data).await.unwrap();

    // The object is durably stored; the backend is merely unreachable. That
    // must surface as a failed read, never as a permanently-lost object.
    backend.set_healthy(false);
    let err = stack.reader.read(&record.token, None).await.unwrap_err();
    assert!(matches!(err, ReadError::Storage(_)));

    backend.set_healthy(true);
    let result = stack.reader.read(&record.token, None).await.unwrap();
    assert_eq!(&result.body[..], &data[..]);
}

#[tokio::test]
async fn test_reads_recover_through_recreate() {
    let flaky = FlakyBackend::recoverable("backend-0");
    let stack = test_stack(vec![Arc::clone(&flaky) as Arc<dyn StorageBackend>]);

    let data = patterned_bytes(3000);
    let record = upload_bytes(&stack, "file.bin", &data).await.unwrap();

    // A transient failure on the read path gets the same one-shot recreate
    // retry as a write, so the read still succeeds.
    flaky.set_healthy(false);
    let result = stack.reader.read(&record.token, None).await.unwrap();
    assert_eq!(&result.body[..], &data[..]);
}

// ============================================================================
// Pending tier and reconciliation
// ============================================================================

#[tokio::test]
async fn test_total_backend_failure_spills_to_pending() {
    let down = FlakyBackend::new("backend-0");
    down.set_healthy(false);
    let stack = test_stack(vec![Arc::clone(&down) as Arc<dyn StorageBackend>]);

    let data = patterned_bytes(3000);
    let record = upload_bytes(&stack, "file.bin", &data).await.unwrap();

    assert_eq!(record.location, StorageLocation::Pending);
    assert!(stack.pending.exists(&record.token).await.unwrap());

    // Staged objects are fully readable, ranges included.
    let result = stack.reader.read(&record.token, None).await.unwrap();
    assert_eq!(&result.body[..], &data[..]);

    let result = stack
        .reader
        .read(&record.token, spec(Some(1000), Some(1100)))
        .await
        .unwrap();
    assert_eq!(&result.body[..], &data[1000..=1100]);
}

#[tokio::test]
async fn test_staged_objects_survive_a_cold_cache() {
    let down = FlakyBackend::new("backend-0");
    down.set_healthy(false);
    let stack = test_stack(vec![down as Arc<dyn StorageBackend>]);

    let data = patterned_bytes(100);
    let record = upload_bytes(&stack, "file.bin", &data).await.unwrap();

    // Simulate a restart that lost the cache: backends held no metadata, so
    // the sidecar is the only copy of the record.
    stack.repo.load_all().await;
    assert!(stack.repo.get(&record.token).await.is_none());

    let result = stack.reader.read(&record.token, None).await.unwrap();
    assert_eq!(&result.body[..], &data[..]);
    assert_eq!(result.record.token, record.token);
}

#[tokio::test]
async fn test_reconciliation_moves_staged_objects_into_a_backend() {
    let backend = FlakyBackend::new("backend-0");
    backend.set_healthy(false);
    let stack = test_stack(vec![Arc::clone(&backend) as Arc<dyn StorageBackend>]);

    let data = patterned_bytes(3000);
    let record = upload_bytes(&stack, "file.bin", &data).await.unwrap();
    assert_eq!(record.location, StorageLocation::Pending);

    let reconciler = Reconciler::new(
        Arc::clone(&stack.pending),
        Arc::clone(&stack.writer),
        Arc::clone(&stack.repo),
        Duration::from_secs(60),
    );

    // While the backend is still down the pass changes nothing.
    let stats = reconciler.run_once().await;
    assert_eq!(stats.attempted, 1);
    assert_eq!(stats.replayed, 0);
    assert!(stack.pending.exists(&record.token).await.unwrap());

    backend.set_healthy(true);

    let stats = reconciler.run_once().await;
    assert_eq!(stats.attempted, 1);
    assert_eq!(stats.replayed, 1);

    // The object moved: chunks in the backend, nothing staged, metadata
    // pointing at the new home.
    assert!(!stack.pending.exists(&record.token).await.unwrap());
    assert_eq!(backend.chunk_count(&record.token), 3);
    let cached = stack.repo.get(&record.token).await.unwrap();
    assert_eq!(cached.location, StorageLocation::Backend("backend-0".into()));

    let result = stack.reader.read(&record.token, None).await.unwrap();
    assert_eq!(&result.body[..], &data[..]);

    // A second pass finds nothing to do.
    let stats = reconciler.run_once().await;
    assert_eq!(stats.attempted, 0);
}

#[tokio::test]
async fn test_oversized_staged_payloads_are_quarantined_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let capped = Arc::new(RedbBackend::new(
        "backend-0",
        dir.path().join("capped.redb"),
        100,
    ));
    capped.ensure_schema().await.unwrap();
    let stack = test_stack(vec![capped as Arc<dyn StorageBackend>]);

    // A pair staged before the backend's value cap shrank below its size.
    let mut record = sample_record("ABCD1234");
    record.location = StorageLocation::Pending;
    record.byte_size = 500;
    stack
        .pending
        .stage(&record, &patterned_bytes(500))
        .await
        .unwrap();

    let reconciler = Reconciler::new(
        Arc::clone(&stack.pending),
        Arc::clone(&stack.writer),
        Arc::clone(&stack.repo),
        Duration::from_secs(60),
    );

    let stats = reconciler.run_once().await;
    assert_eq!(stats.attempted, 1);
    assert_eq!(stats.replayed, 0);
    assert_eq!(stats.quarantined, 1);

    // Out of the queue for good, but both files stay on disk for an
    // operator to inspect.
    assert!(!stack.pending.exists("ABCD1234").await.unwrap());
    let stats = reconciler.run_once().await;
    assert_eq!(stats.attempted, 0);
    let kept = std::fs::read_dir(stack.pending.dir()).unwrap().count();
    assert_eq!(kept, 2);
}
