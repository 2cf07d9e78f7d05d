//! Concurrent batch processing tests

use super::*;
use crate::models::BatchSummary;

fn store_with_logs(logs: &[(&str, String)]) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    for (key, text) in logs {
        store.put_object(ObjectLocation::new(SOURCE_BUCKET, *key), gzip(text));
    }
    store
}

fn keys(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|key| key.to_string()).collect()
}

#[tokio::test]
async fn test_batch_counts_each_outcome() {
    let store = store_with_logs(&[
        ("a.gz", log_text(&["2024-01-01\t00:00:01\t10.0.0.1\t/a\t-"])),
        (
            "b.gz",
            log_text(&[
                "2024-01-01\t00:00:01\t10.0.0.1\t/a\t-",
                "2024-01-02\t00:00:01\t10.0.0.1\t/a\t-",
                "bad-date\t00:00:01\t10.0.0.1\t/a\t-",
            ]),
        ),
        ("d.gz", log_text(&["2024-01-01\t00:00:01\tbogus\t/a\t-"])),
    ]);
    let processor = Arc::new(LogProcessor::new(store.clone(), config()));

    let summary = processor
        .process_objects(keys(&["a.gz", "b.gz", "c.gz", "d.gz"]))
        .await;

    assert_eq!(
        summary,
        BatchSummary {
            objects_processed: 2,
            objects_missing: 1,
            objects_failed: 1,
            rows_written: 3,
            rows_skipped: 1,
        }
    );
    assert!(summary.has_failures());
    assert_eq!(
        store.object_keys(DESTINATION_BUCKET),
        vec![
            output_key("2024/01/01", "a.gz"),
            output_key("2024/01/01", "b.gz"),
            output_key("2024/01/02", "b.gz"),
        ]
    );
}

#[tokio::test]
async fn test_sequential_batch_matches_concurrent_output() {
    let logs: Vec<(String, String)> = (0..6)
        .map(|i| {
            (
                format!("E2ABC.2024-01-0{}-00.gz", i + 1),
                log_text(&[&format!("2024-01-0{}\t00:00:01\t10.0.0.{}\t/p\t-", i + 1, i)]),
            )
        })
        .collect();
    let logs: Vec<(&str, String)> = logs
        .iter()
        .map(|(key, text)| (key.as_str(), text.clone()))
        .collect();
    let all_keys: Vec<String> = logs.iter().map(|(key, _)| key.to_string()).collect();

    let sequential = store_with_logs(&logs);
    let processor = Arc::new(LogProcessor::new(
        sequential.clone(),
        config().with_max_concurrent_objects(1),
    ));
    let summary = processor.process_objects(all_keys.clone()).await;
    assert_eq!(summary.objects_processed, 6);

    let concurrent = store_with_logs(&logs);
    let processor = Arc::new(LogProcessor::new(
        concurrent.clone(),
        config().with_max_concurrent_objects(4),
    ));
    let summary = processor.process_objects(all_keys).await;
    assert_eq!(summary.objects_processed, 6);

    let outputs = sequential.object_keys(DESTINATION_BUCKET);
    assert_eq!(outputs.len(), 6);
    assert_eq!(concurrent.object_keys(DESTINATION_BUCKET), outputs);
    for key in &outputs {
        assert_eq!(output_lines(&sequential, key), output_lines(&concurrent, key));
    }
}

#[tokio::test]
async fn test_empty_batch() {
    let processor = Arc::new(LogProcessor::new(Arc::new(InMemoryStore::new()), config()));
    let summary = processor.process_objects(Vec::new()).await;
    assert_eq!(summary, BatchSummary::default());
    assert!(!summary.has_failures());
}

#[tokio::test]
async fn test_remove_sources_batch() {
    let store = store_with_logs(&[
        ("a.gz", log_text(&[])),
        ("b.gz", log_text(&[])),
    ]);
    let processor = Arc::new(LogProcessor::new(store.clone(), config()));

    let summary = processor
        .remove_sources(vec![
            output_key("2024/01/01", "a.gz"),
            output_key("2024/01/02", "b.gz"),
            "not-a-masked-key.gz".to_string(),
        ])
        .await;

    assert_eq!(summary.objects_processed, 2);
    assert_eq!(summary.objects_missing, 1);
    assert_eq!(summary.objects_failed, 0);
    assert!(store.object_keys(SOURCE_BUCKET).is_empty());
}
