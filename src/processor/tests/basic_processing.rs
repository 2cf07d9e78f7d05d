//! Basic processing integration tests

use super::*;
use crate::models::ProcessOutcome;
use crate::storage::ServerSideEncryption;
use crate::storage::memory::StoreCall;

const HEADER: &str = "row_num\tdate\ttime\tc-ip\tcs-uri-stem\tx-forwarded-for";

fn processed(outcome: ProcessOutcome) -> crate::models::ProcessingStats {
    match outcome {
        ProcessOutcome::Processed(stats) => stats,
        ProcessOutcome::Missing => panic!("Expected the object to be processed"),
    }
}

#[test]
fn test_single_date_log_is_masked() {
    let text = log_text(&[
        "2024-01-01\t00:00:01\t192.0.2.10\t/index.html\t-",
        "2024-01-01\t00:00:02\t2001:db8:85a3::8a2e:370:7334\t/about/\t203.0.113.7",
    ]);
    let (store, processor) = setup(SOURCE_KEY, &text);

    let stats = processed(processor.process_object(SOURCE_KEY).unwrap());
    assert_eq!(stats.rows_read, 2);
    assert_eq!(stats.rows_written, 2);
    assert_eq!(stats.rows_skipped, 0);
    assert_eq!(stats.outputs_committed, 1);

    let key = output_key("2024/01/01", SOURCE_KEY);
    assert_eq!(
        output_lines(&store, &key),
        vec![
            HEADER,
            "1\t2024-01-01\t00:00:01\t192.0.0.0\t/index.html\t-",
            "2\t2024-01-01\t00:00:02\t2001:db8::\t/about/\t203.0.0.0",
        ]
    );
    assert_eq!(
        store.object_encryption(&ObjectLocation::new(DESTINATION_BUCKET, &key)),
        Some(ServerSideEncryption::Aes256)
    );
}

#[test]
fn test_two_dates_produce_two_outputs() {
    let text = log_text(&[
        "2024-01-01\t23:59:58\t10.1.2.3\t/a\t-",
        "2024-01-02\t00:00:01\t10.4.5.6\t/b\t-",
        "2024-01-01\t23:59:59\t10.7.8.9\t/c\t-",
    ]);
    let (store, processor) = setup(SOURCE_KEY, &text);

    let stats = processed(processor.process_object(SOURCE_KEY).unwrap());
    assert_eq!(stats.outputs_committed, 2);
    assert_eq!(
        store.object_keys(DESTINATION_BUCKET),
        vec![
            output_key("2024/01/01", SOURCE_KEY),
            output_key("2024/01/02", SOURCE_KEY),
        ]
    );

    let first = output_lines(&store, &output_key("2024/01/01", SOURCE_KEY));
    assert_eq!(first[0], HEADER);
    assert_eq!(first[1], "1\t2024-01-01\t23:59:58\t10.0.0.0\t/a\t-");
    assert_eq!(first[2], "2\t2024-01-01\t23:59:59\t10.0.0.0\t/c\t-");

    let second = output_lines(&store, &output_key("2024/01/02", SOURCE_KEY));
    assert_eq!(second, vec![HEADER, "1\t2024-01-02\t00:00:01\t10.0.0.0\t/b\t-"]);
}

#[test]
fn test_preamble_yields_only_data_rows() {
    let text = "#Version: 1.0\n#Fields: date time c-ip\n2024-01-01\t00:00:01\t1.2.3.4\n";
    let (store, processor) = setup(SOURCE_KEY, text);

    let stats = processed(processor.process_object(SOURCE_KEY).unwrap());
    assert_eq!(stats.rows_written, 1);

    let lines = output_lines(&store, &output_key("2024/01/01", SOURCE_KEY));
    assert_eq!(lines, vec!["row_num\tdate\ttime\tc-ip", "1\t2024-01-01\t00:00:01\t1.0.0.0"]);
    assert!(lines.iter().all(|line| !line.contains("#Fields")));
}

#[test]
fn test_large_log_spans_several_parts() {
    let rows: Vec<String> = (0..2000)
        .map(|i| {
            format!(
                "2024-01-01\t00:{:02}:{:02}\t{}.{}.{}.{}\t/page/{}\t-",
                i / 60 % 60,
                i % 60,
                i % 223 + 1,
                i % 251,
                i % 241,
                i % 239,
                i
            )
        })
        .collect();
    let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
    let (store, processor) = setup(SOURCE_KEY, &log_text(&rows));

    let stats = processed(processor.process_object(SOURCE_KEY).unwrap());
    assert_eq!(stats.rows_written, 2000);
    assert!(store.upload_part_calls() > 1);

    let lines = output_lines(&store, &output_key("2024/01/01", SOURCE_KEY));
    assert_eq!(lines.len(), 2001);
    assert!(lines[2000].starts_with("2000\t2024-01-01\t"));
    assert!(lines[1..].iter().all(|line| line.split('\t').nth(3).unwrap().ends_with(".0.0.0")));
}

#[test]
fn test_concatenated_gzip_members_are_read() {
    let mut bytes = gzip(&log_text(&["2024-01-01\t00:00:01\t10.0.0.1\t/a\t-"]));
    bytes.extend(gzip("2024-01-01\t00:00:02\t11.0.0.1\t/b\t-\n"));

    let store = Arc::new(InMemoryStore::new());
    store.put_object(ObjectLocation::new(SOURCE_BUCKET, SOURCE_KEY), bytes);
    let processor = LogProcessor::new(store.clone(), config());

    let stats = processed(processor.process_object(SOURCE_KEY).unwrap());
    assert_eq!(stats.rows_written, 2);
}

#[test]
fn test_comment_lines_between_rows_are_ignored() {
    let text = log_text(&[
        "2024-01-01\t00:00:01\t10.0.0.1\t/a\t-",
        "#Version: 1.0",
        "2024-01-01\t00:00:02\t10.0.0.2\t/b\t-",
    ]);
    let (store, processor) = setup(SOURCE_KEY, &text);

    let stats = processed(processor.process_object(SOURCE_KEY).unwrap());
    assert_eq!(stats.rows_written, 2);
    assert_eq!(output_lines(&store, &output_key("2024/01/01", SOURCE_KEY)).len(), 3);
}

#[test]
fn test_reprocessing_overwrites_same_keys() {
    let text = log_text(&[
        "2024-01-01\t00:00:01\t10.0.0.1\t/a\t-",
        "2024-01-02\t00:00:01\t10.0.0.1\t/a\t-",
    ]);
    let (store, processor) = setup(SOURCE_KEY, &text);

    processor.process_object(SOURCE_KEY).unwrap();
    let first = store.object_keys(DESTINATION_BUCKET);
    processor.process_object(SOURCE_KEY).unwrap();

    assert_eq!(store.object_keys(DESTINATION_BUCKET), first);
    assert_eq!(
        output_lines(&store, &output_key("2024/01/02", SOURCE_KEY)),
        vec![HEADER, "1\t2024-01-02\t00:00:01\t10.0.0.0\t/a\t-"]
    );
}

#[test]
fn test_masking_keeps_the_source() {
    let (store, processor) = setup(SOURCE_KEY, &log_text(&["2024-01-01\t00:00:01\t10.0.0.1\t/a\t-"]));
    processor.process_object(SOURCE_KEY).unwrap();
    assert!(store
        .object(&ObjectLocation::new(SOURCE_BUCKET, SOURCE_KEY))
        .is_some());
}

#[test]
fn test_remove_source_deletes_the_original() {
    let (store, processor) = setup(SOURCE_KEY, &log_text(&["2024-01-01\t00:00:01\t10.0.0.1\t/a\t-"]));
    processor.process_object(SOURCE_KEY).unwrap();

    let removed = processor
        .remove_source(&output_key("2024/01/01", SOURCE_KEY))
        .unwrap();
    assert_eq!(removed.as_deref(), Some(SOURCE_KEY));
    assert!(store
        .object(&ObjectLocation::new(SOURCE_BUCKET, SOURCE_KEY))
        .is_none());
    assert_eq!(store.object_keys(DESTINATION_BUCKET).len(), 1);
}

#[test]
fn test_remove_source_ignores_foreign_keys() {
    let (store, processor) = setup(SOURCE_KEY, &log_text(&[]));

    for key in [
        SOURCE_KEY.to_string(),
        format!("other/2024/01/01/{SOURCE_KEY}"),
        format!("{PREFIX}2024/13/01/{SOURCE_KEY}"),
    ] {
        assert_eq!(processor.remove_source(&key).unwrap(), None);
    }
    assert_eq!(
        store.count_calls(|call| matches!(call, StoreCall::Delete(_))),
        0
    );
}
