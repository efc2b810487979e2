use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use feed_records::{Dataset, FieldValue, PairedDataset};
use feed_replay::{partition, RecordingSink, ReplayCoordinator, ReplaySettings};
use feed_transport_stdio::JsonLinesSink;
use serde_json::Value;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("fixtures")
        .join("fraud")
        .join(name)
}

fn load_pair() -> PairedDataset {
    let mut transactions = Dataset::load(&fixture("transactions.jsonl")).expect("transactions");
    let mut labels = Dataset::load(&fixture("labels.jsonl")).expect("labels");
    transactions.normalize();
    labels.normalize();
    PairedDataset::new(transactions, labels).expect("fixtures are row-aligned")
}

#[tokio::test]
async fn fixture_pairs_stay_aligned_through_replay() {
    let datasets = load_pair();
    let sink = Arc::new(RecordingSink::default());
    let coordinator = ReplayCoordinator::new(
        ReplaySettings::new(3, Duration::ZERO),
        Arc::clone(&sink),
    )
    .unwrap();

    let report = coordinator.coordinate_at(&datasets, 1_000).await.unwrap();
    assert_eq!(report.steps, 4);
    assert_eq!(report.records, datasets.len());

    let settings = coordinator.settings();
    let transactions = sink.calls_to(&settings.destinations.transactions).await;
    let labels = sink.calls_to(&settings.destinations.labels).await;
    let expected_ranges: Vec<_> = partition(datasets.len(), 3).collect();
    assert_eq!(
        transactions.iter().map(|c| c.range.clone()).collect::<Vec<_>>(),
        expected_ranges
    );
    assert_eq!(
        labels.iter().map(|c| c.range.clone()).collect::<Vec<_>>(),
        expected_ranges
    );

    for (tx_call, label_call) in transactions.iter().zip(labels.iter()) {
        for (tx, label) in tx_call.records.iter().zip(label_call.records.iter()) {
            assert_eq!(tx.get("transactionID"), label.get("transactionID"));
        }
    }
}

#[tokio::test]
async fn shifting_applies_only_where_the_field_exists() {
    let datasets = load_pair();
    let sink = Arc::new(RecordingSink::default());
    let coordinator = ReplayCoordinator::new(
        ReplaySettings::new(100, Duration::ZERO),
        Arc::clone(&sink),
    )
    .unwrap();

    coordinator.coordinate_at(&datasets, 1_000).await.unwrap();

    let calls = sink.calls().await;
    assert_eq!(calls.len(), 2);
    for (row, record) in calls[0].records.iter().enumerate() {
        assert_eq!(
            record.get("timestamp"),
            Some(&FieldValue::Int(row as i64 * 37 + 1_000))
        );
    }
    let original_labels: Vec<_> = datasets.labels().iter().cloned().collect();
    assert_eq!(calls[1].records, original_labels);

    // Source datasets are reusable: a second session starts from the originals.
    assert_eq!(
        datasets.transactions().get(1).unwrap().get("timestamp"),
        Some(&FieldValue::Int(37))
    );
}

#[tokio::test]
async fn repeated_sessions_partition_identically() {
    let datasets = load_pair();
    let mut runs = Vec::new();
    for offset in [10, 20] {
        let sink = Arc::new(RecordingSink::default());
        let coordinator = ReplayCoordinator::new(
            ReplaySettings::new(4, Duration::ZERO),
            Arc::clone(&sink),
        )
        .unwrap();
        coordinator.coordinate_at(&datasets, offset).await.unwrap();
        let ranges: Vec<_> = sink.calls().await.into_iter().map(|c| c.range).collect();
        runs.push(ranges);
    }
    assert_eq!(runs[0], runs[1]);
}

#[tokio::test]
async fn json_lines_sink_mirrors_the_recording() {
    let datasets = load_pair().head(5);
    let sink = Arc::new(JsonLinesSink::new(Vec::new()));
    let coordinator = ReplayCoordinator::new(
        ReplaySettings::new(2, Duration::ZERO),
        Arc::clone(&sink),
    )
    .unwrap();

    coordinator.coordinate_at(&datasets, 0).await.unwrap();
    drop(coordinator);

    let sink = Arc::try_unwrap(sink).expect("sole owner");
    let output = String::from_utf8(sink.into_inner()).unwrap();
    let lines: Vec<Value> = output
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 6);
    let rows: Vec<u64> = lines
        .iter()
        .step_by(2)
        .map(|line| line["rows"].as_u64().unwrap())
        .collect();
    assert_eq!(rows, vec![2, 2, 1]);
    assert_eq!(lines[0]["records"][0]["transactionID"], "txn-1000");
    assert_eq!(lines[5]["records"][0]["transactionID"], "txn-1004");
}

#[tokio::test(start_paused = true)]
async fn full_fixture_replay_takes_steps_minus_one_delays() {
    let datasets = load_pair();
    let delay = Duration::from_millis(100);
    let sink = Arc::new(RecordingSink::default());
    let coordinator =
        ReplayCoordinator::new(ReplaySettings::new(2, delay), Arc::clone(&sink)).unwrap();

    let started = tokio::time::Instant::now();
    let report = coordinator.coordinate_at(&datasets, 0).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.steps, 5);
    assert!(elapsed >= delay * 4);
    assert!(elapsed < delay * 4 + Duration::from_millis(5));
}
