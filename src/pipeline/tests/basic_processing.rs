//! Single-site runs through the whole pipeline

use super::*;
use crate::models::RunOutcome;
use tempfile::TempDir;

fn card(temp_dir: &TempDir) -> PathBuf {
    let source = temp_dir.path().join("card");
    fs::create_dir_all(&source).unwrap();
    source
}

#[tokio::test]
async fn test_single_file_is_routed_converted_and_restored() {
    let temp_dir = TempDir::new().unwrap();
    let source = card(&temp_dir);
    write_raw(&source, "card001.dat", ALPHA_SERIAL, "2024-01-02 03:04:05", "TABLE1");
    let before = file_contents(&source);

    let converter = ScriptedConverter::new().with_output(
        "ALPHA",
        "ALPHA_TABLE1.dat",
        toa5_output("ALPHA", "TABLE1", 3),
    );
    let (coordinator, _logger) = coordinator(config_in(temp_dir.path()), converter.clone());

    let report = coordinator.run(&source).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.files_scanned, 1);
    assert_eq!(report.files_valid, 1);
    assert_eq!(report.sites, vec!["ALPHA".to_string()]);
    assert_eq!(report.files_staged, 1);
    assert!(report.fully_restored());

    let calls = converter.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].site, "ALPHA");
    assert_eq!(calls[0].staged_files, vec!["ALPHA_20240102.0304_TABLE1.dat".to_string()]);
    assert_eq!(calls[0].source_dir.parent(), Some(source.as_path()));
    assert_eq!(calls[0].target_dir, temp_dir.path().join("converted").join("ALPHA"));

    let converted = temp_dir.path().join("converted/ALPHA/ALPHA_TABLE1.dat");
    assert_eq!(report.converted_outputs, vec![converted]);

    let standardized = temp_dir
        .path()
        .join("standardized/ALPHA/TABLE1/ALPHA_TABLE1.dat");
    assert!(standardized.exists());
    assert_eq!(report.standardized_files, 1);

    assert_eq!(file_contents(&source), before);
    assert!(subdirectories(&source).is_empty());
}

#[tokio::test]
async fn test_scan_moves_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let source = card(&temp_dir);
    write_raw(&source, "card001.dat", ALPHA_SERIAL, "2024-01-02 03:04:05", "TABLE1");
    let before = file_contents(&source);

    let (coordinator, _logger) = coordinator(config_in(temp_dir.path()), ScriptedConverter::new());
    let table = coordinator.scan(&source).await.unwrap();

    assert_eq!(table.valid_count(), 1);
    let batches = table.site_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    assert_eq!(
        batches[0].records[0].destination_name(),
        Some("ALPHA_20240102.0304_TABLE1.dat")
    );

    assert_eq!(file_contents(&source), before);
    assert!(subdirectories(&source).is_empty());
}

#[tokio::test]
async fn test_wrong_format_marker_is_a_noop_run() {
    let temp_dir = TempDir::new().unwrap();
    let source = card(&temp_dir);
    let bytes = String::from_utf8_lossy(&raw_file(ALPHA_SERIAL, "2024-01-02 03:04:05", "TABLE1"))
        .replace("TOB3", "TOB1");
    fs::write(source.join("card001.dat"), bytes).unwrap();
    let before = file_contents(&source);

    let converter = ScriptedConverter::new();
    let (coordinator, logger) = coordinator(config_in(temp_dir.path()), converter.clone());
    let report = coordinator.run(&source).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::NoOp);
    assert_eq!(report.files_invalid, 1);
    assert_eq!(report.files_staged, 0);
    assert!(converter.calls().is_empty());
    assert!(!temp_dir.path().join("converted").exists());
    assert_eq!(file_contents(&source), before);
    assert!(logger.contains(tracing::Level::WARN, "Excluding"));
}

#[tokio::test]
async fn test_empty_card_is_a_noop_run() {
    let temp_dir = TempDir::new().unwrap();
    let source = card(&temp_dir);
    fs::write(source.join("notes.txt"), "not a raw file").unwrap();

    let (coordinator, _logger) = coordinator(config_in(temp_dir.path()), ScriptedConverter::new());
    let report = coordinator.run(&source).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::NoOp);
    assert_eq!(report.files_scanned, 0);
}

#[tokio::test]
async fn test_existing_outputs_are_not_picked_up_again() {
    let temp_dir = TempDir::new().unwrap();
    let source = card(&temp_dir);
    write_raw(&source, "card001.dat", ALPHA_SERIAL, "2024-01-02 03:04:05", "TABLE1");

    let destination = temp_dir.path().join("converted/ALPHA");
    fs::create_dir_all(&destination).unwrap();
    fs::write(destination.join("previous.dat"), "from an earlier card").unwrap();

    let converter = ScriptedConverter::new().with_output(
        "ALPHA",
        "ALPHA_TABLE1.dat",
        toa5_output("ALPHA", "TABLE1", 2),
    );
    let (coordinator, _logger) = coordinator(config_in(temp_dir.path()), converter);
    let report = coordinator.run(&source).await.unwrap();

    assert_eq!(
        report.converted_outputs,
        vec![destination.join("ALPHA_TABLE1.dat")]
    );
    assert_eq!(report.standardized_files, 1);
    assert_eq!(report.transform_failures, 0);
}

#[tokio::test]
async fn test_disabled_stages_are_skipped() {
    let temp_dir = TempDir::new().unwrap();
    let source = card(&temp_dir);
    write_raw(&source, "card001.dat", ALPHA_SERIAL, "2024-01-02 03:04:05", "TABLE1");

    let converter = ScriptedConverter::new().with_output(
        "ALPHA",
        "ALPHA_TABLE1.dat",
        toa5_output("ALPHA", "TABLE1", 200),
    );
    let config = config_in(temp_dir.path()).without_split().without_standardize();
    let (coordinator, _logger) = coordinator(config, converter);
    let report = coordinator.run(&source).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.converted_outputs.len(), 1);
    assert_eq!(report.split_parts, 0);
    assert_eq!(report.standardized_files, 0);
    assert!(report.converted_outputs[0].exists());
    assert!(!temp_dir.path().join("standardized").exists());
}
