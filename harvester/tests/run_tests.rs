mod common;

use common::*;
use harvester::sheets::OutputSheet;
use harvester::{
    CheckpointStatus, CheckpointStore, HarvestError, NavState, Orchestrator, PortalSession, Tab,
};
use std::sync::Arc;

fn healthy_instrument() -> FakeInstrument {
    FakeInstrument::empty()
        .with_tab(
            Tab::Adjustments,
            vec![vec![
                adjustment_row("1/2023", "Aprovado"),
                adjustment_row("2/2023", "Em análise"),
            ]],
        )
        .with_tab(
            Tab::AdjustmentTerm,
            vec![vec![
                term_row("15/06/2023", "Deferido"),
                term_row("02/01/2024", "Em análise"),
            ]],
        )
        .with_tab(Tab::Attachments, vec![vec![attachment_row("10/01/2024")]])
        .with_tab(
            Tab::Clarifications,
            vec![vec![clarification_row("Respondido")]],
        )
}

fn orchestrator(dir: &std::path::Path, portal: &Arc<FakePortal>) -> Orchestrator {
    let session: Arc<dyn PortalSession> = portal.clone();
    Orchestrator::new(config(dir), session).unwrap()
}

#[tokio::test]
async fn test_full_run_extracts_every_tab() {
    let dir = tempfile::tempdir().unwrap();
    let portal = FakePortal::new()
        .with_instrument("900123", healthy_instrument())
        .into_session();

    let summary = orchestrator(dir.path(), &portal)
        .run(&records(&["900123"]))
        .await
        .unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.succeeded, 1);

    let rows = output_rows(&dir.path().join("output.csv"));
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row["Instrument"], "900123");
    assert_eq!(row["Adjustment No."], "2/2023");
    assert_eq!(row["Adjustment Status"], "Em análise");
    assert_eq!(row["Latest Term Request"], "02/01/2024");
    assert_eq!(row["Latest Term Status"], "Em análise");
    assert_eq!(row["Latest Attachment Upload"], "10/01/2024");
    assert_eq!(row["Pending Clarification"], "no");
    assert_eq!(row["Status"], "success");
    assert_eq!(row["Técnico"], "tech-900123");
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let portal = FakePortal::new()
        .with_instrument("1", healthy_instrument())
        .with_instrument("2", healthy_instrument())
        .into_session();
    let input = records(&["1", "2"]);

    orchestrator(dir.path(), &portal).run(&input).await.unwrap();
    assert_eq!(portal.visits(), vec!["1", "2"]);

    let summary = orchestrator(dir.path(), &portal).run(&input).await.unwrap();
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.skipped, 2);
    assert_eq!(portal.visits().len(), 2);
    assert_eq!(output_rows(&dir.path().join("output.csv")).len(), 2);
}

#[tokio::test]
async fn test_resume_skips_done_and_retries_failed() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = CheckpointStore::new(dir.path().join("checkpoint.json"));
    store
        .record_attempt("A", CheckpointStatus::Done, None)
        .unwrap();
    store
        .record_attempt("B", CheckpointStatus::Failed, Some("timeout".into()))
        .unwrap();

    let portal = FakePortal::new()
        .with_instrument("A", healthy_instrument())
        .with_instrument("B", healthy_instrument())
        .with_instrument("C", healthy_instrument())
        .into_session();
    let mut run = orchestrator(dir.path(), &portal);
    let summary = run.run(&records(&["A", "B", "C"])).await.unwrap();

    assert_eq!(portal.visits(), vec!["B", "C"]);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.processed, 2);

    let store = CheckpointStore::open(dir.path().join("checkpoint.json")).unwrap();
    for id in ["A", "B", "C"] {
        assert!(store.is_done(id), "{id} should be done");
    }
    assert_eq!(store.get("B").unwrap().attempts, 2);
}

#[tokio::test]
async fn test_attachment_max_spans_pages() {
    let dir = tempfile::tempdir().unwrap();
    let instrument = healthy_instrument().with_tab(
        Tab::Attachments,
        vec![
            vec![attachment_row("10/01/2024"), attachment_row("01/02/2024")],
            vec![attachment_row("05/03/2024"), attachment_row("sem data")],
        ],
    );
    let portal = FakePortal::new()
        .with_instrument("77", instrument)
        .into_session();

    orchestrator(dir.path(), &portal)
        .run(&records(&["77"]))
        .await
        .unwrap();

    let rows = output_rows(&dir.path().join("output.csv"));
    assert_eq!(rows[0]["Latest Attachment Upload"], "05/03/2024");
    assert_eq!(rows[0]["Status"], "success");
}

#[tokio::test]
async fn test_not_found_is_recorded_without_output_row() {
    let dir = tempfile::tempdir().unwrap();
    let portal = FakePortal::new().into_session();

    let mut run = orchestrator(dir.path(), &portal);
    let summary = run.run(&records(&["404"])).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(run.navigator().state(), NavState::Skipped);
    assert!(run.navigator().history().contains(&NavState::NotFound));

    let entry = run.checkpoint().get("404").unwrap();
    assert_eq!(entry.status, CheckpointStatus::Failed);
    assert_eq!(entry.detail.as_deref(), Some("not found"));
    assert!(output_rows(&dir.path().join("output.csv")).is_empty());
}

#[tokio::test]
async fn test_tab_failures_give_partial_and_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut broken = FakeInstrument::empty();
    for tab in Tab::SEQUENCE {
        broken = broken.without_control(tab);
    }
    let portal = FakePortal::new()
        .with_instrument(
            "P",
            healthy_instrument().without_control(Tab::Clarifications),
        )
        .with_instrument("E", broken)
        .into_session();
    let mut cfg = config(dir.path());
    cfg.retry_passes = 0;
    let session: Arc<dyn PortalSession> = portal.clone();
    let mut run = Orchestrator::new(cfg, session).unwrap();

    let summary = run.run(&records(&["P", "E"])).await.unwrap();
    assert_eq!(summary.partial, 1);
    assert_eq!(summary.failed, 1);

    let rows = output_rows(&dir.path().join("output.csv"));
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["Status"], "partial");
    assert!(rows[0]["Detail"].contains("Clarifications"));
    assert_eq!(rows[0]["Pending Clarification"], "");
    assert_eq!(rows[1]["Status"], "error");

    assert!(run.checkpoint().is_done("P"));
    assert_eq!(
        run.checkpoint().get("E").unwrap().status,
        CheckpointStatus::Failed
    );

    let report = Orchestrator::validate_output(
        &OutputSheet::new(dir.path().join("output.csv")),
        &records(&["P", "E", "Z"]),
    )
    .unwrap();
    assert_eq!(report.expected, 3);
    assert_eq!(report.missing, vec!["Z"]);
    assert_eq!(report.error_only, vec!["E"]);
}

#[tokio::test]
async fn test_session_failure_stops_run_and_keeps_state() {
    let dir = tempfile::tempdir().unwrap();
    let crashing = FakePortal::new()
        .with_instrument("A", healthy_instrument())
        .with_instrument("B", healthy_instrument())
        .with_instrument("C", healthy_instrument())
        .crash_on("B")
        .into_session();
    let input = records(&["A", "B", "C"]);

    let err = orchestrator(dir.path(), &crashing)
        .run(&input)
        .await
        .unwrap_err();
    assert!(matches!(err, HarvestError::SessionFailure(_)));
    assert_eq!(crashing.visits(), vec!["A"]);

    let store = CheckpointStore::open(dir.path().join("checkpoint.json")).unwrap();
    assert!(store.is_done("A"));
    assert!(store.get("B").is_none());
    assert_eq!(output_rows(&dir.path().join("output.csv")).len(), 1);

    let healthy = FakePortal::new()
        .with_instrument("A", healthy_instrument())
        .with_instrument("B", healthy_instrument())
        .with_instrument("C", healthy_instrument())
        .into_session();
    orchestrator(dir.path(), &healthy).run(&input).await.unwrap();
    assert_eq!(healthy.visits(), vec!["B", "C"]);
    assert_eq!(output_rows(&dir.path().join("output.csv")).len(), 3);
}

#[tokio::test]
async fn test_duplicate_input_rows_processed_once() {
    let dir = tempfile::tempdir().unwrap();
    let portal = FakePortal::new()
        .with_instrument("5", healthy_instrument())
        .into_session();

    let summary = orchestrator(dir.path(), &portal)
        .run(&records(&["5", "5"]))
        .await
        .unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(portal.visits(), vec!["5"]);
}

#[tokio::test]
async fn test_unwritable_output_leaves_checkpoint_untouched() {
    let dir = tempfile::tempdir().unwrap();
    // a directory where the sheet should be
    std::fs::create_dir(dir.path().join("output.csv")).unwrap();
    let portal = FakePortal::new()
        .with_instrument("1", healthy_instrument())
        .into_session();

    let mut run = orchestrator(dir.path(), &portal);
    assert!(run.run(&records(&["1"])).await.is_err());
    assert!(!run.checkpoint().is_done("1"));
}

#[tokio::test]
async fn test_batched_flush_marks_done_after_write() {
    let dir = tempfile::tempdir().unwrap();
    let portal = FakePortal::new()
        .with_instrument("1", healthy_instrument())
        .with_instrument("2", healthy_instrument())
        .with_instrument("3", healthy_instrument())
        .into_session();
    let mut cfg = config(dir.path());
    cfg.flush_every = 2;
    let session: Arc<dyn PortalSession> = portal.clone();
    let mut run = Orchestrator::new(cfg, session).unwrap();

    let summary = run.run(&records(&["1", "2", "3"])).await.unwrap();
    assert_eq!(summary.succeeded, 3);
    assert_eq!(output_rows(&dir.path().join("output.csv")).len(), 3);
    assert_eq!(run.checkpoint().summary().done, 3);
}

#[tokio::test]
async fn test_unwritable_checkpoint_stops_run() {
    let dir = tempfile::tempdir().unwrap();
    let portal = FakePortal::new()
        .with_instrument("1", healthy_instrument())
        .with_instrument("2", healthy_instrument())
        .into_session();
    let mut run = orchestrator(dir.path(), &portal);
    // the store was opened fresh; every later write now fails
    std::fs::create_dir(dir.path().join("checkpoint.json")).unwrap();

    let err = run.run(&records(&["1", "2"])).await.unwrap_err();
    assert!(matches!(err, HarvestError::Checkpoint(_)));
    assert_eq!(portal.visits(), vec!["1"]);
    // the row went out before the mark failed, so a resume repeats it at worst
    assert_eq!(output_rows(&dir.path().join("output.csv")).len(), 1);
    assert!(dir.path().join("checkpoint.json").is_dir());
}
