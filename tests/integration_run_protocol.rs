//! Integration tests for the AG-UI event stream of a research run
//!
//! Runs are driven end to end through `ResearchService` with scripted
//! collaborators. State events are replayed with an independent RFC 6902
//! implementation to check what a client would reconstruct.

mod common;

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use ag_ui_research_agent::error::CollaboratorError;
use ag_ui_research_agent::protocol::Event;
use ag_ui_research_agent::run::{ResearchService, RunRequest, RunSummary};
use ag_ui_research_agent::state::ReportSection;

use common::*;

const CLIMATE_REPORT: [&str; 5] = [
    "# Climate Change Adaptation\n\n",
    "## Executive Summary\n\nCoastal cities are raising defenses.\n\n",
    "## Key Findings\n\n- Heat plans save lives\n- Wetlands buffer storms\n\n",
    "## Analysis\n\nAdaptation spending lags mitigation.\n\n",
    "## Sources\n\n1. Source 1\n2. Source 2\n3. Source 3\n",
];

fn climate_service() -> ResearchService {
    service(
        ScriptedSearch::returning(sources(3)),
        ScriptedReport::new().section(ReportSection::Outline, &CLIMATE_REPORT),
        settings(),
    )
}

fn progress(state: &Value) -> f64 {
    state["processing"]["progress"].as_f64().unwrap()
}

/// Test the happy path produces exactly the expected stream
#[tokio::test]
async fn test_climate_change_run_streams_full_protocol() {
    let handle = climate_service().start_run(
        RunRequest::new("climate change adaptation"),
        CancellationToken::new(),
    );
    let task = handle.task;
    let events = collect(handle.events).await;
    assert_eq!(task.await.unwrap(), RunSummary::Completed);

    assert_eq!(events.first().unwrap().event_type(), "RUN_STARTED");
    assert_eq!(events[1].event_type(), "STATE_SNAPSHOT");
    assert_eq!(count(&events, "STATE_SNAPSHOT"), 1);
    assert!(count(&events, "STATE_DELTA") >= 4);
    assert_eq!(count(&events, "TEXT_MESSAGE_START"), 1);
    assert_eq!(count(&events, "TEXT_MESSAGE_CONTENT"), 5);
    assert_eq!(count(&events, "TEXT_MESSAGE_END"), 1);
    assert_eq!(count(&events, "RUN_ERROR"), 0);

    let last = events.last().unwrap();
    assert_eq!(last.event_type(), "RUN_FINISHED");
    assert_eq!(last.outcome(), Some("completed"));

    // text follows every state event
    let first_text = types(&events)
        .iter()
        .position(|t| *t == "TEXT_MESSAGE_START")
        .unwrap();
    assert!(events[first_text..]
        .iter()
        .all(|e| !matches!(e, Event::StateDelta { .. } | Event::StateSnapshot { .. })));

    let states = fold_states(&events);
    let final_state = states.last().unwrap();
    assert_eq!(final_state["status"]["phase"], "completed");
    assert_eq!(final_state["research"]["stage"], "report_complete");
    assert_eq!(final_state["research"]["sources_found"], 3);
    assert_eq!(final_state["processing"]["completed"], true);
    assert_eq!(progress(final_state), 1.0);
    assert_eq!(
        final_state["processing"]["report"].as_str().unwrap(),
        report_text(&events)
    );
    assert_eq!(report_text(&events), CLIMATE_REPORT.concat());
}

/// Test sources_found matches the source list once sources are organized
#[tokio::test]
async fn test_sources_found_tracks_sources() {
    let handle = climate_service().start_run(
        RunRequest::new("climate change adaptation"),
        CancellationToken::new(),
    );
    let events = collect(handle.events).await;
    let states = fold_states(&events);

    let first_with_sources = states
        .iter()
        .position(|s| s["research"]["sources_found"] == 3)
        .expect("sources were published");
    assert_eq!(
        states[first_with_sources]["research"]["stage"],
        "organizing_data"
    );

    for state in &states {
        let listed = state["research"]["sources"].as_array().unwrap().len();
        assert_eq!(state["research"]["sources_found"], listed);
    }
    assert!(states[first_with_sources..]
        .iter()
        .all(|s| s["research"]["sources_found"] == 3));
}

/// Test phases are visited in pipeline order without skips
#[tokio::test]
async fn test_phase_sequence_and_monotonic_progress() {
    let handle = service(
        ScriptedSearch::returning(sources(2)),
        ScriptedReport::every_section(),
        settings(),
    )
    .start_run(RunRequest::new("rust async runtimes"), CancellationToken::new());
    let events = collect(handle.events).await;
    let states = fold_states(&events);

    let mut phases: Vec<String> = Vec::new();
    for state in &states {
        let phase = state["status"]["phase"].as_str().unwrap().to_string();
        if phases.last() != Some(&phase) {
            phases.push(phase);
        }
    }
    assert_eq!(
        phases,
        vec![
            "idle",
            "initialized",
            "gathering_information",
            "analyzing_information",
            "generating_report",
            "completed",
        ]
    );

    let stages: Vec<&str> = states
        .iter()
        .filter(|s| s["status"]["phase"] == "generating_report")
        .map(|s| s["research"]["stage"].as_str().unwrap())
        .collect();
    assert_eq!(
        stages,
        vec![
            "creating_detailed_report",
            "outlining_report",
            "drafting_executive_summary",
            "writing_introduction",
            "compiling_key_findings",
            "developing_analysis",
            "forming_conclusions",
            "finalizing_report",
        ]
    );

    let schedule: Vec<f64> = states.iter().map(progress).collect();
    assert!(schedule.windows(2).all(|w| w[0] <= w[1]), "{schedule:?}");
    assert!(schedule[..schedule.len() - 1].iter().all(|p| *p < 1.0));
    assert_eq!(*schedule.last().unwrap(), 1.0);
}

/// Test an empty query is rejected before any state is emitted
#[tokio::test]
async fn test_empty_query_is_rejected_before_start() {
    let handle = climate_service().start_run(RunRequest::new("   "), CancellationToken::new());
    let task = handle.task;
    let events = collect(handle.events).await;

    assert_eq!(types(&events), vec!["RUN_ERROR"]);
    match &events[0] {
        Event::RunError { code, message } => {
            assert_eq!(code.as_deref(), Some("VALIDATION_ERROR"));
            assert!(message.contains("query"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(matches!(task.await.unwrap(), RunSummary::Rejected { .. }));
}

/// Test a slow search ends the run with a transient error and no report
#[tokio::test]
async fn test_search_timeout_is_transient_failure() {
    let mut run_settings = settings();
    run_settings.driver.search_timeout = Duration::from_millis(20);
    let handle = service(
        ScriptedSearch::returning(sources(3)).with_delay(Duration::from_secs(5)),
        ScriptedReport::every_section(),
        run_settings,
    )
    .start_run(RunRequest::new("climate change adaptation"), CancellationToken::new());
    let task = handle.task;
    let events = collect(handle.events).await;

    match events.last().unwrap() {
        Event::RunError { code, message } => {
            assert_eq!(code.as_deref(), Some("SEARCH_FAILED_TRANSIENT"));
            assert!(message.contains("timed out"));
        }
        other => panic!("unexpected terminal event {other:?}"),
    }
    assert!(matches!(task.await.unwrap(), RunSummary::Failed { .. }));
    assert_eq!(count(&events, "TEXT_MESSAGE_START"), 0);
    assert_eq!(count(&events, "TEXT_MESSAGE_CONTENT"), 0);

    let final_state = fold_states(&events).pop().unwrap();
    assert!(final_state["processing"]["report"].is_null());
    assert!(final_state["status"]["error"].is_string());
    assert_eq!(final_state["status"]["phase"], "gathering_information");
    assert_eq!(final_state["processing"]["inProgress"], false);
}

/// Test a search with nothing usable is a permanent failure
#[tokio::test]
async fn test_empty_search_results_fail_permanently() {
    let handle = service(
        ScriptedSearch::returning(Vec::new()),
        ScriptedReport::every_section(),
        settings(),
    )
    .start_run(RunRequest::new("an obscure topic"), CancellationToken::new());
    let events = collect(handle.events).await;

    match events.last().unwrap() {
        Event::RunError { code, message } => {
            assert_eq!(code.as_deref(), Some("SEARCH_FAILED_PERMANENT"));
            assert!(message.contains("no relevant research results were found"));
        }
        other => panic!("unexpected terminal event {other:?}"),
    }
    let final_state = fold_states(&events).pop().unwrap();
    assert_eq!(final_state["research"]["sources_found"], 0);
    assert_eq!(final_state["processing"]["completed"], false);
}

/// Test a collaborator error from search is surfaced with its kind
#[tokio::test]
async fn test_search_failure_is_surfaced() {
    let handle = service(
        ScriptedSearch::failing(CollaboratorError::search_permanent("API key rejected")),
        ScriptedReport::every_section(),
        settings(),
    )
    .start_run(RunRequest::new("climate"), CancellationToken::new());
    let events = collect(handle.events).await;

    assert_eq!(count(&events, "RUN_FINISHED"), 0);
    match events.last().unwrap() {
        Event::RunError { code, message } => {
            assert_eq!(code.as_deref(), Some("SEARCH_FAILED_PERMANENT"));
            assert!(message.contains("API key rejected"));
        }
        other => panic!("unexpected terminal event {other:?}"),
    }
}

/// Test every section coming back empty fails the run
#[tokio::test]
async fn test_empty_report_fails_permanently() {
    let handle = service(
        ScriptedSearch::returning(sources(3)),
        ScriptedReport::new(),
        settings(),
    )
    .start_run(RunRequest::new("climate"), CancellationToken::new());
    let events = collect(handle.events).await;

    match events.last().unwrap() {
        Event::RunError { code, message } => {
            assert_eq!(code.as_deref(), Some("REPORT_FAILED_PERMANENT"));
            assert!(message.contains("no research results were generated"));
        }
        other => panic!("unexpected terminal event {other:?}"),
    }
    assert_eq!(count(&events, "TEXT_MESSAGE_START"), 0);
}

/// Test cancelling during report generation stops at the next boundary
#[tokio::test]
async fn test_cancel_mid_generation_stops_cleanly() {
    let cancel = CancellationToken::new();
    let handle = service(
        ScriptedSearch::returning(sources(3)),
        ScriptedReport::every_section().cancel_at(ReportSection::Analysis, cancel.clone()),
        settings(),
    )
    .start_run(RunRequest::new("climate change adaptation"), cancel.clone());
    let task = handle.task;
    let events = collect(handle.events).await;

    assert_eq!(task.await.unwrap(), RunSummary::Stopped);
    let last = events.last().unwrap();
    assert_eq!(last.event_type(), "RUN_FINISHED");
    assert_eq!(last.outcome(), Some("stopped"));
    assert_eq!(count(&events, "RUN_ERROR"), 0);
    assert_eq!(count(&events, "TEXT_MESSAGE_START"), 0);
    assert_eq!(count(&events, "TEXT_MESSAGE_CONTENT"), 0);

    let final_state = fold_states(&events).pop().unwrap();
    assert_eq!(final_state["research"]["stage"], "developing_analysis");
    assert_eq!(final_state["processing"]["completed"], false);
    assert!(final_state["processing"]["report"].is_null());
    assert!(final_state["status"]["error"].is_null());
}

/// Test a stream whose client has gone away stops the run
#[tokio::test]
async fn test_dropped_client_stops_run() {
    let mut run_settings = settings();
    run_settings.event_buffer = 1;
    let cancel = CancellationToken::new();
    let handle = service(
        ScriptedSearch::returning(sources(3)),
        ScriptedReport::every_section(),
        run_settings,
    )
    .start_run(RunRequest::new("climate"), cancel.clone());

    drop(handle.events);
    assert_eq!(handle.task.await.unwrap(), RunSummary::Stopped);
    assert!(cancel.is_cancelled());
}

/// Test a stop ends the run even while the client is not reading
#[tokio::test]
async fn test_stop_with_stalled_client_ends_run() {
    let mut run_settings = settings();
    run_settings.event_buffer = 1;
    let cancel = CancellationToken::new();
    let handle = service(
        ScriptedSearch::returning(sources(3)),
        ScriptedReport::every_section(),
        run_settings,
    )
    .start_run(RunRequest::new("climate"), cancel.clone());

    // keep the receiver open but never read from it
    let _events = handle.events;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let summary = tokio::time::timeout(Duration::from_secs(3), handle.task)
        .await
        .expect("stopped run must end without a reader")
        .unwrap();
    assert_eq!(summary, RunSummary::Stopped);
}

/// Test a stop that arrives after the completion delta still finishes as completed
#[tokio::test]
async fn test_stop_after_completion_keeps_completed_outcome() {
    let mut run_settings = settings();
    run_settings.event_buffer = 1;
    let cancel = CancellationToken::new();
    let handle = service(
        ScriptedSearch::returning(sources(3)),
        ScriptedReport::new().section(ReportSection::Outline, &CLIMATE_REPORT),
        run_settings,
    )
    .start_run(RunRequest::new("climate change adaptation"), cancel.clone());
    let task = handle.task;

    let mut rx = handle.events;
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        if let Event::StateDelta { delta } = &event {
            if delta.paths().any(|p| p == "/processing/completed") {
                cancel.cancel();
            }
        }
        events.push(event);
    }

    assert!(cancel.is_cancelled());
    assert_eq!(task.await.unwrap(), RunSummary::Completed);
    let last = events.last().unwrap();
    assert_eq!(last.event_type(), "RUN_FINISHED");
    assert_eq!(last.outcome(), Some("completed"));
    assert_eq!(count(&events, "TEXT_MESSAGE_CONTENT"), CLIMATE_REPORT.len());
    assert_eq!(report_text(&events), CLIMATE_REPORT.concat());
}

/// Test a slow report section ends the run with a transient error and no text
#[tokio::test]
async fn test_report_timeout_is_transient_failure() {
    let mut run_settings = settings();
    run_settings.driver.report_timeout = Duration::from_millis(20);
    let handle = service(
        ScriptedSearch::returning(sources(3)),
        ScriptedReport::every_section().delay_at(ReportSection::Outline, Duration::from_secs(5)),
        run_settings,
    )
    .start_run(RunRequest::new("climate change adaptation"), CancellationToken::new());
    let task = handle.task;
    let events = collect(handle.events).await;

    match events.last().unwrap() {
        Event::RunError { code, message } => {
            assert_eq!(code.as_deref(), Some("REPORT_FAILED_TRANSIENT"));
            assert!(message.contains("timed out"));
        }
        other => panic!("unexpected terminal event {other:?}"),
    }
    assert!(matches!(
        task.await.unwrap(),
        RunSummary::Failed { code: "REPORT_FAILED_TRANSIENT", .. }
    ));
    assert_eq!(count(&events, "TEXT_MESSAGE_START"), 0);
    assert_eq!(count(&events, "TEXT_MESSAGE_CONTENT"), 0);

    let final_state = fold_states(&events).pop().unwrap();
    assert!(final_state["processing"]["report"].is_null());
    assert!(final_state["status"]["error"].is_string());
    assert_eq!(final_state["status"]["phase"], "generating_report");
    assert_eq!(final_state["processing"]["inProgress"], false);
}

/// Test the partial report policy delivers finished sections before the error
#[tokio::test]
async fn test_partial_report_on_error() {
    let failing = || {
        ScriptedReport::every_section().fail_at(
            ReportSection::Analysis,
            CollaboratorError::report_transient("rate limited"),
        )
    };

    let mut partial = settings();
    partial.partial_report_on_error = true;
    let handle = service(ScriptedSearch::returning(sources(2)), failing(), partial)
        .start_run(RunRequest::new("climate"), CancellationToken::new());
    let events = collect(handle.events).await;

    assert_eq!(count(&events, "TEXT_MESSAGE_START"), 1);
    assert_eq!(count(&events, "TEXT_MESSAGE_CONTENT"), 4);
    assert_eq!(
        report_text(&events),
        "Outline paragraph.\n\nExecutiveSummary paragraph.\n\n\
         Introduction paragraph.\n\nKeyFindings paragraph.\n\n"
    );
    match events.last().unwrap() {
        Event::RunError { code, .. } => assert_eq!(code.as_deref(), Some("REPORT_FAILED_TRANSIENT")),
        other => panic!("unexpected terminal event {other:?}"),
    }

    // without the policy nothing is delivered
    let handle = service(ScriptedSearch::returning(sources(2)), failing(), settings())
        .start_run(RunRequest::new("climate"), CancellationToken::new());
    let events = collect(handle.events).await;
    assert_eq!(count(&events, "TEXT_MESSAGE_START"), 0);
    assert_eq!(events.last().unwrap().event_type(), "RUN_ERROR");
}

/// Test a completed state is replayed without calling any collaborator
#[tokio::test]
async fn test_completed_state_is_replayed() {
    let first = climate_service().start_run(
        RunRequest::new("climate change adaptation"),
        CancellationToken::new(),
    );
    let final_state = fold_states(&collect(first.events).await).pop().unwrap();

    let search = Arc::new(ScriptedSearch::returning(sources(3)));
    let service = ResearchService::new(search.clone(), Arc::new(ScriptedReport::new()), settings());
    let request = RunRequest::default().with_state(final_state.clone());
    let handle = service.start_run(request, CancellationToken::new());
    let events = collect(handle.events).await;

    assert_eq!(search.calls(), 0);
    assert_eq!(
        types(&events)[..3],
        ["RUN_STARTED", "STATE_SNAPSHOT", "TEXT_MESSAGE_START"]
    );
    assert_eq!(events.last().unwrap().outcome(), Some("completed"));
    assert_eq!(report_text(&events), CLIMATE_REPORT.concat());
    assert_eq!(fold_states(&events).pop().unwrap(), final_state);
}

/// Test organized sources resume at report generation
#[tokio::test]
async fn test_resume_from_organized_sources() {
    let first = climate_service().start_run(
        RunRequest::new("climate change adaptation"),
        CancellationToken::new(),
    );
    let organized = fold_states(&collect(first.events).await)
        .into_iter()
        .find(|s| s["research"]["sources_found"] == 3)
        .unwrap();

    let search = Arc::new(ScriptedSearch::returning(Vec::new()));
    let service = ResearchService::new(
        search.clone(),
        Arc::new(ScriptedReport::every_section()),
        settings(),
    );
    let handle = service.start_run(
        RunRequest::new("climate change adaptation").with_state(organized),
        CancellationToken::new(),
    );
    let task = handle.task;
    let events = collect(handle.events).await;

    assert_eq!(task.await.unwrap(), RunSummary::Completed);
    assert_eq!(search.calls(), 0);

    let states = fold_states(&events);
    assert_eq!(states[0]["research"]["stage"], "organizing_data");
    assert_eq!(progress(&states[0]), 0.35);
    let final_state = states.last().unwrap();
    assert_eq!(final_state["research"]["sources_found"], 3);
    assert_eq!(final_state["status"]["phase"], "completed");
}

/// Test a resume request for a different query is rejected
#[tokio::test]
async fn test_resume_with_other_query_is_rejected() {
    let first = climate_service().start_run(
        RunRequest::new("climate change adaptation"),
        CancellationToken::new(),
    );
    let final_state = fold_states(&collect(first.events).await).pop().unwrap();

    let handle = climate_service().start_run(
        RunRequest::new("volcanoes").with_state(final_state),
        CancellationToken::new(),
    );
    let events = collect(handle.events).await;
    assert_eq!(types(&events), vec!["RUN_ERROR"]);
}

/// Test concurrent runs keep separate state
#[tokio::test]
async fn test_concurrent_runs_are_isolated() {
    let service = climate_service();
    let a = service.start_run(RunRequest::new("solar power"), CancellationToken::new());
    let b = service.start_run(RunRequest::new("wind power"), CancellationToken::new());
    assert_ne!(a.run_id, b.run_id);

    let (events_a, events_b) = tokio::join!(collect(a.events), collect(b.events));
    let final_a = fold_states(&events_a).pop().unwrap();
    let final_b = fold_states(&events_b).pop().unwrap();

    assert_eq!(final_a["research"]["query"], "solar power");
    assert_eq!(final_b["research"]["query"], "wind power");
    assert_eq!(final_a["status"]["phase"], "completed");
    assert_eq!(final_b["status"]["phase"], "completed");
}

/// Test ids supplied by the client are echoed in lifecycle events
#[tokio::test]
async fn test_client_ids_are_echoed() {
    let handle = climate_service().start_run(
        RunRequest::new("climate").with_ids("thread-7", "run-42"),
        CancellationToken::new(),
    );
    assert_eq!(handle.run_id, "run-42");
    let events = collect(handle.events).await;

    match (&events[0], events.last().unwrap()) {
        (
            Event::RunStarted { thread_id, run_id },
            Event::RunFinished {
                thread_id: finished_thread,
                run_id: finished_run,
                ..
            },
        ) => {
            assert_eq!((thread_id.as_str(), run_id.as_str()), ("thread-7", "run-42"));
            assert_eq!(finished_thread, thread_id);
            assert_eq!(finished_run, run_id);
        }
        other => panic!("unexpected lifecycle events {other:?}"),
    }
}
