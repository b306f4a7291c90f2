//! End-to-end tests of the profiling pipeline with scripted inference

use chrono::{TimeZone, Utc};
use keel_core::config::ConfigBuilder;
use keel_core::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn engine_with(provider: Arc<ScriptedProvider>, config: KeelConfig) -> WorkflowEngine {
    let services = StageServices::new(
        provider,
        Arc::new(SvgChartRenderer::new()),
        Arc::new(CsvTableExporter::new()),
        config,
    );
    WorkflowEngine::new(services)
}

fn engine(provider: ScriptedProvider) -> (WorkflowEngine, Arc<ScriptedProvider>) {
    let provider = Arc::new(provider);
    (engine_with(Arc::clone(&provider), KeelConfig::default()), provider)
}

fn whaler() -> SessionInput {
    SessionInput::manual(ManualEntry::new("Boston Whaler", "Outrage 23"))
}

fn photo() -> SessionInput {
    SessionInput::image(vec![0x89, b'P', b'N', b'G'], "image/png")
}

fn sea_ray_reply() -> ScriptedReply {
    ScriptedReply::json(json!({
        "BUILDER_MAKE": "Sea Ray",
        "CLASS_MODEL": "Sundancer 320",
        "HULL_TYPE": "V-Bottom",
        "LENGTH": "32 ft",
        "BEAM": "10.5 ft",
        "WEIGHT": "12000 lbs",
        "FUEL_TYPE": "gasoline",
        "AUX": "YES",
        "COMMERCIAL": "NO",
        "SUGGESTIONS": ["Confirm the engine configuration"]
    }))
}

/// A morning at the dock, a two hour run, then an afternoon at the dock
fn day_of_telemetry() -> Vec<TelemetryRecord> {
    let start = Utc.with_ymd_and_hms(2023, 8, 12, 6, 0, 0).unwrap();
    (0..24)
        .map(|i| {
            let ts = start + chrono::Duration::minutes(15 * i);
            let sog = if (8..16).contains(&i) { 18.0 } else { 0.0 };
            TelemetryRecord::new(ts, 44.60 + i as f64 * 0.04, -63.55, sog)
        })
        .collect()
}

fn outcome(session: &Session) -> Vec<(String, StepStatus, Option<ErrorCode>)> {
    session
        .step_results
        .iter()
        .map(|r| (r.stage_name.clone(), r.status, r.result.error_code()))
        .collect()
}

#[tokio::test]
async fn test_manual_entry_completes_all_stages() {
    let (engine, provider) = engine(ScriptedProvider::new());
    let session = engine.start_and_run(whaler()).await.unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.current_step, 6);
    assert_eq!(session.step_results.len(), 6);
    assert!(session.completed_at.is_some());
    assert!(session.step_results.iter().all(|r| r.status == StepStatus::Success));
    assert_eq!(
        session.step_results.iter().map(|r| r.stage_name.as_str()).collect::<Vec<_>>(),
        engine.stage_names()
    );

    // Only the curve stage consults the model for manual entries
    assert_eq!(provider.call_count(), 1);

    let analysis = session.output("image_analyzer").and_then(|o| o.as_analysis()).unwrap();
    let specs = serde_json::to_value(&analysis.boat_specifications).unwrap();
    assert_eq!(specs["Boat Type"], NOT_SPECIFIED);
    assert_eq!(specs["Builder/Make"], "Boston Whaler");
}

#[tokio::test]
async fn test_curve_notes_disclose_resistance_method() {
    let (engine, _) = engine(ScriptedProvider::new());
    let session = engine.start_and_run(whaler()).await.unwrap();

    let curves = session.output("performance_curves").and_then(|o| o.as_curves()).unwrap();
    assert!(
        curves.validation_notes.iter().any(|n| n.contains("Holtrop-Mennen")),
        "{:?}",
        curves.validation_notes
    );
    assert_eq!(curves.curve_metadata.generation_method, "holtrop_mennen_estimate");
}

#[tokio::test]
async fn test_first_stage_failure_ends_session() {
    let provider = ScriptedProvider::new().on_prompt(
        "attached photo",
        ScriptedReply::json(json!({"ERROR": "no vessel in frame", "CODE": "NOT_A_BOAT"})),
    );
    let (engine, _) = engine(provider);
    let session = engine.start_and_run(photo()).await.unwrap();

    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.current_step, 1);
    assert_eq!(session.step_results.len(), 1);
    assert_eq!(session.step_results[0].result.error_code(), Some(ErrorCode::InputInvalid));
    assert!(session.context.is_empty());
    assert!(session.failure_reason.unwrap().starts_with("image_analyzer failed"));
}

#[tokio::test]
async fn test_malformed_vision_reply() {
    let provider = ScriptedProvider::new().on_prompt("attached photo", ScriptedReply::text("I see a boat!"));
    let (engine, _) = engine(provider);
    let session = engine.start_and_run(photo()).await.unwrap();

    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(
        session.step_results[0].result.error_code(),
        Some(ErrorCode::InferenceMalformed)
    );
}

#[tokio::test]
async fn test_step_count_tracks_records() {
    let (engine, _) = engine(ScriptedProvider::new());
    let id = engine.start(whaler()).await.unwrap();
    assert_eq!(engine.status(&id).await.unwrap().status, SessionStatus::Created);

    let mut last = 0;
    for expected in 1..=6 {
        let record = engine.step(&id).await.unwrap();
        let session = engine.status(&id).await.unwrap();
        assert_eq!(session.step_results.len(), session.current_step);
        assert_eq!(session.current_step, expected);
        assert!(session.current_step > last);
        assert_eq!(session.last_step().unwrap().stage_name, record.stage_name);
        last = session.current_step;
    }

    let err = engine.step(&id).await.unwrap_err();
    assert!(matches!(err, KeelError::SessionFinished(_)));
    assert_eq!(engine.status(&id).await.unwrap().current_step, 6);
}

#[tokio::test]
async fn test_single_steps_match_full_run() {
    let provider = ScriptedProvider::new().on_prompt("attached photo", sea_ray_reply());
    let (engine, _) = engine(provider);
    let input = photo().with_telemetry(day_of_telemetry());

    let run = engine.start_and_run(input.clone()).await.unwrap();

    let id = engine.start(input).await.unwrap();
    while engine.step(&id).await.is_ok() {}
    let stepped = engine.status(&id).await.unwrap();

    assert_ne!(run.session_id, stepped.session_id);
    assert_eq!(run.status, stepped.status);
    assert_eq!(outcome(&run), outcome(&stepped));
    assert_eq!(
        run.output("voyage_analytics").and_then(|o| o.as_analytics()).map(|a| &a.voyage_totals),
        stepped.output("voyage_analytics").and_then(|o| o.as_analytics()).map(|a| &a.voyage_totals),
    );
}

#[tokio::test]
async fn test_image_with_telemetry_produces_full_report() {
    let provider = ScriptedProvider::new()
        .on_prompt("attached photo", sea_ray_reply())
        .on_prompt("hull parameters", ScriptedReply::json(json!({
            "block_coefficient": 0.45,
            "propulsive_efficiency": 0.55,
            "max_speed_knots": 32
        })));
    let (engine, _) = engine(provider);
    let input = photo().with_telemetry(day_of_telemetry());
    let session = engine.start_and_run(input).await.unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert!(
        session.step_results.iter().all(|r| r.status == StepStatus::Success),
        "{:?}",
        outcome(&session)
    );

    let telemetry = session.output("telemetry_processor").and_then(|o| o.as_telemetry()).unwrap();
    assert_eq!(telemetry.telemetry_summary.total_data_points, 24);
    assert_eq!(telemetry.telemetry_summary.voyage_count, 1);
    assert_eq!(telemetry.telemetry_summary.dwell_count, 2);

    let analytics = session.output("voyage_analytics").and_then(|o| o.as_analytics()).unwrap();
    assert_eq!(analytics.fuel_type, FuelType::Gasoline);
    assert!(analytics.voyage_totals.total_fuel_gallons > 0.0);
    assert!(analytics.voyage_csv.starts_with("voyage_id,"));
    assert_eq!(analytics.dwell_csv.lines().count(), 3);

    let report = session.output("report_generator").and_then(|o| o.as_report()).unwrap();
    assert_eq!(report.executive_summary.vessel_name, "Sea Ray Sundancer 320");
    assert_eq!(report.executive_summary.vessel_type, "V-Bottom");
    assert!(report.deliverables.is_complete());
    assert_eq!(report.charts.len(), 7);

    let csv = engine.export_performance_csv(&session.session_id).await.unwrap();
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("speed_knots,fuel_rate_gph,shaft_power_hp,thrust_lbf"));
    assert_eq!(lines.count(), 13);
}

#[tokio::test(start_paused = true)]
async fn test_curve_timeout_continues_pipeline() {
    let provider = Arc::new(ScriptedProvider::new().on_prompt(
        "hull parameters",
        ScriptedReply::delayed(Duration::from_secs(300), ScriptedReply::text("{}")),
    ));
    let config = ConfigBuilder::new()
        .inference_timeout(Duration::from_secs(5))
        .build();
    let engine = engine_with(provider, config);

    let session = engine.start_and_run(whaler()).await.unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.step_results.len(), 6);
    assert_eq!(
        outcome(&session)[2..],
        [
            ("performance_curves".to_string(), StepStatus::Failed, Some(ErrorCode::InferenceFailure)),
            ("telemetry_processor".to_string(), StepStatus::Success, None),
            ("voyage_analytics".to_string(), StepStatus::Failed, Some(ErrorCode::UpstreamMissing)),
            ("report_generator".to_string(), StepStatus::Success, None),
        ]
    );

    let report = session.output("report_generator").and_then(|o| o.as_report()).unwrap();
    assert!(!report.deliverables.performance_curves_generated);
    assert!(report.executive_summary.baseline_status.starts_with("Partial"));

    let err = engine.export_performance_csv(&session.session_id).await.unwrap_err();
    assert!(matches!(err, KeelError::NotAvailable(_)));
}

#[tokio::test]
async fn test_no_telemetry_gives_zero_analytics() {
    let (engine, _) = engine(ScriptedProvider::new());
    let session = engine.start_and_run(whaler()).await.unwrap();

    let telemetry = session.output("telemetry_processor").and_then(|o| o.as_telemetry()).unwrap();
    assert_eq!(telemetry.telemetry_summary.voyage_count, 0);
    assert_eq!(telemetry.telemetry_summary.dwell_count, 0);

    let analytics = session.output("voyage_analytics").and_then(|o| o.as_analytics()).unwrap();
    assert!(analytics.voyages.is_empty());
    assert_eq!(analytics.voyage_totals.total_fuel_gallons, 0.0);
    assert_eq!(analytics.voyage_totals.total_distance_nm, 0.0);
    assert_eq!(analytics.emissions_summary.total_co2_emissions_lbs, 0.0);
    assert_eq!(analytics.emissions_summary.operational_percentage, 0.0);
    assert_eq!(analytics.emissions_summary.auxiliary_percentage, 0.0);
}

#[tokio::test]
async fn test_invalid_telemetry_is_recorded_not_fatal() {
    let mut telemetry = day_of_telemetry();
    telemetry[3].latitude = f64::NAN;
    let (engine, _) = engine(ScriptedProvider::new());
    let session = engine.start_and_run(whaler().with_telemetry(telemetry)).await.unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    let codes: Vec<_> = session.step_results.iter().map(|r| r.result.error_code()).collect();
    assert_eq!(codes[3], Some(ErrorCode::InputInvalid));
    assert_eq!(codes[4], Some(ErrorCode::UpstreamMissing));
    assert_eq!(codes[5], None);
}

#[tokio::test]
async fn test_strict_policy_stops_at_first_failure() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .on_prompt("hull parameters", ScriptedReply::Error(InferenceError::RateLimited("slow down".into()))),
    );
    let config = ConfigBuilder::new()
        .continuation(ContinuationPolicy::Strict)
        .build();
    let engine = engine_with(provider, config);

    let session = engine.start_and_run(whaler()).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.step_results.len(), 3);
    assert_eq!(
        session.step_results[2].result.error_code(),
        Some(ErrorCode::InferenceFailure)
    );
}

#[tokio::test]
async fn test_cancel_before_first_step_passes_through_running() {
    let (engine, _) = engine(ScriptedProvider::new());
    let mut events = engine.subscribe();
    let id = engine.start(whaler()).await.unwrap();
    assert_eq!(engine.status(&id).await.unwrap().status, SessionStatus::Created);

    engine.cancel(&id).await.unwrap();
    let session = engine.status(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.failure_reason.as_deref(), Some("cancelled"));
    assert!(session.step_results.is_empty());

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind);
    }
    assert_eq!(
        kinds,
        vec![
            WorkflowEventKind::SessionStarted,
            WorkflowEventKind::SessionRunning,
            WorkflowEventKind::SessionFinished {
                status: SessionStatus::Failed,
                reason: Some("cancelled".into())
            },
        ]
    );

    assert!(matches!(engine.step(&id).await, Err(KeelError::SessionFinished(_))));
}

#[tokio::test]
async fn test_concurrent_steps_on_one_session_run_in_turn() {
    let (engine, _) = engine(ScriptedProvider::new());
    let id = engine.start(whaler()).await.unwrap();

    let (first, second) = tokio::join!(engine.step(&id), engine.step(&id));
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.stage_name, "image_analyzer");
    assert_eq!(second.stage_name, "profile_builder");
    assert!(first.finished_at <= second.started_at);

    let session = engine.status(&id).await.unwrap();
    assert_eq!(session.current_step, 2);
    assert_eq!(
        session.step_results.iter().map(|r| r.stage_name.as_str()).collect::<Vec<_>>(),
        vec!["image_analyzer", "profile_builder"]
    );
}

#[tokio::test]
async fn test_events_follow_session_lifecycle() {
    let (engine, _) = engine(ScriptedProvider::new());
    let mut events = engine.subscribe();

    let session = engine.start_and_run(whaler()).await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.session_id, session.session_id);
        kinds.push(event.kind);
    }

    assert_eq!(kinds.len(), 15);
    assert_eq!(kinds[0], WorkflowEventKind::SessionStarted);
    assert_eq!(kinds[1], WorkflowEventKind::SessionRunning);
    assert_eq!(
        kinds[2],
        WorkflowEventKind::StageStarted {
            stage: "image_analyzer".into(),
            step: 0
        }
    );
    let completed = kinds
        .iter()
        .filter(|k| matches!(k, WorkflowEventKind::StageCompleted { .. }))
        .count();
    assert_eq!(completed, 6);
    assert_eq!(
        kinds[14],
        WorkflowEventKind::SessionFinished {
            status: SessionStatus::Completed,
            reason: None
        }
    );
}

#[tokio::test]
async fn test_concurrent_sessions() {
    let (engine, _) = engine(ScriptedProvider::new());
    let engine = Arc::new(engine);

    let mut ids = Vec::new();
    for model in ["Outrage 23", "Montauk 170", "Dauntless 210"] {
        let input = SessionInput::manual(ManualEntry::new("Boston Whaler", model));
        ids.push(engine.start(input).await.unwrap());
    }

    let handles: Vec<_> = ids.iter().map(|id| engine.spawn_run(id.clone())).collect();
    for handle in handles {
        let session = handle.await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.step_results.len(), 6);
    }
    assert_eq!(engine.session_count().await, 3);
}

#[tokio::test]
async fn test_remove_session() {
    let (engine, _) = engine(ScriptedProvider::new());
    let session = engine.start_and_run(whaler()).await.unwrap();

    let removed = engine.remove(&session.session_id).await.unwrap();
    assert_eq!(removed.status, SessionStatus::Completed);
    assert!(matches!(
        engine.status(&session.session_id).await,
        Err(KeelError::SessionNotFound(_))
    ));
    assert_eq!(engine.session_count().await, 0);
}

#[tokio::test]
async fn test_session_serializes_to_json() {
    let (engine, _) = engine(ScriptedProvider::new());
    let session = engine.start_and_run(whaler()).await.unwrap();

    let value = serde_json::to_value(&session).unwrap();
    assert_eq!(value["status"], "COMPLETED");
    assert_eq!(value["step_results"][0]["result"]["status"], "success");
    assert_eq!(value["step_results"][0]["result"]["stage"], "image_analyzer");

    let restored: Session = serde_json::from_value(value).unwrap();
    assert_eq!(restored.step_results.len(), 6);
}
