#[cfg(test)]
mod tests {
    use crate::utils::{
        NOTES, ScriptedBatchClient, ScriptedClient, THREADS, conversation, default_reply, driver,
        flat_list_reply, open_store, phase, scan, two_phase_config, unit_hex, write_unit,
        write_units,
    };
    use connectors::{error::InferenceError, inference::InferenceResponse};
    use engine_config::settings::phase::CallMode;
    use engine_core::{
        progress::{ProgressService, ProgressStage},
        state::StateStore,
    };
    use engine_processing::catalog::{
        dedup::{DedupVerdict, is_duplicate},
        registry::ProcessedRegistry,
    };
    use engine_runtime::{Driver, InferenceClients};
    use model::{
        core::identifiers::UnitId,
        execution::errors::FailureKind,
        records::unit::UnitStatus,
        schema::{
            canonical::ShapeVariant,
            contract::{JsonKind, RequiredKey},
        },
    };
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    async fn record_payloads(
        store: &Arc<dyn StateStore>,
        units: &[UnitId],
    ) -> Vec<(UnitId, String, serde_json::Value, ShapeVariant)> {
        let mut out = Vec::new();
        for unit in units {
            for name in [THREADS, NOTES] {
                let record = store.load_record(unit, &phase(name)).await.unwrap().unwrap();
                out.push((
                    unit.clone(),
                    name.to_string(),
                    serde_json::Value::Object(record.payload),
                    record.provenance.detected_variant,
                ));
            }
        }
        out
    }

    // Scenario: the first run finishes phase 1 for units 1-5 only; the
    // restart must not call the service again for those phases.
    // Expected Outcome: every unit completes and the store matches an
    // uninterrupted run.
    #[traced_test]
    #[tokio::test]
    async fn resume_skips_phases_already_done() {
        let root = tempdir().unwrap();
        let units = write_units(root.path(), 10);
        let late: Vec<String> = units[5..].iter().map(|u| u.to_string()).collect();

        let state_dir = tempdir().unwrap();
        let store = open_store(state_dir.path());

        let flaky = Arc::new(ScriptedClient::new(move |request| {
            let unit = &request.custom_id[..8];
            let refuse = (request.custom_id.contains(THREADS) && late.iter().any(|u| u == unit))
                || request.custom_id.contains(NOTES);
            if refuse {
                Err(InferenceError::InvalidRequest("simulated crash".into()))
            } else {
                Ok(default_reply(request))
            }
        }));
        let first = driver(two_phase_config(), store.clone(), flaky)
            .run(scan(root.path()).await, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.failed.len(), 10);
        assert_eq!(first.metrics.phases_committed, 5);

        let client = Arc::new(ScriptedClient::healthy());
        let second = driver(two_phase_config(), store.clone(), client.clone())
            .run(scan(root.path()).await, CancellationToken::new())
            .await
            .unwrap();

        assert!(second.is_clean());
        assert_eq!(second.succeeded, units);
        assert_eq!(second.metrics.phases_resumed, 5);
        for unit in &units[..5] {
            assert_eq!(client.calls_for(unit, THREADS), 0, "{unit} phase 1 reprocessed");
            assert_eq!(client.calls_for(unit, NOTES), 1);
        }
        for unit in &units[5..] {
            assert_eq!(client.calls_for(unit, THREADS), 1);
        }

        let fresh_dir = tempdir().unwrap();
        let fresh = open_store(fresh_dir.path());
        driver(two_phase_config(), fresh.clone(), Arc::new(ScriptedClient::healthy()))
            .run(scan(root.path()).await, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            record_payloads(&store, &units).await,
            record_payloads(&fresh, &units).await
        );
    }

    // Scenario: A answers phase 1 with a flat list, B has no messages at all,
    // C is ordinary.
    // Expected Outcome: A normalizes with flat_list provenance, B fails phase 1
    // alone, C reaches phase 2.
    #[traced_test]
    #[tokio::test]
    async fn scenario_flat_list_empty_and_ordinary_units() {
        let root = tempdir().unwrap();
        let a = UnitId::parse(&unit_hex(0xa)).unwrap();
        let b = UnitId::parse(&unit_hex(0xb)).unwrap();
        let c = UnitId::parse(&unit_hex(0xc)).unwrap();
        write_unit(root.path(), &a.dir_name(), &conversation());
        write_unit(root.path(), &b.dir_name(), &[]);
        write_unit(root.path(), &c.dir_name(), &conversation());

        let a_prefix = a.to_string();
        let client = Arc::new(ScriptedClient::new(move |request| {
            if request.custom_id.starts_with(&a_prefix) {
                Ok(flat_list_reply(request))
            } else {
                Ok(default_reply(request))
            }
        }));

        let state_dir = tempdir().unwrap();
        let store = open_store(state_dir.path());
        let report = driver(two_phase_config(), store.clone(), client.clone())
            .run(scan(root.path()).await, CancellationToken::new())
            .await
            .unwrap();

        let a_record = store.load_record(&a, &phase(THREADS)).await.unwrap().unwrap();
        assert_eq!(a_record.provenance.detected_variant, ShapeVariant::FlatList);
        assert_eq!(a_record.provenance.detected_variant.as_str(), "flat_list");
        let threads = a_record.get("threads").unwrap().as_object().unwrap();
        assert!(threads.contains_key("ideas"));
        assert!(threads.contains_key("software"));

        let failure = report.failure_for(&b).unwrap();
        assert_eq!(failure.phase, Some(phase(THREADS)));
        assert!(failure.reason.contains("no fragments"));
        assert_eq!(client.calls_for(&b, THREADS), 0);
        assert_eq!(client.calls_for(&b, NOTES), 0);

        assert_eq!(report.status_of(&c), Some(UnitStatus::Completed));
        assert!(store.load_record(&c, &phase(NOTES)).await.unwrap().is_some());
        assert_eq!(report.succeeded, vec![a, c]);
    }

    #[traced_test]
    #[tokio::test]
    async fn rescanning_done_units_leaves_the_store_unchanged() {
        let root = tempdir().unwrap();
        let units = write_units(root.path(), 3);
        let state_dir = tempdir().unwrap();
        let store = open_store(state_dir.path());

        driver(two_phase_config(), store.clone(), Arc::new(ScriptedClient::healthy()))
            .run(scan(root.path()).await, CancellationToken::new())
            .await
            .unwrap();

        let mut before = Vec::new();
        for unit in &units {
            before.push(store.unit_checkpoints(unit).await.unwrap());
        }

        let registry = ProcessedRegistry::from_entries(units.iter().map(|u| u.to_string()));
        for unit in scan(root.path()).await {
            let verdict = is_duplicate(&unit, store.as_ref(), &registry).await.unwrap();
            assert_eq!(verdict, DedupVerdict::Disputed);
        }

        let mut after = Vec::new();
        for unit in &units {
            after.push(store.unit_checkpoints(unit).await.unwrap());
        }
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn naming_conventions_collapse_to_one_unit() {
        let root = tempdir().unwrap();
        let uuid = "0012ebed-4c1f-4f55-9d0e-2b0a51f0aa11";
        for name in [
            "session_0012ebed".to_string(),
            format!("session_{uuid}"),
            uuid.to_string(),
            "0012EBED".to_string(),
        ] {
            write_unit(root.path(), &name, &conversation());
        }

        let units = scan(root.path()).await;
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].id.as_str(), "0012ebed");
        assert_eq!(units[0].aliases.len(), 3);

        let state_dir = tempdir().unwrap();
        let client = Arc::new(ScriptedClient::healthy());
        let report = driver(two_phase_config(), open_store(state_dir.path()), client.clone())
            .run(units, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(client.calls().len(), 2);
    }

    #[traced_test]
    #[tokio::test]
    async fn registry_duplicates_are_skipped_without_calls() {
        let root = tempdir().unwrap();
        let units = write_units(root.path(), 3);
        let registry = ProcessedRegistry::from_entries([format!("session_{}", units[1])]);

        let state_dir = tempdir().unwrap();
        let client = Arc::new(ScriptedClient::healthy());
        let report = driver(two_phase_config(), open_store(state_dir.path()), client.clone())
            .with_registry(registry)
            .run(scan(root.path()).await, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.skipped_duplicates, vec![units[1].clone()]);
        assert_eq!(report.succeeded.len(), 2);
        assert_eq!(client.calls_for(&units[1], THREADS), 0);
        assert!(report.is_clean());
    }

    // Scenario: the run is cancelled during the first unit's first call, with
    // one unit slot.
    // Expected Outcome: the in-flight phase commits, the unit is abandoned at
    // the next phase, the rest never start, and a second run finishes them.
    #[traced_test]
    #[tokio::test]
    async fn cancellation_abandons_and_resume_recovers() {
        let root = tempdir().unwrap();
        let units = write_units(root.path(), 4);
        let state_dir = tempdir().unwrap();
        let store = open_store(state_dir.path());

        let mut config = two_phase_config();
        config.concurrency.max_concurrent_units = 1;

        let cancel = CancellationToken::new();
        let client = Arc::new(ScriptedClient::healthy().cancelling_after(1, cancel.clone()));
        let report = driver(config.clone(), store.clone(), client)
            .run(scan(root.path()).await, cancel)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].kind, FailureKind::Abandoned);
        assert_eq!(report.not_started.len(), 3);
        assert!(!report.is_clean());

        let client = Arc::new(ScriptedClient::healthy());
        let report = driver(config, store.clone(), client.clone())
            .run(scan(root.path()).await, CancellationToken::new())
            .await
            .unwrap();
        assert!(report.is_clean());
        assert_eq!(report.succeeded, units);
        assert_eq!(report.metrics.phases_resumed, 1);

        let progress = ProgressService::new(store)
            .unit_status(&units[0], 2)
            .await
            .unwrap();
        assert!(matches!(progress.stage, ProgressStage::Done));
    }

    #[traced_test]
    #[tokio::test]
    async fn batch_mode_submits_one_job_per_unit_phase() {
        let root = tempdir().unwrap();
        let units = write_units(root.path(), 2);
        let mut config = two_phase_config();
        config.phases[0].mode = CallMode::Batch;
        config.phases[0].batch.poll_interval_secs = 0;

        let sync = Arc::new(ScriptedClient::healthy());
        let batch = Arc::new(ScriptedBatchClient::new(|request| Ok(default_reply(request))));
        let state_dir = tempdir().unwrap();
        let report = Driver::new(
            config,
            open_store(state_dir.path()),
            InferenceClients {
                sync: sync.clone(),
                batch: Some(batch.clone()),
            },
        )
        .run(scan(root.path()).await, CancellationToken::new())
        .await
        .unwrap();

        assert!(report.is_clean());
        assert_eq!(batch.submitted_jobs(), 2);
        for unit in &units {
            assert_eq!(sync.calls_for(unit, THREADS), 0);
            assert_eq!(sync.calls_for(unit, NOTES), 1);
        }
    }

    // Scenario: a batch job ends with a partial answer and the run is
    // cancelled during the follow-up continuation.
    // Expected Outcome: the checkpoint keeps the job, and the next run
    // collects it again without a second submission.
    #[traced_test]
    #[tokio::test]
    async fn interrupted_continuation_reuses_the_batch_job() {
        let root = tempdir().unwrap();
        let units = write_units(root.path(), 1);
        let mut config = two_phase_config();
        config.phases[0].mode = CallMode::Batch;
        config.phases[0].per_item = true;
        config.phases[0].batch.poll_interval_secs = 0;

        // Only message 0 comes back, so messages 1 and 2 need a continuation.
        let batch = Arc::new(ScriptedBatchClient::new(|request| Ok(default_reply(request))));
        let state_dir = tempdir().unwrap();
        let store = open_store(state_dir.path());

        let cancel = CancellationToken::new();
        let sync = Arc::new(ScriptedClient::healthy().cancelling_after(1, cancel.clone()));
        let report = Driver::new(
            config.clone(),
            store.clone(),
            InferenceClients {
                sync: sync.clone(),
                batch: Some(batch.clone()),
            },
        )
        .run(scan(root.path()).await, cancel)
        .await
        .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.failed[0].kind, FailureKind::Abandoned);
        assert_eq!(sync.calls_for(&units[0], THREADS), 1);
        let entry = store
            .load_checkpoint(&units[0], &phase(THREADS))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.job.map(|job| job.job_id).as_deref(), Some("msgbatch_1"));

        let sync = Arc::new(ScriptedClient::new(|request| {
            if request.custom_id.contains(THREADS) {
                let body = serde_json::json!({
                    "threads": {"ideas": {"description": "Ideas", "entries": [
                        {"index": 1, "content": "add a status command"},
                        {"index": 2, "content": "wire up clap"}
                    ]}}
                });
                Ok(InferenceResponse::text(body.to_string()))
            } else {
                Ok(default_reply(request))
            }
        }));
        let report = Driver::new(
            config,
            store.clone(),
            InferenceClients {
                sync: sync.clone(),
                batch: Some(batch.clone()),
            },
        )
        .run(scan(root.path()).await, CancellationToken::new())
        .await
        .unwrap();

        assert!(report.is_clean());
        assert_eq!(batch.submitted_jobs(), 1);
        assert!(logs_contain("Resuming submitted batch job"));
        let entry = store
            .load_checkpoint(&units[0], &phase(THREADS))
            .await
            .unwrap()
            .unwrap();
        assert!(entry.job.is_none());
    }

    #[traced_test]
    #[tokio::test]
    async fn panicking_unit_is_reported_failed() {
        let root = tempdir().unwrap();
        let units = write_units(root.path(), 3);
        let client = Arc::new(ScriptedClient::new(|request| {
            if request.custom_id.starts_with("00000002") {
                panic!("responder blew up");
            }
            Ok(default_reply(request))
        }));

        let state_dir = tempdir().unwrap();
        let report = driver(two_phase_config(), open_store(state_dir.path()), client)
            .run(scan(root.path()).await, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.succeeded, vec![units[0].clone(), units[2].clone()]);
        let failure = report.failure_for(&units[1]).unwrap();
        assert_eq!(failure.kind, FailureKind::Internal);
        assert_eq!(failure.phase, None);
        assert_eq!(report.metrics.units_failed, 1);
        assert!(logs_contain("Unit task did not complete"));
    }

    #[tokio::test]
    async fn dry_run_prices_pending_phases_without_calls() {
        let root = tempdir().unwrap();
        write_units(root.path(), 2);
        let state_dir = tempdir().unwrap();
        let store = open_store(state_dir.path());
        let client = Arc::new(ScriptedClient::healthy());
        let driver = driver(two_phase_config(), store.clone(), client.clone());

        let before = driver.estimate(&scan(root.path()).await).await.unwrap();
        assert_eq!(before.units.len(), 2);
        assert!(
            before
                .units
                .iter()
                .all(|u| u.phases.len() == 2 && u.already_done.is_empty())
        );
        assert!(before.input_tokens > 0);
        assert!(before.estimated_cost_usd > 0.0);
        assert!(client.calls().is_empty());
        assert!(store.iter_wal(&driver.run_id()).await.unwrap().is_empty());

        let report = driver
            .run(scan(root.path()).await, CancellationToken::new())
            .await
            .unwrap();
        assert!(report.is_clean());

        let after = driver.estimate(&scan(root.path()).await).await.unwrap();
        assert_eq!(after.input_tokens, 0);
        assert_eq!(after.estimated_cost_usd, 0.0);
        assert!(after.units.iter().all(|u| u.already_done.len() == 2));
    }

    #[tokio::test]
    async fn blocking_contract_violation_stops_the_unit() {
        let root = tempdir().unwrap();
        let units = write_units(root.path(), 1);
        let mut config = two_phase_config();
        config.contracts[0]
            .required
            .push(RequiredKey::blocking("session_id", JsonKind::String));

        let client = Arc::new(ScriptedClient::healthy());
        let state_dir = tempdir().unwrap();
        let report = driver(config, open_store(state_dir.path()), client.clone())
            .run(scan(root.path()).await, CancellationToken::new())
            .await
            .unwrap();

        let failure = report.failure_for(&units[0]).unwrap();
        assert_eq!(failure.phase, Some(phase(THREADS)));
        assert_eq!(failure.kind, FailureKind::SchemaViolation);
        assert!(failure.reason.contains("session_id"));
        assert_eq!(client.calls_for(&units[0], NOTES), 0);
    }

    #[tokio::test]
    async fn unparseable_output_is_a_malformed_failure() {
        let root = tempdir().unwrap();
        let units = write_units(root.path(), 1);
        let client = Arc::new(ScriptedClient::new(|request| {
            if request.custom_id.contains(THREADS) {
                Ok(InferenceResponse::text(r#"{"threads": "not a mapping"}"#))
            } else {
                Ok(default_reply(request))
            }
        }));

        let state_dir = tempdir().unwrap();
        let report = driver(two_phase_config(), open_store(state_dir.path()), client)
            .run(scan(root.path()).await, CancellationToken::new())
            .await
            .unwrap();

        let failure = report.failure_for(&units[0]).unwrap();
        assert_eq!(failure.kind, FailureKind::MalformedOutput);
    }
}
