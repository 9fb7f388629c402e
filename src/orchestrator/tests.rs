//! Tests for lifecycle orchestration over the built-in providers.

use std::sync::Arc;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::config::MountSpec;
use crate::provider::container_name;
use crate::runner::{Interrupt, RunnerError};
use crate::settings::Settings;
use crate::test_support::{MemoryConfigStore, ScriptedRunner};

const MISSING_CONTAINER: &str = "Error response from daemon: No such container: x";
const MISSING_IMAGE: &str = "Error response from daemon: No such image: x";

struct Harness {
    _tmp: TempDir,
    registry: ProviderRegistry,
    runner: ScriptedRunner,
    context: ProviderContext,
    config: Configuration,
}

impl Harness {
    fn orchestrator(&self, store: MemoryConfigStore) -> Orchestrator<'_, MemoryConfigStore> {
        Orchestrator::new(&self.registry, self.context.clone(), store)
    }

    fn container(&self) -> String {
        container_name(&self.config.project_path, "local")
    }

    fn with_record(&self, status: DeploymentState) -> Configuration {
        let mut config = self.config.clone();
        let mut record = DeploymentRecord::new("local", self.container(), status)
            .with_fingerprint("0123456789ab");
        if status == DeploymentState::Failed {
            record.detail = Some(String::from("failed to build image: boom"));
        }
        config.deployment = Some(record);
        config
    }

    fn script_requirements(&self) {
        self.runner.push_stdout("Docker version 27.0.1\n");
        self.runner.push_stdout("27.0.1\n");
    }

    fn script_fresh_deploy(&self) {
        self.runner.push_failure(1, MISSING_CONTAINER);
        self.runner.push_failure(1, MISSING_IMAGE);
        self.runner.push_success();
        self.runner.push_stdout("f00dcafe\n");
    }
}

#[fixture]
fn harness() -> Harness {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    let runner = ScriptedRunner::new();
    let context = ProviderContext {
        runner: Arc::new(runner.clone()),
        settings: Settings {
            retry_backoff_ms: 0,
            ..Settings::builtin()
        },
        interrupt: Interrupt::never(),
    };
    Harness {
        _tmp: tmp,
        registry: ProviderRegistry::with_builtin_providers()
            .unwrap_or_else(|err| panic!("registry: {err}")),
        runner,
        context,
        config: Configuration::for_project(path, "local"),
    }
}

#[rstest]
#[tokio::test]
async fn deploy_persists_running_record(harness: Harness) {
    harness.script_requirements();
    harness.script_fresh_deploy();
    let store = MemoryConfigStore::default();

    let record = harness
        .orchestrator(store.clone())
        .deploy(&harness.config, DeployOptions::default())
        .await
        .unwrap_or_else(|err| panic!("deploy: {err}"));

    assert_eq!(record.status, DeploymentState::Running);
    assert_eq!(store.saves(), 1);
    let saved = store.current().and_then(|config| config.deployment);
    assert_eq!(saved, Some(record));
}

#[rstest]
#[tokio::test]
async fn unchanged_deploy_does_not_rewrite_configuration(harness: Harness) {
    harness.script_requirements();
    harness.script_fresh_deploy();
    let store = MemoryConfigStore::default();
    let orchestrator = harness.orchestrator(store.clone());
    let first = orchestrator
        .deploy(&harness.config, DeployOptions::default())
        .await
        .unwrap_or_else(|err| panic!("first deploy: {err}"));

    let mut config = harness.config.clone();
    config.deployment = Some(first.clone());
    harness.script_requirements();
    let second = orchestrator
        .deploy(&config, DeployOptions::default())
        .await
        .unwrap_or_else(|err| panic!("second deploy: {err}"));

    assert_eq!(second, first);
    assert_eq!(store.saves(), 1);
    assert_eq!(harness.runner.remaining(), 0);
}

#[rstest]
#[tokio::test]
async fn missing_tool_fails_before_any_mutation(harness: Harness) {
    harness.runner.push_error(RunnerError::Spawn {
        program: String::from("docker"),
        message: String::from("No such file or directory"),
    });
    let store = MemoryConfigStore::default();

    let err = harness
        .orchestrator(store.clone())
        .deploy(&harness.config, DeployOptions::default())
        .await
        .err()
        .unwrap_or_else(|| panic!("deploy should fail"));

    assert!(matches!(err, OrchestratorError::Requirement(_)), "{err}");
    assert_eq!(err.exit_code(), 3);
    assert_eq!(store.saves(), 0);
    assert_eq!(harness.runner.invocations().len(), 1);
}

#[rstest]
#[tokio::test]
async fn validation_reports_every_problem_without_backend_mutation(harness: Harness) {
    harness.script_requirements();
    let mut config = harness.config.clone();
    config.name = String::new();
    config.mounts.push(MountSpec {
        source: String::from("relative/dir"),
        target: String::from("/data"),
        read_only: false,
    });

    let err = harness
        .orchestrator(MemoryConfigStore::default())
        .deploy(&config, DeployOptions::default())
        .await
        .err()
        .unwrap_or_else(|| panic!("deploy should fail"));

    let OrchestratorError::Validation(errors) = &err else {
        panic!("expected validation error, got {err}");
    };
    assert!(errors.0.len() >= 2, "{err}");
    assert_eq!(err.exit_code(), 4);
    assert_eq!(harness.runner.invocations().len(), 2);
}

#[rstest]
#[tokio::test]
async fn unknown_provider_is_rejected_without_backend_calls(harness: Harness) {
    let mut config = harness.config.clone();
    config.provider = String::from("gcp");

    let err = harness
        .orchestrator(MemoryConfigStore::default())
        .deploy(&config, DeployOptions::default())
        .await
        .err()
        .unwrap_or_else(|| panic!("deploy should fail"));

    assert_eq!(err.exit_code(), 6);
    let message = err.to_string();
    assert!(message.contains("gcp") && message.contains("local"), "{message}");
    assert!(harness.runner.invocations().is_empty());
}

#[rstest]
#[tokio::test]
async fn build_failure_is_recorded_as_failed(harness: Harness) {
    harness.script_requirements();
    harness.runner.push_failure(1, MISSING_CONTAINER);
    harness.runner.push_failure(1, MISSING_IMAGE);
    harness.runner.push_failure(1, "step 3/7: boom");
    let store = MemoryConfigStore::default();

    let err = harness
        .orchestrator(store.clone())
        .deploy(&harness.config, DeployOptions::default())
        .await
        .err()
        .unwrap_or_else(|| panic!("deploy should fail"));

    assert_eq!(err.exit_code(), 5);
    let record = store
        .current()
        .and_then(|config| config.deployment)
        .unwrap_or_else(|| panic!("failed record should be persisted"));
    assert_eq!(record.status, DeploymentState::Failed);
    assert_eq!(record.handle, harness.container());
    assert!(
        record.detail.as_deref().is_some_and(|detail| detail.contains("boom")),
        "{record:?}"
    );
}

#[rstest]
#[tokio::test]
async fn failed_persistence_is_noted_on_backend_error(harness: Harness) {
    harness.script_requirements();
    harness.runner.push_failure(1, MISSING_CONTAINER);
    harness.runner.push_failure(1, MISSING_IMAGE);
    harness.runner.push_failure(1, "boom");
    let store = MemoryConfigStore::default();
    store.fail_saves();

    let err = harness
        .orchestrator(store)
        .deploy(&harness.config, DeployOptions::default())
        .await
        .err()
        .unwrap_or_else(|| panic!("deploy should fail"));

    let message = err.to_string();
    assert!(message.contains("boom"), "{message}");
    assert!(
        message.contains("recording the failure also failed"),
        "{message}"
    );
}

#[rstest]
#[tokio::test]
async fn earlier_failure_blocks_deploy_without_retry(harness: Harness) {
    harness.script_requirements();
    let config = harness.with_record(DeploymentState::Failed);
    let store = MemoryConfigStore::with(config.clone());

    let err = harness
        .orchestrator(store.clone())
        .deploy(&config, DeployOptions::default())
        .await
        .err()
        .unwrap_or_else(|| panic!("deploy should fail"));

    assert!(matches!(err, OrchestratorError::PreviouslyFailed { .. }), "{err}");
    assert_eq!(err.exit_code(), 8);
    assert!(err.to_string().contains("--retry"));
    assert_eq!(store.saves(), 0);
    assert_eq!(harness.runner.invocations().len(), 2);
}

#[rstest]
#[tokio::test]
async fn retry_redeploys_from_failed(harness: Harness) {
    harness.script_requirements();
    harness.script_fresh_deploy();
    let config = harness.with_record(DeploymentState::Failed);
    let store = MemoryConfigStore::with(config.clone());

    let record = harness
        .orchestrator(store.clone())
        .deploy(&config, DeployOptions { retry: true })
        .await
        .unwrap_or_else(|err| panic!("retry: {err}"));

    assert_eq!(record.status, DeploymentState::Running);
    assert_eq!(record.detail, None);
    assert_eq!(store.saves(), 1);
}

#[rstest]
#[tokio::test]
async fn interrupted_deploy_names_leftover_resource(harness: Harness) {
    harness.script_requirements();
    harness.runner.push_error(RunnerError::Interrupted {
        program: String::from("docker"),
    });
    let store = MemoryConfigStore::default();

    let err = harness
        .orchestrator(store.clone())
        .deploy(&harness.config, DeployOptions::default())
        .await
        .err()
        .unwrap_or_else(|| panic!("deploy should fail"));

    assert_eq!(err.exit_code(), 130);
    assert!(err.to_string().contains(&harness.container()), "{err}");
    let status = store
        .current()
        .and_then(|config| config.deployment)
        .map(|record| record.status);
    assert_eq!(status, Some(DeploymentState::Failed));
}

#[rstest]
#[tokio::test]
async fn interrupted_deploy_reports_unrecorded_failure(harness: Harness) {
    harness.script_requirements();
    harness.runner.push_error(RunnerError::Interrupted {
        program: String::from("docker"),
    });
    let store = MemoryConfigStore::default();
    store.fail_saves();

    let err = harness
        .orchestrator(store.clone())
        .deploy(&harness.config, DeployOptions::default())
        .await
        .err()
        .unwrap_or_else(|| panic!("deploy should fail"));

    assert_eq!(err.exit_code(), 130);
    let message = err.to_string();
    assert!(message.contains("may still exist"), "{message}");
    assert!(
        message.contains("recording the failure also failed"),
        "{message}"
    );
}

#[rstest]
#[tokio::test]
async fn stop_moves_running_record_to_stopped(harness: Harness) {
    harness.script_requirements();
    harness.runner.push_success();
    let config = harness.with_record(DeploymentState::Running);
    let store = MemoryConfigStore::with(config.clone());

    let record = harness
        .orchestrator(store.clone())
        .stop(&config)
        .await
        .unwrap_or_else(|err| panic!("stop: {err}"))
        .unwrap_or_else(|| panic!("record expected"));

    assert_eq!(record.status, DeploymentState::Stopped);
    assert_eq!(record.fingerprint.as_deref(), Some("0123456789ab"));
    assert_eq!(
        store.current().and_then(|config| config.deployment),
        Some(record)
    );
    let commands = harness.runner.commands();
    assert!(
        commands
            .last()
            .is_some_and(|cmd| cmd.starts_with("docker stop")),
        "{commands:?}"
    );
}

#[rstest]
#[case::no_record(None)]
#[case::already_stopped(Some(DeploymentState::Stopped))]
#[tokio::test]
async fn stop_is_a_no_op_without_running_deployment(
    harness: Harness,
    #[case] status: Option<DeploymentState>,
) {
    harness.script_requirements();
    let config = status.map_or_else(|| harness.config.clone(), |s| harness.with_record(s));
    let store = MemoryConfigStore::default();

    let result = harness
        .orchestrator(store.clone())
        .stop(&config)
        .await
        .unwrap_or_else(|err| panic!("stop: {err}"));

    assert_eq!(result.map(|record| record.status), status);
    assert_eq!(store.saves(), 0);
    assert_eq!(harness.runner.invocations().len(), 2);
}

#[rstest]
#[tokio::test]
async fn failed_stop_marks_record_failed(harness: Harness) {
    harness.script_requirements();
    harness.runner.push_failure(1, "daemon hiccup");
    harness.runner.push_failure(1, "still stuck");
    let config = harness.with_record(DeploymentState::Running);
    let store = MemoryConfigStore::with(config.clone());

    let err = harness
        .orchestrator(store.clone())
        .stop(&config)
        .await
        .err()
        .unwrap_or_else(|| panic!("stop should fail"));

    assert_eq!(err.exit_code(), 5);
    let record = store
        .current()
        .and_then(|config| config.deployment)
        .unwrap_or_else(|| panic!("record expected"));
    assert_eq!(record.status, DeploymentState::Failed);
    assert!(
        record
            .detail
            .as_deref()
            .is_some_and(|detail| detail.contains("still stuck")),
        "{record:?}"
    );
}

#[rstest]
#[tokio::test]
async fn remove_clears_persisted_record(harness: Harness) {
    harness.script_requirements();
    harness.runner.push_success();
    harness.runner.push_success();
    let config = harness.with_record(DeploymentState::Running);
    let store = MemoryConfigStore::with(config.clone());

    harness
        .orchestrator(store.clone())
        .remove(&config, RemoveOptions::default())
        .await
        .unwrap_or_else(|err| panic!("remove: {err}"));

    let saved = store
        .current()
        .unwrap_or_else(|| panic!("config should be saved"));
    assert_eq!(saved.deployment, None);
    assert_eq!(saved.name, config.name);
    let commands = harness.runner.commands();
    assert!(
        commands
            .last()
            .is_some_and(|cmd| cmd.starts_with("docker rm --force")),
        "{commands:?}"
    );
}

#[rstest]
#[tokio::test]
async fn status_reads_record_without_backend_calls(harness: Harness) {
    let config = harness.with_record(DeploymentState::Stopped);
    let store = MemoryConfigStore::default();

    let report = harness
        .orchestrator(store.clone())
        .status(&config, false)
        .await
        .unwrap_or_else(|err| panic!("status: {err}"));

    assert_eq!(report.recorded, DeploymentState::Stopped);
    assert_eq!(report.handle, harness.container());
    assert_eq!(report.live, None);
    assert!(harness.runner.invocations().is_empty());
    assert_eq!(store.saves(), 0);
}

#[rstest]
#[tokio::test]
async fn live_status_probes_backend(harness: Harness) {
    harness.runner.push_stdout("true 0123456789ab\n");
    let config = harness.with_record(DeploymentState::Stopped);

    let report = harness
        .orchestrator(MemoryConfigStore::default())
        .status(&config, true)
        .await
        .unwrap_or_else(|err| panic!("status: {err}"));

    assert_eq!(report.recorded, DeploymentState::Stopped);
    assert_eq!(report.live, Some(DeploymentState::Running));
}

#[rstest]
#[tokio::test]
async fn status_without_record_reports_absent(harness: Harness) {
    let report = harness
        .orchestrator(MemoryConfigStore::default())
        .status(&harness.config, false)
        .await
        .unwrap_or_else(|err| panic!("status: {err}"));

    assert_eq!(report.recorded, DeploymentState::Absent);
    assert_eq!(report.provider, "local");
    assert_eq!(report.detail, None);
}
