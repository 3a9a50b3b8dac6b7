//! Runs against a real Docker daemon
//!
//! Ignored by default; run with `cargo test --test docker_e2e -- --ignored`
//! on a machine that can pull `alpine:3`.

use std::sync::Arc;
use suitey::executor::StepStatus;
use suitey::{BuildStep, DockerRuntime, Orchestrator, SuiteyConfig};
use tempfile::TempDir;

fn config(root: &TempDir) -> SuiteyConfig {
    SuiteyConfig {
        temp_dir: root.path().join("results"),
        artifact_dir: root.path().join("artifacts"),
        max_parallel: Some(2),
        ..SuiteyConfig::default()
    }
}

async fn docker() -> Arc<DockerRuntime> {
    let runtime = DockerRuntime::connect().expect("Docker daemon not reachable");
    runtime.ping().await.expect("Docker daemon did not answer");
    Arc::new(runtime)
}

#[tokio::test]
#[ignore]
async fn test_docker_success_and_failure() {
    let root = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    std::fs::write(project.path().join("hello.txt"), "hello from the workspace\n").unwrap();

    let steps = vec![
        BuildStep::new(0, "read", "alpine:3")
            .with_command("cat /workspace/hello.txt")
            .with_project_root(project.path()),
        BuildStep::new(1, "fail", "alpine:3")
            .with_command("exit 7")
            .with_project_root(project.path()),
        BuildStep::new(2, "after-fail", "alpine:3")
            .with_command("true")
            .with_project_root(project.path())
            .depends_on(1),
    ];

    let report = Orchestrator::new(config(&root), docker().await)
        .run(&steps)
        .await
        .unwrap();

    assert_eq!(report.step(0).unwrap().status, StepStatus::Succeeded);
    let failed = report.step(1).unwrap();
    assert_eq!(failed.status, StepStatus::Failed);
    assert_eq!(failed.exit_code, Some(7));
    assert_eq!(report.step(2).unwrap().status, StepStatus::Aborted);
}

#[tokio::test]
#[ignore]
async fn test_docker_workspace_is_read_only() {
    let root = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();

    let steps = vec![BuildStep::new(0, "write", "alpine:3")
        .with_command("touch /workspace/should-not-exist")
        .with_project_root(project.path())];

    let report = Orchestrator::new(config(&root), docker().await)
        .run(&steps)
        .await
        .unwrap();

    assert_eq!(report.step(0).unwrap().status, StepStatus::Failed);
    assert!(!project.path().join("should-not-exist").exists());
}
