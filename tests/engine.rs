//! Lifecycle engine integration tests against the in-memory runtime.

use std::{process::Command, sync::Arc};

use chrono::Utc;
use dcsandbox::{
    config::GlobalConfig,
    management::{server, CleanupSelector, CreateRequest, SandboxEngine},
    runtime::FakeRuntime,
    store::{McpSettings, Resources, SandboxRecord, SandboxStatus, Store},
};
use tempfile::TempDir;

//--------------------------------------------------------------------------------------------------
// Function: Helper
//--------------------------------------------------------------------------------------------------

/// Builds a config with an isolated port range so parallel tests never
/// contend for the same listeners.
fn config_with_ports(lo: u16, hi: u16) -> GlobalConfig {
    let yaml = format!("mcp:\n  portRange: [{}, {}]\n", lo, hi);
    serde_yaml::from_str(&yaml).expect("config yaml")
}

async fn engine_with(
    home: &TempDir,
    runtime: Arc<FakeRuntime>,
    lo: u16,
    hi: u16,
) -> Arc<SandboxEngine> {
    let engine = SandboxEngine::new(
        config_with_ports(lo, hi),
        home.path().to_path_buf(),
        runtime,
    )
    .await
    .expect("engine");
    Arc::new(engine)
}

fn plain_request(name: &str) -> CreateRequest {
    CreateRequest::builder()
        .name(Some(name.to_string()))
        .template(Some("node".to_string()))
        .memory(Some("2G".to_string()))
        .cpus(Some(2.0))
        .timeout_minutes(Some(120))
        .build()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[tokio::test]
async fn test_create_reaches_running_with_first_port() {
    let home = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let engine = engine_with(&home, runtime.clone(), 51000, 51009).await;

    let outcome = engine.create(plain_request("s1")).await.unwrap();
    assert_eq!(outcome.record.status, SandboxStatus::Running);
    assert_eq!(outcome.record.template, "node");
    assert_eq!(outcome.record.mcp.port, Some(51000));
    assert!(outcome.record.container_id.is_some());
    assert!(outcome.record.check_invariants().is_ok());

    // Exactly one record, newest first, and the container really runs.
    let listed = engine.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "s1");

    let container = runtime
        .container_by_name(&format!("dcsandbox-{}", outcome.record.id))
        .await
        .unwrap();
    assert!(container.spec.labels.contains_key("io.dcsandbox.id"));
    assert_eq!(container.spec.env.get("SANDBOX_NAME").unwrap(), "s1");
    assert_eq!(container.spec.memory_bytes, 2 * 1024 * 1024 * 1024);
    assert_eq!(container.spec.nano_cpus, 2_000_000_000);
}

#[tokio::test]
async fn test_duplicate_name_is_rejected_until_removed() {
    let home = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let engine = engine_with(&home, runtime, 51010, 51019).await;

    let first = engine.create(plain_request("dup")).await.unwrap();
    let err = engine.create(plain_request("dup")).await.unwrap_err();
    assert_eq!(err.code(), "DUPLICATE_NAME");

    engine.remove(&first.record.id, false).await.unwrap();
    engine.create(plain_request("dup")).await.unwrap();
}

#[tokio::test]
async fn test_validation_boundaries() {
    let home = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let engine = engine_with(&home, runtime, 51020, 51029).await;

    for memory in ["0", "", "1KB", "1 G"] {
        let request = CreateRequest::builder()
            .name(Some("m".to_string()))
            .memory(Some(memory.to_string()))
            .build();
        let err = engine.create(request).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_MEMORY", "memory {:?}", memory);
    }

    for cpus in [0.0, -1.0, 33.0] {
        let request = CreateRequest::builder()
            .name(Some("c".to_string()))
            .cpus(Some(cpus))
            .build();
        let err = engine.create(request).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_CPU", "cpus {}", cpus);
    }

    let request = CreateRequest::builder()
        .name(Some("t".to_string()))
        .timeout_minutes(Some(29))
        .build();
    assert_eq!(
        engine.create(request).await.unwrap_err().code(),
        "VALIDATION_TIMEOUT"
    );

    // Validation failures never leave a record behind.
    assert!(engine.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_template_fails_fast_and_leaves_nothing() {
    let home = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let engine = engine_with(&home, runtime, 51030, 51039).await;

    let request = CreateRequest::builder()
        .name(Some("ghost".to_string()))
        .template(Some("no-such-template".to_string()))
        .build();
    let err = engine.create(request).await.unwrap_err();
    assert_eq!(err.code(), "TEMPLATE_NOT_FOUND");
    assert!(engine.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_build_failure_leaves_error_record() {
    let home = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let engine = engine_with(&home, runtime.clone(), 51040, 51049).await;

    runtime.fail_next("build_image").await;
    let err = engine.create(plain_request("broken")).await.unwrap_err();
    assert_eq!(err.code(), "RUNTIME_ERROR");

    let listed = engine.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, SandboxStatus::Error);
    assert_eq!(listed[0].mcp.port, None);

    // cleanup without --all removes errored records.
    let report = engine
        .cleanup(CleanupSelector::Inactive, false)
        .await
        .unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(report.failed, 0);
    assert!(engine.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stop_is_idempotent_and_releases_port() {
    let home = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let engine = engine_with(&home, runtime, 51050, 51059).await;

    let outcome = engine.create(plain_request("s4")).await.unwrap();
    let id = outcome.record.id.clone();
    assert_eq!(outcome.record.mcp.port, Some(51050));

    let stopped = engine.stop(&id).await.unwrap();
    assert_eq!(stopped.status, SandboxStatus::Stopped);
    assert_eq!(stopped.mcp.port, None);
    assert!(stopped.check_invariants().is_ok());

    // stop(stop(id)) == stop(id)
    let again = engine.stop(&id).await.unwrap();
    assert_eq!(again.status, SandboxStatus::Stopped);

    // The released port goes to the next create.
    let next = engine.create(plain_request("s5")).await.unwrap();
    assert_eq!(next.record.mcp.port, Some(51050));
}

#[tokio::test]
async fn test_start_after_stop_round_trips() {
    let home = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let engine = engine_with(&home, runtime, 51060, 51069).await;

    let outcome = engine.create(plain_request("cycle")).await.unwrap();
    let id = outcome.record.id.clone();

    engine.stop(&id).await.unwrap();
    let restarted = engine.start(&id).await.unwrap();
    assert_eq!(restarted.status, SandboxStatus::Running);
    assert!(restarted.mcp.port.is_some());

    // start on a running sandbox is INVALID_STATE.
    let err = engine.start(&id).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_STATE");
}

#[tokio::test]
async fn test_remove_is_terminal() {
    let home = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let engine = engine_with(&home, runtime.clone(), 51070, 51079).await;

    let outcome = engine.create(plain_request("gone")).await.unwrap();
    let id = outcome.record.id.clone();
    let container_id = outcome.record.container_id.clone().unwrap();

    engine.remove(&id, false).await.unwrap();
    assert!(runtime.container(&container_id).await.is_none());
    assert!(!runtime.has_image(&format!("dcsandbox:{}", id)).await);

    // remove(remove(id)) == NOT_FOUND, unless forced.
    let err = engine.remove(&id, false).await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
    engine.remove(&id, true).await.unwrap();
}

#[tokio::test]
async fn test_port_uniqueness_across_running_sandboxes() {
    let home = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let engine = engine_with(&home, runtime, 51080, 51089).await;

    for i in 0..3 {
        engine
            .create(plain_request(&format!("multi-{}", i)))
            .await
            .unwrap();
    }

    let mut ports: Vec<u16> = engine
        .list()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.status == SandboxStatus::Running)
        .filter_map(|r| r.mcp.port)
        .collect();
    ports.sort_unstable();
    let before = ports.len();
    ports.dedup();
    assert_eq!(before, 3);
    assert_eq!(ports.len(), 3);
}

#[tokio::test]
async fn test_port_exhaustion() {
    let home = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    // A single-port range: the second create must fail with PORT_EXHAUSTED
    // and leave an errored record (the container was already created).
    let engine = engine_with(&home, runtime, 51090, 51090).await;

    engine.create(plain_request("only")).await.unwrap();
    let err = engine.create(plain_request("starved")).await.unwrap_err();
    assert_eq!(err.code(), "PORT_EXHAUSTED");
}

#[tokio::test]
async fn test_crash_mid_create_recovers_to_error() {
    let home = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());

    // Simulate a process killed between record persistence and container
    // create: a bare `creating` record on disk.
    let store = Store::new(home.path());
    store
        .save(&SandboxRecord {
            id: "deadbeef00".into(),
            name: "interrupted".into(),
            status: SandboxStatus::Creating,
            created_at: Utc::now(),
            template: "node".into(),
            git: None,
            mcp: McpSettings {
                enabled: true,
                servers: vec![],
                port: None,
            },
            resources: Resources {
                memory_bytes: 1 << 30,
                cpu_millicores: 1000,
                disk_bytes: 10 << 30,
                timeout_seconds: 7200,
            },
            container_id: None,
        })
        .await
        .unwrap();

    let engine = engine_with(&home, runtime, 51100, 51109).await;

    let listed = engine.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, SandboxStatus::Error);

    let report = engine
        .cleanup(CleanupSelector::Inactive, false)
        .await
        .unwrap();
    assert_eq!(report.removed, 1);
    assert!(engine.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_externally_removed_container_flips_record_to_error() {
    let home = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let engine = engine_with(&home, runtime.clone(), 51110, 51119).await;

    let outcome = engine.create(plain_request("vanishing")).await.unwrap();
    let container_id = outcome.record.container_id.clone().unwrap();

    // The serving process dies and the container disappears behind the
    // engine's back; a fresh engine observes both on recovery.
    engine.broker().stop(&outcome.record.id).await;
    server::clear_pid(engine.store(), &outcome.record.id).await;
    runtime.kill_externally(&container_id).await;

    let reloaded = engine_with(&home, runtime, 51120, 51129).await;
    let listed = reloaded.list().await.unwrap();
    assert_eq!(listed[0].status, SandboxStatus::Error);
    assert_eq!(listed[0].mcp.port, None);
}

#[tokio::test]
async fn test_recovery_leaves_live_served_sandbox_untouched() {
    let home = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let engine = engine_with(&home, runtime.clone(), 51190, 51199).await;

    let outcome = engine.create(plain_request("healthy")).await.unwrap();
    assert!(server::pid_path(engine.store(), &outcome.record.id).exists());

    // A second invocation (list/info/stop of something else) constructs its
    // own engine over the same home while the first one still serves. Its
    // recovery must neither rebind the port nor corrupt the record.
    let observer = engine_with(&home, runtime, 51190, 51199).await;
    let listed = observer.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, SandboxStatus::Running);
    assert_eq!(listed[0].mcp.port, outcome.record.mcp.port);

    // The original endpoint is still bound by the first engine.
    assert!(engine.broker().is_serving(&outcome.record.id).await);
}

#[tokio::test]
async fn test_clone_failure_leaves_no_record() {
    if Command::new("git").arg("--version").output().is_err() {
        eprintln!("git unavailable, skipping");
        return;
    }

    let home = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let engine = engine_with(&home, runtime, 51130, 51139).await;

    let request = CreateRequest::builder()
        .git_url(Some("https://example.invalid/x.git".to_string()))
        .branch(Some("main".to_string()))
        .build();
    let err = engine.create(request).await.unwrap_err();
    assert_eq!(err.code(), "CLONE_FAILED");
    assert!(engine.list().await.unwrap().is_empty());

    // All ports are free again: the next create gets the bottom port.
    let outcome = engine.create(plain_request("after")).await.unwrap();
    assert_eq!(outcome.record.mcp.port, Some(51130));
}

#[tokio::test]
async fn test_auto_detect_picks_react_template() {
    if Command::new("git").arg("--version").output().is_err() {
        eprintln!("git unavailable, skipping");
        return;
    }

    // Build a local repository that looks like a react app.
    let source = TempDir::new().unwrap();
    std::fs::write(
        source.path().join("package.json"),
        r#"{"name": "app", "dependencies": {"react": "^18.2.0"}}"#,
    )
    .unwrap();
    std::fs::write(source.path().join("package-lock.json"), "{}").unwrap();
    std::fs::create_dir_all(source.path().join("src")).unwrap();
    std::fs::write(source.path().join("src/App.tsx"), "export default 1;").unwrap();

    let git = |args: &[&str]| {
        let status = Command::new("git")
            .args(args)
            .current_dir(source.path())
            .env("GIT_AUTHOR_NAME", "test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .output()
            .expect("git runs");
        assert!(status.status.success(), "git {:?} failed", args);
    };
    git(&["init", "--initial-branch", "main"]);
    git(&["add", "."]);
    git(&["commit", "-m", "seed"]);

    let home = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let engine = engine_with(&home, runtime, 51140, 51149).await;

    let request = CreateRequest::builder()
        .git_url(Some(format!("file://{}", source.path().display())))
        .branch(Some("main".to_string()))
        .auto_detect(true)
        .build();
    let outcome = engine.create(request).await.unwrap();

    assert_eq!(outcome.record.template, "react");
    // The workspace carries the cloned tree.
    let workspace = engine.store().workspace_dir(&outcome.record.id);
    assert!(workspace.join("package.json").exists());
    assert!(workspace.join("src/App.tsx").exists());
}

#[tokio::test]
async fn test_info_reports_live_container_state() {
    let home = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let engine = engine_with(&home, runtime, 51150, 51159).await;

    let outcome = engine.create(plain_request("peek")).await.unwrap();
    let info = engine.info(&outcome.record.id).await.unwrap();
    assert!(info.container.is_some());
    assert!(info.container.unwrap().state.is_running());

    let err = engine.info("nope000000").await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_logs_tail() {
    use futures::StreamExt;

    let home = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let engine = engine_with(&home, runtime.clone(), 51160, 51169).await;

    let outcome = engine.create(plain_request("chatty")).await.unwrap();
    let container_id = outcome.record.container_id.clone().unwrap();
    for i in 0..5 {
        runtime.push_log(&container_id, &format!("line {}", i)).await;
    }

    let mut stream = engine
        .logs(
            &outcome.record.id,
            dcsandbox::runtime::LogOptions {
                follow: false,
                tail_lines: Some(2),
            },
        )
        .await
        .unwrap();

    let mut lines = Vec::new();
    while let Some(line) = stream.next().await {
        lines.push(line.unwrap());
    }
    assert_eq!(lines, vec!["line 3", "line 4"]);
}

#[tokio::test]
async fn test_post_create_failure_is_a_warning() {
    let home = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let engine = engine_with(&home, runtime.clone(), 51170, 51179).await;

    // The node template's post-create command is scripted to fail.
    runtime
        .script_shell(
            "[ -f package.json ] && npm install || true",
            1,
            "npm exploded",
        )
        .await;

    let outcome = engine.create(plain_request("warned")).await.unwrap();
    assert_eq!(outcome.record.status, SandboxStatus::Running);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("post-create"));
}

#[tokio::test]
async fn test_cleanup_force_controls_subordinate_failures() {
    let home = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let engine = engine_with(&home, runtime.clone(), 51200, 51209).await;

    let outcome = engine.create(plain_request("stubborn")).await.unwrap();
    engine.stop(&outcome.record.id).await.unwrap();

    // Without --force a container that refuses removal surfaces as a
    // failure and the record stays.
    runtime.fail_next("remove_container").await;
    let report = engine
        .cleanup(CleanupSelector::Inactive, false)
        .await
        .unwrap();
    assert_eq!(report.removed, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(engine.list().await.unwrap().len(), 1);

    // With --force the same failure is swallowed and the record goes away.
    runtime.fail_next("remove_container").await;
    let report = engine
        .cleanup(CleanupSelector::Inactive, true)
        .await
        .unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(report.failed, 0);
    assert!(engine.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_record_survives_reload_byte_identical() {
    let home = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let engine = engine_with(&home, runtime, 51180, 51189).await;

    let outcome = engine.create(plain_request("durable")).await.unwrap();
    let store = Store::new(home.path());

    let loaded = store.load(&outcome.record.id).await.unwrap();
    assert_eq!(outcome.record, loaded);

    // Writing the loaded record back produces identical bytes.
    let path = store.record_path(&outcome.record.id);
    let before = std::fs::read(&path).unwrap();
    store.save(&loaded).await.unwrap();
    let after = std::fs::read(&path).unwrap();
    assert_eq!(before, after);
}
