//! The sandbox lifecycle engine.
//!
//! Owns sandbox records and coordinates clone, detection, template
//! resolution, build-context materialization, image build, container
//! create/start, MCP attachment, and post-create, as well as stop, remove,
//! cleanup, crash recovery, and the background reaper's sweep.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use typed_builder::TypedBuilder;
use typed_path::Utf8UnixPathBuf;

use crate::{
    config::{GlobalConfig, DEFAULT_GIT_BRANCH, DEFAULT_TEMPLATE, DETECTION_CONFIDENCE_THRESHOLD},
    detect::{detect_project, scan_project},
    mcp::McpBroker,
    runtime::{BindMount, ContainerInfo, ContainerRuntime, ContainerSpec, LogOptions, LogStream},
    store::{
        GitSource, McpSettings, Resources, SandboxRecord, SandboxStatus, Store,
    },
    template::Template,
    utils::{
        container_name, cpus_to_millicores, generate_sandbox_id, image_tag,
        millicores_to_nano_cpus, parse_interval, parse_memory_size, timeout_minutes_to_seconds,
        CONTAINER_WORKSPACE_DIR, DEFAULT_MAX_CPUS, GIT_CACHE_SUBDIR, SANDBOX_LABEL,
    },
    DcsandboxError, DcsandboxResult,
};

use super::{clone, context, server, state};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Grace period handed to the runtime when stopping containers.
const STOP_GRACE: Duration = Duration::from_secs(10);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The lifecycle engine. Cheap to share behind an [`Arc`]; all operations
/// take `&self` and serialize per sandbox id.
pub struct SandboxEngine {
    config: GlobalConfig,
    home: PathBuf,
    store: Store,
    runtime: Arc<dyn ContainerRuntime>,
    templates: crate::template::TemplateRegistry,
    broker: Arc<McpBroker>,
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Everything `create` accepts. Unset fields fall back to the global
/// configuration's defaults.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct CreateRequest {
    /// Explicit sandbox name; derived from the repository basename when
    /// absent.
    #[builder(default)]
    pub name: Option<String>,

    /// Repository to clone into the workspace.
    #[builder(default)]
    pub git_url: Option<String>,

    /// Branch to clone; defaults to `main`.
    #[builder(default)]
    pub branch: Option<String>,

    /// Explicit template name.
    #[builder(default)]
    pub template: Option<String>,

    /// Run project detection on the clone even when a template was given.
    #[builder(default)]
    pub auto_detect: bool,

    /// Memory limit string, e.g. `2G`.
    #[builder(default)]
    pub memory: Option<String>,

    /// CPU count.
    #[builder(default)]
    pub cpus: Option<f64>,

    /// Sandbox timeout in minutes.
    #[builder(default)]
    pub timeout_minutes: Option<u64>,

    /// Exempt the sandbox from the reaper.
    #[builder(default)]
    pub persist: bool,
}

/// The result of a successful `create`.
#[derive(Debug)]
pub struct CreateOutcome {
    /// The persisted record, at `running`.
    pub record: SandboxRecord,

    /// Non-fatal post-create warnings.
    pub warnings: Vec<String>,
}

/// A record plus live container information, when reachable.
#[derive(Debug)]
pub struct SandboxInfo {
    /// The persisted record.
    pub record: SandboxRecord,

    /// Live container state, if the runtime could be asked.
    pub container: Option<ContainerInfo>,
}

/// Which records `cleanup` touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupSelector {
    /// Stopped and errored records only.
    Inactive,

    /// Every record.
    All,
}

/// Per-run cleanup tally.
#[derive(Debug, Default, Clone, Copy)]
pub struct CleanupReport {
    /// Records removed.
    pub removed: usize,

    /// Records that failed to remove.
    pub failed: usize,
}

/// What the create error path has to undo.
#[derive(Debug, Default)]
struct CreateProgress {
    image_built: bool,
    broker_started: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SandboxEngine {
    /// Builds an engine, loads templates, and recovers persisted state.
    pub async fn new(
        config: GlobalConfig,
        home: PathBuf,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> DcsandboxResult<Self> {
        let custom_templates = config
            .get_templates()
            .get_custom_path()
            .clone()
            .unwrap_or_else(|| {
                crate::utils::dcsandbox_config_path().join(crate::utils::TEMPLATES_SUBDIR)
            });
        let templates = crate::template::TemplateRegistry::load(Some(&custom_templates)).await?;

        let broker = Arc::new(McpBroker::new(
            config.get_mcp().get_proxy_host().clone(),
            *config.get_mcp().get_port_range(),
        ));

        let engine = Self {
            store: Store::new(&home),
            config,
            home,
            runtime,
            templates,
            broker,
            locks: StdMutex::new(HashMap::new()),
        };

        engine.recover().await;
        Ok(engine)
    }

    /// The broker serving this engine's sandboxes.
    pub fn broker(&self) -> &Arc<McpBroker> {
        &self.broker
    }

    /// The record store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    fn lock_for(&self, id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().expect("lock map poisoned");
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    //----------------------------------------------------------------------
    // Operation: create
    //----------------------------------------------------------------------

    /// Creates a sandbox and leaves it `running`.
    pub async fn create(&self, request: CreateRequest) -> DcsandboxResult<CreateOutcome> {
        let resources = self.resolve_resources(&request)?;

        let mut id = generate_sandbox_id();
        while self.store.contains(&id) {
            id = generate_sandbox_id();
        }

        let name = self.resolve_name(&request, &id).await?;

        let lock = self.lock_for(&id);
        let _guard = lock.lock().await;

        let mut record = SandboxRecord {
            id: id.clone(),
            name,
            status: SandboxStatus::Creating,
            created_at: Utc::now(),
            template: String::new(),
            git: None,
            mcp: McpSettings {
                enabled: true,
                servers: Vec::new(),
                port: None,
            },
            resources,
            container_id: None,
        };

        // Persisting at `creating` happens before any side effect outside
        // the sandbox directory.
        self.store.save(&record).await?;

        let mut progress = CreateProgress::default();
        match self.create_steps(&mut record, &request, &mut progress).await {
            Result::Ok(warnings) => Ok(CreateOutcome { record, warnings }),
            Result::Err(e) => {
                self.abort_create(&mut record, &progress).await;
                Err(e)
            }
        }
    }

    async fn create_steps(
        &self,
        record: &mut SandboxRecord,
        request: &CreateRequest,
        progress: &mut CreateProgress,
    ) -> DcsandboxResult<Vec<String>> {
        let id = record.id.clone();

        // Clone, when a repository was given.
        let clone_dir = if let Some(url) = &request.git_url {
            let branch = request
                .branch
                .clone()
                .unwrap_or_else(|| DEFAULT_GIT_BRANCH.to_string());
            let dest = self.home.join(GIT_CACHE_SUBDIR).join(&id);
            clone::clone_repository(url, &branch, &dest).await?;
            record.git = Some(GitSource {
                url: url.clone(),
                branch,
                clone_path: dest.clone(),
            });
            self.store.save(record).await?;
            Some(dest)
        } else {
            None
        };

        // Resolve the template, detecting when asked to or when nothing was
        // specified and a clone exists.
        let template = self
            .resolve_template(request, clone_dir.as_deref())
            .await?;
        record.template = template.name.clone();
        record.mcp.servers = template.capability_servers.clone();
        self.store.save(record).await?;

        // Materialize the build context under the sandbox directory.
        let sandbox_dir = self.store.sandbox_dir(&id);
        context::materialize(&sandbox_dir, clone_dir.as_deref(), &template, &record.name).await?;

        // Build the image.
        progress.image_built = true;
        self.runtime
            .build_image(&sandbox_dir, &image_tag(&id))
            .await?;

        // Create the container.
        let spec = self.container_spec(record, &template);
        let container_id = self.runtime.create_container(&spec).await?;
        record.container_id = Some(container_id.clone());
        self.store.save(record).await?;

        // Start it and attach the MCP endpoint.
        self.runtime.start_container(&container_id).await?;

        let port = self.broker.allocate_port().await?;
        record.mcp.port = Some(port);
        self.store.save(record).await?;

        self.broker
            .start(
                &id,
                port,
                &record.mcp.servers,
                self.runtime.clone(),
                &container_id,
            )
            .await?;
        progress.broker_started = true;
        server::write_pid(&self.store, &id).await?;

        state::transition(record, SandboxStatus::Running, "create")?;
        self.store.save(record).await?;

        tracing::info!(id = %id, name = %record.name, port = port, "sandbox running");

        // Post-create commands are warnings-only; the sandbox stays running.
        let mut warnings = Vec::new();
        for command in &template.post_create {
            let exec = self
                .runtime
                .exec(
                    &container_id,
                    &[
                        "/bin/bash".to_string(),
                        "-c".to_string(),
                        command.to_string(),
                    ],
                    None,
                    Some(CONTAINER_WORKSPACE_DIR),
                )
                .await;
            match exec {
                Result::Ok(output) if output.exit_code == 0 => {}
                Result::Ok(output) => {
                    let warning = format!(
                        "post-create command failed (exit {}): {}",
                        output.exit_code, command
                    );
                    tracing::warn!(id = %id, "{}", warning);
                    warnings.push(warning);
                }
                Result::Err(e) => {
                    let warning = format!("post-create command errored: {}: {}", command, e);
                    tracing::warn!(id = %id, "{}", warning);
                    warnings.push(warning);
                }
            }
        }

        Ok(warnings)
    }

    /// Error-path cleanup for a failed create.
    ///
    /// Before any image or container exists the record is removed outright;
    /// after that point the record flips to `error` and stays for an
    /// explicit `remove`.
    async fn abort_create(&self, record: &mut SandboxRecord, progress: &CreateProgress) {
        let id = record.id.clone();

        if progress.broker_started {
            self.broker.stop(&id).await;
            server::clear_pid(&self.store, &id).await;
        } else if let Some(port) = record.mcp.port {
            self.broker.release_port(port).await;
        }
        record.mcp.port = None;

        if let Some(container_id) = &record.container_id {
            if let Err(e) = self.runtime.remove_container(container_id, true).await {
                tracing::warn!(id = %id, error = %e, "failed to remove container during abort");
            }
        }

        if progress.image_built {
            if let Err(e) = self.runtime.remove_image(&image_tag(&id)).await {
                tracing::debug!(id = %id, error = %e, "failed to remove image during abort");
            }
        }

        let keep_record = progress.image_built || record.container_id.is_some();
        if keep_record {
            if state::transition(record, SandboxStatus::Error, "abort-create").is_ok() {
                if let Err(e) = self.store.save(record).await {
                    tracing::warn!(id = %id, error = %e, "failed to persist error status");
                }
            }
        } else if let Err(e) = self.store.remove(&id).await {
            tracing::warn!(id = %id, error = %e, "failed to remove aborted record");
        }

        let clone_dir = self.home.join(GIT_CACHE_SUBDIR).join(&id);
        if clone_dir.exists() {
            let _ = tokio::fs::remove_dir_all(&clone_dir).await;
        }
    }

    //----------------------------------------------------------------------
    // Operation: start / stop
    //----------------------------------------------------------------------

    /// Starts a stopped sandbox.
    pub async fn start(&self, id: &str) -> DcsandboxResult<SandboxRecord> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut record = self.store.load(id).await?;
        if record.status != SandboxStatus::Stopped {
            return Err(DcsandboxError::InvalidState {
                id: id.to_string(),
                status: record.status.to_string(),
                operation: "start".to_string(),
            });
        }

        let container_id = record
            .container_id
            .clone()
            .ok_or_else(|| DcsandboxError::NoContainer(id.to_string()))?;

        if let Err(e) = self.runtime.start_container(&container_id).await {
            // The container disappearing externally flips the record.
            let _ = state::transition(&mut record, SandboxStatus::Error, "start");
            let _ = self.store.save(&record).await;
            return Err(e);
        }

        let port = self.broker.allocate_port().await?;
        record.mcp.port = Some(port);
        self.store.save(&record).await?;

        self.broker
            .start(
                id,
                port,
                &record.mcp.servers,
                self.runtime.clone(),
                &container_id,
            )
            .await?;
        server::write_pid(&self.store, id).await?;

        state::transition(&mut record, SandboxStatus::Running, "start")?;
        self.store.save(&record).await?;

        tracing::info!(id = %id, port = port, "sandbox started");
        Ok(record)
    }

    /// Stops a running sandbox. Idempotent: stopping a stopped sandbox is a
    /// no-op success.
    pub async fn stop(&self, id: &str) -> DcsandboxResult<SandboxRecord> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut record = self.store.load(id).await?;
        match record.status {
            SandboxStatus::Stopped => return Ok(record),
            SandboxStatus::Running => {}
            other => {
                return Err(DcsandboxError::InvalidState {
                    id: id.to_string(),
                    status: other.to_string(),
                    operation: "stop".to_string(),
                })
            }
        }

        // The endpoint may live in this process or in a detached server;
        // cover both.
        self.broker.stop(id).await;
        server::terminate(&self.store, id).await;

        if let Some(container_id) = &record.container_id {
            self.runtime.stop_container(container_id, STOP_GRACE).await?;
        }

        state::transition(&mut record, SandboxStatus::Stopped, "stop")?;
        record.mcp.port = None;
        self.store.save(&record).await?;

        tracing::info!(id = %id, "sandbox stopped");
        Ok(record)
    }

    //----------------------------------------------------------------------
    // Operation: remove / cleanup
    //----------------------------------------------------------------------

    /// Removes a sandbox: container, image, clone cache, record directory.
    ///
    /// With `force`, subordinate failures are swallowed and the operation
    /// reports success as long as the record directory is gone.
    pub async fn remove(&self, id: &str, force: bool) -> DcsandboxResult<()> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let record = match self.store.load(id).await {
            Result::Ok(record) => Some(record),
            Result::Err(DcsandboxError::SandboxNotFound(_)) if force => None,
            Result::Err(DcsandboxError::SandboxNotFound(_)) => {
                return Err(DcsandboxError::SandboxNotFound(id.to_string()))
            }
            Result::Err(e) if force => {
                tracing::warn!(id = %id, error = %e, "removing sandbox with unreadable record");
                None
            }
            Result::Err(e) => return Err(e),
        };

        if let Some(record) = &record {
            if record.status == SandboxStatus::Running {
                self.broker.stop(id).await;
                server::terminate(&self.store, id).await;
                if let Some(container_id) = &record.container_id {
                    if let Err(e) = self.runtime.stop_container(container_id, STOP_GRACE).await {
                        tracing::warn!(id = %id, error = %e, "stop before remove failed, continuing");
                    }
                }
            }

            if let Some(container_id) = &record.container_id {
                if let Err(e) = self.runtime.remove_container(container_id, true).await {
                    if !force {
                        return Err(e);
                    }
                    tracing::warn!(id = %id, error = %e, "container removal failed, continuing");
                }
            }
        }

        self.broker.stop(id).await;

        if let Err(e) = self.runtime.remove_image(&image_tag(id)).await {
            tracing::debug!(id = %id, error = %e, "image removal failed, continuing");
        }

        let clone_dir = self.home.join(GIT_CACHE_SUBDIR).join(id);
        if clone_dir.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&clone_dir).await {
                tracing::debug!(id = %id, error = %e, "clone cache removal failed, continuing");
            }
        }

        self.store.remove(id).await?;
        self.locks.lock().expect("lock map poisoned").remove(id);

        tracing::info!(id = %id, "sandbox removed");
        Ok(())
    }

    /// Removes inactive (or all) sandboxes, reporting per-record outcomes.
    ///
    /// With `force`, subordinate failures inside each removal are swallowed
    /// too; without it, a record whose container cannot be removed counts
    /// as failed and stays on disk.
    pub async fn cleanup(
        &self,
        selector: CleanupSelector,
        force: bool,
    ) -> DcsandboxResult<CleanupReport> {
        let records = self.store.list().await?;
        let mut report = CleanupReport::default();

        for record in records {
            let eligible = match selector {
                CleanupSelector::All => true,
                CleanupSelector::Inactive => matches!(
                    record.status,
                    SandboxStatus::Stopped | SandboxStatus::Error
                ),
            };
            if !eligible {
                continue;
            }

            match self.remove(&record.id, force).await {
                Result::Ok(()) => report.removed += 1,
                Result::Err(e) => {
                    tracing::warn!(id = %record.id, error = %e, "cleanup failed for sandbox");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    //----------------------------------------------------------------------
    // Operation: info / list / logs
    //----------------------------------------------------------------------

    /// Returns a record with live container info when reachable.
    pub async fn info(&self, id: &str) -> DcsandboxResult<SandboxInfo> {
        let record = self.store.load(id).await?;
        let container = match &record.container_id {
            Some(container_id) => self.runtime.inspect_container(container_id).await.ok(),
            None => None,
        };
        Ok(SandboxInfo { record, container })
    }

    /// Lists all records, newest first.
    pub async fn list(&self) -> DcsandboxResult<Vec<SandboxRecord>> {
        self.store.list().await
    }

    /// Streams container logs for a sandbox.
    pub async fn logs(&self, id: &str, options: LogOptions) -> DcsandboxResult<LogStream> {
        let record = self.store.load(id).await?;
        let container_id = record
            .container_id
            .ok_or_else(|| DcsandboxError::NoContainer(id.to_string()))?;
        self.runtime.logs(&container_id, options).await
    }

    //----------------------------------------------------------------------
    // Recovery and reaping
    //----------------------------------------------------------------------

    /// Reconciles persisted records with reality on engine start.
    ///
    /// Rebuilds the port set and flips interrupted `creating` records and
    /// running records whose container is gone to `error`. Recovery never
    /// binds anything: a running sandbox whose `serve.pid` names a live
    /// process is being served by that process and is left untouched, so
    /// read-only commands cannot disturb a healthy endpoint. A running
    /// record with a live container but no server keeps its status; a
    /// stop/start cycle re-attaches the endpoint.
    async fn recover(&self) {
        let records = match self.store.list().await {
            Result::Ok(records) => records,
            Result::Err(e) => {
                tracing::warn!(error = %e, "record enumeration failed during recovery");
                return;
            }
        };

        for mut record in records {
            if let Some(port) = record.mcp.port {
                self.broker.mark_port_used(port).await;
            }

            match record.status {
                SandboxStatus::Creating => {
                    tracing::warn!(id = %record.id, "found interrupted create, marking error");
                    self.flip_to_error(&mut record).await;
                }
                SandboxStatus::Running => {
                    if server::live_pid(&self.store, &record.id).await.is_some() {
                        tracing::debug!(id = %record.id, "sandbox served by a live process");
                        continue;
                    }

                    let alive = match &record.container_id {
                        Some(container_id) => self
                            .runtime
                            .inspect_container(container_id)
                            .await
                            .map(|info| info.state.is_running())
                            .unwrap_or(false),
                        None => false,
                    };

                    if !alive {
                        tracing::warn!(id = %record.id, "container gone, marking error");
                        self.flip_to_error(&mut record).await;
                    }
                }
                SandboxStatus::Stopped | SandboxStatus::Error => {}
            }
        }
    }

    async fn flip_to_error(&self, record: &mut SandboxRecord) {
        if let Some(port) = record.mcp.port.take() {
            self.broker.release_port(port).await;
        }
        if state::transition(record, SandboxStatus::Error, "recover").is_ok() {
            if let Err(e) = self.store.save(record).await {
                tracing::warn!(id = %record.id, error = %e, "failed to persist error status");
            }
        }
    }

    /// One reaper sweep: stops running sandboxes past their deadline and,
    /// when auto-cleanup is on, removes long-inactive records.
    pub async fn reap(&self) {
        let records = match self.store.list().await {
            Result::Ok(records) => records,
            Result::Err(e) => {
                tracing::warn!(error = %e, "record enumeration failed during reap");
                return;
            }
        };

        let now = Utc::now();
        let inactive_cutoff = parse_interval(self.config.get_cleanup().get_inactive_timeout())
            .ok()
            .and_then(|d| chrono::Duration::from_std(d).ok());

        for record in records {
            match record.status {
                SandboxStatus::Running => {
                    // timeoutSeconds == 0 encodes --persist.
                    if record.resources.timeout_seconds == 0 {
                        continue;
                    }
                    let deadline = record.created_at
                        + chrono::Duration::seconds(record.resources.timeout_seconds as i64);
                    if now >= deadline {
                        tracing::info!(id = %record.id, "sandbox past its deadline, stopping");
                        if let Err(e) = self.stop(&record.id).await {
                            tracing::warn!(id = %record.id, error = %e, "reaper stop failed");
                        }
                    }
                }
                SandboxStatus::Stopped | SandboxStatus::Error => {
                    let auto = *self.config.get_defaults().get_auto_cleanup();
                    let preserve = *self.config.get_cleanup().get_preserve_named();
                    let Some(cutoff) = inactive_cutoff else {
                        continue;
                    };
                    if auto && !preserve && now >= record.created_at + cutoff {
                        tracing::info!(id = %record.id, "removing long-inactive sandbox");
                        if let Err(e) = self.remove(&record.id, true).await {
                            tracing::warn!(id = %record.id, error = %e, "reaper remove failed");
                        }
                    }
                }
                SandboxStatus::Creating => {}
            }
        }
    }

    //----------------------------------------------------------------------
    // Helpers
    //----------------------------------------------------------------------

    fn resolve_resources(&self, request: &CreateRequest) -> DcsandboxResult<Resources> {
        let defaults = self.config.get_defaults();

        let memory = request
            .memory
            .clone()
            .unwrap_or_else(|| defaults.get_memory().clone());
        let memory_bytes = parse_memory_size(&memory)?;

        let cpus = request.cpus.unwrap_or(*defaults.get_cpu());
        let cpu_millicores = cpus_to_millicores(cpus, DEFAULT_MAX_CPUS)?;

        let timeout_minutes = request.timeout_minutes.unwrap_or(*defaults.get_timeout());
        let timeout_seconds = if request.persist {
            0
        } else {
            timeout_minutes_to_seconds(timeout_minutes)?
        };

        let disk_bytes = parse_memory_size(defaults.get_disk())?;

        Ok(Resources {
            memory_bytes,
            cpu_millicores,
            disk_bytes,
            timeout_seconds,
        })
    }

    async fn resolve_name(&self, request: &CreateRequest, id: &str) -> DcsandboxResult<String> {
        let name = request
            .name
            .clone()
            .or_else(|| request.git_url.as_deref().and_then(clone::repository_basename))
            .unwrap_or_else(|| format!("sandbox-{}", id));

        let valid = !name.is_empty()
            && name.len() <= 63
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        if !valid {
            return Err(DcsandboxError::InvalidName(name));
        }

        // Name matching is case-sensitive across active records.
        let records = self.store.list().await?;
        if records.iter().any(|r| r.name == name) {
            return Err(DcsandboxError::DuplicateName(name));
        }

        Ok(name)
    }

    async fn resolve_template(
        &self,
        request: &CreateRequest,
        clone_dir: Option<&std::path::Path>,
    ) -> DcsandboxResult<Template> {
        let should_detect =
            clone_dir.is_some() && (request.auto_detect || request.template.is_none());

        let name = if should_detect {
            let listing = scan_project(clone_dir.expect("checked above")).await?;
            match detect_project(&listing) {
                Some(detection) if detection.confidence >= DETECTION_CONFIDENCE_THRESHOLD => {
                    tracing::info!(
                        language = %detection.language,
                        template = %detection.template,
                        confidence = detection.confidence,
                        "project detected"
                    );
                    detection.template
                }
                Some(detection) => {
                    tracing::info!(
                        language = %detection.language,
                        confidence = detection.confidence,
                        "detection below threshold, falling back"
                    );
                    DEFAULT_TEMPLATE.to_string()
                }
                None => DEFAULT_TEMPLATE.to_string(),
            }
        } else {
            request
                .template
                .clone()
                .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string())
        };

        self.templates.resolve(&name).map(Template::clone)
    }

    fn container_spec(&self, record: &SandboxRecord, template: &Template) -> ContainerSpec {
        let mut env = template.env.clone();
        env.insert("SANDBOX_ID".to_string(), record.id.clone());
        env.insert("SANDBOX_NAME".to_string(), record.name.clone());

        let mut labels = HashMap::new();
        labels.insert(SANDBOX_LABEL.to_string(), record.id.clone());

        ContainerSpec {
            image: image_tag(&record.id),
            name: container_name(&record.id),
            workdir: Some(Utf8UnixPathBuf::from(CONTAINER_WORKSPACE_DIR)),
            env,
            binds: vec![BindMount {
                host: self.store.workspace_dir(&record.id),
                container: Utf8UnixPathBuf::from(CONTAINER_WORKSPACE_DIR),
            }],
            memory_bytes: record.resources.memory_bytes,
            nano_cpus: millicores_to_nano_cpus(record.resources.cpu_millicores),
            network: self.config.get_container().get_network().0.clone(),
            exposed_ports: template.ports.clone(),
            labels,
        }
    }
}
