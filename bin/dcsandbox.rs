use std::sync::Arc;

use clap::{CommandFactory, Parser};
use dcsandbox::{
    cli::{DcsandboxArgs, DcsandboxSubcommand},
    config::{GlobalConfig, DEFAULT_CONFIG_PATH},
    management::{
        server, spawn_reaper, CleanupSelector, CreateRequest, SandboxEngine, REAPER_INTERVAL,
    },
    runtime::{DockerRuntime, LogOptions},
    utils::dcsandbox_home_path,
    DcsandboxResult,
};
use futures::StreamExt;
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::Notify,
};
use tracing_subscriber::EnvFilter;

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let args = DcsandboxArgs::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(args).await {
        eprintln!("error[{}]: {}", e.code(), e);
        std::process::exit(1);
    }
}

async fn run(args: DcsandboxArgs) -> DcsandboxResult<()> {
    let Some(subcommand) = args.subcommand else {
        DcsandboxArgs::command().print_help()?;
        return Ok(());
    };

    // --detach re-launches this binary as a background server and returns
    // before touching the runtime.
    if let Some(foreground_args) = detached_args(&subcommand) {
        let pid = server::spawn_detached(&foreground_args).await?;
        println!(
            "detached server started (PID {}); run 'dcsandbox list' to see the sandbox",
            pid
        );
        return Ok(());
    }

    let config = GlobalConfig::load(&*DEFAULT_CONFIG_PATH).await?;
    let home = dcsandbox_home_path();
    let runtime = Arc::new(DockerRuntime::connect().await?);
    let engine = Arc::new(SandboxEngine::new(config.clone(), home, runtime).await?);

    match subcommand {
        DcsandboxSubcommand::Create {
            git,
            branch,
            name,
            template,
            memory,
            cpu,
            timeout,
            persist,
            auto_detect,
            detach: _,
        } => {
            let request = CreateRequest::builder()
                .name(name)
                .git_url(git)
                .branch(Some(branch))
                .template(template)
                .auto_detect(auto_detect)
                .memory(memory)
                .cpus(cpu)
                .timeout_minutes(timeout)
                .persist(persist)
                .build();

            let outcome = engine.create(request).await?;
            for warning in &outcome.warnings {
                eprintln!("warning: {}", warning);
            }
            println!(
                "{}  {}  template={}  mcp=ws://{}:{}",
                outcome.record.id,
                outcome.record.name,
                outcome.record.template,
                config.get_mcp().get_proxy_host(),
                outcome.record.mcp.port.unwrap_or_default(),
            );

            serve_until_signalled(&engine, &outcome.record.id, &config).await;
        }
        DcsandboxSubcommand::List => {
            for record in engine.list().await? {
                println!(
                    "{}  {:<24}  {:<8}  {:<10}  {}",
                    record.id,
                    record.name,
                    record.status,
                    record.template,
                    record
                        .mcp
                        .port
                        .map_or_else(String::new, |p| format!("port {}", p)),
                );
            }
        }
        DcsandboxSubcommand::Info { id } => {
            let info = engine.info(&id).await?;
            println!("{}", serde_json::to_string_pretty(&info.record)?);
            match info.container {
                Some(container) => println!("container: {} ({:?})", container.id, container.state),
                None => println!("container: unreachable"),
            }
        }
        DcsandboxSubcommand::Start { id, detach: _ } => {
            let record = engine.start(&id).await?;
            println!(
                "{} running on port {}",
                record.id,
                record.mcp.port.unwrap_or_default()
            );
            serve_until_signalled(&engine, &id, &config).await;
        }
        DcsandboxSubcommand::Stop { id } => {
            let record = engine.stop(&id).await?;
            println!("{} {}", record.id, record.status);
        }
        DcsandboxSubcommand::Remove { id, force } => {
            engine.remove(&id, force).await?;
            println!("removed {}", id);
        }
        DcsandboxSubcommand::Cleanup { all, force } => {
            let selector = if all {
                CleanupSelector::All
            } else {
                CleanupSelector::Inactive
            };
            let report = engine.cleanup(selector, force).await?;
            println!("removed {}, failed {}", report.removed, report.failed);
        }
        DcsandboxSubcommand::Logs { id, follow, tail } => {
            let mut stream = engine
                .logs(
                    &id,
                    LogOptions {
                        follow,
                        tail_lines: Some(tail),
                    },
                )
                .await?;
            while let Some(line) = stream.next().await {
                println!("{}", line?);
            }
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// For `create --detach` / `start --detach`, rebuilds the argument vector
/// the background server runs with (the same command, minus `--detach`).
fn detached_args(subcommand: &DcsandboxSubcommand) -> Option<Vec<String>> {
    match subcommand {
        DcsandboxSubcommand::Create {
            git,
            branch,
            name,
            template,
            memory,
            cpu,
            timeout,
            persist,
            auto_detect,
            detach: true,
        } => {
            let mut args = vec!["create".to_string(), "--branch".to_string(), branch.clone()];
            if let Some(git) = git {
                args.extend(["--git".to_string(), git.clone()]);
            }
            if let Some(name) = name {
                args.extend(["--name".to_string(), name.clone()]);
            }
            if let Some(template) = template {
                args.extend(["--template".to_string(), template.clone()]);
            }
            if let Some(memory) = memory {
                args.extend(["--memory".to_string(), memory.clone()]);
            }
            if let Some(cpu) = cpu {
                args.extend(["--cpu".to_string(), cpu.to_string()]);
            }
            if let Some(timeout) = timeout {
                args.extend(["--timeout".to_string(), timeout.to_string()]);
            }
            if *persist {
                args.push("--persist".to_string());
            }
            if *auto_detect {
                args.push("--auto-detect".to_string());
            }
            Some(args)
        }
        DcsandboxSubcommand::Start { id, detach: true } => {
            Some(vec!["start".to_string(), id.clone()])
        }
        _ => None,
    }
}

/// Serves the MCP endpoint until SIGINT or SIGTERM.
///
/// The endpoint is process-local: the WebSocket listener and capability
/// server children die with this process. `stop` from another invocation
/// reaches a detached server through its `serve.pid` with SIGTERM.
async fn serve_until_signalled(engine: &Arc<SandboxEngine>, sandbox_id: &str, config: &GlobalConfig) {
    let shutdown = Arc::new(Notify::new());
    let reaper = spawn_reaper(engine.clone(), REAPER_INTERVAL, shutdown.clone());

    tracing::info!(id = %sandbox_id, "serving until SIGINT or SIGTERM");
    let mut sigterm = match signal(SignalKind::terminate()) {
        Result::Ok(sigterm) => sigterm,
        Result::Err(e) => {
            tracing::warn!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            shutdown.notify_waiters();
            reaper.abort();
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
        _ = sigterm.recv() => tracing::info!("terminated"),
    }
    shutdown.notify_waiters();
    reaper.abort();

    if *config.get_cleanup().get_on_exit() {
        tracing::info!(id = %sandbox_id, "stopping sandbox on exit");
        if let Err(e) = engine.stop(sandbox_id).await {
            tracing::warn!(id = %sandbox_id, error = %e, "stop on exit failed");
        }
    } else {
        // The container keeps running; release the endpoint cleanly so the
        // children do not leak, and retire this process's serve.pid.
        engine.broker().stop(sandbox_id).await;
        server::clear_pid(engine.store(), sandbox_id).await;
    }
}
