// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use opencode_agent::{builtin_agents, DepthGuard, LockMode, ProcessorHandle, SessionProcessor, TaskTool};
use opencode_clienttools::{ClientToolBroker, ClientToolRegistry};
use opencode_events::EventBus;
use opencode_permission::{DoomLoopDetector, PermissionBroker};
use opencode_provider::provider_registry::initialize_providers;
use opencode_server::AppState;
use opencode_storage::Storage;
use opencode_tools::{
    EditFileTool, GlobTool, GrepTool, ListDirTool, ReadFileTool, ShellTool, TodoWriteTool, ToolRegistry, WebFetchTool,
    WriteTool,
};

#[derive(Debug, Parser)]
#[command(name = "opencode-server", about = "AI coding-agent back-end server")]
struct Cli {
    /// Address to bind the HTTP API to.
    #[arg(long, env = "OPENCODE_LISTEN", default_value = "127.0.0.1:4096")]
    listen: SocketAddr,

    /// Path to an additional config layer, merged on top of the default search path.
    #[arg(long, env = "OPENCODE_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace). Default is info.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = opencode_config::load(cli.config.as_deref())?;

    let storage = Storage::new();
    let events = EventBus::new();

    let agents = Arc::new(builtin_agents(&config));
    let providers = Arc::new(initialize_providers(&config));
    let doom_loop = Arc::new(DoomLoopDetector::new());
    let permission = Arc::new(PermissionBroker::new(events.clone()));

    let client_tool_registry = ClientToolRegistry::new();
    let client_tools = Arc::new(ClientToolBroker::new(events.clone(), client_tool_registry));

    // `task` depends on a `SessionProcessor` that doesn't exist yet; it's
    // registered through a handle now and wired up once the processor is built.
    let processor_handle = ProcessorHandle::new();

    let mut tools = ToolRegistry::new();
    tools.register(EditFileTool);
    tools.register(GlobTool);
    tools.register(GrepTool);
    tools.register(ListDirTool);
    tools.register(ReadFileTool);
    tools.register(ShellTool::default());
    tools.register(TodoWriteTool::default());
    tools.register(WebFetchTool);
    tools.register(WriteTool);
    tools.register(TaskTool::new(
        processor_handle.clone(),
        agents.clone(),
        storage.clone(),
        DepthGuard::new(),
    ));
    let tools = Arc::new(tools);

    let processor = Arc::new(SessionProcessor::new(
        storage.clone(),
        events.clone(),
        tools.clone(),
        client_tools.clone(),
        permission.clone(),
        doom_loop.clone(),
        providers.clone(),
        agents.clone(),
        config.clone(),
        LockMode::FailFast,
    ));
    processor_handle.set(processor.clone());

    let state = AppState {
        storage,
        events,
        tools,
        client_tools,
        permission,
        doom_loop,
        providers,
        agents,
        processor,
        config: Arc::new(config),
        aborts: Arc::new(Mutex::new(HashMap::new())),
    };

    let app = opencode_server::router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!(addr = %cli.listen, "starting opencode-server");
    axum::serve(listener, app).await?;
    Ok(())
}
