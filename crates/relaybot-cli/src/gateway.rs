//! Gateway command — wires the message bus, memory subsystem, agent
//! subscriber, and HTTP gateway into one running process.
//!
//! Startup sequence:
//! 1. Load config
//! 2. Create message bus
//! 3. Create the memory backend + conversation ingestor (file or Postgres)
//! 4. Start the embedding worker if Postgres-backed
//! 5. Create the agent subscriber, attach it to the bus
//! 6. Run the HTTP gateway; Ctrl+C triggers graceful shutdown

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use relaybot_core::bus::queue::MessageBus;
use relaybot_core::config::load_config;
use relaybot_core::config::schema::MemoryBackendKind;
use relaybot_core::session::SessionManager;
use relaybot_gateway::GatewayServer;
use relaybot_memory::memory::embedding::EmbeddingService;
use relaybot_memory::memory::worker::EmbeddingWorker;
use relaybot_memory::{create_memory_backend, AgentSubscriber};
use relaybot_providers::http_provider::create_provider;
use relaybot_providers::LlmRequestConfig;

use crate::helpers;

/// Run the gateway — starts the agent subscriber + HTTP channel.
pub async fn run() -> Result<()> {
    helpers::print_banner();

    let config = load_config(None);
    let defaults = &config.agents.defaults;

    let workspace = helpers::expand_tilde(&defaults.workspace);
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace: {}", workspace.display()))?;

    let bus = Arc::new(MessageBus::new());

    let providers_map = config.providers.to_map();
    let provider = create_provider(&defaults.model, &providers_map).map_err(|e| anyhow::anyhow!(e))?;

    let (memory, ingestor) = create_memory_backend(&workspace, &config.memory);

    let worker = if config.memory.backend == MemoryBackendKind::Postgres && !config.memory.postgres.dsn.is_empty() {
        let embedding = Arc::new(EmbeddingService::new(
            &config.memory.embedding.model,
            config.memory.embedding.dimensions,
            config.memory.embedding.base_url.as_deref(),
            &config.memory.embedding.key,
        ));
        let worker = Arc::new(EmbeddingWorker::new(config.memory.postgres.dsn.clone(), embedding));
        worker.start().await.context("failed to start embedding worker")?;
        Some(worker)
    } else {
        None
    };

    let sessions = SessionManager::new(None).context("failed to create session manager")?;

    let subscriber = Arc::new(AgentSubscriber::new(
        bus.clone(),
        Arc::new(provider),
        workspace.clone(),
        "Relaybot",
        Some(defaults.model.clone()),
        None,
        Some(LlmRequestConfig {
            max_tokens: defaults.max_tokens,
            temperature: defaults.temperature,
        }),
        memory,
        ingestor,
        sessions,
    ));
    subscriber.clone().attach().await;

    let server = Arc::new(GatewayServer::new(config.gateway.clone(), bus.clone()));

    info!(
        model = %defaults.model,
        workspace = %workspace.display(),
        host = %config.gateway.host,
        port = config.gateway.port,
        "gateway starting"
    );
    println!("  Model:     {}", defaults.model);
    println!("  Workspace: {}", workspace.display());
    println!("  Listening: http://{}:{}", config.gateway.host, config.gateway.port);
    println!();
    println!("  Ctrl+C to stop");
    println!();

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "gateway server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("  Shutting down...");
            info!("received Ctrl+C, shutting down");
            server.stop();
            if let Some(worker) = &worker {
                worker.stop().await;
            }
        }
    }

    println!("  Gateway stopped. Goodbye!");
    Ok(())
}
