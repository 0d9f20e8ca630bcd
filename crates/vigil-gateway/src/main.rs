mod factory;
mod investigations;
mod receiver;
mod sources;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use investigations::{InvestigationCoordinator, InvestigationStore};
use receiver::{AlertRunner, AsyncAlertHandler, WebhookReceiver};
use sources::SourceManager;
use vigil_agent::llm::anthropic::AnthropicProvider;
use vigil_agent::safety::CommandValidator;
use vigil_agent::session::SessionStore;
use vigil_agent::skills::CapabilityRegistry;
use vigil_agent::tools::{ToolDeps, ToolRegistry};

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil_gateway=info,vigil_agent=info".into()),
        )
        .init();

    let config_path = std::env::var("VIGIL_CONFIG").unwrap_or_else(|_| "vigil.json".to_string());
    let config = vigil_core::config::load_config(Path::new(&config_path))?;

    info!("vigil-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "safety mode: {} | step budget: {} | max concurrent: {}",
        config.safety.mode, config.investigation.max_actions, config.investigation.max_concurrent
    );

    // ── AI provider ──
    let model = std::env::var("VIGIL_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
    let provider = Arc::new(AnthropicProvider::from_env(&model)?);
    info!("provider model: {}", model);

    // ── Core components ──
    let validator = Arc::new(
        CommandValidator::from_config(&config.safety, &config.investigation)
            .context("failed to build command validator")?,
    );
    let sessions = Arc::new(SessionStore::new());
    let capabilities = Arc::new(CapabilityRegistry::new());
    let skill_count = capabilities.skills().len();
    if skill_count > 0 {
        info!("{} skill(s) discovered", skill_count);
    }

    let deps = ToolDeps {
        store: sessions.clone(),
        validator,
        capabilities: capabilities.clone(),
        provider: Some(provider.clone()),
    };
    let tools = ToolRegistry::with_defaults(&deps).restricted(&config.investigation.allowed_tools);
    info!("tools: {}", tools.names().join(", "));

    let coordinator = Arc::new(InvestigationCoordinator::new(
        provider,
        sessions,
        Arc::new(InvestigationStore::new()),
        Arc::new(tools),
        capabilities,
        config.investigation.clone(),
    ));

    // ── Alert sources ──
    let factories = factory::SourceFactoryRegistry::with_builtins();
    let manager = Arc::new(SourceManager::new());
    if config.sources.is_empty() {
        // No sources configured: expose the built-ins on their default paths.
        for type_tag in factories.supported_types() {
            let source = factories.create_source(&serde_json::json!({"type": type_tag}))?;
            manager.register(source)?;
        }
    } else {
        for source_config in &config.sources {
            let source = factories
                .create_source(source_config)
                .with_context(|| format!("invalid source config: {}", source_config))?;
            manager.register(source)?;
        }
    }
    info!("alert sources: {}", manager.list().join(", "));
    manager.start();

    // ── Webhook receiver with the async two-phase dispatch ──
    let start_coordinator = coordinator.clone();
    let start: AsyncAlertHandler = Arc::new(move |alert| {
        let coordinator = start_coordinator.clone();
        Box::pin(async move { coordinator.start(&alert) })
    });
    let run_coordinator = coordinator.clone();
    let run: AlertRunner = Arc::new(move |alert, id| {
        let coordinator = run_coordinator.clone();
        Box::pin(async move { coordinator.run(&alert, &id).await })
    });
    let receiver = Arc::new(WebhookReceiver::new(manager.clone()).with_async_handler(start, run));

    // ── Serve ──
    let listener = tokio::net::TcpListener::bind(&config.http.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http.addr))?;
    info!("webhook receiver listening on {}", config.http.addr);

    axum::serve(listener, receiver.clone().router())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    // Drain in-flight investigations before closing the sources.
    info!("shutting down, waiting for in-flight investigations");
    receiver.wait_for_workers(config.http.shutdown_timeout()).await;
    if let Err(e) = manager.shutdown() {
        warn!("source shutdown reported errors: {:#}", e);
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to install ctrl-c handler: {}", e);
    }
}
