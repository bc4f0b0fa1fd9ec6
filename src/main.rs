use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use approvals::access::service::AccessService;
use approvals::access::workflow::HttpGrantWorkflow;
use approvals::api::{self, AppState};
use approvals::clock::SystemClock;
use approvals::config::{self, Config};
use approvals::events::{self, ChannelPublisher};
use approvals::notification::arguments::{CachedOptionsRenderer, StaticSchemaRegistry};
use approvals::notification::dispatcher::NotificationDispatcher;
use approvals::notification::slack::SlackClient;
use approvals::notification::webhook::{IncomingWebhook, WebhookSender};
use approvals::seed::Seed;
use approvals::store::memory::MemoryStore;

mod cli;

/// Buffered lifecycle events awaiting the notification consumer.
const EVENT_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "approvals=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::CheckSeed { file }) => check_seed(&file),
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let schemas = match &cfg.seed_file {
        Some(path) => {
            tracing::info!("Loading seed data from {}...", path);
            Seed::load(path)?.apply(&store)
        }
        None => {
            tracing::warn!("APPROVALS_SEED_FILE not set, starting with an empty store");
            StaticSchemaRegistry::default()
        }
    };
    let store = Arc::new(store);
    let clock = Arc::new(SystemClock);

    let renderer = Arc::new(CachedOptionsRenderer::new(store.clone(), Arc::new(schemas)));
    let mut dispatcher = NotificationDispatcher::new(
        store.clone(),
        renderer,
        clock.clone(),
        cfg.frontend_url.clone(),
        cfg.dispatch_settings(),
    );
    match &cfg.slack_bot_token {
        Some(token) => {
            let slack = SlackClient::new(&cfg.slack_api_url, token)?;
            dispatcher = dispatcher.with_slack(Arc::new(slack));
        }
        None => tracing::info!("No Slack bot token configured, direct messages disabled"),
    }
    let webhooks = cfg
        .webhook_urls
        .iter()
        .map(|url| {
            IncomingWebhook::new(url, cfg.webhook_signing_secret.clone())
                .map(|w| Arc::new(w) as Arc<dyn WebhookSender>)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    tracing::info!("Configured {} notification webhook(s)", webhooks.len());
    let dispatcher = Arc::new(dispatcher.with_webhooks(webhooks));

    let (publisher, rx) = ChannelPublisher::new(EVENT_BUFFER);
    let consumer = events::spawn_consumer(rx, dispatcher);
    tracing::info!("Notification consumer started");

    let workflow = HttpGrantWorkflow::new(&cfg.provisioner_url, cfg.provisioner_api_key.clone())?;
    let service = AccessService::new(
        store.clone(),
        store.clone(),
        Arc::new(workflow),
        Arc::new(publisher),
        clock,
    );

    let state = Arc::new(AppState {
        service,
        store: store.clone(),
    });

    let app = axum::Router::new()
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .nest("/api/v1", api::api_router(state.clone()))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Approvals API listening on {}", addr);
    axum::serve(listener, app).await?;

    consumer.abort();
    Ok(())
}

fn check_seed(path: &str) -> anyhow::Result<()> {
    let seed = Seed::load(path)?;
    println!("Seed file {} is valid:", path);
    println!("  {} access rule(s)", seed.rules.len());
    for rule in &seed.rules {
        let approval = if rule.approval.is_required() {
            format!(
                "{} user(s), {} group(s)",
                rule.approval.users.len(),
                rule.approval.groups.len()
            )
        } else {
            "automatic".to_string()
        };
        println!(
            "    {} ({}): max {}s, approval: {}",
            rule.id, rule.name, rule.time_constraints.max_duration_seconds, approval
        );
    }
    println!("  {} user(s), {} group(s)", seed.users.len(), seed.groups.len());
    println!(
        "  {} provider schema(s), {} cached option(s)",
        seed.providers.len(),
        seed.provider_options.len()
    );
    Ok(())
}
