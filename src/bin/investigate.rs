// CLI entry point: run one investigation for one incident

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use incident_pilot::gateway::{
    CodeHostRestAdapter, ProtocolAdapter, ServiceKind, ToolGateway, ToolOperation,
    TrackerRestAdapter,
};
use incident_pilot::pipeline::{HttpReasoningEngine, StepContext, WorkflowExecutor};
use incident_pilot::{CredentialStore, PilotConfig, TokenLifecycleManager};
use incident_pilot::auth::HttpTokenEndpoint;

#[derive(Parser, Debug)]
#[command(
    name = "investigate",
    about = "Run an automated incident investigation and write the results back to the tracker"
)]
struct Args {
    /// Incident ticket identifier, e.g. IR-1234
    incident_id: String,

    /// Chat-completions endpoint for the reasoning engine
    #[arg(long, env = "REASONING_ENDPOINT_URL")]
    reasoning_endpoint: String,

    /// API key for the reasoning endpoint
    #[arg(long, env = "REASONING_API_KEY", hide_env_values = true)]
    reasoning_api_key: String,

    /// Model routed at the reasoning endpoint
    #[arg(long, env = "REASONING_MODEL", default_value = "gpt-4o")]
    reasoning_model: String,

    /// Print the final workflow state as compact JSON instead of pretty
    #[arg(long)]
    compact: bool,
}

/// Wire the gateway: the protocol endpoint services every operation and is
/// tried first; the direct REST adapters back it up per service.
fn build_gateway(config: &PilotConfig, tokens: Arc<TokenLifecycleManager>) -> ToolGateway {
    let mut gateway = ToolGateway::new(config.call_timeout).with_token_manager(tokens);

    let protocol = Arc::new(ProtocolAdapter::new(
        config.tool_endpoint_url.clone(),
        config.call_timeout,
    ));
    gateway.register_many(&ToolOperation::all(), protocol);

    let tracker = Arc::new(TrackerRestAdapter::new(
        config.tracker_base_url.clone(),
        config.call_timeout,
    ));
    let codehost = Arc::new(CodeHostRestAdapter::new(
        config.codehost_base_url.clone(),
        config.call_timeout,
    ));
    for operation in ToolOperation::all() {
        match operation.service() {
            ServiceKind::IssueTracker => gateway.register(operation, tracker.clone()),
            ServiceKind::CodeHost => gateway.register(operation, codehost.clone()),
        }
    }

    gateway
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = PilotConfig::from_env().context("loading configuration")?;

    let tokens = Arc::new(TokenLifecycleManager::new(
        CredentialStore::new(config.oauth.token_url.clone(), config.oauth.grant()),
        Arc::new(HttpTokenEndpoint::new(
            config.oauth.token_url.clone(),
            config.auth_timeout,
        )),
    ));

    let gateway = Arc::new(build_gateway(&config, tokens));
    let reasoning = Arc::new(HttpReasoningEngine::new(
        args.reasoning_endpoint,
        args.reasoning_api_key,
        args.reasoning_model,
        config.call_timeout,
    ));

    let ctx = Arc::new(StepContext::new(gateway, reasoning, config));

    // Ctrl-C cancels the run; in-flight steps observe the token and stop
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling investigation");
            cancel.cancel();
        }
    });

    let executor = WorkflowExecutor::new(ctx);
    let state = executor.run_investigation(&args.incident_id).await;

    let rendered = if args.compact {
        serde_json::to_string(&state)?
    } else {
        serde_json::to_string_pretty(&state)?
    };
    println!("{}", rendered);

    if state.status == incident_pilot::InvestigationStatus::Failed {
        anyhow::bail!("investigation for {} failed", args.incident_id);
    }
    Ok(())
}
