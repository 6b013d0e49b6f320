use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use upstream_proxy::config::{self, parse_backend, ProxyConfig};
use upstream_proxy::forwarding::{
    exemptions, Decision, ForwardingDecider, ForwardingPolicy, HttpPolicyFetcher, PolicyFetcher,
};
use upstream_proxy::routing::normalize;

#[derive(Parser)]
#[command(name = "policy-cli")]
#[command(about = "Inspect the live forwarding policy of an upstream proxy", long_about = None)]
struct Cli {
    /// Proxy configuration file supplying backend, policy path and exemptions.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the backend URL.
    #[arg(short, long)]
    backend: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the current policy from the backend
    Fetch,
    /// Show how a request path would be served
    Explain {
        path: String,

        /// Assume forwarding is disabled instead of asking the backend.
        #[arg(long)]
        offline: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(backend) = cli.backend {
        config.backend.url = backend;
    }

    match cli.command {
        Commands::Fetch => {
            let fetcher = fetcher(&config)?;
            let policy = fetcher.fetch().await?;
            print_json(&json!({
                "endpoint": fetcher.endpoint().as_str(),
                "policy": describe(&policy),
            }))?;
        }
        Commands::Explain { path, offline } => {
            let policy = if offline {
                ForwardingPolicy::disabled()
            } else {
                fetcher(&config)?.fetch().await?
            };
            let decider = ForwardingDecider::new(exemptions::compile(&config.forwarding.exemptions)?);
            let canonical = normalize(&path);
            let decision = match decider.decide(&canonical, &policy) {
                Decision::Local => json!({ "serve": "local" }),
                Decision::Forward(target) => json!({ "serve": "forward", "target": target.as_str() }),
            };
            print_json(&json!({
                "path": path,
                "canonical_path": canonical,
                "exempt": decider.is_exempt(&canonical),
                "policy": describe(&policy),
                "decision": decision,
            }))?;
        }
    }

    Ok(())
}

fn fetcher(config: &ProxyConfig) -> Result<HttpPolicyFetcher, Box<dyn std::error::Error>> {
    let backend = parse_backend(&config.backend.url)?;
    Ok(HttpPolicyFetcher::new(
        &backend,
        &config.forwarding.policy_path,
        Duration::from_secs(config.forwarding.fetch_timeout_secs),
    )?)
}

fn describe(policy: &ForwardingPolicy) -> Value {
    json!({
        "enabled": policy.enabled(),
        "target": policy.target().map(|url| url.as_str()),
    })
}

fn print_json(value: &Value) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
