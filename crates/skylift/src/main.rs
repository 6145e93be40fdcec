mod driver;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use driver::TriggerEvent;
use skylift_notify::HttpNotifier;
use skylift_provider::{DirectorApi, DirectorClient, Provider, TaskTracker};
use skylift_vcenter::HttpVcenterConnect;
use skylift_workflow::{Engine, EngineLimits, WorkflowState};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "skylift")]
#[command(about = "Hosted private-cloud provisioning automation", long_about = None)]
struct Cli {
    /// Director API base URL
    #[arg(
        long,
        env = "SKYLIFT_DIRECTOR_URL",
        default_value = "https://director.skylift.dev/api",
        global = true
    )]
    director_url: String,

    /// Same-step retries allowed before the workflow reports failure
    #[arg(long, env = "SKYLIFT_MAX_STEP_RETRIES", default_value_t = 360, global = true)]
    max_step_retries: u32,

    /// Ceiling on wait hints derived from provider estimates
    #[arg(long, env = "SKYLIFT_MAX_WAIT_SECONDS", default_value_t = 3600, global = true)]
    max_wait_seconds: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one trigger event and print the resulting state as JSON
    Handle {
        /// Trigger event JSON file ("-" reads stdin)
        event: PathBuf,
    },
    /// Parse and validate a trigger event without calling the provider
    Validate {
        /// Trigger event JSON file ("-" reads stdin)
        event: PathBuf,
    },
    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the updated state for the scheduler; keep logs on
    // stderr.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("skylift {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Validate { event } => {
            let event = driver::parse_event(&read_event(&event)?)?;
            match event {
                TriggerEvent::Request(request) => {
                    request.config.validate().with_context(|| {
                        format!("invalid configuration for {}", request.target_name)
                    })?;
                    println!("ok: provisioning request for {}", request.target_name);
                }
                TriggerEvent::Continuation(state) => {
                    Engine::ensure_resumable(&state)?;
                    println!(
                        "ok: continuation for {} at step {}",
                        state.target_name, state.current_step
                    );
                }
            }
            Ok(())
        }
        Commands::Handle { event } => {
            let event = driver::parse_event(&read_event(&event)?)?;
            let limits = EngineLimits {
                max_step_retries: cli.max_step_retries,
                max_wait_seconds: cli.max_wait_seconds,
            };

            match event {
                TriggerEvent::Request(request) => match request.request_type {
                    driver::RequestType::Delete => {
                        driver::handle_teardown(&request, &HttpNotifier::new()).await?;
                        println!("{}", serde_json::json!({ "acknowledged": true }));
                        Ok(())
                    }
                    driver::RequestType::Create | driver::RequestType::Update => {
                        let state = driver::start_provision(request)?;
                        emit(&state)
                    }
                },
                TriggerEvent::Continuation(state) => {
                    let engine = build_engine(&cli.director_url, &state, limits).await?;
                    let state = driver::continue_workflow(*state, &engine).await?;
                    emit(&state)
                }
            }
        }
    }
}

/// Construct a fresh engine for this continuation. Nothing is shared
/// across invocations; credentials are looked up from the environment
/// variable named in the state's config.
async fn build_engine(
    director_url: &str,
    state: &WorkflowState,
    limits: EngineLimits,
) -> Result<Engine> {
    let client = DirectorClient::from_env(director_url, &state.config.refresh_token_env)
        .await
        .context("failed to connect to the director")?;
    let api: Arc<dyn DirectorApi> = Arc::new(client);

    Ok(Engine::new(
        Provider::new(api.clone(), &state.config.org_id),
        TaskTracker::new(api, &state.config.org_id),
        Arc::new(HttpVcenterConnect),
        Arc::new(HttpNotifier::new()),
        limits,
    ))
}

fn emit(state: &WorkflowState) -> Result<()> {
    println!("{}", serde_json::to_string(state)?);
    Ok(())
}

fn read_event(path: &PathBuf) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("failed to read the event from stdin")?;
        return Ok(raw);
    }

    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read event file {}", path.display()))
}
