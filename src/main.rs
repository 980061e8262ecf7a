use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use coi_deploy::action::{error_command, GithubOutput};
use coi_deploy::config::{Inputs, Settings};
use coi_deploy::gateway::YcGateway;
use coi_deploy::reconcile::{Reconciler, RunOutputs};
use coi_deploy::render::Renderer;
use coi_deploy::yc::auth::ServiceAccountKey;
use coi_deploy::yc::client::{Endpoints, YcClient};
use coi_deploy::yc::operation::WaitPolicy;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Create or update a container-optimized VM in Yandex Cloud
#[derive(Parser, Debug)]
#[command(name = "coi-deploy", version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    inputs: Inputs,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, value_enum, default_value = "info", env = "COI_DEPLOY_LOG_LEVEL")]
    log_level: LogLevel,

    /// Give up waiting for the create/update operation after this many seconds
    #[arg(long, default_value_t = 1800, env = "COI_DEPLOY_OPERATION_TIMEOUT")]
    operation_timeout: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

fn setup_logging(level: LogLevel) -> tracing_appender::non_blocking::WorkerGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    // Logs go to stderr so stdout stays free for outputs when GITHUB_OUTPUT is unset
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .without_time()
        .init();

    guard
}

/// Process environment as UTF-8 pairs; other entries are skipped
fn environment() -> BTreeMap<String, String> {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let _log_guard = setup_logging(args.log_level);

    match run(args).await {
        Ok(outputs) => {
            tracing::info!(
                "Done: instance {} ({})",
                outputs.instance_id,
                if outputs.created { "created" } else { "updated" }
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            report_failure(&err);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<RunOutputs> {
    let env = environment();
    let output_path = env
        .get("GITHUB_OUTPUT")
        .filter(|p| !p.is_empty())
        .map(PathBuf::from);

    let settings = Settings::from_inputs(args.inputs, env)?;

    let key = ServiceAccountKey::from_json(settings.credentials.expose())?;
    let client = YcClient::new(key, Endpoints::default()).context("Failed to initialize Yandex Cloud client")?;
    tracing::info!(
        "Parsed service account JSON for {}",
        client.credentials.service_account_id()
    );
    let wait_policy = WaitPolicy {
        timeout: Some(Duration::from_secs(args.operation_timeout)),
        ..WaitPolicy::default()
    };

    let renderer = Renderer::new(settings.workspace, settings.template_env);
    let mut reconciler = Reconciler::new(YcGateway::new(client, wait_policy), renderer);
    let mut outputs = GithubOutput::new(output_path);

    let result = reconciler.run(settings.spec, &mut outputs).await?;
    Ok(result)
}

fn report_failure(err: &anyhow::Error) {
    match err.downcast_ref::<coi_deploy::Error>() {
        Some(inner) => match inner.support_ids() {
            Some(ids) => tracing::error!("{}\n{}", inner, ids),
            None => tracing::error!("{}", inner),
        },
        None => tracing::error!("{:#}", err),
    }
    println!("{}", error_command(&format!("{:#}", err)));
}
