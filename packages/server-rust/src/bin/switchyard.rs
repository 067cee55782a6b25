//! `switchyard` binary: serves the HTTP and cron triggers, or runs one
//! handler from the command line.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use switchyard_core::{EventLogger, MapConfigProvider, TracingLogger, TriggerBinding, Value};
use switchyard_server::service::HandlerDefinition;
use switchyard_server::{
    build_default_chain, handler_fn, telemetry, CliTrigger, CronScheduler, CronTrigger, Executor,
    FrameworkConfig, HandlerRegistry, HttpTrigger, TokenBucketLimiter, Trigger, TriggerSet,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "switchyard")]
#[command(about = "Trigger-agnostic handler runtime", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, env = "SWITCHYARD_LOG_JSON", global = true)]
    log_json: bool,

    /// Framework setting override, e.g. `--set rate_limit.burst=50`.
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    settings: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP and cron triggers until interrupted.
    Serve(ServeArgs),
    /// Run one handler once and print its result as JSON.
    Invoke(InvokeArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to bind the HTTP server to.
    #[arg(long, env = "SWITCHYARD_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "SWITCHYARD_PORT", default_value_t = 8080)]
    port: u16,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "SWITCHYARD_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

#[derive(Args, Debug)]
struct InvokeArgs {
    /// Handler name or CLI command.
    handler: String,

    /// Payload entries; values that parse as JSON keep their type.
    #[arg(value_name = "KEY=VALUE")]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = telemetry::init_tracing(cli.log_json) {
        eprintln!("{err:#}");
    }

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %format!("{err:#}"), "switchyard failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = load_config(&cli.settings)?;
    match cli.command {
        Commands::Serve(args) => {
            config.http.host = args.host;
            config.http.port = args.port;
            if let Some(addr) = args.metrics_addr {
                telemetry::install_prometheus(addr)?;
            }
            serve(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Invoke(args) => invoke(&config, &args).await,
    }
}

fn load_config(settings: &[String]) -> anyhow::Result<FrameworkConfig> {
    let provider = settings
        .iter()
        .map(|setting| {
            setting
                .split_once('=')
                .ok_or_else(|| anyhow!("--set {setting:?} is not of the form KEY=VALUE"))
        })
        .collect::<anyhow::Result<MapConfigProvider>>()?;
    FrameworkConfig::from_provider(&provider).context("invalid --set override")
}

fn build_executor(config: &FrameworkConfig) -> anyhow::Result<Executor> {
    let registry = Arc::new(HandlerRegistry::new());
    register_demo_handlers(&registry)?;

    let limiter = Arc::new(TokenBucketLimiter::new(config.rate_limit.clone()));
    let chain = build_default_chain(config, limiter, Arc::new(TracingLogger));
    Ok(Executor::new(registry, chain))
}

/// `echo` returns what it was given; `heartbeat` runs every 30 seconds.
fn register_demo_handlers(registry: &HandlerRegistry) -> anyhow::Result<()> {
    let echo = handler_fn(|ctx| {
        Box::pin(async move {
            let mut reply = BTreeMap::new();
            reply.insert("trigger".to_string(), Value::from(ctx.trigger().as_str()));
            reply.insert("payload".to_string(), Value::Map(ctx.payload.clone()));
            Ok(Value::Map(reply))
        })
    });
    registry.register_definition(
        HandlerDefinition::new("echo", echo)
            .with_trigger(TriggerBinding::http("POST", "/echo"))
            .with_trigger(TriggerBinding::cli("echo")),
    )?;

    let heartbeat = handler_fn(|ctx| {
        Box::pin(async move {
            let fired_at = ctx.payload_value("fired_at").cloned().unwrap_or_default();
            TracingLogger.info("heartbeat", &[("fired_at", fired_at.to_string())]);
            Ok(fired_at)
        })
    });
    registry.register("heartbeat", heartbeat, [TriggerBinding::cron("@every 30s")])?;
    Ok(())
}

async fn serve(config: &FrameworkConfig) -> anyhow::Result<()> {
    let executor = build_executor(config)?;
    let logger: Arc<dyn EventLogger> = Arc::new(TracingLogger);

    let triggers = TriggerSet::new()
        .with(Arc::new(HttpTrigger::new(config.http.clone(), executor.clone())))
        .with(Arc::new(CronTrigger::new(
            executor,
            Arc::new(CronScheduler::new(logger)),
        )));
    triggers.start_all().await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("interrupt received, stopping triggers");
    triggers.stop_all().await;
    Ok(())
}

async fn invoke(config: &FrameworkConfig, args: &InvokeArgs) -> anyhow::Result<ExitCode> {
    let trigger = Arc::new(CliTrigger::new(build_executor(config)?));
    let interrupt = {
        let trigger = Arc::clone(&trigger);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                trigger.stop().await;
            }
        })
    };

    let output = trigger.invoke(&args.handler, &args.args).await;
    interrupt.abort();

    let rendered = serde_json::to_string_pretty(&output.body)?;
    if output.is_success() {
        println!("{rendered}");
    } else {
        eprintln!("{rendered}");
    }
    Ok(ExitCode::from(output.exit_code))
}
