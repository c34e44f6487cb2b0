//! Conduit Operator - Kubernetes telemetry pipeline management

use std::sync::Arc;

use clap::Parser;
use futures::{Future, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;

use conduit::config::OperatorArgs;
use conduit::controller::{self, secret_dependents, Context};
use conduit::crd::{crds, LogPipeline, MetricPipeline, Telemetry, TelemetryPipeline, TracePipeline};
use conduit::logging::{init_logging, LogFormat, LoggingConfig};
use conduit::selfmonitor::{FlowHealthRegistry, HttpScraper, SelfMonitor};
use conduit::validation::SpecValidator;
use conduit::webhook::{self, WebhookState};

/// Conduit - reconciles telemetry pipelines into collector configuration
#[derive(Parser, Debug)]
#[command(name = "conduit", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Log line encoding
    #[arg(long, env = "CONDUIT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(flatten)]
    operator: OperatorArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider - FIPS-validated aws-lc-rs
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        for crd in crds()? {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    init_logging(&LoggingConfig {
        format: cli.log_format,
        ..LoggingConfig::default()
    })?;

    run_controller(cli.operator).await
}

/// Run in controller mode
///
/// The pipeline and Telemetry controllers stop on SIGTERM/ctrl-c; the
/// synthesis actors, the self-monitor and the webhook follow them.
async fn run_controller(args: OperatorArgs) -> anyhow::Result<()> {
    let config = args.into_config();
    tracing::info!(namespace = %config.namespace, "Conduit controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let cancel = CancellationToken::new();
    let registry = Arc::new(FlowHealthRegistry::new());
    let ctx = Arc::new(
        Context::builder(config.clone())
            .client(client.clone())
            .registry(registry.clone())
            .build(&cancel)?,
    );

    let monitor = SelfMonitor::new(
        Arc::new(HttpScraper::new(config.api_timeout)?),
        registry,
        &config,
    );
    let monitor_task = tokio::spawn(monitor.run(cancel.child_token()));

    let webhook_state = Arc::new(WebhookState::new(SpecValidator::new(
        config.denied_filter_plugins.clone(),
    )));
    let webhook_cancel = cancel.child_token();
    let webhook_config = config.clone();
    let webhook_task = tokio::spawn(async move {
        if let Err(e) = webhook::serve(
            webhook_state,
            webhook_config.webhook_addr,
            &webhook_config.webhook_cert,
            &webhook_config.webhook_key,
            webhook_cancel,
        )
        .await
        {
            tracing::error!(error = %e, "Webhook server stopped with error");
        }
    });

    tracing::info!("Starting Conduit controllers...");
    tracing::info!("  - LogPipeline controller");
    tracing::info!("  - MetricPipeline controller");
    tracing::info!("  - TracePipeline controller");
    tracing::info!("  - Telemetry controller");

    let telemetries: Api<Telemetry> = Api::namespaced(client.clone(), &config.namespace);
    let telemetry_controller = Controller::new(telemetries, WatcherConfig::default())
        .shutdown_on_signal()
        .run(
            controller::telemetry::reconcile,
            controller::telemetry::error_policy,
            ctx.clone(),
        )
        .for_each(|result| async move {
            match result {
                Ok(action) => tracing::debug!(?action, "Telemetry reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "Telemetry reconciliation error"),
            }
        });

    tokio::join!(
        pipeline_controller::<LogPipeline>(&client, &ctx),
        pipeline_controller::<MetricPipeline>(&client, &ctx),
        pipeline_controller::<TracePipeline>(&client, &ctx),
        telemetry_controller,
    );

    tracing::info!("Controllers stopped, shutting down");
    cancel.cancel();
    let _ = tokio::join!(monitor_task, webhook_task);

    tracing::info!("Conduit controller shutting down");
    Ok(())
}

/// Controller for one pipeline kind, also woken by changes to referenced secrets
fn pipeline_controller<K: TelemetryPipeline>(
    client: &Client,
    ctx: &Arc<Context>,
) -> impl Future<Output = ()> {
    let pipelines: Api<K> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client.clone());
    let resolver = ctx.resolver.clone();

    Controller::new(pipelines, WatcherConfig::default())
        .watches(secrets, WatcherConfig::default(), move |secret| {
            secret_dependents::<K>(&resolver, &secret)
        })
        .shutdown_on_signal()
        .run(
            controller::reconcile::<K>,
            controller::error_policy::<K>,
            ctx.clone(),
        )
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => {
                    tracing::debug!(kind = %K::SIGNAL, pipeline = %object.name, "Pipeline reconciliation completed")
                }
                Err(e) => tracing::error!(kind = %K::SIGNAL, error = ?e, "Pipeline reconciliation error"),
            }
        })
}
