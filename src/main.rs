use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use control_plane_operator::config::TuningArgs;
use control_plane_operator::controller::apply::apply_custom_resource_definition;
use control_plane_operator::controller::store::KubeStore;
use control_plane_operator::controller::{
    watch_trigger, Controller, ObjectStore, OperatorReconciler, Stores,
};
use control_plane_operator::crd::{ApiServerOperatorConfig, WebConsoleOperatorConfig};
use control_plane_operator::services::{api_server, web_console, ApiServerService, WebConsoleService};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::{Api, Client, CustomResourceExt};
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version information
    Version,
    /// Print the operator's CustomResourceDefinitions as YAML
    Crds,
}

#[derive(Parser, Debug)]
struct RunArgs {
    #[command(flatten)]
    tuning: TuningArgs,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Address of the metrics and health endpoint
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: SocketAddr,

    /// Do not install the operator's own CRDs at startup
    #[arg(long, env = "SKIP_CRD_INSTALL")]
    skip_crd_install: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("control-plane-operator v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Crds => {
            for crd in [WebConsoleOperatorConfig::crd(), ApiServerOperatorConfig::crd()] {
                print!("---\n{}", serde_yaml::to_string(&crd)?);
            }
            Ok(())
        }
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

async fn run_operator(args: RunArgs) -> anyhow::Result<()> {
    init_tracing(args.log_json);
    info!(
        "Starting control-plane-operator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let settings = args
        .tuning
        .resolve()
        .context("invalid controller settings")?;

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    let stores = Stores::from_client(client.clone());
    if !args.skip_crd_install {
        for crd in [WebConsoleOperatorConfig::crd(), ApiServerOperatorConfig::crd()] {
            let name = crd.metadata.name.clone().unwrap_or_default();
            apply_custom_resource_definition(stores.custom_resource_definitions.as_ref(), &crd)
                .await
                .with_context(|| format!("failed to install CRD {name}"))?;
        }
    }

    // templates are decoded here; a broken one stops startup
    let web_console = WebConsoleService::new(stores.clone()).context("web console templates")?;
    let api_server = ApiServerService::new(stores).context("API server templates")?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let stopped = move || {
        let mut rx = stop_rx.clone();
        async move {
            let _ = rx.wait_for(|stop| *stop).await;
        }
    };

    #[cfg(feature = "metrics")]
    let metrics_server = {
        let shutdown = stopped();
        let addr = args.metrics_addr;
        tokio::spawn(async move {
            if let Err(e) = control_plane_operator::rest_api::run_server(addr, shutdown).await {
                error!("Metrics server error: {}", e);
            }
        })
    };

    let web_console_manifests: Arc<dyn ObjectStore<WebConsoleOperatorConfig>> =
        Arc::new(KubeStore::<WebConsoleOperatorConfig>::cluster(client.clone()));
    let web_console_controller = Controller::new(
        OperatorReconciler::new(web_console, web_console_manifests),
        &settings,
    )
    .trigger_on(watch_trigger(Api::<WebConsoleOperatorConfig>::all(
        client.clone(),
    )))
    .trigger_on(watch_trigger(Api::<Deployment>::namespaced(
        client.clone(),
        web_console::NAMESPACE,
    )))
    .trigger_on(watch_trigger(Api::<ConfigMap>::namespaced(
        client.clone(),
        web_console::NAMESPACE,
    )));

    let api_server_manifests: Arc<dyn ObjectStore<ApiServerOperatorConfig>> =
        Arc::new(KubeStore::<ApiServerOperatorConfig>::cluster(client.clone()));
    let api_server_controller = Controller::new(
        OperatorReconciler::new(api_server, api_server_manifests),
        &settings,
    )
    .trigger_on(watch_trigger(Api::<ApiServerOperatorConfig>::all(
        client.clone(),
    )))
    .trigger_on(watch_trigger(Api::<DaemonSet>::namespaced(
        client.clone(),
        api_server::NAMESPACE,
    )))
    .trigger_on(watch_trigger(Api::<Deployment>::namespaced(
        client.clone(),
        api_server::NAMESPACE,
    )))
    .trigger_on(watch_trigger(Api::<Service>::namespaced(
        client,
        api_server::NAMESPACE,
    )));

    let controllers = tokio::spawn(futures::future::join(
        web_console_controller.run(stopped()),
        api_server_controller.run(stopped()),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Received shutdown signal");
    let _ = stop_tx.send(true);

    controllers.await.context("controller task panicked")?;
    #[cfg(feature = "metrics")]
    if let Err(e) = metrics_server.await {
        error!("Metrics server task failed: {}", e);
    }

    info!("Operator stopped");
    Ok(())
}
