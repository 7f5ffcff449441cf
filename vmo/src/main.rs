//! `vmo-operator`: runs the reconciliation engine for monitoring instances
use anyhow::{Context as _, Result};
use clap::Parser;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client, CustomResourceExt};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vmo::runtime::{cache, controller, ingest, server, Context, Metrics, SearchClient, Settings};
use vmo::VerrazzanoMonitoringInstance;

/// Kubernetes operator for Verrazzano monitoring instances
#[derive(Parser, Debug)]
#[command(name = "vmo-operator", version)]
struct Args {
    /// Namespace the operator runs in, holding its configuration object
    #[arg(long, env = "POD_NAMESPACE")]
    namespace: Option<String>,

    /// Name of the config map holding the operator configuration
    #[arg(long, default_value = "verrazzano-monitoring-operator-config")]
    config_map: String,

    /// Build identifier recorded on instances after a clean pass
    #[arg(long, env = "BUILD_VERSION", default_value = "")]
    build_version: String,

    /// Only watch objects in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Only reconcile the instance with this name
    #[arg(long, env = "WATCH_VMI")]
    watch_vmi: Option<String>,

    /// Number of instances reconciled concurrently
    #[arg(long, default_value_t = 5)]
    workers: usize,

    /// Seconds before a converged instance is reconciled again
    #[arg(long, default_value_t = 300)]
    resync_seconds: u64,

    /// Seconds to wait for the initial cache sync
    #[arg(long, default_value_t = 60)]
    cache_sync_timeout: u64,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print the custom resource definition as YAML and exit
    #[arg(long)]
    print_crd: bool,
}

impl Args {
    fn settings(&self) -> Settings {
        Settings {
            build_version: self.build_version.clone(),
            watch_vmi: self.watch_vmi.clone().filter(|name| !name.is_empty()),
            workers: self.workers,
            resync: Duration::from_secs(self.resync_seconds),
        }
    }

    fn watch_namespace(&self) -> Option<&str> {
        self.watch_namespace.as_deref().filter(|ns| !ns.is_empty())
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,kube=warn"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn print_crd() -> Result<()> {
    let crd = serde_yaml::to_string(&VerrazzanoMonitoringInstance::crd())?;
    print!("{crd}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if args.print_crd {
        return print_crd();
    }
    init_logging(args.log_json);
    if let Err(error) = run(args).await {
        error!("operator failed: {error:#}");
        return Err(error);
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        build = %args.build_version,
        watch_namespace = args.watch_namespace().unwrap_or("all"),
        "starting monitoring operator"
    );
    let client = Client::try_default()
        .await
        .context("failed to create kubernetes client")?;
    let namespace = args
        .namespace
        .clone()
        .unwrap_or_else(|| client.default_namespace().to_string());

    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), &namespace);
    let config = ingest::load_config(&config_maps, &args.config_map)
        .await
        .context("failed to load operator configuration")?;
    let current = config.current();
    let search = SearchClient::new(Duration::from_secs(current.search_cluster_timeout_seconds))?;
    let port = current.http_port;

    let token = CancellationToken::new();
    let (caches, writers) = cache::stores();
    let (mut reflectors, instances) = writers.spawn(&client, args.watch_namespace(), &token);
    let ctx = Arc::new(Context::new(
        client,
        caches,
        config.clone(),
        Metrics::new()?,
        search,
        args.settings(),
    ));

    // the controller drives the instance stream, which feeds its own cache
    let reconciler = tokio::spawn(controller::run(ctx.clone(), instances, token.clone()));
    let timeout = Duration::from_secs(args.cache_sync_timeout);
    if let Err(error) = ctx.caches.wait_until_ready(timeout).await {
        token.cancel();
        return Err(error).context("initial cache sync failed");
    }

    tokio::spawn(ingest::watch_config(config_maps, args.config_map.clone(), config, token.clone()));
    let management = tokio::spawn({
        let (ctx, token) = (ctx.clone(), token.clone());
        async move {
            if let Err(error) = server::serve(ctx, port, token.clone()).await {
                error!(%error, "management server stopped");
                token.cancel();
            }
        }
    });
    tokio::spawn({
        let token = token.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown requested");
            token.cancel();
        }
    });

    let stopped = reconciler.await;
    token.cancel();
    if stopped.is_err() || management.await.is_err() {
        warn!("background task panicked during shutdown");
    }
    while reflectors.join_next().await.is_some() {}
    info!("monitoring operator stopped");
    Ok(())
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "cannot listen for interrupts");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(%error, "cannot listen for termination");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "vmo-operator",
            "--namespace",
            "verrazzano-system",
            "--build-version",
            "1.4.0",
            "--watch-namespace",
            "monitoring",
            "--watch-vmi",
            "system",
            "--workers",
            "2",
        ])
        .unwrap();
        assert_eq!(args.namespace.as_deref(), Some("verrazzano-system"));
        assert_eq!(args.config_map, "verrazzano-monitoring-operator-config");
        assert_eq!(args.watch_namespace(), Some("monitoring"));
        let settings = args.settings();
        assert_eq!(settings.build_version, "1.4.0");
        assert_eq!(settings.watch_vmi.as_deref(), Some("system"));
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.resync, Duration::from_secs(300));
    }

    #[test]
    fn empty_filters_watch_everything() {
        let args =
            Args::try_parse_from(["vmo-operator", "--watch-namespace", "", "--watch-vmi", ""]).unwrap();
        assert_eq!(args.watch_namespace(), None);
        assert_eq!(args.settings().watch_vmi, None);
    }

    #[test]
    fn printed_definition_names_the_resource() {
        let crd = serde_yaml::to_string(&VerrazzanoMonitoringInstance::crd()).unwrap();
        assert!(crd.contains("name: verrazzanomonitoringinstances.verrazzano.io"));
    }
}
