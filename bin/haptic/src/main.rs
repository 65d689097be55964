//! haptic: the coordination core of a HAProxy template ingress controller.
//!
//! Wires the event bus, the pipeline components, leader election, the
//! admission webhook and the introspection endpoint into one process. In
//! standalone mode (no cluster attached) the config document comes from
//! disk, endpoints from flags, and the external collaborators are the
//! in-process stubs.

mod defaults;
#[cfg(feature = "jemalloc-prof")]
mod heap_profile;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use haptic_bus::EventBus;
use haptic_controller::stub::{self, StaticIndex, StubChecker, StubDataplane, StubEngine};
use haptic_controller::{
    BasicValidator, ConfigLoader, CredentialsLoader, DataplaneClient, Deployer,
    DeploymentScheduler, DriftMonitor, DryRunValidator, JsonPathValidator, LeaderElectionAdapter,
    LeaderHooks, RenderedChecker, Renderer, TemplateValidator, ValidationCoordinator,
    ValidatorHost,
};
use haptic_events::{Event, EventPayload};
use haptic_introspection::{StateCache, VarRegistry};
use haptic_primitives::{ControllerConfig, DeployConcurrency, Endpoint};
use haptic_webhook::{
    HandlerRegistry, KindResolver, ScatterGatherValidation, WebhookServer, WebhookStats,
    load_server_config,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "jemalloc-prof")]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const VALIDATORS: [&str; 4] = ["basic", "template", "jsonpath", "dryrun"];

#[derive(Parser, Debug)]
#[command(version, about = "HAProxy template ingress controller", long_about = None)]
struct Args {
    /// Controller configuration document. Standalone mode reads it from
    /// disk instead of a ConfigMap watch.
    #[arg(long)]
    config: PathBuf,

    /// Static data-plane endpoints, `name=url` or bare URLs. Repeatable.
    #[arg(long = "endpoint")]
    endpoints: Vec<String>,

    #[arg(long, default_value = defaults::INTROSPECTION_LISTEN)]
    introspection_listen: SocketAddr,

    #[arg(long, default_value = defaults::WEBHOOK_LISTEN)]
    webhook_listen: SocketAddr,

    /// PEM certificate for the admission webhook. The webhook serves only
    /// when both certificate and key are supplied.
    #[arg(long, requires = "webhook_key")]
    webhook_cert: Option<PathBuf>,

    #[arg(long, requires = "webhook_cert")]
    webhook_key: Option<PathBuf>,

    #[arg(long, default_value = "haptic-0")]
    identity: String,

    #[arg(long, default_value = defaults::LEASE_NAME)]
    lease_name: String,

    #[arg(long, default_value = defaults::NAMESPACE)]
    namespace: String,
}

/// Owns the leader-only cancellation scope: the write path (scheduler,
/// deployer, drift monitor) starts on gained leadership and dies with it.
struct LeaderScope {
    bus: EventBus,
    root: CancellationToken,
    child: Option<CancellationToken>,
    dataplane: Arc<dyn DataplaneClient>,
    min_interval: Duration,
    drift_interval: Duration,
    concurrency: DeployConcurrency,
    max_parallel: usize,
}

impl LeaderHooks for LeaderScope {
    fn start_leading(&mut self) {
        let child = self.root.child_token();
        let scheduler = DeploymentScheduler::new(&self.bus, self.min_interval);
        let deployer = Deployer::new(
            &self.bus,
            Arc::clone(&self.dataplane),
            self.concurrency,
            self.max_parallel,
        );
        let drift = DriftMonitor::new(&self.bus, self.drift_interval);
        tokio::spawn(scheduler.run(child.clone()));
        tokio::spawn(deployer.run(child.clone()));
        tokio::spawn(drift.run(child.clone()));
        self.child = Some(child);
    }

    fn stop_leading(&mut self) {
        if let Some(child) = self.child.take() {
            child.cancel();
        }
    }
}

fn parse_endpoints(specs: &[String], namespace: &str) -> Vec<Endpoint> {
    specs
        .iter()
        .enumerate()
        .map(|(i, spec)| match spec.split_once('=') {
            Some((name, url)) => Endpoint::new(name, namespace, url),
            None => Endpoint::new(format!("static-{i}"), namespace, spec.clone()),
        })
        .collect()
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,haptic=debug"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();
    let document = std::fs::read_to_string(&args.config)
        .map_err(|err| eyre::eyre!("failed to read {}: {err}", args.config.display()))?;
    let config = ControllerConfig::from_toml(&document)
        .map_err(|err| eyre::eyre!("invalid configuration: {err}"))?;
    let min_interval: Duration = config
        .deployment
        .min_interval
        .try_into()
        .unwrap_or(Duration::from_secs(5));
    let drift_interval: Duration = config
        .deployment
        .drift_interval
        .try_into()
        .unwrap_or(Duration::from_secs(300));

    tracing::info!(
        config = %args.config.display(),
        identity = %args.identity,
        "starting haptic"
    );

    let bus = EventBus::new();
    let root = CancellationToken::new();
    let registry = Arc::new(VarRegistry::new());

    let engine = Arc::new(StubEngine::new());
    let checker = Arc::new(StubChecker::ok());
    let index = Arc::new(StaticIndex::default());
    let dataplane: Arc<dyn DataplaneClient> = Arc::new(StubDataplane::default());

    // Warm-standby components. Everything subscribes before the bus starts
    // so pre-start events reach every component regardless of spawn order.
    tokio::spawn(ConfigLoader::new(&bus).run(root.clone()));
    tokio::spawn(CredentialsLoader::new(&bus).run(root.clone()));
    tokio::spawn(ValidationCoordinator::new(&bus, VALIDATORS).run(root.clone()));
    let hosts = [
        ValidatorHost::new(&bus, Arc::new(BasicValidator)),
        ValidatorHost::new(&bus, Arc::new(TemplateValidator::new(engine.clone()))),
        ValidatorHost::new(&bus, Arc::new(JsonPathValidator)),
        ValidatorHost::new(
            &bus,
            Arc::new(DryRunValidator::new(engine.clone(), checker.clone())),
        ),
    ];
    for host in hosts {
        tokio::spawn(host.run(root.clone()));
    }
    tokio::spawn(Renderer::new(&bus, engine, index).run(root.clone()));
    tokio::spawn(RenderedChecker::new(&bus, checker).run(root.clone()));
    tokio::spawn(
        StateCache::new(&bus, &registry, haptic_introspection::DEFAULT_EVENT_HISTORY)
            .run(root.clone()),
    );

    // Admission webhook, when TLS material is supplied.
    if let (Some(cert), Some(key)) = (&args.webhook_cert, &args.webhook_key) {
        let tls = load_server_config(cert, key)?;
        let stats = Arc::new(WebhookStats::default());
        stats.register_vars(
            &registry,
            args.webhook_listen.to_string(),
            defaults::WEBHOOK_PATH.to_owned(),
            cert.display().to_string(),
            key.display().to_string(),
        );
        let mut handlers = HandlerRegistry::new(config.webhook.allow_unregistered_kinds);
        handlers.register(
            "v1.ConfigMap",
            Arc::new(ScatterGatherValidation::new(
                &bus,
                ["basic", "dryrun"],
                ScatterGatherValidation::DEFAULT_TIMEOUT,
            )),
        );
        let server = WebhookServer::new(
            handlers,
            KindResolver::with_defaults(),
            stats,
            defaults::WEBHOOK_PATH,
        );
        let addr = args.webhook_listen;
        let cancel = root.clone();
        tokio::spawn(async move {
            if let Err(err) = server.serve(addr, tls, cancel).await {
                tracing::error!(error = %err, "webhook server exited");
            }
        });
    } else {
        tracing::info!("no TLS material supplied, admission webhook disabled");
    }

    // Introspection endpoint.
    let listener = tokio::net::TcpListener::bind(args.introspection_listen).await?;
    let app = haptic_introspection::router(registry.clone());
    #[cfg(feature = "jemalloc-prof")]
    let app = app.merge(heap_profile::router());
    let introspection_cancel = root.clone();
    tokio::spawn(async move {
        if let Err(err) = haptic_introspection::serve(listener, app, introspection_cancel).await {
            tracing::error!(error = %err, "introspection server exited");
        }
    });

    // Leader election. Standalone mode holds the lease unconditionally.
    let (lease_tx, lease_rx) = stub::immediate_leader_lease();
    let scope = LeaderScope {
        bus: bus.clone(),
        root: root.clone(),
        child: None,
        dataplane,
        min_interval,
        drift_interval,
        concurrency: config.deployment.concurrency,
        max_parallel: config.deployment.max_parallel,
    };
    let adapter = LeaderElectionAdapter::new(
        &bus,
        &args.identity,
        &args.lease_name,
        &args.namespace,
        lease_rx,
        Box::new(scope),
    );
    tokio::spawn(adapter.run(root.clone()));

    bus.start();
    bus.publish(Event::new(EventPayload::ControllerStarted {
        config_version: "file".to_owned(),
        secret_version: String::new(),
    }));
    bus.publish(Event::new(EventPayload::ConfigResourceChanged {
        object: stub::configmap_object("haptic-config", &args.namespace, "file", &document),
    }));
    let endpoints = parse_endpoints(&args.endpoints, &args.namespace);
    if !endpoints.is_empty() {
        bus.publish(Event::new(EventPayload::PodsDiscovered { endpoints }));
    }

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    let reason = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    tracing::info!(reason, "shutting down");

    bus.publish(Event::new(EventPayload::ControllerShutdown {
        reason: reason.to_owned(),
    }));
    root.cancel();
    drop(lease_tx);
    bus.stop();
    // Give subscribers a moment to drain their buffers.
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}
