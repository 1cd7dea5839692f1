//! karpenter-core — binary entry point.
//!
//! Wires the four reconcile loops (nodeclaim lifecycle, nodepool health,
//! nodepool counter, nodepool hydration) against a live `kube::Client`,
//! alongside the health and metrics servers every deployment of this engine
//! carries.
//!
//! The concrete `CloudProvider` driver (EC2, etc) is out of scope for this
//! crate and is injected here as a placeholder `NoopCloudProvider` — a real
//! deployment links in a provider crate and constructs its driver in place
//! of this stub.

use clap::Parser;
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::{watcher, Controller};
use kube::{Client, ResourceExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use karpenter_core::cloudprovider::{CloudProvider, DriftReason, DynCloudProvider, RepairPolicy, SupportedNodeClass};
use karpenter_core::cluster::Cluster;
use karpenter_core::config::{Args, Config};
use karpenter_core::controllers::{nodeclaim, nodepool, Context};
use karpenter_core::crd::{NodeClaim, NodePool};
use karpenter_core::error::{Error, Result};
use karpenter_core::health::NodePoolHealth;
use karpenter_core::resource::InstanceTypes;

/// Placeholder `CloudProvider` until a concrete driver is linked in. Every
/// mutating call fails fast with `NodeClassNotReady` so the lifecycle
/// controller backs off rather than spinning.
struct NoopCloudProvider;

#[async_trait::async_trait]
impl CloudProvider for NoopCloudProvider {
    async fn create(&self, claim: &NodeClaim) -> Result<NodeClaim> {
        Err(Error::NodeClassNotReady {
            class: claim.spec.node_class_ref.name.clone(),
            reason: "no cloud provider driver configured".into(),
        })
    }

    async fn delete(&self, claim: &NodeClaim) -> Result<()> {
        Err(Error::NodeClaimNotFound { name: claim.name().to_string() })
    }

    async fn get(&self, provider_id: &str) -> Result<NodeClaim> {
        Err(Error::NodeClaimNotFound { name: provider_id.into() })
    }

    async fn list(&self) -> Result<Vec<NodeClaim>> {
        Ok(vec![])
    }

    async fn get_instance_types(&self, _pool: &NodePool) -> Result<InstanceTypes> {
        Ok(InstanceTypes::new(vec![]))
    }

    async fn is_drifted(&self, _claim: &NodeClaim) -> Result<Option<DriftReason>> {
        Ok(None)
    }

    fn repair_policies(&self) -> Vec<RepairPolicy> {
        vec![]
    }

    fn get_supported_node_classes(&self) -> Vec<SupportedNodeClass> {
        vec![]
    }

    fn name(&self) -> &str {
        "noop"
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!(version = karpenter_core::VERSION, "starting karpenter-core");

    let config = Arc::new(Config::try_from(args)?);
    let client = Client::try_default().await?;

    let health = Arc::new(NodePoolHealth::new());
    let cluster = Arc::new(Cluster::new());
    let cloud_provider: DynCloudProvider = Arc::new(NoopCloudProvider);

    let ctx = Arc::new(Context {
        client: client.clone(),
        cloud_provider,
        health,
        cluster: cluster.clone(),
        config: config.clone(),
    });

    {
        let health_addr = config.health_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(&health_addr).await {
                error!(error = %e, "health server error");
            }
        });
    }

    {
        let metrics_addr = config.metrics_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(&metrics_addr).await {
                error!(error = %e, "metrics server error");
            }
        });
    }

    tokio::spawn(run_node_sync(client.clone(), cluster.clone()));
    tokio::spawn(nodeclaim::run_orphan_gc(
        client.clone(),
        ctx.cloud_provider.clone(),
        std::time::Duration::from_secs(60),
    ));

    let node_claims: Api<NodeClaim> = Api::all(client.clone());
    let node_pools: Api<NodePool> = Api::all(client.clone());

    let lifecycle = Controller::new(node_claims.clone(), watcher::Config::default())
        .run(nodeclaim::reconcile, nodeclaim::error_policy, ctx.clone())
        .for_each(|res| async move {
            if let Err(e) = res {
                warn!(error = %e, "nodeclaim lifecycle reconcile failed");
            }
        });

    let hydration = Controller::new(node_claims, watcher::Config::default())
        .run(nodepool::hydration_reconcile, nodepool::hydration_error_policy, ctx.clone())
        .for_each(|res| async move {
            if let Err(e) = res {
                warn!(error = %e, "nodeclaim hydration reconcile failed");
            }
        });

    let counter = Controller::new(node_pools.clone(), watcher::Config::default())
        .run(nodepool::counter_reconcile, nodepool::counter_error_policy, ctx.clone())
        .for_each(|res| async move {
            if let Err(e) = res {
                warn!(error = %e, "nodepool counter reconcile failed");
            }
        });

    let health_controller = Controller::new(node_pools, watcher::Config::default())
        .run(nodepool::health_reconcile, nodepool::health_error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                warn!(error = %e, "nodepool health reconcile failed");
            }
        });

    info!("controllers started");
    tokio::join!(lifecycle, hydration, counter, health_controller);

    Ok(())
}

/// Keeps the [`Cluster`] cache fresh from the API server's `Node` objects so
/// the counter and lifecycle controllers never issue a live list call.
/// Polls rather than watches: a periodic full list is simpler to reason
/// about than reconciling the cache against a long-lived watch stream, and
/// the counter already tolerates a few seconds of staleness.
async fn run_node_sync(client: Client, cluster: Arc<Cluster>) {
    use k8s_openapi::api::core::v1::Node;
    use kube::api::ListParams;

    let api: Api<Node> = Api::all(client);
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));

    loop {
        interval.tick().await;
        match api.list(&ListParams::default()).await {
            Ok(list) => {
                for node in &list.items {
                    upsert_observed_node(&cluster, node);
                }
                cluster.mark_synced();
            }
            Err(e) => warn!(error = %e, "node list error"),
        }
    }
}

fn upsert_observed_node(cluster: &Cluster, node: &k8s_openapi::api::core::v1::Node) {
    use karpenter_core::cluster::ObservedNode;
    use karpenter_core::resource::ResourceList;

    let allocatable = node
        .status
        .as_ref()
        .and_then(|s| s.allocatable.as_ref())
        .map(|map| {
            let mut list = ResourceList::base();
            for (k, v) in map {
                if let Ok(milli) = v.0.parse::<f64>().map(|f| (f * 1000.0) as i64) {
                    list.set(k.clone(), milli);
                }
            }
            list
        })
        .unwrap_or_else(ResourceList::base);

    let ready = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| conditions.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        .unwrap_or(false);

    let pool_name = node.labels().get("karpenter.sh/nodepool").cloned();
    let provider_id = node.spec.as_ref().and_then(|s| s.provider_id.clone());

    let taints = node
        .spec
        .as_ref()
        .and_then(|s| s.taints.as_ref())
        .map(|taints| {
            taints
                .iter()
                .map(|t| karpenter_core::crd::Taint {
                    key: t.key.clone(),
                    value: t.value.clone(),
                    effect: t.effect.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    cluster.upsert_node(ObservedNode {
        name: node.name_any(),
        provider_id,
        pool_name,
        allocatable,
        ready,
        taints,
    });
}

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("kube=info".parse().unwrap())
        .add_directive("tower=warn".parse().unwrap());

    if args.log_json {
        tracing_subscriber::registry().with(filter).with(fmt::layer().json()).init();
    } else {
        tracing_subscriber::registry().with(filter).with(fmt::layer().with_target(true)).init();
    }
}

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => {
                    Response::builder().status(StatusCode::OK).body(Body::from("ok")).unwrap()
                }
                _ => Response::builder().status(StatusCode::NOT_FOUND).body(Body::from("not found")).unwrap(),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| Error::Internal(format!("invalid health server address: {e}")))?;
    info!(%addr, "health server listening");
    Server::bind(&addr).serve(make_svc).await.map_err(|e| Error::Internal(format!("health server error: {e}")))?;
    Ok(())
}

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let _ = prometheus::register_gauge_vec!(
        "karpenter_core_nodepool_registration_healthy",
        "1 if a NodePool's NodeRegistrationHealthy condition is True, 0 if False",
        &["nodepool"]
    );
    let _ = prometheus::register_gauge_vec!(
        "karpenter_core_nodeclaims_by_condition",
        "Number of NodeClaims currently exposing a given True condition",
        &["condition"]
    );
    let _ = prometheus::register_counter_vec!(
        "karpenter_core_reconcile_errors_total",
        "Reconcile errors by controller",
        &["controller"]
    );

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let metric_families = prometheus::gather();
                    let mut buffer = Vec::new();
                    encoder.encode(&metric_families, &mut buffer).unwrap();
                    Response::builder()
                        .status(StatusCode::OK)
                        .header("Content-Type", encoder.format_type())
                        .body(Body::from(buffer))
                        .unwrap()
                }
                _ => Response::builder().status(StatusCode::NOT_FOUND).body(Body::from("not found")).unwrap(),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| Error::Internal(format!("invalid metrics server address: {e}")))?;
    info!(%addr, "metrics server listening");
    Server::bind(&addr).serve(make_svc).await.map_err(|e| Error::Internal(format!("metrics server error: {e}")))?;
    Ok(())
}
