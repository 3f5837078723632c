use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kube::{api::Api, core::DynamicObject, Client};
use serde_json::Value as Json;
use tokio::sync::Notify;
use tracing::{info, warn};

use kopatch_apply::{apply_reaction_outcomes, Identity, PatchIssuer, ReactionOutcome, RecordingLogger, TracingObjectLogger};
use kopatch_core::Resource;
use kopatch_kubehub::{api_resource, ApiContext, KubeDiscovery, ResourceCaps};

#[derive(Parser, Debug)]
#[command(name = "kopatchctl", version, about = "Apply a merge-patch to a live object and report what did not stick")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace (ignored for cluster-scoped kinds)
    #[arg(long = "ns", global = true, env = "KOPATCH_NAMESPACE")]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show how a kind is served: plural, scope, status subresource
    Resolve {
        /// GVK key, e.g. "v1/ConfigMap" or "kopf.dev/v1/KopfExample"
        gvk: String,
    },
    /// Merge-patch one object and verify the result
    Patch {
        /// GVK key, e.g. "v1/ConfigMap" or "kopf.dev/v1/KopfExample"
        gvk: String,
        /// Object name
        name: String,
        /// Merge-patch document (JSON)
        #[arg(long = "patch")]
        patch: String,
        /// Delay to hand to the scheduler, in seconds (repeatable)
        #[arg(long = "delay")]
        delays: Vec<f64>,
    },
}

fn init_tracing() {
    let env = std::env::var("KOPATCH_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KOPATCH_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KOPATCH_METRICS_ADDR; expected host:port");
        }
    }
}

fn resolve(discovery: &KubeDiscovery, gvk: &str) -> Result<(Resource, ResourceCaps)> {
    discovery.resolve_gvk(gvk)?.ok_or_else(|| anyhow!("GVK not found: {}", gvk))
}

/// Live object as the pre-patch body; a minimal identity body when it does not exist.
async fn fetch_body(client: Client, resource: &Resource, caps: ResourceCaps, namespace: Option<&str>, name: &str) -> Result<Json> {
    let ar = api_resource(resource);
    let api: Api<DynamicObject> = match (caps.namespaced, namespace) {
        (true, Some(ns)) => Api::namespaced_with(client, ns, &ar),
        (true, None) => return Err(anyhow!("namespace required for namespaced kind")),
        (false, _) => Api::all_with(client, &ar),
    };
    match api.get_opt(name).await.context("fetching live object")? {
        Some(obj) => Ok(serde_json::to_value(&obj)?),
        None => {
            warn!(name = %name, "object not found; patching against a bare identity");
            let namespace = if caps.namespaced { namespace } else { None };
            Ok(Identity::from_parts(namespace, Some(name), None)?.to_body()?)
        }
    }
}

fn to_durations(secs: &[f64]) -> Result<Vec<Duration>> {
    secs.iter()
        .map(|s| Duration::try_from_secs_f64(*s).map_err(|e| anyhow!("invalid delay {}: {}", s, e)))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let client = Client::try_default().await.context("building kube client")?;
    let discovery = Arc::new(KubeDiscovery::run(client.clone()).await?);

    match cli.command {
        Commands::Resolve { gvk } => {
            let (resource, caps) = resolve(&discovery, &gvk)?;
            match cli.output {
                Output::Human => {
                    let scope = if caps.namespaced { "namespaced" } else { "cluster" };
                    let status = if caps.status_subresource { "status subresource" } else { "status in body" };
                    println!("{} • {} • {} • {}", resource.gvk_key(), resource.plural, scope, status);
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "resource": resource, "caps": caps }))?),
            }
        }
        Commands::Patch { gvk, name, patch, delays: delay_secs } => {
            let ns = cli.namespace.as_deref();
            info!(gvk = %gvk, ns = ?ns, name = %name, "patch invoked");
            let patch: Json = serde_json::from_str(&patch).context("parsing --patch as JSON")?;
            let requested = to_durations(&delay_secs)?;
            let (resource, caps) = resolve(&discovery, &gvk)?;
            let body = fetch_body(client, &resource, caps, ns, &name).await?;

            let context = ApiContext::infer().await?;
            let issuer = PatchIssuer::new(discovery.clone(), context);
            let logger = RecordingLogger::wrapping(TracingObjectLogger::for_body(&body));
            let replenished = Notify::new();
            let mut delays = Vec::new();
            apply_reaction_outcomes(
                &issuer,
                &resource,
                &body,
                ReactionOutcome { patch, delays: requested },
                &mut delays,
                &logger,
                &replenished,
            )
            .await?;

            match cli.output {
                Output::Human => {
                    for line in logger.messages() {
                        println!("{}", line);
                    }
                    if !delays.is_empty() {
                        let rendered: Vec<String> = delays.iter().map(|d| format!("{:.3}s", d.as_secs_f64())).collect();
                        println!("delays: {}", rendered.join(", "));
                    }
                }
                Output::Json => {
                    let out = serde_json::json!({
                        "messages": logger.messages(),
                        "delays": delays.iter().map(Duration::as_secs_f64).collect::<Vec<_>>(),
                    });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
            }
        }
    }
    Ok(())
}
