//! Binary entry point: CLI parsing, logging, metrics exporter, runtime.

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cql_mirror::{Proxy, ProxyConfig};

/// A dual write proxy for Cassandra.
#[derive(Parser, Debug)]
#[command(name = "cql-mirror", version, about)]
struct Cli {
    /// Source cluster. This is the cluster which is authoritative for
    /// reads.
    source: String,

    /// Destination cluster. This is the cluster we ignore reads for.
    target: String,

    /// Source cluster port.
    #[arg(long, default_value_t = 9042)]
    source_port: u16,

    /// Identifier used in logs and metrics for the source cluster.
    #[arg(long, default_value = "source node")]
    source_identifier: String,

    /// Destination cluster port.
    #[arg(long, default_value_t = 9042)]
    target_port: u16,

    /// Identifier used in logs and metrics for the target cluster.
    #[arg(long, default_value = "target node")]
    target_identifier: String,

    /// Port number the proxy listens under.
    #[arg(short = 'p', long, default_value_t = 29042)]
    proxy_port: u16,

    /// Pem file containing the server certificate for the proxy to
    /// perform TLS encryption. If not set, no encryption.
    #[arg(long)]
    proxy_pem_certfile: Option<PathBuf>,

    /// Pem file containing the key for the proxy to perform TLS
    /// encryption. If not set, no encryption.
    #[arg(long)]
    proxy_pem_keyfile: Option<PathBuf>,

    /// How many worker threads should be launched.
    #[arg(short = 't', long, default_value_t = 1)]
    threads: usize,

    /// Supported Cassandra protocol version(s). If not set return what
    /// source server says.
    #[arg(long = "protocol-version")]
    protocol_version: Vec<u8>,

    /// Supported Cassandra CQL version(s). If not set return what
    /// source server says.
    #[arg(long = "cql-version")]
    cql_version: Vec<String>,

    /// Wait for write completed on both clusters before answering.
    #[arg(short = 'W', long, default_value_t = true, action = ArgAction::Set)]
    wait: bool,

    /// Scan for uuid()/now() and generate on proxy for inserts/updates.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    uuid: bool,

    /// Wrap upstream connections in trust-all TLS.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    upstream_tls: bool,

    /// Provide metrics and start the metrics endpoint.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    metrics: bool,

    /// Port number the Prometheus metrics are available under.
    #[arg(long, default_value_t = 28000)]
    metrics_port: u16,
}

impl Cli {
    fn into_config(self) -> ProxyConfig {
        ProxyConfig {
            source_host: self.source,
            source_port: self.source_port,
            source_identifier: self.source_identifier,
            target_host: self.target,
            target_port: self.target_port,
            target_identifier: self.target_identifier,
            proxy_port: self.proxy_port,
            tls_cert: self.proxy_pem_certfile,
            tls_key: self.proxy_pem_keyfile,
            upstream_tls: self.upstream_tls,
            threads: self.threads,
            wait: self.wait,
            uuid: self.uuid,
            protocol_versions: self.protocol_version,
            cql_versions: self.cql_version,
            metrics: self.metrics,
            metrics_port: self.metrics_port,
            ..ProxyConfig::default()
        }
    }
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = cli.into_config();
    if let Err(e) = config.validate() {
        error!("{e}");
        std::process::exit(1);
    }
    for (name, value) in config.options() {
        info!("{name} : {value}");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.threads)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    let code = runtime.block_on(async move {
        if config.metrics {
            match PrometheusBuilder::new()
                .with_http_listener(([0, 0, 0, 0], config.metrics_port))
                .install()
            {
                Ok(()) => info!("Metrics at port: {}", config.metrics_port),
                Err(e) => warn!("Metrics endpoint unavailable: {e}"),
            }
        }

        info!("Proxy starting...");
        let proxy = match Proxy::new(config) {
            Ok(proxy) => proxy,
            Err(e) => {
                error!("{e}");
                return 1;
            }
        };
        match proxy.run().await {
            Ok(()) => 0,
            Err(e) => {
                error!("{e}");
                1
            }
        }
    });

    std::process::exit(code);
}
