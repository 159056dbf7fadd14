use anyhow::Result;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use bootforge_portal::api::{self, AppState};
use bootforge_portal::config::{normalize_url_root, Config};
use bootforge_portal::renderer::TemplateRegistry;
use bootforge_portal::{db, tls};

#[derive(Parser, Debug)]
#[command(name = "bootforge-portal")]
#[command(about = "Bare-metal node provisioning portal", long_about = None)]
struct Args {
    /// Bind address for HTTP server
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Database file path
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// External base URL nodes use to reach this portal
    #[arg(long)]
    external_url: Option<String>,

    /// Shared secret for the operator API (x-api-key header)
    #[arg(long, env = "BOOTFORGE_ADMIN_TOKEN")]
    admin_token: String,

    /// TLS certificate (PEM); together with --tls-key enables HTTPS
    #[arg(long)]
    tls_cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long)]
    tls_key: Option<PathBuf>,

    /// Serve plain HTTP (credentials travel unprotected)
    #[arg(long, default_value_t = false)]
    allow_insecure: bool,

    /// Embed a rendered /etc/hosts into every Ignition document
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    install_etc_hosts: bool,

    /// Path the cluster CA certificate takes on provisioned nodes
    #[arg(long, default_value = "/etc/kubernetes/ssl/ca.pem")]
    ca_cert_path: String,

    /// Path the node certificate takes on provisioned nodes
    #[arg(long, default_value = "/etc/kubernetes/ssl/node.pem")]
    node_cert_path: String,

    /// Path the node private key takes on provisioned nodes
    #[arg(long, default_value = "/etc/kubernetes/ssl/node-key.pem")]
    node_key_path: String,

    /// Kernel image URL handed to iPXE
    #[arg(long, default_value = "https://stable.release.core-os.net/amd64-usr/current/coreos_production_pxe.vmlinuz")]
    kernel_image_url: String,

    /// Initrd image URL handed to iPXE
    #[arg(long, default_value = "https://stable.release.core-os.net/amd64-usr/current/coreos_production_pxe_image.cpio.gz")]
    initrd_image_url: String,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Bootforge provisioning portal");

    let tls_paths = match (&args.tls_cert, &args.tls_key) {
        (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
        (None, None) => {
            if !args.allow_insecure {
                anyhow::bail!(
                    "no TLS material configured; pass --tls-cert/--tls-key or --allow-insecure"
                );
            }
            warn!("Serving plain HTTP; node credentials travel unprotected");
            None
        }
        _ => anyhow::bail!("--tls-cert and --tls-key must be given together"),
    };
    let use_tls = tls_paths.is_some();

    // Initialize database
    let db = db::init_db(args.db_path)?;

    // Template environments are immutable for the process lifetime.
    let registry = Arc::new(TemplateRegistry::new()?);

    let scheme = if use_tls { "https" } else { "http" };
    let external_url = args
        .external_url
        .unwrap_or_else(|| format!("{}://{}/", scheme, args.bind));

    let config = Arc::new(Config {
        external_url: normalize_url_root(&external_url),
        ca_cert_path: args.ca_cert_path,
        node_cert_path: args.node_cert_path,
        node_key_path: args.node_key_path,
        install_etc_hosts: args.install_etc_hosts,
        kernel_image_url: args.kernel_image_url,
        initrd_image_url: args.initrd_image_url,
        admin_token: args.admin_token,
    });

    let state = Arc::new(AppState {
        db,
        config,
        registry,
    });

    let app = api::create_router(state);

    let addr: SocketAddr = args.bind.parse()?;
    info!("Listening on {}://{}", scheme, addr);

    if let Some((cert_path, key_path)) = tls_paths {
        let server_config = tls::load_server_config(&cert_path, &key_path)?;
        let rustls_config = RustlsConfig::from_config(Arc::new(server_config));
        axum_server::bind_rustls(addr, rustls_config)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
    }

    Ok(())
}
