use std::{net::SocketAddr, process::ExitCode, time::Duration};

use axum::Router;
use axum_server::{Handle, tls_rustls::RustlsConfig};
use clap::Parser;
use oidc_proxy_server::{
    app,
    config::{Cli, ServerConfig, TlsFiles},
    error::StartupError,
};
use rootcause::prelude::Report;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time in-flight requests get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,oidc_proxy_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            tracing::error!(error = %report, "oidc-proxy stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<(), Report<StartupError>> {
    let config = ServerConfig::from_env(cli).map_err(StartupError::config)?;
    let tls = config.tls().map_err(StartupError::config)?;
    tracing::info!("Loaded configuration");

    let router = app::build(&config).await.map_err(StartupError::config)?;

    match tls {
        Some(tls) => serve_tls(&config.addr, &tls, router).await?,
        None => serve(&config.addr, router).await?,
    }

    tracing::info!("shut down");
    Ok(())
}

async fn serve(addr: &str, router: Router) -> Result<(), Report<StartupError>> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| StartupError::Bind {
            addr: addr.to_string(),
            details: e.to_string(),
        })?;
    tracing::info!(addr = %format!("http://{addr}/"), "listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| StartupError::Serve {
        details: e.to_string(),
    })?;
    Ok(())
}

async fn serve_tls(addr: &str, tls: &TlsFiles, router: Router) -> Result<(), Report<StartupError>> {
    // reqwest links rustls with ring as well; pick it before any TLS config is built
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
        .await
        .map_err(|e| StartupError::Tls {
            details: e.to_string(),
        })?;

    let bind_failed = |details: String| StartupError::Bind {
        addr: addr.to_string(),
        details,
    };
    let socket = tokio::net::lookup_host(addr)
        .await
        .map_err(|e| bind_failed(e.to_string()))?
        .next()
        .ok_or_else(|| bind_failed("address did not resolve".to_string()))?;
    tracing::info!(addr = %format!("https://{addr}/"), "listening");

    let handle = Handle::new();
    tokio::spawn({
        let handle = handle.clone();
        async move {
            shutdown_signal().await;
            handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        }
    });

    axum_server::bind_rustls(socket, tls_config)
        .handle(handle)
        .serve(router.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| StartupError::Serve {
            details: e.to_string(),
        })?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
