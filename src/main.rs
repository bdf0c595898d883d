//! Cuppy Points Ledger Service
//!
//! Main entry point for the Cuppy rewards backend.
//! This service provides:
//! - HTTP API for accounts, the points ledger and the friend graph
//! - WebSocket server pushing balance and friend request updates

use cuppy_ledger::api;
use cuppy_ledger::config::StorageBackend;
use cuppy_ledger::database::{create_pool, run_migrations, Database};
use cuppy_ledger::repositories::Repositories;
use cuppy_ledger::{AppConfig, AppError, AppResult, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load environment variables first
    dotenv::dotenv().ok();

    // Load configuration
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        AppError::Config(e)
    })?;

    // Initialize tracing/logging with config
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("cuppy_ledger={},sqlx=warn,tower_http=info", config.log_level).into()
    });
    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║           Cuppy Ledger Service Starting                  ║");
    info!("╚══════════════════════════════════════════════════════════╝");
    info!("Environment: {}", config.environment);
    info!("Log level: {}", config.log_level);
    info!("HTTP port: {}", config.http_port);
    if let Some(ws_port) = config.ws_port {
        info!("WebSocket port: {}", ws_port);
    }

    // =========================================================================
    // STORAGE SETUP
    // =========================================================================
    let (repositories, database) = match (config.storage, &config.database) {
        (StorageBackend::Postgres, Some(db_config)) => {
            info!("Connecting to database...");

            let pool = create_pool(db_config).await.map_err(|e| {
                error!("Failed to create database pool: {}", e);
                AppError::Database(e)
            })?;

            info!("Database connection pool created successfully");
            info!("Max connections: {}", db_config.max_connections);

            info!("Running database migrations...");
            run_migrations(&pool).await.map_err(|e| {
                error!("Database migration failed: {}", e);
                AppError::Database(e)
            })?;
            info!("Database migrations completed successfully");

            (Repositories::postgres(pool.clone()), Some(Database::new(pool)))
        }
        (StorageBackend::Postgres, None) => {
            return Err(AppError::Config(
                "postgres backend selected without database configuration".to_string(),
            ));
        }
        (StorageBackend::Memory, _) => {
            if config.is_production() {
                warn!("Running the in-memory backend in production - data is lost on restart");
            }
            info!("Using in-memory storage with the default catalog");
            (Repositories::in_memory(), None)
        }
    };

    // =========================================================================
    // CORE SERVICES INITIALIZATION
    // =========================================================================
    info!("Initializing core services...");

    let http_port = config.http_port;
    let ws_port = config.ws_port;
    let environment = config.environment.clone();

    let app_state = Arc::new(AppState::new(repositories, database, config)?);
    info!("✓ Application state initialized");

    // =========================================================================
    // START SERVERS
    // =========================================================================
    let http_addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    info!("Starting HTTP server on {}...", http_addr);

    let http_listener = TcpListener::bind(http_addr)
        .await
        .map_err(|e| AppError::Message(format!("Failed to bind HTTP server: {}", e)))?;
    let router = api::create_router(app_state.clone());

    let http_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, router).await {
            error!("HTTP server error: {}", e);
        }
    });
    info!("✓ HTTP server started on {}", http_addr);

    let ws_handle = if let Some(ws_port) = ws_port {
        let ws_addr = SocketAddr::from(([0, 0, 0, 0], ws_port));
        info!("Starting WebSocket server on {}...", ws_addr);

        let listener = TcpListener::bind(ws_addr).await.map_err(|e| {
            AppError::Message(format!("Failed to bind WebSocket server: {}", e))
        })?;
        let ws_server = app_state.ws_server.clone();

        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        info!("New WebSocket connection from {}", addr);
                        let ws = ws_server.clone();
                        tokio::spawn(async move {
                            if let Err(e) = ws.handle_connection(stream).await {
                                error!("WebSocket connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("WebSocket accept error: {}", e);
                    }
                }
            }
        });

        info!("✓ WebSocket server started on {}", ws_addr);
        Some(handle)
    } else {
        warn!("WS_PORT not configured - WebSocket server not started");
        None
    };

    // =========================================================================
    // READY
    // =========================================================================
    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║           Cuppy Ledger Service Ready!                    ║");
    info!("╠══════════════════════════════════════════════════════════╣");
    info!("║  HTTP API:     0.0.0.0:{}                              ║", http_port);
    if let Some(ws_port) = ws_port {
        info!("║  WebSocket:    0.0.0.0:{}                              ║", ws_port);
    }
    info!("║  Environment:  {}                                    ║", environment);
    info!("╚══════════════════════════════════════════════════════════╝");
    info!("Press Ctrl+C to shutdown gracefully");

    // =========================================================================
    // SHUTDOWN HANDLING
    // =========================================================================
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, shutting down gracefully...");
        }
        _ = http_handle => {
            error!("HTTP server exited unexpectedly");
        }
        _ = async {
            match ws_handle {
                Some(handle) => {
                    handle.await.ok();
                }
                // Never completes if WebSocket is not running
                None => futures_util::future::pending::<()>().await,
            }
        } => {
            error!("WebSocket server exited unexpectedly");
        }
    }

    info!("Cuppy ledger service shutdown complete");
    Ok(())
}
