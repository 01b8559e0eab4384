//! 应用启动器

use std::path::Path;

use anyhow::{Context, Result};
use pilgrim_core::config::PilgrimAppConfig;
use pilgrim_core::load_config;
use pilgrim_core::tracing::init_tracing_from_config;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::wire::{self, ApplicationContext};
use crate::interface::{AppState, build_router};

pub struct ApplicationBootstrap;

impl ApplicationBootstrap {
    /// 运行应用的主入口点
    pub async fn run() -> Result<()> {
        // 优先级：环境变量 > ./config > ../config > config
        let config_path = std::env::var("PILGRIM_CONFIG_PATH")
            .ok()
            .or_else(|| {
                ["./config", "../config", "config"]
                    .iter()
                    .find(|candidate| Path::new(candidate).exists())
                    .map(|candidate| candidate.to_string())
            })
            .unwrap_or_else(|| "config".to_string());

        let app_config = load_config(Some(&config_path));
        init_tracing_from_config(Some(&app_config.logging));
        info!(config_path = %config_path, "configuration loaded");

        let context = match Self::create_context(app_config).await {
            Ok(ctx) => ctx,
            Err(err) => {
                error!(error = %err, "failed to build application context");
                return Err(err);
            }
        };

        Self::start_server(context).await
    }

    pub async fn create_context(config: &PilgrimAppConfig) -> Result<ApplicationContext> {
        let context = wire::initialize(config).await?;
        info!("application context ready");
        Ok(context)
    }

    async fn start_server(context: ApplicationContext) -> Result<()> {
        let address = context.config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("failed to bind {address}"))?;

        let router = build_router(AppState {
            coordinator: context.coordinator.clone(),
            registry: context.registry.clone(),
            history: context.history.clone(),
        });

        info!(address = %address, "signaling gateway listening");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("signaling gateway server failed")?;

        info!("signaling gateway stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
