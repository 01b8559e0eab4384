//! Wire 风格的依赖注入
//!
//! 按依赖顺序构建存储、推送、注册表与协调器

use std::sync::Arc;

use anyhow::{Context, Result};
use pilgrim_core::config::PilgrimAppConfig;
use pilgrim_core::metrics::{PushMetrics, SignalingGatewayMetrics};
use pilgrim_core::utils::SystemClock;
use pilgrim_push::{PushConfig, PushDispatcher, build_push_sender};
use tracing::info;

use crate::application::{CallHistoryService, RoomBroadcaster, SessionCoordinator};
use crate::config::{SignalingGatewayConfig, StoreKind};
use crate::domain::repository::{AccountStore, CallRecordRepository};
use crate::domain::service::DirectoryService;
use crate::infrastructure::RoomRegistry;
use crate::infrastructure::persistence::{
    InMemoryAccountStore, InMemoryCallRecordRepository, MongoAccountStore,
    MongoCallRecordRepository, connect_database,
};

/// 应用上下文
pub struct ApplicationContext {
    pub config: Arc<SignalingGatewayConfig>,
    pub registry: Arc<RoomRegistry>,
    pub coordinator: SessionCoordinator,
    pub broadcaster: RoomBroadcaster,
    pub history: CallHistoryService,
}

struct Stores {
    staff: Arc<dyn AccountStore>,
    pilgrims: Arc<dyn AccountStore>,
    calls: Arc<dyn CallRecordRepository>,
}

async fn build_stores(config: &SignalingGatewayConfig) -> Result<Stores> {
    match config.store {
        StoreKind::Memory => {
            info!("using in-memory account and call record stores");
            Ok(Stores {
                staff: Arc::new(InMemoryAccountStore::new()),
                pilgrims: Arc::new(InMemoryAccountStore::new()),
                calls: Arc::new(InMemoryCallRecordRepository::new()),
            })
        }
        StoreKind::Mongo => {
            let url = config
                .mongo_url
                .as_deref()
                .context("mongo store selected but no mongodb url configured")?;
            let database = connect_database(url, &config.mongo_database)
                .await
                .context("failed to connect to mongodb")?;

            let calls = MongoCallRecordRepository::new(&database, &config.call_collection);
            calls
                .ensure_indexes()
                .await
                .context("failed to create call record indexes")?;

            info!(database = %config.mongo_database, "using mongodb stores");
            Ok(Stores {
                staff: Arc::new(MongoAccountStore::new(&database, &config.staff_collection)),
                pilgrims: Arc::new(MongoAccountStore::new(&database, &config.pilgrim_collection)),
                calls: Arc::new(calls),
            })
        }
    }
}

pub async fn initialize(app_config: &PilgrimAppConfig) -> Result<ApplicationContext> {
    let config = Arc::new(SignalingGatewayConfig::from_app_config(app_config));

    let stores = build_stores(&config).await?;
    let directory = Arc::new(DirectoryService::new(stores.staff, stores.pilgrims));

    let push_config = PushConfig::from_app_config(app_config);
    let push_sender = build_push_sender(&push_config)?;
    let push = PushDispatcher::new(push_sender, Arc::new(PushMetrics::new()));

    let registry = Arc::new(RoomRegistry::new());
    let coordinator = SessionCoordinator::new(
        registry.clone(),
        directory,
        stores.calls.clone(),
        push,
        Arc::new(SignalingGatewayMetrics::new()),
        Arc::new(SystemClock),
    )
    .with_ring_timeout(config.ring_timeout);

    if let Some(timeout) = config.ring_timeout {
        info!(seconds = timeout.as_secs(), "ring timeout enabled");
    }

    Ok(ApplicationContext {
        broadcaster: RoomBroadcaster::new(registry.clone()),
        history: CallHistoryService::new(stores.calls),
        config,
        registry,
        coordinator,
    })
}
