use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use tokio::sync::{RwLock, Semaphore};

use crate::app_context::{get_or_create_context, reset_context, AppContext};
use crate::browser_task::BackgroundController;
use crate::llm::LlmCachePool;
use crate::manual_override::ManualSessionManager;
use crate::perception_service::PerceptionService;
use crate::sessions::SessionService;
use crate::task_status::TaskStatusRegistry;
use crate::Config;

use super::rate_limit::RateLimiter;

/// Shared state threaded through every axum handler in the serve surface.
///
/// This mirrors the CLI binary's own `ServeState`, but is exposed as a
/// public type of this crate: the engine crate is consumed as a library by
/// the root binary and by integration tests, so every field the router
/// modules reach for has to be visible outside this module.
#[derive(Clone)]
pub struct ServeState {
    pub ws_url: Option<String>,
    pub config: Arc<Config>,
    pub perception_service: Arc<PerceptionService>,
    pub llm_cache: Option<Arc<LlmCachePool>>,
    pub rate_limiter: Arc<RateLimiter>,
    app_context: Arc<RwLock<Arc<AppContext>>>,
    pub health: Arc<ServeHealth>,
    pub chat_context_wait: Option<Duration>,
    pub chat_context_semaphore: Arc<Semaphore>,
    tenant_id: String,
    tenant_storage_root: PathBuf,
    background_controller: Arc<BackgroundController>,
}

impl ServeState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ws_url: Option<String>,
        config: Arc<Config>,
        perception_service: Arc<PerceptionService>,
        llm_cache: Option<Arc<LlmCachePool>>,
        rate_limiter: Arc<RateLimiter>,
        app_context: Arc<RwLock<Arc<AppContext>>>,
        health: Arc<ServeHealth>,
        chat_context_wait: Option<Duration>,
        chat_context_semaphore: Arc<Semaphore>,
        tenant_id: String,
        tenant_storage_root: PathBuf,
        background_controller: Arc<BackgroundController>,
    ) -> Self {
        Self {
            ws_url,
            config,
            perception_service,
            llm_cache,
            rate_limiter,
            app_context,
            health,
            chat_context_wait,
            chat_context_semaphore,
            tenant_id,
            tenant_storage_root,
            background_controller,
        }
    }

    pub fn background_controller(&self) -> Arc<BackgroundController> {
        Arc::clone(&self.background_controller)
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn websocket_url(&self) -> Option<&str> {
        self.ws_url.as_deref()
    }

    pub fn default_storage_root(&self) -> PathBuf {
        self.tenant_storage_root.clone()
    }

    pub fn perception_service(&self) -> Arc<PerceptionService> {
        self.perception_service.clone()
    }

    pub async fn app_context(&self) -> Arc<AppContext> {
        self.app_context.read().await.clone()
    }

    pub async fn task_status_registry(&self) -> Arc<TaskStatusRegistry> {
        self.app_context().await.task_status_registry()
    }

    pub async fn session_service(&self) -> Arc<SessionService> {
        self.app_context().await.session_service()
    }

    pub async fn manual_session_manager(&self) -> Arc<ManualSessionManager> {
        self.app_context().await.manual_session_manager()
    }

    pub fn execution_output_root(&self) -> PathBuf {
        self.tenant_storage_root.clone()
    }

    pub async fn refresh_app_context(&self) -> Result<()> {
        reset_context().await;
        let context = self.build_context().await?;
        let mut guard = self.app_context.write().await;
        *guard = context;
        Ok(())
    }

    async fn build_context(&self) -> Result<Arc<AppContext>> {
        get_or_create_context(
            self.tenant_id.clone(),
            Some(self.tenant_storage_root.clone()),
            self.config.policy_paths.clone(),
        )
        .await
        .map_err(|err| anyhow!(err.to_string()))
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        let inner = self.health.snapshot();
        HealthSnapshot {
            pooling_enabled: self.perception_service.pooling_enabled(),
            pooling_cooldown_secs: self.perception_service.pooling_cooldown_secs(),
            llm_cache_enabled: self.llm_cache.is_some(),
            ready: inner.ready,
            live: inner.live,
            last_ready_check: inner.last_ready_check,
            last_error: inner.last_error,
        }
    }

    pub fn mark_live(&self) {
        self.health.mark_live();
    }

    pub fn mark_ready(&self) {
        self.health.mark_ready();
    }

    pub fn mark_unready(&self, error: impl Into<String>) {
        self.health.mark_unready(error);
    }
}

pub struct HealthSnapshot {
    pub pooling_enabled: bool,
    pub pooling_cooldown_secs: Option<u64>,
    pub llm_cache_enabled: bool,
    pub ready: bool,
    pub live: bool,
    pub last_ready_check: Option<u64>,
    pub last_error: Option<String>,
}

#[derive(Default)]
pub struct ServeHealth {
    live: AtomicBool,
    ready: AtomicBool,
    last_ready_check: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl ServeHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_live(&self) {
        self.live.store(true, Ordering::SeqCst);
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        self.update_last_check();
        let mut guard = self.last_error.lock().expect("health lock poisoned");
        *guard = None;
    }

    pub fn mark_unready(&self, error: impl Into<String>) {
        self.ready.store(false, Ordering::SeqCst);
        self.update_last_check();
        let mut guard = self.last_error.lock().expect("health lock poisoned");
        *guard = Some(error.into());
    }

    pub fn snapshot(&self) -> ServeHealthSnapshot {
        ServeHealthSnapshot {
            ready: self.ready.load(Ordering::SeqCst),
            live: self.live.load(Ordering::SeqCst),
            last_ready_check: self.last_ready_check(),
            last_error: self
                .last_error
                .lock()
                .expect("health lock poisoned")
                .clone(),
        }
    }

    fn update_last_check(&self) {
        if let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) {
            self.last_ready_check
                .store(duration.as_secs(), Ordering::SeqCst);
        }
    }

    fn last_ready_check(&self) -> Option<u64> {
        match self.last_ready_check.load(Ordering::SeqCst) {
            0 => None,
            value => Some(value),
        }
    }
}

pub struct ServeHealthSnapshot {
    pub ready: bool,
    pub live: bool,
    pub last_ready_check: Option<u64>,
    pub last_error: Option<String>,
}
