use std::sync::Arc;

use crate::broadcast::BroadcastHub;
use crate::common::config::AppConfig;
use crate::downloader::DownloadManager;
use crate::registry::TaskRegistry;
use crate::rpc::DaemonApi;
use crate::sync::Reconciler;

/// 把注册表、提交入口、同步循环和推送中心组装在一起
#[derive(Clone)]
pub struct Engine {
    pub manager: DownloadManager,
    pub hub: Arc<BroadcastHub>,
    pub reconciler: Arc<Reconciler>,
}

impl Engine {
    pub fn new(daemon: Arc<dyn DaemonApi>, config: &AppConfig) -> Self {
        let registry = Arc::new(TaskRegistry::new());
        let manager = DownloadManager::new(
            daemon,
            registry,
            Arc::new(config.download.clone()),
            config.sync.max_retry_attempts,
        );
        let hub = Arc::new(BroadcastHub::new());
        let reconciler = Arc::new(Reconciler::new(
            manager.clone(),
            Arc::clone(&hub),
            config.sync.interval,
        ));
        Self {
            manager,
            hub,
            reconciler,
        }
    }

    #[cfg(feature = "http")]
    pub fn app_state(&self) -> Arc<crate::server::AppState> {
        Arc::new(crate::server::AppState {
            manager: self.manager.clone(),
            reconciler: Arc::clone(&self.reconciler),
            hub: Arc::clone(&self.hub),
        })
    }
}
