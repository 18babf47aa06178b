#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use uni_downloader::Engine;
use uni_downloader::common::config::AppConfig;
use uni_downloader::rpc::models::{BitTorrentInfo, BitTorrentMeta, DaemonFile, DaemonUri};
use uni_downloader::rpc::{
    DaemonApi, DaemonHandle, DaemonState, DaemonStatus, GlobalStat, RpcError, VersionInfo,
};

#[derive(Default)]
struct MockState {
    tasks: HashMap<String, DaemonStatus>,
    calls: Vec<String>,
    reject_with: Option<String>,
    last_options: Option<Value>,
    multicall_broken: bool,
    drop_next_submission: bool,
}

/// 内存中的守护进程，用来驱动引擎的集成测试
pub struct MockDaemon {
    state: Mutex<MockState>,
    reachable: AtomicBool,
    next_gid: AtomicU64,
    add_delay_ms: AtomicU64,
}

impl Default for MockDaemon {
    fn default() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            reachable: AtomicBool::new(true),
            next_gid: AtomicU64::new(1),
            add_delay_ms: AtomicU64::new(0),
        }
    }
}

impl MockDaemon {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// 下一次提交被守护进程拒绝
    pub fn reject_next(&self, message: &str) {
        self.state.lock().unwrap().reject_with = Some(message.to_string());
    }

    /// 下一次提交在连接层失败，之后的调用正常
    pub fn drop_next_submission(&self) {
        self.state.lock().unwrap().drop_next_submission = true;
    }

    /// 提交类调用在返回前等待一段时间
    pub fn delay_submissions(&self, delay: Duration) {
        self.add_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn break_multicall(&self) {
        self.state.lock().unwrap().multicall_broken = true;
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|m| *m == method)
            .count()
    }

    pub fn last_options(&self) -> Option<Value> {
        self.state.lock().unwrap().last_options.clone()
    }

    pub fn task_count(&self) -> usize {
        self.state.lock().unwrap().tasks.len()
    }

    /// 没有被移除的任务数
    pub fn live_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .tasks
            .values()
            .filter(|s| s.status != DaemonState::Removed)
            .count()
    }

    pub fn status_of(&self, handle: &DaemonHandle) -> Option<DaemonState> {
        self.state
            .lock()
            .unwrap()
            .tasks
            .get(handle.as_str())
            .map(|s| s.status)
    }

    pub fn set_state(&self, handle: &DaemonHandle, state: DaemonState) {
        self.with_task(handle, |s| s.status = state);
    }

    pub fn set_progress(&self, handle: &DaemonHandle, completed: u64, total: u64, speed: u64) {
        self.with_task(handle, |s| {
            s.status = DaemonState::Active;
            s.completed_length = completed;
            s.total_length = total;
            s.download_speed = speed;
            s.connections = 4;
        });
    }

    pub fn fail(&self, handle: &DaemonHandle, code: &str, message: &str) {
        self.with_task(handle, |s| {
            s.status = DaemonState::Error;
            s.error_code = Some(code.to_string());
            s.error_message = Some(message.to_string());
        });
    }

    /// 模拟守护进程重启后丢失会话
    pub fn forget(&self, handle: &DaemonHandle) {
        self.state.lock().unwrap().tasks.remove(handle.as_str());
    }

    /// 磁力链接元数据下载完成，生成后续任务
    pub fn complete_metadata(&self, handle: &DaemonHandle, name: &str) -> DaemonHandle {
        let next = self.allocate_gid();
        let mut state = self.state.lock().unwrap();
        if let Some(meta) = state.tasks.get_mut(handle.as_str()) {
            meta.status = DaemonState::Complete;
            meta.followed_by = vec![next.clone()];
        }
        let follow_up = DaemonStatus {
            gid: next.clone(),
            status: DaemonState::Active,
            total_length: 2048,
            completed_length: 0,
            info_hash: Some("c12fe1c06bba254a9dc9f519b335aa7c1367a88a".to_string()),
            bittorrent: Some(BitTorrentMeta {
                info: Some(BitTorrentInfo {
                    name: Some(name.to_string()),
                }),
            }),
            ..Default::default()
        };
        state.tasks.insert(next.clone(), follow_up);
        DaemonHandle::new(next)
    }

    /// 直接在守护进程里放一个任务（模拟核心重启前提交的任务）
    pub fn seed(&self, uri: &str, state: DaemonState) -> DaemonHandle {
        let gid = self.allocate_gid();
        let status = DaemonStatus {
            gid: gid.clone(),
            status: state,
            total_length: 100,
            completed_length: 10,
            files: vec![file_for(uri)],
            ..Default::default()
        };
        self.state.lock().unwrap().tasks.insert(gid.clone(), status);
        DaemonHandle::new(gid)
    }

    fn allocate_gid(&self) -> String {
        format!("{:016x}", self.next_gid.fetch_add(1, Ordering::SeqCst))
    }

    fn with_task(&self, handle: &DaemonHandle, f: impl FnOnce(&mut DaemonStatus)) {
        let mut state = self.state.lock().unwrap();
        let task = state
            .tasks
            .get_mut(handle.as_str())
            .expect("unknown handle in mock");
        f(task);
    }

    fn enter(&self, method: &str) -> Result<(), RpcError> {
        self.state.lock().unwrap().calls.push(method.to_string());
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RpcError::Connection("connection refused".to_string()))
        }
    }

    async fn add(&self, method: &str, uri: &str, options: Value) -> Result<DaemonHandle, RpcError> {
        self.enter(method)?;
        let delay = self.add_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let mut state = self.state.lock().unwrap();
        state.last_options = Some(options);
        if std::mem::take(&mut state.drop_next_submission) {
            return Err(RpcError::Connection("connection reset by peer".to_string()));
        }
        if let Some(message) = state.reject_with.take() {
            return Err(RpcError::Daemon { code: 1, message });
        }
        drop(state);

        let gid = self.allocate_gid();
        let status = DaemonStatus {
            gid: gid.clone(),
            status: DaemonState::Waiting,
            files: vec![file_for(uri)],
            ..Default::default()
        };
        self.state.lock().unwrap().tasks.insert(gid.clone(), status);
        Ok(DaemonHandle::new(gid))
    }

    fn lookup(&self, handle: &DaemonHandle) -> Result<DaemonStatus, RpcError> {
        self.state
            .lock()
            .unwrap()
            .tasks
            .get(handle.as_str())
            .cloned()
            .ok_or_else(|| not_found(handle))
    }

    fn update(
        &self,
        method: &str,
        handle: &DaemonHandle,
        state: DaemonState,
    ) -> Result<(), RpcError> {
        self.enter(method)?;
        let mut guard = self.state.lock().unwrap();
        let task = guard
            .tasks
            .get_mut(handle.as_str())
            .ok_or_else(|| not_found(handle))?;
        task.status = state;
        Ok(())
    }

    fn queue(&self, method: &str, states: &[DaemonState]) -> Result<Vec<DaemonStatus>, RpcError> {
        self.enter(method)?;
        let mut tasks: Vec<DaemonStatus> = self
            .state
            .lock()
            .unwrap()
            .tasks
            .values()
            .filter(|s| states.contains(&s.status))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.gid.cmp(&b.gid));
        Ok(tasks)
    }
}

fn file_for(uri: &str) -> DaemonFile {
    DaemonFile {
        path: String::new(),
        length: 0,
        uris: vec![DaemonUri {
            uri: uri.to_string(),
            status: "used".to_string(),
        }],
    }
}

fn not_found(handle: &DaemonHandle) -> RpcError {
    RpcError::Daemon {
        code: 1,
        message: format!("GID {} is not found", handle),
    }
}

#[async_trait]
impl DaemonApi for MockDaemon {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    async fn get_version(&self) -> Result<VersionInfo, RpcError> {
        self.enter("aria2.getVersion")?;
        Ok(VersionInfo {
            version: "1.37.0".to_string(),
            enabled_features: vec!["BitTorrent".to_string()],
        })
    }

    async fn add_uri(&self, uris: Vec<String>, options: Value) -> Result<DaemonHandle, RpcError> {
        let uri = uris.first().cloned().unwrap_or_default();
        self.add("aria2.addUri", &uri, options).await
    }

    async fn add_torrent(&self, _torrent: &[u8], options: Value) -> Result<DaemonHandle, RpcError> {
        self.add("aria2.addTorrent", "", options).await
    }

    async fn tell_status(&self, handle: &DaemonHandle) -> Result<DaemonStatus, RpcError> {
        self.enter("aria2.tellStatus")?;
        self.lookup(handle)
    }

    async fn tell_multiple(
        &self,
        handles: &[DaemonHandle],
    ) -> Result<Vec<Result<DaemonStatus, RpcError>>, RpcError> {
        self.enter("system.multicall")?;
        if self.state.lock().unwrap().multicall_broken {
            return Err(RpcError::Daemon {
                code: 1,
                message: "No such method: system.multicall".to_string(),
            });
        }
        Ok(handles.iter().map(|h| self.lookup(h)).collect())
    }

    async fn tell_active(&self) -> Result<Vec<DaemonStatus>, RpcError> {
        self.queue("aria2.tellActive", &[DaemonState::Active])
    }

    async fn tell_waiting(&self) -> Result<Vec<DaemonStatus>, RpcError> {
        self.queue("aria2.tellWaiting", &[DaemonState::Waiting, DaemonState::Paused])
    }

    async fn tell_stopped(&self) -> Result<Vec<DaemonStatus>, RpcError> {
        self.queue(
            "aria2.tellStopped",
            &[DaemonState::Complete, DaemonState::Error, DaemonState::Removed],
        )
    }

    async fn pause(&self, handle: &DaemonHandle) -> Result<(), RpcError> {
        self.update("aria2.pause", handle, DaemonState::Paused)
    }

    async fn unpause(&self, handle: &DaemonHandle) -> Result<(), RpcError> {
        self.update("aria2.unpause", handle, DaemonState::Waiting)
    }

    async fn remove(&self, handle: &DaemonHandle) -> Result<(), RpcError> {
        self.update("aria2.remove", handle, DaemonState::Removed)
    }

    async fn force_remove(&self, handle: &DaemonHandle) -> Result<(), RpcError> {
        self.update("aria2.forceRemove", handle, DaemonState::Removed)
    }

    async fn remove_download_result(&self, handle: &DaemonHandle) -> Result<(), RpcError> {
        self.enter("aria2.removeDownloadResult")?;
        self.state
            .lock()
            .unwrap()
            .tasks
            .remove(handle.as_str())
            .map(|_| ())
            .ok_or_else(|| not_found(handle))
    }

    async fn get_global_stat(&self) -> Result<GlobalStat, RpcError> {
        self.enter("aria2.getGlobalStat")?;
        let state = self.state.lock().unwrap();
        let count = |states: &[DaemonState]| {
            state
                .tasks
                .values()
                .filter(|s| states.contains(&s.status))
                .count() as u64
        };
        Ok(GlobalStat {
            download_speed: state.tasks.values().map(|s| s.download_speed).sum(),
            upload_speed: 0,
            num_active: count(&[DaemonState::Active]),
            num_waiting: count(&[DaemonState::Waiting, DaemonState::Paused]),
            num_stopped: count(&[DaemonState::Complete, DaemonState::Error, DaemonState::Removed]),
        })
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.sync.max_retry_attempts = 2;
    config
}

pub fn engine_with(daemon: &Arc<MockDaemon>) -> Engine {
    Engine::new(daemon.clone(), &test_config())
}

/// 最小的合法种子文件
pub fn sample_torrent() -> Vec<u8> {
    b"d8:announce18:http://tracker/ann4:infod6:lengthi1024e4:name9:movie.mkv\
      12:piece lengthi16384e6:pieces0:ee"
        .to_vec()
}
