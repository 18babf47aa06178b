use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastHub, DeliveryMode, Event};
use crate::downloader::DownloadManager;
use crate::registry::{BoundTask, MergeOutcome, TaskFilter, TaskId};
use crate::rpc::{DaemonHandle, DaemonStatus, RpcError};

/// 一轮同步的统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub daemon_reachable: bool,
    pub resubmitted: usize,
    pub queried: usize,
    pub updated: usize,
    pub rebound: usize,
    pub completed: usize,
    pub failed: usize,
    pub discarded: usize,
    pub marked_stale: usize,
    pub delivered: usize,
}

/// 状态同步循环
///
/// 每一轮：检查守护进程是否可达，不可达时只把已绑定任务标记为过期；
/// 可达时先重新提交延后的任务，再批量查询所有已绑定任务并合并进注册表，
/// 全部合并完成后才向订阅者推送。
pub struct Reconciler {
    manager: DownloadManager,
    hub: Arc<BroadcastHub>,
    interval: Duration,
    // 定时同步和手动同步不能交叠
    cycle_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(manager: DownloadManager, hub: Arc<BroadcastHub>, interval: Duration) -> Self {
        Self {
            manager,
            hub,
            interval,
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// 按固定间隔运行，取消令牌触发后退出
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("同步循环已启动，间隔 {:?}", self.interval);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("同步循环已停止");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = self.run_cycle().await;
                        debug!("同步完成: {:?}", report);
                    }
                }
            }
        })
    }

    /// 立即执行一轮同步，如果定时同步正在进行则等它结束
    pub async fn sync_now(&self) -> CycleReport {
        self.run_cycle().await
    }

    pub async fn run_cycle(&self) -> CycleReport {
        let _guard = self.cycle_lock.lock().await;
        let mut report = CycleReport::default();
        let mut notifications = Vec::new();

        report.daemon_reachable = self.probe().await;
        if report.daemon_reachable {
            self.resubmit_deferred(&mut report, &mut notifications).await;
        }
        if report.daemon_reachable {
            report.daemon_reachable = self.reconcile(&mut report, &mut notifications).await;
        }
        if !report.daemon_reachable {
            report.marked_stale = self.manager.registry().mark_stale_bound();
            if report.marked_stale > 0 {
                debug!("守护进程不可达，{} 个任务标记为过期", report.marked_stale);
            }
        }

        self.broadcast(&mut report, notifications);
        report
    }

    // 不可达时用 getVersion 试探，退避期间客户端会直接返回错误
    async fn probe(&self) -> bool {
        let daemon = self.manager.daemon();
        if daemon.is_reachable() {
            return true;
        }
        match daemon.get_version().await {
            Ok(version) => {
                info!("守护进程已恢复，版本 {}", version.version);
                daemon.is_reachable()
            }
            Err(e) => {
                debug!("守护进程仍不可达: {}", e);
                false
            }
        }
    }

    async fn resubmit_deferred(&self, report: &mut CycleReport, notifications: &mut Vec<Event>) {
        let registry = self.manager.registry();

        for pending in registry.pending_submissions() {
            match self.manager.dispatch(&pending.source).await {
                Ok(handle) => {
                    if registry.bind_pending(&pending, handle.clone()) {
                        info!("延后的任务 {} 已提交，GID {}", pending.id, handle);
                        report.resubmitted += 1;
                    } else {
                        // 提交期间任务被删除了
                        self.manager.discard_orphan(&handle).await;
                    }
                }
                Err(e) if e.is_unreachable() => {
                    debug!("重新提交任务 {} 时守护进程不可达", pending.id);
                    break;
                }
                Err(e) => {
                    warn!("守护进程拒绝了延后的任务 {}: {}", pending.id, e);
                    let outcome = registry.reject_pending(&pending, &e.to_string(), Utc::now());
                    self.tally(pending.id, outcome, report, notifications);
                }
            }
        }
    }

    /// 返回本轮结束时守护进程是否仍然可达
    async fn reconcile(&self, report: &mut CycleReport, notifications: &mut Vec<Event>) -> bool {
        let bound = self.manager.registry().bound_snapshot();
        if bound.is_empty() {
            return true;
        }
        report.queried = bound.len();

        let handles: Vec<DaemonHandle> = bound.iter().map(|b| b.handle.clone()).collect();
        let results = match self.manager.daemon().tell_multiple(&handles).await {
            Ok(results) => results,
            Err(e) if e.is_unreachable() => {
                warn!("批量查询状态失败，守护进程不可达: {}", e);
                return false;
            }
            Err(e) => {
                warn!("批量查询状态失败，改为逐个查询: {}", e);
                match self.query_one_by_one(&handles).await {
                    Some(results) => results,
                    None => return false,
                }
            }
        };

        let now = Utc::now();
        let registry = self.manager.registry();
        for (task, result) in bound.iter().zip(results) {
            let outcome = match result {
                Ok(status) => registry.merge_status(task, &status, now),
                Err(e) if e.is_handle_unknown() => {
                    warn!("守护进程已丢失任务 {} ({})", task.id, task.handle);
                    registry.mark_session_lost(task, &e.to_string(), now)
                }
                Err(e) => {
                    // 单个任务的错误不影响其他任务
                    warn!("查询任务 {} 状态失败: {}", task.id, e);
                    continue;
                }
            };
            self.log_rebind(task, &outcome);
            self.tally(task.id, outcome, report, notifications);
        }
        true
    }

    // 守护进程不支持 multicall 时退回逐个查询；中途不可达返回 None
    async fn query_one_by_one(
        &self,
        handles: &[DaemonHandle],
    ) -> Option<Vec<Result<DaemonStatus, RpcError>>> {
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let result = self.manager.daemon().tell_status(handle).await;
            if matches!(&result, Err(e) if e.is_unreachable()) {
                return None;
            }
            results.push(result);
        }
        Some(results)
    }

    fn log_rebind(&self, task: &BoundTask, outcome: &MergeOutcome) {
        if let MergeOutcome::Rebound { from, to } = outcome {
            info!("任务 {} 元数据下载完成，从 {} 换绑到 {}", task.id, from, to);
        }
    }

    fn tally(
        &self,
        task_id: TaskId,
        outcome: MergeOutcome,
        report: &mut CycleReport,
        notifications: &mut Vec<Event>,
    ) {
        match outcome {
            MergeOutcome::Discarded => report.discarded += 1,
            MergeOutcome::Updated => report.updated += 1,
            MergeOutcome::Rebound { .. } => report.rebound += 1,
            MergeOutcome::Completed { file_name } => {
                info!("任务 {} 下载完成", task_id);
                report.completed += 1;
                notifications.push(Event::DownloadComplete { task_id, file_name });
            }
            MergeOutcome::Failed(detail) => {
                warn!("任务 {} 下载失败: {}", task_id, detail.message);
                report.failed += 1;
                notifications.push(Event::DownloadFailed {
                    task_id,
                    cause: detail.cause,
                    message: detail.message,
                });
            }
        }
    }

    fn broadcast(&self, report: &mut CycleReport, notifications: Vec<Event>) {
        if self.hub.delivery_mode() == DeliveryMode::Poll {
            return;
        }

        let tasks = self.manager.list_tasks(&TaskFilter::default());
        let published = self.hub.publish(Event::ProgressUpdate {
            tasks,
            daemon_reachable: report.daemon_reachable,
        });
        report.delivered = published.delivered;

        for event in notifications {
            self.hub.publish(event);
        }
    }
}
