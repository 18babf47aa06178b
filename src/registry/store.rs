use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info};

use super::task::{
    ErrorCause, ErrorDetail, Progress, SourceDescriptor, Task, TaskFilter, TaskId, TaskKind,
    TaskStatus, TaskView,
};
use crate::rpc::{DaemonHandle, DaemonState, DaemonStatus};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    #[error("任务未找到: {0}")]
    NotFound(TaskId),

    #[error("任务 {task_id} 无法从 {from} 变为 {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("任务 {task_id} 已重试 {attempts} 次，超过上限")]
    RetryExhausted { task_id: TaskId, attempts: u32 },
}

/// 一次同步开始时捕获的绑定信息
#[derive(Debug, Clone, PartialEq)]
pub struct BoundTask {
    pub id: TaskId,
    pub handle: DaemonHandle,
    pub revision: u64,
    pub bittorrent: bool,
}

/// 等待重新提交给守护进程的任务
#[derive(Debug, Clone)]
pub struct PendingSubmission {
    pub id: TaskId,
    pub kind: TaskKind,
    pub source: SourceDescriptor,
    pub revision: u64,
}

/// 合并一次守护进程状态的结果
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// 结果已过期（期间有用户操作或重新绑定），或者任务已被删除
    Discarded,
    Updated,
    /// 磁力链接元数据下载完成，换绑到后续任务
    Rebound { from: DaemonHandle, to: DaemonHandle },
    Completed { file_name: Option<String> },
    Failed(ErrorDetail),
}

/// 任务注册表，所有对任务状态的修改都经过这里
///
/// 分片锁只在同步方法内部持有，不会跨越 `.await`，
/// 调用方先完成 RPC，再把结果交给注册表应用。
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: DashMap<TaskId, Task>,
    next_seq: AtomicU64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 创建一个 queued 状态、尚未绑定 GID 的任务
    pub fn create(
        &self,
        kind: TaskKind,
        source: SourceDescriptor,
        file_name: Option<String>,
    ) -> Task {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let task = Task::new(seq, kind, source, file_name);
        debug!("创建任务 {} ({:?})", task.id, kind);
        self.tasks.insert(task.id, task.clone());
        task
    }

    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.tasks.get(id).map(|entry| entry.value().clone())
    }

    pub fn view(&self, id: &TaskId) -> Option<TaskView> {
        self.tasks.get(id).map(|entry| entry.value().view())
    }

    /// 按创建顺序返回符合条件的任务快照
    pub fn list(&self, filter: &TaskFilter) -> Vec<TaskView> {
        let mut matched: Vec<(u64, TaskView)> = self
            .tasks
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| (entry.seq, entry.view()))
            .collect();
        matched.sort_by_key(|(seq, _)| *seq);

        let limit = filter.limit.unwrap_or(usize::MAX);
        matched.into_iter().take(limit).map(|(_, view)| view).collect()
    }

    pub fn knows_handle(&self, handle: &DaemonHandle) -> bool {
        self.tasks
            .iter()
            .any(|entry| entry.handle.as_ref() == Some(handle))
    }

    /// 守护进程确认接收后绑定 GID
    pub fn bind_handle(&self, id: &TaskId, handle: DaemonHandle) -> Result<Task, RegistryError> {
        let mut task = self.tasks.get_mut(id).ok_or(RegistryError::NotFound(*id))?;
        task.handle = Some(handle);
        task.deferred = false;
        task.stale = false;
        task.revision += 1;
        Ok(task.clone())
    }

    /// 守护进程不可达，任务保留为 queued 等待同步循环重新提交
    pub fn mark_deferred(&self, id: &TaskId) -> Result<Task, RegistryError> {
        let mut task = self.tasks.get_mut(id).ok_or(RegistryError::NotFound(*id))?;
        task.deferred = true;
        Ok(task.clone())
    }

    /// 只在创建时提交失败、没有保留价值时使用
    pub fn discard(&self, id: &TaskId) -> Option<Task> {
        self.tasks.remove(id).map(|(_, task)| task)
    }

    pub fn pending_submissions(&self) -> Vec<PendingSubmission> {
        let mut pending: Vec<(u64, PendingSubmission)> = self
            .tasks
            .iter()
            .filter(|entry| entry.deferred && entry.handle.is_none())
            .map(|entry| {
                (
                    entry.seq,
                    PendingSubmission {
                        id: entry.id,
                        kind: entry.kind,
                        source: entry.source.clone(),
                        revision: entry.revision,
                    },
                )
            })
            .collect();
        pending.sort_by_key(|(seq, _)| *seq);
        pending.into_iter().map(|(_, p)| p).collect()
    }

    /// 重新提交成功后绑定，期间任务被删除或修改则返回 false
    pub fn bind_pending(&self, pending: &PendingSubmission, handle: DaemonHandle) -> bool {
        match self.tasks.get_mut(&pending.id) {
            Some(mut task) if task.revision == pending.revision && task.handle.is_none() => {
                task.handle = Some(handle);
                task.deferred = false;
                task.stale = false;
                task.revision += 1;
                true
            }
            _ => false,
        }
    }

    /// 重新提交时被守护进程拒绝，任务进入 error，可以重试
    pub fn reject_pending(
        &self,
        pending: &PendingSubmission,
        message: &str,
        now: DateTime<Utc>,
    ) -> MergeOutcome {
        match self.tasks.get_mut(&pending.id) {
            Some(mut task) if task.revision == pending.revision && task.handle.is_none() => {
                let detail = ErrorDetail::new(ErrorCause::DaemonReported, message);
                task.status = TaskStatus::Error;
                task.error = Some(detail.clone());
                task.deferred = false;
                task.last_synced_at = Some(now);
                MergeOutcome::Failed(detail)
            }
            _ => MergeOutcome::Discarded,
        }
    }

    /// 需要向守护进程查询状态的任务（已绑定且未进入终态）
    pub fn bound_snapshot(&self) -> Vec<BoundTask> {
        let mut bound: Vec<(u64, BoundTask)> = self
            .tasks
            .iter()
            .filter(|entry| !entry.status.is_terminal())
            .filter_map(|entry| {
                let handle = entry.handle.clone()?;
                Some((
                    entry.seq,
                    BoundTask {
                        id: entry.id,
                        handle,
                        revision: entry.revision,
                        bittorrent: entry.kind.is_bittorrent(),
                    },
                ))
            })
            .collect();
        bound.sort_by_key(|(seq, _)| *seq);
        bound.into_iter().map(|(_, b)| b).collect()
    }

    /// 守护进程不可达时把已绑定的任务标记为过期，保留最后一次已知状态
    pub fn mark_stale_bound(&self) -> usize {
        let mut count = 0;
        for mut entry in self.tasks.iter_mut() {
            if entry.handle.is_some() && !entry.status.is_terminal() && !entry.stale {
                entry.stale = true;
                count += 1;
            }
        }
        count
    }

    /// 把守护进程上报的状态合并进任务
    pub fn merge_status(
        &self,
        bound: &BoundTask,
        status: &DaemonStatus,
        now: DateTime<Utc>,
    ) -> MergeOutcome {
        let Some(mut task) = self.tasks.get_mut(&bound.id) else {
            return MergeOutcome::Discarded;
        };
        if task.revision != bound.revision || task.handle.as_ref() != Some(&bound.handle) {
            return MergeOutcome::Discarded;
        }

        task.stale = false;
        task.last_synced_at = Some(now);

        if let Some(name) = status.file_name() {
            if task.file_name.as_deref() != Some(name.as_str()) {
                task.set_file_name(name);
            }
        }

        // 磁力链接先下载元数据，完成后守护进程会生成真正的下载任务
        if status.status == DaemonState::Complete {
            if let Some(next) = status.followed_by.first() {
                let from = bound.handle.clone();
                let to = DaemonHandle::new(next.clone());
                task.handle = Some(to.clone());
                task.revision += 1;
                task.progress = Progress::default();
                if task.status.accepts(TaskStatus::Active) {
                    task.status = TaskStatus::Active;
                }
                return MergeOutcome::Rebound { from, to };
            }
        }

        task.progress = Progress::from_daemon(status, bound.bittorrent || status.is_bittorrent());

        let Some(next) = TaskStatus::from_daemon(status.status) else {
            return MergeOutcome::Updated;
        };
        let previous = task.status;
        if previous == next || !previous.accepts(next) {
            return MergeOutcome::Updated;
        }
        task.status = next;

        match next {
            TaskStatus::Complete => MergeOutcome::Completed {
                file_name: task.file_name.clone(),
            },
            TaskStatus::Error => {
                let detail = ErrorDetail::from_daemon(status);
                task.error = Some(detail.clone());
                MergeOutcome::Failed(detail)
            }
            _ => MergeOutcome::Updated,
        }
    }

    /// 守护进程不再认识这个 GID
    pub fn mark_session_lost(
        &self,
        bound: &BoundTask,
        message: &str,
        now: DateTime<Utc>,
    ) -> MergeOutcome {
        let Some(mut task) = self.tasks.get_mut(&bound.id) else {
            return MergeOutcome::Discarded;
        };
        if task.revision != bound.revision
            || task.handle.as_ref() != Some(&bound.handle)
            || !task.status.accepts(TaskStatus::Error)
        {
            return MergeOutcome::Discarded;
        }

        let detail = ErrorDetail::new(ErrorCause::SessionLost, message);
        task.status = TaskStatus::Error;
        task.error = Some(detail.clone());
        task.stale = false;
        task.last_synced_at = Some(now);
        MergeOutcome::Failed(detail)
    }

    /// 守护进程确认用户操作后更新状态
    pub fn apply_action(&self, id: &TaskId, next: TaskStatus) -> Result<Task, RegistryError> {
        let mut task = self.tasks.get_mut(id).ok_or(RegistryError::NotFound(*id))?;
        if !task.status.accepts(next) {
            return Err(RegistryError::InvalidTransition {
                task_id: *id,
                from: task.status,
                to: next,
            });
        }
        task.status = next;
        task.stale = false;
        task.revision += 1;
        Ok(task.clone())
    }

    /// 删除任务记录，观察者在下一次列表中看不到它
    pub fn remove(&self, id: &TaskId) -> Result<Task, RegistryError> {
        let (_, mut task) = self.tasks.remove(id).ok_or(RegistryError::NotFound(*id))?;
        task.status = TaskStatus::Removed;
        Ok(task)
    }

    /// 占用一次重试机会并认领任务，超过上限时把错误原因改为 retry_exhausted
    ///
    /// 认领期间同一任务的其他重试请求直接失败，直到 [`complete_retry`] 或 [`abort_retry`]。
    ///
    /// [`complete_retry`]: TaskRegistry::complete_retry
    /// [`abort_retry`]: TaskRegistry::abort_retry
    pub fn begin_retry(&self, id: &TaskId, max_attempts: u32) -> Result<Task, RegistryError> {
        let mut task = self.tasks.get_mut(id).ok_or(RegistryError::NotFound(*id))?;
        if task.status != TaskStatus::Error || task.retrying {
            return Err(RegistryError::InvalidTransition {
                task_id: *id,
                from: task.status,
                to: TaskStatus::Queued,
            });
        }
        if task.attempts >= max_attempts {
            let attempts = task.attempts;
            let previous = task.error.take();
            task.error = Some(ErrorDetail {
                cause: ErrorCause::RetryExhausted,
                message: format!(
                    "已重试 {} 次{}",
                    attempts,
                    previous
                        .map(|e| format!("，最后一次错误: {}", e.message))
                        .unwrap_or_default()
                ),
                daemon_code: None,
            });
            return Err(RegistryError::RetryExhausted {
                task_id: *id,
                attempts,
            });
        }
        task.attempts += 1;
        task.retrying = true;
        Ok(task.clone())
    }

    /// 守护进程接收了重新提交的任务，绑定新的 GID 并恢复为 queued
    pub fn complete_retry(&self, id: &TaskId, handle: DaemonHandle) -> Result<Task, RegistryError> {
        let mut task = self.tasks.get_mut(id).ok_or(RegistryError::NotFound(*id))?;
        if task.status != TaskStatus::Error || !task.retrying {
            return Err(RegistryError::InvalidTransition {
                task_id: *id,
                from: task.status,
                to: TaskStatus::Queued,
            });
        }
        task.retrying = false;
        task.handle = Some(handle);
        task.deferred = false;
        task.status = TaskStatus::Queued;
        task.error = None;
        task.progress = Progress::default();
        task.stale = false;
        task.revision += 1;
        Ok(task.clone())
    }

    /// 重新提交没有成功，释放认领；`refund` 为真时退还这次重试机会
    pub fn abort_retry(&self, id: &TaskId, refund: bool) {
        if let Some(mut task) = self.tasks.get_mut(id) {
            if !task.retrying {
                return;
            }
            task.retrying = false;
            if refund {
                task.attempts = task.attempts.saturating_sub(1);
            }
        }
    }

    /// 启动时接管守护进程里已有的任务，已经认识的 GID 会被跳过
    pub fn adopt(
        &self,
        kind: TaskKind,
        source: SourceDescriptor,
        status: &DaemonStatus,
        now: DateTime<Utc>,
    ) -> Option<TaskId> {
        let handle = status.handle();
        if self.knows_handle(&handle) {
            return None;
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut task = Task::new(seq, kind, source, status.file_name());
        task.handle = Some(handle.clone());
        task.progress = Progress::from_daemon(status, kind.is_bittorrent());
        task.status = TaskStatus::from_daemon(status.status).unwrap_or(TaskStatus::Queued);
        if task.status == TaskStatus::Error {
            task.error = Some(ErrorDetail::from_daemon(status));
        }
        task.last_synced_at = Some(now);

        let id = task.id;
        info!("接管守护进程任务 {} -> {} ({})", handle, id, task.status);
        self.tasks.insert(id, task);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url_task(registry: &TaskRegistry, url: &str) -> Task {
        registry.create(TaskKind::Url, SourceDescriptor::Url(url.to_string()), None)
    }

    fn daemon_status(gid: &str, state: DaemonState) -> DaemonStatus {
        DaemonStatus {
            gid: gid.to_string(),
            status: state,
            total_length: 1000,
            completed_length: 250,
            download_speed: 50,
            ..Default::default()
        }
    }

    fn bound(registry: &TaskRegistry, id: &TaskId) -> BoundTask {
        registry
            .bound_snapshot()
            .into_iter()
            .find(|b| b.id == *id)
            .unwrap()
    }

    #[test]
    fn test_list_follows_creation_order() {
        let registry = TaskRegistry::new();
        let first = url_task(&registry, "http://a/1");
        let second = url_task(&registry, "http://a/2");
        let third = url_task(&registry, "http://a/3");

        let ids: Vec<TaskId> = registry
            .list(&TaskFilter::default())
            .into_iter()
            .map(|v| v.task_id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);

        let limited = registry.list(&TaskFilter {
            limit: Some(2),
            ..Default::default()
        });
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_merge_discards_stale_revision() {
        let registry = TaskRegistry::new();
        let task = url_task(&registry, "http://a/file.zip");
        registry.bind_handle(&task.id, DaemonHandle::new("g1")).unwrap();

        let captured = bound(&registry, &task.id);
        // 同步期间用户暂停了任务
        registry.apply_action(&task.id, TaskStatus::Paused).unwrap();

        let outcome = registry.merge_status(
            &captured,
            &daemon_status("g1", DaemonState::Active),
            Utc::now(),
        );
        assert_eq!(outcome, MergeOutcome::Discarded);
        assert_eq!(registry.get(&task.id).unwrap().status, TaskStatus::Paused);
    }

    #[test]
    fn test_merge_detects_terminal_once() {
        let registry = TaskRegistry::new();
        let task = url_task(&registry, "http://a/file.zip");
        registry.bind_handle(&task.id, DaemonHandle::new("g1")).unwrap();

        let captured = bound(&registry, &task.id);
        let mut status = daemon_status("g1", DaemonState::Complete);
        status.completed_length = 1000;
        let outcome = registry.merge_status(&captured, &status, Utc::now());
        assert!(matches!(outcome, MergeOutcome::Completed { .. }));

        // 终态任务不再参与查询，也不会回退
        assert!(registry.bound_snapshot().is_empty());
        let outcome =
            registry.merge_status(&captured, &daemon_status("g1", DaemonState::Active), Utc::now());
        assert_eq!(outcome, MergeOutcome::Updated);
        assert_eq!(registry.get(&task.id).unwrap().status, TaskStatus::Complete);
    }

    #[test]
    fn test_magnet_rebinds_to_follow_up() {
        let registry = TaskRegistry::new();
        let task = registry.create(
            TaskKind::Magnet,
            SourceDescriptor::Magnet("magnet:?xt=urn:btih:abc".to_string()),
            None,
        );
        registry.bind_handle(&task.id, DaemonHandle::new("meta")).unwrap();

        let captured = bound(&registry, &task.id);
        let mut status = daemon_status("meta", DaemonState::Complete);
        status.followed_by = vec!["real".to_string()];
        let outcome = registry.merge_status(&captured, &status, Utc::now());
        assert_eq!(
            outcome,
            MergeOutcome::Rebound {
                from: DaemonHandle::new("meta"),
                to: DaemonHandle::new("real"),
            }
        );

        let task = registry.get(&task.id).unwrap();
        assert_eq!(task.handle, Some(DaemonHandle::new("real")));
        assert_eq!(task.status, TaskStatus::Active);
    }

    #[test]
    fn test_retry_budget() {
        let registry = TaskRegistry::new();
        let task = url_task(&registry, "http://a/file.zip");
        registry.bind_handle(&task.id, DaemonHandle::new("g1")).unwrap();
        let captured = bound(&registry, &task.id);
        registry.mark_session_lost(&captured, "GID g1 is not found", Utc::now());

        registry.begin_retry(&task.id, 1).unwrap();
        let retried = registry
            .complete_retry(&task.id, DaemonHandle::new("g2"))
            .unwrap();
        assert_eq!(retried.status, TaskStatus::Queued);
        assert_eq!(retried.attempts, 1);

        let captured = bound(&registry, &task.id);
        registry.mark_session_lost(&captured, "lost again", Utc::now());
        let err = registry.begin_retry(&task.id, 1).unwrap_err();
        assert!(matches!(err, RegistryError::RetryExhausted { attempts: 1, .. }));

        let task = registry.get(&task.id).unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.error.unwrap().cause, ErrorCause::RetryExhausted);
    }

    #[test]
    fn test_retry_claim_is_exclusive() {
        let registry = TaskRegistry::new();
        let task = url_task(&registry, "http://a/file.zip");
        registry.bind_handle(&task.id, DaemonHandle::new("g1")).unwrap();
        let captured = bound(&registry, &task.id);
        registry.mark_session_lost(&captured, "GID g1 is not found", Utc::now());

        registry.begin_retry(&task.id, 3).unwrap();
        let err = registry.begin_retry(&task.id, 3).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
        assert_eq!(registry.get(&task.id).unwrap().attempts, 1);

        // 守护进程不可达，退还机会后可以再次重试
        registry.abort_retry(&task.id, true);
        let task = registry.get(&task.id).unwrap();
        assert!(!task.retrying);
        assert_eq!(task.attempts, 0);
        assert_eq!(task.status, TaskStatus::Error);

        registry.begin_retry(&task.id, 3).unwrap();
        registry.abort_retry(&task.id, false);
        assert_eq!(registry.get(&task.id).unwrap().attempts, 1);

        // 没有认领时不能完成重试
        let err = registry
            .complete_retry(&task.id, DaemonHandle::new("g2"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
    }

    #[test]
    fn test_stale_marking_keeps_status() {
        let registry = TaskRegistry::new();
        let task = url_task(&registry, "http://a/file.zip");
        registry.bind_handle(&task.id, DaemonHandle::new("g1")).unwrap();
        registry.apply_action(&task.id, TaskStatus::Active).unwrap();
        let unbound = url_task(&registry, "http://a/other.zip");

        assert_eq!(registry.mark_stale_bound(), 1);
        let task = registry.get(&task.id).unwrap();
        assert!(task.stale);
        assert_eq!(task.status, TaskStatus::Active);
        assert!(!registry.get(&unbound.id).unwrap().stale);
    }

    #[test]
    fn test_adopt_skips_known_handles() {
        let registry = TaskRegistry::new();
        let status = daemon_status("g9", DaemonState::Paused);
        let source = SourceDescriptor::Url("http://a/x.iso".to_string());

        let id = registry
            .adopt(TaskKind::Url, source.clone(), &status, Utc::now())
            .unwrap();
        assert_eq!(registry.get(&id).unwrap().status, TaskStatus::Paused);
        assert!(registry.adopt(TaskKind::Url, source, &status, Utc::now()).is_none());
        assert_eq!(registry.len(), 1);
    }
}
