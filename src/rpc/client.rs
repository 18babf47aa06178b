use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{Client, ClientBuilder};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::error::RpcError;
use super::models::{DaemonHandle, DaemonStatus, GlobalStat, VersionInfo};
use super::DaemonApi;
use crate::common::config::RpcConfig;

// 查询停止/等待队列时每次最多取的数量
const QUEUE_PAGE_SIZE: u64 = 1000;

/// aria2 JSON-RPC 客户端
///
/// 每次调用都有独立的超时；连接失败后按指数退避（1s、2s、4s……最多 30s）
/// 重新尝试，退避期间的调用直接返回 [`RpcError::Unavailable`]。
/// 连续失败达到阈值后 `is_reachable()` 变为 false，任意一次成功调用即恢复。
#[derive(Debug)]
pub struct Aria2Client {
    inner: Client,
    endpoint: String,
    secret: Option<String>,
    timeout: Duration,
    next_id: AtomicU64,
    reachable: AtomicBool,
    health: Mutex<Backoff>,
    failure_threshold: u32,
}

/// 连接退避状态
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    consecutive_failures: u32,
    retry_after: Option<Instant>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            consecutive_failures: 0,
            retry_after: None,
        }
    }

    /// 第 n 次连续失败之后需要等待的时间
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.retry_after
            .filter(|deadline| *deadline > now)
            .map(|deadline| deadline - now)
    }

    /// 记录一次失败，返回当前连续失败次数
    pub fn record_failure(&mut self, now: Instant) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.retry_after = Some(now + self.delay_for(self.consecutive_failures));
        self.consecutive_failures
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.retry_after = None;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

impl Aria2Client {
    pub fn new(config: &RpcConfig) -> Result<Self, RpcError> {
        let inner = ClientBuilder::new()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| RpcError::Connection(format!("创建HTTP客户端失败: {}", e)))?;

        Ok(Self {
            inner,
            endpoint: config.url.clone(),
            secret: config.secret.clone().filter(|s| !s.is_empty()),
            timeout: config.timeout,
            next_id: AtomicU64::new(1),
            reachable: AtomicBool::new(true),
            health: Mutex::new(Backoff::new(config.backoff_base, config.backoff_max)),
            failure_threshold: config.failure_threshold,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    // 带上 token 的参数列表，system.* 方法不需要 token
    fn build_params(&self, method: &str, params: Vec<Value>) -> Vec<Value> {
        match &self.secret {
            Some(secret) if !method.starts_with("system.") => {
                let mut full = Vec::with_capacity(params.len() + 1);
                full.push(json!(format!("token:{}", secret)));
                full.extend(params);
                full
            }
            _ => params,
        }
    }

    /// 发起一次 RPC 调用，超时后直接返回 [`RpcError::Timeout`]，不会自动重试
    pub async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        if let Some(retry_in) = self.backoff_remaining() {
            debug!("守护进程处于退避期，跳过调用 {}", method);
            return Err(RpcError::Unavailable { retry_in });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id.to_string(),
            "method": method,
            "params": self.build_params(method, params),
        });

        let result = match tokio::time::timeout(timeout, self.send(&payload)).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout {
                method: method.to_string(),
            }),
        };

        match &result {
            Err(e) if e.is_unreachable() => self.record_failure(method, e),
            // 守护进程返回了错误也说明连接是通的
            _ => self.record_success(),
        }
        result
    }

    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, RpcError> {
        let value = self.call(method, params, self.timeout).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn send(&self, payload: &Value) -> Result<Value, RpcError> {
        let resp = self
            .inner
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RpcError::Timeout {
                        method: payload["method"].as_str().unwrap_or_default().to_string(),
                    }
                } else {
                    RpcError::Connection(e.to_string())
                }
            })?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| RpcError::Connection(format!("读取响应失败: {}", e)))?;

        // aria2 出错时返回 400，但响应体仍然是 JSON-RPC 格式
        let value: Value = serde_json::from_slice(&body).map_err(|e| {
            RpcError::InvalidResponse(format!("HTTP {}: {}", status, e))
        })?;

        parse_envelope(value)
    }

    fn backoff_remaining(&self) -> Option<Duration> {
        let health = self.health.lock().ok()?;
        health.remaining(Instant::now())
    }

    fn record_failure(&self, method: &str, error: &RpcError) {
        let failures = match self.health.lock() {
            Ok(mut health) => health.record_failure(Instant::now()),
            Err(_) => return,
        };
        warn!("RPC调用 {} 失败 (连续 {} 次): {}", method, failures, error);

        if failures >= self.failure_threshold && self.reachable.swap(false, Ordering::SeqCst) {
            warn!("⚠️ 守护进程不可达: {}", self.endpoint);
        }
    }

    fn record_success(&self) {
        if let Ok(mut health) = self.health.lock() {
            health.record_success();
        }
        if !self.reachable.swap(true, Ordering::SeqCst) {
            info!("✅ 守护进程已恢复连接: {}", self.endpoint);
        }
    }

    async fn tell_queue(&self, method: &str) -> Result<Vec<DaemonStatus>, RpcError> {
        let params = if method == "aria2.tellActive" {
            vec![]
        } else {
            vec![json!(0), json!(QUEUE_PAGE_SIZE)]
        };
        self.call_as(method, params).await
    }
}

// 解析 JSON-RPC 响应
fn parse_envelope(mut value: Value) -> Result<Value, RpcError> {
    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        return Err(parse_fault(error));
    }
    match value.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(RpcError::InvalidResponse(format!("缺少 result 字段: {}", value))),
    }
}

fn parse_fault(error: &Value) -> RpcError {
    RpcError::Daemon {
        code: error.get("code").and_then(Value::as_i64).unwrap_or(-1),
        message: error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string(),
    }
}

// system.multicall 的每个结果要么是 [result]，要么是 {code, message}
fn parse_multicall_entry(entry: Value) -> Result<DaemonStatus, RpcError> {
    match entry {
        Value::Array(mut items) if !items.is_empty() => {
            Ok(serde_json::from_value(items.swap_remove(0))?)
        }
        Value::Object(_) => Err(parse_fault(&entry)),
        other => Err(RpcError::InvalidResponse(format!(
            "无法识别的 multicall 结果: {}",
            other
        ))),
    }
}

fn expect_gid(value: Value) -> Result<DaemonHandle, RpcError> {
    value
        .as_str()
        .map(DaemonHandle::new)
        .ok_or_else(|| RpcError::InvalidResponse(format!("期望返回 GID: {}", value)))
}

#[async_trait]
impl DaemonApi for Aria2Client {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    async fn get_version(&self) -> Result<VersionInfo, RpcError> {
        self.call_as("aria2.getVersion", vec![]).await
    }

    async fn add_uri(&self, uris: Vec<String>, options: Value) -> Result<DaemonHandle, RpcError> {
        let value = self
            .call("aria2.addUri", vec![json!(uris), options], self.timeout)
            .await?;
        expect_gid(value)
    }

    async fn add_torrent(&self, torrent: &[u8], options: Value) -> Result<DaemonHandle, RpcError> {
        let encoded = STANDARD.encode(torrent);
        let value = self
            .call(
                "aria2.addTorrent",
                vec![json!(encoded), json!([]), options],
                self.timeout,
            )
            .await?;
        expect_gid(value)
    }

    async fn tell_status(&self, handle: &DaemonHandle) -> Result<DaemonStatus, RpcError> {
        self.call_as("aria2.tellStatus", vec![json!(handle.as_str())])
            .await
    }

    async fn tell_multiple(
        &self,
        handles: &[DaemonHandle],
    ) -> Result<Vec<Result<DaemonStatus, RpcError>>, RpcError> {
        if handles.is_empty() {
            return Ok(Vec::new());
        }

        let calls: Vec<Value> = handles
            .iter()
            .map(|handle| {
                json!({
                    "methodName": "aria2.tellStatus",
                    "params": self.build_params("aria2.tellStatus", vec![json!(handle.as_str())]),
                })
            })
            .collect();

        let value = self
            .call("system.multicall", vec![json!(calls)], self.timeout)
            .await?;
        let Value::Array(entries) = value else {
            return Err(RpcError::InvalidResponse(
                "system.multicall 返回的不是数组".to_string(),
            ));
        };
        if entries.len() != handles.len() {
            return Err(RpcError::InvalidResponse(format!(
                "system.multicall 返回 {} 个结果，期望 {} 个",
                entries.len(),
                handles.len()
            )));
        }

        Ok(entries.into_iter().map(parse_multicall_entry).collect())
    }

    async fn tell_active(&self) -> Result<Vec<DaemonStatus>, RpcError> {
        self.tell_queue("aria2.tellActive").await
    }

    async fn tell_waiting(&self) -> Result<Vec<DaemonStatus>, RpcError> {
        self.tell_queue("aria2.tellWaiting").await
    }

    async fn tell_stopped(&self) -> Result<Vec<DaemonStatus>, RpcError> {
        self.tell_queue("aria2.tellStopped").await
    }

    async fn pause(&self, handle: &DaemonHandle) -> Result<(), RpcError> {
        self.call("aria2.pause", vec![json!(handle.as_str())], self.timeout)
            .await
            .map(|_| ())
    }

    async fn unpause(&self, handle: &DaemonHandle) -> Result<(), RpcError> {
        self.call("aria2.unpause", vec![json!(handle.as_str())], self.timeout)
            .await
            .map(|_| ())
    }

    async fn remove(&self, handle: &DaemonHandle) -> Result<(), RpcError> {
        self.call("aria2.remove", vec![json!(handle.as_str())], self.timeout)
            .await
            .map(|_| ())
    }

    async fn force_remove(&self, handle: &DaemonHandle) -> Result<(), RpcError> {
        self.call("aria2.forceRemove", vec![json!(handle.as_str())], self.timeout)
            .await
            .map(|_| ())
    }

    async fn remove_download_result(&self, handle: &DaemonHandle) -> Result<(), RpcError> {
        self.call(
            "aria2.removeDownloadResult",
            vec![json!(handle.as_str())],
            self.timeout,
        )
        .await
        .map(|_| ())
    }

    async fn get_global_stat(&self) -> Result<GlobalStat, RpcError> {
        self.call_as("aria2.getGlobalStat", vec![]).await
    }
}
