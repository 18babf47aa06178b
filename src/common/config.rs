use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("无效的RPC地址: {0}")]
    InvalidRpcUrl(String),

    #[error("配置项 {field} 无效: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

/// 守护进程 RPC 连接配置
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub url: String,
    pub secret: Option<String>,
    /// 单次调用的超时时间
    pub timeout: Duration,
    /// 连续失败多少次后认为守护进程不可达
    pub failure_threshold: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6800/jsonrpc".to_string(),
            secret: None,
            timeout: Duration::from_secs(10),
            failure_threshold: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

/// 状态同步循环配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub interval: Duration,
    /// 用户手动重试的最大次数
    pub max_retry_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_retry_attempts: 3,
        }
    }
}

/// 每次提交时传给守护进程的下载参数，启动时校验一次之后只读共享
#[derive(Debug, Clone, Serialize)]
pub struct DownloadOptions {
    pub max_connections_per_server: u32,
    pub max_retries: u32,
    pub download_timeout: u64,
    pub retry_wait: u64,
    pub bt_max_peers: u32,
    pub seed_ratio: f64,
    /// 做种时间（分钟）
    pub seed_time: u64,
    pub user_agent: String,
    pub download_dir: Option<PathBuf>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            max_connections_per_server: 4,
            max_retries: 3,
            download_timeout: 60,
            retry_wait: 5,
            bt_max_peers: 50,
            seed_ratio: 1.0,
            seed_time: 60,
            user_agent: "Universal Download Manager/1.0".to_string(),
            download_dir: None,
        }
    }
}

impl DownloadOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=16).contains(&self.max_connections_per_server) {
            return Err(invalid(
                "max_connections_per_server",
                "取值范围为 1-16",
            ));
        }
        if self.download_timeout == 0 {
            return Err(invalid("download_timeout", "必须大于 0"));
        }
        if self.bt_max_peers == 0 {
            return Err(invalid("bt_max_peers", "必须大于 0"));
        }
        if !self.seed_ratio.is_finite() || self.seed_ratio < 0.0 {
            return Err(invalid("seed_ratio", "必须是非负数"));
        }
        if self.user_agent.trim().is_empty() {
            return Err(invalid("user_agent", "不能为空"));
        }
        Ok(())
    }

    // URL 类任务的参数，FTP 通常不支持多连接
    pub fn uri_options(&self, scheme: &str) -> Value {
        let connections = match scheme {
            "ftp" | "ftps" => 1,
            _ => self.max_connections_per_server,
        };

        let mut options = self.base_options();
        options.insert(
            "max-connection-per-server".to_string(),
            json!(connections.to_string()),
        );
        options.insert("split".to_string(), json!(connections.to_string()));
        options.insert(
            "timeout".to_string(),
            json!(self.download_timeout.to_string()),
        );
        options.insert("max-tries".to_string(), json!(self.max_retries.to_string()));
        options.insert("retry-wait".to_string(), json!(self.retry_wait.to_string()));
        options.insert("user-agent".to_string(), json!(self.user_agent));
        Value::Object(options)
    }

    // BitTorrent 任务（磁力链接和种子文件）的参数
    pub fn bt_options(&self) -> Value {
        let mut options = self.base_options();
        options.insert("bt-max-peers".to_string(), json!(self.bt_max_peers.to_string()));
        options.insert("seed-ratio".to_string(), json!(self.seed_ratio.to_string()));
        options.insert("seed-time".to_string(), json!(self.seed_time.to_string()));
        options.insert("enable-dht".to_string(), json!("true"));
        options.insert("enable-peer-exchange".to_string(), json!("true"));
        options.insert("bt-enable-lpd".to_string(), json!("true"));
        Value::Object(options)
    }

    fn base_options(&self) -> Map<String, Value> {
        let mut options = Map::new();
        if let Some(dir) = &self.download_dir {
            options.insert("dir".to_string(), json!(dir.to_string_lossy()));
        }
        options
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub rpc: RpcConfig,
    pub sync: SyncConfig,
    pub download: DownloadOptions,
    pub server: ServerConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.rpc.url)
            .map_err(|e| ConfigError::InvalidRpcUrl(format!("{}: {}", self.rpc.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidRpcUrl(format!(
                "{}: 仅支持 http/https",
                self.rpc.url
            )));
        }
        if self.rpc.timeout.is_zero() {
            return Err(invalid("rpc_timeout", "必须大于 0"));
        }
        if self.rpc.failure_threshold == 0 {
            return Err(invalid("failure_threshold", "必须大于 0"));
        }
        if self.rpc.backoff_base > self.rpc.backoff_max {
            return Err(invalid("backoff", "初始退避时间不能大于上限"));
        }
        if self.sync.interval.is_zero() {
            return Err(invalid("sync_interval", "必须大于 0"));
        }
        self.download.validate()
    }
}
