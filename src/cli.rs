use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::Level;

use uni_downloader::common::config::{
    AppConfig, DownloadOptions, RpcConfig, ServerConfig, SyncConfig,
};

/// 通用下载管理器
#[derive(Parser, Debug)]
#[command(name = "unidl")]
#[command(version)]
#[command(author = "rpeng252@gmail.com")]
#[command(about = "基于 aria2 RPC 的下载管理服务", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// 输出更详细的日志 (-v 调试, -vv 跟踪)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

impl Cli {
    pub fn log_level(&self) -> Level {
        match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 启动同步循环和 HTTP 服务
    Serve(ServeArgs),
    /// 检查守护进程是否可用
    Check(DaemonArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DaemonArgs {
    /// aria2 RPC 地址
    #[arg(long, env = "ARIA2_RPC_URL", default_value = "http://localhost:6800/jsonrpc")]
    #[arg(value_hint = clap::ValueHint::Url)]
    pub rpc_url: String,

    /// aria2 RPC 密钥
    #[arg(long, env = "ARIA2_RPC_SECRET", hide_env_values = true)]
    pub rpc_secret: Option<String>,

    /// 单次 RPC 调用超时（秒）
    #[arg(long, env = "RPC_TIMEOUT", default_value_t = 10)]
    pub rpc_timeout: u64,

    /// 连续失败多少次后认为守护进程不可达
    #[arg(long, env = "RPC_FAILURE_THRESHOLD", default_value_t = 3)]
    pub failure_threshold: u32,
}

impl DaemonArgs {
    pub fn to_rpc_config(&self) -> RpcConfig {
        RpcConfig {
            url: self.rpc_url.clone(),
            secret: self.rpc_secret.clone(),
            timeout: Duration::from_secs(self.rpc_timeout),
            failure_threshold: self.failure_threshold,
            ..RpcConfig::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub daemon: DaemonArgs,

    /// 监听地址
    #[arg(long, env = "UDM_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// 监听端口
    #[arg(long, env = "UDM_PORT", default_value_t = 5000)]
    pub port: u16,

    /// 状态同步间隔（毫秒）
    #[arg(long, env = "SYNC_INTERVAL_MS", default_value_t = 2000)]
    pub sync_interval_ms: u64,

    /// 出错任务允许手动重试的次数
    #[arg(long, env = "MAX_RETRY_ATTEMPTS", default_value_t = 3)]
    pub max_retry_attempts: u32,

    /// 每个服务器的最大连接数 (1-16)
    #[arg(long, env = "MAX_CONNECTIONS_PER_SERVER", default_value_t = 4)]
    pub max_connections_per_server: u32,

    /// 守护进程内部的重试次数
    #[arg(long, env = "MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    /// 下载超时（秒）
    #[arg(long, env = "DOWNLOAD_TIMEOUT", default_value_t = 60)]
    pub download_timeout: u64,

    /// 重试等待时间（秒）
    #[arg(long, env = "RETRY_WAIT", default_value_t = 5)]
    pub retry_wait: u64,

    /// BT 最大连接节点数
    #[arg(long, env = "BT_MAX_PEERS", default_value_t = 50)]
    pub bt_max_peers: u32,

    /// 做种分享率
    #[arg(long, env = "SEED_RATIO", default_value_t = 1.0)]
    pub seed_ratio: f64,

    /// 做种时间（分钟）
    #[arg(long, env = "SEED_TIME", default_value_t = 60)]
    pub seed_time: u64,

    #[arg(long, env = "USER_AGENT", default_value = "Universal Download Manager/1.0")]
    pub user_agent: String,

    /// 下载保存目录，不指定时使用守护进程的设置
    #[arg(long, env = "DOWNLOAD_DIR", value_name = "DIR")]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub download_dir: Option<PathBuf>,

    /// 启动时不接管守护进程中已有的任务
    #[arg(long)]
    pub no_recover: bool,
}

impl ServeArgs {
    pub fn to_config(&self) -> AppConfig {
        AppConfig {
            rpc: self.daemon.to_rpc_config(),
            sync: SyncConfig {
                interval: Duration::from_millis(self.sync_interval_ms),
                max_retry_attempts: self.max_retry_attempts,
            },
            download: DownloadOptions {
                max_connections_per_server: self.max_connections_per_server,
                max_retries: self.max_retries,
                download_timeout: self.download_timeout,
                retry_wait: self.retry_wait,
                bt_max_peers: self.bt_max_peers,
                seed_ratio: self.seed_ratio,
                seed_time: self.seed_time,
                user_agent: self.user_agent.clone(),
                download_dir: self.download_dir.clone(),
            },
            server: ServerConfig {
                host: self.host.clone(),
                port: self.port,
            },
        }
    }
}
