use async_trait::async_trait;
use serde_json::Value;

pub mod client;
pub mod error;
pub mod models;

pub use client::Aria2Client;
pub use error::RpcError;
pub use models::{DaemonHandle, DaemonState, DaemonStatus, GlobalStat, VersionInfo};

/// 外部下载守护进程的能力边界
///
/// 生产环境由 [`Aria2Client`] 实现，测试中可以用内存实现替换。
/// 实现必须保证每次调用都有自己的超时，不能无限阻塞调用方。
#[async_trait]
pub trait DaemonApi: Send + Sync {
    /// 最近的调用是否能连上守护进程
    fn is_reachable(&self) -> bool;

    async fn get_version(&self) -> Result<VersionInfo, RpcError>;

    async fn add_uri(&self, uris: Vec<String>, options: Value) -> Result<DaemonHandle, RpcError>;

    async fn add_torrent(&self, torrent: &[u8], options: Value) -> Result<DaemonHandle, RpcError>;

    // aria2 通过 addUri 接收磁力链接
    async fn add_magnet(&self, magnet: &str, options: Value) -> Result<DaemonHandle, RpcError> {
        self.add_uri(vec![magnet.to_string()], options).await
    }

    async fn tell_status(&self, handle: &DaemonHandle) -> Result<DaemonStatus, RpcError>;

    /// 批量查询，外层错误表示整次调用失败，内层错误对应单个任务
    async fn tell_multiple(
        &self,
        handles: &[DaemonHandle],
    ) -> Result<Vec<Result<DaemonStatus, RpcError>>, RpcError>;

    async fn tell_active(&self) -> Result<Vec<DaemonStatus>, RpcError>;

    async fn tell_waiting(&self) -> Result<Vec<DaemonStatus>, RpcError>;

    async fn tell_stopped(&self) -> Result<Vec<DaemonStatus>, RpcError>;

    async fn pause(&self, handle: &DaemonHandle) -> Result<(), RpcError>;

    async fn unpause(&self, handle: &DaemonHandle) -> Result<(), RpcError>;

    async fn remove(&self, handle: &DaemonHandle) -> Result<(), RpcError>;

    /// 立即移除，不做 tracker 注销之类的收尾
    async fn force_remove(&self, handle: &DaemonHandle) -> Result<(), RpcError>;

    /// 清理已经停止（完成、出错、移除）的任务记录
    async fn remove_download_result(&self, handle: &DaemonHandle) -> Result<(), RpcError>;

    async fn get_global_stat(&self) -> Result<GlobalStat, RpcError>;
}
