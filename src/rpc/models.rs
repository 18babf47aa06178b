use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// 守护进程为每个传输分配的 GID，对内核来说只是一个查找键
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DaemonHandle(pub String);

impl DaemonHandle {
    pub fn new(gid: impl Into<String>) -> Self {
        Self(gid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DaemonHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// aria2 的任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    Active,
    #[default]
    Waiting,
    Paused,
    Error,
    Complete,
    Removed,
    #[serde(other)]
    Unknown,
}

/// `aria2.tellStatus` 返回的单个任务状态
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStatus {
    pub gid: String,
    #[serde(default)]
    pub status: DaemonState,
    #[serde(default, deserialize_with = "de_u64")]
    pub total_length: u64,
    #[serde(default, deserialize_with = "de_u64")]
    pub completed_length: u64,
    #[serde(default, deserialize_with = "de_u64")]
    pub download_speed: u64,
    #[serde(default, deserialize_with = "de_u64")]
    pub upload_speed: u64,
    #[serde(default, deserialize_with = "de_u64")]
    pub connections: u64,
    // 只有 BT 任务才有
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub num_seeders: Option<u64>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub followed_by: Vec<String>,
    #[serde(default)]
    pub info_hash: Option<String>,
    #[serde(default)]
    pub files: Vec<DaemonFile>,
    #[serde(default)]
    pub bittorrent: Option<BitTorrentMeta>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DaemonFile {
    #[serde(default)]
    pub path: String,
    #[serde(default, deserialize_with = "de_u64")]
    pub length: u64,
    #[serde(default)]
    pub uris: Vec<DaemonUri>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DaemonUri {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BitTorrentMeta {
    #[serde(default)]
    pub info: Option<BitTorrentInfo>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BitTorrentInfo {
    #[serde(default)]
    pub name: Option<String>,
}

impl DaemonStatus {
    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle::new(self.gid.clone())
    }

    pub fn is_bittorrent(&self) -> bool {
        self.bittorrent.is_some() || self.info_hash.is_some()
    }

    /// 解析出的文件名：优先种子名称，其次是第一个文件的路径，最后是下载地址
    pub fn file_name(&self) -> Option<String> {
        if let Some(name) = self
            .bittorrent
            .as_ref()
            .and_then(|bt| bt.info.as_ref())
            .and_then(|info| info.name.clone())
            .filter(|name| !name.is_empty())
        {
            return Some(name);
        }

        let first = self.files.first()?;
        if !first.path.is_empty() {
            return first
                .path
                .rsplit(['/', '\\'])
                .next()
                .filter(|name| !name.is_empty())
                .map(str::to_string);
        }

        first
            .uris
            .first()
            .and_then(|uri| uri.uri.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .map(|name| name.split(['?', '#']).next().unwrap_or(name).to_string())
    }

    /// 第一个下载地址（恢复任务时用来还原来源）
    pub fn first_uri(&self) -> Option<String> {
        self.files
            .first()
            .and_then(|f| f.uris.first())
            .map(|u| u.uri.clone())
    }

    /// 总大小未知时 aria2 返回 0
    pub fn known_total(&self) -> Option<u64> {
        if self.total_length > 0 {
            Some(self.total_length)
        } else {
            None
        }
    }
}

/// `aria2.getGlobalStat`
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStat {
    #[serde(default, deserialize_with = "de_u64")]
    pub download_speed: u64,
    #[serde(default, deserialize_with = "de_u64")]
    pub upload_speed: u64,
    #[serde(default, deserialize_with = "de_u64")]
    pub num_active: u64,
    #[serde(default, deserialize_with = "de_u64")]
    pub num_waiting: u64,
    #[serde(default, deserialize_with = "de_u64")]
    pub num_stopped: u64,
}

/// `aria2.getVersion`
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub enabled_features: Vec<String>,
}

// aria2 的数字字段都是字符串
fn de_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(de_opt_u64(deserializer)?.unwrap_or(0))
}

fn de_opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_u64()),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => s
            .parse::<u64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!(
            "无法解析为数字: {}",
            other
        ))),
    }
}
