// 进度相关的格式化工具，所有派生字段都只依赖原始字节数和速率

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// 将字节数格式化为易读的大小，例如 `1.5 MB`
pub fn format_bytes(size: u64) -> String {
    if size == 0 {
        return "0 B".to_string();
    }

    let mut value = size as f64;
    for unit in SIZE_UNITS {
        if value < 1024.0 {
            return format!("{:.1} {}", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.1} PB", value)
}

/// 速率格式化，例如 `512.0 KB/s`
pub fn format_speed(bytes_per_sec: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}

/// 完成百分比，保留一位小数；总大小未知时为 0
pub fn percentage(completed: u64, total: Option<u64>) -> f64 {
    match total {
        Some(total) if total > 0 => {
            let raw = completed.min(total) as f64 / total as f64 * 100.0;
            (raw * 10.0).round() / 10.0
        }
        _ => 0.0,
    }
}

/// 剩余时间（秒），速率为 0 或已经下载完成时无法估计
pub fn eta_seconds(completed: u64, total: Option<u64>, rate: u64) -> Option<u64> {
    let total = total?;
    if rate == 0 || total <= completed {
        return None;
    }
    Some((total - completed) / rate)
}

// 时长格式化
pub fn format_duration(seconds: u64) -> String {
    if seconds == 0 {
        return "0s".to_string();
    }

    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        let minutes = seconds / 60;
        let rest = seconds % 60;
        if rest > 0 {
            format!("{}m {}s", minutes, rest)
        } else {
            format!("{}m", minutes)
        }
    } else if seconds < 86_400 {
        let hours = seconds / 3600;
        let minutes = (seconds % 3600) / 60;
        if minutes > 0 {
            format!("{}h {}m", hours, minutes)
        } else {
            format!("{}h", hours)
        }
    } else {
        let days = seconds / 86_400;
        let hours = (seconds % 86_400) / 3600;
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    }
}

pub fn format_eta(eta: Option<u64>) -> String {
    match eta {
        Some(seconds) => format_duration(seconds),
        None => "unknown".to_string(),
    }
}
