use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use uni_downloader::common::format::{format_speed, percentage};
use uni_downloader::common::logger::PrettyLogger;
use uni_downloader::rpc::{Aria2Client, DaemonApi};
use uni_downloader::{Engine, log_error, log_info, log_success, log_warning};

mod cli;

use cli::{Command, DaemonArgs, ServeArgs};

async fn serve(args: ServeArgs) -> Result<()> {
    let config = args.to_config();
    config.validate().context("配置无效")?;

    let daemon = Arc::new(Aria2Client::new(&config.rpc)?);
    info!("守护进程地址: {}", daemon.endpoint());
    let engine = Engine::new(daemon, &config);

    if args.no_recover {
        info!("跳过启动恢复");
    } else if let Err(e) = engine.manager.recover_from_daemon().await {
        warn!("启动时无法从守护进程恢复任务: {}", e);
    }

    let shutdown = CancellationToken::new();
    let sync_loop = Arc::clone(&engine.reconciler).spawn(shutdown.clone());

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("收到退出信号，正在停止...");
                    shutdown.cancel();
                }
                Err(e) => error!("无法监听退出信号: {}", e),
            }
        });
    }

    #[cfg(feature = "http")]
    let result =
        uni_downloader::server::serve(engine.app_state(), &config.server, shutdown.clone()).await;
    #[cfg(not(feature = "http"))]
    let result: Result<()> = {
        shutdown.cancelled().await;
        Ok(())
    };

    shutdown.cancel();
    sync_loop.await.context("同步循环异常退出")?;
    result
}

async fn check(args: DaemonArgs) -> Result<()> {
    let client = Aria2Client::new(&args.to_rpc_config())?;

    PrettyLogger::title("守护进程检查");
    PrettyLogger::field("RPC 地址", client.endpoint());

    let version = match client.get_version().await {
        Ok(version) => version,
        Err(e) => {
            log_error!("无法连接到守护进程: {}", e);
            return Err(anyhow!("守护进程不可用"));
        }
    };
    log_success!("守护进程可用");
    PrettyLogger::field("版本", &version.version);
    PrettyLogger::field("功能", version.enabled_features.join(", "));

    match client.get_global_stat().await {
        Ok(stat) => {
            PrettyLogger::separator();
            PrettyLogger::field("下载速度", format_speed(stat.download_speed));
            PrettyLogger::field("上传速度", format_speed(stat.upload_speed));
            PrettyLogger::field(
                "任务",
                format!(
                    "活动 {} / 等待 {} / 已停止 {}",
                    stat.num_active, stat.num_waiting, stat.num_stopped
                ),
            );
        }
        Err(e) => log_warning!("获取全局统计失败: {}", e),
    }

    match client.tell_active().await {
        Ok(active) if active.is_empty() => log_info!("当前没有活动的传输"),
        Ok(active) => {
            PrettyLogger::separator();
            for status in &active {
                let name = status.file_name().unwrap_or_else(|| status.gid.clone());
                let pct = status
                    .known_total()
                    .map(|total| percentage(status.completed_length, Some(total)));
                PrettyLogger::transfer(name, "active", pct, format_speed(status.download_speed));
            }
        }
        Err(e) => log_warning!("获取活动任务失败: {}", e),
    }

    log_info!("检查完成");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .init();

    match args.command {
        Command::Serve(serve_args) => serve(serve_args).await,
        Command::Check(daemon_args) => check(daemon_args).await,
    }
}
