// traffic_realtime/src/main.rs

//! 实时通信核心的命令行宿主：连接数据源并周期性输出快照概况，Ctrl-C 退出。
//!
//! 用法: `traffic_realtime [配置文件路径]`，缺省使用当前目录下的 `app_settings.json`。

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use log::{LevelFilter, error, info, warn};
use traffic_realtime::config::{default_config_path, load_or_create_config};
use traffic_realtime::RealtimeClient;

/// 状态概况的输出间隔。
const STATUS_REPORT_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let config = load_or_create_config(&config_path)
        .with_context(|| format!("加载配置文件 {:?} 失败", config_path))?;

    let level = config.log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .init();
    info!("[主程序] 日志系统已初始化，级别: {}。配置文件: {:?}", level, config_path);
    info!(
        "[主程序] 数据源地址: {}，心跳间隔: {} 秒",
        config.ws_url, config.heartbeat_interval_seconds
    );

    let client = RealtimeClient::new(&config).context("创建实时客户端失败")?;
    if let Err(e) = client.ensure_connected().await {
        error!("[主程序] 无法连接到数据源: {}", e);
        return Err(e).context("连接实时数据源失败");
    }
    info!("[主程序] 已连接到数据源，等待推送数据...");

    let mut ticker = tokio::time::interval(STATUS_REPORT_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                info!(
                    "[主程序] 状态: {}，就绪: {}，视频源 {} 个，节点 {} 个，告警 {} 条，指标: {}",
                    client.connection_state(),
                    client.is_ready(),
                    client.feeds().len(),
                    client.nodes().len(),
                    client.alerts().len(),
                    if client.kpis().is_some() { "有" } else { "无" },
                );
                if let Some(message) = client.error() {
                    warn!("[主程序] {}", message);
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("[主程序] 监听 Ctrl-C 信号失败: {}", e);
                }
                info!("[主程序] 收到退出信号。");
                break;
            }
        }
    }

    client.shutdown().await;
    info!("[主程序] 已退出。");
    Ok(())
}
