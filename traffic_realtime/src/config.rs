// traffic_realtime/src/config.rs

//! 实时通信核心的配置加载模块。
//!
//! 配置以 JSON 文件 (`app_settings.json`) 的形式保存，缺省时使用内置默认值并写回磁盘。
//! 环境变量 `TRAFFIC_RT_WS_URL` 可以覆盖文件中的 WebSocket 地址，便于在不同部署环境间切换。

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use rust_websocket_utils::client::transport::parse_ws_url;
use serde::{Deserialize, Serialize};

use crate::error::RealtimeError;

/// 配置文件的默认文件名。
pub const CONFIG_FILE_NAME: &str = "app_settings.json";
/// 覆盖 WebSocket 地址的环境变量名。
pub const WS_URL_ENV_VAR: &str = "TRAFFIC_RT_WS_URL";

pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8088/ws";
pub const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u64 = 30;
pub const DEFAULT_PONG_GRACE_SECONDS: u64 = 10;

/// 实时通信核心的配置。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// 数据源的 WebSocket 地址，必须是 `ws://` 或 `wss://`。
    pub ws_url: String,
    /// 心跳 Ping 的发送间隔 (秒)。
    pub heartbeat_interval_seconds: u64,
    /// 超过 `心跳间隔 + 宽限时间` 仍未收到 Pong 时记录告警日志 (秒)。
    pub pong_grace_seconds: u64,
    /// 二进制程序使用的日志级别 (`error` / `warn` / `info` / `debug` / `trace`)。
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            heartbeat_interval_seconds: DEFAULT_HEARTBEAT_INTERVAL_SECONDS,
            pong_grace_seconds: DEFAULT_PONG_GRACE_SECONDS,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// 使用给定地址、其余字段取默认值构造配置。
    pub fn with_url(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            ..Self::default()
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn pong_grace(&self) -> Duration {
        Duration::from_secs(self.pong_grace_seconds)
    }

    /// 校验配置：地址必须能解析且协议为 ws/wss，心跳间隔必须大于 0。
    pub fn validate(&self) -> Result<(), RealtimeError> {
        parse_ws_url(&self.ws_url).map_err(|e| RealtimeError::Config(e.to_string()))?;
        if self.heartbeat_interval_seconds == 0 {
            return Err(RealtimeError::Config("heartbeat_interval_seconds 必须大于 0".to_string()));
        }
        Ok(())
    }

    /// 用环境变量中的地址覆盖配置 (若已设置且非空)。
    fn apply_env_override(mut self) -> Self {
        self.apply_url_override(env::var(WS_URL_ENV_VAR).ok());
        self
    }

    fn apply_url_override(&mut self, url: Option<String>) {
        if let Some(url) = url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()) {
            info!("[配置模块] 环境变量 {} 覆盖 WebSocket 地址: {}", WS_URL_ENV_VAR, url);
            self.ws_url = url;
        }
    }
}

/// 从指定路径加载配置，应用环境变量覆盖后进行校验。
///
/// 文件不存在、无法读取或内容无法反序列化时返回 `RealtimeError::Config`。
pub fn load_app_config(path: impl AsRef<Path>) -> Result<AppConfig, RealtimeError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| RealtimeError::Config(format!("读取配置文件 {:?} 失败: {}", path, e)))?;
    let config: AppConfig = serde_json::from_str(&content)
        .map_err(|e| RealtimeError::Config(format!("解析配置文件 {:?} 失败: {}", path, e)))?;
    info!("[配置模块] 已成功从配置文件 {:?} 加载应用配置。", path);

    let config = config.apply_env_override();
    config.validate()?;
    Ok(config)
}

/// 加载配置；文件缺失或损坏时使用默认配置并尝试写回该路径。
///
/// 写回失败只记录告警。环境变量覆盖之后的配置仍需通过校验。
pub fn load_or_create_config(path: impl AsRef<Path>) -> Result<AppConfig, RealtimeError> {
    let path = path.as_ref();
    let config = match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => {
                info!("[配置模块] 已成功从配置文件 {:?} 加载应用配置。", path);
                config
            }
            Err(e) => {
                warn!(
                    "[配置模块] 从 {:?} 反序列化配置失败: {}。文件可能已损坏，将使用默认配置并覆盖。",
                    path, e
                );
                let default_config = AppConfig::default();
                save_config(&default_config, path);
                default_config
            }
        },
        Err(e) => {
            info!(
                "[配置模块] 未在 {:?} 找到配置文件 (错误: {})，将使用默认配置并创建新文件。",
                path, e
            );
            let default_config = AppConfig::default();
            save_config(&default_config, path);
            default_config
        }
    };

    let config = config.apply_env_override();
    config.validate()?;
    Ok(config)
}

/// 当前工作目录下的默认配置文件路径。
pub fn default_config_path() -> PathBuf {
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(CONFIG_FILE_NAME)
}

fn save_config(config: &AppConfig, path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = fs::create_dir_all(parent) {
            warn!("[配置模块] 创建配置目录 {:?} 失败: {}", parent, e);
            return;
        }
    }
    match serde_json::to_string_pretty(config) {
        Ok(json) => match fs::write(path, json) {
            Ok(()) => info!("[配置模块] 默认配置已写入 {:?}", path),
            Err(e) => warn!("[配置模块] 写入配置文件 {:?} 失败: {}", path, e),
        },
        Err(e) => warn!("[配置模块] 序列化默认配置失败: {}", e),
    }
}
