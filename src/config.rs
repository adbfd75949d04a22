// 配置管理模块
// 负责加载和管理应用程序配置

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::validate_url;

/// 应用程序配置结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// 服务器配置
    pub server: ServerConfig,
    /// 数据库配置
    pub database: DatabaseConfig,
    /// 易支付处理器配置
    pub processor: ProcessorConfig,
    /// 安全配置
    pub security: SecurityConfig,
    /// 凭证解析配置
    pub resolver: ResolverConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 服务器监听地址
    pub host: String,
    /// 服务器监听端口
    pub port: u16,
    /// 工作线程数
    pub workers: Option<usize>,
    /// 请求超时时间 (秒)
    pub timeout: u64,
}

/// 存储后端
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => anyhow::bail!("Unknown store backend: {}", other),
        }
    }
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    /// 数据库连接URL
    pub url: String,
    /// 最大连接数
    pub max_connections: u32,
    /// 最小空闲连接数
    pub min_connections: u32,
    /// 连接超时时间 (秒)
    pub connect_timeout: u64,
    /// 空闲超时时间 (秒)
    pub idle_timeout: u64,
    /// 启动时执行迁移
    pub run_migrations: bool,
}

/// 订单号最短长度
pub const MIN_ORDER_NO_LEN: usize = 32;
/// 订单号最长长度 (与数据库列宽一致)
pub const MAX_ORDER_NO_LEN: usize = 64;

/// 易支付处理器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// 单次请求超时 (秒)
    pub timeout: u64,
    /// 本服务的公网地址，用于拼接 notify_url / return_url
    pub public_base_url: String,
    /// 默认支付方式
    pub default_pay_type: String,
    /// 订单号最大长度
    pub max_order_no_len: usize,
}

impl ProcessorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// 安全配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// 管理接口令牌
    #[serde(skip_serializing)]
    pub admin_token: String,
    /// 平台 webhook 的 HMAC 密钥，未配置时不校验
    #[serde(skip_serializing)]
    pub webhook_secret: Option<String>,
    /// 管理接口允许的跨域来源
    pub cors_origins: Vec<String>,
}

/// 凭证解析配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// 安装阶段占位端点包含的标记
    pub placeholder_markers: Vec<String>,
}

fn parse_var<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {}", name))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

const DEFAULT_PLACEHOLDER_MARKERS: &str = "localhost,127.0.0.1,placeholder,example.com";

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // 加载.env文件，忽略错误

        let backend: StoreBackend = env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()
            .context("Invalid STORE_BACKEND")?;
        let url = match backend {
            StoreBackend::Postgres => env::var("DATABASE_URL")
                .context("DATABASE_URL environment variable is required")?,
            StoreBackend::Memory => env::var("DATABASE_URL").unwrap_or_default(),
        };

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: parse_var("SERVER_PORT", "8080")?,
                workers: env::var("SERVER_WORKERS")
                    .ok()
                    .and_then(|s| s.parse().ok()),
                timeout: parse_var("SERVER_TIMEOUT", "30")?,
            },
            database: DatabaseConfig {
                backend,
                url,
                max_connections: parse_var("DB_MAX_CONNECTIONS", "10")?,
                min_connections: parse_var("DB_MIN_CONNECTIONS", "1")?,
                connect_timeout: parse_var("DB_CONNECT_TIMEOUT", "30")?,
                idle_timeout: parse_var("DB_IDLE_TIMEOUT", "600")?,
                run_migrations: parse_var("RUN_MIGRATIONS", "false")?,
            },
            processor: ProcessorConfig {
                timeout: parse_var("EPAY_TIMEOUT", "10")?,
                public_base_url: env::var("PUBLIC_BASE_URL")
                    .context("PUBLIC_BASE_URL environment variable is required")?,
                default_pay_type: env::var("DEFAULT_PAY_TYPE").unwrap_or_else(|_| "alipay".to_string()),
                max_order_no_len: parse_var("MAX_ORDER_NO_LEN", "64")?,
            },
            security: SecurityConfig {
                admin_token: env::var("ADMIN_TOKEN")
                    .context("ADMIN_TOKEN environment variable is required")?,
                webhook_secret: env::var("WEBHOOK_SECRET").ok().filter(|s| !s.is_empty()),
                cors_origins: split_list(&env::var("ADMIN_CORS_ORIGINS").unwrap_or_default()),
            },
            resolver: ResolverConfig {
                placeholder_markers: split_list(
                    &env::var("PLACEHOLDER_MARKERS").unwrap_or_else(|_| DEFAULT_PLACEHOLDER_MARKERS.to_string()),
                ),
            },
        })
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.database.backend == StoreBackend::Postgres && self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if !validate_url(&self.processor.public_base_url) {
            anyhow::bail!("PUBLIC_BASE_URL must be an http(s) URL");
        }

        if self.processor.timeout == 0 {
            anyhow::bail!("Processor timeout cannot be 0");
        }

        // 下限: ORDER-<10位时间戳>-<6位随机>- 加8位摘要；上限: order_mappings.order_no 列宽
        let len = self.processor.max_order_no_len;
        if !(MIN_ORDER_NO_LEN..=MAX_ORDER_NO_LEN).contains(&len) {
            anyhow::bail!(
                "Order number length must be between {} and {}",
                MIN_ORDER_NO_LEN,
                MAX_ORDER_NO_LEN
            );
        }

        if self.security.admin_token.len() < 16 {
            anyhow::bail!("Admin token must be at least 16 characters");
        }

        Ok(())
    }

    /// 获取服务器绑定地址
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                workers: None,
                timeout: 30,
            },
            database: DatabaseConfig {
                backend: StoreBackend::Memory,
                url: String::new(),
                max_connections: 10,
                min_connections: 1,
                connect_timeout: 30,
                idle_timeout: 600,
                run_migrations: false,
            },
            processor: ProcessorConfig {
                timeout: 10,
                public_base_url: "http://127.0.0.1:8080".to_string(),
                default_pay_type: "alipay".to_string(),
                max_order_no_len: 64,
            },
            security: SecurityConfig {
                admin_token: "local-admin-token-change-me".to_string(),
                webhook_secret: None,
                cors_origins: Vec::new(),
            },
            resolver: ResolverConfig {
                placeholder_markers: split_list(DEFAULT_PLACEHOLDER_MARKERS),
            },
        }
    }
}
