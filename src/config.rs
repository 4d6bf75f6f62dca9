use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use log::warn;
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

/// 未配置时的默认缓存容量
const DEFAULT_CACHE_SIZE: usize = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// 命令行参数，优先级高于配置文件
#[derive(Debug, Parser)]
#[command(name = "snippetbox", version, about = "Snippet sharing web server")]
pub struct Args {
    /// 配置文件路径
    #[arg(long, default_value = "config/development.toml")]
    pub config: PathBuf,
    /// 监听地址，例如 127.0.0.1:4000
    #[arg(long, env = "SNIPPETBOX_ADDR")]
    pub addr: Option<String>,
    /// 数据源：`memory` 或 sqlx SQLite URL
    #[arg(long, env = "SNIPPETBOX_DSN")]
    pub dsn: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    addr: String,
    dsn: String,
    static_dir: String,
    worker_threads: usize,
    cache_size: usize,
    session_lifetime_hours: i64,
    secure_cookies: bool,
    bcrypt_cost: u32,
    max_body_size: usize,
    read_header_timeout_secs: u64,
    read_timeout_secs: u64,
    write_timeout_secs: u64,
    idle_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            addr: "127.0.0.1:4000".to_string(),
            dsn: "memory".to_string(),
            static_dir: "ui/static".to_string(),
            worker_threads: 0,
            cache_size: DEFAULT_CACHE_SIZE,
            session_lifetime_hours: 12,
            secure_cookies: true,
            bcrypt_cost: 12,
            max_body_size: 1024 * 1024,
            read_header_timeout_secs: 5,
            read_timeout_secs: 5,
            write_timeout_secs: 10,
            idle_timeout_secs: 60,
        }
    }

    pub fn from_toml(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        let mut config: Config = toml::from_str(text)?;
        config.normalize();
        Ok(config)
    }

    /// 读取配置文件并套用命令行覆盖
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = Self::from_toml(&args.config)?;
        if let Some(addr) = &args.addr {
            config.addr = addr.clone();
        }
        if let Some(dsn) = &args.dsn {
            config.dsn = dsn.clone();
        }
        Ok(config)
    }

    fn normalize(&mut self) {
        if self.worker_threads == 0 {
            self.worker_threads = num_cpus::get();
        }
        if self.cache_size == 0 {
            warn!(
                "cache_size被设置为0，但目前尚不支持禁用缓存，因此该值将被改为{}。",
                DEFAULT_CACHE_SIZE
            );
            self.cache_size = DEFAULT_CACHE_SIZE;
        }
        if self.session_lifetime_hours <= 0 {
            warn!("session_lifetime_hours必须为正数，改为12");
            self.session_lifetime_hours = 12;
        }
    }
}

impl Config {
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    /// `memory` 选择进程内存储
    pub fn uses_memory_store(&self) -> bool {
        self.dsn == "memory"
    }

    pub fn static_dir(&self) -> &str {
        &self.static_dir
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    pub fn session_lifetime(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_lifetime_hours)
    }

    pub fn secure_cookies(&self) -> bool {
        self.secure_cookies
    }

    pub fn bcrypt_cost(&self) -> u32 {
        self.bcrypt_cost
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    pub fn read_header_timeout(&self) -> Duration {
        Duration::from_secs(self.read_header_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = Config::from_toml_str("addr = \"0.0.0.0:8080\"\n").unwrap();
        assert_eq!(config.addr(), "0.0.0.0:8080");
        assert!(config.uses_memory_store());
        assert_eq!(config.session_lifetime(), chrono::Duration::hours(12));
        assert_eq!(config.read_header_timeout(), Duration::from_secs(5));
        assert_eq!(config.idle_timeout(), Duration::from_secs(60));
        assert!(config.worker_threads() > 0);
    }

    #[test]
    fn test_zero_cache_size_is_replaced() {
        let config = Config::from_toml_str("cache_size = 0\n").unwrap();
        assert_eq!(config.cache_size(), DEFAULT_CACHE_SIZE);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cache_size = \"lots\"").unwrap();
        let err = Config::from_toml(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let err = Config::from_toml(Path::new("/nonexistent/snippetbox.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_args_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "addr = \"127.0.0.1:1\"\ndsn = \"memory\"").unwrap();
        let args = Args::parse_from([
            "snippetbox",
            "--config",
            file.path().to_str().unwrap(),
            "--dsn",
            "sqlite://snippetbox.db",
        ]);
        let config = Config::load(&args).unwrap();
        assert_eq!(config.addr(), "127.0.0.1:1");
        assert_eq!(config.dsn(), "sqlite://snippetbox.db");
        assert!(!config.uses_memory_store());
    }
}
