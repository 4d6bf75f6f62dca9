// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Snippetbox 服务器
//!
//! 启动流程：
//! - 初始化 log4rs 日志并载入 TOML 配置（命令行参数可覆盖）
//! - 按配置的线程数构建 Tokio 运行时
//! - 选择存储后端（进程内或 SQLite），启动会话过期清理任务
//! - 构建路由表并进入接收循环
//! - 后台管理控制台（stop / status / help）与 Ctrl-C 停机

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use clap::Parser;
use log::{error, info, warn};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpListener,
    runtime::Builder,
    sync::Notify,
};

use snippetbox::{
    config::{Args, Config},
    handlers::Application,
    models::{MemoryStore, ModelError, SnippetModel, SqlStore, UserModel},
    routes::routes,
    server::{self, ConnectionSettings},
    session::{MemorySessionStore, SessionManager, SessionStore, SqlSessionStore},
    static_files::StaticFiles,
    templates::{TemplateCache, TemplateError},
};

/// 会话过期清理的间隔
const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
enum StartupError {
    #[error("store: {0}")]
    Store(#[from] ModelError),
    #[error("templates: {0}")]
    Templates(#[from] TemplateError),
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

fn main() {
    // 1. 日志系统：级别与输出目的地由外部 YAML 决定
    if let Err(e) = log4rs::init_file("config/log4rs.yaml", Default::default()) {
        eprintln!("无法初始化日志系统: {}", e);
        std::process::exit(1);
    }

    // 2. 配置
    let args = Args::parse();
    let config = match Config::load(&args) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    info!("配置文件已载入");

    // 3. 运行时
    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()
    {
        Ok(r) => r,
        Err(e) => {
            error!("无法创建运行时: {}", e);
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(run(config));
    // stdin 读取任务不会自行结束，这里不等待它
    runtime.shutdown_timeout(Duration::from_secs(1));
    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), StartupError> {
    let templates = Arc::new(TemplateCache::new()?);

    // 4. 存储后端
    let snippets: Arc<dyn SnippetModel>;
    let users: Arc<dyn UserModel>;
    let session_store: Arc<dyn SessionStore>;
    if config.uses_memory_store() {
        warn!("使用进程内存储，重启后数据会丢失");
        let store = Arc::new(MemoryStore::new());
        let sessions = Arc::new(MemorySessionStore::new());
        Arc::clone(&sessions).spawn_cleanup(SESSION_CLEANUP_INTERVAL);
        snippets = store.clone();
        users = store;
        session_store = sessions;
    } else {
        info!("连接数据库: {}", config.dsn());
        let store = Arc::new(SqlStore::connect(config.dsn()).await?);
        let sessions = SqlSessionStore::new(store.pool());
        sessions.clone().spawn_cleanup(SESSION_CLEANUP_INTERVAL);
        snippets = store.clone();
        users = store;
        session_store = Arc::new(sessions);
    }

    // 5. 路由表
    let app = Arc::new(Application {
        snippets,
        users,
        templates,
        bcrypt_cost: config.bcrypt_cost(),
    });
    let sessions = SessionManager::new(
        session_store,
        config.session_lifetime(),
        config.secure_cookies(),
    );
    let static_files = StaticFiles::new(config.static_dir(), config.cache_size());
    info!("静态资源目录: {}", config.static_dir());
    let handler = routes(app, sessions, static_files, config.secure_cookies());

    // 6. 网络层
    let listener = TcpListener::bind(config.addr())
        .await
        .map_err(|source| StartupError::Bind {
            addr: config.addr().to_string(),
            source,
        })?;
    info!("服务端将在{}上监听Socket连接", config.addr());

    // 7. 停机信号与连接计数
    let shutdown = Arc::new(Notify::new());
    let active_connections = Arc::new(AtomicUsize::new(0));

    tokio::spawn({
        let shutdown = Arc::clone(&shutdown);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("收到 Ctrl-C，正在停机");
                shutdown.notify_one();
            }
        }
    });
    tokio::spawn(console(
        Arc::clone(&shutdown),
        Arc::clone(&active_connections),
    ));

    // 8. 主事件循环
    let settings = Arc::new(ConnectionSettings::from_config(&config));
    server::serve(listener, handler, settings, active_connections, shutdown).await;
    info!("服务器已停止");
    Ok(())
}

/// 后台管理控制台，提供运维指令
async fn console(shutdown: Arc<Notify>, active_connections: Arc<AtomicUsize>) {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut input = String::new();
    loop {
        input.clear();
        match reader.read_line(&mut input).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        match input.trim() {
            "stop" => {
                println!("停机指令已激活，服务器将停止接收新连接...");
                shutdown.notify_one();
                break;
            }
            "help" => {
                println!("== Snippetbox Help ==");
                println!("stop   - 发出停机信号");
                println!("status - 查看当前服务器运行状态");
                println!("help   - 显示此帮助信息");
                println!("=====================");
            }
            "status" => {
                println!("== Snippetbox 状态 ===");
                println!(
                    "当前活跃连接数: {}",
                    active_connections.load(Ordering::SeqCst)
                );
                println!("=====================");
            }
            "" => {}
            cmd => println!("无效的命令：{}", cmd),
        }
    }
}
