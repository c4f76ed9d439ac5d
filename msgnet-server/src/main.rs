//! 演示服务端
//!
//! 回送 Ping、打印 RemotePrint、转发 Broadcast

mod server;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use msgnet::{Server, ServerConfig, DEFAULT_PORT};
use server::DemoServer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// 每轮 update 的最长等待时间，期间检查是否收到 Ctrl+C
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "msgnet-server", about = "Demo message server")]
struct Args {
    /// 监听地址
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// 监听端口
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("msgnet_server=debug".parse()?)
                .add_directive("msgnet=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    let shutdown = watch_ctrl_c()?;

    let config = ServerConfig::with_bind_addr(format!("{}:{}", args.host, args.port));
    let mut server = Server::new(config, DemoServer);
    server.start()?;

    while !shutdown.load(Ordering::Relaxed) {
        server.update_timeout(usize::MAX, POLL_INTERVAL);
    }

    info!("Received shutdown signal, stopping...");
    server.stop();
    Ok(())
}

/// 在独立线程上等待 Ctrl+C，收到后置位
fn watch_ctrl_c() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let signalled = Arc::clone(&flag);
    std::thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            runtime.block_on(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to install ctrl-c handler: {}", e);
                    return;
                }
                signalled.store(true, Ordering::Relaxed);
            });
        })?;

    Ok(flag)
}
