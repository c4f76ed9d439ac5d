//! 演示客户端
//!
//! 从标准输入读取命令，轮询服务端发来的消息

mod client;

use std::io::BufRead;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use client::{Command, DemoClient, Event};
use msgnet::{DemoOp, DEFAULT_PORT};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 每轮轮询的最长等待时间
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(name = "msgnet-client", about = "Demo message client")]
struct Args {
    /// 服务端主机名
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// 服务端端口
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("msgnet_client=info".parse()?)
                .add_directive("msgnet=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let mut client = DemoClient::connect(&args.host, args.port)?;

    println!("输入 1 向服务端发送 Ping");
    println!("输入 2 让服务端打印 \"{}\"", client::DEFAULT_PRINT);
    println!("输入 3 [文本] 广播消息（默认 \"{}\"）", client::DEFAULT_BROADCAST);
    println!("输入 4 退出");

    // 标准输入是阻塞的，放到独立线程里读
    let (line_tx, line_rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    loop {
        let mut quit = false;
        while let Ok(line) = line_rx.try_recv() {
            match Command::parse(&line) {
                Some(command) => quit |= client.execute(&command),
                None => println!("未知命令: {}", line.trim()),
            }
        }
        if quit {
            break;
        }

        if !client.is_connected() {
            println!("[Client] 无法连接到服务端或连接已断开");
            break;
        }

        for event in client.poll(POLL_INTERVAL) {
            match event {
                Event::Pong { elapsed } => println!("Ping: {:.6}s", elapsed.as_secs_f64()),
                Event::Text { op: DemoOp::Broadcast, text } => println!("[广播] {}", text),
                Event::Text { text, .. } => println!("{}", text),
            }
        }
    }

    client.disconnect();
    info!("Client exited");
    Ok(())
}
