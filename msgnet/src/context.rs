//! 后台 I/O 执行上下文
//!
//! 每个角色（服务端或客户端）拥有一个独立线程，线程内运行单线程 tokio runtime。
//! 该角色所有连接的读写都在这个线程上顺序执行；应用线程通过 `Handle`
//! 把工作调度过去。停止上下文会丢弃所有未完成的 I/O，相当于关闭全部套接字。

use std::future::Future;
use std::thread;

use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{ProtocolError, Result};

pub struct IoContext {
    name: String,
    handle: Handle,
    shutdown_tx: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl IoContext {
    /// 启动后台线程
    pub fn start(name: &str) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
                // runtime 在此处析构，取消所有仍在运行的任务
            })?;

        debug!("I/O context {} started", name);
        Ok(Self {
            name: name.to_string(),
            handle,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// 在后台线程上执行 future，并在调用线程上阻塞等待结果
    ///
    /// 不能在异步上下文中调用。
    pub fn run_blocking<F>(&self, future: F) -> Result<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.handle.spawn(async move {
            let _ = tx.send(future.await);
        });
        rx.blocking_recv().map_err(|_| ProtocolError::ContextStopped)
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// 停止 runtime 并等待后台线程退出
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            debug!("I/O context {} stopped", self.name);
        }
    }
}

impl Drop for IoContext {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_run_blocking() {
        let context = IoContext::start("test-io").unwrap();
        let value = context
            .run_blocking(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                thread::current().name().map(str::to_string)
            })
            .unwrap();
        assert_eq!(value.as_deref(), Some("test-io"));
    }

    #[test]
    fn test_stop_cancels_pending_work() {
        let mut context = IoContext::start("test-stop").unwrap();
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        context.handle().spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });

        context.stop();
        assert!(!context.is_running());
        // 任务被丢弃，发送端随之析构
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_err());
        assert!(matches!(
            context.run_blocking(async { 1 }),
            Err(ProtocolError::ContextStopped)
        ));
    }
}
