//! 演示客户端核心实现

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use msgnet::{Client, DemoOp, Message, Result};
use tracing::{debug, warn};

/// 终端输入解析出的命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// 向服务端发送当前时间
    Ping,
    /// 让服务端打印一段文本
    RemotePrint,
    /// 让服务端把文本转发给其他客户端
    Broadcast { text: String },
    /// 退出
    Quit,
}

impl Command {
    /// 解析一行输入，无法识别时返回 None
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };
        match head {
            "1" => Some(Command::Ping),
            "2" => Some(Command::RemotePrint),
            "3" if rest.is_empty() => Some(Command::Broadcast {
                text: DEFAULT_BROADCAST.to_string(),
            }),
            "3" => Some(Command::Broadcast {
                text: rest.to_string(),
            }),
            "4" | "quit" | "q" => Some(Command::Quit),
            _ => None,
        }
    }
}

/// 默认的远程打印文本
pub const DEFAULT_PRINT: &str = "Hello, I'm a Client.";

/// 默认的广播文本
pub const DEFAULT_BROADCAST: &str = "Hello, everyone.";

/// 从服务端收到的内容
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Ping 往返耗时
    Pong { elapsed: Duration },
    /// 服务端或其他客户端发来的文本
    Text { op: DemoOp, text: String },
}

/// 演示客户端
pub struct DemoClient {
    client: Client<DemoOp>,
}

impl DemoClient {
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let mut client = Client::new();
        client.connect(host, port)?;
        Ok(Self { client })
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// 执行一条命令，返回是否应当退出
    pub fn execute(&self, command: &Command) -> bool {
        match command {
            Command::Ping => {
                let mut msg = Message::new(DemoOp::Ping);
                msg.push(now_micros());
                self.client.send(msg);
            }
            Command::RemotePrint => {
                let mut msg = Message::new(DemoOp::RemotePrint);
                msg.push_str(DEFAULT_PRINT);
                self.client.send(msg);
            }
            Command::Broadcast { text } => {
                let mut msg = Message::new(DemoOp::Broadcast);
                msg.push_str(text);
                self.client.send(msg);
            }
            Command::Quit => return true,
        }
        false
    }

    /// 最多等待 `timeout`，取出所有已到达的消息
    pub fn poll(&self, timeout: Duration) -> Vec<Event> {
        let incoming = self.client.incoming();
        incoming.wait_until_non_empty_timeout(timeout);

        let mut events = Vec::new();
        while let Some(owned) = incoming.pop_front() {
            let mut msg = owned.msg;
            debug!("Received {}", msg);
            let event = match msg.op() {
                DemoOp::Ping => msg.pop::<u64>().map(|then| Event::Pong {
                    elapsed: Duration::from_micros(now_micros().saturating_sub(then)),
                }),
                op => msg.pop_string().map(|text| Event::Text { op, text }),
            };
            match event {
                Ok(event) => events.push(event),
                Err(e) => warn!("Malformed {:?} message: {}", msg.op(), e),
            }
        }
        events
    }

    pub fn disconnect(&mut self) {
        self.client.disconnect();
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("1"), Some(Command::Ping));
        assert_eq!(Command::parse(" 2 "), Some(Command::RemotePrint));
        assert_eq!(
            Command::parse("3"),
            Some(Command::Broadcast {
                text: DEFAULT_BROADCAST.to_string()
            })
        );
        assert_eq!(
            Command::parse("3   hi there"),
            Some(Command::Broadcast {
                text: "hi there".to_string()
            })
        );
        assert_eq!(Command::parse("4"), Some(Command::Quit));
        assert_eq!(Command::parse("quit"), Some(Command::Quit));
        assert_eq!(Command::parse("5"), None);
        assert_eq!(Command::parse(""), None);
    }
}
