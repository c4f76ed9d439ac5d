//! 演示服务端的消息处理

use std::sync::Arc;

use msgnet::{Connection, DemoOp, Message, ServerHandle, ServerHandler};
use tracing::{info, warn};

/// 演示服务端
///
/// - Ping: 原样回送，客户端据此计算往返时间
/// - RemotePrint: 在服务端打印文本
/// - Broadcast: 转发给除发送者以外的所有客户端
pub struct DemoServer;

impl ServerHandler<DemoOp> for DemoServer {
    fn on_client_connect(&self, client: &Arc<Connection<DemoOp>>) -> bool {
        match client.peer_addr() {
            Some(addr) => info!("[Server] Allow connection: {}", addr),
            None => info!("[Server] Allow connection"),
        }
        true
    }

    fn on_message(
        &self,
        server: &ServerHandle<DemoOp>,
        client: &Arc<Connection<DemoOp>>,
        mut msg: Message<DemoOp>,
    ) {
        match msg.op() {
            DemoOp::Ping => {
                info!("[Server] Ping from client {}", client.id());
                server.send_client(client, &msg);
            }
            DemoOp::RemotePrint => match msg.pop_string() {
                Ok(text) => info!("[Server] Client {} message: {}", client.id(), text),
                Err(e) => warn!("[Server] Bad RemotePrint from {}: {}", client.id(), e),
            },
            DemoOp::Broadcast => match msg.pop_string() {
                Ok(text) => {
                    info!("[Server] Client {} broadcast: {}", client.id(), text);
                    msg.push_str(&text);
                    let sent = server.send_all_clients(&msg, Some(client));
                    info!("[Server] Broadcast relayed to {} clients", sent);
                }
                Err(e) => warn!("[Server] Bad Broadcast from {}: {}", client.id(), e),
            },
        }
    }

    fn on_client_disconnect(&self, client: &Arc<Connection<DemoOp>>) {
        info!("[Server] Client {} disconnect", client.id());
    }
}
