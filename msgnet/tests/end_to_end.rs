use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use msgnet::handshake::scramble;
use msgnet::{
    Client, Connection, ConnectionState, DemoOp, Message, MessageHeader, Server, ServerConfig,
    ServerHandle, ServerHandler,
};
use parking_lot::Mutex;

const WAIT: Duration = Duration::from_secs(5);

/// 记录所有事件的演示处理器：Ping 回送、RemotePrint 记录、Broadcast 转发
#[derive(Default)]
struct Relay {
    accepted: Mutex<Vec<Arc<Connection<DemoOp>>>>,
    received: Mutex<Vec<(u32, DemoOp)>>,
    prints: Mutex<Vec<(u32, String)>>,
    disconnects: Mutex<Vec<u32>>,
}

impl ServerHandler<DemoOp> for Relay {
    fn on_client_connect(&self, client: &Arc<Connection<DemoOp>>) -> bool {
        self.accepted.lock().push(Arc::clone(client));
        true
    }

    fn on_message(
        &self,
        server: &ServerHandle<DemoOp>,
        client: &Arc<Connection<DemoOp>>,
        mut msg: Message<DemoOp>,
    ) {
        self.received.lock().push((client.id(), msg.op()));
        match msg.op() {
            DemoOp::Ping => {
                server.send_client(client, &msg);
            }
            DemoOp::RemotePrint => {
                if let Ok(text) = msg.pop_string() {
                    self.prints.lock().push((client.id(), text));
                }
            }
            DemoOp::Broadcast => {
                server.send_all_clients(&msg, Some(client));
            }
        }
    }

    fn on_client_disconnect(&self, client: &Arc<Connection<DemoOp>>) {
        self.disconnects.lock().push(client.id());
    }
}

/// 默认钩子：拒绝一切连接
struct Reject;

impl ServerHandler<DemoOp> for Reject {}

/// 在后台线程里不断调用 `update_timeout` 的服务端
struct Harness<H: ServerHandler<DemoOp>> {
    server: Arc<Server<DemoOp, H>>,
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    pump: Option<thread::JoinHandle<()>>,
}

impl<H: ServerHandler<DemoOp>> Harness<H> {
    fn start(handler: H) -> Self {
        let mut server = Server::new(ServerConfig::with_bind_addr("127.0.0.1:0"), handler);
        server.start().unwrap();
        let addr = server.local_addr().unwrap();
        let server = Arc::new(server);
        let stop = Arc::new(AtomicBool::new(false));

        let pump = {
            let server = Arc::clone(&server);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    server.update_timeout(usize::MAX, Duration::from_millis(20));
                }
            })
        };

        Self {
            server,
            addr,
            stop,
            pump: Some(pump),
        }
    }

    fn handler(&self) -> &H {
        self.server.handler()
    }

    fn client(&self) -> Client<DemoOp> {
        let mut client = Client::new();
        client.connect("127.0.0.1", self.addr.port()).unwrap();
        assert!(wait_until(|| client.state() == ConnectionState::Active));
        client
    }
}

impl<H: ServerHandler<DemoOp>> Drop for Harness<H> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn recv(client: &Client<DemoOp>) -> Message<DemoOp> {
    assert!(
        client.incoming().wait_until_non_empty_timeout(WAIT),
        "no message received"
    );
    client.incoming().pop_front().unwrap().msg
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_micros() as u64
}

#[test]
fn ping_is_echoed_unmodified() {
    let harness = Harness::start(Relay::default());
    let client = harness.client();

    let sent_at = now_micros();
    let mut ping = Message::new(DemoOp::Ping);
    ping.push(sent_at);
    assert!(client.send(ping.clone()));

    let mut echo = recv(&client);
    assert_eq!(echo, ping);
    let then: u64 = echo.pop().unwrap();
    assert_eq!(then, sent_at);
    assert!(now_micros() >= then);
}

#[test]
fn handshake_mismatch_is_rejected() {
    let harness = Harness::start(Relay::default());

    let mut stream = TcpStream::connect(harness.addr).unwrap();
    stream.set_read_timeout(Some(WAIT)).unwrap();
    let mut challenge = [0u8; 8];
    stream.read_exact(&mut challenge).unwrap();
    let wrong = scramble(u64::from_le_bytes(challenge)) ^ 0xff;
    stream.write_all(&wrong.to_le_bytes()).unwrap();

    // 握手失败后发送的帧不应被投递
    let header = MessageHeader {
        op: DemoOp::Ping,
        body_len: 0,
    };
    let _ = stream.write_all(&header.encode());

    let mut buf = [0u8; 16];
    assert!(matches!(stream.read(&mut buf), Ok(0) | Err(_)));

    assert!(wait_until(|| harness.handler().disconnects.lock().len() == 1));
    assert!(harness.handler().received.lock().is_empty());
    assert_eq!(harness.server.connection_count(), 0);
}

#[test]
fn broadcast_skips_sender() {
    let harness = Harness::start(Relay::default());
    let a = harness.client();
    let b = harness.client();
    let c = harness.client();
    assert!(wait_until(|| harness.server.connection_count() == 3));

    let mut msg = Message::new(DemoOp::Broadcast);
    msg.push_str("hi");
    assert!(a.send(msg));

    for receiver in [&b, &c] {
        let mut got = recv(receiver);
        assert_eq!(got.op(), DemoOp::Broadcast);
        assert_eq!(got.pop_string().unwrap(), "hi");
    }

    thread::sleep(Duration::from_millis(200));
    assert!(a.incoming().is_empty());
    assert!(b.incoming().is_empty());
    assert!(c.incoming().is_empty());
}

#[test]
fn per_connection_order_is_preserved() {
    let harness = Harness::start(Relay::default());
    let client = harness.client();

    for i in 0..20u32 {
        let mut msg = Message::new(DemoOp::RemotePrint);
        msg.push_str(&format!("line-{i}"));
        client.send(msg);
    }
    for i in 0..50u32 {
        let mut msg = Message::new(DemoOp::Ping);
        msg.push(i);
        client.send(msg);
    }

    for i in 0..50u32 {
        let mut echo = recv(&client);
        assert_eq!(echo.pop::<u32>().unwrap(), i);
    }

    let prints = harness.handler().prints.lock();
    let expected: Vec<String> = (0..20).map(|i| format!("line-{i}")).collect();
    let actual: Vec<String> = prints.iter().map(|(_, text)| text.clone()).collect();
    assert_eq!(actual, expected);
}

#[test]
fn blocking_update_caps_dispatch_and_reaps() {
    let mut server = Server::new(ServerConfig::with_bind_addr("127.0.0.1:0"), Relay::default());
    server.start().unwrap();
    let port = server.local_addr().unwrap().port();
    let connect = || {
        let mut client = Client::<DemoOp>::new();
        client.connect("127.0.0.1", port).unwrap();
        assert!(wait_until(|| client.state() == ConnectionState::Active));
        client
    };
    let mut a = connect();
    let b = connect();

    for i in 0..3u32 {
        let mut ping = Message::new(DemoOp::Ping);
        ping.push(i);
        assert!(a.send(ping));
    }
    assert!(wait_until(|| server.incoming().len() == 3));

    assert_eq!(server.update(1), 1);
    assert_eq!(server.handler().received.lock().len(), 1);
    assert_eq!(recv(&a).pop::<u32>().unwrap(), 0);
    assert_eq!(server.incoming().len(), 2);

    assert_eq!(server.update(usize::MAX), 2);
    assert_eq!(server.handler().received.lock().len(), 3);
    for i in 1..3u32 {
        assert_eq!(recv(&a).pop::<u32>().unwrap(), i);
    }
    assert!(server.handler().disconnects.lock().is_empty());

    // 断开的连接在下一次 update 中被移除
    a.disconnect();
    assert!(wait_until(|| !server.handler().accepted.lock()[0].is_connected()));
    assert_eq!(server.connection_count(), 2);

    assert!(b.send(Message::new(DemoOp::Ping)));
    assert_eq!(server.update(usize::MAX), 1);
    assert_eq!(*server.handler().disconnects.lock(), vec![10000]);
    assert_eq!(server.handle().connection_ids(), vec![10001]);
}

#[test]
fn disconnected_client_is_reaped_once() {
    let harness = Harness::start(Relay::default());
    let mut client = harness.client();
    assert!(wait_until(|| harness.server.connection_count() == 1));

    client.disconnect();
    assert!(!client.is_connected());

    assert!(wait_until(|| harness.server.connection_count() == 0));
    assert!(wait_until(|| harness.handler().disconnects.lock().len() == 1));
    thread::sleep(Duration::from_millis(200));
    assert_eq!(*harness.handler().disconnects.lock(), vec![10000]);
}

#[test]
fn connection_ids_are_never_reused() {
    let harness = Harness::start(Relay::default());
    let mut first = harness.client();
    let _second = harness.client();
    assert!(wait_until(|| harness.server.connection_count() == 2));

    first.disconnect();
    assert!(wait_until(|| harness.server.connection_count() == 1));

    let _third = harness.client();
    assert!(wait_until(|| harness.server.connection_count() == 2));
    assert_eq!(harness.server.handle().connection_ids(), vec![10001, 10002]);
}

#[test]
fn directed_send_by_id() {
    let harness = Harness::start(Relay::default());
    let client = harness.client();
    assert!(wait_until(|| harness.server.connection_count() == 1));

    let mut msg = Message::new(DemoOp::RemotePrint);
    msg.push_str("just for you");
    assert!(harness.server.handle().send_to(10000, &msg));
    assert!(!harness.server.handle().send_to(424242, &msg));

    let mut got = recv(&client);
    assert_eq!(got.pop_string().unwrap(), "just for you");
}

#[test]
fn default_handler_accepts_nothing() {
    let harness = Harness::start(Reject);

    let mut client = Client::<DemoOp>::new();
    client.connect("127.0.0.1", harness.addr.port()).unwrap();
    assert!(wait_until(|| !client.is_connected()));
    assert_eq!(harness.server.connection_count(), 0);
}

#[test]
fn stopping_server_disconnects_clients() {
    let mut server = Server::new(ServerConfig::with_bind_addr("127.0.0.1:0"), Relay::default());
    server.start().unwrap();
    let port = server.local_addr().unwrap().port();

    let mut client = Client::<DemoOp>::new();
    client.connect("127.0.0.1", port).unwrap();
    assert!(wait_until(|| client.state() == ConnectionState::Active));

    assert!(wait_until(|| server.connection_count() == 1));

    server.stop();
    assert!(!server.is_running());
    assert_eq!(server.connection_count(), 0);
    assert_eq!(*server.handler().disconnects.lock(), vec![10000]);
    assert!(server.handler().accepted.lock().iter().all(|c| !c.is_connected()));
    assert!(wait_until(|| !client.is_connected()));
}
