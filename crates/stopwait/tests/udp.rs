use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use stopwait::{
    ClientConfig, Error, EventLoop, FaultModel, FaultRng, FileRoot, FileServer, LossyTransport,
    RetryDecision, ServerConfig, ServerEvent, Transfer, Transport, UdpTransport,
};

struct RunningServer {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    handle: JoinHandle<Vec<ServerEvent>>,
}

impl RunningServer {
    fn stop(self) -> Vec<ServerEvent> {
        self.running.store(false, Ordering::SeqCst);
        self.handle.join().unwrap()
    }
}

fn spawn_server<T: Transport + Send + 'static>(root: &Path, transport: T) -> RunningServer {
    let config = ServerConfig {
        timeout: Duration::from_millis(50),
        max_tries: 40,
        ..Default::default()
    };
    let addr = transport.local_addr();
    let mut event_loop = EventLoop::new(transport, config.timeout);
    let mut server = FileServer::new(FileRoot::new(root).unwrap(), config);
    let running = event_loop.running();

    let handle = thread::spawn(move || {
        let flag = event_loop.running();
        let mut events = Vec::new();
        // sessions still lingering get to finish before the thread exits
        while flag.load(Ordering::SeqCst) || !server.is_idle() {
            event_loop.poll_once(&mut server).unwrap();
            events.extend(server.drain_events());
        }
        events
    });

    RunningServer {
        addr,
        running,
        handle,
    }
}

fn fetch(server: SocketAddr, filename: &str) -> (Result<(), Error>, Vec<u8>) {
    let config = ClientConfig {
        timeout: Duration::from_millis(50),
        max_tries: 20,
    };
    let transport = UdpTransport::bind("127.0.0.1:0").unwrap();
    let mut event_loop = EventLoop::new(transport, config.timeout);
    let mut transfer = Transfer::new(server, filename, Vec::new(), config)
        .with_decider(|_: u32| RetryDecision::Stop);

    transfer.start(event_loop.transport_mut()).unwrap();
    event_loop.run(&mut transfer).unwrap();

    let result = transfer.result().map(|_| ());
    (result, transfer.into_sink())
}

#[test]
fn test_udp_transfer_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let contents: Vec<u8> = (0..5000u32).map(|i| (i % 256) as u8).collect();
    fs::write(dir.path().join("payload.bin"), &contents).unwrap();
    fs::write(dir.path().join("hello.txt"), b"hi").unwrap();

    let server = spawn_server(dir.path(), UdpTransport::bind("127.0.0.1:0").unwrap());

    let (result, received) = fetch(server.addr, "hello.txt");
    result.unwrap();
    assert_eq!(received, b"hi");

    let (result, received) = fetch(server.addr, "payload.bin");
    result.unwrap();
    assert_eq!(received, contents);

    let events = server.stop();
    let completed = events
        .iter()
        .filter(|e| matches!(e, ServerEvent::SessionCompleted { .. }))
        .count();
    assert_eq!(completed, 2);
}

#[test]
fn test_udp_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let server = spawn_server(dir.path(), UdpTransport::bind("127.0.0.1:0").unwrap());

    let (result, received) = fetch(server.addr, "missing.txt");
    assert!(matches!(result, Err(Error::Remote(ref reason)) if reason.contains("missing.txt")));
    assert!(received.is_empty());

    let events = server.stop();
    assert!(matches!(events[0], ServerEvent::RequestDenied { .. }));
}

#[test]
fn test_udp_traversal_is_denied() {
    let outer = tempfile::tempdir().unwrap();
    fs::write(outer.path().join("secret.txt"), b"secret").unwrap();
    let base = outer.path().join("public");
    fs::create_dir(&base).unwrap();

    let server = spawn_server(&base, UdpTransport::bind("127.0.0.1:0").unwrap());

    let (result, received) = fetch(server.addr, "../secret.txt");
    assert!(matches!(result, Err(Error::Remote(_))));
    assert!(received.is_empty());

    server.stop();
}

#[test]
fn test_udp_transfer_survives_loss() {
    let dir = tempfile::tempdir().unwrap();
    let contents: Vec<u8> = (0..2000u32).map(|i| (i * 13 % 256) as u8).collect();
    fs::write(dir.path().join("lossy.bin"), &contents).unwrap();

    let transport = LossyTransport::with_rng(
        UdpTransport::bind("127.0.0.1:0").unwrap(),
        FaultModel::lossy(25.0),
        FaultRng::seeded(42),
    );
    let server = spawn_server(dir.path(), transport);

    let (result, received) = fetch(server.addr, "lossy.bin");
    result.unwrap();
    assert_eq!(received, contents);

    server.stop();
}
