//! Drives the `chat-server` binary as a child process.

use chat_relay::protocol::{ChatMessage, MessageKind, FRAME_SIZE};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const BIN: &str = env!("CARGO_BIN_EXE_chat-server");

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn spawn_server(args: &[&str]) -> Child {
    Command::new(BIN)
        .args(args)
        .env("RUST_LOG", "warn")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap()
}

fn wait_exit(child: &mut Child, limit: Duration) -> ExitStatus {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("server did not exit within {limit:?}");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn connect_with_retry(port: u16) -> TcpStream {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(stream) => return stream,
            Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
            Err(e) => panic!("server never came up: {e}"),
        }
    }
}

fn read_frame(stream: &mut TcpStream) -> Option<ChatMessage> {
    let mut buf = [0u8; FRAME_SIZE];
    stream.read_exact(&mut buf).ok()?;
    Some(ChatMessage::decode(&buf).unwrap())
}

fn join(port: u16, name: &str) -> TcpStream {
    let mut stream = connect_with_retry(port);
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    stream
        .write_all(&ChatMessage::connect(name).encode())
        .unwrap();
    let welcome = read_frame(&mut stream).unwrap();
    assert_eq!(welcome.kind(), MessageKind::Notification);
    stream
}

#[test]
fn test_sigterm_graceful_shutdown() {
    let port = free_port();
    let mut child = spawn_server(&[&port.to_string(), "--host", "127.0.0.1"]);

    let mut clients: Vec<TcpStream> = ["one", "two", "three"]
        .iter()
        .map(|name| join(port, name))
        .collect();

    // SAFETY: plain kill(2) on our own child.
    let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
    assert_eq!(rc, 0);

    let status = wait_exit(&mut child, Duration::from_secs(10));
    assert_eq!(status.code(), Some(0));

    for stream in &mut clients {
        // Arrival notices may be queued; the stream must still end.
        while let Some(msg) = read_frame(stream) {
            assert!(msg.body().ends_with(" connected]"));
        }
    }
}

#[test]
fn test_invalid_config_exit_code() {
    let mut child = spawn_server(&["--max-clients", "0"]);
    let status = wait_exit(&mut child, Duration::from_secs(10));
    assert_eq!(status.code(), Some(8));
}

#[test]
fn test_port_in_use_exit_code() {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let mut child = spawn_server(&[&port.to_string(), "--host", "127.0.0.1"]);
    let status = wait_exit(&mut child, Duration::from_secs(10));
    assert_eq!(status.code(), Some(2));
}
