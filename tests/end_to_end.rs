use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use emhttp::{Config, Daemon, RequestDispatch, Response, Status};

fn spawn_daemon(dispatch: RequestDispatch) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let daemon = Arc::new(Daemon::new(Config::new().done(), Arc::new(dispatch)));
    let bg = daemon.clone();
    thread::spawn(move || {
        let _ = bg.listen_and_serve(addr);
    });
    thread::sleep(Duration::from_millis(100));
    addr
}

fn roundtrip(addr: std::net::SocketAddr, request: &[u8]) -> String {
    let mut client = TcpStream::connect(addr).expect("connect");
    client.write_all(request).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let mut resp = String::new();
    let _ = client.read_to_string(&mut resp);
    resp
}

#[test]
fn simple_get() {
    let mut dispatch = RequestDispatch::new();
    dispatch.add_handler("/hello", |_req| {
        Response::from_buffer(Status::Ok, b"world".to_vec())
    });
    let addr = spawn_daemon(dispatch);

    let resp = roundtrip(addr, b"GET /hello HTTP/1.1\r\nConnection: close\r\n\r\n");
    assert!(resp.starts_with("HTTP/1.1 200"));
    assert!(resp.ends_with("world"));
}

#[test]
fn unmatched_path_is_404() {
    let dispatch = RequestDispatch::new();
    let addr = spawn_daemon(dispatch);

    let resp = roundtrip(addr, b"GET /nope HTTP/1.1\r\nConnection: close\r\n\r\n");
    assert!(resp.starts_with("HTTP/1.1 404"));
}

#[test]
fn cookie_and_folded_header_reach_handler() {
    let mut dispatch = RequestDispatch::new();
    dispatch.add_handler("/echo", |req| {
        let session = req.cookie("session").unwrap_or("").to_owned();
        let folded = req.header("X-Long").unwrap_or("").to_owned();
        Response::from_buffer(Status::Ok, format!("{}|{}", session, folded).into_bytes())
    });
    let addr = spawn_daemon(dispatch);

    let request = b"GET /echo HTTP/1.1\r\n\
        Cookie: session=abc123\r\n\
        X-Long: first\r\n \tsecond\r\n\
        Connection: close\r\n\r\n";
    let resp = roundtrip(addr, request);
    assert!(resp.contains("abc123|first second"));
}

#[test]
fn chunked_upload_is_decoded_for_handler() {
    let mut dispatch = RequestDispatch::new();
    dispatch.add_handler("/upload", |req| {
        Response::from_buffer(Status::Ok, req.body.to_vec())
    });
    let addr = spawn_daemon(dispatch);

    let request = b"POST /upload HTTP/1.1\r\n\
        Transfer-Encoding: chunked\r\n\
        Connection: close\r\n\r\n\
        5\r\nhello\r\n0\r\n\r\n";
    let resp = roundtrip(addr, request);
    assert!(resp.ends_with("hello"));
}

#[test]
fn head_request_has_no_body() {
    let mut dispatch = RequestDispatch::new();
    dispatch.add_handler("/hello", |_req| {
        Response::from_buffer(Status::Ok, b"world".to_vec())
    });
    let addr = spawn_daemon(dispatch);

    let resp = roundtrip(addr, b"HEAD /hello HTTP/1.1\r\nConnection: close\r\n\r\n");
    assert!(resp.starts_with("HTTP/1.1 200"));
    assert!(!resp.contains("world"));
}
