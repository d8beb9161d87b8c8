//! Blocking HTTP mock servers for backend client tests.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// One canned reply: status line (e.g. `"200 OK"`) and JSON body.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub status_line: String,
    pub body: String,
}

impl ScriptedResponse {
    pub fn new(status_line: &str, body: &str) -> Self {
        Self {
            status_line: status_line.to_string(),
            body: body.to_string(),
        }
    }

    pub fn ok(body: &str) -> Self {
        Self::new("200 OK", body)
    }
}

/// Accepts a single request, captures it, and replies with the given status and body.
/// Returns the base URL and a receiver that yields the captured request.
pub fn spawn_one_shot_server(
    status_line: &str,
    response_body: &str,
) -> (String, mpsc::Receiver<CapturedRequest>) {
    spawn_scripted_server(vec![ScriptedResponse::new(status_line, response_body)])
}

/// Serves `responses` in order, one per connection, then stops listening.
/// Every request is captured in arrival order.
pub fn spawn_scripted_server(
    responses: Vec<ScriptedResponse>,
) -> (String, mpsc::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
    let addr = listener.local_addr().expect("read mock server addr");
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        for reply in responses {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let req = read_http_request(&mut stream);
            if tx.send(req).is_err() {
                return;
            }
            write_response(&mut stream, &reply);
        }
    });

    (format!("http://{addr}"), rx)
}

fn write_response(stream: &mut TcpStream, reply: &ScriptedResponse) {
    let response = format!(
        "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        reply.status_line,
        reply.body.len(),
        reply.body
    );
    let _ = stream.write_all(response.as_bytes());
}

fn header_block_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|idx| idx + 4)
}

fn read_http_request(stream: &mut TcpStream) -> CapturedRequest {
    let mut buf = Vec::new();
    let mut header_end = None;
    let mut headers = HashMap::new();
    let mut method = String::new();
    let mut path = String::new();

    loop {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).expect("read request bytes");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if header_end.is_none() {
            header_end = header_block_end(&buf);
            if let Some(end) = header_end {
                let raw = String::from_utf8_lossy(&buf[..end]).to_string();
                let mut lines = raw.lines();
                if let Some(request_line) = lines.next() {
                    let mut parts = request_line.split_whitespace();
                    method = parts.next().unwrap_or_default().to_string();
                    path = parts.next().unwrap_or_default().to_string();
                }
                for line in lines {
                    if let Some((key, value)) = line.split_once(':') {
                        headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
                    }
                }
            }
        }
        if let Some(end) = header_end {
            if buf.len() >= end + content_length(&headers) {
                break;
            }
        }
    }

    let end = header_end.expect("request headers must be present");
    let body_end = (end + content_length(&headers)).min(buf.len());
    let body = String::from_utf8(buf[end..body_end].to_vec()).expect("utf8 body");

    CapturedRequest {
        method,
        path,
        headers,
        body,
    }
}

fn content_length(headers: &HashMap<String, String>) -> usize {
    headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(addr: &str, raw: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(raw).unwrap();
        let mut resp = String::new();
        stream.read_to_string(&mut resp).unwrap();
        resp
    }

    #[test]
    fn one_shot_server_captures_post_body() {
        let (url, rx) = spawn_one_shot_server("201 Created", r#"{"ok":true}"#);
        let addr = url.trim_start_matches("http://");
        let resp = send(
            addr,
            b"POST /api/v1/x HTTP/1.1\r\nHost: localhost\r\nContent-Length: 7\r\n\r\n{\"a\":1}",
        );
        assert!(resp.contains("201 Created"));
        assert!(resp.ends_with(r#"{"ok":true}"#));
        let req = rx.recv().unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/api/v1/x");
        assert_eq!(req.headers.get("host").map(String::as_str), Some("localhost"));
        assert_eq!(req.body, r#"{"a":1}"#);
    }

    #[test]
    fn scripted_server_replies_in_order() {
        let (url, rx) = spawn_scripted_server(vec![
            ScriptedResponse::ok(r#"{"n":1}"#),
            ScriptedResponse::new("500 Internal Server Error", "nope"),
        ]);
        let addr = url.trim_start_matches("http://");
        let first = send(addr, b"GET /one HTTP/1.1\r\nHost: x\r\n\r\n");
        let second = send(addr, b"GET /two HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(first.contains("200 OK"));
        assert!(second.contains("500 Internal Server Error"));
        assert_eq!(rx.recv().unwrap().path, "/one");
        assert_eq!(rx.recv().unwrap().path, "/two");
    }
}
