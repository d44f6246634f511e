//! HTTP/1.1 protocol handler.
//!
//! Framing scans the staged bytes for the end of the header block and
//! decides complete / need-more / malformed; parsing and response building
//! run on a worker thread. Responses are serialized in full, copied into
//! the connection's write ring in bounded chunks, and any remainder is
//! parked in the spill buffer for the reactor to stream out across writes.

use std::path::{Path, PathBuf};

use bytes::BytesMut;
use reactor::conn::{Connection, ParseResult, TaskType};
use reactor::dispatch::ProtocolHandler;

use crate::metrics::{
    FRAMING_ERRORS, HTTP_REQUESTS, RESPONSES_CLIENT_ERROR, RESPONSES_OK, RESPONSES_SERVER_ERROR,
    STATIC_FILES_MISSING, STATIC_FILES_SERVED,
};

/// Token reported in the `Server:` response header.
pub const SERVER_TOKEN: &str = "brazier/1.0";

/// Per-copy cap when emitting response bytes into the write ring.
const EMIT_CHUNK: usize = 4096;

const CRLF_CRLF: &[u8] = b"\r\n\r\n";

const METHOD_PREFIXES: [&[u8]; 6] = [
    b"GET ",
    b"POST ",
    b"PUT ",
    b"DELETE ",
    b"HEAD ",
    b"OPTIONS ",
];

/// Framing decision over the staged request bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Not a full message yet. `pending` is the exact missing byte count
    /// once the header block (and Content-Length) has been seen, else 0.
    NeedMore { pending: usize },
    /// Exactly one full message of `total` bytes is staged.
    Complete {
        total: usize,
        header_end: usize,
        content_length: usize,
    },
    /// Content-Length present but unparseable.
    Invalid,
    /// Transfer-Encoding: chunked, which is not supported.
    Chunked,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Decide framing for the staged bytes. Pure: calling it twice on the same
/// buffer yields the same answer and mutates nothing.
pub fn frame_status(data: &[u8]) -> Framing {
    let Some(header_end) = find(data, CRLF_CRLF) else {
        return Framing::NeedMore { pending: 0 };
    };
    let header = &data[..header_end + 4];

    if let Some(pos) = find(header, b"Content-Length:") {
        let after = &header[pos + b"Content-Length:".len()..];
        let line_end = find(after, b"\r\n").unwrap_or(after.len());
        let value = after[..line_end].trim_ascii();

        if value.is_empty() || !value.iter().all(|b| b.is_ascii_digit()) {
            return Framing::Invalid;
        }
        let Ok(content_length) = std::str::from_utf8(value)
            .expect("digits are valid UTF-8")
            .parse::<usize>()
        else {
            return Framing::Invalid;
        };

        let total = header_end + 4 + content_length;
        if data.len() >= total {
            return Framing::Complete {
                total,
                header_end,
                content_length,
            };
        }
        return Framing::NeedMore {
            pending: total - data.len(),
        };
    }

    if let Some(pos) = find(header, b"Transfer-Encoding:") {
        let after = &header[pos + b"Transfer-Encoding:".len()..];
        let line_end = find(after, b"\r\n").unwrap_or(after.len());
        if find(&after[..line_end], b"chunked").is_some() {
            return Framing::Chunked;
        }
    }

    // Header-only message (GET and friends).
    Framing::Complete {
        total: header_end + 4,
        header_end,
        content_length: 0,
    }
}

/// A parsed request.
#[derive(Debug)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Parse one complete message. `data` must hold exactly `total` bytes as
/// reported by [`frame_status`].
pub fn parse_request(data: &[u8], header_end: usize, content_length: usize) -> Option<Request> {
    let header = &data[..header_end];
    let line_end = find(header, b"\r\n").unwrap_or(header.len());
    let request_line = std::str::from_utf8(&header[..line_end]).ok()?;

    let mut parts = request_line.split(' ').filter(|s| !s.is_empty());
    let method = parts.next()?.to_string();
    let mut url = parts.next()?.to_string();
    let version = parts.next().unwrap_or("HTTP/1.0").to_string();
    if !url.starts_with('/') {
        url.insert(0, '/');
    }

    let mut headers = Vec::new();
    if line_end + 2 <= header.len() {
        for line in header[line_end + 2..].split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.is_empty() {
                continue;
            }
            let Some(colon) = line.iter().position(|&b| b == b':') else {
                continue;
            };
            let key = String::from_utf8_lossy(&line[..colon]).to_string();
            let value = String::from_utf8_lossy(line[colon + 1..].trim_ascii()).to_string();
            headers.push((key, value));
        }
    }

    let body_start = header_end + 4;
    let body = data.get(body_start..body_start + content_length)?.to_vec();

    Some(Request {
        method,
        url,
        version,
        headers,
        body,
    })
}

struct Response {
    status: u16,
    reason: &'static str,
    content_type: String,
    body: Vec<u8>,
}

impl Response {
    fn html(status: u16, reason: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Response {
            status,
            reason,
            content_type: "text/html; charset=utf-8".to_string(),
            body: body.into(),
        }
    }
}

fn not_found() -> Response {
    Response::html(404, "Not Found", "<html><body><h1>404 Not Found</h1></body></html>")
}

fn bad_request() -> Response {
    Response::html(400, "Bad Request", "<html><body><h1>400 Bad Request</h1></body></html>")
}

/// Serialize `response` and move it toward the peer: into the write ring in
/// bounded chunks, remainder into the spill buffer.
pub(crate) fn emit_response(
    conn: &mut Connection,
    status: u16,
    reason: &str,
    content_type: &str,
    body: &[u8],
) {
    let mut serialized = BytesMut::with_capacity(256 + body.len());
    serialized.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", status, reason).as_bytes());
    serialized.extend_from_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
    serialized.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    serialized.extend_from_slice(b"Connection: keep-alive\r\n");
    serialized.extend_from_slice(format!("Server: {}\r\n", SERVER_TOKEN).as_bytes());
    serialized.extend_from_slice(b"\r\n");
    serialized.extend_from_slice(body);

    let mut written = 0;
    while written < serialized.len() {
        let span = conn
            .write_ring
            .contiguous_writable()
            .min(EMIT_CHUNK)
            .min(serialized.len() - written);
        if span == 0 {
            break;
        }
        unsafe {
            std::ptr::copy_nonoverlapping(
                serialized.as_ptr().add(written),
                conn.write_ring.write_tail(),
                span,
            );
        }
        conn.write_ring.write_data(span);
        written += span;
    }
    conn.response_spill.extend_from_slice(&serialized[written..]);

    match status {
        200..=299 => RESPONSES_OK.increment(),
        400..=499 => RESPONSES_CLIENT_ERROR.increment(),
        _ => RESPONSES_SERVER_ERROR.increment(),
    };
}

/// Streaming-friendly HTTP/1.1 handler serving a fixed route set plus
/// static files under a configured root.
pub struct HttpHandler {
    static_root: PathBuf,
}

impl HttpHandler {
    pub fn new(static_root: impl Into<PathBuf>) -> Self {
        HttpHandler {
            static_root: static_root.into(),
        }
    }

    fn greeting(&self) -> Response {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let body = format!(
            "<html><body>\
             <h1>Welcome to brazier</h1>\
             <p>Current time: {}</p>\
             <p><a href=\"/list1.html\">sample page</a></p>\
             </body></html>",
            now
        );
        Response::html(200, "OK", body)
    }

    fn serve_static(&self, url: &str) -> Response {
        let Some(name) = sanitized_file_name(url) else {
            STATIC_FILES_MISSING.increment();
            return not_found();
        };

        let path = self.static_root.join(name);
        match std::fs::read(&path) {
            Ok(body) => {
                STATIC_FILES_SERVED.increment();
                Response {
                    status: 200,
                    reason: "OK",
                    content_type: content_type_for(&path).to_string(),
                    body,
                }
            }
            Err(e) => {
                tracing::debug!(?path, "static file unavailable: {e}");
                STATIC_FILES_MISSING.increment();
                not_found()
            }
        }
    }

    fn route(&self, req: &Request) -> Response {
        match req.method.as_str() {
            "GET" => match req.url.as_str() {
                "/" | "/index.html" => self.greeting(),
                "/health" => Response {
                    status: 200,
                    reason: "OK",
                    content_type: "text/plain; charset=utf-8".to_string(),
                    body: b"OK".to_vec(),
                },
                _ => self.serve_static(&req.url),
            },
            "POST" => Response::html(
                200,
                "OK",
                format!(
                    "<html><body>\
                     <h1>POST received</h1>\
                     <p>URL: {}</p>\
                     </body></html>",
                    req.url
                ),
            ),
            _ => Response::html(
                405,
                "Method Not Allowed",
                "<html><body><h1>405 Method Not Allowed</h1></body></html>",
            ),
        }
    }
}

impl ProtocolHandler for HttpHandler {
    fn name(&self) -> TaskType {
        TaskType::Http
    }

    fn can_claim(&self, conn: &Connection) -> bool {
        let probe = conn.read_ring.readable_slice();
        if probe.len() < 4 {
            return false;
        }
        METHOD_PREFIXES.iter().any(|m| probe.starts_with(m))
    }

    fn is_frame_complete(&self, conn: &mut Connection) -> bool {
        if conn.parse_result == ParseResult::Complete {
            // The overflow read already completed the frame.
            return true;
        }

        let framing = frame_status(&conn.frame());
        match framing {
            Framing::Complete { .. } => {
                conn.parse_result = ParseResult::Complete;
                conn.bytes_pending = 0;
                true
            }
            Framing::NeedMore { pending } => {
                conn.parse_result = ParseResult::NeedMore;
                conn.bytes_pending = pending;
                false
            }
            Framing::Invalid => {
                conn.parse_result = ParseResult::InvalidFormat;
                false
            }
            Framing::Chunked => {
                conn.parse_result = ParseResult::ChunkedUnsupported;
                false
            }
        }
    }

    fn handle(&self, conn: &mut Connection) {
        match conn.parse_result {
            ParseResult::ChunkedUnsupported => {
                FRAMING_ERRORS.increment();
                emit_response(
                    conn,
                    501,
                    "Not Implemented",
                    "text/plain; charset=utf-8",
                    b"Chunked encoding not supported",
                );
                conn.close_after_write = true;
            }
            ParseResult::InvalidFormat => {
                FRAMING_ERRORS.increment();
                let resp = bad_request();
                emit_response(conn, resp.status, resp.reason, &resp.content_type, &resp.body);
                conn.close_after_write = true;
            }
            _ => {
                let parsed = {
                    let data = conn.frame();
                    match frame_status(&data) {
                        Framing::Complete {
                            total,
                            header_end,
                            content_length,
                        } => parse_request(&data[..total], header_end, content_length)
                            .map(|req| (req, total)),
                        _ => None,
                    }
                };

                match parsed {
                    Some((req, total)) => {
                        HTTP_REQUESTS.increment();
                        tracing::debug!(
                            method = %req.method,
                            url = %req.url,
                            version = %req.version,
                            "handling request"
                        );
                        let resp = self.route(&req);
                        emit_response(conn, resp.status, resp.reason, &resp.content_type, &resp.body);
                        conn.consume_frame(total);
                        conn.parse_result = ParseResult::NeedMore;
                        conn.bytes_pending = 0;
                    }
                    None => {
                        FRAMING_ERRORS.increment();
                        let resp = bad_request();
                        emit_response(conn, resp.status, resp.reason, &resp.content_type, &resp.body);
                        conn.close_after_write = true;
                    }
                }
            }
        }
    }
}

/// Strip the leading slash and refuse anything that could escape the
/// static root: empty names, absolute paths, NUL bytes, `..` segments.
fn sanitized_file_name(url: &str) -> Option<&str> {
    let name = url.strip_prefix('/').unwrap_or(url);
    if name.is_empty() || name.contains('\0') || name.starts_with('/') {
        return None;
    }
    if name.split('/').any(|segment| segment == ".." || segment.is_empty()) {
        return None;
    }
    Some(name)
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "text/html; charset=utf-8",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn new_conn() -> Connection {
        Connection::with_ring_capacity(32 * 1024)
    }

    fn handler() -> HttpHandler {
        HttpHandler::new("./html")
    }

    /// Push request bytes through claim/frame/handle and collect the
    /// response (write ring plus spill).
    fn run_request(handler: &HttpHandler, conn: &mut Connection, request: &[u8]) -> String {
        conn.read_ring.write_from(request);
        assert!(handler.can_claim(conn), "handler must claim the request");
        handler.is_frame_complete(conn);
        handler.handle(conn);
        collect_response(conn)
    }

    fn collect_response(conn: &mut Connection) -> String {
        let (a, b) = conn.write_ring.readable_slices();
        let mut out = Vec::new();
        out.extend_from_slice(a);
        out.extend_from_slice(b);
        out.extend_from_slice(&conn.response_spill);
        let n = conn.write_ring.readable_size();
        conn.write_ring.read_data(n);
        conn.response_spill.clear();
        String::from_utf8_lossy(&out).to_string()
    }

    // --- framing ---

    #[test]
    fn framing_needs_more_without_header_end() {
        assert_eq!(
            frame_status(b"GET / HTTP/1.1\r\nHost: x\r\n"),
            Framing::NeedMore { pending: 0 }
        );
    }

    #[test]
    fn framing_completes_header_only_requests() {
        let req = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        assert_eq!(
            frame_status(req),
            Framing::Complete {
                total: req.len(),
                header_end: req.len() - 4,
                content_length: 0
            }
        );
    }

    #[test]
    fn framing_tracks_missing_body_bytes() {
        let req = b"POST /submit HTTP/1.1\r\nContent-Length: 10\r\n\r\nhel";
        assert_eq!(frame_status(req), Framing::NeedMore { pending: 7 });

        let full = b"POST /submit HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc";
        assert!(matches!(
            frame_status(full),
            Framing::Complete {
                content_length: 3,
                ..
            }
        ));
    }

    #[test]
    fn framing_trims_content_length_whitespace() {
        let req = b"POST / HTTP/1.1\r\nContent-Length:   5  \r\n\r\nhello";
        assert!(matches!(
            frame_status(req),
            Framing::Complete {
                content_length: 5,
                ..
            }
        ));
    }

    #[test]
    fn framing_rejects_bad_content_length() {
        assert_eq!(
            frame_status(b"POST / HTTP/1.1\r\nContent-Length: 12a\r\n\r\n"),
            Framing::Invalid
        );
        assert_eq!(
            frame_status(b"POST / HTTP/1.1\r\nContent-Length:    \r\n\r\n"),
            Framing::Invalid
        );
    }

    #[test]
    fn framing_flags_chunked_encoding() {
        assert_eq!(
            frame_status(b"GET / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n"),
            Framing::Chunked
        );
    }

    #[test]
    fn framing_is_idempotent() {
        let req = b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nab";
        let first = frame_status(req);
        let second = frame_status(req);
        assert_eq!(first, second);
    }

    // --- parsing ---

    #[test]
    fn parses_request_line_and_headers() {
        let raw = b"POST /submit HTTP/1.1\r\nHost: example\r\nX-Thing:  padded \r\n\r\nhello";
        let Framing::Complete {
            total,
            header_end,
            content_length,
        } = frame_status(raw)
        else {
            panic!("expected a complete frame");
        };
        let req = parse_request(&raw[..total], header_end, content_length).unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.url, "/submit");
        assert_eq!(req.version, "HTTP/1.1");
        assert_eq!(req.body, b"hello");
        assert!(req
            .headers
            .iter()
            .any(|(k, v)| k == "X-Thing" && v == "padded"));
    }

    #[test]
    fn parse_prepends_missing_slash() {
        let raw = b"GET index.html HTTP/1.1\r\n\r\n";
        let req = parse_request(raw, raw.len() - 4, 0).unwrap();
        assert_eq!(req.url, "/index.html");
    }

    // --- handling ---

    #[test]
    fn get_root_serves_the_greeting() {
        let mut conn = new_conn();
        let resp = run_request(&handler(), &mut conn, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(resp.contains("Welcome"));
        assert!(resp.contains("Connection: keep-alive"));
        assert!(resp.contains(&format!("Server: {}", SERVER_TOKEN)));
        // Timestamp in the body.
        assert!(resp.contains("Current time: "));
        assert!(conn.read_ring.is_empty());
        assert_eq!(conn.parse_result, ParseResult::NeedMore);
    }

    #[test]
    fn get_health_returns_ok() {
        let mut conn = new_conn();
        let resp = run_request(&handler(), &mut conn, b"GET /health HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(resp.ends_with("OK"));
    }

    #[test]
    fn missing_file_returns_404() {
        let dir = tempfile::tempdir().unwrap();
        let handler = HttpHandler::new(dir.path());
        let mut conn = new_conn();
        let resp = run_request(
            &handler,
            &mut conn,
            b"GET /missing.html HTTP/1.1\r\nHost: x\r\n\r\n",
        );
        assert!(resp.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(resp.contains("404"));
    }

    #[test]
    fn static_file_is_served_with_its_mime_type() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("style.css")).unwrap();
        file.write_all(b"body { color: red; }").unwrap();

        let handler = HttpHandler::new(dir.path());
        let mut conn = new_conn();
        let resp = run_request(
            &handler,
            &mut conn,
            b"GET /style.css HTTP/1.1\r\nHost: x\r\n\r\n",
        );
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(resp.contains("Content-Type: text/css"));
        assert!(resp.contains("body { color: red; }"));
    }

    #[test]
    fn post_is_acknowledged() {
        let mut conn = new_conn();
        let resp = run_request(
            &handler(),
            &mut conn,
            b"POST /submit HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello",
        );
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(resp.contains("POST"));
        assert!(conn.read_ring.is_empty());
    }

    #[test]
    fn post_with_empty_body_is_acknowledged() {
        let mut conn = new_conn();
        let resp = run_request(
            &handler(),
            &mut conn,
            b"POST /submit HTTP/1.1\r\nHost: x\r\nContent-Length: 0\r\n\r\n",
        );
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(resp.contains("POST"));
    }

    #[test]
    fn chunked_encoding_gets_501() {
        let mut conn = new_conn();
        let resp = run_request(
            &handler(),
            &mut conn,
            b"GET / HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n",
        );
        assert!(resp.starts_with("HTTP/1.1 501 Not Implemented\r\n"));
        assert!(resp.contains("Chunked encoding not supported"));
        assert!(conn.close_after_write);
    }

    #[test]
    fn unhandled_method_gets_405() {
        let mut conn = new_conn();
        let resp = run_request(&handler(), &mut conn, b"DELETE /x HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(resp.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
    }

    #[test]
    fn bad_content_length_gets_400_and_close() {
        let mut conn = new_conn();
        let resp = run_request(
            &handler(),
            &mut conn,
            b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: abc\r\n\r\n",
        );
        assert!(resp.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(conn.close_after_write);
    }

    #[test]
    fn content_length_is_exact_in_responses() {
        let mut conn = new_conn();
        let resp = run_request(&handler(), &mut conn, b"GET /health HTTP/1.1\r\nHost: x\r\n\r\n");
        let header_end = resp.find("\r\n\r\n").unwrap();
        let body = &resp[header_end + 4..];
        let cl: usize = resp
            .lines()
            .find_map(|l| l.strip_prefix("Content-Length: "))
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(cl, body.len());
    }

    #[test]
    fn traversal_attempts_are_rejected() {
        assert!(sanitized_file_name("/../etc/passwd").is_none());
        assert!(sanitized_file_name("/a/../../etc/passwd").is_none());
        assert!(sanitized_file_name("//etc/passwd").is_none());
        assert!(sanitized_file_name("/file\0.html").is_none());
        assert!(sanitized_file_name("/").is_none());
        assert_eq!(sanitized_file_name("/list1.html"), Some("list1.html"));
        assert_eq!(sanitized_file_name("/css/site.css"), Some("css/site.css"));

        let dir = tempfile::tempdir().unwrap();
        let handler = HttpHandler::new(dir.path());
        let mut conn = new_conn();
        let resp = run_request(
            &handler,
            &mut conn,
            b"GET /../etc/passwd HTTP/1.1\r\nHost: x\r\n\r\n",
        );
        assert!(resp.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn oversized_response_spills_past_the_write_ring() {
        let dir = tempfile::tempdir().unwrap();
        let big = vec![b'x'; 8 * 1024];
        std::fs::write(dir.path().join("big.html"), &big).unwrap();

        let handler = HttpHandler::new(dir.path());
        // Write ring far smaller than the response.
        let mut conn = Connection::with_ring_capacity(1024);
        conn.read_ring.write_from(b"GET /big.html HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(handler.can_claim(&conn));
        handler.is_frame_complete(&mut conn);
        handler.handle(&mut conn);

        let staged = conn.write_ring.readable_size();
        let spilled = conn.response_spill.len();
        assert!(staged <= 1023);
        assert!(spilled > 0);
        assert_eq!(staged + spilled, collect_response(&mut conn).len());
    }

    #[test]
    fn two_pipelined_requests_are_consumed_one_at_a_time() {
        let mut conn = new_conn();
        let pipelined = b"GET / HTTP/1.1\r\nHost: x\r\n\r\nGET /health HTTP/1.1\r\nHost: x\r\n\r\n";
        let first = run_request(&handler(), &mut conn, pipelined);
        assert!(first.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(!conn.read_ring.is_empty(), "second request still staged");

        // Second pass over the leftovers.
        let h = handler();
        assert!(h.can_claim(&conn));
        assert!(h.is_frame_complete(&mut conn));
        h.handle(&mut conn);
        let second = collect_response(&mut conn);
        assert!(second.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(conn.read_ring.is_empty());
    }
}
