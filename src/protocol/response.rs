//! Response header synthesis

use crate::media::ContainerFormat;

/// What happens after a response has been sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Container data follows the header
    Streaming,
    /// The response is complete; close after sending
    Terminal,
    /// An error page; close after sending
    Error,
}

impl ResponseKind {
    /// Whether the connection closes once the response is drained
    pub fn closes(&self) -> bool {
        !matches!(self, ResponseKind::Streaming)
    }
}

/// A staged response
#[derive(Debug, Clone)]
pub struct Response {
    pub kind: ResponseKind,
    pub bytes: Vec<u8>,
}

impl Response {
    /// Header for a streamed body in the given format
    pub fn streaming(format: ContainerFormat) -> Self {
        let mut head = format!(
            "HTTP/1.0 200 OK\r\nContent-type: {}\r\nPragma: no-cache\r\n",
            format.content_type()
        );
        if format.broadcast_pragma() {
            head.push_str("Pragma: features=\"broadcast\"\r\n");
        }
        head.push_str("\r\n");

        Self {
            kind: ResponseKind::Streaming,
            bytes: head.into_bytes(),
        }
    }

    /// 404 page naming the requested path
    pub fn not_found(path: &str) -> Self {
        let body = format!(
            "<html><head><title>404 Not Found</title></head>\n\
             <body><h1>Not Found</h1>\n\
             <p>The requested URL /{} was not found on this server.</p>\n\
             </body></html>\n",
            escape_html(path)
        );
        Self {
            kind: ResponseKind::Error,
            bytes: html_response("404 Not Found", &body),
        }
    }

    /// Complete HTML page
    pub fn html(body: &str) -> Self {
        Self {
            kind: ResponseKind::Terminal,
            bytes: html_response("200 OK", body),
        }
    }
}

fn html_response(status: &str, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.0 {}\r\nContent-type: text/html\r\nPragma: no-cache\r\n\r\n{}",
        status, body
    )
    .into_bytes()
}

/// Escape text for inclusion in HTML
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}
