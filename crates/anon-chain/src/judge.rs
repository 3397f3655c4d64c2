//! Proxy Judge
//!
//! A judge is a plain-HTTP endpoint that echoes back the request headers it
//! received, one per line, either as `Name: value` or in CGI form
//! (`HTTP_NAME = value`). Fetching it through a proxy shows what the proxy
//! added on the way:
//!
//! | Echoed headers | Anonymity |
//! |----------------|-----------|
//! | `X-Forwarded-For`, `X-Real-IP`, `Forwarded`, `Client-IP` | Transparent |
//! | `Via`, `Proxy-Connection`, `X-Proxy-ID` | Anonymous |
//! | none of the above | Elite |
//!
//! A `Country` (or `X-Country`, `CF-IPCountry`) line gives the country the
//! judge saw the request come from.
//!
//! HTTP and HTTPS proxies get the request in absolute form so they can add
//! their headers; SOCKS proxies get it through the tunnel.

use crate::node::AnonymityLevel;
use crate::probe::ProbeError;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use url::Url;

/// Largest judge reply read before giving up
const REPLY_LIMIT: usize = 64 * 1024;

/// Headers that carry the client's address
const REVEALING_HEADERS: &[&str] = &["x-forwarded-for", "x-real-ip", "forwarded", "client-ip", "x-client-ip"];

/// Headers that only announce a proxy
const PROXY_HEADERS: &[&str] = &["via", "proxy-connection", "x-proxy-id", "x-bluecoat-via"];

const COUNTRY_KEYS: &[&str] = &["country", "x-country", "cf-ipcountry", "country-code"];

/// Where the judge lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgeEndpoint {
    host: String,
    port: u16,
    /// Path and query
    path: String,
}

impl JudgeEndpoint {
    /// Parse an `http://` URL
    pub fn parse(url: &str) -> Result<Self, String> {
        let parsed = Url::parse(url.trim()).map_err(|e| format!("{}: {}", url, e))?;
        if parsed.scheme() != "http" {
            return Err(format!("{}: only http:// judges are supported", url));
        }
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| format!("{}: no host", url))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = parsed.port_or_known_default().unwrap_or(80);

        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self { host, port, path })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == 80 {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    /// Ask an HTTP proxy to fetch the judge for us
    pub(crate) async fn fetch_via_proxy<S>(&self, stream: &mut S) -> Result<JudgeReport, ProbeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let target = format!("http://{}{}", self.authority(), self.path);
        self.fetch(stream, &target).await
    }

    /// Fetch the judge over an already open tunnel
    pub(crate) async fn fetch_in_tunnel<S>(&self, stream: &mut S) -> Result<JudgeReport, ProbeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let target = self.path.clone();
        self.fetch(stream, &target).await
    }

    async fn fetch<S>(&self, stream: &mut S, target: &str) -> Result<JudgeReport, ProbeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nAccept: text/plain\r\nConnection: close\r\n\r\n",
            target,
            self.authority()
        );
        stream.write_all(request.as_bytes()).await?;
        stream.flush().await?;

        let reply = read_reply(stream).await?;
        let text = String::from_utf8_lossy(&reply);
        let (head, body) = text
            .split_once("\r\n\r\n")
            .ok_or_else(|| ProbeError::Protocol("judge reply has no body".into()))?;

        let status_line = head.lines().next().unwrap_or_default();
        let code: u16 = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| ProbeError::Protocol(format!("malformed judge status line: {}", status_line)))?;
        if !(200..300).contains(&code) {
            return Err(ProbeError::Protocol(format!("judge returned {}", code)));
        }

        Ok(JudgeReport::classify(body))
    }
}

/// What the judge saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgeReport {
    pub anonymity: AnonymityLevel,
    /// Uppercase country code, when the judge reports one
    pub country: Option<String>,
}

impl JudgeReport {
    /// Classify an echoed header listing
    pub fn classify(body: &str) -> Self {
        let mut anonymity = AnonymityLevel::Elite;
        let mut country = None;

        for (key, value) in body.lines().filter_map(echoed_header) {
            if REVEALING_HEADERS.contains(&key.as_str()) && !value.is_empty() {
                anonymity = AnonymityLevel::Transparent;
            } else if PROXY_HEADERS.contains(&key.as_str()) {
                anonymity = anonymity.min(AnonymityLevel::Anonymous);
            } else if COUNTRY_KEYS.contains(&key.as_str())
                && value.len() == 2
                && value.chars().all(|c| c.is_ascii_alphabetic())
            {
                country = Some(value.to_ascii_uppercase());
            }
        }

        Self { anonymity, country }
    }
}

/// Split `Name: value` or `HTTP_NAME = value` into a lowercase header name
/// and a trimmed value
fn echoed_header(line: &str) -> Option<(String, &str)> {
    let line = line.trim();
    let (key, value) = match (line.find(':'), line.find('=')) {
        (Some(colon), Some(equals)) => line.split_at(colon.min(equals)),
        (Some(i), None) | (None, Some(i)) => line.split_at(i),
        (None, None) => return None,
    };
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }

    let key = key.to_ascii_lowercase();
    let key = key.strip_prefix("http_").unwrap_or(&key).replace('_', "-");
    Some((key, value[1..].trim()))
}

/// Read a full HTTP reply: until the declared body length or EOF
async fn read_reply<S>(stream: &mut S) -> Result<Vec<u8>, ProbeError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(n) => n,
            // TLS peers often close without close_notify
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && !buf.is_empty() => 0,
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > REPLY_LIMIT {
            return Err(ProbeError::Protocol("judge reply too large".into()));
        }
        if reply_complete(&buf) {
            break;
        }
    }

    if buf.is_empty() {
        return Err(ProbeError::Protocol("judge closed the connection without a reply".into()));
    }
    Ok(buf)
}

fn reply_complete(buf: &[u8]) -> bool {
    let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let head = String::from_utf8_lossy(&buf[..end]);
    let length = head.lines().skip(1).find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse::<usize>().ok()
        } else {
            None
        }
    });

    length.is_some_and(|length| buf.len() >= end + 4 + length)
}
