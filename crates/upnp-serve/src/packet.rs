use anyhow::{Context, bail};
use bstr::BStr;

/// Ordered list of SSDP headers. Lookups are case-insensitive, iteration and
/// serialization preserve insertion order and original casing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SsdpHeaders {
    entries: Vec<(String, String)>,
}

impl SsdpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for SsdpHeaders {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }
}

/// One HTTP-like SSDP datagram: a start line plus headers. The body is always
/// empty on the SSDP wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpPacket {
    pub start_line: String,
    pub headers: SsdpHeaders,
}

impl SsdpPacket {
    pub fn new(start_line: impl Into<String>, headers: SsdpHeaders) -> Self {
        Self {
            start_line: start_line.into(),
            headers,
        }
    }

    /// Parse a datagram. Both request shapes (`M-SEARCH * HTTP/1.1`,
    /// `NOTIFY * HTTP/1.1`) and response shapes (`HTTP/1.1 200 OK`) are
    /// accepted; header order is preserved.
    pub fn parse(buf: &[u8]) -> anyhow::Result<SsdpPacket> {
        let mut headers = [httparse::EMPTY_HEADER; 32];

        let (start_line, parsed_headers) = if buf.starts_with(b"HTTP/") {
            let mut resp = httparse::Response::new(&mut headers);
            let status = resp
                .parse(buf)
                .with_context(|| format!("error parsing response {:?}", BStr::new(buf)))?;
            if status.is_partial() {
                bail!("truncated SSDP response");
            }
            let code = resp.code.context("response missing status code")?;
            let reason = resp.reason.unwrap_or("");
            (format!("HTTP/1.1 {code} {reason}"), resp.headers)
        } else {
            let mut req = httparse::Request::new(&mut headers);
            let status = req
                .parse(buf)
                .with_context(|| format!("error parsing request {:?}", BStr::new(buf)))?;
            if status.is_partial() {
                bail!("truncated SSDP request");
            }
            let method = req.method.context("request missing method")?;
            let path = req.path.context("request missing path")?;
            (format!("{method} {path} HTTP/1.1"), req.headers)
        };

        let mut out = SsdpHeaders::new();
        for header in parsed_headers.iter() {
            let value = std::str::from_utf8(header.value)
                .with_context(|| format!("non-utf8 value in header {}", header.name))?;
            out.push(header.name, value);
        }

        Ok(SsdpPacket {
            start_line,
            headers: out,
        })
    }

    /// Serialize in wire order: start line, headers as inserted, blank line.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::with_capacity(64 + self.headers.len() * 32);
        out.push_str(&self.start_line);
        out.push_str("\r\n");
        for (name, value) in self.headers.iter() {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out.into_bytes()
    }
}
