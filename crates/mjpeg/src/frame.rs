use bytes::Bytes;

/// Header lines of a single multipart record, in wire order.
///
/// Lookups are ASCII case-insensitive on the header name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameHeaders {
    entries: Vec<(String, String)>,
}

impl FrameHeaders {
    /// Parse a CRLF separated header block. Lines without a `:` (such as the
    /// empty line that follows the boundary token) are ignored.
    pub fn parse(block: &[u8]) -> Self {
        let entries = block
            .split(|&b| b == b'\n')
            .filter_map(|line| {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                let colon = line.iter().position(|&b| b == b':')?;
                let name = String::from_utf8_lossy(&line[..colon]).trim().to_string();
                if name.is_empty() {
                    return None;
                }
                let value = String::from_utf8_lossy(&line[colon + 1..])
                    .trim()
                    .to_string();
                Some((name, value))
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Declared payload length. `None` if the header is absent or not a
    /// non-negative integer.
    pub fn content_length(&self) -> Option<usize> {
        self.get("content-length")?.parse().ok()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get("content-type")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A complete frame extracted from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    headers: FrameHeaders,
    payload: Bytes,
}

impl FrameRecord {
    pub fn new(headers: FrameHeaders, payload: Bytes) -> Self {
        Self { headers, payload }
    }

    pub fn headers(&self) -> &FrameHeaders {
        &self.headers
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
