//! Incremental scanner for modem responses.
//!
//! Bytes from the serial port accumulate in a bounded [`ResponseBuffer`];
//! completion is detected by substring search. The parsers below turn the
//! informational lines the transport cares about into structured values.

/// Upper bound on buffered response bytes.
pub const MAX_RESPONSE_LEN: usize = 1024;

/// Bounded accumulator for modem output.
///
/// On overflow the oldest bytes are discarded; terminators are always near the
/// end of a response, so the tail is what matters.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    data: Vec<u8>,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(128),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Lossy text view for matching and logging.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        if self.data.len() > MAX_RESPONSE_LEN {
            let excess = self.data.len() - MAX_RESPONSE_LEN;
            self.data.drain(..excess);
        }
    }

    /// Byte offset of the first occurrence of `needle`.
    pub fn find(&self, needle: &str) -> Option<usize> {
        find_bytes(&self.data, needle.as_bytes())
    }

    /// Like [`find`](Self::find), starting the search at byte `from`.
    pub fn find_from(&self, needle: &str, from: usize) -> Option<usize> {
        let tail = self.data.get(from..)?;
        find_bytes(tail, needle.as_bytes()).map(|pos| from + pos)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.find(needle).is_some()
    }

    /// Offset just past the first `\n` at or after `from`.
    pub fn line_end(&self, from: usize) -> Option<usize> {
        self.data
            .get(from..)?
            .iter()
            .position(|&b| b == b'\n')
            .map(|pos| from + pos + 1)
    }

    /// Remove and return the first `count` bytes.
    pub fn consume(&mut self, count: usize) -> Vec<u8> {
        let count = count.min(self.data.len());
        self.data.drain(..count).collect()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Network registration status from `+CREG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    NotSearching,
    Home,
    Searching,
    Denied,
    Unknown,
    Roaming,
}

impl Registration {
    /// Parse the `<stat>` field of a `+CREG: <n>,<stat>[,...]` line.
    pub fn parse_creg(text: &str) -> Option<Self> {
        let rest = field_after(text, "+CREG:")?;
        let stat = rest.split(',').nth(1)?.trim();
        let stat = stat
            .split(|c: char| !c.is_ascii_digit())
            .next()
            .and_then(|digits| digits.parse::<u8>().ok())?;
        Some(match stat {
            0 => Self::NotSearching,
            1 => Self::Home,
            2 => Self::Searching,
            3 => Self::Denied,
            5 => Self::Roaming,
            _ => Self::Unknown,
        })
    }

    pub fn is_registered(self) -> bool {
        matches!(self, Self::Home | Self::Roaming)
    }
}

/// Parse the RSSI index from `+CSQ: <rssi>,<ber>`.
pub fn parse_csq(text: &str) -> Option<u8> {
    let rest = field_after(text, "+CSQ:")?;
    rest.split(',').next()?.trim().parse().ok()
}

/// Header of a manual-receive data response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxHeader {
    /// Bytes that follow this header.
    pub len: usize,
    /// Bytes still waiting in the modem after this read.
    pub remaining: usize,
}

/// Parse `+CIPRXGET: 2,<len>,<remaining>`.
///
/// Returns `None` until the whole header line (including its newline) is present.
pub fn parse_rxget_header(text: &str) -> Option<RxHeader> {
    let start = text.find("+CIPRXGET: 2,")?;
    let line = &text[start..];
    let line = &line[..line.find('\n')?];
    let mut fields = line["+CIPRXGET: 2,".len()..].trim().split(',');
    let len = fields.next()?.trim().parse().ok()?;
    let remaining = fields
        .next()
        .and_then(|f| f.trim().parse().ok())
        .unwrap_or(0);
    Some(RxHeader { len, remaining })
}

/// Extract the dotted-quad address from a `AT+CIFSR` response.
///
/// `CIFSR` has no final `OK`, so only a complete line is accepted.
pub fn parse_ip(text: &str) -> Option<String> {
    text.split('\n')
        .rev()
        .skip(1)
        .map(str::trim)
        .find(|line| {
            let octets: Vec<&str> = line.split('.').collect();
            octets.len() == 4 && octets.iter().all(|o| o.parse::<u8>().is_ok())
        })
        .map(str::to_string)
}

fn field_after<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let start = text.find(prefix)? + prefix.len();
    let rest = &text[start..];
    let end = rest.find(['\r', '\n']).unwrap_or(rest.len());
    Some(rest[..end].trim())
}
