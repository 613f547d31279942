use super::error::MetainfoError;
use super::id::TorrentId;
use std::collections::HashMap;

/// A shareable URI form of a torrent identifier.
///
/// Hash identifiers use the `xt` (exact topic) parameter, signature
/// identifiers the `xs` (exact source) parameter, both as hex:
///
/// ```text
/// mbit:?xt=urn:hash:c12fe1c0...&dn=Example
/// mbit:?xs=urn:sig:9f2b44a1...&dn=Example
/// ```
#[derive(Debug, Clone)]
pub struct ContentLink {
    pub id: TorrentId,
    pub display_name: Option<String>,
}

impl ContentLink {
    pub fn new(id: TorrentId) -> Self {
        Self {
            id,
            display_name: None,
        }
    }

    /// Parses a link URI.
    pub fn parse(uri: &str) -> Result<Self, MetainfoError> {
        let query = uri
            .strip_prefix("mbit:?")
            .ok_or_else(|| MetainfoError::InvalidLink("missing mbit:? prefix".into()))?;
        let params = parse_query_string(query);

        let id = if let Some(xt) = params.get("xt").and_then(|v| v.first()) {
            let hex = xt
                .strip_prefix("urn:hash:")
                .ok_or_else(|| MetainfoError::InvalidLink("unsupported xt form".into()))?;
            TorrentId::hash_from_hex(hex)?
        } else if let Some(xs) = params.get("xs").and_then(|v| v.first()) {
            let hex = xs
                .strip_prefix("urn:sig:")
                .ok_or_else(|| MetainfoError::InvalidLink("unsupported xs form".into()))?;
            TorrentId::signature_from_hex(hex)?
        } else {
            return Err(MetainfoError::InvalidLink("missing xt or xs parameter".into()));
        };

        let display_name = params
            .get("dn")
            .and_then(|v| v.first())
            .map(|s| url_decode(s));

        Ok(Self { id, display_name })
    }

    /// Formats the link URI.
    pub fn to_uri(&self) -> String {
        let mut uri = String::from("mbit:?");
        match &self.id {
            TorrentId::Hash(_) => {
                uri.push_str(&format!("xt=urn:hash:{}", self.id.to_hex()));
            }
            TorrentId::Signature(_) => {
                uri.push_str(&format!("xs=urn:sig:{}", self.id.to_hex()));
            }
        }
        if let Some(ref name) = self.display_name {
            uri.push_str(&format!("&dn={}", url_encode(name)));
        }
        uri
    }
}

fn parse_query_string(query: &str) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();
    for part in query.split('&') {
        if let Some((key, value)) = part.split_once('=') {
            params
                .entry(key.to_string())
                .or_default()
                .push(value.to_string());
        }
    }
    params
}

fn url_decode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '%' {
            let hex: String = chars.by_ref().take(2).collect();
            if hex.len() == 2 {
                if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                    result.push(byte as char);
                    continue;
                }
            }
            result.push('%');
            result.push_str(&hex);
        } else if c == '+' {
            result.push(' ');
        } else {
            result.push(c);
        }
    }

    result
}

fn url_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len() * 3);
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
