use crate::crypto::hash_hex;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

pub const NAME_HEADER: &str = "x-synapse-name";
pub const TIMEOUT_HEADER: &str = "x-synapse-timeout";
pub const BODY_HASH_HEADER: &str = "x-synapse-body-hash";
pub const TOTAL_SIZE_HEADER: &str = "x-synapse-total-size";

pub const DENDRITE_PREFIX: &str = "x-dendrite-";
pub const AXON_PREFIX: &str = "x-axon-";

/// One row of a payload's copy-back policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPolicy {
    pub name: &'static str,
    /// Whether a value returned by the server may overwrite the local one.
    pub mutable_on_receive: bool,
}

/// Schema level knowledge about a payload, normally generated by
/// `#[derive(SynapseFields)]`.
pub trait SynapseFields: Sized {
    /// Type name, used as the HTTP path segment.
    const NAME: &'static str;
    const FIELDS: &'static [FieldPolicy];

    /// Copy every mutable-on-receive field from `peer` into `self` and
    /// return the names of the copied fields.
    fn merge_from_peer(&mut self, peer: Self) -> Vec<&'static str>;

    fn field_policy(name: &str) -> Option<&'static FieldPolicy> {
        Self::FIELDS.iter().find(|policy| policy.name == name)
    }
}

/// An application payload carried by a [`Synapse`].
pub trait Payload:
    SynapseFields + Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    /// What a deserialized call hands back to the caller.
    type Output: Send;

    /// Payload types answered with a byte stream set this to true.
    const IS_STREAMING: bool = false;

    /// Turn a completed envelope into the caller facing value.
    fn deserialize_synapse(synapse: Synapse<Self>) -> Self::Output;
}

/// A payload whose response body is consumed incrementally.
pub trait StreamingPayload: Payload {
    type Chunk: Send;

    /// Decode zero or more chunks out of one body fragment. The payload may
    /// accumulate state as it goes.
    fn process_streaming_chunk(&mut self, bytes: Bytes) -> Vec<Self::Chunk>;

    /// JSON describing the final state once the body is exhausted. It is
    /// merged into the local envelope exactly like a unary response body.
    fn extract_response_json(&self, _headers: &HeaderMap) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Metadata about one side of a call.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TerminalInfo {
    pub status_code: Option<u16>,
    pub status_message: Option<String>,
    pub process_time: Option<f64>,
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub version: Option<u32>,
    pub nonce: Option<u64>,
    pub uuid: Option<String>,
    pub hotkey: Option<String>,
    pub signature: Option<String>,
    pub pubkey: Option<String>,
}

macro_rules! fill_missing {
    ($local:ident, $remote:ident, $($field:ident),*) => {
        $(
            if $local.$field.is_none() {
                $local.$field = $remote.$field.clone();
            }
        )*
    };
}

impl TerminalInfo {
    /// Merge a server reported block: values already set locally win, unset
    /// ones are taken from `remote`.
    pub fn merge_missing(&mut self, remote: &TerminalInfo) {
        let local = self;
        fill_missing!(
            local,
            remote,
            status_code,
            status_message,
            process_time,
            ip,
            port,
            version,
            nonce,
            uuid,
            hotkey,
            signature,
            pubkey
        );
    }

    pub fn is_success(&self) -> bool {
        self.status_code == Some(200)
    }

    fn write_headers(&self, prefix: &str, headers: &mut HeaderMap) {
        let mut put = |field: &str, value: Option<String>| {
            if let Some(value) = value {
                insert_header(headers, &format!("{}{}", prefix, field), &value);
            }
        };
        put("status-code", self.status_code.map(|v| v.to_string()));
        put("status-message", self.status_message.clone());
        put("process-time", self.process_time.map(|v| v.to_string()));
        put("ip", self.ip.clone());
        put("port", self.port.map(|v| v.to_string()));
        put("version", self.version.map(|v| v.to_string()));
        put("nonce", self.nonce.map(|v| v.to_string()));
        put("uuid", self.uuid.clone());
        put("hotkey", self.hotkey.clone());
        put("signature", self.signature.clone());
        put("pubkey", self.pubkey.clone());
    }

    fn read_headers(prefix: &str, headers: &HeaderMap) -> TerminalInfo {
        let get = |field: &str| header_str(headers, &format!("{}{}", prefix, field));
        TerminalInfo {
            status_code: get("status-code").and_then(|v| v.parse().ok()),
            status_message: get("status-message"),
            process_time: get("process-time").and_then(|v| v.parse().ok()),
            ip: get("ip"),
            port: get("port").and_then(|v| v.parse().ok()),
            version: get("version").and_then(|v| v.parse().ok()),
            nonce: get("nonce").and_then(|v| v.parse().ok()),
            uuid: get("uuid"),
            hotkey: get("hotkey"),
            signature: get("signature"),
            pubkey: get("pubkey"),
        }
    }
}

/// Everything about an envelope that travels in headers. This is also the
/// redacted form kept in the call history: it never contains payload fields.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SynapseHeaders {
    pub name: Option<String>,
    pub timeout: Option<f64>,
    pub total_size: Option<usize>,
    pub body_hash: Option<String>,
    pub dendrite: TerminalInfo,
    pub axon: TerminalInfo,
}

impl SynapseHeaders {
    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(name) = &self.name {
            insert_header(&mut headers, NAME_HEADER, name);
        }
        if let Some(timeout) = self.timeout {
            insert_header(&mut headers, TIMEOUT_HEADER, &timeout.to_string());
        }
        if let Some(total_size) = self.total_size {
            insert_header(&mut headers, TOTAL_SIZE_HEADER, &total_size.to_string());
        }
        if let Some(body_hash) = &self.body_hash {
            insert_header(&mut headers, BODY_HASH_HEADER, body_hash);
        }
        self.dendrite.write_headers(DENDRITE_PREFIX, &mut headers);
        self.axon.write_headers(AXON_PREFIX, &mut headers);
        headers
    }

    pub fn from_header_map(headers: &HeaderMap) -> SynapseHeaders {
        SynapseHeaders {
            name: header_str(headers, NAME_HEADER),
            timeout: header_str(headers, TIMEOUT_HEADER).and_then(|v| v.parse().ok()),
            total_size: header_str(headers, TOTAL_SIZE_HEADER).and_then(|v| v.parse().ok()),
            body_hash: header_str(headers, BODY_HASH_HEADER),
            dendrite: TerminalInfo::read_headers(DENDRITE_PREFIX, headers),
            axon: TerminalInfo::read_headers(AXON_PREFIX, headers),
        }
    }
}

/// The signed request/response envelope.
#[derive(Debug, Clone)]
pub struct Synapse<P> {
    pub name: String,
    pub timeout: Option<f64>,
    pub total_size: usize,
    pub body_hash: Option<String>,
    pub dendrite: TerminalInfo,
    pub axon: TerminalInfo,
    pub payload: P,
}

impl<P: Payload> Synapse<P> {
    pub fn new(payload: P) -> Self {
        Synapse {
            name: P::NAME.to_string(),
            timeout: None,
            total_size: 0,
            body_hash: None,
            dendrite: TerminalInfo::default(),
            axon: TerminalInfo::default(),
            payload,
        }
    }

    /// Rebuild an envelope from received headers and a parsed body.
    pub fn from_parts(headers: SynapseHeaders, payload: P) -> Self {
        Synapse {
            name: headers.name.unwrap_or_else(|| P::NAME.to_string()),
            timeout: headers.timeout,
            total_size: headers.total_size.unwrap_or(0),
            body_hash: headers.body_hash,
            dendrite: headers.dendrite,
            axon: headers.axon,
            payload,
        }
    }

    /// JSON body as sent on the wire: payload fields only.
    pub fn body(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.payload)?)
    }

    pub fn compute_body_hash(&self) -> crate::Result<String> {
        Ok(hash_hex(&self.body()?))
    }

    /// True if the payload still matches the hash it was signed with.
    pub fn verify_body_hash(&self) -> bool {
        match (&self.body_hash, self.compute_body_hash()) {
            (Some(expected), Ok(actual)) => *expected == actual,
            _ => false,
        }
    }

    pub fn signature_message(&self) -> String {
        signature_message(
            self.dendrite.nonce.unwrap_or_default(),
            self.dendrite.hotkey.as_deref().unwrap_or_default(),
            self.axon.hotkey.as_deref().unwrap_or_default(),
            self.dendrite.uuid.as_deref().unwrap_or_default(),
            self.body_hash.as_deref().unwrap_or_default(),
        )
    }

    pub fn headers(&self) -> SynapseHeaders {
        SynapseHeaders {
            name: Some(self.name.clone()),
            timeout: self.timeout,
            total_size: Some(self.total_size),
            body_hash: self.body_hash.clone(),
            dendrite: self.dendrite.clone(),
            axon: self.axon.clone(),
        }
    }

    pub fn to_headers(&self) -> HeaderMap {
        self.headers().to_header_map()
    }

    pub fn is_success(&self) -> bool {
        self.dendrite.is_success()
    }

    pub fn is_timeout(&self) -> bool {
        self.dendrite.status_code == Some(408)
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }
}

impl<P> fmt::Display for Synapse<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(status={}, message={})",
            self.name,
            self.dendrite
                .status_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.dendrite.status_message.as_deref().unwrap_or("-")
        )
    }
}

/// The exact string a dendrite signs for a request.
pub fn signature_message(
    nonce: u64,
    dendrite_hotkey: &str,
    axon_hotkey: &str,
    uuid: &str,
    body_hash: &str,
) -> String {
    format!(
        "{}.{}.{}.{}.{}",
        nonce, dendrite_hotkey, axon_hotkey, uuid, body_hash
    )
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    let sanitized: String = value
        .chars()
        .map(|c| if c == ' ' || c.is_ascii_graphic() { c } else { '?' })
        .collect();
    if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(&sanitized),
    ) {
        headers.insert(name, value);
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}
