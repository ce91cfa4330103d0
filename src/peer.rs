//! Axon endpoints as published on chain, and how a dendrite finds them.
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Raw serving record as stored by the contract. The ip is an integer.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct ChainAxonInfo {
    pub block: u64,
    pub version: u32,
    pub ip: u128,
    pub port: u16,
    pub ip_type: u8,
    pub protocol: u8,
}

/// Endpoint descriptor of a peer: where to reach it and who it claims to be.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AxonInfo {
    pub version: u32,
    pub ip: String,
    pub port: u16,
    pub ip_type: u8,
    pub hotkey: String,
    pub coldkey: String,
    pub protocol: u8,
}

impl AxonInfo {
    pub fn new(ip: &str, port: u16, hotkey: &str) -> Self {
        AxonInfo {
            version: 0,
            ip: ip.to_string(),
            port,
            ip_type: ip_version(ip).unwrap_or(4),
            hotkey: hotkey.to_string(),
            coldkey: String::new(),
            protocol: 4,
        }
    }

    /// Decode a serving record read from the contract.
    pub fn from_chain(raw: &ChainAxonInfo, hotkey: &str, coldkey: &str) -> Self {
        AxonInfo {
            version: raw.version,
            ip: int_to_ip(raw.ip).to_string(),
            port: raw.port,
            ip_type: raw.ip_type,
            hotkey: hotkey.to_string(),
            coldkey: coldkey.to_string(),
            protocol: raw.protocol,
        }
    }

    /// A neuron that never served has the zero address.
    pub fn is_serving(&self) -> bool {
        self.ip != "0.0.0.0"
    }

    /// `ip:port`, with brackets around v6 addresses.
    pub fn endpoint(&self) -> String {
        format_endpoint(&self.ip, self.port)
    }

    pub fn ip_str(&self) -> String {
        format!("/ipv{}/{}:{}", self.ip_type, self.ip, self.port)
    }
}

impl fmt::Display for AxonInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AxonInfo({}, {})", self.hotkey, self.endpoint())
    }
}

/// Resolves a peer identifier (a hotkey) to its endpoint.
pub trait PeerDirectory: Send + Sync {
    fn resolve(&self, peer: &str) -> Option<AxonInfo>;

    fn resolve_all(&self, peers: &[&str]) -> Result<Vec<AxonInfo>> {
        peers
            .iter()
            .map(|peer| {
                self.resolve(peer)
                    .ok_or_else(|| Error::UnknownPeer(peer.to_string()))
            })
            .collect()
    }
}

/// A directory snapshot, e.g. the axons of a synced metagraph, indexed by uid.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    axons: Vec<AxonInfo>,
}

impl StaticDirectory {
    pub fn new(axons: Vec<AxonInfo>) -> Self {
        StaticDirectory { axons }
    }

    pub fn by_uid(&self, uid: usize) -> Option<&AxonInfo> {
        self.axons.get(uid)
    }

    pub fn serving(&self) -> impl Iterator<Item = &AxonInfo> {
        self.axons.iter().filter(|axon| axon.is_serving())
    }

    pub fn len(&self) -> usize {
        self.axons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axons.is_empty()
    }
}

impl PeerDirectory for StaticDirectory {
    fn resolve(&self, peer: &str) -> Option<AxonInfo> {
        self.axons.iter().find(|axon| axon.hotkey == peer).cloned()
    }
}

pub fn int_to_ip(value: u128) -> IpAddr {
    if value <= u32::MAX as u128 {
        IpAddr::V4(Ipv4Addr::from(value as u32))
    } else {
        IpAddr::V6(Ipv6Addr::from(value))
    }
}

pub fn ip_to_int(ip: &str) -> Result<u128> {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => Ok(u32::from(v4) as u128),
        Ok(IpAddr::V6(v6)) => Ok(u128::from(v6)),
        Err(err) => Err(Error::UnknownPeer(format!("{}: {}", ip, err))),
    }
}

pub fn ip_version(ip: &str) -> Option<u8> {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => Some(4),
        Ok(IpAddr::V6(_)) => Some(6),
        Err(_) => None,
    }
}

pub fn format_endpoint(ip: &str, port: u16) -> String {
    if ip.contains(':') {
        format!("[{}]:{}", ip, port)
    } else {
        format!("{}:{}", ip, port)
    }
}
