//! Fixed-range TCP port pool for bridge processes.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, TcpListener};
use std::ops::RangeInclusive;

use thiserror::Error;

use crate::config::BridgeConfig;

/// No port in the range is free.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("all bridge ports in {min}..={max} are in use")]
pub struct PortError {
    pub min: u16,
    pub max: u16,
}

/// Hands out the lowest free port of a fixed inclusive range.
///
/// The pool keeps no state of its own: the caller passes the ports its live
/// bridges hold, and every other candidate is checked with a bind-and-release
/// probe so ports held outside our bookkeeping are skipped too.
#[derive(Debug, Clone)]
pub struct PortPool {
    range: RangeInclusive<u16>,
    bind_address: IpAddr,
}

impl PortPool {
    pub fn new(range: RangeInclusive<u16>, bind_address: IpAddr) -> Self {
        Self {
            range,
            bind_address,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        let bind_address = config
            .bind_address
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        Self::new(config.port_min..=config.port_max, bind_address)
    }

    /// Number of ports in the range.
    pub fn capacity(&self) -> usize {
        self.range.clone().count()
    }

    pub fn range(&self) -> RangeInclusive<u16> {
        self.range.clone()
    }

    /// Lowest port that is neither in `in_use` nor bound by anyone else.
    pub fn allocate(&self, in_use: &HashSet<u16>) -> Result<u16, PortError> {
        self.range
            .clone()
            .filter(|port| !in_use.contains(port))
            .find(|&port| self.is_bindable(port))
            .ok_or(PortError {
                min: *self.range.start(),
                max: *self.range.end(),
            })
    }

    /// Bind-and-release probe.
    pub fn is_bindable(&self, port: u16) -> bool {
        TcpListener::bind((self.bind_address, port)).is_ok()
    }
}
