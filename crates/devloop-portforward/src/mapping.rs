// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ForwardError;

pub const DEFAULT_BIND_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// `[<bind>:]<local>:<remote>` or just `<port>`.
///
/// A local port of `0`, or an empty one, picks any free ephemeral port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
	pub bind: IpAddr,
	pub local: u16,
	pub remote: u16,
}

impl PortMapping {
	pub fn new(local: u16, remote: u16) -> Self {
		Self {
			bind: DEFAULT_BIND_ADDRESS,
			local,
			remote,
		}
	}

	pub fn is_ephemeral(&self) -> bool {
		self.local == 0
	}
}

fn parse_port(mapping: &str, value: &str, what: &str) -> Result<u16, ForwardError> {
	value
		.trim()
		.parse()
		.map_err(|_| ForwardError::invalid(mapping, format!("{what} port {value:?} is not a number")))
}

impl FromStr for PortMapping {
	type Err = ForwardError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mapping = s.trim();
		if mapping.is_empty() {
			return Err(ForwardError::invalid(s, "empty mapping"));
		}

		let mut parts = mapping.rsplitn(3, ':');
		let remote = parts.next().unwrap_or_default();
		let local = parts.next();
		let bind = parts.next();

		let remote = parse_port(s, remote, "remote")?;
		if remote == 0 {
			return Err(ForwardError::invalid(s, "remote port must not be 0"));
		}
		let local = match local {
			None => remote,
			Some(l) if l.trim().is_empty() => 0,
			Some(l) => parse_port(s, l, "local")?,
		};
		let bind = match bind {
			None => DEFAULT_BIND_ADDRESS,
			Some(b) => b
				.trim_start_matches('[')
				.trim_end_matches(']')
				.parse()
				.map_err(|_| ForwardError::invalid(s, format!("bind address {b:?} is not an IP address")))?,
		};

		Ok(Self { bind, local, remote })
	}
}

impl fmt::Display for PortMapping {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.bind != DEFAULT_BIND_ADDRESS {
			match self.bind {
				IpAddr::V6(addr) => write!(f, "[{addr}]:")?,
				IpAddr::V4(addr) => write!(f, "{addr}:")?,
			}
		}
		write!(f, "{}:{}", self.local, self.remote)
	}
}

impl Serialize for PortMapping {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for PortMapping {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}
