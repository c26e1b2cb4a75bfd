//
// Copyright (c) The Ripd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_new::new;
use enum_as_inner::EnumAsInner;
use ipnetwork::Ipv4Network;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::route::Metric;

// RIP command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, FromPrimitive, Serialize)]
pub enum Command {
    Request = 1,
    Response = 2,
}

//
// The RIP packet format is:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |  command (1)  |  version (1)  |       must be zero (2)        |
// +---------------+---------------+-------------------------------+
// |                                                               |
// ~                         RIP Entry (20)                        ~
// |                                                               |
// +---------------+---------------+---------------+---------------+
//
#[derive(Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Pdu {
    // PDU command.
    pub command: Command,
    // PDU version.
    #[new(value = "2")]
    pub version: u8,
    // List of RTEs.
    pub rtes: Vec<Rte>,
}

//
// The format for the 20-octet route entry (RTE) for RIP-2 is:
//
//  0                   1                   2                   3 3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | Address Family Identifier (2) |        Route Tag (2)          |
// +-------------------------------+-------------------------------+
// |                         IP Address (4)                        |
// +---------------------------------------------------------------+
// |                         Subnet Mask (4)                       |
// +---------------------------------------------------------------+
// |                         Next Hop (4)                          |
// +---------------------------------------------------------------+
// |                         Metric (4)                            |
// +---------------------------------------------------------------+
//
#[derive(Debug, EnumAsInner, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Rte {
    Zero(RteZero),
    Ipv4(RteIpv4),
    Auth(RteAuth),
}

#[derive(Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RteZero {
    pub metric: Metric,
}

#[derive(Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RteIpv4 {
    pub tag: u16,
    pub prefix: Ipv4Network,
    pub nexthop: Option<Ipv4Addr>,
    pub metric: Metric,
}

//
// The RIP simple password authentication entry format (RFC 1723) is:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +---------------+---------------+-------------------------------+
// |             0xFFFF            |  Authentication Type=0x0002   |
// +---------------+---------------+---------------+---------------+
// ~                       Password (16)                           ~
// +---------------+---------------+---------------+---------------+
//
#[derive(Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RteAuth {
    pub auth_type: u16,
    pub password: [u8; 16],
}

// RIP decode errors.
#[derive(Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DecodeError {
    InvalidLength(usize),
    NonzeroReserved(u16),
    InvalidCommand(u8),
    InvalidVersion(u8),
    InvalidRtePrefix(Ipv4Addr, Ipv4Addr),
    InvalidRteMetric(u32),
}

// Type aliases.
pub type DecodeResult<T> = Result<T, DecodeError>;

// ===== impl Pdu =====

impl Pdu {
    pub const VERSION: u8 = 2;
    pub const HDR_LENGTH: usize = 4;
    pub const MAX_ENTRIES: usize = 25;
    pub const MAX_SIZE: usize =
        Self::HDR_LENGTH + Self::MAX_ENTRIES * Rte::LENGTH;

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::MAX_SIZE);

        // Encode PDU header.
        buf.put_u8(self.command as u8);
        buf.put_u8(self.version);
        buf.put_u16(0);

        // Encode RTEs.
        for rte in &self.rtes {
            rte.encode(&mut buf);
        }

        buf
    }

    pub fn decode(data: &[u8]) -> DecodeResult<Self> {
        let mut buf = Bytes::copy_from_slice(data);

        // Validate the packet length. A header with no RTEs is valid.
        let buf_size = data.len();
        if buf_size < Self::HDR_LENGTH
            || (buf_size - Self::HDR_LENGTH) % Rte::LENGTH != 0
        {
            return Err(DecodeError::InvalidLength(buf_size));
        }

        // Parse and validate RIP command.
        let command = buf.get_u8();
        let command = Command::from_u8(command)
            .ok_or(DecodeError::InvalidCommand(command))?;

        // Parse and validate RIP version.
        //
        // RFC 2453 specifies that new versions of RIPv2 should be backward
        // compatible.
        let version = buf.get_u8();
        if version < Self::VERSION {
            return Err(DecodeError::InvalidVersion(version));
        }

        // The reserved field must be zero.
        let mbz = buf.get_u16();
        if mbz != 0 {
            return Err(DecodeError::NonzeroReserved(mbz));
        }

        // Decode RIP RTEs.
        let mut rtes = vec![];
        while buf.remaining() >= Rte::LENGTH {
            let rte = Rte::decode(&mut buf)?;

            // Ignore authentication RTEs (no authentication policy is
            // implemented).
            if rte.is_auth() {
                continue;
            }
            rtes.push(rte);
        }

        Ok(Pdu {
            command,
            version,
            rtes,
        })
    }

    // Builds a request to send the entire routing table.
    pub fn new_dump_request() -> Self {
        let rtes = vec![Rte::Zero(RteZero {
            metric: Metric::infinite(),
        })];
        Pdu::new(Command::Request, rtes)
    }

    // If there is exactly one entry in the request, and it has an address
    // family identifier of zero and a metric of infinity (i.e., 16), then this
    // is a request to send the entire routing table.
    pub fn is_dump_request(&self) -> bool {
        self.command == Command::Request
            && self.rtes.len() == 1
            && self.rtes[0]
                == Rte::Zero(RteZero {
                    metric: Metric::infinite(),
                })
    }
}

// ===== impl Rte =====

impl Rte {
    pub const LENGTH: usize = 20;

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        match self {
            Rte::Zero(rte) => rte.encode(buf),
            Rte::Ipv4(rte) => rte.encode(buf),
            // Authentication entries are never generated.
            Rte::Auth(_rte) => unreachable!(),
        }
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let afi = buf.get_u16();
        let rte = match afi {
            RteZero::AFI => Rte::Zero(RteZero::decode(buf)?),
            RteAuth::AFI => Rte::Auth(RteAuth::decode(buf)?),
            // Any other address family decodes using the generic 20-octet
            // entry layout.
            _ => Rte::Ipv4(RteIpv4::decode(buf)?),
        };

        Ok(rte)
    }
}

// ===== impl RteZero =====

impl RteZero {
    pub const AFI: u16 = libc::AF_UNSPEC as u16;

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(Self::AFI);
        buf.put_u16(0);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(self.metric.get().into());
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let _tag = buf.get_u16();
        let _prefix_addr = buf.get_u32();
        let _prefix_mask = buf.get_u32();
        let _nexthop = buf.get_u32();
        let metric = buf.get_u32();

        // Sanity checks.
        let metric = Metric::new(metric)
            .map_err(|_| DecodeError::InvalidRteMetric(metric))?;

        Ok(RteZero { metric })
    }
}

// ===== impl RteIpv4 =====

impl RteIpv4 {
    pub const AFI: u16 = libc::AF_INET as u16;

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(Self::AFI);
        buf.put_u16(self.tag);
        buf.put_u32(self.prefix.ip().into());
        buf.put_u32(self.prefix.mask().into());
        if let Some(nexthop) = &self.nexthop {
            buf.put_u32((*nexthop).into());
        } else {
            buf.put_u32(0);
        }
        buf.put_u32(self.metric.get().into());
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let tag = buf.get_u16();
        let addr = Ipv4Addr::from(buf.get_u32());
        let mask = Ipv4Addr::from(buf.get_u32());
        let nexthop = Ipv4Addr::from(buf.get_u32());
        let metric = buf.get_u32();

        // Validate addr/mask, normalizing the prefix to its canonical form
        // (address bits ANDed with the mask).
        let prefix = Ipv4Network::with_netmask(addr, mask)
            .and_then(|prefix| {
                Ipv4Network::new(prefix.network(), prefix.prefix())
            })
            .map_err(|_| DecodeError::InvalidRtePrefix(addr, mask))?;

        // An unspecified nexthop means "use the source of the advertisement".
        let nexthop = if nexthop.is_unspecified() {
            None
        } else {
            Some(nexthop)
        };

        // Validate metric.
        let metric = Metric::new(metric)
            .map_err(|_| DecodeError::InvalidRteMetric(metric))?;

        Ok(RteIpv4 {
            tag,
            prefix,
            nexthop,
            metric,
        })
    }
}

// ===== impl RteAuth =====

impl RteAuth {
    pub const AFI: u16 = 0xFFFF;
    pub const AUTH_TYPE_PASSWORD: u16 = 2;

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let auth_type = buf.get_u16();
        let mut password = [0; 16];
        buf.copy_to_slice(&mut password);

        Ok(RteAuth {
            auth_type,
            password,
        })
    }
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::InvalidLength(length) => {
                write!(f, "Invalid Length: {}", length)
            }
            DecodeError::NonzeroReserved(value) => {
                write!(f, "Nonzero reserved header field: {}", value)
            }
            DecodeError::InvalidCommand(command) => {
                write!(f, "Invalid RIP command: {}", command)
            }
            DecodeError::InvalidVersion(version) => {
                write!(f, "Invalid RIP version: {}", version)
            }
            DecodeError::InvalidRtePrefix(addr, mask) => {
                write!(f, "Invalid RTE prefix: {} mask {}", addr, mask)
            }
            DecodeError::InvalidRteMetric(metric) => {
                write!(f, "Invalid RIP metric: {}", metric)
            }
        }
    }
}

impl std::error::Error for DecodeError {}
