//! # Wire Layout
//!
//! Fixed-size building blocks of the binary protocol: the 13-byte header,
//! the tag table and the record layouts.
//!
//! ## Header
//! ```text
//! [Tag(1)] [Code(4, BE, signed)] [AccessCode(8, BE)]
//! ```
//!
//! ## Records
//! ```text
//! NetworkIdentity (95)
//!   [Addr(4)] [Activation(1)] [Class(1)] [DevEUI(8)] [NwkSKey(16)] [AppSKey(16)]
//!   [Version(1)] [AppEUI(8)] [AppKey(16)] [NwkKey(16)] [DevNonce(2)] [Name(6)]
//!
//! GatewayIdentity (27)
//!   [GatewayId(8)] [Family(1): 0|4|6] [Port(2)] [Address(16)]
//! ```
//!
//! Only the first six bytes of the eight byte device name travel on the
//! wire; decoding pads the name with NULs.
//!
//! All integers are big-endian. Decoding never reads past the buffer: every
//! reader checks `remaining()` before touching the bytes.

use crate::core::types::{
    Activation, DevAddr, DevEui, DevNonce, DeviceClass, DeviceIdentity, DeviceName,
    GatewayIdentity, Key128, LorawanVersion, NetworkIdentity, GATEWAY_IDENTITY_SIZE,
    NETWORK_IDENTITY_SIZE,
};
use crate::error::constants::{
    ERR_INVALID_ACTIVATION, ERR_INVALID_ADDRESS_FAMILY, ERR_INVALID_DEVICE_CLASS,
};
use crate::error::{ProtocolError, Result};
use bytes::{Buf, BufMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

pub const HEADER_SIZE: usize = 13;
/// Leading bytes of a [`DeviceName`] carried in an identity record.
pub const WIRE_NAME_SIZE: usize = 6;
pub const EUI_REQUEST_SIZE: usize = HEADER_SIZE + 8;
pub const ADDR_REQUEST_SIZE: usize = HEADER_SIZE + 4;
pub const IDENTITY_REQUEST_SIZE: usize = HEADER_SIZE + NETWORK_IDENTITY_SIZE;
pub const OPERATION_REQUEST_SIZE: usize = HEADER_SIZE + 5;
pub const GATEWAY_REQUEST_SIZE: usize = HEADER_SIZE + GATEWAY_IDENTITY_SIZE;

pub const IDENTITY_RESPONSE_SIZE: usize = HEADER_SIZE + NETWORK_IDENTITY_SIZE;
pub const GATEWAY_RESPONSE_SIZE: usize = HEADER_SIZE + GATEWAY_IDENTITY_SIZE;
pub const OPERATION_RESPONSE_SIZE: usize = HEADER_SIZE + 9;
/// Header + offset + size + count, before the records of a list response.
pub const LIST_RESPONSE_HEADER_SIZE: usize = HEADER_SIZE + 9;

/// Request kind, selected by the first byte of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    AddrLookup,
    EuiLookup,
    Assign,
    Remove,
    List,
    Count,
    ForceSave,
    Close,
    GatewayAddrLookup,
    GatewayIdLookup,
    GatewayAssign,
    GatewayRemove,
    GatewayList,
    GatewayCount,
    GatewayForceSave,
    GatewayClose,
}

impl Tag {
    pub const ALL: [Tag; 16] = [
        Tag::AddrLookup,
        Tag::EuiLookup,
        Tag::Assign,
        Tag::Remove,
        Tag::List,
        Tag::Count,
        Tag::ForceSave,
        Tag::Close,
        Tag::GatewayAddrLookup,
        Tag::GatewayIdLookup,
        Tag::GatewayAssign,
        Tag::GatewayRemove,
        Tag::GatewayList,
        Tag::GatewayCount,
        Tag::GatewayForceSave,
        Tag::GatewayClose,
    ];

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'a' => Some(Tag::AddrLookup),
            b'i' => Some(Tag::EuiLookup),
            b'p' => Some(Tag::Assign),
            b'r' => Some(Tag::Remove),
            b'l' => Some(Tag::List),
            b'c' => Some(Tag::Count),
            b's' => Some(Tag::ForceSave),
            b'e' => Some(Tag::Close),
            b'A' => Some(Tag::GatewayAddrLookup),
            b'I' => Some(Tag::GatewayIdLookup),
            b'P' => Some(Tag::GatewayAssign),
            b'R' => Some(Tag::GatewayRemove),
            b'L' => Some(Tag::GatewayList),
            b'C' => Some(Tag::GatewayCount),
            b'S' => Some(Tag::GatewayForceSave),
            b'E' => Some(Tag::GatewayClose),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Tag::AddrLookup => b'a',
            Tag::EuiLookup => b'i',
            Tag::Assign => b'p',
            Tag::Remove => b'r',
            Tag::List => b'l',
            Tag::Count => b'c',
            Tag::ForceSave => b's',
            Tag::Close => b'e',
            Tag::GatewayAddrLookup => b'A',
            Tag::GatewayIdLookup => b'I',
            Tag::GatewayAssign => b'P',
            Tag::GatewayRemove => b'R',
            Tag::GatewayList => b'L',
            Tag::GatewayCount => b'C',
            Tag::GatewayForceSave => b'S',
            Tag::GatewayClose => b'E',
        }
    }

    pub fn as_char(self) -> char {
        self.as_byte() as char
    }

    pub fn is_gateway(self) -> bool {
        self.as_byte().is_ascii_uppercase()
    }

    /// Smallest request buffer accepted for this tag.
    pub fn min_request_size(self) -> usize {
        match self {
            Tag::AddrLookup => EUI_REQUEST_SIZE,
            Tag::EuiLookup => ADDR_REQUEST_SIZE,
            Tag::Assign => IDENTITY_REQUEST_SIZE,
            // short form: header + address + padding up to an EUI request
            Tag::Remove => EUI_REQUEST_SIZE,
            Tag::List
            | Tag::Count
            | Tag::ForceSave
            | Tag::Close
            | Tag::GatewayList
            | Tag::GatewayCount
            | Tag::GatewayForceSave
            | Tag::GatewayClose => OPERATION_REQUEST_SIZE,
            Tag::GatewayAddrLookup
            | Tag::GatewayIdLookup
            | Tag::GatewayAssign
            | Tag::GatewayRemove => GATEWAY_REQUEST_SIZE,
        }
    }

    /// Human-readable name, used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Tag::AddrLookup => "address-lookup",
            Tag::EuiLookup => "eui-lookup",
            Tag::Assign => "assign",
            Tag::Remove => "remove",
            Tag::List => "list",
            Tag::Count => "count",
            Tag::ForceSave => "force-save",
            Tag::Close => "close-resources",
            Tag::GatewayAddrLookup => "gateway-address-lookup",
            Tag::GatewayIdLookup => "gateway-id-lookup",
            Tag::GatewayAssign => "gateway-assign",
            Tag::GatewayRemove => "gateway-remove",
            Tag::GatewayList => "gateway-list",
            Tag::GatewayCount => "gateway-count",
            Tag::GatewayForceSave => "gateway-force-save",
            Tag::GatewayClose => "gateway-close-resources",
        }
    }
}

/// Common message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub tag: Tag,
    pub code: i32,
    pub access_code: u64,
}

impl Header {
    pub fn new(tag: Tag, code: i32, access_code: u64) -> Self {
        Self {
            tag,
            code,
            access_code,
        }
    }

    pub fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.tag.as_byte());
        buf.put_i32(self.code);
        buf.put_u64(self.access_code);
    }

    pub fn get<B: Buf>(buf: &mut B) -> Result<Self> {
        if !buf.has_remaining() {
            return Err(ProtocolError::EmptyPacket);
        }
        let byte = buf.get_u8();
        let tag = Tag::from_byte(byte).ok_or(ProtocolError::UnknownTag(byte))?;
        if buf.remaining() < HEADER_SIZE - 1 {
            return Err(ProtocolError::Truncated {
                tag: tag.as_char(),
                needed: HEADER_SIZE,
                actual: buf.remaining() + 1,
            });
        }
        Ok(Self {
            tag,
            code: buf.get_i32(),
            access_code: buf.get_u64(),
        })
    }
}

/// A record with a fixed binary layout.
pub trait WireRecord: Sized {
    const WIRE_SIZE: usize;

    fn put<B: BufMut>(&self, buf: &mut B);

    fn get<B: Buf>(buf: &mut B) -> Result<Self>;
}

fn ensure_remaining<B: Buf>(buf: &B, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(ProtocolError::BufferTooSmall {
            needed,
            capacity: buf.remaining(),
        });
    }
    Ok(())
}

fn get_key<B: Buf>(buf: &mut B) -> Key128 {
    let mut key = [0u8; 16];
    buf.copy_to_slice(&mut key);
    Key128(key)
}

impl WireRecord for NetworkIdentity {
    const WIRE_SIZE: usize = NETWORK_IDENTITY_SIZE;

    fn put<B: BufMut>(&self, buf: &mut B) {
        let d = &self.device;
        buf.put_u32(self.addr.0);
        buf.put_u8(d.activation as u8);
        buf.put_u8(d.device_class as u8);
        buf.put_u64(d.dev_eui.0);
        buf.put_slice(d.nwk_s_key.as_bytes());
        buf.put_slice(d.app_s_key.as_bytes());
        buf.put_u8(d.version.to_byte());
        buf.put_u64(d.app_eui.0);
        buf.put_slice(d.app_key.as_bytes());
        buf.put_slice(d.nwk_key.as_bytes());
        buf.put_u16(d.dev_nonce.0);
        buf.put_slice(&d.name.as_bytes()[..WIRE_NAME_SIZE]);
    }

    fn get<B: Buf>(buf: &mut B) -> Result<Self> {
        ensure_remaining(buf, Self::WIRE_SIZE)?;
        let addr = DevAddr(buf.get_u32());
        let activation = Activation::from_byte(buf.get_u8())
            .ok_or_else(|| ProtocolError::InvalidField(ERR_INVALID_ACTIVATION.to_string()))?;
        let device_class = DeviceClass::from_byte(buf.get_u8())
            .ok_or_else(|| ProtocolError::InvalidField(ERR_INVALID_DEVICE_CLASS.to_string()))?;
        let dev_eui = DevEui(buf.get_u64());
        let nwk_s_key = get_key(buf);
        let app_s_key = get_key(buf);
        let version = LorawanVersion::from_byte(buf.get_u8());
        let app_eui = DevEui(buf.get_u64());
        let app_key = get_key(buf);
        let nwk_key = get_key(buf);
        let dev_nonce = DevNonce(buf.get_u16());
        let mut name = [0u8; 8];
        buf.copy_to_slice(&mut name[..WIRE_NAME_SIZE]);

        Ok(NetworkIdentity {
            addr,
            device: DeviceIdentity {
                activation,
                device_class,
                dev_eui,
                nwk_s_key,
                app_s_key,
                version,
                app_eui,
                app_key,
                nwk_key,
                dev_nonce,
                join_nonce: Default::default(),
                name: DeviceName(name),
            },
        })
    }
}

impl WireRecord for GatewayIdentity {
    const WIRE_SIZE: usize = GATEWAY_IDENTITY_SIZE;

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64(self.gateway_id.0);
        let mut address = [0u8; 16];
        match self.addr {
            None => {
                buf.put_u8(0);
                buf.put_u16(0);
            }
            Some(SocketAddr::V4(v4)) => {
                buf.put_u8(4);
                buf.put_u16(v4.port());
                address[..4].copy_from_slice(&v4.ip().octets());
            }
            Some(SocketAddr::V6(v6)) => {
                buf.put_u8(6);
                buf.put_u16(v6.port());
                address.copy_from_slice(&v6.ip().octets());
            }
        }
        buf.put_slice(&address);
    }

    fn get<B: Buf>(buf: &mut B) -> Result<Self> {
        ensure_remaining(buf, Self::WIRE_SIZE)?;
        let gateway_id = DevEui(buf.get_u64());
        let family = buf.get_u8();
        let port = buf.get_u16();
        let mut address = [0u8; 16];
        buf.copy_to_slice(&mut address);

        let addr = match family {
            0 => None,
            4 => {
                let ip = Ipv4Addr::new(address[0], address[1], address[2], address[3]);
                Some(SocketAddr::new(IpAddr::V4(ip), port))
            }
            6 => Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(address)), port)),
            _ => {
                return Err(ProtocolError::InvalidField(
                    ERR_INVALID_ADDRESS_FAMILY.to_string(),
                ))
            }
        };
        Ok(GatewayIdentity { gateway_id, addr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn every_tag_byte_maps_back() {
        for tag in Tag::ALL {
            assert_eq!(Tag::from_byte(tag.as_byte()), Some(tag));
            assert_eq!(tag.is_gateway(), tag.as_char().is_ascii_uppercase());
        }
        assert_eq!(Tag::from_byte(b'x'), None);
        assert_eq!(Tag::from_byte(0), None);
    }

    #[test]
    fn sizes_match_layout() {
        assert_eq!(OPERATION_REQUEST_SIZE, 18);
        assert_eq!(OPERATION_RESPONSE_SIZE, 22);
        assert_eq!(EUI_REQUEST_SIZE, 21);
        assert_eq!(ADDR_REQUEST_SIZE, 17);
        assert_eq!(IDENTITY_REQUEST_SIZE, 108);
        assert_eq!(GATEWAY_REQUEST_SIZE, 40);
    }

    #[test]
    fn header_is_big_endian() {
        let mut buf = BytesMut::new();
        Header::new(Tag::List, 42, 0x2A).put(&mut buf);
        assert_eq!(
            &buf[..],
            &[b'l', 0, 0, 0, 42, 0, 0, 0, 0, 0, 0, 0, 0x2A]
        );
    }

    #[test]
    fn identity_field_offsets() {
        let mut identity = NetworkIdentity::default();
        identity.addr = DevAddr(0x0102_0304);
        identity.device.activation = Activation::Otaa;
        identity.device.device_class = DeviceClass::C;
        identity.device.dev_eui = DevEui(0x1122_3344_5566_7788);
        identity.device.dev_nonce = DevNonce(0xBEEF);
        identity.device.name = DeviceName::new("NAME01");
        identity.device.nwk_key = Key128([0x77; 16]);

        let mut buf = BytesMut::new();
        identity.put(&mut buf);
        assert_eq!(buf.len(), NetworkIdentity::WIRE_SIZE);
        assert_eq!(&buf[0..4], &[1, 2, 3, 4]);
        assert_eq!(buf[4], 1);
        assert_eq!(buf[5], 2);
        assert_eq!(buf[6], 0x11);
        assert_eq!(&buf[71..87], &[0x77; 16]);
        assert_eq!(&buf[87..89], &[0xBE, 0xEF]);
        assert_eq!(&buf[89..95], b"NAME01");
        assert_eq!(NetworkIdentity::get(&mut &buf[..]).expect("decode"), identity);
    }

    #[test]
    fn record_writers_fill_exactly_their_size() {
        let mut identity = NetworkIdentity::default();
        identity.device.name = DeviceName::new("longname");
        let mut window = [0u8; NETWORK_IDENTITY_SIZE];
        let mut cursor = &mut window[..];
        identity.put(&mut cursor);
        assert!(cursor.is_empty());

        let mut window = [0u8; GATEWAY_IDENTITY_SIZE];
        let mut cursor = &mut window[..];
        GatewayIdentity::default().put(&mut cursor);
        assert!(cursor.is_empty());
    }

    #[test]
    fn name_is_cut_to_six_bytes_and_padded_on_decode() {
        let mut identity = NetworkIdentity::default();
        identity.device.name = DeviceName::new("sensor42");
        let mut buf = BytesMut::new();
        identity.put(&mut buf);
        assert_eq!(&buf[89..], b"sensor");

        let mut exact = &buf[..];
        let decoded = NetworkIdentity::get(&mut exact).expect("decode");
        assert!(exact.is_empty());
        assert_eq!(decoded.device.name, DeviceName::new("sensor"));
        assert_eq!(decoded.device.name.as_bytes()[6..], [0, 0]);
    }

    #[test]
    fn invalid_enumerations_are_rejected() {
        let mut buf = BytesMut::new();
        NetworkIdentity::default().put(&mut buf);
        buf[4] = 2;
        assert!(NetworkIdentity::get(&mut &buf[..]).is_err());
        buf[4] = 0;
        buf[5] = 3;
        assert!(NetworkIdentity::get(&mut &buf[..]).is_err());

        let mut gw = BytesMut::new();
        GatewayIdentity::default().put(&mut gw);
        gw[8] = 5;
        assert!(GatewayIdentity::get(&mut &gw[..]).is_err());
    }

    #[test]
    fn gateway_address_families() {
        let v4: SocketAddr = "10.0.0.7:1700".parse().expect("addr");
        let v6: SocketAddr = "[fe80::1]:1700".parse().expect("addr");
        for addr in [None, Some(v4), Some(v6)] {
            let gw = GatewayIdentity::new(DevEui(7), addr);
            let mut buf = BytesMut::new();
            gw.put(&mut buf);
            assert_eq!(buf.len(), GATEWAY_IDENTITY_SIZE);
            assert_eq!(GatewayIdentity::get(&mut &buf[..]).expect("decode"), gw);
        }
    }

    #[test]
    fn short_buffer_is_not_read() {
        let buf = [0u8; NETWORK_IDENTITY_SIZE - 1];
        assert!(matches!(
            NetworkIdentity::get(&mut &buf[..]),
            Err(ProtocolError::BufferTooSmall { .. })
        ));
    }
}
