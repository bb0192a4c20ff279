//! # Identity Record Model
//!
//! Fixed-size LoRaWAN value types exchanged by the directory.
//!
//! Every type has a textual form (upper-case hexadecimal for numbers and
//! keys) used by the JSON and URN codecs and by the JSON-file backend; the
//! binary layout lives in [`crate::core::wire`].
//!
//! ## NetID / DevAddr
//! ```text
//! NetID   [type:3][rfu][id]                     (24 bits)
//! DevAddr [prefix: type ones + 0][NwkID][NwkAddr] (32 bits)
//! ```
//! The widths of each part depend on the NetID type (0..7).

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// Size of a [`NetworkIdentity`] on the wire.
pub const NETWORK_IDENTITY_SIZE: usize = 95;

/// Size of a [`GatewayIdentity`] on the wire.
pub const GATEWAY_IDENTITY_SIZE: usize = 27;

/// DevAddr NwkID width per NetID type.
const NWK_ID_BITS: [u32; 8] = [6, 6, 9, 11, 12, 13, 15, 17];

/// DevAddr NwkAddr width per NetID type.
const NWK_ADDR_BITS: [u32; 8] = [25, 24, 20, 17, 15, 13, 10, 7];

/// NetID identifier width per NetID type.
const NET_ID_BITS: [u32; 8] = [6, 6, 9, 21, 21, 21, 21, 21];

#[inline]
fn mask(bits: u32) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    }
}

fn parse_hex(value: &str, max_digits: usize, what: &str) -> Result<u64> {
    let cleaned: String = value
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .chars()
        .filter(|c| *c != '-')
        .collect();
    if cleaned.is_empty() || cleaned.len() > max_digits {
        return Err(ProtocolError::InvalidField(format!(
            "{what}: expected 1..{max_digits} hex digits, got '{value}'"
        )));
    }
    u64::from_str_radix(&cleaned, 16)
        .map_err(|e| ProtocolError::InvalidField(format!("{what}: '{value}': {e}")))
}

/// Routes a type through its `Display`/`FromStr` text form for serde.
macro_rules! text_serde {
    ($ty:ty) => {
        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.to_string()
            }
        }

        impl TryFrom<String> for $ty {
            type Error = ProtocolError;

            fn try_from(value: String) -> Result<Self> {
                value.parse()
            }
        }
    };
}

/// 24-bit LoRaWAN network identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct NetId(u32);

impl NetId {
    /// Build a NetID from its type and identifier. RFU bits are zero.
    pub fn new(net_type: u8, id: u32) -> Result<Self> {
        if net_type > 7 {
            return Err(ProtocolError::InvalidField(format!(
                "NetID type {net_type} out of range 0..7"
            )));
        }
        let bits = NET_ID_BITS[net_type as usize];
        if id > mask(bits) {
            return Err(ProtocolError::InvalidField(format!(
                "NetID identifier {id:#x} does not fit {bits} bits of type {net_type}"
            )));
        }
        Ok(Self(((net_type as u32) << 21) | id))
    }

    pub fn from_u32(value: u32) -> Self {
        Self(value & 0x00FF_FFFF)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn net_type(&self) -> u8 {
        ((self.0 >> 21) & 0x7) as u8
    }

    /// Identifier part (without type and RFU bits).
    pub fn id(&self) -> u32 {
        self.0 & mask(NET_ID_BITS[self.net_type() as usize])
    }

    /// Number of RFU bits for this NetID type.
    pub fn rfu_bits(&self) -> u32 {
        21 - NET_ID_BITS[self.net_type() as usize]
    }

    /// NwkID embedded into device addresses of this network.
    pub fn nwk_id(&self) -> u32 {
        self.0 & mask(NWK_ID_BITS[self.net_type() as usize])
    }

    pub fn to_bytes(&self) -> [u8; 3] {
        let b = self.0.to_be_bytes();
        [b[1], b[2], b[3]]
    }

    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        Self(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
    }

    /// Lowest device address of this network.
    pub fn min_addr(&self) -> DevAddr {
        DevAddr::from_parts(self.net_type(), self.nwk_id(), 0)
    }

    /// Highest device address of this network.
    pub fn max_addr(&self) -> DevAddr {
        let t = self.net_type();
        DevAddr::from_parts(t, self.nwk_id(), mask(NWK_ADDR_BITS[t as usize]))
    }

    /// Whether `addr` belongs to the address range of this network.
    pub fn contains(&self, addr: DevAddr) -> bool {
        addr.net_id_type() == Some(self.net_type()) && addr.nwk_id() == Some(self.nwk_id())
    }
}

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06X}", self.0)
    }
}

impl FromStr for NetId {
    type Err = ProtocolError;

    /// Accepts `<hex>` or `<type>:<hex id>`.
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((t, id)) => {
                let net_type = parse_hex(t, 1, "NetID type")? as u8;
                NetId::new(net_type, parse_hex(id, 6, "NetID")? as u32)
            }
            None => Ok(NetId::from_u32(parse_hex(s, 6, "NetID")? as u32)),
        }
    }
}

text_serde!(NetId);

/// 32-bit device network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DevAddr(pub u32);

impl DevAddr {
    /// Compose an address from NetID type, NwkID and NwkAddr.
    pub fn new(net_type: u8, nwk_id: u32, nwk_addr: u32) -> Result<Self> {
        if net_type > 7 {
            return Err(ProtocolError::InvalidField(format!(
                "NetID type {net_type} out of range 0..7"
            )));
        }
        let t = net_type as usize;
        if nwk_id > mask(NWK_ID_BITS[t]) || nwk_addr > mask(NWK_ADDR_BITS[t]) {
            return Err(ProtocolError::InvalidField(format!(
                "NwkID {nwk_id:#x} / NwkAddr {nwk_addr:#x} do not fit type {net_type}"
            )));
        }
        Ok(Self::from_parts(net_type, nwk_id, nwk_addr))
    }

    fn from_parts(net_type: u8, nwk_id: u32, nwk_addr: u32) -> Self {
        let t = net_type as usize;
        let prefix = if net_type == 0 {
            0
        } else {
            u32::MAX << (32 - net_type as u32)
        };
        Self(prefix | (nwk_id << NWK_ADDR_BITS[t]) | nwk_addr)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// NetID type encoded by the leading one-bits, `None` for eight or more.
    pub fn net_id_type(&self) -> Option<u8> {
        let ones = self.0.leading_ones();
        if ones >= 8 {
            None
        } else {
            Some(ones as u8)
        }
    }

    pub fn nwk_id(&self) -> Option<u32> {
        self.net_id_type().map(|t| {
            let t = t as usize;
            (self.0 >> NWK_ADDR_BITS[t]) & mask(NWK_ID_BITS[t])
        })
    }

    pub fn nwk_addr(&self) -> Option<u32> {
        self.net_id_type()
            .map(|t| self.0 & mask(NWK_ADDR_BITS[t as usize]))
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for DevAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

impl FromStr for DevAddr {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(DevAddr(parse_hex(s, 8, "device address")? as u32))
    }
}

text_serde!(DevAddr);

/// 64-bit extended unique identifier (device, application or gateway).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DevEui(pub u64);

impl DevEui {
    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for DevEui {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

impl FromStr for DevEui {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(DevEui(parse_hex(s, 16, "EUI")?))
    }
}

text_serde!(DevEui);

/// 128-bit symmetric key, kept as raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Key128(pub [u8; 16]);

impl Key128 {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

// Keys stay out of debug logs.
impl fmt::Debug for Key128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key128(..)")
    }
}

impl fmt::Display for Key128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl FromStr for Key128 {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| ProtocolError::InvalidField(format!("key '{s}': {e}")))?;
        let key: [u8; 16] = bytes.try_into().map_err(|_| {
            ProtocolError::InvalidField(format!("key '{s}': expected 32 hex digits"))
        })?;
        Ok(Key128(key))
    }
}

text_serde!(Key128);

/// Last device nonce seen during OTAA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DevNonce(pub u16);

impl fmt::Display for DevNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

impl FromStr for DevNonce {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(DevNonce(parse_hex(s, 4, "device nonce")? as u16))
    }
}

text_serde!(DevNonce);

/// Last 24-bit join nonce issued during OTAA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct JoinNonce(u32);

impl JoinNonce {
    pub fn new(value: u32) -> Self {
        Self(value & 0x00FF_FFFF)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for JoinNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06X}", self.0)
    }
}

impl FromStr for JoinNonce {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(JoinNonce(parse_hex(s, 6, "join nonce")? as u32))
    }
}

text_serde!(JoinNonce);

/// Eight byte search label, NUL padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DeviceName(pub [u8; 8]);

impl DeviceName {
    /// Takes at most the first 8 bytes of `value`.
    pub fn new(value: &str) -> Self {
        let mut name = [0u8; 8];
        let bytes = value.as_bytes();
        let len = bytes.len().min(name.len());
        name[..len].copy_from_slice(&bytes[..len]);
        Self(name)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.iter().position(|b| *b == 0).unwrap_or(self.0.len());
        f.write_str(&String::from_utf8_lossy(&self.0[..end]))
    }
}

impl FromStr for DeviceName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(DeviceName::new(s))
    }
}

text_serde!(DeviceName);

/// Device activation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
#[repr(u8)]
pub enum Activation {
    #[default]
    Abp = 0,
    Otaa = 1,
}

impl Activation {
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(Activation::Abp),
            1 => Some(Activation::Otaa),
            _ => None,
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Activation::Abp => "ABP",
            Activation::Otaa => "OTAA",
        })
    }
}

impl FromStr for Activation {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ABP" => Ok(Activation::Abp),
            "OTAA" => Ok(Activation::Otaa),
            other => Err(ProtocolError::InvalidField(format!(
                "activation '{other}'"
            ))),
        }
    }
}

text_serde!(Activation);

/// LoRaWAN device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
#[repr(u8)]
pub enum DeviceClass {
    #[default]
    A = 0,
    B = 1,
    C = 2,
}

impl DeviceClass {
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(DeviceClass::A),
            1 => Some(DeviceClass::B),
            2 => Some(DeviceClass::C),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceClass::A => "A",
            DeviceClass::B => "B",
            DeviceClass::C => "C",
        })
    }
}

impl FromStr for DeviceClass {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.trim_start_matches("CLASS_") {
            "A" => Ok(DeviceClass::A),
            "B" => Ok(DeviceClass::B),
            "C" => Ok(DeviceClass::C),
            _ => Err(ProtocolError::InvalidField(format!("device class '{s}'"))),
        }
    }
}

text_serde!(DeviceClass);

/// LoRaWAN specification version packed in one byte:
/// bits 0-1 major, bits 2-3 minor, bits 4-7 release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct LorawanVersion {
    pub major: u8,
    pub minor: u8,
    pub release: u8,
}

impl LorawanVersion {
    pub fn new(major: u8, minor: u8, release: u8) -> Self {
        Self {
            major: major & 0x03,
            minor: minor & 0x03,
            release: release & 0x0F,
        }
    }

    pub fn to_byte(&self) -> u8 {
        (self.major & 0x03) | ((self.minor & 0x03) << 2) | ((self.release & 0x0F) << 4)
    }

    pub fn from_byte(value: u8) -> Self {
        Self {
            major: value & 0x03,
            minor: (value >> 2) & 0x03,
            release: value >> 4,
        }
    }
}

impl Default for LorawanVersion {
    fn default() -> Self {
        Self::new(1, 0, 0)
    }
}

impl fmt::Display for LorawanVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.release)
    }
}

impl FromStr for LorawanVersion {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ProtocolError::InvalidField(format!("LoRaWAN version '{s}'"));
        let mut parts = s.trim().split('.');
        let mut next = |limit: u8| -> Result<u8> {
            match parts.next() {
                None => Ok(0),
                Some(p) => {
                    let v: u8 = p.parse().map_err(|_| invalid())?;
                    if v > limit {
                        Err(invalid())
                    } else {
                        Ok(v)
                    }
                }
            }
        };
        let major = next(3)?;
        let minor = next(3)?;
        let release = next(15)?;
        Ok(Self::new(major, minor, release))
    }
}

text_serde!(LorawanVersion);

/// Device identity: everything stored for a device except its address.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceIdentity {
    pub activation: Activation,
    #[serde(rename = "class")]
    pub device_class: DeviceClass,
    #[serde(rename = "deveui")]
    pub dev_eui: DevEui,
    #[serde(rename = "nwkSKey")]
    pub nwk_s_key: Key128,
    #[serde(rename = "appSKey")]
    pub app_s_key: Key128,
    pub version: LorawanVersion,
    #[serde(rename = "appeui")]
    pub app_eui: DevEui,
    #[serde(rename = "appKey")]
    pub app_key: Key128,
    #[serde(rename = "nwkKey")]
    pub nwk_key: Key128,
    #[serde(rename = "devNonce")]
    pub dev_nonce: DevNonce,
    #[serde(rename = "joinNonce")]
    pub join_nonce: JoinNonce,
    pub name: DeviceName,
}

impl DeviceIdentity {
    /// ABP device with pre-provisioned session keys.
    pub fn abp(
        device_class: DeviceClass,
        dev_eui: DevEui,
        nwk_s_key: Key128,
        app_s_key: Key128,
        version: LorawanVersion,
        name: &str,
    ) -> Self {
        Self {
            activation: Activation::Abp,
            device_class,
            dev_eui,
            nwk_s_key,
            app_s_key,
            version,
            name: DeviceName::new(name),
            ..Self::default()
        }
    }
}

/// Address + device identity: the unit of storage and lookup.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkIdentity {
    pub addr: DevAddr,
    #[serde(flatten)]
    pub device: DeviceIdentity,
}

impl NetworkIdentity {
    pub fn new(addr: DevAddr, device: DeviceIdentity) -> Self {
        Self { addr, device }
    }
}

/// Gateway EUI and the socket address it was last seen at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GatewayIdentity {
    #[serde(rename = "gwid")]
    pub gateway_id: DevEui,
    #[serde(default)]
    pub addr: Option<SocketAddr>,
}

impl GatewayIdentity {
    pub fn new(gateway_id: DevEui, addr: Option<SocketAddr>) -> Self {
        Self { gateway_id, addr }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn devaddr_layout_per_type() {
        for t in 0..8u8 {
            let max_id = mask(NWK_ID_BITS[t as usize]);
            let max_addr = mask(NWK_ADDR_BITS[t as usize]);
            let addr = DevAddr::new(t, max_id, max_addr).expect("fits");
            assert_eq!(addr.net_id_type(), Some(t));
            assert_eq!(addr.nwk_id(), Some(max_id));
            assert_eq!(addr.nwk_addr(), Some(max_addr));

            let low = DevAddr::new(t, 0, 0).expect("fits");
            assert_eq!(low.net_id_type(), Some(t));
        }
        assert!(DevAddr::new(0, 64, 0).is_err());
        assert!(DevAddr::new(8, 0, 0).is_err());
        assert_eq!(DevAddr(0xFF00_0000).net_id_type(), None);
    }

    #[test]
    fn netid_range_contains_only_own_addresses() {
        let net = NetId::new(3, 0x0005).expect("netid");
        assert_eq!(net.net_type(), 3);
        assert_eq!(net.rfu_bits(), 0);
        let min = net.min_addr();
        let max = net.max_addr();
        assert!(min < max);
        assert!(net.contains(min));
        assert!(net.contains(max));
        assert!(!net.contains(DevAddr(max.0 + 1)));
        assert!(!net.contains(DevAddr(0x0000_0001)));

        let type0 = NetId::new(0, 0x3F).expect("netid");
        assert_eq!(type0.rfu_bits(), 15);
        assert_eq!(type0.max_addr(), DevAddr(0x7FFF_FFFF));
    }

    #[test]
    fn netid_bytes_roundtrip() {
        let net = NetId::new(6, 0x1A_BCDE).expect("netid");
        assert_eq!(NetId::from_bytes(net.to_bytes()), net);
        assert_eq!("6:1ABCDE".parse::<NetId>().expect("parse"), net);
    }

    #[test]
    fn text_forms() {
        assert_eq!(DevAddr(1).to_string(), "00000001");
        assert_eq!(DevEui(0x0102030405060708).to_string(), "0102030405060708");
        assert_eq!("00-0C-29-19-B2-37-00-01".parse::<DevEui>().map(|e| e.0).ok(), Some(0x000C_2919_B237_0001));
        assert!("123456789012345678".parse::<DevEui>().is_err());
        let key: Key128 = "000102030405060708090A0B0C0D0E0F".parse().expect("key");
        assert_eq!(key.0[15], 0x0F);
        assert_eq!(format!("{key:?}"), "Key128(..)");
        assert_eq!("1.0.3".parse::<LorawanVersion>().expect("version").release, 3);
        assert!("1.9.0".parse::<LorawanVersion>().is_err());
        assert_eq!("class_c".parse::<DeviceClass>().expect("class"), DeviceClass::C);
    }

    #[test]
    fn version_byte_packing() {
        let v = LorawanVersion::new(1, 1, 4);
        assert_eq!(v.to_byte(), 0b0100_0101);
        assert_eq!(LorawanVersion::from_byte(v.to_byte()), v);
    }

    #[test]
    fn device_name_is_truncated_and_trimmed() {
        let name = DeviceName::new("sensor-0042");
        assert_eq!(name.to_string(), "sensor-0");
        assert_eq!(DeviceName::new("ab").to_string(), "ab");
    }

    #[test]
    fn identity_json_uses_hex_fields() {
        let identity = NetworkIdentity::new(
            DevAddr(0x2601_1234),
            DeviceIdentity::abp(
                DeviceClass::C,
                DevEui(0x0102030405060708),
                Key128([0x11; 16]),
                Key128([0x22; 16]),
                LorawanVersion::new(1, 0, 3),
                "meter",
            ),
        );
        let json = serde_json::to_value(&identity).expect("serialize");
        assert_eq!(json["addr"], "26011234");
        assert_eq!(json["class"], "C");
        assert_eq!(json["deveui"], "0102030405060708");
        assert_eq!(json["version"], "1.0.3");
        let back: NetworkIdentity = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, identity);
    }
}
