//! # URN Codec
//!
//! Textual identity exchanged out of band (QR codes, provisioning sheets):
//!
//! ```text
//! LW:D0:<AppEUI>:<DevEUI>:<ProfileID>[:O<owner>][:S<serial>][:P<tag><value>]*[:C<crc>]
//! ```
//!
//! Proprietary `P` tags carry the rest of the identity and, optionally, a
//! command so a URN can be executed like a binary request:
//!
//! | tag | field | tag | field |
//! |---|---|---|---|
//! | `D` | address | `A` | appKey |
//! | `T` | activation | `N` | nwkKey |
//! | `C` | class | `O` | devNonce |
//! | `W` | nwkSKey | `J` | joinNonce |
//! | `S` | appSKey | `X` | command tag |
//! | `V` | version | `F` / `Z` | offset / page size (hex) |
//!
//! The checksum is CRC-16/MODBUS over the upper-cased text preceding `:C`.

use crate::core::message::Request;
use crate::core::types::{DevAddr, DeviceName, GatewayIdentity, NetworkIdentity};
use crate::core::wire::Tag;
use crate::error::{ProtocolError, Result};
use std::fmt::Write as _;
use std::str::FromStr;

const PREFIX: &str = "LW";
const SCHEMA: &str = "D0";

/// CRC-16/MODBUS (poly 0xA001 reflected, init 0xFFFF).
pub fn crc16_modbus(data: &[u8]) -> u16 {
    data.iter().fold(0xFFFF_u16, |mut crc, byte| {
        crc ^= *byte as u16;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xA001
            } else {
                crc >> 1
            };
        }
        crc
    })
}

/// Parsed URN.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdentityUrn {
    pub identity: NetworkIdentity,
    pub profile_id: u32,
    pub owner_token: String,
    pub serial_number: String,
    /// `X` command tag, if any.
    pub command: Option<char>,
    pub offset: u32,
    pub size: u8,
    /// Checksum carried by the text, if any.
    pub checksum: Option<u16>,
    /// Whether `checksum` matches the text.
    pub checksum_valid: Option<bool>,
}

impl IdentityUrn {
    pub fn new(identity: NetworkIdentity) -> Self {
        let profile_id = profile_id_of(&identity.device.name);
        Self {
            identity,
            profile_id,
            ..Self::default()
        }
    }

    /// Render as text. `proprietary` appends the `P` fields, `checksum` the
    /// trailing `:C`.
    pub fn to_urn_string(&self, proprietary: bool, checksum: bool) -> String {
        let d = &self.identity.device;
        let mut out = format!(
            "{PREFIX}:{SCHEMA}:{}:{}:{:08X}",
            d.app_eui, d.dev_eui, self.profile_id
        );
        if !self.owner_token.is_empty() {
            let _ = write!(out, ":O{}", self.owner_token);
        }
        if !self.serial_number.is_empty() {
            let _ = write!(out, ":S{}", self.serial_number);
        }
        if proprietary {
            let fields = [
                ('D', self.identity.addr.to_string()),
                ('T', d.activation.to_string()),
                ('C', d.device_class.to_string()),
                ('W', d.nwk_s_key.to_string()),
                ('S', d.app_s_key.to_string()),
                ('V', d.version.to_string()),
                ('A', d.app_key.to_string()),
                ('N', d.nwk_key.to_string()),
                ('O', d.dev_nonce.to_string()),
                ('J', d.join_nonce.to_string()),
            ];
            for (tag, value) in fields {
                let _ = write!(out, ":P{tag}{value}");
            }
            if let Some(command) = self.command {
                let _ = write!(out, ":PX{command}:PF{:X}:PZ{:X}", self.offset, self.size);
            }
        }
        if checksum {
            let upper = out.to_ascii_uppercase();
            let crc = crc16_modbus(upper.as_bytes());
            let _ = write!(out, ":C{crc:04X}");
        }
        // the command tag is case-sensitive, keep it as written
        match self.command {
            Some(_) if proprietary => out,
            _ => out.to_ascii_uppercase(),
        }
    }

    /// Convert an `X`-command URN into a request.
    pub fn into_request(self, code: i32, access_code: u64) -> Result<Request> {
        let command = self
            .command
            .ok_or_else(|| ProtocolError::InvalidUrn("no command".to_string()))?;
        let byte = u8::try_from(u32::from(command))
            .map_err(|_| ProtocolError::InvalidUrn(format!("command '{command}'")))?;
        let tag = Tag::from_byte(byte).ok_or(ProtocolError::UnknownTag(byte))?;
        let gateway = GatewayIdentity::new(self.identity.device.dev_eui, None);
        Ok(match tag {
            Tag::AddrLookup => {
                Request::addr_lookup(code, access_code, self.identity.device.dev_eui)
            }
            Tag::EuiLookup => Request::eui_lookup(code, access_code, self.identity.addr),
            Tag::Assign => Request::assign(code, access_code, self.identity),
            Tag::Remove => Request::remove(code, access_code, self.identity.addr),
            Tag::GatewayAddrLookup
            | Tag::GatewayIdLookup
            | Tag::GatewayAssign
            | Tag::GatewayRemove => Request::gateway(tag, code, access_code, gateway),
            _ => Request::operation(tag, code, access_code, self.offset, self.size),
        })
    }
}

fn profile_id_of(name: &DeviceName) -> u32 {
    u32::from_str_radix(name.to_string().trim(), 16).unwrap_or(0)
}

fn hex_u32(value: &str, what: &str) -> Result<u32> {
    u32::from_str_radix(value, 16)
        .map_err(|e| ProtocolError::InvalidUrn(format!("{what} '{value}': {e}")))
}

impl FromStr for IdentityUrn {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        let tokens: Vec<&str> = text.split(':').collect();
        if tokens.len() < 5 {
            return Err(ProtocolError::InvalidUrn(format!(
                "expected at least 5 fields, got {}",
                tokens.len()
            )));
        }
        if !tokens[0].eq_ignore_ascii_case(PREFIX) || !tokens[1].eq_ignore_ascii_case(SCHEMA) {
            return Err(ProtocolError::InvalidUrn(format!(
                "expected '{PREFIX}:{SCHEMA}:' prefix"
            )));
        }

        let mut urn = IdentityUrn::default();
        let d = &mut urn.identity.device;
        d.app_eui = tokens[2].parse()?;
        d.dev_eui = tokens[3].parse()?;
        urn.profile_id = hex_u32(tokens[4], "profile id")?;
        if urn.profile_id != 0 {
            d.name = DeviceName::new(&format!("{:08X}", urn.profile_id));
        }

        let mut starts = Vec::with_capacity(tokens.len());
        let mut pos = 0;
        for token in &tokens {
            starts.push(pos);
            pos += token.len() + 1;
        }

        for (i, token) in tokens.iter().enumerate().skip(5) {
            let mut chars = token.chars();
            match chars.next() {
                Some('C') | Some('c') => {
                    let crc = u16::from_str_radix(chars.as_str(), 16).map_err(|e| {
                        ProtocolError::InvalidUrn(format!("checksum '{token}': {e}"))
                    })?;
                    let signed = &text[..starts[i] - 1];
                    let computed = crc16_modbus(signed.to_ascii_uppercase().as_bytes());
                    urn.checksum = Some(crc);
                    urn.checksum_valid = Some(computed == crc);
                }
                Some('O') | Some('o') => urn.owner_token = chars.as_str().to_string(),
                Some('S') | Some('s') => urn.serial_number = chars.as_str().to_string(),
                Some('P') | Some('p') => {
                    let Some(field) = chars.next() else { continue };
                    let value = chars.as_str();
                    let d = &mut urn.identity.device;
                    match field.to_ascii_uppercase() {
                        'D' => urn.identity.addr = value.parse::<DevAddr>()?,
                        'T' => d.activation = value.parse()?,
                        'C' => d.device_class = value.parse()?,
                        'W' => d.nwk_s_key = value.parse()?,
                        'S' => d.app_s_key = value.parse()?,
                        'V' => d.version = value.parse()?,
                        'A' => d.app_key = value.parse()?,
                        'N' => d.nwk_key = value.parse()?,
                        'O' => d.dev_nonce = value.parse()?,
                        'J' => d.join_nonce = value.parse()?,
                        'X' => urn.command = value.chars().next(),
                        'F' => urn.offset = hex_u32(value, "offset")?,
                        'Z' => urn.size = hex_u32(value, "size")?.min(u8::MAX as u32) as u8,
                        _ => {}
                    }
                }
                _ => {}
            }
        }
        Ok(urn)
    }
}

impl From<NetworkIdentity> for IdentityUrn {
    fn from(identity: NetworkIdentity) -> Self {
        Self::new(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Activation, DevEui, DeviceClass, Key128};

    #[test]
    fn crc16_modbus_check_value() {
        assert_eq!(crc16_modbus(b"123456789"), 0x4B37);
        assert_eq!(crc16_modbus(b""), 0xFFFF);
    }

    #[test]
    fn minimal_urn() {
        let urn: IdentityUrn = "LW:D0:1111111111111111:2222222222222222:00000000".parse().unwrap();
        assert_eq!(urn.identity.device.app_eui, DevEui(0x1111_1111_1111_1111));
        assert_eq!(urn.identity.device.dev_eui, DevEui(0x2222_2222_2222_2222));
        assert_eq!(urn.checksum, None);
    }

    #[test]
    fn proprietary_fields_roundtrip_through_text() {
        let mut identity = NetworkIdentity::default();
        identity.addr = DevAddr(0x2601_1234);
        identity.device.activation = Activation::Otaa;
        identity.device.device_class = DeviceClass::B;
        identity.device.app_key = Key128([0xA5; 16]);
        identity.device.name = DeviceName::new("00C0FFEE");
        let urn = IdentityUrn::new(identity.clone());
        assert_eq!(urn.profile_id, 0x00C0_FFEE);

        let text = urn.to_urn_string(true, true);
        assert!(text.starts_with("LW:D0:0000000000000000:0000000000000000:00C0FFEE:PD26011234"));
        let parsed: IdentityUrn = text.parse().unwrap();
        assert_eq!(parsed.checksum_valid, Some(true));
        assert_eq!(parsed.identity, identity);
    }

    #[test]
    fn bad_checksum_is_reported_not_enforced() {
        let text = "LW:D0:1111111111111111:2222222222222222:00000000:C0000";
        let urn: IdentityUrn = text.parse().unwrap();
        assert_eq!(urn.checksum_valid, Some(false));
        assert_eq!(urn.identity.device.dev_eui, DevEui(0x2222_2222_2222_2222));
    }

    #[test]
    fn rejects_foreign_schema() {
        assert!("XX:D0:1:2:0".parse::<IdentityUrn>().is_err());
        assert!("LW:D0:1:2".parse::<IdentityUrn>().is_err());
    }

    #[test]
    fn command_urn_becomes_request() {
        let urn: IdentityUrn = "LW:D0:0:0102030405060708:0:PXa".parse().unwrap();
        let request = urn.into_request(42, 42).unwrap();
        assert_eq!(request.tag(), Tag::AddrLookup);

        let list: IdentityUrn = "LW:D0:0:0:0:PXl:PF2:PZA".parse().unwrap();
        let request = list.into_request(42, 42).unwrap();
        assert_eq!(
            request.body,
            crate::core::message::RequestBody::Operation { offset: 2, size: 10 }
        );
    }
}
