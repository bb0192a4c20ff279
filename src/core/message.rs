//! # Messages
//!
//! Typed requests and responses of the binary protocol.
//!
//! A message is a [`Header`] followed by a tag-dependent body. Decoding
//! inspects the tag first and refuses buffers shorter than the tag's minimum
//! size; encoding computes [`Request::encoded_len`] / [`Response::encoded_len`]
//! up front so a caller-provided slice is either filled completely or left
//! untouched.

use crate::core::types::{DevAddr, DevEui, GatewayIdentity, NetworkIdentity};
use crate::core::wire::{
    Header, Tag, WireRecord, EUI_REQUEST_SIZE, GATEWAY_RESPONSE_SIZE, HEADER_SIZE,
    IDENTITY_REQUEST_SIZE, IDENTITY_RESPONSE_SIZE, LIST_RESPONSE_HEADER_SIZE,
    OPERATION_RESPONSE_SIZE,
};
use crate::error::{ProtocolError, Result, ResultCode};
use bytes::{Buf, BufMut, BytesMut};

/// Body of a request, one variant per request layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// `a`: lookup by EUI.
    Eui(DevEui),
    /// `i`: lookup by address.
    Addr(DevAddr),
    /// `p`, `r`.
    Identity(NetworkIdentity),
    /// `l`, `c`, `s`, `e` and their gateway counterparts.
    Operation { offset: u32, size: u8 },
    /// `A`, `I`, `P`, `R`.
    Gateway(GatewayIdentity),
}

impl RequestBody {
    fn encoded_len(&self) -> usize {
        match self {
            RequestBody::Eui(_) => 8,
            RequestBody::Addr(_) => 4,
            RequestBody::Identity(_) => NetworkIdentity::WIRE_SIZE,
            RequestBody::Operation { .. } => 5,
            RequestBody::Gateway(_) => GatewayIdentity::WIRE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub header: Header,
    pub body: RequestBody,
}

impl Request {
    pub fn addr_lookup(code: i32, access_code: u64, eui: DevEui) -> Self {
        Self {
            header: Header::new(Tag::AddrLookup, code, access_code),
            body: RequestBody::Eui(eui),
        }
    }

    pub fn eui_lookup(code: i32, access_code: u64, addr: DevAddr) -> Self {
        Self {
            header: Header::new(Tag::EuiLookup, code, access_code),
            body: RequestBody::Addr(addr),
        }
    }

    pub fn assign(code: i32, access_code: u64, identity: NetworkIdentity) -> Self {
        Self {
            header: Header::new(Tag::Assign, code, access_code),
            body: RequestBody::Identity(identity),
        }
    }

    pub fn remove(code: i32, access_code: u64, addr: DevAddr) -> Self {
        Self {
            header: Header::new(Tag::Remove, code, access_code),
            body: RequestBody::Identity(NetworkIdentity {
                addr,
                ..NetworkIdentity::default()
            }),
        }
    }

    /// `l`/`c`/`s`/`e` (or gateway `L`/`C`/`S`/`E`) request.
    pub fn operation(tag: Tag, code: i32, access_code: u64, offset: u32, size: u8) -> Self {
        Self {
            header: Header::new(tag, code, access_code),
            body: RequestBody::Operation { offset, size },
        }
    }

    pub fn list(code: i32, access_code: u64, offset: u32, size: u8) -> Self {
        Self::operation(Tag::List, code, access_code, offset, size)
    }

    /// `A`/`I`/`P`/`R` request.
    pub fn gateway(tag: Tag, code: i32, access_code: u64, gateway: GatewayIdentity) -> Self {
        Self {
            header: Header::new(tag, code, access_code),
            body: RequestBody::Gateway(gateway),
        }
    }

    pub fn tag(&self) -> Tag {
        self.header.tag
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let first = *buf.first().ok_or(ProtocolError::EmptyPacket)?;
        let tag = Tag::from_byte(first).ok_or(ProtocolError::UnknownTag(first))?;
        let needed = tag.min_request_size();
        if buf.len() < needed {
            return Err(ProtocolError::Truncated {
                tag: tag.as_char(),
                needed,
                actual: buf.len(),
            });
        }

        let mut cursor = buf;
        let header = Header::get(&mut cursor)?;
        let body = match tag {
            Tag::AddrLookup => RequestBody::Eui(DevEui(cursor.get_u64())),
            Tag::EuiLookup => RequestBody::Addr(DevAddr(cursor.get_u32())),
            Tag::Assign => RequestBody::Identity(NetworkIdentity::get(&mut cursor)?),
            // the address is the only key; the rest of a full record is ignored
            Tag::Remove => RequestBody::Identity(NetworkIdentity {
                addr: DevAddr(cursor.get_u32()),
                ..NetworkIdentity::default()
            }),
            Tag::List
            | Tag::Count
            | Tag::ForceSave
            | Tag::Close
            | Tag::GatewayList
            | Tag::GatewayCount
            | Tag::GatewayForceSave
            | Tag::GatewayClose => RequestBody::Operation {
                offset: cursor.get_u32(),
                size: cursor.get_u8(),
            },
            Tag::GatewayAddrLookup
            | Tag::GatewayIdLookup
            | Tag::GatewayAssign
            | Tag::GatewayRemove => RequestBody::Gateway(GatewayIdentity::get(&mut cursor)?),
        };
        Ok(Self { header, body })
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.body.encoded_len()
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        self.header.put(buf);
        match &self.body {
            RequestBody::Eui(eui) => buf.put_u64(eui.0),
            RequestBody::Addr(addr) => buf.put_u32(addr.0),
            RequestBody::Identity(identity) => identity.put(buf),
            RequestBody::Operation { offset, size } => {
                buf.put_u32(*offset);
                buf.put_u8(*size);
            }
            RequestBody::Gateway(gateway) => gateway.put(buf),
        }
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf
    }

    /// Encodes into `out`, returning the number of bytes written.
    pub fn encode_to_slice(&self, out: &mut [u8]) -> Result<usize> {
        write_slice(self.encoded_len(), out, |w| self.encode(w))
    }
}

/// Body of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    Identity(NetworkIdentity),
    Gateway(GatewayIdentity),
    Operation { offset: u32, size: u8, result: i32 },
    IdentityList { offset: u32, items: Vec<NetworkIdentity> },
    GatewayList { offset: u32, items: Vec<GatewayIdentity> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub header: Header,
    pub body: ResponseBody,
}

impl Response {
    pub fn operation(header: Header, offset: u32, size: u8, result: ResultCode) -> Self {
        Self {
            header,
            body: ResponseBody::Operation {
                offset,
                size,
                result: result.as_i32(),
            },
        }
    }

    /// Count reply: the record count travels in the `result` field and the
    /// header code is OK.
    pub fn count(header: Header, offset: u32, size: u8, count: usize) -> Self {
        Self {
            header: Header {
                code: ResultCode::Ok.as_i32(),
                ..header
            },
            body: ResponseBody::Operation {
                offset,
                size,
                result: count.min(i32::MAX as usize) as i32,
            },
        }
    }

    /// Reply to a request that failed the code / access code check.
    pub fn access_denied(tag: Tag) -> Self {
        Self::operation(
            Header::new(tag, ResultCode::AccessDenied.as_i32(), 0),
            0,
            0,
            ResultCode::AccessDenied,
        )
    }

    pub fn tag(&self) -> Tag {
        self.header.tag
    }

    /// Result carried by the response: the `result` field of operation
    /// responses, the header code otherwise.
    pub fn result(&self) -> i32 {
        match &self.body {
            ResponseBody::Operation { result, .. } => *result,
            _ => self.header.code,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match &self.body {
            ResponseBody::Identity(_) => IDENTITY_RESPONSE_SIZE,
            ResponseBody::Gateway(_) => GATEWAY_RESPONSE_SIZE,
            ResponseBody::Operation { .. } => OPERATION_RESPONSE_SIZE,
            ResponseBody::IdentityList { items, .. } => {
                list_len(items.len(), NetworkIdentity::WIRE_SIZE)
            }
            ResponseBody::GatewayList { items, .. } => {
                list_len(items.len(), GatewayIdentity::WIRE_SIZE)
            }
        }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        self.header.put(buf);
        match &self.body {
            ResponseBody::Identity(identity) => identity.put(buf),
            ResponseBody::Gateway(gateway) => gateway.put(buf),
            ResponseBody::Operation {
                offset,
                size,
                result,
            } => {
                buf.put_u32(*offset);
                buf.put_u8(*size);
                buf.put_u32(*result as u32);
            }
            ResponseBody::IdentityList { offset, items } => {
                put_list_header(buf, *offset, items.len());
                items.iter().for_each(|item| item.put(buf));
            }
            ResponseBody::GatewayList { offset, items } => {
                put_list_header(buf, *offset, items.len());
                items.iter().for_each(|item| item.put(buf));
            }
        }
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf
    }

    pub fn encode_to_slice(&self, out: &mut [u8]) -> Result<usize> {
        write_slice(self.encoded_len(), out, |w| self.encode(w))
    }

    /// Client-side decoding.
    ///
    /// A lookup reply shorter than the full record but at least an operation
    /// response long is an operation response (access denied). So is a list
    /// reply that carries the access-denied code.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let first = *buf.first().ok_or(ProtocolError::EmptyPacket)?;
        let tag = Tag::from_byte(first).ok_or(ProtocolError::UnknownTag(first))?;
        let truncated = |needed: usize| ProtocolError::Truncated {
            tag: tag.as_char(),
            needed,
            actual: buf.len(),
        };
        if buf.len() < OPERATION_RESPONSE_SIZE {
            return Err(truncated(OPERATION_RESPONSE_SIZE));
        }

        let mut cursor = buf;
        let header = Header::get(&mut cursor)?;
        let denied = header.code == ResultCode::AccessDenied.as_i32()
            && buf.len() == OPERATION_RESPONSE_SIZE;
        let body = match tag {
            Tag::AddrLookup | Tag::EuiLookup if buf.len() >= IDENTITY_RESPONSE_SIZE => {
                ResponseBody::Identity(NetworkIdentity::get(&mut cursor)?)
            }
            Tag::GatewayAddrLookup | Tag::GatewayIdLookup if buf.len() >= GATEWAY_RESPONSE_SIZE => {
                ResponseBody::Gateway(GatewayIdentity::get(&mut cursor)?)
            }
            Tag::List | Tag::GatewayList if !denied => {
                let offset = cursor.get_u32();
                let _size = cursor.get_u8();
                let count = cursor.get_u32() as usize;
                if tag == Tag::List {
                    ResponseBody::IdentityList {
                        offset,
                        items: get_records(&mut cursor, count, buf.len())
                            .map_err(|_| truncated(list_len(count, NetworkIdentity::WIRE_SIZE)))?,
                    }
                } else {
                    ResponseBody::GatewayList {
                        offset,
                        items: get_records(&mut cursor, count, buf.len())
                            .map_err(|_| truncated(list_len(count, GatewayIdentity::WIRE_SIZE)))?,
                    }
                }
            }
            _ => ResponseBody::Operation {
                offset: cursor.get_u32(),
                size: cursor.get_u8(),
                result: cursor.get_u32() as i32,
            },
        };
        Ok(Self { header, body })
    }
}

fn list_len(count: usize, record_size: usize) -> usize {
    LIST_RESPONSE_HEADER_SIZE + count * record_size
}

fn put_list_header<B: BufMut>(buf: &mut B, offset: u32, count: usize) {
    buf.put_u32(offset);
    buf.put_u8(count.min(u8::MAX as usize) as u8);
    buf.put_u32(count as u32);
}

fn get_records<T: WireRecord>(cursor: &mut &[u8], count: usize, total: usize) -> Result<Vec<T>> {
    let needed = count
        .checked_mul(T::WIRE_SIZE)
        .ok_or(ProtocolError::BufferTooSmall {
            needed: usize::MAX,
            capacity: total,
        })?;
    if cursor.remaining() < needed {
        return Err(ProtocolError::BufferTooSmall {
            needed,
            capacity: cursor.remaining(),
        });
    }
    (0..count).map(|_| T::get(&mut *cursor)).collect()
}

fn write_slice(len: usize, out: &mut [u8], write: impl FnOnce(&mut &mut [u8])) -> Result<usize> {
    if out.len() < len {
        return Err(ProtocolError::BufferTooSmall {
            needed: len,
            capacity: out.len(),
        });
    }
    let mut window = &mut out[..len];
    write(&mut window);
    Ok(len)
}

/// Remove requests may arrive in short form (header + address).
pub fn is_short_remove(buf: &[u8]) -> bool {
    buf.first() == Some(&Tag::Remove.as_byte())
        && (EUI_REQUEST_SIZE..IDENTITY_REQUEST_SIZE).contains(&buf.len())
}
