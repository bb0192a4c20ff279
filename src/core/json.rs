//! # JSON Text Codec
//!
//! One JSON object per request, decoded into the same [`Request`] the binary
//! codec produces and executed by the same dispatcher:
//!
//! ```text
//! {"tag":"a","code":42,"accessCode":42,"eui":"0102030405060708"}
//! {"tag":"i","code":42,"accessCode":42,"addr":"00000001"}
//! {"tag":"p","code":42,"accessCode":42,"addr":"00000001","deveui":"...",...}
//! {"tag":"l","code":42,"accessCode":42,"offset":0,"size":10}
//! {"tag":"A","code":42,"accessCode":42,"gwid":"0000000000000007"}
//! ```
//!
//! Replies: identity / gateway objects for lookups, arrays for lists, a bare
//! number for counts and `{"code": n}` for everything else (including
//! failed lookups and lists).

use crate::core::message::{Request, Response, ResponseBody};
use crate::core::types::{DevEui, GatewayIdentity, NetworkIdentity};
use crate::core::wire::Tag;
use crate::error::{ProtocolError, Result, ResultCode};
use crate::protocol::Dispatcher;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use tracing::debug;

/// Page size used when a list request omits `size`.
pub const DEFAULT_PAGE_SIZE: u8 = 10;

fn default_page_size() -> u8 {
    DEFAULT_PAGE_SIZE
}

/// A request as it appears on the JSON listener.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextRequest {
    pub tag: char,
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub access_code: u64,
    #[serde(default)]
    pub eui: Option<DevEui>,
    #[serde(default)]
    pub offset: u32,
    #[serde(default = "default_page_size")]
    pub size: u8,
    #[serde(default)]
    pub gwid: Option<DevEui>,
    #[serde(default)]
    pub gwaddr: Option<SocketAddr>,
    #[serde(flatten)]
    pub identity: NetworkIdentity,
}

impl TextRequest {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn into_request(self) -> Result<Request> {
        let byte = u8::try_from(u32::from(self.tag))
            .map_err(|_| ProtocolError::InvalidField(format!("tag '{}'", self.tag)))?;
        let tag = Tag::from_byte(byte).ok_or(ProtocolError::UnknownTag(byte))?;
        let (code, access) = (self.code, self.access_code);
        let gateway = GatewayIdentity::new(self.gwid.unwrap_or_default(), self.gwaddr);

        Ok(match tag {
            Tag::AddrLookup => Request::addr_lookup(
                code,
                access,
                self.eui.unwrap_or(self.identity.device.dev_eui),
            ),
            Tag::EuiLookup => Request::eui_lookup(code, access, self.identity.addr),
            Tag::Assign => Request::assign(code, access, self.identity),
            Tag::Remove => Request::remove(code, access, self.identity.addr),
            Tag::List
            | Tag::Count
            | Tag::ForceSave
            | Tag::Close
            | Tag::GatewayList
            | Tag::GatewayCount
            | Tag::GatewayForceSave
            | Tag::GatewayClose => Request::operation(tag, code, access, self.offset, self.size),
            Tag::GatewayAddrLookup
            | Tag::GatewayIdLookup
            | Tag::GatewayAssign
            | Tag::GatewayRemove => Request::gateway(tag, code, access, gateway),
        })
    }
}

/// Render a response as JSON.
pub fn encode_response(response: &Response) -> Value {
    let code = response.header.code;
    match &response.body {
        ResponseBody::Identity(identity) if code == ResultCode::Ok.as_i32() => {
            json!(identity)
        }
        ResponseBody::Gateway(gateway) if code == ResultCode::Ok.as_i32() => json!(gateway),
        ResponseBody::IdentityList { items, .. } if code == ResultCode::Ok.as_i32() => {
            json!(items)
        }
        ResponseBody::GatewayList { items, .. } if code == ResultCode::Ok.as_i32() => {
            json!(items)
        }
        ResponseBody::Operation { result, .. }
            if matches!(response.tag(), Tag::Count | Tag::GatewayCount) && *result >= 0 =>
        {
            json!(result)
        }
        ResponseBody::Operation { result, .. } => json!({ "code": result }),
        _ => json!({ "code": code }),
    }
}

/// Execute one JSON request line. `None` when the text is not a request.
pub fn handle(dispatcher: &Dispatcher, text: &str) -> Option<String> {
    let request = match TextRequest::parse(text).and_then(TextRequest::into_request) {
        Ok(request) => request,
        Err(e) => {
            crate::utils::metrics::global_metrics().malformed();
            debug!(error = %e, "Dropping malformed JSON request");
            return None;
        }
    };
    let response = dispatcher.handle(&request)?;
    Some(encode_response(&response).to_string())
}
