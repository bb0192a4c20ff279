use crate::config::MAX_DATAGRAM_SIZE;
use crate::core::message::{Request, Response, ResponseBody};
use crate::core::types::{DevAddr, DevEui, GatewayIdentity, NetworkIdentity};
use crate::core::wire::Tag;
use crate::error::constants::ERR_NO_RESPONSE;
use crate::error::{ProtocolError, Result, ResultCode};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::{debug, instrument};

/// Default time to wait for a reply.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Blocking UDP client for the binary protocol.
///
/// Every call sends one datagram and waits for one reply. Non-zero result
/// codes come back as [`ProtocolError::Rejected`].
#[derive(Debug)]
pub struct QueryClient {
    socket: UdpSocket,
    server: SocketAddr,
    code: i32,
    access_code: u64,
}

impl QueryClient {
    pub fn connect(server: SocketAddr, code: i32, access_code: u64) -> Result<Self> {
        let local: SocketAddr = if server.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        }
        .parse()
        .map_err(|e| ProtocolError::ConfigError(format!("{e}")))?;
        let socket = UdpSocket::bind(local)?;
        socket.connect(server)?;
        socket.set_read_timeout(Some(DEFAULT_TIMEOUT))?;
        Ok(Self {
            socket,
            server,
            code,
            access_code,
        })
    }

    pub fn with_timeout(self, timeout: Duration) -> Result<Self> {
        self.socket.set_read_timeout(Some(timeout))?;
        Ok(self)
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Send `request` and decode the reply.
    #[instrument(skip(self, request), fields(server = %self.server, tag = request.tag().name()))]
    pub fn request(&self, request: &Request) -> Result<Response> {
        self.socket.send(&request.to_bytes())?;

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let len = match self.socket.recv(&mut buf) {
            Ok(len) => len,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                debug!("{}", ERR_NO_RESPONSE);
                return Err(ProtocolError::Timeout);
            }
            Err(e) => return Err(e.into()),
        };
        let response = Response::decode(&buf[..len])?;
        if response.tag() != request.tag() {
            return Err(ProtocolError::UnexpectedMessage(format!(
                "expected '{}' reply, got '{}'",
                request.tag().as_char(),
                response.tag().as_char()
            )));
        }
        debug!(bytes = len, result = response.result(), "Reply received");
        Ok(response)
    }

    fn checked(&self, request: Request) -> Result<Response> {
        let response = self.request(&request)?;
        match ResultCode::from_i32(response.result()) {
            Some(ResultCode::Ok) => Ok(response),
            _ => Err(ProtocolError::Rejected(response.result())),
        }
    }

    /// Identity with the lowest address bound to `eui`.
    pub fn get_by_eui(&self, eui: DevEui) -> Result<NetworkIdentity> {
        match self
            .checked(Request::addr_lookup(self.code, self.access_code, eui))?
            .body
        {
            ResponseBody::Identity(identity) => Ok(identity),
            other => Err(unexpected(&other)),
        }
    }

    pub fn get_by_addr(&self, addr: DevAddr) -> Result<NetworkIdentity> {
        match self
            .checked(Request::eui_lookup(self.code, self.access_code, addr))?
            .body
        {
            ResponseBody::Identity(identity) => Ok(identity),
            other => Err(unexpected(&other)),
        }
    }

    pub fn assign(&self, identity: &NetworkIdentity) -> Result<()> {
        self.checked(Request::assign(
            self.code,
            self.access_code,
            identity.clone(),
        ))
        .map(|_| ())
    }

    pub fn remove(&self, addr: DevAddr) -> Result<()> {
        self.checked(Request::remove(self.code, self.access_code, addr))
            .map(|_| ())
    }

    /// One page of identities; fewer than `size` when the server truncated.
    pub fn list(&self, offset: u32, size: u8) -> Result<Vec<NetworkIdentity>> {
        match self
            .checked(Request::list(self.code, self.access_code, offset, size))?
            .body
        {
            ResponseBody::IdentityList { items, .. } => Ok(items),
            other => Err(unexpected(&other)),
        }
    }

    pub fn count(&self) -> Result<usize> {
        self.operation_count(Tag::Count)
    }

    pub fn force_save(&self) -> Result<()> {
        self.checked(Request::operation(Tag::ForceSave, self.code, self.access_code, 0, 0))
            .map(|_| ())
    }

    /// Address of gateway `id`.
    pub fn gateway_addr(&self, id: DevEui) -> Result<GatewayIdentity> {
        self.gateway_lookup(Tag::GatewayAddrLookup, GatewayIdentity::new(id, None))
    }

    /// Gateway registered at `addr`.
    pub fn gateway_id(&self, addr: SocketAddr) -> Result<GatewayIdentity> {
        self.gateway_lookup(
            Tag::GatewayIdLookup,
            GatewayIdentity::new(DevEui(0), Some(addr)),
        )
    }

    pub fn assign_gateway(&self, gateway: GatewayIdentity) -> Result<()> {
        self.checked(Request::gateway(
            Tag::GatewayAssign,
            self.code,
            self.access_code,
            gateway,
        ))
        .map(|_| ())
    }

    pub fn remove_gateway(&self, gateway: GatewayIdentity) -> Result<()> {
        self.checked(Request::gateway(
            Tag::GatewayRemove,
            self.code,
            self.access_code,
            gateway,
        ))
        .map(|_| ())
    }

    pub fn list_gateways(&self, offset: u32, size: u8) -> Result<Vec<GatewayIdentity>> {
        let request = Request::operation(Tag::GatewayList, self.code, self.access_code, offset, size);
        match self.checked(request)?.body {
            ResponseBody::GatewayList { items, .. } => Ok(items),
            other => Err(unexpected(&other)),
        }
    }

    pub fn count_gateways(&self) -> Result<usize> {
        self.operation_count(Tag::GatewayCount)
    }

    fn gateway_lookup(&self, tag: Tag, key: GatewayIdentity) -> Result<GatewayIdentity> {
        match self
            .checked(Request::gateway(tag, self.code, self.access_code, key))?
            .body
        {
            ResponseBody::Gateway(gateway) => Ok(gateway),
            other => Err(unexpected(&other)),
        }
    }

    // counts are carried in the result field, so no result-code check here
    fn operation_count(&self, tag: Tag) -> Result<usize> {
        let response = self.request(&Request::operation(tag, self.code, self.access_code, 0, 0))?;
        if response.header.code == ResultCode::AccessDenied.as_i32() {
            return Err(ProtocolError::Rejected(response.header.code));
        }
        match response.body {
            ResponseBody::Operation { result, .. } if result >= 0 => Ok(result as usize),
            ResponseBody::Operation { result, .. } => Err(ProtocolError::Rejected(result)),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(body: &ResponseBody) -> ProtocolError {
    ProtocolError::UnexpectedMessage(format!("{body:?}"))
}
