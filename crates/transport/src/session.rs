//! Session dialing and authentication.

use std::net::TcpStream;
use std::net::ToSocketAddrs;

use ssh2::Session;
use tracing::debug;

use crate::{Endpoint, TransportError, CONNECT_TIMEOUT};

/// Dial and authenticate a fresh session against `endpoint`.
pub fn dial(endpoint: &Endpoint) -> Result<Session, TransportError> {
    let addr = endpoint.addr();
    let socket_addr = addr
        .to_socket_addrs()
        .map_err(|source| TransportError::Connect {
            addr: addr.clone(),
            source,
        })?
        .next()
        .ok_or_else(|| TransportError::Connect {
            addr: addr.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved"),
        })?;

    let tcp = TcpStream::connect_timeout(&socket_addr, CONNECT_TIMEOUT).map_err(|source| {
        TransportError::Connect {
            addr: addr.clone(),
            source,
        }
    })?;

    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.handshake()?;

    authenticate(&session, endpoint)?;
    debug!(%addr, user = %endpoint.username, "ssh session established");
    Ok(session)
}

/// Try key, then password, then agent authentication.
fn authenticate(session: &Session, endpoint: &Endpoint) -> Result<(), TransportError> {
    if let Some(key) = &endpoint.private_key {
        let attempt = session.userauth_pubkey_file(&endpoint.username, None, key, None);
        if attempt.is_ok() && session.authenticated() {
            return Ok(());
        }
        debug!(key = %key.display(), "key authentication failed, trying next method");
    }

    if let Some(password) = &endpoint.password {
        let attempt = session.userauth_password(&endpoint.username, password);
        if attempt.is_ok() && session.authenticated() {
            return Ok(());
        }
    }

    if session.userauth_agent(&endpoint.username).is_ok() && session.authenticated() {
        return Ok(());
    }

    Err(TransportError::Auth {
        user: endpoint.username.clone(),
        addr: endpoint.addr(),
    })
}
