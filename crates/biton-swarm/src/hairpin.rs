//! Loopback override for nodes that cannot reach their own public address.
//!
//! Only active when a hairpin host is configured. Leave it unset in
//! production.

use biton_core::PeerAddress;

use crate::error::DialError;

const LOOPBACK: &str = "127.0.0.1";

/// Pick the address to actually dial for `target`.
///
/// If `target` is on `hairpin_host`, its own port means it is us and the dial
/// is refused. Any other port is rewritten onto loopback.
pub fn dial_target(
    hairpin_host: Option<&str>,
    own_port: Option<u16>,
    target: &PeerAddress,
) -> Result<String, DialError> {
    let Some(hairpin_host) = hairpin_host else {
        return Ok(target.address.clone());
    };
    if target.host() != Some(hairpin_host) {
        return Ok(target.address.clone());
    }

    match target.port() {
        Some(port) if Some(port) == own_port => Err(DialError::SelfDial(target.to_string())),
        Some(port) => Ok(format!("{LOOPBACK}:{port}")),
        None => Err(DialError::InvalidAddress(target.to_string())),
    }
}
