//! Parsing of the store's MOVED/ASK redirect payloads.
//!
//! Redirects arrive as ordinary error strings of the form
//! `"<KEYWORD> <slot> <host>:<port>"`. The host may itself contain colons
//! (IPv6 literals), so the target token is split on the *last* colon.

use crate::command::SlotId;
use crate::connection::NodeAddr;
use crate::error::{Error, ProtocolError, Result};

/// Redirect signal extracted from a completion's error payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectSignal {
    /// Not a redirect; an ordinary store error to propagate verbatim.
    None,
    /// Transient migration redirect: the target only accepts this one
    /// command if primed with an ASKING directive immediately beforehand.
    Ask { slot: SlotId, addr: NodeAddr },
    /// Permanent redirect: slot ownership changed, future commands for the
    /// slot should go directly to the new owner.
    Moved { slot: SlotId, addr: NodeAddr },
}

impl RedirectSignal {
    /// Classify an error payload.
    ///
    /// A payload that does not start with a recognized redirect keyword is
    /// `None`. A recognized keyword followed by a malformed slot or target
    /// is a hard protocol error; the store broke its wire contract.
    pub fn classify(payload: &str) -> Result<RedirectSignal> {
        let mut tokens = payload.split_whitespace();
        let keyword = tokens.next().unwrap_or("");
        let ask = match keyword {
            "ASK" => true,
            "MOVED" => false,
            _ => return Ok(RedirectSignal::None),
        };

        let (Some(slot_token), Some(target)) = (tokens.next(), tokens.next()) else {
            return Err(ProtocolError::TruncatedRedirect {
                payload: payload.to_string(),
            }
            .into());
        };
        let slot = parse_slot(slot_token).ok_or_else(|| ProtocolError::InvalidSlot {
            payload: payload.to_string(),
        })?;
        let addr = parse_target(target)?;

        Ok(if ask {
            RedirectSignal::Ask { slot, addr }
        } else {
            RedirectSignal::Moved { slot, addr }
        })
    }

    /// Target address of an ASK payload.
    pub fn parse_ask(payload: &str) -> Result<NodeAddr> {
        match Self::classify(payload)? {
            RedirectSignal::Ask { addr, .. } => Ok(addr),
            _ => Err(ProtocolError::TruncatedRedirect {
                payload: payload.to_string(),
            }
            .into()),
        }
    }

    /// Target address of a MOVED payload.
    pub fn parse_moved(payload: &str) -> Result<NodeAddr> {
        match Self::classify(payload)? {
            RedirectSignal::Moved { addr, .. } => Ok(addr),
            _ => Err(ProtocolError::TruncatedRedirect {
                payload: payload.to_string(),
            }
            .into()),
        }
    }
}

/// Leading decimal digit run of the slot token.
///
/// The slot is informational here (routing keys off the target address, not
/// the slot), and some servers emit range forms like `1234-2020`, so only
/// the leading digits are read.
fn parse_slot(token: &str) -> Option<SlotId> {
    let digits: &str = token
        .split_once(|c: char| !c.is_ascii_digit())
        .map_or(token, |(head, _)| head);
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Split `host:port` on the last colon.
///
/// Handles IPv6 literals such as `1:2:3:4::6:6381`, which parse as host
/// `1:2:3:4::6` and port `6381`.
fn parse_target(target: &str) -> Result<NodeAddr> {
    let Some(sep) = target.rfind(':') else {
        return Err(ProtocolError::MissingPortSeparator {
            target: target.to_string(),
        }
        .into());
    };
    let (host, port) = target.split_at(sep);
    let port: u16 = port[1..].parse().map_err(|_| {
        Error::Protocol(ProtocolError::InvalidPort {
            target: target.to_string(),
        })
    })?;
    Ok(NodeAddr::new(host, port))
}
