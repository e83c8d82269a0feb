//! Errors surfaced by virtual routers and the group manager.

use crate::types::{AddressFamily, VRRPState};
use std::io;
use std::net::IpAddr;

pub type Result<T> = std::result::Result<T, VRRPError>;

#[derive(Debug, thiserror::Error)]
pub enum VRRPError {
    #[error("virtual router {vrid} ({family}) already exists on interface {interface}")]
    AlreadyExists {
        vrid: u8,
        family: AddressFamily,
        interface: String,
    },

    #[error("interface {interface} does not own address {address}")]
    NotAddressOwner { interface: String, address: IpAddr },

    #[error("address {0} is already used by another virtual router")]
    AddressInUse(IpAddr),

    #[error("interface {0} not found")]
    InterfaceNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("virtual router {0} has no addresses")]
    NoAddresses(u8),

    #[error("cannot {event} while {state}")]
    InvalidTransition {
        state: VRRPState,
        event: &'static str,
    },

    #[error("virtual router {0} is not registered")]
    NotRegistered(u8),

    #[error("virtual router {vrid} is still {state}, stop it first")]
    RouterActive { vrid: u8, state: VRRPState },

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

impl From<VRRPError> for common::Error {
    fn from(err: VRRPError) -> Self {
        match err {
            VRRPError::Transport(e) => common::Error::Io(e),
            VRRPError::InvalidConfig(msg) => common::Error::Config(msg),
            other => common::Error::vrrp(other),
        }
    }
}
