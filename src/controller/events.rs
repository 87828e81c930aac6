//! Request/response types at the switch adapter boundary
//!
//! The adapter owns the switch connections. It passes events in and
//! carries out the returned effects; the controller never calls back into
//! it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::flow::{FlowAction, FlowCommand};

/// Switch datapath identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SwitchId(pub u64);

impl fmt::Display for SwitchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Switch port number
pub type PortNo = u32;

/// Metadata the adapter attaches to a packet-in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketMetadata {
    /// Port the frame arrived on
    pub in_port: PortNo,
    /// Priority of the rule that sent the frame up, when the adapter knows it
    pub rule_priority: Option<u16>,
}

impl PacketMetadata {
    /// Metadata with only the input port
    #[must_use]
    pub const fn new(in_port: PortNo) -> Self {
        Self {
            in_port,
            rule_priority: None,
        }
    }

    /// Attach the matched rule priority
    #[must_use]
    pub const fn with_rule_priority(mut self, priority: u16) -> Self {
        self.rule_priority = Some(priority);
        self
    }
}

/// Frame to send out of a switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketOut {
    /// Port the original frame came in on
    pub in_port: PortNo,
    /// Output actions
    pub actions: Vec<FlowAction>,
    /// Full frame bytes
    pub data: Vec<u8>,
}

impl PacketOut {
    /// Flood `data` out of every port except `in_port`
    #[must_use]
    pub fn flood(in_port: PortNo, data: Vec<u8>) -> Self {
        Self {
            in_port,
            actions: vec![FlowAction::Flood],
            data,
        }
    }
}

/// Answer to a packet-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketDisposition {
    /// Nothing to send
    NoAction,
    /// Send a frame
    Emit(PacketOut),
}

impl PacketDisposition {
    /// The frame to emit, if any
    #[must_use]
    pub const fn packet_out(&self) -> Option<&PacketOut> {
        match self {
            Self::NoAction => None,
            Self::Emit(out) => Some(out),
        }
    }
}

/// Incremental rule changes for one switch, produced when the set of
/// virtual addresses changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleUpdate {
    /// Target switch
    pub switch: SwitchId,
    /// Adds first, then deletes
    pub commands: Vec<FlowCommand>,
}
