//! Flow rule model handed to the switch adapter
//!
//! - [`FlowMatch`]: which packets a rule selects
//! - [`FlowAction`]: what the switch does with them
//! - [`FlowRule`]: match, actions and priority
//! - [`FlowCommand`]: add or delete instruction for one switch

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Priority of the match-all forwarding rule
pub const DEFAULT_RULE_PRIORITY: u16 = 100;

/// Priority of the DNS-response interception rule
pub const DNS_RULE_PRIORITY: u16 = 200;

/// Priority of the per-virtual-address interception rules
pub const VIRTUAL_RULE_PRIORITY: u16 = 250;

/// Packet selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowMatch {
    /// Every packet
    All,

    /// IPv4/UDP from the DNS source port
    DnsResponse {
        /// UDP source port
        udp_src: u16,
        /// Resolver address, if the rule is scoped to one
        #[serde(skip_serializing_if = "Option::is_none")]
        ipv4_src: Option<Ipv4Addr>,
        /// Required DSCP; rewritten frames carry a different mark
        #[serde(skip_serializing_if = "Option::is_none")]
        ip_dscp: Option<u8>,
    },

    /// IPv4 packets to one address
    Ipv4Destination {
        /// Destination address
        ipv4_dst: Ipv4Addr,
    },
}

impl FlowMatch {
    /// The destination address of a per-address rule
    #[must_use]
    pub const fn ipv4_destination(&self) -> Option<Ipv4Addr> {
        match self {
            Self::Ipv4Destination { ipv4_dst } => Some(*ipv4_dst),
            _ => None,
        }
    }
}

impl fmt::Display for FlowMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "*"),
            Self::DnsResponse {
                udp_src,
                ipv4_src,
                ip_dscp,
            } => {
                write!(f, "ip,udp,udp_src={udp_src}")?;
                if let Some(src) = ipv4_src {
                    write!(f, ",nw_src={src}")?;
                }
                if let Some(dscp) = ip_dscp {
                    write!(f, ",ip_dscp={dscp}")?;
                }
                Ok(())
            }
            Self::Ipv4Destination { ipv4_dst } => write!(f, "ip,nw_dst={ipv4_dst}"),
        }
    }
}

/// Switch action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowAction {
    /// Regular L2/L3 forwarding
    Normal,
    /// Send the whole packet to the controller without buffering
    Controller,
    /// Output on every port except the input port
    Flood,
}

impl fmt::Display for FlowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Controller => write!(f, "CONTROLLER"),
            Self::Flood => write!(f, "FLOOD"),
        }
    }
}

/// One match/action entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowRule {
    /// Higher wins
    pub priority: u16,
    /// Packet selector
    #[serde(rename = "match")]
    pub matcher: FlowMatch,
    /// Actions applied in order
    pub actions: Vec<FlowAction>,
}

impl FlowRule {
    /// Create a rule
    #[must_use]
    pub fn new(priority: u16, matcher: FlowMatch, actions: Vec<FlowAction>) -> Self {
        Self {
            priority,
            matcher,
            actions,
        }
    }
}

impl fmt::Display for FlowRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "priority={} {} actions=", self.priority, self.matcher)?;
        for (i, action) in self.actions.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{action}")?;
        }
        Ok(())
    }
}

/// Rule change for one switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "rule", rename_all = "snake_case")]
pub enum FlowCommand {
    /// Install a rule
    Add(FlowRule),
    /// Remove the rule with this exact match and priority
    Delete(FlowRule),
}

impl FlowCommand {
    /// The rule the command refers to
    #[must_use]
    pub const fn rule(&self) -> &FlowRule {
        match self {
            Self::Add(rule) | Self::Delete(rule) => rule,
        }
    }
}
