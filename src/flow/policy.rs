//! Rule set computation for connected switches

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use tracing::debug;

use super::rules::{
    FlowAction, FlowCommand, FlowMatch, FlowRule, DEFAULT_RULE_PRIORITY, DNS_RULE_PRIORITY,
    VIRTUAL_RULE_PRIORITY,
};

/// Default DNS source port
pub const DEFAULT_DNS_PORT: u16 = 53;

/// Inputs for the DNS interception rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowPolicyConfig {
    /// UDP source port of intercepted responses
    pub dns_source_port: u16,
    /// Restrict interception to responses from this resolver
    pub resolver: Option<Ipv4Addr>,
    /// Only intercept frames with DSCP 0, so marked rewrites are not
    /// intercepted a second time
    pub unmarked_only: bool,
}

impl Default for FlowPolicyConfig {
    fn default() -> Self {
        Self {
            dns_source_port: DEFAULT_DNS_PORT,
            resolver: None,
            unmarked_only: false,
        }
    }
}

impl FlowPolicyConfig {
    /// Scope interception to one resolver
    #[must_use]
    pub fn with_resolver(mut self, resolver: Ipv4Addr) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Match only DSCP 0 frames
    #[must_use]
    pub fn with_unmarked_only(mut self, unmarked_only: bool) -> Self {
        self.unmarked_only = unmarked_only;
        self
    }
}

/// Computes the rules each switch should carry
#[derive(Debug, Clone, Default)]
pub struct FlowRulePolicy {
    config: FlowPolicyConfig,
}

impl FlowRulePolicy {
    /// Create a policy
    #[must_use]
    pub fn new(config: FlowPolicyConfig) -> Self {
        Self { config }
    }

    /// Policy configuration
    #[must_use]
    pub fn config(&self) -> &FlowPolicyConfig {
        &self.config
    }

    /// Lowest priority: forward everything normally
    #[must_use]
    pub fn default_rule(&self) -> FlowRule {
        FlowRule::new(
            DEFAULT_RULE_PRIORITY,
            FlowMatch::All,
            vec![FlowAction::Normal],
        )
    }

    /// DNS responses go to the controller
    #[must_use]
    pub fn dns_rule(&self) -> FlowRule {
        FlowRule::new(
            DNS_RULE_PRIORITY,
            FlowMatch::DnsResponse {
                udp_src: self.config.dns_source_port,
                ipv4_src: self.config.resolver,
                ip_dscp: self.config.unmarked_only.then_some(0),
            },
            vec![FlowAction::Controller],
        )
    }

    /// Traffic to a virtual address goes to the controller
    #[must_use]
    pub fn virtual_rule(&self, virtual_address: Ipv4Addr) -> FlowRule {
        FlowRule::new(
            VIRTUAL_RULE_PRIORITY,
            FlowMatch::Ipv4Destination {
                ipv4_dst: virtual_address,
            },
            vec![FlowAction::Controller],
        )
    }

    /// Full rule set for a newly connected switch, in ascending priority
    #[must_use]
    pub fn initial_rules(&self, virtual_addresses: &BTreeSet<Ipv4Addr>) -> Vec<FlowRule> {
        let mut rules = Vec::with_capacity(virtual_addresses.len() + 2);
        rules.push(self.default_rule());
        rules.push(self.dns_rule());
        rules.extend(virtual_addresses.iter().map(|a| self.virtual_rule(*a)));
        rules
    }

    /// Commands that move a switch from `installed` virtual-address rules
    /// to `current` ones. New rules are added before stale ones are removed.
    #[must_use]
    pub fn reconcile(
        &self,
        installed: &BTreeSet<Ipv4Addr>,
        current: &BTreeSet<Ipv4Addr>,
    ) -> Vec<FlowCommand> {
        let adds = current
            .difference(installed)
            .map(|a| FlowCommand::Add(self.virtual_rule(*a)));
        let deletes = installed
            .difference(current)
            .map(|a| FlowCommand::Delete(self.virtual_rule(*a)));
        let commands: Vec<_> = adds.chain(deletes).collect();
        if !commands.is_empty() {
            debug!(commands = commands.len(), "Virtual address rules changed");
        }
        commands
    }
}
