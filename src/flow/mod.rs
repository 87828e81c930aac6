//! OpenFlow-style rule model and the policy that decides which rules a
//! switch carries

pub mod policy;
pub mod rules;

pub use policy::{FlowPolicyConfig, FlowRulePolicy, DEFAULT_DNS_PORT};
pub use rules::{
    FlowAction, FlowCommand, FlowMatch, FlowRule, DEFAULT_RULE_PRIORITY, DNS_RULE_PRIORITY,
    VIRTUAL_RULE_PRIORITY,
};
