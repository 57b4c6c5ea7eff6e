//! MAC address filtering
//!
//! Two independent rule sets, one per direction. Each is an ordered list
//! of rules plus a default action; the first rule whose given fields all
//! match decides. Traffic addressed to one of the switch's own MACs is
//! settled before any rule is consulted: always allowed in, never sent out.

use crate::protocol::MacAddr;
use serde::Deserialize;

/// Direction being evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ingress,
    Egress,
}

/// Filter action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[default]
    Allow,
    Deny,
}

/// Filter rule. Unset fields match anything.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FilterRule {
    #[serde(default)]
    pub src: Option<MacAddr>,
    #[serde(default)]
    pub dst: Option<MacAddr>,
    /// Port name: the ingress port on ingress, the candidate output port on egress
    #[serde(default)]
    pub port: Option<String>,
    pub action: Action,
}

impl FilterRule {
    pub fn new(action: Action) -> Self {
        Self {
            src: None,
            dst: None,
            port: None,
            action,
        }
    }

    pub fn matches(&self, src: &MacAddr, dst: &MacAddr, port: &str) -> bool {
        self.src.map_or(true, |mac| mac == *src)
            && self.dst.map_or(true, |mac| mac == *dst)
            && self.port.as_deref().map_or(true, |name| name == port)
    }
}

/// Ordered rules with a fallback
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub default_action: Action,
    pub rules: Vec<FilterRule>,
}

impl RuleSet {
    pub fn new(default_action: Action, rules: Vec<FilterRule>) -> Self {
        Self {
            default_action,
            rules,
        }
    }

    pub fn evaluate(&self, src: &MacAddr, dst: &MacAddr, port: &str) -> Action {
        self.rules
            .iter()
            .find(|rule| rule.matches(src, dst, port))
            .map_or(self.default_action, |rule| rule.action)
    }
}

/// MAC filter engine
#[derive(Debug, Clone, Default)]
pub struct MacFilter {
    ingress: RuleSet,
    egress: RuleSet,
    local_addresses: Vec<MacAddr>,
}

impl MacFilter {
    pub fn new(ingress: RuleSet, egress: RuleSet, local_addresses: Vec<MacAddr>) -> Self {
        Self {
            ingress,
            egress,
            local_addresses,
        }
    }

    pub fn evaluate(&self, direction: Direction, src: &MacAddr, dst: &MacAddr, port: &str) -> Action {
        let to_local = self.local_addresses.contains(dst);

        match direction {
            Direction::Ingress if to_local => Action::Allow,
            Direction::Egress if to_local => Action::Deny,
            Direction::Ingress => self.ingress.evaluate(src, dst, port),
            Direction::Egress => self.egress.evaluate(src, dst, port),
        }
    }
}
