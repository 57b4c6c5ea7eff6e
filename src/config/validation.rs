//! Configuration validation

use super::{Config, PortConfig};
use crate::pipeline::StageRegistry;
use std::collections::HashSet;

const VLAN_MIN: u16 = 1;
const VLAN_MAX: u16 = 4094;

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration against the stages that can actually be built
pub fn validate(config: &Config, registry: &StageRegistry) -> ValidationResult {
    let mut result = ValidationResult::new();

    for (name, port) in &config.switch_ports {
        validate_port(name, port, &mut result);
    }
    validate_stages(config, registry, &mut result);

    result
}

fn validate_port(name: &str, port: &PortConfig, result: &mut ValidationResult) {
    for vlan in &port.allowed_vlans {
        if !(VLAN_MIN..=VLAN_MAX).contains(vlan) {
            result.error(format!(
                "switch_ports.{}: VLAN {} outside {}..={}",
                name, vlan, VLAN_MIN, VLAN_MAX
            ));
        }
    }

    match (port.trunk, port.allowed_vlans.len()) {
        (true, 0) => result.error(format!(
            "switch_ports.{}: trunk port has no allowed VLANs",
            name
        )),
        (false, 0) => result.error(format!("switch_ports.{}: access port has no VLAN", name)),
        (false, n) if n > 1 => result.warn(format!(
            "switch_ports.{}: access port lists {} VLANs, only {} is used",
            name, n, port.allowed_vlans[0]
        )),
        _ => {}
    }
}

fn validate_stages(config: &Config, registry: &StageRegistry, result: &mut ValidationResult) {
    if config.control_process.is_empty() {
        result.warn("control_process: no stages configured, frames will not be forwarded");
        return;
    }

    let mut seen = HashSet::new();
    let mut saw_l3 = None;

    for (i, stage) in config.control_process.iter().enumerate() {
        let label = format!("control_process[{}] L{}:{}", i, stage.layer, stage.name);

        if !registry.contains(stage.layer, &stage.name) {
            result.error(format!("{}: no such stage", label));
        }

        if !seen.insert((stage.layer, stage.name.as_str())) {
            result.error(format!("{}: stage listed more than once", label));
        }

        if let Some(file) = &stage.config_file {
            if !file.exists() {
                result.error(format!("{}: config file {} not found", label, file.display()));
            }
        }

        match (stage.layer, saw_l3) {
            (layer, None) if layer >= 3 => saw_l3 = Some(stage.name.as_str()),
            (2, Some(l3)) => result.warn(format!(
                "{}: layer 2 stage placed after layer 3 stage {}",
                label, l3
            )),
            _ => {}
        }
    }
}
