//! Answer-file and boot-command variable substitution.
//!
//! Both `{{ .Name }}` and `{{.Name}}` spellings are replaced literally; no
//! template engine is involved.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Variables available to answer files and boot commands.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    vars: BTreeMap<&'static str, String>,
}

impl TemplateVars {
    pub fn new() -> TemplateVars {
        TemplateVars::default()
    }

    pub fn set(&mut self, name: &'static str, value: impl Into<String>) {
        self.vars.insert(name, value.into());
    }

    pub fn set_ip(&mut self, name: &'static str, value: Option<Ipv4Addr>) {
        if let Some(ip) = value {
            self.set(name, ip.to_string());
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|v| v.as_str())
    }

    /// Replace every known variable in `input`.
    pub fn render(&self, input: &str) -> String {
        let mut out = input.to_string();
        for (name, value) in &self.vars {
            out = out.replace(&format!("{{{{ .{name} }}}}"), value);
            out = out.replace(&format!("{{{{.{name}}}}}"), value);
        }
        out
    }
}

/// CIDR prefix length of a dotted-decimal netmask, e.g. `255.255.255.0` -> 24.
pub fn netmask_prefix(netmask: Ipv4Addr) -> u32 {
    u32::from(netmask).count_ones()
}
