//! Host placeholder expansion for probe templates
//!
//! Supported placeholders:
//!
//! - `{{ host.id }}`, `{{ host.name }}`, `{{ host.status }}`
//! - `{{ host.ip }}` first interface address
//! - `{{ host.ip.<interface> }}` address of the named interface

use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use regex::{Captures, Regex};

use crate::backend::Host;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder regex is valid")
});

fn resolve(key: &str, host: &Host) -> Result<String> {
    let value = match key {
        "host.id" => host.id.as_str(),
        "host.name" => host.name.as_str(),
        "host.status" => host.status.as_str(),
        "host.ip" => host
            .primary_ip_address()
            .ok_or_else(|| anyhow!("host {} has no interface address", host.name))?,
        _ => match key.strip_prefix("host.ip.") {
            Some(interface) => host.ip_address(interface).ok_or_else(|| {
                anyhow!("host {} has no interface named {interface}", host.name)
            })?,
            None => return Err(anyhow!("unknown placeholder `{key}`")),
        },
    };

    Ok(value.to_string())
}

/// Expand every placeholder in `template` for `host`
pub fn expand(template: &str, host: &Host) -> Result<String> {
    let mut error = None;

    let expanded = PLACEHOLDER.replace_all(template, |caps: &Captures| {
        match resolve(&caps[1], host) {
            Ok(value) => value,
            Err(e) => {
                error.get_or_insert(e);
                String::new()
            }
        }
    });

    match error {
        Some(e) => Err(e.context(format!("failed to expand `{template}`"))),
        None => Ok(expanded.into_owned()),
    }
}
