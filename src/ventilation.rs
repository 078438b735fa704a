//! Ventilation: assigning monitoring responsibility to servers
//!
//! For every host and every application group the ventilator picks a
//! nominal server (and optionally a backup) from the configured topology
//! tables. Selection is a pure function of a stable hash of the host name,
//! overridden by stickiness: a server that already held the assignment on
//! the previous run keeps it as long as it is still a candidate. No global
//! counters are involved, so two runs over the same topology agree.

use crate::config::Context;
use crate::error::{VentError, VentResult};
use crate::models::{Host, VentilationResult};
use crate::store::ConfigStore;
use std::collections::BTreeSet;
use tracing::warn;

/// Stable 32-bit checksum of the host identifier (Adler-32)
pub fn checksum(identifier: &str) -> u32 {
    const MOD_ADLER: u32 = 65521;
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for byte in identifier.as_bytes() {
        a = (a + u32::from(*byte)) % MOD_ADLER;
        b = (b + a) % MOD_ADLER;
    }
    (b << 16) | a
}

/// Strip a single leading path separator from an explicit override
fn normalize_override(value: &str) -> &str {
    match value.strip_prefix('/') {
        Some(rest) if !rest.starts_with('/') => rest,
        _ => value,
    }
}

fn top_level_ancestor(group: &str) -> Option<&str> {
    group
        .trim_start_matches('/')
        .split('/')
        .next()
        .filter(|s| !s.is_empty())
}

/// Resolve the ventilation group of one host
///
/// Explicit override wins; otherwise the host's groups must share exactly
/// one top-level ancestor.
pub fn resolve_host_group(host: &Host) -> VentResult<String> {
    if let Some(value) = &host.ventilation {
        return Ok(normalize_override(value).to_string());
    }

    let ancestors: BTreeSet<&str> = host
        .groups
        .iter()
        .filter_map(|g| top_level_ancestor(g))
        .collect();

    match ancestors.len() {
        1 => Ok(ancestors.into_iter().next().unwrap_or_default().to_string()),
        0 => Err(VentError::Parsing(format!(
            "host '{}' must belong to at least one group",
            host.name
        ))),
        _ => Err(VentError::Parsing(format!(
            "ambiguous ventilation for host '{}', multiple candidate groups: {}",
            host.name,
            ancestors.into_iter().collect::<Vec<_>>().join(", ")
        ))),
    }
}

/// Computes the ventilation result for one pipeline run
pub struct Ventilator<'a> {
    ctx: &'a Context,
}

impl<'a> Ventilator<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Assign every (host, application) pair to its server list
    ///
    /// New assignments are staged on the store so the next run sees them
    /// as the sticky baseline. Pairs with no eligible server are skipped
    /// with one aggregated warning per unique (appGroup, hostGroup).
    pub fn ventilate(&self, store: &mut dyn ConfigStore) -> VentResult<VentilationResult> {
        let mut result = VentilationResult::new();
        let mut no_server: BTreeSet<(String, String)> = BTreeSet::new();
        let mut unknown_topology: BTreeSet<(String, String)> = BTreeSet::new();

        for host in &self.ctx.hosts {
            let host_group = resolve_host_group(host)?;
            let hash = checksum(&host.name);

            let app_groups: Vec<String> =
                self.ctx.topology.app_groups().cloned().collect();
            for app_group in &app_groups {
                let nominal = match self.ctx.topology.nominal_servers(app_group, &host_group) {
                    Some(list) => self.filter_enabled(store, list),
                    None => {
                        if unknown_topology
                            .insert((app_group.clone(), host_group.clone()))
                        {
                            warn!(
                                app_group = %app_group,
                                host_group = %host_group,
                                "no ventilation defined, skipping"
                            );
                        }
                        continue;
                    }
                };
                let backup = self.filter_enabled(
                    store,
                    self.ctx.topology.backup_servers(app_group, &host_group),
                );

                let previous = store.previous_assignment(&host.name, app_group);

                let mut servers = Vec::new();
                if let Some(pick) = select(&nominal, &previous, hash) {
                    servers.push(pick);
                }
                if let Some(pick) = select(&backup, &previous, hash) {
                    servers.push(pick);
                }

                if servers.is_empty() {
                    no_server.insert((app_group.clone(), host_group.clone()));
                    continue;
                }

                store.record_assignment(&host.name, app_group, &servers);
                for app in self.ctx.applications_in_group(app_group) {
                    result.insert(&host.name, &app.name, servers.clone());
                }
            }
        }

        for (app_group, host_group) in &no_server {
            let err = VentError::NoServerAvailable {
                app_group: app_group.clone(),
                host_group: host_group.clone(),
            };
            warn!("{}", err);
        }

        Ok(result)
    }

    fn filter_enabled(&self, store: &dyn ConfigStore, servers: &[String]) -> Vec<String> {
        servers
            .iter()
            .filter(|s| store.is_enabled(s))
            .cloned()
            .collect()
    }
}

/// Pick one server from a candidate list
///
/// Stability takes precedence over balance: any previously-assigned server
/// still in the list keeps the assignment. Otherwise the stable hash
/// spreads hosts across the candidates.
fn select(candidates: &[String], previous: &[String], hash: u32) -> Option<String> {
    if candidates.is_empty() {
        return None;
    }
    if let Some(sticky) = previous.iter().find(|p| candidates.contains(p)) {
        return Some(sticky.clone());
    }
    let index = hash as usize % candidates.len();
    Some(candidates[index].clone())
}
