//! Rendering of run summaries, endpoints and configuration.

use anyhow::{Context, Result};
use deckhand_core::DeckhandConfig;
use deckhand_pipeline::RunSummary;
use deckhand_stack::{Resource, ResourceSpec};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Human,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_summary(&self, summary: &RunSummary) -> Result<String> {
        match self.format {
            OutputFormat::Json => self.format_summary_json(summary),
            OutputFormat::Human => Ok(self.format_summary_human(summary)),
        }
    }

    pub fn format_endpoints(&self, routes: &[Resource]) -> Result<String> {
        match self.format {
            OutputFormat::Json => self.format_endpoints_json(routes),
            OutputFormat::Human => Ok(self.format_endpoints_human(routes)),
        }
    }

    pub fn format_config(&self, config: &DeckhandConfig) -> Result<String> {
        let map: BTreeMap<_, _> = config.to_display_map().into_iter().collect();
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&map).context("Failed to serialize configuration")
            }
            OutputFormat::Human => {
                let width = map.keys().map(String::len).max().unwrap_or(0);
                let mut out = String::from("Configuration:\n");
                for (key, value) in &map {
                    let _ = writeln!(out, "  {:width$}  {}", key, value, width = width);
                }
                Ok(out)
            }
        }
    }

    fn format_summary_json(&self, summary: &RunSummary) -> Result<String> {
        let builds: Vec<_> = summary
            .builds
            .iter()
            .map(|b| {
                json!({
                    "target": b.target,
                    "image": b.image,
                    "fingerprint": b.fingerprint,
                    "skipped": b.skipped,
                    "forced": b.forced,
                })
            })
            .collect();
        let applied: Vec<_> = summary
            .applied
            .iter()
            .map(|(key, outcome)| json!({ "resource": key.to_string(), "outcome": outcome.as_str() }))
            .collect();
        let output = json!({
            "name": summary.name,
            "namespace": summary.namespace,
            "action": summary.action.as_str(),
            "state": summary.state.as_str(),
            "builds": builds,
            "applied": applied,
            "removed": summary.removed.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "exports": summary.exports,
            "warnings": summary.warnings,
        });
        serde_json::to_string_pretty(&output).context("Failed to serialize run summary")
    }

    fn format_summary_human(&self, summary: &RunSummary) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} {}/{}: {}",
            summary.action, summary.namespace, summary.name, summary.state
        );

        if !summary.builds.is_empty() {
            out.push_str("\nBuilds:\n");
            for build in &summary.builds {
                let status = match (&build.skipped, build.forced) {
                    (Some(reason), _) => format!("skipped ({})", reason),
                    (None, true) => "built (forced)".to_string(),
                    (None, false) => "built".to_string(),
                };
                let _ = writeln!(out, "  {:<16} {:<40} {}", build.target, build.image, status);
            }
        }

        if !summary.applied.is_empty() {
            out.push_str("\nResources:\n");
            for (key, outcome) in &summary.applied {
                let _ = writeln!(out, "  {:<10} {}", outcome.as_str(), key);
            }
        }

        if !summary.removed.is_empty() {
            out.push_str("\nRemoved:\n");
            for key in &summary.removed {
                let _ = writeln!(out, "  {}", key);
            }
        }

        if !summary.exports.is_empty() {
            let _ = writeln!(out, "\nExported: {}", summary.exports.join(", "));
        }

        if !summary.warnings.is_empty() {
            out.push_str("\nWarnings:\n");
            for warning in &summary.warnings {
                let _ = writeln!(out, "  - {}", warning);
            }
        }
        out
    }

    fn format_endpoints_json(&self, routes: &[Resource]) -> Result<String> {
        let output: Vec<_> = routes
            .iter()
            .map(|route| {
                let rules: Vec<_> = route_rules(route)
                    .into_iter()
                    .map(|(path, service, port)| {
                        json!({ "path": path, "service": service, "port": port })
                    })
                    .collect();
                json!({
                    "name": route.metadata.name,
                    "namespace": route.metadata.namespace,
                    "kind": route.kind.as_str(),
                    "rules": rules,
                    "annotations": route.metadata.annotations,
                })
            })
            .collect();
        serde_json::to_string_pretty(&output).context("Failed to serialize endpoints")
    }

    fn format_endpoints_human(&self, routes: &[Resource]) -> String {
        if routes.is_empty() {
            return "No endpoints\n".to_string();
        }
        let mut out = String::new();
        for route in routes {
            let _ = writeln!(out, "{} {}", route.kind, route.metadata.name);
            for (path, service, port) in route_rules(route) {
                let _ = writeln!(out, "  {:<24} -> {}:{}", path, service, port);
            }
        }
        out
    }
}

fn route_rules(route: &Resource) -> Vec<(&str, &str, u16)> {
    match &route.spec {
        ResourceSpec::Route(spec) => spec
            .rules
            .iter()
            .map(|r| (r.path.as_str(), r.service.as_str(), r.port))
            .collect(),
        _ => Vec::new(),
    }
}
