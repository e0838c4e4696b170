// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OSV feed client.
//!
//! Queries `/v1/query` per package with ecosystem restriction and page
//! tokens, mapping OSV's schema onto [`CveRecord`].

use fd_core::{AffectedPackage, CveRecord, Ecosystem, Fault, Severity, VersionRange};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Hard cap on pages fetched per package, a runaway-feed guard.
const MAX_PAGES_PER_PACKAGE: u32 = 20;

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    package: QueryPackage<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct QueryPackage<'a> {
    name: &'a str,
    ecosystem: &'a str,
}

#[derive(Debug, Default, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub vulns: Vec<OsvVulnerability>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OsvVulnerability {
    pub id: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub published: Option<String>,
    #[serde(default)]
    pub severity: Vec<OsvSeverity>,
    #[serde(default)]
    pub affected: Vec<OsvAffected>,
    #[serde(default)]
    pub database_specific: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct OsvSeverity {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub score: String,
}

#[derive(Debug, Deserialize)]
pub struct OsvAffected {
    pub package: OsvPackage,
    #[serde(default)]
    pub ranges: Vec<OsvRange>,
    #[serde(default)]
    pub versions: Vec<String>,
    #[serde(default)]
    pub database_specific: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct OsvPackage {
    pub name: String,
    #[serde(default)]
    pub ecosystem: String,
}

#[derive(Debug, Deserialize)]
pub struct OsvRange {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub events: Vec<serde_json::Value>,
}

/// Thin reqwest wrapper over the OSV HTTP API.
pub struct OsvClient {
    base_url: String,
    http: reqwest::Client,
}

impl OsvClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self { base_url: base_url.into(), http }
    }

    /// All vulnerabilities affecting one package, across pages.
    pub async fn query_package(
        &self,
        ecosystem: Ecosystem,
        name: &str,
    ) -> Result<(Vec<CveRecord>, u32), Fault> {
        let url = format!("{}/v1/query", self.base_url.trim_end_matches('/'));
        let mut records = Vec::new();
        let mut page_token = None;
        let mut pages = 0;

        loop {
            let request = QueryRequest {
                package: QueryPackage { name, ecosystem: ecosystem.osv_name() },
                page_token: page_token.take(),
            };

            let response = self
                .http
                .post(&url)
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    warn!(error = %e, "OSV request failed");
                    Fault::UpstreamUnavailable
                })?;

            if !response.status().is_success() {
                warn!(status = %response.status(), "OSV returned an error status");
                return Err(Fault::UpstreamUnavailable);
            }

            let body: QueryResponse =
                response.json().await.map_err(|_| Fault::UpstreamUnavailable)?;
            pages += 1;

            records.extend(body.vulns.iter().map(parse_vulnerability));

            match body.next_page_token {
                Some(token) if pages < MAX_PAGES_PER_PACKAGE => page_token = Some(token),
                Some(_) => {
                    warn!(package = name, "OSV pagination cap reached, truncating");
                    break;
                }
                None => break,
            }
        }

        debug!(package = name, ecosystem = %ecosystem, count = records.len(), "OSV query done");
        Ok((records, pages))
    }
}

/// Map one OSV entry onto the mirrored record shape.
pub fn parse_vulnerability(vuln: &OsvVulnerability) -> CveRecord {
    let affected = vuln
        .affected
        .iter()
        .filter_map(|entry| {
            let ecosystem = ecosystem_from_osv(&entry.package.ecosystem)?;
            Some(AffectedPackage {
                ecosystem,
                name: entry.package.name.clone(),
                ranges: entry.ranges.iter().flat_map(parse_range_events).collect(),
                versions: entry.versions.clone(),
            })
        })
        .collect();

    CveRecord {
        id: vuln.id.clone(),
        severity: parse_severity(vuln),
        published_at: vuln.published.clone().unwrap_or_default(),
        affected,
        description: vuln
            .summary
            .clone()
            .or_else(|| vuln.details.clone())
            .unwrap_or_default(),
        source: "osv".to_string(),
    }
}

/// OSV ranges carry events like `{"introduced": "1.2.0"}` / `{"fixed":
/// "1.4.1"}`; consecutive introduced/fixed pairs form half-open ranges.
fn parse_range_events(range: &OsvRange) -> Vec<VersionRange> {
    // Git ranges use commit hashes, which no package version matches.
    if range.kind.eq_ignore_ascii_case("git") {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut current: Option<VersionRange> = None;
    for event in &range.events {
        if let Some(introduced) = event.get("introduced").and_then(|v| v.as_str()) {
            if let Some(open) = current.take() {
                out.push(open);
            }
            current = Some(VersionRange {
                introduced: Some(introduced.to_string()),
                fixed: None,
                last_affected: None,
            });
        } else if let Some(fixed) = event.get("fixed").and_then(|v| v.as_str()) {
            let mut range = current.take().unwrap_or_default();
            range.fixed = Some(fixed.to_string());
            out.push(range);
        } else if let Some(last) = event.get("last_affected").and_then(|v| v.as_str()) {
            let mut range = current.take().unwrap_or_default();
            range.last_affected = Some(last.to_string());
            out.push(range);
        }
    }
    if let Some(open) = current.take() {
        out.push(open);
    }
    out
}

fn ecosystem_from_osv(name: &str) -> Option<Ecosystem> {
    // OSV suffixes Debian/Alpine with a release ("Debian:12").
    let base = name.split(':').next().unwrap_or(name);
    match base {
        "Debian" => Some(Ecosystem::Debian),
        "Alpine" => Some(Ecosystem::Alpine),
        "npm" => Some(Ecosystem::Npm),
        "PyPI" => Some(Ecosystem::Pypi),
        "Maven" => Some(Ecosystem::Maven),
        "NuGet" => Some(Ecosystem::Nuget),
        "Go" => Some(Ecosystem::Go),
        "crates.io" => Some(Ecosystem::Crates),
        "Packagist" => Some(Ecosystem::Packagist),
        "RubyGems" => Some(Ecosystem::Rubygems),
        _ => None,
    }
}

/// Severity: prefer the database_specific label, fall back to CVSS score
/// bands, default to medium.
fn parse_severity(vuln: &OsvVulnerability) -> Severity {
    if let Some(label) = vuln.database_specific.get("severity").and_then(|s| s.as_str()) {
        match label.to_ascii_uppercase().as_str() {
            "CRITICAL" => return Severity::Critical,
            "HIGH" => return Severity::High,
            "MODERATE" | "MEDIUM" => return Severity::Medium,
            "LOW" => return Severity::Low,
            _ => {}
        }
    }

    for severity in &vuln.severity {
        if let Ok(score) = severity.score.parse::<f64>() {
            return severity_from_score(score);
        }
        if severity.kind.starts_with("CVSS") {
            if let Some(score) = cvss_base_score(&severity.score) {
                return severity_from_score(score);
            }
        }
    }
    Severity::Medium
}

fn severity_from_score(score: f64) -> Severity {
    if score >= 9.0 {
        Severity::Critical
    } else if score >= 7.0 {
        Severity::High
    } else if score >= 4.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Very small CVSS v3 vector heuristic: derive a band from the impact
/// metrics instead of implementing full scoring.
fn cvss_base_score(vector: &str) -> Option<f64> {
    if !vector.starts_with("CVSS:") {
        return None;
    }
    let high_impacts = vector
        .split('/')
        .filter(|m| matches!(*m, "C:H" | "I:H" | "A:H"))
        .count();
    let network = vector.contains("AV:N");
    let score = match (high_impacts, network) {
        (3, true) => 9.8,
        (3, false) => 7.8,
        (2, true) => 8.1,
        (2, false) => 6.6,
        (1, true) => 7.5,
        (1, false) => 5.5,
        (0, _) => 3.1,
        _ => 5.0,
    };
    Some(score)
}

#[cfg(test)]
#[path = "osv_tests.rs"]
mod tests;
