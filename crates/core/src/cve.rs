// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mirrored CVE records and vulnerability matches.

use crate::machine::MachineId;
use serde::{Deserialize, Serialize};

/// Vulnerability severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

crate::simple_display! {
    Severity {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

/// Package ecosystems the mirror understands, keyed to OSV ecosystem names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ecosystem {
    Debian,
    Alpine,
    Npm,
    Pypi,
    Maven,
    Nuget,
    Go,
    Crates,
    Packagist,
    Rubygems,
}

impl Ecosystem {
    /// OSV feed name for this ecosystem.
    pub fn osv_name(&self) -> &'static str {
        match self {
            Ecosystem::Debian => "Debian",
            Ecosystem::Alpine => "Alpine",
            Ecosystem::Npm => "npm",
            Ecosystem::Pypi => "PyPI",
            Ecosystem::Maven => "Maven",
            Ecosystem::Nuget => "NuGet",
            Ecosystem::Go => "Go",
            Ecosystem::Crates => "crates.io",
            Ecosystem::Packagist => "Packagist",
            Ecosystem::Rubygems => "RubyGems",
        }
    }

    /// Map an agent-reported package manager to its ecosystem.
    pub fn from_manager(manager: &str) -> Option<Self> {
        match manager {
            "apt" | "dpkg" | "debian" => Some(Ecosystem::Debian),
            "apk" | "alpine" => Some(Ecosystem::Alpine),
            "npm" | "yarn" | "pnpm" => Some(Ecosystem::Npm),
            "pip" | "pypi" | "poetry" => Some(Ecosystem::Pypi),
            "maven" | "mvn" | "gradle" => Some(Ecosystem::Maven),
            "nuget" => Some(Ecosystem::Nuget),
            "go" | "gomod" => Some(Ecosystem::Go),
            "cargo" | "crates" => Some(Ecosystem::Crates),
            "composer" | "packagist" => Some(Ecosystem::Packagist),
            "gem" | "rubygems" | "bundler" => Some(Ecosystem::Rubygems),
            _ => None,
        }
    }
}

crate::simple_display! {
    Ecosystem {
        Debian => "debian",
        Alpine => "alpine",
        Npm => "npm",
        Pypi => "pypi",
        Maven => "maven",
        Nuget => "nuget",
        Go => "go",
        Crates => "crates",
        Packagist => "packagist",
        Rubygems => "rubygems",
    }
}

/// Affected range in ecosystem ordering: `[introduced, fixed)` when
/// `fixed` is set, `[introduced, last_affected]` when the feed only knows
/// the last affected version. Missing bounds are unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduced: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_affected: Option<String>,
}

/// One affected package entry inside a CVE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectedPackage {
    pub ecosystem: Ecosystem,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ranges: Vec<VersionRange>,
    /// Exact affected versions, when the feed enumerates them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<String>,
}

/// One mirrored vulnerability record, keyed by the upstream ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CveRecord {
    /// Upstream identifier (e.g. "CVE-2024-1234", "GHSA-...").
    pub id: String,
    pub severity: Severity,
    /// RFC 3339 publication timestamp from the feed.
    #[serde(default)]
    pub published_at: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected: Vec<AffectedPackage>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source: String,
}

/// A `(machine, package, cve)` intersection, recomputed after each scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilityMatch {
    pub machine_id: MachineId,
    pub package_name: String,
    pub package_version: String,
    pub cve_id: String,
    pub severity: Severity,
}

/// Per-machine aggregate used in the `vulnerability` security event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilitySummary {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub total: u32,
}

impl VulnerabilitySummary {
    pub fn tally(matches: &[VulnerabilityMatch]) -> Self {
        let mut summary = Self::default();
        for m in matches {
            match m.severity {
                Severity::Critical => summary.critical += 1,
                Severity::High => summary.high += 1,
                Severity::Medium => summary.medium += 1,
                Severity::Low => summary.low += 1,
            }
            summary.total += 1;
        }
        summary
    }
}
