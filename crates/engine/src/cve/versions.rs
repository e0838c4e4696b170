// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ecosystem-aware version comparison.
//!
//! SemVer ecosystems go through the `semver` crate (leniently: a leading
//! `v` and missing components are tolerated). Debian and Alpine use the
//! dpkg algorithm (epoch, upstream, revision, `~` sorting before
//! everything). PyPI gets a practical PEP 440 subset (epoch, release,
//! pre/post/dev markers). The rest use a segment comparator where numeric
//! beats alphabetic and trailing qualifiers sort before the release.

use fd_core::{AffectedPackage, Ecosystem, VersionRange};
use std::cmp::Ordering;

/// Compare two version strings in an ecosystem's ordering.
pub fn compare(ecosystem: Ecosystem, a: &str, b: &str) -> Ordering {
    match ecosystem {
        Ecosystem::Npm | Ecosystem::Crates | Ecosystem::Go | Ecosystem::Nuget => {
            semver_compare(a, b)
        }
        Ecosystem::Debian | Ecosystem::Alpine => debian_compare(a, b),
        Ecosystem::Pypi => pep440_compare(a, b),
        Ecosystem::Maven | Ecosystem::Packagist | Ecosystem::Rubygems => segment_compare(a, b),
    }
}

/// Whether `version` falls inside `[introduced, fixed)`.
pub fn version_in_range(ecosystem: Ecosystem, version: &str, range: &VersionRange) -> bool {
    if let Some(ref introduced) = range.introduced {
        // "0" means introduced from the beginning.
        if introduced != "0" && compare(ecosystem, version, introduced) == Ordering::Less {
            return false;
        }
    }
    if let Some(ref fixed) = range.fixed {
        if compare(ecosystem, version, fixed) != Ordering::Less {
            return false;
        }
    }
    if let Some(ref last) = range.last_affected {
        if compare(ecosystem, version, last) == Ordering::Greater {
            return false;
        }
    }
    true
}

/// Whether an installed version is affected per ranges or the explicit
/// version enumeration.
pub fn version_affected(ecosystem: Ecosystem, version: &str, affected: &AffectedPackage) -> bool {
    if affected.versions.iter().any(|v| compare(ecosystem, version, v) == Ordering::Equal) {
        return true;
    }
    affected.ranges.iter().any(|range| {
        (range.introduced.is_some() || range.fixed.is_some() || range.last_affected.is_some())
            && version_in_range(ecosystem, version, range)
    })
}

// --- SemVer ---

fn semver_compare(a: &str, b: &str) -> Ordering {
    match (parse_semver(a), parse_semver(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        _ => segment_compare(a, b),
    }
}

fn parse_semver(raw: &str) -> Option<semver::Version> {
    let trimmed = raw.trim().trim_start_matches('v');
    if let Ok(version) = semver::Version::parse(trimmed) {
        return Some(version);
    }
    // Pad short versions ("1.2" → "1.2.0") before giving up.
    let parts: Vec<&str> = trimmed.split('.').collect();
    let padded = match parts.len() {
        1 => format!("{}.0.0", trimmed),
        2 => format!("{}.0", trimmed),
        _ => return None,
    };
    semver::Version::parse(&padded).ok()
}

// --- Debian / Alpine ---

fn debian_compare(a: &str, b: &str) -> Ordering {
    let (epoch_a, rest_a) = split_epoch(a);
    let (epoch_b, rest_b) = split_epoch(b);
    if epoch_a != epoch_b {
        return epoch_a.cmp(&epoch_b);
    }

    let (upstream_a, revision_a) = split_revision(rest_a);
    let (upstream_b, revision_b) = split_revision(rest_b);

    match dpkg_fragment_compare(upstream_a, upstream_b) {
        Ordering::Equal => dpkg_fragment_compare(revision_a, revision_b),
        other => other,
    }
}

fn split_epoch(version: &str) -> (u64, &str) {
    match version.split_once(':') {
        Some((epoch, rest)) => (epoch.parse().unwrap_or(0), rest),
        None => (0, version),
    }
}

fn split_revision(version: &str) -> (&str, &str) {
    match version.rsplit_once('-') {
        Some((upstream, revision)) => (upstream, revision),
        None => (version, ""),
    }
}

/// dpkg ordering for one fragment: alternate non-digit and digit runs;
/// `~` sorts before everything including the empty string, letters sort
/// before other non-digits.
fn dpkg_fragment_compare(a: &str, b: &str) -> Ordering {
    let mut ia = a.as_bytes();
    let mut ib = b.as_bytes();

    loop {
        // Non-digit run.
        loop {
            let ca = ia.first().copied().filter(|c| !c.is_ascii_digit());
            let cb = ib.first().copied().filter(|c| !c.is_ascii_digit());
            match (ca, cb) {
                (None, None) => break,
                _ => {
                    let oa = dpkg_char_order(ca);
                    let ob = dpkg_char_order(cb);
                    if oa != ob {
                        return oa.cmp(&ob);
                    }
                    if ca.is_some() {
                        ia = &ia[1..];
                    }
                    if cb.is_some() {
                        ib = &ib[1..];
                    }
                }
            }
        }

        if ia.is_empty() && ib.is_empty() {
            return Ordering::Equal;
        }

        // Digit run.
        let (num_a, rest_a) = take_digits(ia);
        let (num_b, rest_b) = take_digits(ib);
        if num_a != num_b {
            return num_a.cmp(&num_b);
        }
        ia = rest_a;
        ib = rest_b;
    }
}

/// dpkg character weights: `~` < end-of-string < letters < other bytes.
fn dpkg_char_order(c: Option<u8>) -> i32 {
    match c {
        Some(b'~') => -1,
        None => 0,
        Some(c) if c.is_ascii_alphabetic() => i32::from(c),
        Some(c) => i32::from(c) + 256,
    }
}

fn take_digits(bytes: &[u8]) -> (u64, &[u8]) {
    let end = bytes.iter().position(|c| !c.is_ascii_digit()).unwrap_or(bytes.len());
    let value = std::str::from_utf8(&bytes[..end])
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    (value, &bytes[end..])
}

// --- PEP 440 (practical subset) ---

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct Pep440 {
    epoch: u64,
    release: Vec<u64>,
    /// dev < a < b < rc < final < post
    marker: i8,
    marker_num: u64,
}

fn pep440_compare(a: &str, b: &str) -> Ordering {
    match (parse_pep440(a), parse_pep440(b)) {
        (Some(mut va), Some(mut vb)) => {
            // Zero-pad releases so 1.0 == 1.0.0.
            let len = va.release.len().max(vb.release.len());
            va.release.resize(len, 0);
            vb.release.resize(len, 0);
            va.cmp(&vb)
        }
        _ => segment_compare(a, b),
    }
}

fn parse_pep440(raw: &str) -> Option<Pep440> {
    let lower = raw.trim().to_ascii_lowercase();
    let (epoch, rest) = match lower.split_once('!') {
        Some((e, rest)) => (e.parse().ok()?, rest.to_string()),
        None => (0, lower),
    };

    let mut release = Vec::new();
    let mut marker = 0i8;
    let mut marker_num = 0u64;

    for segment in rest.split(['.', '-', '_']) {
        if segment.is_empty() {
            continue;
        }
        if let Ok(n) = segment.parse::<u64>() {
            release.push(n);
            continue;
        }
        // Split "rc1" style segments into marker + number.
        let split = segment.find(|c: char| c.is_ascii_digit()).unwrap_or(segment.len());
        let (word, num) = segment.split_at(split);
        marker = match word {
            "dev" => -4,
            "a" | "alpha" => -3,
            "b" | "beta" => -2,
            "rc" | "c" | "pre" | "preview" => -1,
            "post" | "rev" | "r" => 1,
            _ => return None,
        };
        marker_num = num.parse().unwrap_or(0);
    }

    if release.is_empty() {
        return None;
    }
    Some(Pep440 { epoch, release, marker, marker_num })
}

// --- generic segments (Maven, Packagist, RubyGems, fallback) ---

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Number(u64),
    Text(&'a str),
}

fn segments(version: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let trimmed = version.trim().trim_start_matches('v');
    for part in trimmed.split(['.', '-', '_', '+']) {
        if part.is_empty() {
            continue;
        }
        let mut rest = part;
        while !rest.is_empty() {
            let split = if rest.as_bytes()[0].is_ascii_digit() {
                rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len())
            } else {
                rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len())
            };
            let (head, tail) = rest.split_at(split);
            match head.parse::<u64>() {
                Ok(n) => out.push(Segment::Number(n)),
                Err(_) => out.push(Segment::Text(head)),
            }
            rest = tail;
        }
    }
    out
}

fn segment_compare(a: &str, b: &str) -> Ordering {
    let sa = segments(a);
    let sb = segments(b);
    let len = sa.len().max(sb.len());

    for i in 0..len {
        let ordering = match (sa.get(i), sb.get(i)) {
            (Some(Segment::Number(x)), Some(Segment::Number(y))) => x.cmp(y),
            (Some(Segment::Text(x)), Some(Segment::Text(y))) => x.cmp(y),
            // Numbers sort after qualifiers: 1.0.1 > 1.0.rc.
            (Some(Segment::Number(_)), Some(Segment::Text(_))) => Ordering::Greater,
            (Some(Segment::Text(_)), Some(Segment::Number(_))) => Ordering::Less,
            // A trailing number extends the release; a trailing qualifier
            // (alpha, rc) sorts before the bare version.
            (Some(Segment::Number(x)), None) => x.cmp(&0),
            (None, Some(Segment::Number(y))) => 0.cmp(y),
            (Some(Segment::Text(_)), None) => Ordering::Less,
            (None, Some(Segment::Text(_))) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
#[path = "versions_tests.rs"]
mod tests;
