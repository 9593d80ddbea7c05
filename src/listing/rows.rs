use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use super::ranking::RankedEntry;
use super::status::classify;

static IPV4_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{1,3}(?:\.\d{1,3}){3})").unwrap());

pub const DEFAULT_MULTICAST_MARKER: &str = "组播";

/// One rendered listing element as seen by the page collaborator.
pub trait Row {
    /// Opaque reference to the clickable element leading to the detail page.
    type Link: Clone;

    fn text(&self) -> &str;

    /// Resolve the link that navigates to `ip`'s detail page, if the row has one.
    fn link_for(&self, ip: &str) -> Option<Self::Link>;
}

/// Why a row did not become a candidate. Rejections are logged and skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("row has no text")]
    Empty,
    #[error("row lacks the '{0}' marker")]
    NotMulticast(String),
    #[error("row contains no IPv4 address")]
    NoIp,
    #[error("{0} already seen in an earlier row")]
    Duplicate(String),
    #[error("no link for {0}")]
    NoLink(String),
    #[error("{ip} is not usable: {label}")]
    Invalid { ip: String, label: String },
}

/// First IPv4-shaped substring of `text`.
pub fn extract_ip(text: &str) -> Option<&str> {
    IPV4_RE.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Pick the link for `ip`: exact text match first, then containment.
pub fn match_link<'a, T>(links: &'a [T], ip: &str, text_of: impl Fn(&T) -> &str) -> Option<&'a T> {
    links
        .iter()
        .find(|l| text_of(l).trim() == ip)
        .or_else(|| links.iter().find(|l| text_of(l).contains(ip)))
}

/// Filter pass over rows in page order. Keeps valid, deduplicated, linkable rows.
///
/// An IP is claimed by the first row that passes the link and status checks,
/// so a stale invalid row never hides a later valid one for the same IP.
/// Page order standing in for freshness is a heuristic about the site.
pub fn extract_candidates<R: Row>(rows: &[R], marker: &str) -> Vec<RankedEntry<R::Link>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for (idx, row) in rows.iter().enumerate() {
        match examine(row, marker, &mut seen) {
            Ok(entry) => out.push(entry),
            Err(reason) => debug!(row = idx, %reason, "Skipping row"),
        }
    }

    out
}

fn examine<R: Row>(
    row: &R,
    marker: &str,
    seen: &mut HashSet<String>,
) -> Result<RankedEntry<R::Link>, Rejection> {
    let text = row.text().trim();
    if text.is_empty() {
        return Err(Rejection::Empty);
    }
    if !text.contains(marker) {
        return Err(Rejection::NotMulticast(marker.to_string()));
    }

    let ip = extract_ip(text).ok_or(Rejection::NoIp)?;
    if seen.contains(ip) {
        return Err(Rejection::Duplicate(ip.to_string()));
    }

    let link = row.link_for(ip).ok_or_else(|| Rejection::NoLink(ip.to_string()))?;

    let status = classify(text);
    if !status.is_valid {
        return Err(Rejection::Invalid {
            ip: ip.to_string(),
            label: status.label,
        });
    }

    seen.insert(ip.to_string());
    Ok(RankedEntry {
        ip: ip.to_string(),
        label: status.label,
        sort_key: status.sort_key,
        text: text.to_string(),
        link,
    })
}
