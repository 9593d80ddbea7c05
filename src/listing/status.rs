use std::sync::LazyLock;

use regex::Regex;

static ALIVE_DAYS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"存活\s*(\d+)\s*天").unwrap());

pub const MARKER_INVALID: &str = "暂时失效";
pub const MARKER_JUST_ONLINE: &str = "新上线";

pub const TIER_JUST_ONLINE: u8 = 0;
pub const TIER_ALIVE: u8 = 1;
pub const TIER_INVALID: u8 = 99;

/// Secondary value pinned on invalid rows so they sort after everything else.
pub const INVALID_SECONDARY: u64 = 999_999;

/// Composite freshness key. Field order gives tuple comparison: tier, then secondary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SortKey {
    pub tier: u8,
    pub secondary: u64,
}

impl SortKey {
    pub const JUST_ONLINE: SortKey = SortKey { tier: TIER_JUST_ONLINE, secondary: 0 };
    pub const INVALID: SortKey = SortKey { tier: TIER_INVALID, secondary: INVALID_SECONDARY };

    pub fn alive(days: u64) -> Self {
        SortKey { tier: TIER_ALIVE, secondary: days }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub is_valid: bool,
    pub sort_key: SortKey,
    /// For logging only.
    pub label: String,
}

impl Classification {
    fn valid(sort_key: SortKey, label: String) -> Self {
        Classification { is_valid: true, sort_key, label }
    }

    fn invalid(label: String) -> Self {
        Classification { is_valid: false, sort_key: SortKey::INVALID, label }
    }
}

/// Classify the visible text of one listing row.
///
/// Unrecognised status text is treated as invalid so an uncertain entry is
/// never selected.
pub fn classify(text: &str) -> Classification {
    let t = normalize(text);

    if t.contains(MARKER_INVALID) {
        return Classification::invalid(MARKER_INVALID.to_string());
    }
    if t.contains(MARKER_JUST_ONLINE) {
        return Classification::valid(SortKey::JUST_ONLINE, MARKER_JUST_ONLINE.to_string());
    }
    if let Some(caps) = ALIVE_DAYS_RE.captures(&t) {
        // Only digits matched, so the sole failure mode is overflow.
        let days = caps[1].parse::<u64>().unwrap_or(u64::MAX);
        return Classification::valid(SortKey::alive(days), format!("存活{}天", days));
    }

    Classification::invalid(t)
}

/// Full-width spaces become regular spaces, then trim.
pub fn normalize(text: &str) -> String {
    text.replace('\u{3000}', " ").trim().to_string()
}
