use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{FetchError, NavError};
use crate::listing::rows::match_link;
use crate::listing::{RankedEntry, Row};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub name: String,
    pub keyword: String,
    /// Direct listing URL, when the region has one.
    pub url: Option<String>,
}

impl Region {
    /// Region named after the keyword, with path separators replaced so the name stays a plain file stem.
    pub fn from_keyword(keyword: &str) -> Self {
        let name = keyword.replace(['/', '\\'], "_");
        Region {
            name: if is_plain_name(&name) { name } else { "_".to_string() },
            keyword: keyword.to_string(),
            url: None,
        }
    }

    /// `name`, `name|keyword` or `name|keyword|url`. Blank lines and `#` comments yield `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let mut parts = line.split('|').map(str::trim);
        let name = parts.next().filter(|s| !s.is_empty())?.to_string();
        if !is_plain_name(&name) {
            warn!(%name, "Region name is not a plain file name, skipping");
            return None;
        }
        let keyword = parts
            .next()
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| name.clone());
        let url = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
        Some(Region { name, keyword, url })
    }
}

/// Region names become file stems for dumps and playlists.
fn is_plain_name(name: &str) -> bool {
    !name.contains(['/', '\\']) && name != "." && name != ".."
}

pub fn parse_regions(text: &str) -> Vec<Region> {
    text.lines().filter_map(Region::parse_line).collect()
}

pub fn load_regions(path: &Path) -> Result<Vec<Region>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read regions file {}", path.display()))?;
    Ok(parse_regions(&text))
}

/// Ways of reaching a region's listing, tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    DirectUrl,
    Dropdown,
    KeywordSearch,
}

impl Strategy {
    pub const FALLBACK_ORDER: [Strategy; 3] = [Strategy::DirectUrl, Strategy::Dropdown, Strategy::KeywordSearch];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Strategy::DirectUrl => "direct-url",
            Strategy::Dropdown => "dropdown",
            Strategy::KeywordSearch => "keyword-search",
        };
        f.write_str(s)
    }
}

/// The page-driving collaborator. Implementations bound every wait they do.
pub trait Site {
    type Row: Row;

    fn open_listing(&mut self, region: &Region, strategy: Strategy) -> Result<Vec<Self::Row>, NavError>;

    /// Click through from the selected entry to the playlist download.
    fn trigger_download(
        &mut self,
        region: &Region,
        entry: &RankedEntry<<Self::Row as Row>::Link>,
    ) -> Result<(), FetchError>;
}

/// First strategy that yields a non-empty listing wins.
pub fn open_with_fallback<S: Site>(
    site: &mut S,
    region: &Region,
    strategies: &[Strategy],
) -> Result<(Strategy, Vec<S::Row>), FetchError> {
    for &strategy in strategies {
        match site.open_listing(region, strategy) {
            Ok(rows) if !rows.is_empty() => {
                info!(region = %region.name, %strategy, rows = rows.len(), "Opened listing");
                return Ok((strategy, rows));
            }
            Ok(_) => warn!(region = %region.name, %strategy, "Listing empty, trying next strategy"),
            Err(NavError::Unsupported) => debug!(region = %region.name, %strategy, "Strategy not available"),
            Err(e) => warn!(region = %region.name, %strategy, error = %e, "Strategy failed"),
        }
    }
    Err(FetchError::NavigationFailed {
        region: region.name.clone(),
    })
}

// ── Row dumps ──

#[derive(Debug, Clone, Deserialize)]
pub struct DumpLink {
    #[serde(default)]
    pub text: String,
    pub href: String,
}

/// One rendered row as exported by the browser harness.
#[derive(Debug, Clone, Deserialize)]
pub struct DumpRow {
    pub text: String,
    #[serde(default)]
    pub links: Vec<DumpLink>,
}

impl Row for DumpRow {
    type Link = String;

    fn text(&self) -> &str {
        &self.text
    }

    fn link_for(&self, ip: &str) -> Option<String> {
        match_link(&self.links, ip, |l| l.text.as_str()).map(|l| l.href.clone())
    }
}

pub fn load_rows(path: &Path) -> Result<Vec<DumpRow>, NavError> {
    let body = fs::read_to_string(path)?;
    serde_json::from_str(&body).map_err(|e| NavError::Malformed(format!("{}: {}", path.display(), e)))
}

/// External command that performs the click-through and download for one entry.
#[derive(Debug, Clone)]
pub struct DownloadHook {
    pub program: String,
    pub args: Vec<String>,
    pub download_dir: PathBuf,
    pub timeout: Duration,
}

impl DownloadHook {
    pub fn from_command_line(cmd: &[String], download_dir: &Path, timeout: Duration) -> Option<Self> {
        let (program, args) = cmd.split_first()?;
        Some(DownloadHook {
            program: program.clone(),
            args: args.to_vec(),
            download_dir: download_dir.to_path_buf(),
            timeout,
        })
    }

    pub fn run(&self, region: &Region, ip: &str, link: &str) -> Result<(), FetchError> {
        info!(program = %self.program, ip, link, "Running download hook");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("IPTV_REGION", &region.name)
            .env("IPTV_KEYWORD", &region.keyword)
            .env("IPTV_SOURCE_IP", ip)
            .env("IPTV_LINK", link)
            .env("IPTV_DOWNLOAD_DIR", &self.download_dir)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| FetchError::TriggerFailed(format!("cannot start {}: {}", self.program, e)))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                if status.success() {
                    return Ok(());
                }
                return Err(FetchError::TriggerFailed(format!("{} exited with {}", self.program, status)));
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(FetchError::TriggerFailed(format!(
                    "{} still running after {}s",
                    self.program,
                    self.timeout.as_secs()
                )));
            }
            thread::sleep(Duration::from_millis(100));
        }
    }
}

/// Serves listings from `<rows_dir>/<region>[.direct|.dropdown].json` and
/// downloads through a [`DownloadHook`].
pub struct DumpSite {
    rows_dir: PathBuf,
    hook: DownloadHook,
}

impl DumpSite {
    pub fn new(rows_dir: impl Into<PathBuf>, hook: DownloadHook) -> Self {
        DumpSite {
            rows_dir: rows_dir.into(),
            hook,
        }
    }

    fn dump_path(&self, region: &Region, strategy: Strategy) -> PathBuf {
        let suffix = match strategy {
            Strategy::DirectUrl => ".direct",
            Strategy::Dropdown => ".dropdown",
            Strategy::KeywordSearch => "",
        };
        self.rows_dir.join(format!("{}{}.json", region.name, suffix))
    }
}

impl Site for DumpSite {
    type Row = DumpRow;

    fn open_listing(&mut self, region: &Region, strategy: Strategy) -> Result<Vec<DumpRow>, NavError> {
        if strategy == Strategy::DirectUrl && region.url.is_none() {
            return Err(NavError::Unsupported);
        }
        let path = self.dump_path(region, strategy);
        if !path.exists() {
            return Err(NavError::Unsupported);
        }
        let rows = load_rows(&path)?;
        if rows.is_empty() {
            return Err(NavError::EmptyListing);
        }
        Ok(rows)
    }

    fn trigger_download(&mut self, region: &Region, entry: &RankedEntry<String>) -> Result<(), FetchError> {
        self.hook.run(region, &entry.ip, &entry.link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_hook(dir: &Path) -> DownloadHook {
        DownloadHook::from_command_line(&["true".to_string()], dir, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn region_lines() {
        let regions = parse_regions("# provinces\n\n广东\n四川 | 四川省成都\n北京|北京市|https://example.com/bj\n|x\n");
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[0], Region::from_keyword("广东"));
        assert_eq!(regions[1].keyword, "四川省成都");
        assert_eq!(regions[1].url, None);
        assert_eq!(regions[2].url.as_deref(), Some("https://example.com/bj"));
    }

    #[test]
    fn region_names_stay_inside_their_directory() {
        let regions = parse_regions("../etc\na/b|湖北\nc\\d\n..\n.\n湖南\n");
        assert_eq!(regions, vec![Region::from_keyword("湖南")]);

        assert_eq!(Region::from_keyword("湖北/武汉").name, "湖北_武汉");
        assert_eq!(Region::from_keyword("湖北/武汉").keyword, "湖北/武汉");
        assert_eq!(Region::from_keyword("..").name, "_");
    }

    #[test]
    fn dump_rows_from_fixture() {
        let rows = load_rows(Path::new("tests/fixtures/wuhan.json")).unwrap();
        assert!(rows.len() >= 5);
        let linked = rows.iter().find(|r| r.text.contains("58.19.132.11")).unwrap();
        assert_eq!(linked.link_for("58.19.132.11").as_deref(), Some("/ip/58.19.132.11"));
    }

    #[test]
    fn fixture_ranking() {
        use crate::listing::{Ranking, DEFAULT_MULTICAST_MARKER};

        let rows = load_rows(Path::new("tests/fixtures/wuhan.json")).unwrap();
        let ranking = Ranking::from_rows(&rows, DEFAULT_MULTICAST_MARKER);
        let got: Vec<_> = ranking
            .entries()
            .iter()
            .map(|e| (e.ip.as_str(), e.label.as_str(), e.link.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![
                ("111.175.20.9", "新上线", "/ip/111.175.20.9"),
                ("119.96.60.3", "存活2天", "/ip/119.96.60.3"),
                ("221.235.16.8", "存活5天", "/ip/221.235.16.8"),
                ("58.19.132.11", "存活12天", "/ip/58.19.132.11"),
            ]
        );
    }

    #[test]
    fn malformed_dump() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("bad.json");
        fs::write(&p, "{not json").unwrap();
        assert!(matches!(load_rows(&p), Err(NavError::Malformed(_))));
    }

    #[test]
    fn fallback_skips_unavailable_strategies() {
        let tmp = tempfile::tempdir().unwrap();
        let row = r#"[{"text": "组播 1.1.1.1 新上线", "links": [{"text": "1.1.1.1", "href": "/ip/1"}]}]"#;
        fs::write(tmp.path().join("广东.dropdown.json"), "[]").unwrap();
        fs::write(tmp.path().join("广东.json"), row).unwrap();

        let mut site = DumpSite::new(tmp.path(), noop_hook(tmp.path()));
        let region = Region::from_keyword("广东");
        let (strategy, rows) = open_with_fallback(&mut site, &region, &Strategy::FALLBACK_ORDER).unwrap();
        assert_eq!(strategy, Strategy::KeywordSearch);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn direct_url_used_first_when_present() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("北京.direct.json"), r#"[{"text": "direct"}]"#).unwrap();
        fs::write(tmp.path().join("北京.json"), r#"[{"text": "search"}]"#).unwrap();
        let mut site = DumpSite::new(tmp.path(), noop_hook(tmp.path()));

        let with_url = Region::parse_line("北京|北京市|https://example.com/bj").unwrap();
        let (strategy, rows) = open_with_fallback(&mut site, &with_url, &Strategy::FALLBACK_ORDER).unwrap();
        assert_eq!(strategy, Strategy::DirectUrl);
        assert_eq!(rows[0].text, "direct");

        let without = Region::from_keyword("北京");
        let (strategy, _) = open_with_fallback(&mut site, &without, &Strategy::FALLBACK_ORDER).unwrap();
        assert_eq!(strategy, Strategy::KeywordSearch);
    }

    #[test]
    fn all_strategies_failing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut site = DumpSite::new(tmp.path(), noop_hook(tmp.path()));
        let err = open_with_fallback(&mut site, &Region::from_keyword("西藏"), &Strategy::FALLBACK_ORDER).unwrap_err();
        assert!(matches!(err, FetchError::NavigationFailed { region } if region == "西藏"));
    }

    #[cfg(unix)]
    #[test]
    fn hook_sees_entry_env() {
        let tmp = tempfile::tempdir().unwrap();
        let cmd: Vec<String> = ["sh", "-c", "printf '%s %s' \"$IPTV_SOURCE_IP\" \"$IPTV_LINK\" > \"$IPTV_DOWNLOAD_DIR/out.m3u\""]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let hook = DownloadHook::from_command_line(&cmd, tmp.path(), Duration::from_secs(10)).unwrap();
        hook.run(&Region::from_keyword("武汉"), "1.2.3.4", "/ip/1.2.3.4").unwrap();
        assert_eq!(fs::read_to_string(tmp.path().join("out.m3u")).unwrap(), "1.2.3.4 /ip/1.2.3.4");
    }

    #[cfg(unix)]
    #[test]
    fn hook_failure_and_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let region = Region::from_keyword("武汉");

        let fail = DownloadHook::from_command_line(&["false".to_string()], tmp.path(), Duration::from_secs(5)).unwrap();
        assert!(matches!(fail.run(&region, "1.1.1.1", "/x"), Err(FetchError::TriggerFailed(_))));

        let slow: Vec<String> = ["sleep", "5"].iter().map(|s| s.to_string()).collect();
        let slow = DownloadHook::from_command_line(&slow, tmp.path(), Duration::from_millis(300)).unwrap();
        let started = Instant::now();
        assert!(matches!(slow.run(&region, "1.1.1.1", "/x"), Err(FetchError::TriggerFailed(_))));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn empty_command_line() {
        assert!(DownloadHook::from_command_line(&[], Path::new("."), Duration::from_secs(1)).is_none());
    }
}
