use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

use crate::artifact::{self, stamp};
use crate::config::Settings;
use crate::error::FetchError;
use crate::listing::Ranking;
use crate::site::{open_with_fallback, Region, Site, Strategy};

/// What a successful region run produced.
#[derive(Debug, Clone)]
pub struct RegionOutcome {
    pub region: String,
    pub ip: String,
    pub label: String,
    pub rank: usize,
    pub strategy: Strategy,
    pub path: PathBuf,
}

/// Listing → ranking → download → move into place → stamp.
pub fn run_region<S: Site>(
    settings: &Settings,
    site: &mut S,
    region: &Region,
    output: &Path,
) -> Result<RegionOutcome, FetchError> {
    let (strategy, rows) = open_with_fallback(site, region, &Strategy::FALLBACK_ORDER)?;

    let ranking = Ranking::from_rows(&rows, &settings.multicast_marker);
    println!("{}: {} valid multicast IPs (1 = freshest)", region.name, ranking.len());
    for line in ranking.render(settings.rank) {
        println!("{}", line);
    }

    let entry = ranking
        .select(settings.rank)
        .map_err(|e| FetchError::from_select(e, &region.name))?;
    info!(region = %region.name, ip = %entry.ip, status = %entry.label, rank = settings.rank, "Selected source");

    let watcher = settings.watcher();
    let before = watcher.snapshot();
    let trigger = SystemTime::now();
    site.trigger_download(region, entry)?;

    let downloaded = watcher
        .wait_for_new_file(&before, trigger, settings.download_timeout())
        .ok_or_else(|| FetchError::DownloadTimeout {
            dir: watcher.dir().to_path_buf(),
            timeout_secs: settings.download_timeout_secs,
        })?;

    artifact::move_into_place(&downloaded, output)?;
    if fs::metadata(output)?.len() == 0 {
        return Err(FetchError::EmptyArtifact {
            path: output.to_path_buf(),
        });
    }

    if settings.stamp {
        stamp::stamp(output, &entry.ip, settings.rank);
    }

    Ok(RegionOutcome {
        region: region.name.clone(),
        ip: entry.ip.clone(),
        label: entry.label.clone(),
        rank: settings.rank,
        strategy,
        path: output.to_path_buf(),
    })
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<RegionOutcome>,
    pub failed: Vec<(String, FetchError)>,
}

impl BatchReport {
    pub fn print(&self) {
        println!(
            "\nBatch done: {} succeeded, {} failed.",
            self.succeeded.len(),
            self.failed.len()
        );
        for o in &self.succeeded {
            println!("  ok   {:<12} {:<15} {:<10} {}", o.region, o.ip, o.label, o.path.display());
        }
        for (region, e) in &self.failed {
            println!("  FAIL {:<12} {}", region, e);
        }
    }
}

/// Run every region; a failed region is recorded and the batch moves on.
pub fn run_batch<S: Site>(settings: &Settings, site: &mut S, regions: &[Region]) -> BatchReport {
    let pb = ProgressBar::new(regions.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let mut report = BatchReport::default();
    for region in regions {
        pb.set_message(region.name.clone());
        let output = settings.region_output_path(&region.name);
        match run_region(settings, site, region, &output) {
            Ok(outcome) => report.succeeded.push(outcome),
            Err(e) => {
                error!(region = %region.name, error = %e, "Region failed, continuing");
                report.failed.push((region.name.clone(), e));
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs::File;
    use std::time::Duration;

    use crate::error::NavError;
    use crate::listing::RankedEntry;
    use crate::site::DumpRow;

    enum Download {
        Write(&'static str),
        WriteEmpty,
        Nothing,
    }

    struct FakeSite {
        download_dir: PathBuf,
        listings: HashMap<String, Vec<DumpRow>>,
        download: Download,
        triggered: Vec<String>,
    }

    impl Site for FakeSite {
        type Row = DumpRow;

        fn open_listing(&mut self, region: &Region, strategy: Strategy) -> Result<Vec<DumpRow>, NavError> {
            if strategy != Strategy::KeywordSearch {
                return Err(NavError::Unsupported);
            }
            self.listings.get(&region.name).cloned().ok_or(NavError::EmptyListing)
        }

        fn trigger_download(&mut self, _region: &Region, entry: &RankedEntry<String>) -> Result<(), FetchError> {
            self.triggered.push(entry.ip.clone());
            let p = self.download_dir.join(format!("{}.m3u", entry.ip));
            match self.download {
                Download::Write(body) => fs::write(&p, body)?,
                Download::WriteEmpty => {
                    fs::write(&p, "")?;
                    File::options()
                        .write(true)
                        .open(&p)?
                        .set_modified(SystemTime::now() + Duration::from_secs(3))?;
                }
                Download::Nothing => {}
            }
            Ok(())
        }
    }

    fn row(text: &str) -> DumpRow {
        let links = crate::listing::rows::extract_ip(text)
            .map(|ip| {
                vec![crate::site::DumpLink {
                    text: ip.to_string(),
                    href: format!("/ip/{}", ip),
                }]
            })
            .unwrap_or_default();
        DumpRow {
            text: text.to_string(),
            links,
        }
    }

    fn settings(download: &Path, output: &Path) -> Settings {
        Settings {
            keyword: "湖北省武汉".into(),
            rank: 1,
            download_dir: download.to_path_buf(),
            output_dir: output.to_path_buf(),
            output_file: "iptv_latest.m3u".into(),
            download_timeout_secs: 1,
            poll_interval_ms: 50,
            mtime_tolerance_ms: 500,
            extension: "m3u".into(),
            multicast_marker: "组播".into(),
            stamp: true,
        }
    }

    fn site(download_dir: &Path, download: Download) -> FakeSite {
        let mut listings = HashMap::new();
        listings.insert(
            "武汉".to_string(),
            vec![
                row("组播 1.2.3.4 新上线"),
                row("组播 5.6.7.8 存活3天"),
                row("组播 1.2.3.4 存活1天"),
            ],
        );
        FakeSite {
            download_dir: download_dir.to_path_buf(),
            listings,
            download,
            triggered: Vec::new(),
        }
    }

    #[test]
    fn single_region_success() {
        let dl = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let s = settings(dl.path(), out.path());
        let mut fake = site(dl.path(), Download::Write("#EXTM3U\n#EXTINF:-1,CCTV1\nrtp://239.1.1.1:8000\n"));

        let target = s.output_path();
        let o = run_region(&s, &mut fake, &Region::from_keyword("武汉"), &target).unwrap();
        assert_eq!(o.ip, "1.2.3.4");
        assert_eq!(o.label, "新上线");
        assert_eq!(o.strategy, Strategy::KeywordSearch);
        assert_eq!(fake.triggered, vec!["1.2.3.4"]);

        let body = fs::read_to_string(&target).unwrap();
        let lines: Vec<_> = body.lines().collect();
        assert_eq!(lines[0], "#EXTM3U");
        assert!(lines[1].starts_with("# source_ip=1.2.3.4 rank=1 updated_at="));
        assert_eq!(lines.len(), 4);
        assert!(!dl.path().join("1.2.3.4.m3u").exists());
    }

    #[test]
    fn second_rank_without_stamp() {
        let dl = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let mut s = settings(dl.path(), out.path());
        s.rank = 2;
        s.stamp = false;
        let mut fake = site(dl.path(), Download::Write("#EXTM3U\nrtp://a\n"));

        let o = run_region(&s, &mut fake, &Region::from_keyword("武汉"), &s.output_path()).unwrap();
        assert_eq!(o.ip, "5.6.7.8");
        assert_eq!(fs::read_to_string(s.output_path()).unwrap(), "#EXTM3U\nrtp://a\n");
    }

    #[test]
    fn out_of_range_never_triggers() {
        let dl = tempfile::tempdir().unwrap();
        let mut s = settings(dl.path(), dl.path());
        s.rank = 3;
        let mut fake = site(dl.path(), Download::Write("x"));
        let err = run_region(&s, &mut fake, &Region::from_keyword("武汉"), &s.output_path()).unwrap_err();
        assert!(matches!(err, FetchError::OutOfRange { rank: 3, available: 2 }));
        assert!(fake.triggered.is_empty());
    }

    #[test]
    fn times_out_without_download() {
        let dl = tempfile::tempdir().unwrap();
        let s = settings(dl.path(), dl.path());
        let mut fake = site(dl.path(), Download::Nothing);
        let err = run_region(&s, &mut fake, &Region::from_keyword("武汉"), &s.output_path()).unwrap_err();
        assert!(matches!(err, FetchError::DownloadTimeout { timeout_secs: 1, .. }));
    }

    #[test]
    fn empty_download_is_reported() {
        let dl = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let s = settings(dl.path(), out.path());
        let mut fake = site(dl.path(), Download::WriteEmpty);
        let err = run_region(&s, &mut fake, &Region::from_keyword("武汉"), &s.output_path()).unwrap_err();
        assert!(matches!(err, FetchError::EmptyArtifact { .. }));
    }

    #[test]
    fn batch_continues_past_failures() {
        let dl = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let s = settings(dl.path(), out.path());
        let mut fake = site(dl.path(), Download::Write("#EXTM3U\nrtp://a\n"));
        fake.listings.insert("西藏".into(), vec![row("组播 9.9.9.9 暂时失效")]);

        let regions = vec![
            Region::from_keyword("西藏"),
            Region::from_keyword("青海"),
            Region::from_keyword("武汉"),
        ];
        let report = run_batch(&s, &mut fake, &regions);

        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.succeeded[0].path, out.path().join("武汉.m3u"));
        assert_eq!(report.failed.len(), 2);
        assert!(matches!(report.failed[0].1, FetchError::NoValidCandidates { .. }));
        assert!(matches!(report.failed[1].1, FetchError::NavigationFailed { .. }));
        assert!(out.path().join("武汉.m3u").exists());
    }
}
