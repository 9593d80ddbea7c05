use std::env;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::artifact::ArtifactWatcher;

pub const ENV_PREFIX: &str = "IPTV";
const DEFAULT_CONFIG_NAME: &str = "iptv_m3u_fetch";

pub const DEFAULT_KEYWORD: &str = "湖北省武汉";
pub const DEFAULT_RANK: u64 = 1;

/// Runtime settings. Precedence: CLI override > `IPTV_*` env > config file > default.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub keyword: String,
    #[serde(deserialize_with = "lenient_rank")]
    pub rank: usize,
    pub download_dir: PathBuf,
    pub output_dir: PathBuf,
    pub output_file: PathBuf,
    pub download_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub mtime_tolerance_ms: u64,
    pub extension: String,
    pub multicast_marker: String,
    pub stamp: bool,
}

/// Values given explicitly on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub keyword: Option<String>,
    pub rank: Option<usize>,
    pub download_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub download_timeout_secs: Option<u64>,
    pub no_stamp: bool,
}

impl Settings {
    pub fn load(config_file: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        Self::load_with_env(config_file, Environment::with_prefix(ENV_PREFIX), overrides)
    }

    pub fn load_with_env(
        config_file: Option<&Path>,
        environment: Environment,
        overrides: &Overrides,
    ) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("keyword", DEFAULT_KEYWORD)?
            .set_default("rank", DEFAULT_RANK)?
            .set_default("download_dir", ".")?
            .set_default("output_dir", ".")?
            .set_default("output_file", "iptv_latest.m3u")?
            .set_default("download_timeout_secs", 90u64)?
            .set_default("poll_interval_ms", 1000u64)?
            .set_default("mtime_tolerance_ms", 500u64)?
            .set_default("extension", "m3u")?
            .set_default("multicast_marker", "组播")?
            .set_default("stamp", true)?;

        builder = match config_file {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_NAME).required(false)),
        };

        let settings: Settings = builder
            .add_source(environment.try_parsing(true).ignore_empty(true))
            .set_override_option("keyword", overrides.keyword.clone())?
            .set_override_option("rank", overrides.rank.map(|r| r as u64))?
            .set_override_option("download_dir", overrides.download_dir.as_deref().map(path_value))?
            .set_override_option("output_dir", overrides.output_dir.as_deref().map(path_value))?
            .set_override_option("download_timeout_secs", overrides.download_timeout_secs)?
            .set_override_option("stamp", overrides.no_stamp.then_some(false))?
            .build()
            .context("Failed to assemble settings")?
            .try_deserialize()
            .context("Invalid settings")?;

        Ok(settings.sanitized())
    }

    fn sanitized(mut self) -> Self {
        if self.rank < 1 {
            warn!(rank = self.rank, "Rank must be at least 1, using 1");
            self.rank = 1;
        }
        self.keyword = self.keyword.trim().to_string();
        if self.keyword.is_empty() {
            self.keyword = DEFAULT_KEYWORD.to_string();
        }
        self
    }

    pub fn watcher(&self) -> ArtifactWatcher {
        ArtifactWatcher::new(&self.download_dir)
            .with_extension(&self.extension)
            .with_interval(Duration::from_millis(self.poll_interval_ms.max(1)))
            .with_tolerance(Duration::from_millis(self.mtime_tolerance_ms))
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Output path for a single run.
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_file)
    }

    /// Output path for one region of a batch run.
    pub fn region_output_path(&self, region: &str) -> PathBuf {
        self.output_dir.join(format!("{}.{}", region, self.extension))
    }
}

/// Accepts any integer or numeric string; anything else keeps the default rank.
fn lenient_rank<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawRank {
        Int(i64),
        Text(String),
        Other(IgnoredAny),
    }

    let rank = match RawRank::deserialize(deserializer)? {
        RawRank::Int(n) => usize::try_from(n).unwrap_or(0),
        RawRank::Text(s) => s.trim().parse::<usize>().unwrap_or_else(|_| {
            warn!(value = %s, default = DEFAULT_RANK, "Rank is not a number, using default");
            DEFAULT_RANK as usize
        }),
        RawRank::Other(_) => {
            warn!(default = DEFAULT_RANK, "Rank is not a number, using default");
            DEFAULT_RANK as usize
        }
    };
    Ok(rank)
}

fn path_value(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

/// True when neither keyword nor rank was given in the environment or on the command line.
/// A non-numeric `IPTV_RANK` does not count as given.
pub fn nothing_explicit(overrides: &Overrides) -> bool {
    let env_var = |key: &str| env::var(format!("{}_{}", ENV_PREFIX, key)).ok();
    let keyword_set = env_var("KEYWORD").is_some_and(|v| !v.trim().is_empty());
    let rank_set = env_var("RANK").is_some_and(|v| v.trim().parse::<usize>().is_ok());
    overrides.keyword.is_none() && overrides.rank.is_none() && !keyword_set && !rank_set
}

/// Ask for keyword and rank; an empty answer keeps the current value.
pub fn prompt_interactively(
    settings: &mut Settings,
    mut input: impl BufRead,
    mut out: impl Write,
) -> io::Result<()> {
    let mut line = String::new();

    write!(out, "Search keyword (Enter = {}): ", settings.keyword)?;
    out.flush()?;
    input.read_line(&mut line)?;
    let kw = line.trim();
    if !kw.is_empty() {
        settings.keyword = kw.to_string();
    }

    line.clear();
    write!(out, "Which freshest IP to take (Enter = {}): ", settings.rank)?;
    out.flush()?;
    input.read_line(&mut line)?;
    if let Ok(rank) = line.trim().parse::<usize>() {
        if rank >= 1 {
            settings.rank = rank;
        }
    }

    Ok(())
}
