use anyhow::Context;
use std::time::Duration;

const DEFAULT_PORT: u16 = 5050;
const DEFAULT_SCRAPER_PROGRAM: &str = "python3";
const DEFAULT_SCRAPER_SCRIPT: &str = "scraper/scraper.py";
const DEFAULT_SCRAPE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_CONCURRENT_SCRAPES: usize = 4;

/// Runtime configuration, read once at startup from the environment (with
/// `.env` loaded beforehand). Every knob has a default; a value that is set
/// but malformed is a startup error rather than a silent fallback.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Interpreter or binary to invoke.
    pub scraper_program: String,
    /// First argument to the program; `None` for self-contained scraper
    /// binaries (set `SCRAPER_SCRIPT=` empty to disable it).
    pub scraper_script: Option<String>,
    pub scrape_timeout: Duration,
    pub max_concurrent_scrapes: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("PORT is not a valid port number: {raw:?}"))?,
            Err(_) => DEFAULT_PORT,
        };

        let scraper_program = std::env::var("SCRAPER_PROGRAM")
            .unwrap_or_else(|_| DEFAULT_SCRAPER_PROGRAM.to_string());

        let scraper_script = match std::env::var("SCRAPER_SCRIPT") {
            Ok(raw) if raw.trim().is_empty() => None,
            Ok(raw) => Some(raw),
            Err(_) => Some(DEFAULT_SCRAPER_SCRIPT.to_string()),
        };

        let timeout_secs = match std::env::var("SCRAPE_TIMEOUT_SECS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("SCRAPE_TIMEOUT_SECS is not a number: {raw:?}"))?,
            Err(_) => DEFAULT_SCRAPE_TIMEOUT_SECS,
        };

        let max_concurrent_scrapes = match std::env::var("MAX_CONCURRENT_SCRAPES") {
            Ok(raw) => {
                let parsed = raw
                    .trim()
                    .parse::<usize>()
                    .with_context(|| format!("MAX_CONCURRENT_SCRAPES is not a number: {raw:?}"))?;
                anyhow::ensure!(parsed > 0, "MAX_CONCURRENT_SCRAPES must be at least 1");
                parsed
            }
            Err(_) => DEFAULT_MAX_CONCURRENT_SCRAPES,
        };

        Ok(Self {
            port,
            scraper_program,
            scraper_script,
            scrape_timeout: Duration::from_secs(timeout_secs),
            max_concurrent_scrapes,
        })
    }
}
