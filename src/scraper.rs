use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;

/// The subprocess seam. The relay only needs "credentials in, stdout text
/// out"; everything behind that is an opaque collaborator, which also makes
/// the boundary trivial to fake in tests.
#[async_trait]
pub trait Scraper: Send + Sync {
    async fn scrape(&self, username: &str, password: &str) -> Result<String, AppError>;
}

/// Production scraper: spawns `<program> [script] <username> <password>`,
/// captures stdout/stderr until exit, and enforces a wall-clock timeout.
/// The child is spawned kill-on-drop so an expired or abandoned request
/// cannot leak a process.
pub struct CommandScraper {
    program: PathBuf,
    script: Option<PathBuf>,
    timeout: Duration,
}

impl CommandScraper {
    pub fn new(config: &Config) -> Self {
        Self {
            program: PathBuf::from(&config.scraper_program),
            script: config.scraper_script.as_ref().map(PathBuf::from),
            timeout: config.scrape_timeout,
        }
    }
}

#[async_trait]
impl Scraper for CommandScraper {
    async fn scrape(&self, username: &str, password: &str) -> Result<String, AppError> {
        // Correlates the log lines of one scrape; credentials never appear.
        let job = Uuid::new_v4();
        info!(%job, program = %self.program.display(), "spawning scraper");

        let mut command = Command::new(&self.program);
        if let Some(script) = &self.script {
            command.arg(script);
        }
        let child = command
            .arg(username)
            .arg(password)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(AppError::Spawn)?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(AppError::Spawn)?,
            Err(_) => {
                warn!(%job, secs = self.timeout.as_secs(), "scraper timed out, killing child");
                return Err(AppError::Timeout {
                    secs: self.timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() || stdout.trim().is_empty() {
            let exit_code = output.status.code();
            error!(%job, ?exit_code, "scraper failed: {}", stderr.trim());
            return Err(AppError::ScraperFailed {
                exit_code,
                details: stderr.trim().to_string(),
            });
        }

        info!(%job, bytes = stdout.len(), "scraper finished");
        Ok(stdout)
    }
}
