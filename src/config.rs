use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::cli::Cli;
use crate::parser::Source;
use crate::setup::WaitConfig;

pub const DEFAULT_PATTERN: &str = "test*.yaml";

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("--wait-for-url must be a valid http or https URL, got `{url}`")]
    #[diagnostic(help("use an absolute URL such as http://localhost:8080/health"))]
    InvalidWaitUrl { url: String },

    #[error("invalid file pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("failed to list test files: {0}")]
    Glob(#[from] glob::GlobError),
}

/// Everything decided at startup. Built once and handed to the waiter and
/// the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub sources: Vec<Source>,
    pub wait: Option<WaitConfig>,
    pub wait_extra: Duration,
    pub request_timeout: Option<Duration>,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        Self::build(cli, DEFAULT_PATTERN)
    }

    fn build(cli: &Cli, pattern: &str) -> Result<Self, ConfigError> {
        let wait = cli
            .wait_for_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .map(|url| {
                parse_wait_url(url).map(|url| WaitConfig {
                    max_attempts: cli.wait_attempts,
                    ..WaitConfig::new(url)
                })
            })
            .transpose()?;

        let sources = if cli.files.is_empty() {
            discover(pattern)?
        } else {
            cli.files.iter().map(|arg| Source::from_arg(arg)).collect()
        };

        if sources.is_empty() {
            warn!(pattern, "no test files found");
        }

        Ok(Self {
            sources,
            wait,
            wait_extra: Duration::from_secs(cli.wait_extra),
            request_timeout: cli.timeout.map(Duration::from_secs),
        })
    }
}

fn parse_wait_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = || ConfigError::InvalidWaitUrl {
        url: raw.to_string(),
    };

    let url = Url::parse(raw).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid());
    }

    Ok(url)
}

/// Files matching `pattern`, sorted by path.
fn discover(pattern: &str) -> Result<Vec<Source>, ConfigError> {
    let mut paths = glob::glob(pattern)
        .map_err(|source| ConfigError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?
        .collect::<Result<Vec<PathBuf>, _>>()?;

    paths.sort();

    Ok(paths.into_iter().map(Source::File).collect())
}
