use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::time::sleep;
use tracing::info;
use tracing::warn;
use url::Url;

pub const DEFAULT_WAIT_ATTEMPTS: u32 = 30;

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("timed out waiting for {url} to respond with 200 OK after {attempts} attempts")]
    Timeout { url: Url, attempts: u32 },

    #[error("failed to build the readiness client")]
    Client(#[source] reqwest::Error),

    #[error("failed to load env file {path}: {source}")]
    EnvFile {
        path: String,
        #[source]
        source: dotenvy::Error,
    },
}

/// When the service under test counts as ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitConfig {
    pub url: Url,
    pub max_attempts: u32,
    pub poll_interval: Duration,
    /// A poll that gets no answer within this counts as not ready.
    pub attempt_timeout: Duration,
    /// Pause after the first 200 so the service can finish warming up.
    pub settle_delay: Duration,
}

impl WaitConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            max_attempts: DEFAULT_WAIT_ATTEMPTS,
            poll_interval: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(5),
            settle_delay: Duration::from_secs(1),
        }
    }
}

/// Polls `GET url` until it answers 200 or the attempts run out.
pub async fn wait_for_ready(config: &WaitConfig) -> Result<(), SetupError> {
    let client = Client::builder()
        .timeout(config.attempt_timeout)
        .build()
        .map_err(SetupError::Client)?;

    info!(url = %config.url, attempts = config.max_attempts, "waiting for service");

    for attempt in 1..=config.max_attempts {
        match client.get(config.url.clone()).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => {
                info!(url = %config.url, attempt, "service is ready");
                sleep(config.settle_delay).await;
                return Ok(());
            }
            Ok(resp) => warn!(attempt, status = %resp.status(), "service not ready"),
            Err(e) => warn!(attempt, error = %e, "service not ready"),
        }

        if attempt < config.max_attempts {
            sleep(config.poll_interval).await;
        }
    }

    Err(SetupError::Timeout {
        url: config.url.clone(),
        attempts: config.max_attempts,
    })
}

pub async fn wait_extra(duration: Duration) {
    if duration.is_zero() {
        return;
    }

    info!(seconds = duration.as_secs_f64(), "waiting before running tests");
    sleep(duration).await;
}

/// Loads `KEY=value` lines into the process environment. Variables that are
/// already set win. Returns whether the file existed.
pub fn load_env_file(path: &Path) -> Result<bool, SetupError> {
    if !path.exists() {
        return Ok(false);
    }

    dotenvy::from_path(path).map_err(|source| SetupError::EnvFile {
        path: path.display().to_string(),
        source,
    })?;

    info!(path = %path.display(), "loaded env file");

    Ok(true)
}

#[cfg(test)]
mod test {
    use std::io::Write;
    use std::path::Path;
    use std::time::Duration;
    use std::time::Instant;

    use url::Url;

    use crate::setup::SetupError;
    use crate::setup::WaitConfig;
    use crate::setup::load_env_file;
    use crate::setup::wait_extra;
    use crate::setup::wait_for_ready;
    use crate::test_app;

    fn quick(url: String, max_attempts: u32) -> WaitConfig {
        WaitConfig {
            url: Url::parse(&url).unwrap(),
            max_attempts,
            poll_interval: Duration::from_millis(10),
            attempt_timeout: Duration::from_millis(200),
            settle_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn defaults() {
        let config = WaitConfig::new(Url::parse("http://localhost:8080/health").unwrap());
        assert_eq!(config.max_attempts, 30);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.attempt_timeout, Duration::from_secs(5));
        assert_eq!(config.settle_delay, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn ready_service_passes() {
        let app = test_app::spawn().await;
        wait_for_ready(&quick(app.url("/hello"), 3)).await.unwrap();
    }

    #[tokio::test]
    async fn non_200_times_out() {
        let app = test_app::spawn().await;

        let err = wait_for_ready(&quick(app.url("/unavailable"), 3))
            .await
            .unwrap_err();

        assert!(matches!(err, SetupError::Timeout { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn silent_service_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Accept connections and never answer.
        tokio::spawn(async move {
            let mut held = vec![];
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            wait_for_ready(&quick(format!("http://{addr}/health"), 2)),
        )
        .await
        .expect("waiter hung on a silent service");

        assert!(matches!(result, Err(SetupError::Timeout { attempts: 2, .. })));
    }

    #[tokio::test]
    async fn no_content_is_not_ready() {
        let app = test_app::spawn().await;
        let result = wait_for_ready(&quick(app.url("/empty"), 2)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn zero_extra_wait_returns_immediately() {
        let start = Instant::now();
        wait_extra(Duration::ZERO).await;
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn env_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "BLACKBOX_SETUP_TEST_TOKEN=from-file").unwrap();

        assert!(load_env_file(file.path()).unwrap());
        assert_eq!(
            std::env::var("BLACKBOX_SETUP_TEST_TOKEN").unwrap(),
            "from-file"
        );
    }

    #[test]
    fn missing_env_file_is_skipped() {
        assert!(!load_env_file(Path::new("/definitely/not/here/.env")).unwrap());
    }

    #[test]
    fn malformed_env_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "NOT VALID").unwrap();

        let err = load_env_file(file.path()).unwrap_err();
        assert!(matches!(err, SetupError::EnvFile { .. }));
    }
}
