#![allow(clippy::result_large_err)]

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use flume::SendError;
use miette::Diagnostic;
use thiserror::Error;
use tracing::info;

use crate::asserter::Asserter;
use crate::asserter::Report;
use crate::cli::Cli;
use crate::config::Config;
use crate::config::ConfigError;
use crate::outputter::OutPutter;
use crate::outputter::Summary;
use crate::parser::LoadError;
use crate::parser::Source;
use crate::runner::Executor;
use crate::runner::RunnerError;
use crate::runner::RunnerResult;
use crate::runner::run_tests;
use crate::setup::SetupError;
use crate::validator::TestCase;
use crate::validator::ValidationError;
use crate::validator::Validator;

mod asserter;
mod cli;
mod config;
mod headers;
mod logging;
mod outputter;
mod parser;
mod runner;
mod setup;
mod template;
#[cfg(test)]
mod test_app;
mod validator;

const ENV_FILE: &str = ".env";

const EXIT_FAILED: u8 = 1;
const EXIT_FATAL: u8 = 2;
const EXIT_NOT_READY: u8 = 69;

#[derive(Error, Debug, Diagnostic)]
pub enum BlackboxError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error("failed to build the async runtime")]
    Runtime(#[source] std::io::Error),

    #[error("failed to build the http client")]
    Client(#[source] reqwest::Error),

    #[error("failed in run step")]
    Runner(#[from] RunnerError),

    #[error("failed in assert step")]
    Asserter(#[from] SendError<Report>),

    #[error("pipeline task stopped unexpectedly")]
    Task(#[from] tokio::task::JoinError),
}

impl BlackboxError {
    fn exit_code(&self) -> u8 {
        match self {
            BlackboxError::Setup(SetupError::Timeout { .. }) => EXIT_NOT_READY,
            _ => EXIT_FATAL,
        }
    }
}

fn main() -> ExitCode {
    // Before parsing so the file can feed the env fallbacks of the flags.
    if let Err(e) = setup::load_env_file(Path::new(ENV_FILE)) {
        return fail(e.into());
    }

    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli) {
        Ok(summary) if summary.all_passed() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(EXIT_FAILED),
        Err(e) => fail(e),
    }
}

fn fail(error: BlackboxError) -> ExitCode {
    let code = error.exit_code();
    eprintln!("{:?}", miette::Report::new(error));
    ExitCode::from(code)
}

fn run(cli: Cli) -> Result<Summary, BlackboxError> {
    let config = Config::from_cli(&cli)?;
    let tests = load_tests(&config.sources)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(BlackboxError::Runtime)?;

    runtime.block_on(run_pipeline(config, tests))
}

/// Every source is rendered, parsed and validated before any request is made.
fn load_tests(sources: &[Source]) -> Result<Vec<TestCase>, BlackboxError> {
    let mut tests = vec![];

    for source in sources {
        info!(%source, "loading tests");
        let suite = parser::load(source)?;
        tests.extend(Validator::new(&suite).validate()?);
    }

    Ok(tests)
}

async fn run_pipeline(config: Config, tests: Vec<TestCase>) -> Result<Summary, BlackboxError> {
    if let Some(wait) = &config.wait {
        setup::wait_for_ready(wait).await?;
    }
    setup::wait_extra(config.wait_extra).await;

    let executor = Executor::new(config.request_timeout).map_err(BlackboxError::Client)?;
    let n_tests = tests.len();

    let (tx, rx) = flume::unbounded::<RunnerResult>();
    let (outputter_tx, outputter_rx) = flume::unbounded::<Report>();

    let outputter_jh = tokio::spawn(async move { OutPutter::start(outputter_rx, n_tests).await });
    let runner_jh = tokio::spawn(async move { run_tests(tests, executor, tx).await });
    let asserter_jh = tokio::spawn(async move { Asserter::run(rx, outputter_tx).await });

    let (runner, asserter, summary) = futures::join!(runner_jh, asserter_jh, outputter_jh);
    runner??;
    asserter??;

    Ok(summary?)
}

#[cfg(test)]
mod test {
    use std::io::Write;
    use std::time::Duration;

    use url::Url;

    use crate::BlackboxError;
    use crate::EXIT_FATAL;
    use crate::EXIT_NOT_READY;
    use crate::config::Config;
    use crate::load_tests;
    use crate::parser::Source;
    use crate::run_pipeline;
    use crate::setup::SetupError;
    use crate::setup::WaitConfig;
    use crate::test_app;

    fn suite_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn config(sources: Vec<Source>) -> Config {
        Config {
            sources,
            wait: None,
            wait_extra: Duration::ZERO,
            request_timeout: Some(Duration::from_secs(5)),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn suite_runs_end_to_end() {
        let app = test_app::spawn().await;
        let base = app.url("");

        let file = suite_file(&format!(
            r#"
- name: hello
  url: {base}/hello
  expect:
    status: 200
    body:
      content: hello
- name: okay regex
  url: {base}/okay
  expect:
    body:
      regex: "^ok"
- name: json schema
  url: {base}/json
  expect:
    headers:
      Content-Type: application/json
    body:
      jsonSchema: '{{"type":"object","required":["id"]}}'
- name: wrong content
  url: {base}/hello
  expect:
    body:
      content: "hello\n"
"#
        ));

        let sources = vec![Source::File(file.path().to_path_buf())];
        let tests = load_tests(&sources).unwrap();
        assert_eq!(tests.len(), 4);

        let summary = run_pipeline(config(sources), tests).await.unwrap();

        assert_eq!(summary.passed, 3);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn readiness_timeout_is_its_own_exit_code() {
        let app = test_app::spawn().await;
        let mut config = config(vec![]);
        config.wait = Some(WaitConfig {
            max_attempts: 2,
            poll_interval: Duration::from_millis(10),
            ..WaitConfig::new(Url::parse(&app.url("/unavailable")).unwrap())
        });

        let err = run_pipeline(config, vec![]).await.unwrap_err();

        assert!(matches!(err, BlackboxError::Setup(SetupError::Timeout { .. })));
        assert_eq!(err.exit_code(), EXIT_NOT_READY);
    }

    #[test]
    fn invalid_suite_is_fatal() {
        let file = suite_file("- name: broken\n  url: http://localhost/\n  method: \"NOT A METHOD\"\n");

        let err = load_tests(&[Source::File(file.path().to_path_buf())]).unwrap_err();

        assert!(matches!(err, BlackboxError::Validation(_)));
        assert_eq!(err.exit_code(), EXIT_FATAL);
    }

    #[test]
    fn template_error_is_fatal() {
        let file = suite_file("- name: {{ unclosed\n");

        let err = load_tests(&[Source::File(file.path().to_path_buf())]).unwrap_err();
        assert!(matches!(err, BlackboxError::Load(_)));
    }
}
