use std::fmt;
use std::fmt::Display;

use flume::Receiver;
use flume::SendError;
use flume::Sender;
use regex::Regex;
use reqwest::Method;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;

use crate::headers::HeaderList;
use crate::runner::CapturedResponse;
use crate::runner::RunnerResult;
use crate::validator::BodyExpectation;
use crate::validator::ExpectationSpec;

pub struct Asserter {}

/// What the primary response is compared against once `fromRequest` has
/// been applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedExpectation {
    pub status: Option<u16>,
    pub headers: HeaderList,
    pub body: BodyExpectation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    Status { expected: u16, actual: StatusCode },
    Header {
        name: String,
        expected: String,
        actual: String,
    },
    BodyNotEmpty { actual: String },
    BodyContent { expected: String, actual: String },
    BodyRegex { pattern: String, actual: String },
    InvalidRegex { pattern: String, message: String },
    Schema(String),
    BodyNotJson(String),
    InvalidSchema(String),
    RequestFailed(String),
}

impl Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Status { expected, actual } => {
                write!(f, "got status: '{}', want: '{expected}'", actual.as_u16())
            }
            Failure::Header {
                name,
                expected,
                actual,
            } => write!(f, "got: '{actual}', want header '{name}': '{expected}'"),
            Failure::BodyNotEmpty { actual } => write!(f, "got: '{actual}', want: '<empty>'"),
            Failure::BodyContent { expected, actual } => {
                write!(f, "got: '{actual}', want: '{expected}'")
            }
            Failure::BodyRegex { pattern, actual } => {
                write!(f, "got: '{actual}', want match: '{pattern}'")
            }
            Failure::InvalidRegex { pattern, message } => {
                write!(f, "failed to use regex '{pattern}' to match; {message}")
            }
            Failure::Schema(message) => write!(f, "schema: {message}"),
            Failure::BodyNotJson(message) => write!(f, "schema: body is not valid JSON; {message}"),
            Failure::InvalidSchema(message) => write!(f, "schema: invalid jsonSchema; {message}"),
            Failure::RequestFailed(message) => write!(f, "{message}"),
        }
    }
}

/// The evaluated outcome of one test case.
#[derive(Debug, Clone)]
pub struct Report {
    pub name: String,
    pub method: Method,
    pub url: String,
    pub failures: Vec<Failure>,
}

impl Report {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

pub trait Assert {
    fn assert(&self) -> Vec<Failure>;
}

impl Assert for RunnerResult {
    fn assert(&self) -> Vec<Failure> {
        match &self.outcome {
            Ok(responses) => {
                let expected = resolve(&self.expectation, responses.dependent.as_ref());
                evaluate(&expected, &responses.primary)
            }
            Err(error) => vec![Failure::RequestFailed(error.to_string())],
        }
    }
}

impl Asserter {
    pub async fn run(rx: Receiver<RunnerResult>, output_tx: Sender<Report>) -> Result<(), SendError<Report>> {
        while let Ok(msg) = rx.recv_async().await {
            let failures = msg.assert();

            output_tx
                .send_async(Report {
                    name: msg.name,
                    method: msg.method,
                    url: msg.url,
                    failures,
                })
                .await?;
        }

        Ok(())
    }
}

/// Applies the dependent response, if any, on top of the static expectation.
///
/// Status and body content come from the dependent response. Each whitelisted
/// header is copied over, a missing one as the empty string.
pub fn resolve(
    expectation: &ExpectationSpec,
    dependent: Option<&CapturedResponse>,
) -> ResolvedExpectation {
    let mut resolved = ResolvedExpectation {
        status: expectation.status,
        headers: expectation.headers.clone(),
        body: expectation.body.clone(),
    };

    if let (Some(from_request), Some(dependent)) = (&expectation.from_request, dependent) {
        resolved.status = Some(dependent.status.as_u16());
        resolved.body.content = Some(dependent.body_text.clone()).filter(|body| !body.is_empty());

        for name in &from_request.header_whitelist {
            resolved
                .headers
                .insert(name.clone(), header_text(&dependent.headers, name));
        }
    }

    resolved
}

/// Checks every configured assertion and returns all mismatches.
pub fn evaluate(expected: &ResolvedExpectation, actual: &CapturedResponse) -> Vec<Failure> {
    let mut failures = vec![];
    let body = &actual.body_text;

    if let Some(status) = expected.status {
        assert_status(status, actual.status, &mut failures);
    }

    assert_headers(&expected.headers, &actual.headers, &mut failures);

    if expected.body.empty && !body.is_empty() {
        failures.push(Failure::BodyNotEmpty {
            actual: body.clone(),
        });
    }

    if let Some(content) = &expected.body.content {
        if content != body {
            failures.push(Failure::BodyContent {
                expected: content.clone(),
                actual: body.clone(),
            });
        }
    }

    if let Some(pattern) = &expected.body.regex {
        assert_regex(pattern, body, &mut failures);
    }

    if let Some(schema) = &expected.body.json_schema {
        assert_json_schema(schema, body, &mut failures);
    }

    failures
}

fn assert_status(expected: u16, actual: StatusCode, failures: &mut Vec<Failure>) {
    if actual.as_u16() != expected {
        failures.push(Failure::Status { expected, actual });
    }
}

fn assert_headers(expected: &HeaderList, actual: &HeaderMap, failures: &mut Vec<Failure>) {
    for (name, value) in expected.iter() {
        let got = header_text(actual, name);
        if got != value {
            failures.push(Failure::Header {
                name: name.to_string(),
                expected: value.to_string(),
                actual: got,
            });
        }
    }
}

fn assert_regex(pattern: &str, body: &str, failures: &mut Vec<Failure>) {
    match Regex::new(pattern) {
        Ok(regex) if !regex.is_match(body) => failures.push(Failure::BodyRegex {
            pattern: pattern.to_string(),
            actual: body.to_string(),
        }),
        Ok(_) => {}
        Err(e) => failures.push(Failure::InvalidRegex {
            pattern: pattern.to_string(),
            message: e.to_string(),
        }),
    }
}

/// A broken schema ends the schema check with a single failure.
fn assert_json_schema(schema: &str, body: &str, failures: &mut Vec<Failure>) {
    let validator = match serde_json::from_str::<serde_json::Value>(schema) {
        Ok(schema) => match jsonschema::validator_for(&schema) {
            Ok(validator) => validator,
            Err(e) => {
                failures.push(Failure::InvalidSchema(e.to_string()));
                return;
            }
        },
        Err(e) => {
            failures.push(Failure::InvalidSchema(e.to_string()));
            return;
        }
    };

    let instance = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(instance) => instance,
        Err(e) => {
            failures.push(Failure::BodyNotJson(e.to_string()));
            return;
        }
    };

    failures.extend(
        validator
            .iter_errors(&instance)
            .map(|error| Failure::Schema(error.to_string())),
    );
}

/// First value of a header, or the empty string when absent.
fn header_text(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .unwrap_or_default()
}
