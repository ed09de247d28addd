use std::time::Duration;

use flume::SendError;
use flume::Sender;
use reqwest::Client;
use reqwest::Method;
use reqwest::Response;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::HeaderMap;
use reqwest::redirect::Policy;
use thiserror::Error;
use tracing::debug;
use tracing::info;
use url::Url;

use crate::validator::ExpectationSpec;
use crate::validator::RequestSpec;
use crate::validator::TestCase;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("channel error")]
    ChannelError(#[from] SendError<RunnerResult>),
}

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("invalid url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("{0}")]
    Send(#[source] reqwest::Error),

    #[error("failed to read body: {0}")]
    ReadBody(#[source] reqwest::Error),
}

/// Why a test case produced no response to assert on.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("failed making request; {0}")]
    Request(#[source] RequestError),

    #[error("failed making fromRequest; {0}")]
    FromRequest(#[source] RequestError),
}

#[derive(Debug)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body_text: String,
}

impl CapturedResponse {
    /// Drains the body so the connection goes back to the pool.
    pub async fn from_response(resp: Response) -> Result<Self, RequestError> {
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = resp.bytes().await.map_err(RequestError::ReadBody)?;

        Ok(Self {
            status,
            headers,
            body_text: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

/// The primary response and, for `fromRequest` tests, the dependent one.
#[derive(Debug)]
pub struct Responses {
    pub primary: CapturedResponse,
    pub dependent: Option<CapturedResponse>,
}

#[derive(Debug)]
pub struct RunnerResult {
    pub name: String,
    pub method: Method,
    pub url: String,
    pub expectation: ExpectationSpec,
    pub outcome: Result<Responses, RunError>,
}

/// Issues requests described by a [`RequestSpec`].
///
/// Holds one pooled client per redirect policy, shared by every test case.
#[derive(Clone)]
pub struct Executor {
    client: Client,
    following: Client,
}

impl Executor {
    pub fn new(timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let build = |policy: Policy| {
            let builder = Client::builder().redirect(policy);
            let builder = match timeout {
                Some(timeout) => builder.timeout(timeout),
                None => builder,
            };
            builder.build()
        };

        Ok(Self {
            client: build(Policy::none())?,
            following: build(Policy::default())?,
        })
    }

    pub async fn execute(&self, req: &RequestSpec) -> Result<CapturedResponse, RequestError> {
        let url = Url::parse(&req.url).map_err(|source| RequestError::InvalidUrl {
            url: req.url.clone(),
            source,
        })?;
        let method = resolve_method(req);

        debug!(%method, %url, follow_redirects = req.follow_redirects, "sending request");

        let client = if req.follow_redirects {
            &self.following
        } else {
            &self.client
        };

        let mut request = client.request(method, url);

        for (name, value) in req.headers.iter() {
            request = request.header(name, value);
        }

        if let Some(body) = &req.body {
            if !req.headers.contains(CONTENT_TYPE.as_str()) {
                request = request.header(CONTENT_TYPE, FORM_CONTENT_TYPE);
            }
            request = request.body(body.clone());
        }

        if let Some(auth) = &req.basic_auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        let response = request.send().await.map_err(RequestError::Send)?;

        CapturedResponse::from_response(response).await
    }
}

/// Explicit method, else `POST` when there is a body, else `GET`.
pub fn resolve_method(req: &RequestSpec) -> Method {
    match (&req.method, &req.body) {
        (Some(method), _) => method.clone(),
        (None, Some(body)) if !body.is_empty() => Method::POST,
        _ => Method::GET,
    }
}

/// Runs every test case in definition order, one at a time.
pub async fn run_tests(
    tests: Vec<TestCase>,
    executor: Executor,
    tx: Sender<RunnerResult>,
) -> Result<(), RunnerError> {
    for test in tests {
        let result = run_test(&executor, test).await;
        tx.send_async(result).await?;
    }

    Ok(())
}

pub async fn run_test(executor: &Executor, test: TestCase) -> RunnerResult {
    info!(test = %test.name, url = %test.request.url, "running test");

    let outcome = exchange(executor, &test).await;

    RunnerResult {
        method: resolve_method(&test.request),
        url: test.request.url,
        name: test.name,
        expectation: test.expectation,
        outcome,
    }
}

async fn exchange(executor: &Executor, test: &TestCase) -> Result<Responses, RunError> {
    let primary = executor
        .execute(&test.request)
        .await
        .map_err(RunError::Request)?;

    let dependent = match &test.expectation.from_request {
        Some(from_request) => {
            info!(test = %test.name, url = %from_request.url, "fetching fromRequest");
            let response = executor
                .execute(from_request)
                .await
                .map_err(RunError::FromRequest)?;
            Some(response)
        }
        None => None,
    };

    Ok(Responses { primary, dependent })
}
