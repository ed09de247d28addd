use miette::Diagnostic;
use miette::NamedSource;
use miette::SourceSpan;
use reqwest::Method;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use thiserror::Error;
use tracing::debug;

use crate::headers::HeaderList;
use crate::parser;
use crate::parser::Suite;

const URL_REQUIRED: &str = "Every request needs a `url`.";

/// One named request and what its response must look like.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub request: RequestSpec,
    pub expectation: ExpectationSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestSpec {
    pub url: String,
    /// `None` lets the executor pick `POST` or `GET` from the body.
    pub method: Option<Method>,
    pub body: Option<String>,
    pub follow_redirects: bool,
    pub basic_auth: Option<BasicAuth>,
    pub headers: HeaderList,
    /// Headers copied into the outer expectation when used as `fromRequest`.
    pub header_whitelist: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExpectationSpec {
    pub status: Option<u16>,
    pub body: BodyExpectation,
    pub headers: HeaderList,
    pub from_request: Option<Box<RequestSpec>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyExpectation {
    pub content: Option<String>,
    pub regex: Option<String>,
    pub empty: bool,
    pub json_schema: Option<String>,
}

#[derive(Debug, Error, Diagnostic)]
#[error("Invalid field `{field}`: {message}")]
pub struct ValidationError {
    field: String,
    message: String,
    #[source_code]
    src: Option<NamedSource<String>>,
    #[label("invalid value here")]
    span: Option<SourceSpan>,
}

macro_rules! validation_err {
    ($field:expr, $msg:expr, $self:expr, $snippet:expr) => {
        ValidationError {
            field: $field.to_string(),
            message: $msg.to_string(),
            src: Some(NamedSource::new(
                $self.suite.name.clone(),
                $self.suite.rendered.clone(),
            )),
            span: find_span($snippet, &$self.suite.rendered),
        }
    };
}

/// Turns the raw records of one suite into test cases.
pub struct Validator<'a> {
    suite: &'a Suite,
}

impl<'a> Validator<'a> {
    pub fn new(suite: &'a Suite) -> Self {
        Self { suite }
    }

    pub fn validate(&self) -> Result<Vec<TestCase>, ValidationError> {
        self.suite
            .tests
            .iter()
            .enumerate()
            .map(|(idx, test)| self.create_test(idx, test))
            .collect()
    }

    fn create_test(&self, idx: usize, test: &parser::Test) -> Result<TestCase, ValidationError> {
        let name = if test.name.is_empty() {
            format!("#{:02}", idx + 1)
        } else {
            test.name.clone()
        };

        let request = self.create_request(
            &name,
            RawRequest {
                url: &test.url,
                method: test.method.as_deref(),
                body: test.data.content(),
                follow_redirects: test.follow_redirects,
                basic_auth: &test.basic_auth,
                headers: &test.headers,
                header_whitelist: &[],
            },
        )?;

        let expect = &test.expect;

        self.check_headers(&format!("{name}.expect.headers"), &expect.headers)?;

        let from_request = expect
            .from_request
            .as_ref()
            .map(|from| {
                self.create_request(
                    &format!("{name}.expect.fromRequest"),
                    RawRequest {
                        url: &from.url,
                        method: from.method.as_deref(),
                        body: from.data.content(),
                        follow_redirects: from.follow_redirects,
                        basic_auth: &from.basic_auth,
                        headers: &from.headers,
                        header_whitelist: &from.header_whitelist,
                    },
                )
                .map(Box::new)
            })
            .transpose()?;

        let expectation = ExpectationSpec {
            status: expect.status.filter(|status| *status != 0),
            body: BodyExpectation {
                content: non_empty(&expect.body.content),
                regex: non_empty(&expect.body.regex),
                empty: expect.body.empty,
                json_schema: non_empty(&expect.body.json_schema),
            },
            headers: expect.headers.clone(),
            from_request,
        };

        Ok(TestCase {
            name,
            request,
            expectation,
        })
    }

    fn create_request(&self, field: &str, raw: RawRequest<'_>) -> Result<RequestSpec, ValidationError> {
        if raw.url.trim().is_empty() {
            return Err(validation_err!(format!("{field}.url"), URL_REQUIRED, self, ""));
        }

        let method = raw
            .method
            .filter(|method| !method.is_empty())
            .map(|method| {
                parse_method(&method.to_uppercase()).map_err(|e| {
                    validation_err!(format!("{field}.method"), e, self, method)
                })
            })
            .transpose()?;

        self.check_headers(&format!("{field}.headers"), raw.headers)?;

        for name in raw.header_whitelist {
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                validation_err!(
                    format!("{field}.headerWhitelist"),
                    format!("Invalid header name `{name}`: {e}"),
                    self,
                    name
                )
            })?;
        }

        let basic_auth = match raw.basic_auth {
            [username, password] => Some(BasicAuth {
                username: username.clone(),
                password: password.clone(),
            }),
            [] => None,
            other => {
                debug!(
                    field,
                    values = other.len(),
                    "basicAuth needs exactly two values, ignoring it"
                );
                None
            }
        };

        Ok(RequestSpec {
            url: raw.url.to_string(),
            method,
            body: non_empty(raw.body),
            follow_redirects: raw.follow_redirects,
            basic_auth,
            headers: raw.headers.clone(),
            header_whitelist: raw.header_whitelist.to_vec(),
        })
    }

    fn check_headers(&self, field: &str, headers: &HeaderList) -> Result<(), ValidationError> {
        for (name, value) in headers.iter() {
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                validation_err!(
                    field,
                    format!("Invalid header name `{name}`: {e}"),
                    self,
                    name
                )
            })?;

            HeaderValue::from_str(value).map_err(|e| {
                validation_err!(
                    field,
                    format!("Invalid header value for `{name}`: {e}"),
                    self,
                    value
                )
            })?;
        }

        Ok(())
    }
}

struct RawRequest<'a> {
    url: &'a str,
    method: Option<&'a str>,
    body: &'a str,
    follow_redirects: bool,
    basic_auth: &'a [String],
    headers: &'a HeaderList,
    header_whitelist: &'a [String],
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Any valid method token, extension methods such as `PURGE` included.
fn parse_method(method: &str) -> Result<reqwest::Method, String> {
    Method::from_bytes(method.as_bytes())
        .map_err(|e| format!("Invalid HTTP method `{method}`: {e}"))
}

fn find_span(needle: &str, src: &str) -> Option<SourceSpan> {
    if needle.is_empty() {
        return None;
    }

    src.find(needle)
        .map(|start| SourceSpan::new(start.into(), needle.len()))
}
