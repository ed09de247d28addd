use std::fmt;
use std::io::Read;
use std::path::PathBuf;

use miette::Diagnostic;
use miette::NamedSource;
use miette::SourceSpan;
use serde::Deserialize;
use thiserror::Error;

use crate::headers::HeaderList;
use crate::template;
use crate::template::TemplateError;

/// One test record as written in a test file, before validation.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Test {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    pub method: Option<String>,
    #[serde(default, alias = "body")]
    pub data: RequestData,
    #[serde(default)]
    pub follow_redirects: bool,
    #[serde(default)]
    pub basic_auth: Vec<String>,
    #[serde(default)]
    pub headers: HeaderList,
    #[serde(default)]
    pub expect: Expect,
}

/// Request payload, either `data: { content: ... }` or a bare string.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(untagged)]
pub enum RequestData {
    #[default]
    Empty,
    Text(String),
    Content {
        #[serde(default)]
        content: String,
    },
}

impl RequestData {
    pub fn content(&self) -> &str {
        match self {
            RequestData::Empty => "",
            RequestData::Text(content) | RequestData::Content { content } => content,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Expect {
    pub status: Option<u16>,
    #[serde(default)]
    pub body: Body,
    #[serde(default)]
    pub headers: HeaderList,
    pub from_request: Option<FromRequest>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub regex: String,
    #[serde(default)]
    pub empty: bool,
    #[serde(default)]
    pub json_schema: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct FromRequest {
    #[serde(default)]
    pub url: String,
    pub method: Option<String>,
    #[serde(default, alias = "body")]
    pub data: RequestData,
    #[serde(default)]
    pub follow_redirects: bool,
    #[serde(default)]
    pub basic_auth: Vec<String>,
    #[serde(default)]
    pub headers: HeaderList,
    #[serde(default)]
    pub header_whitelist: Vec<String>,
}

/// Where a test file comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Stdin,
    File(PathBuf),
}

impl Source {
    /// `-` means standard input.
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            Source::Stdin
        } else {
            Source::File(PathBuf::from(arg))
        }
    }

    pub fn read(&self) -> std::io::Result<String> {
        match self {
            Source::Stdin => {
                let mut contents = String::new();
                std::io::stdin().read_to_string(&mut contents)?;
                Ok(contents)
            }
            Source::File(path) => std::fs::read_to_string(path),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Stdin => write!(f, "<stdin>"),
            Source::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum LoadError {
    #[error("failed to read {name}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Template(#[from] TemplateError),

    #[error("failed to parse test data in {name}: {message}")]
    Yaml {
        name: String,
        message: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("here")]
        span: Option<SourceSpan>,
    },
}

/// A source after templating and parsing. `rendered` is kept so later
/// diagnostics can point into it.
#[derive(Debug, Clone)]
pub struct Suite {
    pub name: String,
    pub rendered: String,
    pub tests: Vec<Test>,
}

pub fn load(source: &Source) -> Result<Suite, LoadError> {
    let name = source.to_string();

    let raw = source.read().map_err(|source| LoadError::Read {
        name: name.clone(),
        source,
    })?;

    let rendered = template::render(&name, &raw)?;
    let tests = parse_tests(&name, &rendered)?;

    Ok(Suite {
        name,
        rendered,
        tests,
    })
}

pub fn parse_tests(name: &str, rendered: &str) -> Result<Vec<Test>, LoadError> {
    if rendered.trim().is_empty() {
        return Ok(vec![]);
    }

    serde_yaml::from_str::<Option<Vec<Test>>>(rendered)
        .map(Option::unwrap_or_default)
        .map_err(|e| LoadError::Yaml {
            name: name.to_string(),
            message: e.to_string(),
            src: NamedSource::new(name, rendered.to_string()),
            span: e
                .location()
                .map(|location| SourceSpan::new(location.index().into(), 1)),
        })
}
