use std::fmt::Write;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use miette::Diagnostic;
use miette::NamedSource;
use miette::SourceSpan;
use minijinja::Environment;
use minijinja::ErrorKind;
use minijinja::UndefinedBehavior;
use minijinja::Value;
use minijinja::context;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TemplateError {
    #[error("failed to parse `{name}` as a template: {message}")]
    Syntax {
        name: String,
        message: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("invalid template syntax")]
        span: Option<SourceSpan>,
    },

    #[error("failed to render template `{name}`: {message}")]
    Render {
        name: String,
        message: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("failed here")]
        span: Option<SourceSpan>,
    },
}

/// Renders a test definition with an empty context.
///
/// Undefined names render as the empty string. Any other failure, at parse or
/// render time, is returned as an error.
pub fn render(name: &str, source: &str) -> Result<String, TemplateError> {
    let env = environment();

    let template = env
        .template_from_named_str(name, source)
        .map_err(|e| TemplateError::Syntax {
            name: name.to_string(),
            message: e.to_string(),
            src: NamedSource::new(name, source.to_string()),
            span: error_span(&e),
        })?;

    template
        .render(context! {})
        .map_err(|e| TemplateError::Render {
            name: name.to_string(),
            message: e.to_string(),
            src: NamedSource::new(name, source.to_string()),
            span: error_span(&e),
        })
}

fn environment<'source>() -> Environment<'source> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Chainable);
    env.set_keep_trailing_newline(true);
    // Rendered output is YAML, never HTML.
    env.set_auto_escape_callback(|_| minijinja::AutoEscape::None);

    env.add_filter("urlencode", urlencode);
    env.add_function("urlencode", urlencode);
    env.add_filter("b64enc", b64enc);
    env.add_function("b64enc", b64enc);
    env.add_filter("b64dec", b64dec);
    env.add_function("b64dec", b64dec);
    env.add_function("env", env_var);
    env.add_function("uuidv4", uuidv4);
    env.add_function("now", now);

    env
}

fn error_span(error: &minijinja::Error) -> Option<SourceSpan> {
    error
        .range()
        .map(|range| SourceSpan::new(range.start.into(), range.end - range.start))
}

/// Query-string escaping: spaces become `+`, everything outside
/// `A-Za-z0-9-_.~` is percent encoded.
fn urlencode(value: Value) -> String {
    let encoded: String =
        url::form_urlencoded::byte_serialize(value.to_string().as_bytes()).collect();

    // form_urlencoded keeps `*` and escapes `~`, query escaping does the opposite.
    encoded.replace('*', "%2A").replace("%7E", "~")
}

fn b64enc(value: Value) -> String {
    BASE64.encode(value.to_string())
}

fn b64dec(value: &str) -> Result<String, minijinja::Error> {
    let bytes = BASE64.decode(value).map_err(|e| {
        minijinja::Error::new(ErrorKind::InvalidOperation, format!("invalid base64: {e}"))
    })?;

    String::from_utf8(bytes).map_err(|e| {
        minijinja::Error::new(
            ErrorKind::InvalidOperation,
            format!("decoded base64 is not utf-8: {e}"),
        )
    })
}

fn env_var(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

fn uuidv4() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn now(format: Option<&str>) -> Result<String, minijinja::Error> {
    let now = chrono::Utc::now();

    let Some(format) = format else {
        return Ok(now.to_rfc3339());
    };

    let mut out = String::new();
    write!(out, "{}", now.format(format)).map_err(|_| {
        minijinja::Error::new(
            ErrorKind::InvalidOperation,
            format!("invalid time format `{format}`"),
        )
    })?;

    Ok(out)
}

#[cfg(test)]
mod test {
    use crate::template::TemplateError;
    use crate::template::render;

    #[test]
    fn plain_text_passes_through() {
        let source = "- name: plain\n  url: http://localhost/\n";
        assert_eq!(render("plain.yaml", source).unwrap(), source);
    }

    #[test]
    fn urlencode_filter_and_function() {
        let out = render(
            "t.yaml",
            "{{ 'a b&c=d' | urlencode }} {{ urlencode('x/y') }}",
        )
        .unwrap();

        assert_eq!(out, "a+b%26c%3Dd x%2Fy");
    }

    #[test]
    fn standard_library_is_available() {
        let out = render(
            "t.yaml",
            "{{ 'abc' | upper }} {{ [1, 2, 3] | join(',') }} {{ 7 // 2 }} {{ ' x ' | trim }}",
        )
        .unwrap();

        assert_eq!(out, "ABC 1,2,3 3 x");
    }

    #[test]
    fn base64_round_trip() {
        let out = render("t.yaml", "{{ 'user:pass' | b64enc }} {{ b64dec('aGk=') }}").unwrap();
        assert_eq!(out, "dXNlcjpwYXNz hi");
    }

    #[test]
    fn env_reads_process_environment() {
        let out = render(
            "t.yaml",
            "{{ 'yes' if env('PATH') else 'no' }}|{{ env('BLACKBOX_SURELY_UNSET_VAR') }}|",
        )
        .unwrap();
        assert_eq!(out, "yes||");
    }

    #[test]
    fn booleans_render_capitalized() {
        let out = render("t.yaml", "{{ 1 == 1 }} {{ 1 == 2 }}").unwrap();
        assert_eq!(out, "True False");
    }

    #[test]
    fn urlencode_matches_query_escaping() {
        let out = render("t.yaml", "{{ 'a~b*c%7E' | urlencode }}").unwrap();
        assert_eq!(out, "a~b%2Ac%257E");
    }

    #[test]
    fn undefined_names_render_empty() {
        let out = render("t.yaml", "a{{ missing }}b{{ missing.key }}c").unwrap();
        assert_eq!(out, "abc");
    }

    #[test]
    fn uuid_and_now_render() {
        let out = render("t.yaml", "{{ uuidv4() }}").unwrap();
        assert_eq!(out.len(), 36);

        let year = render("t.yaml", "{{ now('%Y') }}").unwrap();
        assert_eq!(year.len(), 4);
    }

    #[test]
    fn syntax_error_is_fatal() {
        let err = render("broken.yaml", "url: {{ 'a' ").unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { .. }));
    }

    #[test]
    fn render_error_is_fatal() {
        let err = render("broken.yaml", "{{ b64dec('%%%') }}").unwrap_err();
        assert!(matches!(err, TemplateError::Render { .. }));
    }
}
