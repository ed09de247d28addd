//! Tracing setup. Logs go to stderr so stdout only carries the test report.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// `RUST_LOG` wins when set, otherwise `verbose` picks the crate's level.
pub fn init(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

fn default_directives(verbose: u8) -> &'static str {
    match verbose {
        0 => "blackbox=info,warn",
        1 => "blackbox=debug,warn",
        _ => "blackbox=trace,info",
    }
}

#[cfg(test)]
mod test {
    use crate::logging::default_directives;

    #[test]
    fn verbosity_raises_crate_level() {
        assert_eq!(default_directives(0), "blackbox=info,warn");
        assert_eq!(default_directives(1), "blackbox=debug,warn");
        assert_eq!(default_directives(5), "blackbox=trace,info");
    }
}
