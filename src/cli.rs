use clap::ArgAction;
use clap::Parser;

/// Runs blackbox HTTP tests described in templated YAML files
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Test files to run, `-` reads stdin. Defaults to `test*.yaml` in the
    /// working directory
    pub files: Vec<String>,

    /// Wait for this url to answer 200 OK before running any test
    #[arg(long, env = "BLACKBOX_WAIT_FOR_URL")]
    pub wait_for_url: Option<String>,

    /// Seconds to wait regardless of --wait-for-url
    #[arg(long, env = "BLACKBOX_WAIT_EXTRA", default_value_t = 0)]
    pub wait_extra: u64,

    /// How many times --wait-for-url is polled, one second apart
    #[arg(long, env = "BLACKBOX_WAIT_ATTEMPTS", default_value_t = crate::setup::DEFAULT_WAIT_ATTEMPTS)]
    pub wait_attempts: u32,

    /// Per-request timeout in seconds
    #[arg(long, env = "BLACKBOX_TIMEOUT")]
    pub timeout: Option<u64>,

    /// More log output, repeat for more
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}
