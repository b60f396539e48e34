//! Command line and the immutable configuration built from it.

use std::ffi::OsString;
use std::time::Duration;

use clap::Parser;

use crate::telemetry::LogFormat;

pub const DEFAULT_ADDR: &str = "ws://echo.websocket.org";

/// Long flags that are also accepted with a single dash (`-addr ws://...`).
const SINGLE_DASH_FLAGS: &[&str] = &[
    "addr",
    "protocols",
    "echoDelay",
    "echo-delay",
    "log-level",
    "log-format",
];

#[derive(Parser, Debug, Clone)]
#[command(name = "ws-echo-client")]
#[command(about = "Connects to a WebSocket server and echoes back every message it receives")]
#[command(version)]
pub struct Cli {
    /// WebSocket service address
    #[arg(long, default_value = DEFAULT_ADDR)]
    pub addr: String,

    /// Comma separated list of sub-protocols to offer
    #[arg(long, default_value = "")]
    pub protocols: String,

    /// Delay in seconds before echoing back a received message
    #[arg(long = "echoDelay", visible_alias = "echo-delay", default_value_t = 0)]
    pub echo_delay: u64,

    /// Default log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl Cli {
    /// Parses process arguments, accepting single-dash long flags.
    pub fn parse_args() -> Self {
        Self::parse_from(normalize_args(std::env::args_os()))
    }
}

/// Rewrites `-flag` and `-flag=value` into `--flag` forms for the known long
/// flags. Everything after `--` is left untouched.
pub fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut out = Vec::new();
    let mut passthrough = false;
    for arg in args {
        if passthrough {
            out.push(arg);
            continue;
        }
        let rewritten = arg.to_str().and_then(|s| {
            if s == "--" {
                return None;
            }
            let name = s.strip_prefix('-').filter(|rest| !rest.starts_with('-'))?;
            let flag = name.split_once('=').map_or(name, |(flag, _)| flag);
            SINGLE_DASH_FLAGS
                .contains(&flag)
                .then(|| OsString::from(format!("-{s}")))
        });
        if arg.to_str() == Some("--") {
            passthrough = true;
        }
        out.push(rewritten.unwrap_or(arg));
    }
    out
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("server address {0:?} is invalid")]
    EmptyAddress(String),
}

/// Fixed at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub addr: String,
    pub protocols: Vec<String>,
    pub echo_delay: Duration,
}

impl TryFrom<&Cli> for Config {
    type Error = ConfigError;

    fn try_from(cli: &Cli) -> Result<Self, Self::Error> {
        let addr = cli.addr.trim();
        if addr.is_empty() {
            return Err(ConfigError::EmptyAddress(cli.addr.clone()));
        }

        let protocols = cli
            .protocols
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_owned)
            .collect();

        Ok(Config {
            addr: addr.to_owned(),
            protocols,
            echo_delay: Duration::from_secs(cli.echo_delay),
        })
    }
}
