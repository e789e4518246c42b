//! Command-line surface: same flags, defaults and validation order as
//! `ndncatchunks.cpp`'s Boost.ProgramOptions table, reimplemented with
//! `clap`'s derive API. The teacher's two `src/bin/` binaries take no
//! arguments at all, so this is the one place it offers no pattern to
//! imitate; the wider pack's CLI binaries supply the idiom instead.

use clap::{Parser, ValueEnum};

use crate::discover::DiscoverOptions;
use crate::err::Error;
use crate::pipeline;
use crate::types::Name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DiscoverMode {
    Fixed,
    Iterative,
}

#[derive(Parser, Debug)]
#[command(name = "catchunks", about = "Fetches a segmented object over a UDP-based toy transport")]
pub struct Cli {
    /// Name of the content to fetch.
    pub name: String,

    /// Version discovery strategy; ignored when `-k` is given.
    #[arg(short = 'd', long = "discover", value_enum)]
    pub discover: Option<DiscoverMode>,

    /// Require MustBeFresh on every Interest.
    #[arg(short = 'f')]
    pub must_be_fresh: bool,

    /// Fixed Interest lifetime in ms; 0 derives it from the current RTO.
    #[arg(short = 'l', default_value_t = 0)]
    pub interest_lifetime_ms: u64,

    #[arg(short = 'p', default_value_t = 1)]
    pub start_pipeline_size: u32,

    /// 0 means "equal to the start pipeline size".
    #[arg(short = 'm', default_value_t = 0)]
    pub max_pipeline_size: u32,

    #[arg(short = 'R', default_value_t = 3)]
    pub n_timeout_before_reset: u32,

    /// Reset the RTO multiplier to 1x once `n_timeout_before_reset` is hit
    /// instead of leaving it doubled.
    #[arg(short = 'M')]
    pub rto_multiplier_reset: bool,

    /// -1 for unbounded retries.
    #[arg(short = 'r', allow_hyphen_values = true, default_value_t = -1)]
    pub max_retries_on_timeout_or_nack: i64,

    #[arg(short = 'i', default_value_t = 1)]
    pub max_retries_after_version_found: u32,

    #[arg(short = 'v')]
    pub verbose: bool,

    /// Emit periodic fetch statistics.
    #[arg(short = 'S')]
    pub print_stat: bool,

    /// Jitter upper bound (ms) for deferred fetches.
    #[arg(short = 'w', default_value_t = 0)]
    pub random_wait_max_ms: u64,

    /// Jitter only the first window fill, not subsequent replacement draws.
    #[arg(short = 'W')]
    pub start_wait: bool,

    /// Skip discovery; `name` must already carry a version component.
    #[arg(short = 'k')]
    pub skip_discovery: bool,

    #[arg(short = 'c', default_value_t = 0.75)]
    pub window_cut_multiplier: f64,

    /// 0 disables slow start (always congestion-avoidance growth).
    #[arg(short = 't', default_value_t = 20)]
    pub slow_start_threshold: u32,

    /// Remote face address, `host:port`.
    #[arg(long)]
    pub host: String,

    /// Local bind address for the UDP face.
    #[arg(long, default_value = "0.0.0.0:0")]
    pub bind: String,

    /// `tracing_subscriber::EnvFilter` directive, e.g. `info`, `catchunks=debug`.
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,
}

pub struct ResolvedConfig {
    pub name: Name,
    pub discover_mode: DiscoverMode,
    pub skip_discovery: bool,
    pub pipeline_options: pipeline::Options,
    pub discover_options: DiscoverOptions,
    pub host: String,
    pub bind: String,
    pub log_level: String,
    pub print_stat: bool,
}

impl Cli {
    /// Validates the parsed arguments in the same order as the source's
    /// option table and turns them into resolved fetch options. Every
    /// failure here is a usage error (exit code 2).
    pub fn resolve(self) -> Result<ResolvedConfig, Error> {
        let name = Name::parse(&self.name);

        if self.skip_discovery && !name.has_version() {
            return Err(Error::Usage(
                "fixed discovery (-k) requires a name with a version component".to_string(),
            ));
        }
        if !(1..=65536).contains(&self.start_pipeline_size) {
            return Err(Error::Usage("start pipeline size must be in [1,65536]".to_string()));
        }
        let max_pipeline_size = if self.max_pipeline_size == 0 {
            self.start_pipeline_size
        } else {
            self.max_pipeline_size
        };
        if !(self.start_pipeline_size..=65536).contains(&max_pipeline_size) {
            return Err(Error::Usage(
                "max pipeline size must be in [start pipeline size,65536]".to_string(),
            ));
        }
        if !(-1..=1024).contains(&self.max_retries_on_timeout_or_nack) {
            return Err(Error::Usage(
                "max retries on timeout or nack must be in [-1,1024]".to_string(),
            ));
        }
        if self.max_retries_after_version_found > 1024 {
            return Err(Error::Usage(
                "max retries after version found must be in [0,1024]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.window_cut_multiplier) {
            return Err(Error::Usage("window cut multiplier must be in [0,1]".to_string()));
        }

        let discover_mode = if self.skip_discovery {
            DiscoverMode::Fixed
        } else {
            self.discover.unwrap_or(DiscoverMode::Iterative)
        };

        Ok(ResolvedConfig {
            name,
            discover_mode,
            skip_discovery: self.skip_discovery,
            pipeline_options: pipeline::Options {
                must_be_fresh: self.must_be_fresh,
                interest_lifetime_ms: self.interest_lifetime_ms,
                start_pipeline_size: self.start_pipeline_size as usize,
                max_pipeline_size: max_pipeline_size as usize,
                slow_start_threshold: self.slow_start_threshold as usize,
                n_timeout_before_reset: self.n_timeout_before_reset,
                window_cut_multiplier: self.window_cut_multiplier,
                rto_multiplier_reset: self.rto_multiplier_reset,
                max_retries_on_timeout_or_nack: self.max_retries_on_timeout_or_nack,
                random_wait_max_ms: self.random_wait_max_ms,
                start_wait: self.start_wait,
            },
            discover_options: DiscoverOptions {
                max_retries_on_timeout_or_nack: self.max_retries_on_timeout_or_nack,
                max_retries_after_version_found: self.max_retries_after_version_found,
            },
            host: self.host,
            bind: self.bind,
            log_level: self.log_level,
            print_stat: self.print_stat,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args(extra: &[&str]) -> Vec<String> {
        let mut args = vec!["catchunks".to_string(), "--host".to_string(), "127.0.0.1:6363".to_string()];
        args.extend(extra.iter().map(|s| s.to_string()));
        args
    }

    #[test]
    fn fixed_discovery_requires_version_component() {
        let args = base_args(&["-k", "/a/b"]);
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(cli.resolve(), Err(Error::Usage(_))));
    }

    #[test]
    fn start_pipeline_size_out_of_range_is_usage_error() {
        let args = base_args(&["-p", "0", "/a/v=1"]);
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(cli.resolve(), Err(Error::Usage(_))));
    }

    #[test]
    fn zero_max_pipeline_size_defaults_to_start_size() {
        let args = base_args(&["-p", "4", "/a/v=1"]);
        let cli = Cli::try_parse_from(args).unwrap();
        let resolved = cli.resolve().unwrap();
        assert_eq!(resolved.pipeline_options.max_pipeline_size, 4);
    }

    #[test]
    fn window_cut_multiplier_out_of_range_is_usage_error() {
        let args = base_args(&["-c", "1.5", "/a/v=1"]);
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(cli.resolve(), Err(Error::Usage(_))));
    }
}
