use clap::{ArgAction, Parser};

/// Ship Docker container logs to Logstash.
///
/// All behavior is configured through the environment (LOGSTASH_SERVER,
/// DOCKER_HOST, MOBYSTASH_*); the flags here only tune diagnostics.
#[derive(Debug, Parser)]
#[command(name = "mobystash", version, rename_all = "kebab-case")]
pub struct Opts {
    /// Enable more detailed internal logging. Repeat to increase level.
    /// Overridden by `--quiet`.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Reduce detail of internal logging. Repeat to reduce further.
    #[arg(short, long, action = ArgAction::Count)]
    pub quiet: u8,
}

impl Opts {
    pub const fn log_level(&self) -> &'static str {
        match self.quiet {
            0 => match self.verbose {
                0 => "info",
                1 => "debug",
                2..=u8::MAX => "trace",
            },
            1 => "warn",
            2..=u8::MAX => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(verbose: u8, quiet: u8) -> Opts {
        Opts { verbose, quiet }
    }

    #[test]
    fn quiet_overrides_verbose() {
        assert_eq!(opts(0, 0).log_level(), "info");
        assert_eq!(opts(1, 0).log_level(), "debug");
        assert_eq!(opts(3, 0).log_level(), "trace");
        assert_eq!(opts(2, 1).log_level(), "warn");
        assert_eq!(opts(0, 2).log_level(), "error");
    }
}
