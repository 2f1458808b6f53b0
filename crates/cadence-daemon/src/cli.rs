use clap::{Parser, Subcommand};

/// Cadence - recurring job scheduler
#[derive(Parser, Debug)]
#[command(name = "cadence", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the jobs declared in the config file until Ctrl-C
    Run {
        /// Config file (or set CADENCE_CONFIG env var)
        #[arg(long, env = "CADENCE_CONFIG")]
        config: Option<String>,
    },

    /// Print the upcoming occurrences of a cron expression
    Next {
        /// Expression with 5, 6 or 7 fields, or a macro such as @daily
        expression: String,

        /// Number of occurrences to print
        #[arg(long, short = 'n', default_value_t = 5)]
        count: usize,

        /// Reference instant (RFC 3339); defaults to now
        #[arg(long)]
        from: Option<String>,
    },

    /// Validate the config file and print each trigger's next run
    Check {
        #[arg(long, env = "CADENCE_CONFIG")]
        config: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_next_with_options() {
        let cli = Cli::parse_from(["cadence", "next", "*/5 * * * *", "-n", "3"]);
        match cli.command {
            Command::Next { expression, count, from } => {
                assert_eq!(expression, "*/5 * * * *");
                assert_eq!(count, 3);
                assert!(from.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_run_with_config() {
        let cli = Cli::parse_from(["cadence", "run", "--config", "/etc/cadence.toml"]);
        match cli.command {
            Command::Run { config } => assert_eq!(config.as_deref(), Some("/etc/cadence.toml")),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
