use clap::Parser;
use std::path::PathBuf;

/// coolctld: applies fan and lighting profiles to every detected controller
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file path (default: $COOLCTLD_CONFIG, ~/.config/coolctld/config.yml, /etc/coolctld/config.yml)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Detach from the terminal and run in the background
    #[arg(short = 'd', long = "daemonize", default_value = "false")]
    pub daemonize: bool,

    /// Apply this profile at startup instead of the saved state
    #[arg(long = "apply", value_name = "NAME")]
    pub apply: Option<String>,

    /// Discover, apply, and exit without starting the services
    #[arg(long = "once", conflicts_with = "daemonize")]
    pub once: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_all_flags() {
        let cli = Cli::try_parse_from(["coolctld", "-c", "/tmp/c.yml", "--apply", "night", "--once"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.yml")));
        assert_eq!(cli.apply.as_deref(), Some("night"));
        assert!(cli.once);
        assert!(!cli.daemonize);
    }

    #[test]
    fn once_and_daemonize_conflict() {
        assert!(Cli::try_parse_from(["coolctld", "-d", "--once"]).is_err());
    }
}
