//! Command-line interface definitions using clap

use clap::{Parser, Subcommand};

/// shortgate - short link access gateway
#[derive(Parser, Debug)]
#[command(name = "shortgate")]
#[command(version)]
#[command(about = "Short link access gateway with risk scoring and visit limits", long_about = None)]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(long, short = 'c', global = true, default_value = "config.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the HTTP gateway (default)
    Serve,

    /// Print a sample config.toml with every default filled in
    GenerateConfig {
        /// Write to this file instead of stdout
        output: Option<String>,
    },

    /// Hash a password with argon2 for use in a link record's passwordHash
    HashPassword {
        password: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_serve() {
        let cli = Cli::parse_from(["shortgate"]);
        assert_eq!(cli.config, "config.toml");
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_subcommands() {
        let cli = Cli::parse_from(["shortgate", "-c", "gate.toml", "generate-config", "out.toml"]);
        assert_eq!(cli.config, "gate.toml");
        assert_eq!(
            cli.command,
            Some(Commands::GenerateConfig {
                output: Some("out.toml".to_string())
            })
        );

        let cli = Cli::parse_from(["shortgate", "hash-password", "s3cret"]);
        assert_eq!(
            cli.command,
            Some(Commands::HashPassword {
                password: "s3cret".to_string()
            })
        );
    }
}
