//! Command-line interface for dubline
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Real-time speech dubbing service
#[derive(Parser, Debug)]
#[command(name = "dubline", version, about = "Real-time speech dubbing service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a fragment length into milliseconds.
///
/// Bare numbers are milliseconds; anything else goes through `humantime`
/// (`3s`, `500ms`, `1s 500ms`).
fn parse_fragment_ms(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let ms = match s.parse::<u64>() {
        Ok(ms) => ms,
        Err(_) => humantime::parse_duration(s)
            .map_err(|e| e.to_string())?
            .as_millis() as u64,
    };
    if ms == 0 {
        return Err("fragment length must be greater than zero".to_string());
    }
    Ok(ms)
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the dubbing service on a Unix socket
    Serve {
        /// Socket path (default: $XDG_RUNTIME_DIR/dubline.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Stream a WAV file through a running service and print the results
    Send {
        /// 16-bit PCM WAV file to dub
        input: PathBuf,

        /// Socket path of the running service
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,

        /// Fragment length. Examples: 3s, 500ms, 2000
        #[arg(long, short = 'f', value_name = "DURATION", default_value = "3s", value_parser = parse_fragment_ms)]
        fragment: u64,

        /// Source language code (default from config)
        #[arg(long, value_name = "LANG")]
        source: Option<String>,

        /// Target language code (default from config)
        #[arg(long, short = 't', value_name = "LANG")]
        target: Option<String>,

        /// Write the dubbed audio to this WAV file
        #[arg(long, short = 'o', value_name = "WAV")]
        output: Option<PathBuf>,

        /// Stream id (default: derived from the file name)
        #[arg(long, value_name = "ID")]
        stream_id: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from(["dubline", "serve"]).unwrap();
        match cli.command {
            Commands::Serve { socket } => assert!(socket.is_none()),
            other => panic!("expected serve, got {:?}", other),
        }
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_serve_with_socket() {
        let cli = Cli::try_parse_from(["dubline", "serve", "--socket", "/tmp/x.sock"]).unwrap();
        match cli.command {
            Commands::Serve { socket } => {
                assert_eq!(socket, Some(PathBuf::from("/tmp/x.sock")));
            }
            other => panic!("expected serve, got {:?}", other),
        }
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["dubline"]).is_err());
    }

    #[test]
    fn test_parse_send_defaults() {
        let cli = Cli::try_parse_from(["dubline", "send", "talk.wav"]).unwrap();
        match cli.command {
            Commands::Send {
                input,
                socket,
                fragment,
                source,
                target,
                output,
                stream_id,
            } => {
                assert_eq!(input, PathBuf::from("talk.wav"));
                assert!(socket.is_none());
                assert_eq!(fragment, 3000);
                assert!(source.is_none());
                assert!(target.is_none());
                assert!(output.is_none());
                assert!(stream_id.is_none());
            }
            other => panic!("expected send, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_send_with_options() {
        let cli = Cli::try_parse_from([
            "dubline",
            "send",
            "talk.wav",
            "-f",
            "1500ms",
            "-t",
            "fr",
            "-o",
            "out.wav",
        ])
        .unwrap();
        match cli.command {
            Commands::Send {
                fragment,
                target,
                output,
                ..
            } => {
                assert_eq!(fragment, 1500);
                assert_eq!(target.as_deref(), Some("fr"));
                assert_eq!(output, Some(PathBuf::from("out.wav")));
            }
            other => panic!("expected send, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_fragment_ms() {
        assert_eq!(parse_fragment_ms("3s"), Ok(3000));
        assert_eq!(parse_fragment_ms("250"), Ok(250));
        assert_eq!(parse_fragment_ms("1s 500ms"), Ok(1500));
        assert!(parse_fragment_ms("0").is_err());
        assert!(parse_fragment_ms("soon").is_err());
    }

    #[test]
    fn test_parse_verbose_counted() {
        let cli = Cli::try_parse_from(["dubline", "-vv", "serve"]).unwrap();
        assert_eq!(cli.verbose, 2);
        let cli = Cli::try_parse_from(["dubline", "serve", "-v"]).unwrap();
        assert_eq!(cli.verbose, 1);
    }

    #[test]
    fn test_parse_global_config_after_subcommand() {
        let cli =
            Cli::try_parse_from(["dubline", "config", "show", "--config", "/etc/d.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/d.toml")));
        match cli.command {
            Commands::Config { action } => assert_eq!(action, ConfigAction::Show),
            other => panic!("expected config, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_config_init_force() {
        let cli = Cli::try_parse_from(["dubline", "config", "init", "--force"]).unwrap();
        match cli.command {
            Commands::Config { action } => assert_eq!(action, ConfigAction::Init { force: true }),
            other => panic!("expected config, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_completions() {
        let cli = Cli::try_parse_from(["dubline", "completions", "bash"]).unwrap();
        match cli.command {
            Commands::Completions { shell } => assert_eq!(shell, Shell::Bash),
            other => panic!("expected completions, got {:?}", other),
        }
    }
}
