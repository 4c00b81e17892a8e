use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

mod commands;

/// herald - real-time event broadcaster
#[derive(Parser)]
#[command(name = "herald")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the broadcaster (publish and stream listeners)
    Serve {
        /// Configuration file, searched for when omitted
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
    /// Print events from a stream endpoint until interrupted
    Listen {
        /// Stream endpoint URL
        #[arg(long, default_value = "http://localhost:8081/event")]
        url: String,
    },
    /// Publish one event
    Push {
        /// Message text
        #[arg(value_name = "MESSAGE")]
        message: String,

        /// Deliver only to this consumer ID (broadcast when omitted)
        #[arg(short, long, value_name = "ID")]
        consumer: Option<u64>,

        /// Publish endpoint URL
        #[arg(long, default_value = "http://localhost:8080/push")]
        url: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { config } => commands::serve::execute(config).await,
        Commands::Listen { url } => commands::listen::execute(url).await,
        Commands::Push {
            message,
            consumer,
            url,
        } => commands::push::execute(message, consumer, url).await,
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);

            if let Some(source) = e.source() {
                eprintln!("\n{} {}", "Caused by:".yellow(), source);
            }

            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_arguments() {
        let cli = Cli::try_parse_from(["herald", "push", "hello", "--consumer", "42"]).unwrap();
        match cli.command {
            Commands::Push {
                message,
                consumer,
                url,
            } => {
                assert_eq!(message, "hello");
                assert_eq!(consumer, Some(42));
                assert_eq!(url, "http://localhost:8080/push");
            }
            _ => panic!("expected push"),
        }
    }

    #[test]
    fn test_push_rejects_non_numeric_consumer() {
        assert!(Cli::try_parse_from(["herald", "push", "hello", "--consumer", "abc"]).is_err());
    }
}
