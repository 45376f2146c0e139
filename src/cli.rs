//! Command-line interface for brokerfuzz.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Scripted, semi-random client sessions against a message broker.
#[derive(Debug, Parser)]
#[command(name = "brokerfuzz", version, about)]
pub struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run fuzz sessions against a target until interrupted.
    Run {
        /// Host name of the server under test.
        host: String,

        /// Port number of the server under test.
        port: u16,

        /// How many messages in ten are fuzzed (0 = none, 10 = all).
        #[arg(long, default_value = "3", value_parser = clap::value_parser!(u8).range(0..=10))]
        ratio: u8,

        /// Milliseconds to wait between messages.
        #[arg(long, default_value = "50")]
        delay: u64,

        /// Directory holding one subdirectory of valid cases per category.
        #[arg(long, env = "BROKERFUZZ_VALIDCASES", default_value = "valid-cases/")]
        validcases: PathBuf,

        /// Mutation tool executable (radamsa-compatible).
        #[arg(long, env = "BROKERFUZZ_FUZZER", default_value = "radamsa")]
        fuzzer: PathBuf,

        /// Extra argument passed to the mutation tool before the standard ones
        /// (can be repeated).
        #[arg(long = "fuzzer-arg", value_name = "ARG", allow_hyphen_values = true)]
        fuzzer_args: Vec<String>,

        /// Never fuzz the categories that open a session (`connect` for the
        /// built-in MQTT sessions); they are sent valid wherever they appear
        /// in any script.
        #[arg(long, alias = "valid-first")]
        valid_connect: bool,

        /// Fuzz cases generated per mutation tool run.
        #[arg(long, default_value = "500")]
        batch_size: usize,

        /// JSON file with the session scripts (array of arrays of categories).
        /// Defaults to the built-in MQTT sessions.
        #[arg(long)]
        scripts: Option<PathBuf>,

        /// Seed for the fuzz/valid decisions (random if omitted).
        #[arg(long)]
        seed: Option<u64>,

        /// Stop after this many sessions.
        #[arg(long)]
        sessions: Option<u64>,
    },

    /// Replay recorded payloads over a single connection.
    Replay {
        /// Host name of the server under test.
        host: String,

        /// Port number of the server under test.
        port: u16,

        /// Base64 payloads, in order.
        payloads: Vec<String>,

        /// File with one base64 payload per line (appended after PAYLOADS).
        #[arg(long, short)]
        file: Option<PathBuf>,

        /// Milliseconds to wait between messages.
        #[arg(long, default_value = "50")]
        delay: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["brokerfuzz", "run", "localhost", "1883"]).expect("parse");
        match cli.command {
            Command::Run {
                host,
                port,
                ratio,
                delay,
                fuzzer,
                valid_connect,
                batch_size,
                ..
            } => {
                assert_eq!(host, "localhost");
                assert_eq!(port, 1883);
                assert_eq!(ratio, 3);
                assert_eq!(delay, 50);
                assert!(!valid_connect);
                assert_eq!(batch_size, 500);
                // env may override in CI; only check when unset
                if std::env::var_os("BROKERFUZZ_FUZZER").is_none() {
                    assert_eq!(fuzzer, PathBuf::from("radamsa"));
                }
            }
            Command::Replay { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn test_ratio_out_of_range_is_rejected() {
        let result = Cli::try_parse_from(["brokerfuzz", "run", "localhost", "1883", "--ratio", "11"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_fuzzer_args_accept_hyphens() {
        let cli = Cli::try_parse_from([
            "brokerfuzz",
            "run",
            "localhost",
            "1883",
            "--fuzzer-arg",
            "--seed",
            "--fuzzer-arg",
            "7",
        ])
        .expect("parse");
        match cli.command {
            Command::Run { fuzzer_args, .. } => assert_eq!(fuzzer_args, vec!["--seed", "7"]),
            Command::Replay { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn test_replay_payloads() {
        let cli = Cli::try_parse_from(["brokerfuzz", "replay", "localhost", "1883", "4AA=", "-v"])
            .expect("parse");
        assert!(cli.verbose);
        match cli.command {
            Command::Replay { payloads, file, .. } => {
                assert_eq!(payloads, vec!["4AA="]);
                assert!(file.is_none());
            }
            Command::Run { .. } => panic!("expected replay"),
        }
    }
}
