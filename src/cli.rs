//! Minimal CLI parsing for one-off operator commands.
//!
//! With no arguments the binary runs the scheduler until interrupted.

use std::env;

use uuid::Uuid;

/// What the binary should do
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Command {
    /// Run every job on its schedule until Ctrl+C
    #[default]
    Serve,
    /// Run one job (or `all`) immediately and exit
    RunOnce(String),
    /// Delete one recording and exit
    Delete { id: Uuid, hard: bool },
}

#[derive(Debug, Default)]
pub struct CliOptions {
    pub command: Command,
}

impl CliOptions {
    pub fn from_args() -> Self {
        Self::parse(env::args().skip(1))
    }

    pub fn parse(args: impl IntoIterator<Item = String>) -> Self {
        let mut options = CliOptions::default();
        let mut hard = false;
        let mut delete_id = None;
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--run-once" => {
                    if let Some(value) = args.next() {
                        options.command = Command::RunOnce(value);
                    }
                }
                _ if arg.starts_with("--run-once=") => {
                    if let Some(value) = arg.split_once('=').map(|(_, v)| v) {
                        options.command = Command::RunOnce(value.to_string());
                    }
                }
                "--delete" => delete_id = args.next().and_then(|v| Uuid::parse_str(&v).ok()),
                "--hard" => hard = true,
                _ => {}
            }
        }

        if let Some(id) = delete_id {
            options.command = Command::Delete { id, hard };
        }
        options
    }
}
