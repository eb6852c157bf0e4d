//! `chat` - local chat generation from the command line.
//!
//! Commands:
//! - `chat --fixture FILE generate <INPUT>`: continue raw input text
//! - `chat --fixture FILE chat <MESSAGE> [--stream]`: reply to a user message
//!
//! Exit codes:
//! - 0: Success (including a generation cut short by `--timeout-secs`)
//! - 1: Error

use std::io;

use chat_common::error::CategorizedError;
use chat_core::GenerationError;
use clap::Parser;

use chat_cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    chat_common::init_tracing(cli.debug);

    let mut stdout = io::stdout().lock();
    let exit_code = match chat_cli::run(cli, &mut stdout).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("{:#}", e);
            match e.downcast_ref::<GenerationError>() {
                Some(generation_error) => {
                    eprintln!("Error: {}", generation_error.user_friendly_message())
                }
                None => eprintln!("Error: {:#}", e),
            }
            1
        }
    };
    std::process::exit(exit_code);
}
