//! Command dispatch: bridges CLI args -> coordinator calls -> output formatting.

pub mod config_cmd;
pub mod devices;
pub mod set;
pub mod sites;
pub mod util;
pub mod watch;
pub mod weather;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a cloud-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Sites => sites::handle(global).await,
        Command::Devices(args) => devices::handle(args, global).await,
        Command::Watch(args) => watch::handle(args, global).await,
        Command::Set(args) => set::handle(args, global).await,
        Command::Weather => weather::handle(global).await,
        Command::Config(args) => config_cmd::handle(args, global).await,
        Command::Completions(_) => Err(CliError::Internal(
            "completions are generated before dispatch".into(),
        )),
    }
}
