use anyhow::Result;
use env_logger::Env;
use pgrole::cli::{self, Command};
use pgrole::config::Config;
use pgrole::{apply, gen, inspect, validate};
use std::path::PathBuf;

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    match cli::parse().cmd {
        Command::GenPass {
            length,
            username,
            password,
        } => {
            gen::gen_password(length, username.as_deref(), password.as_deref());
        }

        Command::Apply {
            file,
            check,
            conn,
            all,
        } => {
            if all {
                apply::apply_all(&file, check, conn.as_deref())?;
            } else {
                apply::apply(&file, check, conn.as_deref())?;
            }
        }

        Command::Validate { file } => {
            let target = file.unwrap_or_else(|| PathBuf::from("."));
            validate::validate_target(&target)?;
        }

        Command::Inspect { file } => {
            let config = Config::new(&file)?;
            inspect::inspect(&config)?;
        }
    }

    Ok(())
}
