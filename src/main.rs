use std::env;
use std::path::Path;
use std::process::ExitCode;

use recycle_ledger::Ledger;
use recycle_ledger::config::{load_config, load_config_from_path};
use recycle_ledger::csv::{read_commands, write_accounts};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: recycle-ledger <commands.csv> [config.toml]");
        return ExitCode::from(2);
    };

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let config = match args.next() {
        Some(config_path) => load_config_from_path(Path::new(&config_path)),
        None => load_config(),
    };
    let ledger = match config.and_then(|config| Ledger::from_config(&config)) {
        Ok(ledger) => ledger,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let commands = match read_commands(path) {
        Ok(commands) => commands,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let (cmd_sender, cmd_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in commands {
            match result {
                Ok(command) => {
                    if cmd_sender.send(command).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    ledger.run(ReceiverStream::new(cmd_receiver)).await;

    let accounts = match ledger.accounts().await {
        Ok(accounts) => accounts,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = write_accounts(&accounts, std::io::stdout().lock()) {
        error!("failed to write accounts: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
