mod audit;
mod backup;
mod cli;
mod config;
mod database;
mod error;
mod files;
mod ledger;
mod logging;
mod media;
mod migrator;
mod schema;
mod utils;

#[cfg(test)]
mod test_support;

use cli::Cli;
use log::error;

fn main() {
    // Log level comes from config.toml ([logging] mediamerge = ...) or RUST_LOG
    if let Err(err) = Cli::handle_command_line() {
        error!("{:?}", err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
