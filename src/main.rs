mod cli;
mod commands;
mod mft;
mod models;
mod output;

use clap::Parser;
use cli::Cli;

fn main() {
    let cli = Cli::parse();
    std::process::exit(commands::walk::run(&cli));
}
