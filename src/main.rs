//! Binary entry point for the `kanzi` command-line tool.

mod cli;

use clap::Parser;

fn main() {
    let args = cli::args::Args::parse();
    if let Err(e) = cli::run(args) {
        eprintln!("kanzi: {}", e);
        std::process::exit(e.kind.code());
    }
}
