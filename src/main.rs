//! # pullrun
//! A minimal container launcher: pulls the first layer of a Docker Hub image,
//! unpacks it into a fresh root, isolates itself inside it and runs one command.
mod commands;

use clap::{crate_version, Parser};

use pullrun::executor::FAILURE_EXIT_CODE;

#[derive(Parser, Debug)]
#[clap(version = crate_version!(), author = env!("CARGO_PKG_AUTHORS"))]
struct Opts {
    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Parser, Debug)]
enum SubCommand {
    Run(commands::run::Run),
}

/// Parses the command line, runs the pipeline and exits with the command's
/// own status. Usage errors exit 2 through clap, every other failure exits 1.
fn main() {
    let opts = Opts::parse();

    if let Err(e) = pullrun::logger::init_from_env() {
        eprintln!("log init failed: {:?}", e);
    }

    log::debug!(
        "started by user {} with {:?}",
        nix::unistd::geteuid(),
        std::env::args_os()
    );

    let result = match opts.subcmd {
        SubCommand::Run(run) => commands::run::run(run),
    };

    let code = match result {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            log::debug!("{:?}", e);
            eprintln!("pullrun: {:#}", e);
            FAILURE_EXIT_CODE
        }
    };
    log::logger().flush();
    std::process::exit(code);
}
