mod args;
mod stats;

use clap::Parser;
use log::{debug, info};

fn main() {
    let args = args::Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
    debug!("main: args: {:?}", args);

    let res = stats::run_pass(
        args.config.clone(),
        args.store.clone(),
        args.out.clone(),
        args.reference.clone(),
        args.policy.clone(),
        args.baseline.clone(),
    );

    match res {
        Ok(()) => info!("main: done"),
        Err(e) => {
            stats::print_error(&e);
            std::process::exit(1);
        }
    }
}
