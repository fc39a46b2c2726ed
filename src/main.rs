mod cli;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let spec = match cli::Cli::parse().into_spec() {
        Ok(spec) => spec,
        Err(err) => {
            eprintln!("dexec: {err:#}");
            std::process::exit(1);
        }
    };

    match dexec::launch(spec) {
        Ok(never) => match never {},
        Err(err) => {
            eprintln!("dexec: {err}");
            std::process::exit(err.exit_code());
        }
    }
}
