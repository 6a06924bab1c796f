use anyhow::Result;
use clap::Parser;
use std::fs::{self, OpenOptions};
use trellis::util;

mod cli;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    util::init_data_dir(args.data_dir.clone());

    // Initialize logging to file (~/.trellis/logs/trellis.log)
    fs::create_dir_all(util::logs_dir())?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(util::log_file_path())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(log_file)
        .with_ansi(false) // Disable ANSI colors in log file
        .init();

    cli::run(args)
}
