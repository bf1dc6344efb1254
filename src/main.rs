use anyhow::Result;
use clap::Parser;

use facesearch::cli::SubCommandExtend;
use facesearch::config::{Opts, SubCommand};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let opts = Opts::parse();
    match &opts.subcmd {
        SubCommand::Add(cmd) => cmd.run(&opts).await,
        SubCommand::Search(cmd) => cmd.run(&opts).await,
        SubCommand::Rename(cmd) => cmd.run(&opts).await,
        SubCommand::Delete(cmd) => cmd.run(&opts).await,
        SubCommand::Cleanup(cmd) => cmd.run(&opts).await,
        SubCommand::Clear(cmd) => cmd.run(&opts).await,
        SubCommand::Stats(cmd) => cmd.run(&opts).await,
        SubCommand::Server(cmd) => cmd.run(&opts).await,
    }
}
