use clap::Parser;
use env_logger::Env;
use picsim::Opts;
use picsim::cli::SubCommandExtend;
use picsim::config::SubCommand;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info,sqlx=warn")).init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Ingest(config) => config.run(&opts).await,
        SubCommand::Search(config) => config.run(&opts).await,
        SubCommand::Stats(config) => config.run(&opts).await,
        SubCommand::Remove(config) => config.run(&opts).await,
        SubCommand::Resolve(config) => config.run(&opts).await,
    }
}
