use clap::Parser;
use marketwatch::cli::{logs, run, status, Cli, Commands};
use marketwatch::error::Result;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Err(e) = dispatch(&cli).await {
        eprintln!("marketwatch: {e}");
        std::process::exit(1);
    }
}

async fn dispatch(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Collect(args) => run::execute(&cli.config, cli.log_level.as_deref(), args).await,
        Commands::Status => {
            status::execute();
            Ok(())
        }
        Commands::Logs(args) => {
            logs::execute(args);
            Ok(())
        }
    }
}
