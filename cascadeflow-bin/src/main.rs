use clap::Parser;
use cascadeflow_cli::Cli;

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Usage errors exit 1; --help and --version exit clean.
            let clean = matches!(
                e.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            );
            let _ = e.print();
            std::process::exit(if clean { 0 } else { 1 });
        }
    };

    if let Err(e) = cli.run().await {
        eprintln!("Error: {e}");
        std::process::exit(2);
    }
}
