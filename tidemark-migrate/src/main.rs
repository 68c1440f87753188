use clap::Parser;
use std::process;
use tidemark_migrate::cli::Cli;

fn main() {
    // A missing .env file is fine
    let _ = dotenv::dotenv();

    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level()))
        .init();

    match tidemark_migrate::run(&cli) {
        Ok(()) => {
            if !cli.quiet {
                println!("✅ Success");
            }
            process::exit(0);
        }
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            process::exit(1);
        }
    }
}
