use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use shortgate::cli::{Cli, Commands};
use shortgate::config::{StaticConfig, get_config, init_config_from};
use shortgate::runtime::{prepare_server_startup, run_server};
use shortgate::system::logging::init_logging;
use shortgate::utils::password::hash_password;

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::GenerateConfig { output } => {
            let sample = StaticConfig::generate_sample_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, sample)
                        .with_context(|| format!("Failed to write {}", path))?;
                    println!("Sample config written to {}", path);
                }
                None => println!("{}", sample),
            }
            Ok(())
        }
        Commands::HashPassword { password } => {
            let hash = hash_password(&password).context("Failed to hash password")?;
            println!("{}", hash);
            Ok(())
        }
        Commands::Serve => {
            init_config_from(&cli.config);
            let config = get_config();

            // guard 必须活到进程结束
            let _log_guard = init_logging(&config.logging)?;
            info!(
                "shortgate v{} starting (store backend: {})",
                env!("CARGO_PKG_VERSION"),
                config.store.backend
            );

            let state = prepare_server_startup(&config).await?;
            run_server(&config, state).await
        }
    }
}
