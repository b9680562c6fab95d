use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod errors;
mod gateway;
mod generative;
mod scrape;
mod strategies;
#[cfg(test)]
mod tests;
mod web;

use config::Config;
use gateway::{Gateway, RetrievalRequest};

const DEFAULT_LOG_FILTER: &str = "artifact_gateway=info,tower_http=info";

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config = Config::load(args.config.as_deref())?;
    let config = Arc::new(config);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(args.command, config))
}

async fn run(command: cli::Command, config: Arc<Config>) -> anyhow::Result<()> {
    let gateway = Gateway::new(config.clone())?;

    match command {
        cli::Command::Serve { listen } => {
            let listen = listen.unwrap_or_else(|| config.listen.clone());
            web::serve(gateway, &listen).await
        }

        cli::Command::Fetch {
            url,
            strategy,
            output,
            link_only,
        } => {
            let request = RetrievalRequest::new(url, strategy);

            if link_only {
                let link = gateway.extract_link(&request).await?;
                println!("{link}");
                return Ok(());
            }

            let result = gateway.retrieve(&request).await?;

            match output {
                None => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                Some(path) => {
                    let bytes = result.decode()?;
                    std::fs::write(&path, &bytes)
                        .with_context(|| format!("failed to write {}", path.display()))?;

                    println!(
                        "{}",
                        serde_json::to_string_pretty(&serde_json::json!({
                            "source_url": result.source_url,
                            "mime_type": result.mime_type,
                            "size_bytes": result.size_bytes,
                            "output": path,
                        }))?
                    );
                }
            }

            Ok(())
        }
    }
}
