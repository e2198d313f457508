use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use csv2api::core::cache::ResponseCache;
use csv2api::core::gateway::ExtractionGateway;
use csv2api::core::normalize::RowNormalizer;
use csv2api::core::ollama::OllamaClient;
use csv2api::utils::{logger, validation::Validate};
use csv2api::{AliasConfig, CliConfig, CsvApiPipeline, LocalStorage, PipelineEngine};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CliConfig::parse();

    if config.log_json {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(config.verbose);
    }

    tracing::info!("Starting csv2api");
    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        eprintln!("❌ {}", e);
        std::process::exit(2);
    }

    let aliases = match &config.config {
        Some(path) => match AliasConfig::from_path(path) {
            Ok(aliases) => aliases,
            Err(e) => {
                tracing::error!("❌ Failed to load alias config: {}", e);
                eprintln!("❌ {}", e);
                std::process::exit(2);
            }
        },
        None => AliasConfig::default(),
    };
    let normalizer = RowNormalizer::new(aliases.build_extractor());

    let client = OllamaClient::new(
        &config.ollama_url,
        &config.model,
        Duration::from_secs(config.timeout_seconds),
    )?;
    let gateway = ExtractionGateway::new(
        client,
        config.gateway_config(),
        Arc::new(ResponseCache::default()),
    );

    let storage = LocalStorage::new(config.output_path.clone());
    let pipeline = CsvApiPipeline::new(storage, config, normalizer, gateway);
    let engine = PipelineEngine::new(pipeline);

    match engine.run().await {
        Ok(output_path) => {
            tracing::info!("✅ csv2api run completed");
            println!("✅ Run completed successfully!");
            println!("📁 Report saved to: {}", output_path);
        }
        Err(e) => {
            tracing::error!("❌ csv2api run failed: {}", e);
            eprintln!("❌ {}", e);
            std::process::exit(if e.is_fatal() { 2 } else { 1 });
        }
    }

    Ok(())
}
