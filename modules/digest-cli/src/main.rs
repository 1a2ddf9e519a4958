use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use digest_cli::output::{read_posts, write_output};
use digest_cli::Cli;
use digest_cluster::{build_output, run_settings, ClusteringPipeline};
use digest_common::{load_config, EmbeddingEnv, PipelineConfig};
use digest_embed::{EmbeddingClient, RemoteEmbedder};

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    info!("Timeline digest starting");

    let mut config = match &cli.config {
        Some(path) => {
            info!(config = %path.display(), "Loading config");
            load_config(path)?
        }
        None => PipelineConfig::default(),
    };
    cli.apply_overrides(&mut config);

    let env = EmbeddingEnv::from_env();
    env.log_redacted();
    let client = EmbeddingClient::new(env.api_key.as_deref()).with_base_url(&env.api_url);
    let embedder = Arc::new(RemoteEmbedder::new(client, &config.embedding.model));

    let posts = read_posts(&cli.input)?;

    let settings = run_settings(&config);
    let output_config = config.output.clone();
    let pipeline = ClusteringPipeline::from_config(config, embedder)?;
    let run = pipeline.run(posts).await?;

    let output = build_output(&run, settings, &output_config, Utc::now());
    let manifest_path = write_output(&cli.output, &output)?;

    let quality = &output.manifest.quality;
    info!(
        clusters = output.manifest.cluster_count,
        posts = output.manifest.total_posts,
        noise = output.manifest.noise_posts,
        quality = if quality.quality_pass { "PASS" } else { "FAIL" },
        manifest = %manifest_path.display(),
        "Digest complete"
    );

    Ok(())
}
