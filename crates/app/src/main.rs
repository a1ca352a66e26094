use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use docrelay::server::serve;
use docrelay::{router, Config};
use docrelay_core::{
    provision, DocumentExtractor, IndexHandle, OpenRouterClient, PineconeControl, RagPipeline,
    StagingArea,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let config = Config::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        index = %config.index_name,
        metric = %config.index_metric,
        embedder = ?config.embedder,
        "docrelay boot"
    );

    let timeout = config.request_timeout();
    let control = PineconeControl::new(
        &config.pinecone_control_url,
        &config.pinecone_api_key,
        config.embedding_dimension,
        timeout,
    )?;
    let chat = OpenRouterClient::new(
        &config.completion_url,
        &config.openrouter_api_key,
        &config.completion_model,
        timeout,
    )?;

    let index = IndexHandle::new();
    let pipeline = Arc::new(RagPipeline::new(
        index.clone(),
        Arc::new(DocumentExtractor),
        config.build_embedder()?,
        Arc::new(chat),
        StagingArea::new(&config.staging_dir),
        config.ingestion_options(),
    ));

    let bind_addr = config.bind_addr();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "listening");

    let spec = config.index_spec();
    let policy = config.readiness_policy();
    serve(
        listener,
        router(pipeline, config.max_upload_bytes),
        provision(&control, &spec, &policy, &index),
        shutdown_signal(),
    )
    .await?;

    info!("docrelay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
