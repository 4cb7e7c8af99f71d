use mailpost::config::Settings;
use mailpost::pipeline::IngestionPipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("Failed to install rustls crypto provider");
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let settings = Settings::load()?;

    eprintln!("mailpost v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Mailbox: {} {}@{}:{}{}",
        settings.mailbox.protocol,
        settings.mailbox.username,
        settings.mailbox.host,
        settings.mailbox.port,
        if settings.mailbox.uses_tls() { " (TLS)" } else { "" }
    );
    eprintln!("   Database: {}", settings.db_path.display());

    let pipeline = IngestionPipeline::from_settings(&settings).await?;
    let report = pipeline.run().await;

    println!("{}", report.summary());
    for article in report.articles() {
        println!("   {}", article.url(&settings.site.domain));
    }
    if let Some(e) = &report.delete_error {
        eprintln!("Warning: ingested messages were not deleted: {e}");
    }

    if let Some(e) = report.error {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
    Ok(())
}
