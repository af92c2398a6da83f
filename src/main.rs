use mailcast::config::Config;
use mailcast::ledger::FileLedger;
use mailcast::mailbox::ImapMailbox;
use mailcast::pipeline::Pipeline;
use mailcast::publisher::BskyPublisher;
use mailcast::router::AliasRouter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let log_dir = std::env::var("MAILCAST_LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let file_appender = tracing_appender::rolling::daily(&log_dir, "mailcast.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    eprintln!("📬 mailcast v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Mailbox: {}:{} ({})",
        config.mailbox.server, config.mailbox.port, config.mailbox.username
    );
    eprintln!("   Aliases: {} configured", config.aliases.len());
    eprintln!("   Service: {}", config.bsky_service);
    eprintln!("   Ledger: {}", config.ledger_path.display());
    eprintln!("   Logs: {log_dir}\n");

    let ledger = FileLedger::open(&config.ledger_path).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let mailbox = ImapMailbox::new(config.mailbox.clone());
    let publisher = BskyPublisher::new(config.bsky_service.clone(), config.post_delay_secs);
    let router = AliasRouter::new(config.aliases.clone());

    let mut pipeline =
        Pipeline::new(mailbox, publisher, ledger, router).with_header(config.include_header);

    // Per-message publish failures are recoverable: the ids stay out of the
    // ledger and retry on the next scheduled run, so they never fail the
    // process.
    let report = pipeline.run().await?;
    eprintln!(
        "Done: {} published, {} already seen, {} unrouted, {} failed",
        report.published, report.already_published, report.skipped_no_alias, report.failed
    );
    if report.failed > 0 {
        tracing::warn!(failed = report.failed, "Some messages failed, will retry next run");
    }
    Ok(())
}
