use chat_probe::{Config, Error, Runner, CHAT_API_KEY};
use tracing_subscriber::{fmt, EnvFilter};

/// Logs go to stderr so stdout carries only the report.
fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into());
    let subscriber = fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> Result<(), Error> {
    init_tracing();

    let config = Config::from_environment()?;
    if config.uses_placeholder_key() {
        tracing::warn!("{} is not set, sending the placeholder key", CHAT_API_KEY);
    }

    let runner = Runner::new(config)?;

    // A failed request is reported on stdout and still exits with 0.
    let mut stdout = std::io::stdout().lock();
    runner.run(&mut stdout)
}
