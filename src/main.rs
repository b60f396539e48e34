use anyhow::Context;
use ws_echo_client::telemetry::init_logging;
use ws_echo_client::{Cli, Config, EchoClient, WsClient};

#[monoio::main(timer_enabled = true)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    init_logging(&cli.log_level, cli.log_format)?;

    let result = match Config::try_from(&cli) {
        Ok(config) => run(config).await,
        Err(e) => Err(e.into()),
    };
    if let Err(ref e) = result {
        tracing::error!(error = %format!("{e:#}"), "Fatal error");
    }
    result
}

async fn run(config: Config) -> anyhow::Result<()> {
    if !config.protocols.is_empty() {
        tracing::info!(protocols = %config.protocols.join(", "), "Using sub protocols");
    }

    let client = WsClient::connect(&config.addr, &config.protocols)
        .await
        .with_context(|| format!("Unable to dial ws connection to {}", config.addr))?;
    tracing::info!(
        addr = %config.addr,
        host = %client.url().host_header(),
        protocol = client.protocol().unwrap_or(""),
        echo_delay_secs = config.echo_delay.as_secs(),
        "Connection stabilized"
    );

    let (mut reader, writer) = client.split();
    let echo = EchoClient::new(writer.clone(), config.echo_delay);
    let summary = echo.run(&mut reader).await;
    writer.close().await;
    drop(reader);

    tracing::info!(
        received = summary.received,
        echoed = summary.echoed,
        failed = summary.failed,
        reason = %summary.exit,
        "Exiting..."
    );
    Ok(())
}
