//! awsbox: local AWS emulator
//!
//! Serves Kinesis, KMS, and S3 emulations on one address over HTTP/1.1
//! and HTTP/2 cleartext. No TLS, no signature verification: this is a
//! development and testing tool.

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use awsbox::{create_router, AppState, ServiceConfig};
use awsbox_core::ArnGenerator;

#[derive(Parser, Debug)]
#[command(name = "awsbox")]
#[command(about = "Local AWS emulator: Kinesis, KMS, and S3 in one process", long_about = None)]
struct Args {
    /// Address to run on
    #[arg(long, default_value = "localhost:4569", env = "AWSBOX_ADDR")]
    addr: String,

    /// Enable Kinesis service
    #[arg(long, default_value = "true", env = "AWSBOX_KINESIS")]
    enable_kinesis: bool,

    /// Streams to create at startup. Example: stream1,stream2,stream3
    #[arg(long, default_value = "", env = "AWSBOX_KINESIS_INITIAL_STREAMS")]
    kinesis_initial_streams: String,

    /// How many shards to create for each stream listed in
    /// --kinesis-initial-streams
    #[arg(long, default_value = "2", env = "AWSBOX_KINESIS_INITIAL_SHARDS")]
    kinesis_initial_shards_per_stream: u64,

    /// How long to retain records. Can be used to control memory usage;
    /// after creation, retention can be adjusted with
    /// [Increase/Decrease]StreamRetentionPeriod
    #[arg(long, default_value = "24h", value_parser = humantime::parse_duration,
          env = "AWSBOX_KINESIS_DEFAULT_DURATION")]
    kinesis_default_duration: std::time::Duration,

    /// Enable KMS service
    #[arg(long, default_value = "true", env = "AWSBOX_KMS")]
    enable_kms: bool,

    /// Enable S3 service
    #[arg(long, default_value = "true", env = "AWSBOX_S3")]
    enable_s3: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "AWSBOX_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("awsbox={},tower_http=debug", args.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let retention = chrono::Duration::from_std(args.kinesis_default_duration)?;
    let state = AppState::new(
        ArnGenerator::default(),
        ServiceConfig {
            enable_kinesis: args.enable_kinesis,
            kinesis_default_retention: retention,
            enable_kms: args.enable_kms,
            enable_s3: args.enable_s3,
        },
    );

    if let Some(kinesis) = &state.kinesis {
        for name in args
            .kinesis_initial_streams
            .split(',')
            .filter(|name| !name.is_empty())
        {
            kinesis
                .storage
                .create_stream(name, args.kinesis_initial_shards_per_stream)?;
            info!(stream = %name, "Created initial Kinesis stream");
        }
        info!("Enabled Kinesis");
    }
    if state.kms.is_some() {
        info!("Enabled KMS");
    }
    if state.s3.is_some() {
        info!("Enabled S3");
    }

    let app = create_router(state);

    // hyper's automatic protocol detection serves both HTTP/1.1 and
    // HTTP/2 cleartext on the plain listener.
    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    info!("Listening on http://{}", args.addr);
    axum::serve(listener, app).await?;

    Ok(())
}
