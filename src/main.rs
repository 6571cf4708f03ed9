use clap::{Parser, Subcommand};
use kafka_courier::dead_letter::ConfiguredStore;
use kafka_courier::kafka::{BrokerMetadata, RdKafkaClient};
use kafka_courier::retry::RetryResult;
use kafka_courier::{
    retry_failed, Config, Dispatcher, PublishJob, PublishOptions, Publisher, Result,
    RetryOutcome,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "kafka-courier")]
#[command(about = "Kafka producer with a dead-letter store for failed publishes", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check broker connectivity and display cluster metadata
    Status,
    /// Re-publish every message in the dead-letter store
    RetryFailed,
    /// Create the dead-letter table (or file) if missing
    Migrate,
    /// Publish one message, recording it in the dead-letter store on failure
    Produce {
        /// Destination topic; defaults to kafka.default_topic
        #[arg(short, long)]
        topic: Option<String>,

        /// Treat MESSAGE as JSON and publish its canonical encoding
        #[arg(long)]
        json: bool,

        /// Partitioning key
        #[arg(short, long)]
        key: Option<String>,

        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    let config = match load_config(&args.config) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    info!(
        kafka_brokers = %config.kafka.brokers,
        default_topic = %config.kafka.default_topic,
        async_enabled = config.dispatch.enabled,
        async_queue = %config.dispatch.queue,
        dead_letter_backend = ?config.dead_letter.backend,
        "Configuration summary"
    );

    match args.command {
        Command::Status => status(&config).await,
        Command::RetryFailed => retry(&config).await,
        Command::Migrate => migrate(&config).await,
        Command::Produce {
            topic,
            json,
            key,
            message,
        } => produce(&config, topic, json, key, message).await,
    }
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        info!("Loading configuration from {:?}", path);
        Config::from_file(path)
    } else {
        info!("No configuration file at {:?}, using environment", path);
        Config::from_env()
    }
}

async fn status(config: &Config) -> Result<ExitCode> {
    println!("Checking Kafka broker connectivity...");

    let publisher = Publisher::connect(&config.kafka)?;
    if !publisher.is_connected() {
        eprintln!("Kafka producer is not initialized.");
        return Ok(ExitCode::FAILURE);
    }

    let (reachable, metadata) = tokio::task::spawn_blocking(move || {
        if publisher.ping() {
            (true, Some(publisher.metadata()))
        } else {
            (false, None)
        }
    })
    .await?;

    if !reachable {
        eprintln!("Kafka broker is not reachable.");
        return Ok(ExitCode::FAILURE);
    }
    println!("Kafka broker is reachable.");

    if let Some(metadata) = metadata {
        print_metadata(&metadata?);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_metadata(metadata: &BrokerMetadata) {
    println!("Brokers:");
    for broker in &metadata.brokers {
        println!(
            "- ID: {}, Host: {}, Port: {}",
            broker.id, broker.host, broker.port
        );
    }

    println!("\nTopics:");
    for topic in &metadata.topics {
        let status = match &topic.error {
            None => "ok".to_string(),
            Some(error) => format!("error: {}", error),
        };
        println!("- {} ({}, {} partitions)", topic.name, status, topic.partitions);
    }
}

async fn retry(config: &Config) -> Result<ExitCode> {
    let publisher = Publisher::connect(&config.kafka)?;
    let store = ConfiguredStore::open(&config.dead_letter).await?;

    let report = retry_failed(&publisher, &store).await?;
    for result in &report.results {
        match outcome_line(result) {
            Ok(line) => println!("{}", line),
            Err(line) => eprintln!("{}", line),
        }
    }
    println!(
        "{} attempted, {} delivered, {} failed",
        report.attempted(),
        report.delivered(),
        report.failed()
    );

    publisher.close(config.kafka.flush_timeout());
    Ok(ExitCode::SUCCESS)
}

/// The report line for one record. Failures come back as `Err` and are
/// printed to stderr.
fn outcome_line(result: &RetryResult) -> std::result::Result<String, String> {
    match &result.outcome {
        RetryOutcome::Delivered => Ok(format!("Retried and removed message ID {}", result.id)),
        RetryOutcome::Failed { error } => Err(format!(
            "Failed again for message ID {}: {}",
            result.id, error
        )),
        RetryOutcome::DeliveredButNotRemoved { error } => Err(format!(
            "Retried message ID {} but could not remove it: {}",
            result.id, error
        )),
    }
}

async fn migrate(config: &Config) -> Result<ExitCode> {
    let store = ConfiguredStore::open(&config.dead_letter).await?;
    store.migrate().await?;
    println!("Dead-letter store ready.");
    Ok(ExitCode::SUCCESS)
}

async fn produce(
    config: &Config,
    topic: Option<String>,
    json: bool,
    key: Option<String>,
    message: String,
) -> Result<ExitCode> {
    let publisher: Publisher<RdKafkaClient> = Publisher::connect(&config.kafka)?;
    let store = Arc::new(ConfiguredStore::open(&config.dead_letter).await?);
    let topic = topic.unwrap_or_else(|| config.kafka.default_topic.clone());

    let mut job = if json {
        let value: serde_json::Value = serde_json::from_str(&message)?;
        PublishJob::structured(topic, &value)?
    } else {
        PublishJob::raw(topic, message)
    };
    if let Some(key) = key {
        job = job.with_options(PublishOptions::new().with_key(key));
    }

    let dispatcher = Dispatcher::new(publisher.clone(), store, &config.dispatch.inline());
    let result = dispatcher.run_now(job).await;
    dispatcher.shutdown().await;
    publisher.close(config.kafka.flush_timeout());

    match result {
        Ok(()) => {
            println!("Message published.");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_store_error() => Err(e),
        Err(e) => {
            eprintln!("Publish failed and was recorded for retry: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("kafka_courier=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("kafka_courier=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
