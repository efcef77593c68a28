//! # SMQ CLI
//!
//! Command-line interface for the SMQ message queue.
//!
//! This module provides CLI commands for:
//! - Queue management
//! - Sending, receiving and deleting messages
//! - Running a logging worker against a queue
//! - Serving the HTTP API
//! - A short end-to-end demonstration

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use chrono::Duration;
use clap::{Parser, Subcommand};
use serde::Serialize;
use smq_api::{ConfigError, ServiceConfig, ServiceError};
use smq_runtime::{
    receive_with_wait, HandlerError, HandlerOutcome, Message, MessageHandler, MessageId,
    QueueAttributes, QueueClient, QueueClientFactory, QueueError, QueueName, QueueSettings,
    QueueSettingsUpdate, ReceivedMessage, RedisConfig, StoreConfig, Worker, WorkerConfig,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// SMQ - simple message queue on Redis
#[derive(Parser, Debug)]
#[command(name = "smq")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Simple message queue on Redis")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SMQ_CONFIG")]
    pub config: Option<PathBuf>,

    /// Redis connection URL; overrides the configured store
    #[arg(long, env = "SMQ_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Key namespace of the queues
    #[arg(long)]
    pub namespace: Option<String>,

    /// Use a process-local in-memory store instead of Redis
    #[arg(long, conflicts_with = "redis_url")]
    pub memory: bool,

    /// Logging level or filter directive
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Output format of command results
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Queue management commands
    Queue {
        #[command(subcommand)]
        action: QueueCommands,
    },

    /// Message commands
    Message {
        #[command(subcommand)]
        action: MessageCommands,
    },

    /// Receive messages from a queue, log them and delete them
    Worker {
        queue: String,

        /// Maximum number of messages processed at once
        #[arg(long, default_value = "10")]
        concurrency: usize,

        /// Pause between receives while the queue is empty
        #[arg(long, default_value = "1000")]
        poll_interval_ms: u64,

        /// Visibility timeout in seconds; the queue default when absent
        #[arg(long)]
        visibility_timeout: Option<i64>,
    },

    /// Run the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Create a queue, send a message, receive and delete it
    Demo {
        #[arg(long, default_value = "demo")]
        queue: String,
    },
}

/// Queue settings given on the command line
#[derive(clap::Args, Debug, Clone, Default)]
pub struct QueueSettingsArgs {
    /// Visibility timeout in seconds
    #[arg(long)]
    pub visibility_timeout: Option<i64>,

    /// Delay in seconds before new messages become ready
    #[arg(long)]
    pub delay: Option<i64>,

    /// Maximum message size in bytes
    #[arg(long)]
    pub max_size: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// Create a queue
    Create {
        name: String,
        #[command(flatten)]
        settings: QueueSettingsArgs,
    },

    /// List queues
    List,

    /// Show queue attributes and counters
    Show { name: String },

    /// Change queue settings
    Update {
        name: String,
        #[command(flatten)]
        settings: QueueSettingsArgs,
    },

    /// Delete a queue and all of its messages
    Delete { name: String },
}

#[derive(Subcommand, Debug)]
pub enum MessageCommands {
    /// Send a message
    Send {
        queue: String,
        body: String,

        /// Delay in seconds; the queue default when absent
        #[arg(long)]
        delay: Option<i64>,
    },

    /// Receive the next ready message and hide it
    Receive {
        queue: String,

        /// Visibility timeout in seconds; the queue default when absent
        #[arg(long)]
        visibility_timeout: Option<i64>,

        /// Wait up to this many seconds for a message
        #[arg(long)]
        wait: Option<i64>,
    },

    /// Receive the next ready message and delete it
    Pop { queue: String },

    /// Delete a received message
    Delete { queue: String, id: String },

    /// Change the visibility deadline of a received message
    Visibility {
        queue: String,
        id: String,
        /// Seconds from now
        timeout: i64,
    },

    /// Make received messages whose deadline passed ready again
    Release { queue: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Queue operation failed: {0}")]
    Queue(#[from] QueueError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Queue(QueueError::ConfigurationError(_)) => 1,
            Self::Queue(_) => 2,
            Self::Service(ServiceError::Configuration(_)) => 1,
            Self::Service(ServiceError::Client(_)) => 2,
            Self::Service(_) => 3,
            Self::Io(_) => 3,
            Self::InvalidArgument { .. } => 4,
        }
    }

    fn invalid_argument(arg: &str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            arg: arg.to_string(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Entry Point
// ============================================================================

pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();
    initialize_logging(&cli.log_level, cli.json_logs);

    let config = resolve_config(&cli)?;
    let client = QueueClientFactory::create_client(&config.client).await?;

    let mut stdout = std::io::stdout();
    execute(cli.command, client, &config, cli.output, &mut stdout).await
}

/// Install the global tracing subscriber; logs go to stderr
pub fn initialize_logging(level: &str, json: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Configuration files and environment first, then command-line overrides
pub fn resolve_config(cli: &Cli) -> Result<ServiceConfig, CliError> {
    let path = cli
        .config
        .as_ref()
        .map(|path| {
            path.to_str()
                .map(str::to_string)
                .ok_or_else(|| CliError::invalid_argument("config", "path is not valid UTF-8"))
        })
        .transpose()?;

    let mut config = ServiceConfig::load(path.as_deref())?;

    if let Some(url) = &cli.redis_url {
        let command_timeout_ms = match &config.client.store {
            StoreConfig::Redis(redis) => redis.command_timeout_ms,
            StoreConfig::InMemory => RedisConfig::default().command_timeout_ms,
        };
        config.client.store = StoreConfig::Redis(RedisConfig {
            url: url.clone(),
            command_timeout_ms,
        });
    }
    if cli.memory {
        config.client.store = StoreConfig::InMemory;
    }
    if let Some(namespace) = &cli.namespace {
        config.client.namespace = namespace.clone();
    }

    config.validate()?;
    Ok(config)
}

/// Run one command against `client`, writing results to `out`
pub async fn execute(
    command: Commands,
    client: Arc<dyn QueueClient>,
    config: &ServiceConfig,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    match command {
        Commands::Queue { action } => {
            execute_queue_command(action, client.as_ref(), format, out).await
        }
        Commands::Message { action } => {
            execute_message_command(action, client.as_ref(), format, out).await
        }
        Commands::Worker {
            queue,
            concurrency,
            poll_interval_ms,
            visibility_timeout,
        } => {
            let worker_config = WorkerConfig {
                concurrency,
                poll_interval: std::time::Duration::from_millis(poll_interval_ms),
                visibility_timeout: visibility_timeout
                    .map(|timeout| seconds_arg("visibility-timeout", timeout))
                    .transpose()?,
                create_queue: true,
            };
            execute_worker_command(
                client,
                queue_name(&queue)?,
                worker_config,
                smq_api::shutdown_signal(),
                format,
                out,
            )
            .await
        }
        Commands::Serve { host, port } => {
            let mut config = config.clone();
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            smq_api::start_server(config, client).await?;
            Ok(())
        }
        Commands::Demo { queue } => execute_demo_command(client.as_ref(), &queue, out).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn execute_queue_command(
    action: QueueCommands,
    client: &dyn QueueClient,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    match action {
        QueueCommands::Create { name, settings } => {
            let queue = queue_name(&name)?;
            let created = client
                .create_queue(&queue, queue_settings(&settings)?)
                .await?;
            #[derive(Serialize)]
            struct Created<'a> {
                name: &'a QueueName,
                created: bool,
            }
            emit(out, format, &Created { name: &queue, created }, || {
                if created {
                    format!("Created queue {}", queue)
                } else {
                    format!("Queue {} already exists", queue)
                }
            })
        }
        QueueCommands::List => {
            let queues = client.list_queues().await?;
            emit(out, format, &queues, || {
                queues
                    .iter()
                    .map(|queue| queue.to_string())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        QueueCommands::Show { name } => {
            let attributes = client.get_queue_attributes(&queue_name(&name)?).await?;
            emit(out, format, &attributes, || render_attributes(&attributes))
        }
        QueueCommands::Update { name, settings } => {
            let update = settings_update(&settings)?;
            if update.is_empty() {
                return Err(CliError::invalid_argument(
                    "settings",
                    "give at least one of --visibility-timeout, --delay, --max-size",
                ));
            }
            let attributes = client
                .set_queue_attributes(&queue_name(&name)?, update)
                .await?;
            emit(out, format, &attributes, || render_attributes(&attributes))
        }
        QueueCommands::Delete { name } => {
            let queue = queue_name(&name)?;
            client.delete_queue(&queue).await?;
            emit(out, format, &serde_json::json!({ "deleted": queue }), || {
                format!("Deleted queue {}", queue)
            })
        }
    }
}

async fn execute_message_command(
    action: MessageCommands,
    client: &dyn QueueClient,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    match action {
        MessageCommands::Send { queue, body, delay } => {
            let mut message = Message::new(Bytes::from(body));
            if let Some(delay) = delay {
                message = message.with_delay(seconds_arg("delay", delay)?);
            }
            let id = client.send_message(&queue_name(&queue)?, message).await?;
            emit(out, format, &serde_json::json!({ "id": id }), || id.to_string())
        }
        MessageCommands::Receive {
            queue,
            visibility_timeout,
            wait,
        } => {
            let queue = queue_name(&queue)?;
            let visibility_timeout = visibility_timeout
                .map(|timeout| seconds_arg("visibility-timeout", timeout))
                .transpose()?;
            let received = match wait {
                Some(wait) => {
                    receive_with_wait(
                        client,
                        &queue,
                        visibility_timeout,
                        seconds_arg("wait", wait)?,
                        Duration::milliseconds(100),
                    )
                    .await?
                }
                None => client.receive_message(&queue, visibility_timeout).await?,
            };
            emit_received(out, format, received.as_ref())
        }
        MessageCommands::Pop { queue } => {
            let popped = client.pop_message(&queue_name(&queue)?).await?;
            emit_received(out, format, popped.as_ref())
        }
        MessageCommands::Delete { queue, id } => {
            let id = message_id(&id)?;
            client.delete_message(&queue_name(&queue)?, &id).await?;
            emit(out, format, &serde_json::json!({ "deleted": id }), || {
                format!("Deleted message {}", id)
            })
        }
        MessageCommands::Visibility { queue, id, timeout } => {
            let id = message_id(&id)?;
            let hidden_until = client
                .change_message_visibility(
                    &queue_name(&queue)?,
                    &id,
                    seconds_arg("timeout", timeout)?,
                )
                .await?;
            emit(
                out,
                format,
                &serde_json::json!({ "id": id, "hidden_until": hidden_until }),
                || format!("Message {} hidden until {}", id, hidden_until),
            )
        }
        MessageCommands::Release { queue } => {
            let released = client
                .release_expired_messages(&queue_name(&queue)?)
                .await?;
            emit(out, format, &serde_json::json!({ "released": released }), || {
                format!("Released {} message(s)", released)
            })
        }
    }
}

/// Handler of the `worker` command: logs every message and acknowledges it
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, message: &ReceivedMessage) -> Result<HandlerOutcome, HandlerError> {
        info!(
            message_id = %message.id,
            receive_count = message.receive_count,
            body = %body_display(&message.body),
            "Message received"
        );
        Ok(HandlerOutcome::Ack)
    }
}

/// Run a [`LoggingHandler`] worker until `shutdown` completes
pub async fn execute_worker_command(
    client: Arc<dyn QueueClient>,
    queue: QueueName,
    config: WorkerConfig,
    shutdown: impl std::future::Future<Output = ()>,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    info!(queue = %queue, concurrency = config.concurrency, "Starting worker");
    let handle = Worker::new(client, queue, Arc::new(LoggingHandler), config)
        .start()
        .await?;

    shutdown.await;
    let stats = handle.shutdown().await;

    #[derive(Serialize)]
    struct Stats {
        received: u64,
        acknowledged: u64,
        failed: u64,
        deadline_passed: u64,
    }
    emit(
        out,
        format,
        &Stats {
            received: stats.received,
            acknowledged: stats.acknowledged,
            failed: stats.failed,
            deadline_passed: stats.deadline_passed,
        },
        || {
            format!(
                "Worker stopped: {} received, {} acknowledged, {} failed, {} past deadline",
                stats.received, stats.acknowledged, stats.failed, stats.deadline_passed
            )
        },
    )
}

/// Create a queue, inspect it, send one message and receive it back
async fn execute_demo_command(
    client: &dyn QueueClient,
    queue: &str,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let queue = queue_name(queue)?;

    if client.create_queue(&queue, QueueSettings::default()).await? {
        writeln!(out, "Created queue {}", queue)?;
    } else {
        writeln!(out, "Using existing queue {}", queue)?;
    }

    let attributes = client.get_queue_attributes(&queue).await?;
    writeln!(out, "{}", render_attributes(&attributes))?;

    let id = client
        .send_message(&queue, Message::from("Hello World"))
        .await?;
    writeln!(out, "Sent message {}", id)?;

    match client.receive_message(&queue, None).await? {
        Some(message) => {
            writeln!(out, "{}", render_received(&message))?;
            client.delete_message(&queue, &message.id).await?;
            writeln!(out, "Deleted message {}", message.id)?;
        }
        None => writeln!(out, "No message ready")?,
    }
    Ok(())
}

// ============================================================================
// Argument Conversion
// ============================================================================

fn queue_name(name: &str) -> Result<QueueName, CliError> {
    QueueName::new(name.to_string()).map_err(|e| CliError::invalid_argument("queue", e.to_string()))
}

fn message_id(id: &str) -> Result<MessageId, CliError> {
    id.parse()
        .map_err(|e: smq_runtime::ValidationError| CliError::invalid_argument("id", e.to_string()))
}

fn seconds_arg(arg: &str, value: i64) -> Result<Duration, CliError> {
    Duration::try_seconds(value).ok_or_else(|| CliError::invalid_argument(arg, "out of range"))
}

fn queue_settings(args: &QueueSettingsArgs) -> Result<QueueSettings, CliError> {
    let mut settings = QueueSettings::default();
    if let Some(timeout) = args.visibility_timeout {
        settings = settings.with_visibility_timeout(seconds_arg("visibility-timeout", timeout)?);
    }
    if let Some(delay) = args.delay {
        settings = settings.with_delay(seconds_arg("delay", delay)?);
    }
    if let Some(max_size) = args.max_size {
        settings = settings.with_max_size(max_size);
    }
    Ok(settings)
}

fn settings_update(args: &QueueSettingsArgs) -> Result<QueueSettingsUpdate, CliError> {
    let mut update = QueueSettingsUpdate::new();
    if let Some(timeout) = args.visibility_timeout {
        update = update.visibility_timeout(seconds_arg("visibility-timeout", timeout)?);
    }
    if let Some(delay) = args.delay {
        update = update.delay(seconds_arg("delay", delay)?);
    }
    if let Some(max_size) = args.max_size {
        update = update.max_size(max_size);
    }
    Ok(update)
}

// ============================================================================
// Output
// ============================================================================

fn emit<T: Serialize>(
    out: &mut dyn Write,
    format: OutputFormat,
    value: &T,
    text: impl FnOnce() -> String,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value).map_err(std::io::Error::from)?;
            writeln!(out, "{}", json)?;
        }
        OutputFormat::Text => {
            let text = text();
            if !text.is_empty() {
                writeln!(out, "{}", text)?;
            }
        }
    }
    Ok(())
}

fn emit_received(
    out: &mut dyn Write,
    format: OutputFormat,
    message: Option<&ReceivedMessage>,
) -> Result<(), CliError> {
    match (message, format) {
        (Some(message), _) => emit(out, format, message, || render_received(message)),
        (None, OutputFormat::Json) => {
            writeln!(out, "null")?;
            Ok(())
        }
        (None, OutputFormat::Text) => {
            writeln!(out, "No message ready")?;
            Ok(())
        }
    }
}

fn render_attributes(attributes: &QueueAttributes) -> String {
    format!(
        "queue:              {}\n\
         visibility_timeout: {}s\n\
         delay:              {}s\n\
         max_size:           {} bytes\n\
         created:            {}\n\
         modified:           {}\n\
         total_sent:         {}\n\
         total_received:     {}\n\
         ready:              {}\n\
         delayed:            {}\n\
         hidden:             {}",
        attributes.name,
        attributes.visibility_timeout,
        attributes.delay,
        attributes.max_size,
        attributes.created,
        attributes.modified,
        attributes.total_sent,
        attributes.total_received,
        attributes.ready_messages,
        attributes.delayed_messages,
        attributes.hidden_messages,
    )
}

fn render_received(message: &ReceivedMessage) -> String {
    let hidden_until = message
        .hidden_until
        .map(|deadline| deadline.to_string())
        .unwrap_or_else(|| "deleted".to_string());
    format!(
        "id:             {}\n\
         receive_count:  {}\n\
         first_received: {}\n\
         sent:           {}\n\
         hidden_until:   {}\n\
         body:           {}",
        message.id,
        message.receive_count,
        message.first_received,
        message.sent,
        hidden_until,
        body_display(&message.body),
    )
}

/// Body as text when it is UTF-8, base64 otherwise
fn body_display(body: &Bytes) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => format!("base64:{}", general_purpose::STANDARD.encode(body)),
    }
}
