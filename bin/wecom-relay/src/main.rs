mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "wecom-relay")]
#[command(about = "企业微信 callback receiver and notification relay", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway (callback receiver + message API)
    Gateway {
        /// Port to listen on (overrides config gateway.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config gateway.host)
        #[arg(long)]
        host: Option<String>,
    },

    /// Show configuration and storage status
    Status,

    /// Manage channel configurations
    Channel {
        #[command(subcommand)]
        command: ChannelCommands,
    },

    /// Browse received callback messages
    Messages {
        #[command(subcommand)]
        command: MessagesCommands,
    },

    /// Send a notification through a configuration
    Send {
        /// Configuration code
        code: String,

        /// Message body
        content: String,

        /// Optional title line prepended to the body
        #[arg(short, long)]
        title: Option<String>,

        /// Send as markdown instead of plain text
        #[arg(long)]
        markdown: bool,
    },
}

#[derive(Subcommand)]
enum ChannelCommands {
    /// Step 1: register callback credentials and generate a code
    Add {
        /// Enterprise corp id (receiver id of every callback)
        #[arg(long)]
        corp_id: String,

        /// Callback Token from the admin console
        #[arg(long)]
        token: String,

        /// 43-character EncodingAESKey from the admin console
        #[arg(long)]
        encoding_aes_key: String,

        #[arg(short, long)]
        description: Option<String>,
    },

    /// Step 2: add sending credentials so the configuration can notify
    Complete {
        code: String,

        #[arg(long)]
        corp_secret: String,

        #[arg(long)]
        agent_id: i64,

        /// Recipient user ids separated by `|` or `,`
        #[arg(long)]
        recipients: String,

        #[arg(short, long)]
        description: Option<String>,

        /// Store the corpsecret without checking it against gettoken
        #[arg(long)]
        skip_validation: bool,
    },

    /// Check a corp id / corpsecret pair and list the members it reaches
    Validate {
        #[arg(long)]
        corp_id: String,

        #[arg(long)]
        corp_secret: String,
    },

    /// Show one configuration (secrets are never printed)
    Show { code: String },

    /// List configurations
    List,
}

#[derive(Subcommand)]
enum MessagesCommands {
    /// List stored messages of a configuration
    List {
        code: String,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 20)]
        limit: u32,

        /// Filter by message type (text, image, voice, video, location, link, file, event)
        #[arg(long = "type")]
        msg_type: Option<String>,

        /// Substring of the sender id
        #[arg(long)]
        from: Option<String>,

        /// Substring of the content
        #[arg(short, long)]
        keyword: Option<String>,

        /// First day (YYYY-MM-DD, inclusive)
        #[arg(long)]
        since: Option<String>,

        /// Last day (YYYY-MM-DD, inclusive)
        #[arg(long)]
        until: Option<String>,

        /// Only unread messages
        #[arg(long)]
        unread: bool,

        /// Oldest first
        #[arg(long)]
        asc: bool,
    },

    /// Mark a message as read
    Read { message_id: String },

    /// Counters for a configuration
    Stats { code: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Gateway { port, host } => {
            commands::gateway::run(host, port).await?;
        }
        Commands::Status => {
            commands::status::run().await?;
        }
        Commands::Channel { command } => match command {
            ChannelCommands::Add {
                corp_id,
                token,
                encoding_aes_key,
                description,
            } => {
                commands::channel::add(&corp_id, &token, &encoding_aes_key, description).await?;
            }
            ChannelCommands::Complete {
                code,
                corp_secret,
                agent_id,
                recipients,
                description,
                skip_validation,
            } => {
                commands::channel::complete(
                    &code,
                    &corp_secret,
                    agent_id,
                    &recipients,
                    description,
                    !skip_validation,
                )
                .await?;
            }
            ChannelCommands::Validate {
                corp_id,
                corp_secret,
            } => {
                commands::channel::validate(&corp_id, &corp_secret).await?;
            }
            ChannelCommands::Show { code } => {
                commands::channel::show(&code).await?;
            }
            ChannelCommands::List => {
                commands::channel::list().await?;
            }
        },
        Commands::Messages { command } => match command {
            MessagesCommands::List {
                code,
                page,
                limit,
                msg_type,
                from,
                keyword,
                since,
                until,
                unread,
                asc,
            } => {
                let filter = commands::messages::ListFilter {
                    page,
                    limit,
                    msg_type,
                    from_user: from,
                    keyword,
                    start_date: since,
                    end_date: until,
                    unread_only: unread,
                    oldest_first: asc,
                };
                commands::messages::list(&code, filter).await?;
            }
            MessagesCommands::Read { message_id } => {
                commands::messages::read(&message_id).await?;
            }
            MessagesCommands::Stats { code } => {
                commands::messages::stats(&code).await?;
            }
        },
        Commands::Send {
            code,
            content,
            title,
            markdown,
        } => {
            commands::send::run(&code, title, &content, markdown).await?;
        }
    }

    Ok(())
}
