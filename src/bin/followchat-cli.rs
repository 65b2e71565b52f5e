//! followchat CLI
//!
//! Non-interactive front end over the chat core. Each subcommand opens the
//! database, performs one operation as the given identity and prints the result.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use followchat_core::im::follow::FollowListener;
use followchat_core::im::message::MessageListener;
use followchat_core::{
    ChatClient, ChatConfig, Decision, FollowEdge, LiveTimeline, Message, Reaction, Session,
};
use serde::Serialize;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "followchat-cli")]
#[command(about = "Follow-gated direct messaging over a local SQLite store", long_about = None)]
struct Args {
    /// SQLite URL
    #[arg(long, default_value = "sqlite://followchat.db?mode=rwc", global = true)]
    db: String,

    /// Directory backing avatars and attachments
    #[arg(long, default_value = "media", global = true)]
    media_root: PathBuf,

    /// Identity to act as (user id or @username)
    #[arg(long, global = true)]
    user: Option<String>,

    /// Session token printed by `signup`
    #[arg(long, global = true)]
    token: Option<String>,

    /// Log filter, used when RUST_LOG is not set
    #[arg(long, default_value = "warn,followchat_core=info", global = true)]
    log_level: String,

    /// Also append logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an identity and its profile; prints the session
    Signup {
        username: String,
        #[arg(long, default_value = "")]
        display_name: String,
    },
    /// Ask to follow someone
    Follow { target: String },
    /// Pending requests addressed to you and requests you sent
    Requests,
    /// Accept or reject a pending request
    Respond { edge_id: String, decision: String },
    /// Withdraw a request you sent
    Cancel { edge_id: String },
    /// Your conversations, most recent first
    Conversations,
    /// Send a message to a connected peer
    Send {
        peer: String,
        text: Option<String>,
        /// Attach a file
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Print the conversation with a peer
    History { peer: String },
    /// Toggle a reaction on a message
    React { message_id: String, emoji: String },
    /// Profiles you have not asked to follow yet
    Discover {
        #[arg(long, default_value = "20")]
        limit: i64,
    },
    /// Run a two-user walkthrough and print every live event
    Demo,
}

/// Initialise logging to stderr and, optionally, a file
fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // RUST_LOG wins over the command-line level
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(false)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Accept either a raw user id or `@username`
async fn resolve_user(client: &ChatClient, who: &str) -> Result<String> {
    if who.starts_with('@') {
        let profile = client.profiles.get_by_username(who).await?;
        return Ok(profile.id);
    }
    Ok(who.to_string())
}

async fn session_from(client: &ChatClient, args: &Args) -> Result<Session> {
    match (&args.user, &args.token) {
        (Some(user), Some(token)) => Ok(Session {
            user_id: resolve_user(client, user).await?,
            token: token.clone(),
        }),
        _ => Ok(Session::anonymous()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level, args.log_file.as_ref())?;

    let mut config = ChatConfig::new(args.db.clone());
    config.media_root = args.media_root.clone();
    let client = ChatClient::connect(config).await?;

    if let Err(e) = run(&client, &args).await {
        error!("[CLI] {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(client: &ChatClient, args: &Args) -> Result<()> {
    match &args.command {
        Command::Signup {
            username,
            display_name,
        } => {
            let (session, profile) = client.identities.register(username, display_name).await?;
            info!("[CLI] signed up @{}", profile.username);
            println!("user:  {}", session.user_id);
            println!("token: {}", session.token);
            print_json(&profile)
        }
        Command::Demo => demo(client).await,
        command => {
            let session = session_from(client, args).await?;
            run_as(client, &session, command).await
        }
    }
}

async fn run_as(client: &ChatClient, session: &Session, command: &Command) -> Result<()> {
    match command {
        Command::Follow { target } => {
            let followee = resolve_user(client, target).await?;
            print_json(&client.follows.request_follow(session, &followee).await?)
        }
        Command::Requests => {
            println!("incoming:");
            print_json(&client.follows.incoming_requests(session).await?)?;
            println!("outgoing:");
            print_json(&client.follows.outgoing_requests(session).await?)
        }
        Command::Respond { edge_id, decision } => {
            let decision: Decision = decision.parse()?;
            let response = client
                .follows
                .respond_to_follow(session, edge_id, decision)
                .await?;
            print_json(&response.edge)?;
            if let Some(conversation) = &response.conversation {
                println!("conversation: {}", conversation.id);
            }
            Ok(())
        }
        Command::Cancel { edge_id } => {
            print_json(&client.follows.cancel_request(session, edge_id).await?)
        }
        Command::Conversations => print_json(&client.conversations.list_for(session).await?),
        Command::Send { peer, text, file } => {
            let peer = resolve_user(client, peer).await?;
            let conversation = client.conversations.open_with(session, &peer).await?;
            let message = match file {
                Some(path) => {
                    let bytes = tokio::fs::read(path)
                        .await
                        .with_context(|| format!("reading {}", path.display()))?;
                    let filename = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .ok_or_else(|| anyhow!("unusable file name {}", path.display()))?;
                    client
                        .messages
                        .send_attachment(session, &conversation.id, text.as_deref(), filename, &bytes)
                        .await?
                }
                None => {
                    client
                        .messages
                        .send(session, &conversation.id, text.as_deref(), None)
                        .await?
                }
            };
            print_json(&message)
        }
        Command::History { peer } => {
            let peer = resolve_user(client, peer).await?;
            let conversation = client.conversations.open_with(session, &peer).await?;
            let messages = client
                .messages
                .list_since(session, &conversation.id, None)
                .await?;
            for message in &messages {
                let counts = client.reactions.counts_by_emoji(session, &message.id).await?;
                let badges: Vec<String> = counts
                    .iter()
                    .map(|c| format!("{}{}", c.emoji, c.count))
                    .collect();
                println!(
                    "[{}] {} {}: {} {}",
                    message.kind,
                    message.id,
                    message.sender_id,
                    message.content,
                    badges.join(" ")
                );
            }
            Ok(())
        }
        Command::React { message_id, emoji } => {
            let outcome = client
                .reactions
                .toggle_persisted(session, message_id, emoji)
                .await?;
            println!("{:?}", outcome);
            print_json(&client.reactions.counts_by_emoji(session, message_id).await?)
        }
        Command::Discover { limit } => print_json(&client.profiles.discover(session, *limit).await?),
        Command::Signup { .. } | Command::Demo => Err(anyhow!("{command:?} does not take a session")),
    }
}

struct PrintingListener(&'static str);

#[async_trait]
impl MessageListener for PrintingListener {
    async fn on_new_message(&self, message: Message) {
        println!("  [{}] new {} message: {}", self.0, message.kind, message.content);
    }

    async fn on_reaction_added(&self, _conversation_id: String, reaction: Reaction) {
        println!("  [{}] reaction added: {}", self.0, reaction.emoji);
    }

    async fn on_reaction_removed(&self, _conversation_id: String, reaction: Reaction) {
        println!("  [{}] reaction removed: {}", self.0, reaction.emoji);
    }
}

#[async_trait]
impl FollowListener for PrintingListener {
    async fn on_follow_requested(&self, edge: FollowEdge) {
        println!("  [{}] follow request {} is {}", self.0, edge.id, edge.status);
    }

    async fn on_follow_resolved(&self, edge: FollowEdge) {
        println!("  [{}] follow request {} is now {}", self.0, edge.id, edge.status);
    }
}

/// A requests to follow B, B accepts, A says hello, B reacts.
async fn demo(client: &ChatClient) -> Result<()> {
    let (alice, alice_profile) = client.identities.register("alice", "Alice").await?;
    let (bob, bob_profile) = client.identities.register("bob", "Bob").await?;
    println!("@{} and @{} signed up", alice_profile.username, bob_profile.username);

    let follow_pump = client
        .spawn_follow_pump(&bob, Arc::new(PrintingListener("bob")))
        .await?;

    let edge = client.follows.request_follow(&alice, &bob.user_id).await?;
    println!("alice -> bob: {}", edge.status);

    let denied = client.conversations.open_with(&alice, &bob.user_id).await;
    println!("alice opens a chat before acceptance: {:?}", denied.err().map(|e| e.kind()));

    let response = client
        .follows
        .respond_to_follow(&bob, &edge.id, Decision::Accept)
        .await?;
    let conversation = response
        .conversation
        .ok_or_else(|| anyhow!("accepting did not create a conversation"))?;
    println!("bob accepted; conversation {}", conversation.id);

    let mut timeline = LiveTimeline::open(client, &bob, &conversation.id).await?;
    let message_pump = client
        .spawn_message_pump(&alice, &conversation.id, Arc::new(PrintingListener("alice")))
        .await?;

    let hello = client
        .messages
        .send(&alice, &conversation.id, Some("hello"), None)
        .await?;
    let event = timeline
        .next_event()
        .await?
        .ok_or_else(|| anyhow!("feed closed"))?;
    println!("bob's open screen received {:?}", event.op);

    client.reactions.toggle(&bob, &hello.id, "👋", &[]).await?;
    timeline.next_event().await?;
    for message in &timeline.state().messages {
        let counts: Vec<String> = timeline
            .counts_by_emoji(&message.id)
            .iter()
            .map(|c| format!("{}x{}", c.emoji, c.count))
            .collect();
        println!("  {:>6}: {} {}", message.kind, message.content, counts.join(" "));
    }

    // let the pumps print what they have before shutting down
    sleep(Duration::from_millis(200)).await;
    timeline.close();
    message_pump.abort();
    follow_pump.abort();
    Ok(())
}
