use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use ochat_chats::{ConversationId, ConversationType, Message, MessageId, MessageKind};
use ochat_config::load as load_config;
use ochat_runtime::{shutdown_signal, telemetry, ClientServices, ClientSession};
use ochat_sync::{EngineEvent, MergeOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "ochat")]
#[command(about = "ochat client (console by default)")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the session
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Clear the stored session
    Logout,
    /// List the employee directory
    Employees,
    /// List conversations
    Conversations,
    /// List the messages of a conversation
    Messages { conversation_id: ConversationId },
    /// Create a conversation
    Create {
        title: String,
        #[arg(long)]
        group: bool,
    },
    /// Add an employee to a conversation
    AddMember {
        conversation_id: ConversationId,
        employee_id: i64,
        employee_name: String,
        #[arg(long)]
        admin: bool,
    },
    /// Send a text message
    Send {
        conversation_id: ConversationId,
        content: String,
    },
    /// Mark a message as read by the signed-in user
    Read { message_id: MessageId },
    /// Connect to the hub and chat interactively (default)
    Console,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    telemetry::init_tracing().context("failed to initialise tracing")?;
    let config = load_config().context("failed to load configuration")?;
    let services = ClientServices::initialise(&config)
        .await
        .context("failed to initialise client services")?;

    match cli.command.unwrap_or(Commands::Console) {
        Commands::Login { email, password } => {
            let session = services.login(&email, &password).await?;
            let profile = session.engine().profile();
            println!("Signed in as {} (employee {})", profile.name, profile.id);
            Ok(())
        }
        Commands::Logout => {
            match services.resume().await? {
                Some(session) => services.logout(session).await?,
                None => services.gateway.logout().await?,
            }
            println!("Signed out");
            Ok(())
        }
        Commands::Employees => {
            require_session(&services).await?;
            let employees = services.gateway.list_employees().await?;
            for employee in employees {
                println!(
                    "  {}: {} {}",
                    employee.id,
                    employee.name,
                    employee.email.unwrap_or_default()
                );
            }
            Ok(())
        }
        Commands::Conversations => {
            let session = require_session(&services).await?;
            print_conversations(&session).await
        }
        Commands::Messages { conversation_id } => {
            let session = require_session(&services).await?;
            let messages = session.engine().load_messages(conversation_id).await?;
            print_messages(&messages);
            Ok(())
        }
        Commands::Create { title, group } => {
            let session = require_session(&services).await?;
            let conversation_type = if group {
                ConversationType::Group
            } else {
                ConversationType::Direct
            };
            connect_for_broadcast(&session).await;
            let conversation = session
                .engine()
                .create_conversation(&title, conversation_type)
                .await?;
            println!("Created conversation {}: {}", conversation.id, conversation.title);
            session.end().await;
            Ok(())
        }
        Commands::AddMember {
            conversation_id,
            employee_id,
            employee_name,
            admin,
        } => {
            let session = require_session(&services).await?;
            connect_for_broadcast(&session).await;
            let member = session
                .engine()
                .add_member(conversation_id, employee_id, &employee_name, admin)
                .await?;
            println!(
                "Added {} to conversation {}",
                member.employee_name, member.conversation_id
            );
            session.end().await;
            Ok(())
        }
        Commands::Send {
            conversation_id,
            content,
        } => {
            let session = require_session(&services).await?;
            connect_for_broadcast(&session).await;
            let message = session
                .engine()
                .send_message(conversation_id, &content, MessageKind::Text)
                .await?;
            println!("Sent message {}", message.id);
            session.end().await;
            Ok(())
        }
        Commands::Read { message_id } => {
            let session = require_session(&services).await?;
            connect_for_broadcast(&session).await;
            let employee_id = session.engine().profile().id;
            let receipt = session.engine().mark_read(message_id, employee_id).await?;
            println!("Message {} read at {}", receipt.message_id, receipt.read_at);
            session.end().await;
            Ok(())
        }
        Commands::Console => run_console(&services).await,
    }
}

async fn require_session(services: &ClientServices) -> anyhow::Result<ClientSession> {
    match services.resume().await? {
        Some(session) => Ok(session),
        None => bail!("not signed in; run `ochat login` first"),
    }
}

/// Writes are broadcast to peers only while connected; a failed connect
/// still lets the REST write go through.
async fn connect_for_broadcast(session: &ClientSession) {
    if let Err(error) = session.engine().connect().await {
        warn!(%error, "hub unavailable, peers will not be notified");
    }
}

async fn print_conversations(session: &ClientSession) -> anyhow::Result<()> {
    let conversations = session.engine().load_conversations().await?;
    if conversations.is_empty() {
        println!("No conversations found");
        return Ok(());
    }
    println!("Conversations:");
    for conversation in conversations {
        let kind = if conversation.is_group() { "group" } else { "direct" };
        println!("  {}: {} ({kind})", conversation.id, conversation.title);
    }
    Ok(())
}

fn print_messages(messages: &[Message]) {
    if messages.is_empty() {
        println!("No messages");
        return;
    }
    for message in messages {
        print_message(message);
    }
}

fn print_message(message: &Message) {
    println!(
        "  [{}] #{} {}: {} ({:?})",
        message.sent_at.format("%H:%M:%S"),
        message.id,
        message.sender_name,
        message.content,
        message.status
    );
}

async fn run_console(services: &ClientServices) -> anyhow::Result<()> {
    let session = require_session(services).await?;
    let engine = session.engine().clone();

    info!("starting interactive console");
    engine.load_conversations().await?;
    engine
        .connect()
        .await
        .context("failed to connect to the chat hub")?;

    let mut updates = engine.subscribe_updates();
    let printer = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(EngineEvent::MessageMerged {
                    message,
                    outcome: MergeOutcome::Inserted,
                }) => print_message(&message),
                Ok(EngineEvent::TypingChanged {
                    conversation_id,
                    typing,
                }) if !typing.is_empty() => {
                    let names: Vec<String> = typing
                        .into_iter()
                        .map(|status| status.employee_name.unwrap_or_else(|| status.employee_id.to_string()))
                        .collect();
                    println!("  ({} typing in {conversation_id})", names.join(", "));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("ochat console");
    println!("Type '/help' for commands, '/quit' or Ctrl+C to exit");
    println!("---");

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = tokio::select! {
            read = reader.read_line(&mut line) => read?,
            _ = shutdown_signal() => break,
            _ = session.expired() => {
                println!("Session expired, please sign in again");
                break;
            }
        };
        if bytes_read == 0 {
            break;
        }

        let command = line.trim();
        if command.is_empty() {
            continue;
        }

        if let Err(error) = run_command(&session, command).await {
            println!("error: {error:#}");
        }
        if command == "/quit" || command == "/q" {
            break;
        }
    }

    printer.abort();
    session.end().await;
    println!("Goodbye!");
    Ok(())
}

async fn run_command(session: &ClientSession, command: &str) -> anyhow::Result<()> {
    let engine = session.engine();
    let mut parts = command.splitn(3, ' ');
    let name = parts.next().unwrap_or_default();

    match name {
        "/quit" | "/q" => {}
        "/help" | "/h" => {
            println!("Available commands:");
            println!("  /list                 - List conversations");
            println!("  /open <id>            - Join a conversation and show its messages");
            println!("  /close <id>           - Leave a conversation");
            println!("  /send <id> <text>     - Send a message");
            println!("  /read <message id>    - Mark a message as read");
            println!("  /quit, /q             - Exit console");
        }
        "/list" => {
            for conversation in engine.conversations().await {
                println!("  {}: {}", conversation.id, conversation.title);
            }
        }
        "/open" => {
            let id = parse_id(parts.next())?;
            engine.open_conversation(id).await;
            print_messages(&engine.load_messages(id).await?);
        }
        "/close" => {
            let id = parse_id(parts.next())?;
            engine.close_conversation(id).await;
        }
        "/send" => {
            let id = parse_id(parts.next())?;
            let text = parts.next().context("usage: /send <id> <text>")?;
            engine.send_message(id, text, MessageKind::Text).await?;
        }
        "/read" => {
            let id = parse_id(parts.next())?;
            engine.mark_read(id, engine.profile().id).await?;
        }
        other => println!("Unknown command: {other}"),
    }
    Ok(())
}

fn parse_id(raw: Option<&str>) -> anyhow::Result<i64> {
    let raw = raw.context("missing id")?;
    raw.parse()
        .with_context(|| format!("'{raw}' is not a valid id"))
}
