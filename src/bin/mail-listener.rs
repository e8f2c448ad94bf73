#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI that watches an IMAP mailbox and prints what arrives

use clap::{Parser, Subcommand};
use mail_listener::{ImapConnection, ListenerConfig, ListenerEvent, MailListener};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mail-listener")]
#[command(about = "Watch an IMAP mailbox and print incoming mail as events")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Print events as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Mailbox to watch (overrides MAIL_MAILBOX)
    #[arg(long, global = true)]
    mailbox: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Watch the mailbox until interrupted
    Watch {
        /// Apply the success labels to each delivered message
        #[arg(long)]
        label: bool,

        /// Move each delivered message to the processed mailbox
        #[arg(long)]
        move_processed: bool,

        /// Process matching messages already in the mailbox first
        #[arg(long)]
        unread_on_start: bool,
    },

    /// Process matching messages once and exit
    Scan,
}

type Listener = MailListener<ImapConnection>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let default_level = if std::env::var_os("IMAP_DEBUG").is_some() {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = ListenerConfig::from_env()?;
    if let Some(mailbox) = &args.mailbox {
        mailbox.clone_into(&mut config.mailbox);
    }
    if let Command::Watch {
        unread_on_start: true,
        ..
    } = args.command
    {
        config.fetch_unread_on_start = true;
    }

    let session = ImapConnection::for_listener(&config);
    let (listener, events) = MailListener::new(config, session);

    match args.command {
        Command::Watch {
            label,
            move_processed,
            ..
        } => cmd_watch(&listener, events, args.json, label, move_processed).await,
        Command::Scan => cmd_scan(&listener, events, args.json).await,
    }
}

async fn cmd_watch(
    listener: &Listener,
    mut events: UnboundedReceiver<ListenerEvent>,
    json: bool,
    label: bool,
    move_processed: bool,
) -> anyhow::Result<()> {
    listener.start().await;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                print_event(&event, json)?;
                match event {
                    ListenerEvent::Mail { uid, .. } => {
                        if label {
                            listener.add_label(uid, true).await.ok();
                        }
                        if move_processed {
                            listener.move_to_processed_mailbox(uid).await.ok();
                        }
                    }
                    ListenerEvent::Disconnected => break,
                    _ => {}
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                listener.end().await;
                drain(&mut events, json)?;
                break;
            }
        }
    }

    Ok(())
}

async fn cmd_scan(
    listener: &Listener,
    mut events: UnboundedReceiver<ListenerEvent>,
    json: bool,
) -> anyhow::Result<()> {
    let scanned = listener.scan().await;
    listener.end().await;
    drain(&mut events, json)?;

    let matched = scanned?;
    if !json {
        println!("\n{matched} message(s) matched");
    }
    Ok(())
}

fn drain(events: &mut UnboundedReceiver<ListenerEvent>, json: bool) -> anyhow::Result<()> {
    while let Ok(event) = events.try_recv() {
        print_event(&event, json)?;
    }
    Ok(())
}

fn print_event(event: &ListenerEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    match event {
        ListenerEvent::Mailbox { info } => {
            println!("Mailbox {}: {} message(s)", info.name, info.exists);
            println!(
                "{:<8} {:<8} {:<20} {:<30} Subject",
                "UID", "Seq", "Date", "From"
            );
            println!("{}", "-".repeat(100));
        }
        ListenerEvent::Mail {
            seqno,
            uid,
            message,
        } => {
            println!(
                "{:<8} {:<8} {:<20} {:<30} {}",
                uid,
                seqno,
                message
                    .date
                    .map_or_else(|| "-".to_string(), |d| d.format("%Y-%m-%d %H:%M").to_string()),
                truncate(message.from.as_deref().unwrap_or("-"), 28),
                truncate(message.subject.as_deref().unwrap_or("(no subject)"), 40),
            );
        }
        ListenerEvent::Attachment {
            attachment, path, ..
        } => {
            println!(
                "{:<8} attachment {} ({} bytes) -> {}",
                "",
                attachment.filename,
                attachment.size,
                path.as_deref().unwrap_or("-")
            );
        }
        ListenerEvent::Error { error } => {
            eprintln!("error [{}]: {error}", error.kind());
        }
        ListenerEvent::Headers { .. } | ListenerEvent::Body { .. } => {}
        other => eprintln!("{}", other.name()),
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
