use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use smtp_lab::config::{DEFAULT_CONFIG_FILE, Settings};
use smtp_lab::logging::{self, Role};
use smtp_lab::mailbox::{MessageEntry, ParsedMessage};
use smtp_lab::{
    DeliveryEvent, DeliveryStatus, FailureLog, FailureSource, MailboxDelivery, MailboxStore,
    OutgoingEmail, SmtpClient, SmtpServer,
};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc;
use std::thread;

#[derive(Parser)]
#[command(name = "smtp-lab", version, about = "Local SMTP server, client and mailbox browser")]
struct Cli {
    /// Settings file (defaults to smtp-lab.json in the working directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the server until `stop`, `quit` or end of input
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        mailbox_dir: Option<PathBuf>,
    },
    /// Send one message
    Send {
        #[arg(long)]
        from: String,
        /// Recipients, comma separated or repeated
        #[arg(long, required = true, value_delimiter = ',')]
        to: Vec<String>,
        #[arg(long)]
        subject: String,
        #[arg(long, conflicts_with = "body_file")]
        body: Option<String>,
        #[arg(long)]
        body_file: Option<PathBuf>,
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// List mailboxes and their message counts
    Mailboxes,
    /// List the messages in a mailbox, newest first
    Inbox { mailbox: String },
    /// Show one message
    Read { mailbox: String, index: usize },
    /// Write an attachment of a message to a file
    SaveAttachment {
        mailbox: String,
        index: usize,
        attachment: usize,
        dest: PathBuf,
    },
    /// Inspect failed deliveries
    Failures {
        #[command(subcommand)]
        action: FailuresAction,
    },
    /// Write the current settings to a file
    Init { path: Option<PathBuf> },
}

#[derive(Subcommand)]
enum FailuresAction {
    List,
    Clear,
    /// Resend the failure at INDEX from `failures list`
    Retry { index: usize },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut settings = Settings::load(cli.config.as_deref())?;

    let role = if matches!(cli.command, Command::Serve { .. }) {
        Role::Server
    } else {
        Role::Client
    };
    logging::init(&settings.logging, role)?;

    match cli.command {
        Command::Serve {
            host,
            port,
            mailbox_dir,
        } => {
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(port) = port {
                settings.server.port = port;
            }
            if let Some(dir) = mailbox_dir {
                settings.server.mailbox_dir = dir;
            }
            serve(&settings)
        }
        Command::Send {
            from,
            to,
            subject,
            body,
            body_file,
            attachments,
            host,
            port,
        } => {
            let body = match (body, body_file) {
                (Some(body), _) => body,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read body file: {}", path.display()))?,
                (None, None) => String::new(),
            };
            let email = OutgoingEmail {
                from,
                to,
                subject,
                body,
                attachments,
            };
            send(&settings, &email, host, port)
        }
        Command::Mailboxes => list_mailboxes(&settings),
        Command::Inbox { mailbox } => inbox(&settings, &mailbox),
        Command::Read { mailbox, index } => read(&settings, &mailbox, index),
        Command::SaveAttachment {
            mailbox,
            index,
            attachment,
            dest,
        } => save_attachment(&settings, &mailbox, index, attachment, &dest),
        Command::Failures { action } => failures(&settings, action),
        Command::Init { path } => {
            let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            settings.save(&path)?;
            println!("Settings written to {}", path.display());
            Ok(())
        }
    }
}

fn serve(settings: &Settings) -> Result<()> {
    let store = MailboxStore::new(&settings.server.mailbox_dir);
    store.ensure_root()?;

    let (tx, rx) = mpsc::channel();
    let delivery = MailboxDelivery::new(store, FailureLog::open(&settings.server.failure_log))
        .with_events(tx);

    let addr = settings.server.bind_addr();
    let mut handle = match SmtpServer::new(&settings.server.hostname).spawn(addr.as_str(), delivery)
    {
        Ok(handle) => handle,
        Err(e) if e.is_address_in_use() => {
            bail!("Port {} is already in use. Is another server running?", settings.server.port)
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to start server on {addr}")),
    };

    println!("SMTP Lab server running");
    println!("Address: {}", handle.local_addr());
    println!("Hostname: {}", settings.server.hostname);
    println!("Mailboxes: {}", settings.server.mailbox_dir.display());
    println!("Type 'stop' to shut down");

    thread::spawn(move || {
        let mut count = 0;
        for event in rx {
            match event {
                DeliveryEvent::Received {
                    sender,
                    recipients,
                    subject,
                    ..
                } => {
                    count += 1;
                    println!(
                        "Received email #{count} from: {sender} to: {}",
                        recipients.join(", ")
                    );
                    println!("  Subject: {subject}");
                }
                DeliveryEvent::Delivered { recipient, path } => {
                    println!("  Delivered to {recipient}: {}", path.display());
                }
                DeliveryEvent::Failed { reason } => println!("  Failed: {reason}"),
            }
        }
    });

    for line in io::stdin().lock().lines() {
        match line?.trim() {
            "stop" | "quit" => break,
            "" => {}
            other => println!("Unknown command '{other}'. Type 'stop' to shut down"),
        }
    }

    handle.stop()?;
    println!("Server stopped");
    Ok(())
}

fn send(
    settings: &Settings,
    email: &OutgoingEmail,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let host = host.unwrap_or_else(|| settings.client.default_server_host.clone());
    let port = port.unwrap_or(settings.client.default_server_port);
    let client = client(settings, host, port);

    match client.send(email) {
        Ok(()) => {
            println!("Email sent");
            println!("From: {}", email.from);
            println!("To: {}", email.to.join(", "));
            println!("Subject: {}", email.subject);
            if !email.attachments.is_empty() {
                println!("Attachments: {}", email.attachments.len());
            }
            Ok(())
        }
        Err(e) if e.is_connection_refused() => {
            bail!("{e}. Start the server first with `smtp-lab serve`")
        }
        Err(e) => Err(e.into()),
    }
}

fn client(settings: &Settings, host: String, port: u16) -> SmtpClient {
    SmtpClient::new(host, port)
        .timeout(settings.client.timeout())
        .with_rules(settings.validation.clone(), settings.attachments.clone())
        .with_failure_log(FailureLog::open(&settings.client.failure_log))
}

fn list_mailboxes(settings: &Settings) -> Result<()> {
    let store = MailboxStore::new(&settings.server.mailbox_dir);
    let mailboxes = store.list_mailboxes()?;
    if mailboxes.is_empty() {
        println!("No mailboxes in {}", store.root().display());
        return Ok(());
    }
    for mailbox in mailboxes {
        println!(
            "{:<40} {:<40} {} message(s)",
            mailbox.folder, mailbox.address, mailbox.message_count
        );
    }
    Ok(())
}

fn inbox(settings: &Settings, mailbox: &str) -> Result<()> {
    let store = MailboxStore::new(&settings.server.mailbox_dir);
    let messages = store.list_messages(mailbox)?;
    if messages.is_empty() {
        println!("Mailbox is empty");
        return Ok(());
    }

    for (i, entry) in messages.iter().enumerate() {
        match &entry.metadata {
            Some(meta) => println!(
                "{:>3}  {:<19}  {:<30}  {}",
                i + 1,
                meta.timestamp.chars().take(19).collect::<String>(),
                meta.from,
                meta.subject
            ),
            None => println!("{:>3}  {}", i + 1, entry.eml_file),
        }
    }
    Ok(())
}

/// Message number `index` (1-based, as printed by `inbox`)
fn open_message(
    store: &MailboxStore,
    mailbox: &str,
    index: usize,
) -> Result<(MessageEntry, ParsedMessage)> {
    let messages = store.list_messages(mailbox)?;
    let entry = index
        .checked_sub(1)
        .and_then(|i| messages.into_iter().nth(i))
        .with_context(|| format!("No message {index} in {mailbox}"))?;
    let message = store.read_message(&entry)?;
    Ok((entry, message))
}

fn read(settings: &Settings, mailbox: &str, index: usize) -> Result<()> {
    let store = MailboxStore::new(&settings.server.mailbox_dir);
    let (entry, message) = open_message(&store, mailbox, index)?;

    println!("File: {}", entry.eml_path.display());
    println!("From: {}", message.from);
    println!("To: {}", message.to);
    println!("Subject: {}", message.subject);
    if let Some(date) = &message.date {
        println!("Date: {date}");
    }
    println!();
    match &message.body {
        Some(body) if message.body_is_html => println!("[HTML]\n{body}"),
        Some(body) => println!("{body}"),
        None => println!("(no text body)"),
    }

    if !message.attachments.is_empty() {
        println!();
        println!("Attachments:");
        for (i, attachment) in message.attachments.iter().enumerate() {
            println!(
                "{:>3}  {} ({}, {} bytes)",
                i + 1,
                attachment.filename,
                attachment.content_type,
                attachment.data.len()
            );
        }
    }
    Ok(())
}

fn save_attachment(
    settings: &Settings,
    mailbox: &str,
    index: usize,
    attachment: usize,
    dest: &Path,
) -> Result<()> {
    let store = MailboxStore::new(&settings.server.mailbox_dir);
    let (_, message) = open_message(&store, mailbox, index)?;
    let found = attachment
        .checked_sub(1)
        .and_then(|i| message.attachments.get(i))
        .with_context(|| format!("No attachment {attachment} in message {index}"))?;

    // A directory destination keeps the attachment's own name
    let dest = if dest.is_dir() {
        dest.join(found.file_name())
    } else {
        dest.to_path_buf()
    };
    store.save_attachment(found, &dest)?;
    println!("Saved {} to {}", found.filename, dest.display());
    Ok(())
}

fn failures(settings: &Settings, action: FailuresAction) -> Result<()> {
    let status = DeliveryStatus::new(&settings.client.failure_log, &settings.server.failure_log);

    match action {
        FailuresAction::List => {
            let all = status.all();
            if all.is_empty() {
                println!("No failed deliveries");
            }
            for (i, (source, record)) in all.iter().enumerate() {
                let source = match source {
                    FailureSource::Client => "client",
                    FailureSource::Server => "server",
                };
                println!(
                    "{:>3}  {}  [{source}]  {} -> {}  {}",
                    i + 1,
                    record.short_timestamp(),
                    record.sender,
                    record.recipients.join(", "),
                    record.subject
                );
                println!("     {}", record.reason);
            }
            Ok(())
        }
        FailuresAction::Clear => {
            status.clear()?;
            println!("Failure logs cleared");
            Ok(())
        }
        FailuresAction::Retry { index } => {
            let (_, record) = index
                .checked_sub(1)
                .and_then(|i| status.all().into_iter().nth(i))
                .with_context(|| format!("No failed delivery {index}"))?;
            let client = client(
                settings,
                settings.client.default_server_host.clone(),
                settings.client.default_server_port,
            );
            status.retry(&record, &client)?;
            println!(
                "Resent to {} with subject [RETRY] {}",
                record.recipients.join(", "),
                record.subject
            );
            Ok(())
        }
    }
}
