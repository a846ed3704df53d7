//! Basic usage example for the SMTP lab
//!
//! Starts a server that stores mail in a temporary mailbox directory, sends
//! one message through the client and prints what landed in the mailbox.

use smtp_lab::{FailureLog, MailboxDelivery, MailboxStore, OutgoingEmail, SmtpClient, SmtpServer};

fn main() -> anyhow::Result<()> {
    println!("SMTP Lab Basic Usage Example");
    println!("============================");

    let dir = tempfile::tempdir()?;
    let store = MailboxStore::new(dir.path().join("mailboxes"));
    store.ensure_root()?;

    let delivery = MailboxDelivery::new(
        store.clone(),
        FailureLog::open(dir.path().join("server_failures.json")),
    );
    let handle = SmtpServer::new("example.local").spawn("127.0.0.1:0", delivery)?;
    let port = handle.local_addr().port();
    println!("Server listening on {}", handle.local_addr());

    println!("\nSending test email...");
    let client = SmtpClient::new("127.0.0.1", port);
    let email = OutgoingEmail::new(
        "sender@example.com",
        vec![
            "recipient@example.com".to_string(),
            "another@example.com".to_string(),
        ],
        "Test Email from the lab",
        "This is a test email sent to demonstrate\nthe lab server and mailboxes.",
    );
    client.send(&email)?;

    println!("\nMailboxes:");
    for mailbox in store.list_mailboxes()? {
        println!(
            "  {} ({} message(s)) in {}/",
            mailbox.address, mailbox.message_count, mailbox.folder
        );
        for entry in store.list_messages(&mailbox.folder)? {
            let message = store.read_message(&entry)?;
            println!("    From: {}", message.from);
            println!("    Subject: {}", message.subject);
            for line in message.body.as_deref().unwrap_or_default().lines() {
                println!("      {line}");
            }
        }
    }

    Ok(())
}
