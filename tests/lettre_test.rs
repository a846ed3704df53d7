//! Client to server to mailbox, through lettre's SMTP transport

use smtp_lab::smtp::SmtpResponse;
use smtp_lab::{
    ClientError, DeliveryStatus, Envelope, FailureLog, MailboxDelivery, MailboxStore,
    MessageHandler, OutgoingEmail, ServerHandle, SmtpClient, SmtpServer, ValidationError,
};
use std::net::TcpListener;
use std::path::PathBuf;
use tempfile::TempDir;

struct Lab {
    dir: TempDir,
    store: MailboxStore,
    handle: ServerHandle,
}

impl Lab {
    fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = MailboxStore::new(dir.path().join("mailboxes"));
        let delivery = MailboxDelivery::new(store.clone(), FailureLog::open(server_log(&dir)));
        let handle = SmtpServer::new("lab.local")
            .spawn("127.0.0.1:0", delivery)
            .unwrap();
        Self { dir, store, handle }
    }

    fn client(&self) -> SmtpClient {
        SmtpClient::new("127.0.0.1", self.handle.local_addr().port())
            .with_failure_log(FailureLog::open(self.client_log()))
    }

    fn client_log(&self) -> PathBuf {
        self.dir.path().join("client_failures.json")
    }

    fn file(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }
}

fn server_log(dir: &TempDir) -> PathBuf {
    dir.path().join("server_failures.json")
}

fn normalized(body: &str) -> String {
    body.replace("\r\n", "\n").trim_end().to_string()
}

#[test]
fn sent_message_appears_in_mailbox() {
    let lab = Lab::start();
    let email = OutgoingEmail::new(
        "alice@example.com",
        vec!["bob@example.com".to_string(), "carol@example.com".to_string()],
        "Café ☕ meeting",
        "Hi both,\n\n.see you at noon\nGrüße",
    );

    lab.client().send(&email).unwrap();

    for recipient in ["bob@example.com", "carol@example.com"] {
        let entries = lab.store.list_messages(recipient).unwrap();
        assert_eq!(entries.len(), 1);

        let metadata = entries[0].metadata.as_ref().unwrap();
        assert_eq!(metadata.from, "alice@example.com");
        assert_eq!(metadata.to, recipient);
        assert_eq!(metadata.subject, "Café ☕ meeting");

        let message = lab.store.read_message(&entries[0]).unwrap();
        assert_eq!(message.from, "alice@example.com");
        assert_eq!(message.subject, "Café ☕ meeting");
        assert!(message.to.contains(recipient));
        assert_eq!(normalized(message.body.as_deref().unwrap()), email.body);
        assert!(message.attachments.is_empty());
    }

    assert!(!lab.client_log().exists());
    assert!(!server_log(&lab.dir).exists());
}

#[test]
fn attachments_round_trip() {
    let lab = Lab::start();
    let image: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    let notes = lab.file("notes.txt", b"lab notes");
    let picture = lab.file("diagram.png", &image);

    let email = OutgoingEmail::new(
        "alice@example.com",
        vec!["bob@example.com".to_string()],
        "Files",
        "Two files attached",
    )
    .attach(&notes)
    .attach(&picture);
    lab.client().send(&email).unwrap();

    let entry = &lab.store.list_messages("bob@example.com").unwrap()[0];
    let message = lab.store.read_message(entry).unwrap();
    assert_eq!(normalized(message.body.as_deref().unwrap()), "Two files attached");
    assert_eq!(message.attachments.len(), 2);

    let text = &message.attachments[0];
    assert_eq!(text.filename, "notes.txt");
    assert_eq!(text.content_type, "text/plain");
    assert_eq!(String::from_utf8_lossy(&text.data).trim_end(), "lab notes");

    let png = &message.attachments[1];
    assert_eq!(png.filename, "diagram.png");
    assert_eq!(png.content_type, "image/png");
    assert_eq!(png.data, image);

    let saved = lab.dir.path().join("saved.png");
    lab.store.save_attachment(png, &saved).unwrap();
    assert_eq!(std::fs::read(&saved).unwrap(), image);
}

#[test]
fn invalid_address_rejected_before_send() {
    let lab = Lab::start();
    let email = OutgoingEmail::new(
        "alice@example.com",
        vec!["bob@localhost".to_string()],
        "Hello",
        "body",
    );

    let err = lab.client().send(&email).unwrap_err();
    assert!(matches!(
        err,
        ClientError::Validation(ValidationError::DomainWithoutDot(_))
    ));
    assert!(lab.store.list_mailboxes().unwrap().is_empty());
    assert!(!lab.client_log().exists());
}

#[test]
fn disallowed_attachment_rejected_before_send() {
    let lab = Lab::start();
    let script = lab.file("run.sh", b"echo hi");
    let email = OutgoingEmail::new(
        "alice@example.com",
        vec!["bob@example.com".to_string()],
        "Script",
        "body",
    )
    .attach(&script);

    let err = lab.client().send(&email).unwrap_err();
    assert!(matches!(
        err,
        ClientError::Validation(ValidationError::ExtensionNotAllowed(_))
    ));
}

#[test]
fn occupied_port_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, _rx) = std::sync::mpsc::channel::<Envelope>();

    let err = SmtpServer::new("lab.local").spawn(addr, tx).unwrap_err();
    assert!(err.is_address_in_use());
}

#[test]
fn send_to_stopped_server_is_refused_and_logged() {
    let mut lab = Lab::start();
    lab.handle.stop().unwrap();

    let email = OutgoingEmail::new(
        "alice@example.com",
        vec!["bob@example.com".to_string()],
        "Nobody home",
        "body",
    );
    let err = lab.client().send(&email).unwrap_err();
    assert!(err.is_connection_refused(), "unexpected error: {err}");

    let log = FailureLog::open(lab.client_log());
    assert_eq!(log.records().len(), 1);
    let record = &log.records()[0];
    assert_eq!(record.sender, "alice@example.com");
    assert_eq!(record.recipients, ["bob@example.com"]);
    assert_eq!(record.subject, "Nobody home");
    assert!(record.reason.starts_with("Connection refused"));
}

#[test]
fn server_rejection_is_reported_and_logged() {
    struct Reject;
    impl MessageHandler for Reject {
        fn handle(&self, _envelope: Envelope) -> SmtpResponse {
            SmtpResponse::rejected("Mailbox unavailable")
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("client_failures.json");
    let handle = SmtpServer::new("lab.local")
        .spawn("127.0.0.1:0", Reject)
        .unwrap();
    let client = SmtpClient::new("127.0.0.1", handle.local_addr().port())
        .with_failure_log(FailureLog::open(&log_path));

    let email = OutgoingEmail::new(
        "alice@example.com",
        vec!["bob@example.com".to_string()],
        "Bounce",
        "body",
    );
    let err = client.send(&email).unwrap_err();
    assert!(matches!(err, ClientError::Rejected(_)), "unexpected error: {err}");
    assert_eq!(FailureLog::open(&log_path).records().len(), 1);
}

#[test]
fn retry_resends_failed_delivery() {
    let lab = Lab::start();
    let mut log = FailureLog::open(lab.client_log());
    log.record(
        "alice@example.com",
        &["bob@example.com".to_string()],
        "Weekly report",
        "Connection refused",
    )
    .unwrap();

    let status = DeliveryStatus::new(lab.client_log(), server_log(&lab.dir));
    let (_, record) = status.all().into_iter().next().unwrap();
    status.retry(&record, &lab.client()).unwrap();

    let entry = &lab.store.list_messages("bob@example.com").unwrap()[0];
    let message = lab.store.read_message(entry).unwrap();
    assert_eq!(message.subject, "[RETRY] Weekly report");
    assert_eq!(
        normalized(message.body.as_deref().unwrap()),
        smtp_lab::failures::RETRY_BODY
    );
}

#[test]
fn connection_test() {
    let mut lab = Lab::start();
    assert!(lab.client().test_connection());

    lab.handle.stop().unwrap();
    assert!(!lab.client().test_connection());
}
