//! What the server does with a completed message

use crate::smtp::envelope::Envelope;
use crate::smtp::response::SmtpResponse;

use std::sync::mpsc;

/// Receives each message at the end of DATA and decides the final reply.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, envelope: Envelope) -> SmtpResponse;
}

/// Forwards messages to a channel and always accepts them.
///
/// Send errors (no receiver left) are ignored.
impl MessageHandler for mpsc::Sender<Envelope> {
    fn handle(&self, envelope: Envelope) -> SmtpResponse {
        let _ = self.send(envelope);
        SmtpResponse::ok()
    }
}
