//! Minimal SMTP server engine

pub mod commands;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod response;
pub mod server;
pub mod session;

pub use commands::Command;
pub use envelope::Envelope;
pub use error::{SmtpError, SmtpLimits};
pub use handler::MessageHandler;
pub use response::SmtpResponse;
pub use server::{ServerHandle, SmtpServer};
pub use session::{SmtpSession, SmtpState};
