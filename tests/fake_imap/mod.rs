//! Fake IMAP server for integration testing
//!
//! An in-process IMAP server that speaks enough of the protocol to
//! test `ImapConnection` and `MailListener` end-to-end, over STARTTLS
//! or implicit TLS, with or without the IDLE and MOVE extensions.
//!
//! ## Module layout
//!
//! - `server` -- TCP listener, TLS setup, and command dispatch
//! - `handlers/` -- one file per IMAP command (or command pair)
//! - `mailbox` -- test data model (folders, emails, flags, builder)
//! - `io` -- shared write helpers


pub use handlers::{PASSWORD, USERNAME};
pub use mailbox::MailboxBuilder;
pub use server::{FakeImapServer, ServerOptions};
