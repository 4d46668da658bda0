//! Redirection-aware routing: intent classification, redirect parsing and
//! the redirecting writer that ties them together.

mod envelope;
mod intent;
mod redirect;
mod writer;

pub use envelope::Envelope;
pub use intent::{is_write_command, Intent};
pub use redirect::RedirectSignal;
pub use writer::RedirectingWriter;
