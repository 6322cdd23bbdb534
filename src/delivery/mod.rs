//! Message delivery with retry, backoff and durable outcome logging.

mod mailer;

pub use mailer::{backoff_delay, Mailer, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS};
