mod input;
mod machine;

pub use input::{ImageRef, InputSource, RawInput, DEFAULT_UPLOAD_FILE_NAME, DEFAULT_UPLOAD_MIME};
pub use machine::{RequestTicket, SessionMachine, SessionState};
