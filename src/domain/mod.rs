mod recipient_email;
mod recipient_name;
mod recipient_record;

pub use recipient_email::RecipientEmail;
pub use recipient_name::RecipientName;
pub use recipient_record::{ErrorKind, FailureReason, RecipientRecord, RecipientStatus};
