mod engine;
mod html;
mod store;

pub use engine::{
    FULLNAME_PLACEHOLDER, ResolvedMessage, Template, TemplateEngine, TemplateWarning,
    sample_recipient,
};
pub use html::mail_safe_html;
pub use store::{DEFAULT_TEMPLATE_NAME, TemplateStore, TemplateStoreError};
