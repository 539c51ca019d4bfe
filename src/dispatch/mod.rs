mod campaign;
mod engine;
mod retry;

pub use engine::{CampaignHandle, CampaignOutcome, DispatchEngine, DispatchError};
pub use retry::RetryPolicy;
