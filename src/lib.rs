pub mod configuration;
pub mod dispatch;
pub mod domain;
pub mod importer;
pub mod mail_client;
pub mod progress;
pub mod startup;
pub mod telemetry;
pub mod template;
