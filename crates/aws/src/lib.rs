pub mod client;
pub mod schema;
pub mod settings;

pub use client::IotDirectory;
pub use schema::{AwsProvider, IotResource};
pub use settings::AwsSettings;
