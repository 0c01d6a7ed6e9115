pub mod config;
pub mod demo_cdk_stack;
pub mod error;
pub mod stack;

pub use config::{DeploymentConfig, Stage};
pub use demo_cdk_stack::DemoCdkStack;
pub use error::DeclarationError;
