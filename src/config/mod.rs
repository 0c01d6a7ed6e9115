pub mod env;

pub use env::{DeploymentConfig, Stage};
