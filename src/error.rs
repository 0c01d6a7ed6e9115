use ::aws_cfn_stack::SynthError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeclarationError {
    /// a resource module refused its input. The message is the module's own.
    #[error("Failed to declare '{construct}'\n{message}")]
    Construct { construct: String, message: String },

    #[error("Invalid {variable}: {message}")]
    Config { variable: &'static str, message: String },

    #[error("Failed to read environment\n{0}")]
    Environment(String),

    #[error(transparent)]
    Synth(#[from] SynthError),
}

/// attaches the construct id to the `String` errors that resource modules return.
pub trait ConstructResult<T> {
    fn in_construct(self, construct: &str) -> Result<T, DeclarationError>;
}

impl<T> ConstructResult<T> for Result<T, String> {
    fn in_construct(self, construct: &str) -> Result<T, DeclarationError> {
        self.map_err(|message| DeclarationError::Construct { construct: construct.to_string(), message })
    }
}
