pub mod cicd_stack;
pub mod s3_cloudfront_stack;

pub use cicd_stack::{ApprovalSettings, CicdStack, CicdStackProps, GithubInfo, WebEnv};
pub use s3_cloudfront_stack::{AcmProps, BucketRef, BucketStack, BucketStackProps, DistributionRef, Route53Props};

use ::aws_cfn_stack::{tags, Environment, Tag};

use crate::config::Stage;
use crate::error::DeclarationError;

/// every resource that supports tags gets these.
pub(crate) fn stack_tags(project: &str, stage: Stage) -> Vec<Tag> {
    tags(&[("Project", project), ("Stage", stage.as_str())])
}

/// region must be a known region, account (when set) 12 digits.
pub(crate) fn validate_environment(env: &Environment) -> Result<(), DeclarationError> {
    if let Some(message) = aws_regions::verify_region(&env.region) {
        return Err(DeclarationError::Config { variable: "REGION", message });
    }
    let account_ok = env.account.is_empty() || (env.account.len() == 12 && env.account.chars().all(|c| c.is_ascii_digit()));
    if !account_ok {
        return Err(DeclarationError::Config {
            variable: "AWS_ACCOUNT_ID",
            message: format!("{:?} must be 12 digits", env.account),
        });
    }
    Ok(())
}
