use std::fmt;
use std::path::Path;

use ::aws_cfn_stack::Environment;
use ::dotenv_reader::{dotenv_reader, EnvSource};

use crate::error::DeclarationError;

pub const DEFAULT_PROJECT_NAME: &str = "demo-cdk";
pub const DEFAULT_STAGE: &str = "dev";
pub const DEFAULT_REGION: &str = "ap-southeast-1";
pub const DEFAULT_BRANCH: &str = "main";
pub const CIDR_BLOCK: &str = "10.128.0.0/16";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Dev,
    Prod,
}

impl Stage {
    /// `prod` is production, anything else is treated as a dev stage.
    pub fn from_label(label: &str) -> Self {
        if label.eq_ignore_ascii_case("prod") {
            Stage::Prod
        } else {
            Stage::Dev
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Dev => "dev",
            Stage::Prod => "prod",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// everything a deployment is parameterized by. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentConfig {
    pub project_name: String,
    /// raw, lower-cased. Used verbatim in the prefix.
    pub stage_label: String,
    pub aws_account_id: String,
    pub region: String,
    pub domain_name: String,
    pub hosted_zone_name: String,
    pub hosted_zone_id: String,
    pub certificate_arn: String,
    pub github_owner: String,
    pub github_repo_fe: String,
    pub github_repo_fe_branch: String,
    pub connection_arn: String,
    pub web_base_url: String,
    pub approval_timeout_minutes: Option<u32>,
}

fn value_or<S: EnvSource + ?Sized>(source: &S, name: &str, default: &str) -> String {
    let value = source.get_env(name);
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

/// reads every recognized variable from `source`. Empty values count as unset.
pub fn resolve<S: EnvSource + ?Sized>(source: &S) -> DeploymentConfig {
    let github_owner = value_or(source, "GITHUB_OWNER", &source.get_env("GITHUB_USERNAME"));
    let timeout = source.get_env("APPROVAL_TIMEOUT_MINUTES");
    let approval_timeout_minutes = if timeout.is_empty() {
        None
    } else {
        match timeout.trim().parse::<u32>() {
            Ok(minutes) => Some(minutes),
            Err(_) => {
                tracing::warn!(value = %timeout, "ignoring APPROVAL_TIMEOUT_MINUTES, not a number of minutes");
                None
            }
        }
    };
    DeploymentConfig {
        project_name: value_or(source, "PROJECT_NAME", DEFAULT_PROJECT_NAME).to_lowercase(),
        stage_label: value_or(source, "STAGE", DEFAULT_STAGE).to_lowercase(),
        aws_account_id: source.get_env("AWS_ACCOUNT_ID"),
        region: value_or(source, "REGION", DEFAULT_REGION),
        domain_name: source.get_env("DOMAIN_NAME"),
        hosted_zone_name: source.get_env("HOSTED_ZONE_NAME"),
        hosted_zone_id: source.get_env("HOSTED_ZONE_ID"),
        certificate_arn: source.get_env("CERTIFICATE_ARN"),
        github_owner,
        github_repo_fe: source.get_env("GITHUB_REPO_FE"),
        github_repo_fe_branch: value_or(source, "GITHUB_REPO_FE_BRANCH", DEFAULT_BRANCH),
        connection_arn: source.get_env("CONNECTION_ARN"),
        web_base_url: source.get_env("WEB_BASE_URL"),
        approval_timeout_minutes,
    }
}

impl DeploymentConfig {
    /// the process environment layered over the `.env` file at `dotenv_path`.
    /// Variables already set in the process win.
    pub fn from_env(dotenv_path: impl AsRef<Path>) -> Result<Self, DeclarationError> {
        let input = dotenv_reader::Input { dotenv_path: dotenv_path.as_ref().to_path_buf() };
        let source = dotenv_reader::config(&input).map_err(DeclarationError::Environment)?;
        Ok(resolve(&source))
    }

    pub fn stage(&self) -> Stage {
        Stage::from_label(&self.stage_label)
    }

    pub fn prefix(&self) -> String {
        format!("{}-{}", self.project_name, self.stage_label)
    }

    pub fn bucket_name(&self) -> String {
        format!("{}-bucket", self.prefix())
    }

    pub fn vpc_name(&self) -> String {
        format!("{}-vpc", self.prefix())
    }

    pub fn distribution_name(&self) -> String {
        format!("{}-distribution", self.prefix())
    }

    pub fn certificate_name(&self) -> String {
        format!("{}-certificate", self.prefix())
    }

    pub fn cidr_block(&self) -> &'static str {
        CIDR_BLOCK
    }

    pub fn environment(&self) -> Environment {
        Environment {
            account: self.aws_account_id.clone(),
            region: self.region.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_for_unset_variables() {
        let config = resolve(&env(&[]));
        assert_eq!(config.project_name, "demo-cdk");
        assert_eq!(config.stage_label, "dev");
        assert_eq!(config.region, "ap-southeast-1");
        assert_eq!(config.github_repo_fe_branch, "main");
        assert_eq!(config.aws_account_id, "");
        assert_eq!(config.domain_name, "");
        assert_eq!(config.certificate_arn, "");
        assert_eq!(config.approval_timeout_minutes, None);
        assert_eq!(config.prefix(), "demo-cdk-dev");
        assert_eq!(config.stage(), Stage::Dev);
    }

    #[test]
    fn empty_values_count_as_unset() {
        let config = resolve(&env(&[("PROJECT_NAME", ""), ("REGION", ""), ("GITHUB_REPO_FE_BRANCH", "")]));
        assert_eq!(config.project_name, "demo-cdk");
        assert_eq!(config.region, "ap-southeast-1");
        assert_eq!(config.github_repo_fe_branch, "main");
    }

    #[test]
    fn project_and_stage_are_lower_cased() {
        let config = resolve(&env(&[("PROJECT_NAME", "Acme"), ("STAGE", "PROD")]));
        assert_eq!(config.prefix(), "acme-prod");
        assert_eq!(config.stage(), Stage::Prod);
    }

    #[test]
    fn unknown_stage_is_dev_but_keeps_its_label() {
        let config = resolve(&env(&[("PROJECT_NAME", "acme"), ("STAGE", "qa")]));
        assert_eq!(config.stage(), Stage::Dev);
        assert_eq!(config.prefix(), "acme-qa");
    }

    #[test]
    fn derived_names() {
        let config = resolve(&env(&[("PROJECT_NAME", "acme"), ("STAGE", "prod")]));
        assert_eq!(config.bucket_name(), "acme-prod-bucket");
        assert_eq!(config.vpc_name(), "acme-prod-vpc");
        assert_eq!(config.distribution_name(), "acme-prod-distribution");
        assert_eq!(config.certificate_name(), "acme-prod-certificate");
        assert_eq!(config.cidr_block(), "10.128.0.0/16");
        for name in [config.bucket_name(), config.vpc_name(), config.distribution_name(), config.certificate_name()] {
            assert!(name.starts_with(&config.prefix()));
        }
    }

    #[test]
    fn github_owner_falls_back_to_username() {
        assert_eq!(resolve(&env(&[("GITHUB_USERNAME", "octo")])).github_owner, "octo");
        assert_eq!(resolve(&env(&[("GITHUB_USERNAME", "octo"), ("GITHUB_OWNER", "acme-org")])).github_owner, "acme-org");
    }

    #[test]
    fn approval_timeout_is_parsed_leniently() {
        assert_eq!(resolve(&env(&[("APPROVAL_TIMEOUT_MINUTES", "60")])).approval_timeout_minutes, Some(60));
        assert_eq!(resolve(&env(&[("APPROVAL_TIMEOUT_MINUTES", "soon")])).approval_timeout_minutes, None);
    }

    #[test]
    fn environment_places_stacks() {
        let config = resolve(&env(&[("AWS_ACCOUNT_ID", "123456789012"), ("REGION", "us-east-1")]));
        let e = config.environment();
        assert_eq!(e.account, "123456789012");
        assert_eq!(e.region, "us-east-1");
    }

    #[test]
    fn from_env_reads_dotenv_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(".env");
        std::fs::write(&path, "DEMO_CDK_TEST_ONLY_UNUSED=1\n").expect("write");
        assert!(DeploymentConfig::from_env(&path).is_ok());
        assert!(DeploymentConfig::from_env(dir.path().join("missing.env")).is_ok());
    }
}
