use ::aws_cfn_stack::App;

use crate::config::DeploymentConfig;
use crate::error::DeclarationError;
use crate::stack::{
    AcmProps, ApprovalSettings, BucketStack, BucketStackProps, CicdStack, CicdStackProps, GithubInfo, Route53Props,
    WebEnv,
};

/// the whole deployment: the website stack, and the pipeline that releases into it.
pub struct DemoCdkStack;

impl DemoCdkStack {
    pub fn web_stack_name(config: &DeploymentConfig) -> String {
        format!("{}-web", config.prefix())
    }

    pub fn cicd_stack_name(config: &DeploymentConfig) -> String {
        format!("{}-cicd", config.prefix())
    }

    pub fn build(config: &DeploymentConfig) -> Result<App, DeclarationError> {
        let mut app = App::new();
        let env = config.environment();
        let stage = config.stage();

        let web = BucketStack::new(&mut app, &Self::web_stack_name(config), BucketStackProps {
            env: env.clone(),
            stage,
            project_name: config.project_name.clone(),
            distribution_name: config.distribution_name(),
            certificate_name: config.certificate_name(),
            route53: Route53Props {
                domain_name: config.domain_name.clone(),
                hosted_zone_name: config.hosted_zone_name.clone(),
                hosted_zone_id: config.hosted_zone_id.clone(),
            },
            acm: AcmProps {
                domain_name: config.domain_name.clone(),
                certificate_arn: config.certificate_arn.clone(),
            },
            auto_delete_objects: true,
        })?;

        let cicd = CicdStack::new(&mut app, &Self::cicd_stack_name(config), CicdStackProps {
            env,
            stage,
            project_name: config.project_name.clone(),
            bucket: web.s3_bucket,
            github_info: GithubInfo {
                owner: config.github_owner.clone(),
                repository: config.github_repo_fe.clone(),
                branch: config.github_repo_fe_branch.clone(),
            },
            connection_arn: config.connection_arn.clone(),
            web_env: WebEnv { base_url: config.web_base_url.clone() },
            distribution: web.distribution,
            approval: ApprovalSettings { timeout_in_minutes: config.approval_timeout_minutes },
        })?;

        tracing::debug!(web = %web.stack_name, cicd = %cicd.stack_name, pipeline = %cicd.pipeline_name, "declared deployment");
        Ok(app)
    }
}
