use ::aws_cfn_stack::{aws_cfn_stack, get_ref, join, App, DeletionPolicy, Environment, StrVal, PSEUDO_ACCOUNT_ID, PSEUDO_PARTITION};
use ::aws_codebuild::{aws_codebuild, log_group_resources, BuildSpec, BuildSpecArtifacts, BuildSpecEnv, Phase, Phases, LOG_ACTIONS};
use ::aws_codepipeline::{aws_codepipeline, Action, ActionKind, Stage as PipelineStage};
use ::aws_iam::{aws_iam, PolicyStatement};
use ::aws_s3::aws_s3;
use serde_json::Value;

use super::{stack_tags, validate_environment, BucketRef, DistributionRef};
use crate::config::Stage;
use crate::error::{ConstructResult, DeclarationError};

pub const SOURCE_ARTIFACT: &str = "SourceOutput";
pub const BUILD_ARTIFACT: &str = "BuildOutput";

#[derive(Debug, Clone, Default)]
pub struct GithubInfo {
    pub owner: String,
    pub repository: String,
    pub branch: String,
}

#[derive(Debug, Clone, Default)]
pub struct WebEnv {
    /// injected into the front-end build as `VUE_APP_BASE_URL`. Not a secret.
    pub base_url: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApprovalSettings {
    /// how long the manual approval waits. None leaves the service default.
    pub timeout_in_minutes: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct CicdStackProps {
    pub env: Environment,
    pub stage: Stage,
    pub project_name: String,
    pub bucket: BucketRef,
    pub github_info: GithubInfo,
    pub connection_arn: String,
    pub web_env: WebEnv,
    pub distribution: DistributionRef,
    pub approval: ApprovalSettings,
}

/// build project, cache invalidation project and the pipeline wiring them together.
pub struct CicdStack {
    pub stack_name: String,
    pub pipeline_name: String,
    pub stage_names: Vec<String>,
}

fn verify_connection_arn(arn: &str) -> Option<String> {
    let parts: Vec<&str> = arn.splitn(6, ':').collect();
    let valid = parts.len() == 6
        && parts[0] == "arn"
        && (parts[2] == "codestar-connections" || parts[2] == "codeconnections")
        && parts[5].starts_with("connection/");
    if valid {
        None
    } else {
        Some(format!("{:?} is not a connection ARN, expected arn:aws:codestar-connections:<region>:<account>:connection/<id>", arn))
    }
}

/// `UseConnection` under the service prefix the connection ARN was issued by.
fn use_connection_action(connection_arn: &str) -> &'static str {
    match connection_arn.split(':').nth(2) {
        Some("codeconnections") => "codeconnections:UseConnection",
        _ => "codestar-connections:UseConnection",
    }
}

fn verify_github_info(github: &GithubInfo, connection_arn: &str) -> Result<(), DeclarationError> {
    let required = [
        ("GITHUB_OWNER", &github.owner),
        ("GITHUB_REPO_FE", &github.repository),
        ("GITHUB_REPO_FE_BRANCH", &github.branch),
    ];
    for (variable, value) in required {
        if value.is_empty() {
            return Err(DeclarationError::Config { variable, message: "must be set".to_string() });
        }
        if value.contains('/') && variable != "GITHUB_REPO_FE_BRANCH" {
            return Err(DeclarationError::Config { variable, message: format!("{:?} cannot contain /", value) });
        }
    }
    if let Some(message) = verify_connection_arn(connection_arn) {
        return Err(DeclarationError::Config { variable: "CONNECTION_ARN", message });
    }
    Ok(())
}

/// `arn:<partition>:s3:::<bucket>/*` for a bucket ARN expression.
fn objects_of(bucket_arn: &Value) -> StrVal {
    StrVal::from(join("", vec![bucket_arn.clone(), Value::String("/*".to_string())]))
}

/// object read/write and listing on exactly the given buckets.
pub(crate) fn bucket_statements(bucket_arns: &[Value]) -> Vec<PolicyStatement> {
    let buckets: Vec<StrVal> = bucket_arns.iter().cloned().map(StrVal::from).collect();
    let objects: Vec<StrVal> = bucket_arns.iter().map(objects_of).collect();
    vec![
        PolicyStatement::allow(&["s3:GetObject", "s3:GetObjectVersion", "s3:PutObject"], objects),
        PolicyStatement::allow(&["s3:ListBucket", "s3:GetBucketLocation"], buckets),
    ]
}

/// `arn:aws:cloudfront::<account>:distribution/<id>`
pub(crate) fn distribution_arn(distribution_id: &Value) -> Value {
    join("", vec![
        Value::String("arn:".to_string()),
        get_ref(PSEUDO_PARTITION),
        Value::String(":cloudfront::".to_string()),
        get_ref(PSEUDO_ACCOUNT_ID),
        Value::String(":distribution/".to_string()),
        distribution_id.clone(),
    ])
}

pub(crate) fn spa_build_spec() -> BuildSpec {
    BuildSpec {
        env: Some(BuildSpecEnv { exported_variables: vec!["REPOSITORY_URI".to_string()] }),
        phases: Phases {
            pre_build: Some(Phase::new(&[
                "npm install -g yarn",
                "echo Build started on `date`",
                "yarn install",
                "echo \"Prepare env\"",
                "touch .env",
                "echo \"VUE_APP_BASE_URL=$VUE_APP_BASE_URL\" >> .env",
                "cat .env",
            ])),
            build: Some(Phase::new(&["yarn build"])),
            post_build: Some(Phase::new(&["echo Build completed on `date`"])),
            ..Default::default()
        },
        artifacts: Some(BuildSpecArtifacts {
            files: vec!["**/*".to_string()],
            base_directory: Some("dist".to_string()),
        }),
        ..Default::default()
    }
}

pub(crate) fn invalidate_build_spec() -> BuildSpec {
    BuildSpec {
        phases: Phases {
            build: Some(Phase::new(&["aws cloudfront create-invalidation --distribution-id ${CLOUDFRONT_ID} --paths \"/*\""])),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub(crate) fn pipeline_stages(props: &CicdStackProps, build_project: Value, invalidate_project: Value) -> Vec<PipelineStage> {
    let github = &props.github_info;
    let source = Action::new("GitHub_Source", ActionKind::CodeStarSource {
        connection_arn: props.connection_arn.clone(),
        full_repository_id: format!("{}/{}", github.owner, github.repository),
        branch: github.branch.clone(),
    }).with_outputs(&[SOURCE_ARTIFACT]);
    let approval = Action::new("BuildApproval", ActionKind::ManualApproval {
        timeout_in_minutes: props.approval.timeout_in_minutes,
    });
    let build = Action::new("Build", ActionKind::CodeBuild { project_name: build_project })
        .with_inputs(&[SOURCE_ARTIFACT])
        .with_outputs(&[BUILD_ARTIFACT]);
    let deploy = Action::new("DeployToS3", ActionKind::S3Deploy { bucket_name: props.bucket.name.clone(), extract: true })
        .with_inputs(&[BUILD_ARTIFACT])
        .with_run_order(1);
    let invalidate = Action::new("InvalidateCache", ActionKind::CodeBuild { project_name: invalidate_project })
        .with_inputs(&[BUILD_ARTIFACT])
        .with_run_order(2);
    vec![
        PipelineStage::new("Source", vec![source]),
        PipelineStage::new("Approve", vec![approval]),
        PipelineStage::new("Build", vec![build]),
        PipelineStage::new("Deploy", vec![deploy, invalidate]),
    ]
}

impl CicdStack {
    pub fn new(scope: &mut App, id: &str, props: CicdStackProps) -> Result<Self, DeclarationError> {
        validate_environment(&props.env)?;
        verify_github_info(&props.github_info, &props.connection_arn)?;

        let mut stack = aws_cfn_stack::Input::new(id, props.env.clone());
        stack.description = Some(format!("{id}: build and release pipeline for {}", props.bucket.bucket_name));
        stack.depends_on.push(props.bucket.stack_name.clone());
        if props.distribution.stack_name != props.bucket.stack_name {
            stack.depends_on.push(props.distribution.stack_name.clone());
        }
        let common_tags = stack_tags(&props.project_name, props.stage);

        let artifacts_id = format!("{id}-artifacts");
        let mut artifacts_input = aws_s3::Input {
            id: artifacts_id.clone(),
            bucket_name: artifacts_id.clone(),
            removal_policy: DeletionPolicy::Delete,
            auto_delete_objects: true,
            encrypted: true,
            tags: common_tags.clone(),
            ..Default::default()
        };
        let artifacts = aws_s3::config(&mut artifacts_input, &mut stack).in_construct(&artifacts_id)?;
        let bucket_arns = [props.bucket.arn.clone(), artifacts.arn()];

        let build_project_name = format!("{id}-codebuild");
        let build_role_id = format!("{id}-codebuild-role");
        let mut build_statements = bucket_statements(&bucket_arns);
        build_statements.push(PolicyStatement::allow(LOG_ACTIONS, log_group_resources(&build_project_name)));
        let mut build_role_input = aws_iam::Input {
            id: build_role_id.clone(),
            role_name: build_role_id.clone(),
            description: Some(format!("lets {build_project_name} read and write the website and artifact buckets")),
            assumed_by: vec!["codebuild.amazonaws.com".to_string(), "codepipeline.amazonaws.com".to_string()],
            statements: build_statements,
            tags: common_tags.clone(),
            ..Default::default()
        };
        let build_role = aws_iam::config(&mut build_role_input, &mut stack).in_construct(&build_role_id)?;

        let mut build_input = aws_codebuild::Input {
            id: build_project_name.clone(),
            project_name: build_project_name.clone(),
            description: Some(format!("builds {}/{}", props.github_info.owner, props.github_info.repository)),
            source: aws_codebuild::Source::GitHub {
                owner: props.github_info.owner.clone(),
                repo: props.github_info.repository.clone(),
            },
            build_spec: spa_build_spec(),
            service_role: build_role.arn(),
            badge: true,
            environment_variables: vec![("VUE_APP_BASE_URL".to_string(), StrVal::from(props.web_env.base_url.as_str()))],
            tags: common_tags.clone(),
            ..Default::default()
        };
        let build_project = aws_codebuild::config(&mut build_input, &mut stack).in_construct(&build_project_name)?;

        let invalidate_project_name = format!("{id}-invalidate-codebuild");
        let invalidate_role_id = format!("{id}-invalidate-role");
        let mut invalidate_statements = vec![
            PolicyStatement::allow(&["cloudfront:CreateInvalidation"], vec![StrVal::from(distribution_arn(&props.distribution.distribution_id))]),
            PolicyStatement::allow(&["s3:GetObject", "s3:GetObjectVersion"], vec![objects_of(&artifacts.arn())]),
        ];
        invalidate_statements.push(PolicyStatement::allow(LOG_ACTIONS, log_group_resources(&invalidate_project_name)));
        let mut invalidate_role_input = aws_iam::Input {
            id: invalidate_role_id.clone(),
            role_name: invalidate_role_id.clone(),
            description: Some(format!("lets {invalidate_project_name} invalidate the distribution cache")),
            assumed_by: vec!["codebuild.amazonaws.com".to_string()],
            statements: invalidate_statements,
            tags: common_tags.clone(),
            ..Default::default()
        };
        let invalidate_role = aws_iam::config(&mut invalidate_role_input, &mut stack).in_construct(&invalidate_role_id)?;

        let mut invalidate_input = aws_codebuild::Input {
            id: invalidate_project_name.clone(),
            project_name: invalidate_project_name.clone(),
            description: Some("invalidates every cached path after a deploy".to_string()),
            source: aws_codebuild::Source::CodePipeline,
            build_spec: invalidate_build_spec(),
            service_role: invalidate_role.arn(),
            environment_variables: vec![("CLOUDFRONT_ID".to_string(), StrVal::from(props.distribution.distribution_id.clone()))],
            tags: common_tags.clone(),
            ..Default::default()
        };
        let invalidate_project = aws_codebuild::config(&mut invalidate_input, &mut stack).in_construct(&invalidate_project_name)?;

        let pipeline_id = format!("{id}-pipeline");
        let pipeline_role_id = format!("{pipeline_id}-role");
        let mut pipeline_statements = vec![
            PolicyStatement::allow(&[use_connection_action(&props.connection_arn)], vec![StrVal::from(props.connection_arn.as_str())]),
            PolicyStatement::allow(
                &["codebuild:StartBuild", "codebuild:BatchGetBuilds"],
                vec![StrVal::from(build_project.arn()), StrVal::from(invalidate_project.arn())],
            ),
        ];
        pipeline_statements.extend(bucket_statements(&bucket_arns));
        let mut pipeline_role_input = aws_iam::Input {
            id: pipeline_role_id.clone(),
            role_name: pipeline_role_id.clone(),
            description: Some(format!("lets {pipeline_id} pull sources, start builds and deploy")),
            assumed_by: vec!["codepipeline.amazonaws.com".to_string()],
            statements: pipeline_statements,
            tags: common_tags.clone(),
            ..Default::default()
        };
        let pipeline_role = aws_iam::config(&mut pipeline_role_input, &mut stack).in_construct(&pipeline_role_id)?;

        let mut pipeline_input = aws_codepipeline::Input {
            id: pipeline_id.clone(),
            pipeline_name: pipeline_id.clone(),
            role_arn: pipeline_role.arn(),
            artifact_bucket: artifacts.name(),
            stages: pipeline_stages(&props, build_project.name(), invalidate_project.name()),
            tags: common_tags,
        };
        let pipeline = aws_codepipeline::config(&mut pipeline_input, &mut stack).in_construct(&pipeline_id)?;

        stack.add_output("PipelineName", "name of the release pipeline", pipeline.name());
        tracing::info!(stack = id, pipeline = %pipeline.pipeline_name, stages = ?pipeline.stage_names, "declared cicd stack");
        scope.add_stack(stack)?;
        Ok(CicdStack {
            stack_name: id.to_string(),
            pipeline_name: pipeline.pipeline_name,
            stage_names: pipeline.stage_names,
        })
    }
}
