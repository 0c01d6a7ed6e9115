use std::collections::BTreeSet;

use ::aws_cfn_stack::{CfnResource, Tag};
use serde::Serialize;
use serde_json::{Map, Value};

/// manual approvals can wait between 5 minutes and 60 days.
pub const APPROVAL_TIMEOUT_MINUTES: std::ops::RangeInclusive<u32> = 5..=86400;

#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    /// pulls a branch through a CodeStar (GitHub) connection.
    CodeStarSource {
        connection_arn: String,
        /// `owner/repo`
        full_repository_id: String,
        branch: String,
    },
    /// waits for someone to approve in the console.
    ManualApproval { timeout_in_minutes: Option<u32> },
    CodeBuild { project_name: Value },
    /// copies the input artifact into a bucket.
    S3Deploy { bucket_name: Value, extract: bool },
}

impl ActionKind {
    fn category(&self) -> &'static str {
        match self {
            ActionKind::CodeStarSource { .. } => "Source",
            ActionKind::ManualApproval { .. } => "Approval",
            ActionKind::CodeBuild { .. } => "Build",
            ActionKind::S3Deploy { .. } => "Deploy",
        }
    }

    fn provider(&self) -> &'static str {
        match self {
            ActionKind::CodeStarSource { .. } => "CodeStarSourceConnection",
            ActionKind::ManualApproval { .. } => "Manual",
            ActionKind::CodeBuild { .. } => "CodeBuild",
            ActionKind::S3Deploy { .. } => "S3",
        }
    }

    pub fn is_source(&self) -> bool {
        matches!(self, ActionKind::CodeStarSource { .. })
    }

    fn configuration(&self) -> Option<Map<String, Value>> {
        let mut map = Map::new();
        match self {
            ActionKind::CodeStarSource { connection_arn, full_repository_id, branch } => {
                map.insert("ConnectionArn".into(), Value::String(connection_arn.clone()));
                map.insert("FullRepositoryId".into(), Value::String(full_repository_id.clone()));
                map.insert("BranchName".into(), Value::String(branch.clone()));
                map.insert("OutputArtifactFormat".into(), Value::String("CODE_ZIP".into()));
            }
            ActionKind::ManualApproval { .. } => return None,
            ActionKind::CodeBuild { project_name } => {
                map.insert("ProjectName".into(), project_name.clone());
            }
            ActionKind::S3Deploy { bucket_name, extract } => {
                map.insert("BucketName".into(), bucket_name.clone());
                // action configuration values are strings
                map.insert("Extract".into(), Value::String(extract.to_string()));
            }
        }
        Some(map)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub name: String,
    pub kind: ActionKind,
    pub run_order: u32,
    pub input_artifacts: Vec<String>,
    pub output_artifacts: Vec<String>,
}

impl Action {
    pub fn new(name: &str, kind: ActionKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            run_order: 1,
            input_artifacts: vec![],
            output_artifacts: vec![],
        }
    }

    pub fn with_inputs(mut self, artifacts: &[&str]) -> Self {
        self.input_artifacts = artifacts.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_outputs(mut self, artifacts: &[&str]) -> Self {
        self.output_artifacts = artifacts.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_run_order(mut self, run_order: u32) -> Self {
        self.run_order = run_order;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub name: String,
    pub actions: Vec<Action>,
}

impl Stage {
    pub fn new(name: &str, actions: Vec<Action>) -> Self {
        Self { name: name.to_string(), actions }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ActionTypeId {
    category: &'static str,
    owner: &'static str,
    provider: &'static str,
    version: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ArtifactRef {
    name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ActionDeclaration {
    name: String,
    action_type_id: ActionTypeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    configuration: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    input_artifacts: Vec<ArtifactRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    output_artifacts: Vec<ArtifactRef>,
    run_order: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_in_minutes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StageDeclaration {
    name: String,
    actions: Vec<ActionDeclaration>,
}

impl From<&Action> for ActionDeclaration {
    fn from(action: &Action) -> Self {
        let artifact_refs = |names: &[String]| -> Vec<ArtifactRef> { names.iter().map(|n| ArtifactRef { name: n.clone() }).collect() };
        let timeout_in_minutes = match &action.kind {
            ActionKind::ManualApproval { timeout_in_minutes } => *timeout_in_minutes,
            _ => None,
        };
        Self {
            name: action.name.clone(),
            action_type_id: ActionTypeId {
                category: action.kind.category(),
                owner: "AWS",
                provider: action.kind.provider(),
                version: "1",
            },
            configuration: action.kind.configuration(),
            input_artifacts: artifact_refs(&action.input_artifacts),
            output_artifacts: artifact_refs(&action.output_artifacts),
            run_order: action.run_order,
            timeout_in_minutes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArtifactStore {
    #[serde(rename = "Type")]
    pub store_type: String,
    pub location: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CfnPipeline {
    pub name: String,
    pub role_arn: Value,
    pub artifact_store: ArtifactStore,
    pub stages: Vec<Stage>,
    pub tags: Vec<Tag>,
}

pub fn verify_pipeline_name(name: &str) -> Option<String> {
    if name.is_empty() || name.len() > 100 {
        return Some(format!("Invalid pipeline name {:?}\nMust be between 1 and 100 characters", name));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || ".@-_".contains(c)) {
        return Some(format!("Invalid pipeline name {:?}\nMay only contain alphanumeric characters and .@-_", name));
    }
    None
}

fn validate_action(stage: &str, action: &Action) -> Result<(), String> {
    if action.name.is_empty() {
        return Err(format!("Stage {} has an action without a name", stage));
    }
    if !(1..=999).contains(&action.run_order) {
        return Err(format!("Action {} has run order {}\nMust be between 1 and 999", action.name, action.run_order));
    }
    match &action.kind {
        ActionKind::CodeStarSource { connection_arn, full_repository_id, branch } => {
            if !action.input_artifacts.is_empty() || action.output_artifacts.len() != 1 {
                return Err(format!("Source action {} must have no inputs and exactly 1 output", action.name));
            }
            if connection_arn.is_empty() || branch.is_empty() {
                return Err(format!("Source action {} must have a connection and a branch", action.name));
            }
            let mut parts = full_repository_id.split('/');
            let valid_repo = matches!((parts.next(), parts.next(), parts.next()), (Some(o), Some(r), None) if !o.is_empty() && !r.is_empty());
            if !valid_repo {
                return Err(format!("Source action {} has repository {:?}\nMust be owner/repo", action.name, full_repository_id));
            }
        }
        ActionKind::ManualApproval { timeout_in_minutes } => {
            if let Some(t) = timeout_in_minutes {
                if !APPROVAL_TIMEOUT_MINUTES.contains(t) {
                    return Err(format!("Approval {} has timeout {} minutes\nMust be between 5 and 86400", action.name, t));
                }
            }
            if !action.input_artifacts.is_empty() || !action.output_artifacts.is_empty() {
                return Err(format!("Approval {} cannot consume or produce artifacts", action.name));
            }
        }
        ActionKind::CodeBuild { .. } => {
            if action.input_artifacts.is_empty() {
                return Err(format!("Build action {} must have an input artifact", action.name));
            }
        }
        ActionKind::S3Deploy { .. } => {
            if action.input_artifacts.len() != 1 || !action.output_artifacts.is_empty() {
                return Err(format!("Deploy action {} must have exactly 1 input and no outputs", action.name));
            }
        }
    }
    Ok(())
}

/// checks the shape of a pipeline: sources only in the first stage, unique
/// names, and every input artifact produced by an earlier stage or by an
/// earlier run order of the same stage.
pub fn validate_stages(stages: &[Stage]) -> Result<(), String> {
    if stages.len() < 2 {
        return Err("Pipeline must have at least 2 stages".to_string());
    }
    let mut stage_names = BTreeSet::new();
    let mut action_names = BTreeSet::new();
    let mut produced: BTreeSet<&str> = BTreeSet::new();
    for (i, stage) in stages.iter().enumerate() {
        if stage.name.is_empty() {
            return Err(format!("Stage {} must have a name", i + 1));
        }
        if !stage_names.insert(stage.name.as_str()) {
            return Err(format!("Stage name {} is used twice", stage.name));
        }
        if stage.actions.is_empty() {
            return Err(format!("Stage {} must have at least 1 action", stage.name));
        }
        let first = i == 0;
        for action in stage.actions.iter() {
            validate_action(&stage.name, action)?;
            if !action_names.insert(action.name.as_str()) {
                return Err(format!("Action name {} is used twice", action.name));
            }
            if first != action.kind.is_source() {
                return Err(format!("Action {} in stage {}: source actions must be, and only be, in the first stage", action.name, stage.name));
            }
        }

        let mut run_orders: Vec<u32> = stage.actions.iter().map(|a| a.run_order).collect();
        run_orders.sort_unstable();
        run_orders.dedup();
        for run_order in run_orders {
            let tier = stage.actions.iter().filter(|a| a.run_order == run_order);
            for action in tier.clone() {
                if let Some(missing) = action.input_artifacts.iter().find(|a| !produced.contains(a.as_str())) {
                    return Err(format!("Action {} consumes artifact {} before anything produces it", action.name, missing));
                }
            }
            for action in tier {
                for output in action.output_artifacts.iter() {
                    if !produced.insert(output.as_str()) {
                        return Err(format!("Artifact {} is produced twice", output));
                    }
                }
            }
        }
    }
    Ok(())
}

impl CfnResource for CfnPipeline {
    fn type_string(&self) -> &'static str {
        "AWS::CodePipeline::Pipeline"
    }
    fn properties(&self) -> serde_json::Result<Value> {
        let stages: Vec<StageDeclaration> = self.stages.iter().map(|s| StageDeclaration {
            name: s.name.clone(),
            actions: s.actions.iter().map(ActionDeclaration::from).collect(),
        }).collect();
        let mut map = Map::new();
        map.insert("Name".into(), Value::String(self.name.clone()));
        map.insert("RoleArn".into(), self.role_arn.clone());
        map.insert("ArtifactStore".into(), serde_json::to_value(&self.artifact_store)?);
        map.insert("Stages".into(), serde_json::to_value(stages)?);
        if !self.tags.is_empty() {
            map.insert("Tags".into(), serde_json::to_value(&self.tags)?);
        }
        Ok(Value::Object(map))
    }
    fn validate(&self) -> Result<(), String> {
        if let Some(e) = verify_pipeline_name(&self.name) {
            return Err(e);
        }
        validate_stages(&self.stages)
    }
}

/// a staged release pipeline. Stages run in the given order and a failing
/// stage stops the pipeline, within a stage actions run by ascending run order.
pub mod aws_codepipeline {
    use ::aws_cfn_stack::{aws_cfn_stack, logical_id, Resource, Tag};
    use serde_json::Value;

    use super::{validate_stages, ArtifactStore, CfnPipeline, Stage};

    pub mod outputs {
        use ::aws_cfn_stack::get_ref;
        use serde_json::Value;

        pub struct Outputs {
            pub logical_pipeline_name: String,
            pub pipeline_name: String,
            pub stage_names: Vec<String>,
        }

        impl Outputs {
            pub fn name(&self) -> Value {
                get_ref(&self.logical_pipeline_name)
            }
        }
    }

    #[derive(Default)]
    pub struct Input {
        /// construct id, used to derive the logical name.
        pub id: String,
        pub pipeline_name: String,
        pub role_arn: Value,
        /// bucket that carries artifacts between stages.
        pub artifact_bucket: Value,
        pub stages: Vec<Stage>,
        pub tags: Vec<Tag>,
    }

    pub fn config(myinput: &mut Input, stackinp: &mut aws_cfn_stack::Input) -> Result<outputs::Outputs, String> {
        if myinput.id.is_empty() {
            return Err("Pipeline must have a construct id".to_string());
        }
        if myinput.role_arn.is_null() || myinput.artifact_bucket.is_null() {
            return Err(format!("Pipeline {} must have a role and an artifact bucket", myinput.id));
        }
        validate_stages(&myinput.stages).map_err(|e| format!("Pipeline {}: {}", myinput.id, e))?;
        let pipeline = CfnPipeline {
            name: myinput.pipeline_name.clone(),
            role_arn: myinput.role_arn.clone(),
            artifact_store: ArtifactStore {
                store_type: "S3".to_string(),
                location: myinput.artifact_bucket.clone(),
            },
            stages: std::mem::take(&mut myinput.stages),
            tags: myinput.tags.clone(),
        };
        let stage_names = pipeline.stages.iter().map(|s| s.name.clone()).collect();
        let logical_pipeline_name = logical_id(&[&myinput.id]);
        stackinp.add_resource(Resource::new(logical_pipeline_name.clone(), pipeline));
        Ok(outputs::Outputs {
            logical_pipeline_name,
            pipeline_name: myinput.pipeline_name.clone(),
            stage_names,
        })
    }
}
