use ::aws_cfn_stack::{sub, CfnResource, StrVal, Tag};
use serde::Serialize;
use serde_json::Value;

pub const STANDARD_7_0: &str = "aws/codebuild/standard:7.0";
pub const BUILD_GENERAL1_SMALL: &str = "BUILD_GENERAL1_SMALL";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Phase {
    pub commands: Vec<String>,
}

impl Phase {
    pub fn new(commands: &[&str]) -> Self {
        Self { commands: commands.iter().map(|c| c.to_string()).collect() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Phases {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_build: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_build: Option<Phase>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildSpecEnv {
    #[serde(rename = "exported-variables", skip_serializing_if = "Vec::is_empty")]
    pub exported_variables: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildSpecArtifacts {
    pub files: Vec<String>,
    #[serde(rename = "base-directory", skip_serializing_if = "Option::is_none")]
    pub base_directory: Option<String>,
}

/// the instructions codebuild runs, see
/// https://docs.aws.amazon.com/codebuild/latest/userguide/build-spec-ref.html
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildSpec {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<BuildSpecEnv>,
    pub phases: Phases,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<BuildSpecArtifacts>,
}

impl Default for BuildSpec {
    fn default() -> Self {
        Self {
            version: "0.2".to_string(),
            env: None,
            phases: Phases::default(),
            artifacts: None,
        }
    }
}

impl BuildSpec {
    pub fn is_empty(&self) -> bool {
        let p = &self.phases;
        p.install.is_none() && p.pre_build.is_none() && p.build.is_none() && p.post_build.is_none()
    }

    /// codebuild takes the build spec inline as a string. JSON is valid YAML.
    pub fn to_inline(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceTypeEnum {
    #[serde(rename = "GITHUB")]
    Github,
    #[serde(rename = "CODEPIPELINE")]
    Codepipeline,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProjectSource {
    #[serde(rename = "Type")]
    pub source_type: SourceTypeEnum,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub build_spec: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArtifactsTypeEnum {
    #[serde(rename = "NO_ARTIFACTS")]
    NoArtifacts,
    #[serde(rename = "CODEPIPELINE")]
    Codepipeline,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectArtifacts {
    #[serde(rename = "Type")]
    pub artifacts_type: ArtifactsTypeEnum,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentVariable {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Type")]
    pub variable_type: String,
    #[serde(rename = "Value")]
    pub value: StrVal,
}

impl EnvironmentVariable {
    /// build-time parameters only, never credentials.
    pub fn plaintext(name: &str, value: StrVal) -> Self {
        Self { name: name.to_string(), variable_type: "PLAINTEXT".to_string(), value }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProjectEnvironment {
    #[serde(rename = "Type")]
    pub environment_type: String,
    pub image: String,
    pub compute_type: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub environment_variables: Vec<EnvironmentVariable>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnProject {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub service_role: Value,
    pub source: ProjectSource,
    pub artifacts: ProjectArtifacts,
    pub environment: ProjectEnvironment,
    pub badge_enabled: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

pub fn verify_project_name(name: &str) -> Option<String> {
    if name.len() < 2 || name.len() > 255 {
        return Some(format!("Invalid project name {:?}\nMust be between 2 and 255 characters", name));
    }
    let first_ok = name.chars().next().map_or(false, |c| c.is_ascii_alphanumeric());
    let rest_ok = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !first_ok || !rest_ok {
        return Some(format!("Invalid project name {:?}\nMust start with a letter or number and contain only letters, numbers, - and _", name));
    }
    None
}

impl CfnResource for CfnProject {
    fn type_string(&self) -> &'static str {
        "AWS::CodeBuild::Project"
    }
    fn properties(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
    fn validate(&self) -> Result<(), String> {
        if let Some(e) = verify_project_name(&self.name) {
            return Err(e);
        }
        if self.source.build_spec.is_empty() {
            return Err(format!("Project {} must have a build spec", self.name));
        }
        if self.badge_enabled && self.source.source_type == SourceTypeEnum::Codepipeline {
            return Err(format!("Project {} cannot have a badge when its source is a pipeline", self.name));
        }
        let mut seen = std::collections::BTreeSet::new();
        for var in self.environment.environment_variables.iter() {
            if var.name.is_empty() || var.name.starts_with("CODEBUILD_") {
                return Err(format!("Invalid environment variable name {:?} in project {}", var.name, self.name));
            }
            if !seen.insert(var.name.as_str()) {
                return Err(format!("Environment variable {} is set twice in project {}", var.name, self.name));
            }
        }
        Ok(())
    }
}

/// the log group (and its streams) codebuild writes a project's build logs to.
pub fn log_group_resources(project_name: &str) -> Vec<StrVal> {
    let group = format!("arn:${{AWS::Partition}}:logs:${{AWS::Region}}:${{AWS::AccountId}}:log-group:/aws/codebuild/{project_name}");
    vec![StrVal::from(sub(&group)), StrVal::from(sub(&format!("{group}:*")))]
}

pub const LOG_ACTIONS: &[&str] = &["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"];

/// a codebuild project that either pulls straight from github, or gets its
/// source handed over by a pipeline.
pub mod aws_codebuild {
    use ::aws_cfn_stack::{aws_cfn_stack, logical_id, Resource, StrVal, Tag};
    use serde_json::Value;

    use super::{
        ArtifactsTypeEnum, BuildSpec, CfnProject, EnvironmentVariable, ProjectArtifacts, ProjectEnvironment,
        ProjectSource, SourceTypeEnum, BUILD_GENERAL1_SMALL, STANDARD_7_0,
    };

    pub mod outputs {
        use ::aws_cfn_stack::{get_att, get_ref};
        use serde_json::Value;

        pub struct Outputs {
            pub logical_project_name: String,
            pub project_name: String,
        }

        impl Outputs {
            pub fn name(&self) -> Value {
                get_ref(&self.logical_project_name)
            }
            pub fn arn(&self) -> Value {
                get_att(&self.logical_project_name, "Arn")
            }
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum Source {
        GitHub { owner: String, repo: String },
        CodePipeline,
    }

    pub struct Input {
        /// construct id, used to derive the logical name.
        pub id: String,
        pub project_name: String,
        pub description: Option<String>,
        pub source: Source,
        pub build_spec: BuildSpec,
        /// arn of the role codebuild assumes.
        pub service_role: Value,
        pub badge: bool,
        pub image: String,
        pub compute_type: String,
        pub environment_variables: Vec<(String, StrVal)>,
        pub tags: Vec<Tag>,
    }

    impl Default for Input {
        fn default() -> Self {
            Self {
                id: String::new(),
                project_name: String::new(),
                description: None,
                source: Source::CodePipeline,
                build_spec: BuildSpec::default(),
                service_role: Value::Null,
                badge: false,
                image: STANDARD_7_0.to_string(),
                compute_type: BUILD_GENERAL1_SMALL.to_string(),
                environment_variables: vec![],
                tags: vec![],
            }
        }
    }

    pub fn config(myinput: &mut Input, stackinp: &mut aws_cfn_stack::Input) -> Result<outputs::Outputs, String> {
        if myinput.id.is_empty() {
            return Err("Project must have a construct id".to_string());
        }
        if myinput.service_role.is_null() {
            return Err(format!("Project {} must have a service role", myinput.id));
        }
        if myinput.build_spec.is_empty() {
            return Err(format!("Project {} must have at least 1 build phase", myinput.id));
        }
        let build_spec = myinput.build_spec.to_inline()
            .map_err(|e| format!("Failed to serialize build spec of {}\n{}", myinput.id, e))?;
        let (source, artifacts_type) = match &myinput.source {
            Source::GitHub { owner, repo } => {
                if owner.is_empty() || repo.is_empty() {
                    return Err(format!("Project {} must have a github owner and repository", myinput.id));
                }
                let source = ProjectSource {
                    source_type: SourceTypeEnum::Github,
                    location: Some(format!("https://github.com/{owner}/{repo}.git")),
                    build_spec,
                };
                (source, ArtifactsTypeEnum::NoArtifacts)
            }
            Source::CodePipeline => {
                let source = ProjectSource {
                    source_type: SourceTypeEnum::Codepipeline,
                    location: None,
                    build_spec,
                };
                (source, ArtifactsTypeEnum::Codepipeline)
            }
        };
        let project = CfnProject {
            name: myinput.project_name.clone(),
            description: myinput.description.clone(),
            service_role: myinput.service_role.clone(),
            source,
            artifacts: ProjectArtifacts { artifacts_type },
            environment: ProjectEnvironment {
                environment_type: "LINUX_CONTAINER".to_string(),
                image: myinput.image.clone(),
                compute_type: myinput.compute_type.clone(),
                environment_variables: myinput.environment_variables.iter()
                    .map(|(name, value)| EnvironmentVariable::plaintext(name, value.clone()))
                    .collect(),
            },
            badge_enabled: myinput.badge,
            tags: myinput.tags.clone(),
        };
        let logical_project_name = logical_id(&[&myinput.id]);
        stackinp.add_resource(Resource::new(logical_project_name.clone(), project));
        Ok(outputs::Outputs {
            logical_project_name,
            project_name: myinput.project_name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::aws_codebuild::*;
    use ::aws_cfn_stack::{aws_cfn_stack, get_att, Environment};

    fn stack() -> aws_cfn_stack::Input {
        aws_cfn_stack::Input::new("acme-prod-cicd", Environment::default())
    }

    fn spa_build_spec() -> BuildSpec {
        BuildSpec {
            env: Some(BuildSpecEnv { exported_variables: vec!["REPOSITORY_URI".into()] }),
            phases: Phases {
                pre_build: Some(Phase::new(&["yarn install"])),
                build: Some(Phase::new(&["yarn build"])),
                ..Default::default()
            },
            artifacts: Some(BuildSpecArtifacts { files: vec!["**/*".into()], base_directory: Some("dist".into()) }),
            ..Default::default()
        }
    }

    #[test]
    fn build_spec_uses_codebuild_key_names() {
        let json = serde_json::to_value(spa_build_spec()).expect("serializable");
        assert_eq!(json["version"], "0.2");
        assert_eq!(json["env"]["exported-variables"][0], "REPOSITORY_URI");
        assert_eq!(json["phases"]["pre_build"]["commands"][0], "yarn install");
        assert!(json["phases"].get("post_build").is_none());
        assert_eq!(json["artifacts"]["base-directory"], "dist");
        assert_eq!(json["artifacts"]["files"][0], "**/*");
    }

    #[test]
    fn github_project() {
        let mut s = stack();
        let mut input = Input {
            id: "acme-prod-cicd-codebuild".into(),
            project_name: "acme-prod-cicd-codebuild".into(),
            source: Source::GitHub { owner: "acme-org".into(), repo: "site".into() },
            build_spec: spa_build_spec(),
            service_role: get_att("Role", "Arn"),
            badge: true,
            environment_variables: vec![("VUE_APP_BASE_URL".into(), StrVal::from("https://api.acme.com"))],
            ..Default::default()
        };
        let out = config(&mut input, &mut s).expect("valid project");
        assert_eq!(out.logical_project_name, "AcmeProdCicdCodebuild");
        let p = s.resources[0].properties.properties().expect("serializable");
        assert_eq!(p["Name"], "acme-prod-cicd-codebuild");
        assert_eq!(p["Source"]["Type"], "GITHUB");
        assert_eq!(p["Source"]["Location"], "https://github.com/acme-org/site.git");
        assert_eq!(p["BadgeEnabled"], true);
        assert_eq!(p["Environment"]["Image"], STANDARD_7_0);
        assert_eq!(p["Environment"]["EnvironmentVariables"][0]["Type"], "PLAINTEXT");
        assert_eq!(p["Environment"]["EnvironmentVariables"][0]["Value"], "https://api.acme.com");
        let inline: Value = serde_json::from_str(p["Source"]["BuildSpec"].as_str().unwrap_or_default()).expect("inline json");
        assert_eq!(inline["phases"]["build"]["commands"][0], "yarn build");
        assert!(s.resources[0].properties.validate().is_ok());
    }

    #[test]
    fn pipeline_projects_cannot_have_badges() {
        let mut s = stack();
        let mut input = Input {
            id: "invalidate".into(),
            project_name: "invalidate".into(),
            build_spec: spa_build_spec(),
            service_role: get_att("Role", "Arn"),
            badge: true,
            ..Default::default()
        };
        config(&mut input, &mut s).expect("declared");
        assert!(s.resources[0].properties.validate().is_err());
    }

    #[test]
    fn project_needs_a_role_and_phases() {
        let mut s = stack();
        let mut no_role = Input { id: "p".into(), project_name: "pp".into(), build_spec: spa_build_spec(), ..Default::default() };
        assert!(config(&mut no_role, &mut s).is_err());
        let mut no_phases = Input { id: "p".into(), project_name: "pp".into(), service_role: get_att("R", "Arn"), ..Default::default() };
        assert!(config(&mut no_phases, &mut s).is_err());
    }

    #[test]
    fn project_names_and_variables_are_validated() {
        assert!(verify_project_name("acme-prod-cicd-codebuild").is_none());
        assert!(verify_project_name("-bad").is_some());
        assert!(verify_project_name("a").is_some());

        let mut s = stack();
        let mut input = Input {
            id: "p".into(),
            project_name: "pp".into(),
            build_spec: spa_build_spec(),
            service_role: get_att("R", "Arn"),
            environment_variables: vec![("A".into(), StrVal::from("1")), ("A".into(), StrVal::from("2"))],
            ..Default::default()
        };
        config(&mut input, &mut s).expect("declared");
        assert!(s.resources[0].properties.validate().unwrap_err().contains("set twice"));
    }

    #[test]
    fn log_resources_are_scoped_to_the_project() {
        let resources = log_group_resources("acme-prod-cicd-codebuild");
        assert_eq!(resources.len(), 2);
        let first = resources[0].to_value();
        assert!(first["Fn::Sub"].as_str().unwrap_or_default().ends_with("log-group:/aws/codebuild/acme-prod-cicd-codebuild"));
    }
}
