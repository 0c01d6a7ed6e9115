use ::aws_cfn_stack::{CfnResource, StrVal, Tag};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

pub const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Principal {
    Service(Vec<String>),
    CanonicalUser(StrVal),
    Any,
}

impl Principal {
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        match self {
            Principal::Any => return Value::String("*".to_string()),
            Principal::Service(services) => {
                let list = services.iter().map(|s| Value::String(s.clone())).collect();
                map.insert("Service".to_string(), Value::Array(list));
            }
            Principal::CanonicalUser(id) => {
                map.insert("CanonicalUser".to_string(), id.to_value());
            }
        }
        Value::Object(map)
    }
}

impl Serialize for Principal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyStatement {
    #[serde(rename = "Effect")]
    pub effect: Effect,
    #[serde(rename = "Principal", skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    #[serde(rename = "Action")]
    pub actions: Vec<String>,
    #[serde(rename = "Resource", skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<StrVal>,
}

impl PolicyStatement {
    pub fn allow(actions: &[&str], resources: Vec<StrVal>) -> Self {
        Self {
            effect: Effect::Allow,
            principal: None,
            actions: actions.iter().map(|a| a.to_string()).collect(),
            resources,
        }
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Statement")]
    pub statements: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new(statements: Vec<PolicyStatement>) -> Self {
        Self { version: POLICY_VERSION.to_string(), statements }
    }
}

pub fn create_assume_role_policy_doc(services: &[&str]) -> PolicyDocument {
    let statement = PolicyStatement::allow(&["sts:AssumeRole"], vec![])
        .with_principal(Principal::Service(services.iter().map(|s| s.to_string()).collect()));
    PolicyDocument::new(vec![statement])
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Policy {
    #[serde(rename = "PolicyName")]
    pub policy_name: String,
    #[serde(rename = "PolicyDocument")]
    pub policy_document: PolicyDocument,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnRole {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub assume_role_policy_document: PolicyDocument,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<Policy>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub managed_policy_arns: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

pub fn verify_role_name(name: &str) -> Option<String> {
    if name.is_empty() || name.len() > 64 {
        return Some(format!("Invalid role name {:?}\nMust be between 1 and 64 characters", name));
    }
    let valid = |c: char| c.is_ascii_alphanumeric() || "+=,.@_-".contains(c);
    if !name.chars().all(valid) {
        return Some(format!("Invalid role name {:?}\nMay only contain alphanumeric characters and +=,.@_-", name));
    }
    None
}

impl CfnResource for CfnRole {
    fn type_string(&self) -> &'static str {
        "AWS::IAM::Role"
    }
    fn properties(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
    fn validate(&self) -> Result<(), String> {
        if let Some(name) = &self.role_name {
            if let Some(e) = verify_role_name(name) {
                return Err(e);
            }
        }
        if self.assume_role_policy_document.statements.is_empty() {
            return Err("Role must have a trust policy with at least 1 statement".to_string());
        }
        Ok(())
    }
}

/// a grant that is wider than it should be.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyFinding {
    pub policy: String,
    pub action: String,
    pub message: String,
}

fn is_service_wide_action(action: &str) -> bool {
    action == "*" || action.ends_with(":*")
}

fn is_any_resource(resource: &StrVal) -> bool {
    resource.as_literal() == Some("*")
}

pub fn lint_statement(policy: &str, statement: &PolicyStatement) -> Vec<PolicyFinding> {
    let mut out = vec![];
    if statement.effect != Effect::Allow {
        return out;
    }
    let any_resource = statement.resources.iter().any(is_any_resource);
    for action in statement.actions.iter() {
        if action == "*" {
            out.push(PolicyFinding {
                policy: policy.to_string(),
                action: action.clone(),
                message: "grants every action".to_string(),
            });
        } else if is_service_wide_action(action) && any_resource {
            out.push(PolicyFinding {
                policy: policy.to_string(),
                action: action.clone(),
                message: format!("grants '{action}' on every resource"),
            });
        }
    }
    out
}

pub fn lint_document(policy: &str, document: &PolicyDocument) -> Vec<PolicyFinding> {
    document.statements.iter().flat_map(|s| lint_statement(policy, s)).collect()
}

impl CfnRole {
    pub fn lint(&self) -> Vec<PolicyFinding> {
        self.policies.iter().flat_map(|p| lint_document(&p.policy_name, &p.policy_document)).collect()
    }
}

pub mod aws_iam {
    use ::aws_cfn_stack::{aws_cfn_stack, logical_id, Resource, Tag};

    use super::{create_assume_role_policy_doc, CfnRole, Policy, PolicyDocument, PolicyStatement};

    pub mod outputs {
        use ::aws_cfn_stack::{get_att, get_ref};
        use serde_json::Value;

        pub struct Outputs {
            /// the logical name of the role in cloudformation.
            pub logical_role_name: String,
        }

        impl Outputs {
            pub fn arn(&self) -> Value {
                get_att(&self.logical_role_name, "Arn")
            }
            pub fn name(&self) -> Value {
                get_ref(&self.logical_role_name)
            }
        }
    }

    #[derive(Default)]
    pub struct Input {
        /// construct id, used to derive the logical name.
        pub id: String,
        /// physical role name. Left empty, cloudformation generates one.
        pub role_name: String,
        pub description: Option<String>,
        /// service principals allowed to assume this role,
        /// eg: `codebuild.amazonaws.com`.
        pub assumed_by: Vec<String>,
        /// rendered as a single inline policy.
        pub statements: Vec<PolicyStatement>,
        pub managed_policy_arns: Vec<String>,
        pub tags: Vec<Tag>,
    }

    /// declares the role. Any statement that grants a service-wide action
    /// on every resource is rejected.
    pub fn config(input: &mut Input, stackinp: &mut aws_cfn_stack::Input) -> Result<outputs::Outputs, String> {
        if input.id.is_empty() {
            return Err("Role must have a construct id".to_string());
        }
        if input.assumed_by.is_empty() {
            return Err(format!("Role {} must be assumable by at least 1 service", input.id));
        }
        let services: Vec<&str> = input.assumed_by.iter().map(String::as_str).collect();
        let policy_name = if input.role_name.is_empty() {
            format!("{}-policy", input.id)
        } else {
            format!("{}-policy", input.role_name)
        };
        let policies = if input.statements.is_empty() {
            vec![]
        } else {
            vec![Policy {
                policy_name,
                policy_document: PolicyDocument::new(std::mem::take(&mut input.statements)),
            }]
        };
        let role = CfnRole {
            role_name: (!input.role_name.is_empty()).then(|| input.role_name.clone()),
            description: input.description.clone(),
            assume_role_policy_document: create_assume_role_policy_doc(&services),
            policies,
            managed_policy_arns: input.managed_policy_arns.clone(),
            tags: input.tags.clone(),
        };
        let findings = role.lint();
        if !findings.is_empty() {
            let lines: Vec<String> = findings.iter().map(|f| format!("- {}: {}", f.policy, f.message)).collect();
            return Err(format!("Role {} has overly broad grants:\n{}", input.id, lines.join("\n")));
        }
        let logical_role_name = logical_id(&[&input.id]);
        stackinp.add_resource(Resource::new(logical_role_name.clone(), role));
        Ok(outputs::Outputs { logical_role_name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::aws_cfn_stack::{aws_cfn_stack, get_att, sub, Environment};

    fn star() -> StrVal {
        StrVal::from("*")
    }

    #[test]
    fn s3_star_on_star_is_flagged() {
        let statement = PolicyStatement::allow(&["s3:*"], vec![star()]);
        let findings = lint_statement("build", &statement);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].action, "s3:*");
        assert!(findings[0].message.contains("every resource"));
    }

    #[test]
    fn scoped_grants_pass_the_lint() {
        let bucket_objects = StrVal::from(sub("${Bucket.Arn}/*"));
        let statement = PolicyStatement::allow(&["s3:GetObject", "s3:PutObject"], vec![bucket_objects]);
        assert!(lint_statement("build", &statement).is_empty());

        let wildcard_action_scoped = PolicyStatement::allow(&["s3:*"], vec![StrVal::from(get_att("Bucket", "Arn"))]);
        assert!(lint_statement("build", &wildcard_action_scoped).is_empty());

        let mut deny = PolicyStatement::allow(&["*"], vec![star()]);
        deny.effect = Effect::Deny;
        assert!(lint_statement("build", &deny).is_empty());
    }

    #[test]
    fn star_action_is_always_flagged() {
        let statement = PolicyStatement::allow(&["*"], vec![StrVal::from(get_att("Bucket", "Arn"))]);
        assert_eq!(lint_statement("p", &statement).len(), 1);
    }

    #[test]
    fn principals_serialize_like_iam_expects() {
        assert_eq!(Principal::Any.to_value(), Value::String("*".into()));
        let doc = create_assume_role_policy_doc(&["codebuild.amazonaws.com", "codepipeline.amazonaws.com"]);
        let json = serde_json::to_value(&doc).expect("serializable");
        assert_eq!(json["Version"], POLICY_VERSION);
        assert_eq!(json["Statement"][0]["Action"][0], "sts:AssumeRole");
        assert_eq!(json["Statement"][0]["Principal"]["Service"][1], "codepipeline.amazonaws.com");
        assert!(json["Statement"][0].get("Resource").is_none());
    }

    #[test]
    fn role_names_are_validated() {
        assert!(verify_role_name("acme-prod-cicd-codebuild-role").is_none());
        assert!(verify_role_name(&"a".repeat(65)).is_some());
        assert!(verify_role_name("bad name").is_some());
    }

    #[test]
    fn config_rejects_broad_grants() {
        let mut stack = aws_cfn_stack::Input::new("s", Environment::default());
        let mut input = aws_iam::Input {
            id: "build-role".into(),
            role_name: "s-build-role".into(),
            assumed_by: vec!["codebuild.amazonaws.com".into()],
            statements: vec![PolicyStatement::allow(&["s3:*"], vec![StrVal::from("*")])],
            ..Default::default()
        };
        let err = aws_iam::config(&mut input, &mut stack).err().unwrap_or_default();
        assert!(err.contains("overly broad"));
        assert!(stack.resources.is_empty());
    }

    #[test]
    fn config_declares_role_with_inline_policy() {
        let mut stack = aws_cfn_stack::Input::new("s", Environment::default());
        let mut input = aws_iam::Input {
            id: "build-role".into(),
            role_name: "s-build-role".into(),
            assumed_by: vec!["codebuild.amazonaws.com".into()],
            statements: vec![PolicyStatement::allow(&["s3:GetObject"], vec![StrVal::from(get_att("B", "Arn"))])],
            ..Default::default()
        };
        let out = aws_iam::config(&mut input, &mut stack).expect("valid role");
        assert_eq!(out.logical_role_name, "BuildRole");
        assert_eq!(out.arn(), get_att("BuildRole", "Arn"));
        let props = stack.resources[0].properties.properties().expect("serializable");
        assert_eq!(props["RoleName"], "s-build-role");
        assert_eq!(props["Policies"][0]["PolicyName"], "s-build-role-policy");
    }
}
