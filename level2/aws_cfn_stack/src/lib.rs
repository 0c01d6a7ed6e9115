use std::collections::BTreeMap;
use std::path::PathBuf;

pub use serde_json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

mod assembly;
pub use assembly::*;

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("Validation failed on resource '{resource}'\n{message}")]
    Validation { resource: String, message: String },

    #[error("Invalid stack name {name}\n{message}")]
    InvalidStackName { name: String, message: String },

    #[error("Duplicate logical id '{logical_id}' in stack '{stack}'")]
    DuplicateLogicalId { stack: String, logical_id: String },

    #[error("Duplicate stack '{0}'")]
    DuplicateStack(String),

    #[error("Stack '{stack}' depends on unknown stack '{dependency}'")]
    UnknownDependency { stack: String, dependency: String },

    #[error("Stack '{stack}' imports '{export}' which no stack it depends on exports")]
    UnresolvedImport { stack: String, export: String },

    #[error("Failed to serialize {what}\n{source}")]
    Serialize {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write {path:?}\n{source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// a value that is either a literal string, or a cloudformation
/// expression such as `{ "Ref": "..." }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StrVal {
    String(String),
    Val(Value),
}

impl Default for StrVal {
    fn default() -> Self {
        StrVal::String(String::new())
    }
}

impl From<&str> for StrVal {
    fn from(value: &str) -> Self {
        StrVal::String(value.to_string())
    }
}

impl From<String> for StrVal {
    fn from(value: String) -> Self {
        StrVal::String(value)
    }
}

impl From<Value> for StrVal {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => StrVal::String(s),
            other => StrVal::Val(other),
        }
    }
}

impl StrVal {
    /// returns the literal string if this is not an expression.
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            StrVal::String(s) => Some(s),
            StrVal::Val(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            StrVal::String(s) => Value::String(s.clone()),
            StrVal::Val(v) => v.clone(),
        }
    }
}

fn single_key(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

pub fn get_ref(logical_id: &str) -> Value {
    single_key("Ref", Value::String(logical_id.to_string()))
}

pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    single_key("Fn::GetAtt", Value::Array(vec![
        Value::String(logical_id.to_string()),
        Value::String(attribute.to_string()),
    ]))
}

pub fn sub(template: &str) -> Value {
    single_key("Fn::Sub", Value::String(template.to_string()))
}

pub fn join(separator: &str, parts: Vec<Value>) -> Value {
    single_key("Fn::Join", Value::Array(vec![
        Value::String(separator.to_string()),
        Value::Array(parts),
    ]))
}

pub fn import_value(export_name: &str) -> Value {
    single_key("Fn::ImportValue", Value::String(export_name.to_string()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: String,
}

pub fn tags(pairs: &[(&str, &str)]) -> Vec<Tag> {
    pairs.iter().map(|(k, v)| Tag { key: k.to_string(), value: v.to_string() }).collect()
}

pub const PSEUDO_ACCOUNT_ID: &str = "AWS::AccountId";
pub const PSEUDO_PARTITION: &str = "AWS::Partition";

/// a typed cloudformation resource. Implementors serialize their own
/// properties block; everything around it (Type, DeletionPolicy, ...) is
/// handled by the stack.
pub trait CfnResource {
    fn type_string(&self) -> &'static str;
    fn properties(&self) -> serde_json::Result<Value>;
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    Delete,
    Retain,
    Snapshot,
}

pub struct Resource {
    pub name: String,
    pub properties: Box<dyn CfnResource>,
    pub deletion_policy: Option<DeletionPolicy>,
    pub update_replace_policy: Option<DeletionPolicy>,
    pub depends_on: Vec<String>,
}

impl Resource {
    pub fn new(name: impl Into<String>, properties: impl CfnResource + 'static) -> Self {
        Self {
            name: name.into(),
            properties: Box::new(properties),
            deletion_policy: None,
            update_replace_policy: None,
            depends_on: vec![],
        }
    }

    /// sets both the deletion and the update-replace policy.
    pub fn with_removal_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = Some(policy);
        self.update_replace_policy = Some(policy);
        self
    }

    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.push(logical_id.into());
        self
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedResource {
    #[serde(rename = "Type")]
    pub ty: String,
    #[serde(rename = "Properties")]
    pub properties: Value,
    #[serde(rename = "DeletionPolicy", skip_serializing_if = "Option::is_none", default)]
    pub deletion_policy: Option<DeletionPolicy>,
    #[serde(rename = "UpdateReplacePolicy", skip_serializing_if = "Option::is_none", default)]
    pub update_replace_policy: Option<DeletionPolicy>,
    #[serde(rename = "DependsOn", skip_serializing_if = "Vec::is_empty", default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputExport {
    #[serde(rename = "Name")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOutput {
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Value")]
    pub value: Value,
    #[serde(rename = "Export", skip_serializing_if = "Option::is_none", default)]
    pub export: Option<OutputExport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedTemplate {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub version: String,
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, SavedResource>,
    #[serde(rename = "Outputs", skip_serializing_if = "BTreeMap::is_empty", default)]
    pub outputs: BTreeMap<String, ResourceOutput>,
}

impl Default for SavedTemplate {
    fn default() -> Self {
        Self {
            version: "2010-09-09".to_string(),
            description: None,
            resources: Default::default(),
            outputs: Default::default(),
        }
    }
}

impl SavedTemplate {
    pub fn resources_of_type<'a>(&'a self, ty: &'a str) -> impl Iterator<Item = (&'a String, &'a SavedResource)> + 'a {
        self.resources.iter().filter(move |(_, r)| r.ty == ty)
    }
}

/// the account/region a stack is deployed into.
/// an empty account means "whatever account the deployer uses".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub account: String,
    pub region: String,
}

impl Environment {
    pub fn to_uri(&self) -> String {
        let account = if self.account.is_empty() { "unknown-account" } else { &self.account };
        format!("aws://{}/{}", account, self.region)
    }
}

pub fn verify_resource_name(resource_name: &str) -> Option<String> {
    if resource_name.len() > 255 {
        return Some(format!("Invalid resource name {:?}\nmust be less than 255 characters", resource_name));
    }
    if resource_name.is_empty() {
        return Some(format!("Invalid resource name {:?}\nMust contain at least 1 character", resource_name));
    }
    if !resource_name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Some(format!("Invalid resource name {:?}\nMust contain only alphanumeric characters [A-Za-z0-9]", resource_name));
    }
    None
}

/// turns any construct path like `acme-prod-web-s3` into a valid
/// logical id: `AcmeProdWebS3`.
pub fn logical_id(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts {
        for word in part.split(|c: char| !c.is_ascii_alphanumeric()) {
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                out.push(first.to_ascii_uppercase());
                out.extend(chars);
            }
        }
    }
    out.truncate(255);
    out
}

pub mod aws_cfn_stack {
    use std::collections::BTreeMap;
    use serde_json::Value;

    use super::{
        import_value, verify_resource_name, Environment, OutputExport, Resource, ResourceOutput,
        SavedResource, SavedTemplate, SynthError,
    };

    /// a stack being declared. Resource modules push their resources into
    /// this, and the app turns it into a template at synth time.
    #[derive(Default)]
    pub struct Input {
        pub stack_name: String,
        pub description: Option<String>,
        pub environment: Environment,
        pub resources: Vec<Resource>,
        pub outputs: BTreeMap<String, ResourceOutput>,
        /// names of other stacks that must be deployed first.
        pub depends_on: Vec<String>,
    }

    impl Input {
        pub fn new(stack_name: impl Into<String>, environment: Environment) -> Self {
            Self {
                stack_name: stack_name.into(),
                environment,
                ..Default::default()
            }
        }

        pub fn add_resource(&mut self, resource: Resource) {
            self.resources.push(resource);
        }

        pub fn add_output(&mut self, key: &str, description: &str, value: Value) {
            self.outputs.insert(key.to_string(), ResourceOutput {
                description: description.to_string(),
                value,
                export: None,
            });
        }

        /// name under which `key` is exported from this stack.
        pub fn export_name(&self, key: &str) -> String {
            format!("{}:{}", self.stack_name, key)
        }

        /// adds an exported output and returns the expression other
        /// stacks use to import it.
        pub fn export(&mut self, key: &str, description: &str, value: Value) -> Value {
            let name = self.export_name(key);
            self.outputs.insert(key.to_string(), ResourceOutput {
                description: description.to_string(),
                value,
                export: Some(OutputExport { name: name.clone() }),
            });
            import_value(&name)
        }
    }

    pub struct SynthesizedStack {
        pub name: String,
        pub environment: Environment,
        pub depends_on: Vec<String>,
        pub template: SavedTemplate,
    }

    impl SynthesizedStack {
        pub fn exports(&self) -> impl Iterator<Item = &str> {
            self.template.outputs.values().filter_map(|o| o.export.as_ref().map(|e| e.name.as_str()))
        }
    }

    fn validate_resources_to_template(stack_name: &str, resources: &[Resource]) -> Result<SavedTemplate, SynthError> {
        let mut out_template = SavedTemplate::default();
        for resource in resources.iter() {
            if let Some(message) = verify_resource_name(&resource.name) {
                return Err(SynthError::Validation { resource: resource.name.clone(), message });
            }
            if let Err(message) = resource.properties.validate() {
                return Err(SynthError::Validation { resource: resource.name.clone(), message });
            }
            let properties = resource.properties.properties().map_err(|source| SynthError::Serialize {
                what: format!("properties of '{}'", resource.name),
                source,
            })?;
            let saved_resource = SavedResource {
                ty: resource.properties.type_string().to_string(),
                properties,
                deletion_policy: resource.deletion_policy,
                update_replace_policy: resource.update_replace_policy,
                depends_on: resource.depends_on.clone(),
            };
            if out_template.resources.insert(resource.name.clone(), saved_resource).is_some() {
                return Err(SynthError::DuplicateLogicalId {
                    stack: stack_name.to_string(),
                    logical_id: resource.name.clone(),
                });
            }
        }
        for (name, resource) in out_template.resources.iter() {
            for dep in resource.depends_on.iter() {
                if !out_template.resources.contains_key(dep) {
                    return Err(SynthError::Validation {
                        resource: name.clone(),
                        message: format!("DependsOn references unknown resource '{dep}'"),
                    });
                }
            }
        }
        Ok(out_template)
    }

    pub fn validate_stack_name(stack_name: &str) -> Result<String, SynthError> {
        // A stack name can contain only alphanumeric characters (case sensitive) and hyphens.
        // It must start with an alphabetical character and can't be longer than 128 characters.
        let restriction = "Must only consist of alphanumeric characters and hyphens, Must start with an alphabetical character, and cannot be longer than 128 characters.";
        let invalid = || SynthError::InvalidStackName {
            name: stack_name.to_string(),
            message: restriction.to_string(),
        };
        match stack_name.chars().next() {
            Some(c) if c.is_ascii_alphabetic() => {}
            _ => return Err(invalid()),
        }
        if !stack_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(invalid());
        }
        if stack_name.len() > 128 {
            return Err(invalid());
        }
        Ok(stack_name.to_string())
    }

    pub fn config(input: &Input) -> Result<SynthesizedStack, SynthError> {
        let name = validate_stack_name(&input.stack_name)?;
        let mut template = validate_resources_to_template(&name, &input.resources)?;
        template.description = input.description.clone();
        template.outputs = input.outputs.clone();
        tracing::debug!(stack = %name, resources = template.resources.len(), "validated stack");
        Ok(SynthesizedStack {
            name,
            environment: input.environment.clone(),
            depends_on: input.depends_on.clone(),
            template,
        })
    }
}
