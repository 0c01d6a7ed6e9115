use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use super::aws_cfn_stack::{self, SynthesizedStack};
use super::SynthError;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const MANIFEST_VERSION: &str = "36.0.0";

/// the root of a declaration: an ordered set of stacks that get
/// synthesized together into one cloud assembly directory.
#[derive(Default)]
pub struct App {
    stacks: Vec<aws_cfn_stack::Input>,
}

#[derive(Debug, Serialize)]
struct ManifestProperties {
    #[serde(rename = "templateFile")]
    template_file: String,
}

#[derive(Debug, Serialize)]
struct ManifestArtifact {
    #[serde(rename = "type")]
    ty: &'static str,
    environment: String,
    properties: ManifestProperties,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    dependencies: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Manifest {
    version: &'static str,
    artifacts: BTreeMap<String, ManifestArtifact>,
}

/// what `App::synth` wrote, and the named outputs of every stack.
#[derive(Debug, Default)]
pub struct AssemblySummary {
    pub directory: PathBuf,
    pub manifest: PathBuf,
    pub templates: Vec<PathBuf>,
    /// (stack name, output key) -> output value expression
    pub outputs: BTreeMap<(String, String), Value>,
}

pub fn template_file_name(stack_name: &str) -> String {
    format!("{stack_name}.template.json")
}

fn collect_imports(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                if key == "Fn::ImportValue" {
                    if let Value::String(name) = val {
                        out.insert(name.clone());
                        continue;
                    }
                }
                collect_imports(val, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_imports(item, out);
            }
        }
        _ => {}
    }
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<(), SynthError> {
    // pretty so the template is readable in the cloudformation console
    let body = serde_json::to_string_pretty(value).map_err(|source| SynthError::Serialize {
        what: format!("{:?}", path),
        source,
    })?;
    std::fs::write(path, body).map_err(|source| SynthError::Io { path: path.to_path_buf(), source })
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stack(&mut self, stack: aws_cfn_stack::Input) -> Result<(), SynthError> {
        if self.stacks.iter().any(|s| s.stack_name == stack.stack_name) {
            return Err(SynthError::DuplicateStack(stack.stack_name));
        }
        self.stacks.push(stack);
        Ok(())
    }

    pub fn stack(&self, name: &str) -> Option<&aws_cfn_stack::Input> {
        self.stacks.iter().find(|s| s.stack_name == name)
    }

    /// validates every stack and the references between them, without
    /// touching the filesystem.
    pub fn synth_templates(&self) -> Result<Vec<SynthesizedStack>, SynthError> {
        let mut out = Vec::with_capacity(self.stacks.len());
        for input in self.stacks.iter() {
            out.push(aws_cfn_stack::config(input)?);
        }
        for stack in out.iter() {
            let mut available = BTreeSet::new();
            for dep in stack.depends_on.iter() {
                let dep_stack = out.iter().find(|s| &s.name == dep).ok_or_else(|| SynthError::UnknownDependency {
                    stack: stack.name.clone(),
                    dependency: dep.clone(),
                })?;
                available.extend(dep_stack.exports().map(str::to_string));
            }
            let mut imports = BTreeSet::new();
            for resource in stack.template.resources.values() {
                collect_imports(&resource.properties, &mut imports);
            }
            for output in stack.template.outputs.values() {
                collect_imports(&output.value, &mut imports);
            }
            if let Some(missing) = imports.into_iter().find(|i| !available.contains(i)) {
                return Err(SynthError::UnresolvedImport { stack: stack.name.clone(), export: missing });
            }
        }
        Ok(out)
    }

    /// writes one template per stack plus a manifest into `directory`.
    pub fn synth(&self, directory: impl AsRef<Path>) -> Result<AssemblySummary, SynthError> {
        let directory = directory.as_ref();
        let stacks = self.synth_templates()?;
        std::fs::create_dir_all(directory).map_err(|source| SynthError::Io {
            path: directory.to_path_buf(),
            source,
        })?;

        let mut summary = AssemblySummary {
            directory: directory.to_path_buf(),
            manifest: directory.join(MANIFEST_FILE),
            ..Default::default()
        };
        let mut manifest = Manifest { version: MANIFEST_VERSION, artifacts: BTreeMap::new() };
        for stack in stacks.iter() {
            let file_name = template_file_name(&stack.name);
            let path = directory.join(&file_name);
            write_json(&path, &stack.template)?;
            tracing::info!(stack = %stack.name, resources = stack.template.resources.len(), path = ?path, "synthesized stack");
            manifest.artifacts.insert(stack.name.clone(), ManifestArtifact {
                ty: "aws:cloudformation:stack",
                environment: stack.environment.to_uri(),
                properties: ManifestProperties { template_file: file_name },
                dependencies: stack.depends_on.clone(),
            });
            for (key, output) in stack.template.outputs.iter() {
                summary.outputs.insert((stack.name.clone(), key.clone()), output.value.clone());
            }
            summary.templates.push(path);
        }
        write_json(&summary.manifest, &manifest)?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{get_ref, import_value, CfnResource, Environment, Resource};

    struct Topic(Value);

    impl CfnResource for Topic {
        fn type_string(&self) -> &'static str {
            "AWS::SNS::Topic"
        }
        fn properties(&self) -> serde_json::Result<Value> {
            Ok(serde_json::json!({ "DisplayName": self.0 }))
        }
    }

    fn env() -> Environment {
        Environment { account: "123456789012".into(), region: "us-east-1".into() }
    }

    fn two_stacks(consumer_depends: bool) -> App {
        let mut producer = aws_cfn_stack::Input::new("producer", env());
        producer.add_resource(Resource::new("Topic", Topic(Value::String("a".into()))));
        let imported = producer.export("TopicArn", "arn of the topic", get_ref("Topic"));
        let mut consumer = aws_cfn_stack::Input::new("consumer", env());
        consumer.add_resource(Resource::new("Other", Topic(imported)));
        if consumer_depends {
            consumer.depends_on.push("producer".into());
        }
        let mut app = App::new();
        app.add_stack(producer).expect("unique");
        app.add_stack(consumer).expect("unique");
        app
    }

    #[test]
    fn imports_need_a_dependency_that_exports_them() {
        assert!(two_stacks(true).synth_templates().is_ok());
        assert!(matches!(two_stacks(false).synth_templates(), Err(SynthError::UnresolvedImport { .. })));
    }

    #[test]
    fn unknown_import_is_rejected() {
        let mut stack = aws_cfn_stack::Input::new("lonely", env());
        stack.add_resource(Resource::new("Topic", Topic(import_value("nowhere:Thing"))));
        let mut app = App::new();
        app.add_stack(stack).expect("unique");
        assert!(app.synth_templates().is_err());
    }

    #[test]
    fn duplicate_stacks_are_rejected() {
        let mut app = App::new();
        app.add_stack(aws_cfn_stack::Input::new("same", env())).expect("unique");
        assert!(app.add_stack(aws_cfn_stack::Input::new("same", env())).is_err());
    }

    #[test]
    fn synth_writes_templates_and_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let summary = two_stacks(true).synth(dir.path()).expect("synth");
        assert_eq!(summary.templates.len(), 2);
        assert!(dir.path().join("producer.template.json").exists());
        assert!(dir.path().join("consumer.template.json").exists());

        let manifest: Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join(MANIFEST_FILE)).expect("manifest written"),
        ).expect("manifest is json");
        assert_eq!(manifest["artifacts"]["consumer"]["dependencies"][0], "producer");
        assert_eq!(manifest["artifacts"]["producer"]["environment"], "aws://123456789012/us-east-1");
        assert_eq!(manifest["artifacts"]["producer"]["properties"]["templateFile"], "producer.template.json");
        assert!(summary.outputs.contains_key(&("producer".to_string(), "TopicArn".to_string())));
    }
}
