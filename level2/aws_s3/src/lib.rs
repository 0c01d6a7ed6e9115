use ::aws_cfn_stack::{get_att, get_ref, CfnResource, StrVal, Tag};
use ::aws_iam::PolicyDocument;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct WebsiteConfiguration {
    pub index_document: String,
    pub error_document: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ObjectOwnership {
    BucketOwnerPreferred,
    BucketOwnerEnforced,
    ObjectWriter,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OwnershipControlsRule {
    pub object_ownership: ObjectOwnership,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OwnershipControls {
    pub rules: Vec<OwnershipControlsRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublicAccessBlockConfiguration {
    pub block_public_acls: bool,
    pub block_public_policy: bool,
    pub ignore_public_acls: bool,
    pub restrict_public_buckets: bool,
}

impl PublicAccessBlockConfiguration {
    pub fn block_all() -> Self {
        Self {
            block_public_acls: true,
            block_public_policy: true,
            ignore_public_acls: true,
            restrict_public_buckets: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerSideEncryptionByDefault {
    #[serde(rename = "SSEAlgorithm")]
    pub sse_algorithm: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerSideEncryptionRule {
    pub server_side_encryption_by_default: ServerSideEncryptionByDefault,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BucketEncryption {
    pub server_side_encryption_configuration: Vec<ServerSideEncryptionRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnBucket {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_configuration: Option<WebsiteConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ownership_controls: Option<OwnershipControls>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_access_block_configuration: Option<PublicAccessBlockConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_encryption: Option<BucketEncryption>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

pub fn verify_bucket_name(bucket_name: &str) -> Option<String> {
    if bucket_name.len() > 63 || bucket_name.len() < 3 {
        return Some(format!("Invalid bucket name {:?}\nMust be between 3 and 63 characters", bucket_name));
    }
    let valid_char_check = |c: char| -> bool {
        c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-'
    };
    if !bucket_name.chars().all(valid_char_check) {
        return Some(format!("Invalid bucket name {:?}\nMay only contain lowercase letters, numbers, dots, and dashes", bucket_name));
    }
    let first_ok = bucket_name.chars().next().map_or(false, |c| c.is_ascii_alphanumeric());
    let last_ok = bucket_name.chars().last().map_or(false, |c| c.is_ascii_alphanumeric());
    if !first_ok || !last_ok {
        return Some(format!("Invalid bucket name {:?}\nFirst and last character mut be either lowercase letter, or number", bucket_name));
    }
    if bucket_name.contains("..") {
        return Some(format!("Invalid bucket name {:?}\nMay not contain two consecutive dots", bucket_name));
    }
    None
}

impl CfnResource for CfnBucket {
    fn type_string(&self) -> &'static str {
        "AWS::S3::Bucket"
    }
    fn properties(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
    fn validate(&self) -> Result<(), String> {
        // an absent name means cloudformation generates one.
        if let Some(name) = &self.bucket_name {
            if let Some(e) = verify_bucket_name(name) {
                return Err(e);
            }
        }
        if let Some(website) = &self.website_configuration {
            if website.index_document.is_empty() || website.index_document.contains('/') {
                return Err(format!("Invalid index document {:?}\nMust be a non-empty file name without slashes", website.index_document));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnBucketPolicy {
    pub bucket: StrVal,
    pub policy_document: PolicyDocument,
}

impl CfnResource for CfnBucketPolicy {
    fn type_string(&self) -> &'static str {
        "AWS::S3::BucketPolicy"
    }
    fn properties(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
    fn validate(&self) -> Result<(), String> {
        if self.policy_document.statements.is_empty() {
            return Err("Bucket policy must have at least 1 statement".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FunctionCode {
    pub zip_file: String,
}

/// just enough of a lambda function to run inline cleanup code.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnFunction {
    pub runtime: String,
    pub handler: String,
    pub role: Value,
    pub timeout: u32,
    pub code: FunctionCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CfnResource for CfnFunction {
    fn type_string(&self) -> &'static str {
        "AWS::Lambda::Function"
    }
    fn properties(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
    fn validate(&self) -> Result<(), String> {
        if self.timeout == 0 || self.timeout > 900 {
            return Err(format!("Invalid function timeout {}\nMust be between 1 and 900 seconds", self.timeout));
        }
        Ok(())
    }
}

pub struct CleanupResource {
    pub lambda_logical_id: String,
    pub bucket_logical_id: String,
}

impl CfnResource for CleanupResource {
    fn type_string(&self) -> &'static str {
        "Custom::S3AutoDeleteObjects"
    }
    fn properties(&self) -> serde_json::Result<Value> {
        let mut map = Map::new();
        map.insert("ServiceToken".to_string(), get_att(&self.lambda_logical_id, "Arn"));
        map.insert("BucketName".to_string(), get_ref(&self.bucket_logical_id));
        Ok(Value::Object(map))
    }
}

pub const CLEANUP_FUNCTION_CODE: &str = r#"import boto3
import cfnresponse


def handler(event, context):
    status = cfnresponse.SUCCESS
    if event['RequestType'] == 'Delete':
        try:
            bucket = boto3.resource('s3').Bucket(event['ResourceProperties']['BucketName'])
            bucket.object_versions.delete()
            bucket.objects.all().delete()
        except Exception as e:
            print(f'Error deleting objects from S3 bucket: {e}')
            status = cfnresponse.FAILED
    cfnresponse.send(event, context, status, {})
"#;

/// this is a higher level module for creating S3 buckets easily. Some higher level
/// functionality this provides is easily setting up static website hosting,
/// and optionally creating a cleanup custom resource: a lambda function that deletes
/// the contents of the bucket when the stack gets deleted. Without it, deleting
/// a stack with a non-empty bucket fails.
pub mod aws_s3 {
    use ::aws_cfn_stack::{aws_cfn_stack, get_ref, logical_id, sub, DeletionPolicy, Resource, StrVal, Tag};
    use ::aws_iam::{aws_iam, PolicyDocument, PolicyStatement, Principal};

    use super::{
        BucketEncryption, CfnBucket, CfnBucketPolicy, CfnFunction, CleanupResource, FunctionCode,
        ObjectOwnership, OwnershipControls, OwnershipControlsRule, PublicAccessBlockConfiguration,
        ServerSideEncryptionByDefault, ServerSideEncryptionRule, WebsiteConfiguration,
        CLEANUP_FUNCTION_CODE,
    };

    pub mod outputs {
        use ::aws_cfn_stack::{get_att, get_ref};
        use serde_json::Value;

        pub struct Outputs {
            /// the logical name of the resource in cloudformation.
            /// Reference this value in other modules, for example
            /// allowing permissions to read/write from this bucket,
            /// pointing a cloudfront distribution to this bucket, etc.
            pub logical_bucket_name: String,
            /// the physical name, when one was requested.
            pub bucket_name: Option<String>,
        }

        impl Outputs {
            pub fn name(&self) -> Value {
                get_ref(&self.logical_bucket_name)
            }
            pub fn arn(&self) -> Value {
                get_att(&self.logical_bucket_name, "Arn")
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum PublicAccess {
        /// every public access path is blocked. Content is served through
        /// a CDN identity instead.
        #[default]
        BlockAll,
        /// a bucket policy allows anyone to read every object.
        PublicRead,
    }

    pub struct Input {
        /// construct id, used to derive the logical name.
        pub id: String,
        /// physical name of the bucket. Must be globally unique.
        /// Left empty, cloudformation generates one from the logical name.
        pub bucket_name: String,
        /// index and error document when the bucket hosts a website.
        pub website: Option<WebsiteConfiguration>,
        pub public_access: PublicAccess,
        pub object_ownership: Option<ObjectOwnership>,
        /// what happens to the bucket when it leaves the stack.
        pub removal_policy: DeletionPolicy,
        /// empties the bucket on stack deletion so that
        /// `DeletionPolicy::Delete` can actually remove it.
        /// Only allowed together with `DeletionPolicy::Delete`.
        pub auto_delete_objects: bool,
        /// SSE-S3 encryption at rest.
        pub encrypted: bool,
        pub tags: Vec<Tag>,
    }

    impl Default for Input {
        fn default() -> Self {
            Self {
                id: String::new(),
                bucket_name: String::new(),
                website: None,
                public_access: PublicAccess::BlockAll,
                object_ownership: None,
                removal_policy: DeletionPolicy::Retain,
                auto_delete_objects: false,
                encrypted: false,
                tags: vec![],
            }
        }
    }

    /// index.html as both index and error document, suited to single page apps.
    pub fn spa_website() -> WebsiteConfiguration {
        WebsiteConfiguration {
            index_document: "index.html".to_string(),
            error_document: "index.html".to_string(),
        }
    }

    pub fn config(myinput: &mut Input, stackinp: &mut aws_cfn_stack::Input) -> Result<outputs::Outputs, String> {
        if myinput.id.is_empty() {
            return Err("Bucket must have a construct id".to_string());
        }
        if myinput.auto_delete_objects && myinput.removal_policy != DeletionPolicy::Delete {
            return Err(format!("Bucket {} can only auto delete objects when its removal policy is Delete", myinput.id));
        }
        let logical_bucket_name = logical_id(&[&myinput.id]);

        let public_access_block = match myinput.public_access {
            PublicAccess::BlockAll => PublicAccessBlockConfiguration::block_all(),
            PublicAccess::PublicRead => PublicAccessBlockConfiguration {
                block_public_policy: false,
                restrict_public_buckets: false,
                ..PublicAccessBlockConfiguration::block_all()
            },
        };
        let bucket = CfnBucket {
            bucket_name: (!myinput.bucket_name.is_empty()).then(|| myinput.bucket_name.clone()),
            website_configuration: myinput.website.clone(),
            ownership_controls: myinput.object_ownership.map(|object_ownership| OwnershipControls {
                rules: vec![OwnershipControlsRule { object_ownership }],
            }),
            public_access_block_configuration: Some(public_access_block),
            bucket_encryption: myinput.encrypted.then(|| BucketEncryption {
                server_side_encryption_configuration: vec![ServerSideEncryptionRule {
                    server_side_encryption_by_default: ServerSideEncryptionByDefault {
                        sse_algorithm: "AES256".to_string(),
                    },
                }],
            }),
            tags: myinput.tags.clone(),
        };
        stackinp.add_resource(Resource::new(logical_bucket_name.clone(), bucket).with_removal_policy(myinput.removal_policy));

        let objects_arn = StrVal::from(sub(&format!("${{{}.Arn}}/*", logical_bucket_name)));
        if myinput.public_access == PublicAccess::PublicRead {
            let bucket_policy = CfnBucketPolicy {
                bucket: StrVal::Val(get_ref(&logical_bucket_name)),
                policy_document: PolicyDocument::new(vec![
                    PolicyStatement::allow(&["s3:GetObject"], vec![objects_arn.clone()]).with_principal(Principal::Any),
                ]),
            };
            stackinp.add_resource(Resource::new(format!("{logical_bucket_name}Policy"), bucket_policy));
        }

        let out = outputs::Outputs {
            logical_bucket_name: logical_bucket_name.clone(),
            bucket_name: (!myinput.bucket_name.is_empty()).then(|| myinput.bucket_name.clone()),
        };
        if !myinput.auto_delete_objects {
            return Ok(out);
        }

        let mut role_input = aws_iam::Input {
            id: format!("{}-auto-delete-role", myinput.id),
            description: Some(format!("empties {} when its stack is deleted", myinput.id)),
            assumed_by: vec!["lambda.amazonaws.com".to_string()],
            statements: vec![
                PolicyStatement::allow(&["s3:ListBucket", "s3:ListBucketVersions"], vec![StrVal::Val(out.arn())]),
                PolicyStatement::allow(&["s3:DeleteObject", "s3:DeleteObjectVersion"], vec![objects_arn]),
            ],
            managed_policy_arns: vec!["arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole".to_string()],
            ..Default::default()
        };
        let role = aws_iam::config(&mut role_input, stackinp)?;

        let logical_fn_name = logical_id(&[&myinput.id, "auto-delete-function"]);
        let cleanup_function = CfnFunction {
            runtime: "python3.12".to_string(),
            handler: "index.handler".to_string(),
            role: role.arn(),
            timeout: 900,
            code: FunctionCode { zip_file: CLEANUP_FUNCTION_CODE.to_string() },
            description: Some(format!("auto generated cleanup resource for {}", myinput.id)),
        };
        stackinp.add_resource(Resource::new(logical_fn_name.clone(), cleanup_function));

        let cleanup = CleanupResource {
            lambda_logical_id: logical_fn_name,
            bucket_logical_id: logical_bucket_name.clone(),
        };
        // the role must outlive the custom resource, or the delete call has no permissions left.
        let cleanup_resource = Resource::new(logical_id(&[&myinput.id, "auto-delete-objects"]), cleanup)
            .depends_on(role.logical_role_name.clone());
        stackinp.add_resource(cleanup_resource);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::aws_s3::*;
    use ::aws_cfn_stack::{aws_cfn_stack, DeletionPolicy, Environment};

    fn stack() -> aws_cfn_stack::Input {
        aws_cfn_stack::Input::new("acme-prod-web", Environment::default())
    }

    fn props(stack: &aws_cfn_stack::Input, name: &str) -> Value {
        stack.resources.iter()
            .find(|r| r.name == name)
            .and_then(|r| r.properties.properties().ok())
            .unwrap_or(Value::Null)
    }

    #[test]
    fn bucket_names_follow_s3_rules() {
        assert!(verify_bucket_name("acme-prod-web-s3").is_none());
        assert!(verify_bucket_name("ab").unwrap_or_default().contains("between 3 and 63"));
        assert!(verify_bucket_name("Acme").unwrap_or_default().contains("lowercase"));
        assert!(verify_bucket_name("-acme").unwrap_or_default().contains("First and last"));
        assert!(verify_bucket_name("acme..prod").unwrap_or_default().contains("two consecutive dots"));
    }

    #[test]
    fn website_bucket_blocks_public_access_by_default() {
        let mut s = stack();
        let mut input = Input {
            id: "acme-prod-web-s3".into(),
            bucket_name: "acme-prod-web-s3".into(),
            website: Some(spa_website()),
            object_ownership: Some(ObjectOwnership::BucketOwnerPreferred),
            removal_policy: DeletionPolicy::Delete,
            ..Default::default()
        };
        let out = config(&mut input, &mut s).expect("valid bucket");
        assert_eq!(out.logical_bucket_name, "AcmeProdWebS3");
        assert_eq!(s.resources.len(), 1);
        assert_eq!(s.resources[0].deletion_policy, Some(DeletionPolicy::Delete));

        let p = props(&s, "AcmeProdWebS3");
        assert_eq!(p["BucketName"], "acme-prod-web-s3");
        assert_eq!(p["WebsiteConfiguration"]["IndexDocument"], "index.html");
        assert_eq!(p["WebsiteConfiguration"]["ErrorDocument"], "index.html");
        assert_eq!(p["OwnershipControls"]["Rules"][0]["ObjectOwnership"], "BucketOwnerPreferred");
        assert_eq!(p["PublicAccessBlockConfiguration"]["BlockPublicPolicy"], true);
    }

    #[test]
    fn public_read_adds_bucket_policy() {
        let mut s = stack();
        let mut input = Input {
            id: "site".into(),
            public_access: PublicAccess::PublicRead,
            ..Default::default()
        };
        config(&mut input, &mut s).expect("valid bucket");
        let p = props(&s, "SitePolicy");
        assert_eq!(p["PolicyDocument"]["Statement"][0]["Principal"], "*");
        assert_eq!(p["PolicyDocument"]["Statement"][0]["Action"][0], "s3:GetObject");
        assert_eq!(props(&s, "Site")["PublicAccessBlockConfiguration"]["BlockPublicPolicy"], false);
    }

    #[test]
    fn auto_delete_requires_delete_policy() {
        let mut s = stack();
        let mut input = Input { id: "site".into(), auto_delete_objects: true, ..Default::default() };
        assert!(config(&mut input, &mut s).is_err());
    }

    #[test]
    fn auto_delete_declares_cleanup_resources() {
        let mut s = stack();
        let mut input = Input {
            id: "site".into(),
            removal_policy: DeletionPolicy::Delete,
            auto_delete_objects: true,
            ..Default::default()
        };
        config(&mut input, &mut s).expect("valid bucket");
        let names: Vec<&str> = s.resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Site", "SiteAutoDeleteRole", "SiteAutoDeleteFunction", "SiteAutoDeleteObjects"]);
        let custom = props(&s, "SiteAutoDeleteObjects");
        assert_eq!(custom["BucketName"], get_ref("Site"));
        assert_eq!(custom["ServiceToken"], get_att("SiteAutoDeleteFunction", "Arn"));
        assert_eq!(props(&s, "SiteAutoDeleteFunction")["Runtime"], "python3.12");
    }
}
