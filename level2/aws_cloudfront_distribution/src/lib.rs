use ::aws_acm_cert::{certificate_arn_region, verify_domain_name};
use ::aws_cfn_stack::{CfnResource, StrVal, Tag};
use ::aws_regions::CLOUDFRONT_CERTIFICATE_REGION;
use serde::Serialize;
use serde_json::Value;

/// caching optimized:
/// https://docs.aws.amazon.com/AmazonCloudFront/latest/DeveloperGuide/using-managed-cache-policies.html#managed-cache-caching-optimized
pub const CACHING_OPTIMIZED_POLICY_ID: &str = "658327ea-f89d-4fab-a63d-7e88639e58f6";

/// every distribution's domain lives in this hosted zone. Alias records
/// pointing at a distribution must use it as their target zone.
pub const CLOUDFRONT_HOSTED_ZONE_ID: &str = "Z2FDTNDATAQYW2";

pub const ALL_METHODS: &[&str] = &["GET", "HEAD", "OPTIONS", "PUT", "PATCH", "POST", "DELETE"];
pub const CACHED_METHODS: &[&str] = &["GET", "HEAD"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViewerProtocolPolicy {
    #[serde(rename = "allow-all")]
    AllowAll,
    #[serde(rename = "https-only")]
    HttpsOnly,
    #[serde(rename = "redirect-to-https")]
    RedirectToHttps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OriginProtocolPolicy {
    #[serde(rename = "http-only")]
    HttpOnly,
    #[serde(rename = "match-viewer")]
    MatchViewer,
    #[serde(rename = "https-only")]
    HttpsOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct S3OriginConfig {
    pub origin_access_identity: StrVal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomOriginConfig {
    #[serde(rename = "OriginProtocolPolicy")]
    pub origin_protocol_policy: OriginProtocolPolicy,
    #[serde(rename = "HTTPPort")]
    pub http_port: u16,
    #[serde(rename = "HTTPSPort")]
    pub https_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Origin {
    pub id: String,
    pub domain_name: StrVal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_origin_config: Option<S3OriginConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_origin_config: Option<CustomOriginConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DefaultCacheBehavior {
    pub target_origin_id: String,
    pub viewer_protocol_policy: ViewerProtocolPolicy,
    pub allowed_methods: Vec<String>,
    pub cached_methods: Vec<String>,
    pub cache_policy_id: String,
    pub compress: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ViewerCertificate {
    pub acm_certificate_arn: StrVal,
    pub ssl_support_method: String,
    pub minimum_protocol_version: String,
}

impl ViewerCertificate {
    /// SNI with the 2021 TLS 1.2 security policy.
    pub fn sni(acm_certificate_arn: StrVal) -> Self {
        Self {
            acm_certificate_arn,
            ssl_support_method: "sni-only".to_string(),
            minimum_protocol_version: "TLSv1.2_2021".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomErrorResponse {
    pub error_code: u16,
    pub response_code: u16,
    pub response_page_path: String,
    #[serde(rename = "ErrorCachingMinTTL")]
    pub error_caching_min_ttl: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DistributionConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_root_object: Option<String>,
    pub origins: Vec<Origin>,
    pub default_cache_behavior: DefaultCacheBehavior,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer_certificate: Option<ViewerCertificate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub custom_error_responses: Vec<CustomErrorResponse>,
    pub http_version: String,
    #[serde(rename = "IPV6Enabled")]
    pub ipv6_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_class: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnDistribution {
    pub distribution_config: DistributionConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

impl CfnResource for CfnDistribution {
    fn type_string(&self) -> &'static str {
        "AWS::CloudFront::Distribution"
    }
    fn properties(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
    fn validate(&self) -> Result<(), String> {
        let cfg = &self.distribution_config;
        if cfg.origins.is_empty() {
            return Err("Distribution must have at least 1 origin".to_string());
        }
        let target = &cfg.default_cache_behavior.target_origin_id;
        if !cfg.origins.iter().any(|o| &o.id == target) {
            return Err(format!("Default cache behavior targets unknown origin {:?}", target));
        }
        let behavior = &cfg.default_cache_behavior;
        if let Some(m) = behavior.cached_methods.iter().find(|m| !behavior.allowed_methods.contains(m)) {
            return Err(format!("Cached method {} must also be an allowed method", m));
        }
        if let Some(comment) = &cfg.comment {
            if comment.len() > 128 {
                return Err(format!("Distribution comment {:?} is longer than 128 characters", comment));
            }
        }
        for alias in cfg.aliases.iter() {
            if let Some(e) = verify_domain_name(alias) {
                return Err(e);
            }
        }
        match &cfg.viewer_certificate {
            None if !cfg.aliases.is_empty() => {
                return Err("A distribution with aliases must have a viewer certificate".to_string());
            }
            Some(cert) => {
                // expressions resolve at deploy time, only literal ARNs can be checked here
                if let Some(arn) = cert.acm_certificate_arn.as_literal() {
                    match certificate_arn_region(arn) {
                        Some(region) if region == CLOUDFRONT_CERTIFICATE_REGION => {}
                        Some(region) => {
                            return Err(format!("Certificate {} is in {}\nCloudFront only accepts certificates from {}", arn, region, CLOUDFRONT_CERTIFICATE_REGION));
                        }
                        None => return Err(format!("Invalid certificate ARN {:?}", arn)),
                    }
                }
            }
            None => {}
        }
        for response in cfg.custom_error_responses.iter() {
            if !(400..=599).contains(&response.error_code) {
                return Err(format!("Invalid error code {}\nMust be a 4xx or 5xx status", response.error_code));
            }
            if !response.response_page_path.starts_with('/') {
                return Err(format!("Response page path {:?} must start with /", response.response_page_path));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OriginAccessIdentityConfig {
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnCloudFrontOriginAccessIdentity {
    pub cloud_front_origin_access_identity_config: OriginAccessIdentityConfig,
}

impl CfnResource for CfnCloudFrontOriginAccessIdentity {
    fn type_string(&self) -> &'static str {
        "AWS::CloudFront::CloudFrontOriginAccessIdentity"
    }
    fn properties(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// a higher level construct for putting a cloudfront distribution in front
/// of a single origin: either a private S3 bucket read through an origin
/// access identity, or an http website endpoint.
pub mod aws_cloudfront_distribution {
    use ::aws_cfn_stack::{aws_cfn_stack, get_att, get_ref, logical_id, sub, Resource, StrVal, Tag};
    use ::aws_iam::{PolicyDocument, PolicyStatement, Principal};
    use ::aws_s3::CfnBucketPolicy;

    use super::{
        CfnCloudFrontOriginAccessIdentity, CfnDistribution, CustomErrorResponse, CustomOriginConfig,
        DefaultCacheBehavior, DistributionConfig, Origin, OriginAccessIdentityConfig, OriginProtocolPolicy,
        S3OriginConfig, ViewerCertificate, ViewerProtocolPolicy, ALL_METHODS, CACHED_METHODS,
        CACHING_OPTIMIZED_POLICY_ID,
    };

    pub mod outputs {
        use ::aws_cfn_stack::{get_att, get_ref};
        use serde_json::Value;

        pub struct Outputs {
            /// the logical name of the distribution in cloudformation.
            pub logical_distr_name: String,
            /// set when the origin is a bucket read through an origin access identity.
            pub logical_oai_name: Option<String>,
        }

        impl Outputs {
            pub fn distribution_id(&self) -> Value {
                get_ref(&self.logical_distr_name)
            }
            /// eg: `d111111abcdef8.cloudfront.net`
            pub fn domain_name(&self) -> Value {
                get_att(&self.logical_distr_name, "DomainName")
            }
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum OriginSource {
        /// a bucket with all public access blocked. An origin access identity
        /// and a bucket policy letting it read objects get created alongside.
        S3Bucket { logical_bucket_name: String },
        /// an http origin such as an S3 static website endpoint.
        Website { domain_name: String },
    }

    pub struct Input {
        /// construct id, used to derive the logical names.
        pub id: String,
        /// id of the single origin. Defaults to `{id}-origin`.
        pub origin_id: String,
        pub origin: OriginSource,
        pub comment: Option<String>,
        /// custom domain names. Requires `certificate_arn`.
        pub aliases: Vec<String>,
        /// a literal ARN or an expression resolving to one.
        pub certificate_arn: Option<StrVal>,
        /// By default set to redirect-to-https.
        pub viewer_protocol_policy: ViewerProtocolPolicy,
        pub default_root_object: String,
        /// when set, 403s from the origin are answered with this page and a 200,
        /// letting a single page app route client side.
        pub spa_fallback_page: Option<String>,
        pub price_class: Option<String>,
        /// by default we create the distribution enabled and ready to use.
        pub disabled: bool,
        pub tags: Vec<Tag>,
    }

    impl Default for Input {
        fn default() -> Self {
            Self {
                id: String::new(),
                origin_id: String::new(),
                origin: OriginSource::Website { domain_name: String::new() },
                comment: None,
                aliases: vec![],
                certificate_arn: None,
                viewer_protocol_policy: ViewerProtocolPolicy::RedirectToHttps,
                default_root_object: "index.html".to_string(),
                spa_fallback_page: None,
                price_class: None,
                disabled: false,
                tags: vec![],
            }
        }
    }

    fn declare_origin_access(id: &str, logical_bucket_name: &str, stackinp: &mut aws_cfn_stack::Input) -> (String, S3OriginConfig) {
        let logical_oai_name = logical_id(&[id, "oai"]);
        let oai = CfnCloudFrontOriginAccessIdentity {
            cloud_front_origin_access_identity_config: OriginAccessIdentityConfig {
                comment: format!("identity for {id}"),
            },
        };
        stackinp.add_resource(Resource::new(logical_oai_name.clone(), oai));

        let read_objects = PolicyStatement::allow(
            &["s3:GetObject"],
            vec![StrVal::from(sub(&format!("${{{}.Arn}}/*", logical_bucket_name)))],
        ).with_principal(Principal::CanonicalUser(StrVal::from(get_att(&logical_oai_name, "S3CanonicalUserId"))));
        let bucket_policy = CfnBucketPolicy {
            bucket: StrVal::from(get_ref(logical_bucket_name)),
            policy_document: PolicyDocument::new(vec![read_objects]),
        };
        stackinp.add_resource(Resource::new(logical_id(&[logical_bucket_name, "policy"]), bucket_policy));

        let s3_origin_config = S3OriginConfig {
            origin_access_identity: StrVal::from(sub(&format!("origin-access-identity/cloudfront/${{{}}}", logical_oai_name))),
        };
        (logical_oai_name, s3_origin_config)
    }

    pub fn config(myinput: &mut Input, stackinp: &mut aws_cfn_stack::Input) -> Result<outputs::Outputs, String> {
        if myinput.id.is_empty() {
            return Err("Distribution must have a construct id".to_string());
        }
        let origin_id = if myinput.origin_id.is_empty() {
            format!("{}-origin", myinput.id)
        } else {
            myinput.origin_id.clone()
        };

        let (origin, logical_oai_name) = match &myinput.origin {
            OriginSource::S3Bucket { logical_bucket_name } => {
                let (logical_oai_name, s3_origin_config) = declare_origin_access(&myinput.id, logical_bucket_name, stackinp);
                let origin = Origin {
                    id: origin_id.clone(),
                    domain_name: StrVal::from(get_att(logical_bucket_name, "RegionalDomainName")),
                    s3_origin_config: Some(s3_origin_config),
                    custom_origin_config: None,
                };
                (origin, Some(logical_oai_name))
            }
            OriginSource::Website { domain_name } => {
                if domain_name.is_empty() {
                    return Err(format!("Distribution {} must have an origin domain name", myinput.id));
                }
                // S3 website endpoints only speak http
                let origin = Origin {
                    id: origin_id.clone(),
                    domain_name: StrVal::from(domain_name.as_str()),
                    s3_origin_config: None,
                    custom_origin_config: Some(CustomOriginConfig {
                        origin_protocol_policy: OriginProtocolPolicy::HttpOnly,
                        http_port: 80,
                        https_port: 443,
                    }),
                };
                (origin, None)
            }
        };

        let custom_error_responses = match &myinput.spa_fallback_page {
            Some(page) => vec![CustomErrorResponse {
                error_code: 403,
                response_code: 200,
                response_page_path: page.clone(),
                error_caching_min_ttl: 10,
            }],
            None => vec![],
        };
        let to_strings = |methods: &[&str]| methods.iter().map(|m| m.to_string()).collect::<Vec<_>>();
        let distribution = CfnDistribution {
            distribution_config: DistributionConfig {
                enabled: !myinput.disabled,
                comment: myinput.comment.clone(),
                aliases: myinput.aliases.clone(),
                default_root_object: (!myinput.default_root_object.is_empty()).then(|| myinput.default_root_object.clone()),
                origins: vec![origin],
                default_cache_behavior: DefaultCacheBehavior {
                    target_origin_id: origin_id,
                    viewer_protocol_policy: myinput.viewer_protocol_policy,
                    allowed_methods: to_strings(ALL_METHODS),
                    cached_methods: to_strings(CACHED_METHODS),
                    cache_policy_id: CACHING_OPTIMIZED_POLICY_ID.to_string(),
                    compress: true,
                },
                viewer_certificate: myinput.certificate_arn.clone().map(ViewerCertificate::sni),
                custom_error_responses,
                http_version: "http2".to_string(),
                ipv6_enabled: true,
                price_class: myinput.price_class.clone(),
            },
            tags: myinput.tags.clone(),
        };

        let logical_distr_name = logical_id(&[&myinput.id]);
        stackinp.add_resource(Resource::new(logical_distr_name.clone(), distribution));
        Ok(outputs::Outputs { logical_distr_name, logical_oai_name })
    }
}
