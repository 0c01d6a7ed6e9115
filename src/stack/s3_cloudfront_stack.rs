use ::aws_acm_cert::{aws_acm_cert, certificate_arn_region, certificate_covers};
use ::aws_cfn_stack::{aws_cfn_stack, tags, App, DeletionPolicy, Environment, StrVal};
use ::aws_cloudfront_distribution::{aws_cloudfront_distribution, CLOUDFRONT_HOSTED_ZONE_ID};
use ::aws_regions::CLOUDFRONT_CERTIFICATE_REGION;
use ::aws_route53::aws_route53;
use ::aws_s3::aws_s3;
use ::aws_s3::ObjectOwnership;
use serde_json::Value;

use super::{stack_tags, validate_environment};
use crate::config::Stage;
use crate::error::{ConstructResult, DeclarationError};

#[derive(Debug, Clone, Default)]
pub struct Route53Props {
    pub domain_name: String,
    pub hosted_zone_name: String,
    /// optional. When known, records are placed by id and certificates validate on their own.
    pub hosted_zone_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct AcmProps {
    pub domain_name: String,
    /// reuse this certificate instead of requesting one.
    pub certificate_arn: String,
}

#[derive(Debug, Clone)]
pub struct BucketStackProps {
    pub env: Environment,
    pub stage: Stage,
    pub project_name: String,
    /// used as the distribution's comment.
    pub distribution_name: String,
    /// used as the requested certificate's Name tag.
    pub certificate_name: String,
    pub route53: Route53Props,
    pub acm: AcmProps,
    /// empty the bucket on stack deletion so teardown does not fail on a non-empty bucket.
    pub auto_delete_objects: bool,
}

/// the website bucket as seen from another stack.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketRef {
    pub stack_name: String,
    /// physical name, known at declaration time.
    pub bucket_name: String,
    /// `Fn::ImportValue` of the exported name and ARN.
    pub name: Value,
    pub arn: Value,
}

/// the distribution as seen from another stack.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionRef {
    pub stack_name: String,
    pub distribution_id: Value,
}

/// website bucket, certificate, cloudfront distribution and the DNS record pointing at it.
pub struct BucketStack {
    pub stack_name: String,
    pub s3_bucket: BucketRef,
    pub distribution: DistributionRef,
    pub certificate_requested: bool,
}

impl BucketStack {
    pub fn new(scope: &mut App, id: &str, props: BucketStackProps) -> Result<Self, DeclarationError> {
        validate_environment(&props.env)?;
        if props.route53.domain_name.is_empty() {
            return Err(DeclarationError::Config {
                variable: "DOMAIN_NAME",
                message: "must be set, the distribution is served on it".to_string(),
            });
        }
        let mut stack = aws_cfn_stack::Input::new(id, props.env.clone());
        stack.description = Some(format!("{id}: website bucket, CDN and DNS"));
        let common_tags = stack_tags(&props.project_name, props.stage);

        let bucket_id = format!("{id}-s3");
        let mut bucket_input = aws_s3::Input {
            id: bucket_id.clone(),
            bucket_name: bucket_id.clone(),
            website: Some(aws_s3::spa_website()),
            public_access: aws_s3::PublicAccess::BlockAll,
            object_ownership: Some(ObjectOwnership::BucketOwnerPreferred),
            removal_policy: DeletionPolicy::Delete,
            auto_delete_objects: props.auto_delete_objects,
            tags: common_tags.clone(),
            ..Default::default()
        };
        let bucket = aws_s3::config(&mut bucket_input, &mut stack).in_construct(&bucket_id)?;

        let cert_id = format!("{id}-cert");
        if props.acm.certificate_arn.is_empty() {
            if !certificate_covers(&props.acm.domain_name, &props.route53.domain_name) {
                return Err(DeclarationError::Construct {
                    construct: cert_id,
                    message: format!(
                        "Certificate for {:?} does not cover {:?}, the domain the distribution and record serve",
                        props.acm.domain_name, props.route53.domain_name
                    ),
                });
            }
        } else if let Some(region) = certificate_arn_region(&props.acm.certificate_arn) {
            if region != CLOUDFRONT_CERTIFICATE_REGION {
                return Err(DeclarationError::Construct {
                    construct: cert_id,
                    message: format!(
                        "Certificate {} is in {}\nCloudFront only accepts certificates from {}",
                        props.acm.certificate_arn, region, CLOUDFRONT_CERTIFICATE_REGION
                    ),
                });
            }
        }
        let mut cert_tags = common_tags.clone();
        cert_tags.extend(tags(&[("Name", &props.certificate_name)]));
        let mut cert_input = aws_acm_cert::Input {
            id: cert_id.clone(),
            domain_name: props.acm.domain_name.clone(),
            certificate_arn: props.acm.certificate_arn.clone(),
            hosted_zone_id: props.route53.hosted_zone_id.clone(),
            tags: cert_tags,
        };
        let cert = aws_acm_cert::config(&mut cert_input, &mut stack).in_construct(&cert_id)?;
        if cert.is_requested() && props.env.region != CLOUDFRONT_CERTIFICATE_REGION {
            tracing::warn!(
                stack = id,
                region = %props.env.region,
                "requesting a certificate outside {}, cloudfront will not accept it. Set CERTIFICATE_ARN to a us-east-1 certificate",
                CLOUDFRONT_CERTIFICATE_REGION
            );
        }

        let dist_id = format!("{id}-cf-dist");
        let mut dist_input = aws_cloudfront_distribution::Input {
            id: dist_id.clone(),
            origin_id: format!("{id}-origin"),
            origin: aws_cloudfront_distribution::OriginSource::S3Bucket {
                logical_bucket_name: bucket.logical_bucket_name.clone(),
            },
            comment: Some(props.distribution_name.clone()),
            aliases: vec![props.route53.domain_name.clone()],
            certificate_arn: Some(StrVal::from(cert.arn.clone())),
            spa_fallback_page: Some("/index.html".to_string()),
            tags: common_tags.clone(),
            ..Default::default()
        };
        let distribution = aws_cloudfront_distribution::config(&mut dist_input, &mut stack).in_construct(&dist_id)?;

        let record_id = format!("{id}-record");
        let mut record_input = aws_route53::Input {
            id: record_id.clone(),
            name: props.route53.domain_name.clone(),
            alias_dns_name: StrVal::from(distribution.domain_name()),
            alias_hosted_zone_id: CLOUDFRONT_HOSTED_ZONE_ID.to_string(),
            hosted_zone_id: props.route53.hosted_zone_id.clone(),
            hosted_zone_name: props.route53.hosted_zone_name.clone(),
            ..Default::default()
        };
        let record = aws_route53::config(&mut record_input, &mut stack).in_construct(&record_id)?;

        stack.add_output("DistributionDomainName", "domain name of the distribution", distribution.domain_name());
        stack.add_output("SiteDomainName", "domain name the site is served on", record.domain_name());
        let name = stack.export("BucketName", "name of the website bucket", bucket.name());
        let arn = stack.export("BucketArn", "arn of the website bucket", bucket.arn());
        let distribution_id = stack.export("DistributionId", "id of the distribution", distribution.distribution_id());

        tracing::info!(stack = id, resources = stack.resources.len(), certificate_requested = cert.is_requested(), "declared web stack");
        scope.add_stack(stack)?;
        Ok(BucketStack {
            stack_name: id.to_string(),
            s3_bucket: BucketRef { stack_name: id.to_string(), bucket_name: bucket_id, name, arn },
            distribution: DistributionRef { stack_name: id.to_string(), distribution_id },
            certificate_requested: cert.is_requested(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::aws_cfn_stack::{get_att, get_ref, import_value, SavedTemplate};

    const ARN: &str = "arn:aws:acm:us-east-1:123456789012:certificate/0a1b2c3d-aaaa-bbbb-cccc-111122223333";

    fn props(certificate_arn: &str, hosted_zone_id: &str) -> BucketStackProps {
        BucketStackProps {
            env: Environment { account: "".into(), region: "us-east-1".into() },
            stage: Stage::Prod,
            project_name: "acme".into(),
            distribution_name: "acme-prod-distribution".into(),
            certificate_name: "acme-prod-certificate".into(),
            route53: Route53Props {
                domain_name: "acme.com".into(),
                hosted_zone_name: "acme.com".into(),
                hosted_zone_id: hosted_zone_id.into(),
            },
            acm: AcmProps { domain_name: "acme.com".into(), certificate_arn: certificate_arn.into() },
            auto_delete_objects: true,
        }
    }

    fn template(app: &App, name: &str) -> SavedTemplate {
        app.synth_templates()
            .expect("valid app")
            .into_iter()
            .find(|s| s.name == name)
            .map(|s| s.template)
            .expect("stack exists")
    }

    #[test]
    fn declares_bucket_distribution_and_record() {
        let mut app = App::new();
        let web = BucketStack::new(&mut app, "acme-prod-web", props(ARN, "")).expect("valid stack");
        assert_eq!(web.s3_bucket.bucket_name, "acme-prod-web-s3");
        assert_eq!(web.s3_bucket.name, import_value("acme-prod-web:BucketName"));
        assert_eq!(web.distribution.distribution_id, import_value("acme-prod-web:DistributionId"));
        assert!(!web.certificate_requested);

        let t = template(&app, "acme-prod-web");
        let bucket = &t.resources["AcmeProdWebS3"];
        assert_eq!(bucket.properties["BucketName"], "acme-prod-web-s3");
        assert_eq!(bucket.properties["WebsiteConfiguration"]["IndexDocument"], "index.html");
        assert_eq!(bucket.properties["WebsiteConfiguration"]["ErrorDocument"], "index.html");
        assert_eq!(bucket.properties["OwnershipControls"]["Rules"][0]["ObjectOwnership"], "BucketOwnerPreferred");
        assert_eq!(bucket.deletion_policy, Some(DeletionPolicy::Delete));
        assert_eq!(bucket.update_replace_policy, Some(DeletionPolicy::Delete));

        let cfg = &t.resources["AcmeProdWebCfDist"].properties["DistributionConfig"];
        assert_eq!(cfg["Aliases"], serde_json::json!(["acme.com"]));
        assert_eq!(cfg["Origins"][0]["Id"], "acme-prod-web-origin");
        assert_eq!(cfg["Comment"], "acme-prod-distribution");
        assert_eq!(cfg["ViewerCertificate"]["AcmCertificateArn"], ARN);
        assert_eq!(cfg["CustomErrorResponses"].as_array().map(Vec::len), Some(1));
        assert_eq!(cfg["CustomErrorResponses"][0]["ErrorCode"], 403);
        assert_eq!(cfg["CustomErrorResponses"][0]["ResponseCode"], 200);
        assert_eq!(cfg["CustomErrorResponses"][0]["ResponsePagePath"], "/index.html");
        assert_eq!(cfg["CustomErrorResponses"][0]["ErrorCachingMinTTL"], 10);

        let record = &t.resources["AcmeProdWebRecord"].properties;
        assert_eq!(record["Name"], "acme.com");
        assert_eq!(record["Type"], "A");
        assert_eq!(record["HostedZoneName"], "acme.com.");
        assert_eq!(record["AliasTarget"]["HostedZoneId"], "Z2FDTNDATAQYW2");
        assert_eq!(record["AliasTarget"]["DNSName"], get_att("AcmeProdWebCfDist", "DomainName"));

        assert_eq!(t.outputs["DistributionDomainName"].value, get_att("AcmeProdWebCfDist", "DomainName"));
        assert!(t.outputs["DistributionDomainName"].export.is_none());
        assert_eq!(t.outputs["SiteDomainName"].value, get_ref("AcmeProdWebRecord"));
        assert_eq!(t.outputs["BucketName"].value, get_ref("AcmeProdWebS3"));
        assert_eq!(t.outputs["DistributionId"].value, get_ref("AcmeProdWebCfDist"));
    }

    #[test]
    fn certificate_arn_means_no_certificate_resource() {
        let mut app = App::new();
        BucketStack::new(&mut app, "acme-prod-web", props(ARN, "")).expect("valid stack");
        let t = template(&app, "acme-prod-web");
        assert_eq!(t.resources_of_type("AWS::CertificateManager::Certificate").count(), 0);
    }

    #[test]
    fn missing_certificate_arn_requests_dns_validated_certificate() {
        let mut app = App::new();
        let web = BucketStack::new(&mut app, "acme-prod-web", props("", "Z0123")).expect("valid stack");
        assert!(web.certificate_requested);
        let t = template(&app, "acme-prod-web");
        let certs: Vec<_> = t.resources_of_type("AWS::CertificateManager::Certificate").collect();
        assert_eq!(certs.len(), 1);
        let (logical, cert) = certs[0];
        assert_eq!(cert.properties["ValidationMethod"], "DNS");
        assert_eq!(cert.properties["DomainValidationOptions"][0]["HostedZoneId"], "Z0123");
        let cfg = &t.resources["AcmeProdWebCfDist"].properties["DistributionConfig"];
        assert_eq!(cfg["ViewerCertificate"]["AcmCertificateArn"], get_ref(logical));
        // zone id wins for the record
        assert_eq!(t.resources["AcmeProdWebRecord"].properties["HostedZoneId"], "Z0123");
    }

    #[test]
    fn bucket_is_private_and_read_through_the_distribution() {
        let mut app = App::new();
        BucketStack::new(&mut app, "acme-prod-web", props(ARN, "")).expect("valid stack");
        let t = template(&app, "acme-prod-web");
        let bucket = &t.resources["AcmeProdWebS3"].properties;
        assert_eq!(bucket["PublicAccessBlockConfiguration"]["BlockPublicPolicy"], true);
        let (_, policy) = t.resources_of_type("AWS::S3::BucketPolicy").next().expect("bucket policy");
        let statement = &policy.properties["PolicyDocument"]["Statement"][0];
        assert_eq!(statement["Action"], serde_json::json!(["s3:GetObject"]));
        assert!(statement["Principal"].get("CanonicalUser").is_some());
        assert_eq!(t.resources_of_type("Custom::S3AutoDeleteObjects").count(), 1);
    }

    #[test]
    fn invalid_inputs_are_declaration_errors() {
        let mut app = App::new();
        let mut no_domain = props(ARN, "");
        no_domain.route53.domain_name = "".into();
        assert!(matches!(BucketStack::new(&mut app, "acme-prod-web", no_domain), Err(DeclarationError::Config { variable: "DOMAIN_NAME", .. })));

        let mut outside_zone = props(ARN, "");
        outside_zone.route53.domain_name = "acme.org".into();
        assert!(matches!(BucketStack::new(&mut app, "acme-prod-web", outside_zone), Err(DeclarationError::Construct { .. })));

        let mut bad_wildcard = props("", "");
        bad_wildcard.acm.domain_name = "*.*.acme.com".into();
        assert!(matches!(BucketStack::new(&mut App::new(), "acme-prod-web", bad_wildcard), Err(DeclarationError::Construct { .. })));
    }

    #[test]
    fn requested_certificate_must_cover_the_served_domain() {
        let mut other = props("", "");
        other.acm.domain_name = "other.com".into();
        let mut app = App::new();
        match BucketStack::new(&mut app, "acme-prod-web", other) {
            Err(DeclarationError::Construct { construct, message }) => {
                assert_eq!(construct, "acme-prod-web-cert");
                assert!(message.contains("other.com"));
            }
            _ => panic!("mismatched certificate domain must be rejected"),
        }
        assert!(app.stack("acme-prod-web").is_none());

        let mut wildcard = props("", "");
        wildcard.route53.domain_name = "www.acme.com".into();
        wildcard.acm.domain_name = "*.acme.com".into();
        let mut app = App::new();
        BucketStack::new(&mut app, "acme-prod-web", wildcard).expect("wildcard covers www");
        let t = template(&app, "acme-prod-web");
        let (_, cert) = t.resources_of_type("AWS::CertificateManager::Certificate").next().expect("certificate");
        assert_eq!(cert.properties["DomainName"], "*.acme.com");
        assert_eq!(t.resources["AcmeProdWebCfDist"].properties["DistributionConfig"]["Aliases"], serde_json::json!(["www.acme.com"]));
    }

    #[test]
    fn existing_certificate_outside_us_east_1_is_rejected() {
        let mut eu = props("arn:aws:acm:eu-west-1:123456789012:certificate/0a1b2c3d", "");
        eu.env.region = "eu-west-1".into();
        match BucketStack::new(&mut App::new(), "acme-prod-web", eu) {
            Err(DeclarationError::Construct { construct, message }) => {
                assert_eq!(construct, "acme-prod-web-cert");
                assert!(message.contains("eu-west-1"));
            }
            _ => panic!("certificate from another region must be rejected"),
        }
    }
}
