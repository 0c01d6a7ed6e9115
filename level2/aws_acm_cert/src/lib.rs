use ::aws_cfn_stack::{CfnResource, Tag};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DomainValidationOption {
    pub domain_name: String,
    pub hosted_zone_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CertificateValidationMethodEnum {
    #[serde(rename = "DNS")]
    Dns,
    #[serde(rename = "EMAIL")]
    Email,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnCertificate {
    pub domain_name: String,
    pub validation_method: CertificateValidationMethodEnum,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub domain_validation_options: Vec<DomainValidationOption>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

/// the domain you're requesting a certificate for. Must be fully qualified. Can have 1 optional wildcard.
/// Examples of valid values:
/// - www.mysite.com
/// - multiple.sub.domains.mysite.com
/// - mysite.com
/// - *.mysite.com
/// Examples of invalid values:
/// - *.something.*.mysite.com
/// - cannotendwithdot.com.
pub fn verify_domain_name(domain_name: &str) -> Option<String> {
    if domain_name.is_empty() {
        return Some("Must provide a domain name".to_string());
    }
    if domain_name.len() > 253 {
        return Some(format!("Domain name {} is longer than 253 characters", domain_name));
    }
    if domain_name.contains('*') {
        if domain_name.matches('*').count() > 1 {
            return Some(format!("Must only provide 1 wildcard. {} is invalid.", domain_name));
        }
        if !domain_name.starts_with("*.") {
            return Some(format!("If using a wildcard, it must be the first component of your domain, eg: \"*.something.com\". {} is invalid.", domain_name));
        }
    }
    let labels: Vec<&str> = domain_name.split('.').collect();
    if labels.len() < 2 {
        return Some(format!("Domain name {} must be fully qualified", domain_name));
    }
    for (i, label) in labels.iter().enumerate() {
        if i == 0 && *label == "*" {
            continue;
        }
        if label.is_empty() || label.len() > 63 {
            return Some(format!("Domain name {} has an empty or too long label", domain_name));
        }
        let valid = label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid || label.starts_with('-') || label.ends_with('-') {
            return Some(format!("Domain name {} has an invalid label {:?}", domain_name, label));
        }
    }
    None
}

impl CfnResource for CfnCertificate {
    fn type_string(&self) -> &'static str {
        "AWS::CertificateManager::Certificate"
    }
    fn properties(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
    fn validate(&self) -> Result<(), String> {
        match verify_domain_name(&self.domain_name) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// true when a certificate for `cert_domain` is valid for `domain`: the same
/// name, or a wildcard one level above it. Case and a trailing dot are ignored.
pub fn certificate_covers(cert_domain: &str, domain: &str) -> bool {
    let cert_domain = cert_domain.trim_end_matches('.').to_ascii_lowercase();
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    if cert_domain.is_empty() || domain.is_empty() {
        return false;
    }
    if cert_domain == domain {
        return true;
    }
    match (cert_domain.strip_prefix("*."), domain.split_once('.')) {
        (Some(parent), Some((label, rest))) => !label.is_empty() && label != "*" && rest == parent,
        _ => false,
    }
}

/// region an ACM certificate ARN was issued in, if the ARN is well formed.
pub fn certificate_arn_region(arn: &str) -> Option<&str> {
    let mut parts = arn.splitn(6, ':');
    let (prefix, _partition, service, region) = (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
    let _account = parts.next()?;
    let resource = parts.next()?;
    if prefix != "arn" || service != "acm" || !resource.starts_with("certificate/") || region.is_empty() {
        return None;
    }
    Some(region)
}

/// This module either reuses an existing ACM certificate by ARN, or requests a new
/// one. A requested certificate uses DNS validation, which completes on its own only
/// when the domain is hosted in Route 53 in your account and the hosted zone id is given.
pub mod aws_acm_cert {
    use ::aws_cfn_stack::{aws_cfn_stack, get_ref, logical_id, Resource, Tag};

    use super::{certificate_arn_region, CertificateValidationMethodEnum, CfnCertificate, DomainValidationOption};

    pub mod outputs {
        use serde_json::Value;

        pub struct Outputs {
            /// an expression (requested) or a literal (existing) resolving to the certificate ARN.
            pub arn: Value,
            /// this is the logical name in cloudformation for your cert when one was requested.
            pub logical_cert_name: Option<String>,
        }

        impl Outputs {
            pub fn is_requested(&self) -> bool {
                self.logical_cert_name.is_some()
            }
        }
    }

    #[derive(Default)]
    pub struct Input {
        /// construct id, used to derive the logical name.
        pub id: String,
        pub domain_name: String,
        /// an existing certificate to reuse. Leave empty to request a new one.
        pub certificate_arn: String,
        /// The hosted zone ID of where your domain is hosted in Route53.
        /// Must be provided as the actual ID without the `/hostedzone/` prefix.
        /// Optional: without it the DNS validation records must be created by hand.
        pub hosted_zone_id: String,
        pub tags: Vec<Tag>,
    }

    pub fn config(self_input: &mut Input, stackinp: &mut aws_cfn_stack::Input) -> Result<outputs::Outputs, String> {
        if !self_input.certificate_arn.is_empty() {
            if certificate_arn_region(&self_input.certificate_arn).is_none() {
                return Err(format!("Invalid certificate ARN {:?}\nExpected arn:<partition>:acm:<region>:<account>:certificate/<id>", self_input.certificate_arn));
            }
            return Ok(outputs::Outputs {
                arn: serde_json::Value::String(self_input.certificate_arn.clone()),
                logical_cert_name: None,
            });
        }
        if self_input.id.is_empty() {
            return Err("Certificate must have a construct id".to_string());
        }
        let domain_validation_options = if self_input.hosted_zone_id.is_empty() {
            vec![]
        } else {
            vec![DomainValidationOption {
                domain_name: self_input.domain_name.clone(),
                hosted_zone_id: self_input.hosted_zone_id.trim_start_matches("/hostedzone/").to_string(),
            }]
        };
        let cert = CfnCertificate {
            domain_name: self_input.domain_name.clone(),
            validation_method: CertificateValidationMethodEnum::Dns,
            domain_validation_options,
            tags: self_input.tags.clone(),
        };
        let logical_cert_name = logical_id(&[&self_input.id]);
        stackinp.add_resource(Resource::new(logical_cert_name.clone(), cert));
        // a certificate's Ref is its ARN
        Ok(outputs::Outputs {
            arn: get_ref(&logical_cert_name),
            logical_cert_name: Some(logical_cert_name),
        })
    }
}
