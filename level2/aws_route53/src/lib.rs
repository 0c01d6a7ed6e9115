use ::aws_cfn_stack::{CfnResource, StrVal};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordType {
    A,
    #[serde(rename = "AAAA")]
    Aaaa,
    #[serde(rename = "CNAME")]
    Cname,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AliasTarget {
    #[serde(rename = "DNSName")]
    pub dns_name: StrVal,
    #[serde(rename = "HostedZoneId")]
    pub hosted_zone_id: String,
    #[serde(rename = "EvaluateTargetHealth")]
    pub evaluate_target_health: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnRecordSet {
    pub name: String,
    #[serde(rename = "Type")]
    pub record_type: RecordType,
    pub alias_target: AliasTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosted_zone_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosted_zone_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// hosted zone name must end in .
pub fn normalize_zone_name(zone_name: &str) -> String {
    let mut out = zone_name.to_ascii_lowercase();
    if !out.ends_with('.') {
        out.push('.');
    }
    out
}

/// true if `domain` is the zone apex or any name below it.
pub fn zone_covers(zone_name: &str, domain: &str) -> bool {
    let zone = normalize_zone_name(zone_name);
    let domain = normalize_zone_name(domain);
    domain == zone || domain.ends_with(&format!(".{zone}"))
}

/// best guess at the hosted zone of a domain: its last two labels.
pub fn guess_hosted_zone_name(domain: &str) -> Option<String> {
    let name_components: Vec<&str> = domain.trim_end_matches('.').split('.').collect();
    if name_components.len() < 2 || name_components.iter().any(|c| c.is_empty()) {
        return None;
    }
    let last_two = &name_components[name_components.len() - 2..];
    Some(normalize_zone_name(&last_two.join(".")))
}

impl CfnResource for CfnRecordSet {
    fn type_string(&self) -> &'static str {
        "AWS::Route53::RecordSet"
    }
    fn properties(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
    fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("Route53 record must have a name. Example mysubdomain.mywebsite.com".to_string());
        }
        match (&self.hosted_zone_id, &self.hosted_zone_name) {
            (Some(_), Some(_)) | (None, None) => {
                return Err(format!("Record {} must name its hosted zone by either id or name", self.name));
            }
            (None, Some(zone_name)) if !zone_covers(zone_name, &self.name) => {
                return Err(format!("Record {} is not inside hosted zone {}", self.name, zone_name));
            }
            _ => {}
        }
        if self.alias_target.hosted_zone_id.is_empty() {
            return Err(format!("Alias target of {} must have a hosted zone id", self.name));
        }
        Ok(())
    }
}

/// alias records pointing a domain at an AWS managed endpoint
/// (cloudfront distribution, load balancer, ...).
pub mod aws_route53 {
    use ::aws_cfn_stack::{aws_cfn_stack, logical_id, Resource, StrVal};

    use super::{guess_hosted_zone_name, normalize_zone_name, zone_covers, AliasTarget, CfnRecordSet, RecordType};

    pub mod outputs {
        use ::aws_cfn_stack::get_ref;
        use serde_json::Value;

        pub struct Outputs {
            pub logical_record_name: String,
        }

        impl Outputs {
            /// a record set's Ref is the record's domain name.
            pub fn domain_name(&self) -> Value {
                get_ref(&self.logical_record_name)
            }
        }
    }

    pub struct Input {
        /// construct id, used to derive the logical name.
        pub id: String,
        /// the record's domain name, eg: `www.mywebsite.com`.
        pub name: String,
        pub record_type: RecordType,
        pub alias_dns_name: StrVal,
        /// the zone the alias target lives in, eg: the fixed cloudfront zone.
        pub alias_hosted_zone_id: String,
        /// takes precedence over `hosted_zone_name` when both are set.
        pub hosted_zone_id: String,
        /// when neither the id nor the name are set, the zone is guessed
        /// from the last two labels of `name`.
        pub hosted_zone_name: String,
    }

    impl Default for Input {
        fn default() -> Self {
            Self {
                id: String::new(),
                name: String::new(),
                record_type: RecordType::A,
                alias_dns_name: StrVal::default(),
                alias_hosted_zone_id: String::new(),
                hosted_zone_id: String::new(),
                hosted_zone_name: String::new(),
            }
        }
    }

    pub fn config(myinput: &mut Input, stackinp: &mut aws_cfn_stack::Input) -> Result<outputs::Outputs, String> {
        if myinput.id.is_empty() {
            return Err("Record must have a construct id".to_string());
        }
        let name = myinput.name.trim_end_matches('.').to_ascii_lowercase();
        if name.is_empty() {
            return Err("Route53 record must have a name. Example mysubdomain.mywebsite.com".to_string());
        }
        // the zone must cover the record even when records are placed by zone id
        if !myinput.hosted_zone_name.is_empty() && !zone_covers(&myinput.hosted_zone_name, &name) {
            return Err(format!("Domain {} is not {} or a subdomain of it", name, myinput.hosted_zone_name));
        }
        let (hosted_zone_id, hosted_zone_name) = if !myinput.hosted_zone_id.is_empty() {
            (Some(myinput.hosted_zone_id.trim_start_matches("/hostedzone/").to_string()), None)
        } else if !myinput.hosted_zone_name.is_empty() {
            (None, Some(normalize_zone_name(&myinput.hosted_zone_name)))
        } else {
            let guessed = guess_hosted_zone_name(&name)
                .ok_or_else(|| format!("Cannot guess the hosted zone of {}. Must be a domain", name))?;
            (None, Some(guessed))
        };
        let record = CfnRecordSet {
            name: name.clone(),
            record_type: myinput.record_type,
            alias_target: AliasTarget {
                dns_name: myinput.alias_dns_name.clone(),
                hosted_zone_id: myinput.alias_hosted_zone_id.clone(),
                evaluate_target_health: false,
            },
            hosted_zone_id,
            hosted_zone_name,
            comment: Some(name),
        };
        let logical_record_name = logical_id(&[&myinput.id]);
        stackinp.add_resource(Resource::new(logical_record_name.clone(), record));
        Ok(outputs::Outputs { logical_record_name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::aws_route53::*;
    use ::aws_cfn_stack::{aws_cfn_stack, get_att, Environment};

    fn stack() -> aws_cfn_stack::Input {
        aws_cfn_stack::Input::new("acme-prod-web", Environment::default())
    }

    fn alias_input(name: &str, zone_name: &str, zone_id: &str) -> Input {
        Input {
            id: "acme-prod-web-record".into(),
            name: name.into(),
            alias_dns_name: StrVal::from(get_att("Dist", "DomainName")),
            alias_hosted_zone_id: "Z2FDTNDATAQYW2".into(),
            hosted_zone_name: zone_name.into(),
            hosted_zone_id: zone_id.into(),
            ..Default::default()
        }
    }

    fn record_props(stack: &aws_cfn_stack::Input) -> Value {
        stack.resources[0].properties.properties().unwrap_or(Value::Null)
    }

    #[test]
    fn zone_coverage() {
        assert!(zone_covers("acme.com", "acme.com"));
        assert!(zone_covers("acme.com.", "www.acme.com"));
        assert!(zone_covers("ACME.com", "a.b.acme.com"));
        assert!(!zone_covers("acme.com", "notacme.com"));
        assert!(!zone_covers("www.acme.com", "acme.com"));
    }

    #[test]
    fn zone_names_get_a_trailing_dot() {
        assert_eq!(normalize_zone_name("acme.com"), "acme.com.");
        assert_eq!(normalize_zone_name("acme.com."), "acme.com.");
        assert_eq!(guess_hosted_zone_name("www.sub.acme.com").as_deref(), Some("acme.com."));
        assert_eq!(guess_hosted_zone_name("localhost"), None);
    }

    #[test]
    fn alias_record_by_zone_name() {
        let mut s = stack();
        let out = config(&mut alias_input("acme.com", "acme.com", ""), &mut s).expect("valid record");
        assert_eq!(out.logical_record_name, "AcmeProdWebRecord");
        let p = record_props(&s);
        assert_eq!(p["Name"], "acme.com");
        assert_eq!(p["Type"], "A");
        assert_eq!(p["HostedZoneName"], "acme.com.");
        assert!(p.get("HostedZoneId").is_none());
        assert_eq!(p["AliasTarget"]["HostedZoneId"], "Z2FDTNDATAQYW2");
        assert_eq!(p["AliasTarget"]["DNSName"], get_att("Dist", "DomainName"));
        assert!(s.resources[0].properties.validate().is_ok());
    }

    #[test]
    fn zone_id_wins_over_zone_name() {
        let mut s = stack();
        config(&mut alias_input("www.acme.com", "acme.com", "/hostedzone/Z123"), &mut s).expect("valid record");
        let p = record_props(&s);
        assert_eq!(p["HostedZoneId"], "Z123");
        assert!(p.get("HostedZoneName").is_none());
    }

    #[test]
    fn domain_outside_zone_is_rejected() {
        let mut s = stack();
        let err = config(&mut alias_input("acme.org", "acme.com", ""), &mut s).err().unwrap_or_default();
        assert!(err.contains("subdomain"));
        assert!(s.resources.is_empty());
    }

    #[test]
    fn missing_zone_is_guessed() {
        let mut s = stack();
        config(&mut alias_input("shop.acme.com", "", ""), &mut s).expect("valid record");
        assert_eq!(record_props(&s)["HostedZoneName"], "acme.com.");
    }
}
