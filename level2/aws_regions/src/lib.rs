/// regions a stack can be placed in. Kept sorted, `is_valid_region` binary searches it.
pub const VALID_AWS_REGIONS: &[&str] = &[
    "af-south-1",
    "ap-east-1",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ca-central-1",
    "ca-west-1",
    "cn-north-1",
    "cn-northwest-1",
    "eu-central-1",
    "eu-central-2",
    "eu-north-1",
    "eu-south-1",
    "eu-south-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "il-central-1",
    "me-central-1",
    "me-south-1",
    "sa-east-1",
    "us-east-1",
    "us-east-2",
    "us-gov-east-1",
    "us-gov-west-1",
    "us-west-1",
    "us-west-2",
];

/// CloudFront only accepts ACM certificates issued in this region.
pub const CLOUDFRONT_CERTIFICATE_REGION: &str = "us-east-1";

pub fn is_valid_region(r: &str) -> bool {
    VALID_AWS_REGIONS.binary_search(&r).is_ok()
}

pub fn verify_region(r: &str) -> Option<String> {
    if is_valid_region(r) {
        return None;
    }
    Some(format!("Invalid region code {:?}\nMust be one of {}", r, VALID_AWS_REGIONS.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_table_is_sorted_and_unique() {
        assert!(VALID_AWS_REGIONS.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn default_and_certificate_regions_are_valid() {
        assert!(is_valid_region("ap-southeast-1"));
        assert!(is_valid_region(CLOUDFRONT_CERTIFICATE_REGION));
        assert!(verify_region("ap-southeast-1").is_none());
        assert!(verify_region("mars-north-1").unwrap_or_default().contains("Invalid region code"));
        assert!(!is_valid_region("AP-SOUTHEAST-1"));
    }
}
