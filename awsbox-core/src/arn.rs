//! Amazon Resource Name generation

/// Produces canonical ARNs for resources owned by this process.
///
/// Account and region are fixed at startup; every service shares one
/// generator so all emitted ARNs agree on them.
#[derive(Debug, Clone)]
pub struct ArnGenerator {
    pub account_id: String,
    pub region: String,
}

impl ArnGenerator {
    pub fn new(account_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            region: region.into(),
        }
    }

    /// Render `arn:aws:<service>:<region>:<account>:<type>/<id>`.
    pub fn generate(&self, service: &str, resource_type: &str, id: &str) -> String {
        format!(
            "arn:aws:{}:{}:{}:{}/{}",
            service, self.region, self.account_id, resource_type, id
        )
    }
}

impl Default for ArnGenerator {
    fn default() -> Self {
        Self::new("12345", "us-east-1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_arn() {
        let gen = ArnGenerator::default();
        assert_eq!(
            gen.generate("kinesis", "stream", "my-stream"),
            "arn:aws:kinesis:us-east-1:12345:stream/my-stream"
        );
    }

    #[test]
    fn test_custom_account_and_region() {
        let gen = ArnGenerator::new("000000000000", "eu-west-1");
        assert_eq!(
            gen.generate("kms", "key", "abc"),
            "arn:aws:kms:eu-west-1:000000000000:key/abc"
        );
    }
}
