//! Candidate deployable artifacts and their source references.

use serde::{Deserialize, Serialize};
use stackgate_state::ContentDigest;

use super::error::{PipelineError, Result};

/// Where an artifact came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SourceRef {
    /// Repository identity (e.g. "org/infra").
    pub repository: String,
    /// Branch name without the `refs/heads/` prefix.
    pub branch: String,
    /// Commit SHA.
    pub commit_sha: String,
}

impl SourceRef {
    pub fn new(
        repository: impl Into<String>,
        branch: impl Into<String>,
        commit_sha: impl Into<String>,
    ) -> Self {
        Self {
            repository: repository.into(),
            branch: branch.into(),
            commit_sha: commit_sha.into(),
        }
    }

    /// Short commit form (first 8 chars).
    pub fn short_sha(&self) -> &str {
        match self.commit_sha.char_indices().nth(8) {
            Some((end, _)) => &self.commit_sha[..end],
            None => &self.commit_sha,
        }
    }
}

/// Bounds on a commit id accepted from outside: abbreviated SHA-1 up to a
/// full SHA-256 object name.
const COMMIT_SHA_LEN: std::ops::RangeInclusive<usize> = 7..=64;

/// Whether `s` is a plain hexadecimal commit id (7 to 64 ASCII hex digits).
///
/// Anything else, including option-like strings and revision expressions,
/// is refused before it can reach `git`.
pub fn is_commit_sha(s: &str) -> bool {
    COMMIT_SHA_LEN.contains(&s.len()) && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// A named resource the template declares.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceDeclaration {
    /// Logical id inside the template.
    pub logical_id: String,
    /// Resource type (e.g. "AWS::S3::Bucket").
    pub resource_type: String,
}

impl ResourceDeclaration {
    pub fn new(logical_id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            logical_id: logical_id.into(),
            resource_type: resource_type.into(),
        }
    }
}

/// An immutable deployable template plus its identity.
///
/// Fields are private: once built, neither the body nor the derived digest
/// and resource list can change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artifact {
    source: SourceRef,
    template_path: String,
    body: Vec<u8>,
    digest: ContentDigest,
    resources: Vec<ResourceDeclaration>,
}

impl Artifact {
    /// Build an artifact from a template body, extracting its resource
    /// declarations from the top-level `Resources` mapping.
    pub fn from_template(
        source: SourceRef,
        template_path: impl Into<String>,
        body: Vec<u8>,
    ) -> Result<Self> {
        let resources = extract_resources(&body)?;
        Ok(Self::with_resources(source, template_path, body, resources))
    }

    /// Build an artifact with an explicit resource list.
    pub fn with_resources(
        source: SourceRef,
        template_path: impl Into<String>,
        body: Vec<u8>,
        mut resources: Vec<ResourceDeclaration>,
    ) -> Self {
        resources.sort();
        let digest = ContentDigest::from_bytes(&body);
        Self {
            source,
            template_path: template_path.into(),
            body,
            digest,
            resources,
        }
    }

    pub fn source(&self) -> &SourceRef {
        &self.source
    }

    pub fn template_path(&self) -> &str {
        &self.template_path
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn digest(&self) -> &ContentDigest {
        &self.digest
    }

    pub fn resources(&self) -> &[ResourceDeclaration] {
        &self.resources
    }

    /// Distinct resource types declared by the template.
    pub fn resource_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self
            .resources
            .iter()
            .map(|r| r.resource_type.as_str())
            .collect();
        types.sort_unstable();
        types.dedup();
        types
    }

    /// File extension of the template, used when handing it to tools.
    pub fn extension(&self) -> &str {
        std::path::Path::new(&self.template_path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("yaml")
    }
}

/// Read `Resources.<LogicalId>.Type` from a JSON or YAML template.
///
/// JSON is a subset of YAML, so a single YAML parse handles both.
fn extract_resources(body: &[u8]) -> Result<Vec<ResourceDeclaration>> {
    let doc: serde_yml::Value = serde_yml::from_slice(body)
        .map_err(|e| PipelineError::Source(format!("template is not valid YAML/JSON: {}", e)))?;

    let Some(resources) = doc.get("Resources").and_then(|r| r.as_mapping()) else {
        return Err(PipelineError::Source(
            "template has no top-level Resources mapping".to_string(),
        ));
    };

    let mut declared = Vec::with_capacity(resources.len());
    for (logical_id, decl) in resources {
        let logical_id = logical_id.as_str().ok_or_else(|| {
            PipelineError::Source("resource logical id must be a string".to_string())
        })?;
        let resource_type = decl
            .get("Type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| {
                PipelineError::Source(format!("resource '{}' has no Type", logical_id))
            })?;
        declared.push(ResourceDeclaration::new(logical_id, resource_type));
    }
    Ok(declared)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceRef {
        SourceRef::new("org/infra", "main", "0123456789abcdef")
    }

    const YAML: &str = r#"
AWSTemplateFormatVersion: "2010-09-09"
Resources:
  LogsBucket:
    Type: AWS::S3::Bucket
  AppQueue:
    Type: AWS::SQS::Queue
  DeadLetters:
    Type: AWS::SQS::Queue
"#;

    #[test]
    fn test_extracts_resources_from_yaml() {
        let artifact =
            Artifact::from_template(source(), "template.yaml", YAML.as_bytes().to_vec()).unwrap();
        assert_eq!(artifact.resources().len(), 3);
        assert_eq!(
            artifact.resource_types(),
            vec!["AWS::S3::Bucket", "AWS::SQS::Queue"]
        );
    }

    #[test]
    fn test_extracts_resources_from_json() {
        let json = r#"{"Resources": {"Topic": {"Type": "AWS::SNS::Topic"}}}"#;
        let artifact =
            Artifact::from_template(source(), "template.json", json.as_bytes().to_vec()).unwrap();
        assert_eq!(
            artifact.resources(),
            &[ResourceDeclaration::new("Topic", "AWS::SNS::Topic")]
        );
        assert_eq!(artifact.extension(), "json");
    }

    #[test]
    fn test_digest_identifies_content() {
        let a = Artifact::from_template(source(), "t.yaml", YAML.as_bytes().to_vec()).unwrap();
        let b = Artifact::from_template(source(), "t.yaml", YAML.as_bytes().to_vec()).unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest(), &ContentDigest::from_bytes(YAML.as_bytes()));
    }

    #[test]
    fn test_missing_resources_is_source_error() {
        let err = Artifact::from_template(source(), "t.yaml", b"Outputs: {}".to_vec()).unwrap_err();
        assert!(matches!(err, PipelineError::Source(_)));
    }

    #[test]
    fn test_resource_without_type_is_rejected() {
        let body = b"Resources:\n  Broken:\n    Properties: {}\n".to_vec();
        let err = Artifact::from_template(source(), "t.yaml", body).unwrap_err();
        assert!(err.to_string().contains("Broken"));
    }

    #[test]
    fn test_short_sha() {
        assert_eq!(source().short_sha(), "01234567");
    }

    #[test]
    fn test_commit_sha_shape() {
        assert!(is_commit_sha("a1b2c3d"));
        assert!(is_commit_sha(&"f".repeat(40)));
        assert!(is_commit_sha(&"0".repeat(64)));
        assert!(!is_commit_sha("a1b2c3"));
        assert!(!is_commit_sha(&"f".repeat(65)));
        assert!(!is_commit_sha("--output=/tmp/x"));
        assert!(!is_commit_sha("HEAD~1"));
        assert!(!is_commit_sha("deadbeeg"));
        assert!(!is_commit_sha("ééééééééé"));
    }

    #[test]
    fn test_short_sha_never_splits_a_character() {
        let ascii = SourceRef::new("org/infra", "main", "0123456789abcdef");
        assert_eq!(ascii.short_sha(), "01234567");

        let short = SourceRef::new("org/infra", "main", "abc");
        assert_eq!(short.short_sha(), "abc");

        let wide = SourceRef::new("org/infra", "main", "ééééééééé");
        assert_eq!(wide.short_sha(), "éééééééé");
    }
}
