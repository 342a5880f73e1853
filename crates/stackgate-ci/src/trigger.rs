//! Trigger listener: authenticate and classify inbound change notifications.
//!
//! The listener never touches the store. A rejected or ignored delivery
//! leaves no trace beyond a log line; only [`TriggerDecision::Start`] leads
//! to an execution.

use glob_match::glob_match;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use stackgate_core::{is_commit_sha, SourceRef, TriggerEvent};
use tracing::{debug, warn};

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const EVENT_HEADER: &str = "x-github-event";
pub const DELIVERY_HEADER: &str = "x-github-delivery";

const SIGNATURE_PREFIX: &str = "sha256=";
const BRANCH_REF_PREFIX: &str = "refs/heads/";
const PULL_REQUEST_ACTIONS: &[&str] = &["opened", "synchronize", "reopened"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TriggerError {
    #[error("signature verification failed: {0}")]
    Authentication(String),

    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// Header values the listener needs, already extracted from the request.
#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders {
    pub event: Option<String>,
    pub signature: Option<String>,
    pub delivery: Option<String>,
}

impl WebhookHeaders {
    pub fn new(event: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            signature: Some(signature.into()),
            delivery: None,
        }
    }

    pub fn with_delivery(mut self, delivery: impl Into<String>) -> Self {
        self.delivery = Some(delivery.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerDecision {
    Start(TriggerEvent),
    Ignored(String),
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    after: String,
    #[serde(default)]
    deleted: bool,
    repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
struct BranchPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(default)]
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestBody {
    head: BranchPayload,
    base: BranchPayload,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    action: String,
    number: u64,
    pull_request: PullRequestBody,
    repository: RepositoryPayload,
}

/// Verifies and filters webhook deliveries.
pub struct TriggerListener {
    secret: Vec<u8>,
    repository: Option<String>,
    push_branch: String,
    pull_request_base: String,
}

impl TriggerListener {
    /// `push_branch` and `pull_request_base` are glob patterns over branch
    /// names (without `refs/heads/`).
    pub fn new(
        secret: impl Into<Vec<u8>>,
        push_branch: impl Into<String>,
        pull_request_base: impl Into<String>,
    ) -> Self {
        Self {
            secret: secret.into(),
            repository: None,
            push_branch: push_branch.into(),
            pull_request_base: pull_request_base.into(),
        }
    }

    /// Only accept deliveries for this repository (`owner/name`).
    pub fn for_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    /// `sha256=<hex>` signature of `body` under this listener's secret.
    pub fn sign(&self, body: &[u8]) -> String {
        sign_payload(&self.secret, body)
    }

    /// Check a `sha256=<hex>` signature over `message`.
    ///
    /// Used directly by control requests (manual trigger, cancel) that carry
    /// no event type but must be signed with the same secret.
    pub fn authenticate(
        &self,
        signature: Option<&str>,
        message: &[u8],
    ) -> Result<(), TriggerError> {
        let signature = signature.ok_or(TriggerError::MissingHeader(SIGNATURE_HEADER))?;
        self.verify(signature, message)
    }

    /// Authenticate, then classify. Errors mean the delivery is dropped.
    pub fn accept(
        &self,
        headers: &WebhookHeaders,
        body: &[u8],
    ) -> Result<TriggerDecision, TriggerError> {
        if let Err(err) = self.authenticate(headers.signature.as_deref(), body) {
            warn!(delivery = ?headers.delivery, error = %err, "rejected webhook delivery");
            return Err(err);
        }

        let event = headers
            .event
            .as_deref()
            .ok_or(TriggerError::MissingHeader(EVENT_HEADER))?;
        let decision = match event {
            "push" => self.classify_push(body)?,
            "pull_request" => self.classify_pull_request(body)?,
            "ping" => TriggerDecision::Ignored("ping".to_string()),
            other => TriggerDecision::Ignored(format!("unhandled event type {other}")),
        };

        let decision = match (decision, &headers.delivery) {
            (TriggerDecision::Start(trigger), Some(id)) => {
                TriggerDecision::Start(trigger.with_delivery_id(id.clone()))
            }
            (other, _) => other,
        };
        if let TriggerDecision::Ignored(reason) = &decision {
            debug!(event, reason = %reason, "ignored webhook delivery");
        }
        Ok(decision)
    }

    fn verify(&self, signature: &str, body: &[u8]) -> Result<(), TriggerError> {
        let hex_digest = signature
            .strip_prefix(SIGNATURE_PREFIX)
            .ok_or_else(|| TriggerError::Authentication("unsupported signature scheme".into()))?;
        let expected = hex::decode(hex_digest)
            .map_err(|_| TriggerError::Authentication("signature is not hex".into()))?;
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret)
            .map_err(|e| TriggerError::Authentication(e.to_string()))?;
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| TriggerError::Authentication("signature mismatch".into()))
    }

    fn repository_matches(&self, repository: &str) -> bool {
        self.repository
            .as_deref()
            .map_or(true, |expected| expected == repository)
    }

    fn classify_push(&self, body: &[u8]) -> Result<TriggerDecision, TriggerError> {
        let payload: PushPayload = serde_json::from_slice(body)
            .map_err(|e| TriggerError::MalformedPayload(e.to_string()))?;

        if !self.repository_matches(&payload.repository.full_name) {
            return Ok(TriggerDecision::Ignored(format!(
                "repository {} is not watched",
                payload.repository.full_name
            )));
        }
        let Some(branch) = payload.git_ref.strip_prefix(BRANCH_REF_PREFIX) else {
            return Ok(TriggerDecision::Ignored(format!(
                "{} is not a branch",
                payload.git_ref
            )));
        };
        if payload.deleted || payload.after.chars().all(|c| c == '0') {
            return Ok(TriggerDecision::Ignored(format!("branch {branch} was deleted")));
        }
        if !glob_match(&self.push_branch, branch) {
            return Ok(TriggerDecision::Ignored(format!(
                "branch {branch} does not match {}",
                self.push_branch
            )));
        }
        if !is_commit_sha(&payload.after) {
            return Err(TriggerError::MalformedPayload(format!(
                "push target {:?} is not a commit id",
                payload.after
            )));
        }

        Ok(TriggerDecision::Start(TriggerEvent::push(SourceRef::new(
            payload.repository.full_name,
            branch,
            payload.after,
        ))))
    }

    fn classify_pull_request(&self, body: &[u8]) -> Result<TriggerDecision, TriggerError> {
        let payload: PullRequestPayload = serde_json::from_slice(body)
            .map_err(|e| TriggerError::MalformedPayload(e.to_string()))?;

        if !self.repository_matches(&payload.repository.full_name) {
            return Ok(TriggerDecision::Ignored(format!(
                "repository {} is not watched",
                payload.repository.full_name
            )));
        }
        if !PULL_REQUEST_ACTIONS.contains(&payload.action.as_str()) {
            return Ok(TriggerDecision::Ignored(format!(
                "pull request action {}",
                payload.action
            )));
        }
        let base = payload.pull_request.base.git_ref.as_str();
        if !glob_match(&self.pull_request_base, base) {
            return Ok(TriggerDecision::Ignored(format!(
                "base branch {base} does not match {}",
                self.pull_request_base
            )));
        }
        let head = payload.pull_request.head;
        if !is_commit_sha(&head.sha) {
            return Err(TriggerError::MalformedPayload(format!(
                "pull request head {:?} is not a commit id",
                head.sha
            )));
        }

        Ok(TriggerDecision::Start(TriggerEvent::pull_request(
            SourceRef::new(payload.repository.full_name, head.git_ref, head.sha),
            payload.number,
        )))
    }
}

/// `sha256=<hex>` HMAC of `body` under `secret`.
pub fn sign_payload(secret: &[u8], body: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackgate_core::TriggerKind;

    fn listener() -> TriggerListener {
        TriggerListener::new("s3cret", "main", "main").for_repository("org/infra")
    }

    fn push_body(git_ref: &str) -> Vec<u8> {
        serde_json::json!({
            "ref": git_ref,
            "after": "a1b2c3d4e5f6",
            "repository": {"full_name": "org/infra"}
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_push_to_integration_branch_starts_full_path() {
        let l = listener();
        let body = push_body("refs/heads/main");
        let headers = WebhookHeaders::new("push", l.sign(&body)).with_delivery("d-1");
        let decision = l.accept(&headers, &body).unwrap();
        let TriggerDecision::Start(trigger) = decision else {
            panic!("expected start");
        };
        assert_eq!(trigger.kind, TriggerKind::Push);
        assert_eq!(trigger.source.branch, "main");
        assert_eq!(trigger.source.commit_sha, "a1b2c3d4e5f6");
        assert_eq!(trigger.delivery_id.as_deref(), Some("d-1"));
    }

    #[test]
    fn test_bad_signature_is_rejected() {
        let l = listener();
        let body = push_body("refs/heads/main");
        let forged = sign_payload(b"other", &body);
        let err = l
            .accept(&WebhookHeaders::new("push", forged), &body)
            .unwrap_err();
        assert!(matches!(err, TriggerError::Authentication(_)));

        let err = l
            .accept(&WebhookHeaders::new("push", "sha1=abcd"), &body)
            .unwrap_err();
        assert!(matches!(err, TriggerError::Authentication(_)));
    }

    #[test]
    fn test_missing_signature_is_rejected_before_parsing() {
        let l = listener();
        let headers = WebhookHeaders {
            event: Some("push".into()),
            ..Default::default()
        };
        assert_eq!(
            l.accept(&headers, b"not json").unwrap_err(),
            TriggerError::MissingHeader(SIGNATURE_HEADER)
        );
    }

    #[test]
    fn test_other_branches_and_deletions_are_ignored() {
        let l = listener();
        let body = push_body("refs/heads/feature/x");
        let decision = l
            .accept(&WebhookHeaders::new("push", l.sign(&body)), &body)
            .unwrap();
        assert!(matches!(decision, TriggerDecision::Ignored(_)));

        let body = serde_json::json!({
            "ref": "refs/heads/main",
            "after": "0000000000000000000000000000000000000000",
            "deleted": true,
            "repository": {"full_name": "org/infra"}
        })
        .to_string()
        .into_bytes();
        let decision = l
            .accept(&WebhookHeaders::new("push", l.sign(&body)), &body)
            .unwrap();
        assert!(matches!(decision, TriggerDecision::Ignored(_)));
    }

    #[test]
    fn test_branch_glob_patterns() {
        let l = TriggerListener::new("s3cret", "release/*", "main");
        let body = push_body("refs/heads/release/2024.1");
        let decision = l
            .accept(&WebhookHeaders::new("push", l.sign(&body)), &body)
            .unwrap();
        assert!(matches!(decision, TriggerDecision::Start(_)));
    }

    #[test]
    fn test_pull_request_lifecycle_starts_reduced_path() {
        let l = listener();
        for (action, starts) in [
            ("opened", true),
            ("synchronize", true),
            ("reopened", true),
            ("closed", false),
            ("labeled", false),
        ] {
            let body = serde_json::json!({
                "action": action,
                "number": 42,
                "pull_request": {
                    "head": {"ref": "feature/x", "sha": "feedbeef"},
                    "base": {"ref": "main", "sha": "cafe"}
                },
                "repository": {"full_name": "org/infra"}
            })
            .to_string()
            .into_bytes();
            let decision = l
                .accept(&WebhookHeaders::new("pull_request", l.sign(&body)), &body)
                .unwrap();
            match decision {
                TriggerDecision::Start(trigger) => {
                    assert!(starts, "{action} should be ignored");
                    assert_eq!(trigger.kind, TriggerKind::PullRequest);
                    assert_eq!(trigger.pull_request, Some(42));
                    assert_eq!(trigger.source.branch, "feature/x");
                    assert_eq!(trigger.source.commit_sha, "feedbeef");
                }
                TriggerDecision::Ignored(_) => assert!(!starts, "{action} should start"),
            }
        }
    }

    #[test]
    fn test_unwatched_repository_is_ignored() {
        let l = listener();
        let body = serde_json::json!({
            "ref": "refs/heads/main",
            "after": "abc",
            "repository": {"full_name": "org/other"}
        })
        .to_string()
        .into_bytes();
        let decision = l
            .accept(&WebhookHeaders::new("push", l.sign(&body)), &body)
            .unwrap();
        assert!(matches!(decision, TriggerDecision::Ignored(_)));
    }

    #[test]
    fn test_signed_garbage_is_malformed() {
        let l = listener();
        let body = b"{not json".to_vec();
        let err = l
            .accept(&WebhookHeaders::new("push", l.sign(&body)), &body)
            .unwrap_err();
        assert!(matches!(err, TriggerError::MalformedPayload(_)));
    }

    #[test]
    fn test_non_hex_commits_are_malformed() {
        let l = listener();
        for after in ["--output=/tmp/pwned", "HEAD~1", "abc", "main"] {
            let body = serde_json::json!({
                "ref": "refs/heads/main",
                "after": after,
                "repository": {"full_name": "org/infra"}
            })
            .to_string()
            .into_bytes();
            let err = l
                .accept(&WebhookHeaders::new("push", l.sign(&body)), &body)
                .unwrap_err();
            assert!(matches!(err, TriggerError::MalformedPayload(_)), "{after}");
        }

        let body = serde_json::json!({
            "action": "opened",
            "number": 7,
            "pull_request": {
                "head": {"ref": "feature/x", "sha": "--upload-pack=touch /tmp/x"},
                "base": {"ref": "main", "sha": "cafe"}
            },
            "repository": {"full_name": "org/infra"}
        })
        .to_string()
        .into_bytes();
        let err = l
            .accept(&WebhookHeaders::new("pull_request", l.sign(&body)), &body)
            .unwrap_err();
        assert!(matches!(err, TriggerError::MalformedPayload(_)));
    }

    #[test]
    fn test_authenticate_control_messages() {
        let l = listener();
        let message = b"exec-123";
        assert!(l.authenticate(Some(&l.sign(message)), message).is_ok());
        assert!(matches!(
            l.authenticate(Some(&sign_payload(b"other", message)), message),
            Err(TriggerError::Authentication(_))
        ));
        assert_eq!(
            l.authenticate(None, message),
            Err(TriggerError::MissingHeader(SIGNATURE_HEADER))
        );
    }
}
