// =============================================================================
// export_policy.rs - the case-export policy gate
// =============================================================================
//
// Exporting a decision's full text is the most license-sensitive thing this
// service does, so the gate stacks several independent checks:
//
//   1. source policy: export_fulltext_allowed for the source
//   2. scheme: https required when the deployment demands it
//   3. host trust: the document URL must sit on the source's own host or a
//      known publishing alias (the courts publish documents via Lexum)
//   4. approval: user-approved exports carry a token minted by the approval
//      endpoint and bound to (source_id, case_id, document_url)
//   5. redirects: a redirect to an untrusted host is blocked before any
//      payload is downloaded
//
// Outcomes land in RequestMetrics with their policy reasons.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use url::Url;

use crate::errors::ApiError;
use crate::metrics::{ExportOutcome, RequestMetrics};
use crate::models::{
    CaseExportRequest, ExportApprovalRequest, ExportApprovalResponse, PdfStatus,
};
use crate::sources::registry::SourceRegistry;
use crate::sources::source_policy::{is_source_export_allowed, SourcePolicy};

/// Publishing aliases: the Decisia-hosted courts serve documents from Lexum
/// infrastructure as well as their own hostnames.
const DOCUMENT_HOST_ALIASES: &[(&str, &str)] = &[
    ("decisions.fct-cf.gc.ca", "norma.lexum.com"),
    ("decisions.fca-caf.gc.ca", "norma.lexum.com"),
    ("decisions.scc-csc.ca", "norma.lexum.com"),
];

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(|host| host.trim().to_lowercase()))
        .filter(|host| !host.is_empty())
}

/// Hosts a document URL may live on for a given source URL.
pub fn allowed_hosts_for_source(source_url: &str) -> HashSet<String> {
    let mut hosts = HashSet::new();
    let Some(source_host) = host_of(source_url) else {
        return hosts;
    };
    for (origin, alias) in DOCUMENT_HOST_ALIASES {
        if source_host == *origin {
            hosts.insert(alias.to_string());
        }
    }
    hosts.insert(source_host);
    hosts
}

/// Exact host match or subdomain-of match against the allowed set.
pub fn is_url_allowed_for_source(document_url: &str, allowed_hosts: &HashSet<String>) -> bool {
    let Some(document_host) = host_of(document_url) else {
        return false;
    };
    if allowed_hosts.is_empty() {
        return false;
    }
    allowed_hosts.iter().any(|allowed| {
        document_host == *allowed || document_host.ends_with(&format!(".{allowed}"))
    })
}

/// Whether a decision document can be fetched from a trusted location.
pub fn resolve_pdf_status(document_url: Option<&str>, source_url: &str) -> (PdfStatus, &'static str) {
    let Some(document_url) = document_url else {
        return (PdfStatus::Unavailable, "document_url_missing");
    };
    let allowed_hosts = allowed_hosts_for_source(source_url);
    if allowed_hosts.is_empty() {
        return (PdfStatus::Unavailable, "source_url_invalid");
    }
    if !is_url_allowed_for_source(document_url, &allowed_hosts) {
        return (PdfStatus::Unavailable, "document_url_host_untrusted");
    }
    (PdfStatus::Available, "document_url_trusted")
}

/// Stateless approval tokens: a keyed digest over the exact triple the user
/// approved. Verification recomputes; nothing is stored.
pub struct ExportApprovalSigner {
    secret: String,
}

impl ExportApprovalSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn issue(&self, source_id: &str, case_id: &str, document_url: &str) -> String {
        let digest = Sha256::digest(
            format!("{}\n{source_id}\n{case_id}\n{document_url}", self.secret).as_bytes(),
        );
        format!("{digest:x}")
    }

    pub fn verify(&self, token: &str, source_id: &str, case_id: &str, document_url: &str) -> bool {
        let expected = self.issue(source_id, case_id, document_url);
        // Length check first; the comparison itself is over fixed-length hex.
        token.len() == expected.len() && token == expected
    }
}

pub struct ExportPolicyGate {
    registry: Arc<SourceRegistry>,
    policy: Arc<SourcePolicy>,
    signer: ExportApprovalSigner,
    metrics: Arc<RequestMetrics>,
    /// When off, the per-source policy check is skipped; trust checks remain.
    gate_enabled: bool,
    require_https: bool,
}

/// Everything the HTTP adapter needs to proceed with the proxied download.
#[derive(Debug, Clone)]
pub struct ExportAuthorization {
    pub source_id: String,
    pub case_id: String,
    pub document_url: Option<String>,
    pub policy_reason: &'static str,
    pub allowed_hosts: HashSet<String>,
}

impl ExportPolicyGate {
    pub fn new(
        registry: Arc<SourceRegistry>,
        policy: Arc<SourcePolicy>,
        signer: ExportApprovalSigner,
        metrics: Arc<RequestMetrics>,
        gate_enabled: bool,
        require_https: bool,
    ) -> Self {
        Self {
            registry,
            policy,
            signer,
            metrics,
            gate_enabled,
            require_https,
        }
    }

    /// Mint an approval token after verifying the document URL is trusted for
    /// the source. Only explicitly user-approved requests get tokens.
    pub fn approve(&self, request: &ExportApprovalRequest) -> Result<ExportApprovalResponse, ApiError> {
        if !request.user_approved {
            return Err(ApiError::validation("approval requires user_approved=true"));
        }
        let source_url = self.source_url(&request.source_id)?;
        if self.require_https && !request.document_url.starts_with("https://") {
            return Err(ApiError::validation("document_url must be https")
                .with_policy_reason("export_document_url_must_be_https"));
        }
        let allowed_hosts = allowed_hosts_for_source(&source_url);
        if !is_url_allowed_for_source(&request.document_url, &allowed_hosts) {
            return Err(ApiError::validation(
                "document_url host is not trusted for this source",
            )
            .with_policy_reason("export_document_url_not_allowed_for_source"));
        }
        Ok(ExportApprovalResponse {
            approval_token: self.signer.issue(
                &request.source_id,
                &request.case_id,
                &request.document_url,
            ),
        })
    }

    /// Run every pre-download check. The HTTP adapter calls this before it
    /// opens the proxied stream.
    pub fn authorize(&self, request: &CaseExportRequest) -> Result<ExportAuthorization, ApiError> {
        request.validate()?;

        let (allowed, reason) = if self.gate_enabled {
            is_source_export_allowed(&request.source_id, &self.policy)
        } else {
            (true, "export_policy_gate_disabled")
        };
        if !allowed {
            self.metrics
                .record_export_outcome(ExportOutcome::Blocked, Some(reason));
            return Err(ApiError::policy_blocked("Export is not permitted for this source")
                .with_policy_reason(reason));
        }

        let source_url = self.source_url(&request.source_id)?;
        let allowed_hosts = allowed_hosts_for_source(&source_url);

        if let Some(document_url) = &request.document_url {
            if self.require_https && !document_url.starts_with("https://") {
                self.metrics.record_export_outcome(
                    ExportOutcome::Blocked,
                    Some("export_document_url_must_be_https"),
                );
                return Err(ApiError::validation("document_url must be https")
                    .with_policy_reason("export_document_url_must_be_https"));
            }
            if !is_url_allowed_for_source(document_url, &allowed_hosts) {
                self.metrics.record_export_outcome(
                    ExportOutcome::Blocked,
                    Some("export_document_url_not_allowed_for_source"),
                );
                return Err(ApiError::validation(
                    "document_url host is not trusted for this source",
                )
                .with_policy_reason("export_document_url_not_allowed_for_source"));
            }

            if request.user_approved {
                let verified = request.approval_token.as_deref().is_some_and(|token| {
                    self.signer
                        .verify(token, &request.source_id, &request.case_id, document_url)
                });
                if !verified {
                    self.metrics.record_export_outcome(
                        ExportOutcome::Blocked,
                        Some("export_approval_token_invalid"),
                    );
                    return Err(ApiError::validation(
                        "approval token is missing or does not match this export",
                    )
                    .with_policy_reason("export_approval_token_invalid"));
                }
            }
        }

        self.metrics
            .record_export_outcome(ExportOutcome::Allowed, Some(reason));
        Ok(ExportAuthorization {
            source_id: request.source_id.clone(),
            case_id: request.case_id.clone(),
            document_url: request.document_url.clone(),
            policy_reason: reason,
            allowed_hosts,
        })
    }

    /// Redirect hosts are re-checked against the same trust set before any
    /// payload byte is downloaded.
    pub fn check_redirect(
        &self,
        authorization: &ExportAuthorization,
        redirect_location: &str,
    ) -> Result<(), ApiError> {
        if is_url_allowed_for_source(redirect_location, &authorization.allowed_hosts) {
            return Ok(());
        }
        self.metrics.record_export_outcome(
            ExportOutcome::Blocked,
            Some("export_redirect_url_not_allowed_for_source"),
        );
        Err(ApiError::validation(
            "export redirect target is not trusted for this source",
        )
        .with_policy_reason("export_redirect_url_not_allowed_for_source"))
    }

    /// Record a post-authorization fetch failure (proxy download broke).
    pub fn record_fetch_failure(&self) {
        self.metrics
            .record_export_outcome(ExportOutcome::FetchFailed, None);
    }

    fn source_url(&self, source_id: &str) -> Result<String, ApiError> {
        self.registry
            .get_source(source_id)
            .map(|entry| entry.url.clone())
            .ok_or_else(|| {
                ApiError::policy_blocked("Export is not permitted for this source")
                    .with_policy_reason("source_not_in_policy_for_export")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::registry::{SourceRegistryEntry, SourceType, UpdateCadence};
    use crate::sources::source_policy::{SourceClass, SourcePolicyEntry};

    const FC_FEED_URL: &str = "https://decisions.fct-cf.gc.ca/fc-cf/en/rss.do";
    const FC_DOCUMENT_URL: &str =
        "https://decisions.fct-cf.gc.ca/fc-cf/decisions/en/item/123456/index.do";

    fn registry() -> Arc<SourceRegistry> {
        Arc::new(SourceRegistry {
            version: "test".into(),
            jurisdiction: "ca".into(),
            sources: vec![
                SourceRegistryEntry {
                    source_id: "FC_DECISIONS".into(),
                    source_type: SourceType::CaseLaw,
                    instrument: "FC decisions feed".into(),
                    url: FC_FEED_URL.into(),
                    update_cadence: UpdateCadence::Daily,
                },
                SourceRegistryEntry {
                    source_id: "CANLII_TERMS".into(),
                    source_type: SourceType::Policy,
                    instrument: "CanLII terms of use".into(),
                    url: "https://www.canlii.org/en/info/terms.html".into(),
                    update_cadence: UpdateCadence::Weekly,
                },
            ],
        })
    }

    fn policy() -> Arc<SourcePolicy> {
        let entry = |source_id: &str, export: bool| SourcePolicyEntry {
            source_id: source_id.into(),
            source_class: SourceClass::Official,
            internal_ingest_allowed: true,
            production_ingest_allowed: true,
            answer_citation_allowed: true,
            export_fulltext_allowed: export,
            license_notes: "reviewed".into(),
            review_owner: "legal-review".into(),
            review_date: "2026-02-01".into(),
        };
        Arc::new(SourcePolicy {
            version: "test".into(),
            jurisdiction: "ca".into(),
            sources: vec![entry("FC_DECISIONS", true), entry("CANLII_TERMS", false)],
        })
    }

    fn gate() -> ExportPolicyGate {
        ExportPolicyGate::new(
            registry(),
            policy(),
            ExportApprovalSigner::new("test-secret"),
            Arc::new(RequestMetrics::default()),
            true,
            true,
        )
    }

    fn export_request(document_url: Option<&str>) -> CaseExportRequest {
        CaseExportRequest {
            source_id: "FC_DECISIONS".into(),
            case_id: "FC-2026-123456".into(),
            document_url: document_url.map(|u| u.to_string()),
            format: "pdf".into(),
            user_approved: false,
            approval_token: None,
        }
    }

    #[test]
    fn export_allowed_source_authorizes() {
        let authorization = gate().authorize(&export_request(None)).unwrap();
        assert_eq!(authorization.policy_reason, "source_export_allowed");
    }

    #[test]
    fn export_blocked_source_is_policy_blocked() {
        let mut request = export_request(None);
        request.source_id = "CANLII_TERMS".into();
        let err = gate().authorize(&request).unwrap_err();
        assert_eq!(err.status_code(), 422);
        assert_eq!(
            err.policy_reason.as_deref(),
            Some("source_export_blocked_by_policy")
        );
    }

    #[test]
    fn unknown_source_is_blocked_with_reason() {
        let mut request = export_request(None);
        request.source_id = "UNKNOWN_SOURCE".into();
        let err = gate().authorize(&request).unwrap_err();
        assert_eq!(
            err.policy_reason.as_deref(),
            Some("source_not_in_policy_for_export")
        );
    }

    #[test]
    fn untrusted_document_host_is_rejected() {
        let err = gate()
            .authorize(&export_request(Some("https://evil.example/export.pdf")))
            .unwrap_err();
        assert_eq!(
            err.policy_reason.as_deref(),
            Some("export_document_url_not_allowed_for_source")
        );
    }

    #[test]
    fn lexum_alias_host_is_trusted_for_fc_documents() {
        let authorization = gate()
            .authorize(&export_request(Some(
                "https://norma.lexum.com/fc-cf/decisions/en/123456/1/document.do",
            )))
            .unwrap();
        assert!(authorization.allowed_hosts.contains("norma.lexum.com"));
    }

    #[test]
    fn plain_http_document_url_is_rejected_when_https_required() {
        let err = gate()
            .authorize(&export_request(Some(
                "http://decisions.fct-cf.gc.ca/fc-cf/decisions/en/item/1/index.do",
            )))
            .unwrap_err();
        assert_eq!(
            err.policy_reason.as_deref(),
            Some("export_document_url_must_be_https")
        );
    }

    #[test]
    fn approval_token_round_trips_and_binds_to_the_request() {
        let gate = gate();
        let approval = gate
            .approve(&ExportApprovalRequest {
                source_id: "FC_DECISIONS".into(),
                case_id: "FC-2026-123456".into(),
                document_url: FC_DOCUMENT_URL.into(),
                user_approved: true,
            })
            .unwrap();

        let mut request = export_request(Some(FC_DOCUMENT_URL));
        request.user_approved = true;
        request.approval_token = Some(approval.approval_token.clone());
        assert!(gate.authorize(&request).is_ok());

        // Token minted for one document does not authorize another.
        let mut tampered = request.clone();
        tampered.document_url =
            Some("https://decisions.fct-cf.gc.ca/fc-cf/decisions/en/item/999/index.do".into());
        let err = gate.authorize(&tampered).unwrap_err();
        assert_eq!(
            err.policy_reason.as_deref(),
            Some("export_approval_token_invalid")
        );
    }

    #[test]
    fn user_approved_export_without_token_is_rejected() {
        let mut request = export_request(Some(FC_DOCUMENT_URL));
        request.user_approved = true;
        let err = gate().authorize(&request).unwrap_err();
        assert_eq!(
            err.policy_reason.as_deref(),
            Some("export_approval_token_invalid")
        );
    }

    #[test]
    fn untrusted_redirect_is_blocked_before_download() {
        let gate = gate();
        let authorization = gate.authorize(&export_request(Some(FC_DOCUMENT_URL))).unwrap();

        assert!(gate
            .check_redirect(&authorization, "https://norma.lexum.com/fc-cf/export.pdf")
            .is_ok());

        let err = gate
            .check_redirect(&authorization, "https://evil.example/export.pdf")
            .unwrap_err();
        assert_eq!(
            err.policy_reason.as_deref(),
            Some("export_redirect_url_not_allowed_for_source")
        );
    }

    #[test]
    fn pdf_status_resolution_covers_all_reasons() {
        assert_eq!(
            resolve_pdf_status(None, FC_FEED_URL),
            (PdfStatus::Unavailable, "document_url_missing")
        );
        assert_eq!(
            resolve_pdf_status(Some(FC_DOCUMENT_URL), "not a url"),
            (PdfStatus::Unavailable, "source_url_invalid")
        );
        assert_eq!(
            resolve_pdf_status(Some("https://evil.example/doc.pdf"), FC_FEED_URL),
            (PdfStatus::Unavailable, "document_url_host_untrusted")
        );
        assert_eq!(
            resolve_pdf_status(Some(FC_DOCUMENT_URL), FC_FEED_URL),
            (PdfStatus::Available, "document_url_trusted")
        );
    }

    #[test]
    fn subdomains_of_trusted_hosts_are_accepted() {
        let hosts = allowed_hosts_for_source("https://www.canlii.org/en/info/terms.html");
        assert!(is_url_allowed_for_source("https://api.www.canlii.org/x", &hosts));
        assert!(!is_url_allowed_for_source("https://canlii.org.evil.example/x", &hosts));
    }
}
