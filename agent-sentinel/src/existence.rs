//! Verification that files an agent claims to have produced really exist.

use std::path::{Component, Path, PathBuf};

use agent_primitives::Severity;
use serde::Serialize;
use tracing::{debug, warn};

/// Why a claimed path failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimViolation {
    /// The path resolves outside the workspace root.
    EscapesRoot,
    /// The path is inside the root but no file exists there.
    Missing,
}

impl ClaimViolation {
    /// Every violation is critical.
    #[must_use]
    pub const fn severity(self) -> Severity {
        Severity::Critical
    }
}

/// One failed claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimFinding {
    /// Path as claimed by the agent.
    pub path: String,
    /// What was wrong with it.
    pub violation: ClaimViolation,
}

/// Result of checking a set of claimed paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClaimReport {
    /// The workspace root was available and every path was checked.
    Checked {
        /// Paths that exist inside the root.
        verified: Vec<String>,
        /// Paths that failed.
        findings: Vec<ClaimFinding>,
    },
    /// The workspace root is missing, so nothing could be checked.
    Unavailable {
        /// Why checking was impossible.
        reason: String,
    },
}

impl ClaimReport {
    /// Failed claims; empty when unavailable.
    #[must_use]
    pub fn findings(&self) -> &[ClaimFinding] {
        match self {
            Self::Checked { findings, .. } => findings,
            Self::Unavailable { .. } => &[],
        }
    }

    /// Whether any claimed path escaped the root.
    #[must_use]
    pub fn has_escape(&self) -> bool {
        self.findings()
            .iter()
            .any(|finding| finding.violation == ClaimViolation::EscapesRoot)
    }

    /// Whether any claimed path is missing.
    #[must_use]
    pub fn has_missing(&self) -> bool {
        self.findings()
            .iter()
            .any(|finding| finding.violation == ClaimViolation::Missing)
    }
}

/// Resolves `claimed` against `root` lexically, refusing to climb above it.
fn resolve_within(root: &Path, claimed: &str) -> Option<PathBuf> {
    let claimed = Path::new(claimed);
    let relative = if claimed.is_absolute() {
        claimed.strip_prefix(root).ok()?
    } else {
        claimed
    };

    let mut resolved = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    let mut path = root.to_path_buf();
    path.extend(resolved);
    Some(path)
}

/// Checks claimed output paths against the workspace.
#[derive(Debug, Clone)]
pub struct ExistenceEngine {
    workspace_root: PathBuf,
}

impl ExistenceEngine {
    /// Creates an engine rooted at `workspace_root`.
    #[must_use]
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }

    /// Workspace root.
    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Lexically resolves `path` inside the workspace root.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        resolve_within(&self.workspace_root, path)
    }

    /// Checks every claimed path.
    ///
    /// Paths escaping the root, lexically or through symlinks, are flagged
    /// before existence is tested.
    pub async fn validate_claim<S: AsRef<str>>(&self, paths: &[S]) -> ClaimReport {
        let root = match tokio::fs::canonicalize(&self.workspace_root).await {
            Ok(root) => root,
            Err(err) => {
                let root = self.workspace_root.display();
                warn!(%root, error = %err, "workspace root unavailable");
                return ClaimReport::Unavailable {
                    reason: format!("workspace root {root} unavailable: {err}"),
                };
            }
        };

        let mut verified = Vec::new();
        let mut findings = Vec::new();
        for claimed in paths {
            let claimed = claimed.as_ref();
            let violation = match resolve_within(&root, claimed) {
                None => Some(ClaimViolation::EscapesRoot),
                Some(candidate) => match tokio::fs::canonicalize(&candidate).await {
                    Ok(real) if !real.starts_with(&root) => Some(ClaimViolation::EscapesRoot),
                    Ok(real) => match tokio::fs::metadata(&real).await {
                        Ok(meta) if meta.is_file() => None,
                        _ => Some(ClaimViolation::Missing),
                    },
                    Err(_) => Some(ClaimViolation::Missing),
                },
            };
            match violation {
                None => verified.push(claimed.to_owned()),
                Some(violation) => {
                    debug!(path = claimed, ?violation, "claim failed");
                    findings.push(ClaimFinding {
                        path: claimed.to_owned(),
                        violation,
                    });
                }
            }
        }

        ClaimReport::Checked { verified, findings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_workspace() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("sentinel-existence-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.join("src")).unwrap();
        std::fs::write(dir.join("src/lib.rs"), "pub fn ok() {}").unwrap();
        dir
    }

    #[test]
    fn lexical_resolution_stays_in_root() {
        let root = Path::new("/ws");
        assert_eq!(resolve_within(root, "src/./a.rs"), Some(PathBuf::from("/ws/src/a.rs")));
        assert_eq!(resolve_within(root, "src/../a.rs"), Some(PathBuf::from("/ws/a.rs")));
        assert_eq!(resolve_within(root, "../etc/passwd"), None);
        assert_eq!(resolve_within(root, "/etc/passwd"), None);
        assert_eq!(resolve_within(root, "/ws/src/a.rs"), Some(PathBuf::from("/ws/src/a.rs")));
    }

    #[tokio::test]
    async fn flags_missing_and_escaping_paths() {
        let root = temp_workspace();
        let engine = ExistenceEngine::new(&root);
        let report = engine
            .validate_claim(&["src/lib.rs", "src/missing.rs", "../outside.rs", "src"])
            .await;

        match &report {
            ClaimReport::Checked { verified, findings } => {
                assert_eq!(verified, &["src/lib.rs"]);
                assert_eq!(findings.len(), 3);
                assert_eq!(findings[0].violation, ClaimViolation::Missing);
                assert_eq!(findings[1].violation, ClaimViolation::EscapesRoot);
                assert_eq!(findings[2].violation, ClaimViolation::Missing);
            }
            ClaimReport::Unavailable { .. } => panic!("root exists"),
        }
        assert!(report.has_escape());
        assert!(report.has_missing());
        assert_eq!(ClaimViolation::Missing.severity(), Severity::Critical);

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn missing_root_is_reported_as_unavailable() {
        let engine = ExistenceEngine::new(std::env::temp_dir().join("no-such-workspace-4242"));
        let report = engine.validate_claim(&["a.rs"]).await;
        assert!(matches!(report, ClaimReport::Unavailable { .. }));
        assert!(report.findings().is_empty());
    }
}
