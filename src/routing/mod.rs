//! Routing resolver — decides which project receives the brief.
//!
//! Internal meetings go to the configured internal project. External
//! meetings with a client name are matched against the project directory;
//! anything that does not resolve to exactly one project goes to the intake
//! project with `is_fallback = true`. Resolution never fails.
//!
//! Match policy:
//! - names are lowercased, punctuation becomes whitespace, whitespace is
//!   collapsed and trailing corporate suffixes (`inc`, `llc`, ...) dropped;
//! - a project matches when either normalized name contains the other as
//!   a run of whole words ("acme" matches "acme website redesign", "hr"
//!   does not match "three");
//! - among several matches a single exact normalized match wins, otherwise
//!   the result is ambiguous.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::DirectoryError;
use crate::pipeline::types::{ClassificationResult, RoutingDecision, Scope};

/// Trailing tokens ignored when comparing names.
const CORPORATE_SUFFIXES: &[&str] = &[
    "inc", "incorporated", "llc", "ltd", "limited", "corp", "corporation", "co", "gmbh", "plc",
];

/// Normalized client names shorter than this never match.
const MIN_CLIENT_NAME_LEN: usize = 2;

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}]+").unwrap());

/// A project known to the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub id: String,
    pub name: String,
}

impl ProjectRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Project directory lookup.
///
/// Returns candidate projects for a client name; the resolver applies the
/// match policy, so implementations may return a superset.
#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    async fn find_projects(&self, client_name: &str) -> Result<Vec<ProjectRef>, DirectoryError>;
}

/// Fixed in-memory directory.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    projects: Vec<ProjectRef>,
}

impl StaticDirectory {
    pub fn new(projects: Vec<ProjectRef>) -> Self {
        Self { projects }
    }

    /// Build from `(name, id)` pairs, as parsed from `BRIEF_CLIENT_PROJECTS`.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        Self::new(
            pairs
                .into_iter()
                .map(|(name, id)| ProjectRef { id, name })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

#[async_trait]
impl ProjectDirectory for StaticDirectory {
    async fn find_projects(&self, _client_name: &str) -> Result<Vec<ProjectRef>, DirectoryError> {
        Ok(self.projects.clone())
    }
}

/// Maps a classification to a target project.
pub struct RoutingResolver {
    internal_project_id: String,
    intake_project_id: String,
    directory: Arc<dyn ProjectDirectory>,
}

impl RoutingResolver {
    pub fn new(config: &PipelineConfig, directory: Arc<dyn ProjectDirectory>) -> Self {
        Self {
            internal_project_id: config.internal_project_id.clone(),
            intake_project_id: config.intake_project_id.clone(),
            directory,
        }
    }

    /// Resolve a classification, consulting the directory for external clients.
    ///
    /// Directory failures count as zero matches.
    pub async fn resolve(&self, classification: &ClassificationResult) -> RoutingDecision {
        let candidates = match (classification.scope, classification.client_name.as_deref()) {
            (Scope::External, Some(client)) => match self.directory.find_projects(client).await {
                Ok(projects) => projects,
                Err(e) => {
                    warn!(client = %client, error = %e, "Project directory lookup failed");
                    Vec::new()
                }
            },
            _ => Vec::new(),
        };
        self.decide(classification, &candidates)
    }

    /// Pure decision over a fixed directory snapshot.
    pub fn decide(
        &self,
        classification: &ClassificationResult,
        candidates: &[ProjectRef],
    ) -> RoutingDecision {
        match classification.scope {
            Scope::Internal => {
                debug!(project = %self.internal_project_id, "Internal meeting");
                RoutingDecision {
                    target_project_id: self.internal_project_id.clone(),
                    is_fallback: false,
                }
            }
            Scope::External => {
                let Some(client) = classification.client_name.as_deref() else {
                    info!("External meeting without a client name, routing to intake");
                    return self.intake();
                };
                match unique_match(client, candidates) {
                    Some(project) => {
                        info!(
                            client = %client,
                            project = %project.name,
                            project_id = %project.id,
                            "Client resolved to project"
                        );
                        RoutingDecision {
                            target_project_id: project.id.clone(),
                            is_fallback: false,
                        }
                    }
                    None => {
                        info!(client = %client, "No unique project for client, routing to intake");
                        self.intake()
                    }
                }
            }
        }
    }

    fn intake(&self) -> RoutingDecision {
        RoutingDecision {
            target_project_id: self.intake_project_id.clone(),
            is_fallback: true,
        }
    }
}

/// Normalize a company or project name for comparison.
pub fn normalize_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let spaced = NON_WORD.replace_all(&lowered, " ");
    let mut tokens: Vec<&str> = spaced.split_whitespace().collect();
    while tokens.len() > 1
        && tokens
            .last()
            .is_some_and(|last| CORPORATE_SUFFIXES.contains(last))
    {
        tokens.pop();
    }
    tokens.join(" ")
}

/// Every candidate matching `client`, deduplicated by id, in directory order.
pub fn match_projects<'a>(client: &str, candidates: &'a [ProjectRef]) -> Vec<&'a ProjectRef> {
    let needle = normalize_name(client);
    if needle.chars().count() < MIN_CLIENT_NAME_LEN {
        return Vec::new();
    }

    let mut matches: Vec<&ProjectRef> = Vec::new();
    for project in candidates {
        let name = normalize_name(&project.name);
        if name.is_empty() {
            continue;
        }
        if (contains_words(&name, &needle) || contains_words(&needle, &name))
            && !matches.iter().any(|m| m.id == project.id)
        {
            matches.push(project);
        }
    }
    matches
}

/// Whether the words of `needle` appear contiguously in `haystack`.
fn contains_words(haystack: &str, needle: &str) -> bool {
    let haystack: Vec<&str> = haystack.split(' ').collect();
    let needle: Vec<&str> = needle.split(' ').collect();
    needle.len() <= haystack.len() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// The single project `client` resolves to, if any.
fn unique_match<'a>(client: &str, candidates: &'a [ProjectRef]) -> Option<&'a ProjectRef> {
    let matches = match_projects(client, candidates);
    match matches.as_slice() {
        [] => None,
        [only] => Some(*only),
        several => {
            let needle = normalize_name(client);
            let exact: Vec<&&ProjectRef> = several
                .iter()
                .filter(|p| normalize_name(&p.name) == needle)
                .collect();
            match exact.as_slice() {
                [only] => Some(**only),
                _ => {
                    debug!(
                        client = %client,
                        matches = several.len(),
                        "Ambiguous client match"
                    );
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingDirectory;

    #[async_trait]
    impl ProjectDirectory for FailingDirectory {
        async fn find_projects(&self, _client: &str) -> Result<Vec<ProjectRef>, DirectoryError> {
            Err(DirectoryError::Request("503".into()))
        }
    }

    fn directory() -> Arc<StaticDirectory> {
        Arc::new(StaticDirectory::new(vec![
            ProjectRef::new("p-acme", "Acme Corp - Website Redesign"),
            ProjectRef::new("p-globex", "Globex"),
            ProjectRef::new("p-globex-eu", "Globex EU Rollout"),
            ProjectRef::new("p-initech", "Initech, Inc."),
        ]))
    }

    fn resolver(directory: Arc<dyn ProjectDirectory>) -> RoutingResolver {
        RoutingResolver::new(&PipelineConfig::new("p-internal", "p-intake"), directory)
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize_name("  Acme, Inc. "), "acme");
        assert_eq!(normalize_name("Initech LLC"), "initech");
        assert_eq!(normalize_name("Co"), "co");
        assert_eq!(normalize_name("Globex   EU-Rollout"), "globex eu rollout");
    }

    #[tokio::test]
    async fn single_match_routes_to_client_project() {
        let resolver = resolver(directory());
        let decision = resolver
            .resolve(&ClassificationResult::external("Acme", 0.9))
            .await;
        assert_eq!(
            decision,
            RoutingDecision {
                target_project_id: "p-acme".into(),
                is_fallback: false
            }
        );
    }

    #[tokio::test]
    async fn unknown_client_falls_back_to_intake() {
        let resolver = resolver(directory());
        let decision = resolver
            .resolve(&ClassificationResult::external("Unknown Corp", 0.9))
            .await;
        assert_eq!(
            decision,
            RoutingDecision {
                target_project_id: "p-intake".into(),
                is_fallback: true
            }
        );
    }

    #[tokio::test]
    async fn exact_match_breaks_ties() {
        let resolver = resolver(directory());
        let decision = resolver
            .resolve(&ClassificationResult::external("globex", 0.7))
            .await;
        assert_eq!(decision.target_project_id, "p-globex");
        assert!(!decision.is_fallback);
    }

    #[test]
    fn ambiguous_match_falls_back() {
        let resolver = resolver(directory());
        let candidates = vec![
            ProjectRef::new("a", "Umbrella Labs"),
            ProjectRef::new("b", "Umbrella Retail"),
        ];
        let decision = resolver.decide(&ClassificationResult::external("Umbrella", 0.9), &candidates);
        assert_eq!(decision.target_project_id, "p-intake");
        assert!(decision.is_fallback);
    }

    #[test]
    fn duplicate_ids_count_once() {
        let candidates = vec![
            ProjectRef::new("a", "Umbrella Labs"),
            ProjectRef::new("a", "Umbrella Labs"),
        ];
        assert_eq!(match_projects("umbrella", &candidates).len(), 1);
    }

    #[test]
    fn internal_goes_to_internal_project() {
        let resolver = resolver(directory());
        let decision = resolver.decide(&ClassificationResult::internal(0.9), &[]);
        assert_eq!(decision.target_project_id, "p-internal");
        assert!(!decision.is_fallback);
    }

    #[test]
    fn missing_client_and_fallback_classification_go_to_intake() {
        let resolver = resolver(directory());
        let decision = resolver.decide(&ClassificationResult::fallback(), &[]);
        assert_eq!(decision.target_project_id, "p-intake");
        assert!(decision.is_fallback);
    }

    #[tokio::test]
    async fn partial_words_do_not_match() {
        let directory = Arc::new(StaticDirectory::new(vec![
            ProjectRef::new("p-hr", "HR"),
            ProjectRef::new("p-acme", "Acme"),
        ]));
        let decision = resolver(directory)
            .resolve(&ClassificationResult::external("Three Corp", 0.9))
            .await;
        assert_eq!(decision.target_project_id, "p-intake");
        assert!(decision.is_fallback);
    }

    #[test]
    fn whole_word_runs_match_in_either_direction() {
        let candidates = vec![
            ProjectRef::new("p-web", "Acme Corp - Website Redesign"),
            ProjectRef::new("p-acmeco", "Acmeco"),
            ProjectRef::new("p-north", "North Wind"),
        ];
        let ids = |client: &str| -> Vec<String> {
            match_projects(client, &candidates)
                .into_iter()
                .map(|p| p.id.clone())
                .collect()
        };
        assert_eq!(ids("Acme"), vec!["p-web"]);
        assert_eq!(ids("Website Redesign"), vec!["p-web"]);
        assert_eq!(ids("North Wind Traders"), vec!["p-north"]);
        assert!(ids("Wind North").is_empty());
        assert!(ids("Acmeco Group").contains(&"p-acmeco".to_string()));
    }

    #[test]
    fn tiny_client_names_never_match() {
        let candidates = vec![ProjectRef::new("x", "X Holdings")];
        assert!(match_projects("x", &candidates).is_empty());
    }

    #[tokio::test]
    async fn directory_failure_is_absorbed() {
        let resolver = resolver(Arc::new(FailingDirectory));
        let decision = resolver
            .resolve(&ClassificationResult::external("Acme", 0.9))
            .await;
        assert!(decision.is_fallback);
        assert_eq!(decision.target_project_id, "p-intake");
    }

    #[tokio::test]
    async fn resolution_is_deterministic() {
        let resolver = resolver(directory());
        let classification = ClassificationResult::external("Initech", 0.4);
        let first = resolver.resolve(&classification).await;
        for _ in 0..10 {
            assert_eq!(resolver.resolve(&classification).await, first);
        }
        assert_eq!(first.target_project_id, "p-initech");
    }
}
