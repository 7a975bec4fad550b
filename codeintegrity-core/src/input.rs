//! Decoding the repository list.
//!
//! The list is a saved code-search response:
//! `{"data": {"search": {"nodes": [{"nameWithOwner": "owner/repo"}, …]}}}`.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::InputError;
use crate::types::RepoId;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    data: SearchData,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    search: SearchResults,
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    nodes: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryNode {
    name_with_owner: String,
}

/// Read and decode the repository list at `path`.
pub fn load(path: &Path) -> Result<Vec<RepoId>, InputError> {
    let raw = std::fs::read_to_string(path)?;
    let repos = parse(&raw)?;
    debug!(path = %path.display(), count = repos.len(), "Loaded repository list");
    Ok(repos)
}

/// Decode a repository list, in input order.
pub fn parse(raw: &str) -> Result<Vec<RepoId>, InputError> {
    let response: SearchResponse = serde_json::from_str(raw)
        .map_err(|e| InputError::Malformed(format!("expected data.search.nodes: {e}")))?;

    response
        .data
        .search
        .nodes
        .into_iter()
        .enumerate()
        .map(|(i, node)| {
            let node: RepositoryNode = serde_json::from_value(node).map_err(|e| {
                InputError::Malformed(format!("data.search.nodes[{i}]: {e}"))
            })?;
            RepoId::parse(&node.name_with_owner).ok_or_else(|| {
                InputError::Malformed(format!(
                    "data.search.nodes[{i}].nameWithOwner: expected owner/name, got {:?}",
                    node.name_with_owner
                ))
            })
        })
        .collect()
}
