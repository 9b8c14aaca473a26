//! Node resolution.
//!
//! A node is a benchmark target: a URL, an optional SSH remote that the
//! load test should be executed from, and optional client metadata. Nodes
//! are usually given on the command line in the compact form
//! `[name=][user@]remote:]host[:port][/path]`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::loadtest::error::{FloodError, Result};

/// URL schemes recognized in node descriptors.
pub const URL_PREFIXES: [&str; 4] = ["http", "https", "ws", "wss"];

const CLIENT_VERSION_TIMEOUT: Duration = Duration::from_secs(5);

/// A resolved benchmark target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub url: String,
    /// SSH destination to run the load test from, `None` for local execution.
    pub remote: Option<String>,
    /// Result of `web3_clientVersion`, when requested and reachable.
    #[serde(default)]
    pub client_version: Option<String>,
}

/// A node given as an explicit record instead of a shorthand string.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub remote: Option<String>,
}

impl Node {
    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Descriptor that resolves back to this node on the remote side.
    pub fn remote_descriptor(&self) -> String {
        format!("{}={}", self.name, self.url)
    }
}

/// Resolve a shorthand node descriptor.
///
/// `aliases` maps provider names to URLs; a descriptor body that matches an
/// alias exactly is replaced by the aliased URL.
pub fn resolve(descriptor: &str, aliases: &BTreeMap<String, String>) -> Result<Node> {
    let descriptor = descriptor.trim();
    let invalid = |reason: &str| FloodError::InvalidNodeFormat {
        descriptor: descriptor.to_string(),
        reason: reason.to_string(),
    };
    if descriptor.is_empty() {
        return Err(invalid("descriptor is empty"));
    }

    let (name, body) = match descriptor.split_once('=') {
        Some((name, body)) => (name.trim(), body.trim()),
        None => (descriptor, descriptor),
    };
    if name.is_empty() {
        return Err(invalid("node name is empty"));
    }
    if body.is_empty() {
        return Err(invalid("node url is empty"));
    }

    let body = aliases.get(body).map(String::as_str).unwrap_or(body);

    let (remote, url) = split_remote(body);
    if let Some(remote) = remote {
        if remote.is_empty() {
            return Err(invalid("remote host is empty"));
        }
    }
    if url.is_empty() {
        return Err(invalid("node url is empty"));
    }

    Ok(Node {
        name: name.to_string(),
        url: add_url_prefix(url),
        remote: remote.map(str::to_string),
        client_version: None,
    })
}

/// Resolve a record form node, applying the same URL normalization.
pub fn resolve_record(record: NodeRecord) -> Result<Node> {
    if record.name.trim().is_empty() || record.url.trim().is_empty() {
        return Err(FloodError::InvalidNodeFormat {
            descriptor: format!("{record:?}"),
            reason: "name and url are required".to_string(),
        });
    }
    Ok(Node {
        name: record.name,
        url: add_url_prefix(record.url.trim()),
        remote: record.remote.filter(|remote| !remote.is_empty()),
        client_version: None,
    })
}

/// Resolve many descriptors, rejecting duplicate names.
pub fn resolve_all(
    descriptors: &[String],
    aliases: &BTreeMap<String, String>,
) -> Result<Vec<Node>> {
    let mut nodes: Vec<Node> = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let node = resolve(descriptor, aliases)?;
        if nodes.iter().any(|existing| existing.name == node.name) {
            return Err(FloodError::InvalidNodeFormat {
                descriptor: descriptor.clone(),
                reason: format!("duplicate node name '{}'", node.name),
            });
        }
        nodes.push(node);
    }
    Ok(nodes)
}

/// Split `remote:url` into its parts. A colon introduces a remote only when
/// the text before it is not a URL scheme and the text after it is not a port.
fn split_remote(body: &str) -> (Option<&str>, &str) {
    let Some((head, tail)) = body.split_once(':') else {
        return (None, body);
    };
    if URL_PREFIXES.contains(&head) {
        return (None, body);
    }
    let port = tail.split('/').next().unwrap_or_default();
    if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
        return (None, body);
    }
    (Some(head), tail)
}

fn has_url_prefix(url: &str) -> bool {
    URL_PREFIXES
        .iter()
        .any(|prefix| url.starts_with(&format!("{prefix}://")))
}

fn is_local_host(url: &str) -> bool {
    let host = url.split([':', '/']).next().unwrap_or_default();
    if host == "localhost" {
        return true;
    }
    let octets: Vec<&str> = host.split('.').collect();
    octets.len() == 4
        && octets
            .iter()
            .all(|octet| !octet.is_empty() && octet.bytes().all(|b| b.is_ascii_digit()))
}

/// Add `http://` for localhost and bare IPv4 hosts, `https://` otherwise.
pub fn add_url_prefix(url: &str) -> String {
    if has_url_prefix(url) {
        url.to_string()
    } else if is_local_host(url) {
        format!("http://{url}")
    } else {
        format!("https://{url}")
    }
}

fn client_version_request() -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": "web3_clientVersion",
        "params": [],
        "id": 1,
    })
}

fn client_version_from_response(response: &serde_json::Value) -> Option<String> {
    response
        .get("result")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

/// Query `web3_clientVersion` directly over HTTP. Any failure yields `None`.
pub async fn probe_client_version_http(url: &str) -> Option<String> {
    let client = reqwest::Client::builder()
        .timeout(CLIENT_VERSION_TIMEOUT)
        .build()
        .ok()?;
    let response = client
        .post(url)
        .json(&client_version_request())
        .send()
        .await
        .ok()?;
    let body: serde_json::Value = response.json().await.ok()?;
    client_version_from_response(&body)
}

/// Query `web3_clientVersion` by running curl on the node's remote host.
pub async fn probe_client_version_ssh(ssh_path: &str, remote: &str, url: &str) -> Option<String> {
    let payload = client_version_request().to_string();
    let output = tokio::process::Command::new(ssh_path)
        .arg(remote)
        .arg(format!(
            "curl -s -X POST -H 'Content-Type: application/json' --data '{payload}' {url}"
        ))
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(CLIENT_VERSION_TIMEOUT * 2, output)
        .await
        .ok()?
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let body: serde_json::Value = serde_json::from_slice(&output.stdout).ok()?;
    client_version_from_response(&body)
}

/// Fill in `client_version` for every node, leaving it `None` on failure.
pub async fn request_metadata(nodes: &mut [Node], ssh_path: &str) {
    for node in nodes.iter_mut() {
        node.client_version = match &node.remote {
            Some(remote) => probe_client_version_ssh(ssh_path, remote, &node.url).await,
            None => probe_client_version_http(&node.url).await,
        };
        if node.client_version.is_none() {
            tracing::debug!(node = %node.name, "client version probe failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_aliases() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn test_named_localhost() {
        let node = resolve("node1=localhost:8545", &no_aliases()).unwrap();
        assert_eq!(node.name, "node1");
        assert_eq!(node.url, "http://localhost:8545");
        assert_eq!(node.remote, None);
    }

    #[test]
    fn test_remote_with_ip() {
        let descriptor = "alice@remote1:10.0.0.5:8545";
        let node = resolve(descriptor, &no_aliases()).unwrap();
        assert_eq!(node.name, descriptor);
        assert_eq!(node.url, "http://10.0.0.5:8545");
        assert_eq!(node.remote.as_deref(), Some("alice@remote1"));
    }

    #[test]
    fn test_bare_hostname_gets_https() {
        let node = resolve("rpc.example.org/v1", &no_aliases()).unwrap();
        assert_eq!(node.url, "https://rpc.example.org/v1");
        assert_eq!(node.remote, None);
    }

    #[test]
    fn test_explicit_scheme_is_kept() {
        let node = resolve("a=http://10.0.0.1:8545", &no_aliases()).unwrap();
        assert_eq!(node.url, "http://10.0.0.1:8545");
        assert_eq!(node.remote, None);

        let node = resolve("wss://rpc.example.org", &no_aliases()).unwrap();
        assert_eq!(node.url, "wss://rpc.example.org");
    }

    #[test]
    fn test_remote_with_scheme() {
        let node = resolve("b=box:https://rpc.example.org", &no_aliases()).unwrap();
        assert_eq!(node.remote.as_deref(), Some("box"));
        assert_eq!(node.url, "https://rpc.example.org");
    }

    #[test]
    fn test_remote_localhost() {
        let node = resolve("box:localhost:8545", &no_aliases()).unwrap();
        assert_eq!(node.remote.as_deref(), Some("box"));
        assert_eq!(node.url, "http://localhost:8545");
    }

    #[test]
    fn test_host_with_port_and_path() {
        let node = resolve("127.0.0.1:8545/rpc", &no_aliases()).unwrap();
        assert_eq!(node.remote, None);
        assert_eq!(node.url, "http://127.0.0.1:8545/rpc");
    }

    #[test]
    fn test_alias_substitution() {
        let mut aliases = BTreeMap::new();
        aliases.insert(
            "archive".to_string(),
            "https://archive.example.org/rpc".to_string(),
        );
        let node = resolve("main=archive", &aliases).unwrap();
        assert_eq!(node.name, "main");
        assert_eq!(node.url, "https://archive.example.org/rpc");
    }

    #[test]
    fn test_invalid_descriptors() {
        for descriptor in ["", "=localhost:8545", "node=", ":localhost"] {
            let result = resolve(descriptor, &no_aliases());
            assert!(
                matches!(result, Err(FloodError::InvalidNodeFormat { .. })),
                "{descriptor:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let descriptors = vec![
            "a=localhost:8545".to_string(),
            "a=localhost:8546".to_string(),
        ];
        assert!(resolve_all(&descriptors, &no_aliases()).is_err());
    }

    #[test]
    fn test_record_form() {
        let record: NodeRecord = serde_json::from_str(
            r#"{"name": "n", "url": "10.1.1.1:8545", "remote": "user@box"}"#,
        )
        .unwrap();
        let node = resolve_record(record).unwrap();
        assert_eq!(node.url, "http://10.1.1.1:8545");
        assert_eq!(node.remote.as_deref(), Some("user@box"));
    }

    #[test]
    fn test_remote_descriptor_round_trips() {
        let node = resolve("alice@remote1:10.0.0.5:8545", &no_aliases()).unwrap();
        let remote_side = resolve(&node.remote_descriptor(), &no_aliases()).unwrap();
        assert_eq!(remote_side.name, node.name);
        assert_eq!(remote_side.url, node.url);
        assert_eq!(remote_side.remote, None);
    }

    #[tokio::test]
    async fn test_probe_client_version_http() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"Geth/v1.13.0"}"#)
            .create_async()
            .await;

        let version = probe_client_version_http(&server.url()).await;
        assert_eq!(version.as_deref(), Some("Geth/v1.13.0"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_probe_failure_is_swallowed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(500)
            .with_body("nope")
            .create_async()
            .await;

        assert_eq!(probe_client_version_http(&server.url()).await, None);
    }
}
