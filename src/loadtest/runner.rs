//! Fan a selection of nodes and tests out into jobs.

use indexmap::IndexMap;
use std::sync::Arc;

use crate::loadtest::engine::{Job, Scheduler};
use crate::loadtest::error::{FloodError, Result};
use crate::loadtest::node::Node;
use crate::loadtest::output::ResultSet;
use crate::loadtest::plan::LoadTest;

/// One node, or several keyed by name.
#[derive(Debug, Clone)]
pub enum NodeSelection {
    Single(Node),
    Multiple(IndexMap<String, Node>),
}

/// One test, or several keyed by name.
#[derive(Debug, Clone)]
pub enum TestSelection {
    Single(LoadTest),
    Multiple(IndexMap<String, LoadTest>),
}

impl NodeSelection {
    fn is_empty(&self) -> bool {
        matches!(self, Self::Multiple(nodes) if nodes.is_empty())
    }
}

impl TestSelection {
    fn is_empty(&self) -> bool {
        matches!(self, Self::Multiple(tests) if tests.is_empty())
    }
}

/// Expand a selection into jobs.
///
/// Keys are the node name when only nodes vary (or nothing does), the test
/// name when only tests vary, and `"{node}__{test}"` for the cross product.
pub fn plan_jobs(nodes: NodeSelection, tests: TestSelection) -> Result<Vec<Job>> {
    if nodes.is_empty() {
        return Err(FloodError::plan("no nodes selected"));
    }
    if tests.is_empty() {
        return Err(FloodError::plan("no tests selected"));
    }

    let jobs = match (nodes, tests) {
        (NodeSelection::Single(node), TestSelection::Single(test)) => vec![Job {
            key: node.name.clone(),
            node,
            test: Arc::new(test),
        }],
        (NodeSelection::Multiple(nodes), TestSelection::Single(test)) => {
            let test = Arc::new(test);
            nodes
                .into_iter()
                .map(|(name, node)| Job {
                    key: name,
                    node,
                    test: Arc::clone(&test),
                })
                .collect()
        },
        (NodeSelection::Single(node), TestSelection::Multiple(tests)) => tests
            .into_iter()
            .map(|(name, test)| Job {
                key: name,
                node: node.clone(),
                test: Arc::new(test),
            })
            .collect(),
        (NodeSelection::Multiple(nodes), TestSelection::Multiple(tests)) => {
            let tests: Vec<(String, Arc<LoadTest>)> = tests
                .into_iter()
                .map(|(name, test)| (name, Arc::new(test)))
                .collect();
            let mut jobs = Vec::with_capacity(nodes.len() * tests.len());
            for (node_name, node) in &nodes {
                for (test_name, test) in &tests {
                    jobs.push(Job {
                        key: format!("{node_name}__{test_name}"),
                        node: node.clone(),
                        test: Arc::clone(test),
                    });
                }
            }
            jobs
        },
    };
    Ok(jobs)
}

/// Run every (node, test) combination of the selection.
pub async fn run_all(
    scheduler: &Scheduler,
    nodes: NodeSelection,
    tests: TestSelection,
) -> Result<ResultSet> {
    let jobs = plan_jobs(nodes, tests)?;
    tracing::info!(jobs = jobs.len(), "starting load tests");
    scheduler.run_jobs(jobs).await
}
