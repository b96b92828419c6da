//! Dependency resolver — validates the plugin graph and computes safe
//! operation order before any loading occurs.
//!
//! The graph is a point-in-time view over `Active` records, optionally
//! extended with the candidate being installed or reloaded. All iteration is
//! over ordered maps, so results are deterministic and reproducible.

use std::collections::{BTreeMap, BTreeSet};

use persona_core::{PluginError, PluginRecord, PluginStatus};

/// Directed dependency relation: plugin name → names it requires Active.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

impl DependencyGraph {
    /// Build the graph restricted to `Active` records.
    pub fn from_records(records: &[PluginRecord]) -> Self {
        let mut edges = BTreeMap::new();
        for record in records {
            if record.status == PluginStatus::Active {
                edges.insert(record.name.clone(), record.dependencies.clone());
            }
        }
        Self { edges }
    }

    /// The same graph with one candidate node (an install or reload target)
    /// unioned in, replacing any existing edge set for that name.
    pub fn with_candidate(&self, name: &str, dependencies: &BTreeSet<String>) -> Self {
        let mut graph = self.clone();
        graph.edges.insert(name.to_string(), dependencies.clone());
        graph
    }

    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    /// Dependencies of `name` that are not present in the graph (i.e. not
    /// Active). A non-empty result blocks activation.
    pub fn missing_dependencies(&self, dependencies: &BTreeSet<String>) -> BTreeSet<String> {
        dependencies
            .iter()
            .filter(|dep| !self.edges.contains_key(*dep))
            .cloned()
            .collect()
    }

    /// Cycle check: DFS with recursion-stack coloring over every node.
    /// On failure the error carries the cycle path, closed on the repeated
    /// node (`a -> b -> a`).
    pub fn validate(&self) -> Result<(), PluginError> {
        let mut colors: BTreeMap<&str, Color> =
            self.edges.keys().map(|n| (n.as_str(), Color::White)).collect();

        for node in self.edges.keys() {
            if colors[node.as_str()] == Color::White {
                let mut stack = Vec::new();
                self.visit(node, &mut colors, &mut stack)?;
            }
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        colors: &mut BTreeMap<&'a str, Color>,
        stack: &mut Vec<&'a str>,
    ) -> Result<(), PluginError> {
        colors.insert(node, Color::Gray);
        stack.push(node);

        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                // Edges into nodes outside the graph are handled by the
                // missing-dependency check, not the cycle check.
                match colors.get(dep.as_str()).copied() {
                    Some(Color::Gray) => {
                        let start = stack.iter().position(|n| *n == dep).unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[start..].iter().map(|s| s.to_string()).collect();
                        path.push(dep.clone());
                        return Err(PluginError::CycleDetected { path });
                    }
                    Some(Color::White) => self.visit(dep, colors, stack)?,
                    _ => {}
                }
            }
        }

        stack.pop();
        colors.insert(node, Color::Black);
        Ok(())
    }

    /// Names of plugins that directly depend on `name`.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|(_, deps)| deps.contains(name))
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Affected closure of a reload: the target itself first, then its
    /// transitive dependents. Dependents are never reloaded automatically;
    /// the caller flags them `needs_revalidation`.
    pub fn affected_closure(&self, name: &str) -> Vec<String> {
        let mut closure = vec![name.to_string()];
        let mut seen: BTreeSet<String> = closure.iter().cloned().collect();
        let mut frontier = vec![name.to_string()];
        while let Some(current) = frontier.pop() {
            for dependent in self.dependents_of(&current) {
                if seen.insert(dependent.clone()) {
                    closure.push(dependent.clone());
                    frontier.push(dependent);
                }
            }
        }
        closure
    }

    /// Deterministic topological installation order: dependencies before
    /// dependents, ties among independent plugins broken by lexicographic
    /// name order. Errors if the graph has a cycle.
    pub fn install_order(&self) -> Result<Vec<String>, PluginError> {
        self.validate()?;

        // Kahn's algorithm over a BTreeSet frontier: the smallest ready name
        // is always emitted first, which makes install sequences reproducible.
        let mut remaining: BTreeMap<&str, BTreeSet<&str>> = self
            .edges
            .iter()
            .map(|(n, deps)| {
                let in_graph: BTreeSet<&str> = deps
                    .iter()
                    .filter(|d| self.edges.contains_key(*d))
                    .map(|d| d.as_str())
                    .collect();
                (n.as_str(), in_graph)
            })
            .collect();

        let mut order = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let ready: Option<&str> = remaining
                .iter()
                .find(|(_, deps)| deps.is_empty())
                .map(|(n, _)| *n);
            // validate() passed, so a ready node always exists.
            let Some(next) = ready else { break };
            remaining.remove(next);
            for deps in remaining.values_mut() {
                deps.remove(next);
            }
            order.push(next.to_string());
        }
        Ok(order)
    }
}
