use std::collections::BTreeMap;

use crate::error::ResolveError;
use crate::graph::DependencyGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Depth-first postorder from the root: every package appears after all of
/// its dependencies, siblings visited in declaration order. A back edge to a
/// package still in progress is a cycle, reported as the path that closes it.
pub(crate) fn dependency_first_order(graph: &DependencyGraph) -> Result<Vec<String>, ResolveError> {
    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
    let mut ordered = Vec::with_capacity(graph.len());
    // (package, index of the next edge to follow)
    let mut stack: Vec<(&str, usize)> = vec![(graph.root(), 0)];
    marks.insert(graph.root(), Mark::InProgress);

    while let Some(frame) = stack.last_mut() {
        let (package, next_edge) = *frame;
        let edges = graph.edges(package);

        let Some(dependency) = edges.get(next_edge) else {
            marks.insert(package, Mark::Done);
            ordered.push(package.to_string());
            stack.pop();
            continue;
        };
        frame.1 += 1;

        match marks.get(dependency.as_str()) {
            Some(Mark::Done) => {}
            Some(Mark::InProgress) => {
                let start = stack
                    .iter()
                    .position(|(id, _)| *id == dependency.as_str())
                    .unwrap_or(0);
                let mut path: Vec<String> =
                    stack[start..].iter().map(|(id, _)| id.to_string()).collect();
                path.push(dependency.clone());
                return Err(ResolveError::Cycle { path });
            }
            None => {
                marks.insert(dependency.as_str(), Mark::InProgress);
                stack.push((dependency.as_str(), 0));
            }
        }
    }

    Ok(ordered)
}

/// Level 0 holds packages without self-backend dependencies; every other
/// package sits one level above its deepest dependency. `ordered` must be
/// dependency-first.
pub(crate) fn assign_depths(graph: &DependencyGraph, ordered: &[String]) -> BTreeMap<String, usize> {
    let mut depths: BTreeMap<String, usize> = BTreeMap::new();
    for package in ordered {
        let depth = graph
            .edges(package)
            .iter()
            .filter_map(|dependency| depths.get(dependency))
            .map(|depth| depth + 1)
            .max()
            .unwrap_or(0);
        depths.insert(package.clone(), depth);
    }
    depths
}
