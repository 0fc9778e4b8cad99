use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{AssetError, AssetResult};
use crate::id::AssetId;

/// Directed dependency graph over [`AssetId`]s. Maintains both adjacency
/// directions so cascades (who depends on a changed asset) and load
/// ordering (what must load before an asset) are both O(degree) lookups.
/// Acyclic by construction: insertion rejects any edge that would close a
/// cycle, per the spec's stricter-than-source contract.
#[derive(Default)]
pub struct DependencyGraph {
    dependencies: HashMap<AssetId, Vec<AssetId>>,
    dependents: HashMap<AssetId, Vec<AssetId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        DependencyGraph::default()
    }

    /// Inserts edge `asset -> dependency` ("asset depends on dependency").
    /// Rejected if `dependency` transitively depends on `asset` already.
    pub fn add_dependency(&mut self, asset: AssetId, dependency: AssetId) -> AssetResult<()> {
        if asset == dependency || self.depends_on_transitively(dependency, asset) {
            return Err(AssetError::WouldCreateCycle { asset, dependency });
        }
        let deps = self.dependencies.entry(asset).or_default();
        if !deps.contains(&dependency) {
            deps.push(dependency);
        }
        let dependents = self.dependents.entry(dependency).or_default();
        if !dependents.contains(&asset) {
            dependents.push(asset);
        }
        Ok(())
    }

    pub fn remove_dependency(&mut self, asset: AssetId, dependency: AssetId) {
        if let Some(deps) = self.dependencies.get_mut(&asset) {
            deps.retain(|&d| d != dependency);
        }
        if let Some(dependents) = self.dependents.get_mut(&dependency) {
            dependents.retain(|&d| d != asset);
        }
    }

    pub fn remove_asset(&mut self, asset: AssetId) {
        if let Some(deps) = self.dependencies.remove(&asset) {
            for dep in deps {
                if let Some(dependents) = self.dependents.get_mut(&dep) {
                    dependents.retain(|&d| d != asset);
                }
            }
        }
        if let Some(dependents) = self.dependents.remove(&asset) {
            for dependent in dependents {
                if let Some(deps) = self.dependencies.get_mut(&dependent) {
                    deps.retain(|&d| d != asset);
                }
            }
        }
    }

    pub fn dependencies_of(&self, asset: AssetId) -> Vec<AssetId> {
        self.dependencies.get(&asset).cloned().unwrap_or_default()
    }

    pub fn dependents_of(&self, asset: AssetId) -> Vec<AssetId> {
        self.dependents.get(&asset).cloned().unwrap_or_default()
    }

    /// True if `start` transitively depends on `target` (DFS over the
    /// dependency edges), used to reject cycle-closing insertions.
    fn depends_on_transitively(&self, start: AssetId, target: AssetId) -> bool {
        let mut stack = vec![start];
        let mut visited = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if !visited.insert(node) {
                continue;
            }
            if let Some(deps) = self.dependencies.get(&node) {
                stack.extend(deps.iter().copied());
            }
        }
        false
    }

    /// BFS over reverse edges: every asset transitively depending on `asset`.
    pub fn transitive_dependents(&self, asset: AssetId) -> Vec<AssetId> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from(self.dependents_of(asset));
        while let Some(node) = queue.pop_front() {
            if !visited.insert(node) {
                continue;
            }
            result.push(node);
            queue.extend(self.dependents_of(node));
        }
        result
    }

    /// Kahn's algorithm restricted to the closure of `ids` and their
    /// dependencies: dependencies are placed before dependents. Ties are
    /// broken by ascending [`AssetId`] for determinism.
    pub fn topological_load_order(&self, ids: &[AssetId]) -> Vec<AssetId> {
        let mut closure: HashSet<AssetId> = HashSet::new();
        let mut stack: Vec<AssetId> = ids.to_vec();
        while let Some(id) = stack.pop() {
            if closure.insert(id) {
                stack.extend(self.dependencies_of(id));
            }
        }

        let mut in_degree: HashMap<AssetId, usize> = HashMap::new();
        for &node in &closure {
            in_degree.entry(node).or_insert(0);
            for &dep in &self.dependencies_of(node) {
                if closure.contains(&dep) {
                    *in_degree.entry(node).or_insert(0) += 1;
                }
            }
        }

        let mut ready: std::collections::BinaryHeap<std::cmp::Reverse<AssetId>> = in_degree
            .iter()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(&id, _)| std::cmp::Reverse(id))
            .collect();

        let mut order = Vec::with_capacity(closure.len());
        let mut remaining = in_degree;
        while let Some(std::cmp::Reverse(node)) = ready.pop() {
            order.push(node);
            for &dependent in &self.dependents_of(node) {
                if !closure.contains(&dependent) {
                    continue;
                }
                if let Some(deg) = remaining.get_mut(&dependent) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push(std::cmp::Reverse(dependent));
                    }
                }
            }
        }
        order
    }

    pub fn asset_count(&self) -> usize {
        let mut ids: HashSet<AssetId> = HashSet::new();
        ids.extend(self.dependencies.keys());
        ids.extend(self.dependents.keys());
        ids.len()
    }

    pub fn clear(&mut self) {
        self.dependencies.clear();
        self.dependents.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> AssetId {
        AssetId(n)
    }

    #[test]
    fn rejects_direct_cycle() {
        let mut g = DependencyGraph::new();
        g.add_dependency(id(1), id(2)).unwrap();
        let err = g.add_dependency(id(2), id(1)).unwrap_err();
        assert!(matches!(err, AssetError::WouldCreateCycle { .. }));
    }

    #[test]
    fn rejects_transitive_cycle() {
        let mut g = DependencyGraph::new();
        g.add_dependency(id(1), id(2)).unwrap();
        g.add_dependency(id(2), id(3)).unwrap();
        let err = g.add_dependency(id(3), id(1)).unwrap_err();
        assert!(matches!(err, AssetError::WouldCreateCycle { .. }));
    }

    #[test]
    fn topological_order_places_dependencies_first() {
        let mut g = DependencyGraph::new();
        // material(1) depends on shader(2) and texture(3)
        g.add_dependency(id(1), id(2)).unwrap();
        g.add_dependency(id(1), id(3)).unwrap();
        let order = g.topological_load_order(&[id(1)]);
        let pos = |x: AssetId| order.iter().position(|&i| i == x).unwrap();
        assert!(pos(id(2)) < pos(id(1)));
        assert!(pos(id(3)) < pos(id(1)));
    }

    #[test]
    fn transitive_dependents_covers_multiple_hops() {
        let mut g = DependencyGraph::new();
        g.add_dependency(id(1), id(2)).unwrap(); // 1 depends on 2
        g.add_dependency(id(2), id(3)).unwrap(); // 2 depends on 3
        let dependents = g.transitive_dependents(id(3));
        assert!(dependents.contains(&id(2)));
        assert!(dependents.contains(&id(1)));
    }

    #[test]
    fn large_graph_topological_sort_completes() {
        let mut g = DependencyGraph::new();
        let n = 10_000u64;
        for i in 1..n {
            g.add_dependency(id(i + 1), id(i)).unwrap();
        }
        let ids: Vec<AssetId> = (1..=n).map(id).collect();
        let order = g.topological_load_order(&ids);
        assert_eq!(order.len() as u64, n);
        assert_eq!(order[0], id(1));
    }
}
