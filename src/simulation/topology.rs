use std::collections::{BTreeSet, HashMap, VecDeque};

use uuid::Uuid;

/// Undirected graph of simulated nodes.
#[derive(Debug, Default, Clone)]
pub struct Topology {
    adjacency: HashMap<Uuid, BTreeSet<Uuid>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Uuid) -> bool {
        if self.adjacency.contains_key(&node) {
            return false;
        }
        self.adjacency.insert(node, BTreeSet::new());
        true
    }

    /// Removes a node and returns the neighbors it was linked to.
    pub fn remove_node(&mut self, node: &Uuid) -> Vec<Uuid> {
        let Some(neighbors) = self.adjacency.remove(node) else {
            return Vec::new();
        };
        for neighbor in &neighbors {
            if let Some(edges) = self.adjacency.get_mut(neighbor) {
                edges.remove(node);
            }
        }
        neighbors.into_iter().collect()
    }

    pub fn contains(&self, node: &Uuid) -> bool {
        self.adjacency.contains_key(node)
    }

    /// Links two known, distinct nodes. Returns `false` if nothing changed.
    pub fn add_link(&mut self, a: Uuid, b: Uuid) -> bool {
        if a == b || !self.contains(&a) || !self.contains(&b) {
            return false;
        }
        let added = self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);
        added
    }

    pub fn remove_link(&mut self, a: Uuid, b: Uuid) -> bool {
        let removed = self
            .adjacency
            .get_mut(&a)
            .is_some_and(|edges| edges.remove(&b));
        if let Some(edges) = self.adjacency.get_mut(&b) {
            edges.remove(&a);
        }
        removed
    }

    pub fn is_linked(&self, a: &Uuid, b: &Uuid) -> bool {
        self.adjacency.get(a).is_some_and(|edges| edges.contains(b))
    }

    pub fn neighbors(&self, node: &Uuid) -> impl Iterator<Item = Uuid> + '_ {
        self.adjacency.get(node).into_iter().flatten().copied()
    }

    pub fn nodes(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.adjacency.keys().copied()
    }

    /// Each edge once, smaller id first.
    pub fn links(&self) -> Vec<(Uuid, Uuid)> {
        let mut links: Vec<(Uuid, Uuid)> = self
            .adjacency
            .iter()
            .flat_map(|(a, edges)| edges.iter().filter(move |b| a < *b).map(move |b| (*a, *b)))
            .collect();
        links.sort();
        links
    }

    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    /// Hop counts from `source` to every node reachable from it.
    pub fn distances_from(&self, source: &Uuid) -> HashMap<Uuid, usize> {
        let mut distances = HashMap::new();
        if !self.contains(source) {
            return distances;
        }
        distances.insert(*source, 0);
        let mut queue = VecDeque::from([*source]);
        while let Some(node) = queue.pop_front() {
            let next = distances[&node] + 1;
            for neighbor in self.neighbors(&node) {
                if !distances.contains_key(&neighbor) {
                    distances.insert(neighbor, next);
                    queue.push_back(neighbor);
                }
            }
        }
        distances
    }

    /// Longest shortest path inside the component containing `node`.
    pub fn component_diameter(&self, node: &Uuid) -> usize {
        self.distances_from(node)
            .keys()
            .map(|member| self.distances_from(member).into_values().max().unwrap_or(0))
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(count: usize) -> (Topology, Vec<Uuid>) {
        let mut topology = Topology::new();
        let ids: Vec<Uuid> = (0..count).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            topology.add_node(*id);
        }
        (topology, ids)
    }

    #[test]
    fn links_are_undirected() {
        let (mut topology, ids) = nodes(2);
        assert!(topology.add_link(ids[0], ids[1]));
        assert!(!topology.add_link(ids[1], ids[0]));
        assert!(topology.is_linked(&ids[1], &ids[0]));
        assert_eq!(topology.links().len(), 1);

        assert!(topology.remove_link(ids[1], ids[0]));
        assert!(!topology.is_linked(&ids[0], &ids[1]));
        assert!(!topology.remove_link(ids[0], ids[1]));
    }

    #[test]
    fn rejects_self_and_unknown_links() {
        let (mut topology, ids) = nodes(1);
        assert!(!topology.add_link(ids[0], ids[0]));
        assert!(!topology.add_link(ids[0], Uuid::new_v4()));
        assert!(topology.links().is_empty());
    }

    #[test]
    fn removing_a_node_drops_its_edges() {
        let (mut topology, ids) = nodes(3);
        topology.add_link(ids[0], ids[1]);
        topology.add_link(ids[0], ids[2]);

        let mut former = topology.remove_node(&ids[0]);
        former.sort();
        let mut expected = vec![ids[1], ids[2]];
        expected.sort();
        assert_eq!(former, expected);
        assert_eq!(topology.neighbors(&ids[1]).count(), 0);
        assert_eq!(topology.len(), 2);
    }

    #[test]
    fn chain_diameter_and_distances() {
        let (mut topology, ids) = nodes(5);
        for pair in ids.windows(2) {
            topology.add_link(pair[0], pair[1]);
        }
        let isolated = Uuid::new_v4();
        topology.add_node(isolated);

        assert_eq!(topology.distances_from(&ids[0])[&ids[4]], 4);
        assert_eq!(topology.component_diameter(&ids[2]), 4);
        assert_eq!(topology.component_diameter(&isolated), 0);
        assert!(!topology.distances_from(&ids[0]).contains_key(&isolated));
    }
}
