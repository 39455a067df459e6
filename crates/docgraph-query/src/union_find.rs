//! Disjoint sets over pattern aliases
//!
//! Union by rank with path compression; aliases are interned to dense
//! indices in the order they are first seen.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct UnionFind {
    index: HashMap<String, usize>,
    aliases: Vec<String>,
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an alias as its own singleton set, returning its index
    pub fn add(&mut self, alias: &str) -> usize {
        if let Some(&idx) = self.index.get(alias) {
            return idx;
        }
        let idx = self.aliases.len();
        self.index.insert(alias.to_string(), idx);
        self.aliases.push(alias.to_string());
        self.parent.push(idx);
        self.rank.push(0);
        idx
    }

    fn find_index(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != cur {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// Representative alias of the set containing `alias`
    pub fn find(&mut self, alias: &str) -> Option<&str> {
        let idx = *self.index.get(alias)?;
        let root = self.find_index(idx);
        Some(self.aliases[root].as_str())
    }

    /// Merge the sets of two aliases, registering them if needed.
    /// Returns false if they were already in the same set.
    pub fn union(&mut self, a: &str, b: &str) -> bool {
        let ia = self.add(a);
        let ib = self.add(b);
        let ra = self.find_index(ia);
        let rb = self.find_index(ib);
        if ra == rb {
            return false;
        }

        if self.rank[ra] < self.rank[rb] {
            self.parent[ra] = rb;
        } else if self.rank[ra] > self.rank[rb] {
            self.parent[rb] = ra;
        } else {
            self.parent[rb] = ra;
            self.rank[ra] = self.rank[ra].saturating_add(1);
        }
        true
    }

    pub fn connected(&mut self, a: &str, b: &str) -> bool {
        match (self.index.get(a).copied(), self.index.get(b).copied()) {
            (Some(ia), Some(ib)) => self.find_index(ia) == self.find_index(ib),
            _ => false,
        }
    }

    /// Aliases in registration order
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}
