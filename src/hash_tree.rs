//! Nested tree assembly from a flat, generation-ordered node sequence.

use std::collections::HashMap;
use std::hash::Hash;

use serde::Serialize;

/// One input row for [`HashTree::build`].
#[derive(Clone, Debug)]
pub struct TreeEntry<K, T> {
    pub key: K,
    pub parent: Option<K>,
    /// Distance from the subtree's top node.
    pub generations: i32,
    pub value: T,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HashTreeNode<T> {
    pub node: T,
    pub children: Vec<HashTreeNode<T>>,
}

/// Ordered nested mapping of node → children → their children.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct HashTree<T> {
    pub roots: Vec<HashTreeNode<T>>,
}

impl<T> Default for HashTree<T> {
    fn default() -> Self {
        Self { roots: Vec::new() }
    }
}

impl<T> HashTree<T> {
    /// Build the tree from `entries`, keeping only the first `limit_depth`
    /// generations when a limit is given.
    ///
    /// Entries whose parent is absent from the input become top-level nodes;
    /// nothing is fetched to fill gaps.
    pub fn build<K>(
        entries: impl IntoIterator<Item = TreeEntry<K, T>>,
        limit_depth: Option<usize>,
    ) -> Self
    where
        K: Eq + Hash,
    {
        let mut entries: Vec<TreeEntry<K, T>> = entries
            .into_iter()
            .filter(|entry| match limit_depth {
                Some(limit) => (entry.generations.max(0) as usize) < limit,
                None => true,
            })
            .collect();
        entries.sort_by_key(|entry| entry.generations);

        let mut index: HashMap<K, usize> = HashMap::with_capacity(entries.len());
        let mut children: Vec<Vec<usize>> = Vec::with_capacity(entries.len());
        let mut tops = Vec::new();
        let mut values = Vec::with_capacity(entries.len());

        for (position, entry) in entries.into_iter().enumerate() {
            match entry.parent.as_ref().and_then(|parent| index.get(parent)) {
                Some(&parent) => children[parent].push(position),
                None => tops.push(position),
            }
            children.push(Vec::new());
            values.push(Some(entry.value));
            index.entry(entry.key).or_insert(position);
        }

        let roots = tops
            .into_iter()
            .filter_map(|top| assemble(top, &children, &mut values))
            .collect();
        Self { roots }
    }

    pub fn len(&self) -> usize {
        fn count<T>(nodes: &[HashTreeNode<T>]) -> usize {
            nodes.iter().map(|node| 1 + count(&node.children)).sum()
        }
        count(&self.roots)
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Replace every value; a `None` drops that node together with its subtree.
    pub fn filter_map<U>(self, mut f: impl FnMut(T) -> Option<U>) -> HashTree<U> {
        fn convert<T, U>(
            nodes: Vec<HashTreeNode<T>>,
            f: &mut impl FnMut(T) -> Option<U>,
        ) -> Vec<HashTreeNode<U>> {
            nodes
                .into_iter()
                .filter_map(|node| {
                    let value = f(node.node)?;
                    Some(HashTreeNode {
                        node: value,
                        children: convert(node.children, f),
                    })
                })
                .collect()
        }
        HashTree {
            roots: convert(self.roots, &mut f),
        }
    }
}

fn assemble<T>(
    position: usize,
    children: &[Vec<usize>],
    values: &mut [Option<T>],
) -> Option<HashTreeNode<T>> {
    let node = values[position].take()?;
    let children = children[position]
        .iter()
        .filter_map(|&child| assemble(child, children, values))
        .collect();
    Some(HashTreeNode { node, children })
}
