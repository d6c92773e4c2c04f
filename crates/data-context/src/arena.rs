//! Generational arena for observed nodes.
//!
//! Nodes are addressed by `u32` indices into a `Vec`. A generation counter
//! per entry turns a reused index into a stale handle instead of a dangling
//! one.

use crate::node::{NodeData, NodeId};

#[derive(Debug)]
struct Entry {
    generation: u32,
    data: Option<NodeData>,
}

#[derive(Debug, Default)]
pub(crate) struct Arena {
    entries: Vec<Entry>,
    free: Vec<u32>,
    len: usize,
}

impl Arena {
    pub fn insert(&mut self, data: NodeData) -> NodeId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.data = Some(data);
            return NodeId {
                index,
                generation: entry.generation,
            };
        }
        let index = self.entries.len() as u32;
        self.entries.push(Entry {
            generation: 0,
            data: Some(data),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeData> {
        let entry = self.entries.get(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.data.as_ref()
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        let entry = self.entries.get_mut(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.data.as_mut()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn remove(&mut self, id: NodeId) -> Option<NodeData> {
        let entry = self.entries.get_mut(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        let data = entry.data.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(data)
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.data.is_some())
            .map(|(i, e)| NodeId {
                index: i as u32,
                generation: e.generation,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }
}
