//! Symbolic names for inputs and outputs.
//!
//! A slot is a symbolic name bound either to one file or to a list of files.
//! [`SlotKey`] identifies one file within a slot, and the same keys index the
//! arrays of a block in [`BlockAssociations`].

use crate::array::BlockArray;
use crate::error::{BlockError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey {
    pub name: String,
    /// Position within a list-valued slot, `None` for a single-file slot.
    pub seq: Option<usize>,
}

impl SlotKey {
    pub fn single(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seq: None,
        }
    }

    pub fn listed(name: impl Into<String>, seq: usize) -> Self {
        Self {
            name: name.into(),
            seq: Some(seq),
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.seq {
            Some(seq) => write!(f, "{}[{}]", self.name, seq),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SlotFiles {
    Single(PathBuf),
    List(Vec<PathBuf>),
}

/// Symbolic name to path bindings for one side (inputs or outputs) of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilenameAssociations {
    slots: BTreeMap<String, SlotFiles>,
}

impl FilenameAssociations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to one file, replacing any earlier binding.
    pub fn set(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> &mut Self {
        self.slots.insert(name.into(), SlotFiles::Single(path.into()));
        self
    }

    /// Bind `name` to an ordered list of files.
    pub fn set_list<P: Into<PathBuf>>(
        &mut self,
        name: impl Into<String>,
        paths: impl IntoIterator<Item = P>,
    ) -> &mut Self {
        let paths = paths.into_iter().map(Into::into).collect();
        self.slots.insert(name.into(), SlotFiles::List(paths));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    pub fn path(&self, key: &SlotKey) -> Option<&Path> {
        match (self.slots.get(&key.name)?, key.seq) {
            (SlotFiles::Single(path), None) => Some(path),
            (SlotFiles::List(paths), Some(seq)) => paths.get(seq).map(PathBuf::as_path),
            _ => None,
        }
    }

    /// Every bound file, ordered by name then sequence.
    pub fn iter(&self) -> impl Iterator<Item = (SlotKey, &Path)> {
        self.slots.iter().flat_map(|(name, files)| {
            let entries: Vec<(SlotKey, &Path)> = match files {
                SlotFiles::Single(path) => vec![(SlotKey::single(name.clone()), path.as_path())],
                SlotFiles::List(paths) => paths
                    .iter()
                    .enumerate()
                    .map(|(seq, path)| (SlotKey::listed(name.clone(), seq), path.as_path()))
                    .collect(),
            };
            entries
        })
    }
}

/// The arrays of one block, keyed like the files they belong to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockAssociations {
    arrays: BTreeMap<SlotKey, BlockArray>,
}

impl BlockAssociations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: SlotKey, array: impl Into<BlockArray>) {
        self.arrays.insert(key, array.into());
    }

    /// Set the array of a single-file slot.
    pub fn set(&mut self, name: &str, array: impl Into<BlockArray>) {
        self.insert(SlotKey::single(name), array);
    }

    /// Set one array of a list-valued slot.
    pub fn set_listed(&mut self, name: &str, seq: usize, array: impl Into<BlockArray>) {
        self.insert(SlotKey::listed(name, seq), array);
    }

    pub fn get(&self, key: &SlotKey) -> Option<&BlockArray> {
        self.arrays.get(key)
    }

    /// Array of a single-file slot, or an error naming the missing slot.
    pub fn array(&self, name: &str) -> Result<&BlockArray> {
        self.arrays
            .get(&SlotKey::single(name))
            .ok_or_else(|| BlockError::MissingOutput(name.to_string()))
    }

    /// Arrays of a list-valued slot in sequence order.
    pub fn list(&self, name: &str) -> Vec<&BlockArray> {
        self.arrays
            .iter()
            .filter(|(key, _)| key.name == name && key.seq.is_some())
            .map(|(_, array)| array)
            .collect()
    }

    pub fn remove(&mut self, key: &SlotKey) -> Option<BlockArray> {
        self.arrays.remove(key)
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SlotKey, &BlockArray)> {
        self.arrays.iter()
    }
}

impl IntoIterator for BlockAssociations {
    type Item = (SlotKey, BlockArray);
    type IntoIter = std::collections::btree_map::IntoIter<SlotKey, BlockArray>;

    fn into_iter(self) -> Self::IntoIter {
        self.arrays.into_iter()
    }
}
