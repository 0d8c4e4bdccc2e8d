//! Name trees and their resolved counterparts.
//!
//! A portfolio line is declared as a tree of timeseries names:
//! - a single name (`Leaf`),
//! - a list of names whose series are summed (`LeafList`),
//! - named children, each again a tree (`Branch`).
//!
//! The same shape is carried through every resolution phase
//! (`Tree<String>` -> `Tree<TsRef>` -> `Tree<IdLeaf>` -> `Tree<DataLeaf>`).

use crate::series::Series;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// Tree of timeseries references.
#[derive(Debug, Clone)]
pub enum Tree<T> {
    Leaf(T),
    LeafList(Vec<T>),
    /// Named children in declaration order. Keys are unique.
    Branch(Vec<(String, Tree<T>)>),
}

/// Tree of timeseries names as declared in the structure document.
pub type NameTree = Tree<String>;

impl<T> Tree<T> {
    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> Tree<U> {
        self.map_inner(&mut f)
    }

    fn map_inner<U>(&self, f: &mut impl FnMut(&T) -> U) -> Tree<U> {
        match self {
            Tree::Leaf(leaf) => Tree::Leaf(f(leaf)),
            Tree::LeafList(leaves) => Tree::LeafList(leaves.iter().map(&mut *f).collect()),
            Tree::Branch(children) => Tree::Branch(
                children
                    .iter()
                    .map(|(name, child)| (name.clone(), child.map_inner(f)))
                    .collect(),
            ),
        }
    }

    /// Fallible, consuming map over the leaves in depth-first declaration order.
    pub fn try_map<U, E>(self, mut f: impl FnMut(T) -> Result<U, E>) -> Result<Tree<U>, E> {
        self.try_map_inner(&mut f)
    }

    fn try_map_inner<U, E>(self, f: &mut impl FnMut(T) -> Result<U, E>) -> Result<Tree<U>, E> {
        Ok(match self {
            Tree::Leaf(leaf) => Tree::Leaf(f(leaf)?),
            Tree::LeafList(leaves) => {
                Tree::LeafList(leaves.into_iter().map(&mut *f).collect::<Result<_, _>>()?)
            }
            Tree::Branch(children) => Tree::Branch(
                children
                    .into_iter()
                    .map(|(name, child)| Ok((name, child.try_map_inner(f)?)))
                    .collect::<Result<_, E>>()?,
            ),
        })
    }

    /// Leaves in depth-first declaration order.
    pub fn leaves(&self) -> Vec<&T> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a T>) {
        match self {
            Tree::Leaf(leaf) => out.push(leaf),
            Tree::LeafList(leaves) => out.extend(leaves.iter()),
            Tree::Branch(children) => {
                for (_, child) in children {
                    child.collect_leaves(out);
                }
            }
        }
    }

    pub fn leaf_count(&self) -> usize {
        match self {
            Tree::Leaf(_) => 1,
            Tree::LeafList(leaves) => leaves.len(),
            Tree::Branch(children) => children.iter().map(|(_, c)| c.leaf_count()).sum(),
        }
    }

    /// True if both trees have the same variants, list lengths and child names.
    pub fn same_shape<U>(&self, other: &Tree<U>) -> bool {
        match (self, other) {
            (Tree::Leaf(_), Tree::Leaf(_)) => true,
            (Tree::LeafList(a), Tree::LeafList(b)) => a.len() == b.len(),
            (Tree::Branch(a), Tree::Branch(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|((ka, ca), (kb, cb))| ka == kb && ca.same_shape(cb))
            }
            _ => false,
        }
    }

    /// Child by name, for branches.
    pub fn child(&self, name: &str) -> Option<&Tree<T>> {
        match self {
            Tree::Branch(children) => children.iter().find(|(k, _)| k == name).map(|(_, c)| c),
            _ => None,
        }
    }
}

/// Branch children compare as a mapping; leaf lists compare in order.
impl<T: PartialEq> PartialEq for Tree<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Tree::Leaf(a), Tree::Leaf(b)) => a == b,
            (Tree::LeafList(a), Tree::LeafList(b)) => a == b,
            (Tree::Branch(a), Tree::Branch(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(key, child)| {
                        b.iter().any(|(other_key, other_child)| key == other_key && child == other_child)
                    })
            }
            _ => false,
        }
    }
}

impl<T: Serialize> Serialize for Tree<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Tree::Leaf(leaf) => leaf.serialize(serializer),
            Tree::LeafList(leaves) => serializer.collect_seq(leaves),
            Tree::Branch(children) => {
                let mut map = serializer.serialize_map(Some(children.len()))?;
                for (name, child) in children {
                    map.serialize_entry(name, child)?;
                }
                map.end()
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTree {
    Name(String),
    Names(Vec<String>),
    Children(OrderedMap<RawTree>),
}

impl From<RawTree> for NameTree {
    fn from(raw: RawTree) -> Self {
        match raw {
            RawTree::Name(name) => Tree::Leaf(name),
            RawTree::Names(names) => Tree::LeafList(names),
            RawTree::Children(OrderedMap(children)) => Tree::Branch(
                children
                    .into_iter()
                    .map(|(name, child)| (name, child.into()))
                    .collect(),
            ),
        }
    }
}

impl<'de> Deserialize<'de> for NameTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawTree::deserialize(deserializer)
            .map(Into::into)
            .map_err(|_| {
                de::Error::custom(
                    "timeseries names must be a string, a list of strings, or a mapping of child names",
                )
            })
    }
}

/// Mapping that keeps declaration order and rejects duplicate keys.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V>(pub Vec<(String, V)>);

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V> OrderedMap<V> {
    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Insert or replace, keeping the position of an existing key.
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedMapVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping with string keys")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries: Vec<(String, V)> = Vec::new();
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    if entries.iter().any(|(k, _)| *k == key) {
                        return Err(de::Error::custom(format!("duplicate key '{key}'")));
                    }
                    entries.push((key, value));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

/// Numeric id of a timeseries on the remote server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TsId(pub i64);

impl fmt::Display for TsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A timeseries name within a portfolio; not yet resolved to an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TsRef {
    pub portfolio_id: String,
    pub name: String,
}

impl TsRef {
    pub fn new(portfolio_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            portfolio_id: portfolio_id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TsRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.portfolio_id, self.name)
    }
}

/// A timeseries reference with its server id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdLeaf {
    pub ts: TsRef,
    pub id: TsId,
}

/// A timeseries reference with its id and fetched data.
#[derive(Debug, Clone, PartialEq)]
pub struct DataLeaf {
    pub ts: TsRef,
    pub id: TsId,
    pub series: Series,
}

impl NameTree {
    /// Attach a portfolio id to every name.
    pub fn for_portfolio(&self, portfolio_id: &str) -> Tree<TsRef> {
        self.map(|name| TsRef::new(portfolio_id, name.clone()))
    }
}
