//! Typed, adaptable parameter trees.
//!
//! A tree is either a [`Leaf`] (a typed scalar with an attached adaptor) or
//! a [`Tree`] (an ordered sequence of named child nodes). [`streamline`] and
//! [`assign`] give every algorithm a uniform, type-erased way to read and
//! write active leaves without knowing the tree's shape.

pub mod adaptor;

use crate::config::Domain;
use adaptor::Adaptor;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// The value held by a leaf, plus its declared bounds where constrained.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum LeafValue {
    Double(f64),
    ConstrainedDouble(f64, Domain),
    Float(f32),
    ConstrainedFloat(f32, (f32, f32)),
    Int32(i32),
    ConstrainedInt32(i32, (i32, i32)),
    Bool(bool),
}

impl LeafValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            LeafValue::Double(v) | LeafValue::ConstrainedDouble(v, _) => *v,
            LeafValue::Float(v) | LeafValue::ConstrainedFloat(v, _) => *v as f64,
            LeafValue::Int32(v) | LeafValue::ConstrainedInt32(v, _) => *v as f64,
            LeafValue::Bool(v) => {
                if *v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Returns true iff a constrained value currently lies within its bounds.
    /// Unconstrained kinds are always in bounds.
    pub fn in_bounds(&self) -> bool {
        match self {
            LeafValue::ConstrainedDouble(v, d) => d.contains(*v),
            LeafValue::ConstrainedFloat(v, (lo, hi)) => *v >= *lo && *v <= *hi,
            LeafValue::ConstrainedInt32(v, (lo, hi)) => *v >= *lo && *v <= *hi,
            _ => true,
        }
    }

    fn clamp_to_bounds(&mut self) {
        match self {
            LeafValue::ConstrainedDouble(v, d) => *v = d.clamp(*v),
            LeafValue::ConstrainedFloat(v, (lo, hi)) => *v = v.clamp(*lo, *hi),
            LeafValue::ConstrainedInt32(v, (lo, hi)) => *v = (*v).clamp(*lo, *hi),
            _ => {}
        }
    }

    fn random_init(&mut self, rng: &mut ChaCha8Rng) {
        match self {
            LeafValue::Double(v) => *v = rng.random_range(-1.0..1.0),
            LeafValue::ConstrainedDouble(v, d) => *v = rng.random_range(d.min..=d.max),
            LeafValue::Float(v) => *v = rng.random_range(-1.0f32..1.0),
            LeafValue::ConstrainedFloat(v, (lo, hi)) => *v = rng.random_range(*lo..=*hi),
            LeafValue::Int32(v) => *v = rng.random_range(-100..100),
            LeafValue::ConstrainedInt32(v, (lo, hi)) => *v = rng.random_range(*lo..=*hi),
            LeafValue::Bool(v) => *v = rng.random_bool(0.5),
        }
    }
}

/// A single typed scalar, with its own adaptor, activity flag, and name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leaf {
    pub name: String,
    pub value: LeafValue,
    pub adaptor: Adaptor,
    pub active: bool,
    /// If set, randomInit leaves this leaf untouched.
    pub random_init_blocked: bool,
}

impl Leaf {
    pub fn new(name: impl Into<String>, value: LeafValue, adaptor: Adaptor) -> Self {
        Self { name: name.into(), value, adaptor, active: true, random_init_blocked: false }
    }

    /// Applies the attached adaptor with probability `p_ad`. Returns true if
    /// the value changed. Invariant: value stays within declared bounds.
    pub fn adapt(&mut self, rng: &mut ChaCha8Rng) -> bool {
        if !self.active {
            return false;
        }
        let changed = self.adaptor.adapt(&mut self.value, rng);
        if changed {
            self.value.clamp_to_bounds();
        }
        changed
    }

    pub fn random_init(&mut self, rng: &mut ChaCha8Rng) {
        if self.active && !self.random_init_blocked {
            self.value.random_init(rng);
            self.value.clamp_to_bounds();
        }
    }

    pub fn in_bounds(&self) -> bool {
        self.value.in_bounds()
    }
}

/// A node in the parameter tree: either a leaf or an ordered group of children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    Leaf(Leaf),
    Group(String, Vec<Node>),
}

/// The root of a candidate's parameter tree.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Tree {
    pub children: Vec<Node>,
}

impl Tree {
    pub fn new() -> Self {
        Self { children: Vec::new() }
    }

    pub fn push_leaf(&mut self, leaf: Leaf) {
        self.children.push(Node::Leaf(leaf));
    }

    pub fn push_group(&mut self, name: impl Into<String>, group: Tree) {
        self.children.push(Node::Group(name.into(), group.children));
    }

    /// Depth-first enumeration of active leaves, in declaration order.
    pub fn leaves(&self) -> Vec<&Leaf> {
        let mut out = Vec::new();
        fn walk<'a>(nodes: &'a [Node], out: &mut Vec<&'a Leaf>) {
            for node in nodes {
                match node {
                    Node::Leaf(leaf) if leaf.active => out.push(leaf),
                    Node::Leaf(_) => {}
                    Node::Group(_, children) => walk(children, out),
                }
            }
        }
        walk(&self.children, &mut out);
        out
    }

    pub fn leaves_mut(&mut self) -> Vec<&mut Leaf> {
        let mut out = Vec::new();
        fn walk<'a>(nodes: &'a mut [Node], out: &mut Vec<&'a mut Leaf>) {
            for node in nodes {
                match node {
                    Node::Leaf(leaf) if leaf.active => out.push(leaf),
                    Node::Leaf(_) => {}
                    Node::Group(_, children) => walk(children, out),
                }
            }
        }
        walk(&mut self.children, &mut out);
        out
    }

    /// Streamline active leaves into a flat sequence of values, in
    /// declaration order. The counterpart of [`Tree::assign`].
    pub fn streamline(&self) -> Vec<f64> {
        self.leaves().into_iter().map(|leaf| leaf.value.as_f64()).collect()
    }

    /// Streamline active leaves into a name-keyed map. Names are qualified
    /// with dotted group prefixes to stay unique across groups.
    pub fn streamline_named(&self) -> std::collections::HashMap<String, f64> {
        let mut out = std::collections::HashMap::new();
        fn walk(nodes: &[Node], prefix: &str, out: &mut std::collections::HashMap<String, f64>) {
            for node in nodes {
                match node {
                    Node::Leaf(leaf) if leaf.active => {
                        let key = if prefix.is_empty() {
                            leaf.name.clone()
                        } else {
                            format!("{prefix}.{}", leaf.name)
                        };
                        out.insert(key, leaf.value.as_f64());
                    }
                    Node::Leaf(_) => {}
                    Node::Group(name, children) => {
                        let next_prefix =
                            if prefix.is_empty() { name.clone() } else { format!("{prefix}.{name}") };
                        walk(children, &next_prefix, out);
                    }
                }
            }
        }
        walk(&self.children, "", &mut out);
        out
    }

    /// The inverse of [`Tree::streamline`]: writes a flat sequence of values
    /// back into active leaves, in the same declaration order. Panics if the
    /// lengths don't match — callers must round-trip through `streamline`
    /// first.
    pub fn assign(&mut self, values: &[f64]) {
        let mut it = values.iter();
        for leaf in self.leaves_mut() {
            if let Some(&v) = it.next() {
                leaf.value = coerce(&leaf.value, v);
                leaf.value.clamp_to_bounds();
            }
        }
    }

    pub fn adapt(&mut self, rng: &mut ChaCha8Rng) -> usize {
        self.leaves_mut().into_iter().filter(|leaf| leaf.adapt(rng)).count()
    }

    pub fn random_init(&mut self, rng: &mut ChaCha8Rng) {
        for leaf in self.leaves_mut() {
            leaf.random_init(rng);
        }
    }

    pub fn all_in_bounds(&self) -> bool {
        self.leaves().iter().all(|leaf| leaf.in_bounds())
    }

    pub fn len(&self) -> usize {
        self.leaves().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn coerce(template: &LeafValue, v: f64) -> LeafValue {
    match template {
        LeafValue::Double(_) => LeafValue::Double(v),
        LeafValue::ConstrainedDouble(_, d) => LeafValue::ConstrainedDouble(v, d.clone()),
        LeafValue::Float(_) => LeafValue::Float(v as f32),
        LeafValue::ConstrainedFloat(_, bounds) => LeafValue::ConstrainedFloat(v as f32, *bounds),
        LeafValue::Int32(_) => LeafValue::Int32(v.round() as i32),
        LeafValue::ConstrainedInt32(_, bounds) => {
            LeafValue::ConstrainedInt32(v.round() as i32, *bounds)
        }
        LeafValue::Bool(_) => LeafValue::Bool(v != 0.0),
    }
}
