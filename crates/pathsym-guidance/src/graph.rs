//! The property-distance graph.
//!
//! One node per location, with the control-flow edges of the whole program:
//! sequential fall-through, jumps, calls into and returns out of defined
//! functions, and thread spawns. Distances are computed by breadth-first
//! search from the property over reversed edges.

use crate::{GuidanceError, GuidanceResult};
use pathsym_ir::{InstructionKind, LocRef, Locs};
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct Node {
    successors: Vec<usize>,
    predecessors: Vec<usize>,
    visited: bool,
    is_property: bool,
    is_assert: bool,
    /// `None` while unreached.
    shortest_path_to_property: Option<usize>,
}

impl Node {
    fn new(is_assert: bool) -> Self {
        Self {
            successors: Vec::new(),
            predecessors: Vec::new(),
            visited: false,
            is_property: false,
            is_assert,
            shortest_path_to_property: None,
        }
    }
}

/// Control-flow graph annotated with distances to the single property.
#[derive(Debug, Clone)]
pub struct PropertyDistanceGraph {
    // node i is location i
    nodes: Vec<Node>,
}

impl PropertyDistanceGraph {
    /// Build the graph over every location of `locs`.
    pub fn new(locs: &Locs) -> Self {
        let mut nodes: Vec<Node> = locs
            .iter()
            .map(|(_, l)| Node::new(l.instruction.is_assert()))
            .collect();

        let len = locs.len();
        let mut edges = Vec::new();

        for (loc, l) in locs.iter() {
            let from = loc.loc_number();
            let next = loc.next().loc_number();
            let mut fall_through = true;

            match &l.instruction.kind {
                InstructionKind::Goto { guard, target } => {
                    edges.push((from, target.loc_number()));
                    fall_through = !guard.is_true();
                }
                InstructionKind::FunctionCall { function, .. } => {
                    if let Some(callee) = locs.function(function) {
                        edges.push((from, callee.first_loc.loc_number()));
                        if next < len {
                            edges.push((callee.end_loc.loc_number(), next));
                        }
                        fall_through = false;
                    }
                }
                InstructionKind::Return { .. } => {
                    if let Some(f) = locs.function(&l.function) {
                        edges.push((from, f.end_loc.loc_number()));
                        fall_through = false;
                    }
                }
                InstructionKind::StartThread { target } => {
                    edges.push((from, target.loc_number()));
                }
                // returns are wired from the call sites
                InstructionKind::EndFunction => fall_through = false,
                InstructionKind::EndThread => fall_through = false,
                _ => {}
            }

            if fall_through && next < len {
                edges.push((from, next));
            }
        }

        edges.sort_unstable();
        edges.dedup();
        for &(from, to) in &edges {
            nodes[from].successors.push(to);
            nodes[to].predecessors.push(from);
        }

        debug!(
            nodes = nodes.len(),
            edges = edges.len(),
            "built property-distance graph"
        );
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Control-flow successors of `loc`.
    pub fn successors(&self, loc: LocRef) -> impl Iterator<Item = LocRef> + '_ {
        self.nodes[loc.loc_number()]
            .successors
            .iter()
            .map(|&n| LocRef::new(n))
    }

    /// The property, once distances have been computed.
    pub fn property(&self) -> Option<LocRef> {
        self.nodes.iter().position(|n| n.is_property).map(LocRef::new)
    }

    /// The computed distance of `loc`, `None` if the property is unreachable.
    pub fn distance(&self, loc: LocRef) -> Option<usize> {
        self.nodes[loc.loc_number()].shortest_path_to_property
    }

    /// Compute the distance of every location to the unique assertion and
    /// write it into `locs`.
    ///
    /// Fails without touching `locs` if the program has no assertion or
    /// more than one.
    pub fn get_path_lengths_to_property(&mut self, locs: &mut Locs) -> GuidanceResult<()> {
        let mut property: Option<usize> = None;
        for (i, node) in self.nodes.iter().enumerate() {
            if !node.is_assert {
                continue;
            }
            match property {
                None => property = Some(i),
                Some(first) => {
                    return Err(GuidanceError::MultipleProperties {
                        first: LocRef::new(first),
                        second: LocRef::new(i),
                    })
                }
            }
        }
        let property = property.ok_or(GuidanceError::NoProperty)?;

        for node in &mut self.nodes {
            node.visited = false;
            node.is_property = false;
            node.shortest_path_to_property = None;
        }
        self.nodes[property].is_property = true;
        self.nodes[property].shortest_path_to_property = Some(0);
        info!(property = %LocRef::new(property), "computing distances to property");

        self.bfs(property);
        self.write_lengths_to_locs(locs);
        Ok(())
    }

    /// Layered breadth-first search over reversed edges.
    fn bfs(&mut self, property: usize) {
        self.nodes[property].visited = true;
        let mut working_set = vec![property];
        let mut layer = 0;
        let mut reached = 0;

        while !working_set.is_empty() {
            let mut next_set = Vec::new();
            for n in working_set {
                self.nodes[n].shortest_path_to_property = Some(layer);
                reached += 1;
                for i in 0..self.nodes[n].predecessors.len() {
                    let p = self.nodes[n].predecessors[i];
                    if !self.nodes[p].visited {
                        self.nodes[p].visited = true;
                        next_set.push(p);
                    }
                }
            }
            working_set = next_set;
            layer += 1;
        }

        info!(reached, locations = self.nodes.len(), "distance computation done");
    }

    fn write_lengths_to_locs(&self, locs: &mut Locs) {
        for (i, node) in self.nodes.iter().enumerate() {
            locs[LocRef::new(i)].distance_to_property = node.shortest_path_to_property;
        }
    }
}
