//! The location table: all instructions of all functions, flattened.

use crate::expr::Expr;
use crate::instruction::{Instruction, InstructionKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Index, IndexMut};

/// A reference to one location of the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocRef(usize);

impl LocRef {
    #[inline]
    pub const fn new(loc_number: usize) -> Self {
        LocRef(loc_number)
    }

    #[inline]
    pub fn loc_number(self) -> usize {
        self.0
    }

    /// The location of the next instruction.
    #[inline]
    pub fn next(self) -> LocRef {
        LocRef(self.0 + 1)
    }

    #[inline]
    pub fn increase(&mut self) {
        self.0 += 1;
    }
}

impl fmt::Display for LocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One location: an instruction plus per-location annotations.
#[derive(Debug, Clone)]
pub struct Loc {
    pub instruction: Instruction,
    /// The function containing this location.
    pub function: String,
    /// Shortest control-flow distance to the property; `None` if the
    /// property is unreachable from here or distances were not computed.
    pub distance_to_property: Option<usize>,
}

/// Where a function lives in the table.
#[derive(Debug, Clone)]
pub struct FunctionEntry {
    pub first_loc: LocRef,
    /// The location of the function's END_FUNCTION.
    pub end_loc: LocRef,
    /// Calls into hidden functions are suppressed from traces.
    pub hidden: bool,
    pub parameters: Vec<Expr>,
}

/// The location table.
#[derive(Debug, Clone, Default)]
pub struct Locs {
    pub loc_vector: Vec<Loc>,
    pub entry_loc: LocRef,
    pub function_map: BTreeMap<String, FunctionEntry>,
}

impl Default for LocRef {
    fn default() -> Self {
        LocRef(0)
    }
}

impl Locs {
    /// Build a table from already-laid-out functions.
    pub fn new(
        loc_vector: Vec<Loc>,
        entry_loc: LocRef,
        function_map: BTreeMap<String, FunctionEntry>,
    ) -> Self {
        Self {
            loc_vector,
            entry_loc,
            function_map,
        }
    }

    pub fn len(&self) -> usize {
        self.loc_vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loc_vector.is_empty()
    }

    pub fn get(&self, loc: LocRef) -> Option<&Loc> {
        self.loc_vector.get(loc.0)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionEntry> {
        self.function_map.get(name)
    }

    /// All location references in order.
    pub fn loc_refs(&self) -> impl Iterator<Item = LocRef> {
        (0..self.loc_vector.len()).map(LocRef)
    }

    pub fn iter(&self) -> impl Iterator<Item = (LocRef, &Loc)> {
        self.loc_vector
            .iter()
            .enumerate()
            .map(|(i, loc)| (LocRef(i), loc))
    }

    /// Locations of assertions, in table order.
    pub fn assertions(&self) -> impl Iterator<Item = LocRef> + '_ {
        self.iter()
            .filter(|(_, loc)| loc.instruction.is_assert())
            .map(|(l, _)| l)
    }

    /// Locations of calls to `function`.
    pub fn call_sites<'a>(&'a self, function: &'a str) -> impl Iterator<Item = LocRef> + 'a {
        self.iter()
            .filter(move |(_, loc)| {
                matches!(&loc.instruction.kind,
                    InstructionKind::FunctionCall { function: f, .. } if f == function)
            })
            .map(|(l, _)| l)
    }
}

impl Index<LocRef> for Locs {
    type Output = Loc;

    fn index(&self, loc: LocRef) -> &Loc {
        &self.loc_vector[loc.0]
    }
}

impl IndexMut<LocRef> for Locs {
    fn index_mut(&mut self, loc: LocRef) -> &mut Loc {
        &mut self.loc_vector[loc.0]
    }
}

impl fmt::Display for Locs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut current_function: Option<&str> = None;
        for (l, loc) in self.iter() {
            if current_function != Some(loc.function.as_str()) {
                writeln!(f, "*** {}", loc.function)?;
                current_function = Some(&loc.function);
            }
            write!(f, "  L{}: {}", l, loc.instruction)?;
            if let Some(d) = loc.distance_to_property {
                write!(f, "  [distance {}]", d)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Type;

    fn loc(kind: InstructionKind) -> Loc {
        Loc {
            instruction: Instruction::new(kind),
            function: "main".into(),
            distance_to_property: None,
        }
    }

    #[test]
    fn test_loc_ref_increase() {
        let mut l = LocRef::new(4);
        assert_eq!(l.next(), LocRef::new(5));
        l.increase();
        assert_eq!(l, LocRef::new(5));
    }

    #[test]
    fn test_assertions_and_display() {
        let x = Expr::symbol("x", Type::Int);
        let mut functions = BTreeMap::new();
        functions.insert(
            "main".to_string(),
            FunctionEntry {
                first_loc: LocRef::new(0),
                end_loc: LocRef::new(2),
                hidden: false,
                parameters: vec![],
            },
        );
        let mut locs = Locs::new(
            vec![
                loc(InstructionKind::Assign {
                    lhs: x.clone(),
                    rhs: Expr::int(1),
                }),
                loc(InstructionKind::Assert {
                    guard: Expr::eq(x, Expr::int(1)),
                    comment: String::new(),
                }),
                loc(InstructionKind::EndFunction),
            ],
            LocRef::new(0),
            functions,
        );
        assert_eq!(locs.assertions().collect::<Vec<_>>(), vec![LocRef::new(1)]);

        locs[LocRef::new(1)].distance_to_property = Some(0);
        let text = locs.to_string();
        assert!(text.starts_with("*** main\n"));
        assert!(text.contains("L1: ASSERT (x == 1)  [distance 0]"));
    }
}
