//! JSON interchange format for programs.
//!
//! Front-ends emit a [`ProgramFile`]: global variable declarations plus a list
//! of functions whose bodies are instruction lists. Jump targets inside a body
//! are indices into that body. Loading lays the functions out one after the
//! other in a single [`Locs`] table and registers every variable with a fresh
//! [`VarMap`].

use crate::error::{ProgramError, ProgramResult};
use crate::expr::{Expr, Type, MAX_COMPONENTS};
use crate::instruction::{Instruction, InstructionKind};
use crate::locs::{FunctionEntry, Loc, LocRef, Locs};
use crate::var_map::{VarKind, VarMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

fn default_entry() -> String {
    "main".to_string()
}

/// A whole program as produced by a front-end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgramFile {
    /// Function where execution starts.
    #[serde(default = "default_entry")]
    pub entry: String,
    /// Global variables.
    #[serde(default)]
    pub variables: Vec<VariableDecl>,
    pub functions: Vec<FunctionDef>,
}

/// A variable declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariableDecl {
    pub name: String,
    pub ty: Type,
    #[serde(default)]
    pub kind: VarKind,
}

/// A function definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    #[serde(default)]
    pub hidden: bool,
    /// Parameters, always procedure-local.
    #[serde(default)]
    pub parameters: Vec<VariableDecl>,
    /// Local variables, always procedure-local.
    #[serde(default)]
    pub locals: Vec<VariableDecl>,
    /// Must end with END_FUNCTION.
    pub body: Vec<Instruction>,
}

/// A loaded program.
#[derive(Debug)]
pub struct Program {
    pub locs: Locs,
    pub var_map: VarMap,
}

/// Parse and lay out a program from JSON source.
pub fn load_program(source: &str) -> ProgramResult<Program> {
    let file: ProgramFile = serde_json::from_str(source)?;
    file.build()
}

/// Reject types whose values would be split into too many components.
fn check_size(name: &str, ty: &Type) -> ProgramResult<()> {
    match ty.components() {
        Some(n) if n <= MAX_COMPONENTS => Ok(()),
        _ => Err(ProgramError::TypeTooLarge {
            name: name.to_string(),
            ty: ty.clone(),
        }),
    }
}

fn check_expr_sizes(expr: &Expr) -> ProgramResult<()> {
    let mut result = Ok(());
    expr.visit(&mut |e| {
        if let Expr::Symbol { name, ty } = e {
            if result.is_ok() {
                result = check_size(name, ty);
            }
        }
    });
    result
}

impl ProgramFile {
    /// Validate the program and build its location table and variable map.
    pub fn build(self) -> ProgramResult<Program> {
        let var_map = VarMap::new();
        for var in &self.variables {
            check_size(&var.name, &var.ty)?;
            var_map.declare(var.name.clone(), var.kind);
        }

        let mut loc_vector = Vec::new();
        let mut function_map = BTreeMap::new();

        for function in self.functions {
            if function_map.contains_key(&function.name) {
                return Err(ProgramError::DuplicateFunction {
                    name: function.name,
                });
            }
            if !matches!(
                function.body.last().map(|i| &i.kind),
                Some(InstructionKind::EndFunction)
            ) {
                return Err(ProgramError::MissingEndFunction {
                    function: function.name,
                });
            }

            let len = function.body.len();
            for (index, instruction) in function.body.iter().enumerate() {
                for expr in instruction.expressions() {
                    check_expr_sizes(expr)?;
                }
                if let Some(target) = instruction.target() {
                    if target.loc_number() >= len {
                        return Err(ProgramError::TargetOutOfRange {
                            function: function.name.clone(),
                            index,
                            target: target.loc_number(),
                            len,
                        });
                    }
                }
            }

            for var in function.parameters.iter().chain(&function.locals) {
                check_size(&var.name, &var.ty)?;
                var_map.declare(var.name.clone(), VarKind::ProcedureLocal);
            }

            let offset = loc_vector.len();
            function_map.insert(
                function.name.clone(),
                FunctionEntry {
                    first_loc: LocRef::new(offset),
                    end_loc: LocRef::new(offset + len - 1),
                    hidden: function.hidden,
                    parameters: function
                        .parameters
                        .iter()
                        .map(|p| Expr::symbol(p.name.clone(), p.ty.clone()))
                        .collect(),
                },
            );

            for mut instruction in function.body {
                instruction.rebase(offset);
                loc_vector.push(Loc {
                    instruction,
                    function: function.name.clone(),
                    distance_to_property: None,
                });
            }
        }

        let entry_loc = function_map
            .get(&self.entry)
            .map(|f| f.first_loc)
            .ok_or_else(|| ProgramError::MissingEntry {
                name: self.entry.clone(),
            })?;

        debug!(
            functions = function_map.len(),
            locations = loc_vector.len(),
            entry = %self.entry,
            "loaded program"
        );

        Ok(Program {
            locs: Locs::new(loc_vector, entry_loc, function_map),
            var_map,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_FUNCTIONS: &str = r#"{
        "variables": [{ "name": "g", "ty": { "kind": "Int" } }],
        "functions": [
            {
                "name": "helper",
                "hidden": true,
                "body": [
                    { "op": "Goto", "target": 0 },
                    { "op": "EndFunction" }
                ]
            },
            {
                "name": "main",
                "locals": [{ "name": "x", "ty": { "kind": "Int" } }],
                "body": [
                    { "op": "FunctionCall", "function": "helper" },
                    { "op": "Goto", "target": 0 },
                    { "op": "EndFunction" }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_layout_and_rebasing() {
        let program = load_program(TWO_FUNCTIONS).unwrap();
        let locs = &program.locs;

        assert_eq!(locs.len(), 5);
        assert_eq!(locs.entry_loc, LocRef::new(2));
        assert_eq!(locs[LocRef::new(0)].instruction.target(), Some(LocRef::new(0)));
        assert_eq!(locs[LocRef::new(3)].instruction.target(), Some(LocRef::new(2)));

        let helper = locs.function("helper").unwrap();
        assert!(helper.hidden);
        assert_eq!(helper.end_loc, LocRef::new(1));
        assert_eq!(locs[LocRef::new(4)].function, "main");
    }

    #[test]
    fn test_storage_classes() {
        let program = load_program(TWO_FUNCTIONS).unwrap();
        assert_eq!(program.var_map.kind_of("g"), Some(VarKind::Shared));
        assert_eq!(program.var_map.kind_of("x"), Some(VarKind::ProcedureLocal));
    }

    #[test]
    fn test_missing_entry() {
        let src = r#"{ "entry": "start", "functions": [] }"#;
        assert!(matches!(
            load_program(src),
            Err(ProgramError::MissingEntry { .. })
        ));
    }

    #[test]
    fn test_missing_end_function() {
        let src = r#"{ "functions": [{ "name": "main", "body": [{ "op": "Skip" }] }] }"#;
        assert!(matches!(
            load_program(src),
            Err(ProgramError::MissingEndFunction { .. })
        ));
    }

    #[test]
    fn test_target_out_of_range() {
        let src = r#"{ "functions": [{ "name": "main", "body": [
            { "op": "Goto", "target": 7 },
            { "op": "EndFunction" }
        ] }] }"#;
        assert!(matches!(
            load_program(src),
            Err(ProgramError::TargetOutOfRange { target: 7, .. })
        ));
    }

    #[test]
    fn test_oversized_types_are_rejected() {
        let global = r#"{
            "variables": [{ "name": "a", "ty": { "kind": "Array", "element": { "kind": "Int" },
                                                "size": 18446744073709551615 } }],
            "functions": [{ "name": "main", "body": [{ "op": "EndFunction" }] }]
        }"#;
        assert!(matches!(
            load_program(global),
            Err(ProgramError::TypeTooLarge { name, .. }) if name == "a"
        ));

        // nested sizes multiply
        let local = r#"{ "functions": [{ "name": "main",
            "locals": [{ "name": "m", "ty": { "kind": "Array", "size": 1024,
                "element": { "kind": "Array", "element": { "kind": "Int" }, "size": 1024 } } }],
            "body": [{ "op": "EndFunction" }] }] }"#;
        assert!(matches!(
            load_program(local),
            Err(ProgramError::TypeTooLarge { name, .. }) if name == "m"
        ));

        let in_body = r#"{ "functions": [{ "name": "main", "body": [
            { "op": "Assume", "guard": { "kind": "Binary", "op": "Eq",
                "left": { "kind": "Symbol", "name": "b",
                          "ty": { "kind": "Array", "element": { "kind": "Int" }, "size": 4294967296 } },
                "right": { "kind": "Symbol", "name": "b",
                           "ty": { "kind": "Array", "element": { "kind": "Int" }, "size": 4294967296 } } } },
            { "op": "EndFunction" }
        ] }] }"#;
        assert!(matches!(
            load_program(in_body),
            Err(ProgramError::TypeTooLarge { name, .. }) if name == "b"
        ));
    }

    #[test]
    fn test_type_components() {
        let pair = Type::Struct {
            fields: vec![
                crate::expr::Field { name: "x".into(), ty: Type::Int },
                crate::expr::Field { name: "y".into(), ty: Type::array(Type::Int, Some(3)) },
            ],
        };
        assert_eq!(pair.components(), Some(4));
        assert_eq!(Type::array(pair, Some(MAX_COMPONENTS)).components(), Some(4 * MAX_COMPONENTS));
        assert_eq!(Type::array(Type::Int, None).components(), Some(1));
        assert_eq!(
            Type::array(Type::array(Type::Int, Some(u64::MAX)), Some(2)).components(),
            None
        );
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(load_program("{"), Err(ProgramError::Json(_))));
    }
}
