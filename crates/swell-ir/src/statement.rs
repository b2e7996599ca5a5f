//! The guarded IR statement set
//!
//! A lowered function is a flat list of `(guard, Statement)` pairs. The
//! emitter turns each statement's dependencies into a readiness predicate:
//! it fires when its guard bit is set, every register it needs is ready,
//! and no register it provides is ready yet. Execution order is therefore
//! driven by data, not by list position.

use crate::kind::Kind;
use std::collections::BTreeMap;
use std::fmt;
use swell_parser::CompareOp;

/// Index of one slot in a generator's register file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Register(pub usize);

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A guard id. Guard 0 is always true; the rest are set at runtime by
/// `Branch` statements.
pub type Guard = u32;

/// Index of a child-call slot in the continuation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildCall(pub usize);

/// Registers freed at a control-flow exit, with the kinds they held
pub type GarbageMap = BTreeMap<Register, Kind>;

/// One guarded IR statement
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Seed `target` with constant string text
    StringLiteral { target: Register, value: String },
    /// Seed `target` with a constant integer (also used for booleans)
    IntegerLiteral { target: Register, value: i64 },
    /// Collect `elements` into a fresh array in `target`
    NewArray {
        target: Register,
        elements: Vec<Register>,
    },
    /// Collect `inputs` into a fresh tuple in `target`
    MakeTuple {
        target: Register,
        inputs: Vec<Register>,
    },
    /// Copy `src` into `dst` once `src` is ready
    Rename { src: Register, dst: Register },
    /// Call a synchronous function inline
    CallSync {
        name: String,
        args: Vec<Register>,
        results: Vec<Register>,
    },
    /// Spawn an asynchronous callee in child-call slot `slot`
    CallAsync {
        name: String,
        args: Vec<Register>,
        results: Vec<Register>,
        slot: ChildCall,
    },
    /// Schedule this function again with new carried values, free the
    /// garbage, and retire the current state
    RestartLoop {
        args: Vec<Register>,
        slot: ChildCall,
        garbage: GarbageMap,
    },
    /// Publish results to the caller, free the garbage, retire the state
    Return {
        values: Vec<Register>,
        garbage: GarbageMap,
    },
    /// Latch `true_guard` or `false_guard` depending on `cond`
    Branch {
        cond: Register,
        true_guard: Guard,
        false_guard: Guard,
    },
    /// Strict integer comparison producing a boolean register
    IntegerComparison {
        op: CompareOp,
        lhs: Register,
        rhs: Register,
        result: Register,
    },
    /// Test whether `union` currently holds arm `arm`
    CheckUnionType {
        union: Register,
        arm: usize,
        result: Register,
    },
    /// Move the payload of `union` into `target`
    ExtractUnionValue { union: Register, target: Register },
}

impl Statement {
    /// The statement's data dependencies: registers it needs ready, and
    /// registers it provides
    pub fn deps(&self) -> (Vec<Register>, Vec<Register>) {
        match self {
            Statement::StringLiteral { target, .. } => (vec![], vec![*target]),
            Statement::IntegerLiteral { target, .. } => (vec![], vec![*target]),
            Statement::NewArray { target, elements } => (elements.clone(), vec![*target]),
            Statement::MakeTuple { target, inputs } => (inputs.clone(), vec![*target]),
            Statement::Rename { src, dst } => (vec![*src], vec![*dst]),
            Statement::CallSync { args, results, .. } => (args.clone(), results.clone()),
            Statement::CallAsync { args, results, .. } => (args.clone(), results.clone()),
            // RestartLoop manages its own readiness against the child
            // state; its effect is not a register write.
            Statement::RestartLoop { .. } => (vec![], vec![]),
            Statement::Return { values, .. } => (values.clone(), vec![]),
            Statement::Branch { cond, .. } => (vec![*cond], vec![]),
            Statement::IntegerComparison { lhs, rhs, result, .. } => {
                (vec![*lhs, *rhs], vec![*result])
            }
            Statement::CheckUnionType { union, result, .. } => (vec![*union], vec![*result]),
            Statement::ExtractUnionValue { union, target } => (vec![*union], vec![*target]),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, regs: &[Register]) -> fmt::Result {
    write!(f, "[")?;
    for (i, r) in regs.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", r)?;
    }
    write!(f, "]")
}

fn write_garbage(f: &mut fmt::Formatter<'_>, garbage: &GarbageMap) -> fmt::Result {
    write!(f, " drop [")?;
    for (i, (r, kind)) in garbage.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}: {}", r, kind)?;
    }
    write!(f, "]")
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::StringLiteral { target, value } => {
                write!(f, "{} = string \"{}\"", target, value.escape_default())
            }
            Statement::IntegerLiteral { target, value } => {
                write!(f, "{} = int {}", target, value)
            }
            Statement::NewArray { target, elements } => {
                write!(f, "{} = array ", target)?;
                write_list(f, elements)
            }
            Statement::MakeTuple { target, inputs } => {
                write!(f, "{} = tuple ", target)?;
                write_list(f, inputs)
            }
            Statement::Rename { src, dst } => write!(f, "{} = {}", dst, src),
            Statement::CallSync { name, args, results } => {
                write_list(f, results)?;
                write!(f, " = sync {} ", name)?;
                write_list(f, args)
            }
            Statement::CallAsync {
                name,
                args,
                results,
                slot,
            } => {
                write_list(f, results)?;
                write!(f, " = async {} (slot {}) ", name, slot.0)?;
                write_list(f, args)
            }
            Statement::RestartLoop { args, slot, garbage } => {
                write!(f, "restart (slot {}) ", slot.0)?;
                write_list(f, args)?;
                write_garbage(f, garbage)
            }
            Statement::Return { values, garbage } => {
                write!(f, "return ")?;
                write_list(f, values)?;
                write_garbage(f, garbage)
            }
            Statement::Branch {
                cond,
                true_guard,
                false_guard,
            } => write!(f, "branch {} ? c{} : c{}", cond, true_guard, false_guard),
            Statement::IntegerComparison { op, lhs, rhs, result } => {
                write!(f, "{} = {} {} {}", result, lhs, op.as_str(), rhs)
            }
            Statement::CheckUnionType { union, arm, result } => {
                write!(f, "{} = {} is arm {}", result, union, arm)
            }
            Statement::ExtractUnionValue { union, target } => {
                write!(f, "{} = payload of {}", target, union)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::{Family, Kind};

    #[test]
    fn deps_follow_the_dataflow_table() {
        let call = Statement::CallAsync {
            name: "sleep".to_string(),
            args: vec![Register(0)],
            results: vec![Register(1)],
            slot: ChildCall(0),
        };
        assert_eq!(call.deps(), (vec![Register(0)], vec![Register(1)]));

        let branch = Statement::Branch {
            cond: Register(2),
            true_guard: 1,
            false_guard: 2,
        };
        assert_eq!(branch.deps(), (vec![Register(2)], vec![]));

        let restart = Statement::RestartLoop {
            args: vec![Register(0)],
            slot: ChildCall(0),
            garbage: GarbageMap::new(),
        };
        assert_eq!(restart.deps(), (vec![], vec![]));
    }

    #[test]
    fn display_is_compact() {
        let stmt = Statement::IntegerLiteral {
            target: Register(3),
            value: 42,
        };
        assert_eq!(stmt.to_string(), "r3 = int 42");

        let mut garbage = GarbageMap::new();
        garbage.insert(Register(1), Kind::of(Family::String));
        let ret = Statement::Return {
            values: vec![Register(0)],
            garbage,
        };
        assert_eq!(ret.to_string(), "return [r0] drop [r1: String]");
    }
}
