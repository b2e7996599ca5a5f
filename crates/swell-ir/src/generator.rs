//! Generator - per-function lowering state
//!
//! One `Generator` accumulates the lowered form of one function: its
//! register file, the name-to-register map, the substitution (join) table,
//! the guarded statement list, and the child-call slots. Registers are
//! append-only; consuming a value leaves a `None` hole so indices stay
//! stable.

use crate::kind::Kind;
use crate::statement::{ChildCall, GarbageMap, Guard, Register, Statement};
use std::collections::HashMap;
use swell_error::{Diagnostic, ErrorCode, Result, Span};

/// Lowering state for one function (or loop-body closure)
#[derive(Debug)]
pub struct Generator {
    pub name: String,
    /// The guarded statement list, in emission order
    pub conditions: Vec<(Guard, Statement)>,
    /// Current binding of each live name
    pub locals: HashMap<String, Register>,
    /// Where each no-longer-live name was consumed, for better errors
    pub consumed_locals: HashMap<String, Span>,
    /// One slot per value; `None` marks a consumed slot
    pub registers: Vec<Option<Kind>>,
    /// Largest length `registers` ever reached; branch rollback shrinks
    /// the vector but emitted statements may still address the peak
    pub peak_registers: usize,
    pub is_native: bool,
    pub arg_kinds: Vec<Kind>,
    pub return_kinds: Vec<Kind>,
    /// Register join table; values strictly decrease
    pub substitutions: HashMap<Register, Register>,
    /// Callee name per child-call slot
    pub child_calls: Vec<String>,
    /// Counter for loop-body closure names
    pub next_closure: usize,
    pub current_guard: Guard,
    next_guard: Guard,
}

impl Generator {
    pub fn new(
        name: impl Into<String>,
        arg_names: &[String],
        arg_kinds: Vec<Kind>,
        return_kinds: Vec<Kind>,
    ) -> Self {
        debug_assert_eq!(arg_names.len(), arg_kinds.len());

        let mut gen = Self {
            name: name.into(),
            conditions: Vec::new(),
            locals: HashMap::new(),
            consumed_locals: HashMap::new(),
            registers: Vec::new(),
            peak_registers: 0,
            is_native: false,
            arg_kinds: arg_kinds.clone(),
            return_kinds,
            substitutions: HashMap::new(),
            child_calls: Vec::new(),
            next_closure: 0,
            current_guard: 0,
            next_guard: 0,
        };

        for (name, kind) in arg_names.iter().zip(arg_kinds) {
            let reg = gen.new_reg(kind);
            gen.locals.insert(name.clone(), reg);
        }
        gen
    }

    /// Appends a fresh register holding a value of `kind`
    pub fn new_reg(&mut self, kind: Kind) -> Register {
        let reg = Register(self.registers.len());
        self.registers.push(Some(kind));
        self.peak_registers = self.peak_registers.max(self.registers.len());
        reg
    }

    /// The kind currently held by `reg`, if it has not been consumed.
    /// Looked up through the substitution table: after a branch rollback a
    /// local may name a rolled-back index whose identity lives on in a
    /// lower slot.
    pub fn register_kind(&self, reg: Register) -> Option<&Kind> {
        let reg = self.resolve(reg);
        self.registers.get(reg.0).and_then(|slot| slot.as_ref())
    }

    /// Marks every slot aliasing `reg` as consumed without touching the
    /// locals map. Used when a value is threaded into a replacement
    /// register (borrow results, loop carries, narrowed unions).
    pub fn retire(&mut self, reg: Register) {
        let target = self.resolve(reg);
        for idx in 0..self.registers.len() {
            if self.resolve(Register(idx)) == target {
                self.registers[idx] = None;
            }
        }
    }

    /// Appends `stmt` under the current guard
    pub fn stmt(&mut self, stmt: Statement) {
        self.stmt_with(self.current_guard, stmt);
    }

    /// Appends `stmt` under an explicit guard
    pub fn stmt_with(&mut self, guard: Guard, stmt: Statement) {
        self.conditions.push((guard, stmt));
    }

    /// Allocates a fresh guard id
    pub fn new_guard(&mut self) -> Guard {
        self.next_guard += 1;
        self.next_guard
    }

    /// Number of guard slots the state record needs (guard 0 included)
    pub fn guard_count(&self) -> usize {
        self.next_guard as usize + 1
    }

    /// Reserves a child-call slot for a call to `name`
    pub fn new_child_call(&mut self, name: impl Into<String>) -> ChildCall {
        self.child_calls.push(name.into());
        ChildCall(self.child_calls.len() - 1)
    }

    /// Follows the substitution table to the register's final identity
    pub fn resolve(&self, mut reg: Register) -> Register {
        while let Some(&next) = self.substitutions.get(&reg) {
            debug_assert!(next < reg, "substitutions must decrease");
            reg = next;
        }
        reg
    }

    /// Unifies two registers produced on opposite branches into one
    /// logical identity
    pub fn join(&mut self, a: Register, b: Register) {
        let a = self.resolve(a);
        let b = self.resolve(b);
        if a == b {
            return;
        }
        if a < b {
            self.substitutions.insert(b, a);
        } else {
            self.substitutions.insert(a, b);
        }
    }

    /// Marks every register aliasing `reg` as consumed and removes every
    /// local that pointed at it, remembering where for later diagnostics
    pub fn consume(&mut self, reg: Register, at: Span) {
        let target = self.resolve(reg);

        for idx in 0..self.registers.len() {
            if self.resolve(Register(idx)) == target {
                self.registers[idx] = None;
            }
        }

        let doomed: Vec<String> = self
            .locals
            .iter()
            .filter(|(_, &r)| self.resolve(r) == target)
            .map(|(name, _)| name.clone())
            .collect();
        for name in doomed {
            self.locals.remove(&name);
            self.consumed_locals.insert(name, at);
        }
    }

    /// An immutable snapshot of the current locals map
    pub fn copy_locals(&self) -> HashMap<String, Register> {
        self.locals.clone()
    }

    /// Single registers pass through; several become one fresh tuple
    /// register
    pub fn maybe_tuple(&mut self, regs: Vec<Register>) -> Register {
        if regs.len() == 1 {
            return regs[0];
        }
        let kinds: Vec<Kind> = regs
            .iter()
            .filter_map(|&r| self.register_kind(r).cloned())
            .collect();
        let result = self.new_reg(Kind::tuple(kinds));
        self.stmt(Statement::MakeTuple {
            target: result,
            inputs: regs,
        });
        result
    }

    /// Computes the drop set for a control-flow exit: every live register
    /// that needs a drop and is not (an alias of) a kept register. A value
    /// the compiler may not drop on its own is an error.
    pub fn garbage(&self, keep: &[Register]) -> Result<GarbageMap> {
        let kept: Vec<Register> = keep.iter().map(|&r| self.resolve(r)).collect();

        let mut garbage = GarbageMap::new();
        for (idx, slot) in self.registers.iter().enumerate() {
            let Some(kind) = slot else { continue };
            let reg = self.resolve(Register(idx));
            if kept.contains(&reg) || !kind.needs_drop() {
                continue;
            }
            if !kind.implicitly_droppable() {
                return Err(Diagnostic::error(format!(
                    "unused value of type {} ({})",
                    kind, reg
                ))
                .with_code(ErrorCode::UNCONSUMED_VALUE)
                .with_help("consume the value explicitly before this point"));
            }
            garbage.insert(reg, kind.clone());
        }
        Ok(garbage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::Family;
    use swell_error::Span;

    fn gen_with_args(kinds: &[Kind]) -> Generator {
        let names: Vec<String> = (0..kinds.len()).map(|i| format!("a{}", i)).collect();
        Generator::new("test", &names, kinds.to_vec(), vec![])
    }

    #[test]
    fn registers_are_append_only() {
        let mut g = gen_with_args(&[Kind::of(Family::Clock)]);
        let r1 = g.new_reg(Kind::of(Family::String));
        assert_eq!(r1, Register(1));
        g.consume(r1, Span::default());
        assert!(g.register_kind(r1).is_none());
        // The hole is never reused.
        assert_eq!(g.new_reg(Kind::of(Family::Integer)), Register(2));
        assert_eq!(g.peak_registers, 3);
    }

    #[test]
    fn join_records_decreasing_substitutions() {
        let mut g = gen_with_args(&[]);
        let a = g.new_reg(Kind::of(Family::Integer));
        let b = g.new_reg(Kind::of(Family::Integer));
        g.join(b, a);
        assert_eq!(g.resolve(b), a);
        assert_eq!(g.resolve(a), a);

        let c = g.new_reg(Kind::of(Family::Integer));
        g.join(c, b);
        // Chains resolve through to the minimum.
        assert_eq!(g.resolve(c), a);
        for (&k, &v) in &g.substitutions {
            assert!(v < k);
        }
    }

    #[test]
    fn consume_clears_aliases_and_locals() {
        let mut g = gen_with_args(&[]);
        let a = g.new_reg(Kind::of(Family::String));
        let b = g.new_reg(Kind::of(Family::String));
        g.join(b, a);
        g.locals.insert("x".to_string(), b);

        g.consume(a, Span::default());
        assert!(g.register_kind(a).is_none());
        assert!(g.register_kind(b).is_none());
        assert!(!g.locals.contains_key("x"));
        assert!(g.consumed_locals.contains_key("x"));
    }

    #[test]
    fn maybe_tuple_passes_singletons_through() {
        let mut g = gen_with_args(&[]);
        let a = g.new_reg(Kind::of(Family::Integer));
        assert_eq!(g.maybe_tuple(vec![a]), a);
        assert!(g.conditions.is_empty());

        let b = g.new_reg(Kind::of(Family::Integer));
        let t = g.maybe_tuple(vec![a, b]);
        assert_eq!(g.register_kind(t).unwrap().args.len(), 2);
        assert!(matches!(
            g.conditions.last(),
            Some((0, Statement::MakeTuple { .. }))
        ));
    }

    #[test]
    fn garbage_keeps_returned_values_and_drops_strings() {
        let mut g = gen_with_args(&[]);
        let keep = g.new_reg(Kind::of(Family::String));
        let drop = g.new_reg(Kind::of(Family::String));
        let prim = g.new_reg(Kind::of(Family::Integer));

        let garbage = g.garbage(&[keep]).unwrap();
        assert!(garbage.contains_key(&drop));
        assert!(!garbage.contains_key(&keep));
        assert!(!garbage.contains_key(&prim));
    }

    #[test]
    fn garbage_rejects_clock_values() {
        let mut g = gen_with_args(&[]);
        g.new_reg(Kind::of(Family::Clock));
        let err = g.garbage(&[]).unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::UNCONSUMED_VALUE));
    }

    #[test]
    fn garbage_sees_through_joins() {
        let mut g = gen_with_args(&[]);
        let a = g.new_reg(Kind::of(Family::String));
        let b = g.new_reg(Kind::of(Family::String));
        g.join(b, a);

        // Keeping the alias keeps the joined identity.
        let garbage = g.garbage(&[b]).unwrap();
        assert!(garbage.is_empty());
    }

    #[test]
    fn guards_are_monotonic_and_counted() {
        let mut g = gen_with_args(&[]);
        assert_eq!(g.current_guard, 0);
        let c1 = g.new_guard();
        let c2 = g.new_guard();
        assert!(c1 < c2);
        assert_eq!(g.guard_count(), 3);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Substitution entries always decrease, so `resolve`
            /// terminates and is idempotent no matter the join order.
            #[test]
            fn resolve_terminates_for_any_join_sequence(
                joins in proptest::collection::vec((0usize..32, 0usize..32), 0..64)
            ) {
                let mut g = gen_with_args(&[]);
                for _ in 0..32 {
                    g.new_reg(Kind::of(Family::Integer));
                }
                for (a, b) in joins {
                    g.join(Register(a), Register(b));
                }
                for (&k, &v) in &g.substitutions {
                    prop_assert!(v < k);
                }
                for idx in 0..32 {
                    let r = g.resolve(Register(idx));
                    prop_assert_eq!(g.resolve(r), r);
                    prop_assert!(r <= Register(idx));
                }
            }

            /// Joined registers resolve to the same identity.
            #[test]
            fn join_unifies(pairs in proptest::collection::vec((0usize..16, 0usize..16), 1..32)) {
                let mut g = gen_with_args(&[]);
                for _ in 0..16 {
                    g.new_reg(Kind::of(Family::Integer));
                }
                for &(a, b) in &pairs {
                    g.join(Register(a), Register(b));
                    prop_assert_eq!(g.resolve(Register(a)), g.resolve(Register(b)));
                }
            }
        }
    }
}
