//! Lowering AST → guarded IR
//!
//! Translates one function body into a flat guarded statement list while
//! enforcing the linearity discipline: owned values are consumed exactly
//! once, borrows survive their call and are re-pointed at the call's
//! result, branches keep per-side environments that are re-joined through
//! the substitution table, and every control-flow exit accounts for the
//! values still alive.

use crate::generator::Generator;
use crate::kind::{Family, Kind};
use crate::program::Program;
use crate::resolve::resolve_type;
use crate::statement::{Register, Statement};
use std::collections::BTreeSet;
use swell_error::{Diagnostic, ErrorCode, Result, Span, Spanned};
use swell_parser::{
    Arg, BaseExpr, Block, CallExpr, Expr, FnDecl, Stmt, SumExpr, TypeRep,
};

/// Lowers one function (and any loop-body closures it spawns) and appends
/// the finished generators to `out`
pub fn lower_function(program: &Program, decl: &FnDecl, out: &mut Vec<Generator>) -> Result<()> {
    let arg_names: Vec<String> = decl.params.iter().map(|p| p.name.clone()).collect();
    let arg_kinds = decl
        .params
        .iter()
        .map(|p| resolve_type(&program.types, &p.ty))
        .collect::<Result<Vec<_>>>()?;
    let return_kinds = decl
        .returns
        .iter()
        .map(|t| resolve_type(&program.types, t))
        .collect::<Result<Vec<_>>>()?;

    let mut gen = Generator::new(decl.name.as_str(), &arg_names, arg_kinds, return_kinds);
    gen.is_native = decl.is_native;

    let mut lowerer = FunctionLowerer {
        program,
        gen,
        closures: Vec::new(),
    };
    if let Some(body) = &decl.body {
        lowerer.lower_block(body)?;
    }

    out.extend(lowerer.closures);
    out.push(lowerer.gen);
    Ok(())
}

/// Per-function lowering driver
struct FunctionLowerer<'p> {
    program: &'p Program,
    gen: Generator,
    /// Loop-body closures finished while lowering this function
    closures: Vec<Generator>,
}

impl<'p> FunctionLowerer<'p> {
    // =========================================
    // Statements
    // =========================================

    fn lower_block(&mut self, block: &Block) -> Result<()> {
        for stmt in &block.statements {
            self.lower_stmt(stmt).map_err(|diag| {
                // Errors raised deep in expression lowering have no
                // position of their own; anchor them at the statement.
                if diag.has_labels() {
                    diag
                } else {
                    diag.with_label(stmt.span(), "in this statement")
                }
            })?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Bind {
                must_exist,
                names,
                value,
                span,
            } => self.lower_bind(*must_exist, names, value, *span),
            Stmt::Return { value, span } => self.lower_return(value, *span),
            Stmt::If {
                cond,
                narrow,
                then_block,
                else_block,
                span,
            } => self.lower_if(cond, narrow.as_ref(), then_block, else_block, *span),
            Stmt::While { cond, body, span } => self.lower_while(cond, body, *span),
            Stmt::Expr { expr, span } => {
                let regs = self.lower_expr(expr)?;
                if !regs.is_empty() {
                    return Err(Diagnostic::error(format!(
                        "expression produces {} unused value(s)",
                        regs.len()
                    ))
                    .with_code(ErrorCode::UNCONSUMED_VALUE)
                    .with_label(*span, "result is discarded here")
                    .with_help("bind the result with `let`, or consume it"));
                }
                Ok(())
            }
        }
    }

    fn lower_bind(
        &mut self,
        must_exist: bool,
        names: &[String],
        value: &Expr,
        span: Span,
    ) -> Result<()> {
        for name in names {
            let exists = self.gen.locals.contains_key(name);
            if exists != must_exist {
                return Err(if must_exist {
                    Diagnostic::error(format!("variable {} does not exist", name))
                        .with_code(ErrorCode::VARIABLE_DOES_NOT_EXIST)
                        .with_label(span, "`set` only rebinds existing variables")
                } else {
                    Diagnostic::error(format!("variable {} already exists", name))
                        .with_code(ErrorCode::VARIABLE_ALREADY_EXISTS)
                        .with_label(span, "`let` only introduces new variables")
                        .with_help(format!("use `set {} = ...` to rebind it", name))
                });
            }
        }

        let mut regs = self.lower_expr(value)?;
        if names.len() == 1 {
            regs = vec![self.gen.maybe_tuple(regs)];
        }
        if regs.len() != names.len() {
            return Err(Diagnostic::error(format!(
                "arity mismatch: {} versus {}",
                regs.len(),
                names.len()
            ))
            .with_code(ErrorCode::ARITY_MISMATCH)
            .with_label(span, "in this binding"));
        }

        for (name, reg) in names.iter().zip(regs) {
            self.gen.locals.insert(name.clone(), reg);
        }
        Ok(())
    }

    fn lower_return(&mut self, value: &Expr, span: Span) -> Result<()> {
        let regs = self.lower_expr(value)?;

        if regs.len() != self.gen.return_kinds.len() {
            return Err(Diagnostic::error(format!(
                "arg count mismatch: {} vs. {}",
                self.gen.return_kinds.len(),
                regs.len()
            ))
            .with_code(ErrorCode::ARITY_MISMATCH)
            .with_label(span, "wrong number of return values"));
        }
        for (i, &reg) in regs.iter().enumerate() {
            let kind = self.register_kind_or_err(reg, span)?;
            let expected = self.gen.return_kinds[i].clone();
            kind.can_convert_to(&expected)
                .map_err(|d| d.with_label(span, format!("return value {}", i + 1)))?;
        }

        let garbage = self
            .gen
            .garbage(&regs)
            .map_err(|d| if d.has_labels() { d } else { d.with_label(span, "at this return") })?;
        self.gen.stmt(Statement::Return {
            values: regs,
            garbage,
        });
        Ok(())
    }

    /// Conditional lowering: branch, lower both arms against the same
    /// register numbering, then re-join the surviving locals.
    fn lower_if(
        &mut self,
        cond: &Expr,
        narrow: Option<&TypeRep>,
        then_block: &Block,
        else_block: &Block,
        span: Span,
    ) -> Result<()> {
        let cond_regs = self.lower_expr(cond)?;
        if cond_regs.len() != 1 {
            return Err(multi_value_error("condition", span));
        }
        let mut cond_reg = cond_regs[0];

        // Optional `is T` refinement over a union.
        let mut narrowed: Option<(String, Register)> = None;
        let mut union_kind: Option<Kind> = None;
        let mut target_kind: Option<Kind> = None;
        if let Some(rep) = narrow {
            let target = resolve_type(&self.program.types, rep)?;
            let union = self.register_kind_or_err(cond_reg, span)?;
            if union.family != Family::Union {
                return Err(Diagnostic::error(format!(
                    "attempted a type refinement on {}, which is not a union",
                    union
                ))
                .with_code(ErrorCode::TYPE_NARROW_ON_NON_UNION)
                .with_label(span, "`is` needs a union-kind operand"));
            }
            let arm = union
                .args
                .iter()
                .position(|k| k.is_equivalent(&target).is_ok())
                .ok_or_else(|| {
                    Diagnostic::error(format!("none of the arms of {} is {}", union, target))
                        .with_code(ErrorCode::TYPE_NARROW_IMPOSSIBLE)
                        .with_label(rep.span, "this refinement can never hold")
                })?;

            let result = self.gen.new_reg(Kind::of(Family::Boolean));
            self.gen.stmt(Statement::CheckUnionType {
                union: cond_reg,
                arm,
                result,
            });

            // A bare-variable condition is invalidated here and re-bound
            // per branch below.
            if let Some(name) = bare_variable(cond) {
                let union_reg = cond_reg;
                self.gen.retire(union_reg);
                self.gen.locals.remove(name);
                self.gen.consumed_locals.insert(name.to_string(), span);
                narrowed = Some((name.to_string(), union_reg));
            }

            cond_reg = result;
            union_kind = Some(union);
            target_kind = Some(target);
        }

        let cond_kind = self.register_kind_or_err(cond_reg, span)?;
        cond_kind
            .can_convert_to(&Kind::borrowed(Family::Boolean))
            .map_err(|d| d.with_label(span, "in this condition"))?;

        let parent = self.gen.current_guard;
        let true_guard = self.gen.new_guard();
        let false_guard = self.gen.new_guard();
        let regs0 = self.gen.registers.clone();

        self.gen.stmt(Statement::Branch {
            cond: cond_reg,
            true_guard,
            false_guard,
        });

        let locals0 = self.gen.copy_locals();

        // True branch.
        self.gen.current_guard = true_guard;
        if let (Some((name, union_reg)), Some(target)) = (&narrowed, &target_kind) {
            let fresh = self.gen.new_reg(target.clone());
            self.gen.stmt(Statement::ExtractUnionValue {
                union: *union_reg,
                target: fresh,
            });
            self.gen.locals.insert(name.clone(), fresh);
        }
        self.lower_block(then_block)?;

        // Roll back to the pre-branch state so the false branch sees the
        // same register numbering the true branch saw. True-side kinds
        // stay readable through the captured snapshot.
        let locals_t = std::mem::replace(&mut self.gen.locals, locals0.clone());
        let regs_t = std::mem::replace(&mut self.gen.registers, regs0);
        let locals_f_start = self.gen.copy_locals();

        // False branch.
        self.gen.current_guard = false_guard;
        if let (Some((name, union_reg)), Some(union), Some(target)) =
            (&narrowed, &union_kind, &target_kind)
        {
            // With exactly two arms, the else side knows the remaining one.
            if union.args.len() == 2 {
                let leftover = if union.args[0].is_equivalent(target).is_ok() {
                    union.args[1].clone()
                } else {
                    union.args[0].clone()
                };
                let fresh = self.gen.new_reg(leftover);
                self.gen.stmt(Statement::ExtractUnionValue {
                    union: *union_reg,
                    target: fresh,
                });
                self.gen.locals.insert(name.clone(), fresh);
            }
        }
        self.lower_block(else_block)?;

        self.gen.current_guard = parent;
        let locals_f = std::mem::replace(&mut self.gen.locals, locals_f_start);

        // Join the two environments.
        let mut names: Vec<String> = self.gen.locals.keys().cloned().collect();
        names.sort();
        for name in names {
            let (Some(&rt0), Some(&rf0)) = (locals_t.get(&name), locals_f.get(&name)) else {
                // Consumed on at least one side: gone after the join.
                self.gen.locals.remove(&name);
                continue;
            };
            let mut rt = rt0;
            let mut rf = rf0;

            if rt != rf {
                // True-side kinds live in the pre-rollback snapshot,
                // indexed through the substitution table.
                let kind_t = regs_t
                    .get(self.gen.resolve(rt).0)
                    .and_then(|slot| slot.clone())
                    .ok_or_else(|| consumed_register_error(rt, span))?;
                let kind_f = self.register_kind_or_err(rf, span)?;
                kind_t.is_equivalent(&kind_f).map_err(|d| {
                    Diagnostic::error(format!(
                        "value has unequal types on both sides of if-statement: {}",
                        d.message
                    ))
                    .with_code(ErrorCode::BRANCH_TYPE_DIVERGENCE)
                    .with_label(span, format!("`{}` diverges across this `if`", name))
                })?;

                // A side that left the value untouched gets a guarded
                // rename into a fresh register, so a consumer after the
                // join waits for the branch to resolve.
                let base = locals0.get(&name).copied();
                if Some(rt) == base {
                    let fresh = self.gen.new_reg(kind_t.clone());
                    self.gen
                        .stmt_with(true_guard, Statement::Rename { src: rt, dst: fresh });
                    rt = fresh;
                }
                if Some(rf) == base {
                    let fresh = self.gen.new_reg(kind_f.clone());
                    self.gen
                        .stmt_with(false_guard, Statement::Rename { src: rf, dst: fresh });
                    rf = fresh;
                }
                self.gen.join(rt, rf);
            }
            self.gen.locals.insert(name, rt);
        }

        Ok(())
    }

    /// Loop lowering: the body becomes a synthetic closure over the
    /// captured locals, restarted from its own tail while the condition
    /// holds.
    fn lower_while(&mut self, cond: &Expr, body: &Block, span: Span) -> Result<()> {
        let mut capture_set = BTreeSet::new();
        block_captures(body, &mut capture_set);

        let mut names = Vec::new();
        let mut outer_regs = Vec::new();
        let mut kinds = Vec::new();
        let mut result_regs = Vec::new();
        for name in &capture_set {
            let Some(&reg) = self.gen.locals.get(name) else {
                continue;
            };
            let kind = self.register_kind_or_err(reg, span)?;
            names.push(name.clone());
            outer_regs.push(reg);
            kinds.push(kind.clone());
            result_regs.push(self.gen.new_reg(kind));
        }

        // Build and lower the loop-body closure.
        self.gen.next_closure += 1;
        let closure_name = format!("{}_{}", self.gen.name, self.gen.next_closure);
        let mut closure = FunctionLowerer {
            program: self.program,
            gen: Generator::new(closure_name.as_str(), &names, kinds.clone(), kinds.clone()),
            closures: Vec::new(),
        };
        closure.lower_block(body)?;

        let self_slot = closure.gen.new_child_call(closure_name.as_str());
        let cond_regs = closure.lower_expr(cond)?;
        if cond_regs.len() != 1 {
            return Err(multi_value_error("while condition", span));
        }
        let continue_guard = closure.gen.new_guard();
        let exit_guard = closure.gen.new_guard();

        let mut carried = Vec::new();
        for (i, name) in names.iter().enumerate() {
            let Some(&reg) = closure.gen.locals.get(name) else {
                return Err(Diagnostic::error(format!(
                    "captured variable `{}` was consumed by the loop body",
                    name
                ))
                .with_code(ErrorCode::LOOP_TYPE_DIVERGENCE)
                .with_label(span, "every captured variable must survive an iteration"));
            };
            let kind = closure.register_kind_or_err(reg, span)?;
            kind.is_equivalent(&kinds[i]).map_err(|d| {
                Diagnostic::error(format!("{} changed type during loop: {}", kinds[i], d.message))
                    .with_code(ErrorCode::LOOP_TYPE_DIVERGENCE)
                    .with_label(span, format!("`{}` must keep its type across iterations", name))
            })?;
            carried.push(reg);
        }

        let garbage = closure.gen.garbage(&carried)?;
        closure.gen.stmt_with(
            0,
            Statement::Branch {
                cond: cond_regs[0],
                true_guard: continue_guard,
                false_guard: exit_guard,
            },
        );
        closure.gen.stmt_with(
            continue_guard,
            Statement::RestartLoop {
                args: carried.clone(),
                slot: self_slot,
                garbage: garbage.clone(),
            },
        );
        closure.gen.stmt_with(
            exit_guard,
            Statement::Return {
                values: carried,
                garbage,
            },
        );

        self.closures.extend(closure.closures);
        self.closures.push(closure.gen);

        // Entry test in the enclosing function: run the closure at least
        // once, or rename the carried values straight through.
        let start_guard = self.gen.new_guard();
        let skip_guard = self.gen.new_guard();
        let entry_regs = self.lower_expr(cond)?;
        if entry_regs.len() != 1 {
            return Err(multi_value_error("while condition", span));
        }
        self.gen.stmt(Statement::Branch {
            cond: entry_regs[0],
            true_guard: start_guard,
            false_guard: skip_guard,
        });
        let slot = self.gen.new_child_call(closure_name.as_str());
        self.gen.stmt_with(
            start_guard,
            Statement::CallAsync {
                name: closure_name,
                args: outer_regs,
                results: result_regs.clone(),
                slot,
            },
        );

        for (i, name) in names.iter().enumerate() {
            let Some(&before) = self.gen.locals.get(name) else {
                return Err(Diagnostic::error(format!(
                    "captured variable `{}` was consumed by the loop condition",
                    name
                ))
                .with_code(ErrorCode::LOOP_TYPE_DIVERGENCE)
                .with_label(span, "the loop must still own its captured variables"));
            };
            let after = result_regs[i];
            let before_kind = self.register_kind_or_err(before, span)?;
            let after_kind = self.register_kind_or_err(after, span)?;
            before_kind.is_equivalent(&after_kind).map_err(|d| {
                Diagnostic::error(format!("value changed type during loop: {}", d.message))
                    .with_code(ErrorCode::LOOP_TYPE_DIVERGENCE)
                    .with_label(span, format!("`{}` must keep its type across the loop", name))
            })?;
            self.gen.retire(before);
            self.gen.stmt_with(
                skip_guard,
                Statement::Rename {
                    src: before,
                    dst: after,
                },
            );
            self.gen.locals.insert(name.clone(), after);
        }

        Ok(())
    }

    // =========================================
    // Expressions
    // =========================================

    fn lower_expr(&mut self, expr: &Expr) -> Result<Vec<Register>> {
        let Some(cmp) = &expr.compare else {
            return self.lower_sum(&expr.sum);
        };

        let lhs = self.lower_sum(&expr.sum)?;
        if lhs.len() != 1 {
            return Err(multi_value_error("left side of the comparison", expr.span));
        }
        self.register_kind_or_err(lhs[0], expr.span)?
            .can_convert_to(&Kind::of(Family::Integer))
            .map_err(|d| d.with_label(expr.span, "comparisons work on integers"))?;

        let rhs = self.lower_sum(&cmp.operand)?;
        if rhs.len() != 1 {
            return Err(multi_value_error("right side of the comparison", expr.span));
        }
        self.register_kind_or_err(rhs[0], expr.span)?
            .can_convert_to(&Kind::of(Family::Integer))
            .map_err(|d| d.with_label(expr.span, "comparisons work on integers"))?;

        let result = self.gen.new_reg(Kind::of(Family::Boolean));
        self.gen.stmt(Statement::IntegerComparison {
            op: cmp.op,
            lhs: lhs[0],
            rhs: rhs[0],
            result,
        });
        Ok(vec![result])
    }

    fn lower_sum(&mut self, sum: &SumExpr) -> Result<Vec<Register>> {
        if sum.terms.is_empty() {
            return self.lower_call_expr(&sum.first);
        }

        // `a + b + c` desugars to concat(concat(a, b), c).
        let first = self.lower_call_expr(&sum.first)?;
        let mut acc = single_value(first, "function arg", sum.span)?;
        for term in &sum.terms {
            let rhs_regs = self.lower_call_expr(term)?;
            let rhs = single_value(rhs_regs, "function arg", sum.span)?;
            let results = self.call_with_values("concat", vec![acc, rhs], sum.span)?;
            acc = single_value(results, "function arg", sum.span)?;
        }
        Ok(vec![acc])
    }

    fn lower_call_expr(&mut self, call: &CallExpr) -> Result<Vec<Register>> {
        if call.calls.is_empty() {
            return self.lower_base(&call.base);
        }

        let BaseExpr::Variable { name, .. } = &call.base else {
            return Err(unsupported_call(call.span));
        };
        if call.calls.len() > 1 {
            return Err(unsupported_call(call.span));
        }
        let name = name.clone();
        self.lower_method_call(&name, &call.calls[0].args, call.span)
    }

    fn lower_base(&mut self, base: &BaseExpr) -> Result<Vec<Register>> {
        match base {
            BaseExpr::Variable { name, span } => {
                if let Some(&reg) = self.gen.locals.get(name) {
                    Ok(vec![reg])
                } else if let Some(&at) = self.gen.consumed_locals.get(name) {
                    Err(Diagnostic::error(format!("unknown variable \"{}\"", name))
                        .with_code(ErrorCode::UNKNOWN_VARIABLE)
                        .with_label(*span, "used here after its value was consumed")
                        .with_secondary_label(at, "consumed here")
                        .with_help("borrow the value with `&` if the callee does not need to own it"))
                } else {
                    Err(Diagnostic::error(format!("unknown variable \"{}\"", name))
                        .with_code(ErrorCode::UNKNOWN_VARIABLE)
                        .with_label(*span, "not bound in this scope"))
                }
            }
            BaseExpr::BoolLit { value, span: _ } => {
                let reg = self.gen.new_reg(Kind::of(Family::Boolean));
                self.gen.stmt(Statement::IntegerLiteral {
                    target: reg,
                    value: i64::from(*value),
                });
                Ok(vec![reg])
            }
            BaseExpr::StringLit { value, span: _ } => {
                let reg = self.gen.new_reg(Kind::of(Family::String));
                self.gen.stmt(Statement::StringLiteral {
                    target: reg,
                    value: value.clone(),
                });
                Ok(vec![reg])
            }
            BaseExpr::IntLit { value, span: _ } => {
                let reg = self.gen.new_reg(Kind::of(Family::Integer));
                self.gen.stmt(Statement::IntegerLiteral {
                    target: reg,
                    value: *value,
                });
                Ok(vec![reg])
            }
            BaseExpr::Tuple { items, span } => {
                let mut result = Vec::new();
                for item in items {
                    let regs = self.lower_expr(item)?;
                    result.push(single_value(regs, "tuple", *span)?);
                }
                Ok(result)
            }
            BaseExpr::Array { items, span } => {
                let mut elements = Vec::new();
                let mut elem_kind: Option<Kind> = None;
                for item in items {
                    let regs = self.lower_expr(item)?;
                    let reg = single_value(regs, "array", *span)?;
                    let kind = self.register_kind_or_err(reg, *span)?;
                    match &elem_kind {
                        None => elem_kind = Some(kind),
                        Some(first) => {
                            kind.is_equivalent(first).map_err(|d| {
                                d.with_label(*span, "array elements must share one type")
                            })?;
                        }
                    }
                    elements.push(reg);
                }
                let elem = elem_kind.ok_or_else(|| {
                    // The grammar requires at least one element; this is a
                    // backstop for synthetic ASTs.
                    Diagnostic::error("cannot infer the element type of an empty array")
                        .with_code(ErrorCode::UNKNOWN_TYPE)
                        .with_label(*span, "empty array literal")
                })?;
                let reg = self.gen.new_reg(Kind::array(elem));
                self.gen.stmt(Statement::NewArray {
                    target: reg,
                    elements,
                });
                Ok(vec![reg])
            }
        }
    }

    // =========================================
    // Calls
    // =========================================

    /// Lowers `callee(arg, ...)`: arguments are lowered left to right,
    /// with ownership transferred (and aliases invalidated) as soon as an
    /// owned parameter slot is filled.
    fn lower_method_call(
        &mut self,
        callee_name: &str,
        args: &[Arg],
        span: Span,
    ) -> Result<Vec<Register>> {
        let callee = self.lookup_callee(callee_name, args.len(), span)?;

        let mut kinds = Vec::new();
        let mut regs = Vec::new();
        let mut borrows: Vec<Option<String>> = Vec::new();
        for (i, arg) in args.iter().enumerate() {
            let (reg, borrow) = self.lower_arg(arg)?;
            kinds.push(self.register_kind_or_err(reg, span)?);
            regs.push(reg);
            borrows.push(borrow);

            let param_kind = resolve_type(&self.program.types, &callee.params[i].ty)?;
            if !param_kind.borrowed {
                self.gen.consume(reg, span);
            }
        }

        self.finish_call(callee, callee_name, &kinds, regs, borrows, span)
    }

    /// Shared call path for desugared calls whose arguments are already
    /// lowered (all owned, no borrows)
    fn call_with_values(
        &mut self,
        callee_name: &str,
        values: Vec<Register>,
        span: Span,
    ) -> Result<Vec<Register>> {
        let callee = self.lookup_callee(callee_name, values.len(), span)?;

        let mut kinds = Vec::new();
        for (i, &reg) in values.iter().enumerate() {
            kinds.push(self.register_kind_or_err(reg, span)?);
            let param_kind = resolve_type(&self.program.types, &callee.params[i].ty)?;
            if !param_kind.borrowed {
                self.gen.consume(reg, span);
            }
        }

        let borrows = vec![None; values.len()];
        self.finish_call(callee, callee_name, &kinds, values, borrows, span)
    }

    fn lookup_callee(&self, name: &str, arg_count: usize, span: Span) -> Result<&'p FnDecl> {
        let callee = self.program.functions.get(name).ok_or_else(|| {
            Diagnostic::error(format!("no function {}", name))
                .with_code(ErrorCode::UNKNOWN_FUNCTION)
                .with_label(span, "not defined in any loaded module")
        })?;
        if arg_count != callee.params.len() {
            return Err(Diagnostic::error(format!(
                "argument count mismatch, expecting {}, got {}",
                callee.params.len(),
                arg_count
            ))
            .with_code(ErrorCode::ARITY_MISMATCH)
            .with_label(span, format!("in this call to `{}`", name)));
        }
        Ok(callee)
    }

    fn lower_arg(&mut self, arg: &Arg) -> Result<(Register, Option<String>)> {
        match arg {
            Arg::Borrow { name, span } => {
                let Some(&reg) = self.gen.locals.get(name) else {
                    return Err(Diagnostic::error(format!(
                        "cannot borrow non-existing local variable {}",
                        name
                    ))
                    .with_code(ErrorCode::CANNOT_BORROW_UNKNOWN)
                    .with_label(*span, "no live variable by this name"));
                };
                Ok((reg, Some(name.clone())))
            }
            Arg::Expr(expr) => {
                let regs = self.lower_expr(expr)?;
                let reg = single_value(regs, "function arg", expr.span)?;
                Ok((reg, None))
            }
        }
    }

    fn finish_call(
        &mut self,
        callee: &FnDecl,
        callee_name: &str,
        arg_kinds: &[Kind],
        regs: Vec<Register>,
        mut borrows: Vec<Option<String>>,
        span: Span,
    ) -> Result<Vec<Register>> {
        for (i, kind) in arg_kinds.iter().enumerate() {
            let param_kind = resolve_type(&self.program.types, &callee.params[i].ty)?;
            kind.can_convert_to(&param_kind)
                .map_err(|d| d.with_label(span, format!("argument {} of `{}`", i + 1, callee_name)))?;
        }

        let result_kinds = callee
            .returns
            .iter()
            .map(|t| resolve_type(&self.program.types, t))
            .collect::<Result<Vec<_>>>()?;
        while borrows.len() < result_kinds.len() {
            borrows.push(None);
        }

        let results: Vec<Register> = result_kinds
            .into_iter()
            .map(|kind| self.gen.new_reg(kind))
            .collect();

        if callee.is_sync {
            self.gen.stmt(Statement::CallSync {
                name: callee_name.to_string(),
                args: regs.clone(),
                results: results.clone(),
            });
        } else {
            let slot = self.gen.new_child_call(callee_name);
            self.gen.stmt(Statement::CallAsync {
                name: callee_name.to_string(),
                args: regs.clone(),
                results: results.clone(),
                slot,
            });
        }

        // A result aligned with a borrowed argument re-points the borrowed
        // local; the rest flow back to the caller. The lent value threads
        // through the callee into the result register, so the old slot is
        // retired the same way a loop retires its carried registers.
        let mut actual = Vec::new();
        for (i, &res) in results.iter().enumerate() {
            match &borrows[i] {
                Some(local) => {
                    self.gen.retire(regs[i]);
                    self.gen.locals.insert(local.clone(), res);
                }
                None => actual.push(res),
            }
        }
        Ok(actual)
    }

    fn register_kind_or_err(&self, reg: Register, span: Span) -> Result<Kind> {
        self.gen
            .register_kind(reg)
            .cloned()
            .ok_or_else(|| consumed_register_error(reg, span))
    }
}

fn consumed_register_error(reg: Register, span: Span) -> Diagnostic {
    Diagnostic::error(format!("value in {} was already consumed", reg))
        .with_code(ErrorCode::USE_AFTER_CONSUME)
        .with_label(span, "needed again here")
}

fn multi_value_error(context: &str, span: Span) -> Diagnostic {
    Diagnostic::error(format!("got multiple values in {}", context))
        .with_code(ErrorCode::MULTI_VALUE_IN_CONTEXT)
        .with_label(span, "a single value is required here")
}

fn unsupported_call(span: Span) -> Diagnostic {
    Diagnostic::error("calls of non-immediate functions are unimplemented")
        .with_code(ErrorCode::UNSUPPORTED_CALL)
        .with_label(span, "only `name(args)` calls are supported")
}

fn single_value(regs: Vec<Register>, context: &str, span: Span) -> Result<Register> {
    if regs.len() == 1 {
        Ok(regs[0])
    } else {
        Err(multi_value_error(context, span))
    }
}

/// Returns the variable name if the expression is exactly one bare
/// identifier (no comparison, no sum terms, no calls)
fn bare_variable(expr: &Expr) -> Option<&str> {
    if expr.compare.is_some() || !expr.sum.terms.is_empty() || !expr.sum.first.calls.is_empty() {
        return None;
    }
    match &expr.sum.first.base {
        BaseExpr::Variable { name, .. } => Some(name),
        _ => None,
    }
}

// =========================================
// Capture analysis
// =========================================

/// Names referenced anywhere inside the block; filtered against live
/// locals by the loop lowering
pub fn block_captures(block: &Block, out: &mut BTreeSet<String>) {
    for stmt in &block.statements {
        stmt_captures(stmt, out);
    }
}

fn stmt_captures(stmt: &Stmt, out: &mut BTreeSet<String>) {
    match stmt {
        Stmt::Bind { value, .. } => expr_captures(value, out),
        Stmt::Return { value, .. } => expr_captures(value, out),
        Stmt::Expr { expr, .. } => expr_captures(expr, out),
        Stmt::If {
            cond,
            then_block,
            else_block,
            ..
        } => {
            expr_captures(cond, out);
            block_captures(then_block, out);
            block_captures(else_block, out);
        }
        // A nested loop contributes its body; its condition is lowered
        // inside the nested closure against that closure's captures.
        Stmt::While { body, .. } => block_captures(body, out),
    }
}

fn expr_captures(expr: &Expr, out: &mut BTreeSet<String>) {
    sum_captures(&expr.sum, out);
    if let Some(cmp) = &expr.compare {
        sum_captures(&cmp.operand, out);
    }
}

fn sum_captures(sum: &SumExpr, out: &mut BTreeSet<String>) {
    call_captures(&sum.first, out);
    for term in &sum.terms {
        call_captures(term, out);
    }
}

fn call_captures(call: &CallExpr, out: &mut BTreeSet<String>) {
    base_captures(&call.base, out);
    for call_args in &call.calls {
        for arg in &call_args.args {
            match arg {
                Arg::Borrow { name, .. } => {
                    out.insert(name.clone());
                }
                Arg::Expr(expr) => expr_captures(expr, out),
            }
        }
    }
}

fn base_captures(base: &BaseExpr, out: &mut BTreeSet<String>) {
    match base {
        BaseExpr::Variable { name, .. } => {
            out.insert(name.clone());
        }
        BaseExpr::Tuple { items, .. } | BaseExpr::Array { items, .. } => {
            for item in items {
                expr_captures(item, out);
            }
        }
        BaseExpr::BoolLit { .. } | BaseExpr::StringLit { .. } | BaseExpr::IntLit { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;
    use std::collections::BTreeMap;
    use swell_error::SourceCache;

    fn try_lower(source: &str) -> Result<Program> {
        let mut cache = SourceCache::new();
        let sources = BTreeMap::from([("test.ht".to_string(), source.to_string())]);
        let mut program = Program::load("test", &sources, &mut cache)?;
        program.lower_all()?;
        Ok(program)
    }

    fn lower_ok(source: &str) -> Program {
        match try_lower(source) {
            Ok(program) => program,
            Err(diag) => panic!("expected program to lower, got: {}", diag),
        }
    }

    #[test]
    fn single_assignment_and_return() {
        let program = lower_ok("func main(c: Clock): Clock {\n  return c\n}\n");
        let main = program.generator("main").unwrap();

        assert_eq!(main.registers.len(), 1);
        assert_eq!(main.conditions.len(), 1);
        match &main.conditions[0] {
            (0, Statement::Return { values, garbage }) => {
                assert_eq!(values, &vec![Register(0)]);
                assert!(garbage.is_empty());
            }
            other => panic!("expected a guard-0 return, got {:?}", other),
        }
    }

    #[test]
    fn owning_call_consumes_the_local() {
        let program = lower_ok(
            r#"sync native func consume(s: String): Integer

func main(c: Clock): Clock {
  let s = "hi"
  let n = consume(s)
  return c
}
"#,
        );
        let main = program.generator("main").unwrap();
        // The string register was consumed by the call.
        assert!(main.register_kind(Register(1)).is_none());
        assert!(!main.locals.contains_key("s"));
        assert!(main.consumed_locals.contains_key("s"));
    }

    #[test]
    fn consumed_local_reads_as_unknown_variable() {
        let err = try_lower(
            r#"sync native func consume(s: String): Integer

func main(c: Clock): Clock {
  let s = "hi"
  let n = consume(s)
  let m = consume(s)
  return c
}
"#,
        )
        .unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::UNKNOWN_VARIABLE));
        assert!(err.message.contains("unknown variable"));
    }

    #[test]
    fn borrow_preserves_and_rebinds() {
        let program = lower_ok(
            r#"sync native func write(f: &FileSystem, s: String): FileSystem

func main(f: FileSystem): FileSystem {
  write(&f, "x")
  write(&f, "y")
  return f
}
"#,
        );
        let main = program.generator("main").unwrap();

        let calls = main
            .conditions
            .iter()
            .filter(|(_, s)| matches!(s, Statement::CallSync { .. }))
            .count();
        assert_eq!(calls, 2);

        // `f` was re-pointed to the second call's result; the lent slots
        // are retired.
        match main.conditions.last() {
            Some((0, Statement::Return { values, garbage })) => {
                assert_eq!(values, &vec![Register(4)]);
                assert!(garbage.is_empty());
            }
            other => panic!("expected a return, got {:?}", other),
        }
        assert!(main.register_kind(Register(0)).is_none());
        assert!(main.register_kind(Register(2)).is_none());
    }

    #[test]
    fn branch_arms_share_register_numbering() {
        let program = lower_ok(
            r#"sync native func flag(n: &Integer): Boolean

func main(c: Clock): (Clock, Integer) {
  let x = 3
  if flag(5) {
    set x = 4
  } else {
    set x = 5
  }
  return (c, x)
}
"#,
        );
        let main = program.generator("main").unwrap();

        // Both arms rebound `x`, landing in the same rolled-back index, so
        // the join needs no renames and no substitutions.
        assert!(main.substitutions.is_empty());
        assert!(!main
            .conditions
            .iter()
            .any(|(_, s)| matches!(s, Statement::Rename { .. })));
        match main.conditions.last() {
            Some((0, Statement::Return { values, .. })) => {
                assert_eq!(values, &vec![Register(0), Register(4)]);
            }
            other => panic!("expected a return, got {:?}", other),
        }
    }

    #[test]
    fn one_sided_update_renames_the_untouched_side() {
        let program = lower_ok(
            r#"sync native func flag(n: &Integer): Boolean

func main(c: Clock): (Clock, Integer) {
  let x = 3
  if flag(5) {
    set x = 4
  } else {
  }
  return (c, x)
}
"#,
        );
        let main = program.generator("main").unwrap();

        // The false side kept the original register; it is renamed into a
        // fresh one under the false guard so later readers wait for the
        // branch. The fresh register lands in the same rolled-back index
        // the true side wrote, so the two sides unify without any
        // substitution entry.
        let renames: Vec<&(u32, Statement)> = main
            .conditions
            .iter()
            .filter(|(_, s)| matches!(s, Statement::Rename { .. }))
            .collect();
        assert_eq!(renames.len(), 1);
        let (guard, Statement::Rename { src, dst }) = renames[0] else {
            unreachable!()
        };
        assert_eq!(*guard, 2);
        assert_eq!(*src, Register(1));
        assert_eq!(*dst, Register(4));
        assert!(main.substitutions.is_empty());
        match main.conditions.last() {
            Some((0, Statement::Return { values, .. })) => {
                assert_eq!(values, &vec![Register(0), Register(4)]);
            }
            other => panic!("expected a return, got {:?}", other),
        }
    }

    #[test]
    fn branch_type_divergence_is_rejected() {
        let err = try_lower(
            r#"sync native func flag(n: &Integer): Boolean

func main(c: Clock): Clock {
  let x = 3
  if flag(5) {
    set x = "oops"
  } else {
  }
  return c
}
"#,
        )
        .unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::BRANCH_TYPE_DIVERGENCE));
        assert!(err
            .message
            .contains("unequal types on both sides of if-statement"));
    }

    #[test]
    fn narrowing_extracts_per_branch_and_consumes_the_union() {
        let program = lower_ok(
            r#"sync native func parse(s: String): Union[String, Integer]
sync native func useString(s: String): Integer
sync native func useInt(n: Integer): Integer

func main(c: Clock): Clock {
  let u = parse("x")
  if u is String {
    let a = useString(u)
  } else {
    let b = useInt(u)
  }
  return c
}
"#,
        );
        let main = program.generator("main").unwrap();

        assert!(main.conditions.iter().any(|(g, s)| {
            *g == 0
                && matches!(
                    s,
                    Statement::CheckUnionType {
                        union: Register(2),
                        arm: 0,
                        ..
                    }
                )
        }));
        // One extraction per branch, both reading the invalidated union
        // register.
        let extracts: Vec<u32> = main
            .conditions
            .iter()
            .filter_map(|(g, s)| {
                matches!(s, Statement::ExtractUnionValue { union: Register(2), .. }).then_some(*g)
            })
            .collect();
        assert_eq!(extracts, vec![1, 2]);
        assert!(main.register_kind(Register(2)).is_none());
        assert!(!main.locals.contains_key("u"));
    }

    #[test]
    fn union_local_is_dead_after_the_narrowing_if() {
        let err = try_lower(
            r#"sync native func parse(s: String): Union[String, Integer]
sync native func useString(s: String): Integer
sync native func useInt(n: Integer): Integer

func main(c: Clock): Clock {
  let u = parse("x")
  if u is String {
    let a = useString(u)
  } else {
    let b = useInt(u)
  }
  let z = useInt(u)
  return c
}
"#,
        )
        .unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::UNKNOWN_VARIABLE));
    }

    #[test]
    fn narrowing_rejects_non_unions_and_impossible_arms() {
        let err = try_lower(
            "func main(c: Clock): Clock {\n  if c is String {\n  } else {\n  }\n  return c\n}\n",
        )
        .unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::TYPE_NARROW_ON_NON_UNION));

        let err = try_lower(
            r#"sync native func parse(s: String): Union[String, Integer]

func main(c: Clock): Clock {
  let u = parse("x")
  if u is Clock {
  } else {
  }
  return c
}
"#,
        )
        .unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::TYPE_NARROW_IMPOSSIBLE));
    }

    #[test]
    fn while_loop_builds_a_carrying_closure() {
        let program = lower_ok(
            r#"sync native func lt(a: &Integer, b: &Integer): Boolean
sync native func inc(n: Integer): Integer

func main(c: Clock): (Clock, Integer) {
  let n = 0
  while lt(n, 10) {
    set n = inc(n)
  }
  return (c, n)
}
"#,
        );

        let closure = program.generator("main_1").expect("loop closure exists");
        assert_eq!(closure.arg_kinds.len(), 1);
        assert_eq!(closure.return_kinds.len(), 1);
        assert_eq!(closure.child_calls, vec!["main_1".to_string()]);
        assert!(closure
            .conditions
            .iter()
            .any(|(g, s)| *g == 1 && matches!(s, Statement::RestartLoop { .. })));
        assert!(closure
            .conditions
            .iter()
            .any(|(g, s)| *g == 2 && matches!(s, Statement::Return { .. })));

        let main = program.generator("main").unwrap();
        assert!(main.conditions.iter().any(|(g, s)| {
            *g == 1
                && matches!(
                    s,
                    Statement::CallAsync { name, .. } if name == "main_1"
                )
        }));
        // The zero-iteration path renames the carried value through.
        assert!(main
            .conditions
            .iter()
            .any(|(g, s)| *g == 2 && matches!(s, Statement::Rename { .. })));
        // The old register is retired and the local re-pointed.
        assert!(main.register_kind(Register(1)).is_none());
        assert_eq!(main.locals["n"], Register(2));
    }

    #[test]
    fn loop_type_divergence_is_rejected() {
        let err = try_lower(
            r#"sync native func lt(a: &Integer, b: &Integer): Boolean
sync native func toText(n: Integer): String

func main(c: Clock): (Clock, Integer) {
  let n = 0
  while lt(n, 10) {
    set n = toText(n)
  }
  return (c, n)
}
"#,
        )
        .unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::LOOP_TYPE_DIVERGENCE));
        assert!(err.message.contains("changed type during loop"));
    }

    #[test]
    fn return_garbage_collects_droppable_values() {
        let program = lower_ok(
            "func main(c: Clock): Clock {\n  let s = \"hi\"\n  return c\n}\n",
        );
        let main = program.generator("main").unwrap();
        match main.conditions.last() {
            Some((_, Statement::Return { garbage, .. })) => {
                assert_eq!(garbage.len(), 1);
                assert!(garbage.contains_key(&Register(1)));
            }
            other => panic!("expected a return, got {:?}", other),
        }
    }

    #[test]
    fn unconsumed_clock_is_an_error() {
        let err = try_lower(
            "sync native func tick(): Clock\n\nfunc main(c: Clock): Clock {\n  let d = tick()\n  return c\n}\n",
        )
        .unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::UNCONSUMED_VALUE));
    }

    #[test]
    fn binding_errors() {
        let err = try_lower(
            "func main(c: Clock): Clock {\n  let x = 3\n  let x = 4\n  return c\n}\n",
        )
        .unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::VARIABLE_ALREADY_EXISTS));

        let err = try_lower("func main(c: Clock): Clock {\n  set y = 3\n  return c\n}\n")
            .unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::VARIABLE_DOES_NOT_EXIST));
    }

    #[test]
    fn bare_expression_must_be_void() {
        let err =
            try_lower("func main(c: Clock): Clock {\n  3\n  return c\n}\n").unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::UNCONSUMED_VALUE));
    }

    #[test]
    fn single_name_tuples_values_automatically() {
        let program = lower_ok(
            r#"sync native func eat(t: Tuple[Integer, Integer]): Integer

func main(c: Clock): Clock {
  let t = (1, 2)
  let n = eat(t)
  return c
}
"#,
        );
        let main = program.generator("main").unwrap();
        assert!(main
            .conditions
            .iter()
            .any(|(_, s)| matches!(s, Statement::MakeTuple { .. })));
        assert!(main
            .conditions
            .iter()
            .any(|(_, s)| matches!(s, Statement::CallSync { name, .. } if name == "eat")));
    }

    #[test]
    fn unconsumed_tuple_is_not_implicitly_droppable() {
        let err = try_lower(
            "func main(c: Clock): Clock {\n  let t = (1, 2)\n  return c\n}\n",
        )
        .unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::UNCONSUMED_VALUE));
    }

    #[test]
    fn call_argument_type_mismatch() {
        let err = try_lower(
            "sync native func consume(s: String): Integer\n\nfunc main(c: Clock): Clock {\n  let n = consume(3)\n  return c\n}\n",
        )
        .unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::TYPE_MISMATCH));
        assert!(err.message.contains("expecting"));
    }

    #[test]
    fn unknown_function_and_bad_borrow() {
        let err = try_lower("func main(c: Clock): Clock {\n  let n = nope(3)\n  return c\n}\n")
            .unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::UNKNOWN_FUNCTION));

        let err = try_lower(
            "sync native func write(f: &FileSystem, s: String): FileSystem\n\nfunc main(c: Clock): Clock {\n  write(&zz, \"x\")\n  return c\n}\n",
        )
        .unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::CANNOT_BORROW_UNKNOWN));
    }

    #[test]
    fn concat_desugars_to_nested_calls() {
        let program = lower_ok(
            r#"sync native func concat(a: String, b: String): String

func main(c: Clock): Clock {
  let s = "a" + "b" + "c"
  let t = consumeText(s)
  return c
}

sync native func consumeText(s: String): Integer
"#,
        );
        let main = program.generator("main").unwrap();
        let concats = main
            .conditions
            .iter()
            .filter(|(_, s)| matches!(s, Statement::CallSync { name, .. } if name == "concat"))
            .count();
        assert_eq!(concats, 2);
    }

    #[test]
    fn comparison_requires_integers() {
        let err = try_lower(
            "func main(c: Clock): Clock {\n  if \"a\" < 3 {\n  } else {\n  }\n  return c\n}\n",
        )
        .unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::TYPE_MISMATCH));
    }

    #[test]
    fn capture_analysis_sees_through_nesting() {
        let mut out = BTreeSet::new();
        let source = "func main(c: Clock): Clock {\n  if done < 3 {\n    let x = f(&s, inner)\n  } else {\n  }\n  return c\n}\n";
        let tokens = swell_lexer::Lexer::new(source, 0).tokenize().unwrap();
        let module = swell_parser::parse(tokens).unwrap();
        let body = module.functions[0].body.as_ref().unwrap();
        block_captures(body, &mut out);
        let names: Vec<&str> = out.iter().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["c", "done", "f", "inner", "s"]);
    }
}
