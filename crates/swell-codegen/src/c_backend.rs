//! C backend - continuation state records and guarded statement bodies
//!
//! Every generator becomes a state struct (register array, result
//! pointers, caller closure, condition bits, child-call slots) plus a
//! function that walks its guarded statement list. A statement fires when
//! its guard bit is set, every needed register is ready, and no provided
//! register is ready yet; data readiness, not statement order, drives
//! execution.

use crate::CodeGen;
use std::collections::BTreeMap;
use std::fmt::Write;
use swell_error::{Diagnostic, ErrorCode, Result};
use swell_ir::{Generator, Program, Register, Statement};

/// The C code generation backend
#[derive(Debug, Default)]
pub struct CBackend;

impl CBackend {
    pub fn new() -> Self {
        Self
    }

    /// A register reference in the emitted code, routed through the
    /// substitution table
    fn reg(&self, gen: &Generator, r: Register) -> String {
        format!("sp->r[{}]", gen.resolve(r).0)
    }

    fn header_for(&self, gen: &Generator) -> String {
        format!(
            "void swell_{}(struct swell_runtime *rt, struct swell_{}_state *sp)",
            gen.name, gen.name
        )
    }

    fn emit_state_struct(&self, gen: &Generator, out: &mut String) {
        if gen.is_native {
            writeln!(out, "void swell_{}();", gen.name).unwrap();
            return;
        }

        writeln!(out, "struct swell_{}_state {{", gen.name).unwrap();
        // Branch rollback can shrink the register vector; statements under
        // a true guard may still address the peak.
        writeln!(out, "  future_t r[{}];", gen.peak_registers.max(1)).unwrap();
        writeln!(out, "  future_t *result[{}];", gen.return_kinds.len().max(1)).unwrap();
        writeln!(out, "  closure_t caller;").unwrap();
        writeln!(out, "  bool conditions[{}];", gen.guard_count()).unwrap();
        for (slot, callee) in gen.child_calls.iter().enumerate() {
            writeln!(out, "  struct swell_{}_state *call_{};", callee, slot).unwrap();
            writeln!(out, "  bool call_{}_done;", slot).unwrap();
        }
        writeln!(out, "}};").unwrap();
        writeln!(out, "{};", self.header_for(gen)).unwrap();
    }

    fn emit_function(&self, gen: &Generator, out: &mut String) {
        if gen.is_native {
            return;
        }

        writeln!(out, "{} {{", self.header_for(gen)).unwrap();

        // First entry: clear the condition bits and the child slots.
        writeln!(out, "  if (!sp->conditions[0]) {{").unwrap();
        writeln!(out, "    memset(&sp->conditions, '\\0', sizeof(sp->conditions));").unwrap();
        writeln!(out, "    sp->conditions[0] = true;").unwrap();
        for slot in 0..gen.child_calls.len() {
            writeln!(out, "    sp->call_{} = NULL;", slot).unwrap();
            writeln!(out, "    sp->call_{}_done = false;", slot).unwrap();
        }
        writeln!(out, "  }}").unwrap();

        for (guard, stmt) in &gen.conditions {
            writeln!(out, "  // {}", stmt).unwrap();
            if *guard > 0 {
                write!(out, "  if (sp->conditions[{}]", guard).unwrap();
            } else {
                write!(out, "  if (true").unwrap();
            }
            let (needs, provides) = stmt.deps();
            for r in needs {
                write!(out, " && {}.ready", self.reg(gen, r)).unwrap();
            }
            for r in provides {
                write!(out, " && !{}.ready", self.reg(gen, r)).unwrap();
            }
            writeln!(out, ") {{").unwrap();
            out.push_str(&self.statement_body(gen, stmt));
            writeln!(out, "  }}").unwrap();
        }

        writeln!(out, "}}").unwrap();
    }

    fn statement_body(&self, gen: &Generator, stmt: &Statement) -> String {
        let mut b = String::new();
        match stmt {
            Statement::StringLiteral { target, value } => {
                writeln!(
                    b,
                    "    {} = (future_t){{.value = swell_strdup({}), .ready = true}};",
                    self.reg(gen, *target),
                    c_quote(value)
                )
                .unwrap();
            }
            Statement::IntegerLiteral { target, value } => {
                writeln!(
                    b,
                    "    {} = (future_t){{.value = (void *)(intptr_t){}, .ready = true}};",
                    self.reg(gen, *target),
                    value
                )
                .unwrap();
            }
            Statement::NewArray { target, elements } => {
                writeln!(b, "    {{").unwrap();
                writeln!(
                    b,
                    "      val_t *items = malloc(sizeof(val_t) * {});",
                    elements.len() + 1
                )
                .unwrap();
                writeln!(b, "      items[0] = (void *)(intptr_t){};", elements.len()).unwrap();
                for (i, elem) in elements.iter().enumerate() {
                    writeln!(b, "      items[{}] = {}.value;", i + 1, self.reg(gen, *elem)).unwrap();
                }
                writeln!(
                    b,
                    "      {} = (future_t){{.value = items, .ready = true}};",
                    self.reg(gen, *target)
                )
                .unwrap();
                writeln!(b, "    }}").unwrap();
            }
            Statement::MakeTuple { target, inputs } => {
                writeln!(b, "    {{").unwrap();
                writeln!(
                    b,
                    "      val_t *fields = malloc(sizeof(val_t) * {});",
                    inputs.len()
                )
                .unwrap();
                for (i, input) in inputs.iter().enumerate() {
                    writeln!(b, "      fields[{}] = {}.value;", i, self.reg(gen, *input)).unwrap();
                }
                writeln!(
                    b,
                    "      {} = (future_t){{.value = fields, .ready = true}};",
                    self.reg(gen, *target)
                )
                .unwrap();
                writeln!(b, "    }}").unwrap();
            }
            Statement::Rename { src, dst } => {
                writeln!(b, "    {} = {};", self.reg(gen, *dst), self.reg(gen, *src)).unwrap();
            }
            Statement::CallSync { name, args, results } => {
                let mut call_args = vec!["rt".to_string()];
                for arg in args {
                    call_args.push(format!("{}.value", self.reg(gen, *arg)));
                }
                for res in results {
                    call_args.push(format!("&{}.value", self.reg(gen, *res)));
                }
                writeln!(b, "    swell_{}({});", name, call_args.join(", ")).unwrap();
                for res in results {
                    writeln!(b, "    {}.ready = true;", self.reg(gen, *res)).unwrap();
                }
            }
            Statement::CallAsync {
                name,
                args,
                results,
                slot,
            } => {
                let slot = slot.0;
                writeln!(b, "    if (sp->call_{} == NULL) {{", slot).unwrap();
                writeln!(
                    b,
                    "      sp->call_{} = malloc(sizeof(struct swell_{}_state));",
                    slot, name
                )
                .unwrap();
                for (i, arg) in args.iter().enumerate() {
                    writeln!(
                        b,
                        "      sp->call_{}->r[{}] = {};",
                        slot,
                        i,
                        self.reg(gen, *arg)
                    )
                    .unwrap();
                }
                for (i, res) in results.iter().enumerate() {
                    writeln!(
                        b,
                        "      sp->call_{}->result[{}] = &{};",
                        slot,
                        i,
                        self.reg(gen, *res)
                    )
                    .unwrap();
                }
                writeln!(b, "      sp->call_{}->caller.func = &swell_{};", slot, gen.name).unwrap();
                writeln!(b, "      sp->call_{}->caller.state = sp;", slot).unwrap();
                writeln!(b, "      sp->call_{}->conditions[0] = false;", slot).unwrap();
                writeln!(
                    b,
                    "      swell_runtime_schedule(rt, (closure_t){{.state = sp->call_{}, .func = &swell_{}}});",
                    slot, name
                )
                .unwrap();
                writeln!(b, "    }}").unwrap();
            }
            Statement::RestartLoop { args, slot, garbage } => {
                let slot = slot.0;
                writeln!(b, "    if (!sp->call_{}_done) {{", slot).unwrap();
                writeln!(b, "      if (sp->call_{} == NULL) {{", slot).unwrap();
                writeln!(
                    b,
                    "        sp->call_{} = malloc(sizeof(struct swell_{}_state));",
                    slot, gen.name
                )
                .unwrap();
                for i in 0..gen.return_kinds.len() {
                    writeln!(
                        b,
                        "        sp->call_{}->result[{}] = sp->result[{}];",
                        slot, i, i
                    )
                    .unwrap();
                }
                writeln!(b, "        sp->call_{}->caller = sp->caller;", slot).unwrap();
                writeln!(b, "        sp->call_{}->conditions[0] = false;", slot).unwrap();
                writeln!(b, "      }}").unwrap();
                for (i, arg) in args.iter().enumerate() {
                    writeln!(
                        b,
                        "      sp->call_{}->r[{}] = {};",
                        slot,
                        i,
                        self.reg(gen, *arg)
                    )
                    .unwrap();
                }
                writeln!(
                    b,
                    "      swell_runtime_schedule(rt, (closure_t){{.state = sp->call_{}, .func = &swell_{}}});",
                    slot, gen.name
                )
                .unwrap();
                let ready: Vec<String> = args
                    .iter()
                    .map(|arg| format!("{}.ready", self.reg(gen, *arg)))
                    .collect();
                let all_ready = if ready.is_empty() {
                    "true".to_string()
                } else {
                    ready.join(" && ")
                };
                writeln!(b, "      if ({}) {{", all_ready).unwrap();
                writeln!(b, "        sp->call_{}_done = true;", slot).unwrap();
                self.free_garbage(gen, garbage, &mut b);
                writeln!(b, "        free(sp);").unwrap();
                writeln!(b, "        return;").unwrap();
                writeln!(b, "      }}").unwrap();
                writeln!(b, "    }}").unwrap();
            }
            Statement::Return { values, garbage } => {
                for (i, value) in values.iter().enumerate() {
                    writeln!(b, "    *sp->result[{}] = {};", i, self.reg(gen, *value)).unwrap();
                }
                writeln!(b, "    swell_runtime_schedule(rt, sp->caller);").unwrap();
                self.free_garbage(gen, garbage, &mut b);
                writeln!(b, "    free(sp);").unwrap();
                writeln!(b, "    return;").unwrap();
            }
            Statement::Branch {
                cond,
                true_guard,
                false_guard,
            } => {
                writeln!(b, "    if ({}.value != 0) {{", self.reg(gen, *cond)).unwrap();
                writeln!(b, "      sp->conditions[{}] = true;", true_guard).unwrap();
                writeln!(b, "    }} else {{").unwrap();
                writeln!(b, "      sp->conditions[{}] = true;", false_guard).unwrap();
                writeln!(b, "    }}").unwrap();
            }
            Statement::IntegerComparison { op, lhs, rhs, result } => {
                writeln!(
                    b,
                    "    {}.value = (intptr_t){}.value {} (intptr_t){}.value ? (void *)1 : (void *)0;",
                    self.reg(gen, *result),
                    self.reg(gen, *lhs),
                    op.as_str(),
                    self.reg(gen, *rhs)
                )
                .unwrap();
                writeln!(b, "    {}.ready = true;", self.reg(gen, *result)).unwrap();
            }
            Statement::CheckUnionType { union, arm, result } => {
                writeln!(
                    b,
                    "    {}.value = ((swell_union_t *){}.value)->tag == {} ? (void *)1 : (void *)0;",
                    self.reg(gen, *result),
                    self.reg(gen, *union),
                    arm
                )
                .unwrap();
                writeln!(b, "    {}.ready = true;", self.reg(gen, *result)).unwrap();
            }
            Statement::ExtractUnionValue { union, target } => {
                writeln!(
                    b,
                    "    {} = (future_t){{.value = ((swell_union_t *){}.value)->payload, .ready = true}};",
                    self.reg(gen, *target),
                    self.reg(gen, *union)
                )
                .unwrap();
            }
        }
        b
    }

    fn free_garbage(
        &self,
        gen: &Generator,
        garbage: &BTreeMap<Register, swell_ir::Kind>,
        out: &mut String,
    ) {
        for (reg, kind) in garbage {
            writeln!(
                out,
                "        if ({}.ready) free({}.value); // {}",
                self.reg(gen, *reg),
                self.reg(gen, *reg),
                kind
            )
            .unwrap();
        }
    }

    /// The runtime driver: seeds `main`'s arguments with family
    /// singletons, parks its results, and runs the scheduler to
    /// quiescence.
    fn emit_main_driver(&self, gen: &Generator, out: &mut String) -> Result<()> {
        writeln!(out, "int main(int argc, const char *argv[]) {{").unwrap();
        writeln!(out, "  struct swell_runtime rt;").unwrap();
        writeln!(out, "  swell_runtime_init(&rt);").unwrap();
        writeln!(
            out,
            "  struct swell_main_state *st = calloc(1, sizeof(struct swell_main_state));"
        )
        .unwrap();

        for (i, kind) in gen.arg_kinds.iter().enumerate() {
            if !kind.valid_as_main_arg() {
                return Err(Diagnostic::error(format!(
                    "not sure how to synthesize a {} for main",
                    kind
                ))
                .with_code(ErrorCode::ENTRY_POINT_MAIN_KINDS)
                .with_help("main may take Clock, Stream and FileSystem arguments"));
            }
            writeln!(out, "  st->r[{}].value = kSingleton{};", i, kind.family).unwrap();
            writeln!(out, "  st->r[{}].ready = true;", i).unwrap();
        }

        for (i, kind) in gen.return_kinds.iter().enumerate() {
            if !kind.valid_as_main_return() {
                return Err(Diagnostic::error(format!(
                    "not sure how to consume a {} returned from main",
                    kind
                ))
                .with_code(ErrorCode::ENTRY_POINT_MAIN_KINDS)
                .with_help("main may return Clock, Stream and FileSystem values"));
            }
            writeln!(out, "  future_t dropped_result_{};", i).unwrap();
            writeln!(out, "  st->result[{}] = &dropped_result_{};", i, i).unwrap();
        }

        writeln!(
            out,
            "  st->caller = (closure_t){{.state = NULL, .func = &swell_exit}};"
        )
        .unwrap();
        writeln!(
            out,
            "  swell_runtime_schedule(&rt, (closure_t){{.state = st, .func = &swell_main}});"
        )
        .unwrap();
        writeln!(out, "  swell_runtime_loop(&rt);").unwrap();
        writeln!(out, "}}").unwrap();
        Ok(())
    }
}

impl CodeGen for CBackend {
    type Output = Result<BTreeMap<String, String>>;

    fn generate(&self, entry: &str, program: &Program) -> Self::Output {
        let mut header = String::new();
        writeln!(header, "#include <stdbool.h>").unwrap();
        writeln!(header, "#include \"swell_runtime.h\"").unwrap();
        for gen in &program.generators {
            self.emit_state_struct(gen, &mut header);
        }

        let mut source = String::new();
        writeln!(source, "#include \"{}.h\"", entry).unwrap();
        writeln!(source, "#include <stdlib.h>").unwrap();
        writeln!(source, "#include <stdio.h>").unwrap();
        writeln!(source, "#include <assert.h>").unwrap();
        writeln!(source, "#include <string.h>").unwrap();
        writeln!(source, "#include <stdint.h>").unwrap();
        for gen in &program.generators {
            self.emit_function(gen, &mut source);
        }

        let main = program
            .generator("main")
            .ok_or_else(|| {
                Diagnostic::error(format!("no main function defined in {}", entry))
                    .with_code(ErrorCode::NO_MAIN_FUNCTION)
            })?;
        self.emit_main_driver(main, &mut source)?;

        let mut files = BTreeMap::new();
        files.insert(format!("{}.h", entry), header);
        files.insert(format!("{}.c", entry), source);
        Ok(files)
    }
}

/// Quotes a string as a C literal
fn c_quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for ch in text.chars() {
        match ch {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            '\r' => quoted.push_str("\\r"),
            c if (c as u32) < 0x20 => {
                quoted.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
