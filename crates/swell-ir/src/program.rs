//! Program - the loaded module set and its lowered generators
//!
//! The loader resolves `<name>.ht` files breadth-first from the entry
//! module, following imports with a visited set so cyclic imports load
//! each file once. Function and struct tables are `BTreeMap`s, so every
//! later phase iterates in a stable order and compilation stays a pure
//! function of its inputs.

use crate::generator::Generator;
use crate::lower::lower_function;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use swell_error::{Diagnostic, ErrorCode, Result, SourceCache};
use swell_lexer::Lexer;
use swell_parser::{parse, FnDecl, TypeRep};

/// Everything the compiler knows about one module set
#[derive(Debug, Default)]
pub struct Program {
    /// Every loaded function, by name
    pub functions: BTreeMap<String, FnDecl>,
    /// Declared field types per struct name
    pub types: BTreeMap<String, Vec<TypeRep>>,
    /// Lowered generators, closures included
    pub generators: Vec<Generator>,
}

impl Program {
    /// Loads `<entry>.ht` and everything it transitively imports from the
    /// source map. Registers each file with `cache` so diagnostics can be
    /// rendered against it.
    pub fn load(
        entry: &str,
        sources: &BTreeMap<String, String>,
        cache: &mut SourceCache,
    ) -> Result<Program> {
        let mut program = Program::default();
        let mut queue = VecDeque::from([entry.to_string()]);
        let mut visited = BTreeSet::new();

        while let Some(module_name) = queue.pop_front() {
            if !visited.insert(module_name.clone()) {
                continue;
            }

            let filename = format!("{}.ht", module_name);
            let Some(text) = sources.get(&filename) else {
                return Err(Diagnostic::error(format!("no such file: {}", filename))
                    .with_code(ErrorCode::MODULE_NOT_FOUND)
                    .with_note(format!("needed while loading module `{}`", entry)));
            };

            let file_id = cache.add(filename.as_str(), text.as_str());
            let tokens = Lexer::new(text, file_id).tokenize()?;
            let module = parse(tokens)?;

            for import in &module.imports {
                queue.push_back(import.module.clone());
            }
            for decl in module.structs {
                if program.types.contains_key(&decl.name) {
                    return Err(Diagnostic::error(format!(
                        "type already exists: {}",
                        decl.name
                    ))
                    .with_code(ErrorCode::DUPLICATE_NAME)
                    .with_label(decl.span, "second definition here"));
                }
                program.types.insert(decl.name, decl.fields);
            }
            for decl in module.functions {
                if program.functions.contains_key(&decl.name) {
                    return Err(Diagnostic::error(format!(
                        "function already exists: {}",
                        decl.name
                    ))
                    .with_code(ErrorCode::DUPLICATE_NAME)
                    .with_label(decl.span, "second definition here"));
                }
                program.functions.insert(decl.name.clone(), decl);
            }
        }

        if !program.functions.contains_key("main") {
            return Err(Diagnostic::error(format!(
                "no main function defined in {}",
                entry
            ))
            .with_code(ErrorCode::NO_MAIN_FUNCTION));
        }

        Ok(program)
    }

    /// Lowers every loaded function into `generators`
    pub fn lower_all(&mut self) -> Result<()> {
        let mut out = Vec::new();
        for decl in self.functions.values() {
            lower_function(self, decl, &mut out)?;
        }
        self.generators = out;
        Ok(())
    }

    /// Finds a lowered generator by name
    pub fn generator(&self, name: &str) -> Option<&Generator> {
        self.generators.iter().find(|g| g.name == name)
    }
}
