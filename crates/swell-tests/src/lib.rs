//! Integration tests for the Swell compiler
//!
//! Drives the complete pipeline - lexer, parser, loader, lowering, C
//! emission - through the same entry points the CLI uses.

use std::collections::BTreeMap;
use swell_error::{ErrorCode, Result, SourceCache};
use swell_ir::Program;

/// Builds the loader's source map from `(module_name, text)` pairs
fn source_map(sources: &[(&str, &str)]) -> BTreeMap<String, String> {
    sources
        .iter()
        .map(|(name, text)| (format!("{}.ht", name), text.to_string()))
        .collect()
}

/// Loads and lowers a module set; the first pair names the entry module
pub fn compile_ir(sources: &[(&str, &str)]) -> Result<Program> {
    let mut cache = SourceCache::new();
    let mut program = Program::load(sources[0].0, &source_map(sources), &mut cache)?;
    program.lower_all()?;
    Ok(program)
}

/// Compiles a module set all the way to the generated C files
pub fn compile_c(sources: &[(&str, &str)]) -> Result<BTreeMap<String, String>> {
    swell_codegen::compile(sources[0].0, &source_map(sources))
}

/// Asserts that a single-module program lowers without errors
pub fn assert_compiles(source: &str) -> Program {
    match compile_ir(&[("main", source)]) {
        Ok(program) => program,
        Err(diag) => panic!("expected program to compile, got: {}", diag),
    }
}

/// Asserts that a single-module program fails with the given error code
pub fn assert_fails_with(source: &str, code: ErrorCode) {
    match compile_ir(&[("main", source)]) {
        Ok(_) => panic!("expected compilation to fail with {}", code),
        Err(diag) => assert_eq!(
            diag.code,
            Some(code),
            "expected {}, got: {}",
            code,
            diag
        ),
    }
}

/// Asserts that the generated C for a single-module program contains the
/// given snippet
pub fn assert_c_contains(source: &str, expected: &str) {
    let files = match compile_c(&[("main", source)]) {
        Ok(files) => files,
        Err(diag) => panic!("expected program to compile, got: {}", diag),
    };
    let text = &files["main.c"];
    assert!(
        text.contains(expected),
        "expected generated C to contain {:?}, got:\n{}",
        expected,
        text
    );
}
