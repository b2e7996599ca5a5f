//! swell-codegen - code generation for the Swell compiler
//!
//! The only backend emits C: one header with the continuation state
//! records and one source file with the guarded statement bodies, driven
//! by the cooperative runtime shipped as static text in [`runtime`].
//!
//! # Example
//!
//! ```rust,ignore
//! use swell_codegen::compile;
//!
//! let files = compile("hello", &sources)?;
//! // files["hello.h"], files["hello.c"]
//! ```

pub mod c_backend;
pub mod runtime;

pub use c_backend::CBackend;

use std::collections::BTreeMap;
use swell_error::{Result, SourceCache};
use swell_ir::Program;

/// Trait for code generation backends
pub trait CodeGen {
    /// Backend output type
    type Output;

    /// Generates code for a lowered program; `entry` names the entry
    /// module (used for file names and includes)
    fn generate(&self, entry: &str, program: &Program) -> Self::Output;
}

/// Compiles a module set end to end: load, lower, emit.
///
/// Returns the two generated files keyed by name (`<entry>.h` and
/// `<entry>.c`). The runtime support sources are not part of the result;
/// see [`runtime::support_files`].
pub fn compile(
    entry: &str,
    sources: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let mut cache = SourceCache::new();
    compile_with_cache(entry, sources, &mut cache)
}

/// Like [`compile`], but registers sources with the caller's cache so
/// errors can be rendered with snippets
pub fn compile_with_cache(
    entry: &str,
    sources: &BTreeMap<String, String>,
    cache: &mut SourceCache,
) -> Result<BTreeMap<String, String>> {
    let mut program = Program::load(entry, sources, cache)?;
    program.lower_all()?;
    CBackend::new().generate(entry, &program)
}
