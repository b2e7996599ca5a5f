//! swell-ir - the middle of the Swell compiler
//!
//! Resolves surface types into the `Kind` lattice, lowers each function
//! body into a register-based list of guarded statements under the unique
//! effect discipline, and bundles the result into a `Program` ready for
//! emission.

pub mod generator;
pub mod kind;
pub mod lower;
pub mod program;
pub mod resolve;
pub mod statement;

pub use generator::Generator;
pub use kind::{Family, Kind};
pub use program::Program;
pub use resolve::resolve_type;
pub use statement::{ChildCall, GarbageMap, Guard, Register, Statement};
