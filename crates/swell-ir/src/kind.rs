//! Kind - the resolved type of a value
//!
//! A `Kind` is a family plus a borrow bit, a display label, and (for the
//! parameterized families) argument kinds. The label doubles as the
//! nominal tag: a struct resolves to a `Tuple`-family kind labeled with
//! the struct's name, so two structurally identical structs stay distinct.

use std::fmt;
use swell_error::{Diagnostic, ErrorCode, Result};

/// The families a value can belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    String,
    Stream,
    Clock,
    Tuple,
    Integer,
    Boolean,
    Array,
    FileSystem,
    Union,
    /// A name the resolver does not recognize; discriminated by label
    Custom,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::String => "String",
            Family::Stream => "Stream",
            Family::Clock => "Clock",
            Family::Tuple => "Tuple",
            Family::Integer => "Integer",
            Family::Boolean => "Boolean",
            Family::Array => "Array",
            Family::FileSystem => "FileSystem",
            Family::Union => "Union",
            Family::Custom => "Custom",
        }
    }

    /// Maps a built-in type name to its family
    pub fn builtin(name: &str) -> Option<Family> {
        Some(match name {
            "String" => Family::String,
            "Stream" => Family::Stream,
            "Clock" => Family::Clock,
            "Integer" => Family::Integer,
            "Boolean" => Family::Boolean,
            "FileSystem" => Family::FileSystem,
            _ => return None,
        })
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A fully resolved value type
#[derive(Debug, Clone, PartialEq)]
pub struct Kind {
    /// Borrowed values are used without being consumed
    pub borrowed: bool,
    pub family: Family,
    /// Argument kinds for Tuple / Union / Array (and struct tuples)
    pub args: Vec<Kind>,
    /// Display name; also the nominal discriminator
    pub label: String,
}

impl Kind {
    /// An owned kind of a plain family
    pub fn of(family: Family) -> Self {
        Self {
            borrowed: false,
            family,
            args: Vec::new(),
            label: family.as_str().to_string(),
        }
    }

    /// A borrowed kind of a plain family
    pub fn borrowed(family: Family) -> Self {
        Self {
            borrowed: true,
            ..Self::of(family)
        }
    }

    /// An anonymous tuple over the given component kinds
    pub fn tuple(args: Vec<Kind>) -> Self {
        Self {
            borrowed: false,
            family: Family::Tuple,
            args,
            label: "Tuple".to_string(),
        }
    }

    /// An owned array of `elem`
    pub fn array(elem: Kind) -> Self {
        Self {
            borrowed: false,
            family: Family::Array,
            args: vec![elem],
            label: "Array".to_string(),
        }
    }

    /// Integers and Booleans are plain machine words; they are copied, not
    /// tracked
    pub fn is_primitive(&self) -> bool {
        matches!(self.family, Family::Integer | Family::Boolean)
    }

    /// Whether the value must be deleted when it goes out of use
    pub fn needs_drop(&self) -> bool {
        !self.is_primitive() && !self.borrowed
    }

    /// Whether the compiler may insert the drop itself; everything else
    /// that needs a drop must be consumed explicitly
    pub fn implicitly_droppable(&self) -> bool {
        matches!(self.family, Family::String | Family::Array)
    }

    /// Kinds the runtime can synthesize as arguments to `main`
    pub fn valid_as_main_arg(&self) -> bool {
        matches!(
            self.family,
            Family::Clock | Family::Stream | Family::FileSystem
        )
    }

    /// Kinds the runtime can absorb as results of `main`
    pub fn valid_as_main_return(&self) -> bool {
        self.valid_as_main_arg()
    }

    /// Whether a value of this kind can be passed where `other` is
    /// expected: same family and label, and an owned slot never accepts a
    /// borrowed value.
    pub fn can_convert_to(&self, other: &Kind) -> Result<()> {
        if self.family != other.family || self.label != other.label {
            return Err(Diagnostic::error(format!(
                "type mismatch: expecting {}, got {}",
                other, self
            ))
            .with_code(ErrorCode::TYPE_MISMATCH));
        }
        if !other.borrowed && self.borrowed {
            return Err(Diagnostic::error(format!(
                "type mismatch: expecting owned {}, but got {}",
                other, self
            ))
            .with_code(ErrorCode::TYPE_MISMATCH));
        }
        Ok(())
    }

    /// Strict equality: family, label, borrow bit, and arguments pairwise
    pub fn is_equivalent(&self, other: &Kind) -> Result<()> {
        let mismatch = || {
            Diagnostic::error(format!("{} vs. {}", other, self)).with_code(ErrorCode::TYPE_MISMATCH)
        };

        if self.family != other.family
            || self.borrowed != other.borrowed
            || self.label != other.label
            || self.args.len() != other.args.len()
        {
            return Err(mismatch());
        }
        for (a, b) in self.args.iter().zip(&other.args) {
            if a.is_equivalent(b).is_err() {
                return Err(mismatch());
            }
        }
        Ok(())
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.borrowed {
            write!(f, "&")?;
        }
        write!(f, "{}", self.label)?;
        // Anonymous parameterized kinds spell out their arguments; nominal
        // tuples (structs) read as just their name.
        if !self.args.is_empty() && self.label == self.family.as_str() {
            write!(f, "[")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", arg)?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}
