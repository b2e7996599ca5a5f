//! Type resolver - surface `TypeRep`s to `Kind`s
//!
//! `Union`, `Tuple` and `Array` resolve their arguments recursively. A
//! name registered as a struct expands to a `Tuple`-family kind over its
//! field kinds, labeled with the struct's name. Built-in names map to
//! their families; anything else becomes a `Custom` kind discriminated by
//! its label.

use crate::kind::{Family, Kind};
use std::collections::BTreeMap;
use swell_error::{Diagnostic, ErrorCode, Result};
use swell_parser::TypeRep;

/// The struct table: declared field types per struct name
pub type StructTable = BTreeMap<String, Vec<TypeRep>>;

pub fn resolve_type(structs: &StructTable, rep: &TypeRep) -> Result<Kind> {
    match rep.name.as_str() {
        name @ ("Union" | "Tuple" | "Array") => {
            if rep.args.is_empty() {
                return Err(Diagnostic::error(format!(
                    "type {} needs type arguments",
                    name
                ))
                .with_code(ErrorCode::UNKNOWN_TYPE)
                .with_label(rep.span, "bare parameterized type"));
            }
            if name == "Array" && rep.args.len() != 1 {
                return Err(Diagnostic::error(format!(
                    "Array takes exactly one type argument, got {}",
                    rep.args.len()
                ))
                .with_code(ErrorCode::TYPE_ARITY_MISMATCH)
                .with_label(rep.span, "in this type"));
            }
            let args = rep
                .args
                .iter()
                .map(|arg| resolve_type(structs, arg))
                .collect::<Result<Vec<_>>>()?;
            let family = match name {
                "Union" => Family::Union,
                "Tuple" => Family::Tuple,
                _ => Family::Array,
            };
            Ok(Kind {
                borrowed: rep.borrowed,
                family,
                args,
                label: name.to_string(),
            })
        }

        name if structs.contains_key(name) => {
            require_no_args(rep)?;
            let fields = structs[name]
                .iter()
                .map(|field| resolve_type(structs, field))
                .collect::<Result<Vec<_>>>()?;
            Ok(Kind {
                borrowed: rep.borrowed,
                family: Family::Tuple,
                args: fields,
                label: name.to_string(),
            })
        }

        name => {
            require_no_args(rep)?;
            let family = Family::builtin(name).unwrap_or(Family::Custom);
            Ok(Kind {
                borrowed: rep.borrowed,
                family,
                args: Vec::new(),
                label: name.to_string(),
            })
        }
    }
}

fn require_no_args(rep: &TypeRep) -> Result<()> {
    if rep.args.is_empty() {
        Ok(())
    } else {
        Err(Diagnostic::error(format!(
            "type {} does not take type arguments",
            rep.name
        ))
        .with_code(ErrorCode::TYPE_ARITY_MISMATCH)
        .with_label(rep.span, format!("{} arguments given", rep.args.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swell_error::Span;

    fn rep(name: &str) -> TypeRep {
        TypeRep {
            borrowed: false,
            name: name.to_string(),
            args: Vec::new(),
            span: Span::default(),
        }
    }

    fn rep_with(name: &str, args: Vec<TypeRep>) -> TypeRep {
        TypeRep {
            args,
            ..rep(name)
        }
    }

    #[test]
    fn builtins_resolve_to_their_families() {
        let structs = StructTable::new();
        let k = resolve_type(&structs, &rep("Clock")).unwrap();
        assert_eq!(k.family, Family::Clock);
        assert_eq!(k.label, "Clock");
        assert!(!k.borrowed);
    }

    #[test]
    fn borrow_flag_carries_over() {
        let structs = StructTable::new();
        let borrowed = TypeRep {
            borrowed: true,
            ..rep("Stream")
        };
        assert!(resolve_type(&structs, &borrowed).unwrap().borrowed);
    }

    #[test]
    fn unions_resolve_arguments_recursively() {
        let structs = StructTable::new();
        let k = resolve_type(
            &structs,
            &rep_with("Union", vec![rep("String"), rep("Integer")]),
        )
        .unwrap();
        assert_eq!(k.family, Family::Union);
        assert_eq!(k.args.len(), 2);
        assert_eq!(k.args[1].family, Family::Integer);
    }

    #[test]
    fn structs_expand_to_labeled_tuples() {
        let mut structs = StructTable::new();
        structs.insert("Point".to_string(), vec![rep("Integer"), rep("Integer")]);

        let k = resolve_type(&structs, &rep("Point")).unwrap();
        assert_eq!(k.family, Family::Tuple);
        assert_eq!(k.label, "Point");
        assert_eq!(k.args.len(), 2);
    }

    #[test]
    fn struct_names_reject_arguments() {
        let mut structs = StructTable::new();
        structs.insert("Point".to_string(), vec![rep("Integer")]);

        let err = resolve_type(&structs, &rep_with("Point", vec![rep("Integer")])).unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::TYPE_ARITY_MISMATCH));
    }

    #[test]
    fn unknown_names_become_custom() {
        let structs = StructTable::new();
        let k = resolve_type(&structs, &rep("Widget")).unwrap();
        assert_eq!(k.family, Family::Custom);
        assert_eq!(k.label, "Widget");
    }

    #[test]
    fn bare_parameterized_names_are_rejected() {
        let structs = StructTable::new();
        let err = resolve_type(&structs, &rep("Union")).unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::UNKNOWN_TYPE));

        let err = resolve_type(
            &structs,
            &rep_with("Array", vec![rep("Integer"), rep("Integer")]),
        )
        .unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::TYPE_ARITY_MISMATCH));
    }
}
