//! Field-name extraction from opaque condition/action ASTs.
//!
//! This is the sole interface between the propagation core and the
//! surrounding rule parser: a tree of tagged records with string-keyed
//! children, represented as `serde_json::Value`. The walker recognizes a
//! small fixed set of type tags and silently traverses everything else, so
//! unknown constructs contribute no field names unless a recognized tag is
//! nested inside them.

use serde_json::Value as Ast;

/// Key holding a node's type tag.
const TAG_KEY: &str = "type";

/// Recognized tag: direct field read (`{ "type": "fieldAccess", "field": .. }`).
const TAG_FIELD_ACCESS: &str = "fieldAccess";
/// Recognized tag: binary operator with `left`/`right` children.
const TAG_BINARY_OP: &str = "binaryOp";
/// Recognized tag: comparison with `left`/`right` children.
const TAG_COMPARISON: &str = "comparison";
/// Recognized tag: update action; keys of `modifications` are written fields.
const TAG_UPDATE: &str = "updateWithModifications";
/// Recognized tag: fact creation; keys of `fields` are written fields.
const TAG_FACT_CREATION: &str = "factCreation";

/// Fields referenced by an alpha-node condition.
pub fn alpha_condition_fields(ast: &Ast) -> Vec<String> {
    extract(ast)
}

/// Fields referenced by a beta-node join condition.
///
/// Beta joins are treated symmetrically with alpha conditions: the walk
/// returns the set of fields used anywhere in the join expression.
pub fn beta_join_fields(ast: &Ast) -> Vec<String> {
    extract(ast)
}

/// Fields read or written by a rule action.
pub fn action_fields(ast: &Ast) -> Vec<String> {
    extract(ast)
}

fn extract(ast: &Ast) -> Vec<String> {
    let mut out = Vec::new();
    walk(ast, &mut out);
    out
}

fn push_unique(out: &mut Vec<String>, name: &str) {
    if !out.iter().any(|existing| existing == name) {
        out.push(name.to_string());
    }
}

fn walk(ast: &Ast, out: &mut Vec<String>) {
    match ast {
        Ast::Object(map) => {
            match map.get(TAG_KEY).and_then(Ast::as_str) {
                Some(TAG_FIELD_ACCESS) => {
                    if let Some(field) = map.get("field").and_then(Ast::as_str) {
                        push_unique(out, field);
                    }
                }
                Some(TAG_BINARY_OP) | Some(TAG_COMPARISON) => {
                    if let Some(left) = map.get("left") {
                        walk(left, out);
                    }
                    if let Some(right) = map.get("right") {
                        walk(right, out);
                    }
                }
                Some(TAG_UPDATE) => {
                    if let Some(Ast::Object(mods)) = map.get("modifications") {
                        for (name, value) in mods {
                            push_unique(out, name);
                            // Modification values may themselves read fields.
                            walk(value, out);
                        }
                    }
                }
                Some(TAG_FACT_CREATION) => {
                    if let Some(Ast::Object(fields)) = map.get("fields") {
                        for (name, value) in fields {
                            push_unique(out, name);
                            walk(value, out);
                        }
                    }
                }
                // Unknown or missing tag: traverse every child.
                _ => {
                    for value in map.values() {
                        walk(value, out);
                    }
                }
            }
        }
        Ast::Array(items) => {
            for item in items {
                walk(item, out);
            }
        }
        _ => {}
    }
}
