//! Class objects and instances.
//!
//! Grounded on `examples/original_source/src/types/class.cpp`:
//! `class_call_overloaded_operator` mangles an operator symbol into
//! `__op@<sym>` and looks it up as an ordinary method, which is why
//! [`mangle_operator`] exists instead of a separate operator-overload table;
//! `class_get_method` resolves overloads purely by argument count, falling
//! back to the first declared variation when nothing matches — this crate
//! deviates from that fallback (see `DESIGN.md`) and raises a
//! [`crate::error::ErrorKind::Syntax`] error instead;
//! `class_call_overloaded_descriptor` saves, resets, and restores
//! `vframe->state` around a descriptor call, which [`crate::frame::FrameState`]
//! models directly.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{Access, OperatorKind, SharedBody};
use crate::heap::Handle;

/// Mangles an operator symbol into the method name a class overloads it
/// under, e.g. `OperatorKind::Add` -> `"__op@+"`.
#[must_use]
pub fn mangle_operator(op: OperatorKind) -> String {
    format!("__op@{op}")
}

/// Descriptor method names (§4.F): hooks a class may define to customize
/// built-in behavior. Called with the instance's frame state saved, reset,
/// and restored around the call.
pub mod descriptors {
    pub const SIZE: &str = "__size";
    pub const TO_STRING: &str = "__to_string";
    pub const ATTRIBUTE: &str = "__attribute";
    pub const EXPIRE: &str = "__expire";
}

/// One declared overload of a method: a parameter-name list and a shared
/// body. Overloads of the same name are disambiguated solely by arity
/// (§4.F "Method resolution").
#[derive(Debug, Clone)]
pub struct MethodVariation {
    pub params: Vec<Rc<str>>,
    pub body: SharedBody,
}

/// A first-class script-level function (§4.C "Function"): a plain
/// `function name(params) { ... }` declaration, bound as an ordinary value
/// so it can be passed around, stored in a variable, or called through
/// `$expr` dynamic dispatch just like any other value.
#[derive(Debug, Clone)]
pub struct FunctionValue {
    pub name: Rc<str>,
    pub params: Vec<Rc<str>>,
    pub body: SharedBody,
}

/// A declared attribute's visibility and default-value expression,
/// evaluated fresh for every new instance (§4.F "Instantiation").
#[derive(Debug, Clone)]
pub struct AttributeDecl {
    pub access: Access,
    pub default: Option<SharedBody>,
}

/// A class declaration: name, attribute/method tables, and the classes it
/// inherits from. Shared by `Rc` so every instance and every subclass can
/// reference the same declaration without copying method bodies.
#[derive(Debug)]
pub struct ClassObject {
    /// Leaked once at class-declaration time so every [`ClassInstance`] can
    /// report its type name as `&'static str` without borrowing the
    /// registry (heap slots have no lifetime to borrow against).
    pub name: &'static str,
    pub parents: Vec<Rc<ClassObject>>,
    /// Insertion-ordered: the attribute table preserves declaration order.
    pub attributes: IndexMap<String, AttributeDecl>,
    pub methods: IndexMap<String, Vec<MethodVariation>>,
}

impl ClassObject {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self { name, parents: Vec::new(), attributes: IndexMap::new(), methods: IndexMap::new() }
    }

    /// Looks up a method overload by exact arity, searching this class then
    /// its parents depth-first in declaration order (§4.F "Inheritance
    /// searches parents in the order they were declared").
    #[must_use]
    pub fn find_method(&self, name: &str, arity: usize) -> Option<&MethodVariation> {
        if let Some(variations) = self.methods.get(name) {
            if let Some(found) = variations.iter().find(|v| v.params.len() == arity) {
                return Some(found);
            }
        }
        self.parents.iter().find_map(|parent| parent.find_method(name, arity))
    }

    /// Whether any overload of `name` is declared anywhere in the
    /// inheritance chain, regardless of arity — used to distinguish "no
    /// such method" from "wrong argument count" when raising errors.
    #[must_use]
    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name) || self.parents.iter().any(|parent| parent.has_method(name))
    }

    #[must_use]
    pub fn find_attribute(&self, name: &str) -> Option<&AttributeDecl> {
        self.attributes.get(name).or_else(|| self.parents.iter().find_map(|parent| parent.find_attribute(name)))
    }

    /// All attribute names in declaration order, own class first then
    /// parents, used to build a fresh instance's attribute table.
    fn collect_attributes<'a>(&'a self, out: &mut Vec<(&'a str, &'a AttributeDecl)>) {
        for (name, decl) in &self.attributes {
            if !out.iter().any(|(n, _)| *n == name) {
                out.push((name, decl));
            }
        }
        for parent in &self.parents {
            parent.collect_attributes(out);
        }
    }

    #[must_use]
    pub fn all_attributes(&self) -> Vec<(&str, &AttributeDecl)> {
        let mut out = Vec::new();
        self.collect_attributes(&mut out);
        out
    }
}

/// A class instance: a shared reference to its declaration plus an owned,
/// insertion-ordered attribute table holding this instance's own values
/// (§4.F "An instance owns a copy of every declared attribute").
#[derive(Debug, Clone)]
pub struct ClassInstance {
    pub class: Rc<ClassObject>,
    pub attributes: IndexMap<String, Handle>,
}

impl ClassInstance {
    #[must_use]
    pub fn class_name_static(&self) -> &'static str {
        self.class.name
    }

    #[must_use]
    pub fn estimated_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.attributes.len() * std::mem::size_of::<Handle>()
    }

    #[must_use]
    pub fn child_handles(&self) -> Vec<Handle> {
        self.attributes.values().copied().collect()
    }

    #[must_use]
    pub fn get_attribute(&self, name: &str) -> Option<Handle> {
        self.attributes.get(name).copied()
    }

    pub fn set_attribute(&mut self, name: &str, handle: Handle) {
        if let Some(slot) = self.attributes.get_mut(name) {
            *slot = handle;
        } else {
            self.attributes.insert(name.to_string(), handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leak(name: &str) -> &'static str {
        Box::leak(name.to_string().into_boxed_str())
    }

    #[test]
    fn mangles_operator_with_at_sign() {
        assert_eq!(mangle_operator(OperatorKind::Add), "__op@+");
        assert_eq!(mangle_operator(OperatorKind::IndexSet), "__op@[]<");
    }

    #[test]
    fn method_lookup_prefers_own_class_then_parents() {
        let mut parent = ClassObject::new(leak("Parent"));
        parent.methods.insert(
            "greet".to_string(),
            vec![MethodVariation { params: vec![], body: Rc::new(crate::ast::Node::new(crate::ast::NodeKind::Block, Default::default())) }],
        );
        let mut child = ClassObject::new(leak("Child"));
        child.parents.push(Rc::new(parent));

        assert!(child.find_method("greet", 0).is_some());
        assert!(child.find_method("greet", 1).is_none());
        assert!(child.has_method("greet"));
        assert!(!child.has_method("nope"));
    }

    #[test]
    fn attribute_lookup_walks_inheritance_chain() {
        let mut parent = ClassObject::new(leak("Parent"));
        parent.attributes.insert("x".to_string(), AttributeDecl { access: Access::Public, default: None });
        let mut child = ClassObject::new(leak("Child"));
        child.parents.push(Rc::new(parent));
        assert!(child.find_attribute("x").is_some());
        assert!(child.find_attribute("y").is_none());
    }
}
