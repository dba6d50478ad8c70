//! The tree-walking evaluator: `exec` recurses directly over [`Node`] with
//! no intermediate bytecode, deliberately not porting `ouros`'s own
//! compile-to-bytecode design (`ouros::bytecode`/`ouros::prepare`). Every
//! recursive call returns `Ok(handle)` for a genuine value, or
//! `Err(HybrisError)` only for an internal failure the script cannot catch;
//! a script-level
//! exception instead sets [`crate::frame::FrameState::throwing`] on the
//! current frame and is propagated by every caller checking
//! [`crate::frame::FrameState::is_short_circuited`] after each recursive
//! call, the same pattern `class_call_overloaded_operator` in
//! `examples/original_source/src/types/class.cpp` uses to bubble an
//! exception up through nested calls to the VM root frame.
//!
//! # AST shape conventions
//!
//! [`Node`] is deliberately shape-free (no dedicated fields beyond
//! `literal`/`access`/`children`), so the handful of conventions below are
//! the contract between this module and any producer of the tree (this
//! workspace's `hybris-syntax`, or any other frontend):
//!
//! - `Function`/`Method`: `literal` carries the name; `children` are zero
//!   or more parameter `Identifier` leaves followed by exactly one `Block`.
//! - `Class`: `literal` carries the name; leading `Identifier` children
//!   name parent classes (extends-list), the remaining children are
//!   `Attribute`/`Method`/`ConstantDecl` members.
//! - `Attribute`/`ConstantDecl`: `literal` carries the name, `access` the
//!   visibility; an empty `children` means "defaults to nil", one child is
//!   the default-value expression.
//! - `Structure`: `literal` carries the name; children are field-name
//!   `Identifier` leaves.
//! - `New`: children are `[class_name: Identifier, arg*]`.
//! - `Call`: children are `[callee, arg*]`; `callee` is usually an
//!   `Identifier` (native or user function) but may be an `IdentifierChain`
//!   for a method call (`me->foo(1)`), whose last segment names the method
//!   and whose prefix evaluates to the receiver.
//! - `IdentifierChain`: children are `[root_expr, attr: Identifier, ...]`,
//!   one per `->` segment.
//! - `Assign`: children are `[target, value]`; `target` is an `Identifier`,
//!   an `IdentifierChain`, or a `BinaryOp(Index)` (`container[index] = value`).
//! - `BinaryOp(Index)`: children are `[container, index]` (read form).
//! - `Try`: children are `[block, Catch?, Finally?]` in that order (both
//!   optional, `Catch` before `Finally` when both present). `Catch`:
//!   `literal` carries the bound exception name, one `Block` child.
//!   `Finally`: one `Block` child.
//! - `Switch`: children are `[subject, Case*, Default?]`. `Case`: first
//!   child is the match-value expression, the rest are statements.
//!   `Default`: every child is a statement.
//! - `Foreach`: children are `[item: Identifier, iterable, Block]`.
//!   `ForeachMap`: children are `[key: Identifier, value: Identifier, map, Block]`.
//! - `For`: children are `[init, cond, step, Block]`.
//! - `While`: `[cond, Block]`. `DoWhile`: `[Block, cond]`.
//! - `If`: `[cond, then: Block]` or `[cond, then: Block, else: Block|If]`.
//! - `Return`/`Throw`: zero or one child expression.
//! - `Dollar`: one child expression, evaluated to a string and used as a
//!   dynamic identifier name (§4.E "Dollar").

use std::rc::Rc;

use crate::ast::{Literal, Node, NodeKind, OperatorKind, UnaryOperatorKind};
use crate::class::{mangle_operator, descriptors, AttributeDecl, ClassInstance, ClassObject, FunctionValue, MethodVariation};
use crate::error::HybrisError;
use crate::heap::{Handle, HeapData};
use crate::ops;
use crate::vm::Vm;

/// Most Hybris calls pass a handful of arguments; inlining up to 4 avoids a
/// heap allocation on the hot call path (§4.E "Call").
type ArgList = smallvec::SmallVec<[Handle; 4]>;

/// Top-level entry point: executes a parsed program (a `Block` of
/// statements) in the global frame and returns the value of its last
/// expression statement, if any.
pub fn run_program(vm: &mut Vm, program: &Node) -> Result<Handle, HybrisError> {
    exec(vm, program)
}

/// Executes one node and returns its value. For statement nodes with no
/// natural value (`While`, `If` with no matching branch, ...) the nil
/// handle is returned.
pub fn exec(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    match node.kind {
        NodeKind::IntegerLiteral => Ok(vm.heap.allocate(HeapData::Integer(expect_int_literal(node)))),
        NodeKind::FloatLiteral => Ok(vm.heap.allocate(HeapData::Float(expect_float_literal(node)))),
        NodeKind::CharLiteral => Ok(vm.heap.allocate(HeapData::Char(expect_char_literal(node)))),
        NodeKind::StringLiteral => eval_string_literal(vm, node),
        NodeKind::BooleanLiteral => Ok(vm.heap.allocate(HeapData::Boolean(expect_bool_literal(node)))),
        NodeKind::NilLiteral => Ok(nil(vm)),
        NodeKind::Identifier => lookup_identifier(vm, node.identifier_name(), node),

        NodeKind::BinaryOp(OperatorKind::And) => eval_short_circuit_and(vm, node),
        NodeKind::BinaryOp(OperatorKind::Or) => eval_short_circuit_or(vm, node),
        NodeKind::BinaryOp(OperatorKind::Index) => eval_index_get(vm, node),
        NodeKind::BinaryOp(op) => eval_binary(vm, op, node),
        NodeKind::UnaryOp(op) => eval_unary(vm, op, node),
        NodeKind::Ternary => eval_ternary(vm, node),
        NodeKind::Dot => eval_dot(vm, node),
        NodeKind::Dollar => eval_dollar(vm, node),
        NodeKind::Assign => eval_assign(vm, node),
        NodeKind::Call => eval_call(vm, node),
        NodeKind::New => eval_new(vm, node),
        NodeKind::IdentifierChain => eval_identifier_chain_read(vm, node),
        NodeKind::VectorLiteral => eval_vector_literal(vm, node),
        NodeKind::MapLiteral => eval_map_literal(vm, node),
        NodeKind::MapPair => unreachable!("MapPair is only ever visited by eval_map_literal"),

        NodeKind::Block => eval_block(vm, node),
        NodeKind::While => eval_while(vm, node),
        NodeKind::DoWhile => eval_do_while(vm, node),
        NodeKind::For => eval_for(vm, node),
        NodeKind::Foreach => eval_foreach(vm, node),
        NodeKind::ForeachMap => eval_foreach_map(vm, node),
        NodeKind::If => eval_if(vm, node),
        NodeKind::Switch => eval_switch(vm, node),
        NodeKind::Case | NodeKind::Default => unreachable!("Case/Default are only ever visited by eval_switch"),
        NodeKind::Break => {
            vm.current_frame().state.set_break();
            Ok(nil(vm))
        }
        NodeKind::Next => {
            vm.current_frame().state.set_continue();
            Ok(nil(vm))
        }
        NodeKind::Return => eval_return(vm, node),
        NodeKind::Throw => eval_throw(vm, node),
        NodeKind::Try => eval_try(vm, node),
        NodeKind::Catch | NodeKind::Finally => unreachable!("Catch/Finally are only ever visited by eval_try"),
        NodeKind::ExpressionStatement => exec(vm, &node.children[0]),

        NodeKind::Function => eval_function_decl(vm, node),
        NodeKind::Method => unreachable!("Method declarations are only ever visited by eval_class_decl"),
        NodeKind::Structure => eval_structure_decl(vm, node),
        NodeKind::Class => eval_class_decl(vm, node),
        NodeKind::Attribute => unreachable!("Attribute declarations are only ever visited by eval_class_decl"),
        NodeKind::ConstantDecl => eval_constant_decl(vm, node),
    }
}

fn nil(vm: &mut Vm) -> Handle {
    vm.heap.allocate(HeapData::Nil)
}

fn expect_int_literal(node: &Node) -> i64 {
    match &node.literal {
        Some(Literal::Integer(n)) => *n,
        _ => panic!("IntegerLiteral node missing its literal"),
    }
}

fn expect_float_literal(node: &Node) -> f64 {
    match &node.literal {
        Some(Literal::Float(f)) => *f,
        _ => panic!("FloatLiteral node missing its literal"),
    }
}

fn expect_char_literal(node: &Node) -> char {
    match &node.literal {
        Some(Literal::Char(c)) => *c,
        _ => panic!("CharLiteral node missing its literal"),
    }
}

fn expect_bool_literal(node: &Node) -> bool {
    match &node.literal {
        Some(Literal::Boolean(b)) => *b,
        _ => panic!("BooleanLiteral node missing its literal"),
    }
}

/// String literals carry `\n`/`\t`/`\\`/`\"` escapes and `$name`
/// interpolation performed at evaluation time, not at parse time (§3
/// "String").
fn eval_string_literal(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let raw = match &node.literal {
        Some(Literal::String(s)) => s.as_str(),
        _ => panic!("StringLiteral node missing its literal"),
    };
    let rendered = interpolate(vm, raw, node)?;
    Ok(vm.heap.allocate(HeapData::String(rendered)))
}

fn interpolate(vm: &mut Vm, raw: &str, node: &Node) -> Result<String, HybrisError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('\\') => out.push('\\'),
                Some('"') => out.push('"'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            },
            '$' if chars.peek().is_some_and(|c| c.is_alphabetic() || *c == '_') => {
                let mut name = String::new();
                while chars.peek().is_some_and(|c| c.is_alphanumeric() || *c == '_') {
                    name.push(chars.next().unwrap());
                }
                let value = lookup_identifier(vm, &name, node)?;
                out.push_str(&ops::to_display_string(&vm.heap, value));
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn lookup_identifier(vm: &mut Vm, name: &str, node: &Node) -> Result<Handle, HybrisError> {
    if let Some(handle) = vm.current_frame().get(name) {
        return Ok(handle);
    }
    if let Some(handle) = vm.globals.get(name) {
        return Ok(handle);
    }
    if let Some(handle) = vm.constants.get(name).copied() {
        return Ok(handle);
    }
    Ok(vm.raise(format!("undefined identifier {name}"), node.pos))
}

fn eval_short_circuit_and(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let lhs = exec(vm, &node.children[0])?;
    if propagated(vm) {
        return Ok(lhs);
    }
    if !ops::is_truthy(&vm.heap, lhs) {
        return Ok(vm.heap.allocate(HeapData::Boolean(false)));
    }
    let rhs = exec(vm, &node.children[1])?;
    if propagated(vm) {
        return Ok(rhs);
    }
    Ok(vm.heap.allocate(HeapData::Boolean(ops::is_truthy(&vm.heap, rhs))))
}

fn eval_short_circuit_or(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let lhs = exec(vm, &node.children[0])?;
    if propagated(vm) {
        return Ok(lhs);
    }
    if ops::is_truthy(&vm.heap, lhs) {
        return Ok(vm.heap.allocate(HeapData::Boolean(true)));
    }
    let rhs = exec(vm, &node.children[1])?;
    if propagated(vm) {
        return Ok(rhs);
    }
    Ok(vm.heap.allocate(HeapData::Boolean(ops::is_truthy(&vm.heap, rhs))))
}

/// Whether the current frame is mid-unwind (return/break/continue/throw),
/// in which case the caller must stop evaluating siblings and pass the
/// signal straight up (§4.D/§4.E).
fn propagated(vm: &mut Vm) -> bool {
    vm.current_frame().state.is_short_circuited()
}

fn eval_binary(vm: &mut Vm, op: OperatorKind, node: &Node) -> Result<Handle, HybrisError> {
    let lhs = exec(vm, &node.children[0])?;
    if propagated(vm) {
        return Ok(lhs);
    }
    let rhs = exec(vm, &node.children[1])?;
    if propagated(vm) {
        return Ok(rhs);
    }

    if let HeapData::Instance(_) = vm.heap.get(lhs) {
        if let Some(result) = try_overloaded_binary(vm, op, lhs, rhs, node)? {
            return Ok(result);
        }
    }

    ops::apply_binary(&mut vm.heap, op, lhs, rhs).or_else(|err| Ok(vm.raise(err.message, node.pos)))
}

/// Looks for a `__op@<sym>` overload on `lhs`'s class (§4.F) and calls it
/// with `rhs` as the sole argument if found.
fn try_overloaded_binary(
    vm: &mut Vm,
    op: OperatorKind,
    lhs: Handle,
    rhs: Handle,
    node: &Node,
) -> Result<Option<Handle>, HybrisError> {
    let method_name = mangle_operator(op);
    let class = match vm.heap.get(lhs) {
        HeapData::Instance(instance) => Rc::clone(&instance.class),
        _ => return Ok(None),
    };
    if class.find_method(&method_name, 1).is_none() {
        return Ok(None);
    }
    call_method_by_name(vm, lhs, &method_name, &[rhs], node).map(Some)
}

fn eval_unary(vm: &mut Vm, op: UnaryOperatorKind, node: &Node) -> Result<Handle, HybrisError> {
    let operand = exec(vm, &node.children[0])?;
    if propagated(vm) {
        return Ok(operand);
    }

    if matches!(op, UnaryOperatorKind::PreIncrement | UnaryOperatorKind::PreDecrement) {
        let updated = ops::apply_unary(&mut vm.heap, op, operand).or_else(|err| Ok::<_, HybrisError>(vm.raise(err.message, node.pos)))?;
        if node.children[0].kind == NodeKind::Identifier {
            rebind_identifier(vm, node.children[0].identifier_name(), updated);
        }
        return Ok(updated);
    }

    ops::apply_unary(&mut vm.heap, op, operand).or_else(|err| Ok(vm.raise(err.message, node.pos)))
}

/// Rebinds `name` in the innermost scope it is already visible in (current
/// frame, falling back to globals), or declares it fresh in the current
/// frame if it isn't bound anywhere yet (§4.D "assignment to an
/// undeclared name declares it in the current frame").
fn rebind_identifier(vm: &mut Vm, name: &str, handle: Handle) {
    let in_current = vm.current_frame().contains(name);
    let in_globals = !in_current && vm.globals.contains(name) && vm.call_depth() > 0;
    if in_globals {
        vm.globals.bind(&mut vm.heap, Rc::from(name), handle);
    } else {
        vm.current_frame().bind(&mut vm.heap, Rc::from(name), handle);
    }
}

fn eval_ternary(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let cond = exec(vm, &node.children[0])?;
    if propagated(vm) {
        return Ok(cond);
    }
    if ops::is_truthy(&vm.heap, cond) {
        exec(vm, &node.children[1])
    } else {
        exec(vm, &node.children[2])
    }
}

/// `a.b` (§4.E "Dot"): unconditional string concatenation of both operands.
fn eval_dot(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let lhs = exec(vm, &node.children[0])?;
    if propagated(vm) {
        return Ok(lhs);
    }
    let rhs = exec(vm, &node.children[1])?;
    if propagated(vm) {
        return Ok(rhs);
    }
    Ok(ops::apply_dot(&mut vm.heap, lhs, rhs))
}

/// `$expr` (§4.E "Dollar"): evaluates `expr` to a string and looks that
/// name up as an identifier, enabling dynamic variable references.
fn eval_dollar(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let name_value = exec(vm, &node.children[0])?;
    if propagated(vm) {
        return Ok(name_value);
    }
    let name = ops::to_display_string(&vm.heap, name_value);
    lookup_identifier(vm, &name, node)
}

fn eval_index_get(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let container = exec(vm, &node.children[0])?;
    if propagated(vm) {
        return Ok(container);
    }
    let index = exec(vm, &node.children[1])?;
    if propagated(vm) {
        return Ok(index);
    }

    match vm.heap.get(container).clone() {
        HeapData::Vector(items) => {
            let Some(i) = as_index(&vm.heap, index, items.len()) else {
                return Ok(vm.raise("vector index out of range", node.pos));
            };
            Ok(items[i])
        }
        HeapData::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let Some(i) = as_index(&vm.heap, index, chars.len()) else {
                return Ok(vm.raise("string index out of range", node.pos));
            };
            Ok(vm.heap.allocate(HeapData::Char(chars[i])))
        }
        HeapData::Map(pairs) => {
            match pairs.iter().find(|(k, _)| ops::values_equal(&vm.heap, *k, index)) {
                Some((_, v)) => Ok(*v),
                None => Ok(vm.raise("key not found in map", node.pos)),
            }
        }
        HeapData::Instance(instance) => {
            let class = Rc::clone(&instance.class);
            if class.find_method(&mangle_operator(OperatorKind::Index), 1).is_some() {
                call_method_by_name(vm, container, &mangle_operator(OperatorKind::Index), &[index], node)
            } else {
                Ok(vm.raise(format!("class '{}' does not support indexing", class.name), node.pos))
            }
        }
        other => Ok(vm.raise(format!("value of type '{}' is not indexable", other.type_name()), node.pos)),
    }
}

fn as_index(heap: &crate::heap::Heap, handle: Handle, len: usize) -> Option<usize> {
    let HeapData::Integer(n) = heap.get(handle) else { return None };
    let n = *n;
    let resolved = if n < 0 { len as i64 + n } else { n };
    usize::try_from(resolved).ok().filter(|i| *i < len)
}

fn eval_assign(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let target = &node.children[0];
    let value = exec(vm, &node.children[1])?;
    if propagated(vm) {
        return Ok(value);
    }

    match target.kind {
        NodeKind::Identifier => {
            rebind_identifier(vm, target.identifier_name(), value);
            Ok(value)
        }
        NodeKind::IdentifierChain => assign_identifier_chain(vm, target, value),
        NodeKind::BinaryOp(OperatorKind::Index) => assign_index(vm, target, value),
        _ => Ok(vm.raise("invalid assignment target", node.pos)),
    }
}

fn assign_index(vm: &mut Vm, target: &Node, value: Handle) -> Result<Handle, HybrisError> {
    let container = exec(vm, &target.children[0])?;
    if propagated(vm) {
        return Ok(container);
    }
    let index = exec(vm, &target.children[1])?;
    if propagated(vm) {
        return Ok(index);
    }

    match vm.heap.get(container).clone() {
        HeapData::Vector(mut items) => {
            let HeapData::Integer(n) = vm.heap.get(index) else {
                return Ok(vm.raise("vector index must be an integer", target.pos));
            };
            let n = *n;
            if n < 0 {
                return Ok(vm.raise("vector index out of range", target.pos));
            }
            let i = n as usize;
            if i < items.len() {
                vm.heap.dec_ref(items[i]);
                items[i] = value;
            } else if i == items.len() {
                items.push(value);
            } else {
                return Ok(vm.raise("vector index out of range", target.pos));
            }
            vm.heap.inc_ref(value);
            *vm.heap.get_mut(container) = HeapData::Vector(items);
            Ok(value)
        }
        HeapData::Map(mut pairs) => {
            if let Some(slot) = pairs.iter_mut().find(|(k, _)| ops::values_equal(&vm.heap, *k, index)) {
                vm.heap.dec_ref(slot.1);
                slot.1 = value;
            } else {
                vm.heap.inc_ref(index);
                pairs.push((index, value));
            }
            vm.heap.inc_ref(value);
            *vm.heap.get_mut(container) = HeapData::Map(pairs);
            Ok(value)
        }
        HeapData::Instance(instance) => {
            let class = Rc::clone(&instance.class);
            let method = mangle_operator(OperatorKind::IndexSet);
            if class.find_method(&method, 2).is_some() {
                call_method_by_name(vm, container, &method, &[index, value], target)
            } else {
                Ok(vm.raise(format!("class '{}' does not support index assignment", class.name), target.pos))
            }
        }
        other => Ok(vm.raise(format!("value of type '{}' does not support index assignment", other.type_name()), target.pos)),
    }
}

fn assign_identifier_chain(vm: &mut Vm, target: &Node, value: Handle) -> Result<Handle, HybrisError> {
    let (receiver, last_name) = match resolve_chain_receiver(vm, target)? {
        Ok(pair) => pair,
        Err(short_circuited) => return Ok(short_circuited),
    };
    match vm.heap.get(receiver).clone() {
        HeapData::Instance(instance) => {
            if let Some(old) = instance.get_attribute(&last_name) {
                vm.heap.dec_ref(old);
                vm.heap.inc_ref(value);
                let mut instance = instance;
                instance.set_attribute(&last_name, value);
                *vm.heap.get_mut(receiver) = HeapData::Instance(instance);
                return Ok(value);
            }
            // §4.F "Descriptors": an undeclared attribute does not get
            // silently created — `__attribute(name, value)` is the
            // "dynamic attribute get and set fallback" (grounded on
            // `class_set_attribute_reference` in
            // `examples/original_source/src/types/class.cpp`, which calls
            // the descriptor instead of inserting a new attribute slot).
            let class = std::rc::Rc::clone(&instance.class);
            if class.find_method(descriptors::ATTRIBUTE, 2).is_some() {
                let name_handle = vm.heap.allocate(HeapData::String(last_name));
                return call_method_by_name(vm, receiver, descriptors::ATTRIBUTE, &[name_handle, value], target);
            }
            Ok(vm.raise(format!("class '{}' has no attribute '{last_name}'", class.name), target.pos))
        }
        HeapData::Structure { template, mut fields } => {
            if !fields.contains_key(&last_name) {
                return Ok(vm.raise(format!("structure '{template}' has no field '{last_name}'"), target.pos));
            }
            if let Some(old) = fields.insert(last_name, value) {
                vm.heap.dec_ref(old);
            }
            vm.heap.inc_ref(value);
            *vm.heap.get_mut(receiver) = HeapData::Structure { template, fields };
            Ok(value)
        }
        _ => Ok(vm.raise("left-hand side of '->' is not a class instance or structure", target.pos)),
    }
}

/// Walks an `IdentifierChain`'s segments up to (but not including) the
/// last one, returning the receiver instance the last segment applies to,
/// plus the last segment's name. Returns `Err(handle)` if evaluation
/// short-circuited partway through.
fn resolve_chain_receiver(vm: &mut Vm, node: &Node) -> Result<Result<(Handle, String), Handle>, HybrisError> {
    let mut current = exec(vm, &node.children[0])?;
    if propagated(vm) {
        return Ok(Err(current));
    }
    let segments = &node.children[1..];
    for segment in &segments[..segments.len() - 1] {
        current = get_attribute_or_raise(vm, current, segment.identifier_name(), segment.pos)?;
        if propagated(vm) {
            return Ok(Err(current));
        }
    }
    Ok(Ok((current, segments[segments.len() - 1].identifier_name().to_string())))
}

fn eval_identifier_chain_read(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let mut current = exec(vm, &node.children[0])?;
    if propagated(vm) {
        return Ok(current);
    }
    for segment in &node.children[1..] {
        current = get_attribute_or_raise(vm, current, segment.identifier_name(), segment.pos)?;
        if propagated(vm) {
            return Ok(current);
        }
    }
    Ok(current)
}

fn get_attribute_or_raise(vm: &mut Vm, receiver: Handle, name: &str, pos: crate::ast::SourcePos) -> Result<Handle, HybrisError> {
    let instance = match vm.heap.get(receiver).clone() {
        HeapData::Instance(instance) => instance,
        HeapData::Structure { template, fields } => {
            return match fields.get(name) {
                Some(value) => Ok(*value),
                None => Ok(vm.raise(format!("structure '{template}' has no field '{name}'"), pos)),
            };
        }
        _ => return Ok(vm.raise("left-hand side of '->' is not a class instance or structure", pos)),
    };
    if let Some(value) = instance.get_attribute(name) {
        return Ok(value);
    }
    let class = Rc::clone(&instance.class);
    if class.find_method(descriptors::ATTRIBUTE, 1).is_some() {
        let name_handle = vm.heap.allocate(HeapData::String(name.to_string()));
        let node = Node::new(NodeKind::Identifier, pos);
        return call_method_by_name(vm, receiver, descriptors::ATTRIBUTE, &[name_handle], &node);
    }
    Ok(vm.raise(format!("class '{}' has no attribute '{name}'", class.name), pos))
}

fn eval_vector_literal(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let mut items = Vec::with_capacity(node.children.len());
    for child in &node.children {
        let value = exec(vm, child)?;
        if propagated(vm) {
            return Ok(value);
        }
        vm.heap.inc_ref(value);
        items.push(value);
    }
    Ok(vm.heap.allocate(HeapData::Vector(items)))
}

fn eval_map_literal(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let mut pairs = Vec::with_capacity(node.children.len());
    for pair_node in &node.children {
        let key = exec(vm, &pair_node.children[0])?;
        if propagated(vm) {
            return Ok(key);
        }
        let value = exec(vm, &pair_node.children[1])?;
        if propagated(vm) {
            return Ok(value);
        }
        vm.heap.inc_ref(key);
        vm.heap.inc_ref(value);
        pairs.push((key, value));
    }
    Ok(vm.heap.allocate(HeapData::Map(pairs)))
}

fn eval_block(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let mut last = nil(vm);
    for stmt in &node.children {
        last = exec(vm, stmt)?;
        if propagated(vm) {
            return Ok(last);
        }
        vm.maybe_collect();
    }
    Ok(last)
}

fn eval_while(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    loop {
        let cond = exec(vm, &node.children[0])?;
        if propagated(vm) {
            return Ok(cond);
        }
        if !ops::is_truthy(&vm.heap, cond) {
            break;
        }
        let result = exec(vm, &node.children[1])?;
        if vm.current_frame().state.breaking {
            vm.current_frame().state.clear_break();
            break;
        }
        if vm.current_frame().state.continuing {
            vm.current_frame().state.clear_continue();
        }
        if vm.current_frame().state.returning || vm.current_frame().state.throwing {
            return Ok(result);
        }
    }
    Ok(nil(vm))
}

fn eval_do_while(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    loop {
        let result = exec(vm, &node.children[0])?;
        if vm.current_frame().state.breaking {
            vm.current_frame().state.clear_break();
            break;
        }
        if vm.current_frame().state.continuing {
            vm.current_frame().state.clear_continue();
        }
        if vm.current_frame().state.returning || vm.current_frame().state.throwing {
            return Ok(result);
        }
        let cond = exec(vm, &node.children[1])?;
        if propagated(vm) {
            return Ok(cond);
        }
        if !ops::is_truthy(&vm.heap, cond) {
            break;
        }
    }
    Ok(nil(vm))
}

fn eval_for(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let init = exec(vm, &node.children[0])?;
    if propagated(vm) {
        return Ok(init);
    }
    loop {
        let cond = exec(vm, &node.children[1])?;
        if propagated(vm) {
            return Ok(cond);
        }
        if !ops::is_truthy(&vm.heap, cond) {
            break;
        }
        let result = exec(vm, &node.children[3])?;
        if vm.current_frame().state.breaking {
            vm.current_frame().state.clear_break();
            break;
        }
        if vm.current_frame().state.continuing {
            vm.current_frame().state.clear_continue();
        }
        if vm.current_frame().state.returning || vm.current_frame().state.throwing {
            return Ok(result);
        }
        let step = exec(vm, &node.children[2])?;
        if propagated(vm) {
            return Ok(step);
        }
    }
    Ok(nil(vm))
}

fn eval_foreach(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let item_name = node.children[0].identifier_name().to_string();
    let iterable = exec(vm, &node.children[1])?;
    if propagated(vm) {
        return Ok(iterable);
    }
    // Snapshot at loop start: mutating the source vector from inside the
    // body must not perturb which elements are visited.
    let items = match vm.heap.get(iterable) {
        HeapData::Vector(items) => items.clone(),
        other => return Ok(vm.raise(format!("cannot iterate over '{}'", other.type_name()), node.pos)),
    };
    for item in items {
        rebind_identifier(vm, &item_name, item);
        let result = exec(vm, &node.children[2])?;
        if vm.current_frame().state.breaking {
            vm.current_frame().state.clear_break();
            break;
        }
        if vm.current_frame().state.continuing {
            vm.current_frame().state.clear_continue();
        }
        if vm.current_frame().state.returning || vm.current_frame().state.throwing {
            return Ok(result);
        }
    }
    Ok(nil(vm))
}

fn eval_foreach_map(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let key_name = node.children[0].identifier_name().to_string();
    let value_name = node.children[1].identifier_name().to_string();
    let iterable = exec(vm, &node.children[2])?;
    if propagated(vm) {
        return Ok(iterable);
    }
    // Snapshot-at-start semantics: iterates the pairs present when the loop
    // began, even if the body inserts into or removes from the same map.
    let pairs = match vm.heap.get(iterable) {
        HeapData::Map(pairs) => pairs.clone(),
        other => return Ok(vm.raise(format!("cannot iterate over '{}' as a map", other.type_name()), node.pos)),
    };
    for (key, value) in pairs {
        rebind_identifier(vm, &key_name, key);
        rebind_identifier(vm, &value_name, value);
        let result = exec(vm, &node.children[3])?;
        if vm.current_frame().state.breaking {
            vm.current_frame().state.clear_break();
            break;
        }
        if vm.current_frame().state.continuing {
            vm.current_frame().state.clear_continue();
        }
        if vm.current_frame().state.returning || vm.current_frame().state.throwing {
            return Ok(result);
        }
    }
    Ok(nil(vm))
}

fn eval_if(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let cond = exec(vm, &node.children[0])?;
    if propagated(vm) {
        return Ok(cond);
    }
    if ops::is_truthy(&vm.heap, cond) {
        exec(vm, &node.children[1])
    } else if node.children.len() > 2 {
        exec(vm, &node.children[2])
    } else {
        Ok(nil(vm))
    }
}

fn eval_switch(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let subject = exec(vm, &node.children[0])?;
    if propagated(vm) {
        return Ok(subject);
    }

    let mut matched_default = None;
    for arm in &node.children[1..] {
        match arm.kind {
            NodeKind::Case => {
                let case_value = exec(vm, &arm.children[0])?;
                if propagated(vm) {
                    return Ok(case_value);
                }
                if ops::values_equal(&vm.heap, subject, case_value) {
                    return run_switch_arm(vm, &arm.children[1..]);
                }
            }
            NodeKind::Default => matched_default = Some(&arm.children[..]),
            _ => unreachable!("Switch children are always Case or Default"),
        }
    }
    if let Some(stmts) = matched_default {
        return run_switch_arm(vm, stmts);
    }
    Ok(nil(vm))
}

fn run_switch_arm(vm: &mut Vm, stmts: &[Node]) -> Result<Handle, HybrisError> {
    let mut last = nil(vm);
    for stmt in stmts {
        last = exec(vm, stmt)?;
        if propagated(vm) {
            break;
        }
    }
    if vm.current_frame().state.breaking {
        vm.current_frame().state.clear_break();
    }
    Ok(last)
}

fn eval_return(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let value = if node.children.is_empty() { nil(vm) } else { exec(vm, &node.children[0])? };
    if propagated(vm) {
        return Ok(value);
    }
    vm.current_frame().state.set_return(value);
    Ok(value)
}

fn eval_throw(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let value = exec(vm, &node.children[0])?;
    if propagated(vm) {
        return Ok(value);
    }
    vm.current_frame().state.set_throw(value);
    Ok(value)
}

fn eval_try(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    // §4.H/§7: every error path inside a `try` is catchable — a Rust `Err`
    // raised anywhere in the body, the handler, or the `finally` block is
    // laundered into frame-state `throwing` (`vm.raise`) rather than
    // unwinding past this function via `?`, or `catch` would never fire.
    let mut result = exec(vm, &node.children[0]).or_else(|err| Ok(vm.raise(err.message, node.pos)))?;

    let catch_node = node.children[1..].iter().find(|c| c.kind == NodeKind::Catch);
    let finally_node = node.children[1..].iter().find(|c| c.kind == NodeKind::Finally);

    if vm.current_frame().state.throwing {
        if let Some(catch_node) = catch_node {
            let exception = vm.current_frame().state.clear_throw().unwrap_or_else(|| nil(vm));
            rebind_identifier(vm, catch_node.identifier_name(), exception);
            result = exec(vm, &catch_node.children[0]).or_else(|err| Ok(vm.raise(err.message, node.pos)))?;
        }
    }

    if let Some(finally_node) = finally_node {
        // §4.E "Try/finally": finally always runs, even mid-unwind; any
        // control-flow it starts (its own return/throw) takes precedence.
        let saved = vm.current_frame().save_and_reset_state();
        let finally_result = exec(vm, &finally_node.children[0]).or_else(|err| Ok(vm.raise(err.message, node.pos)))?;
        if vm.current_frame().state.is_short_circuited() {
            return Ok(finally_result);
        }
        vm.current_frame().restore_state(saved);
    }

    Ok(result)
}

fn eval_function_decl(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let name: Rc<str> = Rc::from(node.identifier_name());
    let params: Vec<Rc<str>> = node.children[..node.children.len() - 1]
        .iter()
        .map(|p| Rc::from(p.identifier_name()))
        .collect();
    let body = Rc::new(node.children.last().expect("Function node missing body block").clone());
    let function = FunctionValue { name: Rc::clone(&name), params, body };
    let handle = vm.heap.allocate(HeapData::Function(function));
    vm.globals.bind(&mut vm.heap, name, handle);
    Ok(handle)
}

fn eval_structure_decl(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let name = node.identifier_name().to_string();
    let field_order = node.children.iter().map(|f| f.identifier_name().to_string()).collect();
    vm.structures.insert(name, crate::vm::StructureTemplate { field_order });
    Ok(nil(vm))
}

fn eval_class_decl(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let name: &'static str = Box::leak(node.identifier_name().to_string().into_boxed_str());
    let first_member = node.children.iter().position(|c| c.kind != NodeKind::Identifier).unwrap_or(node.children.len());
    let parent_names = &node.children[..first_member];
    let members = &node.children[first_member..];

    let mut class = ClassObject::new(name);
    for parent_name in parent_names {
        match vm.classes.get(parent_name.identifier_name()) {
            Some(parent) => class.parents.push(Rc::clone(parent)),
            None => return Ok(vm.raise(format!("unknown parent class '{}'", parent_name.identifier_name()), node.pos)),
        }
    }

    for member in members {
        match member.kind {
            NodeKind::Attribute | NodeKind::ConstantDecl => {
                let default = member.children.first().map(|expr| Rc::new(expr.clone()));
                class.attributes.insert(member.identifier_name().to_string(), AttributeDecl { access: member.access, default });
            }
            NodeKind::Method => {
                let params: Vec<Rc<str>> = member.children[..member.children.len() - 1]
                    .iter()
                    .map(|p| Rc::from(p.identifier_name()))
                    .collect();
                let body = Rc::new(member.children.last().expect("Method node missing body block").clone());
                class.methods.entry(member.identifier_name().to_string()).or_default().push(MethodVariation { params, body });
            }
            _ => return Ok(vm.raise("unexpected node inside class body", member.pos)),
        }
    }

    vm.classes.insert(name.to_string(), Rc::new(class));
    Ok(nil(vm))
}

fn eval_constant_decl(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let value = exec(vm, &node.children[0])?;
    if propagated(vm) {
        return Ok(value);
    }
    vm.heap.inc_ref(value);
    vm.constants.insert(node.identifier_name().to_string(), value);
    Ok(value)
}

fn eval_new(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let class_name = node.children[0].identifier_name();
    let Some(class) = vm.classes.get(class_name).cloned() else {
        if vm.structures.contains_key(class_name) {
            return eval_new_structure(vm, class_name, node);
        }
        return Ok(vm.raise(format!("unknown class '{class_name}'"), node.pos));
    };

    let mut args = ArgList::with_capacity(node.children.len() - 1);
    for arg_node in &node.children[1..] {
        let value = exec(vm, arg_node)?;
        if propagated(vm) {
            return Ok(value);
        }
        args.push(value);
    }

    let mut attributes = indexmap::IndexMap::new();
    for (attr_name, decl) in class.all_attributes() {
        let value = match &decl.default {
            Some(default_expr) => {
                let value = exec(vm, default_expr)?;
                if propagated(vm) {
                    return Ok(value);
                }
                value
            }
            None => nil(vm),
        };
        vm.heap.inc_ref(value);
        attributes.insert(attr_name.to_string(), value);
    }

    let instance = ClassInstance { class: Rc::clone(&class), attributes };
    let handle = vm.heap.allocate(HeapData::Instance(instance));

    // `class.has_method`, not `find_method(..., args.len()).is_some()`: a
    // class with no constructor at all is constructed with just its
    // declared-attribute defaults, but a class that *does* declare a
    // constructor and is called with the wrong argument count must raise
    // the same `Syntax("no matching overload...")` error every other call
    // site gets (Open Question 1) rather than silently skipping the
    // constructor and returning a half-initialized instance.
    if class.has_method(class.name) {
        call_method_by_name(vm, handle, class.name, &args, node)?;
        if vm.current_frame().state.throwing {
            return Ok(vm.current_frame().state.thrown_value.unwrap_or(handle));
        }
    }

    Ok(handle)
}

/// `new StructName(args...)` — the grammar's `new` production covers both
/// classes and structures (`examples/original_source/src/parser.y.cpp`'s
/// "structure or class creation" comment). A structure has no constructor
/// method, so constructor arguments bind positionally to the declared field
/// order; any field past the argument count is left `nil`.
fn eval_new_structure(vm: &mut Vm, struct_name: &str, node: &Node) -> Result<Handle, HybrisError> {
    let field_order = vm.structures[struct_name].field_order.clone();

    let mut args = ArgList::with_capacity(node.children.len() - 1);
    for arg_node in &node.children[1..] {
        let value = exec(vm, arg_node)?;
        if propagated(vm) {
            return Ok(value);
        }
        args.push(value);
    }

    let mut fields = indexmap::IndexMap::new();
    for (i, field_name) in field_order.into_iter().enumerate() {
        let value = args.get(i).copied().unwrap_or_else(|| nil(vm));
        vm.heap.inc_ref(value);
        fields.insert(field_name, value);
    }

    Ok(vm.heap.allocate(HeapData::Structure { template: struct_name.to_string(), fields }))
}

fn eval_call(vm: &mut Vm, node: &Node) -> Result<Handle, HybrisError> {
    let callee = &node.children[0];

    // The callee (and, for a method call, its receiver chain) evaluates
    // before any argument (§4.E "left-to-right evaluation order").
    let dispatch = match callee.kind {
        NodeKind::IdentifierChain => match resolve_chain_receiver(vm, callee)? {
            Ok((receiver, method_name)) => Dispatch::Method(receiver, method_name),
            Err(short_circuited) => return Ok(short_circuited),
        },
        NodeKind::Identifier if vm.natives.contains_key(callee.identifier_name()) => {
            Dispatch::Native(callee.identifier_name().to_string())
        }
        NodeKind::Identifier => {
            let value = lookup_identifier(vm, callee.identifier_name(), node)?;
            if propagated(vm) {
                return Ok(value);
            }
            Dispatch::Value(value)
        }
        _ => {
            let value = exec(vm, callee)?;
            if propagated(vm) {
                return Ok(value);
            }
            Dispatch::Value(value)
        }
    };

    let mut args = ArgList::with_capacity(node.children.len() - 1);
    for arg_node in &node.children[1..] {
        let value = exec(vm, arg_node)?;
        if propagated(vm) {
            return Ok(value);
        }
        args.push(value);
    }

    match dispatch {
        Dispatch::Method(receiver, method_name) => call_method_by_name(vm, receiver, &method_name, &args, node),
        Dispatch::Native(name) => call_native(vm, &name, &args, node),
        Dispatch::Value(value) => call_function_value(vm, value, &args, node),
    }
}

enum Dispatch {
    Method(Handle, String),
    Native(String),
    Value(Handle),
}

fn call_native(vm: &mut Vm, name: &str, args: &[Handle], node: &Node) -> Result<Handle, HybrisError> {
    // Native functions are stored behind `Box<dyn Fn>`, which cannot be
    // borrowed from `vm.natives` at the same time `vm` is passed in
    // mutably; `Rc`-free removal-and-reinsert keeps this module free of
    // unsafe code at the cost of one map lookup.
    let Some(function) = vm.natives.remove(name) else {
        return Ok(vm.raise(format!("'{name}' is not a native function"), node.pos));
    };
    // §4.G "must raise typed errors through the host error path": a native
    // function's `Err` is laundered into frame-state `throwing` the same
    // way script-raised errors are, so `try/catch` around a native call
    // behaves identically to `try/catch` around a script function call.
    let result = function(vm, args).or_else(|err| Ok(vm.raise(err.message, node.pos)));
    vm.natives.insert(name.to_string(), function);
    result
}

fn call_function_value(vm: &mut Vm, function_value: Handle, args: &[Handle], node: &Node) -> Result<Handle, HybrisError> {
    let HeapData::Function(function) = vm.heap.get(function_value).clone() else {
        return Ok(vm.raise("value is not callable", node.pos));
    };
    if function.params.len() != args.len() {
        return Ok(vm.raise(HybrisError::arity_mismatch(&function.name, function.params.len(), args.len()).message, node.pos));
    }
    invoke(vm, &function.name, &function.params, &function.body, args, node.pos)
}

/// Public entry point used by native functions that need to invoke a
/// class's descriptor hook (`__to_string`, `__size`, ...) from outside the
/// evaluator, e.g. the `to_string()` builtin in `crate::extern_abi`.
pub fn call_descriptor(vm: &mut Vm, receiver: Handle, name: &str, args: &[Handle], node: &Node) -> Result<Handle, HybrisError> {
    call_method_by_name(vm, receiver, name, args, node)
}

/// Resolves and calls a method on a class instance by exact-arity overload
/// match (§4.F "Method resolution"), binding `me` to the receiver.
fn call_method_by_name(vm: &mut Vm, receiver: Handle, method_name: &str, args: &[Handle], node: &Node) -> Result<Handle, HybrisError> {
    let HeapData::Instance(instance) = vm.heap.get(receiver).clone() else {
        return Ok(vm.raise("method call target is not a class instance", node.pos));
    };
    let class = instance.class;
    let Some(variation) = class.find_method(method_name, args.len()).cloned() else {
        return if class.has_method(method_name) {
            Ok(vm.raise(HybrisError::no_such_method(class.name, method_name, args.len()).message, node.pos))
        } else {
            Ok(vm.raise(format!("class '{}' has no method '{method_name}'", class.name), node.pos))
        };
    };

    vm.push_frame(method_name, node.pos);
    vm.heap.inc_ref(receiver);
    vm.current_frame().bind(&mut vm.heap, Rc::from("me"), receiver);
    for (param, arg) in variation.params.iter().zip(args) {
        vm.current_frame().bind(&mut vm.heap, Rc::clone(param), *arg);
    }
    let result = exec(vm, &variation.body);
    let returned = match result {
        Ok(_) => vm.current_frame().state.return_value.unwrap_or_else(|| nil(vm)),
        Err(err) => {
            vm.pop_frame();
            return Err(err);
        }
    };
    let threw = vm.current_frame().state.throwing;
    vm.heap.inc_ref(returned);
    vm.pop_frame();
    if threw {
        vm.current_frame().state.set_throw(returned);
    }
    Ok(returned)
}

/// Invokes a plain (non-method) function value with positional arguments.
fn invoke(
    vm: &mut Vm,
    name: &str,
    params: &[Rc<str>],
    body: &Node,
    args: &[Handle],
    pos: crate::ast::SourcePos,
) -> Result<Handle, HybrisError> {
    vm.push_frame(name, pos);
    for (param, arg) in params.iter().zip(args) {
        vm.current_frame().bind(&mut vm.heap, Rc::clone(param), *arg);
    }
    let result = exec(vm, body);
    let returned = match result {
        Ok(_) => vm.current_frame().state.return_value.unwrap_or_else(|| nil(vm)),
        Err(err) => {
            vm.pop_frame();
            return Err(err);
        }
    };
    let threw = vm.current_frame().state.throwing;
    vm.heap.inc_ref(returned);
    vm.pop_frame();
    if threw {
        vm.current_frame().state.set_throw(returned);
    }
    Ok(returned)
}
