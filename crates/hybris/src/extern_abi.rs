//! The extension ABI (§4.G): native function registration, structure
//! templates, and constant values an embedder installs before running a
//! script, plus the small standard library built on top of it.
//!
//! Grounded on `ouros`'s own builtin-registration pattern (`ouros::modules`,
//! `ouros::capability`): a name-keyed table of boxed closures the evaluator
//! consults by name rather than an ambient global namespace, so an embedder
//! can hand a `Vm` a custom, restricted capability set (§5 "Extension
//! surface is explicit, never ambient").

use crate::class::descriptors;
use crate::error::HybrisError;
use crate::heap::{Handle, HeapData};
use crate::ops;
use crate::vm::{NativeFn, StructureTemplate, Vm};

/// Registers a native function under `name`, replacing any previous
/// registration of the same name (§4.G "native functions may be
/// re-registered by a later `register_native` call").
pub fn register_native(vm: &mut Vm, name: &str, function: NativeFn) {
    vm.natives.insert(name.to_string(), function);
}

/// Registers a named constant value, reachable from any frame (§4.G
/// "Constants").
pub fn register_constant(vm: &mut Vm, name: &str, value: Handle) {
    vm.heap.inc_ref(value);
    vm.constants.insert(name.to_string(), value);
}

/// Registers a structure template from native code (§4.G "a native module's
/// initializer may register... structure templates"), the same fixed-field
/// record shape a script-level `structure Name { a, b, c }` declaration
/// produces via `eval::eval_structure_decl` — this is the native-ABI
/// counterpart to that script-level form.
pub fn register_structure(vm: &mut Vm, name: &str, field_order: Vec<String>) {
    vm.structures.insert(name.to_string(), StructureTemplate { field_order });
}

fn arity_error(name: &str, expected: usize, args: &[Handle]) -> Result<Handle, HybrisError> {
    Err(HybrisError::arity_mismatch(name, expected, args.len()))
}

/// Installs the small standard library every Hybris program gets for free:
/// `print`/`println` (§4.G, `crate::io::PrintWriter`), `len`, `push`,
/// `typeof`, `to_string`, and the `gc_collect` hook onto the collector
/// (§4.B).
pub fn install_stdlib(vm: &mut Vm) {
    register_native(
        vm,
        "print",
        Box::new(|vm: &mut Vm, args: &[Handle]| {
            for arg in args {
                let text = stringify_for_print(vm, *arg);
                vm.print.write_str(&text);
            }
            Ok(vm.heap.allocate(HeapData::Nil))
        }),
    );

    register_native(
        vm,
        "println",
        Box::new(|vm: &mut Vm, args: &[Handle]| {
            let rendered: Vec<String> = args.iter().map(|h| stringify_for_print(vm, *h)).collect();
            vm.print.write_line(&rendered.join(""));
            Ok(vm.heap.allocate(HeapData::Nil))
        }),
    );

    register_native(
        vm,
        "typeof",
        Box::new(|vm: &mut Vm, args: &[Handle]| {
            if args.len() != 1 {
                return arity_error("typeof", 1, args);
            }
            let name = vm.heap.get(args[0]).type_name().to_string();
            Ok(vm.heap.allocate(HeapData::String(name)))
        }),
    );

    register_native(
        vm,
        "to_string",
        Box::new(|vm: &mut Vm, args: &[Handle]| {
            if args.len() != 1 {
                return arity_error("to_string", 1, args);
            }
            Ok(describe(vm, args[0]))
        }),
    );

    register_native(
        vm,
        "len",
        Box::new(|vm: &mut Vm, args: &[Handle]| {
            if args.len() != 1 {
                return arity_error("len", 1, args);
            }
            // §4.F "Descriptors": `__size` "returns integer; drives
            // `ob_ivalue`/`ob_fvalue`/`ob_lvalue`" — `len()` is the builtin
            // that actually calls `ob_ivalue` on its argument, so a class
            // instance declaring `__size` is consulted here before falling
            // back to the structural lengths below.
            if let HeapData::Instance(instance) = vm.heap.get(args[0]) {
                let class = std::rc::Rc::clone(&instance.class);
                if class.find_method(descriptors::SIZE, 0).is_some() {
                    let node = crate::ast::Node::new(crate::ast::NodeKind::Call, crate::ast::SourcePos::default());
                    let result = crate::eval::call_descriptor(vm, args[0], descriptors::SIZE, &[], &node)?;
                    let n = match vm.heap.get(result) {
                        HeapData::Integer(n) => *n,
                        HeapData::Float(f) => *f as i64,
                        other => {
                            return Err(HybrisError::generic(format!(
                                "'__size' must return an integer, got '{}'",
                                other.type_name()
                            )))
                        }
                    };
                    return Ok(vm.heap.allocate(HeapData::Integer(n)));
                }
                return Err(HybrisError::generic(format!("'{}' has no length", class.name)));
            }
            let n = match vm.heap.get(args[0]) {
                HeapData::Vector(items) => items.len(),
                HeapData::Map(pairs) => pairs.len(),
                HeapData::String(s) => s.chars().count(),
                HeapData::Binary(b) => b.len(),
                other => return Err(HybrisError::generic(format!("'{}' has no length", other.type_name()))),
            };
            Ok(vm.heap.allocate(HeapData::Integer(n as i64)))
        }),
    );

    register_native(
        vm,
        "push",
        Box::new(|vm: &mut Vm, args: &[Handle]| {
            if args.len() != 2 {
                return arity_error("push", 2, args);
            }
            // §4.A's collection operators ("push, pop, at, set, remove")
            // apply uniformly across variants, including a class instance
            // that overloads `__op@[]=` (`crate::ast::OperatorKind::IndexPush`),
            // the same mangled name `eval::eval_call`'s `[]`/`[]<` dispatch
            // uses for the other collection operators on an instance.
            if let HeapData::Instance(instance) = vm.heap.get(args[0]) {
                let class = std::rc::Rc::clone(&instance.class);
                let method = crate::class::mangle_operator(crate::ast::OperatorKind::IndexPush);
                if class.find_method(&method, 1).is_some() {
                    let node = crate::ast::Node::new(crate::ast::NodeKind::Call, crate::ast::SourcePos::default());
                    return crate::eval::call_descriptor(vm, args[0], &method, &[args[1]], &node);
                }
                return Err(HybrisError::generic(format!("class '{}' does not overload 'push'", class.name)));
            }
            let HeapData::Vector(mut items) = vm.heap.get(args[0]).clone() else {
                return Err(HybrisError::generic("push() expects a vector as its first argument"));
            };
            vm.heap.inc_ref(args[1]);
            items.push(args[1]);
            *vm.heap.get_mut(args[0]) = HeapData::Vector(items);
            Ok(args[0])
        }),
    );

    register_native(
        vm,
        "pop",
        Box::new(|vm: &mut Vm, args: &[Handle]| {
            if args.len() != 1 {
                return arity_error("pop", 1, args);
            }
            let HeapData::Vector(mut items) = vm.heap.get(args[0]).clone() else {
                return Err(HybrisError::generic("pop() expects a vector as its first argument"));
            };
            let Some(popped) = items.pop() else {
                return Err(HybrisError::generic("pop() called on an empty vector"));
            };
            vm.heap.dec_ref(popped);
            *vm.heap.get_mut(args[0]) = HeapData::Vector(items);
            Ok(popped)
        }),
    );

    register_native(
        vm,
        "remove",
        Box::new(|vm: &mut Vm, args: &[Handle]| {
            if args.len() != 2 {
                return arity_error("remove", 2, args);
            }
            match vm.heap.get(args[0]).clone() {
                HeapData::Vector(mut items) => {
                    let HeapData::Integer(n) = vm.heap.get(args[1]) else {
                        return Err(HybrisError::generic("remove() expects an integer index for a vector"));
                    };
                    let n = *n;
                    if n < 0 || n as usize >= items.len() {
                        return Err(HybrisError::generic("remove() index out of range"));
                    }
                    let removed = items.remove(n as usize);
                    vm.heap.dec_ref(removed);
                    *vm.heap.get_mut(args[0]) = HeapData::Vector(items);
                    Ok(removed)
                }
                HeapData::Map(mut pairs) => {
                    let Some(index) = pairs.iter().position(|(k, _)| ops::values_equal(&vm.heap, *k, args[1])) else {
                        return Err(HybrisError::generic("remove() key not found in map"));
                    };
                    let (removed_key, removed_value) = pairs.remove(index);
                    vm.heap.dec_ref(removed_key);
                    vm.heap.dec_ref(removed_value);
                    *vm.heap.get_mut(args[0]) = HeapData::Map(pairs);
                    Ok(removed_value)
                }
                other => Err(HybrisError::generic(format!("remove() does not support '{}'", other.type_name()))),
            }
        }),
    );

    register_native(
        vm,
        "gc_collect",
        Box::new(|vm: &mut Vm, args: &[Handle]| {
            if !args.is_empty() {
                return arity_error("gc_collect", 0, args);
            }
            let freed = vm.collect_garbage();
            Ok(vm.heap.allocate(HeapData::Integer(freed as i64)))
        }),
    );
}

/// `to_string()`'s class-aware counterpart: calls the `__to_string`
/// descriptor if the value is an instance that declares one (§4.F
/// "Descriptors"), otherwise falls back to the structural rendering every
/// primitive type gets from [`crate::ops::to_display_string`].
fn describe(vm: &mut Vm, handle: Handle) -> Handle {
    let text = stringify_for_print(vm, handle);
    vm.heap.allocate(HeapData::String(text))
}

/// Renders a value the way `print`/`println`/`to_string()` all show it:
/// the `__to_string` descriptor's result for a class instance that
/// declares one (§4.F "Descriptors" — absence yields `"<ClassName>"`),
/// otherwise the structural rendering from [`ops::to_display_string`].
fn stringify_for_print(vm: &mut Vm, handle: Handle) -> String {
    if let HeapData::Instance(instance) = vm.heap.get(handle) {
        let class = std::rc::Rc::clone(&instance.class);
        if class.find_method(descriptors::TO_STRING, 0).is_some() {
            let node = crate::ast::Node::new(crate::ast::NodeKind::Call, crate::ast::SourcePos::default());
            if let Ok(result) = crate::eval::call_descriptor(vm, handle, descriptors::TO_STRING, &[], &node) {
                return ops::to_display_string(&vm.heap, result);
            }
        }
        return format!("<{}>", class.name);
    }
    ops::to_display_string(&vm.heap, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::GcLimits;
    use crate::vm::Vm;

    fn call(vm: &mut Vm, name: &str, args: &[Handle]) -> Handle {
        let function = vm.natives.remove(name).expect("native registered");
        let result = function(vm, args).expect("native call succeeds");
        vm.natives.insert(name.to_string(), function);
        result
    }

    #[test]
    fn push_pop_remove_round_trip_on_a_vector() {
        let mut vm = Vm::new(GcLimits::default());
        install_stdlib(&mut vm);
        let v = vm.heap.allocate(HeapData::Vector(vec![]));
        let one = vm.heap.allocate(HeapData::Integer(1));
        let two = vm.heap.allocate(HeapData::Integer(2));
        call(&mut vm, "push", &[v, one]);
        call(&mut vm, "push", &[v, two]);
        assert!(matches!(vm.heap.get(v), HeapData::Vector(items) if items.len() == 2));

        let popped = call(&mut vm, "pop", &[v]);
        assert!(matches!(vm.heap.get(popped), HeapData::Integer(2)));
        assert!(matches!(vm.heap.get(v), HeapData::Vector(items) if items.len() == 1));

        let removed = call(&mut vm, "remove", &[v, vm.heap.allocate(HeapData::Integer(0))]);
        assert!(matches!(vm.heap.get(removed), HeapData::Integer(1)));
        assert!(matches!(vm.heap.get(v), HeapData::Vector(items) if items.is_empty()));
    }

    #[test]
    fn register_structure_installs_a_field_order() {
        let mut vm = Vm::new(GcLimits::default());
        register_structure(&mut vm, "Point", vec!["x".to_string(), "y".to_string()]);
        assert_eq!(vm.structures["Point"].field_order, vec!["x", "y"]);
    }
}
