//! Primitive operator dispatch: the `match`-based vtable that replaces a
//! per-type function-pointer table.
//!
//! `examples/original_source/include/object.h` gives every `Object` a full
//! virtual method table (`operator +`, `operator ==`, `operator []`, ...).
//! Collapsing that into a tagged enum dispatched through a single `match`
//! is the idiomatic Rust shape, which is what
//! [`apply_binary`]/[`apply_unary`] do. Class instances are handled by the
//! caller (`crate::eval`): if either operand is a
//! [`crate::heap::HeapData::Instance`], the evaluator looks for an
//! overloaded `__op@<sym>` method (§4.F) before ever reaching this module.

use crate::ast::{OperatorKind, UnaryOperatorKind};
use crate::error::{ErrorKind, HybrisError};
use crate::heap::{Handle, Heap, HeapData};

fn type_error(op: OperatorKind, lhs: &HeapData, rhs: &HeapData) -> HybrisError {
    HybrisError::new(
        ErrorKind::Generic,
        format!("unsupported operand types for '{op}': '{}' and '{}'", lhs.type_name(), rhs.type_name()),
    )
}

/// Numeric promotion: any arithmetic mixing an `Integer` and a `Float`
/// promotes to `Float` (§3 "Numeric promotion").
enum Numeric {
    Int(i64),
    Float(f64),
}

fn as_numeric(data: &HeapData) -> Option<Numeric> {
    match *data {
        HeapData::Integer(n) => Some(Numeric::Int(n)),
        HeapData::Float(f) => Some(Numeric::Float(f)),
        HeapData::Boolean(b) => Some(Numeric::Int(i64::from(b))),
        HeapData::Char(c) => Some(Numeric::Int(i64::from(c as u32))),
        _ => None,
    }
}

fn truthy(data: &HeapData) -> bool {
    match data {
        HeapData::Nil => false,
        HeapData::Boolean(b) => *b,
        HeapData::Integer(n) => *n != 0,
        HeapData::Float(f) => *f != 0.0,
        HeapData::Char(c) => *c != '\0',
        HeapData::String(s) => !s.is_empty(),
        HeapData::Binary(b) => !b.is_empty(),
        HeapData::Vector(v) => !v.is_empty(),
        HeapData::Map(m) => !m.is_empty(),
        HeapData::Structure { .. } | HeapData::Instance(_) | HeapData::Function(_) | HeapData::Alias(_) => true,
    }
}

fn stringify(heap: &Heap, handle: Handle) -> String {
    match heap.get(handle) {
        HeapData::Nil => "nil".to_string(),
        HeapData::Boolean(b) => b.to_string(),
        HeapData::Integer(n) => n.to_string(),
        HeapData::Float(f) => format!("{f}"),
        HeapData::Char(c) => c.to_string(),
        HeapData::String(s) => s.clone(),
        HeapData::Binary(b) => format!("{b:?}"),
        HeapData::Vector(items) => {
            let rendered: Vec<String> = items.iter().map(|h| stringify(heap, *h)).collect();
            format!("{{{}}}", rendered.join(", "))
        }
        HeapData::Map(pairs) => {
            let rendered: Vec<String> =
                pairs.iter().map(|(k, v)| format!("{}: {}", stringify(heap, *k), stringify(heap, *v))).collect();
            format!("{{{}}}", rendered.join(", "))
        }
        HeapData::Structure { template, .. } => format!("<structure {template}>"),
        // §4.F "Descriptors": absence of `__to_string` yields "<ClassName>".
        // The descriptor itself is invoked by the caller (`crate::eval`)
        // before falling back to structural concatenation here, since this
        // module has no evaluator access to run a method body.
        HeapData::Instance(instance) => format!("<{}>", instance.class.name),
        HeapData::Function(function) => format!("<function {}>", function.name),
        HeapData::Alias(target) => stringify(heap, *target),
    }
}

/// Equality as defined by §3 "Map" key comparison and `==`/`!=`: structural
/// for scalars and containers, `false` across mismatched types other than
/// the numeric family.
pub fn values_equal(heap: &Heap, a: Handle, b: Handle) -> bool {
    match (heap.get(a), heap.get(b)) {
        (HeapData::Nil, HeapData::Nil) => true,
        (HeapData::String(x), HeapData::String(y)) => x == y,
        (HeapData::Char(x), HeapData::Char(y)) => x == y,
        (HeapData::Binary(x), HeapData::Binary(y)) => x == y,
        (HeapData::Vector(x), HeapData::Vector(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(xi, yi)| values_equal(heap, *xi, *yi))
        }
        (HeapData::Map(x), HeapData::Map(y)) => {
            // §3 "Map": comparing two maps compares elementwise in
            // insertion order, not as sets — a map with the same pairs
            // inserted in a different order is not equal.
            x.len() == y.len()
                && x.iter().zip(y).all(|((xk, xv), (yk, yv))| {
                    values_equal(heap, *xk, *yk) && values_equal(heap, *xv, *yv)
                })
        }
        (x, y) => match (as_numeric(x), as_numeric(y)) {
            (Some(Numeric::Int(x)), Some(Numeric::Int(y))) => x == y,
            (Some(x), Some(y)) => numeric_to_f64(x) == numeric_to_f64(y),
            _ => false,
        },
    }
}

fn numeric_to_f64(n: Numeric) -> f64 {
    match n {
        Numeric::Int(i) => i as f64,
        Numeric::Float(f) => f,
    }
}

/// Total order used by `<`/`>`/`<=`/`>=`: numeric comparison for the
/// numeric family, lexicographic for strings, `None` otherwise.
fn partial_compare(heap: &Heap, a: Handle, b: Handle) -> Option<std::cmp::Ordering> {
    match (heap.get(a), heap.get(b)) {
        (HeapData::String(x), HeapData::String(y)) => Some(x.cmp(y)),
        (x, y) => match (as_numeric(x), as_numeric(y)) {
            (Some(Numeric::Int(x)), Some(Numeric::Int(y))) => Some(x.cmp(&y)),
            (Some(x), Some(y)) => numeric_to_f64(x).partial_cmp(&numeric_to_f64(y)),
            _ => None,
        },
    }
}

/// Applies a binary operator to two already-evaluated operands, allocating
/// the result on the heap. Returns an internal error for genuinely
/// type-incompatible operands (§7); short-circuiting operators (`&&`/`||`)
/// are handled in `crate::eval`, not here, since they must not evaluate
/// their right-hand side eagerly.
pub fn apply_binary(heap: &mut Heap, op: OperatorKind, lhs: Handle, rhs: Handle) -> Result<Handle, HybrisError> {
    use OperatorKind::{Add, BitAnd, BitOr, BitXor, Div, Eq, Ge, Gt, Le, Lt, Mod, Mul, Ne, Range, RegexMatch, Shl, Shr, Sub};

    match op {
        Eq => return Ok(heap.allocate(HeapData::Boolean(values_equal(heap, lhs, rhs)))),
        RegexMatch => {
            let (HeapData::String(subject), HeapData::String(pattern)) = (heap.get(lhs), heap.get(rhs)) else {
                return Err(type_error(op, heap.get(lhs), heap.get(rhs)));
            };
            let re = regex::Regex::new(pattern)
                .map_err(|err| HybrisError::generic(format!("invalid regex '{pattern}': {err}")))?;
            return Ok(heap.allocate(HeapData::Boolean(re.is_match(subject))));
        }
        Ne => return Ok(heap.allocate(HeapData::Boolean(!values_equal(heap, lhs, rhs)))),
        Lt | Gt | Le | Ge => {
            let ordering = partial_compare(heap, lhs, rhs)
                .ok_or_else(|| type_error(op, heap.get(lhs), heap.get(rhs)))?;
            let result = match op {
                Lt => ordering.is_lt(),
                Gt => ordering.is_gt(),
                Le => ordering.is_le(),
                Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            return Ok(heap.allocate(HeapData::Boolean(result)));
        }
        Range => {
            let (start, end) = match (heap.get(lhs), heap.get(rhs)) {
                (HeapData::Integer(a), HeapData::Integer(b)) => (*a, *b),
                _ => return Err(type_error(op, heap.get(lhs), heap.get(rhs))),
            };
            let items: Vec<Handle> = if start <= end {
                (start..=end).map(|n| heap.allocate(HeapData::Integer(n))).collect()
            } else {
                (end..=start).rev().map(|n| heap.allocate(HeapData::Integer(n))).collect()
            };
            return Ok(heap.allocate(HeapData::Vector(items)));
        }
        Add if matches!(heap.get(lhs), HeapData::String(_)) || matches!(heap.get(rhs), HeapData::String(_)) => {
            let combined = format!("{}{}", stringify(heap, lhs), stringify(heap, rhs));
            return Ok(heap.allocate(HeapData::String(combined)));
        }
        Add if matches!(heap.get(lhs), HeapData::Vector(_)) => {
            let HeapData::Vector(left) = heap.get(lhs).clone() else { unreachable!() };
            let mut items = left;
            match heap.get(rhs).clone() {
                HeapData::Vector(right) => items.extend(right),
                _ => items.push(rhs),
            }
            return Ok(heap.allocate(HeapData::Vector(items)));
        }
        // §3 "String": "string `*` integer replicates".
        Mul if matches!(heap.get(lhs), HeapData::String(_)) => {
            let (HeapData::String(s), HeapData::Integer(n)) = (heap.get(lhs), heap.get(rhs)) else {
                return Err(type_error(op, heap.get(lhs), heap.get(rhs)));
            };
            let count = usize::try_from(*n).unwrap_or(0);
            return Ok(heap.allocate(HeapData::String(s.repeat(count))));
        }
        _ => {}
    }

    let (l, r) = (as_numeric(heap.get(lhs)), as_numeric(heap.get(rhs)));
    let (l, r) = match (l, r) {
        (Some(l), Some(r)) => (l, r),
        _ => return Err(type_error(op, heap.get(lhs), heap.get(rhs))),
    };

    let result = match (op, l, r) {
        (BitAnd | BitOr | BitXor | Shl | Shr, ..) => {
            let (a, b) = (force_int(l), force_int(r));
            let n = match op {
                BitAnd => a & b,
                BitOr => a | b,
                BitXor => a ^ b,
                Shl => a.wrapping_shl(b as u32),
                Shr => a.wrapping_shr(b as u32),
                _ => unreachable!(),
            };
            HeapData::Integer(n)
        }
        (Mod, Numeric::Int(a), Numeric::Int(b)) => {
            if b == 0 {
                return Err(HybrisError::generic("modulo by zero"));
            }
            HeapData::Integer(a % b)
        }
        (Mod, ..) => HeapData::Float(numeric_to_f64(l) % numeric_to_f64(r)),
        (Div, Numeric::Int(a), Numeric::Int(b)) => {
            if b == 0 {
                return Err(HybrisError::generic("division by zero"));
            }
            if a % b == 0 {
                HeapData::Integer(a / b)
            } else {
                HeapData::Float(a as f64 / b as f64)
            }
        }
        (Div, ..) => HeapData::Float(numeric_to_f64(l) / numeric_to_f64(r)),
        (Add, Numeric::Int(a), Numeric::Int(b)) => HeapData::Integer(a + b),
        (Add, ..) => HeapData::Float(numeric_to_f64(l) + numeric_to_f64(r)),
        (Sub, Numeric::Int(a), Numeric::Int(b)) => HeapData::Integer(a - b),
        (Sub, ..) => HeapData::Float(numeric_to_f64(l) - numeric_to_f64(r)),
        (Mul, Numeric::Int(a), Numeric::Int(b)) => HeapData::Integer(a * b),
        (Mul, ..) => HeapData::Float(numeric_to_f64(l) * numeric_to_f64(r)),
        _ => return Err(type_error(op, heap.get(lhs), heap.get(rhs))),
    };
    Ok(heap.allocate(result))
}

fn force_int(n: Numeric) -> i64 {
    match n {
        Numeric::Int(i) => i,
        Numeric::Float(f) => f as i64,
    }
}

/// Applies a unary operator (§4.A). `++`/`--` return the *new* value; the
/// evaluator is responsible for rebinding the operand's name to it.
pub fn apply_unary(heap: &mut Heap, op: UnaryOperatorKind, operand: Handle) -> Result<Handle, HybrisError> {
    let result = match (op, heap.get(operand)) {
        (UnaryOperatorKind::Not, data) => HeapData::Boolean(!truthy(data)),
        (UnaryOperatorKind::Neg, HeapData::Integer(n)) => HeapData::Integer(-n),
        (UnaryOperatorKind::Neg, HeapData::Float(f)) => HeapData::Float(-f),
        (UnaryOperatorKind::BitNot, HeapData::Integer(n)) => HeapData::Integer(!n),
        (UnaryOperatorKind::PreIncrement, HeapData::Integer(n)) => HeapData::Integer(n + 1),
        (UnaryOperatorKind::PreIncrement, HeapData::Float(f)) => HeapData::Float(f + 1.0),
        (UnaryOperatorKind::PreDecrement, HeapData::Integer(n)) => HeapData::Integer(n - 1),
        (UnaryOperatorKind::PreDecrement, HeapData::Float(f)) => HeapData::Float(f - 1.0),
        (op, data) => {
            return Err(HybrisError::generic(format!("unsupported operand type for '{op}': '{}'", data.type_name())))
        }
    };
    Ok(heap.allocate(result))
}

/// `a.b` (§4.E "Dot"): unconditional string concatenation, distinct from
/// attribute access — `examples/original_source/include/object.h` keeps
/// `operator .` entirely separate from the attribute-table accessors.
pub fn apply_dot(heap: &mut Heap, lhs: Handle, rhs: Handle) -> Handle {
    let combined = format!("{}{}", stringify(heap, lhs), stringify(heap, rhs));
    heap.allocate(HeapData::String(combined))
}

#[must_use]
pub fn to_display_string(heap: &Heap, handle: Handle) -> String {
    stringify(heap, handle)
}

#[must_use]
pub fn is_truthy(heap: &Heap, handle: Handle) -> bool {
    truthy(heap.get(handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::GcLimits;

    #[test]
    fn integer_arithmetic_promotes_to_float_when_mixed() {
        let mut heap = Heap::new(GcLimits::default());
        let a = heap.allocate(HeapData::Integer(3));
        let b = heap.allocate(HeapData::Float(0.5));
        let result = apply_binary(&mut heap, OperatorKind::Add, a, b).unwrap();
        assert!(matches!(heap.get(result), HeapData::Float(f) if (*f - 3.5).abs() < f64::EPSILON));
    }

    #[test]
    fn string_concatenation_stringifies_both_sides() {
        let mut heap = Heap::new(GcLimits::default());
        let s = heap.allocate(HeapData::String("n=".into()));
        let n = heap.allocate(HeapData::Integer(7));
        let result = apply_binary(&mut heap, OperatorKind::Add, s, n).unwrap();
        assert!(matches!(heap.get(result), HeapData::String(s) if s == "n=7"));
    }

    #[test]
    fn division_by_zero_is_a_generic_error() {
        let mut heap = Heap::new(GcLimits::default());
        let a = heap.allocate(HeapData::Integer(1));
        let b = heap.allocate(HeapData::Integer(0));
        assert!(apply_binary(&mut heap, OperatorKind::Div, a, b).is_err());
    }

    #[test]
    fn regex_match_tests_the_left_string_against_the_right_pattern() {
        let mut heap = Heap::new(GcLimits::default());
        let subject = heap.allocate(HeapData::String("hello world".into()));
        let pattern = heap.allocate(HeapData::String(r"^hello\s".into()));
        let result = apply_binary(&mut heap, OperatorKind::RegexMatch, subject, pattern).unwrap();
        assert!(matches!(heap.get(result), HeapData::Boolean(true)));
    }

    #[test]
    fn string_times_integer_replicates() {
        let mut heap = Heap::new(GcLimits::default());
        let s = heap.allocate(HeapData::String("ab".into()));
        let n = heap.allocate(HeapData::Integer(3));
        let result = apply_binary(&mut heap, OperatorKind::Mul, s, n).unwrap();
        assert!(matches!(heap.get(result), HeapData::String(s) if s == "ababab"));
    }

    #[test]
    fn range_builds_inclusive_vector_in_either_direction() {
        let mut heap = Heap::new(GcLimits::default());
        let a = heap.allocate(HeapData::Integer(1));
        let b = heap.allocate(HeapData::Integer(3));
        let result = apply_binary(&mut heap, OperatorKind::Range, a, b).unwrap();
        let HeapData::Vector(items) = heap.get(result).clone() else { panic!("expected vector") };
        let values: Vec<i64> = items.iter().map(|h| match heap.get(*h) {
            HeapData::Integer(n) => *n,
            _ => unreachable!(),
        }).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }
}
