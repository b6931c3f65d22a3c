//! Schemas of the operators this crate provides kernels for.

use crate::dispatch::{AliasInfo, Dispatcher, OperatorSchema};

use super::kind::BinaryOpKind;

/// Arguments: `(self, other, alpha)` for add/sub, `(self, other, rounding_mode?)` for div,
/// `(self, other)` otherwise.
fn binary_schema(kind: BinaryOpKind) -> OperatorSchema {
    let num_arguments = match kind {
        BinaryOpKind::Add | BinaryOpKind::Sub | BinaryOpKind::Div => 3,
        _ => 2,
    };
    OperatorSchema::new(kind.name(), num_arguments, 1)
}

pub fn native_schemas() -> Vec<OperatorSchema> {
    let mut schemas: Vec<OperatorSchema> = BinaryOpKind::ALL
        .into_iter()
        .filter(|kind| kind.rounding_mode().is_none())
        .map(binary_schema)
        .collect();
    schemas.extend([
        // (self, other, alpha)
        OperatorSchema::new("add_", 3, 1).with_alias(AliasInfo::Mutates),
        // (self, value)
        OperatorSchema::new("fill_", 2, 1).with_alias(AliasInfo::Mutates),
        // (size, dtype?, device?)
        OperatorSchema::new("zeros", 3, 1),
        // (size, fill_value, dtype?, device?)
        OperatorSchema::new("full", 4, 1),
        // (start, end, dtype?, device?)
        OperatorSchema::new("arange", 4, 1),
        // (self, memory_format?)
        OperatorSchema::new("clone", 2, 1),
        // (self, size, memory_format?)
        OperatorSchema::new("resize_", 3, 1).with_alias(AliasInfo::Mutates),
        OperatorSchema::new("resize_functional", 3, 1),
        // (self, dtype?, layout?, device?, pin_memory?, non_blocking, memory_format?)
        OperatorSchema::new("_to_copy", 7, 1),
        OperatorSchema::new("lift", 1, 1),
        // (self, size, stride, storage_offset?)
        OperatorSchema::new("as_strided", 4, 1).with_alias(AliasInfo::Aliases),
        OperatorSchema::new("as_strided_copy", 4, 1),
        // (self, src, size, stride, storage_offset?)
        OperatorSchema::new("as_strided_scatter", 5, 1),
    ]);
    schemas
}

/// Registers every native schema; already-known operators are left as they are.
pub fn register_native_schemas(dispatcher: &Dispatcher) {
    for schema in native_schemas() {
        dispatcher.register_operator(schema);
    }
}
