//! Closed set of elementwise binary operators served by the graph cache.

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};

/// Post-division rounding applied by `div` with an explicit mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundingMode {
    Trunc,
    Floor,
}

impl RoundingMode {
    /// Resolves the optional rounding-mode tag accepted by `div`.
    ///
    /// `None` selects true division. Unknown tags are a contract violation: callers validate the
    /// closed set before reaching the dispatcher.
    pub fn parse(tag: Option<&str>) -> DispatchResult<Option<Self>> {
        match tag {
            None => Ok(None),
            Some("trunc") => Ok(Some(RoundingMode::Trunc)),
            Some("floor") => Ok(Some(RoundingMode::Floor)),
            Some(other) => Err(DispatchError::contract(format!(
                "div expected rounding_mode to be one of None, 'trunc', or 'floor' but found '{other}'"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RoundingMode::Trunc => "trunc",
            RoundingMode::Floor => "floor",
        }
    }
}

/// Family an operator belongs to; selects the expression strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpFamily {
    Arithmetic,
    Comparison,
    Logical,
    Division,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Minimum,
    Maximum,
    Atan2,
    Remainder,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogicalAnd,
    LogicalOr,
    LogicalXor,
    DivRounding(RoundingMode),
}

impl BinaryOpKind {
    /// Every operator, with each rounding mode listed once.
    pub const ALL: [BinaryOpKind; 20] = [
        BinaryOpKind::Add,
        BinaryOpKind::Sub,
        BinaryOpKind::Mul,
        BinaryOpKind::Div,
        BinaryOpKind::Pow,
        BinaryOpKind::Minimum,
        BinaryOpKind::Maximum,
        BinaryOpKind::Atan2,
        BinaryOpKind::Remainder,
        BinaryOpKind::Eq,
        BinaryOpKind::Ne,
        BinaryOpKind::Lt,
        BinaryOpKind::Le,
        BinaryOpKind::Gt,
        BinaryOpKind::Ge,
        BinaryOpKind::LogicalAnd,
        BinaryOpKind::LogicalOr,
        BinaryOpKind::LogicalXor,
        BinaryOpKind::DivRounding(RoundingMode::Trunc),
        BinaryOpKind::DivRounding(RoundingMode::Floor),
    ];

    /// Operator name used in signature keys and dispatcher registration.
    pub fn name(self) -> &'static str {
        match self {
            BinaryOpKind::Add => "add",
            BinaryOpKind::Sub => "sub",
            BinaryOpKind::Mul => "mul",
            BinaryOpKind::Div | BinaryOpKind::DivRounding(_) => "div",
            BinaryOpKind::Pow => "pow",
            BinaryOpKind::Minimum => "minimum",
            BinaryOpKind::Maximum => "maximum",
            BinaryOpKind::Atan2 => "atan2",
            BinaryOpKind::Remainder => "remainder",
            BinaryOpKind::Eq => "eq",
            BinaryOpKind::Ne => "ne",
            BinaryOpKind::Lt => "lt",
            BinaryOpKind::Le => "le",
            BinaryOpKind::Gt => "gt",
            BinaryOpKind::Ge => "ge",
            BinaryOpKind::LogicalAnd => "logical_and",
            BinaryOpKind::LogicalOr => "logical_or",
            BinaryOpKind::LogicalXor => "logical_xor",
        }
    }

    pub fn family(self) -> OpFamily {
        match self {
            BinaryOpKind::Add
            | BinaryOpKind::Sub
            | BinaryOpKind::Mul
            | BinaryOpKind::Pow
            | BinaryOpKind::Minimum
            | BinaryOpKind::Maximum
            | BinaryOpKind::Atan2
            | BinaryOpKind::Remainder => OpFamily::Arithmetic,
            BinaryOpKind::Eq
            | BinaryOpKind::Ne
            | BinaryOpKind::Lt
            | BinaryOpKind::Le
            | BinaryOpKind::Gt
            | BinaryOpKind::Ge => OpFamily::Comparison,
            BinaryOpKind::LogicalAnd | BinaryOpKind::LogicalOr | BinaryOpKind::LogicalXor => {
                OpFamily::Logical
            }
            BinaryOpKind::Div | BinaryOpKind::DivRounding(_) => OpFamily::Division,
        }
    }

    /// Only `add` and `sub` take a scaling factor for the secondary operand.
    pub fn accepts_alpha(self) -> bool {
        matches!(self, BinaryOpKind::Add | BinaryOpKind::Sub)
    }

    pub fn rounding_mode(self) -> Option<RoundingMode> {
        match self {
            BinaryOpKind::DivRounding(mode) => Some(mode),
            _ => None,
        }
    }

    /// Resolves a registered operator name; `div` maps to true division.
    pub fn from_name(name: &str) -> Option<Self> {
        BinaryOpKind::ALL
            .into_iter()
            .find(|kind| kind.name() == name && kind.rounding_mode().is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_mode_parses_closed_set() -> DispatchResult<()> {
        assert_eq!(RoundingMode::parse(None)?, None);
        assert_eq!(RoundingMode::parse(Some("floor"))?, Some(RoundingMode::Floor));
        assert!(matches!(
            RoundingMode::parse(Some("ceil")),
            Err(DispatchError::ContractViolation(_))
        ));
        Ok(())
    }

    #[test]
    fn names_resolve_back_to_kinds() {
        assert_eq!(BinaryOpKind::from_name("div"), Some(BinaryOpKind::Div));
        assert_eq!(
            BinaryOpKind::from_name("logical_xor"),
            Some(BinaryOpKind::LogicalXor)
        );
        assert_eq!(BinaryOpKind::from_name("bitwise_and"), None);
        assert_eq!(BinaryOpKind::Lt.family(), OpFamily::Comparison);
    }
}
