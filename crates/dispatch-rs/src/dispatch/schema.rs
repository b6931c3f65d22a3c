use std::fmt;

/// Whether an operator mutates or aliases any of its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AliasInfo {
    /// Purely functional.
    #[default]
    None,
    /// Writes into one of its inputs (`add_`, `resize_`).
    Mutates,
    /// Returns a view sharing storage with an input (`as_strided`).
    Aliases,
}

/// Shape of an operator's boxed calling convention.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperatorSchema {
    pub name: String,
    pub num_arguments: usize,
    pub num_returns: usize,
    pub alias: AliasInfo,
}

impl OperatorSchema {
    pub fn new(name: impl Into<String>, num_arguments: usize, num_returns: usize) -> Self {
        OperatorSchema {
            name: name.into(),
            num_arguments,
            num_returns,
            alias: AliasInfo::None,
        }
    }

    pub fn with_alias(mut self, alias: AliasInfo) -> Self {
        self.alias = alias;
        self
    }

    pub fn has_any_alias_info(&self) -> bool {
        self.alias != AliasInfo::None
    }
}

impl fmt::Display for OperatorSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = match self.alias {
            AliasInfo::None => "",
            AliasInfo::Mutates => "!",
            AliasInfo::Aliases => "@",
        };
        write!(
            f,
            "{}{marker}({} args) -> {} returns",
            self.name, self.num_arguments, self.num_returns
        )
    }
}
