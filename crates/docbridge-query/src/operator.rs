/// Comparison operators the backends can evaluate natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
}

impl Operator {
    /// Parse an operator key such as `"$eq"`. Operators without a native
    /// counterpart return `None`.
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "$eq" => Some(Self::Eq),
            "$ne" => Some(Self::Ne),
            _ => None,
        }
    }
}
