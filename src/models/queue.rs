use std::fmt::{Display, Formatter, Result};

/// A queue the worker declares before it starts consuming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub name: String,
    pub durable: bool,
}

impl QueueBinding {
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
        }
    }
}

impl Display for QueueBinding {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.name)
    }
}
