use serde::{Deserialize, Serialize};

use crate::types::{CallValue, DomainError, OperationSpec};

/// One concrete call: operation, arguments, and its position in the sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Invocation {
    pub operation: String,
    pub args: CallValue,
    pub ordinal: usize,
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.operation)?;
        for (i, arg) in self.args.args().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")
    }
}

/// Ordered list of invocations. Insertion order is execution order.
///
/// Ordinals are kept dense (`0..len`) by every constructor and edit, so
/// an `Invocation`'s ordinal always equals its index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallSequence {
    calls: Vec<Invocation>,
}

impl CallSequence {
    pub fn new() -> Self {
        Self { calls: Vec::new() }
    }

    /// Build from (operation, args) pairs, assigning ordinals in order.
    pub fn from_calls<I>(calls: I) -> Self
    where
        I: IntoIterator<Item = (String, CallValue)>,
    {
        let mut seq = Self::new();
        for (operation, args) in calls {
            seq.push(&operation, args);
        }
        seq
    }

    /// Append a call, returning the invocation as stored.
    pub fn push(&mut self, operation: &str, args: CallValue) -> &Invocation {
        let ordinal = self.calls.len();
        self.calls.push(Invocation {
            operation: operation.to_string(),
            args,
            ordinal,
        });
        &self.calls[ordinal]
    }

    /// Append an already-built invocation, rewriting its ordinal.
    pub fn push_invocation(&mut self, mut invocation: Invocation) {
        invocation.ordinal = self.calls.len();
        self.calls.push(invocation);
    }

    pub fn calls(&self) -> &[Invocation] {
        &self.calls
    }

    pub fn get(&self, index: usize) -> Option<&Invocation> {
        self.calls.get(index)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Invocation> {
        self.calls.iter()
    }

    /// Copy of the first `len` calls.
    pub fn truncated(&self, len: usize) -> Self {
        Self::renumbered(self.calls.iter().take(len).cloned())
    }

    /// Copy with calls `start..end` removed.
    pub fn without_range(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.calls.len());
        Self::renumbered(
            self.calls
                .iter()
                .enumerate()
                .filter(|(i, _)| *i < start || *i >= end)
                .map(|(_, c)| c.clone()),
        )
    }

    /// Copy with the call at `index` duplicated in place.
    pub fn with_duplicate(&self, index: usize) -> Self {
        let mut calls = self.calls.clone();
        if let Some(call) = self.calls.get(index) {
            calls.insert(index, call.clone());
        }
        Self::renumbered(calls)
    }

    /// Copy with the arguments of the call at `index` replaced.
    pub fn with_args(&self, index: usize, args: CallValue) -> Self {
        let mut seq = self.clone();
        if let Some(call) = seq.calls.get_mut(index) {
            call.args = args;
        }
        seq
    }

    /// Copy with the calls at `a` and `b` swapped.
    pub fn with_swapped(&self, a: usize, b: usize) -> Self {
        let mut calls = self.calls.clone();
        if a < calls.len() && b < calls.len() {
            calls.swap(a, b);
        }
        Self::renumbered(calls)
    }

    fn renumbered<I: IntoIterator<Item = Invocation>>(calls: I) -> Self {
        let mut seq = Self::new();
        for call in calls {
            seq.push_invocation(call);
        }
        seq
    }

    /// Check every call names a known operation with in-domain arguments.
    pub fn validate(&self, operations: &[OperationSpec]) -> Result<(), DomainError> {
        for call in &self.calls {
            let spec = operations
                .iter()
                .find(|op| op.name == call.operation)
                .ok_or_else(|| DomainError::UnknownOperation {
                    operation: call.operation.clone(),
                })?;
            spec.validate(&call.args)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for CallSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, call) in self.calls.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{call}")?;
        }
        write!(f, "]")
    }
}

impl<'a> IntoIterator for &'a CallSequence {
    type Item = &'a Invocation;
    type IntoIter = std::slice::Iter<'a, Invocation>;

    fn into_iter(self) -> Self::IntoIter {
        self.calls.iter()
    }
}
