use bytes::Bytes;

/// A single operation within a [`Transaction`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Operation {
    /// Creates `path` with `data`; fails the transaction if it already exists.
    Create {
        /// The path to create.
        path: String,
        /// The initial value.
        data: Bytes,
    },

    /// Writes `data` to `path`, creating it if missing.
    Write {
        /// The path to write.
        path: String,
        /// The new value.
        data: Bytes,
    },

    /// Deletes the value at `path`; fails the transaction if it does not exist.
    Delete {
        /// The path to delete.
        path: String,
    },
}

impl Operation {
    /// The path this operation targets.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Create { path, .. } | Self::Write { path, .. } | Self::Delete { path } => path,
        }
    }
}

/// An ordered set of operations committed all-or-nothing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Transaction {
    operations: Vec<Operation>,
}

impl Transaction {
    /// Creates an empty transaction.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            operations: Vec::new(),
        }
    }

    /// Adds a create operation.
    #[must_use]
    pub fn create<P: Into<String>, D: Into<Bytes>>(mut self, path: P, data: D) -> Self {
        self.operations.push(Operation::Create {
            path: path.into(),
            data: data.into(),
        });
        self
    }

    /// Adds a write operation.
    #[must_use]
    pub fn write<P: Into<String>, D: Into<Bytes>>(mut self, path: P, data: D) -> Self {
        self.operations.push(Operation::Write {
            path: path.into(),
            data: data.into(),
        });
        self
    }

    /// Adds a delete operation.
    #[must_use]
    pub fn delete<P: Into<String>>(mut self, path: P) -> Self {
        self.operations.push(Operation::Delete { path: path.into() });
        self
    }

    /// Returns true if the transaction has no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// The number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// The operations in commit order.
    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }
}

impl IntoIterator for Transaction {
    type Item = Operation;
    type IntoIter = std::vec::IntoIter<Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.into_iter()
    }
}
