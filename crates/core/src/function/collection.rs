use serde::{Deserialize, Serialize};

use super::FunctionId;

/// A set of functions started and stopped together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    #[serde(default)]
    functions: Vec<FunctionId>,
}

impl Collection {
    pub fn new<I>(functions: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<FunctionId>,
    {
        let mut collection = Self::default();
        for id in functions {
            collection.add_function(id.into());
        }
        collection
    }

    /// Members in the order they are started.
    pub fn functions(&self) -> &[FunctionId] {
        &self.functions
    }

    /// Adds a member. A function is listed at most once.
    pub fn add_function(&mut self, id: FunctionId) -> bool {
        if self.functions.contains(&id) {
            return false;
        }
        self.functions.push(id);
        true
    }

    pub fn remove_function(&mut self, id: FunctionId) -> bool {
        let before = self.functions.len();
        self.functions.retain(|member| *member != id);
        self.functions.len() != before
    }

    pub fn contains(&self, id: FunctionId) -> bool {
        self.functions.contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn members_are_unique_and_ordered() {
        let mut collection = Collection::new([3, 1, 3]);
        assert_eq!(collection.functions(), [FunctionId(3), FunctionId(1)]);
        assert!(collection.add_function(FunctionId(7)));
        assert!(!collection.add_function(FunctionId(1)));
        assert!(collection.remove_function(FunctionId(3)));
        assert!(!collection.remove_function(FunctionId(3)));
        assert_eq!(collection.functions(), [FunctionId(1), FunctionId(7)]);
    }
}
