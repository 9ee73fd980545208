//! Species label to class index mapping.

use std::collections::HashMap;

use ndarray::Array1;

use crate::error::{Error, Result};

/// Bijection between species labels and `0..num_classes`.
///
/// Built once from the training split, in first-seen order, and handed
/// unchanged to the validation split.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassIndex {
    classes: Vec<String>,
    class_to_idx: HashMap<String, usize>,
}

impl ClassIndex {
    /// Build from labels in manifest order; duplicates are ignored.
    pub fn build<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut classes = Vec::new();
        let mut class_to_idx = HashMap::new();
        for label in labels {
            let label = label.as_ref();
            if !class_to_idx.contains_key(label) {
                class_to_idx.insert(label.to_string(), classes.len());
                classes.push(label.to_string());
            }
        }
        Self {
            classes,
            class_to_idx,
        }
    }

    pub fn index_of(&self, label: &str) -> Result<usize> {
        self.class_to_idx
            .get(label)
            .copied()
            .ok_or_else(|| Error::UnknownLabel(label.to_string()))
    }

    /// One-hot vector for `label`.
    pub fn encode(&self, label: &str) -> Result<Array1<f32>> {
        let mut one_hot = Array1::zeros(self.num_classes());
        one_hot[self.index_of(label)?] = 1.0;
        Ok(one_hot)
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn class_to_idx(&self) -> &HashMap<String, usize> {
        &self.class_to_idx
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_seen_order_and_contiguous() {
        let index = ClassIndex::build(["wren", "robin", "wren", "owl", "robin"]);
        assert_eq!(index.classes(), &["wren", "robin", "owl"]);
        assert_eq!(index.num_classes(), 3);
        let mut indices: Vec<usize> = index.class_to_idx().values().copied().collect();
        indices.sort();
        assert_eq!(indices, vec![0, 1, 2]);
        for (i, class) in index.classes().iter().enumerate() {
            assert_eq!(index.index_of(class).unwrap(), i);
        }
    }

    #[test]
    fn test_encode_one_hot() {
        let index = ClassIndex::build(["a", "b", "c"]);
        let v = index.encode("b").unwrap();
        assert_eq!(v.to_vec(), vec![0.0, 1.0, 0.0]);
        assert_eq!(v.sum(), 1.0);
    }

    #[test]
    fn test_unknown_label_is_error() {
        let index = ClassIndex::build(["a"]);
        assert!(matches!(index.encode("z"), Err(Error::UnknownLabel(l)) if l == "z"));
    }
}
