use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{LabelId, PropertyKeyId};

/// Value identifier of an index: the (label, property key) pair.
///
/// Two indexes never share a descriptor within one database; equality is
/// structural.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub label: LabelId,
    pub property_key: PropertyKeyId,
}

impl IndexDescriptor {
    pub fn new(label: impl Into<LabelId>, property_key: impl Into<PropertyKeyId>) -> Self {
        Self {
            label: label.into(),
            property_key: property_key.into(),
        }
    }
}

impl fmt::Display for IndexDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":label[{}](property[{}])", self.label, self.property_key)
    }
}

/// A uniqueness constraint over the same (label, property key) pair.
///
/// Rendered in the fixed form quoted by the `AlreadyConstrained` error
/// message.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct UniquenessConstraint {
    pub label: LabelId,
    pub property_key: PropertyKeyId,
}

impl UniquenessConstraint {
    pub fn new(label: impl Into<LabelId>, property_key: impl Into<PropertyKeyId>) -> Self {
        Self {
            label: label.into(),
            property_key: property_key.into(),
        }
    }

    pub fn descriptor(&self) -> IndexDescriptor {
        IndexDescriptor {
            label: self.label,
            property_key: self.property_key,
        }
    }
}

impl fmt::Display for UniquenessConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CONSTRAINT ON ( n:label[{}] ) ASSERT n.property[{}] IS UNIQUE",
            self.label, self.property_key
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_renders_label_and_property() {
        let descriptor = IndexDescriptor::new(5u64, 8u64);
        assert_eq!(descriptor.to_string(), ":label[5](property[8])");
    }

    #[test]
    fn constraint_renders_fixed_form() {
        let constraint = UniquenessConstraint::new(5u64, 8u64);
        assert_eq!(
            constraint.to_string(),
            "CONSTRAINT ON ( n:label[5] ) ASSERT n.property[8] IS UNIQUE"
        );
    }

    #[test]
    fn descriptors_compare_structurally() {
        assert_eq!(IndexDescriptor::new(5u64, 8u64), IndexDescriptor::new(5u64, 8u64));
        assert_ne!(IndexDescriptor::new(5u64, 8u64), IndexDescriptor::new(5u64, 9u64));
    }
}
