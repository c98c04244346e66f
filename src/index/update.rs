use crate::model::{NodeId, PropertyValue};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpdateKind {
    Added,
    Changed,
    Removed,
}

/// A committed change to one node's indexed property.
///
/// For a given node, updates must reach the index writer in the order they
/// were enqueued.
#[derive(Debug, Clone, PartialEq)]
pub struct NodePropertyUpdate {
    pub node: NodeId,
    pub kind: UpdateKind,
    pub value_before: Option<PropertyValue>,
    pub value_after: Option<PropertyValue>,
}

impl NodePropertyUpdate {
    pub fn added(node: NodeId, value: PropertyValue) -> Self {
        Self {
            node,
            kind: UpdateKind::Added,
            value_before: None,
            value_after: Some(value),
        }
    }

    pub fn changed(node: NodeId, before: PropertyValue, after: PropertyValue) -> Self {
        Self {
            node,
            kind: UpdateKind::Changed,
            value_before: Some(before),
            value_after: Some(after),
        }
    }

    pub fn removed(node: NodeId, before: PropertyValue) -> Self {
        Self {
            node,
            kind: UpdateKind::Removed,
            value_before: Some(before),
            value_after: None,
        }
    }
}
