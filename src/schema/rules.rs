use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{KernelError, Result};
use crate::schema::descriptor::{IndexDescriptor, UniquenessConstraint};

pub type RuleId = u64;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleState {
    Populating,
    Online,
    Failed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleKind {
    Regular,
    ConstraintBacking { owner: Option<RuleId> },
}

impl RuleKind {
    pub fn is_constraint_backing(&self) -> bool {
        matches!(self, RuleKind::ConstraintBacking { .. })
    }
}

/// Persisted record of one index: what it covers, what kind it is, and how
/// far its population got.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRule {
    pub id: RuleId,
    pub descriptor: IndexDescriptor,
    pub kind: RuleKind,
    pub state: RuleState,
    pub failure_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniquenessConstraintRule {
    pub id: RuleId,
    pub descriptor: IndexDescriptor,
    pub owned_index: RuleId,
}

impl UniquenessConstraintRule {
    pub fn constraint(&self) -> UniquenessConstraint {
        UniquenessConstraint {
            label: self.descriptor.label,
            property_key: self.descriptor.property_key,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SchemaRecords {
    next_id: RuleId,
    indexes: Vec<IndexRule>,
    constraints: Vec<UniquenessConstraintRule>,
}

/// Owner of the persisted schema rules.
///
/// Records are written to a temp file and renamed into place, so a crash in
/// the middle of a write never leaves a torn rule file behind.
pub struct SchemaStore {
    path: PathBuf,
    records: Mutex<SchemaRecords>,
}

impl SchemaStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)
                .map_err(|e| KernelError::Serialization(format!("schema rule file: {e}")))?
        } else {
            SchemaRecords::default()
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    fn persist(&self, records: &SchemaRecords) -> Result<()> {
        let raw = serde_json::to_string_pretty(records)
            .map_err(|e| KernelError::Serialization(format!("schema rule file: {e}")))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn add_index_rule(&self, descriptor: IndexDescriptor, kind: RuleKind) -> Result<IndexRule> {
        let mut records = self.records.lock();
        if records.indexes.iter().any(|r| r.descriptor == descriptor) {
            return Err(KernelError::AlreadyIndexed(descriptor));
        }
        records.next_id += 1;
        let rule = IndexRule {
            id: records.next_id,
            descriptor,
            kind,
            state: RuleState::Populating,
            failure_message: None,
        };
        records.indexes.push(rule.clone());
        self.persist(&records)?;
        debug!(index = %descriptor, rule_id = rule.id, "index rule added");
        Ok(rule)
    }

    pub fn remove_index_rule(&self, descriptor: IndexDescriptor) -> Result<IndexRule> {
        let mut records = self.records.lock();
        let position = records
            .indexes
            .iter()
            .position(|r| r.descriptor == descriptor)
            .ok_or(KernelError::NoSuchIndex(descriptor))?;
        let rule = records.indexes.remove(position);
        self.persist(&records)?;
        debug!(index = %descriptor, rule_id = rule.id, "index rule removed");
        Ok(rule)
    }

    /// Creates a uniqueness constraint together with the backing index it
    /// owns.
    pub fn add_constraint(
        &self,
        descriptor: IndexDescriptor,
    ) -> Result<(UniquenessConstraintRule, IndexRule)> {
        let mut records = self.records.lock();
        if records
            .constraints
            .iter()
            .any(|c| c.descriptor == descriptor)
        {
            return Err(KernelError::AlreadyConstrained {
                index: descriptor,
                constraint: UniquenessConstraint {
                    label: descriptor.label,
                    property_key: descriptor.property_key,
                },
            });
        }
        if records.indexes.iter().any(|r| r.descriptor == descriptor) {
            return Err(KernelError::AlreadyIndexed(descriptor));
        }
        records.next_id += 1;
        let constraint_id = records.next_id;
        records.next_id += 1;
        let index_rule = IndexRule {
            id: records.next_id,
            descriptor,
            kind: RuleKind::ConstraintBacking {
                owner: Some(constraint_id),
            },
            state: RuleState::Populating,
            failure_message: None,
        };
        let constraint_rule = UniquenessConstraintRule {
            id: constraint_id,
            descriptor,
            owned_index: index_rule.id,
        };
        records.indexes.push(index_rule.clone());
        records.constraints.push(constraint_rule.clone());
        self.persist(&records)?;
        debug!(constraint = %constraint_rule.constraint(), "uniqueness constraint added");
        Ok((constraint_rule, index_rule))
    }

    pub fn remove_constraint(&self, descriptor: IndexDescriptor) -> Result<UniquenessConstraintRule> {
        let mut records = self.records.lock();
        let position = records
            .constraints
            .iter()
            .position(|c| c.descriptor == descriptor)
            .ok_or_else(|| {
                KernelError::InvalidArgument(format!("no uniqueness constraint on {descriptor}"))
            })?;
        let constraint = records.constraints.remove(position);
        records
            .indexes
            .retain(|r| r.id != constraint.owned_index);
        self.persist(&records)?;
        Ok(constraint)
    }

    pub fn index_rule(&self, descriptor: IndexDescriptor) -> Option<IndexRule> {
        self.records
            .lock()
            .indexes
            .iter()
            .find(|r| r.descriptor == descriptor)
            .cloned()
    }

    pub fn index_rules(&self) -> Vec<IndexRule> {
        self.records.lock().indexes.clone()
    }

    pub fn constraints(&self) -> Vec<UniquenessConstraintRule> {
        self.records.lock().constraints.clone()
    }

    pub fn constraint_for(&self, descriptor: IndexDescriptor) -> Option<UniquenessConstraintRule> {
        self.records
            .lock()
            .constraints
            .iter()
            .find(|c| c.descriptor == descriptor)
            .cloned()
    }

    pub fn set_online(&self, descriptor: IndexDescriptor) -> Result<()> {
        self.update_rule(descriptor, |rule| {
            rule.state = RuleState::Online;
            rule.failure_message = None;
        })
    }

    pub fn set_failed(&self, descriptor: IndexDescriptor, message: &str) -> Result<()> {
        self.update_rule(descriptor, |rule| {
            rule.state = RuleState::Failed;
            rule.failure_message = Some(message.to_string());
        })
    }

    fn update_rule(
        &self,
        descriptor: IndexDescriptor,
        mutate: impl FnOnce(&mut IndexRule),
    ) -> Result<()> {
        let mut records = self.records.lock();
        let rule = records
            .indexes
            .iter_mut()
            .find(|r| r.descriptor == descriptor)
            .ok_or(KernelError::NoSuchIndex(descriptor))?;
        mutate(rule);
        self.persist(&records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rules_survive_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("schema_rules.json");
        {
            let store = SchemaStore::open(&path).expect("open");
            store
                .add_index_rule(IndexDescriptor::new(5u64, 8u64), RuleKind::Regular)
                .expect("add rule");
            store
                .set_failed(IndexDescriptor::new(5u64, 8u64), "boom")
                .expect("set failed");
        }
        let store = SchemaStore::open(&path).expect("reopen");
        let rule = store
            .index_rule(IndexDescriptor::new(5u64, 8u64))
            .expect("rule present");
        assert_eq!(rule.state, RuleState::Failed);
        assert_eq!(rule.failure_message.as_deref(), Some("boom"));
    }

    #[test]
    fn duplicate_descriptor_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let store = SchemaStore::open(dir.path().join("schema_rules.json")).expect("open");
        let descriptor = IndexDescriptor::new(5u64, 8u64);
        store
            .add_index_rule(descriptor, RuleKind::Regular)
            .expect("first add");
        let err = store
            .add_index_rule(descriptor, RuleKind::Regular)
            .expect_err("duplicate add");
        assert!(matches!(err, KernelError::AlreadyIndexed(_)));
    }

    #[test]
    fn constraint_owns_its_backing_index() {
        let dir = tempdir().expect("tempdir");
        let store = SchemaStore::open(dir.path().join("schema_rules.json")).expect("open");
        let descriptor = IndexDescriptor::new(5u64, 8u64);
        let (constraint, index) = store.add_constraint(descriptor).expect("add constraint");
        assert_eq!(constraint.owned_index, index.id);
        assert_eq!(
            index.kind,
            RuleKind::ConstraintBacking {
                owner: Some(constraint.id)
            }
        );

        store.remove_constraint(descriptor).expect("remove");
        assert!(store.index_rule(descriptor).is_none());
        assert!(store.constraint_for(descriptor).is_none());
    }
}
