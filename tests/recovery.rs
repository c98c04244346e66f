use penumbra::index::IndexState;
use penumbra::schema::{IndexDescriptor, RuleKind, RuleState, SchemaStore};
use penumbra::{Config, GraphKernel};
use tempfile::tempdir;

const LABEL: u64 = 5;
const PROPERTY_KEY: u64 = 8;

#[test]
fn ownerless_constraint_index_does_not_survive_restart() {
    let dir = tempdir().expect("tempdir");
    {
        let db = GraphKernel::open(dir.path(), Config::default()).expect("open kernel");
        db.transactor()
            .execute(|tx| tx.create_constraint_backing_index(LABEL, PROPERTY_KEY))
            .expect("create backing index without owner");
        // The orphan exists until the restart.
        assert_eq!(db.indexes().len(), 1);
    }

    let db = GraphKernel::open(dir.path(), Config::default()).expect("reopen kernel");
    assert!(db.indexes().is_empty());
    let tx = db.schema_transaction();
    assert!(tx.indexes_for_label(LABEL).is_empty());
    assert!(tx.unique_indexes_for_label(LABEL).is_empty());
}

#[test]
fn owned_constraint_index_survives_restart() {
    let dir = tempdir().expect("tempdir");
    {
        let db = GraphKernel::open(dir.path(), Config::default()).expect("open kernel");
        let mut tx = db.schema_transaction();
        tx.uniqueness_constraint_create(LABEL, PROPERTY_KEY)
            .expect("create constraint");
        tx.commit().expect("commit");
    }

    let db = GraphKernel::open(dir.path(), Config::default()).expect("reopen kernel");
    let tx = db.schema_transaction();
    assert_eq!(
        tx.unique_indexes_for_label(LABEL),
        vec![IndexDescriptor::new(LABEL, PROPERTY_KEY)]
    );
    assert!(tx.indexes_for_label(LABEL).is_empty());
}

#[test]
fn populating_rule_is_repopulated_on_open() {
    let dir = tempdir().expect("tempdir");
    let descriptor = IndexDescriptor::new(LABEL, PROPERTY_KEY);
    {
        // A rule persisted mid-population, as left behind by a cancelled or
        // crashed populator.
        let rules =
            SchemaStore::open(dir.path().join("schema_rules.json")).expect("open rules");
        let rule = rules
            .add_index_rule(descriptor, RuleKind::Regular)
            .expect("add rule");
        assert_eq!(rule.state, RuleState::Populating);
    }

    let db = GraphKernel::open(dir.path(), Config::default()).expect("open kernel");
    assert_eq!(db.index_state(descriptor).expect("state"), IndexState::Online);
}

#[test]
fn failed_rule_restores_with_its_persisted_cause() {
    let dir = tempdir().expect("tempdir");
    let descriptor = IndexDescriptor::new(LABEL, PROPERTY_KEY);
    {
        let rules =
            SchemaStore::open(dir.path().join("schema_rules.json")).expect("open rules");
        rules
            .add_index_rule(descriptor, RuleKind::Regular)
            .expect("add rule");
        rules
            .set_failed(descriptor, "earlier population failure")
            .expect("set failed");
    }

    let db = GraphKernel::open(dir.path(), Config::default()).expect("open kernel");
    assert_eq!(
        db.index_state(descriptor).expect("state"),
        IndexState::Failed {
            message: "earlier population failure".to_string()
        }
    );
}

#[test]
fn online_rule_is_rebuilt_before_open_returns() {
    let dir = tempdir().expect("tempdir");
    let descriptor = IndexDescriptor::new(LABEL, PROPERTY_KEY);
    {
        let db = GraphKernel::open(dir.path(), Config::default()).expect("open kernel");
        let mut tx = db.schema_transaction();
        tx.index_create(LABEL, PROPERTY_KEY).expect("create index");
        tx.commit().expect("commit");
        db.await_index_population(descriptor);
        assert_eq!(db.index_state(descriptor).expect("state"), IndexState::Online);
    }

    let db = GraphKernel::open(dir.path(), Config::default()).expect("reopen kernel");
    assert_eq!(db.index_state(descriptor).expect("state"), IndexState::Online);
}
