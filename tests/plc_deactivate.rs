//! Tests for retiring a `did:plc`, by tombstone or by the soft fallback.

mod common;

use common::MockDirectory;
use did_plc::{
    DeactivateOutcome, DidManager, Directory, Error, KeyStore, MemoryKeyStore, SignedEntry,
    UpdateChanges,
};

// The directory accepts the tombstone: the log ends in a minimal
// {type, prev, sig} record and the local record is marked deactivated.
#[tokio::test]
async fn tombstone_path() {
    let manager = DidManager::new(MockDirectory::new(), MemoryKeyStore::new());
    let created = manager.create(Some("my-plugin"), None).await.expect("should create");

    let genesis_cid = manager
        .directory()
        .last_operation(&created.did)
        .await
        .expect("should fetch")
        .expect("genesis should be the head")
        .cid;

    let outcome = manager.deactivate(&created.did).await.expect("should deactivate");
    assert_eq!(outcome, DeactivateOutcome::Tombstoned);

    let head = manager
        .directory()
        .last_operation(&created.did)
        .await
        .expect("should fetch")
        .expect("tombstone should be the head");
    let SignedEntry::Tombstone(tombstone) = &head.operation else {
        panic!("head should be a tombstone");
    };
    assert_eq!(tombstone.prev(), genesis_cid);

    let wire = head.operation.to_wire();
    assert_eq!(wire.as_object().expect("object").len(), 3);
    assert_eq!(wire["type"], "plc_tombstone");

    let record = manager
        .store()
        .get(&created.did)
        .expect("should read")
        .expect("record should exist");
    assert!(!record.active);
    assert!(record.deactivated_at.is_some());
}

// The directory refuses tombstones: the fallback submits a plc_operation
// emptied of all authority, and the local record is still marked
// deactivated.
#[tokio::test]
async fn soft_deactivation_fallback() {
    let manager = DidManager::new(MockDirectory::rejecting_tombstones(), MemoryKeyStore::new());
    let created = manager
        .create(Some("my-plugin"), Some("https://pds.example.com"))
        .await
        .expect("should create");

    let outcome = manager.deactivate(&created.did).await.expect("should deactivate");
    assert_eq!(outcome, DeactivateOutcome::SoftDeactivated);

    let head = manager
        .directory()
        .last_operation(&created.did)
        .await
        .expect("should fetch")
        .expect("fallback should be the head");
    let wire = head.operation.to_wire();

    assert_eq!(wire["type"], "plc_operation");
    assert_eq!(wire["rotationKeys"], serde_json::json!([]));
    assert_eq!(wire["verificationMethods"], serde_json::json!({}));
    assert_eq!(wire["alsoKnownAs"], serde_json::json!([]));
    assert_eq!(wire["services"], serde_json::json!({}));
    assert!(wire["prev"].is_string());

    let record = manager
        .store()
        .get(&created.did)
        .expect("should read")
        .expect("record should exist");
    assert!(!record.active);
}

// A tombstoned DID accepts nothing further.
#[tokio::test]
async fn tombstoned_did_is_closed() {
    let manager = DidManager::new(MockDirectory::new(), MemoryKeyStore::new());
    let created = manager.create(Some("my-plugin"), None).await.expect("should create");
    manager.deactivate(&created.did).await.expect("should deactivate");

    let changes = UpdateChanges { handle: Some("revived".to_string()), ..Default::default() };
    let err = manager.update(&created.did, changes).await.expect_err("should fail");
    assert!(matches!(err, Error::Directory { status: Some(410), .. }));
}

// Deactivating a DID the store has never seen fails before any network
// call.
#[tokio::test]
async fn deactivate_requires_local_key() {
    let manager = DidManager::new(MockDirectory::new(), MemoryKeyStore::new());
    let err = manager
        .deactivate("did:plc:aaaaaaaaaaaaaaaaaaaaaaaa")
        .await
        .expect_err("should fail");
    assert!(matches!(err, Error::MissingLocalKey(_)));
}
