mod common;

use common::{did, node};
use pear::network::LoopbackNetwork;
use pear::permissions::PermissionStore;
use pear::{DbOperations, Grantee, PearError, RecordUri, CLIQUE_COLLECTION};
use serde_json::json;

fn store() -> PermissionStore {
    PermissionStore::new(DbOperations::temporary().unwrap())
}

#[test]
fn owner_is_implicitly_allowed() {
    let store = store();
    let alice = did("did:plc:alice");
    for (collection, key) in [("app.posts", "p1"), ("app.likes", ""), ("pear.clique", "x")] {
        assert!(store.has_permission(&alice, &alice, collection, key).unwrap());
    }
    assert!(store.list_permissions_by_owner(&alice).unwrap().is_empty());
}

#[test]
fn collection_grant_then_removal() {
    let store = store();
    let (alice, bob) = (did("did:plc:alice"), did("did:plc:bob"));
    let grantee = [Grantee::from(bob.clone())];

    assert!(!store.has_permission(&bob, &alice, "app.posts", "p1").unwrap());
    store
        .add_read_permission(&grantee, &alice, "app.posts", None)
        .unwrap();
    assert!(store.has_permission(&bob, &alice, "app.posts", "p1").unwrap());
    assert!(store.has_permission(&bob, &alice, "app.posts", "anything").unwrap());
    assert!(!store.has_permission(&bob, &alice, "app.likes", "p1").unwrap());

    store
        .remove_read_permission(&grantee, &alice, "app.posts", None)
        .unwrap();
    assert!(!store.has_permission(&bob, &alice, "app.posts", "p1").unwrap());
}

#[test]
fn deny_on_one_key_leaves_the_rest_allowed() {
    let store = store();
    let (alice, bob) = (did("did:plc:alice"), did("did:plc:bob"));
    let grantee = [Grantee::from(bob.clone())];

    store
        .add_read_permission(&grantee, &alice, "app.posts", None)
        .unwrap();
    store
        .remove_read_permission(&grantee, &alice, "app.posts", Some("secret"))
        .unwrap();

    assert!(store.has_permission(&bob, &alice, "app.posts", "p1").unwrap());
    assert!(!store.has_permission(&bob, &alice, "app.posts", "secret").unwrap());

    // Granting the key again replaces the deny.
    store
        .add_read_permission(&grantee, &alice, "app.posts", Some("secret"))
        .unwrap();
    assert!(store.has_permission(&bob, &alice, "app.posts", "secret").unwrap());
}

#[test]
fn removing_a_key_grant_without_a_broader_allow_deletes_it() {
    let store = store();
    let (alice, bob) = (did("did:plc:alice"), did("did:plc:bob"));
    let grantee = [Grantee::from(bob.clone())];

    store
        .add_read_permission(&grantee, &alice, "app.posts", Some("p1"))
        .unwrap();
    store
        .remove_read_permission(&grantee, &alice, "app.posts", Some("p1"))
        .unwrap();
    assert!(store.grants_between(&grantee[0], &alice).unwrap().is_empty());
}

#[test]
fn wildcard_grants_lose_to_longer_patterns() {
    let store = store();
    let (alice, bob) = (did("did:plc:alice"), did("did:plc:bob"));
    let grantee = [Grantee::from(bob.clone())];

    store.add_read_permission(&grantee, &alice, "app.*", None).unwrap();
    assert!(store.has_permission(&bob, &alice, "app.posts", "p1").unwrap());
    assert!(store.has_permission(&bob, &alice, "app.feed.items", "i1").unwrap());
    assert!(!store.has_permission(&bob, &alice, "other.posts", "p1").unwrap());

    store
        .add_read_permission(&grantee, &alice, "app.feed.*", None)
        .unwrap();
    store
        .remove_read_permission(&grantee, &alice, "app.feed.items", Some("i1"))
        .unwrap();
    assert!(!store.has_permission(&bob, &alice, "app.feed.items", "i1").unwrap());
    assert!(store.has_permission(&bob, &alice, "app.feed.items", "i2").unwrap());
}

#[test]
fn repeated_grants_keep_one_row() {
    let store = store();
    let (alice, bob) = (did("did:plc:alice"), did("did:plc:bob"));
    let grantee = Grantee::from(bob.clone());

    for _ in 0..3 {
        store
            .add_read_permission(&[grantee.clone()], &alice, "app.posts", Some("p1"))
            .unwrap();
    }
    // One granted row plus the synthetic self-allow.
    let rows = store
        .list_read_permissions_by_grantee(&grantee, "app.posts")
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.iter().filter(|row| row.owner == alice).count(), 1);
}

#[test]
fn collection_grant_supersedes_narrower_rows() {
    let store = store();
    let (alice, bob) = (did("did:plc:alice"), did("did:plc:bob"));
    let grantee = Grantee::from(bob.clone());

    store
        .add_read_permission(&[grantee.clone()], &alice, "app.posts", Some("p1"))
        .unwrap();
    store
        .add_read_permission(&[grantee.clone()], &alice, "app.posts", None)
        .unwrap();
    let rows = store.grants_between(&grantee, &alice).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].record_key, None);

    let lexicon = store.list_read_permissions_by_lexicon(&alice).unwrap();
    assert_eq!(lexicon.get("app.posts"), Some(&vec!["did:plc:bob".to_string()]));
}

#[test]
fn empty_grantee_lists_are_rejected() {
    let store = store();
    let alice = did("did:plc:alice");
    let result = store.add_read_permission(&[], &alice, "app.posts", None);
    assert!(matches!(result, Err(PearError::InvalidInput(_))));
}

#[tokio::test]
async fn clique_membership_is_transitive_and_revocable() {
    let network = LoopbackNetwork::new();
    let pear = node(&network, &["did:plc:alice", "did:plc:bob"]);
    let (alice, bob) = (did("did:plc:alice"), did("did:plc:bob"));
    let clique = RecordUri::clique(alice.clone(), "friends").unwrap();
    let member = [Grantee::from(bob.clone())];

    pear.add_permissions(&alice, &member, &alice, CLIQUE_COLLECTION, Some("friends"))
        .await
        .unwrap();
    pear.add_permissions(
        &alice,
        &[Grantee::Clique(clique.clone())],
        &alice,
        "app.posts",
        Some("r1"),
    )
    .await
    .unwrap();

    assert!(pear
        .has_permission(&alice, &bob, &alice, "app.posts", "r1")
        .await
        .unwrap());
    assert!(!pear
        .has_permission(&alice, &bob, &alice, "app.posts", "r2")
        .await
        .unwrap());

    pear.remove_permissions(&alice, &member, &alice, CLIQUE_COLLECTION, Some("friends"))
        .unwrap();
    assert!(!pear
        .has_permission(&alice, &bob, &alice, "app.posts", "r1")
        .await
        .unwrap());
}

#[tokio::test]
async fn direct_deny_on_a_key_outranks_a_clique_collection_grant() {
    let network = LoopbackNetwork::new();
    let pear = node(&network, &["did:plc:alice", "did:plc:bob"]);
    let (alice, bob) = (did("did:plc:alice"), did("did:plc:bob"));
    let clique = Grantee::Clique(RecordUri::clique(alice.clone(), "friends").unwrap());
    let direct = [Grantee::from(bob.clone())];

    pear.add_permissions(&alice, &direct, &alice, CLIQUE_COLLECTION, Some("friends"))
        .await
        .unwrap();
    pear.add_permissions(&alice, &[clique], &alice, "app.posts", None)
        .await
        .unwrap();
    pear.add_permissions(&alice, &direct, &alice, "app.posts", None)
        .await
        .unwrap();
    pear.remove_permissions(&alice, &direct, &alice, "app.posts", Some("p2"))
        .unwrap();

    pear.put_record(
        &alice,
        &alice,
        pear::NewRecord::new("app.posts", json!({"n": 1})).with_key("p1"),
        false,
        &[],
    )
    .await
    .unwrap();
    assert!(pear.get_record(&bob, &alice, "app.posts", "p1").await.is_ok());
    assert!(!pear
        .has_permission(&alice, &bob, &alice, "app.posts", "p2")
        .await
        .unwrap());
}
