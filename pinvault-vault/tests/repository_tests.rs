mod support;

use pinvault_blobstore::MemoryBlobStore;
use pinvault_crypto::{
    AuthenticationGate, Challenge, CipherCodec, KeyManager, KeyPolicy, PresenceDecision,
    PromptInfo, SoftwareKeyStore,
};
use pinvault_vault::{SecretRecord, VaultError, VaultRepository};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use support::{fixture, repository_over, PausingStore, SignalledMaterialStore};

fn flip_byte(path: &std::path::Path, index: usize) {
    let mut bytes = std::fs::read(path).unwrap();
    bytes[index] ^= 0x01;
    std::fs::write(path, bytes).unwrap();
}

// ── End to end ───────────────────────────────────────────────────

#[tokio::test]
async fn door_code_round_trip() {
    let f = fixture(KeyPolicy::default());

    let added = f.repo.add_secret("Door Code", "4821", None).await.unwrap();
    assert_eq!(added.label(), "Door Code");
    assert_eq!(added.value(), "4821");

    let listed = f.repo.list_secrets().await.unwrap();
    assert_eq!(listed, vec![added.clone()]);

    let fetched = f.repo.get_secret(added.id(), None).await.unwrap();
    assert_eq!(fetched, added);

    let raw = std::fs::read(f.blob_path(added.id())).unwrap();
    assert!(raw.len() >= 12 + 16);
    assert!(!raw.windows(4).any(|w| w == b"4821"));
    assert!(!raw.windows(9).any(|w| w == b"Door Code"));

    assert!(f.repo.delete_secret(added.id()).await.unwrap());
    assert!(f.repo.list_secrets().await.unwrap().is_empty());
    assert!(matches!(
        f.repo.get_secret(added.id(), None).await,
        Err(VaultError::NotFound(_))
    ));
}

#[tokio::test]
async fn records_are_listed_in_creation_order() {
    let f = fixture(KeyPolicy::default());
    for label in ["first", "second", "third"] {
        f.repo.add_secret(label, "0000", None).await.unwrap();
    }

    let listed = f.repo.list_secrets().await.unwrap();
    let keys: Vec<(i64, String)> = listed
        .iter()
        .map(|r| (r.created_at(), r.id().to_string()))
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();

    assert_eq!(listed.len(), 3);
    assert_eq!(keys, sorted);
}

#[tokio::test]
async fn concurrent_adds_all_land() {
    let f = fixture(KeyPolicy::default());

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let repo = f.repo.clone();
            tokio::spawn(async move { repo.add_secret(&format!("code {i}"), "1234", None).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(f.repo.snapshot().len(), 10);
    assert_eq!(f.repo.list_secrets().await.unwrap().len(), 10);
}

// ── Listing resilience ───────────────────────────────────────────

#[tokio::test]
async fn corrupted_blob_is_skipped_by_listing_but_fails_get() {
    let f = fixture(KeyPolicy::default());
    let a = f.repo.add_secret("A", "1111", None).await.unwrap();
    let b = f.repo.add_secret("B", "2222", None).await.unwrap();
    let c = f.repo.add_secret("C", "3333", None).await.unwrap();

    flip_byte(&f.blob_path(b.id()), 20);

    let snapshot = f.repo.refresh().await.unwrap();
    let ids: Vec<&str> = snapshot.records.iter().map(|r| r.id()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&a.id()) && ids.contains(&c.id()));
    assert_eq!(snapshot.unreadable, vec![b.id().to_string()]);

    assert!(matches!(
        f.repo.get_secret(b.id(), None).await,
        Err(VaultError::CorruptRecord(_))
    ));
}

#[tokio::test]
async fn truncated_blob_is_unreadable() {
    let f = fixture(KeyPolicy::default());
    let record = f.repo.add_secret("A", "1111", None).await.unwrap();
    std::fs::write(f.blob_path(record.id()), b"short").unwrap();

    assert!(f.repo.list_secrets().await.unwrap().is_empty());
    assert_eq!(f.repo.snapshot().unreadable, vec![record.id().to_string()]);
    assert!(matches!(
        f.repo.get_secret(record.id(), None).await,
        Err(VaultError::CorruptRecord(_))
    ));
}

#[tokio::test]
async fn swapped_blob_is_detected() {
    let f = fixture(KeyPolicy::default());
    let a = f.repo.add_secret("A", "1111", None).await.unwrap();
    let b = f.repo.add_secret("B", "2222", None).await.unwrap();

    std::fs::copy(f.blob_path(b.id()), f.blob_path(a.id())).unwrap();

    assert!(matches!(
        f.repo.get_secret(a.id(), None).await,
        Err(VaultError::CorruptRecord(_))
    ));
    let snapshot = f.repo.refresh().await.unwrap();
    assert_eq!(snapshot.records, vec![b]);
    assert_eq!(snapshot.unreadable, vec![a.id().to_string()]);
}

#[tokio::test]
async fn foreign_files_are_ignored() {
    let f = fixture(KeyPolicy::default());
    let record = f.repo.add_secret("A", "1111", None).await.unwrap();
    std::fs::write(f.records_dir().join("notes.txt"), b"hello").unwrap();

    let snapshot = f.repo.refresh().await.unwrap();
    assert_eq!(snapshot.records, vec![record]);
    assert!(snapshot.unreadable.is_empty());
}

#[tokio::test]
async fn empty_store_lists_nothing() {
    let f = fixture(KeyPolicy::default());

    assert!(f.repo.list_secrets().await.unwrap().is_empty());
    assert!(!f.records_dir().exists());
}

#[tokio::test]
async fn enumeration_failure_fails_the_refresh() {
    let f = fixture(KeyPolicy::default());
    std::fs::write(f.records_dir(), b"not a directory").unwrap();

    assert!(matches!(f.repo.refresh().await, Err(VaultError::Io(_))));
}

// ── Deletion ─────────────────────────────────────────────────────

#[tokio::test]
async fn delete_is_idempotent() {
    let f = fixture(KeyPolicy::default());
    assert!(!f.repo.delete_secret("no-such-id").await.unwrap());
    assert!(!f.repo.delete_secret("../escape").await.unwrap());

    let record = f.repo.add_secret("A", "1111", None).await.unwrap();
    assert!(f.repo.delete_secret(record.id()).await.unwrap());
    assert!(!f.repo.delete_secret(record.id()).await.unwrap());
    assert!(f.repo.snapshot().get(record.id()).is_none());
}

#[tokio::test]
async fn delete_does_not_need_presence() {
    let f = fixture(KeyPolicy::presence_required());
    let verifier = Arc::new(f.key_store.presence_verifier(PresenceDecision::Approve));
    let gate = AuthenticationGate::new(verifier.clone(), PromptInfo::default());
    let record = f.repo.add_secret("A", "1111", Some(&gate)).await.unwrap();
    let prompts = verifier.prompts();

    assert!(f.repo.delete_secret(record.id()).await.unwrap());
    assert_eq!(verifier.prompts(), prompts);
}

// ── Observation ──────────────────────────────────────────────────

#[tokio::test]
async fn subscribers_see_current_value_then_updates() {
    let f = fixture(KeyPolicy::default());
    let mut rx = f.repo.subscribe();
    assert!(rx.borrow_and_update().is_empty());

    let record = f.repo.add_secret("A", "1111", None).await.unwrap();
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update().records, vec![record.clone()]);

    f.repo.refresh().await.unwrap();
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update().len(), 1);

    f.repo.delete_secret(record.id()).await.unwrap();
    rx.changed().await.unwrap();
    assert!(rx.borrow_and_update().is_empty());

    let late = f.repo.subscribe();
    assert!(late.borrow().is_empty());
}

#[tokio::test]
async fn deleting_unknown_id_does_not_notify() {
    let f = fixture(KeyPolicy::default());
    let mut rx = f.repo.subscribe();
    let _ = rx.borrow_and_update();

    f.repo.delete_secret("no-such-id").await.unwrap();
    assert!(!rx.has_changed().unwrap());
}

// ── Presence-gated keys ──────────────────────────────────────────

#[tokio::test]
async fn gated_add_without_challenge_touches_nothing() {
    let f = fixture(KeyPolicy::presence_required());

    let err = f.repo.add_secret("Door Code", "4821", None).await.unwrap_err();

    assert!(matches!(err, VaultError::AuthenticationRequired));
    assert!(!f.records_dir().exists());
    assert!(f.repo.snapshot().is_empty());
}

#[tokio::test]
async fn gated_vault_round_trips_with_approval() {
    let f = fixture(KeyPolicy::presence_required());
    let verifier = Arc::new(f.key_store.presence_verifier(PresenceDecision::Approve));
    let gate = AuthenticationGate::new(verifier.clone(), PromptInfo::default());
    let challenge: &dyn Challenge = &gate;

    let added = f.repo.add_secret("Door Code", "4821", Some(challenge)).await.unwrap();
    let fetched = f.repo.get_secret(added.id(), Some(challenge)).await.unwrap();
    assert_eq!(fetched, added);

    let snapshot = f.repo.refresh_with(Some(challenge)).await.unwrap();
    assert_eq!(snapshot.records, vec![added.clone()]);
    assert_eq!(verifier.prompts(), 3);
}

#[tokio::test]
async fn gated_refresh_without_challenge_keeps_last_snapshot() {
    let f = fixture(KeyPolicy::presence_required());
    let verifier = Arc::new(f.key_store.presence_verifier(PresenceDecision::Approve));
    let gate = AuthenticationGate::new(verifier, PromptInfo::default());
    let added = f.repo.add_secret("A", "1111", Some(&gate)).await.unwrap();

    assert!(matches!(
        f.repo.refresh().await,
        Err(VaultError::AuthenticationRequired)
    ));
    assert_eq!(f.repo.snapshot().records, vec![added]);
}

#[tokio::test]
async fn denied_get_surfaces_the_reason() {
    let f = fixture(KeyPolicy::presence_required());
    let verifier = Arc::new(f.key_store.presence_verifier(PresenceDecision::Approve));
    let gate = AuthenticationGate::new(verifier.clone(), PromptInfo::default());
    let added = f.repo.add_secret("A", "1111", Some(&gate)).await.unwrap();

    verifier.set_decision(PresenceDecision::Deny("no match".into()));
    let err = f.repo.get_secret(added.id(), Some(&gate)).await.unwrap_err();

    assert!(err.is_authentication());
    assert_eq!(err.to_string(), "authentication failed: no match");
}

#[tokio::test]
async fn cancelled_add_writes_nothing() {
    let f = fixture(KeyPolicy::presence_required());
    let verifier = Arc::new(f.key_store.presence_verifier(PresenceDecision::Hold));
    let gate = Arc::new(AuthenticationGate::new(verifier.clone(), PromptInfo::default()));

    let task = {
        let (repo, gate) = (f.repo.clone(), gate.clone());
        tokio::spawn(async move {
            let challenge: &dyn Challenge = gate.as_ref();
            repo.add_secret("Door Code", "4821", Some(challenge)).await
        })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        while !gate.is_prompting() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    gate.cancel();

    let result: Result<SecretRecord, VaultError> = task.await.unwrap();
    assert!(matches!(result, Err(VaultError::AuthenticationCancelled)));
    assert_eq!(verifier.dismissals(), 1);
    assert!(!f.records_dir().exists());
    assert!(f.repo.snapshot().is_empty());
}

// ── Refresh concurrency ──────────────────────────────────────────

#[tokio::test]
async fn delete_proceeds_while_a_refresh_waits_for_presence() {
    let f = fixture(KeyPolicy::presence_required());
    let verifier = Arc::new(f.key_store.presence_verifier(PresenceDecision::Approve));
    let gate = Arc::new(AuthenticationGate::new(verifier.clone(), PromptInfo::default()));
    let challenge: &dyn Challenge = gate.as_ref();
    let kept = f.repo.add_secret("Door Code", "4821", Some(challenge)).await.unwrap();
    let doomed = f.repo.add_secret("Gate Code", "1234", Some(challenge)).await.unwrap();

    verifier.set_decision(PresenceDecision::Hold);
    let refresh = {
        let (repo, gate) = (f.repo.clone(), gate.clone());
        tokio::spawn(async move {
            let challenge: &dyn Challenge = gate.as_ref();
            repo.refresh_with(Some(challenge)).await
        })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        while !gate.is_prompting() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    let deleted = tokio::time::timeout(Duration::from_secs(2), f.repo.delete_secret(doomed.id()))
        .await
        .expect("delete waited on the pending refresh");
    assert!(deleted.unwrap());

    gate.cancel();
    assert!(matches!(
        refresh.await.unwrap(),
        Err(VaultError::AuthenticationCancelled)
    ));
    let snapshot = f.repo.snapshot();
    assert!(snapshot.get(doomed.id()).is_none());
    assert!(snapshot.get(kept.id()).is_some());
}

#[tokio::test]
async fn refresh_keeps_changes_made_while_it_ran() {
    let store = Arc::new(PausingStore::default());
    let repo = repository_over(store.clone(), KeyPolicy::default());
    let removed = repo.add_secret("Door Code", "4821", None).await.unwrap();
    let kept = repo.add_secret("Gate Code", "1234", None).await.unwrap();

    store.pause_next_list();
    let refresh = {
        let repo = repo.clone();
        tokio::spawn(async move { repo.refresh().await })
    };
    store.listed().await;

    let (added, deleted) = tokio::time::timeout(Duration::from_secs(2), async {
        let added = repo.add_secret("Alarm", "9999", None).await.unwrap();
        let deleted = repo.delete_secret(removed.id()).await.unwrap();
        (added, deleted)
    })
    .await
    .expect("writes waited on the pending refresh");
    assert!(deleted);
    store.resume();

    let refreshed = refresh.await.unwrap().unwrap();
    assert_eq!(refreshed.len(), 2);
    assert!(refreshed.get(kept.id()).is_some());
    assert!(refreshed.get(added.id()).is_some());
    assert!(refreshed.get(removed.id()).is_none());
    assert_eq!(repo.snapshot(), refreshed);
}

#[tokio::test]
async fn key_lookup_leaves_the_runtime_free() {
    let (material, signal) = SignalledMaterialStore::new();
    let key_store = Arc::new(SoftwareKeyStore::with_persistence(Box::new(material)));
    let repo = VaultRepository::new(
        KeyManager::new(key_store.clone(), KeyPolicy::default()),
        CipherCodec::new(key_store),
        Arc::new(MemoryBlobStore::new()),
    );

    // Single-threaded runtime: the signal can only be sent if the blocked
    // key load is not running on it.
    let signaller = tokio::spawn(async move { signal.send(()).unwrap() });
    let added = repo.add_secret("Door Code", "4821", None).await.unwrap();

    signaller.await.unwrap();
    assert_eq!(repo.get_secret(added.id(), None).await.unwrap(), added);
}
