mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{due_rotation_config, local_session, small_config, RemoteUser, PASSWORD};
use palisade_envelope::SigningPublic;
use palisade_session::{
    MemoryReceiver, MemoryStore, MemoryTransport, OneTimeKind, ReceiverEvent, RefreshOptions,
    RotationScope, Session, SessionConfig, SessionError,
};

// === Scheduled PQ-KEM rotation ===

#[tokio::test]
async fn rotation_is_a_no_op_before_the_interval_elapses() {
    let h = local_session("alice", small_config()).await;
    assert!(!h.session.rotate_pqkem_if_needed().await.unwrap());
    assert!(h.transport.rotations().is_empty());
}

#[tokio::test]
async fn due_rotation_swaps_the_signed_pre_key_once() {
    let h = local_session("alice", small_config()).await;
    let before = h.session.active_configuration().await.unwrap();
    let old_pre_key = before.signed_devices[0].device.final_pqkem_public.clone();

    // Same store, a config whose interval has always elapsed.
    let due = Session::builder()
        .transport(h.transport.clone())
        .store(h.store.clone())
        .config(due_rotation_config())
        .build()
        .unwrap();
    due.start_session(PASSWORD).await.unwrap();

    assert!(due.rotate_pqkem_if_needed().await.unwrap());

    let after = due.active_configuration().await.unwrap();
    let device = &after.signed_devices[0];
    assert_ne!(device.device.final_pqkem_public, old_pre_key);
    // The re-signed entry still verifies under the unchanged signing key.
    let signing = after.signing_public().unwrap();
    assert!(device.verify(&signing).is_ok());
    assert_eq!(after.signing_public, before.signing_public);

    let rotations = h.transport.rotations();
    assert_eq!(rotations.len(), 1);
    assert_eq!(rotations[0].0, "alice");
    assert_eq!(rotations[0].2.psk_data, before.signing_public);

    // Freshly rotated: a session on the default schedule declines.
    let later = Session::builder()
        .transport(h.transport.clone())
        .store(h.store.clone())
        .config(small_config())
        .build()
        .unwrap();
    later.start_session(PASSWORD).await.unwrap();
    assert!(!later.rotate_pqkem_if_needed().await.unwrap());
    assert_eq!(h.transport.rotations().len(), 1);
}

// === Emergency full rotation ===

#[tokio::test]
async fn compromise_rotation_replaces_every_long_lived_key() {
    let h = local_session("alice", small_config()).await;
    let before = h.session.active_configuration().await.unwrap();
    let old_signing = SigningPublic::from_bytes(&before.signing_public).unwrap();
    let old_device = before.signed_devices[0].device.clone();

    h.session.rotate_all_on_compromise().await.unwrap();
    assert!(!h.session.is_rotating_keys());

    let after = h.session.active_configuration().await.unwrap();
    assert_ne!(after.signing_public, before.signing_public);
    let new_signing = after.signing_public().unwrap();

    let device_entry = &after.signed_devices[0];
    let device = device_entry.verify(&new_signing).unwrap();
    assert!(device_entry.verify(&old_signing).is_err());

    // All three public halves changed; self-certification holds.
    assert_ne!(device.signing_public, old_device.signing_public);
    assert_ne!(device.long_term_public, old_device.long_term_public);
    assert_ne!(device.final_pqkem_public, old_device.final_pqkem_public);
    assert_eq!(device.signing_public, after.signing_public);

    // One-time batches were re-signed in the same atomic step.
    for entry in after
        .signed_one_time_classical
        .iter()
        .chain(&after.signed_one_time_pqkem)
    {
        assert!(entry.verify(&new_signing).is_ok());
        assert!(entry.verify(&old_signing).is_err());
    }

    let rotations = h.transport.rotations();
    assert_eq!(rotations.len(), 1);
    assert_eq!(rotations[0].2.psk_data, after.signing_public);

    assert!(h
        .receiver
        .events()
        .contains(&ReceiverEvent::KeysRotated {
            scope: RotationScope::Full,
        }));
}

#[tokio::test]
async fn peers_recover_from_compromise_via_refresh_and_republication() {
    // Alice and Bob share one in-process server.
    let alice = local_session("alice", small_config()).await;

    let bob_store = Arc::new(MemoryStore::new());
    let bob = Session::builder()
        .transport(Arc::new(alice.transport.handle_for("bob")))
        .store(bob_store)
        .build()
        .unwrap();
    bob.create_session("bob", Some("phone"), PASSWORD)
        .await
        .unwrap();

    // Bob discovers Alice pre-compromise.
    let identities = bob.refresh_identities("alice").await.unwrap();
    assert_eq!(identities.len(), 1);
    let old_long_term = identities[0].props().long_term_public.clone();

    alice.session.rotate_all_on_compromise().await.unwrap();

    // Bob already holds an identity; a forced refresh verifies the re-signed
    // device entry and picks up the rotated long-term key in place.
    let identities = bob
        .refresh_identities_with("alice", &RefreshOptions::forced())
        .await
        .unwrap();
    assert_eq!(identities.len(), 1);
    assert_ne!(identities[0].props().long_term_public, old_long_term);

    // A first-time discoverer still sees the stale-signed one-time bundle
    // and must fail closed until Alice republishes her configuration.
    let carol = Session::builder()
        .transport(Arc::new(alice.transport.handle_for("carol")))
        .store(Arc::new(MemoryStore::new()))
        .build()
        .unwrap();
    carol
        .create_session("carol", None, PASSWORD)
        .await
        .unwrap();
    assert_eq!(
        carol.refresh_identities("alice").await,
        Err(SessionError::InvalidSignature)
    );

    alice.session.publish_active_configuration().await.unwrap();
    assert_eq!(carol.refresh_identities("alice").await.unwrap().len(), 1);
}

// === One-time key refill ===

#[tokio::test]
async fn refill_triggers_at_the_watermark_not_above_it() {
    let h = local_session("alice", small_config()).await;
    assert_eq!(h.session.one_time_reserves().await.unwrap(), (5, 5));

    // Nothing to do while both reserves sit above the watermark.
    assert!(!h.session.refill_one_time_keys_if_needed().await.unwrap());

    let ids: Vec<_> = h
        .session
        .active_configuration()
        .await
        .unwrap()
        .signed_one_time_classical
        .iter()
        .map(|k| k.id)
        .collect();

    // One above the watermark: still nothing.
    h.session
        .consume_one_time_private(OneTimeKind::Classical, ids[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.session.one_time_reserves().await.unwrap(), (4, 5));
    assert!(!h.session.refill_one_time_keys_if_needed().await.unwrap());

    // Exactly at the watermark: a full batch lands, classical only.
    h.session
        .consume_one_time_private(OneTimeKind::Classical, ids[1])
        .await
        .unwrap()
        .unwrap();
    assert!(h.session.refill_one_time_keys_if_needed().await.unwrap());
    assert_eq!(h.session.one_time_reserves().await.unwrap(), (8, 5));

    // The grown bundle was republished.
    let publishes = h.transport.publishes();
    assert_eq!(publishes.len(), 2);
    assert!(publishes.iter().all(|(name, bundle)| name == "alice" && *bundle));
}

#[tokio::test]
async fn refill_grows_both_depleted_reserves_by_one_batch() {
    let h = local_session("alice", small_config()).await;
    let config = h.session.active_configuration().await.unwrap();

    for entry in &config.signed_one_time_classical[..2] {
        h.session
            .consume_one_time_private(OneTimeKind::Classical, entry.id)
            .await
            .unwrap()
            .unwrap();
    }
    for entry in &config.signed_one_time_pqkem[..2] {
        h.session
            .consume_one_time_private(OneTimeKind::PqKem, entry.id)
            .await
            .unwrap()
            .unwrap();
    }
    assert_eq!(h.session.one_time_reserves().await.unwrap(), (3, 3));

    assert!(h.session.refill_one_time_keys_if_needed().await.unwrap());
    assert_eq!(h.session.one_time_reserves().await.unwrap(), (8, 8));

    assert!(h.receiver.events().contains(&ReceiverEvent::ReservesRefilled {
        classical: 5,
        pqkem: 5,
    }));
}

#[tokio::test]
async fn low_reserves_cascade_into_a_background_refill_during_refresh() {
    let h = local_session("alice", small_config()).await;
    let bob = RemoteUser::new(1, 1);
    h.transport.insert_configuration("bob", bob.configuration.clone());

    let config = h.session.active_configuration().await.unwrap();
    for entry in &config.signed_one_time_classical[..2] {
        h.session
            .consume_one_time_private(OneTimeKind::Classical, entry.id)
            .await
            .unwrap()
            .unwrap();
    }
    for entry in &config.signed_one_time_pqkem[..2] {
        h.session
            .consume_one_time_private(OneTimeKind::PqKem, entry.id)
            .await
            .unwrap()
            .unwrap();
    }
    assert_eq!(h.session.one_time_reserves().await.unwrap(), (3, 3));

    // The refresh itself succeeds regardless of the refill's fate.
    let identities = h.session.refresh_identities("bob").await.unwrap();
    assert_eq!(identities.len(), 1);

    // The detached refill eventually tops both reserves up.
    let mut reserves = (0, 0);
    for _ in 0..200 {
        reserves = h.session.one_time_reserves().await.unwrap();
        if reserves == (8, 8) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(reserves, (8, 8));

    // No duplicate upload: the create plus exactly one refill.
    assert!(!h.session.refill_one_time_keys_if_needed().await.unwrap());
    assert_eq!(h.transport.publishes().len(), 2);
}

// === Guard rails ===

#[tokio::test]
async fn lifecycle_requires_an_initialized_session() {
    let session = Session::builder()
        .transport(Arc::new(MemoryTransport::new("alice")))
        .store(Arc::new(MemoryStore::new()))
        .receiver(Arc::new(MemoryReceiver::new()))
        .config(SessionConfig::default())
        .build()
        .unwrap();

    assert_eq!(
        session.refill_one_time_keys_if_needed().await,
        Err(SessionError::SessionNotInitialized)
    );
    assert_eq!(
        session.rotate_pqkem_if_needed().await,
        Err(SessionError::SessionNotInitialized)
    );
    assert_eq!(
        session.rotate_all_on_compromise().await,
        Err(SessionError::SessionNotInitialized)
    );
}
