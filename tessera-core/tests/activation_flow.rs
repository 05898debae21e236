//! Activation lifecycle scenarios: the happy path, lazy expiration,
//! probing for unknown activations, and transition rules.

mod common;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use common::Harness;
use tessera_core::core_activation::InitActivationRequest;
use tessera_core::core_crypto::status_blob::decrypt_status_blob;
use tessera_core::core_crypto::EcKeyPair;
use tessera_core::core_store::model::ActivationStatus;
use tessera_core::ServiceError;

#[test]
fn happy_activation_path() {
    let harness = Harness::new();

    let init = harness.init("alice");
    assert!(!init.activation_id.is_empty());
    assert_eq!(init.user_id, "alice");
    assert_eq!(init.application_id, harness.app.id);
    // code carries the dash-grouped checksum format
    assert_eq!(init.activation_code.len(), 23);

    // the code signature verifies against the master public key
    let master_public = tessera_core::core_crypto::EcPublicKey::from_base64(
        &harness.app.master_public_key,
    )
    .unwrap();
    let signature = BASE64.decode(&init.activation_signature).unwrap();
    assert!(master_public.verify(init.activation_code.as_bytes(), &signature));

    let device = EcKeyPair::generate();
    let payload = harness.prepare(&init.activation_code, &device);
    assert_eq!(payload.activation_id, init.activation_id);
    assert_eq!(payload.device_public_key_fingerprint.len(), 8);
    assert!(payload
        .device_public_key_fingerprint
        .bytes()
        .all(|b| b.is_ascii_digit()));

    let status = harness.activation.get_status(&init.activation_id).unwrap();
    assert_eq!(status.activation_status, "OTP_USED");

    harness.activation.commit(&init.activation_id).unwrap();

    let status = harness.activation.get_status(&init.activation_id).unwrap();
    assert_eq!(status.activation_status, "ACTIVE");
    assert_eq!(status.user_id, "alice");

    // the device can decrypt the status blob at counter 0
    let transport = harness.device_transport_key(&init.activation_id, &device);
    let blob_bytes = BASE64.decode(&status.encrypted_status_blob).unwrap();
    let blob = decrypt_status_blob(&blob_bytes, &transport, 0).unwrap();
    assert_eq!(blob.status, ActivationStatus::Active.as_i64() as u8);
    assert_eq!(blob.failed_attempts, 0);
    assert_eq!(blob.max_failed_attempts, 5);
}

#[test]
fn expired_activation_is_lazy_removed() {
    let harness = Harness::new();

    let init = harness
        .activation
        .init(InitActivationRequest {
            user_id: "alice".to_string(),
            application_id: harness.app.id,
            activation_name: None,
            extras: None,
            max_failed_attempts: None,
            expire_at: Some(common::START_TIME + 100),
        })
        .unwrap();

    let device = EcKeyPair::generate();
    harness.prepare(&init.activation_code, &device);

    harness.clock.advance(200);

    let err = harness.activation.commit(&init.activation_id).unwrap_err();
    assert!(matches!(err, ServiceError::ActivationExpired));

    let status = harness.activation.get_status(&init.activation_id).unwrap();
    assert_eq!(status.activation_status, "REMOVED");
}

#[test]
fn expired_code_cannot_be_prepared() {
    let harness = Harness::new();
    let init = harness
        .activation
        .init(InitActivationRequest {
            user_id: "alice".to_string(),
            application_id: harness.app.id,
            activation_name: None,
            extras: None,
            max_failed_attempts: None,
            expire_at: Some(common::START_TIME + 100),
        })
        .unwrap();

    harness.clock.advance(500);

    let device = EcKeyPair::generate();
    let err = harness.try_prepare(&init.activation_code, &device).unwrap_err();
    assert!(matches!(err, ServiceError::ActivationNotFound));
}

#[test]
fn unknown_activation_status_is_synthesized() {
    let harness = Harness::new();

    let status = harness
        .activation
        .get_status("00000000-0000-0000-0000-000000000000")
        .unwrap();
    assert_eq!(status.activation_status, "REMOVED");
    assert_eq!(status.user_id, "unknown");
    assert_eq!(status.application_id, 0);
    assert_eq!(status.timestamp_created, 0);
    assert_eq!(status.timestamp_last_used, 0);
    assert_eq!(BASE64.decode(&status.encrypted_status_blob).unwrap().len(), 16);

    // two consecutive probes must not return the same blob
    let again = harness
        .activation
        .get_status("00000000-0000-0000-0000-000000000000")
        .unwrap();
    assert_ne!(status.encrypted_status_blob, again.encrypted_status_blob);
}

#[test]
fn created_status_returns_code_for_retry() {
    let harness = Harness::new();
    let init = harness.init("alice");

    let status = harness.activation.get_status(&init.activation_id).unwrap();
    assert_eq!(status.activation_status, "CREATED");
    assert_eq!(status.activation_code.as_deref(), Some(init.activation_code.as_str()));
    assert_eq!(
        status.activation_signature.as_deref(),
        Some(init.activation_signature.as_str())
    );
    assert!(status.device_public_key_fingerprint.is_none());
    assert_eq!(BASE64.decode(&status.encrypted_status_blob).unwrap().len(), 16);
}

#[test]
fn commit_requires_prepared_state() {
    let harness = Harness::new();
    let init = harness.init("alice");

    // CREATED cannot be committed
    let err = harness.activation.commit(&init.activation_id).unwrap_err();
    assert!(matches!(err, ServiceError::ActivationIncorrectState(_)));

    let device = EcKeyPair::generate();
    harness.prepare(&init.activation_code, &device);
    harness.activation.commit(&init.activation_id).unwrap();

    // double commit reports incorrect state
    let err = harness.activation.commit(&init.activation_id).unwrap_err();
    assert!(matches!(err, ServiceError::ActivationIncorrectState(_)));
}

#[test]
fn block_unblock_and_remove_transitions() {
    let harness = Harness::new();
    let (init, _device) = harness.activate("alice");

    harness.activation.block(&init.activation_id, None).unwrap();
    let status = harness.activation.get_status(&init.activation_id).unwrap();
    assert_eq!(status.activation_status, "BLOCKED");
    assert_eq!(status.blocked_reason.as_deref(), Some("NOT_SPECIFIED"));

    // blocking again is an incorrect state
    let err = harness.activation.block(&init.activation_id, None).unwrap_err();
    assert!(matches!(err, ServiceError::ActivationIncorrectState(_)));

    harness.activation.unblock(&init.activation_id).unwrap();
    let status = harness.activation.get_status(&init.activation_id).unwrap();
    assert_eq!(status.activation_status, "ACTIVE");
    assert!(status.blocked_reason.is_none());

    // remove is idempotent
    harness.activation.remove(&init.activation_id).unwrap();
    harness.activation.remove(&init.activation_id).unwrap();
    let status = harness.activation.get_status(&init.activation_id).unwrap();
    assert_eq!(status.activation_status, "REMOVED");

    // removed is terminal
    let err = harness.activation.unblock(&init.activation_id).unwrap_err();
    assert!(matches!(err, ServiceError::ActivationIncorrectState(_)));
}

#[test]
fn invalid_device_key_burns_the_activation() {
    let harness = Harness::new();
    let init = harness.init("alice");

    // an envelope that decrypts to garbage (not a P-256 point)
    let master_public =
        tessera_core::core_crypto::EcPublicKey::from_base64(&harness.app.master_public_key).unwrap();
    let (envelope, _) = tessera_core::core_crypto::ecies::encrypt_request(
        &master_public,
        harness.application_secret(),
        b"not a curve point at all",
    );
    let err = harness
        .activation
        .prepare(tessera_core::core_activation::PrepareActivationRequest {
            activation_code: init.activation_code.clone(),
            application_key: harness.application_key().to_string(),
            envelope,
        })
        .unwrap_err();
    assert!(matches!(err, ServiceError::ActivationNotFound));

    // the activation is gone, same as if it never existed
    let status = harness.activation.get_status(&init.activation_id).unwrap();
    assert_eq!(status.activation_status, "REMOVED");

    // the code cannot be prepared again
    let device = EcKeyPair::generate();
    let err = harness.try_prepare(&init.activation_code, &device).unwrap_err();
    assert!(matches!(err, ServiceError::ActivationNotFound));
}

#[test]
fn wrong_application_key_rejected_without_state_change() {
    let harness = Harness::new();
    let init = harness.init("alice");

    let master_public =
        tessera_core::core_crypto::EcPublicKey::from_base64(&harness.app.master_public_key).unwrap();
    let device = EcKeyPair::generate();
    let (envelope, _) = tessera_core::core_crypto::ecies::encrypt_request(
        &master_public,
        harness.application_secret(),
        &device.public_key().to_bytes(),
    );
    let err = harness
        .activation
        .prepare(tessera_core::core_activation::PrepareActivationRequest {
            activation_code: init.activation_code.clone(),
            application_key: "no-such-key".to_string(),
            envelope,
        })
        .unwrap_err();
    assert!(matches!(err, ServiceError::ActivationNotFound));

    // the pending activation is untouched and still preparable
    let status = harness.activation.get_status(&init.activation_id).unwrap();
    assert_eq!(status.activation_status, "CREATED");
    harness.prepare(&init.activation_code, &device);
}

#[test]
fn list_for_user_returns_all_states() {
    let harness = Harness::new();
    let (active, _) = harness.activate("alice");
    let pending = harness.init("alice");
    harness.init("bob");

    let list = harness.activation.list_for_user("alice", None).unwrap();
    assert_eq!(list.len(), 2);
    let ids: Vec<&str> = list.iter().map(|a| a.activation_id.as_str()).collect();
    assert!(ids.contains(&active.activation_id.as_str()));
    assert!(ids.contains(&pending.activation_id.as_str()));

    let scoped = harness
        .activation
        .list_for_user("alice", Some(harness.app.id + 1))
        .unwrap();
    assert!(scoped.is_empty());
}

#[test]
fn init_validates_inputs() {
    let harness = Harness::new();

    let err = harness
        .activation
        .init(InitActivationRequest {
            user_id: "   ".to_string(),
            application_id: harness.app.id,
            activation_name: None,
            extras: None,
            max_failed_attempts: None,
            expire_at: None,
        })
        .unwrap_err();
    assert!(matches!(err, ServiceError::NoUserId));

    let err = harness
        .activation
        .init(InitActivationRequest {
            user_id: "alice".to_string(),
            application_id: 9999,
            activation_name: None,
            extras: None,
            max_failed_attempts: None,
            expire_at: None,
        })
        .unwrap_err();
    assert!(matches!(err, ServiceError::NoApplicationId));
}

#[test]
fn activation_history_records_every_transition() {
    let harness = Harness::new();
    let (init, _) = harness.activate("alice");
    harness.activation.block(&init.activation_id, Some("AUDIT")).unwrap();
    harness.activation.unblock(&init.activation_id).unwrap();
    harness.activation.remove(&init.activation_id).unwrap();

    let history = harness
        .store
        .read(|conn| {
            tessera_core::core_store::repository::list_history(conn, &init.activation_id)
        })
        .unwrap();

    let states: Vec<ActivationStatus> = history.iter().map(|h| h.status).collect();
    assert_eq!(
        states,
        vec![
            ActivationStatus::Created,
            ActivationStatus::OtpUsed,
            ActivationStatus::Active,
            ActivationStatus::Blocked,
            ActivationStatus::Active,
            ActivationStatus::Removed,
        ]
    );
    assert_eq!(history[3].event_reason.as_deref(), Some("AUDIT"));
}
