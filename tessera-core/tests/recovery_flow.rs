//! Recovery subsystem scenarios: issuance, confirmation, ordered PUK
//! consumption, threshold blocking, and revocation.

mod common;

use common::Harness;
use tessera_core::core_store::model::{RecoveryCodeStatus, RecoveryConfigRow};
use tessera_core::core_store::repository;
use tessera_core::ServiceError;

fn created_code(harness: &Harness, user: &str) -> (String, Vec<String>) {
    let created = harness
        .recovery
        .create_recovery_code(harness.app.id, user, Some(3))
        .unwrap();
    harness
        .recovery
        .confirm_recovery_code(harness.app.id, &created.recovery_code)
        .unwrap();
    (created.recovery_code, created.puks)
}

#[test]
fn create_returns_plaintext_puks_once() {
    let harness = Harness::new();
    let created = harness
        .recovery
        .create_recovery_code(harness.app.id, "alice", Some(3))
        .unwrap();

    assert_eq!(created.puks.len(), 3);
    assert_eq!(created.status, "CREATED");
    for puk in &created.puks {
        assert_eq!(puk.len(), 10);
        assert!(puk.bytes().all(|b| b.is_ascii_digit()));
    }

    // only hashes are persisted
    let details = harness
        .recovery
        .lookup_recovery_codes(harness.app.id, Some("alice"), None, None)
        .unwrap();
    assert_eq!(details.len(), 1);
    assert_eq!(details[0].puk_statuses, vec!["VALID", "VALID", "VALID"]);
}

#[test]
fn second_live_code_for_user_is_rejected() {
    let harness = Harness::new();
    created_code(&harness, "alice");

    let err = harness
        .recovery
        .create_recovery_code(harness.app.id, "alice", Some(3))
        .unwrap_err();
    assert!(matches!(err, ServiceError::RecoveryCodeAlreadyExists));

    // a different user is fine
    harness
        .recovery
        .create_recovery_code(harness.app.id, "bob", Some(3))
        .unwrap();
}

#[test]
fn confirm_is_idempotent_and_required() {
    let harness = Harness::new();
    let created = harness
        .recovery
        .create_recovery_code(harness.app.id, "alice", Some(1))
        .unwrap();

    // consumption before confirmation is rejected
    let err = harness
        .recovery
        .recovery_activation(harness.app.id, &created.recovery_code, &created.puks[0], None)
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidRecoveryCode { .. }));

    assert!(!harness
        .recovery
        .confirm_recovery_code(harness.app.id, &created.recovery_code)
        .unwrap());
    // second confirm reports already-confirmed
    assert!(harness
        .recovery
        .confirm_recovery_code(harness.app.id, &created.recovery_code)
        .unwrap());
}

#[test]
fn puks_are_consumed_lowest_index_first() {
    let harness = Harness::new();
    let (code, puks) = created_code(&harness, "alice");

    // P1 succeeds and creates a fresh activation for alice
    let first = harness
        .recovery
        .recovery_activation(harness.app.id, &code, &puks[0], None)
        .unwrap();
    assert_eq!(first.user_id, "alice");
    assert!(!first.activation_id.is_empty());

    // P2 is now current; P3 stays valid afterwards
    let second = harness
        .recovery
        .recovery_activation(harness.app.id, &code, &puks[1], None)
        .unwrap();
    assert_eq!(second.user_id, "alice");
    assert_ne!(first.activation_id, second.activation_id);

    let details = harness
        .recovery
        .lookup_recovery_codes(harness.app.id, Some("alice"), None, None)
        .unwrap();
    assert_eq!(details[0].puk_statuses, vec!["USED", "USED", "VALID"]);
}

#[test]
fn skipping_ahead_with_a_later_puk_fails() {
    let harness = Harness::new();
    let (code, puks) = created_code(&harness, "alice");

    // presenting P2 while P1 is current counts as a failure
    let err = harness
        .recovery
        .recovery_activation(harness.app.id, &code, &puks[1], None)
        .unwrap_err();
    match err {
        ServiceError::InvalidRecoveryCode { current_puk_index } => {
            assert_eq!(current_puk_index, Some(1));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn wrong_puk_blocks_after_threshold() {
    let harness = Harness::new();
    let (code, puks) = created_code(&harness, "alice");

    // consume P1 and P2 so index 3 is current
    harness
        .recovery
        .recovery_activation(harness.app.id, &code, &puks[0], None)
        .unwrap();
    harness
        .recovery
        .recovery_activation(harness.app.id, &code, &puks[1], None)
        .unwrap();

    // five wrong attempts; each failure reports the current index 3
    for _ in 0..5 {
        let err = harness
            .recovery
            .recovery_activation(harness.app.id, &code, "0000000000", None)
            .unwrap_err();
        match err {
            ServiceError::InvalidRecoveryCode { current_puk_index } => {
                assert_eq!(current_puk_index, Some(3));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    let details = harness
        .recovery
        .lookup_recovery_codes(harness.app.id, Some("alice"), None, None)
        .unwrap();
    assert_eq!(details[0].status, "BLOCKED");
    // remaining PUKs were invalidated with the code
    assert_eq!(details[0].puk_statuses, vec!["USED", "USED", "INVALID"]);

    // even the correct PUK is rejected now
    let err = harness
        .recovery
        .recovery_activation(harness.app.id, &code, &puks[2], None)
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidRecoveryCode { .. }));
}

#[test]
fn exhausting_all_puks_revokes_the_code() {
    let harness = Harness::new();
    let (code, puks) = created_code(&harness, "alice");

    for puk in &puks {
        harness
            .recovery
            .recovery_activation(harness.app.id, &code, puk, None)
            .unwrap();
    }

    let details = harness
        .recovery
        .lookup_recovery_codes(harness.app.id, Some("alice"), None, None)
        .unwrap();
    assert_eq!(details[0].status, "REVOKED");

    // a revoked code accepts nothing
    let err = harness
        .recovery
        .recovery_activation(harness.app.id, &code, &puks[0], None)
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidRecoveryCode { .. }));

    // and the user may receive a fresh code again
    harness
        .recovery
        .create_recovery_code(harness.app.id, "alice", Some(2))
        .unwrap();
}

#[test]
fn revoke_invalidates_remaining_puks() {
    let harness = Harness::new();
    let (code, _puks) = created_code(&harness, "alice");

    let revoked = harness
        .recovery
        .revoke_recovery_codes(harness.app.id, &[code.clone()])
        .unwrap();
    assert_eq!(revoked, 1);

    let details = harness
        .recovery
        .lookup_recovery_codes(harness.app.id, Some("alice"), None, None)
        .unwrap();
    assert_eq!(details[0].status, "REVOKED");
    assert!(details[0].puk_statuses.iter().all(|s| s == "INVALID"));

    // revoking again is a no-op
    let revoked = harness
        .recovery
        .revoke_recovery_codes(harness.app.id, &[code])
        .unwrap();
    assert_eq!(revoked, 0);
}

#[test]
fn malformed_inputs_are_rejected_up_front() {
    let harness = Harness::new();

    let err = harness
        .recovery
        .recovery_activation(harness.app.id, "not-a-code", "0000000000", None)
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidRecoveryCode { .. }));

    let (code, _) = created_code(&harness, "alice");
    let err = harness
        .recovery
        .recovery_activation(harness.app.id, &code, "12345", None)
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidRequest(_)));
}

#[test]
fn activation_issued_recovery_data_round_trip() {
    let harness = Harness::new();

    // enable activation recovery for the application
    harness
        .store
        .transaction(|tx| {
            repository::upsert_recovery_config(
                tx,
                &RecoveryConfigRow {
                    application_id: harness.app.id,
                    activation_recovery_enabled: true,
                    puk_count: 2,
                },
            )
        })
        .unwrap();

    let init = harness.init("carol");
    let device = tessera_core::core_crypto::EcKeyPair::generate();
    let payload = harness.prepare(&init.activation_code, &device);

    let recovery = payload.activation_recovery.expect("recovery data issued");
    assert_eq!(recovery.puks.len(), 2);

    // the activation-linked code is immediately active
    let details = harness
        .recovery
        .lookup_recovery_codes(
            harness.app.id,
            Some("carol"),
            Some(&init.activation_id),
            Some(RecoveryCodeStatus::Active),
        )
        .unwrap();
    assert_eq!(details.len(), 1);
    assert_eq!(details[0].recovery_code, recovery.recovery_code);

    // consuming its first PUK re-activates carol
    let reissued = harness
        .recovery
        .recovery_activation(harness.app.id, &recovery.recovery_code, &recovery.puks[0], None)
        .unwrap();
    assert_eq!(reissued.user_id, "carol");
}
