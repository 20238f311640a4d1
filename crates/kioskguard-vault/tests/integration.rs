//! Integration tests for the kioskguard-vault crate.
//!
//! These tests drive the public API the way the kiosk shell does: open a
//! controller, verify, rotate, run four-eyes changes, and reopen from disk.

use std::sync::Arc;

use kioskguard_vault::access::DEFAULT_DATABASE_FILE;
use kioskguard_vault::crypto;
use kioskguard_vault::hash::{self, MIN_ITERATIONS};
use kioskguard_vault::store::{DEFAULT_PRIMARY, DEFAULT_SECONDARY};
use kioskguard_vault::{
    AccessController, AdminCommand, CredentialStore, FileKeychain, FourEyesError, FourEyesStep,
    PasswordHasher, PolicyRule, Slot, SqliteBackend, VaultError,
};

fn fast_hasher() -> PasswordHasher {
    PasswordHasher::new(MIN_ITERATIONS).unwrap()
}

fn memory_backend() -> SqliteBackend {
    let key = crypto::random_bytes(crypto::KEY_LEN).unwrap();
    SqliteBackend::open_in_memory(&key).unwrap()
}

/// A controller over a freshly initialized in-memory store.
fn test_controller() -> AccessController {
    let store = CredentialStore::open(memory_backend(), fast_hasher()).unwrap();
    AccessController::new(Arc::new(store))
}

// ═══════════════════════════════════════════════════════════════════════
//  Initialization
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn fresh_store_accepts_default_secrets() {
    let access = test_controller();

    assert!(access.verify_primary(DEFAULT_PRIMARY).unwrap());
    assert!(access.verify_secondary(DEFAULT_SECONDARY).unwrap());
    assert_eq!(
        access.rotation_required().unwrap(),
        vec![Slot::Primary, Slot::Secondary]
    );
}

#[test]
fn initialization_is_idempotent() {
    let store = CredentialStore::open(memory_backend(), fast_hasher()).unwrap();
    let before = store.get(Slot::Primary).unwrap();

    assert!(!store.initialize_if_empty(Slot::Primary, "Another#Default1").unwrap());
    assert_eq!(store.get(Slot::Primary).unwrap(), before);
}

#[test]
fn stored_values_are_hashes_not_plaintext() {
    let access = test_controller();

    for slot in Slot::ALL {
        let stored = access.store().get(slot).unwrap();
        assert!(hash::is_recognized(&stored));
        assert!(!stored.contains(slot.default_secret()));
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Policy
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn rejected_secret_leaves_hash_unchanged() {
    let access = test_controller();
    let before = access.store().get(Slot::Primary).unwrap();

    let err = access.set_password(Slot::Primary, "short").unwrap_err();
    assert!(err.is_policy_violation());
    assert_eq!(access.store().get(Slot::Primary).unwrap(), before);
}

#[test]
fn violations_list_every_failed_rule() {
    let access = test_controller();

    assert_eq!(
        access.policy_violations("abc"),
        vec![
            PolicyRule::TooShort { min: 9 },
            PolicyRule::MissingUppercase,
            PolicyRule::MissingDigit,
            PolicyRule::MissingSymbol,
        ]
    );
    assert!(access.policy_violations("Abcdefg1!").is_empty());
    assert!(access.is_compliant("Abcdefg1!"));
}

#[test]
fn length_bounds_are_inclusive() {
    let access = test_controller();

    let nine = "Abcdef1!x";
    let forty = format!("Aa1!{}", "x".repeat(36));
    let forty_one = format!("Aa1!{}", "x".repeat(37));

    assert!(access.set_password(Slot::Secondary, nine).is_ok());
    assert!(access.set_password(Slot::Secondary, &forty).is_ok());
    assert!(matches!(
        access.set_password(Slot::Secondary, &forty_one),
        Err(VaultError::PolicyViolation { .. })
    ));
    assert!(access.verify_secondary(&forty).unwrap());
}

// ═══════════════════════════════════════════════════════════════════════
//  Verification
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn set_password_roundtrip_for_both_slots() {
    let access = test_controller();

    access.set_password(Slot::Primary, "Primary#Rot8").unwrap();
    access.set_password(Slot::Secondary, "Second#Rot9").unwrap();

    assert!(access.verify(Slot::Primary, "Primary#Rot8").unwrap());
    assert!(access.verify(Slot::Secondary, "Second#Rot9").unwrap());
    assert!(!access.verify(Slot::Primary, "Second#Rot9").unwrap());
    assert!(!access.verify(Slot::Secondary, "Primary#Rot8").unwrap());
}

#[test]
fn empty_store_fails_closed() {
    let access = AccessController::new(Arc::new(CredentialStore::new(
        memory_backend(),
        fast_hasher(),
    )));

    for slot in Slot::ALL {
        assert!(!access.verify(slot, "").unwrap());
        assert!(!access.verify(slot, slot.default_secret()).unwrap());
    }
    assert!(access.rotation_required().unwrap().is_empty());
}

#[test]
fn legacy_plaintext_is_migrated_on_open() {
    let key = crypto::random_bytes(crypto::KEY_LEN).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.db");

    {
        let raw = CredentialStore::new(SqliteBackend::open(&path, &key).unwrap(), fast_hasher());
        raw.put(Slot::Primary, "Legacy#Plain1").unwrap();
        raw.put(Slot::Secondary, "$2b$10$notoursnotours").unwrap();
    }

    let store = CredentialStore::open(SqliteBackend::open(&path, &key).unwrap(), fast_hasher())
        .unwrap();
    let access = AccessController::new(Arc::new(store));

    assert!(hash::is_recognized(&access.store().get(Slot::Primary).unwrap()));
    assert!(access.verify_primary("Legacy#Plain1").unwrap());

    // Foreign hash schemes are kept as-is and never match.
    assert_eq!(
        access.store().get(Slot::Secondary).unwrap(),
        "$2b$10$notoursnotours"
    );
    assert!(!access.verify_secondary("$2b$10$notoursnotours").unwrap());
    assert!(!access.verify_secondary(DEFAULT_SECONDARY).unwrap());
}

// ═══════════════════════════════════════════════════════════════════════
//  Four-eyes
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn four_eyes_change_commits_new_primary() {
    let access = test_controller();
    let mut session = access.begin_primary_change();

    assert_eq!(
        session.submit_secondary("Secondary@456").unwrap(),
        FourEyesStep::AwaitingPrimaryChange
    );
    assert_eq!(
        session
            .submit_primary_change("KhsDefault@123", "NewPass@789", "NewPass@789")
            .unwrap(),
        FourEyesStep::Committed
    );

    assert!(access.verify_primary("NewPass@789").unwrap());
    assert!(!access.verify_primary("KhsDefault@123").unwrap());
    assert!(access.verify_secondary("Secondary@456").unwrap());
}

#[test]
fn four_eyes_uses_rotated_secondary() {
    let access = test_controller();
    access.change_secondary("Fresh#Second5").unwrap();

    let mut session = access.begin_primary_change();
    assert_eq!(
        session.submit_secondary(DEFAULT_SECONDARY),
        Err(FourEyesError::WrongSecondary)
    );
    assert_eq!(
        session.submit_secondary("Fresh#Second5"),
        Ok(FourEyesStep::AwaitingPrimaryChange)
    );
}

#[test]
fn abandoned_session_changes_nothing() {
    let access = test_controller();
    {
        let mut session = access.begin_primary_change();
        session.submit_secondary(DEFAULT_SECONDARY).unwrap();
        let _ = session.submit_primary_change(DEFAULT_PRIMARY, "NewPass@789", "Typo@789");
        session.cancel();
    }

    assert!(access.verify_primary(DEFAULT_PRIMARY).unwrap());
    assert!(!access.verify_primary("NewPass@789").unwrap());
}

// ═══════════════════════════════════════════════════════════════════════
//  Command channel
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn command_channel_sets_secrets_under_full_policy() {
    let access = test_controller();

    let cmd: AdminCommand = "set-primary   Remote#Set42  ".parse().unwrap();
    access.apply_command(&cmd).unwrap();
    assert!(access.verify_primary("Remote#Set42").unwrap());

    let weak: AdminCommand = "set-secondary 12345".parse().unwrap();
    assert!(access.apply_command(&weak).is_err());
    assert!(access.verify_secondary(DEFAULT_SECONDARY).unwrap());

    assert!("set-primary abc".parse::<AdminCommand>().is_err());
    assert!("reboot now".parse::<AdminCommand>().is_err());
}

// ═══════════════════════════════════════════════════════════════════════
//  Concurrency
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn concurrent_writers_leave_exactly_one_winner() {
    let access = test_controller();
    let candidates: Vec<String> = (0..8).map(|i| format!("Racer#Pass{i:02}")).collect();

    std::thread::scope(|s| {
        for candidate in &candidates {
            let access = access.clone();
            s.spawn(move || access.set_password(Slot::Primary, candidate).unwrap());
        }
    });

    let winners = candidates
        .iter()
        .filter(|c| access.verify_primary(c).unwrap())
        .count();
    assert_eq!(winners, 1);
}

#[test]
fn concurrent_readers_see_consistent_state() {
    let access = test_controller();

    std::thread::scope(|s| {
        let writer = access.clone();
        s.spawn(move || {
            for i in 0..5 {
                writer
                    .set_password(Slot::Secondary, &format!("Writer#Turn{i}"))
                    .unwrap();
            }
        });

        for _ in 0..4 {
            let reader = access.clone();
            s.spawn(move || {
                for _ in 0..10 {
                    let stored = reader.store().get(Slot::Secondary).unwrap();
                    assert!(hash::is_recognized(&stored));
                }
            });
        }
    });

    assert!(access.verify_secondary("Writer#Turn4").unwrap());
}

// ═══════════════════════════════════════════════════════════════════════
//  Persistence
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn secrets_survive_reopen_with_file_keychain() {
    let dir = tempfile::tempdir().unwrap();
    let keychain = FileKeychain::new(FileKeychain::default_path(dir.path()));

    {
        let access =
            AccessController::open(dir.path(), DEFAULT_DATABASE_FILE, &keychain, fast_hasher())
                .unwrap();
        let mut session = access.begin_primary_change();
        session.submit_secondary(DEFAULT_SECONDARY).unwrap();
        session
            .submit_primary_change(DEFAULT_PRIMARY, "Persist#Me99", "Persist#Me99")
            .unwrap();
    }

    let access =
        AccessController::open(dir.path(), DEFAULT_DATABASE_FILE, &keychain, fast_hasher())
            .unwrap();
    assert!(access.verify_primary("Persist#Me99").unwrap());
    assert_eq!(access.rotation_required().unwrap(), vec![Slot::Secondary]);

    let status = access.status().unwrap();
    assert!(status.iter().all(|s| s.initialized && s.last_changed.is_some()));
}
