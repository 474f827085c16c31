//! Golden test vectors for deterministic verification.
//!
//! Transaction ids are persisted by entitlement backends for idempotency, so
//! the derivation must never drift. Error classification decides whether the
//! user sees an alert, so it is pinned too.

use modli_iap_core::{codes, ErrorClass, Platform, TransactionId};

/// Expected identity of a store token.
#[derive(Debug, Clone)]
pub struct IdentityVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    pub platform: Platform,
    pub token: &'static str,
    /// Expected transaction id (hex).
    pub expected_id: &'static str,
}

/// Expected classification of a store error code.
#[derive(Debug, Clone, Copy)]
pub struct ClassificationVector {
    pub code: &'static str,
    pub expected: ErrorClass,
}

/// Get all identity vectors.
pub fn identity_vectors() -> Vec<IdentityVector> {
    vec![
        IdentityVector {
            name: "Play order token",
            platform: Platform::Android,
            token: "GPA.3312-4455-6677-88990",
            expected_id: "563c136f29e3e63e5cba1f01091bd266286c411bbbb2083dcddc294a74c1a328",
        },
        IdentityVector {
            name: "App Store transaction",
            platform: Platform::Ios,
            token: "2000000512345678",
            expected_id: "30e9bb0fe740a5e2652a049570df81e0d03508f87f4bf9db9aefc95e7b933330",
        },
        IdentityVector {
            name: "Empty token",
            platform: Platform::Android,
            token: "",
            expected_id: "7a9506033fee5f32eee216051417845f269b7a5657d854424bc98452c5b731a8",
        },
        IdentityVector {
            // Must not collide with android + "collision".
            name: "Token spelling another platform's tag",
            platform: Platform::Ios,
            token: "android:collision",
            expected_id: "af1e0ef63bc5456fd826805c3dcf0bace482c3024449892b53ab2896af28b18b",
        },
    ]
}

/// Get all classification vectors.
pub fn classification_vectors() -> Vec<ClassificationVector> {
    use ErrorClass::*;

    [
        (codes::USER_CANCELLED, Cancelled),
        (codes::USER_CANCELLED_LEGACY, Cancelled),
        (codes::NETWORK_ERROR, Transient),
        (codes::SERVICE_ERROR, Transient),
        (codes::REMOTE_ERROR, Transient),
        (codes::NOT_PREPARED, Transient),
        (codes::DEFERRED_PAYMENT, Transient),
        (codes::INTERRUPTED, Transient),
        (codes::ITEM_UNAVAILABLE, Fatal),
        (codes::DEVELOPER_ERROR, Fatal),
        (codes::ALREADY_OWNED, Fatal),
        (codes::RECEIPT_FAILED, Fatal),
        (codes::USER_ERROR, Fatal),
        (codes::UNKNOWN, Fatal),
        ("E_SOMETHING_NEW", Fatal),
        ("", Fatal),
        ("e_user_cancelled", Fatal),
    ]
    .into_iter()
    .map(|(code, expected)| ClassificationVector { code, expected })
    .collect()
}

/// Check every identity vector against the current derivation.
///
/// Returns `(name, matches, actual_hex)` per vector.
pub fn verify_identity_vectors() -> Vec<(String, bool, String)> {
    identity_vectors()
        .iter()
        .map(|v| {
            let actual = TransactionId::derive(v.platform, v.token).to_hex();
            (v.name.to_string(), actual == v.expected_id, actual)
        })
        .collect()
}
