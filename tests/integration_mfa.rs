//! MFA 引擎集成测试
//!
//! 覆盖从注册到验证的完整流程，包括 WebAuthn 注册/断言仪式的
//! 端到端签名验证和并发验证的单一成功语义。

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Duration;
use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};

use guardrs::audit::{AuditConfig, AuditService, EventFilter, EventType, InMemorySink};
use guardrs::clock::{Clock, ManualClock};
use guardrs::delivery::InMemoryDelivery;
use guardrs::mfa::{
    AssertionCeremony, ChallengeIssued, EnrollmentPayload, InMemoryChallengeStore,
    InMemoryCredentialStore, MfaConfig, MfaEngine, MfaMethod, RegistrationCeremony,
    RegistrationResponse, TotpConfig, TotpSecret, TotpVerifier, User, WebauthnConfig,
};

const RP_ID: &str = "example.com";
const ORIGIN: &str = "https://example.com";

struct Fixture {
    engine: Arc<MfaEngine>,
    delivery: InMemoryDelivery,
    clock: Arc<ManualClock>,
    audit: Arc<AuditService>,
}

fn fixture() -> Fixture {
    let clock = Arc::new(ManualClock::from_system());
    let audit = Arc::new(AuditService::new(
        AuditConfig::default(),
        Arc::new(InMemorySink::new()),
        Arc::clone(&clock) as Arc<dyn Clock>,
    ));
    let delivery = InMemoryDelivery::new();
    let engine = MfaEngine::new(
        MfaConfig::new(
            "ExampleApp",
            WebauthnConfig::new(RP_ID, "ExampleApp", ORIGIN),
            b"integration-test-key".to_vec(),
        ),
        Arc::new(InMemoryCredentialStore::new()),
        Arc::new(InMemoryChallengeStore::new()),
        Arc::new(delivery.clone()),
        Arc::clone(&audit),
        Arc::clone(&clock) as Arc<dyn Clock>,
    );
    Fixture {
        engine: Arc::new(engine),
        delivery,
        clock,
        audit,
    }
}

fn user() -> User {
    User::new("alice")
        .with_email("alice@example.com")
        .with_phone("+8613800000000")
}

// ============================================================================
// WebAuthn 测试辅助：扮演认证器侧
// ============================================================================

fn rp_id_hash() -> Vec<u8> {
    Sha256::digest(RP_ID.as_bytes()).to_vec()
}

fn client_data(ceremony_type: &str, challenge: &str) -> String {
    let json = format!(
        r#"{{"type":"{}","challenge":"{}","origin":"{}"}}"#,
        ceremony_type, challenge, ORIGIN
    );
    URL_SAFE_NO_PAD.encode(json.as_bytes())
}

fn authenticator_data(counter: u32) -> Vec<u8> {
    let mut bytes = rp_id_hash();
    bytes.push(0x01); // 用户在场
    bytes.extend_from_slice(&counter.to_be_bytes());
    bytes
}

fn registration_response(key: &SigningKey, ceremony: &RegistrationCeremony) -> RegistrationResponse {
    RegistrationResponse {
        credential_id: "cred-integration".to_string(),
        client_data_json: client_data("webauthn.create", &ceremony.challenge),
        authenticator_data: URL_SAFE_NO_PAD.encode(authenticator_data(0)),
        algorithm: -8,
        public_key: URL_SAFE_NO_PAD.encode(key.verifying_key().to_bytes()),
    }
}

fn assertion_json(key: &SigningKey, ceremony: &AssertionCeremony, counter: u32) -> String {
    let client_data_b64 = client_data("webauthn.get", &ceremony.challenge);
    let client_data_bytes = URL_SAFE_NO_PAD.decode(&client_data_b64).unwrap();
    let auth_bytes = authenticator_data(counter);

    let mut message = auth_bytes.clone();
    message.extend_from_slice(&Sha256::digest(&client_data_bytes));
    let signature = key.sign(&message);

    serde_json::json!({
        "credential_id": "cred-integration",
        "client_data_json": client_data_b64,
        "authenticator_data": URL_SAFE_NO_PAD.encode(&auth_bytes),
        "signature": URL_SAFE_NO_PAD.encode(signature.to_bytes()),
    })
    .to_string()
}

// ============================================================================
// 场景测试
// ============================================================================

#[tokio::test]
async fn test_totp_enrollment_to_validation() {
    let f = fixture();
    let user = user();

    let Some(EnrollmentPayload::Totp(provisioning)) = f
        .engine
        .generate_secret(&user, MfaMethod::Totp)
        .await
        .unwrap()
    else {
        panic!("expected TOTP provisioning");
    };
    f.engine.enable_mfa(&user, MfaMethod::Totp).await.unwrap();

    assert!(provisioning.uri.contains("issuer=ExampleApp"));
    assert!(provisioning.uri.contains(&provisioning.secret_base32));

    let secret = TotpSecret::from_base32(&provisioning.secret_base32).unwrap();
    let verifier = TotpVerifier::new(TotpConfig::default());
    let code = verifier.code_at(&secret, f.clock.unix_timestamp()).unwrap();

    assert!(
        f.engine
            .validate_code(&user, &code, MfaMethod::Totp)
            .await
            .unwrap()
    );

    // 时钟前进到窗口之外后，旧码失效
    f.clock.advance(Duration::minutes(5));
    assert!(
        !f.engine
            .validate_code(&user, &code, MfaMethod::Totp)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_webauthn_registration_and_assertion() {
    let f = fixture();
    let user = user();
    let key = SigningKey::from_bytes(&[42u8; 32]);

    // 注册仪式
    let Some(EnrollmentPayload::WebauthnCeremony(ceremony)) = f
        .engine
        .generate_secret(&user, MfaMethod::Webauthn)
        .await
        .unwrap()
    else {
        panic!("expected registration ceremony");
    };
    assert_eq!(ceremony.rp_id, RP_ID);

    let credential = f
        .engine
        .finish_webauthn_registration(&user, &registration_response(&key, &ceremony))
        .await
        .unwrap();
    assert_eq!(credential.counter, 0);
    assert!(
        f.engine
            .enabled_methods(&user)
            .await
            .unwrap()
            .contains(&MfaMethod::Webauthn)
    );

    // 断言仪式
    let ChallengeIssued::WebauthnCeremony(assertion_ceremony) = f
        .engine
        .send_challenge(&user, MfaMethod::Webauthn)
        .await
        .unwrap()
    else {
        panic!("expected assertion ceremony");
    };
    assert_eq!(
        assertion_ceremony.allow_credentials,
        vec!["cred-integration".to_string()]
    );

    let response = assertion_json(&key, &assertion_ceremony, 1);
    assert!(
        f.engine
            .validate_code(&user, &response, MfaMethod::Webauthn)
            .await
            .unwrap()
    );

    // 仪式已消费，重放同一断言失败
    assert!(
        !f.engine
            .validate_code(&user, &response, MfaMethod::Webauthn)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_webauthn_counter_must_increase_across_ceremonies() {
    let f = fixture();
    let user = user();
    let key = SigningKey::from_bytes(&[42u8; 32]);

    let Some(EnrollmentPayload::WebauthnCeremony(ceremony)) = f
        .engine
        .generate_secret(&user, MfaMethod::Webauthn)
        .await
        .unwrap()
    else {
        panic!("expected registration ceremony");
    };
    f.engine
        .finish_webauthn_registration(&user, &registration_response(&key, &ceremony))
        .await
        .unwrap();

    // 第一次断言把计数器推进到 5
    let ChallengeIssued::WebauthnCeremony(ceremony) = f
        .engine
        .send_challenge(&user, MfaMethod::Webauthn)
        .await
        .unwrap()
    else {
        panic!("expected assertion ceremony");
    };
    assert!(
        f.engine
            .validate_code(&user, &assertion_json(&key, &ceremony, 5), MfaMethod::Webauthn)
            .await
            .unwrap()
    );

    // 计数器不增长的断言被拒绝（疑似克隆的认证器）
    let ChallengeIssued::WebauthnCeremony(ceremony) = f
        .engine
        .send_challenge(&user, MfaMethod::Webauthn)
        .await
        .unwrap()
    else {
        panic!("expected assertion ceremony");
    };
    assert!(
        !f.engine
            .validate_code(&user, &assertion_json(&key, &ceremony, 5), MfaMethod::Webauthn)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_webauthn_malformed_submission_is_not_an_error() {
    let f = fixture();
    let user = user();
    let key = SigningKey::from_bytes(&[42u8; 32]);

    let Some(EnrollmentPayload::WebauthnCeremony(ceremony)) = f
        .engine
        .generate_secret(&user, MfaMethod::Webauthn)
        .await
        .unwrap()
    else {
        panic!("expected registration ceremony");
    };
    f.engine
        .finish_webauthn_registration(&user, &registration_response(&key, &ceremony))
        .await
        .unwrap();

    // 无法解析的提交统一折叠为 false
    assert!(
        !f.engine
            .validate_code(&user, "not json", MfaMethod::Webauthn)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_sms_concurrent_validation_single_winner() {
    let f = fixture();
    let user = user();

    f.engine.send_challenge(&user, MfaMethod::Sms).await.unwrap();
    let code = f.delivery.last_code().unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = Arc::clone(&f.engine);
        let user = user.clone();
        let code = code.clone();
        handles.push(tokio::spawn(async move {
            engine.validate_code(&user, &code, MfaMethod::Sms).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            successes += 1;
        }
    }
    // 并发提交正确码，恰好一个成功
    assert_eq!(successes, 1);
}

#[tokio::test]
async fn test_backup_codes_at_most_n_successes() {
    let f = fixture();
    let user = user();

    let Some(EnrollmentPayload::BackupCodes(set)) = f
        .engine
        .generate_secret(&user, MfaMethod::BackupCode)
        .await
        .unwrap()
    else {
        panic!("expected backup codes");
    };
    let n = set.plain_codes.len();

    // 每个码提交两次，总成功数不超过 N
    let mut successes = 0;
    for code in &set.plain_codes {
        for _ in 0..2 {
            if f.engine
                .validate_code(&user, code, MfaMethod::BackupCode)
                .await
                .unwrap()
            {
                successes += 1;
            }
        }
    }
    assert_eq!(successes, n);
}

#[tokio::test]
async fn test_every_validation_reaches_the_audit_trail() {
    let f = fixture();
    let user = user();

    f.engine.send_challenge(&user, MfaMethod::Sms).await.unwrap();
    let code = f.delivery.last_code().unwrap();

    f.engine
        .validate_code(&user, "000000", MfaMethod::Sms)
        .await
        .unwrap();
    f.engine
        .validate_code(&user, &code, MfaMethod::Sms)
        .await
        .unwrap();

    let sent = f
        .audit
        .get_events(&EventFilter::new().with_event_type(EventType::MfaChallengeSent));
    let failures = f
        .audit
        .get_events(&EventFilter::new().with_event_type(EventType::MfaFailure));
    let successes = f
        .audit
        .get_events(&EventFilter::new().with_event_type(EventType::MfaSuccess));

    assert_eq!(sent.len(), 1);
    assert_eq!(failures.len(), 1);
    assert_eq!(successes.len(), 1);
    // 失败的子原因只在审计 metadata 中
    assert!(failures[0].metadata.contains_key("failure_reason"));
}

#[tokio::test]
async fn test_challenge_sweep_terminates_stale_challenges() {
    let f = fixture();
    let alice = user();
    let bob = User::new("bob").with_phone("+8613900000000");

    f.engine.send_challenge(&alice, MfaMethod::Sms).await.unwrap();
    f.clock.advance(Duration::minutes(3));
    f.engine.send_challenge(&bob, MfaMethod::Sms).await.unwrap();

    // 只有 alice 的挑战过了 TTL
    f.clock.advance(Duration::minutes(3));
    assert_eq!(f.engine.sweep_expired_challenges().await.unwrap(), 1);

    let bob_code = f.delivery.last_code().unwrap();
    assert!(
        f.engine
            .validate_code(&bob, &bob_code, MfaMethod::Sms)
            .await
            .unwrap()
    );
}
