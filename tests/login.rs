mod common;

use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use tenant_auth::services::auth::credentials::{CredentialVerifier, LockoutPolicy};
use tenant_auth::services::auth::mfa::recovery::RecoveryCodeBatch;
use tenant_auth::services::auth::principal::{PrincipalStatus, PrincipalType};
use tenant_auth::services::auth::{AuthError, IssuedTokens, LoginOutcome, LoginRequest};

use common::{env, totp_now};

fn request(username: &str, password: &str, tenant_id: Option<Uuid>) -> LoginRequest {
    LoginRequest {
        username: username.to_string(),
        password: password.to_string(),
        tenant_id,
        remember_me: false,
        source_ip: None,
    }
}

fn tokens(outcome: LoginOutcome) -> IssuedTokens {
    match outcome {
        LoginOutcome::Authenticated(tokens) => *tokens,
        LoginOutcome::MfaRequired { .. } => panic!("expected tokens, got an mfa challenge"),
    }
}

#[tokio::test]
async fn tenant_user_without_mfa_gets_tenant_bound_access_token() {
    let env = env();
    let t1 = Uuid::new_v4();
    let alice = env.add_tenant_user("alice", "correct horse", t1);

    let issued = tokens(
        env.services
            .login
            .login(request("alice", "correct horse", Some(t1)))
            .await
            .unwrap(),
    );

    let verified = env
        .services
        .tokens
        .verify_access_token(&issued.access_token)
        .unwrap();
    assert_eq!(verified.claims.sub, alice.id);
    assert_eq!(verified.claims.tenant_id, Some(t1));
    assert_eq!(verified.claims.principal_type, PrincipalType::Tenant);
    assert_eq!(verified.claims.amr, vec!["pwd".to_string()]);
    assert_eq!(issued.token_type, "Bearer");
    assert_eq!(issued.expires_in, 900);

    let id = env.services.tokens.verify_id_token(&issued.id_token).unwrap();
    assert_eq!(id.claims.sub, alice.id);
}

#[tokio::test]
async fn same_username_is_scoped_by_tenant() {
    let env = env();
    let t1 = Uuid::new_v4();
    let t2 = Uuid::new_v4();
    env.add_tenant_user("alice", "pw-one", t1);
    env.add_tenant_user("alice", "pw-two", t2);

    let err = env
        .services
        .login
        .login(request("alice", "pw-one", Some(t2)))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));

    let err = env
        .services
        .login
        .login(request("alice", "pw-one", None))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));
}

#[tokio::test]
async fn inactive_principal_is_refused_before_password_check() {
    let env = env();
    let t1 = Uuid::new_v4();
    let bob = env.add_tenant_user("bob", "pw", t1);
    env.db.set_status(bob.id, PrincipalStatus::Inactive);

    let err = env
        .services
        .login
        .login(request("bob", "wrong", Some(t1)))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::AccountInactive));
    assert_eq!(env.db.credential_of(bob.id).unwrap().failed_login_attempts, 0);
}

#[tokio::test]
async fn five_failures_lock_even_the_correct_password() {
    let env = env();
    let t1 = Uuid::new_v4();
    let carol = env.add_tenant_user("carol", "right", t1);

    for _ in 0..5 {
        let err = env
            .services
            .login
            .login(request("carol", "wrong", Some(t1)))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    let err = env
        .services
        .login
        .login(request("carol", "right", Some(t1)))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::AccountLocked));
    assert!(env.db.credential_of(carol.id).unwrap().locked_until.is_some());
}

#[tokio::test]
async fn lock_expires_after_the_lockout_duration() {
    let env = env();
    let t1 = Uuid::new_v4();
    let dave = env.add_tenant_user("dave", "right", t1);
    let verifier = CredentialVerifier::new(
        env.db.clone(),
        env.db.clone(),
        env.hasher().clone(),
        LockoutPolicy::default(),
    );
    let start = Utc::now();

    for i in 0..5 {
        let failure = verifier
            .verify("dave", "wrong", Some(t1), start + ChronoDuration::seconds(i))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, AuthError::InvalidCredentials));
        assert_eq!(failure.locked_now, i == 4);
    }

    let during = start + ChronoDuration::minutes(29);
    let failure = verifier
        .verify("dave", "right", Some(t1), during)
        .await
        .unwrap_err();
    assert!(matches!(failure.error, AuthError::AccountLocked));

    let after = start + ChronoDuration::minutes(31);
    let principal = verifier.verify("dave", "right", Some(t1), after).await.unwrap();
    assert_eq!(principal.id, dave.id);

    let credential = env.db.credential_of(dave.id).unwrap();
    assert_eq!(credential.failed_login_attempts, 0);
    assert_eq!(credential.locked_until, None);
}

#[tokio::test]
async fn success_resets_the_failure_counter() {
    let env = env();
    let t1 = Uuid::new_v4();
    let erin = env.add_tenant_user("erin", "right", t1);

    for _ in 0..4 {
        let _ = env
            .services
            .login
            .login(request("erin", "wrong", Some(t1)))
            .await;
    }
    env.services
        .login
        .login(request("erin", "right", Some(t1)))
        .await
        .unwrap();
    assert_eq!(env.db.credential_of(erin.id).unwrap().failed_login_attempts, 0);
}

#[tokio::test]
async fn mfa_user_never_gets_tokens_from_password_alone() {
    let env = env();
    let t1 = Uuid::new_v4();
    let frank = env.add_tenant_user("frank", "pw", t1);
    env.enable_mfa(frank.id, Vec::new());

    let outcome = env
        .services
        .login
        .login(request("frank", "pw", Some(t1)))
        .await
        .unwrap();
    match outcome {
        LoginOutcome::MfaRequired {
            mfa_session_id,
            expires_at,
        } => {
            assert!(!mfa_session_id.is_empty());
            assert!(expires_at > Utc::now());
        }
        LoginOutcome::Authenticated(_) => panic!("mfa was bypassed"),
    }
    assert!(env.db.refresh_tokens_of(frank.id).is_empty());
}

async fn challenge(env: &common::TestEnv<tenant_auth::services::cache::MemoryCache>, user: &str, tenant: Uuid) -> String {
    match env
        .services
        .login
        .login(request(user, "pw", Some(tenant)))
        .await
        .unwrap()
    {
        LoginOutcome::MfaRequired { mfa_session_id, .. } => mfa_session_id,
        LoginOutcome::Authenticated(_) => panic!("expected an mfa challenge"),
    }
}

#[tokio::test]
async fn totp_completes_login_and_session_cannot_be_replayed() {
    let env = env();
    let t1 = Uuid::new_v4();
    let gina = env.add_tenant_user("gina", "pw", t1);
    let secret = env.enable_mfa(gina.id, Vec::new());

    let session = challenge(&env, "gina", t1).await;
    let code = totp_now(&secret);

    let issued = env
        .services
        .login
        .complete_mfa(&session, &code, Some(t1), None)
        .await
        .unwrap();
    let verified = env
        .services
        .tokens
        .verify_access_token(&issued.access_token)
        .unwrap();
    assert_eq!(verified.claims.sub, gina.id);
    assert_eq!(verified.claims.amr, vec!["pwd".to_string(), "otp".to_string()]);

    let err = env
        .services
        .login
        .complete_mfa(&session, &code, Some(t1), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MfaSessionInvalid));
}

#[tokio::test]
async fn wrong_code_burns_the_session() {
    let env = env();
    let t1 = Uuid::new_v4();
    let hank = env.add_tenant_user("hank", "pw", t1);
    let secret = env.enable_mfa(hank.id, Vec::new());

    let session = challenge(&env, "hank", t1).await;
    let err = env
        .services
        .login
        .complete_mfa(&session, "000000x", Some(t1), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MfaCodeInvalid));

    let err = env
        .services
        .login
        .complete_mfa(&session, &totp_now(&secret), Some(t1), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MfaSessionInvalid));
}

#[tokio::test]
async fn session_is_bound_to_its_tenant() {
    let env = env();
    let t1 = Uuid::new_v4();
    let ivy = env.add_tenant_user("ivy", "pw", t1);
    let secret = env.enable_mfa(ivy.id, Vec::new());

    let session = challenge(&env, "ivy", t1).await;
    let err = env
        .services
        .login
        .complete_mfa(&session, &totp_now(&secret), Some(Uuid::new_v4()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MfaSessionInvalid));
}

#[tokio::test]
async fn recovery_code_works_exactly_once() {
    let env = env();
    let t1 = Uuid::new_v4();
    let jack = env.add_tenant_user("jack", "pw", t1);
    let batch = RecoveryCodeBatch::generate();
    env.enable_mfa(jack.id, batch.hashes.clone());
    let code = batch.codes[0].to_lowercase();

    let session = challenge(&env, "jack", t1).await;
    env.services
        .login
        .complete_mfa(&session, &code, Some(t1), None)
        .await
        .unwrap();

    let session = challenge(&env, "jack", t1).await;
    let err = env
        .services
        .login
        .complete_mfa(&session, &code, Some(t1), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MfaCodeInvalid));
}

#[tokio::test]
async fn unknown_session_is_invalid() {
    let env = env();
    let err = env
        .services
        .login
        .complete_mfa("no-such-session", "123456", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MfaSessionInvalid));
}

#[tokio::test]
async fn enrollment_turns_on_mfa_for_the_next_login() {
    let env = env();
    let t1 = Uuid::new_v4();
    let kim = env.add_tenant_user("kim", "pw", t1);

    let enrollment = env
        .services
        .mfa_enrollment
        .begin(&kim, Utc::now())
        .await
        .unwrap();
    assert!(enrollment.otpauth_url.starts_with("otpauth://totp/"));

    let err = env
        .services
        .mfa_enrollment
        .confirm(&kim, "12345x", Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MfaCodeInvalid));

    let codes = env
        .services
        .mfa_enrollment
        .confirm(&kim, &totp_now(&enrollment.secret), Utc::now())
        .await
        .unwrap();
    assert_eq!(codes.len(), 10);
    assert!(env.db.principal(kim.id).unwrap().mfa_enabled);

    let session = challenge(&env, "kim", t1).await;
    env.services
        .login
        .complete_mfa(&session, &totp_now(&enrollment.secret), Some(t1), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn login_publishes_audit_events() {
    let env = env();
    let t1 = Uuid::new_v4();
    env.add_tenant_user("lee", "pw", t1);

    env.services
        .login
        .login(request("lee", "pw", Some(t1)))
        .await
        .unwrap();
    let _ = env
        .services
        .login
        .login(request("lee", "nope", Some(t1)))
        .await;

    env.audit.shutdown().await;
    let stats = env.audit.stats();
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.dropped, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_failures_are_all_counted() {
    let env = env();
    let t1 = Uuid::new_v4();
    let gus = env.add_tenant_user("gus", "right", t1);
    let verifier = std::sync::Arc::new(CredentialVerifier::new(
        env.db.clone(),
        env.db.clone(),
        env.hasher().clone(),
        LockoutPolicy::default(),
    ));
    let now = Utc::now();

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let verifier = verifier.clone();
            tokio::spawn(async move { verifier.verify("gus", "wrong", Some(t1), now).await })
        })
        .collect();

    let mut locked_now = 0;
    for handle in handles {
        let failure = handle.await.unwrap().unwrap_err();
        assert!(matches!(failure.error, AuthError::InvalidCredentials));
        if failure.locked_now {
            locked_now += 1;
        }
    }

    let credential = env.db.credential_of(gus.id).unwrap();
    assert_eq!(credential.failed_login_attempts, 5);
    assert!(credential.locked_until.is_some());
    assert_eq!(locked_now, 1);
}
