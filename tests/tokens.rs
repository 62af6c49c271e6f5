mod common;

use uuid::Uuid;

use tenant_auth::services::auth::principal::{PrincipalStatus, PrincipalType};
use tenant_auth::services::auth::token_service::{TokenLifetimes, TokenTtls};
use tenant_auth::services::auth::{AuthError, IssuedTokens, LoginOutcome, LoginRequest};
use tenant_auth::services::cache::MemoryCache;

use common::{TestEnv, env};

async fn login(env: &TestEnv<MemoryCache>, user: &str, tenant: Option<Uuid>, remember_me: bool) -> IssuedTokens {
    let outcome = env
        .services
        .login
        .login(LoginRequest {
            username: user.to_string(),
            password: "pw".to_string(),
            tenant_id: tenant,
            remember_me,
            source_ip: None,
        })
        .await
        .unwrap();
    match outcome {
        LoginOutcome::Authenticated(tokens) => *tokens,
        LoginOutcome::MfaRequired { .. } => panic!("unexpected mfa challenge"),
    }
}

#[tokio::test]
async fn rotation_invalidates_the_presented_token() {
    let env = env();
    let t1 = Uuid::new_v4();
    let user = env.add_tenant_user("rot", "pw", t1);
    let first = login(&env, "rot", Some(t1), false).await;

    let second = env
        .services
        .tokens
        .rotate_refresh_token(&first.refresh_token)
        .await
        .unwrap();
    assert_ne!(second.refresh_token, first.refresh_token);

    let err = env
        .services
        .tokens
        .rotate_refresh_token(&first.refresh_token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidToken));

    env.services
        .tokens
        .rotate_refresh_token(&second.refresh_token)
        .await
        .unwrap();

    let rows = env.db.refresh_tokens_of(user.id);
    assert_eq!(rows.len(), 3);
    let old = rows.iter().find(|r| r.id == first.refresh_token_id).unwrap();
    assert!(old.revoked_at.is_some());
    assert_eq!(old.replaced_by, Some(second.refresh_token_id));
}

#[tokio::test]
async fn refresh_tokens_are_stored_hashed() {
    let env = env();
    let t1 = Uuid::new_v4();
    let user = env.add_tenant_user("hashy", "pw", t1);
    let issued = login(&env, "hashy", Some(t1), false).await;

    let rows = env.db.refresh_tokens_of(user.id);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, issued.refresh_token_id);
    assert!(!issued.refresh_token.is_empty());
}

#[tokio::test]
async fn rotation_keeps_mfa_and_remember_me() {
    let env = env();
    let t1 = Uuid::new_v4();
    env.add_tenant_user("keep", "pw", t1);
    let first = login(&env, "keep", Some(t1), true).await;
    assert!(first.remember_me);
    assert_eq!(first.expires_in, 3600);
    assert_eq!(first.refresh_expires_in, 2_592_000);

    let second = env
        .services
        .tokens
        .rotate_refresh_token(&first.refresh_token)
        .await
        .unwrap();
    assert!(second.remember_me);
    assert_eq!(second.claims.amr, vec!["pwd".to_string()]);
}

#[tokio::test]
async fn tenant_settings_override_default_lifetimes() {
    let env = env();
    let t1 = Uuid::new_v4();
    env.add_tenant_user("short", "pw", t1);
    let custom = TokenLifetimes {
        access_seconds: 120,
        id_seconds: 240,
        refresh_seconds: 600,
    };
    env.db.set_token_ttls(
        t1,
        TokenTtls {
            standard: custom,
            remember_me: custom,
        },
    );

    let issued = login(&env, "short", Some(t1), false).await;
    assert_eq!(issued.expires_in, 120);
    assert_eq!(issued.refresh_expires_in, 600);
}

#[tokio::test]
async fn deactivated_principal_cannot_refresh() {
    let env = env();
    let t1 = Uuid::new_v4();
    let user = env.add_tenant_user("gone", "pw", t1);
    let issued = login(&env, "gone", Some(t1), false).await;
    env.db.set_status(user.id, PrincipalStatus::Inactive);

    let err = env
        .services
        .tokens
        .rotate_refresh_token(&issued.refresh_token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidToken));
}

#[tokio::test]
async fn revoke_and_logout_all() {
    let env = env();
    let t1 = Uuid::new_v4();
    let user = env.add_tenant_user("rev", "pw", t1);
    let a = login(&env, "rev", Some(t1), false).await;
    let b = login(&env, "rev", Some(t1), false).await;
    let c = login(&env, "rev", Some(t1), false).await;

    env.services.tokens.revoke_token(&a.refresh_token).await.unwrap();
    // Revoking twice is not an error.
    env.services.tokens.revoke_token(&a.refresh_token).await.unwrap();
    assert!(matches!(
        env.services.tokens.rotate_refresh_token(&a.refresh_token).await,
        Err(AuthError::InvalidToken)
    ));

    let revoked = env.services.tokens.revoke_all_for_user(user.id).await.unwrap();
    assert_eq!(revoked, 2);
    for t in [&b, &c] {
        assert!(env
            .services
            .tokens
            .rotate_refresh_token(&t.refresh_token)
            .await
            .is_err());
    }
}

#[tokio::test]
async fn scope_is_identical_across_builds() {
    let env = env();
    let t1 = Uuid::new_v4();
    let user = env.add_tenant_user("scoped", "pw", t1);
    env.grant_tenant_role(t1, user.id, "editor", &[("posts", "write"), ("posts", "read")]);
    env.grant_tenant_role(t1, user.id, "admin", &[("users", "read"), ("posts", "read")]);

    let first = login(&env, "scoped", Some(t1), false).await;
    let second = login(&env, "scoped", Some(t1), false).await;

    assert_eq!(first.claims.scope, second.claims.scope);
    assert_eq!(
        first.claims.scope,
        format!("tenant:{t1} role:admin role:editor perm:posts:read perm:posts:write perm:users:read")
    );
    assert_eq!(first.claims.roles, vec!["admin".to_string(), "editor".to_string()]);
    assert!(first.claims.system_roles.is_empty());
}

#[tokio::test]
async fn system_claims_stay_on_the_system_plane() {
    let env = env();
    let root = env.add_system_user("root", "pw");
    env.grant_system_role(root.id, "platform-admin", &[("system.users", "impersonate")]);

    let issued = login(&env, "root", None, false).await;
    let claims = env
        .services
        .tokens
        .verify_access_token(&issued.access_token)
        .unwrap()
        .claims;

    assert_eq!(claims.principal_type, PrincipalType::System);
    assert_eq!(claims.tenant_id, None);
    assert_eq!(claims.scope, "system:* system_role:platform-admin");
    assert_eq!(claims.system_permissions, vec!["system.users:impersonate".to_string()]);
    assert!(claims.roles.is_empty() && claims.permissions.is_empty());
}

#[tokio::test]
async fn access_token_is_not_an_id_token() {
    let env = env();
    let t1 = Uuid::new_v4();
    env.add_tenant_user("uses", "pw", t1);
    let issued = login(&env, "uses", Some(t1), false).await;

    assert!(env.services.tokens.verify_id_token(&issued.access_token).is_err());
    assert!(env.services.tokens.verify_access_token(&issued.id_token).is_err());
    assert!(env.services.tokens.verify_access_token("not-a-jwt").is_err());
}
