//! Tests for auth module
//!
//! These tests verify core authentication functionality including:
//! - Session issuance, validation and renewal
//! - Credential verification and registration
//! - Identity linking under repeated and concurrent sign-ins
//! - Password reset token issue and consume
//! - The HTTP surface through the router

#[cfg(test)]
mod tests {
    use super::super::*;
    use axum::{
        body::{to_bytes, Body},
        extract::Extension,
        http::{header, Request, StatusCode},
        Router,
    };
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::common::migrations::{test_file_pool, test_pool};
    use crate::common::testing::{
        count_rows, insert_user, shared, test_state, FailingEmailSender, FakeGateway,
        RecordingEmailSender, TEST_JWT_SECRET,
    };
    use identity::{IdentityError, IdentityLinker};
    use models::ProviderIdentity;
    use password::{
        dummy_hash, hash_password, verify_password, CredentialError, CredentialVerifier,
    };
    use providers::{check_google_token_info, primary_verified_email, GithubEmail, GoogleTokenInfo};
    use reset::{PasswordResetService, ResetError};
    use session::{SessionError, SessionIssuer};

    fn github_identity(id: &str, email: &str) -> ProviderIdentity {
        ProviderIdentity {
            provider: "github".to_string(),
            provider_account_id: id.to_string(),
            email: email.to_string(),
            name: Some("Octo Cat".to_string()),
            avatar: None,
        }
    }

    async fn password_hash_of(db: &sqlx::SqlitePool, email: &str) -> Option<String> {
        let (hash,): (Option<String>,) =
            sqlx::query_as("SELECT password_hash FROM users WHERE email = ?")
                .bind(email)
                .fetch_one(db)
                .await
                .unwrap();
        hash
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    #[test]
    fn test_session_issue_and_validate() {
        let issuer = SessionIssuer::new(Some(TEST_JWT_SECRET.to_string()));
        let now = Utc::now();
        let token = issuer.issue_at("U_abc", now).unwrap();

        let claims = issuer.validate(&token).unwrap();
        assert_eq!(claims.sub, "U_abc");
        assert_eq!(claims.iat, now.timestamp());
        assert_eq!(claims.exp, (now + Duration::days(30)).timestamp());
    }

    #[test]
    fn test_session_validation_fails_with_wrong_secret() {
        let issuer = SessionIssuer::new(Some("one_secret".to_string()));
        let other = SessionIssuer::new(Some("another_secret".to_string()));
        let token = issuer.issue("U_abc").unwrap();

        assert!(matches!(
            other.validate(&token),
            Err(SessionError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_expired_session_is_rejected() {
        let issuer = SessionIssuer::new(Some(TEST_JWT_SECRET.to_string()));
        let token = issuer
            .issue_at("U_abc", Utc::now() - Duration::days(31))
            .unwrap();

        assert!(issuer.validate(&token).is_err());
    }

    #[test]
    fn test_missing_signing_key() {
        let issuer = SessionIssuer::new(None);
        assert!(matches!(
            issuer.issue("U_abc"),
            Err(SessionError::SigningKeyUnavailable)
        ));

        let empty = SessionIssuer::new(Some(String::new()));
        assert!(matches!(
            empty.validate("anything"),
            Err(SessionError::SigningKeyUnavailable)
        ));

        let api: crate::common::ApiError = SessionError::SigningKeyUnavailable.into();
        assert_eq!(api.status_and_code().0, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_session_renewal_after_a_day() {
        let issuer = SessionIssuer::new(Some(TEST_JWT_SECRET.to_string()));
        let issued = Utc::now() - Duration::hours(2);
        let token = issuer.issue_at("U_abc", issued).unwrap();

        let (same, renewed) = issuer.renew_at(&token, issued + Duration::hours(23)).unwrap();
        assert!(!renewed);
        assert_eq!(same, token);

        let later = issued + Duration::hours(25);
        let (fresh, renewed) = issuer.renew_at(&token, later).unwrap();
        assert!(renewed);
        let claims = issuer.validate(&fresh).unwrap();
        assert_eq!(claims.sub, "U_abc");
        assert_eq!(claims.iat, later.timestamp());
    }

    // ------------------------------------------------------------------
    // Credential verifier
    // ------------------------------------------------------------------

    #[test]
    fn test_password_hash_round_trip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-phc-string"));
    }

    #[test]
    fn test_dummy_hash_is_a_real_argon2id_hash() {
        let hash = dummy_hash().unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert_eq!(dummy_hash(), Some(hash));

        // Same cost parameters as a stored password hash
        let stored = hash_password("abcdefgh").unwrap();
        let params = |h: &str| h.split('$').nth(3).map(str::to_string);
        assert_eq!(params(hash), params(&stored));

        assert!(!verify_password("abcdefgh", hash));
    }

    #[tokio::test]
    async fn test_verify_rejects_weak_password_before_lookup() {
        let pool = test_pool().await;
        let verifier = CredentialVerifier::new(pool);

        // Seven characters, multi-byte: length is counted in characters
        let result = verifier.verify("nobody@example.com", "pässwö1").await;
        assert!(matches!(result, Err(CredentialError::WeakPassword)));
    }

    #[tokio::test]
    async fn test_verify_outcomes() {
        let pool = test_pool().await;
        let hash = hash_password("abcdefgh").unwrap();
        insert_user(&pool, "U_pw", "pw@example.com", Some(&hash), None).await;
        insert_user(&pool, "U_oauth", "oauth@example.com", None, None).await;

        let verifier = CredentialVerifier::new(pool);

        assert_eq!(
            verifier.verify("pw@example.com", "abcdefgh").await.unwrap(),
            "U_pw"
        );
        assert!(matches!(
            verifier.verify("pw@example.com", "abcdefgX").await,
            Err(CredentialError::WrongPassword)
        ));
        assert!(matches!(
            verifier.verify("missing@example.com", "abcdefgh").await,
            Err(CredentialError::InvalidCredentials)
        ));
        assert!(matches!(
            verifier.verify("oauth@example.com", "abcdefgh").await,
            Err(CredentialError::InvalidCredentials)
        ));
        // Emails are case-sensitive as stored
        assert!(matches!(
            verifier.verify("PW@example.com", "abcdefgh").await,
            Err(CredentialError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_absent_password_costs_a_verification() {
        let pool = test_pool().await;
        let hash = hash_password("abcdefgh").unwrap();
        insert_user(&pool, "U_pw", "pw@example.com", Some(&hash), None).await;
        insert_user(&pool, "U_oauth", "oauth@example.com", None, None).await;
        let verifier = CredentialVerifier::new(pool);
        dummy_hash().unwrap();

        let started = std::time::Instant::now();
        let _ = verifier.verify("pw@example.com", "abcdefgX").await;
        let wrong_password = started.elapsed();

        for email in ["missing@example.com", "oauth@example.com"] {
            let started = std::time::Instant::now();
            let result = verifier.verify(email, "abcdefgX").await;
            assert!(matches!(result, Err(CredentialError::InvalidCredentials)));
            assert!(started.elapsed() * 4 > wrong_password);
        }
    }

    #[tokio::test]
    async fn test_register_rejects_taken_email() {
        let pool = test_pool().await;
        insert_user(&pool, "U_oauth", "oauth@example.com", None, None).await;
        let verifier = CredentialVerifier::new(pool.clone());

        let user = verifier
            .register("new@example.com", "abcdefgh", Some("New"))
            .await
            .unwrap();
        assert!(user.id.starts_with("U_"));
        assert!(user.has_password());

        assert!(matches!(
            verifier.register("new@example.com", "abcdefgh", None).await,
            Err(CredentialError::EmailTaken)
        ));
        assert!(matches!(
            verifier.register("oauth@example.com", "abcdefgh", None).await,
            Err(CredentialError::EmailTaken)
        ));
        assert_eq!(count_rows(&pool, "users").await, 2);
    }

    // ------------------------------------------------------------------
    // Identity linker
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_link_existing_user_creates_one_provider_account() {
        let pool = test_pool().await;
        let hash = hash_password("abcdefgh").unwrap();
        insert_user(&pool, "U_existing", "u@x.com", Some(&hash), None).await;

        let linker = IdentityLinker::new(pool.clone());
        let identity = github_identity("42", "u@x.com");

        let first = linker.link_or_create(&identity).await.unwrap();
        assert_eq!(first.user_id, "U_existing");
        assert!(!first.created_user);
        assert!(first.linked_account);
        assert_eq!(count_rows(&pool, "provider_accounts").await, 1);

        let second = linker.link_or_create(&identity).await.unwrap();
        assert_eq!(second.user_id, "U_existing");
        assert!(!second.created_user);
        assert!(!second.linked_account);
        assert_eq!(count_rows(&pool, "provider_accounts").await, 1);
        assert_eq!(count_rows(&pool, "users").await, 1);

        // The existing password survives linking
        assert_eq!(password_hash_of(&pool, "u@x.com").await, Some(hash));
    }

    #[tokio::test]
    async fn test_first_sign_in_creates_oauth_only_user_and_link() {
        let pool = test_pool().await;
        let linker = IdentityLinker::new(pool.clone());

        let linked = linker
            .link_or_create(&github_identity("7", "fresh@x.com"))
            .await
            .unwrap();
        assert!(linked.created_user);
        assert!(linked.linked_account);
        assert_eq!(password_hash_of(&pool, "fresh@x.com").await, None);

        let (owner,): (String,) = sqlx::query_as(
            "SELECT user_id FROM provider_accounts WHERE provider = 'github' AND provider_account_id = '7'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(owner, linked.user_id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sign_ins_converge() {
        let (pool, _dir) = test_file_pool(8).await;
        let linker = Arc::new(IdentityLinker::new(pool.clone()));
        let identity = github_identity("99", "race@x.com");
        let barrier = Arc::new(tokio::sync::Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let (linker, identity, barrier) = (linker.clone(), identity.clone(), barrier.clone());
                tokio::spawn(async move {
                    barrier.wait().await;
                    linker.link_or_create(&identity).await
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        let user_id = &results[0].user_id;
        assert!(results.iter().all(|r| &r.user_id == user_id));
        assert_eq!(results.iter().filter(|r| r.created_user).count(), 1);
        assert_eq!(results.iter().filter(|r| r.linked_account).count(), 1);
        assert_eq!(count_rows(&pool, "users").await, 1);
        assert_eq!(count_rows(&pool, "provider_accounts").await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_providers_for_one_email_share_the_user() {
        let (pool, _dir) = test_file_pool(8).await;
        let linker = Arc::new(IdentityLinker::new(pool.clone()));
        let barrier = Arc::new(tokio::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let mut identity = github_identity(&format!("gh-{}", i % 2), "shared@x.com");
                if i % 2 == 1 {
                    identity.provider = "google".to_string();
                }
                let (linker, barrier) = (linker.clone(), barrier.clone());
                tokio::spawn(async move {
                    barrier.wait().await;
                    linker.link_or_create(&identity).await
                })
            })
            .collect();

        let mut user_ids = Vec::new();
        for handle in handles {
            user_ids.push(handle.await.unwrap().unwrap().user_id);
        }

        user_ids.dedup();
        assert_eq!(user_ids.len(), 1);
        assert_eq!(count_rows(&pool, "users").await, 1);
        assert_eq!(count_rows(&pool, "provider_accounts").await, 2);
    }

    #[tokio::test]
    async fn test_provider_account_bound_to_other_user_conflicts() {
        let pool = test_pool().await;
        let linker = IdentityLinker::new(pool.clone());

        linker
            .link_or_create(&github_identity("42", "first@x.com"))
            .await
            .unwrap();

        // Same GitHub account now reports a different email
        let result = linker
            .link_or_create(&github_identity("42", "second@x.com"))
            .await;
        assert!(matches!(
            result,
            Err(IdentityError::ProviderAccountConflict { .. })
        ));

        // The user row for the second email was rolled back
        assert_eq!(count_rows(&pool, "users").await, 1);
        assert_eq!(count_rows(&pool, "provider_accounts").await, 1);
    }

    // ------------------------------------------------------------------
    // Password reset
    // ------------------------------------------------------------------

    fn reset_service(pool: &sqlx::SqlitePool) -> PasswordResetService {
        PasswordResetService::new(pool.clone(), Arc::new(RecordingEmailSender::default()))
    }

    #[tokio::test]
    async fn test_issue_for_unknown_email() {
        let pool = test_pool().await;
        let result = reset_service(&pool)
            .create_token_at("a@x.com", Utc::now())
            .await;

        assert!(matches!(result, Err(ResetError::UnknownEmail)));
        assert_eq!(count_rows(&pool, "reset_tokens").await, 0);
    }

    #[tokio::test]
    async fn test_consume_within_hour_then_replay() {
        let pool = test_pool().await;
        insert_user(&pool, "U_1", "a@x.com", None, None).await;
        let service = reset_service(&pool);

        let t = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let token = service.create_token_at("a@x.com", t).await.unwrap();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));

        let consumed_at = t + Duration::minutes(59);
        service
            .consume_at(&token, "abcdefgh", consumed_at)
            .await
            .unwrap();

        let hash = password_hash_of(&pool, "a@x.com").await.unwrap();
        assert!(verify_password("abcdefgh", &hash));
        assert_eq!(count_rows(&pool, "reset_tokens").await, 0);

        let replay = service
            .consume_at(&token, "abcdefgh", consumed_at + Duration::seconds(1))
            .await;
        assert!(matches!(replay, Err(ResetError::InvalidToken)));
    }

    #[tokio::test]
    async fn test_unknown_token_is_rejected_without_hashing() {
        let pool = test_pool().await;
        insert_user(&pool, "U_1", "a@x.com", None, None).await;
        let service = reset_service(&pool);
        let token = service.create_token_at("a@x.com", Utc::now()).await.unwrap();

        let started = std::time::Instant::now();
        password::hash_password_blocking("abcdefgh".to_string())
            .await
            .unwrap();
        let one_hash = started.elapsed();

        let started = std::time::Instant::now();
        for guess in 0..5 {
            let result = service.consume(&format!("{:064x}", guess), "abcdefgh").await;
            assert!(matches!(result, Err(ResetError::InvalidToken)));
        }
        assert!(started.elapsed() < one_hash);

        // The real token is untouched by the guesses
        assert_eq!(count_rows(&pool, "reset_tokens").await, 1);
        service.consume(&token, "abcdefgh").await.unwrap();
    }

    #[tokio::test]
    async fn test_consume_after_expiry() {
        let pool = test_pool().await;
        insert_user(&pool, "U_1", "a@x.com", None, None).await;
        let service = reset_service(&pool);

        let t = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let token = service.create_token_at("a@x.com", t).await.unwrap();

        let result = service
            .consume_at(&token, "abcdefgh", t + Duration::minutes(61))
            .await;
        assert!(matches!(result, Err(ResetError::ExpiredToken)));

        assert_eq!(password_hash_of(&pool, "a@x.com").await, None);
        assert_eq!(count_rows(&pool, "reset_tokens").await, 0);
    }

    #[tokio::test]
    async fn test_weak_password_keeps_token() {
        let pool = test_pool().await;
        insert_user(&pool, "U_1", "a@x.com", None, None).await;
        let service = reset_service(&pool);

        let t = Utc::now();
        let token = service.create_token_at("a@x.com", t).await.unwrap();

        let result = service.consume_at(&token, "short", t).await;
        assert!(matches!(result, Err(ResetError::WeakPassword)));
        assert_eq!(count_rows(&pool, "reset_tokens").await, 1);
    }

    #[tokio::test]
    async fn test_new_token_invalidates_prior_and_purges_expired() {
        let pool = test_pool().await;
        insert_user(&pool, "U_1", "a@x.com", None, None).await;
        insert_user(&pool, "U_2", "b@x.com", None, None).await;
        let service = reset_service(&pool);

        let t = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let stale_other = service
            .create_token_at("b@x.com", t - Duration::hours(3))
            .await
            .unwrap();
        let first = service.create_token_at("a@x.com", t).await.unwrap();
        let second = service
            .create_token_at("a@x.com", t + Duration::minutes(5))
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(count_rows(&pool, "reset_tokens").await, 1);

        let at = t + Duration::minutes(10);
        assert!(matches!(
            service.consume_at(&first, "abcdefgh", at).await,
            Err(ResetError::InvalidToken)
        ));
        assert!(matches!(
            service.consume_at(&stale_other, "abcdefgh", at).await,
            Err(ResetError::InvalidToken)
        ));
        service.consume_at(&second, "abcdefgh", at).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consume_succeeds_once() {
        let (pool, _dir) = test_file_pool(8).await;
        insert_user(&pool, "U_1", "a@x.com", None, None).await;
        let service = Arc::new(reset_service(&pool));
        let token = service.create_token_at("a@x.com", Utc::now()).await.unwrap();
        let barrier = Arc::new(tokio::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let (service, token, barrier) = (service.clone(), token.clone(), barrier.clone());
                tokio::spawn(async move {
                    barrier.wait().await;
                    let password = format!("password-{}", i);
                    let result = service.consume(&token, &password).await;
                    result.map(|_| password)
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        let winners: Vec<&String> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        assert!(results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(ResetError::InvalidToken))));
        assert_eq!(count_rows(&pool, "reset_tokens").await, 0);

        // The stored password is the winner's
        let stored = password_hash_of(&pool, "a@x.com").await.unwrap();
        assert!(verify_password(winners[0], &stored));
    }

    #[tokio::test]
    async fn test_issue_sends_reset_link() {
        let pool = test_pool().await;
        insert_user(&pool, "U_1", "a@x.com", None, None).await;
        let sender = Arc::new(RecordingEmailSender::default());
        let service = PasswordResetService::new(pool.clone(), sender.clone());

        let token = service
            .issue("a@x.com", |t| format!("https://app.example.com/reset-password?token={}", t))
            .await
            .unwrap();

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@x.com");
        assert!(sent[0].html_body.contains(&token));
    }

    #[tokio::test]
    async fn test_delivery_failure_keeps_token() {
        let pool = test_pool().await;
        insert_user(&pool, "U_1", "a@x.com", None, None).await;
        let service = PasswordResetService::new(pool.clone(), Arc::new(FailingEmailSender));

        let result = service.issue("a@x.com", |t| t.to_string()).await;
        assert!(matches!(result, Err(ResetError::DeliveryFailed(_))));
        assert_eq!(count_rows(&pool, "reset_tokens").await, 1);
    }

    // ------------------------------------------------------------------
    // Provider verification
    // ------------------------------------------------------------------

    fn google_info(aud: &str, verified: Value, exp: i64) -> GoogleTokenInfo {
        serde_json::from_value(json!({
            "sub": "1234567890",
            "email": "g@x.com",
            "email_verified": verified,
            "name": "Gee",
            "aud": aud,
            "exp": exp.to_string(),
        }))
        .unwrap()
    }

    #[test]
    fn test_google_token_info_checks() {
        let future = (Utc::now() + Duration::hours(1)).timestamp();
        let past = (Utc::now() - Duration::hours(1)).timestamp();

        let identity =
            check_google_token_info(google_info("client-1", json!("true"), future), Some("client-1"))
                .unwrap();
        assert_eq!(identity.provider, "google");
        assert_eq!(identity.provider_account_id, "1234567890");
        assert_eq!(identity.email, "g@x.com");

        assert!(check_google_token_info(
            google_info("client-2", json!("true"), future),
            Some("client-1")
        )
        .is_err());
        assert!(check_google_token_info(
            google_info("client-1", json!(false), future),
            Some("client-1")
        )
        .is_err());
        assert!(check_google_token_info(
            google_info("client-1", json!("true"), past),
            Some("client-1")
        )
        .is_err());

        let missing_sub: GoogleTokenInfo =
            serde_json::from_value(json!({ "email": "g@x.com" })).unwrap();
        assert!(matches!(
            check_google_token_info(missing_sub, Some("client-1")),
            Err(providers::ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn test_google_sign_in_refused_without_client_id() {
        let future = (Utc::now() + Duration::hours(1)).timestamp();

        // A well-formed token for some other Google client
        for audience in [None, Some("")] {
            assert!(matches!(
                check_google_token_info(
                    google_info("other-app", json!("true"), future),
                    audience
                ),
                Err(providers::ProviderError::Unavailable(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_google_verify_without_client_id_makes_no_request() {
        // A network attempt would surface a different error message
        let http = reqwest::Client::new();
        let err = providers::verify_google_id_token(&http, "any-token", None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "google sign-in is not configured");
    }

    #[test]
    fn test_google_email_must_be_asserted_verified() {
        let future = (Utc::now() + Duration::hours(1)).timestamp();

        let absent: GoogleTokenInfo = serde_json::from_value(json!({
            "sub": "1234567890",
            "email": "g@x.com",
            "aud": "client-1",
            "exp": future.to_string(),
        }))
        .unwrap();
        assert!(matches!(
            check_google_token_info(absent, Some("client-1")),
            Err(providers::ProviderError::Rejected(_))
        ));

        for verified in [json!("false"), json!("yes"), json!(null), json!(1)] {
            assert!(matches!(
                check_google_token_info(google_info("client-1", verified, future), Some("client-1")),
                Err(providers::ProviderError::Rejected(_))
            ));
        }

        assert!(
            check_google_token_info(google_info("client-1", json!(true), future), Some("client-1"))
                .is_ok()
        );
    }

    #[test]
    fn test_github_primary_verified_email() {
        let emails: Vec<GithubEmail> = serde_json::from_value(json!([
            { "email": "old@x.com", "primary": false, "verified": true },
            { "email": "main@x.com", "primary": true, "verified": true },
        ]))
        .unwrap();
        assert_eq!(primary_verified_email(&emails), Some("main@x.com"));

        let unverified: Vec<GithubEmail> = serde_json::from_value(json!([
            { "email": "main@x.com", "primary": true, "verified": false },
        ]))
        .unwrap();
        assert_eq!(primary_verified_email(&unverified), None);
    }

    // ------------------------------------------------------------------
    // Router
    // ------------------------------------------------------------------

    async fn test_app() -> (Router, sqlx::SqlitePool, Arc<RecordingEmailSender>) {
        let pool = test_pool().await;
        let sender = Arc::new(RecordingEmailSender::default());
        let state = test_state(pool.clone(), sender.clone(), Arc::new(FakeGateway::default()));
        let app = auth_routes().layer(Extension(shared(state)));
        (app, pool, sender)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_login_and_me() {
        let (app, _pool, _) = test_app().await;

        let (status, body) = send(
            &app,
            post_json(
                "/api/register",
                json!({ "email": "new@x.com", "password": "abcdefgh", "name": "New" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["email"], "new@x.com");
        assert_eq!(body["user"]["has_password"], true);
        assert!(body["user"].get("password_hash").is_none());

        let (status, _) = send(
            &app,
            post_json("/api/register", json!({ "email": "new@x.com", "password": "abcdefgh" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(
            &app,
            post_json("/api/auth/login", json!({ "email": "new@x.com", "password": "abcdefgh" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            Request::builder()
                .uri("/api/me")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["email"], "new@x.com");

        let (status, body) = send(
            &app,
            Request::builder()
                .method("POST")
                .uri("/api/auth/session")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["renewed"], false);
    }

    #[tokio::test]
    async fn test_login_error_statuses() {
        let (app, _pool, _) = test_app().await;

        let (status, body) = send(
            &app,
            post_json("/api/auth/login", json!({ "email": "x@x.com", "password": "short" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");

        let (status, body) = send(
            &app,
            post_json("/api/auth/login", json!({ "email": "x@x.com", "password": "abcdefgh" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid email or password");
    }

    #[tokio::test]
    async fn test_me_requires_session() {
        let (app, _pool, _) = test_app().await;

        let (status, _) = send(
            &app,
            Request::builder().uri("/api/me").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(
            &app,
            Request::builder()
                .uri("/api/me")
                .header(header::AUTHORIZATION, "Bearer not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_forgot_and_reset_password_over_http() {
        let (app, pool, sender) = test_app().await;
        insert_user(&pool, "U_1", "a@x.com", None, None).await;

        let (status, _) = send(
            &app,
            post_json("/api/auth/forgot-password", json!({ "email": "nobody@x.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            post_json("/api/auth/forgot-password", json!({ "email": "a@x.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0]
            .html_body
            .contains("https://app.example.com/reset-password?token="));

        let (token,): (String,) = sqlx::query_as("SELECT token FROM reset_tokens")
            .fetch_one(&pool)
            .await
            .unwrap();

        let (status, _) = send(
            &app,
            post_json(
                "/api/auth/reset-password",
                json!({ "token": token, "newPassword": "abcdefgh" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app,
            post_json(
                "/api/auth/reset-password",
                json!({ "token": token, "password": "abcdefgh" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid reset token");

        // The reset password now works for login
        let (status, _) = send(
            &app,
            post_json("/api/auth/login", json!({ "email": "a@x.com", "password": "abcdefgh" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}
