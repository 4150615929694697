//! Password, refresh, logout, one-time code and recovery flows through the
//! full router on an in-memory store.

mod common;

use axum::http::{Method, StatusCode};
use common::{PASSWORD, TestApp, code_in, wait_for_audit};
use serde_json::json;
use warden_core::auth::recovery::MAX_RECOVERY_ATTEMPTS;
use warden_core::auth::refresh::REFRESH_TOKEN_TTL_DAYS;
use warden_core::models::audit::AuditEventKind;
use warden_core::models::auth::{AccountStatus, Role, TokenState};
use warden_core::store::UserStore;
use warden_core::transport::RecordingTransport;

#[tokio::test]
async fn visitor_registers_then_signs_in_with_email() {
    let t = TestApp::new().await;
    let (status, body) = t
        .call(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({
                "name": "Luis",
                "paternalSurname": "Mora",
                "maternalSurname": "Diaz",
                "email": "Luis@Example.com",
                "phone": "5599887766",
                "password": PASSWORD,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["user"]["email"], "luis@example.com");

    let tokens = t.login("luis@example.com", "visitor").await;
    assert_eq!(tokens["tokenType"], "Bearer");
    assert!(tokens["accessToken"].is_string());

    let (status, me) = t
        .call(Method::GET, "/auth/me", tokens["accessToken"].as_str(), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["user"]["name"], "Luis");
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let t = TestApp::new().await;
    t.seed_user(Role::Visitor, "ana@example.com", "5511112222", None)
        .await;
    let (status, _) = t
        .call(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({
                "name": "Ana",
                "paternalSurname": "Lopez",
                "maternalSurname": "Ruiz",
                "email": "ana@example.com",
                "phone": "5500000000",
                "password": PASSWORD,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn registration_requires_every_field() {
    let t = TestApp::new().await;
    let (status, body) = t
        .call(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({ "name": "Solo" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let t = TestApp::new().await;
    t.seed_user(Role::Visitor, "ana@example.com", "5511112222", None)
        .await;
    let (status, body) = t
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "identifier": "ana@example.com", "password": "nope", "role": "visitor" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid credentials");
    wait_for_audit(&t.store, AuditEventKind::LoginFailed).await;
}

#[tokio::test]
async fn role_mismatch_is_forbidden_and_issues_nothing() {
    let t = TestApp::new().await;
    let student = t
        .seed_user(Role::Student, "stu@example.com", "5522223333", Some("A01234"))
        .await;

    let (status, body) = t
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "identifier": "A01234", "password": PASSWORD, "role": "teacher" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body.get("accessToken").is_none());
    assert!(t.store.sessions_for(student.id).await.is_empty());
    assert!(t.store.refresh_tokens_for(student.id).await.is_empty());

    let tokens = t.login("A01234", "student").await;
    assert_eq!(tokens["user"]["role"], json!(Role::Student));
}

#[tokio::test]
async fn refresh_rotates_and_supersedes_the_presented_token() {
    let t = TestApp::new().await;
    let user = t
        .seed_user(Role::Visitor, "ana@example.com", "5511112222", None)
        .await;
    let first = t.login("ana@example.com", "visitor").await;
    let body = json!({ "userId": user.id, "refreshToken": first["refreshToken"] });

    let (status, second) = t
        .call(Method::POST, "/auth/refresh", None, Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::OK, "{second}");
    assert_ne!(second["refreshToken"], first["refreshToken"]);

    let (status, _) = t.call(Method::POST, "/auth/refresh", None, Some(body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let records = t.store.refresh_tokens_for(user.id).await;
    assert_eq!(records.len(), 2);
    assert_eq!(
        records.iter().filter(|r| r.state == TokenState::Active).count(),
        1
    );
    let active = records
        .iter()
        .find(|r| r.state == TokenState::Active)
        .expect("one active token");
    let lifetime = active.expires_at - active.issued_at;
    assert!(lifetime.num_minutes() >= REFRESH_TOKEN_TTL_DAYS * 24 * 60 - 1);
}

#[tokio::test]
async fn refresh_requires_both_fields() {
    let t = TestApp::new().await;
    let (status, _) = t
        .call(
            Method::POST,
            "/auth/refresh",
            None,
            Some(json!({ "refreshToken": "abc" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn a_newer_session_supersedes_the_older_access_token() {
    let t = TestApp::new().await;
    t.seed_user(Role::Visitor, "ana@example.com", "5511112222", None)
        .await;
    let first = t.login("ana@example.com", "visitor").await;
    let second = t.login("ana@example.com", "visitor").await;

    let (status, _) = t
        .call(Method::GET, "/auth/me", first["accessToken"].as_str(), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = t
        .call(Method::GET, "/auth/me", second["accessToken"].as_str(), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn logout_closes_sessions_and_is_idempotent() {
    let t = TestApp::new().await;
    let user = t
        .seed_user(Role::Visitor, "ana@example.com", "5511112222", None)
        .await;
    let tokens = t.login("ana@example.com", "visitor").await;
    let access = tokens["accessToken"].as_str();

    let (status, _) = t.call(Method::POST, "/auth/logout", access, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = t.call(Method::POST, "/auth/logout", access, None).await;
    assert_eq!(status, StatusCode::OK);

    assert!(
        t.store
            .sessions_for(user.id)
            .await
            .iter()
            .all(|s| s.closed_at.is_some())
    );
    assert!(
        t.store
            .refresh_tokens_for(user.id)
            .await
            .iter()
            .all(|r| r.state == TokenState::Revoked)
    );

    let (status, _) = t.call(Method::GET, "/auth/me", access, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = t
        .call(
            Method::POST,
            "/auth/refresh",
            None,
            Some(json!({ "userId": user.id, "refreshToken": tokens["refreshToken"] })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_distinguishes_missing_and_invalid_tokens() {
    let t = TestApp::new().await;
    let (status, _) = t.call(Method::POST, "/auth/logout", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = t
        .call(Method::POST, "/auth/logout", Some("not-a-jwt"), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn protected_routes_need_a_bearer_token() {
    let t = TestApp::new().await;
    let (status, body) = t.call(Method::GET, "/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn availability_checks_report_existing_contacts() {
    let t = TestApp::new().await;
    t.seed_user(Role::Visitor, "ana@example.com", "5511112222", None)
        .await;

    let (_, body) = t
        .call(Method::GET, "/auth/check-email?email=ana@example.com", None, None)
        .await;
    assert_eq!(body["exists"], true);
    let (_, body) = t
        .call(Method::GET, "/auth/check-phone?phone=5599999999", None, None)
        .await;
    assert_eq!(body["exists"], false);
    let (status, _) = t.call(Method::GET, "/auth/check-email", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sms_code_signs_in_once() {
    let t = TestApp::new().await;
    t.seed_user(Role::Visitor, "ana@example.com", "5511112222", None)
        .await;

    let (status, sent) = t
        .call(Method::POST, "/otp/send", None, Some(json!({ "phone": "5511112222" })))
        .await;
    assert_eq!(status, StatusCode::OK, "{sent}");
    assert_eq!(sent["channel"], "sms");
    assert_eq!(sent["destination"], "*********2222");

    let payload = t.sms.last_to("+525511112222").expect("sms delivered");
    let code = code_in(&payload);
    let verify = json!({ "phone": "5511112222", "code": code });

    let (status, tokens) = t
        .call(Method::POST, "/otp/verify", None, Some(verify.clone()))
        .await;
    assert_eq!(status, StatusCode::OK, "{tokens}");
    assert!(tokens["accessToken"].is_string());

    let (status, _) = t.call(Method::POST, "/otp/verify", None, Some(verify)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wrong_code_is_rejected_and_the_code_is_spent() {
    let t = TestApp::new().await;
    t.seed_user(Role::Visitor, "ana@example.com", "5511112222", None)
        .await;
    t.call(Method::POST, "/otp/send", None, Some(json!({ "email": "ana@example.com" })))
        .await;
    let code = code_in(&t.email.last_to("ana@example.com").expect("email delivered"));
    let wrong = if code == "000000" { "111111" } else { "000000" };

    let (status, _) = t
        .call(
            Method::POST,
            "/otp/verify",
            None,
            Some(json!({ "email": "ana@example.com", "code": wrong })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = t
        .call(
            Method::POST,
            "/otp/verify",
            None,
            Some(json!({ "email": "ana@example.com", "code": code })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_phone_gets_not_found() {
    let t = TestApp::new().await;
    let (status, _) = t
        .call(Method::POST, "/otp/send", None, Some(json!({ "phone": "5500000000" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(t.sms.sent().is_empty());
}

#[tokio::test]
async fn password_reset_replaces_the_credential_and_ends_sessions() {
    let t = TestApp::new().await;
    let user = t
        .seed_user(Role::Visitor, "ana@example.com", "5511112222", None)
        .await;
    let old = t.login("ana@example.com", "visitor").await;

    let (status, _) = t
        .call(
            Method::POST,
            "/password/forgot",
            None,
            Some(json!({ "email": "ana@example.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let code = code_in(&t.email.last_to("ana@example.com").expect("code emailed"));

    let (status, _) = t
        .call(
            Method::POST,
            "/password/reset",
            None,
            Some(json!({ "email": "ana@example.com", "code": code, "newPassword": "N3w-password!" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = t
        .call(Method::GET, "/auth/me", old["accessToken"].as_str(), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = t
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "identifier": "ana@example.com", "password": "N3w-password!", "role": "visitor" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = t
        .call(
            Method::POST,
            "/password/reset",
            None,
            Some(json!({ "email": "ana@example.com", "code": code, "newPassword": "An0ther-pass!" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    wait_for_audit(&t.store, AuditEventKind::PasswordReset).await;
    assert!(
        t.store
            .refresh_tokens_for(user.id)
            .await
            .iter()
            .any(|r| r.state == TokenState::Revoked)
    );
}

#[tokio::test]
async fn forgot_password_does_not_reveal_unknown_addresses() {
    let t = TestApp::new().await;
    let (status, body) = t
        .call(
            Method::POST,
            "/password/forgot",
            None,
            Some(json!({ "email": "ghost@example.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].is_string());
    assert!(t.email.sent().is_empty());
}

#[tokio::test]
async fn profile_update_keeps_only_fields_the_role_may_edit() {
    let t = TestApp::new().await;
    t.seed_user(Role::Student, "stu@example.com", "5522223333", Some("A01234"))
        .await;
    let tokens = t.login("A01234", "student").await;
    let access = tokens["accessToken"].as_str();

    let (status, body) = t
        .call(
            Method::PATCH,
            "/users/me",
            access,
            Some(json!({ "name": "Hacked", "phone": "5577778888" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["user"]["name"], "Ana");
    assert_eq!(body["user"]["phone"], "5577778888");

    let (status, _) = t
        .call(Method::PATCH, "/users/me", access, Some(json!({ "name": "Only" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unreadable_bodies_are_validation_errors() {
    let t = TestApp::new().await;

    let (status, body) = t.post_raw("/auth/login", "{\"identifier\": ").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    assert!(body["message"].is_string());

    let (status, body) = t
        .call(
            Method::POST,
            "/webauthn/auth/verify",
            None,
            Some(json!({ "email": "ana@example.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["error"], "validation_error");

    let (status, body) = t
        .call(
            Method::POST,
            "/auth/refresh",
            None,
            Some(json!({ "userId": "not-a-uuid", "refreshToken": "abc" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn failed_code_delivery_is_an_internal_error() {
    let t = TestApp::with_email(RecordingTransport::failing()).await;
    t.seed_user(Role::Visitor, "ana@example.com", "5511112222", None)
        .await;

    let (status, body) = t
        .call(Method::POST, "/otp/send", None, Some(json!({ "email": "ana@example.com" })))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        json!({ "error": "internal_error", "message": "Internal server error" })
    );
}

#[tokio::test]
async fn blocked_accounts_cannot_sign_in_or_recover() {
    let t = TestApp::new().await;
    let user = t
        .seed_user(Role::Visitor, "ana@example.com", "5511112222", None)
        .await;
    t.store
        .set_account_status(user.id, AccountStatus::Blocked)
        .await
        .unwrap();

    let (status, body) = t
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "identifier": "ana@example.com", "password": PASSWORD, "role": "visitor" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
    assert_eq!(body["message"], "Account is blocked");
    assert!(t.store.refresh_tokens_for(user.id).await.is_empty());

    let (status, _) = t
        .call(
            Method::POST,
            "/password/forgot",
            None,
            Some(json!({ "email": "ana@example.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(t.email.sent().is_empty());

    t.store
        .set_account_status(user.id, AccountStatus::Active)
        .await
        .unwrap();
    t.login("ana@example.com", "visitor").await;
}

async fn recovery_code(t: &TestApp) -> String {
    let (status, _) = t
        .call(
            Method::POST,
            "/password/forgot",
            None,
            Some(json!({ "email": "ana@example.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    code_in(&t.email.last_to("ana@example.com").expect("code emailed"))
}

fn reset_body(code: &str, new_password: &str) -> serde_json::Value {
    json!({ "email": "ana@example.com", "code": code, "newPassword": new_password })
}

#[tokio::test]
async fn concurrent_resets_with_one_code_succeed_once() {
    let t = TestApp::new().await;
    t.seed_user(Role::Visitor, "ana@example.com", "5511112222", None)
        .await;
    let code = recovery_code(&t).await;

    let ((a, _), (b, _)) = tokio::join!(
        t.call(Method::POST, "/password/reset", None, Some(reset_body(&code, "F1rst-password!"))),
        t.call(Method::POST, "/password/reset", None, Some(reset_body(&code, "S3cond-password!"))),
    );
    let wins = [a, b].iter().filter(|s| **s == StatusCode::OK).count();
    assert_eq!(wins, 1, "statuses {a} and {b}");
    assert!([a, b].contains(&StatusCode::BAD_REQUEST));
}

#[tokio::test]
async fn weak_password_does_not_spend_the_code() {
    let t = TestApp::new().await;
    t.seed_user(Role::Visitor, "ana@example.com", "5511112222", None)
        .await;
    let code = recovery_code(&t).await;

    let (status, _) = t
        .call(Method::POST, "/password/reset", None, Some(reset_body(&code, "short")))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = t
        .call(Method::POST, "/password/reset", None, Some(reset_body(&code, "N3w-password!")))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn repeated_wrong_recovery_codes_void_the_code() {
    let t = TestApp::new().await;
    t.seed_user(Role::Visitor, "ana@example.com", "5511112222", None)
        .await;
    let code = recovery_code(&t).await;
    let wrong = if code == "000000" { "111111" } else { "000000" };

    for _ in 0..MAX_RECOVERY_ATTEMPTS {
        let (status, _) = t
            .call(Method::POST, "/password/reset", None, Some(reset_body(wrong, "N3w-password!")))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
    let (status, _) = t
        .call(Method::POST, "/password/reset", None, Some(reset_body(&code, "N3w-password!")))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    t.login("ana@example.com", "visitor").await;
}
