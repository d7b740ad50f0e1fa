use reveda::*;
use reveda_devserver::{DevServer, DevSettings};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn setup() -> (DevServer, ApiClient) {
    let server = DevServer::spawn(DevSettings::default()).unwrap();
    let client = ApiClient::new(
        ApiConfig::new(&server.base_url()),
        Arc::new(SessionStore::in_memory()),
    )
    .unwrap();
    (server, client)
}

fn sign_in(client: &ApiClient, identifier: &str) -> Session {
    let outcome = client.login(identifier).unwrap();
    assert!(outcome.otpSent);
    client.verify_otp(identifier, "123456").unwrap()
}

#[test]
fn test_verify_otp_establishes_session() {
    let (_server, client) = setup();
    assert!(!client.is_authenticated());
    assert_eq!(client.current_user(), None);

    let session = sign_in(&client, "user@example.com");
    assert_eq!(session.user.email, "user@example.com");
    assert!(session.user.isVerified);
    assert!(!session.accessToken.is_empty());
    assert!(!session.refreshToken.is_empty());

    assert!(client.is_authenticated());
    assert_eq!(client.current_user(), Some(session.user.clone()));
    assert_eq!(client.session().snapshot().session(), Some(session));
}

#[test]
fn test_wrong_otp_leaves_session_unchanged() {
    let (_server, client) = setup();
    sign_in(&client, "first@example.com");
    let before = client.session().snapshot();

    client.login("second@example.com").unwrap();
    match client.verify_otp("second@example.com", "654321") {
        Err(ApiError::Validation { message, .. }) => assert_eq!(message, "Invalid OTP"),
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(client.session().snapshot(), before);
    assert_eq!(client.current_user().unwrap().email, "first@example.com");
}

#[test]
fn test_bearer_token_attached() {
    let (server, client) = setup();
    client.health_check().unwrap();
    assert_eq!(server.state().last_authorization("/health"), None);

    let session = sign_in(&client, "user@example.com");
    let profile = client.get_profile().unwrap();
    assert_eq!(profile, session.user);
    assert_eq!(
        server.state().last_authorization("/auth/profile"),
        Some(format!("Bearer {}", session.accessToken))
    );
}

#[test]
fn test_expired_token_refreshes_once() {
    let (server, client) = setup();
    let session = sign_in(&client, "user@example.com");
    server.state().expire_access_tokens();

    let doctors = client.get_doctors().unwrap();
    assert_eq!(doctors.len(), 3);
    assert_eq!(server.state().refresh_calls(), 1);
    // original attempt plus one replay
    assert_eq!(server.state().request_count("/doctors"), 2);

    let refreshed = client.session().snapshot().session().unwrap();
    assert_ne!(refreshed.accessToken, session.accessToken);
    assert_ne!(refreshed.refreshToken, session.refreshToken);
    assert_eq!(refreshed.user, session.user);
    assert_eq!(
        server.state().last_authorization("/doctors"),
        Some(format!("Bearer {}", refreshed.accessToken))
    );

    // the new token is good, so no more refreshing
    client.get_doctors().unwrap();
    assert_eq!(server.state().refresh_calls(), 1);
    assert_eq!(server.state().request_count("/doctors"), 3);
}

#[test]
fn test_failed_replay_does_not_loop() {
    let (server, client) = setup();
    sign_in(&client, "user@example.com");
    server.state().reject_access_tokens(true);

    let err = client.get_doctors().unwrap_err();
    assert!(err.is_unauthenticated(), "got: {:?}", err);
    assert_eq!(server.state().refresh_calls(), 1);
    assert_eq!(server.state().request_count("/doctors"), 2);
    // the refresh itself worked, so the session stays
    assert!(client.is_authenticated());
}

#[test]
fn test_failed_refresh_clears_session() {
    let (server, client) = setup();
    sign_in(&client, "user@example.com");
    {
        let mut state = server.state();
        state.expire_access_tokens();
        state.revoke_refresh_tokens();
    }

    let err = client.get_doctors().unwrap_err();
    assert!(err.is_unauthenticated(), "got: {:?}", err);
    assert_eq!(server.state().refresh_calls(), 1);
    assert_eq!(server.state().request_count("/doctors"), 1);
    assert!(!client.is_authenticated());
    assert_eq!(client.current_user(), None);
    assert_eq!(client.session().snapshot(), StoredSession::default());
}

#[test]
fn test_refresh_timeout_clears_session() {
    let server = DevServer::spawn(DevSettings::default()).unwrap();
    let client = ApiClient::new(
        ApiConfig::new(&server.base_url()).with_timeout(Duration::from_millis(500)),
        Arc::new(SessionStore::in_memory()),
    )
    .unwrap();
    sign_in(&client, "user@example.com");
    {
        let mut state = server.state();
        state.expire_access_tokens();
        state.delay_refresh(Some(Duration::from_secs(2)));
    }

    let err = client.get_doctors().unwrap_err();
    assert!(err.is_unauthenticated(), "got: {:?}", err);
    assert_eq!(server.state().request_count("/doctors"), 1);
    assert!(!client.is_authenticated());
    assert_eq!(client.session().snapshot(), StoredSession::default());
}

#[test]
fn test_refresh_without_tokens_clears_session() {
    let (server, client) = setup();
    sign_in(&client, "user@example.com");
    {
        let mut state = server.state();
        state.expire_access_tokens();
        state.omit_refresh_tokens(true);
    }

    let err = client.get_doctors().unwrap_err();
    assert!(err.is_unauthenticated(), "got: {:?}", err);
    assert_eq!(server.state().refresh_calls(), 1);
    assert_eq!(server.state().request_count("/doctors"), 1);
    assert!(!client.is_authenticated());
    assert_eq!(client.current_user(), None);
    assert_eq!(client.session().snapshot(), StoredSession::default());
}

#[test]
fn test_no_refresh_token_fails_fast() {
    let (server, client) = setup();
    let err = client.get_doctors().unwrap_err();
    assert!(err.is_unauthenticated(), "got: {:?}", err);
    assert_eq!(server.state().refresh_calls(), 0);
    assert_eq!(server.state().request_count("/doctors"), 1);
}

#[test]
fn test_logout() {
    let (_server, client) = setup();
    // no session yet; still fine
    client.logout();
    assert!(!client.is_authenticated());
    assert_eq!(client.current_user(), None);

    sign_in(&client, "user@example.com");
    client.logout();
    assert!(!client.is_authenticated());
    assert_eq!(client.current_user(), None);
}

#[test]
fn test_server_field_errors() {
    let (_server, client) = setup();
    // goes around local validation on purpose
    let err = client
        .request(ApiMethod::Post, "/auth/signup", Some(json!({"firstName": "Asha"})))
        .unwrap_err();
    let fields: Vec<&str> = err.field_errors().iter().map(|e| e.field.as_str()).collect();
    assert_eq!(fields, vec!["lastName", "email", "phoneNumber"]);
}

#[test]
fn test_signup_then_phone_login() {
    let (_server, client) = setup();
    let data = SignupData {
        firstName: "Asha".to_string(),
        lastName: "Rao".to_string(),
        email: "asha@example.com".to_string(),
        phoneNumber: "9876543210".to_string(),
    };
    let resp = client.signup(&data).unwrap();
    assert!(resp.success);

    // duplicate account
    assert!(matches!(
        client.signup(&data),
        Err(ApiError::Validation { .. })
    ));

    let session = sign_in(&client, "9876543210");
    assert_eq!(session.user.email, "asha@example.com");
    assert_eq!(session.user.role, Role::Patient);

    assert!(client.resend_otp("9876543210").unwrap().success);
    // unknown phone numbers aren't auto-registered
    assert!(matches!(
        client.login("9123456789"),
        Err(ApiError::Validation { .. })
    ));
}

#[test]
fn test_google_login() {
    let (_server, client) = setup();
    let session = client.login_with_google("doc@example.com").unwrap();
    assert_eq!(session.user.email, "doc@example.com");
    assert!(client.is_authenticated());
}

#[test]
fn test_upload_profile_picture() {
    let (_server, client) = setup();
    let session = sign_in(&client, "user@example.com");

    let payload = client
        .upload_profile_picture("me.png", "image/png", vec![0x89, b'P', b'N', b'G'])
        .unwrap();
    let expected = format!("uploads/{}/me.png", session.user.id);
    assert_eq!(payload.profilePicture, expected);
    assert_eq!(
        client.current_user().unwrap().profilePicture,
        Some(expected.clone())
    );
    assert_eq!(
        client.image_url(&expected),
        Some(format!("{}/{}", client.config().base_url, expected))
    );
}

#[test]
fn test_upload_replays_after_refresh() {
    let (server, client) = setup();
    sign_in(&client, "user@example.com");
    server.state().expire_access_tokens();

    client
        .upload_profile_picture("me.jpg", "image/jpeg", vec![0xff, 0xd8, 0xff])
        .unwrap();
    assert_eq!(server.state().refresh_calls(), 1);
    assert_eq!(server.state().request_count("/auth/profile-image"), 2);
}

#[test]
fn test_concurrent_401s_share_one_refresh() {
    let (server, client) = setup();
    sign_in(&client, "user@example.com");
    server.state().expire_access_tokens();

    let client = Arc::new(client);
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let client = client.clone();
            thread::spawn(move || client.get_doctors().map(|d| d.len()))
        })
        .collect();
    for w in workers {
        assert_eq!(w.join().unwrap().unwrap(), 3);
    }
    assert_eq!(server.state().refresh_calls(), 1);
    assert!(client.is_authenticated());
}

#[test]
fn test_file_session_survives_restart() {
    let (server, client) = setup();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    drop(client);

    let store = Arc::new(SessionStore::open(FileBackend::new(&path)).unwrap());
    let client = ApiClient::new(ApiConfig::new(&server.base_url()), store).unwrap();
    let session = sign_in(&client, "user@example.com");
    drop(client);

    let store = Arc::new(SessionStore::open(FileBackend::new(&path)).unwrap());
    let client = ApiClient::new(ApiConfig::new(&server.base_url()), store).unwrap();
    assert!(client.is_authenticated());
    assert_eq!(client.current_user(), Some(session.user));
    client.get_profile().unwrap();

    client.logout();
    assert!(!path.exists());
}
