mod common;

use common::{harness, test_config, MEDIA_BASE, PASSWORD};
use hogflix_auth::{
    demo_user_id, AccountService, AuthEvent, AuthEventKind, SessionOrigin, SignUpOutcome,
    SignupRequest, SubscriptionPlan, ValidationError,
};
use hogflix_config::Config;
use hogflix_media::MediaError;
use hogflix_profiles::{ProfileError, ProfileUpdate};
use hogflix_session::{AppError, ReconcileState};
use serde_json::{Map, Value};
use std::sync::atomic::Ordering;
use std::time::Duration;

fn signup_request(email: &str, name: Option<&str>) -> SignupRequest {
    SignupRequest {
        email: email.to_string(),
        password: PASSWORD.to_string(),
        confirm_password: PASSWORD.to_string(),
        display_name: name.map(str::to_string),
        plan: Some(SubscriptionPlan::Premium),
    }
}

#[tokio::test]
async fn test_signup_rejects_invalid_form_without_calling_service() {
    let h = harness(test_config());

    let mut request = signup_request("jane@example.com", None);
    request.confirm_password = "different".to_string();
    let err = h.runtime.signup(&request).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Validation(ValidationError::PasswordMismatch)
    ));
    assert!(err.is_user_facing());

    let mut request = signup_request("not-an-email", None);
    request.plan = None;
    assert!(matches!(
        h.runtime.signup(&request).await,
        Err(AppError::Validation(ValidationError::InvalidEmail))
    ));

    assert_eq!(h.accounts.sign_up_calls.load(Ordering::SeqCst), 0);
    assert!(!h.runtime.snapshot().logged_in);
}

#[tokio::test]
async fn test_signup_signs_in_and_creates_profile() {
    let h = harness(test_config());

    let outcome = h
        .runtime
        .signup(&signup_request("Jane@Example.com ", Some("Jane")))
        .await
        .unwrap();
    let SignUpOutcome::SignedIn(session) = outcome else {
        panic!("expected a signed-in outcome");
    };
    assert_eq!(session.user.email.as_deref(), Some("jane@example.com"));

    let state = h.runtime.snapshot();
    assert!(state.logged_in);
    assert!(!state.loading);
    assert_eq!(state.display_name, "Jane");
    assert_eq!(state.user_id.as_deref(), Some("user-jane@example.com"));

    let rows = h.profiles.rows.lock();
    let row = rows.get("user-jane@example.com").expect("profile row created");
    assert_eq!(row.name.as_deref(), Some("Jane"));
    drop(rows);

    assert!(h
        .analytics
        .identified_ids()
        .contains(&"user-jane@example.com".to_string()));
    assert!(h.analytics.tracked_events().contains(&"signed_up".to_string()));
}

#[tokio::test]
async fn test_fourth_signup_in_window_is_rate_limited() {
    let h = harness(test_config());

    for i in 0..3 {
        let email = format!("user{i}@example.com");
        h.runtime
            .signup(&signup_request(&email, None))
            .await
            .unwrap();
    }

    let err = h
        .runtime
        .signup(&signup_request("user3@example.com", None))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::RateLimited));
    assert!(err.is_user_facing());
    assert_eq!(h.accounts.sign_up_calls.load(Ordering::SeqCst), 3);
    assert!(h
        .analytics
        .tracked_events()
        .contains(&"signup_rate_limited".to_string()));
}

#[tokio::test]
async fn test_privileged_email_gets_larger_budget() {
    let h = harness(Config {
        privileged_emails: vec!["vip@hogflix.dev".to_string()],
        ..test_config()
    });

    for i in 0..3 {
        let email = format!("user{i}@example.com");
        h.runtime
            .signup(&signup_request(&email, None))
            .await
            .unwrap();
    }

    h.runtime
        .signup(&signup_request("VIP@hogflix.dev", None))
        .await
        .unwrap();
    assert_eq!(h.accounts.sign_up_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_signup_in_demo_mode_stays_local() {
    let h = harness(Config {
        demo_mode: true,
        ..test_config()
    });

    let outcome = h
        .runtime
        .signup(&signup_request("viewer@example.com", Some("Viewer")))
        .await
        .unwrap();
    let SignUpOutcome::SignedIn(session) = outcome else {
        panic!("expected a signed-in outcome");
    };

    assert!(session.is_demo());
    assert_eq!(session.user.id, demo_user_id("viewer@example.com"));
    assert_eq!(h.accounts.sign_up_calls.load(Ordering::SeqCst), 0);
    assert!(h.profiles.rows.lock().is_empty());
    assert!(h.runtime.snapshot().logged_in);
    assert_eq!(h.runtime.active_origin(), SessionOrigin::Demo);
}

#[tokio::test]
async fn test_password_login_updates_store_immediately() {
    let h = harness(test_config());
    let state = h.runtime.mount().await;
    assert!(!state.logged_in);
    assert!(!state.loading);

    let err = h
        .runtime
        .login("jane@example.com", "wrong-password")
        .await
        .unwrap_err();
    assert!(err.is_user_facing());
    assert!(!h.runtime.snapshot().logged_in);

    h.runtime.login("jane@example.com", PASSWORD).await.unwrap();
    let state = h.runtime.snapshot();
    assert!(state.logged_in);
    assert_eq!(state.display_name, "jane");
    assert_eq!(state.email.as_deref(), Some("jane@example.com"));
    assert!(h.analytics.tracked_events().contains(&"logged_in".to_string()));
}

#[tokio::test]
async fn test_logout_clears_state_and_resets_analytics() {
    let h = harness(test_config());
    h.runtime.login("jane@example.com", PASSWORD).await.unwrap();
    assert!(h.runtime.snapshot().logged_in);

    h.runtime.logout().await;

    let state = h.runtime.snapshot();
    assert!(!state.logged_in);
    assert!(!state.loading);
    assert_eq!(state.user_id, None);
    assert_eq!(h.runtime.reconciler().state(), ReconcileState::ConfirmedOut);
    assert!(h.accounts.stored().is_none());
    assert!(h.analytics.reset_count() >= 1);
    assert!(h.analytics.tracked_events().contains(&"logged_out".to_string()));

    assert!(matches!(
        h.runtime.profile().await,
        Err(AppError::NotLoggedIn)
    ));
}

#[tokio::test]
async fn test_logout_after_demo_mode_enabled_mid_session_signs_out_remote() {
    let h = harness(test_config());
    h.runtime.login("jane@example.com", PASSWORD).await.unwrap();
    assert!(h
        .runtime
        .is_demo_mode(Some("https://hogflix.dev/browse?demo=1")));

    h.runtime.logout().await;
    assert!(!h.runtime.snapshot().logged_in);
    assert!(h.accounts.stored().is_none());
    assert!(!h.runtime.demo().is_enabled());

    h.runtime.reconciler().poll_once().await;
    assert!(!h.runtime.snapshot().logged_in);
}

#[tokio::test(start_paused = true)]
async fn test_each_user_update_refreshes_profile() {
    let h = harness(test_config());
    h.runtime
        .signup(&signup_request("jane@example.com", Some("First")))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.runtime.snapshot().display_name, "First");

    for name in ["Second", "Third"] {
        if let Some(row) = h.profiles.rows.lock().get_mut("user-jane@example.com") {
            row.name = Some(name.to_string());
        }
        let mut metadata = Map::new();
        metadata.insert("display_name".to_string(), Value::from(name));
        h.accounts.update_user(metadata).await.unwrap();

        h.runtime
            .reconciler()
            .handle_event(AuthEvent::new(
                AuthEventKind::UserUpdated,
                SessionOrigin::Remote,
                h.accounts.stored(),
            ))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.runtime.snapshot().display_name, name);
    }
}

#[tokio::test]
async fn test_demo_mode_from_url_and_demo_login() {
    let h = harness(test_config());

    assert!(!h.runtime.is_demo_mode(None));
    assert!(h
        .runtime
        .is_demo_mode(Some("https://hogflix.dev/browse?demo=1")));
    assert!(h.runtime.is_demo_mode(None));
    assert_eq!(
        h.analytics
            .tracked_events()
            .iter()
            .filter(|name| *name == "demo_mode_entered")
            .count(),
        1
    );

    let session = h
        .runtime
        .login("viewer@example.com", "anything")
        .await
        .unwrap();
    assert!(session.is_demo());
    let state = h.runtime.snapshot();
    assert!(state.logged_in);
    assert_eq!(
        state.user_id.as_deref(),
        Some(demo_user_id("viewer@example.com").as_str())
    );

    // Remote events are not authoritative while demo mode is on.
    h.runtime
        .reconciler()
        .handle_event(AuthEvent::new(
            AuthEventKind::SignedOut,
            SessionOrigin::Remote,
            None,
        ))
        .await;
    assert!(h.runtime.snapshot().logged_in);

    h.runtime.logout().await;
    assert!(!h.runtime.snapshot().logged_in);
    assert!(h.runtime.demo().get_session().unwrap().is_none());
}

#[tokio::test]
async fn test_login_demo_reuses_session_for_same_email() {
    let h = harness(test_config());

    let first = h
        .runtime
        .login_demo("viewer@example.com", Map::new())
        .await
        .unwrap();
    let second = h
        .runtime
        .login_demo("viewer@example.com", Map::new())
        .await
        .unwrap();

    assert_eq!(first.user.id, second.user.id);
    assert_eq!(first.access_token, second.access_token);
    assert!(h.runtime.snapshot().logged_in);
}

#[tokio::test]
async fn test_update_profile_patches_row_and_store() {
    let h = harness(test_config());

    let update = ProfileUpdate {
        display_name: Some("Janet".to_string()),
        ..Default::default()
    };
    assert!(matches!(
        h.runtime.update_profile(&update).await,
        Err(AppError::NotLoggedIn)
    ));

    h.runtime
        .signup(&signup_request("jane@example.com", Some("Jane")))
        .await
        .unwrap();
    assert_eq!(h.runtime.profile().await.unwrap().display_name, "Jane");

    let record = h.runtime.update_profile(&update).await.unwrap();
    assert_eq!(record.display_name, "Janet");
    assert_eq!(h.runtime.snapshot().display_name, "Janet");
    assert_eq!(
        h.profiles.rows.lock()["user-jane@example.com"].name.as_deref(),
        Some("Janet")
    );
    assert!(h
        .analytics
        .tracked_events()
        .contains(&"profile_updated".to_string()));

    let bad = ProfileUpdate {
        language: Some("x".to_string()),
        ..Default::default()
    };
    assert!(matches!(
        h.runtime.update_profile(&bad).await,
        Err(AppError::Profile(ProfileError::Validation(_)))
    ));
}

#[tokio::test]
async fn test_upload_and_list_images() {
    let h = harness(test_config());

    let err = h
        .runtime
        .upload_image("notes/readme.txt", b"hello".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Media(MediaError::InvalidPath(_))));

    // Logged out: the anon key is the bearer.
    h.runtime
        .upload_image("posters/a.jpg", vec![0; 4])
        .await
        .unwrap();

    h.runtime.login("jane@example.com", PASSWORD).await.unwrap();
    let url = h
        .runtime
        .upload_image("avatars/jane/me.png", vec![0; 16])
        .await
        .unwrap();
    assert_eq!(url, format!("{MEDIA_BASE}/avatars/jane/me.png"));

    {
        let uploads = h.media.uploads.lock();
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[0].3, test_config().supabase_anon_key);
        assert_eq!(uploads[1].1, 16);
        assert_eq!(uploads[1].2, "image/png");
        assert_eq!(uploads[1].3, "token-jane@example.com");
    }
    assert!(h
        .analytics
        .tracked_events()
        .contains(&"image_uploaded".to_string()));

    let images = h.runtime.list_images("avatars").await.unwrap();
    assert_eq!(images, vec![format!("{MEDIA_BASE}/avatars/jane/me.png")]);
}

#[tokio::test(start_paused = true)]
async fn test_running_loop_rides_out_three_failed_polls() {
    let h = harness(test_config());
    h.runtime.start().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!h.runtime.snapshot().loading);

    h.runtime.login("jane@example.com", PASSWORD).await.unwrap();
    h.accounts.set_unreachable(true);

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert!(h.runtime.snapshot().logged_in);
    assert!(matches!(
        h.runtime.reconciler().state(),
        ReconcileState::ProvisionalOut { evidence: 3 }
    ));

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert!(!h.runtime.snapshot().logged_in);
    assert_eq!(h.runtime.reconciler().state(), ReconcileState::ConfirmedOut);

    h.runtime.shutdown().await;
    assert!(h.runtime.reconciler().is_stopped());
}

#[tokio::test(start_paused = true)]
async fn test_running_loop_recovers_when_service_returns() {
    let h = harness(test_config());
    h.runtime.start().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    h.runtime.login("jane@example.com", PASSWORD).await.unwrap();
    h.accounts.set_unreachable(true);
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert!(h.runtime.snapshot().logged_in);

    h.accounts.set_unreachable(false);
    tokio::time::sleep(Duration::from_millis(5_000)).await;
    assert!(h.runtime.snapshot().logged_in);
    assert!(h.runtime.reconciler().state().is_logged_in());

    h.runtime.shutdown().await;
}
