use axum::http::StatusCode;
use time::macros::datetime;

use super::*;
use crate::identity::Role;
use crate::routes::app;
use crate::routes::test_support::*;
use crate::state::test_helpers::test_app_state;

fn user() -> User {
    User {
        id: uuid::Uuid::nil(),
        email: "a@b.com".into(),
        created_at: datetime!(2025-03-05 10:00 UTC),
        user_metadata: serde_json::Value::Null,
    }
}

fn profile(full_name: Option<&str>, company: Option<&str>, role: Role) -> Profile {
    Profile {
        id: uuid::Uuid::nil(),
        email: Some("a@b.com".into()),
        full_name: full_name.map(str::to_owned),
        company: company.map(str::to_owned),
        role,
        avatar_url: None,
        created_at: datetime!(2025-03-05 10:00 UTC),
        updated_at: datetime!(2025-03-05 10:00 UTC),
    }
}

// =============================================================================
// rendering helpers
// =============================================================================

#[test]
fn every_template_compiles() {
    let mut env = minijinja::Environment::new();
    for (name, source) in TEMPLATES {
        env.add_template(name, source).unwrap();
    }
    for (name, _) in TEMPLATES {
        assert!(PAGES.get_template(name).is_ok(), "{name}");
    }
}

#[test]
fn spanish_dates() {
    assert_eq!(format_spanish_date(datetime!(2025-03-05 10:00 UTC)), "5 de marzo de 2025");
    assert_eq!(format_spanish_date(datetime!(2024-12-31 23:59 UTC)), "31 de diciembre de 2024");
    assert_eq!(format_spanish_date(datetime!(2026-01-01 00:00 UTC)), "1 de enero de 2026");
}

#[test]
fn login_page_escapes_error_and_email() {
    let Html(html) = render_login(Some("<b>bad</b>"), "x\"@y.com").unwrap();
    assert!(html.contains("&lt;b&gt;bad"));
    assert!(!html.contains("<b>bad"));
    assert!(html.contains("value=\"x&quot;@y.com\""));
}

#[test]
fn submitted_values_are_not_evaluated() {
    let Html(html) = render_login(None, "{{ 1234 * 2 }}").unwrap();
    assert!(html.contains("{{ 1234 * 2 }}"));
    assert!(!html.contains("2468"));
}

#[test]
fn signup_page_without_error_has_no_alert() {
    let Html(html) = render_signup(None, &SignupCredentials::default()).unwrap();
    assert!(!html.contains("alert-error"));
    assert!(html.contains("Crea tu cuenta gratis"));
}

#[test]
fn signup_page_keeps_entered_values() {
    let form = SignupCredentials {
        full_name: "José Pérez".into(),
        email: "jose@b.com".into(),
        company: Some("Sol & Co".into()),
        ..SignupCredentials::default()
    };
    let Html(html) = render_signup(Some("User already registered"), &form).unwrap();
    assert!(html.contains("value=\"José Pérez\""));
    assert!(html.contains("value=\"Sol &amp; Co\""));
    assert!(html.contains("User already registered"));
}

// =============================================================================
// dashboard view
// =============================================================================

#[test]
fn dashboard_view_with_full_profile() {
    let view = DashboardView::new(&user(), Some(&profile(Some("Ada"), Some("Solar SA"), Role::Pro)));
    assert_eq!(view.header_name, "Ada");
    assert_eq!(view.welcome_name, "Ada");
    assert_eq!(view.plan, "pro");
    assert_eq!(view.full_name, "Ada");
    assert_eq!(view.company, "Solar SA");
    assert_eq!(view.member_since, "5 de marzo de 2025");
}

#[test]
fn dashboard_view_fallbacks_without_profile() {
    let view = DashboardView::new(&user(), None);
    assert_eq!(view.header_name, "a@b.com");
    assert_eq!(view.welcome_name, "Usuario");
    assert_eq!(view.plan, "free");
    assert_eq!(view.full_name, "No especificado");
    assert_eq!(view.company, "No especificada");
}

#[test]
fn dashboard_view_treats_empty_strings_as_missing() {
    let view = DashboardView::new(&user(), Some(&profile(Some(""), Some(""), Role::Free)));
    assert_eq!(view.header_name, "a@b.com");
    assert_eq!(view.company, "No especificada");
}

#[test]
fn dashboard_render_escapes_profile_values() {
    let view = DashboardView::new(&user(), Some(&profile(Some("<script>"), None, Role::Enterprise)));
    let Html(html) = view.render().unwrap();
    assert!(html.contains("Bienvenido, &lt;script&gt;"));
    assert!(!html.contains("<script>"));
    assert!(html.contains("enterprise"));
}

// =============================================================================
// handlers
// =============================================================================

#[tokio::test]
async fn login_page_renders() {
    let (state, _) = test_app_state();
    let response = send(&app(state), get("/login", "")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Inicia sesión en tu cuenta"));
}

#[tokio::test]
async fn failed_login_rerenders_form_with_message() {
    let (state, identity) = test_app_state();
    let app = app(state);
    register(&identity, "a@b.com", "Ada").await;

    let response = send(&app, post_form("/login", "email=a%40b.com&password=wrong", "")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).is_empty());
    let html = body_text(response).await;
    assert!(html.contains("Invalid login credentials"));
    assert!(html.contains("value=\"a@b.com\""));
}

#[tokio::test]
async fn signup_form_success_panel() {
    let (state, _) = test_app_state();
    let response = send(
        &app(state),
        post_form("/signup", "full_name=Ada+Lovelace&email=ada%40b.com&password=secret1&company=", ""),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("¡Cuenta creada!"));
}

#[tokio::test]
async fn signup_form_duplicate_shows_error_and_keeps_input() {
    let (state, identity) = test_app_state();
    let app = app(state);
    register(&identity, "ada@b.com", "Ada").await;

    let response = send(
        &app,
        post_form("/signup", "full_name=Ada&email=ada%40b.com&password=secret1&company=Solar", ""),
    )
    .await;
    let html = body_text(response).await;
    assert!(html.contains("User already registered"));
    assert!(html.contains("value=\"Solar\""));
    assert!(!html.contains("¡Cuenta creada!"));
}

#[tokio::test]
async fn signup_awaiting_confirmation_sets_no_cookies() {
    let identity = std::sync::Arc::new(crate::identity::memory::MemoryIdentity::new().with_email_confirmation(true));
    let state = crate::state::AppState::new(identity, false);
    let response = send(
        &app(state),
        post_form("/signup", "full_name=Ada&email=ada%40b.com&password=secret1", ""),
    )
    .await;
    assert!(set_cookies(&response).is_empty());
    assert!(body_text(response).await.contains("Revisa tu email"));
}
