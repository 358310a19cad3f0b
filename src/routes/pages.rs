//! Server-rendered pages: landing, login, signup, dashboard.
//!
//! DESIGN
//! ======
//! Pages are minijinja templates compiled into the binary and extending a
//! shared `layout.html`. Template names end in `.html`, so every value is
//! HTML-escaped on output. Forms post back to the same path and are handled
//! through the auth façade, so pages and the JSON API share every rule
//! about sessions and redirects.

use std::sync::LazyLock;

use axum::Form;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;
use minijinja::{Environment, Value, context};
use serde::Serialize;
use time::OffsetDateTime;

use crate::identity::{Profile, User};
use crate::routes::auth::{identity_failure, persist_session};
use crate::services::auth::{
    self as auth_svc, AuthContext, DASHBOARD_PATH, LoginCredentials, SignupCredentials, Surface, redirect_for,
};
use crate::state::AppState;

const TEMPLATES: [(&str, &str); 6] = [
    ("layout.html", include_str!("../../templates/layout.html")),
    ("landing.html", include_str!("../../templates/landing.html")),
    ("login.html", include_str!("../../templates/login.html")),
    ("signup.html", include_str!("../../templates/signup.html")),
    ("signup_success.html", include_str!("../../templates/signup_success.html")),
    ("dashboard.html", include_str!("../../templates/dashboard.html")),
];

const LOGIN_FALLBACK_ERROR: &str = "Error al iniciar sesión";
const SIGNUP_FALLBACK_ERROR: &str = "Error al crear cuenta";

// =============================================================================
// RENDERING
// =============================================================================

/// A template that fails to compile is logged here and then reported as
/// missing by every render that needs it.
static PAGES: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    for (name, source) in TEMPLATES {
        if let Err(e) = env.add_template(name, source) {
            tracing::error!(template = name, error = %e, "template failed to compile");
        }
    }
    env
});

fn render(name: &str, ctx: Value) -> Result<Html<String>, minijinja::Error> {
    PAGES.get_template(name)?.render(ctx).map(Html)
}

fn render_failure(err: &minijinja::Error) -> Response {
    tracing::error!(error = %err, "page rendering failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "Page rendering failed").into_response()
}

/// Attach the cookie jar to a rendered page, or turn a render failure into a 500.
fn respond(jar: CookieJar, page: Result<Html<String>, minijinja::Error>) -> Response {
    match page {
        Ok(html) => (jar, html).into_response(),
        Err(e) => render_failure(&e),
    }
}

pub fn render_login(error: Option<&str>, email: &str) -> Result<Html<String>, minijinja::Error> {
    render("login.html", context! { error, email })
}

pub fn render_signup(error: Option<&str>, form: &SignupCredentials) -> Result<Html<String>, minijinja::Error> {
    render(
        "signup.html",
        context! {
            error,
            full_name => form.full_name,
            email => form.email,
            company => form.company.as_deref().unwrap_or_default(),
        },
    )
}

// =============================================================================
// DASHBOARD VIEW
// =============================================================================

const SPANISH_MONTHS: [&str; 12] = [
    "enero",
    "febrero",
    "marzo",
    "abril",
    "mayo",
    "junio",
    "julio",
    "agosto",
    "septiembre",
    "octubre",
    "noviembre",
    "diciembre",
];

/// Long Spanish date, e.g. `5 de marzo de 2025`.
#[must_use]
pub fn format_spanish_date(at: OffsetDateTime) -> String {
    let month = SPANISH_MONTHS[usize::from(u8::from(at.month())) - 1];
    format!("{} de {month} de {}", at.day(), at.year())
}

/// Everything the dashboard shows, with fallbacks applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardView {
    pub header_name: String,
    pub welcome_name: String,
    pub plan: String,
    pub email: String,
    pub full_name: String,
    pub company: String,
    pub member_since: String,
}

impl DashboardView {
    #[must_use]
    pub fn new(user: &User, profile: Option<&Profile>) -> Self {
        let full_name = profile
            .and_then(|p| p.full_name.as_deref())
            .filter(|n| !n.is_empty());
        let company = profile
            .and_then(|p| p.company.as_deref())
            .filter(|c| !c.is_empty());

        Self {
            header_name: full_name.unwrap_or(&user.email).to_owned(),
            welcome_name: full_name.unwrap_or("Usuario").to_owned(),
            plan: profile.map(|p| p.role).unwrap_or_default().as_str().to_owned(),
            email: user.email.clone(),
            full_name: full_name.unwrap_or("No especificado").to_owned(),
            company: company.unwrap_or("No especificada").to_owned(),
            member_since: format_spanish_date(user.created_at),
        }
    }

    pub fn render(&self) -> Result<Html<String>, minijinja::Error> {
        render("dashboard.html", context! { view => self })
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `GET /`: marketing page; signed-in visitors go straight to the dashboard.
pub async fn landing(State(state): State<AppState>, jar: CookieJar, mut ctx: AuthContext) -> Response {
    let user = match auth_svc::get_user(&ctx).await {
        Ok(user) => user,
        Err(e) => return identity_failure(&e),
    };
    let jar = persist_session(jar, &mut ctx, state.cookie_secure);

    if let Some(target) = redirect_for(Surface::Landing, user.as_ref()) {
        return (jar, Redirect::to(target)).into_response();
    }
    respond(jar, render("landing.html", context! {}))
}

/// `GET /login`
pub async fn login_page() -> Response {
    render_login(None, "").map_or_else(|e| render_failure(&e), IntoResponse::into_response)
}

/// `POST /login`: on success set cookies and go to the dashboard.
pub async fn login_submit(
    State(state): State<AppState>,
    jar: CookieJar,
    mut ctx: AuthContext,
    Form(form): Form<LoginCredentials>,
) -> Response {
    let result = auth_svc::login(&mut ctx, &form).await;
    let jar = persist_session(jar, &mut ctx, state.cookie_secure);

    if result.success {
        return (jar, Redirect::to(DASHBOARD_PATH)).into_response();
    }
    let message = result.error.as_deref().unwrap_or(LOGIN_FALLBACK_ERROR);
    respond(jar, render_login(Some(message), &form.email))
}

/// `GET /signup`
pub async fn signup_page() -> Response {
    render_signup(None, &SignupCredentials::default()).map_or_else(|e| render_failure(&e), IntoResponse::into_response)
}

/// `POST /signup`: show the "account created" panel or the form with the error.
pub async fn signup_submit(
    State(state): State<AppState>,
    jar: CookieJar,
    mut ctx: AuthContext,
    Form(form): Form<SignupCredentials>,
) -> Response {
    let result = auth_svc::signup(&mut ctx, &form).await;
    let jar = persist_session(jar, &mut ctx, state.cookie_secure);

    if result.success {
        return respond(jar, render("signup_success.html", context! {}));
    }
    let message = result.error.as_deref().unwrap_or(SIGNUP_FALLBACK_ERROR);
    respond(jar, render_signup(Some(message), &form))
}

/// `POST /logout`
pub async fn logout(State(state): State<AppState>, jar: CookieJar, mut ctx: AuthContext) -> Response {
    let redirect = auth_svc::logout(&mut ctx).await;
    (persist_session(jar, &mut ctx, state.cookie_secure), redirect).into_response()
}

/// `GET /dashboard`: signed-in only.
pub async fn dashboard(State(state): State<AppState>, jar: CookieJar, mut ctx: AuthContext) -> Response {
    let user = match auth_svc::get_user(&ctx).await {
        Ok(user) => user,
        Err(e) => return identity_failure(&e),
    };
    let jar = persist_session(jar, &mut ctx, state.cookie_secure);

    let Some(user) = user else {
        let target = redirect_for(Surface::Dashboard, None).unwrap_or(auth_svc::LOGIN_PATH);
        return (jar, Redirect::to(target)).into_response();
    };

    let profile = match auth_svc::get_profile(&ctx).await {
        Ok(profile) => profile,
        Err(e) => return identity_failure(&e),
    };

    respond(jar, DashboardView::new(&user, profile.as_ref()).render())
}

#[cfg(test)]
#[path = "pages_test.rs"]
mod tests;
