//! Route Guard Module
//!
//! Navigation decisions from session state. A pure lookup table; the view
//! shell applies the outcome.

use crate::storage::{Role, Session};

/// Application routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
    Register,
    RegisterBarista,
    Loyalty,
    Profile,
    Barista,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Login => "/login",
            Route::Register => "/register",
            Route::RegisterBarista => "/register-barista",
            Route::Loyalty => "/loyalty",
            Route::Profile => "/profile",
            Route::Barista => "/barista",
        }
    }

    /// Resolve a path; unknown paths get no route and callers send the
    /// user to login.
    pub fn parse(path: &str) -> Option<Route> {
        match path {
            "/login" => Some(Route::Login),
            "/register" => Some(Route::Register),
            "/register-barista" => Some(Route::RegisterBarista),
            "/loyalty" => Some(Route::Loyalty),
            "/profile" => Some(Route::Profile),
            "/barista" => Some(Route::Barista),
            _ => None,
        }
    }

    fn is_public(&self) -> bool {
        matches!(self, Route::Login | Route::Register | Route::RegisterBarista)
    }

    /// Role required beyond authentication, if any.
    fn required_role(&self) -> Option<Role> {
        matches!(self, Route::Barista).then_some(Role::Staff)
    }
}

/// Landing page for a resolved role.
pub fn home_for(role: Role) -> Route {
    match role {
        Role::Customer => Route::Loyalty,
        Role::Staff => Route::Barista,
    }
}

/// Outcome of a navigation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavDecision {
    Allow,
    Redirect(Route),
}

/// Decide a navigation attempt against the current session.
pub fn decide(to: Route, session: &Session) -> NavDecision {
    let authenticated = session.is_authenticated();

    // An authenticated user with a resolved role skips the login page.
    if to == Route::Login {
        return match (authenticated, session.role) {
            (true, Some(role)) => NavDecision::Redirect(home_for(role)),
            _ => NavDecision::Allow,
        };
    }

    if to.is_public() {
        return NavDecision::Allow;
    }

    match (authenticated, session.role) {
        (true, Some(role)) => match to.required_role() {
            Some(required) if required != role => NavDecision::Redirect(home_for(role)),
            _ => NavDecision::Allow,
        },
        // No token, or a token with an unresolved role: back to login.
        _ => NavDecision::Redirect(Route::Login),
    }
}
