//! View routing and the sign-in guard.

use crate::types::{Role, SessionUser};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Login,
    Dashboard,
    Register,
    Attendance,
    Reports,
    NotFound,
}

impl Route {
    pub fn parse(path: &str) -> Self {
        let trimmed = path.trim().trim_end_matches('/');
        match trimmed {
            "" => Route::Dashboard,
            "/login" => Route::Login,
            "/register" => Route::Register,
            "/attendance" => Route::Attendance,
            "/reports" => Route::Reports,
            _ => Route::NotFound,
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Route::Login => "/login",
            Route::Dashboard => "/",
            Route::Register => "/register",
            Route::Attendance => "/attendance",
            Route::Reports => "/reports",
            Route::NotFound => "/404",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Route::Login => "Login",
            Route::Dashboard => "Dashboard",
            Route::Register => "Register",
            Route::Attendance => "Attendance",
            Route::Reports => "Reports",
            Route::NotFound => "Not Found",
        }
    }

    /// Views that require a signed-in user.
    pub fn is_protected(self) -> bool {
        matches!(
            self,
            Route::Dashboard | Route::Register | Route::Attendance | Route::Reports
        )
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Outcome of routing a navigation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Navigation {
    Render { route: Route },
    /// Auth state not settled yet.
    Loading,
    /// Sign in first; `from` is where to land afterwards.
    Redirect { to: Route, from: Route },
    /// Signed in, but the role may not open this view.
    Forbidden { route: Route },
}

pub fn guard(route: Route, loading: bool, user: Option<&SessionUser>) -> Navigation {
    if !route.is_protected() {
        return Navigation::Render { route };
    }
    if loading {
        return Navigation::Loading;
    }
    match user {
        None => Navigation::Redirect {
            to: Route::Login,
            from: route,
        },
        Some(u) if route == Route::Register && u.role != Role::Admin => {
            Navigation::Forbidden { route }
        }
        Some(_) => Navigation::Render { route },
    }
}

/// Where to go after a successful sign-in.
pub fn landing(from: Option<Route>) -> Route {
    match from {
        Some(route) if route.is_protected() => route,
        _ => Route::Dashboard,
    }
}

/// Navigation entries shown to a signed-in user.
pub fn nav_items(role: Role) -> Vec<Route> {
    let mut items = vec![Route::Dashboard, Route::Attendance, Route::Reports];
    if role == Role::Admin {
        items.insert(1, Route::Register);
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role) -> SessionUser {
        SessionUser {
            id: "u1".into(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            role,
        }
    }

    #[test]
    fn test_parse_paths() {
        assert_eq!(Route::parse("/"), Route::Dashboard);
        assert_eq!(Route::parse(""), Route::Dashboard);
        assert_eq!(Route::parse("/attendance/"), Route::Attendance);
        assert_eq!(Route::parse("/login"), Route::Login);
        assert_eq!(Route::parse("/nope"), Route::NotFound);
    }

    #[test]
    fn test_unauthenticated_redirects_with_from() {
        for route in [Route::Dashboard, Route::Register, Route::Attendance, Route::Reports] {
            assert_eq!(
                guard(route, false, None),
                Navigation::Redirect { to: Route::Login, from: route }
            );
        }
    }

    #[test]
    fn test_public_routes_render() {
        assert_eq!(guard(Route::Login, true, None), Navigation::Render { route: Route::Login });
        assert_eq!(
            guard(Route::NotFound, false, None),
            Navigation::Render { route: Route::NotFound }
        );
    }

    #[test]
    fn test_loading_blocks_protected() {
        assert_eq!(guard(Route::Reports, true, None), Navigation::Loading);
    }

    #[test]
    fn test_register_requires_admin() {
        let u = user(Role::User);
        assert_eq!(
            guard(Route::Register, false, Some(&u)),
            Navigation::Forbidden { route: Route::Register }
        );
        let a = user(Role::Admin);
        assert_eq!(
            guard(Route::Register, false, Some(&a)),
            Navigation::Render { route: Route::Register }
        );
    }

    #[test]
    fn test_landing_returns_to_requested_view() {
        assert_eq!(landing(Some(Route::Reports)), Route::Reports);
        assert_eq!(landing(Some(Route::Login)), Route::Dashboard);
        assert_eq!(landing(None), Route::Dashboard);
    }

    #[test]
    fn test_nav_items_by_role() {
        assert!(!nav_items(Role::User).contains(&Route::Register));
        assert_eq!(nav_items(Role::Admin)[1], Route::Register);
    }
}
