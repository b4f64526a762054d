use common::config::AppConfig;
use common::models::SessionRoute;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

struct RegistryState {
    current: SessionRoute,
    routes: HashMap<String, SessionRoute>,
}

/// Routing table shared by all workers.
///
/// The most recent control message sets the *current* route, which serves
/// every data request that does not name its session. Each route is also
/// remembered under its session id so a request carrying `?id=<session>` is
/// resolved to its own upstream even while another session is current.
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new(default_route: SessionRoute) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                current: default_route,
                routes: HashMap::new(),
            }),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(SessionRoute {
            session_id: config.default_session_id.clone(),
            upstream_base_url: config.default_upstream.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the current route and remember it under `session_id`.
    pub fn set_route(&self, session_id: &str, base_url: &str) -> SessionRoute {
        let route = SessionRoute {
            session_id: session_id.to_string(),
            upstream_base_url: base_url.to_string(),
        };
        let mut state = self.lock();
        state.routes.insert(route.session_id.clone(), route.clone());
        state.current = route.clone();
        route
    }

    pub fn current_route(&self) -> SessionRoute {
        self.lock().current.clone()
    }

    /// Route for one data request. Unknown or absent session ids fall back to
    /// the current route.
    pub fn resolve(&self, session_hint: Option<&str>) -> SessionRoute {
        let state = self.lock();
        if let Some(id) = session_hint {
            match state.routes.get(id) {
                Some(route) => return route.clone(),
                None => log::warn!(
                    "Session {} has no registered route, using current session {}",
                    id,
                    state.current.session_id
                ),
            }
        }
        state.current.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SessionRegistry {
        SessionRegistry::from_config(&AppConfig::default())
    }

    #[test]
    fn default_route_before_any_control() {
        let route = registry().current_route();
        assert_eq!(route.session_id, "0");
        assert_eq!(route.upstream_base_url, "https://api.openai.com");
    }

    #[test]
    fn last_writer_wins() {
        let reg = registry();
        reg.set_route("s1", "http://a");
        reg.set_route("s2", "http://b");
        let route = reg.current_route();
        assert_eq!(route.session_id, "s2");
        assert_eq!(route.upstream_base_url, "http://b");
    }

    #[test]
    fn repeated_control_is_idempotent() {
        let reg = registry();
        let first = reg.set_route("s1", "http://up");
        let second = reg.set_route("s1", "http://up");
        assert_eq!(first, second);
        assert_eq!(reg.current_route(), second);
    }

    #[test]
    fn resolve_prefers_named_session() {
        let reg = registry();
        reg.set_route("s1", "http://a");
        reg.set_route("s2", "http://b");
        assert_eq!(reg.resolve(Some("s1")).upstream_base_url, "http://a");
        assert_eq!(reg.resolve(None).session_id, "s2");
    }

    #[test]
    fn resolve_unknown_session_falls_back_to_current() {
        let reg = registry();
        reg.set_route("s1", "http://a");
        assert_eq!(reg.resolve(Some("nope")).session_id, "s1");
    }

    #[test]
    fn rebinding_a_session_updates_its_route() {
        let reg = registry();
        reg.set_route("s1", "http://a");
        reg.set_route("s2", "http://b");
        reg.set_route("s1", "http://c");
        assert_eq!(reg.resolve(Some("s1")).upstream_base_url, "http://c");
        assert_eq!(reg.resolve(Some("s2")).upstream_base_url, "http://b");
    }
}
