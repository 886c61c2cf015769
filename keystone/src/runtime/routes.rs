/// Reports a route registered more than once.
pub trait ConflictingRouteService: Send + Sync {
    fn conflicting_route(&self) -> Option<String>;
}

/// In-memory registry of controller names. Names compare case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct RouteRegistry {
    routes: Vec<String>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: impl Into<String>) -> Self {
        self.routes.push(name.into());
        self
    }
}

impl ConflictingRouteService for RouteRegistry {
    fn conflicting_route(&self) -> Option<String> {
        self.routes.iter().enumerate().find_map(|(index, name)| {
            self.routes[..index]
                .iter()
                .any(|other| other.eq_ignore_ascii_case(name))
                .then(|| name.to_owned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_duplicate_is_reported() {
        let registry = RouteRegistry::new()
            .register("Content")
            .register("Media")
            .register("media")
            .register("Content");

        assert_eq!(registry.conflicting_route().as_deref(), Some("media"));
        assert_eq!(RouteRegistry::new().register("a").conflicting_route(), None);
    }
}
