use std::fmt;
use std::sync::Arc;

use accord_core::Message;

use crate::error::CommError;

/// Matches a message type tag.
///
/// `"*"` matches everything, `"consensus.*"` matches every tag starting with
/// `"consensus."`, anything else must match exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePattern {
    Exact(String),
    Prefix(String),
    Any,
}

impl RoutePattern {
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            RoutePattern::Any
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            RoutePattern::Prefix(prefix.to_string())
        } else {
            RoutePattern::Exact(pattern.to_string())
        }
    }

    pub fn matches(&self, message_type: &str) -> bool {
        match self {
            RoutePattern::Exact(tag) => tag == message_type,
            RoutePattern::Prefix(prefix) => message_type.starts_with(prefix.as_str()),
            RoutePattern::Any => true,
        }
    }
}

impl From<&str> for RoutePattern {
    fn from(pattern: &str) -> Self {
        RoutePattern::parse(pattern)
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutePattern::Exact(tag) => f.write_str(tag),
            RoutePattern::Prefix(prefix) => write!(f, "{}*", prefix),
            RoutePattern::Any => f.write_str("*"),
        }
    }
}

/// Processes an outbound message. May return a follow-up message that is
/// routed again.
pub trait RouteHandler: Send + Sync {
    fn handle(&self, message: &Message) -> Result<Option<Message>, CommError>;
}

impl<F> RouteHandler for F
where
    F: Fn(&Message) -> Result<Option<Message>, CommError> + Send + Sync,
{
    fn handle(&self, message: &Message) -> Result<Option<Message>, CommError> {
        self(message)
    }
}

/// Runs before a route's handler. The rest of the chain only runs if the
/// middleware calls [`Next::run`].
pub trait Middleware: Send + Sync {
    fn process(&self, message: &Message, next: Next<'_>) -> Result<Option<Message>, CommError>;
}

impl<F> Middleware for F
where
    F: Fn(&Message, Next<'_>) -> Result<Option<Message>, CommError> + Send + Sync,
{
    fn process(&self, message: &Message, next: Next<'_>) -> Result<Option<Message>, CommError> {
        self(message, next)
    }
}

/// Continuation into the remaining middleware and the handler
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    handler: &'a dyn RouteHandler,
}

impl<'a> Next<'a> {
    pub fn run(self, message: &Message) -> Result<Option<Message>, CommError> {
        match self.chain.split_first() {
            Some((middleware, rest)) => middleware.process(
                message,
                Next {
                    chain: rest,
                    handler: self.handler,
                },
            ),
            None => self.handler.handle(message),
        }
    }
}

#[derive(Clone)]
pub struct Route {
    pub pattern: RoutePattern,
    pub priority: i32,
    handler: Arc<dyn RouteHandler>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Route {
    pub fn new(pattern: impl Into<RoutePattern>, handler: Arc<dyn RouteHandler>) -> Self {
        Route {
            pattern: pattern.into(),
            priority: 0,
            handler,
            middleware: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn middleware_count(&self) -> usize {
        self.middleware.len()
    }

    /// Run the middleware chain and then the handler
    pub fn process(&self, message: &Message) -> Result<Option<Message>, CommError> {
        Next {
            chain: &self.middleware,
            handler: self.handler.as_ref(),
        }
        .run(message)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern)
            .field("priority", &self.priority)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

/// Routes ordered by descending priority. Equal priorities keep insertion
/// order.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, route: Route) {
        let index = self
            .routes
            .iter()
            .position(|r| r.priority < route.priority)
            .unwrap_or(self.routes.len());
        self.routes.insert(index, route);
    }

    /// Attach middleware to every route registered under `pattern`.
    /// Returns how many routes were extended.
    pub fn add_middleware(&mut self, pattern: &str, middleware: Arc<dyn Middleware>) -> Result<usize, CommError> {
        let pattern = RoutePattern::parse(pattern);
        let mut extended = 0;
        for route in self.routes.iter_mut().filter(|r| r.pattern == pattern) {
            route.middleware.push(middleware.clone());
            extended += 1;
        }

        if extended == 0 {
            return Err(CommError::RouteNotFound(pattern.to_string()));
        }
        Ok(extended)
    }

    /// First route matching the message type
    pub fn find(&self, message_type: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.pattern.matches(message_type))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_core::Recipient;
    use serde_json::json;
    use std::sync::Mutex;

    fn message(message_type: &str) -> Message {
        Message::new("a", Recipient::one("b"), message_type, json!({}))
    }

    fn consume() -> Arc<dyn RouteHandler> {
        Arc::new(|_: &Message| -> Result<Option<Message>, CommError> { Ok(None) })
    }

    #[test]
    fn test_pattern_matching() {
        assert!(RoutePattern::parse("task").matches("task"));
        assert!(!RoutePattern::parse("task").matches("task.done"));
        assert!(RoutePattern::parse("consensus.*").matches("consensus.vote"));
        assert!(!RoutePattern::parse("consensus.*").matches("chat"));
        assert!(RoutePattern::parse("*").matches("anything"));
        assert_eq!(RoutePattern::parse("consensus.*").to_string(), "consensus.*");
    }

    #[test]
    fn test_routes_sorted_by_priority() {
        let mut router = Router::new();
        router.add(Route::new("*", consume()).with_priority(1));
        router.add(Route::new("task", consume()).with_priority(10));
        router.add(Route::new("task.*", consume()).with_priority(10));

        let route = router.find("task").unwrap();
        assert_eq!(route.pattern, RoutePattern::Exact("task".to_string()));
        let fallback = router.find("other").unwrap();
        assert_eq!(fallback.pattern, RoutePattern::Any);
    }

    #[test]
    fn test_middleware_runs_in_order_before_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));

        let handler_log = log.clone();
        let handler: Arc<dyn RouteHandler> = Arc::new(move |_: &Message| -> Result<Option<Message>, CommError> {
            handler_log.lock().unwrap().push("handler");
            Ok(None)
        });

        let first_log = log.clone();
        let first: Arc<dyn Middleware> = Arc::new(move |m: &Message, next: Next<'_>| {
            first_log.lock().unwrap().push("first");
            next.run(m)
        });
        let second_log = log.clone();
        let second: Arc<dyn Middleware> = Arc::new(move |m: &Message, next: Next<'_>| {
            second_log.lock().unwrap().push("second");
            next.run(m)
        });

        let route = Route::new("task", handler)
            .with_middleware(first)
            .with_middleware(second);
        route.process(&message("task")).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "handler"]);
    }

    #[test]
    fn test_middleware_can_stop_chain() {
        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();
        let handler: Arc<dyn RouteHandler> = Arc::new(move |_: &Message| -> Result<Option<Message>, CommError> {
            *flag.lock().unwrap() = true;
            Ok(None)
        });
        let gate: Arc<dyn Middleware> = Arc::new(|_: &Message, _next: Next<'_>| -> Result<Option<Message>, CommError> { Ok(None) });

        Route::new("task", handler)
            .with_middleware(gate)
            .process(&message("task"))
            .unwrap();
        assert!(!*called.lock().unwrap());
    }

    #[test]
    fn test_add_middleware_requires_route() {
        let mut router = Router::new();
        let noop: Arc<dyn Middleware> = Arc::new(|m: &Message, next: Next<'_>| next.run(m));

        assert!(matches!(
            router.add_middleware("task", noop.clone()),
            Err(CommError::RouteNotFound(_))
        ));

        router.add(Route::new("task", consume()));
        assert_eq!(router.add_middleware("task", noop).unwrap(), 1);
        assert_eq!(router.find("task").unwrap().middleware_count(), 1);
    }
}
