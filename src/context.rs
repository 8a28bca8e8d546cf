//! Request context merged into structured entries.
//!
//! The handler does not know where request identifiers live; it asks an
//! injected [`ContextSource`] for the current values and merges them into
//! each structured entry without overwriting fields the caller already set.

use std::cell::RefCell;

use crate::value::{Map, Value};

pub const REQUEST_ID_KEY: &str = "c_request_id";
pub const TRACING_ID_KEY: &str = "c_request_tracing_id";
pub const SESSION_SIGN_KEY: &str = "c_session_sign";
pub const USER_ID_KEY: &str = "c_user_id";

/// Context values available for the current unit of work.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: Option<String>,
    pub tracing_id: Option<String>,
    pub session_sign: Option<String>,
    pub user_id: Option<String>,
}

impl RequestContext {
    fn fields(&self) -> [(&'static str, Option<&str>); 4] {
        [
            (REQUEST_ID_KEY, self.request_id.as_deref()),
            (TRACING_ID_KEY, self.tracing_id.as_deref()),
            (SESSION_SIGN_KEY, self.session_sign.as_deref()),
            (USER_ID_KEY, self.user_id.as_deref()),
        ]
    }

    /// Merge the non-empty context values into `entry`.
    ///
    /// A key is only written when the entry has no truthy value for it.
    pub fn merge_into(&self, entry: &mut Map) {
        for (key, value) in self.fields() {
            let Some(value) = value.filter(|v| !v.is_empty()) else {
                continue;
            };
            let occupied = entry.get(key).is_some_and(Value::is_truthy);
            if !occupied {
                entry.insert(key.to_owned(), Value::from(value));
            }
        }
    }
}

/// Supplies the request context for the calling thread.
pub trait ContextSource: Send + Sync {
    fn current(&self) -> RequestContext;
}

/// Always returns an empty context.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoContext;

impl ContextSource for NoContext {
    fn current(&self) -> RequestContext {
        RequestContext::default()
    }
}

impl<F> ContextSource for F
where
    F: Fn() -> RequestContext + Send + Sync,
{
    fn current(&self) -> RequestContext {
        self()
    }
}

thread_local! {
    static CURRENT: RefCell<RequestContext> = RefCell::new(RequestContext::default());
}

/// Reads the context installed on the calling thread with
/// [`ThreadLocalContext::enter`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadLocalContext;

impl ThreadLocalContext {
    /// Install `context` for the current thread until the guard is dropped.
    pub fn enter(context: RequestContext) -> ContextGuard {
        let previous = CURRENT.with(|slot| slot.replace(context));
        ContextGuard { previous }
    }
}

impl ContextSource for ThreadLocalContext {
    fn current(&self) -> RequestContext {
        CURRENT.with(|slot| slot.borrow().clone())
    }
}

/// Restores the previous thread-local context on drop.
#[must_use = "the context is cleared as soon as the guard is dropped"]
pub struct ContextGuard {
    previous: RequestContext,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = std::mem::take(&mut self.previous);
        CURRENT.with(|slot| {
            slot.replace(previous);
        });
    }
}
