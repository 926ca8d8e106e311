//! Authentication capability.
//!
//! The sync core never signs users in or out. It only asks who the current
//! user is and listens for changes through a cancellable [`Subscription`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

use blocksync_common::UserRef;

/// Callback invoked with the new user (or `None` on sign-out).
pub type AuthCallback = Arc<dyn Fn(Option<&UserRef>) + Send + Sync>;

/// Source of the current authenticated session.
pub trait AuthProvider: Send + Sync {
    /// User currently signed in, if any.
    fn current_user(&self) -> Option<UserRef>;

    /// Register `callback` for auth state changes.
    ///
    /// The returned subscription cancels the registration when dropped or
    /// when [`Subscription::unsubscribe`] is called.
    fn on_auth_state_change(&self, callback: AuthCallback) -> Subscription;
}

/// Handle for an active auth state subscription.
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Create a subscription that runs `cancel` exactly once when it ends.
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Subscription with nothing to cancel.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Cancel the subscription.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

type Listeners = Mutex<HashMap<u64, AuthCallback>>;

/// In-memory auth provider.
///
/// Useful for testing and for embedders that manage sessions themselves:
/// call [`MemoryAuth::sign_in`] / [`MemoryAuth::sign_out`] to drive listeners.
pub struct MemoryAuth {
    user: RwLock<Option<UserRef>>,
    listeners: Arc<Listeners>,
    next_id: Mutex<u64>,
}

impl MemoryAuth {
    /// Create a provider with nobody signed in.
    pub fn new() -> Self {
        Self {
            user: RwLock::new(None),
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_id: Mutex::new(0),
        }
    }

    /// Create a provider with `user` already signed in.
    pub fn signed_in(user: UserRef) -> Self {
        let auth = Self::new();
        *auth.user.write().unwrap() = Some(user);
        auth
    }

    /// Sign `user` in and notify listeners.
    pub fn sign_in(&self, user: UserRef) {
        *self.user.write().unwrap() = Some(user.clone());
        self.notify(Some(&user));
    }

    /// Sign out and notify listeners.
    pub fn sign_out(&self) {
        *self.user.write().unwrap() = None;
        self.notify(None);
    }

    /// Number of live subscriptions.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    fn notify(&self, user: Option<&UserRef>) {
        // Snapshot so callbacks may subscribe or unsubscribe without deadlocking.
        let callbacks: Vec<AuthCallback> = self.listeners.lock().unwrap().values().cloned().collect();
        for callback in callbacks {
            callback(user);
        }
    }
}

impl Default for MemoryAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthProvider for MemoryAuth {
    fn current_user(&self) -> Option<UserRef> {
        self.user.read().unwrap().clone()
    }

    fn on_auth_state_change(&self, callback: AuthCallback) -> Subscription {
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        self.listeners.lock().unwrap().insert(id, callback);

        let listeners: Weak<Listeners> = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.lock().unwrap().remove(&id);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_sign_in_notifies_listeners() {
        let auth = MemoryAuth::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let _sub = auth.on_auth_state_change(Arc::new(move |user: Option<&UserRef>| {
            seen_clone
                .lock()
                .unwrap()
                .push(user.map(|u| u.uid().to_string()));
        }));

        auth.sign_in(UserRef::new("u1").unwrap());
        auth.sign_out();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some("u1".to_string()), None]
        );
        assert!(auth.current_user().is_none());
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let auth = MemoryAuth::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let sub = auth.on_auth_state_change(Arc::new(move |_: Option<&UserRef>| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(auth.listener_count(), 1);

        sub.unsubscribe();
        assert_eq!(auth.listener_count(), 0);

        auth.sign_in(UserRef::new("u1").unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_cancels_subscription() {
        let auth = MemoryAuth::new();
        {
            let _sub = auth.on_auth_state_change(Arc::new(|_: Option<&UserRef>| {}));
            assert_eq!(auth.listener_count(), 1);
        }
        assert_eq!(auth.listener_count(), 0);
    }

    #[test]
    fn test_signed_in_constructor() {
        let auth = MemoryAuth::signed_in(UserRef::new("u2").unwrap());
        assert_eq!(auth.current_user().unwrap().uid(), "u2");
    }
}
