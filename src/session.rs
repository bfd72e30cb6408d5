use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::Error;
use crate::models::User;
use crate::storage::TokenStore;
use crate::token::{self, check_is_logged_in};

/// Derived authentication state published to subscribers.
#[derive(Debug, Clone, Default, PartialEq)]
#[non_exhaustive]
pub struct SessionState {
    pub logged_in: bool,
    /// `sub` claim of the stored token while logged in.
    pub subject: Option<String>,
    pub user: Option<User>,
}

type IdentityHook = Box<dyn Fn(Option<&str>) + Send + Sync>;

/// Explicit session context: the token slot plus the state derived from it.
///
/// Every token change goes through [`set_token`](Self::set_token) or
/// [`logout`](Self::logout); the profile goes through
/// [`set_user`](Self::set_user). Clone the `Arc` to share it.
pub struct Session<S> {
    store: S,
    state: watch::Sender<SessionState>,
    identity_hooks: Mutex<Vec<IdentityHook>>,
}

impl<S: TokenStore> Session<S> {
    /// Seeds the state from whatever the store currently holds.
    pub fn new(store: S) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        let session = Self {
            store,
            state,
            identity_hooks: Mutex::new(Vec::new()),
        };
        session.refresh();
        session
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.state.borrow().logged_in
    }

    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    /// Receives every state change, including ones caused by other
    /// processes once [`refresh`](Self::refresh) notices them.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Reads the stored token, or `None` if the slot is empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store cannot be read.
    pub fn token(&self) -> Result<Option<String>, Error> {
        Ok(self
            .store
            .load()?
            .and_then(|t| token::normalize(Some(t.as_str())).map(str::to_owned)))
    }

    /// Registers `hook` to run whenever [`refresh`](Self::refresh) or
    /// [`set_token`](Self::set_token) finds a different `sub` in storage,
    /// including a token that expired or vanished. It receives the new
    /// subject. An explicit [`logout`](Self::logout) does not run hooks.
    pub fn on_identity_change(&self, hook: impl Fn(Option<&str>) + Send + Sync + 'static) {
        self.identity_hooks.lock().push(Box::new(hook));
    }

    pub fn set_user(&self, user: User) {
        self.state.send_if_modified(|state| {
            if state.user.as_ref() == Some(&user) {
                return false;
            }
            state.user = Some(user);
            true
        });
    }

    /// Persists `token` (an empty or missing token clears the slot), then
    /// re-derives validity. Returns the new logged-in flag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store cannot be written.
    pub fn set_token(&self, token: Option<&str>) -> Result<bool, Error> {
        match token::normalize(token) {
            Some(token) => self.store.store(token)?,
            None => self.store.clear()?,
        }
        Ok(self.refresh())
    }

    /// Re-runs the full validity check against storage.
    ///
    /// Call this whenever the slot may have been changed from outside. If the
    /// stored identity changed, the cached profile is dropped and identity
    /// hooks run.
    pub fn refresh(&self) -> bool {
        self.sync(true)
    }

    fn sync(&self, run_hooks: bool) -> bool {
        let logged_in = check_is_logged_in(&self.store);
        let subject = if logged_in {
            self.token()
                .ok()
                .flatten()
                .and_then(|t| token::decode_claims(Some(t.as_str())).ok())
                .and_then(|claims| claims.subject().map(str::to_owned))
        } else {
            None
        };

        let mut identity_changed = false;
        self.state.send_if_modified(|state| {
            if state.logged_in == logged_in && state.subject == subject {
                return false;
            }
            tracing::debug!(logged_in, "session state changed");
            identity_changed = state.subject != subject;
            state.logged_in = logged_in;
            state.subject = subject.clone();
            state.user = None;
            true
        });

        if identity_changed && run_hooks {
            for hook in self.identity_hooks.lock().iter() {
                hook(subject.as_deref());
            }
        }
        logged_in
    }

    /// Removes the token and resets the derived state. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store cannot be cleared.
    pub fn logout(&self) -> Result<(), Error> {
        self.store.clear()?;
        self.sync(false);
        self.state.send_if_modified(|state| state.user.take().is_some());
        Ok(())
    }

    /// Drops the profile and re-derives everything from storage.
    pub(crate) fn reset(&self) {
        self.state.send_if_modified(|state| state.user.take().is_some());
        self.refresh();
    }

    /// Polls storage every `period` and refreshes on change.
    ///
    /// The task ends once the last `Arc<Session>` is dropped. Must be called
    /// from within a tokio runtime.
    pub fn watch_storage(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let session: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(session) = session.upgrade() else {
                    break;
                };
                session.refresh();
            }
        })
    }
}
