//! High-level storefront client facade.

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use pomelo_core::{ProductId, ProductSummary, UserProfile};

use crate::cart::{CartLine, CartReconciler, CartSummary, CartSyncError, CheckoutDraft};
use crate::config::ClientConfig;
use crate::gateway::{
    AuthBackend, Credentials, HttpAuthBackend, HttpCartGateway, HttpTransport,
    RemoteCartGateway,
};
use crate::login::{LoginCoordinator, LoginError};
use crate::session::SessionStore;
use crate::storage::{BrowseHistory, KeyValueStore, SearchHistory, StorageError};

/// Errors from constructing a [`Storefront`].
#[derive(Debug, Error)]
pub enum SetupError {
    /// Durable storage could not be read during hydration.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The HTTP client could not be constructed.
    #[error("failed to construct http client: {0}")]
    Http(#[from] reqwest::Error),
}

/// The assembled client: session, cart, and login flow behind one handle.
///
/// Cart mutations made through the facade watch for token rejection: a
/// server 401 tears the session down locally so the caller lands in a clean
/// logged-out state instead of a half-authenticated one.
pub struct Storefront<S, G, A> {
    store: S,
    session: Arc<SessionStore<S>>,
    cart: Arc<CartReconciler<S, G>>,
    coordinator: LoginCoordinator<S, G, A>,
}

/// [`Storefront`] wired to the REST adapters, with the session store
/// supplying tokens.
pub type HttpStorefront<S> = Storefront<
    S,
    HttpCartGateway<Arc<SessionStore<S>>>,
    HttpAuthBackend<Arc<SessionStore<S>>>,
>;

impl<S: KeyValueStore + Clone> HttpStorefront<S> {
    /// Assemble a storefront speaking the production REST API, with the
    /// session store supplying the token for outbound requests.
    ///
    /// # Errors
    ///
    /// Returns a [`SetupError`] if storage cannot be read or the HTTP
    /// client cannot be built.
    pub fn over_http(config: &ClientConfig, store: S) -> Result<Self, SetupError> {
        let session = Arc::new(SessionStore::new(store.clone()));
        let transport = Arc::new(HttpTransport::new(config, Arc::clone(&session))?);
        let gateway = HttpCartGateway::new(Arc::clone(&transport));
        let backend = HttpAuthBackend::new(transport);
        Ok(Self::with_parts(config, store, session, gateway, backend)?)
    }
}

impl<S, G, A> Storefront<S, G, A>
where
    S: KeyValueStore + Clone,
    G: RemoteCartGateway,
    A: AuthBackend,
{
    /// Assemble a storefront from explicit collaborators. Tests use this to
    /// substitute in-memory fakes for the HTTP adapters.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the stored cart cannot be read.
    pub fn new(
        config: &ClientConfig,
        store: S,
        gateway: G,
        backend: A,
    ) -> Result<Self, StorageError> {
        let session = Arc::new(SessionStore::new(store.clone()));
        Self::with_parts(config, store, session, gateway, backend)
    }

    fn with_parts(
        config: &ClientConfig,
        store: S,
        session: Arc<SessionStore<S>>,
        gateway: G,
        backend: A,
    ) -> Result<Self, StorageError> {
        let cart = Arc::new(CartReconciler::new(store.clone(), gateway)?);
        let coordinator =
            LoginCoordinator::new(backend, Arc::clone(&session), Arc::clone(&cart))
                .with_session_ttl(config.session_ttl);
        Ok(Self {
            store,
            session,
            cart,
            coordinator,
        })
    }

    /// Log in and merge the local cart into the server cart.
    ///
    /// # Errors
    ///
    /// See [`LoginCoordinator::login`].
    pub async fn login(&self, credentials: &Credentials) -> Result<UserProfile, LoginError> {
        self.coordinator.login(credentials).await
    }

    /// Log out and reset to a fresh local cart.
    ///
    /// # Errors
    ///
    /// See [`LoginCoordinator::logout`].
    pub async fn logout(&self) -> Result<(), StorageError> {
        self.coordinator.logout().await
    }

    /// Whether a valid session currently exists.
    pub fn is_logged_in(&self) -> bool {
        self.session.is_valid()
    }

    /// The logged-in user's profile, if any.
    pub fn current_profile(&self) -> Option<UserProfile> {
        self.session.current_profile()
    }

    /// Add units of a product to the cart.
    ///
    /// # Errors
    ///
    /// See [`CartReconciler::add_item`].
    pub async fn add_to_cart(
        &self,
        product: &ProductSummary,
        quantity: u32,
    ) -> Result<(), CartSyncError> {
        self.guard(self.cart.add_item(product, quantity).await)
    }

    /// Set a cart line's quantity; zero removes the line.
    ///
    /// # Errors
    ///
    /// See [`CartReconciler::update_quantity`].
    pub async fn set_quantity(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<(), CartSyncError> {
        self.guard(self.cart.update_quantity(product_id, quantity).await)
    }

    /// Remove a cart line.
    ///
    /// # Errors
    ///
    /// See [`CartReconciler::remove_item`].
    pub async fn remove_from_cart(&self, product_id: ProductId) -> Result<(), CartSyncError> {
        self.guard(self.cart.remove_item(product_id).await)
    }

    /// Flip a line's checkout selection.
    ///
    /// # Errors
    ///
    /// See [`CartReconciler::toggle_selected`].
    pub async fn toggle_selected(&self, product_id: ProductId) -> Result<(), CartSyncError> {
        self.guard(self.cart.toggle_selected(product_id).await)
    }

    /// Select or deselect every line.
    ///
    /// # Errors
    ///
    /// See [`CartReconciler::set_all_selected`].
    pub async fn set_all_selected(&self, selected: bool) -> Result<(), CartSyncError> {
        self.guard(self.cart.set_all_selected(selected).await)
    }

    /// Empty the cart.
    ///
    /// # Errors
    ///
    /// See [`CartReconciler::clear`].
    pub async fn clear_cart(&self) -> Result<(), CartSyncError> {
        self.guard(self.cart.clear().await)
    }

    /// Re-read the cart from its backing store.
    ///
    /// # Errors
    ///
    /// See [`CartReconciler::refresh`].
    pub async fn refresh_cart(&self) -> Result<(), CartSyncError> {
        self.guard(self.cart.refresh().await)
    }

    /// Snapshot of the current cart lines.
    pub fn cart_lines(&self) -> Vec<CartLine> {
        self.cart.lines()
    }

    /// Aggregates over the current cart.
    pub fn cart_summary(&self) -> CartSummary {
        self.cart.summary()
    }

    /// Snapshot the selected lines for the order flow.
    ///
    /// # Errors
    ///
    /// See [`CartReconciler::begin_checkout`].
    pub fn begin_checkout(&self) -> Result<CheckoutDraft, CartSyncError> {
        self.cart.begin_checkout()
    }

    /// Recent search keywords over the same storage.
    pub fn search_history(&self) -> SearchHistory<S> {
        SearchHistory::new(self.store.clone())
    }

    /// Recently viewed products over the same storage.
    pub fn browse_history(&self) -> BrowseHistory<S> {
        BrowseHistory::new(self.store.clone())
    }

    /// The underlying session store.
    pub fn session(&self) -> &SessionStore<S> {
        &self.session
    }

    /// The underlying cart reconciler.
    pub fn cart(&self) -> &CartReconciler<S, G> {
        &self.cart
    }

    /// Complete a cart error: the reconciler has already dropped to a local
    /// cart on token rejection, so the session follows it down here.
    fn guard(&self, result: Result<(), CartSyncError>) -> Result<(), CartSyncError> {
        if let Err(e) = &result {
            if e.is_unauthorized() {
                warn!("cart operation was rejected as unauthorized, clearing session");
                if let Err(e) = self.session.clear() {
                    warn!(error = %e, "failed to clear session after token rejection");
                }
            }
        }
        result
    }
}
