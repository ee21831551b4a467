//! The update-session contract.

use async_trait::async_trait;

use crate::error::SessionResult;

/// The distributed mutual-exclusion token gating rolling updates.
///
/// At most one update domain mutates local application state for a given
/// `app_id` at a time across the fleet. Admission follows one rule in
/// every realization: with `D` the recorded domain and `S` the set of
/// live (non-stale) enlisted instances, a caller from domain `d` is
/// admitted iff `D` is unset, `D == d`, or `S` is empty. The last case
/// lets a new domain take over one abandoned by crashed instances.
#[async_trait]
pub trait UpdateSession: Send + Sync {
    /// Ask for admission to mutate local state for `app_id`.
    ///
    /// `true` means the caller now owns the right to apply changes for
    /// this cycle and is obligated to call [`end`](Self::end) after
    /// finishing — unless the apply failed, in which case the session is
    /// deliberately left held so no other domain is promoted while this
    /// one is partially updated. `false` means another domain is actively
    /// rolling; not an error.
    async fn try_start(&self, app_id: &str) -> SessionResult<bool>;

    /// Deregister the caller's enlistment for `app_id`.
    ///
    /// Safe to call even if the caller was never admitted.
    async fn end(&self, app_id: &str) -> SessionResult<()>;
}

#[async_trait]
impl<S: UpdateSession + ?Sized> UpdateSession for std::sync::Arc<S> {
    async fn try_start(&self, app_id: &str) -> SessionResult<bool> {
        (**self).try_start(app_id).await
    }

    async fn end(&self, app_id: &str) -> SessionResult<()> {
        (**self).end(app_id).await
    }
}
