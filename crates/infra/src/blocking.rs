//! Sync entry points over the async Postgres pool.

use std::future::Future;

use tokio::runtime::Handle;

/// Drive `fut` on `handle` from sync code.
///
/// On a runtime worker this steps out through `block_in_place`, which needs
/// the multi-threaded scheduler. Plain threads (the projection worker) block
/// on the handle directly.
pub(crate) fn block_on<F: Future>(handle: &Handle, fut: F) -> F::Output {
    if Handle::try_current().is_ok() {
        tokio::task::block_in_place(|| handle.block_on(fut))
    } else {
        handle.block_on(fut)
    }
}
