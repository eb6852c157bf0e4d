//! Shared async utilities.
//!
//! Generation has no intrinsic timeout. A caller that wants a deadline
//! composes one by cancelling the request's token when the deadline passes.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Cancel `token` once `deadline` has elapsed.
///
/// The returned handle finishes early (without cancelling) if the token is
/// cancelled by someone else first. Aborting the handle disarms the deadline.
pub fn cancel_after(token: CancellationToken, deadline: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = sleep(deadline) => {
                tracing::debug!("Deadline of {:?} passed, cancelling generation", deadline);
                token.cancel();
            }
        }
    })
}
