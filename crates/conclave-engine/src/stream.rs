use std::pin::Pin;
use std::task::{Context, Poll};

use conclave_core::stream::StreamEvent;
use futures::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::DropGuard;

/// Live events of one streaming run.
///
/// Finite and not restartable: it ends after the terminal `finish` or
/// `error` event. Dropping it cancels the run.
pub struct RunStream {
    events: ReceiverStream<StreamEvent>,
    _cancel_on_drop: DropGuard,
}

impl RunStream {
    pub(crate) fn new(events: ReceiverStream<StreamEvent>, guard: DropGuard) -> Self {
        Self {
            events,
            _cancel_on_drop: guard,
        }
    }
}

impl Stream for RunStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl std::fmt::Debug for RunStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunStream").finish_non_exhaustive()
    }
}
