//! Renderer and host seams.

use crate::error::HandlerError;
use crate::monitor::FatalReason;
use parking_lot::Mutex;
use seqsync_protocol::{
    DownloadRequest, ElementPatch, Notification, OpenTarget, RunJavascript, SequenceNumber,
    Update, UpdateEnvelope, UpdateKind,
};
use std::collections::HashSet;

/// Where a dispatched update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Accepted in order from the live stream.
    Live,
    /// Accepted from a merged resume reply.
    Replay,
    /// Carried no sequence number.
    Unsequenced,
}

/// Context passed to every renderer call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchContext {
    /// Sequence of the update, if it has one.
    pub sequence: Option<SequenceNumber>,
    /// Origin of the update.
    pub origin: Origin,
}

/// Presentation layer that applies updates.
///
/// Called only from the dispatch queue, one update at a time, in final
/// dispatch order.
pub trait Renderer: Send + Sync + 'static {
    /// Applies an element patch.
    fn apply_elements(
        &self,
        ctx: &DispatchContext,
        patch: &ElementPatch,
    ) -> Result<(), HandlerError>;

    /// Runs a script.
    fn run_javascript(
        &self,
        ctx: &DispatchContext,
        script: &RunJavascript,
    ) -> Result<(), HandlerError>;

    /// Navigates.
    fn open(&self, ctx: &DispatchContext, target: &OpenTarget) -> Result<(), HandlerError>;

    /// Starts a download.
    fn download(
        &self,
        ctx: &DispatchContext,
        request: &DownloadRequest,
    ) -> Result<(), HandlerError>;

    /// Shows a notification.
    fn notify(
        &self,
        ctx: &DispatchContext,
        notification: &Notification,
    ) -> Result<(), HandlerError>;
}

/// The page hosting the client.
pub trait Host: Send + Sync + 'static {
    /// Replaces the page with a fresh load.
    fn reload(&self, reason: &FatalReason);

    /// Shows or hides the reconnecting indicator.
    fn set_reconnecting(&self, visible: bool);
}

/// Decodes an envelope and hands it to the matching renderer method.
pub fn render_envelope<R: Renderer + ?Sized>(
    renderer: &R,
    ctx: &DispatchContext,
    envelope: &UpdateEnvelope,
) -> Result<(), HandlerError> {
    match envelope.decode()? {
        Update::Elements(patch) => renderer.apply_elements(ctx, &patch),
        Update::RunJavascript(script) => renderer.run_javascript(ctx, &script),
        Update::Open(target) => renderer.open(ctx, &target),
        Update::Download(request) => renderer.download(ctx, &request),
        Update::Notify(notification) => renderer.notify(ctx, &notification),
    }
}

/// An update applied by a [`MemoryRenderer`].
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedUpdate {
    /// Sequence, if any.
    pub sequence: Option<SequenceNumber>,
    /// Origin.
    pub origin: Origin,
    /// The decoded update.
    pub update: Update,
}

/// Renderer that records what it applied.
#[derive(Debug, Default)]
pub struct MemoryRenderer {
    applied: Mutex<Vec<RenderedUpdate>>,
    fail_on: Mutex<HashSet<SequenceNumber>>,
}

impl MemoryRenderer {
    /// Creates an empty renderer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the handler for `sequence` fail.
    pub fn fail_on(&self, sequence: SequenceNumber) {
        self.fail_on.lock().insert(sequence);
    }

    /// Returns every applied update in order.
    pub fn applied(&self) -> Vec<RenderedUpdate> {
        self.applied.lock().clone()
    }

    /// Returns the sequences of applied updates, skipping unsequenced ones.
    pub fn sequences(&self) -> Vec<u64> {
        self.applied
            .lock()
            .iter()
            .filter_map(|rendered| rendered.sequence.map(SequenceNumber::get))
            .collect()
    }

    /// Returns the number of applied updates.
    pub fn len(&self) -> usize {
        self.applied.lock().len()
    }

    /// Returns true if nothing was applied.
    pub fn is_empty(&self) -> bool {
        self.applied.lock().is_empty()
    }

    fn record(&self, ctx: &DispatchContext, update: Update) -> Result<(), HandlerError> {
        if let Some(sequence) = ctx.sequence {
            if self.fail_on.lock().contains(&sequence) {
                return Err(HandlerError::failed(
                    update.kind(),
                    format!("injected failure at {sequence}"),
                ));
            }
        }
        self.applied.lock().push(RenderedUpdate {
            sequence: ctx.sequence,
            origin: ctx.origin,
            update,
        });
        Ok(())
    }
}

impl Renderer for MemoryRenderer {
    fn apply_elements(
        &self,
        ctx: &DispatchContext,
        patch: &ElementPatch,
    ) -> Result<(), HandlerError> {
        self.record(ctx, Update::Elements(patch.clone()))
    }

    fn run_javascript(
        &self,
        ctx: &DispatchContext,
        script: &RunJavascript,
    ) -> Result<(), HandlerError> {
        self.record(ctx, Update::RunJavascript(script.clone()))
    }

    fn open(&self, ctx: &DispatchContext, target: &OpenTarget) -> Result<(), HandlerError> {
        self.record(ctx, Update::Open(target.clone()))
    }

    fn download(
        &self,
        ctx: &DispatchContext,
        request: &DownloadRequest,
    ) -> Result<(), HandlerError> {
        if request.src.is_empty() {
            return Err(HandlerError::failed(UpdateKind::Download, "empty source"));
        }
        self.record(ctx, Update::Download(request.clone()))
    }

    fn notify(
        &self,
        ctx: &DispatchContext,
        notification: &Notification,
    ) -> Result<(), HandlerError> {
        self.record(ctx, Update::Notify(notification.clone()))
    }
}

/// Host that records reloads and the indicator.
#[derive(Debug, Default)]
pub struct MemoryHost {
    reloads: Mutex<Vec<FatalReason>>,
    indicator: Mutex<Vec<bool>>,
}

impl MemoryHost {
    /// Creates a host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every reload reason.
    pub fn reloads(&self) -> Vec<FatalReason> {
        self.reloads.lock().clone()
    }

    /// Returns the number of reloads.
    pub fn reload_count(&self) -> usize {
        self.reloads.lock().len()
    }

    /// Returns whether the indicator is currently shown.
    pub fn reconnecting(&self) -> bool {
        self.indicator.lock().last().copied().unwrap_or(false)
    }

    /// Returns every indicator change in order.
    pub fn indicator_history(&self) -> Vec<bool> {
        self.indicator.lock().clone()
    }
}

impl Host for MemoryHost {
    fn reload(&self, reason: &FatalReason) {
        self.reloads.lock().push(reason.clone());
    }

    fn set_reconnecting(&self, visible: bool) {
        self.indicator.lock().push(visible);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqsync_protocol::ProtocolError;
    use serde_json::json;

    fn live(n: u64) -> DispatchContext {
        DispatchContext {
            sequence: Some(SequenceNumber::new(n)),
            origin: Origin::Live,
        }
    }

    #[test]
    fn routes_by_kind() {
        let renderer = MemoryRenderer::new();
        let envelopes = [
            UpdateEnvelope::sequenced(
                "update",
                SequenceNumber::new(1),
                json!({"3": {"tag": "div"}, "4": null}),
            ),
            UpdateEnvelope::sequenced(
                "run_javascript",
                SequenceNumber::new(2),
                json!({"code": "1+1"}),
            ),
            UpdateEnvelope::sequenced("open", SequenceNumber::new(3), json!({"path": "/next"})),
        ];

        for (i, envelope) in envelopes.iter().enumerate() {
            render_envelope(&renderer, &live(i as u64 + 1), envelope).unwrap();
        }

        let applied = renderer.applied();
        assert!(matches!(&applied[0].update, Update::Elements(patch) if patch.len() == 2));
        assert!(matches!(&applied[1].update, Update::RunJavascript(s) if s.code == "1+1"));
        assert!(matches!(&applied[2].update, Update::Open(t) if t.path == "/next" && !t.new_tab));
        assert_eq!(renderer.sequences(), vec![1, 2, 3]);
    }

    #[test]
    fn unknown_kind_is_a_handler_error() {
        let renderer = MemoryRenderer::new();
        let envelope = UpdateEnvelope::sequenced("teleport", SequenceNumber::new(1), json!({}));

        let err = render_envelope(&renderer, &live(1), &envelope).unwrap_err();
        assert!(matches!(
            err,
            HandlerError::Decode(ProtocolError::UnknownKind(k)) if k == "teleport"
        ));
        assert!(renderer.is_empty());
    }

    #[test]
    fn injected_failure() {
        let renderer = MemoryRenderer::new();
        renderer.fail_on(SequenceNumber::new(2));
        let envelope =
            UpdateEnvelope::sequenced("notify", SequenceNumber::new(2), json!({"message": "hi"}));

        assert!(render_envelope(&renderer, &live(2), &envelope).is_err());
        assert!(render_envelope(&renderer, &live(3), &envelope).is_ok());
        assert_eq!(renderer.len(), 1);
    }

    #[test]
    fn host_records_indicator_and_reloads() {
        let host = MemoryHost::new();
        assert!(!host.reconnecting());

        host.set_reconnecting(true);
        assert!(host.reconnecting());
        host.set_reconnecting(false);
        host.reload(&FatalReason::ConnectTimeout);

        assert_eq!(host.indicator_history(), vec![true, false]);
        assert_eq!(host.reloads(), vec![FatalReason::ConnectTimeout]);
    }
}
