use crate::message::{InboundMessage, decode};
use fogwar_common::TilePosition;
use fogwar_kernel::{ActorRegistry, ApplyError, ApplyHandle, RebuildSink, VisibilityStore};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Apply the tile part of a message: the batch, then the reset.
pub fn apply_message(store: &VisibilityStore, message: InboundMessage) -> BTreeSet<TilePosition> {
    let InboundMessage {
        updates,
        seen,
        reset,
        skipped,
        ..
    } = message;
    let _span = tracing::info_span!("sync_apply", items = updates.len(), reset).entered();

    let mut changed = store.apply_batch(updates);
    if reset {
        let removed = store.apply_reset(&seen);
        tracing::debug!(removed = removed.len(), "reset reverted unlisted tiles");
        changed.extend(removed);
    }
    tracing::debug!(changed = changed.len(), skipped, "authority batch applied");
    changed
}

/// Turns received frames into apply-queue jobs and actor registry changes.
#[derive(Clone)]
pub struct MessageApplier {
    apply: ApplyHandle,
    registry: Arc<ActorRegistry>,
    sink: Arc<dyn RebuildSink>,
}

impl MessageApplier {
    pub fn new(apply: ApplyHandle, registry: Arc<ActorRegistry>, sink: Arc<dyn RebuildSink>) -> Self {
        Self {
            apply,
            registry,
            sink,
        }
    }

    /// Decode and queue one frame.
    ///
    /// Frames that do not decode are logged and dropped. Only a closed apply
    /// queue is an error.
    pub fn handle_frame(&self, frame: &str) -> Result<(), ApplyError> {
        if frame.trim().is_empty() {
            return Ok(());
        }
        let mut message = match decode(frame) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "dropping undecodable frame");
                return Ok(());
            }
        };

        if let Some(directive) = message.actors.take() {
            let count = directive.ids.len();
            let changed = if directive.reset {
                self.registry.replace(directive.ids)
            } else {
                self.registry.extend(directive.ids) > 0
            };
            tracing::debug!(count, reset = directive.reset, changed, "actor directive applied");
        }

        if message.updates.is_empty() && !message.reset {
            return Ok(());
        }
        let sink = self.sink.clone();
        self.apply.submit(move |store| {
            let changed = apply_message(store, message);
            if !changed.is_empty() {
                sink.tiles_changed(&changed);
            }
        })
    }
}
