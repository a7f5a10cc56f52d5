// Read-receipt dispatcher.
// One mark-read call per applied feed load, after a short grace period so the
// receipt never beats the render of the messages it covers. The call is
// idempotent server-side; a failure is logged and left for the next poll
// cycle to retry naturally.

use std::sync::Arc;

use log::{debug, warn};

use crate::events::AppEvent;
use crate::models::ConversationId;

use super::EngineShared;

enum MarkTarget {
    Channel(String),
    Dm(String),
}

pub(crate) fn schedule_mark_read(shared: &Arc<EngineShared>, generation: u64) {
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        tokio::time::sleep(shared.config.read_receipt_grace).await;

        let target = {
            let state = shared.state.lock().await;
            if !shared.is_current(generation) {
                debug!("Skipping mark-read: conversation changed during grace period");
                return;
            }
            match (&state.conversation, &state.dm_channel_id) {
                (Some(conv @ ConversationId::Channel(id)), _) => {
                    Some((conv.clone(), MarkTarget::Channel(id.clone())))
                }
                (Some(conv @ ConversationId::Direct(_)), Some(dm)) => {
                    Some((conv.clone(), MarkTarget::Dm(dm.clone())))
                }
                (Some(ConversationId::Direct(peer)), None) => {
                    // The load that scheduled us records the dm channel id,
                    // so this only happens if state was torn down meanwhile.
                    warn!("No DM channel recorded for {}; skipping mark-read", peer);
                    None
                }
                (None, _) => None,
            }
        };
        let Some((conversation, target)) = target else {
            return;
        };

        let result = match &target {
            MarkTarget::Channel(id) => shared.service.mark_channel_read(id).await,
            MarkTarget::Dm(id) => shared.service.mark_dm_read(id).await,
        };
        match result {
            Ok(()) => {
                debug!("Marked {} read", conversation);
                shared.bus.emit(AppEvent::ConversationRead(conversation));
            }
            Err(e) => {
                warn!("Mark-read for {} failed: {} (next poll retries)", conversation, e);
            }
        }
    });
}
