//! Session identity and the lazy-create coordinator.
//!
//! The server hands out an opaque session id and holds the per-image
//! embedding under it. The id lives in [`SessionSlot`]; nothing else in the
//! engine writes it. Creation is lazy and guarded: while a create call is in
//! flight, further ensure attempts fail fast rather than racing a duplicate
//! session into existence.

use tracing::{debug, info};

use crate::error::EngineError;
use crate::transport::SegmentTransport;

#[derive(Debug, Default)]
pub struct SessionSlot {
    id: Option<String>,
    creating: bool,
}

impl SessionSlot {
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    #[must_use]
    pub fn is_creating(&self) -> bool {
        self.creating
    }

    pub fn adopt(&mut self, id: String) {
        self.id = Some(id);
        self.creating = false;
    }

    /// Drops the held id, e.g. after the server reported it unknown.
    pub fn forget(&mut self) {
        if let Some(id) = self.id.take() {
            debug!(session_id = %id, "forgetting session");
        }
        self.creating = false;
    }

    fn begin_create(&mut self) -> Result<(), EngineError> {
        if self.creating {
            return Err(EngineError::SessionCreationInProgress);
        }
        self.creating = true;
        Ok(())
    }

    fn end_create(&mut self) {
        self.creating = false;
    }
}

/// Returns the live session id, creating one if none is held. Exactly one
/// create can be in flight; concurrent callers get
/// [`EngineError::SessionCreationInProgress`].
pub async fn ensure_session<T>(slot: &mut SessionSlot, transport: &T) -> Result<String, EngineError>
where
    T: SegmentTransport + ?Sized,
{
    if let Some(id) = slot.id() {
        return Ok(id.to_string());
    }

    slot.begin_create()?;
    let created = transport.create_session().await;
    slot.end_create();

    let response = created?;
    info!(session_id = %response.session_id, "session created");
    slot.adopt(response.session_id.clone());
    Ok(response.session_id)
}
