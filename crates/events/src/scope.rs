use invrecon_core::ProjectId;

use crate::EventEnvelope;

/// Messages that belong to exactly one project.
///
/// Subscribers serving a single project (the SSE stream) filter on this.
pub trait ProjectScoped {
    fn project_id(&self) -> ProjectId;

    fn belongs_to(&self, project_id: ProjectId) -> bool {
        self.project_id() == project_id
    }
}

impl<E> ProjectScoped for EventEnvelope<E> {
    fn project_id(&self) -> ProjectId {
        EventEnvelope::project_id(self)
    }
}
