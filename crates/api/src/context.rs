use exportkit_auth::Role;
use exportkit_core::OwnerId;

/// Authenticated caller for a request.
///
/// Every export and schedule read or write is scoped to `owner_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerContext {
    owner_id: OwnerId,
    roles: Vec<Role>,
}

impl OwnerContext {
    pub fn new(owner_id: OwnerId, roles: Vec<Role>) -> Self {
        Self { owner_id, roles }
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }
}
