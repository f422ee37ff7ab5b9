use crate::models::Entity;
use crate::store::{Filter, Inserted, Repository, Result};

/// State of the association after a toggle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToggleOutcome {
    Added,
    Removed,
}

impl ToggleOutcome {
    pub fn is_present(&self) -> bool {
        matches!(self, ToggleOutcome::Added)
    }
}

/// Deletes the association matching `key` if there is one, otherwise
/// creates it with `make`. A concurrent toggle that wins the race is
/// folded into the same outcome instead of surfacing as an error.
pub async fn toggle<T: Entity>(
    repo: &dyn Repository<T>,
    key: &Filter,
    make: impl FnOnce() -> T + Send,
) -> Result<ToggleOutcome> {
    match repo.find_one(key).await? {
        Some(existing) => {
            repo.delete_by_id(existing.id()).await?;
            Ok(ToggleOutcome::Removed)
        }
        None => match repo.create(make()).await? {
            Inserted::Created(_) | Inserted::AlreadyExists => Ok(ToggleOutcome::Added),
        },
    }
}
