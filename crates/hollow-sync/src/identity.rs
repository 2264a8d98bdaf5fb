//! Get-or-create for the system author that imported posts are attributed to.

use hollow_core::{AuthorRef, NewAuthor};
use hollow_storage::{PostStore, StorageError};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemAuthor {
    pub email: String,
    pub display_name: String,
}

#[derive(Debug, Error)]
pub enum IdentityProvisionError {
    #[error("system author email `{0}` is not usable")]
    InvalidEmail(String),
    #[error("could not provision system author {email}: {source}")]
    Storage {
        email: String,
        #[source]
        source: StorageError,
    },
}

/// Random login secret nobody is meant to know: two v4 UUIDs from the OS RNG.
pub fn generate_credential() -> String {
    format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

pub fn hash_credential(credential: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(credential.as_bytes());
    hex::encode(hasher.finalize())
}

pub async fn provision_system_author(
    store: &dyn PostStore,
    author: &SystemAuthor,
) -> Result<AuthorRef, IdentityProvisionError> {
    let email = author.email.trim().to_ascii_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(IdentityProvisionError::InvalidEmail(author.email.clone()));
    }

    let credential = generate_credential();
    let author_ref = store
        .get_or_create_author(NewAuthor {
            email: email.clone(),
            display_name: author.display_name.clone(),
            credential_hash: hash_credential(&credential),
        })
        .await
        .map_err(|source| IdentityProvisionError::Storage { email, source })?;

    if author_ref.created {
        info!(author_id = %author_ref.id, email = %author_ref.email, "created system author");
    }
    Ok(author_ref)
}
