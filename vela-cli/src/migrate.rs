//! State migration engine
//!
//! Moves a state document from one state manager to another under a
//! user-confirmable policy. The engine never clears the source; after a
//! successful copy the destination is durable and the caller decides
//! whether and how to clear (I2: a document is never deleted before its
//! successor is persisted).

use tracing::debug;

use vela_backend::Prompter;
use vela_state::{StateFile, StateManager};

use crate::meta::SetupError;

/// One migration between two state managers
pub struct MigrateOpts<'a> {
    /// Human-readable name of the source backend
    pub one_type: &'a str,
    /// Human-readable name of the destination backend
    pub two_type: &'a str,
    pub one: &'a mut dyn StateManager,
    pub two: &'a mut dyn StateManager,
}

/// What the engine did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateOutcome {
    /// The source was empty; nothing to ask or move
    NoOp,
    /// The user declined the copy
    Declined,
    /// The document was copied and the destination persisted
    Copied,
}

pub async fn migrate_state(
    opts: MigrateOpts<'_>,
    prompter: &dyn Prompter,
) -> Result<MigrateOutcome, SetupError> {
    let MigrateOpts {
        one_type,
        two_type,
        one,
        two,
    } = opts;

    one.refresh_state()
        .await
        .map_err(|source| SetupError::StateRead {
            which: one_type.to_string(),
            source,
        })?;
    two.refresh_state()
        .await
        .map_err(|source| SetupError::StateRead {
            which: two_type.to_string(),
            source,
        })?;

    let one_state = match one.state() {
        Some(state) if !state.is_empty() => state,
        _ => {
            debug!(one = one_type, two = two_type, "source empty, migration no-op");
            return Ok(MigrateOutcome::NoOp);
        }
    };
    let two_state = two.state();

    let confirmed = match two_state {
        Some(ref dest) if !dest.is_empty() => {
            if dest.lineage == one_state.lineage {
                prompter.ask_yes_no(
                    "backend-migrate-copy-newer",
                    &format!(
                        "The {two_type} backend already holds state with the same lineage. \
                         Overwrite it with the newer state from {one_type}? Only \"yes\" \
                         will copy; anything else keeps the destination untouched."
                    ),
                )?
            } else {
                // Divergent destination: acknowledge first, then confirm.
                let acknowledged = prompter.ask_yes_no(
                    "backend-migrate-dest-has-state",
                    &format!(
                        "The {two_type} backend already holds state with a different \
                         lineage than the state in {one_type}. Continue and review the \
                         overwrite?"
                    ),
                )?;
                acknowledged
                    && prompter.ask_yes_no(
                        "backend-migrate-overwrite",
                        &format!(
                            "Overwrite the existing {two_type} state with the state from \
                             {one_type}? The previous destination state will be lost."
                        ),
                    )?
            }
        }
        _ => prompter.ask_yes_no(
            "backend-migrate-copy-to-empty",
            &format!("Do you want to copy the existing state from {one_type} to {two_type}?"),
        )?,
    };

    if !confirmed {
        debug!(one = one_type, two = two_type, "migration declined");
        return Ok(MigrateOutcome::Declined);
    }

    let document = copied_document(&one_state, two_state.as_ref());
    two.write_state(Some(document))
        .map_err(|source| SetupError::MigrateCopy {
            one: one_type.to_string(),
            two: two_type.to_string(),
            source,
        })?;
    two.persist_state()
        .await
        .map_err(|source| SetupError::MigrateCopy {
            one: one_type.to_string(),
            two: two_type.to_string(),
            source,
        })?;

    debug!(one = one_type, two = two_type, "state copied");
    Ok(MigrateOutcome::Copied)
}

/// The document written into the destination: the source payload without
/// its plumbing stanzas, with a serial past the destination's so the next
/// persist is never stale.
fn copied_document(source: &StateFile, dest: Option<&StateFile>) -> StateFile {
    let mut document = source.clone();
    document.remote = None;
    document.backend = None;
    let dest_serial = dest.map(|s| s.serial).unwrap_or(0);
    document.serial = document.serial.max(dest_serial) + 1;
    document
}
