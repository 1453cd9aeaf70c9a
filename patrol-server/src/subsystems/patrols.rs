//! Patrol lifecycle: registration, start and end
//!
//! These are the operations a front end (chat bot, control API) calls. Each
//! keeps the registry and the `patrols` table in step: a session is tracked
//! exactly while its row is open.

use chrono::Utc;
use patrol_core::models::{PatrolDebrief, PatrolSummary, Pilot, Session};
use patrol_core::registry::SessionRegistry;
use patrol_core::store::PatrolStore;
use patrol_core::PatrolError;

/// Insert or replace the external id and callsign for a user.
pub async fn register_pilot(
    store: &dyn PatrolStore,
    user_key: &str,
    external_id: &str,
    callsign: &str,
) -> Result<Pilot, PatrolError> {
    let (user_key, external_id, callsign) = (user_key.trim(), external_id.trim(), callsign.trim());
    if user_key.is_empty() || external_id.is_empty() {
        return Err(PatrolError::Invalid(
            "user_key and external_id are required".to_string(),
        ));
    }

    let pilot = store.upsert_pilot(user_key, external_id, callsign).await?;
    tracing::info!(
        user_key = %pilot.user_key,
        external_id = %pilot.external_id,
        "Pilot registered"
    );
    Ok(pilot)
}

/// Open a patrol row and start tracking it.
pub async fn start_patrol(
    store: &dyn PatrolStore,
    registry: &SessionRegistry,
    user_key: &str,
) -> Result<Session, PatrolError> {
    if registry.contains(user_key).await {
        return Err(PatrolError::DuplicateSession {
            user_key: user_key.to_string(),
        });
    }

    let pilot = store
        .find_pilot(user_key)
        .await?
        .ok_or_else(|| PatrolError::NotRegistered {
            user_key: user_key.to_string(),
        })?;

    let started_at = Utc::now();
    let record_id = store.create_patrol(&pilot, started_at).await?;

    let mut session = Session::new(&pilot.user_key, &pilot.external_id, record_id, started_at);
    if !pilot.callsign.is_empty() {
        session.observe_callsign(&pilot.callsign);
    }

    // Lost a race with a concurrent start: drop the row we just opened.
    if let Err(e) = registry.insert(session.clone()).await {
        if let Err(discard_err) = store.discard_patrol(record_id).await {
            tracing::error!(
                record_id,
                error = %discard_err,
                "Failed to discard orphaned patrol row"
            );
        }
        return Err(e);
    }

    tracing::info!(
        user_key = %session.user_key(),
        external_id = %session.external_id(),
        record_id,
        "Patrol started"
    );
    Ok(session)
}

/// Stop tracking and close the row with the final seconds and debrief.
///
/// Returns `Ok(None)` when the user had no tracked patrol. If the row cannot
/// be closed the session goes back into the registry so nothing is lost.
pub async fn end_patrol(
    store: &dyn PatrolStore,
    registry: &SessionRegistry,
    user_key: &str,
    debrief: &PatrolDebrief,
) -> Result<Option<PatrolSummary>, PatrolError> {
    let Some(session) = registry.remove(user_key).await else {
        tracing::debug!(user_key, "End requested with no tracked patrol");
        return Ok(None);
    };

    let ended_at = Utc::now();
    if let Err(e) = store
        .finish_patrol(session.record_id(), session.active_seconds(), ended_at, debrief)
        .await
    {
        tracing::warn!(
            record_id = session.record_id(),
            error = %e,
            "Failed to close patrol row; session kept in registry"
        );
        let record_id = session.record_id();
        if let Err(reinsert_err) = registry.insert(session).await {
            tracing::error!(record_id, error = %reinsert_err, "Failed to restore session");
        }
        return Err(e);
    }

    let summary = PatrolSummary {
        record_id: session.record_id(),
        user_key: session.user_key().to_string(),
        started_at: session.started_at(),
        ended_at,
        active_seconds: session.active_seconds(),
    };
    tracing::info!(
        user_key = %summary.user_key,
        record_id = summary.record_id,
        active_seconds = summary.active_seconds,
        "Patrol ended"
    );
    Ok(Some(summary))
}
