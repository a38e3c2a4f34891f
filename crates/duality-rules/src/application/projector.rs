//! Projection of rules events onto the numeric read models.

use async_trait::async_trait;
use duality_core::error::DomainError;
use duality_core::event::StoredEvent;
use duality_event_store::checkpoint::Projector;
use duality_event_store::projections::{
    CharacterProfile, get_character_state, put_character_profile, put_gm_fear,
    update_character_hope, update_character_stress,
};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::domain::events::RulesEventKind;

/// Applies rules events to character and campaign projections.
///
/// Audit-only events are accepted and ignored, so the projector is safe to
/// hand every event of a campaign.
#[derive(Debug, Clone, Copy, Default)]
pub struct RulesProjector;

#[async_trait]
impl Projector for RulesProjector {
    async fn apply(
        &self,
        conn: &mut SqliteConnection,
        event: &StoredEvent,
    ) -> Result<(), DomainError> {
        let kind = RulesEventKind::from_payload(&event.event_type, &event.payload)?;
        let campaign_id = event.campaign_id.as_str();
        let at = event.timestamp;

        match kind {
            RulesEventKind::CharacterProfileUpdated(profile) => {
                put_character_profile(
                    &mut *conn,
                    &CharacterProfile {
                        campaign_id: campaign_id.to_owned(),
                        character_id: profile.character_id,
                        hp_max: profile.hp_max,
                        stress_max: profile.stress_max,
                    },
                    at,
                )
                .await
            }
            RulesEventKind::CharacterStateChanged(change) => {
                // Fail with NotFound before touching either column.
                get_character_state(&mut *conn, campaign_id, &change.character_id).await?;
                if let Some(hope) = change.hope_after {
                    update_character_hope(&mut *conn, campaign_id, &change.character_id, hope, at)
                        .await?;
                }
                if let Some(stress) = change.stress_after {
                    update_character_stress(
                        &mut *conn,
                        campaign_id,
                        &change.character_id,
                        stress,
                        at,
                    )
                    .await?;
                }
                Ok(())
            }
            RulesEventKind::GmFearChanged(change) => {
                put_gm_fear(&mut *conn, campaign_id, change.after, at).await
            }
            RulesEventKind::RollResolved(_) | RulesEventKind::OutcomeApplied(_) => {
                debug!(event_type = %event.event_type, seq = event.seq, "audit-only event, nothing to project");
                Ok(())
            }
        }
    }
}
