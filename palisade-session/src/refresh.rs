//! Identity refresh and device reconciliation.
//!
//! Given a correspondent name, reconcile the local identities with the
//! verified remote configuration: create missing identities, remove stale
//! ones, and pick up long-term key rotations. Within one call, creation
//! precedes stale removal precedes public-key refresh.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use palisade_envelope::{PqKemPublic, SigningPublic};

use crate::canon;
use crate::error::SessionError;
use crate::session::{draw_session_context_id, ContextSnapshot, Session};
use crate::types::{
    IdentityProps, OneTimeKeyHandles, SessionIdentity, UserConfiguration,
    UserDeviceConfiguration,
};

/// Knobs for a refresh call.
#[derive(Clone, Copy, Debug)]
pub struct RefreshOptions {
    /// Create identities for newly discovered devices.
    pub create_identity: bool,
    /// Bypass the short-circuit and reconcile even if this name was already
    /// refreshed.
    pub force: bool,
    /// Ask the transport for fresh one-time key ids instead of resolving
    /// them from the published configuration.
    pub send_one_time_identities: bool,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            create_identity: true,
            force: false,
            send_one_time_identities: false,
        }
    }
}

impl RefreshOptions {
    /// Options with the force flag set.
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }
}

impl Session {
    /// Refresh with default options.
    pub async fn refresh_identities(
        &self,
        secret_name: &str,
    ) -> Result<Vec<SessionIdentity>, SessionError> {
        self.refresh_identities_with(secret_name, &RefreshOptions::default())
            .await
    }

    /// Reconcile local identities for `secret_name` against the peer's
    /// authoritative configuration.
    ///
    /// Returns the post-refresh set of identities for the name (plus the
    /// local user's companion devices). On a caught reconciliation failure
    /// the pre-refresh set is returned instead; `InvalidSignature` and
    /// `DrainedKeys` surface.
    pub async fn refresh_identities_with(
        &self,
        secret_name: &str,
        options: &RefreshOptions,
    ) -> Result<Vec<SessionIdentity>, SessionError> {
        let snapshot = self.snapshot().await?;

        // Reserve guard: top up one-time keys in the background. A refill
        // failure must never fail this refresh.
        let watermark = self.config().low_watermark;
        if snapshot.classical_reserve <= watermark || snapshot.pqkem_reserve <= watermark {
            let task = self.clone();
            tokio::spawn(async move {
                if let Err(e) = task.refill_one_time_keys_if_needed().await {
                    tracing::warn!(error = %e, "background one-time key refill failed");
                }
            });
        }

        let local = self.load_matching_identities(&snapshot, secret_name).await?;

        // Short-circuit: already reconciled this process and still known.
        {
            let state_has_name = {
                let state = self.inner.state.lock().await;
                state.refreshed.contains(secret_name)
            };
            if !options.force
                && state_has_name
                && local.iter().any(|i| i.props().secret_name == secret_name)
            {
                return Ok(local);
            }
        }

        // Discovery: fetch and verify the authoritative configuration.
        // One bad entry poisons the whole set; nothing is written.
        let configuration = self.inner.transport.find_configuration(secret_name).await?;
        let signing = configuration.signing_public()?;
        let verified = match configuration.verified_devices() {
            Ok(devices) => devices,
            Err(e) => {
                self.reset_refreshed().await;
                return Err(e);
            }
        };

        // Adding-contact hint: consumed (cleared) on read.
        let hint = {
            let mut state = self.inner.state.lock().await;
            state.contact_hint.take()
        };

        let pre_refresh = local.clone();
        let mut working = local;
        match self
            .reconcile(
                secret_name,
                options,
                &snapshot,
                &configuration,
                &signing,
                &verified,
                hint,
                &mut working,
            )
            .await
        {
            Ok(()) => {
                let mut state = self.inner.state.lock().await;
                state.refreshed.insert(secret_name.to_string());
                Ok(working)
            }
            Err(e) if e.aborts_refresh() => {
                self.reset_refreshed().await;
                Err(e)
            }
            Err(e) => {
                // Best-effort contract: if we can't improve the view, give
                // back what we had.
                tracing::warn!(error = %e, secret_name, "refresh degraded to pre-refresh set");
                Ok(pre_refresh)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn reconcile(
        &self,
        secret_name: &str,
        options: &RefreshOptions,
        snapshot: &ContextSnapshot,
        configuration: &UserConfiguration,
        signing: &SigningPublic,
        verified: &[UserDeviceConfiguration],
        mut hint: Option<OneTimeKeyHandles>,
        local: &mut Vec<SessionIdentity>,
    ) -> Result<(), SessionError> {
        // --- identity creation -------------------------------------------
        if options.create_identity {
            let existing: HashSet<Uuid> = local.iter().map(|i| i.props().device_id).collect();

            // Name and context-id uniqueness span the whole store, not just
            // this correspondent.
            let all = self.load_identities(&snapshot.db_key).await?;
            let mut used_context_ids: HashSet<i64> =
                all.iter().map(|i| i.props().session_context_id).collect();
            let mut taken_names: HashSet<String> =
                all.iter().map(|i| i.props().device_name.clone()).collect();

            for device in verified
                .iter()
                .filter(|d| !existing.contains(&d.device_id) && d.device_id != snapshot.device_id)
            {
                let hinted = hint.take();
                match self
                    .create_identity_for_device(
                        secret_name,
                        options,
                        snapshot,
                        configuration,
                        signing,
                        device,
                        hinted,
                        &mut used_context_ids,
                        &mut taken_names,
                    )
                    .await
                {
                    Ok(identity) => local.push(identity),
                    Err(e) if e.aborts_refresh() => return Err(e),
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            device_id = %device.device_id,
                            "skipping device during reconciliation"
                        );
                    }
                }
            }
        }

        // --- stale removal -----------------------------------------------
        // Re-fetch so companion identities created elsewhere are included.
        let all = self.load_identities(&snapshot.db_key).await?;
        let relevant = all.into_iter().filter(|i| {
            let props = i.props();
            props.secret_name == secret_name
                || (props.secret_name == snapshot.secret_name
                    && props.device_id != snapshot.device_id)
        });

        let verified_ids: HashSet<Uuid> = verified.iter().map(|d| d.device_id).collect();
        let mut survivors = Vec::new();
        for identity in relevant {
            let device_id = identity.props().device_id;
            if verified_ids.contains(&device_id) || snapshot.our_device_ids.contains(&device_id) {
                survivors.push(identity);
            } else {
                self.inner
                    .store
                    .delete_session_identity(identity.id())
                    .await?;
                self.inner
                    .receiver
                    .identity_removed(&identity.props().secret_name, device_id);
            }
        }

        // --- public-key refresh ------------------------------------------
        // Peers learn of long-term rotations here, never out of band.
        let device_by_id: HashMap<Uuid, &UserDeviceConfiguration> =
            verified.iter().map(|d| (d.device_id, d)).collect();
        for identity in survivors.iter_mut() {
            if identity.props().secret_name != secret_name {
                continue;
            }
            let Some(device) = device_by_id.get(&identity.props().device_id) else {
                continue;
            };
            if device.long_term_public != identity.props().long_term_public {
                let mut props = identity.props().clone();
                props.long_term_public = device.long_term_public.clone();
                identity.update_props(&snapshot.db_key, props)?;
                self.inner
                    .store
                    .update_session_identity(identity.record().clone())
                    .await?;
                self.inner
                    .receiver
                    .identity_updated(secret_name, identity.props().device_id);
            }
        }

        *local = survivors;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_identity_for_device(
        &self,
        secret_name: &str,
        options: &RefreshOptions,
        snapshot: &ContextSnapshot,
        configuration: &UserConfiguration,
        signing: &SigningPublic,
        device: &UserDeviceConfiguration,
        hinted: Option<OneTimeKeyHandles>,
        used_context_ids: &mut HashSet<i64>,
        taken_names: &mut HashSet<String>,
    ) -> Result<SessionIdentity, SessionError> {
        // Resolve which one-time key ids to bind: hint, then a fresh
        // transport round-trip, then the published configuration alone.
        let handles = match hinted {
            Some(h) if h.classical_id.is_some() || h.pqkem_id.is_some() => h,
            _ if options.send_one_time_identities => {
                self.inner
                    .transport
                    .fetch_one_time_keys(secret_name, device.device_id)
                    .await?
            }
            _ => OneTimeKeyHandles::default(),
        };

        let classical_entry = match handles.classical_id {
            Some(id) => configuration.find_one_time_classical(id),
            None => configuration.first_one_time_classical_for(device.device_id),
        };
        // First-contact fallback: the handshake tolerates a missing
        // classical one-time by using only the long-term key.
        let one_time_public = match classical_entry {
            Some(entry) => Some(entry.verify(signing)?),
            None => None,
        };
        let bound_classical_id = classical_entry.map(|e| e.id);

        let pqkem_entry = match handles.pqkem_id {
            Some(id) => configuration.find_one_time_pqkem(id),
            None => configuration.first_one_time_pqkem_for(device.device_id),
        };
        let (pqkem_public, bound_pqkem_id) = match pqkem_entry {
            Some(entry) => (entry.verify(signing)?, Some(entry.id)),
            None => {
                // Signed-pre-key fallback; it must at least parse as a key.
                PqKemPublic::from_bytes(&device.final_pqkem_public)
                    .map_err(|_| SessionError::DrainedKeys)?;
                (device.final_pqkem_public.clone(), None)
            }
        };

        let session_context_id = draw_session_context_id(used_context_ids);
        used_context_ids.insert(session_context_id);

        let device_name =
            allocate_device_name(&self.inner.config.device_name_base, taken_names);
        taken_names.insert(device_name.clone());

        let props = IdentityProps {
            secret_name: secret_name.to_string(),
            device_id: device.device_id,
            session_context_id,
            long_term_public: device.long_term_public.clone(),
            signing_public: device.signing_public.clone(),
            pqkem_public,
            one_time_public,
            ratchet_state: None,
            device_name,
            is_master: device.is_master,
        };
        let identity = SessionIdentity::create(props, &snapshot.db_key)?;
        self.inner
            .store
            .create_session_identity(identity.record().clone())
            .await?;

        // Tell the peer which of their one-time keys we bound. Sent for
        // hinted ids too; the peer deduplicates on the id pair.
        if bound_classical_id.is_some() || bound_pqkem_id.is_some() {
            let notice = canon::encode_identity_notice(&OneTimeKeyHandles {
                classical_id: bound_classical_id,
                pqkem_id: bound_pqkem_id,
            });
            self.inner
                .transport
                .notify_identity_creation(secret_name, notice)
                .await?;
        }
        self.inner
            .receiver
            .identity_created(secret_name, device.device_id);
        Ok(identity)
    }

    /// Identities whose `secret_name` matches, plus the local user's
    /// companion devices.
    pub(crate) async fn load_matching_identities(
        &self,
        snapshot: &ContextSnapshot,
        secret_name: &str,
    ) -> Result<Vec<SessionIdentity>, SessionError> {
        Ok(self
            .load_identities(&snapshot.db_key)
            .await?
            .into_iter()
            .filter(|i| {
                let props = i.props();
                props.secret_name == secret_name
                    || (props.secret_name == snapshot.secret_name
                        && props.device_id != snapshot.device_id)
            })
            .collect())
    }

    pub(crate) async fn reset_refreshed(&self) {
        let mut state = self.inner.state.lock().await;
        state.refreshed.clear();
    }
}

fn allocate_device_name(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    let mut n = 1usize;
    loop {
        let candidate = format!("{} ({})", base, n);
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_names_get_numbered_suffixes() {
        let mut taken = HashSet::new();
        let first = allocate_device_name("device", &taken);
        assert_eq!(first, "device");
        taken.insert(first);

        let second = allocate_device_name("device", &taken);
        assert_eq!(second, "device (1)");
        taken.insert(second);

        assert_eq!(allocate_device_name("device", &taken), "device (2)");
    }

    #[test]
    fn default_options() {
        let options = RefreshOptions::default();
        assert!(options.create_identity);
        assert!(!options.force);
        assert!(!options.send_one_time_identities);
        assert!(RefreshOptions::forced().force);
    }
}
