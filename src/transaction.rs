use std::collections::HashMap;

use tracing::{debug, warn};
use wayland_client::{Dispatch, Proxy, QueueHandle};
use wayland_protocols_wlr::output_management::v1::client::{
    zwlr_output_configuration_head_v1::{self, ZwlrOutputConfigurationHeadV1},
    zwlr_output_configuration_v1::ZwlrOutputConfigurationV1,
    zwlr_output_head_v1::ZwlrOutputHeadV1,
    zwlr_output_manager_v1::ZwlrOutputManagerV1,
    zwlr_output_mode_v1::ZwlrOutputModeV1,
};

use crate::{
    error::WlOutputError,
    plan::{HeadDirective, HeadSettings, ModeSelection, TransactionPlan},
    wl_output::BindingId,
};

/// Terminal state of a committed configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

impl TransactionOutcome {
    pub fn into_result(self) -> Result<(), WlOutputError> {
        match self {
            Self::Succeeded => Ok(()),
            Self::Failed => Err(WlOutputError::TransactionFailed),
            Self::Cancelled => Err(WlOutputError::TransactionCancelled),
            Self::Pending => Err(WlOutputError::EventQueue(
                "configuration has no outcome yet".into(),
            )),
        }
    }
}

/// Live protocol objects, keyed by their protocol id
#[derive(Debug, Default)]
pub struct ProxyRegistry {
    pub heads: HashMap<BindingId, ZwlrOutputHeadV1>,
    pub modes: HashMap<BindingId, ZwlrOutputModeV1>,
}

impl ProxyRegistry {
    fn head(&self, binding: BindingId) -> Option<&ZwlrOutputHeadV1> {
        self.heads.get(&binding).filter(|h| h.is_alive())
    }

    fn mode(&self, binding: BindingId) -> Option<&ZwlrOutputModeV1> {
        self.modes.get(&binding).filter(|m| m.is_alive())
    }
}

/// One configuration object. Destroyed when dropped.
pub struct Transaction {
    config: ZwlrOutputConfigurationV1,
}

impl Transaction {
    /// Creates a configuration and stages every entry of `plan` on it.
    ///
    /// Nothing reaches the hardware until [`Transaction::commit`].
    pub fn stage<D>(
        manager: &ZwlrOutputManagerV1,
        serial: u32,
        plan: &TransactionPlan,
        proxies: &ProxyRegistry,
        qh: &QueueHandle<D>,
    ) -> Result<Self, WlOutputError>
    where
        D: Dispatch<ZwlrOutputConfigurationV1, ()>
            + Dispatch<ZwlrOutputConfigurationHeadV1, ()>
            + 'static,
    {
        // Check every head first so a missing proxy never leaves a
        // half-built configuration behind.
        let mut heads = Vec::with_capacity(plan.len());
        for entry in plan.entries() {
            let head = proxies.head(entry.head).ok_or_else(|| {
                WlOutputError::OutputUnavailable(entry.identifier.clone())
            })?;
            heads.push((head, entry));
        }

        let transaction = Self {
            config: manager.create_configuration(serial, qh, ()),
        };
        for (head, entry) in heads {
            match &entry.directive {
                HeadDirective::Disable => {
                    debug!(output = %entry.identifier, "disable head");
                    transaction.config.disable_head(head);
                }
                HeadDirective::Enable(settings) => {
                    debug!(
                        output = %entry.identifier,
                        ?settings,
                        "enable head"
                    );
                    let config_head =
                        transaction.config.enable_head(head, qh, ());
                    configure_head(&config_head, settings, proxies);
                }
            }
        }
        Ok(transaction)
    }

    pub fn commit(&self) {
        self.config.apply();
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.config.destroy();
    }
}

fn configure_head(
    config_head: &ZwlrOutputConfigurationHeadV1,
    settings: &HeadSettings,
    proxies: &ProxyRegistry,
) {
    match settings.mode {
        Some(ModeSelection::Existing(binding)) => match proxies.mode(binding) {
            Some(mode) => config_head.set_mode(mode),
            None => {
                warn!(?binding, "mode object is gone, keeping current mode");
            }
        },
        Some(ModeSelection::Custom {
            width,
            height,
            refresh_mhz,
        }) => config_head.set_custom_mode(width, height, refresh_mhz),
        None => {}
    }
    config_head.set_position(settings.position.x, settings.position.y);
    config_head.set_transform(settings.transform.to_wayland());
    config_head.set_scale(settings.scale);
    if config_head.version()
        >= zwlr_output_configuration_head_v1::REQ_SET_ADAPTIVE_SYNC_SINCE
    {
        config_head.set_adaptive_sync(settings.adaptive_sync.to_wayland());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_results() {
        assert_eq!(TransactionOutcome::Succeeded.into_result(), Ok(()));
        assert_eq!(
            TransactionOutcome::Failed.into_result(),
            Err(WlOutputError::TransactionFailed)
        );
        assert_eq!(
            TransactionOutcome::Cancelled.into_result(),
            Err(WlOutputError::TransactionCancelled)
        );
    }
}
