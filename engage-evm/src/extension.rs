//! The engagement-center extension catalog and the EVM action extension
//! registered into it.
//!
//! The registry is an owned value handed to whoever hosts the extensions,
//! not a process-global symbol; registration happens through an explicit
//! call at wiring time.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::debug;

use crate::explorer::{explorer_tx_url, parse_object_id};
use crate::model::Realization;
use crate::triggers::{CONNECTOR_NAME, TRANSFER_TOKEN_EVENT};

pub const ENGAGEMENT_CENTER_ACTIONS: &str = "engagementCenterActions";
pub const USER_ACTIONS_KEY: &str = "user-actions";

pub const EVM_ACTION_RANK: u32 = 60;
pub const EVM_ACTION_IMAGE: &str = "/gamification-evm/images/EVM.png";

/// Derives an outbound link for a realization of a matching action.
pub trait ActionLinkResolver: Send + Sync {
    /// Whether this resolver handles the given action label.
    fn matches(&self, action_label: &str) -> bool;

    /// Computes the link for a realization, writing it into
    /// `realization.link` as well. `None` means the resolver does not apply
    /// to this record and the record was left untouched.
    fn resolve_link(&self, realization: &mut Realization) -> Option<String>;
}

/// A registered action extension: display metadata plus the resolver.
#[derive(Clone)]
pub struct ActionExtension {
    pub action_type: String,
    pub rank: u32,
    pub image: String,
    pub is_extensible: bool,
    pub resolver: Arc<dyn ActionLinkResolver>,
}

/// Catalog of action extensions keyed by `(extension point, key)`.
/// Registering the same pair twice replaces the earlier entry.
#[derive(Default)]
pub struct ExtensionRegistry {
    points: HashMap<String, BTreeMap<String, ActionExtension>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, extension_point: &str, key: &str, extension: ActionExtension) {
        self.points.entry(extension_point.to_string()).or_default().insert(key.to_string(), extension);
    }

    /// Extensions of a point ordered by descending rank. Ties keep key order.
    pub fn extensions(&self, extension_point: &str) -> Vec<&ActionExtension> {
        let mut list: Vec<&ActionExtension> =
            self.points.get(extension_point).map(|by_key| by_key.values().collect()).unwrap_or_default();
        list.sort_by(|a, b| b.rank.cmp(&a.rank));
        list
    }

    /// Host-side dispatch: applies the highest-ranked extension whose
    /// resolver matches the action label.
    pub fn resolve_action_link(
        &self,
        extension_point: &str,
        action_label: &str,
        realization: &mut Realization,
    ) -> Option<String> {
        for extension in self.extensions(extension_point) {
            if extension.resolver.matches(action_label) {
                return extension.resolver.resolve_link(realization);
            }
        }
        None
    }
}

/// Link resolver for EVM token-transfer realizations.
pub struct EvmTransferResolver;

impl ActionLinkResolver for EvmTransferResolver {
    fn matches(&self, action_label: &str) -> bool {
        action_label == TRANSFER_TOKEN_EVENT
    }

    fn resolve_link(&self, realization: &mut Realization) -> Option<String> {
        if realization.object_type != CONNECTOR_NAME || realization.object_id.is_empty() {
            return None;
        }
        let link = match parse_object_id(&realization.object_id) {
            Ok(tx) => explorer_tx_url(tx.network_id, tx.transaction_hash).unwrap_or_default(),
            Err(e) => {
                // Degrade to an empty link, same as an unknown chain id
                debug!("unresolvable evm object id {:?}: {e}", realization.object_id);
                String::new()
            }
        };
        realization.link = Some(link.clone());
        Some(link)
    }
}

/// Registers the EVM user-actions extension into the engagement-center
/// actions point.
pub fn register_user_actions(registry: &mut ExtensionRegistry) {
    registry.register(
        ENGAGEMENT_CENTER_ACTIONS,
        USER_ACTIONS_KEY,
        ActionExtension {
            action_type: CONNECTOR_NAME.to_string(),
            rank: EVM_ACTION_RANK,
            image: EVM_ACTION_IMAGE.to_string(),
            is_extensible: true,
            resolver: Arc::new(EvmTransferResolver),
        },
    );
}
