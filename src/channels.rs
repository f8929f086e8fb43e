/// Channel registry for the household water monitoring service.
///
/// Wraps the channel list from meters.toml in a validated registry with
/// lookup and role helpers. This is the single source of truth for channel
/// ids — all other modules should reference channels from here rather than
/// hardcoding ids.

use crate::config::{self, ChannelConfig};

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Validated view over the configured channels.
///
/// Construction guarantees: at least one channel, unique ids, exactly one
/// main meter (the config loader enforces the rest of the field-level
/// validation).
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    channels: Vec<ChannelConfig>,
}

impl ChannelRegistry {
    /// Builds a registry from an already-validated channel list.
    ///
    /// # Panics
    /// Panics on duplicate channel ids or a main-meter count other than
    /// one — the invariants `main()` and the balance layer lean on.
    /// Field-level validation is handled by `config::parse_config` before
    /// the list reaches this point.
    pub fn new(channels: Vec<ChannelConfig>) -> Self {
        let mut seen = std::collections::HashSet::new();
        for channel in &channels {
            if !seen.insert(channel.channel_id.clone()) {
                panic!("duplicate channel id '{}' in registry", channel.channel_id);
            }
        }
        let mains = channels.iter().filter(|c| c.is_main()).count();
        if mains != 1 {
            panic!("registry requires exactly one main channel, found {}", mains);
        }
        Self { channels }
    }

    /// Loads the registry from meters.toml.
    pub fn load() -> Self {
        Self::new(config::load_config().channels)
    }

    /// The principal inflow meter.
    pub fn main(&self) -> &ChannelConfig {
        self.channels
            .iter()
            .find(|c| c.is_main())
            .expect("registry invariant: exactly one main channel")
    }

    /// All branch sensors, in registry order.
    pub fn branches(&self) -> Vec<&ChannelConfig> {
        self.channels.iter().filter(|c| !c.is_main()).collect()
    }

    /// Looks up a channel by id. Returns `None` if not found.
    pub fn find(&self, channel_id: &str) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.channel_id == channel_id)
    }

    /// Returns all channel ids, suitable for iteration in daemon loops.
    pub fn all_channel_ids(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.channel_id.as_str()).collect()
    }

    pub fn channels(&self) -> &[ChannelConfig] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> ChannelRegistry {
        ChannelRegistry::load()
    }

    #[test]
    fn test_all_channel_ids_are_valid_format() {
        // Channel ids end up in SQL keys, URLs (/channel/{id}), and CSV
        // headers; anything beyond lowercase alphanumerics would need
        // escaping in all three places.
        for channel in test_registry().channels() {
            assert!(
                channel
                    .channel_id
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()),
                "channel id for '{}' should be lowercase alphanumeric, got '{}'",
                channel.label,
                channel.channel_id
            );
        }
    }

    #[test]
    fn test_no_duplicate_channel_ids() {
        let mut seen = std::collections::HashSet::new();
        for channel in test_registry().channels() {
            assert!(
                seen.insert(channel.channel_id.clone()),
                "duplicate channel id '{}' found in registry",
                channel.channel_id
            );
        }
    }

    #[test]
    fn test_registry_contains_all_expected_channels() {
        let expected = [
            "main", // street inlet meter
            "s1",   // Banheiro
            "s2",   // Cozinha / Maquina
            "s3",   // Jardim
            "s4",   // Lavanderia
        ];
        let registry = test_registry();
        for expected_id in &expected {
            assert!(
                registry.find(expected_id).is_some(),
                "registry missing expected channel '{}'",
                expected_id
            );
        }
    }

    #[test]
    fn test_find_returns_correct_entry() {
        let registry = test_registry();
        let channel = registry.find("s1").expect("s1 should be in registry");
        assert_eq!(channel.channel_id, "s1");
        assert!(channel.label.contains("Banheiro"));
    }

    #[test]
    fn test_find_returns_none_for_unknown_id() {
        assert!(test_registry().find("s99").is_none());
    }

    #[test]
    fn test_all_channel_ids_helper_matches_registry_length() {
        let registry = test_registry();
        assert_eq!(registry.all_channel_ids().len(), registry.len());
    }

    #[test]
    fn test_main_and_branches_partition_the_registry() {
        let registry = test_registry();
        assert_eq!(registry.branches().len() + 1, registry.len());
        assert!(registry.main().is_main());
        assert!(registry.branches().iter().all(|c| !c.is_main()));
    }

    #[test]
    #[should_panic(expected = "duplicate channel id")]
    fn test_new_rejects_duplicate_ids() {
        let config = config::load_config();
        let mut channels = config.channels.clone();
        channels.push(channels[0].clone());
        ChannelRegistry::new(channels);
    }
}
