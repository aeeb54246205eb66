use serde::{Deserialize, Serialize};

/// Protocol era determining opcode availability and gas rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Revision {
    Frontier,
    Homestead,
    Tangerine,
    Spurious,
    Byzantium,
    Constantinople,
    Petersburg,
    Istanbul,
    Berlin,
    London,
    Paris,
    Shanghai,
}

impl Revision {
    pub const LATEST: Self = Self::Shanghai;

    pub const ALL: [Self; 12] = [
        Self::Frontier,
        Self::Homestead,
        Self::Tangerine,
        Self::Spurious,
        Self::Byzantium,
        Self::Constantinople,
        Self::Petersburg,
        Self::Istanbul,
        Self::Berlin,
        Self::London,
        Self::Paris,
        Self::Shanghai,
    ];
}

/// Fork activation schedule, stored as JSON in the Config table keyed by the
/// canonical hash of block zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainConfig {
    pub chain_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homestead_block: Option<u64>,
    #[serde(rename = "eip150Block", skip_serializing_if = "Option::is_none")]
    pub tangerine_block: Option<u64>,
    #[serde(rename = "eip155Block", skip_serializing_if = "Option::is_none")]
    pub spurious_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub byzantium_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constantinople_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub petersburg_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub istanbul_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub berlin_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub london_block: Option<u64>,
    #[serde(rename = "mergeNetsplitBlock", skip_serializing_if = "Option::is_none")]
    pub paris_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shanghai_block: Option<u64>,
}

impl ChainConfig {
    /// The revision active at `block`.
    #[must_use]
    pub fn revision(&self, block: u64) -> Revision {
        let schedule = [
            (self.shanghai_block, Revision::Shanghai),
            (self.paris_block, Revision::Paris),
            (self.london_block, Revision::London),
            (self.berlin_block, Revision::Berlin),
            (self.istanbul_block, Revision::Istanbul),
            (self.petersburg_block, Revision::Petersburg),
            (self.constantinople_block, Revision::Constantinople),
            (self.byzantium_block, Revision::Byzantium),
            (self.spurious_block, Revision::Spurious),
            (self.tangerine_block, Revision::Tangerine),
            (self.homestead_block, Revision::Homestead),
        ];
        for (activation, revision) in schedule {
            if let Some(activation) = activation {
                if block >= activation {
                    return revision;
                }
            }
        }
        Revision::Frontier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mainnet_like() -> ChainConfig {
        ChainConfig {
            chain_id: 1,
            homestead_block: Some(1_150_000),
            tangerine_block: Some(2_463_000),
            spurious_block: Some(2_675_000),
            byzantium_block: Some(4_370_000),
            constantinople_block: Some(7_280_000),
            petersburg_block: Some(7_280_000),
            istanbul_block: Some(9_069_000),
            berlin_block: Some(12_244_000),
            london_block: Some(12_965_000),
            ..ChainConfig::default()
        }
    }

    #[test]
    fn picks_the_newest_activated_fork() {
        let config = mainnet_like();
        assert_eq!(config.revision(0), Revision::Frontier);
        assert_eq!(config.revision(1_150_000), Revision::Homestead);
        assert_eq!(config.revision(5_405_095), Revision::Byzantium);
        assert_eq!(config.revision(9_069_000), Revision::Istanbul);
        assert_eq!(config.revision(99_000_000), Revision::London);
    }

    #[test]
    fn parses_config_table_json() {
        let raw = r#"{
            "chainId": 5,
            "homesteadBlock": 0,
            "eip150Block": 0,
            "eip155Block": 0,
            "byzantiumBlock": 0,
            "constantinopleBlock": 0,
            "petersburgBlock": 0,
            "istanbulBlock": 1561651
        }"#;
        let config: ChainConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.chain_id, 5);
        assert_eq!(config.revision(1_561_650), Revision::Petersburg);
        assert_eq!(config.revision(1_561_651), Revision::Istanbul);
    }
}
