//! Static circuit registry and chain configuration

/// A circuit the prover understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitInfo {
    /// Circuit identifier, used on the wire and as a key everywhere
    pub id: &'static str,
    /// Human-readable name
    pub name: &'static str,
    /// One-line description surfaced by get_supported_circuits
    pub description: &'static str,
    /// Whether the circuit takes a country list and inclusion flag
    pub country_fields: bool,
}

/// The supported circuits, in registry order
pub const CIRCUITS: &[CircuitInfo] = &[
    CircuitInfo {
        id: "coinbase_attestation",
        name: "Coinbase KYC Attestation",
        description: "Proves the holder owns a Coinbase-verified account without revealing the address",
        country_fields: false,
    },
    CircuitInfo {
        id: "coinbase_country_attestation",
        name: "Coinbase Country Attestation",
        description: "Proves the holder's attested country is (or is not) in a given set",
        country_fields: true,
    },
];

/// Look up a circuit by id
pub fn circuit(id: &str) -> Option<&'static CircuitInfo> {
    CIRCUITS.iter().find(|c| c.id == id)
}

/// Whether a circuit id names the country variant
pub fn is_country_circuit(id: &str) -> bool {
    circuit(id).map(|c| c.country_fields).unwrap_or(false)
}

/// Chain configuration with verifier deployments
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Chain id (EIP-155)
    pub chain_id: u64,
    /// Network name
    pub name: String,
    /// Block explorer base URL
    pub explorer_base: String,
    /// USDC contract address
    pub usdc_contract: String,
    /// Whether this is a testnet
    pub is_testnet: bool,
}

impl ChainConfig {
    /// Base mainnet configuration
    pub fn base_mainnet() -> Self {
        Self {
            chain_id: 8453,
            name: "base".to_string(),
            explorer_base: "https://basescan.org".to_string(),
            usdc_contract: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_string(),
            is_testnet: false,
        }
    }

    /// Base Sepolia testnet configuration
    pub fn base_sepolia() -> Self {
        Self {
            chain_id: 84532,
            name: "base-sepolia".to_string(),
            explorer_base: "https://sepolia.basescan.org".to_string(),
            usdc_contract: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".to_string(),
            is_testnet: true,
        }
    }

    /// Get chain config by chain id
    pub fn from_chain_id(chain_id: u64) -> Option<Self> {
        match chain_id {
            8453 => Some(Self::base_mainnet()),
            84532 => Some(Self::base_sepolia()),
            _ => None,
        }
    }

    /// Get chain config by network name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "base" => Some(Self::base_mainnet()),
            "base-sepolia" => Some(Self::base_sepolia()),
            _ => None,
        }
    }

    /// Explorer URL for a contract address on this chain
    pub fn explorer_address_url(&self, address: &str) -> String {
        format!("{}/address/{}", self.explorer_base, address)
    }
}

/// Verifier contract address for a `(chain_id, circuit_id)` pair
pub fn verifier_address(chain_id: u64, circuit_id: &str) -> Option<&'static str> {
    match (chain_id, circuit_id) {
        (84532, "coinbase_attestation") => Some("0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC"),
        (84532, "coinbase_country_attestation") => {
            Some("0x90F79bf6EB2c4f870365E785982E1f101E93b906")
        }
        (8453, "coinbase_attestation") => Some("0x2546BcD3c84621e976D8185a91A922aE77ECEc30"),
        (8453, "coinbase_country_attestation") => {
            Some("0xbDA5747bFD65F08deb54cb465eB87D40e51B197E")
        }
        _ => None,
    }
}
