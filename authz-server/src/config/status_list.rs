use confique::Config;

/// Token status list settings
#[derive(Debug, Config, Clone)]
pub struct StatusListConfig {
    /// Allocate status indices for access and ID tokens (default: true)
    #[config(env = "AUTHZ_STATUS_LIST_ENABLED", default = true)]
    pub enabled: bool,

    /// Bits per entry: 1, 2, 4 or 8 (default: 2)
    #[config(env = "AUTHZ_STATUS_LIST_BITS", default = 2)]
    pub bits: u8,

    /// Total number of indices the list can hold; the bitmap may not exceed 4 MiB (default: 1000000)
    #[config(env = "AUTHZ_STATUS_LIST_CAPACITY", default = 1000000)]
    pub capacity: u64,

    /// Indices reserved from the store at a time (default: 100)
    #[config(env = "AUTHZ_STATUS_LIST_BLOCK_SIZE", default = 100)]
    pub block_size: u64,

    /// URI placed in the `status` claim; defaults to `{issuer}/status_list`
    #[config(env = "AUTHZ_STATUS_LIST_URI")]
    pub uri: Option<String>,

    /// Lifetime of the status list token in seconds (default: 600)
    #[config(env = "AUTHZ_STATUS_LIST_TOKEN_LIFETIME", default = 600)]
    pub token_lifetime: u64,
}
