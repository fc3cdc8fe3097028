/// Construction-time configuration for a database, covering the paged
/// file, the B-link-tree and the data-page store. Mirrors the options
/// table in the specification; defaults follow `spiderdb`'s
/// `file_config` plus sensible tree/storage defaults.
#[derive(Debug, Clone, Copy)]
pub struct SpiderConfig {
    pub file_header_size: u32,
    pub page_header_size: u32,
    pub page_size: u32,

    pub min_keys_on_each_node: u32,
    pub max_keys_on_each_node: u32,
    pub n_cached_nodes: usize,

    pub n_cached_data_pages: usize,
    pub max_available_pages: usize,
    pub min_available_space: u32,
    pub max_empty_values_on_each_page: u32,
}

impl Default for SpiderConfig {
    fn default() -> Self {
        SpiderConfig {
            file_header_size: 1 << 12,
            page_header_size: 1 << 7,
            page_size: 1 << 14,

            min_keys_on_each_node: 4,
            max_keys_on_each_node: 64,
            n_cached_nodes: 1024,

            n_cached_data_pages: 1024,
            max_available_pages: 256,
            min_available_space: 64,
            max_empty_values_on_each_page: 16,
        }
    }
}

impl SpiderConfig {
    /// Payload budget available per page once the header is reserved.
    pub fn work_size(&self) -> u32 {
        self.page_size - self.page_header_size
    }

    /// Maximum key length such that at least `min_keys_on_each_node` keys
    /// fit on one node, per the External Interfaces' key constraint.
    pub fn max_key_len(&self) -> u32 {
        self.work_size() / self.min_keys_on_each_node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_size_subtracts_header() {
        let config = SpiderConfig::default();
        assert_eq!(config.work_size(), config.page_size - config.page_header_size);
    }

    #[test]
    fn max_key_len_is_bounded_by_min_keys() {
        let config = SpiderConfig::default();
        assert!(config.max_key_len() * config.min_keys_on_each_node <= config.work_size());
    }
}
