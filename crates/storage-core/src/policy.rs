/// Which file to pick when capacity must be reclaimed.
///
/// `Fifo`, `Lru`, and `Lfu` mirror the original storage server's three
/// policies; `Lw` ("least-weighted") is this project's own addition, reusing
/// the same selection machinery as `Lfu` but with a different usage-counter
/// update table (see [`crate::eviction`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EvictionPolicy {
    #[default]
    Fifo,
    Lru,
    Lfu,
    Lw,
}

impl std::str::FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FIFO" => Ok(Self::Fifo),
            "LRU" => Ok(Self::Lru),
            "LFU" => Ok(Self::Lfu),
            "LW" => Ok(Self::Lw),
            other => Err(format!("'{other}' is not a recognized eviction policy")),
        }
    }
}
