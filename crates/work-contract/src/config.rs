/// Configuration for a work-contract group.
#[derive(Debug, Clone, Copy)]
pub struct GroupConfig {
    /// Contract capacity; always a power of two in
    /// `[MIN_CAPACITY, MAX_CAPACITY]`.
    capacity: u64,
    /// Number of signal-tree sub-trees the capacity is partitioned into.
    sub_trees: usize,
    /// Enable metrics collection (slight overhead).
    enable_metrics: bool,
}

impl GroupConfig {
    /// Smallest supported group capacity.
    pub const MIN_CAPACITY: u64 = 256;
    /// Largest supported group capacity (16M slots).
    pub const MAX_CAPACITY: u64 = 1 << 24;

    /// Creates a configuration for at least `capacity` contracts.
    ///
    /// The capacity is rounded up to the smallest supported power of two and
    /// the sub-tree count is derived from it (>= 64 leaves per sub-tree, at
    /// most 64 sub-trees).
    ///
    /// # Panics
    ///
    /// Panics if the rounded capacity exceeds [`Self::MAX_CAPACITY`].
    pub const fn new(capacity: u64) -> Self {
        let rounded = round_up_capacity(capacity);
        assert!(rounded <= Self::MAX_CAPACITY, "capacity exceeds 16M contracts");
        Self {
            capacity: rounded,
            sub_trees: default_sub_trees(rounded),
            enable_metrics: false,
        }
    }

    /// Overrides the sub-tree count. More sub-trees divide contention under
    /// many workers; fewer keep the footprint small.
    ///
    /// # Panics
    ///
    /// Panics unless `sub_trees` is a power of two leaving at least 64
    /// leaves per sub-tree.
    pub const fn with_sub_trees(mut self, sub_trees: usize) -> Self {
        assert!(sub_trees.is_power_of_two(), "sub_trees must be a power of two");
        assert!(
            self.capacity / (sub_trees as u64) >= 64,
            "each sub-tree must hold at least 64 leaves"
        );
        self.sub_trees = sub_trees;
        self
    }

    /// Enables or disables metrics collection.
    pub const fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    /// Rounded contract capacity.
    #[inline]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Sub-tree count of both signal trees.
    #[inline]
    pub const fn sub_trees(&self) -> usize {
        self.sub_trees
    }

    /// Whether metrics collection is enabled.
    #[inline]
    pub const fn enable_metrics(&self) -> bool {
        self.enable_metrics
    }
}

impl Default for GroupConfig {
    /// 4096 contracts, sub-tree count derived, metrics off.
    fn default() -> Self {
        Self::new(1 << 12)
    }
}

const fn round_up_capacity(requested: u64) -> u64 {
    let floored = if requested < GroupConfig::MIN_CAPACITY {
        GroupConfig::MIN_CAPACITY
    } else {
        requested
    };
    floored.next_power_of_two()
}

const fn default_sub_trees(capacity: u64) -> usize {
    let limit = (capacity / 64) as usize;
    if limit > 64 {
        64
    } else {
        limit
    }
}

/// Small-footprint configuration (256 slots, minimal tree storage).
pub const LOW_FOOTPRINT_CONFIG: GroupConfig = GroupConfig::new(256);

/// High-fan-out configuration (64K slots, contention split 64 ways).
pub const HIGH_FANOUT_CONFIG: GroupConfig = GroupConfig::new(1 << 16).with_sub_trees(64);
