//! Fixed-capacity, hash-bucketed key/value cache with per-bucket oldest eviction.
//!
//! Keys hash into one of `num_buckets` small buckets. A full bucket replaces
//! its oldest entry, so memory stays fixed and a hot bucket can evict early
//! while other buckets still have room. Used for "already forwarded" status
//! IDs and for memoizing media uploads.

use thiserror::Error;

/// Construction-time configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("number of buckets has to be >= 1")]
    NoBuckets,
    #[error("bucket capacity has to be >= 1")]
    ZeroBucketCapacity,
    #[error("total capacity {capacity} does not fit a {bits}-bit insertion sequence")]
    CapacityExceedsSequence { capacity: usize, bits: u32 },
}

/// Unsigned integer used as the rolling insertion sequence.
///
/// Ages are measured as `clock - seq` with wrapping arithmetic, so the
/// comparison stays correct when the counter rolls over.
pub trait Sequence: Copy + Ord + Default + std::fmt::Debug {
    const BITS: u32;

    fn successor(self) -> Self;

    /// Distance from `earlier` up to `self`, modulo the type width.
    fn since(self, earlier: Self) -> Self;

    fn from_index(index: usize) -> Self;
}

macro_rules! impl_sequence {
    ($($t:ty),*) => {
        $(
            impl Sequence for $t {
                const BITS: u32 = <$t>::BITS;

                fn successor(self) -> Self {
                    self.wrapping_add(1)
                }

                fn since(self, earlier: Self) -> Self {
                    self.wrapping_sub(earlier)
                }

                fn from_index(index: usize) -> Self {
                    index as $t
                }
            }
        )*
    };
}

impl_sequence!(u8, u16, u32, u64);

#[derive(Debug, Clone)]
struct Node<V, S> {
    key: String,
    value: V,
    seq: S,
}

/// Bounded recency cache. See the module docs for the eviction rules.
#[derive(Debug, Clone)]
pub struct BoundedCache<V, S: Sequence = u64> {
    buckets: Vec<Vec<Node<V, S>>>,
    bucket_capacity: usize,
    /// Sequence number handed to the next inserted entry.
    clock: S,
    len: usize,
}

impl<V> BoundedCache<V> {
    /// Create a cache with a 64-bit insertion sequence.
    pub fn new(num_buckets: usize, bucket_capacity: usize) -> Result<Self, CacheError> {
        Self::with_sequence(num_buckets, bucket_capacity)
    }
}

impl<V, S: Sequence> BoundedCache<V, S> {
    /// Create a cache whose insertion sequence is `S` wide.
    pub fn with_sequence(num_buckets: usize, bucket_capacity: usize) -> Result<Self, CacheError> {
        if num_buckets < 1 {
            return Err(CacheError::NoBuckets);
        }
        if bucket_capacity < 1 {
            return Err(CacheError::ZeroBucketCapacity);
        }
        let capacity = num_buckets.saturating_mul(bucket_capacity);
        if S::BITS < usize::BITS && capacity >= (1usize << S::BITS) {
            return Err(CacheError::CapacityExceedsSequence {
                capacity,
                bits: S::BITS,
            });
        }

        let buckets = (0..num_buckets)
            .map(|_| Vec::with_capacity(bucket_capacity))
            .collect();

        Ok(Self {
            buckets,
            bucket_capacity,
            clock: S::default(),
            len: 0,
        })
    }

    /// Look up `key`. Never evicts or reorders anything.
    pub fn get(&self, key: &str) -> Option<&V> {
        self.buckets[self.bucket_index(key)]
            .iter()
            .find(|node| node.key == key)
            .map(|node| &node.value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or overwrite `key`. Always succeeds.
    ///
    /// An existing key only has its value replaced; its age is unchanged.
    pub fn set(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        let index = self.bucket_index(&key);

        if let Some(node) = self.buckets[index].iter_mut().find(|node| node.key == key) {
            node.value = value;
            return;
        }

        let node = Node {
            key,
            value,
            seq: self.clock,
        };

        if self.buckets[index].len() < self.bucket_capacity {
            self.buckets[index].push(node);
            self.len += 1;
        } else {
            let clock = self.clock;
            let bucket = &mut self.buckets[index];
            let oldest = bucket
                .iter()
                .enumerate()
                .max_by_key(|(_, n)| clock.since(n.seq))
                .map(|(i, _)| i)
                .unwrap_or(0);
            bucket[oldest] = node;
        }

        self.clock = self.clock.successor();
        if self.clock == S::default() {
            self.renumber();
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket_capacity(&self) -> usize {
        self.bucket_capacity
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Total capacity: `num_buckets * bucket_capacity`.
    pub fn capacity(&self) -> usize {
        self.buckets.len() * self.bucket_capacity
    }

    /// Fill ratio between 0.0 and 1.0.
    pub fn load(&self) -> f32 {
        self.len as f32 / self.capacity() as f32
    }

    fn bucket_index(&self, key: &str) -> usize {
        jenkins_one_at_a_time(key.as_bytes()) as usize % self.buckets.len()
    }

    /// Compress the sequence space after a rollover: entries get 0..len in
    /// age order and the clock restarts right after them.
    fn renumber(&mut self) {
        let clock = self.clock;
        let mut order: Vec<(S, usize, usize)> = self
            .buckets
            .iter()
            .enumerate()
            .flat_map(|(b, bucket)| {
                bucket
                    .iter()
                    .enumerate()
                    .map(move |(i, node)| (clock.since(node.seq), b, i))
            })
            .collect();
        // Largest age first, so the oldest entry gets sequence 0.
        order.sort_by(|a, b| b.0.cmp(&a.0));

        for (rank, (_, b, i)) in order.iter().enumerate() {
            self.buckets[*b][*i].seq = S::from_index(rank);
        }
        self.clock = S::from_index(order.len());
    }
}

/// Bob Jenkins' one-at-a-time hash.
fn jenkins_one_at_a_time(bytes: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for &b in bytes {
        h = h.wrapping_add(u32::from(b));
        h = h.wrapping_add(h << 10);
        h ^= h >> 6;
    }
    h = h.wrapping_add(h << 3);
    h ^= h >> 11;
    h = h.wrapping_add(h << 15);
    h
}
