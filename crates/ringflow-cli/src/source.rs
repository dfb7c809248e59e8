//! Random vector source for the vector-sum demo

use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ringflow_stream::{Field, Item};

/// Emits pairs `A`, `B` whose element-wise sum is 1 after the first element
///
/// The first element of `A` is a running counter and that of `B` is 0, so
/// `C[0]` numbers the items. Each item also carries its creation time in
/// nanoseconds since `epoch`.
pub struct RandomVecSource {
    rng: StdRng,
    max_size: usize,
    count: i64,
    next_id: u64,
    epoch: Instant,
}

impl RandomVecSource {
    pub fn new(max_size: usize, epoch: Instant) -> Self {
        Self::with_rng(StdRng::from_entropy(), max_size, epoch)
    }

    pub fn seeded(seed: u64, max_size: usize, epoch: Instant) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), max_size, epoch)
    }

    fn with_rng(rng: StdRng, max_size: usize, epoch: Instant) -> Self {
        Self {
            rng,
            max_size: max_size.max(2),
            count: 0,
            next_id: 0,
            epoch,
        }
    }

    pub fn next_item(&mut self) -> Item {
        let size = self.rng.gen_range(1..self.max_size);
        let mut a = Vec::with_capacity(size);
        let mut b = Vec::with_capacity(size);

        a.push(self.count);
        b.push(0);
        self.count += 1;

        for _ in 1..size {
            let value = self.rng.gen_range(0..self.max_size as i64);
            a.push(value + 1);
            b.push(-value);
        }

        let id = self.next_id;
        self.next_id += 1;
        let timestamp = self.epoch.elapsed().as_nanos() as i64;
        Item::new(
            id,
            vec![Field::IntList(a), Field::IntList(b), Field::Int(timestamp)],
        )
    }
}

impl Iterator for RandomVecSource {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        Some(self.next_item())
    }
}
