#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub packets_duplicated: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Fault-injection settings. Percentages are in the range `0.0..=100.0`.
#[derive(Debug, Clone, Default)]
pub struct FaultModel {
    pub enabled: bool,
    pub loss_percent: f32,
    pub duplicate_percent: f32,
    pub reorder_percent: f32,
}

impl FaultModel {
    pub fn lossy(loss_percent: f32) -> Self {
        Self {
            enabled: true,
            loss_percent,
            ..Default::default()
        }
    }

    pub fn should_drop(&self, rng: &mut FaultRng) -> bool {
        self.enabled && roll(rng, self.loss_percent)
    }

    pub fn should_duplicate(&self, rng: &mut FaultRng) -> bool {
        self.enabled && roll(rng, self.duplicate_percent)
    }

    pub fn should_reorder(&self, rng: &mut FaultRng) -> bool {
        self.enabled && roll(rng, self.reorder_percent)
    }
}

fn roll(rng: &mut FaultRng, percent: f32) -> bool {
    percent > 0.0 && rng.percent() < percent
}

/// Small xorshift generator so a fault run can be replayed from its seed.
#[derive(Debug, Clone)]
pub struct FaultRng {
    state: u64,
}

impl FaultRng {
    pub fn seeded(seed: u64) -> Self {
        // xorshift never leaves the all-zero state
        let state = if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed };
        Self { state }
    }

    pub fn from_entropy() -> Self {
        Self::seeded(rand_u64())
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    pub fn percent(&mut self) -> f32 {
        (self.next_u64() % 10_000) as f32 / 100.0
    }
}

pub fn rand_u64() -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::time::Instant;

    let mut hasher = DefaultHasher::new();
    Instant::now().hash(&mut hasher);
    hasher.finish()
}
