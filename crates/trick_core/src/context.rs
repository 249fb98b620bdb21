use rand::{rngs::StdRng, SeedableRng};

/// Whether the graph is training (dropout active, batch statistics used
/// and running statistics updated) or evaluating, and the generator used
/// for weight initialisation and dropout masks.
pub struct ExecutionContext {
    training: bool,
    rng: StdRng,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::seeded(0)
    }
}

impl ExecutionContext {
    pub fn seeded(seed: u64) -> Self {
        Self { training: true, rng: StdRng::seed_from_u64(seed) }
    }

    pub fn training(&self) -> bool {
        self.training
    }

    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}
