use std::f32::consts::FRAC_PI_2;
use std::time::Duration;

use glam::{Vec2, Vec4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sparkle::{Particle, ParticleBehavior, ParticleSystem};

/// Half-angle of the spray cone around straight up, in radians.
const SPREAD: f32 = 0.45;

/// Sprays particles upward from a point at a fixed rate.
pub struct Fountain {
    rate: f32,
    lifetime: f32,
    accumulator: f32,
    rng: StdRng,
}

impl Fountain {
    pub fn new(rate: f32, lifetime: Duration, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rate: rate.max(0.0),
            lifetime: lifetime.as_secs_f32(),
            accumulator: 0.0,
            rng,
        }
    }

    /// How many particles `dt` seconds are worth; fractions carry over.
    pub fn due(&mut self, dt: f32) -> usize {
        if dt <= 0.0 {
            return 0;
        }
        self.accumulator += self.rate * dt;
        let count = self.accumulator.floor();
        self.accumulator -= count;
        count as usize
    }

    /// Spawns the particles due after `dt` seconds at `origin`, scaled to a
    /// viewport `height` units tall. Returns how many were spawned.
    pub fn emit(&mut self, system: &mut ParticleSystem, dt: f32, origin: Vec2, height: f32) -> usize {
        let count = self.due(dt);
        if count == 0 {
            return 0;
        }
        let speed = height.max(1.0) * 0.9;
        let lifetime = self.lifetime;
        let rng = &mut self.rng;
        system.spawn(count, &mut |particle: &mut Particle| {
            let angle = FRAC_PI_2 + rng.gen_range(-SPREAD..=SPREAD);
            let magnitude = speed * rng.gen_range(0.6..=1.0);
            let life = lifetime * rng.gen_range(0.7..=1.0);
            let warmth = rng.gen_range(0.0..=1.0);

            particle.position = origin;
            particle.velocity = Vec2::from_angle(angle) * magnitude;
            particle.life = life;
            particle.max_life = life;
            particle.size = rng.gen_range(4.0..=10.0);
            particle.damping = 0.1;
            particle.rotation = rng.gen_range(0.0..std::f32::consts::TAU);
            particle.rotation_velocity = rng.gen_range(-2.0..=2.0);
            particle.color = Vec4::new(1.0, 0.45 + 0.4 * warmth, 0.15 + 0.2 * warmth, 1.0);
            particle.behavior = ParticleBehavior::FADE_ALPHA | ParticleBehavior::FADE_SIZE;
            particle.size_over_life = (1.0, 0.2);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fractional_emissions_accumulate() {
        let mut fountain = Fountain::new(10.0, Duration::from_secs(1), Some(7));
        let total: usize = (0..10).map(|_| fountain.due(0.05)).sum();
        assert_eq!(total, 5);
        assert_eq!(fountain.due(0.0), 0);
    }

    #[test]
    fn emitted_particles_start_at_origin_heading_up() {
        let mut fountain = Fountain::new(100.0, Duration::from_secs(2), Some(1));
        let mut system = ParticleSystem::with_capacity(16);
        let origin = Vec2::new(50.0, 10.0);

        let spawned = fountain.emit(&mut system, 0.1, origin, 200.0);

        assert_eq!(spawned, 10);
        for particle in system.particles() {
            assert_eq!(particle.position, origin);
            assert!(particle.velocity.y > 0.0);
            assert!(particle.life > 0.0 && particle.life <= 2.0);
            assert_eq!(particle.life, particle.max_life);
        }
    }

    #[test]
    fn seeded_fountains_are_reproducible() {
        let run = || {
            let mut fountain = Fountain::new(50.0, Duration::from_secs(1), Some(42));
            let mut system = ParticleSystem::with_capacity(8);
            fountain.emit(&mut system, 0.1, Vec2::ZERO, 100.0);
            system.particles().to_vec()
        };
        assert_eq!(run(), run());
    }
}
