//! Fault injection for outbound datagrams.
//!
//! Real networks drop and duplicate datagrams. To exercise retransmission and congestion control
//! without depending on actual network conditions, a connection may be configured with a
//! [`LinkConfig`] which is applied to every datagram it sends.
//!
//! | Fault        | Description                                          |
//! |--------------|------------------------------------------------------|
//! | Loss         | Drop a datagram with probability `loss_rate`.        |
//! | Duplication  | Send a datagram twice with probability `duplicate_rate`. |
//!
//! The default configuration is a transparent pass-through.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Fault model for a simulated link. Probabilities are in the range `[0.0, 1.0]`.
#[derive(Clone, Debug, Default)]
pub struct LinkConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
    /// Seed for the fault generator, so that failures are reproducible. A random seed is used
    /// when `None`.
    pub seed: Option<u64>,
}

impl LinkConfig {
    pub fn is_transparent(&self) -> bool {
        self.loss_rate == 0.0 && self.duplicate_rate == 0.0
    }

    pub(crate) fn validate(&self) {
        assert!(
            (0.0..=1.0).contains(&self.loss_rate),
            "invalid link configuration: loss_rate outside [0, 1]"
        );
        assert!(
            (0.0..=1.0).contains(&self.duplicate_rate),
            "invalid link configuration: duplicate_rate outside [0, 1]"
        );
    }
}

/// What to do with an outbound datagram.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    Drop,
    Send,
    Duplicate,
}

impl Verdict {
    /// Number of copies to put on the wire.
    pub fn copies(self) -> usize {
        match self {
            Verdict::Drop => 0,
            Verdict::Send => 1,
            Verdict::Duplicate => 2,
        }
    }
}

pub struct LossyLink {
    config: LinkConfig,
    rng: StdRng,
}

impl LossyLink {
    pub fn new(config: LinkConfig) -> Self {
        config.validate();

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self { config, rng }
    }

    pub fn judge(&mut self) -> Verdict {
        if self.rng.gen_bool(self.config.loss_rate) {
            Verdict::Drop
        } else if self.rng.gen_bool(self.config.duplicate_rate) {
            Verdict::Duplicate
        } else {
            Verdict::Send
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transparent_by_default() {
        let config = LinkConfig::default();
        assert!(config.is_transparent());

        let mut link = LossyLink::new(config);

        for _ in 0..1000 {
            assert_eq!(link.judge(), Verdict::Send);
        }
    }

    #[test]
    fn total_loss() {
        let mut link = LossyLink::new(LinkConfig {
            loss_rate: 1.0,
            duplicate_rate: 1.0,
            seed: Some(1),
        });

        for _ in 0..1000 {
            assert_eq!(link.judge().copies(), 0);
        }
    }

    #[test]
    fn seeded_links_agree() {
        let config = LinkConfig {
            loss_rate: 0.3,
            duplicate_rate: 0.1,
            seed: Some(42),
        };

        let mut a = LossyLink::new(config.clone());
        let mut b = LossyLink::new(config);

        let mut dropped = 0;

        for _ in 0..1000 {
            let verdict = a.judge();
            assert_eq!(verdict, b.judge());

            if verdict == Verdict::Drop {
                dropped += 1;
            }
        }

        // Loose bounds around the expected 300
        assert!(dropped > 200 && dropped < 400, "dropped {}", dropped);
    }

    #[test]
    #[should_panic]
    fn rejects_invalid_probability() {
        LossyLink::new(LinkConfig {
            loss_rate: 1.5,
            ..Default::default()
        });
    }
}
