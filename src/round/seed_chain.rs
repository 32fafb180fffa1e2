//! Hash-chain commitment material for provably-fair rounds.
//!
//! Seeds satisfy `seed[i] = SHA256(seed[i + 1])`. The published commitment
//! is `SHA256(seed[0])` and never changes for the lifetime of a chain.
//! Seeds are consumed in derived order, so every revealed seed hashes to a
//! value that was published before the round that used it.

use crate::errors::SeedChainError;
use crate::round::fairness::seed_hash;
use rand::RngCore;

pub struct SeedChain {
    seeds: Vec<[u8; 32]>,
    cursor: usize,
    commitment: [u8; 32],
}

impl SeedChain {
    /// Build a chain of `length` seeds from a fresh random root and publish
    /// its commitment.
    pub fn generate(length: usize) -> Result<Self, SeedChainError> {
        if length == 0 {
            return Err(SeedChainError::EmptyChain);
        }

        let mut root = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut root);

        let mut seeds = Vec::with_capacity(length);
        let mut current = root;
        for _ in 0..length {
            seeds.push(current);
            current = seed_hash(&current);
        }
        // Most-derived seed first, so seeds[i] == SHA256(seeds[i + 1]).
        seeds.reverse();
        let commitment = seed_hash(&seeds[0]);

        Ok(Self {
            seeds,
            cursor: 0,
            commitment,
        })
    }

    /// The next unrevealed seed, without consuming it.
    pub fn current_seed(&self) -> Result<[u8; 32], SeedChainError> {
        self.seeds
            .get(self.cursor)
            .copied()
            .ok_or(SeedChainError::Exhausted {
                consumed: self.cursor,
            })
    }

    /// Consume one seed. Called exactly once per completed round.
    pub fn advance(&mut self) -> Result<(), SeedChainError> {
        if self.cursor >= self.seeds.len() {
            return Err(SeedChainError::Exhausted {
                consumed: self.cursor,
            });
        }
        self.cursor += 1;
        Ok(())
    }

    /// The published head hash, immutable for the lifetime of the chain.
    pub fn commitment(&self) -> [u8; 32] {
        self.commitment
    }

    /// Seeds left before the chain must be rotated.
    pub fn remaining(&self) -> usize {
        self.seeds.len() - self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_links_hash_backwards() {
        let chain = SeedChain::generate(16).unwrap();
        for i in 0..15 {
            assert_eq!(chain.seeds[i], seed_hash(&chain.seeds[i + 1]));
        }
    }

    #[test]
    fn test_commitment_covers_first_seed() {
        let chain = SeedChain::generate(4).unwrap();
        assert_eq!(chain.commitment(), seed_hash(&chain.seeds[0]));
    }

    #[test]
    fn test_reveal_order_verifies_against_prior_publication() {
        let mut chain = SeedChain::generate(8).unwrap();
        let mut published = chain.commitment();
        for _ in 0..8 {
            let revealed = chain.current_seed().unwrap();
            assert_eq!(seed_hash(&revealed), published);
            published = revealed;
            chain.advance().unwrap();
        }
    }

    #[test]
    fn test_exhaustion_fails_loudly() {
        let mut chain = SeedChain::generate(2).unwrap();
        chain.advance().unwrap();
        chain.advance().unwrap();
        assert!(matches!(
            chain.current_seed(),
            Err(SeedChainError::Exhausted { consumed: 2 })
        ));
        assert!(chain.advance().is_err());
    }

    #[test]
    fn test_fresh_chain_publishes_fresh_commitment() {
        let first = SeedChain::generate(4).unwrap();
        let second = SeedChain::generate(4).unwrap();
        assert_ne!(first.commitment(), second.commitment());
    }

    #[test]
    fn test_zero_length_rejected() {
        assert!(matches!(
            SeedChain::generate(0),
            Err(SeedChainError::EmptyChain)
        ));
    }
}
