//! Short-history memory structures.

pub mod episodic;

pub use episodic::{Episode, EpisodicBuffer};
