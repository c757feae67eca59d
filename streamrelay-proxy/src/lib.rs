//! Hostile-origin handling: SOCKS5 proxy rotation (§4.3) and bot-challenge
//! solving (§4.4). Providers that sit behind an anti-bot front door or a
//! geo/IP-blocked origin route their outbound HTTP through these two
//! collaborators rather than hitting the origin directly.

pub mod challenge;
pub mod proxy_rotator;

pub use challenge::{is_challenge, ChallengeError, ChallengeSolver, SolveOutcome};
pub use proxy_rotator::{ProxyEndpoint, ProxyRotator, ProxyRotatorError};
